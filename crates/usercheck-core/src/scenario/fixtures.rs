//! Unique fixture values.
//!
//! Names combine a millisecond timestamp with a random suffix so that
//! scenarios never collide with each other or with earlier runs, even if
//! they are ever executed in parallel.

use chrono::Utc;
use rand::distr::{Alphanumeric, SampleString};

use crate::client::UserFields;

/// An id no real service will have assigned.
pub const MISSING_USER_ID: i64 = 999_999_999;

/// `<prefix>_<yyyymmddHHMMSSmmm>_<6 random chars>`, lowercase.
pub fn unique_name(prefix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    let suffix = Alphanumeric
        .sample_string(&mut rand::rng(), 6)
        .to_lowercase();
    format!("{prefix}_{stamp}_{suffix}")
}

/// A fresh username/email pair.
pub fn unique_user(prefix: &str) -> UserFields {
    let name = unique_name(prefix);
    let email = format!("{name}@example.com");
    UserFields::new(name, email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let names: HashSet<String> = (0..200).map(|_| unique_name("u")).collect();
        assert_eq!(names.len(), 200);
    }

    #[test]
    fn name_shape() {
        let name = unique_name("dup");
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.len(), 3, "{name}");
        assert_eq!(parts[0], "dup");
        assert_eq!(parts[1].len(), 17);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(name, name.to_lowercase());
    }

    #[test]
    fn user_email_derives_from_name() {
        let user = unique_user("u");
        assert_eq!(user.email, format!("{}@example.com", user.username));
        assert!(user.username.len() <= 80);
    }
}
