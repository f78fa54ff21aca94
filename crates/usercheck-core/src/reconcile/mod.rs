//! Bring the users collection to an empty baseline.
//!
//! The reconciler only uses the service's own API: list, delete each record
//! one at a time, then list again to verify. A failed delete is recorded
//! against its record and the pass continues. Only an initial listing
//! failure other than `404` aborts.

use std::fmt;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::client::{ApiResponse, UserRecord, UsersClient};
use crate::error::HarnessError;

/// A failure attributed to one record (or to the verification listing,
/// when `id` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub id: Option<i64>,
    pub reason: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "user {id}: {}", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// What a reconciliation pass saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Records visible in the initial listing.
    pub seen: usize,
    /// Records the service acknowledged deleting.
    pub deleted: usize,
    /// Records still visible in the verification listing.
    pub remaining: usize,
    /// The still-visible records themselves.
    pub residue: Vec<UserRecord>,
    pub errors: Vec<RecordError>,
}

impl ReconciliationReport {
    /// Empty collection and no errors.
    pub fn is_clean(&self) -> bool {
        self.remaining == 0 && self.errors.is_empty()
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen {}, deleted {}, remaining {}, errors {}",
            self.seen,
            self.deleted,
            self.remaining,
            self.errors.len()
        )
    }
}

/// Drives the collection to empty through the service's API.
#[derive(Debug, Clone)]
pub struct DatasetReconciler {
    client: UsersClient,
}

impl DatasetReconciler {
    pub fn new(client: UsersClient) -> Self {
        Self { client }
    }

    /// Delete every visible user, then verify the collection is empty.
    ///
    /// Never fails because of an individual record; residue and per-record
    /// errors are returned in the report for the caller to act on.
    pub async fn reset_collection(&self) -> Result<ReconciliationReport, HarnessError> {
        let url = self.client.endpoint().to_string();
        let listing = self
            .client
            .list()
            .await
            .map_err(|e| HarnessError::CleanupAborted {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if listing.status == StatusCode::NOT_FOUND {
            info!(url = %url, "collection not found; nothing to clean");
            return Ok(ReconciliationReport::default());
        }
        let users = decode_listing(&listing).map_err(|reason| HarnessError::CleanupAborted {
            url: url.clone(),
            reason,
        })?;

        let mut report = ReconciliationReport {
            seen: users.len(),
            ..ReconciliationReport::default()
        };

        for user in &users {
            match self.client.delete(user.id).await {
                Ok(resp) if resp.status.is_success() => {
                    debug!(id = user.id, "deleted user");
                    report.deleted += 1;
                }
                Ok(resp) if resp.status == StatusCode::NOT_FOUND => {
                    debug!(id = user.id, "user already gone");
                }
                Ok(resp) => report.errors.push(RecordError {
                    id: Some(user.id),
                    reason: format!("delete returned {}: {}", resp.status, resp.body.trim()),
                }),
                Err(e) => report.errors.push(RecordError {
                    id: Some(user.id),
                    reason: format!("delete failed: {e}"),
                }),
            }
        }

        match self.client.list().await {
            Ok(resp) if resp.status == StatusCode::NOT_FOUND => {}
            Ok(resp) => match decode_listing(&resp) {
                Ok(residue) => {
                    report.remaining = residue.len();
                    report.residue = residue;
                }
                Err(reason) => report.errors.push(RecordError {
                    id: None,
                    reason: format!("verification listing: {reason}"),
                }),
            },
            Err(e) => report.errors.push(RecordError {
                id: None,
                reason: format!("verification listing failed: {e}"),
            }),
        }

        if report.is_clean() {
            info!(url = %url, seen = report.seen, deleted = report.deleted, "collection reset");
        } else {
            warn!(
                url = %url,
                remaining = report.remaining,
                errors = report.errors.len(),
                "collection not fully reset"
            );
            for err in &report.errors {
                warn!(url = %url, "cleanup error: {err}");
            }
        }
        Ok(report)
    }
}

fn decode_listing(resp: &ApiResponse) -> Result<Vec<UserRecord>, String> {
    if !resp.status.is_success() {
        return Err(format!("list returned {}: {}", resp.status, resp.body.trim()));
    }
    resp.json::<Vec<UserRecord>>()
        .map_err(|e| format!("list returned an unexpected body: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_is_clean() {
        let report = ReconciliationReport::default();
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "seen 0, deleted 0, remaining 0, errors 0");
    }

    #[test]
    fn residue_or_errors_make_report_dirty() {
        let report = ReconciliationReport {
            remaining: 1,
            ..Default::default()
        };
        assert!(!report.is_clean());

        let report = ReconciliationReport {
            errors: vec![RecordError {
                id: Some(3),
                reason: "delete returned 500".to_string(),
            }],
            ..Default::default()
        };
        assert!(!report.is_clean());
        assert_eq!(report.errors[0].to_string(), "user 3: delete returned 500");
    }
}
