use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// How to launch the dependent service.
///
/// Use [`StartSpec::new`] (or [`StartSpec::interpreted`]) and chain the
/// builder-style setters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartSpec {
    /// Executable to run (resolved via `$PATH` when not absolute).
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the harness's when `None`.
    pub working_dir: Option<PathBuf>,
    /// Variables merged into (not replacing) the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl StartSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// An interpreter running a script, with unbuffered output so startup
    /// crashes show up in the captured streams immediately.
    pub fn interpreted(interpreter: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(interpreter)
            .arg(script)
            .env("PYTHONUNBUFFERED", "1")
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Build the command with piped stdout/stderr and a closed stdin.
    ///
    /// `kill_on_drop` is set so that an abandoned handle (e.g. a cancelled
    /// future) never leaks the process.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for StartSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreted_sets_unbuffered_env() {
        let spec = StartSpec::interpreted("python3", "api.py");
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["api.py"]);
        assert_eq!(spec.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = StartSpec::new("python3").args(["-m", "flask", "run"]);
        assert_eq!(spec.to_string(), "python3 -m flask run");
    }

    #[test]
    fn builder_sets_working_dir() {
        let spec = StartSpec::new("sh").working_dir("/tmp");
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp")));
    }
}
