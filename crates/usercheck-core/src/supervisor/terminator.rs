//! Platform-specific termination of an owned service process.
//!
//! Two strategies, chosen once when the supervisor is built:
//!
//! - [`SignalTerminator`]: send SIGTERM directly and block until the exit is
//!   observed. There is no timeout; a process that ignores the signal blocks
//!   teardown.
//! - [`TreeKillTerminator`]: run a forceful tree kill (`taskkill /T /F`) and
//!   block until that command finishes. The target's exit is not awaited, so
//!   this is best effort.

use std::fmt;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

/// Which termination strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorKind {
    Signal,
    TreeKill,
}

impl TerminatorKind {
    /// Tree kill on Windows, where children can escape a plain kill;
    /// signals everywhere else.
    pub fn for_platform() -> Self {
        if cfg!(windows) {
            Self::TreeKill
        } else {
            Self::Signal
        }
    }

    pub fn terminator(self) -> Box<dyn ProcessTerminator> {
        match self {
            Self::Signal => Box::new(SignalTerminator),
            Self::TreeKill => Box::new(TreeKillTerminator::new()),
        }
    }
}

impl fmt::Display for TerminatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => f.write_str("signal"),
            Self::TreeKill => f.write_str("tree-kill"),
        }
    }
}

/// Stops a running child process.
///
/// Implementations may assume the child has not yet been observed to exit;
/// the supervisor checks that first.
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    fn kind(&self) -> TerminatorKind;

    async fn terminate(&self, child: &mut Child, pid: u32) -> Result<()>;
}

/// SIGTERM, then wait for exit with no deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTerminator;

#[async_trait]
impl ProcessTerminator for SignalTerminator {
    fn kind(&self) -> TerminatorKind {
        TerminatorKind::Signal
    }

    async fn terminate(&self, child: &mut Child, pid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            let raw = i32::try_from(pid).context("pid does not fit in pid_t")?;
            // SAFETY: `pid` belongs to a child we spawned and have not reaped,
            // so it cannot have been recycled for another process.
            let ret = unsafe { libc::kill(raw, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(err).with_context(|| format!("SIGTERM to pid {pid} failed"));
                }
                debug!(pid, "process already gone when signalled");
            }
        }
        #[cfg(not(unix))]
        {
            child
                .start_kill()
                .with_context(|| format!("failed to kill pid {pid}"))?;
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("failed to wait for pid {pid}"))?;
        debug!(pid, %status, "service process exited");
        Ok(())
    }
}

/// Forceful process-tree kill via an external command.
#[derive(Debug, Clone)]
pub struct TreeKillTerminator {
    program: String,
}

impl TreeKillTerminator {
    pub fn new() -> Self {
        Self::with_program("taskkill")
    }

    /// Use a different kill program; it receives `/PID <pid> /T /F`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for TreeKillTerminator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessTerminator for TreeKillTerminator {
    fn kind(&self) -> TerminatorKind {
        TerminatorKind::TreeKill
    }

    async fn terminate(&self, child: &mut Child, pid: u32) -> Result<()> {
        let output = Command::new(&self.program)
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        // Completion of the kill command is the only guarantee; just note
        // whether the exit is already visible.
        match child.try_wait() {
            Ok(Some(status)) => debug!(pid, %status, "service process exited"),
            Ok(None) => debug!(pid, "tree kill finished; exit not yet observed"),
            Err(e) => debug!(pid, error = %e, "could not query exit status"),
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    fn spawn_sleeper() -> (Child, u32) {
        let child = Command::new("sleep")
            .arg("60")
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("sleep should spawn");
        let pid = child.id().expect("running child has a pid");
        (child, pid)
    }

    #[test]
    fn platform_default_is_signal_on_unix() {
        assert_eq!(TerminatorKind::for_platform(), TerminatorKind::Signal);
        assert_eq!(TerminatorKind::Signal.terminator().kind(), TerminatorKind::Signal);
        assert_eq!(TerminatorKind::TreeKill.to_string(), "tree-kill");
    }

    #[tokio::test]
    async fn signal_terminator_waits_for_exit() {
        let (mut child, pid) = spawn_sleeper();
        tokio::time::timeout(Duration::from_secs(10), SignalTerminator.terminate(&mut child, pid))
            .await
            .expect("SIGTERM should stop sleep promptly")
            .expect("terminate should succeed");
        assert!(child.try_wait().unwrap().is_some(), "exit should be observed");
    }

    #[tokio::test]
    async fn tree_kill_does_not_wait_for_target() {
        // `true` ignores its arguments and succeeds without killing anything,
        // which shows the call returns once the kill command completes.
        let (mut child, pid) = spawn_sleeper();
        TreeKillTerminator::with_program("true")
            .terminate(&mut child, pid)
            .await
            .expect("kill command succeeded");
        assert!(child.try_wait().unwrap().is_none(), "target is still running");
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn tree_kill_reports_failing_command() {
        let (mut child, pid) = spawn_sleeper();
        let err = TreeKillTerminator::with_program("false")
            .terminate(&mut child, pid)
            .await
            .expect_err("non-zero exit is an error");
        assert!(err.to_string().contains("false exited"), "got: {err}");
        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn tree_kill_reports_missing_program() {
        let (mut child, pid) = spawn_sleeper();
        let result = TreeKillTerminator::with_program("usercheck-no-such-kill-binary")
            .terminate(&mut child, pid)
            .await;
        assert!(result.is_err());
        child.kill().await.unwrap();
    }
}
