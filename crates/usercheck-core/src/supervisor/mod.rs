//! Lifecycle management for the dependent service process.
//!
//! The [`ProcessSupervisor`] owns at most one [`ServiceHandle`]. It never
//! takes ownership of a service it did not start: if the probe URL already
//! answers, [`ProcessSupervisor::ensure_running`] returns
//! [`Ownership::AlreadyRunning`] and [`ProcessSupervisor::terminate`] stays a
//! no-op.

pub mod output;
pub mod spec;
pub mod terminator;

use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::probe::{HealthProbe, ProbeTimeout};

pub use output::{OutputLine, OutputLog, OutputStream};
pub use spec::StartSpec;
pub use terminator::{ProcessTerminator, SignalTerminator, TerminatorKind, TreeKillTerminator};

/// Number of output lines attached to startup errors.
const ERROR_TAIL_LINES: usize = 20;
/// How long to let capture tasks drain after the process exits.
const CAPTURE_DRAIN: Duration = Duration::from_secs(2);

/// Whether the harness owns the service it is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The service answered before anything was spawned. Never torn down.
    AlreadyRunning,
    /// The supervisor spawned the service and must stop it.
    Started { pid: u32 },
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => f.write_str("already running (not owned)"),
            Self::Started { pid } => write!(f, "started (pid {pid})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
}

/// A spawned service process and its captured output.
pub struct ServiceHandle {
    pid: u32,
    child: Child,
    platform: TerminatorKind,
    state: ServiceState,
    output: OutputLog,
    capture: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn platform(&self) -> TerminatorKind {
        self.platform
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Poll for exit without blocking; marks the handle stopped if so.
    pub fn has_exited(&mut self) -> bool {
        if self.state == ServiceState::Stopped {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.pid, %status, "service process has exited");
                self.state = ServiceState::Stopped;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "error checking service process status");
                false
            }
        }
    }

    async fn drain_capture(&mut self) {
        let tasks = std::mem::take(&mut self.capture);
        if tokio::time::timeout(CAPTURE_DRAIN, join_all(tasks)).await.is_err() {
            debug!(pid = self.pid, "output capture did not finish draining");
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("pid", &self.pid)
            .field("platform", &self.platform)
            .field("state", &self.state)
            .field("output_lines", &self.output.len())
            .finish()
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if self.state == ServiceState::Running {
            // kill_on_drop on the command does the actual kill.
            warn!(pid = self.pid, "service handle dropped while running; killing process");
        }
    }
}

/// Spawns, monitors, and terminates the dependent service.
pub struct ProcessSupervisor {
    probe: HealthProbe,
    terminator: Box<dyn ProcessTerminator>,
    readiness_timeout: Duration,
    poll_interval: Duration,
    output_capacity: usize,
    current: Option<ServiceHandle>,
    last_output: Option<OutputLog>,
}

impl ProcessSupervisor {
    /// Create a supervisor using the platform's termination strategy.
    pub fn new(readiness_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            probe: HealthProbe::new(),
            terminator: TerminatorKind::for_platform().terminator(),
            readiness_timeout,
            poll_interval,
            output_capacity: output::DEFAULT_OUTPUT_CAPACITY,
            current: None,
            last_output: None,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.readiness_timeout, config.poll_interval)
    }

    pub fn with_terminator(mut self, terminator: Box<dyn ProcessTerminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_output_capacity(mut self, lines: usize) -> Self {
        self.output_capacity = lines;
        self
    }

    /// The currently owned process, if any.
    pub fn handle(&self) -> Option<&ServiceHandle> {
        self.current.as_ref()
    }

    pub fn owns_process(&self) -> bool {
        self.current.is_some()
    }

    /// Output of the current process, or of the last one after it stopped.
    pub fn output(&self) -> Option<&OutputLog> {
        self.current
            .as_ref()
            .map(|h| &h.output)
            .or(self.last_output.as_ref())
    }

    /// Make sure the service at `probe_url` is answering.
    ///
    /// If it already answers, nothing is spawned and no ownership is taken.
    /// Otherwise `spec` is spawned and probed until ready. A spawn error, a
    /// failing exit before readiness, or a missing `spec` is a
    /// [`HarnessError::StartupFailure`]. A process that exits with status 0
    /// is treated as a launcher and probing continues to the deadline. A
    /// service that never answers is a [`HarnessError::ReadinessTimeout`];
    /// a still-running process is terminated before returning.
    pub async fn ensure_running(
        &mut self,
        probe_url: &str,
        spec: Option<&StartSpec>,
    ) -> Result<Ownership, HarnessError> {
        if let Some(handle) = self.current.as_mut() {
            if !handle.has_exited() {
                return Ok(Ownership::Started { pid: handle.pid });
            }
            self.last_output = self.current.take().map(|h| h.output.clone());
        }

        let quick = self
            .probe
            .probe_once(probe_url, self.poll_interval.max(Duration::from_millis(500)))
            .await;
        if quick.is_ready() {
            info!(url = probe_url, "service already running; not taking ownership");
            return Ok(Ownership::AlreadyRunning);
        }
        debug!(url = probe_url, result = %quick, "service not answering; starting it");

        let Some(spec) = spec else {
            return Err(HarnessError::StartupFailure {
                reason: format!(
                    "nothing is answering at {probe_url} and no service start command is configured"
                ),
                output_tail: Vec::new(),
            });
        };

        let mut handle = self.spawn(spec)?;
        info!(pid = handle.pid, command = %spec, "spawned service process");

        let waited = {
            let readiness =
                self.probe
                    .wait_until_ready(probe_url, self.readiness_timeout, self.poll_interval);
            tokio::pin!(readiness);
            let first = tokio::select! {
                ready = &mut readiness => Ok(ready),
                status = handle.child.wait() => Err(status),
            };
            match first {
                // A launcher that daemonizes exits 0 while the service lives on.
                Err(Ok(status)) if status.success() => {
                    handle.state = ServiceState::Stopped;
                    info!(
                        pid = handle.pid,
                        "service command exited cleanly; waiting for the service to answer"
                    );
                    Ok(readiness.await)
                }
                other => other,
            }
        };

        match waited {
            Ok(Ok(readiness)) => {
                info!(
                    pid = handle.pid,
                    attempts = readiness.attempts,
                    elapsed_ms = readiness.elapsed.as_millis() as u64,
                    "service is ready"
                );
                let pid = handle.pid;
                self.current = Some(handle);
                Ok(Ownership::Started { pid })
            }
            Ok(Err(timeout)) => Err(self.abandon_unready(handle, timeout).await),
            Err(exit) => {
                handle.state = ServiceState::Stopped;
                handle.drain_capture().await;
                let reason = match exit {
                    Ok(status) => format!("service exited with {status} before becoming ready"),
                    Err(e) => format!("failed to wait on service process: {e}"),
                };
                let output_tail = handle.output.tail_strings(ERROR_TAIL_LINES);
                self.last_output = Some(handle.output.clone());
                Err(HarnessError::StartupFailure {
                    reason,
                    output_tail,
                })
            }
        }
    }

    /// Stop the owned process, if any.
    ///
    /// Idempotent: a no-op when nothing is owned or the process has already
    /// exited. The handle is discarded whether or not termination succeeds.
    pub async fn terminate(&mut self) -> Result<(), HarnessError> {
        let Some(mut handle) = self.current.take() else {
            debug!("no owned service process; nothing to terminate");
            return Ok(());
        };
        let pid = handle.pid;

        let result = if handle.has_exited() {
            info!(pid, "service process already exited");
            Ok(())
        } else {
            info!(pid, strategy = %self.terminator.kind(), "terminating service process");
            self.terminator.terminate(&mut handle.child, pid).await
        };

        handle.state = ServiceState::Stopped;
        handle.drain_capture().await;
        self.last_output = Some(handle.output.clone());

        result.map_err(|e| {
            warn!(pid, error = %e, "failed to terminate service process");
            HarnessError::Teardown {
                pid,
                reason: format!("{e:#}"),
            }
        })
    }

    fn spawn(&self, spec: &StartSpec) -> Result<ServiceHandle, HarnessError> {
        let mut child = spec
            .command()
            .spawn()
            .map_err(|e| HarnessError::StartupFailure {
                reason: format!("failed to spawn `{spec}`: {e}"),
                output_tail: Vec::new(),
            })?;

        let pid = child.id().ok_or_else(|| HarnessError::StartupFailure {
            reason: format!("`{spec}` exited immediately (no pid)"),
            output_tail: Vec::new(),
        })?;

        let output = OutputLog::new(self.output_capacity);
        let mut capture = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            capture.push(output::spawn_capture(stdout, OutputStream::Stdout, pid, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            capture.push(output::spawn_capture(stderr, OutputStream::Stderr, pid, output.clone()));
        }

        Ok(ServiceHandle {
            pid,
            child,
            platform: self.terminator.kind(),
            state: ServiceState::Running,
            output,
            capture,
        })
    }

    /// Stop a spawned process that never became ready and build the error.
    async fn abandon_unready(&mut self, mut handle: ServiceHandle, timeout: ProbeTimeout) -> HarnessError {
        warn!(
            pid = handle.pid,
            attempts = timeout.attempts,
            last = %timeout.last,
            "service did not become ready; terminating it"
        );
        if !handle.has_exited() {
            if let Err(e) = self.terminator.terminate(&mut handle.child, handle.pid).await {
                warn!(pid = handle.pid, error = %e, "failed to terminate unready service");
            }
        }
        handle.state = ServiceState::Stopped;
        handle.drain_capture().await;
        self.last_output = Some(handle.output.clone());

        HarnessError::ReadinessTimeout {
            url: timeout.url,
            waited: timeout.waited,
            attempts: timeout.attempts,
            last: timeout.last.to_string(),
            output_tail: handle.output.tail_strings(ERROR_TAIL_LINES),
        }
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("terminator", &self.terminator.kind())
            .field("readiness_timeout", &self.readiness_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("current", &self.current)
            .finish()
    }
}
