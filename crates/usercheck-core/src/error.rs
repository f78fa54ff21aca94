//! Error taxonomy for a harness run.
//!
//! Fatal categories ([`HarnessError::StartupFailure`],
//! [`HarnessError::ReadinessTimeout`], [`HarnessError::CleanupAborted`])
//! short-circuit the remaining phases. Teardown failures are only ever
//! logged and attached to the final report. Scenario assertion failures are
//! not errors at all; see [`crate::scenario::AssertionFailure`].

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the harness components.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The service process could not be spawned, or exited before it ever
    /// answered a readiness probe.
    #[error("service failed to start: {reason}{}", format_tail(.output_tail))]
    StartupFailure {
        reason: String,
        /// Last lines of captured service output, oldest first.
        output_tail: Vec<String>,
    },

    /// The service process exists but never answered within the deadline.
    #[error(
        "service at {url} did not become ready within {:?} ({attempts} attempts, last: {last}){}",
        .waited, format_tail(.output_tail)
    )]
    ReadinessTimeout {
        url: String,
        waited: Duration,
        attempts: u32,
        last: String,
        output_tail: Vec<String>,
    },

    /// The initial listing of the collection failed with something other
    /// than "not found"; cleanup cannot even begin.
    #[error("cannot reconcile {url}: {reason}")]
    CleanupAborted { url: String, reason: String },

    /// Stopping an owned service process failed. Never escalated.
    #[error("failed to terminate service process {pid}: {reason}")]
    Teardown { pid: u32, reason: String },

    /// The run was cancelled before it could complete.
    #[error("harness run cancelled during {phase}")]
    Cancelled { phase: String },

    /// A scenario name passed as a filter does not exist.
    #[error("unknown scenario {name:?} (available: {available})")]
    UnknownScenario { name: String, available: String },

    /// A configured URL could not be parsed.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The orchestrator attempted a transition outside its state graph.
    #[error("invalid harness transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Transport-level HTTP failure (connection refused, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    /// Whether this error aborts the run (as opposed to being collected).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Teardown { .. })
    }
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n--- service output ---\n{}", tail.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_failure_includes_output_tail() {
        let err = HarnessError::StartupFailure {
            reason: "exited with status 3".to_string(),
            output_tail: vec!["[stderr] boom".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("exited with status 3"), "got: {msg}");
        assert!(msg.contains("[stderr] boom"), "got: {msg}");
    }

    #[test]
    fn startup_failure_without_output_has_no_trailer() {
        let err = HarnessError::StartupFailure {
            reason: "no such file".to_string(),
            output_tail: vec![],
        };
        assert!(!err.to_string().contains("service output"));
    }

    #[test]
    fn teardown_is_not_fatal() {
        let err = HarnessError::Teardown {
            pid: 1,
            reason: "gone".to_string(),
        };
        assert!(!err.is_fatal());
        let err = HarnessError::Cancelled {
            phase: "starting".to_string(),
        };
        assert!(err.is_fatal());
    }
}
