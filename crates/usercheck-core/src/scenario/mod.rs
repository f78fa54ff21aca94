//! HTTP scenarios exercising the users service contract.
//!
//! A [`Scenario`] is one ordered sequence of requests and assertions. The
//! [`ScenarioRunner`] executes scenarios one after another; a failing
//! scenario is recorded and the next one still runs.

pub mod builtin;
pub mod context;
pub mod fixtures;
pub mod runner;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub use builtin::{Builtin, default_scenarios};
pub use context::ScenarioContext;
pub use runner::ScenarioRunner;

/// One named, independently failable sequence of requests.
///
/// Scenarios create their own uniquely named fixtures and register every id
/// they create with the [`ScenarioContext`], so the runner can remove
/// leftovers afterwards.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError>;
}

// Compile-time assertion: Scenario must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Scenario) {}
};

/// An expectation that did not hold, with the exchange that broke it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub step: String,
    pub expected: String,
    pub actual: String,
    /// `METHOD url body -> status body` of the offending exchange.
    pub exchange: Option<String>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step `{}`: expected {}, got {}",
            self.step, self.expected, self.actual
        )?;
        if let Some(exchange) = &self.exchange {
            write!(f, "\n    {exchange}")?;
        }
        Ok(())
    }
}

/// Why a scenario did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    Assertion(AssertionFailure),
    /// The request itself failed (connection refused, timeout, ...).
    Transport { step: String, reason: String },
    Cancelled,
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion(failure) => write!(f, "{failure}"),
            Self::Transport { step, reason } => write!(f, "step `{step}`: request failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for ScenarioError {}

impl From<AssertionFailure> for ScenarioError {
    fn from(failure: AssertionFailure) -> Self {
        Self::Assertion(failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioStatus {
    Passed,
    Failed(ScenarioError),
    /// Not started because the run was cancelled first.
    Skipped,
}

/// Result of one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: String,
    pub status: ScenarioStatus,
    pub duration: Duration,
    /// Requests issued by the scenario body.
    pub steps: usize,
    /// Fixture records the runner could not remove afterwards.
    pub cleanup_errors: Vec<String>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    pub fn failure(&self) -> Option<&ScenarioError> {
        match &self.status {
            ScenarioStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_failure_display_includes_exchange() {
        let failure = AssertionFailure {
            step: "create user".to_string(),
            expected: "status 201".to_string(),
            actual: "status 400".to_string(),
            exchange: Some("POST http://x/api/users -> 400 {}".to_string()),
        };
        let text = ScenarioError::from(failure).to_string();
        assert!(text.starts_with("step `create user`: expected status 201, got status 400"));
        assert!(text.contains("POST http://x/api/users"));
    }

    #[test]
    fn outcome_failure_accessor() {
        let outcome = ScenarioOutcome {
            name: "x".to_string(),
            status: ScenarioStatus::Failed(ScenarioError::Cancelled),
            duration: Duration::ZERO,
            steps: 0,
            cleanup_errors: vec![],
        };
        assert!(!outcome.passed());
        assert_eq!(outcome.failure(), Some(&ScenarioError::Cancelled));
    }
}
