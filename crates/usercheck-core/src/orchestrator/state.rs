//! Harness lifecycle states.

use std::fmt;

use crate::error::HarnessError;

/// Phase of a harness run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarnessState {
    NotStarted,
    Starting,
    Ready,
    Cleaning,
    Running,
    TearingDown,
    Done,
    FatalAborted,
}

impl HarnessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::FatalAborted)
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Cleaning => "cleaning",
            Self::Running => "running",
            Self::TearingDown => "tearing_down",
            Self::Done => "done",
            Self::FatalAborted => "fatal_aborted",
        };
        f.write_str(s)
    }
}

/// The harness state machine.
///
/// Enforces the transition graph:
///
/// ```text
/// not_started  -> starting
/// starting     -> ready
/// starting     -> fatal_aborted   (spawn failure, readiness timeout)
/// ready        -> cleaning
/// cleaning     -> running
/// cleaning     -> fatal_aborted   (initial listing failed)
/// running      -> tearing_down    (service owned by the harness)
/// running      -> done            (service was already running)
/// tearing_down -> done
/// ```
#[derive(Debug, Clone)]
pub struct HarnessStateMachine {
    state: HarnessState,
    history: Vec<HarnessState>,
}

impl HarnessStateMachine {
    pub fn new() -> Self {
        Self {
            state: HarnessState::NotStarted,
            history: vec![HarnessState::NotStarted],
        }
    }

    pub fn is_valid_transition(from: HarnessState, to: HarnessState) -> bool {
        use HarnessState::*;
        matches!(
            (from, to),
            (NotStarted, Starting)
                | (Starting, Ready)
                | (Starting, FatalAborted)
                | (Ready, Cleaning)
                | (Cleaning, Running)
                | (Cleaning, FatalAborted)
                | (Running, TearingDown)
                | (Running, Done)
                | (TearingDown, Done)
        )
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// Every state entered so far, starting with `not_started`.
    pub fn history(&self) -> &[HarnessState] {
        &self.history
    }

    pub fn advance(&mut self, to: HarnessState) -> Result<(), HarnessError> {
        if !Self::is_valid_transition(self.state, to) {
            return Err(HarnessError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %self.state, to = %to, "harness transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

impl Default for HarnessStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
