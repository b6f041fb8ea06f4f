//! Run phases
//!
//! One integration run moves strictly forward through
//! `Start → EnvReady → TopologyReady → RouteReady → Done`. Any phase may
//! drop into `Failed`, which is terminal.

use std::fmt;

use serde::Serialize;

use crate::error::IntegrationError;

/// Phase of an integration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Stores opened, host name derived
    Start,
    /// Environment keys and set members ensured
    EnvReady,
    /// Service and volume blocks ensured
    TopologyReady,
    /// Route block ensured
    RouteReady,
    /// Report returned
    Done,
    /// Aborted; remaining phases skipped
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::EnvReady => "env",
            Self::TopologyReady => "topology",
            Self::RouteReady => "route",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    use Phase::*;
    match from {
        Start => &[EnvReady, Failed],
        EnvReady => &[TopologyReady, Failed],
        TopologyReady => &[RouteReady, Failed],
        RouteReady => &[Done, Failed],
        Done | Failed => &[],
    }
}

/// Check a single transition
///
/// # Errors
/// `IntegrationError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), IntegrationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IntegrationError::IllegalTransition { from, to })
    }
}

/// Current phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTracker {
    current: Phase,
}

impl PhaseTracker {
    /// Tracker positioned at `Start`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Phase::Start,
        }
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Move to `to`
    ///
    /// # Errors
    /// `IntegrationError::IllegalTransition` if the move is not allowed
    pub fn advance(&mut self, to: Phase) -> Result<(), IntegrationError> {
        validate_transition(self.current, to)?;
        tracing::debug!(from = %self.current, to = %to, "phase transition");
        self.current = to;
        Ok(())
    }

    /// Mark the run failed, returning the phase that failed
    pub fn fail(&mut self) -> Phase {
        let failed_in = self.current;
        if allowed_transitions(failed_in).contains(&Phase::Failed) {
            self.current = Phase::Failed;
        }
        failed_in
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
