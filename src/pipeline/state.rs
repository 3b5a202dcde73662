//! Pipeline state management

use crate::error::{Error, Result};

/// Lifecycle of the encoder-facing components (encoders, controller).
///
/// Transitions only move forward; `Running → Running` (repeated pushes) is the
/// single self-transition. `Flushed` and `Closed` end a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Created, not initialized yet
    #[default]
    Uninitialized,

    /// Accepting frames
    Running,

    /// Drained; no more frames accepted
    Flushed,

    /// Resources released
    Closed,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            // From Uninitialized
            (Uninitialized, Running) => true,
            (Uninitialized, Closed) => true, // never started

            // From Running
            (Running, Running) => true,
            (Running, Flushed) => true,
            (Running, Closed) => true, // aborted mid-stream

            // From Flushed
            (Flushed, Closed) => true,

            // Closed is terminal
            _ => false,
        }
    }

    /// Move to `target` or fail with [`Error::InvalidState`] naming the
    /// rejected operation.
    pub fn transition(
        &mut self,
        target: PipelineState,
        component: &'static str,
        operation: &'static str,
    ) -> Result<()> {
        if !self.can_transition_to(&target) {
            return Err(Error::invalid_state(component, operation, *self));
        }
        *self = target;
        Ok(())
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Uninitialized => "Uninitialized",
            PipelineState::Running => "Running",
            PipelineState::Flushed => "Flushed",
            PipelineState::Closed => "Closed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PipelineState::Closed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
