//! Per-action lifecycle
//!
//! ```text
//! PENDING -> RUNNING -> { CHANGED, UNCHANGED, FAILED }
//! PENDING -> SKIPPED
//! ```
//!
//! Nodes that need no mutation (in sync, or failed while diffing) settle
//! straight from PENDING into UNCHANGED or FAILED without running.

use crate::error::StateMachineError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Running,
    Changed,
    Unchanged,
    Failed,
    Skipped,
}

impl ActionState {
    /// No further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }

    /// Terminal states that block dependents
    #[inline]
    #[must_use]
    pub fn blocks_dependents(self) -> bool {
        matches!(self, ActionState::Failed | ActionState::Skipped)
    }
}

/// Validates a state transition
pub fn validate_transition(from: ActionState, to: ActionState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: ActionState) -> Vec<ActionState> {
    use ActionState::*;
    match from {
        Pending => vec![Running, Skipped, Unchanged, Failed],
        Running => vec![Changed, Unchanged, Failed],
        Changed | Unchanged | Failed | Skipped => vec![],
    }
}

/// Tracks the state of every node in a plan
#[derive(Debug, Clone)]
pub struct StateTable {
    states: Vec<ActionState>,
}

impl StateTable {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            states: vec![ActionState::Pending; len],
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> ActionState {
        self.states[index]
    }

    pub fn transition(&mut self, index: usize, to: ActionState) -> Result<(), StateMachineError> {
        validate_transition(self.states[index], to)?;
        self.states[index] = to;
        Ok(())
    }

    /// Whether every node reached a terminal state
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.states.iter().all(|state| state.is_terminal())
    }
}
