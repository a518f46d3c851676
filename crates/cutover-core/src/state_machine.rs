//! Cutover state machine
//!
//! `Idle → Capturing → Stopping → Building → Launching → AwaitingReady → Ready`.
//! Any non-terminal state may move to `Failed`.

use crate::error::CutoverError;
use serde::{Deserialize, Serialize};

/// Phase of one cutover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CutoverState {
    Idle,
    Capturing,
    Stopping,
    Building,
    Launching,
    AwaitingReady,
    Ready,
    Failed,
}

impl CutoverState {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for CutoverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Validates a state transition.
///
/// # Errors
/// `CutoverError::IllegalTransition` for anything outside the allowed edges
pub fn validate_transition(from: CutoverState, to: CutoverState) -> Result<(), CutoverError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(CutoverError::IllegalTransition { from, to })
    }
}

#[must_use]
pub fn allowed_transitions(from: CutoverState) -> Vec<CutoverState> {
    use CutoverState::*;
    match from {
        Idle => vec![Capturing, Failed],
        Capturing => vec![Stopping, Failed],
        Stopping => vec![Building, Failed],
        Building => vec![Launching, Failed],
        Launching => vec![AwaitingReady, Failed],
        AwaitingReady => vec![Ready, Failed],
        Ready | Failed => vec![],
    }
}
