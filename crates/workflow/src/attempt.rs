//! The lifecycle of one generation attempt.
//!
//! ```text
//! Requested -> ContextBuilt -> Generating -> Parsed -> Graded -> Validated
//! Validated -> Accepted | RevisionRequested
//! any non-terminal state -> Failed
//! ```
//!
//! Attempts are not persisted; the audit trail records their outcome.

use pke_core::invocation::Invocation;
use std::time::Instant;

use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Requested,
    ContextBuilt,
    Generating,
    Parsed,
    Graded,
    Validated,
    Accepted,
    RevisionRequested,
    Failed,
}

impl AttemptState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::Requested => "requested",
            AttemptState::ContextBuilt => "context_built",
            AttemptState::Generating => "generating",
            AttemptState::Parsed => "parsed",
            AttemptState::Graded => "graded",
            AttemptState::Validated => "validated",
            AttemptState::Accepted => "accepted",
            AttemptState::RevisionRequested => "revision_requested",
            AttemptState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Accepted | AttemptState::RevisionRequested | AttemptState::Failed
        )
    }

    fn can_move_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Requested, ContextBuilt)
            | (ContextBuilt, Generating)
            | (Generating, Parsed)
            | (Parsed, Graded)
            | (Graded, Validated)
            | (Validated, Accepted)
            | (Validated, RevisionRequested) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Attempt {
    pub invocation: Invocation,
    state: AttemptState,
    started: Instant,
}

impl Attempt {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            state: AttemptState::Requested,
            started: Instant::now(),
        }
    }

    /// An attempt whose content was produced by an earlier request and is
    /// now being accepted or sent back for revision.
    pub fn validated(invocation: Invocation) -> Self {
        Self {
            state: AttemptState::Validated,
            ..Self::new(invocation)
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn advance(&mut self, next: AttemptState) -> Result<(), WorkflowError> {
        if !self.state.can_move_to(next) {
            return Err(WorkflowError::IllegalTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark the attempt failed. A no-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = AttemptState::Failed;
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttemptState::*;

    #[test]
    fn happy_path_reaches_accepted() {
        let mut attempt = Attempt::new(Invocation::Description);
        for next in [ContextBuilt, Generating, Parsed, Graded, Validated, Accepted] {
            attempt.advance(next).unwrap();
        }
        assert_eq!(attempt.state(), Accepted);
        assert!(attempt.state().is_terminal());
    }

    #[test]
    fn skipping_a_state_is_illegal() {
        let mut attempt = Attempt::new(Invocation::Objectives);
        let err = attempt.advance(Parsed).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(attempt.state(), Requested);
    }

    #[test]
    fn terminal_states_do_not_fail_again() {
        let mut attempt = Attempt::validated(Invocation::Structure);
        attempt.advance(RevisionRequested).unwrap();
        attempt.fail();
        assert_eq!(attempt.state(), RevisionRequested);
        assert!(attempt.advance(Failed).is_err());
    }

    #[test]
    fn any_live_state_can_fail() {
        for state in [Requested, ContextBuilt, Generating, Parsed, Graded, Validated] {
            assert!(state.can_move_to(Failed), "{state} should be able to fail");
        }
    }
}
