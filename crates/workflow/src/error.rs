//! Error taxonomy of the workflow engine.
//!
//! Every variant carries a stable machine-readable code via `code()`; the
//! gateway maps codes to HTTP statuses.

use pke_core::course::Stage;
use pke_core::error::{ProviderError, StoreError};
use pke_core::invocation::Invocation;
use thiserror::Error;

/// A request was rejected before any generation happened.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatingError {
    #[error("Course ID required")]
    NoCourseId,

    #[error("Course not found: {0}")]
    CourseNotFound(String),

    #[error("Access denied to this course")]
    AccessDenied,

    #[error("Course title must be saved before proceeding")]
    GateBFailed,

    #[error(
        "Invocation {invocation} requires invocation(s) {} to be completed first",
        join(.missing)
    )]
    PrerequisitesNotMet {
        invocation: Invocation,
        required: Vec<Invocation>,
        completed: Vec<Invocation>,
        missing: Vec<Invocation>,
    },

    #[error("Action not available in stage '{current}'")]
    WrongStage { current: Stage, allowed: Vec<Stage> },
}

impl GatingError {
    pub fn code(&self) -> &'static str {
        match self {
            GatingError::NoCourseId => "NO_COURSE_ID",
            GatingError::CourseNotFound(_) => "COURSE_NOT_FOUND",
            GatingError::AccessDenied => "ACCESS_DENIED",
            GatingError::GateBFailed => "GATE_B_FAILED",
            GatingError::PrerequisitesNotMet { .. } => "PREREQUISITES_NOT_MET",
            GatingError::WrongStage { .. } => "WRONG_STAGE",
        }
    }

    /// The gate that rejected the request, for the checks that belong to Gate B.
    pub fn gate(&self) -> Option<&'static str> {
        match self {
            GatingError::NoCourseId
            | GatingError::CourseNotFound(_)
            | GatingError::AccessDenied
            | GatingError::GateBFailed => Some("B"),
            _ => None,
        }
    }
}

fn join(invocations: &[Invocation]) -> String {
    invocations
        .iter()
        .map(|i| i.number().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The generation backend failed to produce usable text.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("LLM generation failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("LLM generation timed out after {0}s")]
    Timeout(u64),

    #[error("LLM generation returned empty content")]
    EmptyCompletion,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Gating(#[from] GatingError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Provide feedback or specific changes for revision")]
    RevisionInputRequired,

    #[error("Template content or template ID required")]
    TemplateRequired,

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid content for invocation {invocation}: {message}")]
    InvalidContent {
        invocation: Invocation,
        message: String,
    },

    #[error("Course {id} changed while accepting (expected version {expected}, found {actual})")]
    AcceptanceConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Course {id} was modified concurrently (expected version {expected}, found {actual})")]
    CourseConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Illegal attempt transition: {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Gating(e) => e.code(),
            WorkflowError::Generation(_) => "GENERATION_FAILED",
            WorkflowError::InvalidInvocation(_) => "INVALID_INVOCATION",
            WorkflowError::BadRequest(_) => "BAD_REQUEST",
            WorkflowError::RevisionInputRequired => "REVISION_INPUT_REQUIRED",
            WorkflowError::TemplateRequired => "TEMPLATE_REQUIRED",
            WorkflowError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            WorkflowError::InvalidContent { .. } => "INVALID_CONTENT",
            WorkflowError::AcceptanceConflict { .. } => "ACCEPTANCE_CONFLICT",
            WorkflowError::CourseConflict { .. } => "COURSE_CONFLICT",
            WorkflowError::IllegalTransition { .. } => "INTERNAL_ERROR",
            WorkflowError::Store(_) => "STORE_ERROR",
        }
    }

    pub(crate) fn invalid_content(invocation: Invocation, message: impl Into<String>) -> Self {
        WorkflowError::InvalidContent {
            invocation,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_codes_are_stable() {
        assert_eq!(GatingError::GateBFailed.code(), "GATE_B_FAILED");
        assert_eq!(GatingError::GateBFailed.gate(), Some("B"));
        let err = GatingError::PrerequisitesNotMet {
            invocation: Invocation::Objectives,
            required: vec![Invocation::Description],
            completed: vec![],
            missing: vec![Invocation::Description],
        };
        assert_eq!(err.code(), "PREREQUISITES_NOT_MET");
        assert!(err.to_string().contains("invocation(s) 1 "));
        assert_eq!(err.gate(), None);
    }

    #[test]
    fn workflow_error_delegates_gating_code() {
        let err: WorkflowError = GatingError::AccessDenied.into();
        assert_eq!(err.code(), "ACCESS_DENIED");
        let err: WorkflowError = GenerationError::Timeout(120).into();
        assert_eq!(err.code(), "GENERATION_FAILED");
        assert!(err.to_string().contains("120s"));
    }
}
