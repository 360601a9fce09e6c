//! The invocation workflow engine.
//!
//! Five invocations take a course from a title to a complete build:
//!
//! | # | Invocation       | Accept moves the course to |
//! |---|------------------|----------------------------|
//! | 1 | Description      | design                     |
//! | 2 | Objectives       | design                     |
//! | 3 | Structure        | build                      |
//! | 4 | Full build       | format                     |
//! | 5 | Template mapping | not accepted, applied      |
//!
//! Every request passes through [`GatingEngine`] (Gate B, prerequisites,
//! and for accepts the stage table), then the [`Orchestrator`] builds a
//! context bundle, calls the [`Generator`], parses, grades and validates the
//! output. Only accept writes the course, under an optimistic version check.

pub mod attempt;
pub mod context;
pub mod courses;
pub mod error;
pub mod gating;
pub mod generator;
pub mod grader;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod retriever;
pub mod strategy;
pub mod validator;

pub use attempt::{Attempt, AttemptState};
pub use context::{ContextBundle, InvocationParams, RevisionInput};
pub use courses::{CourseService, CourseUpdate, NewCourse};
pub use error::{GatingError, GenerationError, WorkflowError};
pub use gating::GatingEngine;
pub use generator::{Generation, GenerationSettings, Generator};
pub use grader::{EvidenceReport, OverallScore, calculate_overall_score, evidence_report};
pub use orchestrator::{
    AcceptOutcome, AcceptRequest, ApplyOutcome, ApplyRequest, InvocationOutcome,
    InvocationRequest, Orchestrator, RevisionRequest,
};
pub use parser::{ParseMode, ParsedResponse, parse_response};
pub use retriever::{AnchorFlags, RetrievedAnchors, Retriever};
pub use validator::{ValidationReport, ValidationWarning};
