//! # PKE Core
//!
//! Domain types, traits, and error definitions for the PKE course-authoring
//! workflow engine. This crate has **zero framework dependencies**: it defines
//! the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. Implementations
//! live in their respective crates:
//! - [`Provider`]: the text-generation backend (`pke-providers`)
//! - [`CourseStore`], [`AuditSink`], [`AnchorRepository`]: persistence
//!   (`pke-store`, `pke-audit`)
//!
//! This keeps the workflow engine storage-agnostic and testable with
//! in-memory or scripted stand-ins.

pub mod anchor;
pub mod audit;
pub mod course;
pub mod error;
pub mod evidence;
pub mod invocation;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use anchor::{Anchor, AnchorKind};
pub use audit::{AuditAction, AuditQuery, AuditRecord, InvocationDetails, LlmDetails};
pub use course::{
    Assessment, AssessmentType, AssistanceTier, BloomLevel, CompletedInvocation, Course,
    CourseDuration, CourseMetadata, CourseStatus, DurationUnit, Gates, LearningObjective, Lesson,
    Level, RevisionEntry, Stage, Structure, Subtopic, Topic,
};
pub use error::{Error, ProviderError, Result, StoreError};
pub use evidence::{EvidenceGrade, GradeDetails};
pub use invocation::Invocation;
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use store::{AnchorRepository, AuditSink, CourseStore};
