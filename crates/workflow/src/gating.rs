//! Gating engine: decides whether a request may proceed for a course.
//!
//! The three checks are pure predicates over a course snapshot. The
//! [`GatingEngine`] composes them in a fixed order (Gate B, prerequisites,
//! stage) and short-circuits on the first failure. Its only side effect is
//! recording the first Gate B pass on the course.

use pke_audit::AuditLog;
use pke_core::audit::{AuditAction, AuditRecord};
use pke_core::course::{Course, Stage};
use pke_core::error::StoreError;
use pke_core::invocation::Invocation;
use pke_core::store::CourseStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{GatingError, WorkflowError};

/// Invocations that must be completed before `invocation` may run.
pub fn prerequisites(invocation: Invocation) -> &'static [Invocation] {
    use Invocation::*;
    match invocation {
        Description => &[],
        Objectives => &[Description],
        Structure => &[Description, Objectives],
        FullBuild => &[Description, Objectives, Structure],
        TemplateMapping => &[],
    }
}

/// Stages in which the output of `invocation` may be accepted.
pub fn accept_stages(invocation: Invocation) -> &'static [Stage] {
    use Stage::*;
    match invocation {
        Invocation::Description => &[Define, Design, Build, Format, Generate],
        Invocation::Objectives | Invocation::Structure => &[Design, Build, Format, Generate],
        Invocation::FullBuild => &[Build, Format, Generate],
        Invocation::TemplateMapping => &[],
    }
}

/// Gate B: the course has a saved title and `user` may work on it.
///
/// The title is checked first so an untitled course fails the same way for
/// every caller.
pub fn check_gate_b(course: &Course, user: &str) -> Result<(), GatingError> {
    if !course.has_title() {
        return Err(GatingError::GateBFailed);
    }
    if !course.has_access(user) {
        return Err(GatingError::AccessDenied);
    }
    Ok(())
}

/// Fails listing every prerequisite of `invocation` not yet completed.
pub fn check_prerequisites(course: &Course, invocation: Invocation) -> Result<(), GatingError> {
    let required = prerequisites(invocation);
    let missing: Vec<Invocation> = required
        .iter()
        .copied()
        .filter(|p| !course.has_completed(*p))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    Err(GatingError::PrerequisitesNotMet {
        invocation,
        required: required.to_vec(),
        completed: course.completed(),
        missing,
    })
}

pub fn check_stage(course: &Course, allowed: &[Stage]) -> Result<(), GatingError> {
    if allowed.contains(&course.current_stage) {
        Ok(())
    } else {
        Err(GatingError::WrongStage {
            current: course.current_stage,
            allowed: allowed.to_vec(),
        })
    }
}

/// Loads courses and admits or rejects requests against them.
pub struct GatingEngine {
    courses: Arc<dyn CourseStore>,
    audit: Arc<AuditLog>,
}

impl GatingEngine {
    pub fn new(courses: Arc<dyn CourseStore>, audit: Arc<AuditLog>) -> Self {
        Self { courses, audit }
    }

    /// Load a course the user can reach through Gate B.
    ///
    /// Records the first pass on the course (`gates.gate_b`) and emits
    /// GATE_PASSED. A concurrent writer winning the save is harmless since
    /// the flag only ever goes from false to true.
    pub async fn pass_gate_b(
        &self,
        course_id: Option<&str>,
        user: &str,
    ) -> Result<Course, WorkflowError> {
        let course_id = course_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(GatingError::NoCourseId)?;

        let mut course = self
            .courses
            .load(course_id)
            .await?
            .ok_or_else(|| GatingError::CourseNotFound(course_id.to_string()))?;

        check_gate_b(&course, user)?;

        if !course.gates.gate_b {
            course.gates.gate_b = true;
            match self.courses.save(course.clone()).await {
                Ok(saved) => {
                    info!(course_id = %saved.id, user, "Gate B passed");
                    self.audit
                        .record(
                            AuditRecord::new(AuditAction::GatePassed)
                                .user(user)
                                .course(&saved.id, &saved.title)
                                .metadata(serde_json::json!({ "gate": "B" })),
                        )
                        .await;
                    course = saved;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(course_id, "Gate B flag save lost a race; reloading");
                    if let Some(fresh) = self.courses.load(course_id).await? {
                        course = fresh;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(course)
    }

    /// Admit a generation request: Gate B, then prerequisites.
    pub async fn admit(
        &self,
        course_id: Option<&str>,
        user: &str,
        invocation: Invocation,
    ) -> Result<Course, WorkflowError> {
        let course = self.pass_gate_b(course_id, user).await?;
        check_prerequisites(&course, invocation)?;
        debug!(course_id = %course.id, invocation = invocation.number(), "Request admitted");
        Ok(course)
    }

    /// Admit an accept: Gate B, prerequisites, then the accept stage table.
    pub async fn admit_for_accept(
        &self,
        course_id: Option<&str>,
        user: &str,
        invocation: Invocation,
    ) -> Result<Course, WorkflowError> {
        let course = self.admit(course_id, user, invocation).await?;
        check_stage(&course, accept_stages(invocation))?;
        Ok(course)
    }
}
