//! Invocation orchestrator: runs invoke, revise, accept and template-mapping
//! application end to end.
//!
//! Only `accept` writes the course. Every other path reads a snapshot, talks
//! to the generation backend and reports; failures after admission are
//! recorded as INVOCATION_FAILED and leave the course untouched.

use pke_audit::AuditLog;
use pke_core::anchor::Anchor;
use pke_core::audit::{AuditAction, AuditRecord, InvocationDetails, LlmDetails};
use pke_core::course::Course;
use pke_core::error::StoreError;
use pke_core::evidence::EvidenceGrade;
use pke_core::invocation::Invocation;
use pke_core::store::{AnchorRepository, CourseStore};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::attempt::{Attempt, AttemptState};
use crate::context::{self, ContextBundle, InvocationParams, RevisionInput};
use crate::error::{GatingError, WorkflowError};
use crate::gating::GatingEngine;
use crate::generator::{Generation, Generator};
use crate::grader;
use crate::retriever::{AnchorFlags, Retriever};
use crate::strategy::{self, ContextInput, InvocationStrategy};
use crate::validator::ValidationReport;

// ── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub invocation: Invocation,
    pub course_id: Option<String>,
    pub user_id: String,
    pub params: InvocationParams,
}

impl InvocationRequest {
    pub fn new(invocation: Invocation, user_id: impl Into<String>) -> Self {
        Self {
            invocation,
            course_id: None,
            user_id: user_id.into(),
            params: InvocationParams::defaults(invocation),
        }
    }

    pub fn course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }

    pub fn params(mut self, params: InvocationParams) -> Self {
        self.params = params;
        self
    }

    /// Read `courseId` and the typed parameters from one request body.
    pub fn from_json(
        invocation: Invocation,
        user_id: impl Into<String>,
        body: &Value,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            invocation,
            course_id: course_id_of(body),
            user_id: user_id.into(),
            params: InvocationParams::from_json(invocation, body)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RevisionRequest {
    pub invocation: Invocation,
    pub course_id: Option<String>,
    pub user_id: String,
    pub input: RevisionInput,
}

#[derive(Debug, Clone)]
pub struct AcceptRequest {
    pub invocation: Invocation,
    pub course_id: Option<String>,
    pub user_id: String,
    pub content: Value,
    /// Grade reported with the content. Defaults to D.
    pub evidence_grade: Option<EvidenceGrade>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyRequest {
    pub course_id: Option<String>,
    pub user_id: String,
    pub mapping_profile_id: Option<String>,
    pub mappings: Option<Vec<Value>>,
}

fn course_id_of(body: &Value) -> Option<String> {
    body.get("courseId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

// ── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOutcome {
    pub invocation: Invocation,
    pub result: Value,
    pub evidence_grade: EvidenceGrade,
    pub validation: ValidationReport,
    pub actions: Vec<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub parse_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptOutcome {
    pub message: String,
    pub course: Course,
    pub next_invocation: Option<Invocation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub message: String,
    pub course_id: String,
    pub applied_mappings: usize,
}

/// A finished pipeline run, before it is reported.
struct Generated {
    outcome: InvocationOutcome,
    generation: Generation,
}

// ── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator {
    courses: Arc<dyn CourseStore>,
    audit: Arc<AuditLog>,
    gating: GatingEngine,
    retriever: Retriever,
    generator: Generator,
    revalidate_on_accept: bool,
}

impl Orchestrator {
    pub fn new(
        courses: Arc<dyn CourseStore>,
        audit: Arc<AuditLog>,
        anchors: Arc<dyn AnchorRepository>,
        generator: Generator,
    ) -> Self {
        Self {
            gating: GatingEngine::new(courses.clone(), audit.clone()),
            retriever: Retriever::new(anchors),
            courses,
            audit,
            generator,
            revalidate_on_accept: true,
        }
    }

    /// Whether accept re-runs Gate B, prerequisite and stage checks.
    pub fn revalidate_on_accept(mut self, enabled: bool) -> Self {
        self.revalidate_on_accept = enabled;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Run one invocation and return its graded, validated result.
    pub async fn invoke(&self, req: InvocationRequest) -> Result<InvocationOutcome, WorkflowError> {
        let inv = req.invocation;
        let strategy = strategy::for_invocation(inv);
        let mut attempt = Attempt::new(inv);

        let course = if inv.is_course_scoped() {
            Some(
                self.gating
                    .admit(req.course_id.as_deref(), &req.user_id, inv)
                    .await?,
            )
        } else {
            None
        };
        let template = match &req.params {
            InvocationParams::TemplateMapping(p) if inv == Invocation::TemplateMapping => Some(
                self.resolve_template(p.template_id.as_deref(), p.template_content.as_deref())
                    .await?,
            ),
            _ => None,
        };

        let input_summary = req.params.summary();
        self.audit
            .record(
                base_record(AuditAction::InvocationStarted, &req.user_id, course.as_ref())
                    .invocation(InvocationDetails {
                        input: Some(input_summary.clone()),
                        ..InvocationDetails::new(inv)
                    }),
            )
            .await;

        let run = async {
            let flags = match &course {
                Some(course) => self.anchor_flags(course).await,
                None => AnchorFlags::default(),
            };
            let bundle = strategy.build_context(&ContextInput {
                course: course.as_ref(),
                params: &req.params,
                flags,
                template_content: template.as_deref(),
            })?;
            attempt.advance(AttemptState::ContextBuilt)?;
            self.run_pipeline(strategy, &mut attempt, &bundle, flags, &req.params, false)
                .await
        };

        let generated = match run.await {
            Ok(generated) => generated,
            Err(e) => {
                attempt.fail();
                self.record_failure(&req.user_id, course.as_ref(), inv, &attempt, &e)
                    .await;
                return Err(e);
            }
        };

        let outcome = &generated.outcome;
        self.audit
            .record(
                base_record(AuditAction::InvocationCompleted, &req.user_id, course.as_ref())
                    .invocation(InvocationDetails {
                        input: Some(input_summary),
                        output: Some(strategy.audit_output(&outcome.result)),
                        evidence_grade: Some(outcome.evidence_grade),
                        duration_ms: Some(attempt.elapsed_ms()),
                        ..InvocationDetails::new(inv)
                    })
                    .llm(llm_details(&generated.generation)),
            )
            .await;
        info!(
            invocation = inv.number(),
            course_id = course.as_ref().map_or("-", |c| c.id.as_str()),
            grade = %outcome.evidence_grade,
            parse_error = outcome.parse_error,
            duration_ms = attempt.elapsed_ms(),
            "Invocation completed"
        );
        Ok(generated.outcome)
    }

    /// Regenerate an invocation's output with the author's feedback.
    pub async fn revise(&self, req: RevisionRequest) -> Result<InvocationOutcome, WorkflowError> {
        let inv = req.invocation;
        if !inv.is_course_scoped() {
            return Err(WorkflowError::InvalidInvocation(
                "revision is only available for invocations 1-4".into(),
            ));
        }
        if req.input.is_empty() {
            return Err(WorkflowError::RevisionInputRequired);
        }

        let strategy = strategy::for_invocation(inv);
        let course = self
            .gating
            .admit(req.course_id.as_deref(), &req.user_id, inv)
            .await?;

        let mut attempt = Attempt::new(inv);
        let defaults = InvocationParams::defaults(inv);

        let run = async {
            let flags = self.anchor_flags(&course).await;
            let base = strategy.build_context(&ContextInput {
                course: Some(&course),
                params: &defaults,
                flags,
                template_content: None,
            })?;
            let bundle = context::revision_context(&base, &course, inv, &req.input);
            attempt.advance(AttemptState::ContextBuilt)?;
            self.run_pipeline(strategy, &mut attempt, &bundle, flags, &defaults, true)
                .await
        };

        let mut generated = match run.await {
            Ok(generated) => generated,
            Err(e) => {
                attempt.fail();
                self.record_failure(&req.user_id, Some(&course), inv, &attempt, &e)
                    .await;
                return Err(e);
            }
        };

        let revision_input = json!({
            "feedback": req.input.feedback,
            "specificChanges": req.input.specific_changes,
        });
        self.audit
            .record(
                base_record(AuditAction::ContentRevised, &req.user_id, Some(&course))
                    .invocation(InvocationDetails {
                        input: Some(revision_input.clone()),
                        output: Some(strategy.audit_output(&generated.outcome.result)),
                        evidence_grade: Some(generated.outcome.evidence_grade),
                        duration_ms: Some(attempt.elapsed_ms()),
                        ..InvocationDetails::new(inv)
                    })
                    .llm(llm_details(&generated.generation))
                    .metadata(revision_input),
            )
            .await;
        info!(
            invocation = inv.number(),
            course_id = %course.id,
            duration_ms = attempt.elapsed_ms(),
            "Revision generated"
        );

        generated.outcome.message = Some("Revision generated".into());
        Ok(generated.outcome)
    }

    /// Write accepted content into the course.
    ///
    /// The course is saved with the version it was loaded at; if another
    /// writer got there first the accept fails with ACCEPTANCE_CONFLICT and
    /// nothing is written.
    pub async fn accept(&self, req: AcceptRequest) -> Result<AcceptOutcome, WorkflowError> {
        let inv = req.invocation;
        let Some(stage) = inv.stage_on_accept() else {
            return Err(WorkflowError::InvalidInvocation(format!(
                "invocation {inv} output cannot be accepted"
            )));
        };
        let strategy = strategy::for_invocation(inv);

        let course = if self.revalidate_on_accept {
            self.gating
                .admit_for_accept(req.course_id.as_deref(), &req.user_id, inv)
                .await?
        } else {
            self.gating
                .pass_gate_b(req.course_id.as_deref(), &req.user_id)
                .await?
        };
        let mut attempt = Attempt::validated(inv);

        let grade = req.evidence_grade.unwrap_or_default();
        let mut updated = course.clone();
        let summary = strategy.apply(&mut updated, &req.content, grade)?;
        updated.record_completion(inv, grade);
        let advanced = updated.advance_stage(stage);
        updated.push_revision(
            &req.user_id,
            format!("INVOCATION_{}_ACCEPTED", inv.number()),
            summary,
        );

        let saved = match self.courses.save(updated).await {
            Ok(saved) => saved,
            Err(StoreError::VersionConflict {
                id,
                expected,
                actual,
            }) => {
                warn!(course_id = %id, expected, actual, "Accept lost a version race");
                return Err(WorkflowError::AcceptanceConflict {
                    id,
                    expected,
                    actual,
                });
            }
            Err(e) => return Err(e.into()),
        };
        attempt.advance(AttemptState::Accepted)?;

        self.audit
            .record(
                base_record(AuditAction::ContentAccepted, &req.user_id, Some(&saved))
                    .invocation(InvocationDetails {
                        evidence_grade: Some(grade),
                        duration_ms: Some(attempt.elapsed_ms()),
                        ..InvocationDetails::new(inv)
                    })
                    .metadata(json!({
                        "stage": saved.current_stage,
                        "stageAdvanced": advanced,
                        "version": saved.version,
                    })),
            )
            .await;
        info!(
            invocation = inv.number(),
            course_id = %saved.id,
            grade = %grade,
            stage = %saved.current_stage,
            "Content accepted"
        );

        Ok(AcceptOutcome {
            message: format!("Invocation {inv} accepted"),
            next_invocation: inv.next(),
            course: saved,
        })
    }

    /// Record that a template mapping was applied to a course. The course
    /// document itself is not changed.
    pub async fn apply_template_mapping(
        &self,
        req: ApplyRequest,
    ) -> Result<ApplyOutcome, WorkflowError> {
        let course_id = req
            .course_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let (Some(course_id), true) = (
            course_id,
            req.mapping_profile_id.is_some() || req.mappings.is_some(),
        ) else {
            return Err(WorkflowError::BadRequest(
                "Course ID and mapping profile or mappings required".into(),
            ));
        };

        let course = self
            .courses
            .load(course_id)
            .await?
            .ok_or_else(|| GatingError::CourseNotFound(course_id.to_string()))?;
        let applied = req.mappings.as_ref().map_or(0, Vec::len);

        self.audit
            .record(
                base_record(AuditAction::AdminAction, &req.user_id, Some(&course)).metadata(
                    json!({
                        "action": "TEMPLATE_MAPPING_APPLIED",
                        "mappingProfileId": req.mapping_profile_id,
                        "mappingsCount": applied,
                    }),
                ),
            )
            .await;
        info!(course_id = %course.id, applied, "Template mapping applied");

        Ok(ApplyOutcome {
            message: "Template mapping applied".into(),
            course_id: course.id,
            applied_mappings: applied,
        })
    }

    // ── internals ───────────────────────────────────────────────────────────

    /// Generating → Parsed → Graded → Validated.
    async fn run_pipeline(
        &self,
        strategy: &dyn InvocationStrategy,
        attempt: &mut Attempt,
        bundle: &ContextBundle,
        flags: AnchorFlags,
        params: &InvocationParams,
        is_revision: bool,
    ) -> Result<Generated, WorkflowError> {
        let inv = strategy.invocation();

        attempt.advance(AttemptState::Generating)?;
        let generation = self.generator.generate(inv, bundle, is_revision).await?;

        let parsed = strategy.parse(&generation.content);
        attempt.advance(AttemptState::Parsed)?;
        if parsed.is_parse_error() {
            warn!(invocation = inv.number(), "Backend output could not be parsed");
        }

        let evidence_grade = grader::grade(&strategy.signals(&flags, &parsed.value));
        attempt.advance(AttemptState::Graded)?;

        let result = if parsed.is_parse_error() {
            parsed.value.clone()
        } else {
            strategy.shape(&parsed.value, params)
        };
        let validation = strategy.validate(&result, parsed.mode);
        attempt.advance(AttemptState::Validated)?;
        debug!(
            invocation = inv.number(),
            mode = ?parsed.mode,
            warnings = validation.warnings.len(),
            "Result validated"
        );

        Ok(Generated {
            outcome: InvocationOutcome {
                invocation: inv,
                result,
                evidence_grade,
                validation,
                actions: strategy.actions().to_vec(),
                parse_error: parsed.is_parse_error(),
                message: None,
            },
            generation,
        })
    }

    /// Retrieval is best effort: a repository failure grades as if nothing
    /// matched.
    async fn anchor_flags(&self, course: &Course) -> AnchorFlags {
        match self.retriever.retrieve_anchors(course).await {
            Ok(found) => found.flags(),
            Err(e) => {
                warn!(course_id = %course.id, error = %e, "Anchor retrieval failed");
                AnchorFlags::default()
            }
        }
    }

    async fn resolve_template(
        &self,
        template_id: Option<&str>,
        template_content: Option<&str>,
    ) -> Result<String, WorkflowError> {
        if let Some(content) = template_content.filter(|c| !c.trim().is_empty()) {
            return Ok(content.to_string());
        }
        let id = template_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(WorkflowError::TemplateRequired)?;
        let anchor: Anchor = self
            .retriever
            .template(id)
            .await?
            .ok_or_else(|| WorkflowError::TemplateNotFound(id.to_string()))?;
        anchor
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(WorkflowError::TemplateRequired)
    }

    async fn record_failure(
        &self,
        user: &str,
        course: Option<&Course>,
        invocation: Invocation,
        attempt: &Attempt,
        err: &WorkflowError,
    ) {
        error!(
            invocation = invocation.number(),
            course_id = course.map_or("-", |c| c.id.as_str()),
            duration_ms = attempt.elapsed_ms(),
            error = %err,
            "Invocation failed"
        );
        self.audit
            .record(
                base_record(AuditAction::InvocationFailed, user, course)
                    .invocation(InvocationDetails {
                        duration_ms: Some(attempt.elapsed_ms()),
                        ..InvocationDetails::new(invocation)
                    })
                    .failed(err.to_string()),
            )
            .await;
    }
}

fn base_record(action: AuditAction, user: &str, course: Option<&Course>) -> AuditRecord {
    let record = AuditRecord::new(action).user(user);
    match course {
        Some(course) => record.course(&course.id, &course.title),
        None => record,
    }
}

fn llm_details(generation: &Generation) -> LlmDetails {
    LlmDetails::new(&generation.provider, &generation.model, &generation.usage)
}
