//! Per-invocation behaviour, one strategy per step.
//!
//! The orchestrator drives every invocation through the same pipeline and
//! asks the strategy for the parts that differ: context building, grading
//! signals, result shaping, what the audit trail keeps, and how accepted
//! content maps onto the course.

use pke_core::course::{
    Assessment, AssistanceTier, BloomLevel, Course, LearningObjective, Topic,
};
use pke_core::evidence::EvidenceGrade;
use pke_core::invocation::Invocation;
use serde_json::{Value, json};
use std::borrow::Cow;

use crate::context::{self, ContextBundle, InvocationParams};
use crate::error::{GatingError, WorkflowError};
use crate::grader::GradingSignals;
use crate::parser::{self, ParseMode, ParsedResponse};
use crate::retriever::AnchorFlags;
use crate::validator::{self, ValidationReport};

/// What a strategy builds its context bundle from.
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub course: Option<&'a Course>,
    pub params: &'a InvocationParams,
    pub flags: AnchorFlags,
    /// Resolved template text (invocation 5 only).
    pub template_content: Option<&'a str>,
}

const COURSE_ACTIONS: &[&str] = &["accept", "revise"];
const TEMPLATE_ACTIONS: &[&str] = &["save", "apply", "discard"];

pub trait InvocationStrategy: Send + Sync {
    fn invocation(&self) -> Invocation;

    /// Actions offered to the client alongside a result.
    fn actions(&self) -> &'static [&'static str] {
        COURSE_ACTIONS
    }

    fn build_context(&self, input: &ContextInput<'_>) -> Result<ContextBundle, WorkflowError>;

    /// Structured parse with this invocation's heuristic fallback.
    fn parse(&self, text: &str) -> ParsedResponse {
        parser::parse_response(text, self.invocation())
    }

    fn signals(&self, flags: &AnchorFlags, output: &Value) -> GradingSignals;

    /// The client-facing result built from a parsed object.
    fn shape(&self, output: &Value, params: &InvocationParams) -> Value;

    fn validate(&self, result: &Value, mode: ParseMode) -> ValidationReport {
        validator::validate(self.invocation(), result, mode)
    }

    /// What INVOCATION_COMPLETED keeps of a result.
    fn audit_output(&self, result: &Value) -> Value {
        result.clone()
    }

    /// Write accepted content into the course. Returns a one-line summary for
    /// the revision history.
    fn apply(
        &self,
        course: &mut Course,
        content: &Value,
        grade: EvidenceGrade,
    ) -> Result<String, WorkflowError>;
}

/// The strategy for `invocation`.
pub fn for_invocation(invocation: Invocation) -> &'static dyn InvocationStrategy {
    match invocation {
        Invocation::Description => &DescriptionStrategy,
        Invocation::Objectives => &ObjectivesStrategy,
        Invocation::Structure => &StructureStrategy,
        Invocation::FullBuild => &FullBuildStrategy,
        Invocation::TemplateMapping => &TemplateMappingStrategy,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn field_or(value: &Value, key: &str, fallback: Value) -> Value {
    match value.get(key) {
        Some(v) if !v.is_null() => v.clone(),
        _ => fallback,
    }
}

fn array_len(value: &Value, key: &str) -> usize {
    value.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

fn require_course<'a>(input: &ContextInput<'a>) -> Result<&'a Course, WorkflowError> {
    input.course.ok_or_else(|| GatingError::NoCourseId.into())
}

/// Lessons across a JSON topic tree.
fn count_lessons(topics: &Value) -> usize {
    topics.as_array().map_or(0, |topics| {
        topics
            .iter()
            .flat_map(|t| t.get("subtopics").and_then(Value::as_array).into_iter().flatten())
            .map(|s| array_len(s, "lessons"))
            .sum()
    })
}

fn topics_from(
    invocation: Invocation,
    content: &Value,
    grade: EvidenceGrade,
) -> Result<Vec<Topic>, WorkflowError> {
    let raw = content
        .get("topics")
        .filter(|t| t.is_array())
        .ok_or_else(|| WorkflowError::invalid_content(invocation, "topics must be an array"))?;
    let mut topics: Vec<Topic> = serde_json::from_value(raw.clone())
        .map_err(|e| WorkflowError::invalid_content(invocation, format!("topics: {e}")))?;
    for lesson in topics.iter_mut().flat_map(Topic::lessons_mut) {
        lesson.evidence_grade.get_or_insert(grade);
    }
    Ok(topics)
}

fn params_or_default<'a, T: Clone + Default>(
    params: &'a InvocationParams,
    pick: impl FnOnce(&'a InvocationParams) -> Option<&'a T>,
) -> Cow<'a, T> {
    pick(params).map_or_else(|| Cow::Owned(T::default()), Cow::Borrowed)
}

// ── 1: description ──────────────────────────────────────────────────────────

pub struct DescriptionStrategy;

impl InvocationStrategy for DescriptionStrategy {
    fn invocation(&self) -> Invocation {
        Invocation::Description
    }

    fn build_context(&self, input: &ContextInput<'_>) -> Result<ContextBundle, WorkflowError> {
        let course = require_course(input)?;
        let params = params_or_default(input.params, |p| match p {
            InvocationParams::Description(p) => Some(p),
            _ => None,
        });
        Ok(context::description_context(course, &params))
    }

    fn signals(&self, _flags: &AnchorFlags, output: &Value) -> GradingSignals {
        GradingSignals::for_invocation(Invocation::Description).with_output(output)
    }

    fn shape(&self, output: &Value, params: &InvocationParams) -> Value {
        let requested = match params {
            InvocationParams::Description(p) => p.requested_tier,
            _ => None,
        };
        let tier = str_field(output, "assistanceTier")
            .map(str::to_string)
            .or_else(|| requested.map(|t| t.as_str().to_string()))
            .unwrap_or_else(|| AssistanceTier::Full.as_str().to_string());
        json!({
            "description": field_or(output, "description", Value::Null),
            "assistanceTier": tier,
            "suggestions": field_or(output, "suggestions", json!([])),
        })
    }

    fn apply(
        &self,
        course: &mut Course,
        content: &Value,
        _grade: EvidenceGrade,
    ) -> Result<String, WorkflowError> {
        let description = content
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WorkflowError::invalid_content(self.invocation(), "description must be a string")
            })?;
        let tier = match content.get("assistanceTier") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(raw.as_str().and_then(AssistanceTier::parse).ok_or_else(|| {
                WorkflowError::invalid_content(
                    self.invocation(),
                    format!("unknown assistance tier {raw}"),
                )
            })?),
        };

        course.description = description.to_string();
        if let Some(tier) = tier {
            course.metadata.assistance_tier = tier;
        }
        Ok(format!(
            "Description accepted (assistance tier {})",
            course.metadata.assistance_tier.as_str()
        ))
    }
}

// ── 2: learning objectives ──────────────────────────────────────────────────

pub struct ObjectivesStrategy;

impl ObjectivesStrategy {
    /// Lenient mapping: missing codes are numbered by position, unknown Bloom
    /// levels are dropped, and ungraded objectives take the accepted grade.
    fn objectives_from(
        content: &Value,
        grade: EvidenceGrade,
    ) -> Result<Vec<LearningObjective>, WorkflowError> {
        let items = content
            .get("learningObjectives")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                WorkflowError::invalid_content(
                    Invocation::Objectives,
                    "learningObjectives must be an array",
                )
            })?;

        Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                if let Some(text) = item.as_str() {
                    return LearningObjective {
                        code: format!("LO{}", i + 1),
                        text: text.trim().to_string(),
                        bloom_level: None,
                        evidence_grade: Some(grade),
                        source_ref: None,
                    };
                }
                LearningObjective {
                    code: str_field(item, "code")
                        .map_or_else(|| format!("LO{}", i + 1), str::to_string),
                    text: str_field(item, "text").unwrap_or_default().to_string(),
                    bloom_level: str_field(item, "bloomLevel").and_then(BloomLevel::parse),
                    evidence_grade: Some(
                        str_field(item, "evidenceGrade")
                            .and_then(|g| g.parse().ok())
                            .unwrap_or(grade),
                    ),
                    source_ref: str_field(item, "sourceRef").map(str::to_string),
                }
            })
            .collect())
    }
}

impl InvocationStrategy for ObjectivesStrategy {
    fn invocation(&self) -> Invocation {
        Invocation::Objectives
    }

    fn build_context(&self, input: &ContextInput<'_>) -> Result<ContextBundle, WorkflowError> {
        let course = require_course(input)?;
        let params = params_or_default(input.params, |p| match p {
            InvocationParams::Objectives(p) => Some(p),
            _ => None,
        });
        Ok(context::objectives_context(course, &params, &input.flags))
    }

    fn signals(&self, flags: &AnchorFlags, output: &Value) -> GradingSignals {
        GradingSignals {
            has_curated_content: flags.has_policy_reference,
            ..GradingSignals::for_invocation(Invocation::Objectives).with_output(output)
        }
    }

    fn shape(&self, output: &Value, _params: &InvocationParams) -> Value {
        json!({
            "learningObjectives": field_or(output, "learningObjectives", json!([])),
            "alignmentNotes": field_or(output, "alignmentNotes", json!("")),
        })
    }

    fn apply(
        &self,
        course: &mut Course,
        content: &Value,
        grade: EvidenceGrade,
    ) -> Result<String, WorkflowError> {
        let objectives = Self::objectives_from(content, grade)?;
        let summary = format!("{} learning objectives accepted", objectives.len());
        course.learning_objectives = objectives;
        Ok(summary)
    }
}

// ── 3: structure ────────────────────────────────────────────────────────────

pub struct StructureStrategy;

impl InvocationStrategy for StructureStrategy {
    fn invocation(&self) -> Invocation {
        Invocation::Structure
    }

    fn build_context(&self, input: &ContextInput<'_>) -> Result<ContextBundle, WorkflowError> {
        let course = require_course(input)?;
        let params = params_or_default(input.params, |p| match p {
            InvocationParams::Structure(p) => Some(p),
            _ => None,
        });
        Ok(context::structure_context(course, &params, &input.flags))
    }

    fn signals(&self, flags: &AnchorFlags, output: &Value) -> GradingSignals {
        GradingSignals {
            has_template_match: flags.has_template_structure,
            has_curated_content: flags.has_knowledge_pack,
            ..GradingSignals::for_invocation(Invocation::Structure).with_output(output)
        }
    }

    fn shape(&self, output: &Value, _params: &InvocationParams) -> Value {
        let topics = field_or(output, "topics", json!([]));
        json!({
            "totalLessons": count_lessons(&topics),
            "topics": topics,
            "estimatedDuration": field_or(output, "estimatedDuration", Value::Null),
        })
    }

    fn apply(
        &self,
        course: &mut Course,
        content: &Value,
        grade: EvidenceGrade,
    ) -> Result<String, WorkflowError> {
        let topics = topics_from(self.invocation(), content, grade)?;
        course.structure.topics = topics;
        Ok(format!(
            "Structure accepted: {} topics, {} lessons",
            course.structure.topics.len(),
            course.structure.total_lessons()
        ))
    }
}

// ── 4: full build ───────────────────────────────────────────────────────────

pub struct FullBuildStrategy;

impl InvocationStrategy for FullBuildStrategy {
    fn invocation(&self) -> Invocation {
        Invocation::FullBuild
    }

    fn build_context(&self, input: &ContextInput<'_>) -> Result<ContextBundle, WorkflowError> {
        let course = require_course(input)?;
        let params = params_or_default(input.params, |p| match p {
            InvocationParams::FullBuild(p) => Some(p),
            _ => None,
        });
        Ok(context::full_build_context(course, &params, &input.flags))
    }

    fn signals(&self, flags: &AnchorFlags, output: &Value) -> GradingSignals {
        GradingSignals {
            has_template_match: flags.has_template_structure,
            has_curated_content: flags.has_knowledge_pack,
            ..GradingSignals::for_invocation(Invocation::FullBuild).with_output(output)
        }
    }

    fn shape(&self, output: &Value, _params: &InvocationParams) -> Value {
        json!({
            "topics": field_or(output, "topics", json!([])),
            "assessments": field_or(output, "assessments", json!([])),
            "activities": field_or(output, "activities", json!([])),
            "summary": field_or(output, "summary", Value::Null),
        })
    }

    /// Full builds are large; the trail keeps counts only.
    fn audit_output(&self, result: &Value) -> Value {
        json!({
            "topicsCount": array_len(result, "topics"),
            "assessmentsCount": array_len(result, "assessments"),
        })
    }

    fn apply(
        &self,
        course: &mut Course,
        content: &Value,
        grade: EvidenceGrade,
    ) -> Result<String, WorkflowError> {
        let topics = topics_from(self.invocation(), content, grade)?;
        let assessments: Vec<Assessment> = match content.get("assessments") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                WorkflowError::invalid_content(self.invocation(), format!("assessments: {e}"))
            })?,
        };

        course.structure.topics = topics;
        course.assessments = assessments;
        Ok(format!(
            "Full build accepted: {} topics, {} assessments",
            course.structure.topics.len(),
            course.assessments.len()
        ))
    }
}

// ── 5: template mapping ─────────────────────────────────────────────────────

pub struct TemplateMappingStrategy;

impl InvocationStrategy for TemplateMappingStrategy {
    fn invocation(&self) -> Invocation {
        Invocation::TemplateMapping
    }

    fn actions(&self) -> &'static [&'static str] {
        TEMPLATE_ACTIONS
    }

    fn build_context(&self, input: &ContextInput<'_>) -> Result<ContextBundle, WorkflowError> {
        let content = input
            .template_content
            .filter(|c| !c.trim().is_empty())
            .ok_or(WorkflowError::TemplateRequired)?;
        let rules: &[Value] = match input.params {
            InvocationParams::TemplateMapping(p) => p.mapping_rules.as_slice(),
            _ => &[],
        };
        Ok(context::template_context(content, rules))
    }

    fn signals(&self, _flags: &AnchorFlags, _output: &Value) -> GradingSignals {
        GradingSignals::for_invocation(Invocation::TemplateMapping)
    }

    fn shape(&self, output: &Value, _params: &InvocationParams) -> Value {
        json!({
            "templateAnalysis": field_or(output, "analysis", Value::Null),
            "detectedFields": field_or(output, "fields", json!([])),
            "suggestedMappings": field_or(output, "mappings", json!([])),
            "automationProfile": field_or(output, "automationProfile", Value::Null),
        })
    }

    fn audit_output(&self, result: &Value) -> Value {
        json!({ "fieldsDetected": array_len(result, "detectedFields") })
    }

    fn apply(
        &self,
        _course: &mut Course,
        _content: &Value,
        _grade: EvidenceGrade,
    ) -> Result<String, WorkflowError> {
        Err(WorkflowError::InvalidInvocation(
            "template mappings are applied, not accepted".into(),
        ))
    }
}
