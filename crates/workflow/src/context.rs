//! Context packaging: the bounded input bundle for one generation call.
//!
//! Bundles are pure projections of a course snapshot, the request parameters
//! and the retriever's anchor flags. They never carry the course id, owner or
//! collaborators, and cannot be modified once built.

use pke_core::course::{AssistanceTier, BloomLevel, Course};
use pke_core::invocation::Invocation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::WorkflowError;
use crate::retriever::AnchorFlags;

/// An immutable context bundle. Serializes as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextBundle(Map<String, Value>);

impl ContextBundle {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                Self(map)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Pretty JSON for embedding in the user prompt.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescriptionParams {
    pub additional_context: String,
    #[serde(alias = "assistanceTier")]
    pub requested_tier: Option<AssistanceTier>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectivesParams {
    #[serde(alias = "count")]
    pub requested_count: u32,
    pub bloom_levels: Vec<BloomLevel>,
    pub focus_areas: Vec<String>,
}

impl Default for ObjectivesParams {
    fn default() -> Self {
        Self {
            requested_count: 5,
            bloom_levels: vec![BloomLevel::Understand, BloomLevel::Apply, BloomLevel::Analyze],
            focus_areas: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructureParams {
    pub depth: String,
    pub include_performance_criteria: bool,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            depth: "full".into(),
            include_performance_criteria: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FullBuildParams {
    pub include_assessments: bool,
    pub include_activities: bool,
    pub content_depth: String,
}

impl Default for FullBuildParams {
    fn default() -> Self {
        Self {
            include_assessments: true,
            include_activities: true,
            content_depth: "standard".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateParams {
    pub template_id: Option<String>,
    pub template_content: Option<String>,
    pub mapping_rules: Vec<Value>,
}

/// Request-time parameters, typed per invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationParams {
    Description(DescriptionParams),
    Objectives(ObjectivesParams),
    Structure(StructureParams),
    FullBuild(FullBuildParams),
    TemplateMapping(TemplateParams),
}

impl InvocationParams {
    /// Parameters with every field at its default.
    pub fn defaults(invocation: Invocation) -> Self {
        match invocation {
            Invocation::Description => Self::Description(Default::default()),
            Invocation::Objectives => Self::Objectives(Default::default()),
            Invocation::Structure => Self::Structure(Default::default()),
            Invocation::FullBuild => Self::FullBuild(Default::default()),
            Invocation::TemplateMapping => Self::TemplateMapping(Default::default()),
        }
    }

    /// Parse a request body. Unknown keys (such as `courseId`) are ignored;
    /// `null` means all defaults.
    pub fn from_json(invocation: Invocation, body: &Value) -> Result<Self, WorkflowError> {
        if body.is_null() {
            return Ok(Self::defaults(invocation));
        }
        let bad = |e: serde_json::Error| {
            WorkflowError::BadRequest(format!("invalid parameters for invocation {invocation}: {e}"))
        };
        let body = body.clone();
        Ok(match invocation {
            Invocation::Description => Self::Description(serde_json::from_value(body).map_err(bad)?),
            Invocation::Objectives => Self::Objectives(serde_json::from_value(body).map_err(bad)?),
            Invocation::Structure => Self::Structure(serde_json::from_value(body).map_err(bad)?),
            Invocation::FullBuild => Self::FullBuild(serde_json::from_value(body).map_err(bad)?),
            Invocation::TemplateMapping => {
                Self::TemplateMapping(serde_json::from_value(body).map_err(bad)?)
            }
        })
    }

    /// What the audit trail records as the invocation input.
    pub fn summary(&self) -> Value {
        match self {
            Self::Description(p) => json!({
                "additionalContext": p.additional_context,
                "assistanceTier": p.requested_tier.map(AssistanceTier::as_str),
            }),
            Self::Objectives(p) => json!({
                "count": p.requested_count,
                "bloomLevels": p.bloom_levels,
                "focusAreas": p.focus_areas,
            }),
            Self::Structure(p) => json!({
                "depth": p.depth,
                "includePerformanceCriteria": p.include_performance_criteria,
            }),
            Self::FullBuild(p) => json!({
                "includeAssessments": p.include_assessments,
                "includeActivities": p.include_activities,
                "contentDepth": p.content_depth,
            }),
            Self::TemplateMapping(p) => json!({
                "templateId": p.template_id,
                "hasContent": p.template_content.is_some(),
            }),
        }
    }
}

// ── Bundle builders ─────────────────────────────────────────────────────────

pub fn description_context(
    course: &Course,
    params: &DescriptionParams,
) -> ContextBundle {
    let meta = &course.metadata;
    ContextBundle::from_value(json!({
        "courseTitle": course.title,
        "duration": meta.duration,
        "level": meta.level,
        "targetAudience": meta.target_audience,
        "theme": meta.theme,
        "additionalContext": params.additional_context,
        "requestedAssistanceTier": params.requested_tier.unwrap_or_default(),
        "instructions": {
            "generateDescription": true,
            "determineAssistanceTier": true,
            "suggestImprovements": true,
        },
        "expectedOutput": {
            "description": "string (2-4 paragraphs)",
            "assistanceTier": "full | guided | minimal",
            "suggestions": "array of improvement suggestions",
        },
    }))
}

pub fn objectives_context(
    course: &Course,
    params: &ObjectivesParams,
    flags: &AnchorFlags,
) -> ContextBundle {
    let meta = &course.metadata;
    ContextBundle::from_value(json!({
        "courseTitle": course.title,
        "courseDescription": course.description,
        "duration": meta.duration,
        "level": meta.level,
        "targetAudience": meta.target_audience,
        "requestedCount": params.requested_count,
        "bloomLevels": params.bloom_levels,
        "focusAreas": params.focus_areas,
        "assistanceTier": meta.assistance_tier,
        "hasPolicyReference": flags.has_policy_reference,
        "instructions": {
            "useBloomsTaxonomy": true,
            "alignWithDescription": true,
            "makeMeasurable": true,
            "includeActionVerbs": true,
        },
        "expectedOutput": {
            "learningObjectives": [{
                "code": "LO1",
                "text": "string",
                "bloomLevel": "remember|understand|apply|analyze|evaluate|create",
            }],
            "alignmentNotes": "string",
        },
    }))
}

pub fn structure_context(
    course: &Course,
    params: &StructureParams,
    flags: &AnchorFlags,
) -> ContextBundle {
    let meta = &course.metadata;
    ContextBundle::from_value(json!({
        "courseTitle": course.title,
        "courseDescription": course.description,
        "duration": meta.duration,
        "level": meta.level,
        "learningObjectives": course.learning_objectives,
        "depth": params.depth,
        "includePerformanceCriteria": params.include_performance_criteria,
        "hasTemplateStructure": flags.has_template_structure,
        "hasKnowledgePack": flags.has_knowledge_pack,
        "instructions": {
            "createLogicalProgression": true,
            "alignWithLearningObjectives": true,
            "balanceTopicDepth": true,
            "estimateDurations": true,
        },
        "expectedOutput": {
            "topics": [{
                "title": "string",
                "subtopics": [{
                    "title": "string",
                    "lessons": [{
                        "title": "string",
                        "duration": "number (minutes)",
                        "performanceCriteria": ["string"],
                    }],
                }],
            }],
            "estimatedDuration": "object",
        },
    }))
}

pub fn full_build_context(
    course: &Course,
    params: &FullBuildParams,
    flags: &AnchorFlags,
) -> ContextBundle {
    let assessments = params
        .include_assessments
        .then_some("array of assessment items");
    let activities = params.include_activities.then_some("array of activities");
    ContextBundle::from_value(json!({
        "courseTitle": course.title,
        "courseDescription": course.description,
        "metadata": course.metadata,
        "learningObjectives": course.learning_objectives,
        "structure": course.structure,
        "includeAssessments": params.include_assessments,
        "includeActivities": params.include_activities,
        "contentDepth": params.content_depth,
        "hasTemplateStructure": flags.has_template_structure,
        "hasKnowledgePack": flags.has_knowledge_pack,
        "instructions": {
            "generateDetailedContent": true,
            "alignWithObjectives": true,
            "includeExamples": true,
            "createAssessments": params.include_assessments,
            "createActivities": params.include_activities,
            "maintainConsistency": true,
        },
        "expectedOutput": {
            "topics": "array with full content",
            "assessments": assessments,
            "activities": activities,
            "summary": "course summary object",
        },
    }))
}

/// Invocation 5 is course-independent: only the template and existing rules.
pub fn template_context(template_content: &str, mapping_rules: &[Value]) -> ContextBundle {
    ContextBundle::from_value(json!({
        "templateContent": template_content,
        "existingMappings": mapping_rules,
        "analysisDepth": "full",
    }))
}

/// The course's already-accepted content for `invocation`.
pub fn previous_output(course: &Course, invocation: Invocation) -> Value {
    match invocation {
        Invocation::Description => json!({ "description": course.description }),
        Invocation::Objectives => json!({ "learningObjectives": course.learning_objectives }),
        Invocation::Structure | Invocation::FullBuild => json!({ "structure": course.structure }),
        Invocation::TemplateMapping => json!({}),
    }
}

/// User input for a revision request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionInput {
    pub feedback: Option<String>,
    pub specific_changes: Vec<String>,
}

impl RevisionInput {
    pub fn is_empty(&self) -> bool {
        self.feedback.as_deref().is_none_or(|f| f.trim().is_empty())
            && self.specific_changes.iter().all(|c| c.trim().is_empty())
    }
}

/// Wrap a base bundle for a revision.
///
/// `base` must have been built from the course alone (default parameters).
/// Every base key is kept unchanged; the revision fields are added beside it.
pub fn revision_context(
    base: &ContextBundle,
    course: &Course,
    invocation: Invocation,
    input: &RevisionInput,
) -> ContextBundle {
    let mut map = base.0.clone();
    map.insert("isRevision".into(), Value::Bool(true));
    map.insert("previousOutput".into(), previous_output(course, invocation));

    if !input.is_empty() {
        map.insert(
            "revisionFeedback".into(),
            input
                .feedback
                .as_ref()
                .map_or(Value::Null, |f| Value::String(f.clone())),
        );
        map.insert("specificChanges".into(), json!(input.specific_changes));
        map.insert(
            "revisionInstructions".into(),
            json!({
                "addressFeedback": true,
                "maintainQuality": true,
                "preserveGoodParts": true,
            }),
        );
    }
    ContextBundle(map)
}
