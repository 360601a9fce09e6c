//! The Course aggregate and its value types.
//!
//! A course is the only long-lived document the workflow engine mutates, and
//! it does so only on an explicit accept. Three parts of it are monotone:
//! `completed_invocations` and `revision_history` are append-only, the stage
//! only moves forward, and `gates.gate_b` never reverts once set.

use crate::evidence::EvidenceGrade;
use crate::invocation::Invocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse workflow phase. Ordered `Define < Design < Build < Format < Generate`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Define,
    Design,
    Build,
    Format,
    Generate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Define => "define",
            Stage::Design => "design",
            Stage::Build => "build",
            Stage::Format => "format",
            Stage::Generate => "generate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistanceTier {
    #[default]
    Full,
    Guided,
    Minimal,
}

impl AssistanceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            AssistanceTier::Full => "full",
            AssistanceTier::Guided => "guided",
            AssistanceTier::Minimal => "minimal",
        }
    }

    /// Lenient parse used on backend output; unknown tiers yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Some(AssistanceTier::Full),
            "guided" => Some(AssistanceTier::Guided),
            "minimal" => Some(AssistanceTier::Minimal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloomLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            BloomLevel::Remember => "remember",
            BloomLevel::Understand => "understand",
            BloomLevel::Apply => "apply",
            BloomLevel::Analyze => "analyze",
            BloomLevel::Evaluate => "evaluate",
            BloomLevel::Create => "create",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remember" => Some(BloomLevel::Remember),
            "understand" => Some(BloomLevel::Understand),
            "apply" => Some(BloomLevel::Apply),
            "analyze" | "analyse" => Some(BloomLevel::Analyze),
            "evaluate" => Some(BloomLevel::Evaluate),
            "create" => Some(BloomLevel::Create),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Hours,
    #[default]
    Days,
    Weeks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseDuration {
    pub value: f64,
    pub unit: DurationUnit,
}

impl Default for CourseDuration {
    fn default() -> Self {
        Self {
            value: 1.0,
            unit: DurationUnit::Days,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub duration: CourseDuration,
    #[serde(default)]
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub assistance_tier: AssistanceTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningObjective {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_level: Option<BloomLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_grade: Option<EvidenceGrade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    #[serde(default)]
    pub title: String,
    /// Minutes. Generated content may carry fractions or numeric strings.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub performance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_grade: Option<EvidenceGrade>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// A number, a numeric string (`"45"`, `"45 minutes"`), or null. Blank
/// strings read as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let Some(raw) = Option::<NumberOrText>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let text = match raw {
        NumberOrText::Number(n) => return Ok(Some(n)),
        NumberOrText::Text(text) => text,
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let numeric_end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..numeric_end]
        .parse::<f64>()
        .map(Some)
        .map_err(|_| D::Error::custom(format!("expected a number, got \"{text}\"")))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtopics: Vec<Subtopic>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub order: Option<f64>,
}

impl Topic {
    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.subtopics.iter().flat_map(|s| s.lessons.iter())
    }

    pub fn lessons_mut(&mut self) -> impl Iterator<Item = &mut Lesson> {
        self.subtopics.iter_mut().flat_map(|s| s.lessons.iter_mut())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Structure {
    pub fn total_lessons(&self) -> usize {
        self.topics.iter().map(|t| t.lessons().count()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentType {
    #[serde(rename = "MCQ", alias = "mcq", alias = "multiple_choice")]
    Mcq,
    #[serde(alias = "true_false", alias = "truefalse")]
    TrueFalse,
    #[serde(alias = "short_answer", alias = "shortanswer")]
    ShortAnswer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    #[serde(default)]
    pub question: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AssessmentType>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(
        rename = "linkedLO",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub linked_lo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedInvocation {
    pub invocation: Invocation,
    pub completed_at: DateTime<Utc>,
    pub evidence_grade: EvidenceGrade,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gates {
    #[serde(default)]
    pub gate_b: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    pub version: u32,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub change_type: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    #[default]
    Draft,
    InProgress,
    Review,
    Published,
    Archived,
}

/// The course aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub collaborators: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: CourseMetadata,
    #[serde(default)]
    pub learning_objectives: Vec<LearningObjective>,
    #[serde(default)]
    pub structure: Structure,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
    #[serde(default)]
    pub current_stage: Stage,
    #[serde(default)]
    pub completed_invocations: Vec<CompletedInvocation>,
    #[serde(default)]
    pub gates: Gates,
    #[serde(default)]
    pub status: CourseStatus,
    #[serde(default)]
    pub revision_history: Vec<RevisionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,
}

impl Course {
    pub fn new(owner: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            collaborators: Vec::new(),
            title: title.into(),
            description: String::new(),
            metadata: CourseMetadata::default(),
            learning_objectives: Vec::new(),
            structure: Structure::default(),
            assessments: Vec::new(),
            current_stage: Stage::Define,
            completed_invocations: Vec::new(),
            gates: Gates::default(),
            status: CourseStatus::Draft,
            revision_history: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: CourseMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_collaborator(mut self, user: impl Into<String>) -> Self {
        self.collaborators.push(user.into());
        self
    }

    /// Owner or collaborator.
    pub fn has_access(&self, user: &str) -> bool {
        self.owner == user || self.collaborators.iter().any(|c| c == user)
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }

    pub fn has_completed(&self, invocation: Invocation) -> bool {
        self.completed_invocations
            .iter()
            .any(|c| c.invocation == invocation)
    }

    /// Distinct completed invocations, in ascending order.
    pub fn completed(&self) -> Vec<Invocation> {
        let mut done: Vec<Invocation> = self
            .completed_invocations
            .iter()
            .map(|c| c.invocation)
            .collect();
        done.sort();
        done.dedup();
        done
    }

    pub fn record_completion(&mut self, invocation: Invocation, grade: EvidenceGrade) {
        self.completed_invocations.push(CompletedInvocation {
            invocation,
            completed_at: Utc::now(),
            evidence_grade: grade,
        });
    }

    /// Move to `stage` if it is ahead of the current one. Returns whether it moved.
    pub fn advance_stage(&mut self, stage: Stage) -> bool {
        if stage > self.current_stage {
            self.current_stage = stage;
            true
        } else {
            false
        }
    }

    pub fn push_revision(
        &mut self,
        changed_by: impl Into<String>,
        change_type: impl Into<String>,
        summary: impl Into<String>,
    ) {
        let version = self.revision_history.len() as u32 + 1;
        self.revision_history.push(RevisionEntry {
            version,
            changed_by: changed_by.into(),
            changed_at: Utc::now(),
            change_type: change_type.into(),
            summary: summary.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_linear() {
        assert!(Stage::Define < Stage::Design);
        assert!(Stage::Design < Stage::Build);
        assert!(Stage::Build < Stage::Format);
        assert!(Stage::Format < Stage::Generate);
    }

    #[test]
    fn advance_stage_never_moves_backwards() {
        let mut course = Course::new("u1", "Rust");
        assert!(course.advance_stage(Stage::Build));
        assert!(!course.advance_stage(Stage::Design));
        assert_eq!(course.current_stage, Stage::Build);
    }

    #[test]
    fn access_covers_owner_and_collaborators() {
        let course = Course::new("owner", "T").with_collaborator("helper");
        assert!(course.has_access("owner"));
        assert!(course.has_access("helper"));
        assert!(!course.has_access("stranger"));
    }

    #[test]
    fn whitespace_title_is_not_a_title() {
        assert!(!Course::new("u", "   ").has_title());
        assert!(Course::new("u", "Intro").has_title());
    }

    #[test]
    fn completed_is_sorted_and_distinct() {
        let mut course = Course::new("u", "T");
        course.record_completion(Invocation::Objectives, EvidenceGrade::B);
        course.record_completion(Invocation::Description, EvidenceGrade::D);
        course.record_completion(Invocation::Description, EvidenceGrade::C);
        assert_eq!(
            course.completed(),
            vec![Invocation::Description, Invocation::Objectives]
        );
        assert_eq!(course.completed_invocations.len(), 3);
    }

    #[test]
    fn revision_versions_are_sequential() {
        let mut course = Course::new("u", "T");
        course.push_revision("u", "INVOCATION_1_ACCEPTED", "first");
        course.push_revision("u", "INVOCATION_2_ACCEPTED", "second");
        let versions: Vec<u32> = course.revision_history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn course_serializes_camel_case() {
        let course = Course::new("u", "T");
        let json = serde_json::to_value(&course).unwrap();
        assert_eq!(json["currentStage"], "define");
        assert_eq!(json["gates"]["gateB"], false);
        assert_eq!(json["metadata"]["assistanceTier"], "full");
        assert!(json.get("learningObjectives").is_some());
    }

    #[test]
    fn assessment_type_accepts_common_spellings() {
        let a: Assessment =
            serde_json::from_str(r#"{"question":"Q","type":"multiple_choice","linkedLO":"LO1"}"#)
                .unwrap();
        assert_eq!(a.kind, Some(AssessmentType::Mcq));
        assert_eq!(a.linked_lo.as_deref(), Some("LO1"));
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "MCQ");
    }

    #[test]
    fn lesson_duration_accepts_fractions_and_numeric_strings() {
        let lessons: Vec<Lesson> = serde_json::from_str(
            r#"[{"duration": 7.5}, {"duration": "45"}, {"duration": "20 minutes"}, {"duration": ""}, {}]"#,
        )
        .unwrap();
        let durations: Vec<Option<f64>> = lessons.iter().map(|l| l.duration).collect();
        assert_eq!(durations, vec![Some(7.5), Some(45.0), Some(20.0), None, None]);

        let topic: Topic = serde_json::from_str(r#"{"title": "T", "order": "2"}"#).unwrap();
        assert_eq!(topic.order, Some(2.0));

        assert!(serde_json::from_str::<Lesson>(r#"{"duration": "about an hour"}"#).is_err());
    }

    #[test]
    fn total_lessons_counts_across_tree() {
        let lesson = Lesson {
            title: "L".into(),
            ..Default::default()
        };
        let structure = Structure {
            topics: vec![
                Topic {
                    title: "A".into(),
                    subtopics: vec![Subtopic {
                        title: "a".into(),
                        lessons: vec![lesson.clone(), lesson.clone()],
                        notes: None,
                    }],
                    order: Some(1.0),
                },
                Topic {
                    title: "B".into(),
                    subtopics: vec![Subtopic {
                        title: "b".into(),
                        lessons: vec![lesson],
                        notes: None,
                    }],
                    order: Some(2.0),
                },
            ],
        };
        assert_eq!(structure.total_lessons(), 3);
    }
}
