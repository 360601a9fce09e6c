//! Audit record types. Records are immutable once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::EvidenceGrade;
use crate::invocation::Invocation;
use crate::provider::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CourseCreated,
    CourseUpdated,
    InvocationStarted,
    InvocationCompleted,
    InvocationFailed,
    ContentAccepted,
    ContentRevised,
    GatePassed,
    AdminAction,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::CourseCreated => "COURSE_CREATED",
            AuditAction::CourseUpdated => "COURSE_UPDATED",
            AuditAction::InvocationStarted => "INVOCATION_STARTED",
            AuditAction::InvocationCompleted => "INVOCATION_COMPLETED",
            AuditAction::InvocationFailed => "INVOCATION_FAILED",
            AuditAction::ContentAccepted => "CONTENT_ACCEPTED",
            AuditAction::ContentRevised => "CONTENT_REVISED",
            AuditAction::GatePassed => "GATE_PASSED",
            AuditAction::AdminAction => "ADMIN_ACTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_uppercase())).ok()
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation detail attached to invocation-related records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationDetails {
    pub number: Invocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_grade: Option<EvidenceGrade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl InvocationDetails {
    pub fn new(number: Invocation) -> Self {
        Self {
            number,
            input: None,
            output: None,
            evidence_grade: None,
            duration_ms: None,
        }
    }
}

/// Which backend produced the content and what it cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmDetails {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LlmDetails {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, usage: &Usage) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<InvocationDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_details: Option<LlmDetails>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            user_id: None,
            course_id: None,
            course_title: None,
            invocation: None,
            llm_details: None,
            success: true,
            error_message: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn course(mut self, id: impl Into<String>, title: impl Into<String>) -> Self {
        self.course_id = Some(id.into());
        self.course_title = Some(title.into());
        self
    }

    pub fn invocation(mut self, details: InvocationDetails) -> Self {
        self.invocation = Some(details);
        self
    }

    pub fn llm(mut self, details: LlmDetails) -> Self {
        self.llm_details = Some(details);
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Filter for reading the audit trail. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub course_id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Matching records skipped before `limit` applies.
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref id) = self.course_id {
            if record.course_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(ref user) = self.user_id {
            if record.user_id.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at > until) {
            return false;
        }
        true
    }

    /// The same filter without paging, for totals.
    pub fn unpaged(&self) -> Self {
        Self {
            offset: 0,
            limit: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_serialize_screaming_snake() {
        let json = serde_json::to_string(&AuditAction::InvocationCompleted).unwrap();
        assert_eq!(json, "\"INVOCATION_COMPLETED\"");
        assert_eq!(AuditAction::parse("gate_passed"), Some(AuditAction::GatePassed));
        assert_eq!(AuditAction::parse("nope"), None);
    }

    #[test]
    fn builder_marks_failures() {
        let record = AuditRecord::new(AuditAction::InvocationFailed)
            .user("u1")
            .course("c1", "Rust 101")
            .failed("timeout");
        assert!(!record.success);
        assert_eq!(record.error_message.as_deref(), Some("timeout"));
        assert_eq!(record.course_title.as_deref(), Some("Rust 101"));
    }

    #[test]
    fn query_filters_by_all_fields() {
        let record = AuditRecord::new(AuditAction::ContentAccepted)
            .user("u1")
            .course("c1", "T");
        assert!(AuditQuery::for_course("c1").matches(&record));
        assert!(!AuditQuery::for_course("c2").matches(&record));
        let q = AuditQuery {
            user_id: Some("u1".into()),
            action: Some(AuditAction::GatePassed),
            ..Default::default()
        };
        assert!(!q.matches(&record));
    }

    #[test]
    fn query_bounds_are_inclusive() {
        let mut record = AuditRecord::new(AuditAction::CourseUpdated);
        let at = Utc::now();
        record.created_at = at;
        let window = AuditQuery {
            since: Some(at),
            until: Some(at),
            ..Default::default()
        };
        assert!(window.matches(&record));

        let later = AuditQuery {
            since: Some(at + chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!later.matches(&record));
        let earlier = AuditQuery {
            until: Some(at - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!earlier.matches(&record));
    }

    #[test]
    fn unpaged_drops_offset_and_limit() {
        let q = AuditQuery {
            action: Some(AuditAction::GatePassed),
            offset: 10,
            limit: Some(5),
            ..Default::default()
        };
        let all = q.unpaged();
        assert_eq!(all.offset, 0);
        assert_eq!(all.limit, None);
        assert_eq!(all.action, Some(AuditAction::GatePassed));
    }

    #[test]
    fn invocation_details_serialize_number() {
        let mut details = InvocationDetails::new(Invocation::Objectives);
        details.duration_ms = Some(1200);
        details.evidence_grade = Some(EvidenceGrade::B);
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["number"], 2);
        assert_eq!(json["durationMs"], 1200);
        assert_eq!(json["evidenceGrade"], "B");
    }
}
