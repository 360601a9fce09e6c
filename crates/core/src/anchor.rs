//! Anchors: the policies, knowledge packs and templates that ground generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Policy,
    KnowledgePack,
    Template,
}

impl AnchorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnchorKind::Policy => "policy",
            AnchorKind::KnowledgePack => "knowledge_pack",
            AnchorKind::Template => "template",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    #[serde(default)]
    pub id: String,
    pub kind: AnchorKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Template type, e.g. "course". Only meaningful for templates.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub template_type: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Anchor {
    pub fn new(kind: AnchorKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            description: String::new(),
            domain: None,
            tags: Vec::new(),
            content: None,
            template_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_template_type(mut self, kind: impl Into<String>) -> Self {
        self.template_type = Some(kind.into());
        self
    }

    /// Case-insensitive: does the domain contain `needle`?
    pub fn domain_contains(&self, needle: &str) -> bool {
        self.domain
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&needle.to_lowercase()))
    }

    /// Case-insensitive: does any tag contain `needle`?
    pub fn tag_contains(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }

    /// Case-insensitive: does `haystack` contain any of the tags?
    pub fn any_tag_in(&self, haystack: &str) -> bool {
        let haystack = haystack.to_lowercase();
        self.tags
            .iter()
            .filter(|t| !t.trim().is_empty())
            .any(|t| haystack.contains(&t.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&AnchorKind::KnowledgePack).unwrap();
        assert_eq!(json, "\"knowledge_pack\"");
    }

    #[test]
    fn matching_helpers_ignore_case() {
        let anchor = Anchor::new(AnchorKind::Policy, "Safety")
            .with_domain("Aviation Safety")
            .with_tags(["CRM", "human factors"]);
        assert!(anchor.domain_contains("aviation"));
        assert!(anchor.tag_contains("crm"));
        assert!(anchor.any_tag_in("Intro to Human Factors"));
        assert!(!anchor.any_tag_in("Cooking"));
    }

    #[test]
    fn deserializes_minimal_payload() {
        let anchor: Anchor =
            serde_json::from_str(r#"{"kind":"template","name":"Std","type":"course"}"#).unwrap();
        assert_eq!(anchor.kind, AnchorKind::Template);
        assert_eq!(anchor.template_type.as_deref(), Some("course"));
        assert!(anchor.tags.is_empty());
    }
}
