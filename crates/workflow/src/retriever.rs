//! Retriever: finds the policies, knowledge packs and templates relevant to a
//! course and turns them into grading flags.

use pke_core::anchor::{Anchor, AnchorKind};
use pke_core::course::Course;
use pke_core::error::StoreError;
use pke_core::store::AnchorRepository;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Which kinds of anchors ground a generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorFlags {
    pub has_policy_reference: bool,
    pub has_knowledge_pack: bool,
    pub has_template_structure: bool,
}

/// Anchors matched for one course.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedAnchors {
    pub policies: Vec<Anchor>,
    pub knowledge_packs: Vec<Anchor>,
    pub templates: Vec<Anchor>,
}

impl RetrievedAnchors {
    pub fn flags(&self) -> AnchorFlags {
        AnchorFlags {
            has_policy_reference: !self.policies.is_empty(),
            has_knowledge_pack: !self.knowledge_packs.is_empty(),
            has_template_structure: !self.templates.is_empty(),
        }
    }
}

pub struct Retriever {
    anchors: Arc<dyn AnchorRepository>,
}

impl Retriever {
    pub fn new(anchors: Arc<dyn AnchorRepository>) -> Self {
        Self { anchors }
    }

    pub fn repository(&self) -> Arc<dyn AnchorRepository> {
        self.anchors.clone()
    }

    /// Match anchors against the course theme and title.
    ///
    /// - policies: domain or a tag contains the theme (no theme, no policies)
    /// - knowledge packs: domain contains the theme, or a tag occurs in the title
    /// - templates: type `course`, or a tag occurs in the theme
    pub async fn retrieve_anchors(&self, course: &Course) -> Result<RetrievedAnchors, StoreError> {
        let theme = course
            .metadata
            .theme
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let title = course.title.as_str();

        let policies = match theme {
            Some(theme) => self
                .anchors
                .list(Some(AnchorKind::Policy))
                .await?
                .into_iter()
                .filter(|p| p.domain_contains(theme) || p.tag_contains(theme))
                .collect(),
            None => Vec::new(),
        };

        let knowledge_packs = self
            .anchors
            .list(Some(AnchorKind::KnowledgePack))
            .await?
            .into_iter()
            .filter(|kp| kp.domain_contains(theme.unwrap_or("")) || kp.any_tag_in(title))
            .collect();

        let templates = self
            .anchors
            .list(Some(AnchorKind::Template))
            .await?
            .into_iter()
            .filter(|t| {
                t.template_type
                    .as_deref()
                    .is_some_and(|ty| ty.eq_ignore_ascii_case("course"))
                    || theme.is_some_and(|theme| t.any_tag_in(theme))
            })
            .collect();

        let found = RetrievedAnchors {
            policies,
            knowledge_packs,
            templates,
        };
        debug!(
            course_id = %course.id,
            policies = found.policies.len(),
            knowledge_packs = found.knowledge_packs.len(),
            templates = found.templates.len(),
            "Anchors retrieved"
        );
        Ok(found)
    }

    /// Free-text search over knowledge packs (name, description, content).
    pub async fn search_knowledge_packs(
        &self,
        query: Option<&str>,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Anchor>, StoreError> {
        let query = query.map(str::to_lowercase).filter(|q| !q.is_empty());
        Ok(self
            .anchors
            .list(Some(AnchorKind::KnowledgePack))
            .await?
            .into_iter()
            .filter(|kp| {
                query.as_deref().is_none_or(|q| {
                    kp.name.to_lowercase().contains(q)
                        || kp.description.to_lowercase().contains(q)
                        || kp
                            .content
                            .as_deref()
                            .is_some_and(|c| c.to_lowercase().contains(q))
                })
            })
            .filter(|kp| domain.is_none_or(|d| kp.domain.as_deref() == Some(d)))
            .take(limit)
            .collect())
    }

    /// A template anchor by id. Other anchor kinds do not resolve.
    pub async fn template(&self, id: &str) -> Result<Option<Anchor>, StoreError> {
        Ok(self
            .anchors
            .get(id)
            .await?
            .filter(|a| a.kind == AnchorKind::Template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pke_core::course::CourseMetadata;
    use pke_store::InMemoryAnchorRepository;

    fn course(title: &str, theme: Option<&str>) -> Course {
        Course::new("u", title).with_metadata(CourseMetadata {
            theme: theme.map(String::from),
            ..Default::default()
        })
    }

    fn retriever(anchors: Vec<Anchor>) -> Retriever {
        Retriever::new(Arc::new(InMemoryAnchorRepository::with_anchors(anchors)))
    }

    #[tokio::test]
    async fn empty_repository_yields_no_flags() {
        let r = retriever(vec![]);
        let found = r.retrieve_anchors(&course("T", Some("safety"))).await.unwrap();
        assert_eq!(found.flags(), AnchorFlags::default());
    }

    #[tokio::test]
    async fn policies_match_theme_by_domain_or_tag() {
        let r = retriever(vec![
            Anchor::new(AnchorKind::Policy, "Site rules").with_domain("Workplace Safety"),
            Anchor::new(AnchorKind::Policy, "Tagged").with_tags(["safety-critical"]),
            Anchor::new(AnchorKind::Policy, "Other").with_domain("finance"),
        ]);
        let found = r.retrieve_anchors(&course("T", Some("safety"))).await.unwrap();
        assert_eq!(found.policies.len(), 2);
        assert!(found.flags().has_policy_reference);

        let unthemed = r.retrieve_anchors(&course("T", None)).await.unwrap();
        assert!(unthemed.policies.is_empty());
    }

    #[tokio::test]
    async fn knowledge_packs_match_title_tags() {
        let r = retriever(vec![
            Anchor::new(AnchorKind::KnowledgePack, "Rust book").with_tags(["rust"]),
            Anchor::new(AnchorKind::KnowledgePack, "Go tour").with_tags(["golang"]),
        ]);
        let found = r
            .retrieve_anchors(&course("Intro to Rust", None))
            .await
            .unwrap();
        assert_eq!(found.knowledge_packs.len(), 1);
        assert_eq!(found.knowledge_packs[0].name, "Rust book");
    }

    #[tokio::test]
    async fn templates_match_course_type() {
        let r = retriever(vec![
            Anchor::new(AnchorKind::Template, "Course shell").with_template_type("course"),
            Anchor::new(AnchorKind::Template, "Memo").with_template_type("memo"),
        ]);
        let found = r.retrieve_anchors(&course("T", None)).await.unwrap();
        assert_eq!(found.templates.len(), 1);
        assert!(found.flags().has_template_structure);
    }

    #[tokio::test]
    async fn search_filters_by_query_domain_and_limit() {
        let r = retriever(vec![
            Anchor::new(AnchorKind::KnowledgePack, "Ladder safety").with_domain("safety"),
            Anchor::new(AnchorKind::KnowledgePack, "Forklift safety").with_domain("safety"),
            Anchor::new(AnchorKind::KnowledgePack, "Budgeting").with_domain("finance"),
        ]);
        let hits = r
            .search_knowledge_packs(Some("SAFETY"), Some("safety"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let limited = r.search_knowledge_packs(None, None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn template_lookup_ignores_other_kinds() {
        let policy = Anchor::new(AnchorKind::Policy, "P");
        let template = Anchor::new(AnchorKind::Template, "T").with_content("{{x}}");
        let (pid, tid) = (policy.id.clone(), template.id.clone());
        let r = retriever(vec![policy, template]);
        assert!(r.template(&pid).await.unwrap().is_none());
        assert_eq!(
            r.template(&tid).await.unwrap().unwrap().content.as_deref(),
            Some("{{x}}")
        );
    }
}
