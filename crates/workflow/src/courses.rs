//! The course surface around the engine: create, read, retitle, metadata
//! edits, collaborators, and the evidence, history and audit views.
//!
//! Every write is a version-checked save; a lost race surfaces as
//! [`WorkflowError::CourseConflict`] and leaves the stored course untouched.

use pke_audit::AuditLog;
use pke_core::audit::{AuditAction, AuditQuery, AuditRecord};
use pke_core::course::{Course, CourseDuration, CourseMetadata, Level, RevisionEntry};
use pke_core::error::StoreError;
use pke_core::store::{AuditSink, CourseStore};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::error::{GatingError, WorkflowError};
use crate::grader::{EvidenceReport, evidence_report};

/// Body of a course-creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub metadata: CourseMetadata,
    pub collaborators: Vec<String>,
}

/// Partial course edit. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub duration: Option<CourseDuration>,
    pub level: Option<Level>,
    pub theme: Option<String>,
    pub target_audience: Option<String>,
}

impl CourseUpdate {
    /// Apply to `course`, returning the names of the fields that changed.
    fn apply(self, course: &mut Course) -> Result<Vec<&'static str>, WorkflowError> {
        let mut changed = Vec::new();
        if let Some(title) = self.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(WorkflowError::BadRequest("title must not be empty".into()));
            }
            if course.title != title {
                course.title = title.to_string();
                changed.push("title");
            }
        }
        if let Some(description) = self.description {
            if course.description != description {
                course.description = description;
                changed.push("description");
            }
        }

        let meta = &mut course.metadata;
        if let Some(code) = self.code {
            set_optional(&mut meta.code, code, "code", &mut changed);
        }
        if let Some(duration) = self.duration {
            if meta.duration != duration {
                meta.duration = duration;
                changed.push("duration");
            }
        }
        if let Some(level) = self.level {
            if meta.level != level {
                meta.level = level;
                changed.push("level");
            }
        }
        if let Some(theme) = self.theme {
            set_optional(&mut meta.theme, theme, "theme", &mut changed);
        }
        if let Some(audience) = self.target_audience {
            set_optional(&mut meta.target_audience, audience, "targetAudience", &mut changed);
        }
        Ok(changed)
    }
}

/// A blank value clears the field.
fn set_optional(
    slot: &mut Option<String>,
    value: String,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) {
    let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
    if *slot != value {
        *slot = value;
        changed.push(name);
    }
}

pub struct CourseService {
    courses: Arc<dyn CourseStore>,
    audit: Arc<AuditLog>,
}

impl CourseService {
    pub fn new(courses: Arc<dyn CourseStore>, audit: Arc<AuditLog>) -> Self {
        Self { courses, audit }
    }

    /// Create a course owned by `owner`. An empty title is allowed; such a
    /// course cannot pass Gate B until it is retitled.
    pub async fn create(&self, owner: &str, new: NewCourse) -> Result<Course, WorkflowError> {
        let mut course = Course::new(owner, new.title.trim()).with_metadata(new.metadata);
        course.description = new.description;
        for user in new.collaborators {
            if user != owner && !course.collaborators.contains(&user) {
                course.collaborators.push(user);
            }
        }

        let course = self.courses.create(course).await?;
        info!(course_id = %course.id, owner, "Course created");
        self.audit
            .record(
                AuditRecord::new(AuditAction::CourseCreated)
                    .user(owner)
                    .course(&course.id, &course.title),
            )
            .await;
        Ok(course)
    }

    /// A course the user owns or collaborates on.
    pub async fn get(&self, id: &str, user: &str) -> Result<Course, WorkflowError> {
        let course = self
            .courses
            .load(id)
            .await?
            .ok_or_else(|| GatingError::CourseNotFound(id.to_string()))?;
        if !course.has_access(user) {
            return Err(GatingError::AccessDenied.into());
        }
        Ok(course)
    }

    pub async fn list(&self, user: &str) -> Result<Vec<Course>, WorkflowError> {
        Ok(self.courses.list_for_user(user).await?)
    }

    /// Save a new title. This is what opens Gate B.
    pub async fn update_title(
        &self,
        id: &str,
        user: &str,
        title: &str,
    ) -> Result<Course, WorkflowError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(WorkflowError::BadRequest("title must not be empty".into()));
        }

        let mut course = self.get(id, user).await?;
        let previous = std::mem::replace(&mut course.title, title.to_string());
        course.push_revision(user, "TITLE_UPDATED", format!("Title set to '{title}'"));
        let saved = self.save(course).await?;

        self.audit
            .record(
                AuditRecord::new(AuditAction::CourseUpdated)
                    .user(user)
                    .course(&saved.id, &saved.title)
                    .metadata(json!({ "field": "title", "previous": previous })),
            )
            .await;
        Ok(saved)
    }

    /// Apply a partial edit. An edit that changes nothing returns the course
    /// as stored without a new version.
    pub async fn update(
        &self,
        id: &str,
        user: &str,
        update: CourseUpdate,
    ) -> Result<Course, WorkflowError> {
        let mut course = self.get(id, user).await?;
        let changed = update.apply(&mut course)?;
        if changed.is_empty() {
            return Ok(course);
        }

        course.push_revision(user, "COURSE_UPDATED", format!("Updated {}", changed.join(", ")));
        let saved = self.save(course).await?;
        info!(course_id = %saved.id, user, fields = ?changed, "Course updated");
        self.audit
            .record(
                AuditRecord::new(AuditAction::CourseUpdated)
                    .user(user)
                    .course(&saved.id, &saved.title)
                    .metadata(json!({ "fields": changed })),
            )
            .await;
        Ok(saved)
    }

    /// Grant `collaborator` access. Only the owner may do this. Adding an
    /// existing collaborator is a no-op.
    pub async fn add_collaborator(
        &self,
        id: &str,
        user: &str,
        collaborator: &str,
    ) -> Result<Course, WorkflowError> {
        let collaborator = collaborator.trim();
        if collaborator.is_empty() {
            return Err(WorkflowError::BadRequest("userId is required".into()));
        }
        let mut course = self.owned(id, user).await?;
        if collaborator == course.owner || course.collaborators.iter().any(|c| c == collaborator) {
            return Ok(course);
        }

        course.collaborators.push(collaborator.to_string());
        course.push_revision(
            user,
            "COLLABORATOR_ADDED",
            format!("Added collaborator '{collaborator}'"),
        );
        let saved = self.save(course).await?;
        let change = json!({ "field": "collaborators", "added": collaborator });
        self.record_collaborators(&saved, user, change).await;
        Ok(saved)
    }

    /// Revoke `collaborator`'s access. Only the owner may do this. Removing
    /// someone who is not a collaborator is a no-op.
    pub async fn remove_collaborator(
        &self,
        id: &str,
        user: &str,
        collaborator: &str,
    ) -> Result<Course, WorkflowError> {
        let mut course = self.owned(id, user).await?;
        let before = course.collaborators.len();
        course.collaborators.retain(|c| c != collaborator);
        if course.collaborators.len() == before {
            return Ok(course);
        }

        course.push_revision(
            user,
            "COLLABORATOR_REMOVED",
            format!("Removed collaborator '{collaborator}'"),
        );
        let saved = self.save(course).await?;
        let change = json!({ "field": "collaborators", "removed": collaborator });
        self.record_collaborators(&saved, user, change).await;
        Ok(saved)
    }

    /// The course's revision history, oldest first.
    pub async fn history(
        &self,
        id: &str,
        user: &str,
    ) -> Result<Vec<RevisionEntry>, WorkflowError> {
        Ok(self.get(id, user).await?.revision_history)
    }

    pub async fn evidence(&self, id: &str, user: &str) -> Result<EvidenceReport, WorkflowError> {
        let course = self.get(id, user).await?;
        Ok(evidence_report(&course))
    }

    /// The course's audit trail, newest first.
    pub async fn audit_trail(
        &self,
        id: &str,
        user: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditRecord>, WorkflowError> {
        let course = self.get(id, user).await?;
        let query = AuditQuery {
            limit,
            ..AuditQuery::for_course(&course.id)
        };
        Ok(self.audit.query(query).await?)
    }

    async fn owned(&self, id: &str, user: &str) -> Result<Course, WorkflowError> {
        let course = self.get(id, user).await?;
        if course.owner != user {
            return Err(GatingError::AccessDenied.into());
        }
        Ok(course)
    }

    async fn save(&self, course: Course) -> Result<Course, WorkflowError> {
        self.courses.save(course).await.map_err(|e| match e {
            StoreError::VersionConflict {
                id,
                expected,
                actual,
            } => WorkflowError::CourseConflict {
                id,
                expected,
                actual,
            },
            other => other.into(),
        })
    }

    async fn record_collaborators(
        &self,
        course: &Course,
        user: &str,
        metadata: serde_json::Value,
    ) {
        info!(course_id = %course.id, user, change = %metadata, "Collaborators changed");
        self.audit
            .record(
                AuditRecord::new(AuditAction::CourseUpdated)
                    .user(user)
                    .course(&course.id, &course.title)
                    .metadata(metadata),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::GatingEngine;
    use crate::retriever::Retriever;
    use async_trait::async_trait;
    use pke_core::anchor::{Anchor, AnchorKind};
    use pke_core::invocation::Invocation;
    use pke_store::{InMemoryAnchorRepository, InMemoryAuditStore, InMemoryCourseStore};

    /// Lets another writer save the same course just before every save.
    struct RacingStore {
        inner: InMemoryCourseStore,
    }

    #[async_trait]
    impl CourseStore for RacingStore {
        fn name(&self) -> &str {
            "racing"
        }
        async fn create(&self, course: Course) -> Result<Course, StoreError> {
            self.inner.create(course).await
        }
        async fn load(&self, id: &str) -> Result<Option<Course>, StoreError> {
            self.inner.load(id).await
        }
        async fn save(&self, course: Course) -> Result<Course, StoreError> {
            if let Some(current) = self.inner.load(&course.id).await? {
                self.inner.save(current).await?;
            }
            self.inner.save(course).await
        }
        async fn list_for_user(&self, user: &str) -> Result<Vec<Course>, StoreError> {
            self.inner.list_for_user(user).await
        }
    }

    fn service() -> (CourseService, Arc<InMemoryAuditStore>) {
        let sink = Arc::new(InMemoryAuditStore::new());
        let service = CourseService::new(
            Arc::new(InMemoryCourseStore::new()),
            Arc::new(AuditLog::new(sink.clone())),
        );
        (service, sink)
    }

    #[tokio::test]
    async fn create_records_and_dedups_collaborators() {
        let (service, sink) = service();
        let course = service
            .create(
                "owner",
                NewCourse {
                    title: "  Intro to X ".into(),
                    collaborators: vec!["a".into(), "a".into(), "owner".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(course.title, "Intro to X");
        assert_eq!(course.collaborators, vec!["a".to_string()]);
        assert_eq!(sink.count().await, 1);
    }

    #[tokio::test]
    async fn strangers_cannot_read() {
        let (service, _) = service();
        let course = service
            .create("owner", NewCourse::default())
            .await
            .unwrap();
        let err = service.get(&course.id, "stranger").await.unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");
        let err = service.get("missing", "owner").await.unwrap_err();
        assert_eq!(err.code(), "COURSE_NOT_FOUND");
    }

    #[tokio::test]
    async fn retitle_bumps_version_and_rejects_blank() {
        let (service, sink) = service();
        let course = service.create("owner", NewCourse::default()).await.unwrap();
        let err = service
            .update_title(&course.id, "owner", "   ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");

        let saved = service
            .update_title(&course.id, "owner", "Intro to X")
            .await
            .unwrap();
        assert_eq!(saved.title, "Intro to X");
        assert_eq!(saved.version, course.version + 1);
        assert_eq!(saved.revision_history.len(), 1);

        let trail = service.audit_trail(&course.id, "owner", None).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].action, AuditAction::CourseUpdated);
        assert_eq!(sink.count().await, 2);
    }

    #[tokio::test]
    async fn lost_save_race_is_a_conflict() {
        let courses = Arc::new(RacingStore {
            inner: InMemoryCourseStore::new(),
        });
        let sink = Arc::new(InMemoryAuditStore::new());
        let service = CourseService::new(courses.clone(), Arc::new(AuditLog::new(sink.clone())));
        let course = service.create("owner", NewCourse::default()).await.unwrap();

        let err = service
            .update_title(&course.id, "owner", "Intro to X")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COURSE_CONFLICT");
        assert!(matches!(
            err,
            WorkflowError::CourseConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));

        let stored = courses.load(&course.id).await.unwrap().unwrap();
        assert!(stored.title.is_empty());
        assert_eq!(sink.count().await, 1);
    }

    #[tokio::test]
    async fn update_applies_only_present_fields() {
        let (service, sink) = service();
        let course = service
            .create(
                "owner",
                NewCourse {
                    title: "Intro to X".into(),
                    description: "Old".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let saved = service
            .update(
                &course.id,
                "owner",
                CourseUpdate {
                    description: Some("New".into()),
                    level: Some(Level::Advanced),
                    theme: Some(" safety ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.title, "Intro to X");
        assert_eq!(saved.description, "New");
        assert_eq!(saved.metadata.level, Level::Advanced);
        assert_eq!(saved.metadata.theme.as_deref(), Some("safety"));
        assert_eq!(saved.version, course.version + 1);

        let trail = service.audit_trail(&course.id, "owner", Some(1)).await.unwrap();
        assert_eq!(trail[0].action, AuditAction::CourseUpdated);
        assert_eq!(
            trail[0].metadata["fields"],
            json!(["description", "level", "theme"])
        );

        let unchanged = service
            .update(&course.id, "owner", CourseUpdate::default())
            .await
            .unwrap();
        assert_eq!(unchanged.version, saved.version);
        assert_eq!(sink.count().await, 2);

        let err = service
            .update(
                &course.id,
                "owner",
                CourseUpdate {
                    title: Some("  ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn theme_edit_changes_retrieved_policies() {
        let (service, _) = service();
        let course = service
            .create(
                "owner",
                NewCourse {
                    title: "Intro to X".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(InMemoryAnchorRepository::with_anchors(vec![
            Anchor::new(AnchorKind::Policy, "Site rules").with_domain("Workplace Safety"),
        ])));
        let before = retriever.retrieve_anchors(&course).await.unwrap();
        assert!(before.policies.is_empty());

        let themed = service
            .update(
                &course.id,
                "owner",
                CourseUpdate {
                    theme: Some("safety".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after = retriever.retrieve_anchors(&themed).await.unwrap();
        assert_eq!(after.policies.len(), 1);
    }

    #[tokio::test]
    async fn collaborator_added_later_passes_gate_b() {
        let courses: Arc<dyn CourseStore> = Arc::new(InMemoryCourseStore::new());
        let sink = Arc::new(InMemoryAuditStore::new());
        let audit = Arc::new(AuditLog::new(sink.clone()));
        let service = CourseService::new(courses.clone(), audit.clone());
        let gating = GatingEngine::new(courses, audit);
        let course = service
            .create(
                "owner",
                NewCourse {
                    title: "Intro to X".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = gating
            .admit(Some(&course.id), "friend", Invocation::Description)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");

        let saved = service
            .add_collaborator(&course.id, "owner", " friend ")
            .await
            .unwrap();
        assert_eq!(saved.collaborators, vec!["friend".to_string()]);
        let again = service
            .add_collaborator(&course.id, "owner", "friend")
            .await
            .unwrap();
        assert_eq!(again.version, saved.version);

        let admitted = gating
            .admit(Some(&course.id), "friend", Invocation::Description)
            .await
            .unwrap();
        assert_eq!(admitted.id, course.id);

        let trail = service.audit_trail(&course.id, "friend", None).await.unwrap();
        let update = trail
            .iter()
            .find(|r| r.action == AuditAction::CourseUpdated)
            .unwrap();
        assert_eq!(update.metadata["field"], "collaborators");
        assert_eq!(update.metadata["added"], "friend");
    }

    #[tokio::test]
    async fn only_the_owner_manages_collaborators() {
        let (service, _) = service();
        let course = service
            .create(
                "owner",
                NewCourse {
                    title: "Intro to X".into(),
                    collaborators: vec!["friend".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .add_collaborator(&course.id, "friend", "other")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");
        let err = service
            .add_collaborator(&course.id, "owner", "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");

        let saved = service
            .remove_collaborator(&course.id, "owner", "friend")
            .await
            .unwrap();
        assert!(saved.collaborators.is_empty());
        let err = service.get(&course.id, "friend").await.unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");

        let again = service
            .remove_collaborator(&course.id, "owner", "friend")
            .await
            .unwrap();
        assert_eq!(again.version, saved.version);
    }

    #[tokio::test]
    async fn history_lists_revisions_oldest_first() {
        let (service, _) = service();
        let course = service.create("owner", NewCourse::default()).await.unwrap();
        service
            .update_title(&course.id, "owner", "Intro to X")
            .await
            .unwrap();
        service
            .add_collaborator(&course.id, "owner", "friend")
            .await
            .unwrap();

        let history = service.history(&course.id, "friend").await.unwrap();
        let kinds: Vec<&str> = history.iter().map(|r| r.change_type.as_str()).collect();
        assert_eq!(kinds, vec!["TITLE_UPDATED", "COLLABORATOR_ADDED"]);
        assert_eq!(history[1].version, 2);
        assert_eq!(history[1].changed_by, "owner");

        let err = service.history(&course.id, "stranger").await.unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");
    }

    #[tokio::test]
    async fn evidence_for_fresh_course_is_empty() {
        let (service, _) = service();
        let course = service.create("owner", NewCourse::default()).await.unwrap();
        let report = service.evidence(&course.id, "owner").await.unwrap();
        assert!(report.invocations.is_empty());
        assert_eq!(report.overall.total, 0);
    }
}
