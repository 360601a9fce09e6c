//! In-memory stores: useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pke_core::audit::{AuditQuery, AuditRecord};
use pke_core::course::Course;
use pke_core::error::StoreError;
use pke_core::store::{AuditSink, CourseStore, check_version, next_revision};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Courses keyed by id.
pub struct InMemoryCourseStore {
    courses: Arc<RwLock<HashMap<String, Course>>>,
}

impl InMemoryCourseStore {
    pub fn new() -> Self {
        Self {
            courses: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCourseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CourseStore for InMemoryCourseStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, course: Course) -> Result<Course, StoreError> {
        let mut courses = self.courses.write().await;
        if courses.contains_key(&course.id) {
            return Err(StoreError::Duplicate(course.id));
        }
        courses.insert(course.id.clone(), course.clone());
        Ok(course)
    }

    async fn load(&self, id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.courses.read().await.get(id).cloned())
    }

    async fn save(&self, course: Course) -> Result<Course, StoreError> {
        let mut courses = self.courses.write().await;
        let stored = courses
            .get(&course.id)
            .ok_or_else(|| StoreError::NotFound(course.id.clone()))?;
        check_version(stored, &course)?;
        let next = next_revision(course);
        courses.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    async fn list_for_user(&self, user: &str) -> Result<Vec<Course>, StoreError> {
        let mut list: Vec<Course> = self
            .courses
            .read()
            .await
            .values()
            .filter(|c| c.has_access(user))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }
}

/// Audit records held in insertion order.
pub struct InMemoryAuditStore {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest-first filter shared by the vector-backed sinks.
pub(crate) fn select(records: &[AuditRecord], query: &AuditQuery) -> Vec<AuditRecord> {
    let mut out: Vec<AuditRecord> = records
        .iter()
        .rev()
        .filter(|r| query.matches(r))
        .skip(query.offset)
        .cloned()
        .collect();
    if let Some(limit) = query.limit {
        out.truncate(limit);
    }
    out
}

#[async_trait]
impl AuditSink for InMemoryAuditStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(select(&self.records.read().await, &query))
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pke_core::audit::AuditAction;

    #[tokio::test]
    async fn create_load_save_bumps_version() {
        let store = InMemoryCourseStore::new();
        let course = store.create(Course::new("u1", "Rust 101")).await.unwrap();
        assert_eq!(course.version, 0);

        let mut loaded = store.load(&course.id).await.unwrap().unwrap();
        loaded.description = "Systems programming".into();
        let saved = store.save(loaded).await.unwrap();
        assert_eq!(saved.version, 1);

        let reloaded = store.load(&course.id).await.unwrap().unwrap();
        assert_eq!(reloaded.description, "Systems programming");
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn stale_save_is_rejected_and_leaves_store_unchanged() {
        let store = InMemoryCourseStore::new();
        let course = store.create(Course::new("u1", "T")).await.unwrap();

        let first = store.load(&course.id).await.unwrap().unwrap();
        let mut second = first.clone();

        let mut winner = first;
        winner.description = "winner".into();
        store.save(winner).await.unwrap();

        second.description = "loser".into();
        let err = store.save(second).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let stored = store.load(&course.id).await.unwrap().unwrap();
        assert_eq!(stored.description, "winner");
    }

    #[tokio::test]
    async fn duplicate_create_and_missing_save() {
        let store = InMemoryCourseStore::new();
        let course = store.create(Course::new("u1", "T")).await.unwrap();
        assert!(matches!(
            store.create(course).await,
            Err(StoreError::Duplicate(_))
        ));
        assert!(matches!(
            store.save(Course::new("u1", "ghost")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_for_user_includes_collaborations() {
        let store = InMemoryCourseStore::new();
        store.create(Course::new("alice", "A")).await.unwrap();
        store
            .create(Course::new("bob", "B").with_collaborator("alice"))
            .await
            .unwrap();
        store.create(Course::new("carol", "C")).await.unwrap();
        assert_eq!(store.list_for_user("alice").await.unwrap().len(), 2);
        assert_eq!(store.list_for_user("carol").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_query_is_newest_first_with_limit() {
        let sink = InMemoryAuditStore::new();
        for action in [
            AuditAction::InvocationStarted,
            AuditAction::InvocationCompleted,
            AuditAction::ContentAccepted,
        ] {
            sink.append(AuditRecord::new(action).course("c1", "T"))
                .await
                .unwrap();
        }
        sink.append(AuditRecord::new(AuditAction::GatePassed).course("c2", "U"))
            .await
            .unwrap();

        let query = AuditQuery {
            course_id: Some("c1".into()),
            limit: Some(2),
            ..Default::default()
        };
        let records = sink.query(query).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, AuditAction::ContentAccepted);
        assert_eq!(records[1].action, AuditAction::InvocationCompleted);
    }

    #[tokio::test]
    async fn query_pages_through_a_date_window() {
        let sink = InMemoryAuditStore::new();
        let now = Utc::now();
        for days_ago in [10, 3, 2, 1] {
            let mut record = AuditRecord::new(AuditAction::CourseUpdated).course("c1", "T");
            record.created_at = now - chrono::Duration::days(days_ago);
            sink.append(record).await.unwrap();
        }

        let window = AuditQuery {
            since: Some(now - chrono::Duration::days(5)),
            until: Some(now),
            ..Default::default()
        };
        assert_eq!(sink.query(window.clone()).await.unwrap().len(), 3);

        let second_page = AuditQuery {
            offset: 2,
            limit: Some(2),
            ..window.clone()
        };
        let records = sink.query(second_page).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].created_at, now - chrono::Duration::days(3));
        assert_eq!(sink.count_matching(window).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn purge_removes_only_old_records() {
        let sink = InMemoryAuditStore::new();
        let mut old = AuditRecord::new(AuditAction::CourseCreated);
        old.created_at = Utc::now() - chrono::Duration::days(100);
        sink.append(old).await.unwrap();
        sink.append(AuditRecord::new(AuditAction::CourseUpdated))
            .await
            .unwrap();

        let removed = sink
            .purge_before(Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(sink.count().await, 1);
    }
}
