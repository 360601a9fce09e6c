//! Persistence traits: courses, the audit trail, and anchors.
//!
//! Implementations: in-memory (for testing), JSON-lines file, SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::anchor::{Anchor, AnchorKind};
use crate::audit::{AuditQuery, AuditRecord};
use crate::course::Course;
use crate::error::StoreError;

/// Course persistence with optimistic concurrency.
///
/// `save` compares the incoming `version` with the stored one, rejects a
/// mismatch with [`StoreError::VersionConflict`], and on success stores the
/// course with `version + 1` and a fresh `updated_at`.
#[async_trait]
pub trait CourseStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Insert a new course. Fails with `Duplicate` if the id exists.
    async fn create(&self, course: Course) -> std::result::Result<Course, StoreError>;

    /// Load a course by id.
    async fn load(&self, id: &str) -> std::result::Result<Option<Course>, StoreError>;

    /// Version-checked save. Returns the stored course.
    async fn save(&self, course: Course) -> std::result::Result<Course, StoreError>;

    /// Courses the user owns or collaborates on.
    async fn list_for_user(&self, user: &str) -> std::result::Result<Vec<Course>, StoreError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, record: AuditRecord) -> std::result::Result<(), StoreError>;

    /// Matching records, newest first.
    async fn query(&self, query: AuditQuery) -> std::result::Result<Vec<AuditRecord>, StoreError>;

    /// How many records match, ignoring `offset` and `limit`.
    async fn count_matching(&self, query: AuditQuery) -> std::result::Result<usize, StoreError> {
        Ok(self.query(query.unpaged()).await?.len())
    }

    /// Drop records created before `cutoff`. Returns how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> std::result::Result<usize, StoreError>;
}

/// Administrative store of policies, knowledge packs and templates.
#[async_trait]
pub trait AnchorRepository: Send + Sync {
    async fn list(&self, kind: Option<AnchorKind>) -> std::result::Result<Vec<Anchor>, StoreError>;

    async fn get(&self, id: &str) -> std::result::Result<Option<Anchor>, StoreError>;

    async fn create(&self, anchor: Anchor) -> std::result::Result<Anchor, StoreError>;

    /// Replace an existing anchor. Fails with `NotFound` if absent.
    async fn update(&self, anchor: Anchor) -> std::result::Result<Anchor, StoreError>;

    async fn delete(&self, id: &str) -> std::result::Result<bool, StoreError>;
}

/// Shared version check for [`CourseStore::save`] implementations.
pub fn check_version(stored: &Course, incoming: &Course) -> std::result::Result<(), StoreError> {
    if stored.version != incoming.version {
        return Err(StoreError::VersionConflict {
            id: incoming.id.clone(),
            expected: incoming.version,
            actual: stored.version,
        });
    }
    Ok(())
}

/// The course as it should be written: version bumped, timestamp refreshed.
pub fn next_revision(mut course: Course) -> Course {
    course.version += 1;
    course.updated_at = Utc::now();
    course
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_version_detects_stale_write() {
        let stored = Course::new("u", "T");
        let mut stale = stored.clone();
        stale.version = 0;
        let mut bumped = stored.clone();
        bumped.version = 2;
        assert!(check_version(&stored, &stale).is_ok());
        let err = check_version(&bumped, &stale).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn next_revision_bumps_version() {
        let course = Course::new("u", "T");
        let before = course.updated_at;
        let next = next_revision(course);
        assert_eq!(next.version, 1);
        assert!(next.updated_at >= before);
    }
}
