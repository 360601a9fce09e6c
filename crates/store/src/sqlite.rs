//! SQLite store for courses and the audit trail.
//!
//! Uses a single database file with two tables:
//! - `courses`: one JSON document per course plus the columns needed for
//!   lookups and the optimistic `version` check
//! - `audit_log`: one JSON document per record, indexed by course, user and
//!   creation time for queries and retention purges

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pke_core::audit::{AuditQuery, AuditRecord};
use pke_core::course::Course;
use pke_core::error::StoreError;
use pke_core::store::{AuditSink, CourseStore, next_revision};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed course store and audit sink.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn storage(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Storage(format!("{context}: {e}"))
}

impl SqliteStore {
    /// Open a database by path. Tables and indexes are created automatically.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to `:memory:` is a separate database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "courses table",
                r#"
                CREATE TABLE IF NOT EXISTS courses (
                    id            TEXT PRIMARY KEY NOT NULL,
                    owner         TEXT NOT NULL,
                    collaborators TEXT NOT NULL DEFAULT '[]',
                    title         TEXT NOT NULL DEFAULT '',
                    version       INTEGER NOT NULL DEFAULT 0,
                    updated_at    TEXT NOT NULL,
                    document      TEXT NOT NULL
                )
                "#,
            ),
            (
                "courses owner index",
                "CREATE INDEX IF NOT EXISTS idx_courses_owner ON courses(owner)",
            ),
            (
                "audit_log table",
                r#"
                CREATE TABLE IF NOT EXISTS audit_log (
                    id         TEXT PRIMARY KEY NOT NULL,
                    action     TEXT NOT NULL,
                    user_id    TEXT,
                    course_id  TEXT,
                    created_at TEXT NOT NULL,
                    record     TEXT NOT NULL
                )
                "#,
            ),
            (
                "audit course index",
                "CREATE INDEX IF NOT EXISTS idx_audit_course ON audit_log(course_id, created_at DESC)",
            ),
            (
                "audit user index",
                "CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_log(user_id, created_at DESC)",
            ),
            (
                "audit created_at index",
                "CREATE INDEX IF NOT EXISTS idx_audit_created_at ON audit_log(created_at)",
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_course(row: &sqlx::sqlite::SqliteRow) -> Result<Course, StoreError> {
        let document: String = row
            .try_get("document")
            .map_err(|e| StoreError::Storage(format!("document column: {e}")))?;
        serde_json::from_str(&document).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn encode(course: &Course) -> Result<(String, String), StoreError> {
        let document =
            serde_json::to_string(course).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let collaborators = serde_json::to_string(&course.collaborators)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok((document, collaborators))
    }
}

#[async_trait]
impl CourseStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self, course: Course) -> Result<Course, StoreError> {
        let (document, collaborators) = Self::encode(&course)?;
        let result = sqlx::query(
            r#"
            INSERT INTO courses (id, owner, collaborators, title, version, updated_at, document)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&course.id)
        .bind(&course.owner)
        .bind(&collaborators)
        .bind(&course.title)
        .bind(course.version as i64)
        .bind(timestamp(&course.updated_at))
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(storage("INSERT course"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(course.id));
        }
        Ok(course)
    }

    async fn load(&self, id: &str) -> Result<Option<Course>, StoreError> {
        let row = sqlx::query("SELECT document FROM courses WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("SELECT course"))?;

        row.as_ref().map(Self::row_to_course).transpose()
    }

    async fn save(&self, course: Course) -> Result<Course, StoreError> {
        let expected = course.version;
        let next = next_revision(course);
        let (document, collaborators) = Self::encode(&next)?;

        let result = sqlx::query(
            r#"
            UPDATE courses
            SET owner = ?2, collaborators = ?3, title = ?4, version = ?5,
                updated_at = ?6, document = ?7
            WHERE id = ?1 AND version = ?8
            "#,
        )
        .bind(&next.id)
        .bind(&next.owner)
        .bind(&collaborators)
        .bind(&next.title)
        .bind(next.version as i64)
        .bind(timestamp(&next.updated_at))
        .bind(&document)
        .bind(expected as i64)
        .execute(&self.pool)
        .await
        .map_err(storage("UPDATE course"))?;

        if result.rows_affected() == 1 {
            return Ok(next);
        }

        let current = sqlx::query("SELECT version FROM courses WHERE id = ?1")
            .bind(&next.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("SELECT version"))?;

        match current {
            None => Err(StoreError::NotFound(next.id)),
            Some(row) => {
                let actual: i64 = row
                    .try_get("version")
                    .map_err(|e| StoreError::Storage(format!("version column: {e}")))?;
                Err(StoreError::VersionConflict {
                    id: next.id,
                    expected,
                    actual: actual as u64,
                })
            }
        }
    }

    async fn list_for_user(&self, user: &str) -> Result<Vec<Course>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM courses
            WHERE owner = ?1
               OR EXISTS (SELECT 1 FROM json_each(courses.collaborators) WHERE value = ?1)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("SELECT courses for user"))?;

        rows.iter().map(Self::row_to_course).collect()
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, action, user_id, course_id, created_at, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.id)
        .bind(record.action.as_str())
        .bind(&record.user_id)
        .bind(&record.course_id)
        .bind(timestamp(&record.created_at))
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(storage("INSERT audit record"))?;
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let mut sql = String::from("SELECT record FROM audit_log WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(course_id) = query.course_id {
            binds.push(course_id);
            sql.push_str(&format!(" AND course_id = ?{}", binds.len()));
        }
        if let Some(user_id) = query.user_id {
            binds.push(user_id);
            sql.push_str(&format!(" AND user_id = ?{}", binds.len()));
        }
        if let Some(action) = query.action {
            binds.push(action.as_str().to_string());
            sql.push_str(&format!(" AND action = ?{}", binds.len()));
        }
        if let Some(since) = query.since {
            binds.push(timestamp(&since));
            sql.push_str(&format!(" AND created_at >= ?{}", binds.len()));
        }
        if let Some(until) = query.until {
            binds.push(timestamp(&until));
            sql.push_str(&format!(" AND created_at <= ?{}", binds.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        match (query.limit, query.offset) {
            (Some(limit), 0) => sql.push_str(&format!(" LIMIT {limit}")),
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, 0) => {}
            (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        }

        let mut db_query = sqlx::query(&sql);
        for value in &binds {
            db_query = db_query.bind(value);
        }

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(storage("SELECT audit records"))?;

        rows.iter()
            .map(|row| {
                let json: String = row
                    .try_get("record")
                    .map_err(|e| StoreError::Storage(format!("record column: {e}")))?;
                serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM audit_log WHERE created_at < ?1")
            .bind(timestamp(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(storage("DELETE audit records"))?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pke_core::audit::AuditAction;
    use pke_core::{EvidenceGrade, Invocation};

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn course_document_round_trips() {
        let store = test_store().await;
        let mut course = Course::new("u1", "Rust 101").with_collaborator("u2");
        course.record_completion(Invocation::Description, EvidenceGrade::B);
        let created = store.create(course.clone()).await.unwrap();

        let loaded = store.load(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Rust 101");
        assert_eq!(loaded.completed_invocations.len(), 1);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn optimistic_save_detects_conflict() {
        let store = test_store().await;
        let course = store.create(Course::new("u1", "T")).await.unwrap();

        let saved = store.save(course.clone()).await.unwrap();
        assert_eq!(saved.version, 1);

        let err = store.save(course).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));

        let err = store.save(Course::new("u1", "ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let store = test_store().await;
        let course = store.create(Course::new("u1", "T")).await.unwrap();
        assert!(matches!(
            store.create(course).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn list_for_user_matches_collaborators() {
        let store = test_store().await;
        store.create(Course::new("alice", "A")).await.unwrap();
        store
            .create(Course::new("bob", "B").with_collaborator("alice"))
            .await
            .unwrap();
        store.create(Course::new("carol", "C")).await.unwrap();

        let alice = store.list_for_user("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(store.list_for_user("dave").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_query_filters_and_orders() {
        let store = test_store().await;
        let mut first = AuditRecord::new(AuditAction::InvocationStarted)
            .user("u1")
            .course("c1", "T");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        store.append(first).await.unwrap();
        store
            .append(
                AuditRecord::new(AuditAction::InvocationCompleted)
                    .user("u1")
                    .course("c1", "T"),
            )
            .await
            .unwrap();
        store
            .append(AuditRecord::new(AuditAction::GatePassed).course("c2", "U"))
            .await
            .unwrap();

        let c1 = AuditSink::query(&store, AuditQuery::for_course("c1"))
            .await
            .unwrap();
        assert_eq!(c1.len(), 2);
        assert_eq!(c1[0].action, AuditAction::InvocationCompleted);

        let gate = AuditSink::query(
            &store,
            AuditQuery {
                action: Some(AuditAction::GatePassed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(gate.len(), 1);
        assert_eq!(gate[0].course_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn query_applies_date_window_and_offset() {
        let store = test_store().await;
        let now = Utc::now();
        for days_ago in [10, 3, 2, 1] {
            let mut record = AuditRecord::new(AuditAction::CourseUpdated).course("c1", "T");
            record.created_at = now - chrono::Duration::days(days_ago);
            store.append(record).await.unwrap();
        }

        let window = AuditQuery {
            since: Some(now - chrono::Duration::days(5)),
            until: Some(now),
            ..Default::default()
        };
        let skipped = AuditSink::query(
            &store,
            AuditQuery {
                offset: 1,
                ..window.clone()
            },
        )
        .await
        .unwrap();
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].created_at, now - chrono::Duration::days(2));
        assert_eq!(store.count_matching(window).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn purge_respects_cutoff() {
        let store = test_store().await;
        let mut old = AuditRecord::new(AuditAction::CourseCreated);
        old.created_at = Utc::now() - chrono::Duration::days(91);
        store.append(old).await.unwrap();
        store
            .append(AuditRecord::new(AuditAction::CourseUpdated))
            .await
            .unwrap();

        let removed = store
            .purge_before(Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let rest = AuditSink::query(&store, AuditQuery::default())
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
    }
}
