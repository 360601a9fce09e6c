//! File-based stores: persistent JSON-lines storage.
//!
//! Each line is one JSON-encoded record. Records are loaded into memory on
//! creation and the file is rewritten on every mutation, which gives fast
//! reads with durable writes and a human-inspectable layout:
//!
//! ```text
//! ~/.pke/data/courses.jsonl
//! ~/.pke/data/audit.jsonl
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pke_core::audit::{AuditQuery, AuditRecord};
use pke_core::course::Course;
use pke_core::error::StoreError;
use pke_core::store::{AuditSink, CourseStore, check_version, next_revision};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::in_memory::select;

/// Load records from a JSONL file. A missing file is an empty store.
fn load_lines<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<T>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupted record");
                None
            }
        })
        .collect()
}

/// Rewrite a JSONL file with the given records.
fn write_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Storage(format!("Failed to create data directory: {e}")))?;
    }

    let mut content = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        content.push_str(&line);
        content.push('\n');
    }

    std::fs::write(path, &content)
        .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", path.display())))
}

/// Course store backed by `courses.jsonl`.
pub struct FileCourseStore {
    path: PathBuf,
    courses: Arc<RwLock<Vec<Course>>>,
}

impl FileCourseStore {
    /// Open (or lazily create) `courses.jsonl` inside `dir`.
    pub fn new(dir: &Path) -> Self {
        let path = dir.join("courses.jsonl");
        let courses: Vec<Course> = load_lines(&path);
        debug!(path = %path.display(), count = courses.len(), "File course store loaded");
        Self {
            path,
            courses: Arc::new(RwLock::new(courses)),
        }
    }
}

#[async_trait]
impl CourseStore for FileCourseStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn create(&self, course: Course) -> Result<Course, StoreError> {
        let mut courses = self.courses.write().await;
        if courses.iter().any(|c| c.id == course.id) {
            return Err(StoreError::Duplicate(course.id));
        }
        courses.push(course.clone());
        if let Err(e) = write_lines(&self.path, &courses) {
            courses.pop();
            return Err(e);
        }
        Ok(course)
    }

    async fn load(&self, id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self
            .courses
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn save(&self, course: Course) -> Result<Course, StoreError> {
        let mut courses = self.courses.write().await;
        let idx = courses
            .iter()
            .position(|c| c.id == course.id)
            .ok_or_else(|| StoreError::NotFound(course.id.clone()))?;
        check_version(&courses[idx], &course)?;

        let next = next_revision(course);
        let previous = std::mem::replace(&mut courses[idx], next.clone());
        if let Err(e) = write_lines(&self.path, &courses) {
            courses[idx] = previous;
            return Err(e);
        }
        Ok(next)
    }

    async fn list_for_user(&self, user: &str) -> Result<Vec<Course>, StoreError> {
        let mut list: Vec<Course> = self
            .courses
            .read()
            .await
            .iter()
            .filter(|c| c.has_access(user))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }
}

/// Audit sink backed by `audit.jsonl`.
pub struct FileAuditStore {
    path: PathBuf,
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl FileAuditStore {
    pub fn new(dir: &Path) -> Self {
        let path = dir.join("audit.jsonl");
        let records: Vec<AuditRecord> = load_lines(&path);
        debug!(path = %path.display(), count = records.len(), "File audit store loaded");
        Self {
            path,
            records: Arc::new(RwLock::new(records)),
        }
    }
}

#[async_trait]
impl AuditSink for FileAuditStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        let line =
            serde_json::to_string(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut records = self.records.write().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Failed to create data directory: {e}")))?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Storage(format!("Failed to open audit file: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| StoreError::Storage(format!("Failed to append audit record: {e}")))?;

        records.push(record);
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(select(&self.records.read().await, &query))
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            write_lines(&self.path, &records)?;
        }
        Ok(removed)
    }
}
