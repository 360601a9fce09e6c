//! Persistence for PKE: courses, the audit trail, and anchors.
//!
//! Backends:
//! - `memory`: process-local, for tests and demos
//! - `file`: JSON-lines files under a data directory
//! - `sqlite`: a single database file (default)

pub mod anchors;
pub mod file_backend;
pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use anchors::InMemoryAnchorRepository;
pub use file_backend::{FileAuditStore, FileCourseStore};
pub use in_memory::{InMemoryAuditStore, InMemoryCourseStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use pke_config::StoreConfig;
use pke_core::error::StoreError;
use pke_core::store::{AuditSink, CourseStore};
use std::sync::Arc;

/// The course store and audit sink selected by configuration.
#[derive(Clone)]
pub struct Stores {
    pub courses: Arc<dyn CourseStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Process-local stores.
    pub fn in_memory() -> Self {
        Self {
            courses: Arc::new(InMemoryCourseStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
        }
    }
}

/// Open the backend named in `config.backend`.
pub async fn open(config: &StoreConfig) -> Result<Stores, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Stores::in_memory()),
        "file" => {
            let dir = config.resolved_path();
            Ok(Stores {
                courses: Arc::new(FileCourseStore::new(&dir)),
                audit: Arc::new(FileAuditStore::new(&dir)),
            })
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("Failed to create data directory: {e}"))
                })?;
            }
            let store = Arc::new(SqliteStore::new(&format!("sqlite://{}", path.display())).await?);
            Ok(Stores {
                courses: store.clone(),
                audit: store,
            })
        }
        other => Err(StoreError::Storage(format!(
            "Unsupported store backend: {other}"
        ))),
    }
}
