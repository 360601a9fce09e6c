//! In-memory anchor repository. Anchors are administrative data; they are
//! injected into the retriever rather than held in process-wide state.

use async_trait::async_trait;
use chrono::Utc;
use pke_core::anchor::{Anchor, AnchorKind};
use pke_core::error::StoreError;
use pke_core::store::AnchorRepository;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct InMemoryAnchorRepository {
    anchors: Arc<RwLock<Vec<Anchor>>>,
}

impl InMemoryAnchorRepository {
    pub fn new() -> Self {
        Self {
            anchors: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Seeded repository (for tests and demos).
    pub fn with_anchors(anchors: Vec<Anchor>) -> Self {
        Self {
            anchors: Arc::new(RwLock::new(anchors)),
        }
    }
}

impl Default for InMemoryAnchorRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnchorRepository for InMemoryAnchorRepository {
    async fn list(&self, kind: Option<AnchorKind>) -> Result<Vec<Anchor>, StoreError> {
        let anchors = self.anchors.read().await;
        Ok(anchors
            .iter()
            .filter(|a| kind.is_none_or(|k| a.kind == k))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Anchor>, StoreError> {
        Ok(self.anchors.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn create(&self, mut anchor: Anchor) -> Result<Anchor, StoreError> {
        if anchor.id.is_empty() {
            anchor.id = Uuid::new_v4().to_string();
        }
        let mut anchors = self.anchors.write().await;
        if anchors.iter().any(|a| a.id == anchor.id) {
            return Err(StoreError::Duplicate(anchor.id));
        }
        let now = Utc::now();
        anchor.created_at = now;
        anchor.updated_at = now;
        anchors.push(anchor.clone());
        Ok(anchor)
    }

    async fn update(&self, mut anchor: Anchor) -> Result<Anchor, StoreError> {
        let mut anchors = self.anchors.write().await;
        let slot = anchors
            .iter_mut()
            .find(|a| a.id == anchor.id)
            .ok_or_else(|| StoreError::NotFound(anchor.id.clone()))?;
        anchor.created_at = slot.created_at;
        anchor.updated_at = Utc::now();
        *slot = anchor.clone();
        Ok(anchor)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut anchors = self.anchors.write().await;
        let before = anchors.len();
        anchors.retain(|a| a.id != id);
        Ok(anchors.len() < before)
    }
}
