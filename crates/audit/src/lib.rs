//! Audit trail for the workflow engine.
//!
//! [`AuditLog`] is the single entry point the engine records through. Every
//! record is forwarded to the registered observers (e.g. [`TracingObserver`])
//! and appended to a durable [`AuditSink`]. Recording never fails the caller:
//! a sink error is logged and the workflow continues.
//!
//! [`RetentionSweeper`] purges records past the retention window.
//! [`AuditStats`] aggregates the trail for the admin dashboard.

pub mod retention;
pub mod stats;

pub use retention::RetentionSweeper;
pub use stats::AuditStats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pke_core::audit::{AuditQuery, AuditRecord};
use pke_core::error::StoreError;
use pke_core::store::AuditSink;
use std::sync::Arc;
use tracing::warn;

/// Synchronous observer notified of every record before it is persisted.
pub trait AuditObserver: Send + Sync {
    fn observe(&self, record: &AuditRecord);
}

/// Mirrors audit records into the tracing stream.
pub struct TracingObserver;

impl AuditObserver for TracingObserver {
    fn observe(&self, record: &AuditRecord) {
        let invocation = record.invocation.as_ref().map(|i| i.number.number());
        let duration_ms = record.invocation.as_ref().and_then(|i| i.duration_ms);
        tracing::info!(
            action = %record.action,
            user_id = record.user_id.as_deref().unwrap_or("-"),
            course_id = record.course_id.as_deref().unwrap_or("-"),
            invocation = ?invocation,
            duration_ms = ?duration_ms,
            success = record.success,
            error = ?record.error_message,
            "AUDIT"
        );
    }
}

/// Fan-out audit log over a durable sink.
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    observers: Vec<Box<dyn AuditObserver>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("sink", &self.sink.name())
            .field("observer_count", &self.observers.len())
            .finish()
    }
}

impl AuditLog {
    /// An audit log writing to `sink` with no observers.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            observers: Vec::new(),
        }
    }

    /// An audit log that also mirrors records to tracing.
    pub fn with_tracing(sink: Arc<dyn AuditSink>) -> Self {
        Self::new(sink).observer(Box::new(TracingObserver))
    }

    pub fn observer(mut self, observer: Box<dyn AuditObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// The underlying durable sink (shared with the retention sweeper).
    pub fn sink(&self) -> Arc<dyn AuditSink> {
        self.sink.clone()
    }

    /// Dashboard aggregates as of `now`.
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<AuditStats, StoreError> {
        AuditStats::collect(self.sink.as_ref(), now).await
    }

    /// Record an event. Sink failures are logged, never propagated.
    pub async fn record(&self, record: AuditRecord) {
        for observer in &self.observers {
            observer.observe(&record);
        }
        let action = record.action;
        if let Err(e) = self.sink.append(record).await {
            warn!(action = %action, error = %e, "Failed to persist audit record");
        }
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    fn name(&self) -> &str {
        self.sink.name()
    }

    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        for observer in &self.observers {
            observer.observe(&record);
        }
        self.sink.append(record).await
    }

    async fn query(&self, query: AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        self.sink.query(query).await
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.sink.purge_before(cutoff).await
    }
}
