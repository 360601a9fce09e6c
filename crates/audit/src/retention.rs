//! Background retention sweep for the audit trail.

use chrono::Utc;
use pke_config::AuditConfig;
use pke_core::error::StoreError;
use pke_core::store::AuditSink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodically purges audit records older than the retention window.
pub struct RetentionSweeper {
    sink: Arc<dyn AuditSink>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(sink: Arc<dyn AuditSink>, retention_days: u32, interval: Duration) -> Self {
        Self {
            sink,
            retention: chrono::Duration::days(i64::from(retention_days)),
            interval,
        }
    }

    pub fn from_config(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> Self {
        Self::new(
            sink,
            config.retention_days,
            Duration::from_secs(config.sweep_interval_secs.max(1)),
        )
    }

    /// Run one sweep. Returns how many records were removed.
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - self.retention;
        let removed = self.sink.purge_before(cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Purged expired audit records");
        } else {
            debug!(cutoff = %cutoff, "Audit retention sweep found nothing to purge");
        }
        Ok(removed)
    }

    /// Start the background loop. The first sweep runs immediately.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_once().await {
                    warn!(error = %e, "Audit retention sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pke_core::audit::{AuditAction, AuditQuery, AuditRecord};
    use pke_store::InMemoryAuditStore;

    fn aged(days: i64) -> AuditRecord {
        let mut record = AuditRecord::new(AuditAction::InvocationCompleted);
        record.created_at = Utc::now() - chrono::Duration::days(days);
        record
    }

    #[tokio::test]
    async fn sweep_once_applies_retention_window() {
        let sink = Arc::new(InMemoryAuditStore::new());
        sink.append(aged(120)).await.unwrap();
        sink.append(aged(89)).await.unwrap();
        sink.append(aged(0)).await.unwrap();

        let sweeper = RetentionSweeper::from_config(sink.clone(), &AuditConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sink.count().await, 2);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_sweeps_on_start() {
        let sink = Arc::new(InMemoryAuditStore::new());
        sink.append(aged(365)).await.unwrap();

        let handle =
            RetentionSweeper::new(sink.clone(), 30, Duration::from_secs(3600)).start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let left = sink.query(AuditQuery::default()).await.unwrap();
        assert!(left.is_empty());
        handle.abort();
    }
}
