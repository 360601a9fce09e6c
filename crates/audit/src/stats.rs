//! Aggregate figures over the audit trail for the admin dashboard.

use chrono::{DateTime, Duration, Utc};
use pke_core::audit::{AuditAction, AuditQuery, AuditRecord};
use pke_core::error::StoreError;
use pke_core::evidence::EvidenceGrade;
use pke_core::invocation::Invocation;
use pke_core::store::AuditSink;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-invocation completions over the last seven days.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationStats {
    pub invocation: Invocation,
    pub count: usize,
    /// Mean over completions that carry a duration.
    pub avg_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeCount {
    pub grade: EvidenceGrade,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Invocations started or completed in the last 24 hours.
    pub last_24_hours: usize,
    pub by_invocation: Vec<InvocationStats>,
    /// Completed invocations per evidence grade, A through D.
    pub evidence_distribution: Vec<GradeCount>,
    pub generated_at: DateTime<Utc>,
}

impl AuditStats {
    /// Read the last seven days of `sink` and aggregate as of `now`.
    pub async fn collect(sink: &dyn AuditSink, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let week = sink
            .query(AuditQuery {
                since: Some(now - Duration::days(7)),
                until: Some(now),
                ..Default::default()
            })
            .await?;
        Ok(Self::from_records(&week, now))
    }

    pub fn from_records(records: &[AuditRecord], now: DateTime<Utc>) -> Self {
        let day_ago = now - Duration::hours(24);
        let last_24_hours = records
            .iter()
            .filter(|r| r.created_at >= day_ago)
            .filter(|r| {
                matches!(
                    r.action,
                    AuditAction::InvocationStarted | AuditAction::InvocationCompleted
                )
            })
            .count();

        let completed: Vec<_> = records
            .iter()
            .filter(|r| r.action == AuditAction::InvocationCompleted)
            .filter_map(|r| r.invocation.as_ref())
            .collect();

        let mut grouped: BTreeMap<Invocation, (usize, Vec<u64>)> = BTreeMap::new();
        for details in &completed {
            let entry = grouped.entry(details.number).or_default();
            entry.0 += 1;
            entry.1.extend(details.duration_ms);
        }
        let by_invocation = grouped
            .into_iter()
            .map(|(invocation, (count, durations))| InvocationStats {
                invocation,
                count,
                avg_duration_ms: (!durations.is_empty()).then(|| {
                    durations.iter().sum::<u64>() as f64 / durations.len() as f64
                }),
            })
            .collect();

        let evidence_distribution = EvidenceGrade::ALL
            .into_iter()
            .map(|grade| GradeCount {
                grade,
                count: completed
                    .iter()
                    .filter(|d| d.evidence_grade == Some(grade))
                    .count(),
            })
            .collect();

        Self {
            last_24_hours,
            by_invocation,
            evidence_distribution,
            generated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pke_core::audit::InvocationDetails;
    use pke_store::InMemoryAuditStore;

    fn completed(
        invocation: Invocation,
        grade: EvidenceGrade,
        duration_ms: Option<u64>,
        at: DateTime<Utc>,
    ) -> AuditRecord {
        let mut details = InvocationDetails::new(invocation);
        details.evidence_grade = Some(grade);
        details.duration_ms = duration_ms;
        let mut record = AuditRecord::new(AuditAction::InvocationCompleted).invocation(details);
        record.created_at = at;
        record
    }

    #[test]
    fn groups_completions_by_invocation() {
        let now = Utc::now();
        let records = vec![
            completed(Invocation::Description, EvidenceGrade::B, Some(1000), now),
            completed(Invocation::Description, EvidenceGrade::B, Some(3000), now),
            completed(Invocation::Objectives, EvidenceGrade::A, None, now),
            AuditRecord::new(AuditAction::InvocationStarted),
            AuditRecord::new(AuditAction::GatePassed),
        ];
        let stats = AuditStats::from_records(&records, now + Duration::seconds(1));

        assert_eq!(stats.last_24_hours, 4);
        assert_eq!(stats.by_invocation.len(), 2);
        assert_eq!(stats.by_invocation[0].invocation, Invocation::Description);
        assert_eq!(stats.by_invocation[0].count, 2);
        assert_eq!(stats.by_invocation[0].avg_duration_ms, Some(2000.0));
        assert_eq!(stats.by_invocation[1].avg_duration_ms, None);

        let counts: Vec<usize> = stats.evidence_distribution.iter().map(|g| g.count).collect();
        assert_eq!(counts, vec![1, 2, 0, 0]);
    }

    #[tokio::test]
    async fn collect_ignores_records_older_than_a_week() {
        let now = Utc::now();
        let sink = InMemoryAuditStore::new();
        sink.append(completed(
            Invocation::Structure,
            EvidenceGrade::C,
            Some(500),
            now - Duration::days(8),
        ))
        .await
        .unwrap();
        sink.append(completed(
            Invocation::Structure,
            EvidenceGrade::C,
            Some(700),
            now - Duration::days(2),
        ))
        .await
        .unwrap();

        let stats = AuditStats::collect(&sink, now).await.unwrap();
        assert_eq!(stats.last_24_hours, 0);
        assert_eq!(stats.by_invocation.len(), 1);
        assert_eq!(stats.by_invocation[0].count, 1);
        assert_eq!(stats.by_invocation[0].avg_duration_ms, Some(700.0));
        assert_eq!(stats.evidence_distribution[2].count, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["byInvocation"][0]["invocation"], 3);
        assert_eq!(json["evidenceDistribution"][2]["grade"], "C");
    }
}
