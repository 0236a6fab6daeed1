//! Bounded-concurrency batch triage

use super::{emergency_escalation, TriagePipeline};
use crate::audit::{AuditEntry, AuditTrail};
use crate::models::{Alert, Decision, Disposition, StageOutcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

pub const BATCH_WORKER_STAGE: &str = "batch_worker";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub alert_id: String,
    pub decision: Decision,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub requires_human_review: usize,
    pub emergency_escalations: usize,
    pub by_disposition: BTreeMap<Disposition, usize>,
}

/// Decisions in input order, plus counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub summary: BatchSummary,
}

impl BatchReport {
    fn from_decisions(decisions: Vec<Decision>) -> Self {
        let mut summary = BatchSummary {
            total: decisions.len(),
            ..BatchSummary::default()
        };

        for decision in &decisions {
            *summary.by_disposition.entry(decision.disposition).or_insert(0) += 1;
            if decision.requires_human_review {
                summary.requires_human_review += 1;
            }
            if decision.is_emergency() {
                summary.emergency_escalations += 1;
            }
        }

        let items = decisions
            .into_iter()
            .map(|decision| BatchItem {
                alert_id: decision.alert_id.clone(),
                decision,
            })
            .collect();

        Self { items, summary }
    }
}

impl TriagePipeline {
    /// Triage `alerts` with at most `max_concurrent_alerts` in flight.
    /// One alert failing never affects the others.
    pub async fn process_batch(self: &Arc<Self>, alerts: Vec<Alert>) -> BatchReport {
        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_alerts.max(1)));
        let batch_size = alerts.len();

        info!(
            batch_size,
            max_concurrent = self.options.max_concurrent_alerts,
            "Batch triage starting"
        );

        let handles: Vec<_> = alerts
            .iter()
            .cloned()
            .map(|alert| {
                let pipeline = Arc::clone(self);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    // Closed only if the semaphore is dropped, which cannot
                    // happen while this task holds an Arc to it.
                    let _permit = permits.acquire_owned().await.ok();
                    pipeline.process_alert(&alert).await
                })
            })
            .collect();

        let mut decisions = Vec::with_capacity(batch_size);
        for (alert, handle) in alerts.iter().zip(handles) {
            match handle.await {
                Ok(decision) => decisions.push(decision),
                Err(e) => {
                    error!(alert_id = %alert.alert_id, error = %e, "Batch worker failed");
                    let decision = worker_failure(alert, &e.to_string());
                    self.record(&decision).await;
                    decisions.push(decision);
                }
            }
        }

        let report = BatchReport::from_decisions(decisions);
        info!(
            total = report.summary.total,
            requires_human_review = report.summary.requires_human_review,
            emergency_escalations = report.summary.emergency_escalations,
            "Batch triage complete"
        );
        report
    }
}

/// The worker's own trail went down with it; start a fresh one.
fn worker_failure(alert: &Alert, reason: &str) -> Decision {
    let mut trail = AuditTrail::new(alert.alert_id.clone());
    let entry = AuditEntry::new(BATCH_WORKER_STAGE, StageOutcome::Failure, Utc::now())
        .with_input(alert)
        .with_output(reason);
    if let Err(e) = trail.append(entry) {
        error!(alert_id = %alert.alert_id, error = %e, "Failed to audit worker failure");
    }
    emergency_escalation(alert, reason, trail, Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::DecisionLog;
    use crate::config::Settings;
    use crate::evidence::{EvidenceSource, StaticEvidenceSource};
    use crate::models::fixtures::{alert, evidence};
    use crate::models::EvidenceBundle;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Panics for one alert id, serves the rest from a static map.
    struct PanickingSource {
        poisoned: &'static str,
        inner: StaticEvidenceSource,
    }

    #[async_trait]
    impl EvidenceSource for PanickingSource {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn gather(&self, alert: &Alert) -> crate::Result<EvidenceBundle> {
            if alert.alert_id == self.poisoned {
                panic!("scorer crashed on {}", alert.alert_id);
            }
            self.inner.gather(alert).await
        }
    }

    fn pipeline(source: StaticEvidenceSource, max_concurrent_alerts: usize) -> Arc<TriagePipeline> {
        let settings = Settings {
            max_concurrent_alerts,
            retry_backoff: Duration::from_millis(1),
            ..Settings::default()
        };
        Arc::new(TriagePipeline::new(Arc::new(source), &settings).unwrap())
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let mut source = StaticEvidenceSource::new();
        for i in 0..12 {
            source.insert(format!("A-{}", i), evidence(i * 8, 0.9, 0.9));
        }
        let alerts: Vec<_> = (0..12).map(|i| alert(&format!("A-{}", i), 0.5)).collect();

        let report = pipeline(source, 3).process_batch(alerts).await;

        let ids: Vec<_> = report.items.iter().map(|i| i.alert_id.as_str()).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("A-{}", i)).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(report.summary.total, 12);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let source = StaticEvidenceSource::new()
            .with("A-1", evidence(10, 0.95, 0.9))
            .with("A-3", evidence(90, 0.95, 0.9));
        let alerts = vec![alert("A-1", 0.2), alert("A-2", 0.2), alert("A-3", 0.2)];

        let report = pipeline(source, 2).process_batch(alerts).await;

        assert_eq!(report.items[0].decision.disposition, Disposition::AutoClear);
        assert!(report.items[1].decision.is_emergency());
        assert_eq!(report.items[2].decision.disposition, Disposition::EscalateSar);

        assert_eq!(report.summary.emergency_escalations, 1);
        assert_eq!(report.summary.requires_human_review, 2);
        assert_eq!(report.summary.by_disposition[&Disposition::AutoClear], 1);
        assert_eq!(report.summary.by_disposition[&Disposition::EscalateL3], 1);
    }

    #[tokio::test]
    async fn test_batch_records_to_ledger() {
        let ledger = Arc::new(DecisionLog::new());
        let source = StaticEvidenceSource::new()
            .with("A-1", evidence(10, 0.95, 0.9))
            .with("A-2", evidence(10, 0.5, 0.9));
        let settings = Settings::default();
        let pipeline = Arc::new(
            TriagePipeline::new(Arc::new(source), &settings)
                .unwrap()
                .with_ledger(ledger.clone()),
        );

        pipeline
            .process_batch(vec![alert("A-1", 0.2), alert("A-2", 0.2)])
            .await;

        assert!(ledger.latest("A-1").await.unwrap().is_some());
        assert!(ledger.latest("A-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_crashed_worker_is_escalated_and_recorded() {
        let ledger = Arc::new(DecisionLog::new());
        let source = PanickingSource {
            poisoned: "A-2",
            inner: StaticEvidenceSource::new().with("A-1", evidence(10, 0.95, 0.9)),
        };
        let pipeline = Arc::new(
            TriagePipeline::new(Arc::new(source), &Settings::default())
                .unwrap()
                .with_ledger(ledger.clone()),
        );

        let report = pipeline
            .process_batch(vec![alert("A-1", 0.2), alert("A-2", 0.2)])
            .await;

        assert_eq!(report.items[0].decision.disposition, Disposition::AutoClear);
        let crashed = &report.items[1].decision;
        assert!(crashed.is_emergency());
        assert_eq!(
            crashed.audit_trail.entries()[0].stage,
            BATCH_WORKER_STAGE.to_string()
        );

        let recorded = ledger.latest("A-2").await.unwrap().unwrap();
        assert_eq!(recorded.decision_id, crashed.decision_id);
        assert!(recorded.is_emergency());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = pipeline(StaticEvidenceSource::new(), 4)
            .process_batch(vec![])
            .await;
        assert!(report.items.is_empty());
        assert_eq!(report.summary, BatchSummary::default());
    }

    #[test]
    fn test_worker_failure_is_emergency() {
        let decision = worker_failure(&alert("A-9", 0.2), "task panicked");
        assert!(decision.is_emergency());
        assert_eq!(decision.audit_trail.summary().failures, 1);
    }
}
