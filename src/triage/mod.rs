//! Triage pipeline - one alert from intake to decision
//!
//! INTAKE → GATHER EVIDENCE → EVALUATE → DECIDE
//!
//! Every stage leaves an audit entry, including failed and retried attempts.
//! An alert never disappears: if a stage fails, the alert goes to senior
//! review as an emergency escalation with the failure in its trail.

use crate::audit::{AuditEntry, AuditTrail, DecisionLog};
use crate::config::Settings;
use crate::error::TriageError;
use crate::evaluator::{
    emergency_factors, escalation_details, recommended_actions, Evaluation, PolicyEvaluator,
};
use crate::evidence::EvidenceSource;
use crate::models::{
    Alert, Decision, Disposition, EscalationDetails, EscalationPriority, EvidenceBundle,
    StageOutcome,
};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod batch;

pub use batch::{BatchItem, BatchReport, BatchSummary};

pub const INTAKE_STAGE: &str = "intake";
pub const GATHERING_STAGE: &str = "evidence_gathering";
pub const DECISION_STAGE: &str = "decision";
pub const EMERGENCY_STAGE: &str = "emergency_escalation";

/// Knobs for the stages around the evaluator
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub stage_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_concurrent_alerts: usize,
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            stage_timeout: settings.stage_timeout,
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff,
            max_concurrent_alerts: settings.max_concurrent_alerts,
        }
    }
}

/// Coordinates the stages for each alert
pub struct TriagePipeline {
    source: Arc<dyn EvidenceSource>,
    evaluator: PolicyEvaluator,
    options: PipelineOptions,
    ledger: Option<Arc<DecisionLog>>,
}

impl TriagePipeline {
    pub fn new(source: Arc<dyn EvidenceSource>, settings: &Settings) -> Result<Self> {
        Ok(Self {
            source,
            evaluator: PolicyEvaluator::new(settings.thresholds)?,
            options: PipelineOptions::from(settings),
            ledger: None,
        })
    }

    /// Record every decision in `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<DecisionLog>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn ledger(&self) -> Option<&Arc<DecisionLog>> {
        self.ledger.as_ref()
    }

    /// Triage one alert and record the decision if a ledger is attached.
    pub async fn process_alert(&self, alert: &Alert) -> Decision {
        let decision = self.triage(alert).await;
        self.record(&decision).await;
        decision
    }

    async fn record(&self, decision: &Decision) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(decision.clone()).await {
                error!(alert_id = %decision.alert_id, error = %e, "Failed to record decision");
            }
        }
    }

    /// Re-triage an alert as a correction of `prior_id`.
    pub async fn correct(&self, prior_id: Uuid, alert: &Alert) -> Result<Decision> {
        let ledger = self.ledger.as_ref().ok_or_else(|| {
            TriageError::InvalidCorrection("no decision ledger attached".into())
        })?;

        let decision = self.triage(alert).await;
        let decision_id = ledger.supersede(prior_id, decision).await?;

        info!(
            alert_id = %alert.alert_id,
            prior = %prior_id,
            correction = %decision_id,
            "Decision superseded"
        );

        ledger
            .get(decision_id)
            .await?
            .ok_or_else(|| TriageError::DecisionNotFound(decision_id.to_string()))
    }

    /// Run all stages. Always yields a decision.
    pub async fn triage(&self, alert: &Alert) -> Decision {
        let start_time = Instant::now();
        let mut trail = AuditTrail::new(alert.alert_id.clone());

        info!(
            alert_id = %alert.alert_id,
            alert_type = ?alert.alert_type,
            priority = ?alert.priority,
            "Triage: starting alert processing"
        );

        match self.run_stages(alert, &mut trail).await {
            Ok((evidence, evaluation)) => {
                self.assemble(alert, evidence, evaluation, trail, start_time)
            }
            Err(e) => {
                error!(alert_id = %alert.alert_id, error = %e, "Triage failed - emergency escalation");
                emergency_escalation(alert, &e.to_string(), trail, start_time)
            }
        }
    }

    async fn run_stages(
        &self,
        alert: &Alert,
        trail: &mut AuditTrail,
    ) -> Result<(EvidenceBundle, Evaluation)> {
        // === INTAKE ===
        let intake = AuditEntry::new(INTAKE_STAGE, StageOutcome::Success, Utc::now())
            .with_input(alert)
            .with_metadata("sources", alert.screening_results.data_sources.clone())
            .with_metadata("matches", alert.screening_results.match_details.len());

        if let Err(e) = alert.validate() {
            trail.append(
                intake
                    .with_output(e.to_string())
                    .with_outcome(StageOutcome::Failure),
            )?;
            return Err(e);
        }
        trail.append(intake.with_output("alert accepted"))?;

        // === GATHER ===
        let evidence = self.gather_evidence(alert, trail).await?;

        // === EVALUATE ===
        debug!(alert_id = %alert.alert_id, "Running evaluation");
        match self.evaluator.evaluate_at(&evidence, Some(alert), Utc::now()) {
            Ok(evaluation) => {
                trail.append(evaluation.audit_entry.clone())?;
                Ok((evidence, evaluation))
            }
            Err(e) => {
                trail.append(
                    AuditEntry::new(
                        crate::evaluator::EVALUATION_STAGE,
                        StageOutcome::Failure,
                        Utc::now(),
                    )
                    .with_input(&evidence)
                    .with_output(e.to_string()),
                )?;
                Err(e)
            }
        }
    }

    async fn gather_evidence(
        &self,
        alert: &Alert,
        trail: &mut AuditTrail,
    ) -> Result<EvidenceBundle> {
        let max_attempts = self.options.max_retries.max(1);
        let timeout_ms = self.options.stage_timeout.as_millis() as u64;
        let mut attempt = 1;

        loop {
            debug!(alert_id = %alert.alert_id, attempt, source = self.source.name(), "Gathering evidence");

            let result = match tokio::time::timeout(
                self.options.stage_timeout,
                self.source.gather(alert),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TriageError::StageTimeout {
                    stage: GATHERING_STAGE.to_string(),
                    timeout_ms,
                }),
            };

            let entry = AuditEntry::new(GATHERING_STAGE, StageOutcome::Success, Utc::now())
                .with_input(alert)
                .with_metadata("attempt", attempt)
                .with_metadata("data_source", self.source.name());

            match result {
                Ok(bundle) => {
                    trail.append(
                        entry
                            .with_output(format!(
                                "risk {}, confidence {}, completeness {}",
                                bundle.risk_score, bundle.confidence, bundle.data_completeness
                            ))
                            .affecting_disposition(),
                    )?;
                    return Ok(bundle);
                }
                Err(e) => {
                    let will_retry = e.is_retryable() && attempt < max_attempts;
                    let outcome = if will_retry {
                        StageOutcome::Retried
                    } else {
                        StageOutcome::Failure
                    };

                    trail.append(
                        entry
                            .with_outcome(outcome)
                            .with_output(e.to_string())
                            .with_metadata("retryable", e.is_retryable()),
                    )?;

                    if !will_retry {
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        alert_id = %alert.alert_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Evidence gathering failed - retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Exponential backoff, capped at ten times the base delay.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.options.retry_backoff;
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(10);
        base * factor
    }

    fn assemble(
        &self,
        alert: &Alert,
        evidence: EvidenceBundle,
        evaluation: Evaluation,
        mut trail: AuditTrail,
        start_time: Instant,
    ) -> Decision {
        let escalation = escalation_details(
            evaluation.disposition,
            evaluation.requires_human_review,
            &evaluation.conditions.join("; "),
        );

        let entry = AuditEntry::new(DECISION_STAGE, StageOutcome::Success, Utc::now())
            .with_input(&evaluation.rationale)
            .with_output(evaluation.disposition.to_string())
            .with_metadata("requires_human_review", evaluation.requires_human_review)
            .affecting_disposition();
        if let Err(e) = trail.append(entry) {
            error!(alert_id = %alert.alert_id, error = %e, "Failed to audit decision stage");
        }

        let audit_trail = trail.finalize();
        let processing_time_ms = start_time.elapsed().as_millis() as u64;

        info!(
            alert_id = %alert.alert_id,
            disposition = %evaluation.disposition,
            rule = %evaluation.rule,
            requires_human_review = evaluation.requires_human_review,
            processing_time_ms,
            "Triage complete"
        );

        Decision {
            decision_id: Uuid::new_v4(),
            alert_id: alert.alert_id.clone(),
            disposition: evaluation.disposition,
            confidence_score: evidence.confidence,
            risk_score: evidence.risk_score,
            rationale: evaluation.rationale,
            decision_factors: evaluation.decision_factors,
            rule: Some(evaluation.rule),
            recommended_actions: recommended_actions(evaluation.disposition),
            requires_human_review: evaluation.requires_human_review,
            escalation,
            regulatory_citations: evidence.regulatory_citations,
            risk_factors: evidence.risk_factors,
            audit_trail,
            processing_time_ms,
            supersedes: None,
            created_at: Utc::now(),
        }
    }
}

/// Fallback decision when the normal path could not complete. Senior
/// review, maximum risk, zero confidence.
pub(crate) fn emergency_escalation(
    alert: &Alert,
    reason: &str,
    mut trail: AuditTrail,
    start_time: Instant,
) -> Decision {
    let disposition = Disposition::EscalateL3;
    let rationale = format!(
        "Emergency escalation: automated triage did not complete ({}). Human review required.",
        reason
    );

    let entry = AuditEntry::new(EMERGENCY_STAGE, StageOutcome::Success, Utc::now())
        .with_input(reason)
        .with_output(disposition.to_string())
        .affecting_disposition();
    if let Err(e) = trail.append(entry) {
        error!(alert_id = %alert.alert_id, error = %e, "Failed to audit emergency escalation");
    }

    Decision {
        decision_id: Uuid::new_v4(),
        alert_id: alert.alert_id.clone(),
        disposition,
        confidence_score: 0.0,
        risk_score: 100,
        rationale,
        decision_factors: emergency_factors(reason),
        rule: None,
        recommended_actions: recommended_actions(disposition),
        requires_human_review: true,
        escalation: Some(EscalationDetails {
            reason: format!("System error: {}", reason),
            priority: EscalationPriority::Urgent,
            suggested_reviewer: "Senior Compliance Officer".to_string(),
        }),
        regulatory_citations: vec![],
        risk_factors: vec![],
        audit_trail: trail.finalize(),
        processing_time_ms: start_time.elapsed().as_millis() as u64,
        supersedes: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::StaticEvidenceSource;
    use crate::models::fixtures::{alert, evidence};
    use crate::models::PolicyRule;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings() -> Settings {
        Settings {
            stage_timeout: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(1),
            max_retries: 3,
            ..Settings::default()
        }
    }

    /// Fails with a retryable error `failures` times, then succeeds.
    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        bundle: EvidenceBundle,
    }

    #[async_trait]
    impl EvidenceSource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn gather(&self, _alert: &Alert) -> Result<EvidenceBundle> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(TriageError::EvidenceGathering {
                    message: "upstream 503".into(),
                    retryable: true,
                });
            }
            Ok(self.bundle.clone())
        }
    }

    struct StalledSource;

    #[async_trait]
    impl EvidenceSource for StalledSource {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn gather(&self, _alert: &Alert) -> Result<EvidenceBundle> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(evidence(0, 1.0, 1.0))
        }
    }

    fn pipeline_with(source: Arc<dyn EvidenceSource>) -> TriagePipeline {
        TriagePipeline::new(source, &fast_settings()).unwrap()
    }

    fn stages(decision: &Decision) -> Vec<(String, StageOutcome)> {
        decision
            .audit_trail
            .entries()
            .iter()
            .map(|e| (e.stage.clone(), e.outcome))
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_auto_clear() {
        let source = StaticEvidenceSource::new().with("A-1", evidence(20, 0.95, 0.9));
        let pipeline = pipeline_with(Arc::new(source));

        let decision = pipeline.triage(&alert("A-1", 0.2)).await;

        assert_eq!(decision.disposition, Disposition::AutoClear);
        assert!(!decision.requires_human_review);
        assert!(decision.escalation.is_none());
        assert_eq!(decision.rule, Some(PolicyRule::AutoClear));
        assert_eq!(decision.risk_score, 20);
        assert_eq!(decision.decision_factors.primary_factors.len(), 2);
        assert_eq!(
            stages(&decision),
            vec![
                (INTAKE_STAGE.to_string(), StageOutcome::Success),
                (GATHERING_STAGE.to_string(), StageOutcome::Success),
                ("evaluation".to_string(), StageOutcome::Success),
                (DECISION_STAGE.to_string(), StageOutcome::Success),
            ]
        );
        assert_eq!(decision.audit_trail.decision_chain().len(), 3);
        assert!(decision.audit_trail.verify_integrity());
    }

    #[tokio::test]
    async fn test_escalation_carries_routing() {
        let source = StaticEvidenceSource::new().with("A-1", evidence(90, 0.5, 0.9));
        let decision = pipeline_with(Arc::new(source)).triage(&alert("A-1", 0.9)).await;

        assert_eq!(decision.disposition, Disposition::EscalateSar);
        let escalation = decision.escalation.unwrap();
        assert_eq!(escalation.priority, EscalationPriority::Urgent);
        assert!(escalation.reason.contains("risk score 90"));
    }

    #[tokio::test]
    async fn test_retries_are_audited() {
        let source = FlakySource {
            failures: 2,
            calls: AtomicU32::new(0),
            bundle: evidence(10, 0.5, 0.9),
        };
        let decision = pipeline_with(Arc::new(source)).triage(&alert("A-1", 0.1)).await;

        assert_eq!(decision.disposition, Disposition::EscalateL2);
        let gathering: Vec<_> = stages(&decision)
            .into_iter()
            .filter(|(s, _)| s == GATHERING_STAGE)
            .map(|(_, o)| o)
            .collect();
        assert_eq!(
            gathering,
            vec![StageOutcome::Retried, StageOutcome::Retried, StageOutcome::Success]
        );
        assert_eq!(decision.audit_trail.len(), 6);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate() {
        let source = FlakySource {
            failures: 10,
            calls: AtomicU32::new(0),
            bundle: evidence(10, 0.9, 0.9),
        };
        let decision = pipeline_with(Arc::new(source)).triage(&alert("A-1", 0.1)).await;

        assert!(decision.is_emergency());
        assert_eq!(decision.disposition, Disposition::EscalateL3);
        assert_eq!(decision.risk_score, 100);
        assert_eq!(decision.confidence_score, 0.0);
        assert_eq!(
            decision.decision_factors.uncertainty_factors,
            vec!["Unable to complete automated analysis".to_string()]
        );

        let summary = decision.audit_trail.summary();
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(
            stages(&decision).last().unwrap().0,
            EMERGENCY_STAGE.to_string()
        );
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_not_retried() {
        let pipeline = pipeline_with(Arc::new(StaticEvidenceSource::new()));
        let decision = pipeline.triage(&alert("A-404", 0.1)).await;

        assert!(decision.is_emergency());
        let summary = decision.audit_trail.summary();
        assert_eq!(summary.retries, 0);
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let settings = Settings {
            stage_timeout: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(1),
            max_retries: 2,
            ..Settings::default()
        };
        let pipeline = TriagePipeline::new(Arc::new(StalledSource), &settings).unwrap();

        let decision = pipeline.triage(&alert("A-1", 0.1)).await;
        assert!(decision.is_emergency());
        assert!(decision.rationale.contains("timed out"));
        assert_eq!(decision.audit_trail.summary().retries, 1);
    }

    #[tokio::test]
    async fn test_invalid_evidence_never_reaches_disposition() {
        let source = StaticEvidenceSource::new().with("A-1", evidence(150, 0.9, 0.9));
        let decision = pipeline_with(Arc::new(source)).triage(&alert("A-1", 0.1)).await;

        assert!(decision.is_emergency());
        assert!(decision.rationale.contains("Invalid evidence"));
        assert!(stages(&decision)
            .contains(&("evaluation".to_string(), StageOutcome::Failure)));
    }

    #[tokio::test]
    async fn test_invalid_alert_fails_intake() {
        let source = StaticEvidenceSource::new().with("A-1", evidence(10, 0.9, 0.9));
        let decision = pipeline_with(Arc::new(source)).triage(&alert("A-1", 3.0)).await;

        assert!(decision.is_emergency());
        assert_eq!(
            stages(&decision)[0],
            (INTAKE_STAGE.to_string(), StageOutcome::Failure)
        );
    }

    #[tokio::test]
    async fn test_ledger_and_correction() {
        let ledger = Arc::new(DecisionLog::new());
        let source = StaticEvidenceSource::new().with("A-1", evidence(10, 0.5, 0.9));
        let pipeline = pipeline_with(Arc::new(source)).with_ledger(ledger.clone());

        let a = alert("A-1", 0.2);
        let first = pipeline.process_alert(&a).await;
        let corrected = pipeline.correct(first.decision_id, &a).await.unwrap();

        assert_eq!(corrected.supersedes, Some(first.decision_id));
        assert_ne!(corrected.decision_id, first.decision_id);
        assert_eq!(ledger.history("A-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_correction_of_stale_decision_is_rejected() {
        let ledger = Arc::new(DecisionLog::new());
        let source = StaticEvidenceSource::new().with("A-1", evidence(10, 0.5, 0.9));
        let pipeline = pipeline_with(Arc::new(source)).with_ledger(ledger.clone());

        let a = alert("A-1", 0.2);
        let first = pipeline.process_alert(&a).await;
        let second = pipeline.process_alert(&a).await;

        let result = pipeline.correct(first.decision_id, &a).await;
        assert!(matches!(result, Err(TriageError::InvalidCorrection(_))));

        let history = ledger.history("A-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].decision_id, second.decision_id);
    }

    #[tokio::test]
    async fn test_correction_requires_ledger() {
        let source = StaticEvidenceSource::new().with("A-1", evidence(10, 0.5, 0.9));
        let pipeline = pipeline_with(Arc::new(source));

        let result = pipeline.correct(Uuid::new_v4(), &alert("A-1", 0.2)).await;
        assert!(matches!(result, Err(TriageError::InvalidCorrection(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        let settings = Settings {
            retry_backoff: Duration::from_millis(100),
            ..Settings::default()
        };
        let pipeline =
            TriagePipeline::new(Arc::new(StaticEvidenceSource::new()), &settings).unwrap();

        assert_eq!(pipeline.backoff(1), Duration::from_millis(100));
        assert_eq!(pipeline.backoff(2), Duration::from_millis(200));
        assert_eq!(pipeline.backoff(3), Duration::from_millis(400));
        assert_eq!(pipeline.backoff(8), Duration::from_millis(1000));
    }
}
