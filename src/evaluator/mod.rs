//! Disposition evaluator
//!
//! Turns an evidence bundle into exactly one disposition using an ordered
//! rule list where the first match wins. Pure: no I/O, no shared state, no
//! randomness. Only the audit entry timestamp comes from outside, and
//! `evaluate_at` lets callers pin it.

use crate::audit::AuditEntry;
use crate::config::ThresholdConfig;
use crate::error::TriageError;
use crate::models::{Alert, DecisionFactors, Disposition, EvidenceBundle, PolicyRule, StageOutcome};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod actions;
pub mod rules;

pub use actions::{decision_factors, emergency_factors, escalation_details, recommended_actions};
use rules::{
    AutoClearRule, CriticalFlagRule, HighRiskOrNovelPatternRule, InsufficientConfidenceRule,
    ResidualRule, SevereRiskRule,
};

pub const EVALUATION_STAGE: &str = "evaluation";

/// One rule of the disposition policy
pub trait DispositionRule: Send + Sync {
    fn rule(&self) -> PolicyRule;

    fn disposition(&self) -> Disposition;

    fn requires_human_review(&self) -> bool {
        true
    }

    /// Conditions that held, with their numbers, or `None` if the rule does
    /// not fire.
    fn check(&self, evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Option<Vec<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub disposition: Disposition,
    pub requires_human_review: bool,
    pub rationale: String,
    pub rule: PolicyRule,
    pub conditions: Vec<String>,
    pub decision_factors: DecisionFactors,
    pub audit_entry: AuditEntry,
}

/// Evaluator bound to a validated threshold set
pub struct PolicyEvaluator {
    thresholds: ThresholdConfig,
    rules: Vec<Box<dyn DispositionRule>>,
}

impl PolicyEvaluator {
    pub fn new(thresholds: ThresholdConfig) -> Result<Self> {
        thresholds.validate()?;

        let rules: Vec<Box<dyn DispositionRule>> = vec![
            Box::new(CriticalFlagRule),
            Box::new(SevereRiskRule),
            Box::new(HighRiskOrNovelPatternRule),
            Box::new(InsufficientConfidenceRule),
            Box::new(AutoClearRule),
            Box::new(ResidualRule),
        ];

        Ok(Self { thresholds, rules })
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn evaluate(&self, evidence: &EvidenceBundle) -> Result<Evaluation> {
        self.evaluate_at(evidence, None, Utc::now())
    }

    /// Evaluate with the alert's regulatory context folded into the rationale.
    pub fn evaluate_for_alert(&self, alert: &Alert, evidence: &EvidenceBundle) -> Result<Evaluation> {
        self.evaluate_at(evidence, Some(alert), Utc::now())
    }

    pub fn evaluate_at(
        &self,
        evidence: &EvidenceBundle,
        alert: Option<&Alert>,
        at: DateTime<Utc>,
    ) -> Result<Evaluation> {
        evidence.validate()?;

        let (rule, conditions) = self
            .rules
            .iter()
            .find_map(|rule| rule.check(evidence, &self.thresholds).map(|c| (rule, c)))
            .ok_or_else(|| TriageError::InvalidEvidence("no disposition rule matched".into()))?;

        let disposition = rule.disposition();
        let requires_human_review = rule.requires_human_review();
        let rationale = build_rationale(rule.as_ref(), &conditions, evidence, alert);

        debug!(
            alert_id = alert.map(|a| a.alert_id.as_str()).unwrap_or("-"),
            rule = %rule.rule(),
            disposition = %disposition,
            risk_score = evidence.risk_score,
            confidence = evidence.confidence,
            "Evaluation completed"
        );

        let mut audit_entry = AuditEntry::new(EVALUATION_STAGE, StageOutcome::Success, at)
            .with_input(&serde_json::json!({
                "evidence": evidence,
                "thresholds": self.thresholds,
            }))
            .with_output(format!("{} via {}", disposition, rule.rule()))
            .with_metadata("rule", rule.rule().to_string())
            .with_metadata("disposition", disposition.to_string())
            .with_metadata("requires_human_review", requires_human_review)
            .with_metadata("risk_score", evidence.risk_score)
            .with_metadata("confidence", evidence.confidence)
            .with_metadata("data_completeness", evidence.data_completeness)
            .with_metadata("compliance_result", disposition.to_string())
            .affecting_disposition();

        if let Some(alert) = alert {
            audit_entry = audit_entry
                .with_metadata("jurisdiction", alert.regulatory_context.jurisdiction.clone())
                .with_metadata(
                    "regulations",
                    alert.regulatory_context.applicable_regulations.clone(),
                );
        }
        if !evidence.regulatory_citations.is_empty() {
            audit_entry =
                audit_entry.with_metadata("citations", evidence.regulatory_citations.clone());
        }

        let decision_factors =
            actions::decision_factors(disposition, &conditions, evidence, &self.thresholds);

        Ok(Evaluation {
            disposition,
            requires_human_review,
            rationale,
            rule: rule.rule(),
            conditions,
            decision_factors,
            audit_entry,
        })
    }
}

/// Evaluate one bundle against an explicit threshold set.
pub fn evaluate(evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Result<Evaluation> {
    PolicyEvaluator::new(*thresholds)?.evaluate(evidence)
}

fn rule_number(rule: PolicyRule) -> u8 {
    match rule {
        PolicyRule::CriticalRegulatoryFlag => 1,
        PolicyRule::SevereRisk => 2,
        PolicyRule::HighRiskOrNovelPattern => 3,
        PolicyRule::InsufficientConfidenceOrData => 4,
        PolicyRule::AutoClear => 5,
        PolicyRule::Residual => 6,
    }
}

fn build_rationale(
    rule: &dyn DispositionRule,
    conditions: &[String],
    evidence: &EvidenceBundle,
    alert: Option<&Alert>,
) -> String {
    let review = if rule.requires_human_review() {
        "human review required"
    } else {
        "no human review required"
    };

    let mut rationale = format!(
        "Rule {} ({}) → {}, {}: {}.",
        rule_number(rule.rule()),
        rule.rule(),
        rule.disposition(),
        review,
        conditions.join("; ")
    );

    let mut basis = Vec::new();
    if let Some(alert) = alert {
        basis.push(format!("jurisdiction {}", alert.regulatory_context.jurisdiction));
        if !alert.regulatory_context.applicable_regulations.is_empty() {
            basis.push(format!(
                "regulations {}",
                alert.regulatory_context.applicable_regulations.join(", ")
            ));
        }
    }
    if !evidence.regulatory_citations.is_empty() {
        basis.push(format!("citations {}", evidence.regulatory_citations.join(", ")));
    }
    if !basis.is_empty() {
        rationale.push_str(&format!(" Regulatory basis: {}.", basis.join("; ")));
    }

    rationale
}
