//! The six disposition rules, in priority order.

use super::DispositionRule;
use crate::config::ThresholdConfig;
use crate::models::{Disposition, EvidenceBundle, PolicyRule};

/// Rule 1: any critical regulatory flag blocks the transaction.
pub struct CriticalFlagRule;

impl DispositionRule for CriticalFlagRule {
    fn rule(&self) -> PolicyRule {
        PolicyRule::CriticalRegulatoryFlag
    }

    fn disposition(&self) -> Disposition {
        Disposition::BlockTransaction
    }

    fn check(&self, evidence: &EvidenceBundle, _thresholds: &ThresholdConfig) -> Option<Vec<String>> {
        if !evidence.has_critical_flag() {
            return None;
        }
        Some(
            evidence
                .critical_flags
                .iter()
                .map(|flag| format!("critical regulatory flag '{}' present", flag))
                .collect(),
        )
    }
}

/// Rule 2: severe risk goes to SAR review.
pub struct SevereRiskRule;

impl DispositionRule for SevereRiskRule {
    fn rule(&self) -> PolicyRule {
        PolicyRule::SevereRisk
    }

    fn disposition(&self) -> Disposition {
        Disposition::EscalateSar
    }

    fn check(&self, evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Option<Vec<String>> {
        (evidence.risk_score >= thresholds.risk_severe).then(|| {
            vec![format!(
                "risk score {} ≥ severe-risk threshold {}",
                evidence.risk_score, thresholds.risk_severe
            )]
        })
    }
}

/// Rule 3: high risk or a novel pattern goes to senior review.
pub struct HighRiskOrNovelPatternRule;

impl DispositionRule for HighRiskOrNovelPatternRule {
    fn rule(&self) -> PolicyRule {
        PolicyRule::HighRiskOrNovelPattern
    }

    fn disposition(&self) -> Disposition {
        Disposition::EscalateL3
    }

    fn check(&self, evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Option<Vec<String>> {
        let mut conditions = Vec::new();

        if evidence.risk_score >= thresholds.risk_high {
            conditions.push(format!(
                "risk score {} ≥ high-risk threshold {}",
                evidence.risk_score, thresholds.risk_high
            ));
        }
        for pattern in &evidence.novel_patterns {
            conditions.push(format!("novel pattern '{}' detected", pattern));
        }

        (!conditions.is_empty()).then_some(conditions)
    }
}

/// Rule 4: weak confidence or thin data needs an analyst.
pub struct InsufficientConfidenceRule;

impl DispositionRule for InsufficientConfidenceRule {
    fn rule(&self) -> PolicyRule {
        PolicyRule::InsufficientConfidenceOrData
    }

    fn disposition(&self) -> Disposition {
        Disposition::EscalateL2
    }

    fn check(&self, evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Option<Vec<String>> {
        let mut conditions = Vec::new();

        if evidence.confidence < thresholds.escalate_l2_conf {
            conditions.push(format!(
                "confidence {} < escalate-L2 threshold {}",
                evidence.confidence, thresholds.escalate_l2_conf
            ));
        }
        if evidence.data_completeness < thresholds.min_data_completeness {
            conditions.push(format!(
                "data completeness {} < minimum completeness {}",
                evidence.data_completeness, thresholds.min_data_completeness
            ));
        }

        (!conditions.is_empty()).then_some(conditions)
    }
}

/// Rule 5: confident and below the high-risk band.
pub struct AutoClearRule;

impl DispositionRule for AutoClearRule {
    fn rule(&self) -> PolicyRule {
        PolicyRule::AutoClear
    }

    fn disposition(&self) -> Disposition {
        Disposition::AutoClear
    }

    fn requires_human_review(&self) -> bool {
        false
    }

    fn check(&self, evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Option<Vec<String>> {
        let confident = evidence.confidence >= thresholds.auto_clear_conf;
        let below_high = evidence.risk_score < thresholds.risk_high;

        (confident && below_high).then(|| {
            vec![
                format!(
                    "confidence {} ≥ auto-clear threshold {}",
                    evidence.confidence, thresholds.auto_clear_conf
                ),
                format!(
                    "risk score {} < high-risk threshold {}",
                    evidence.risk_score, thresholds.risk_high
                ),
            ]
        })
    }
}

/// Rule 6: whatever is left lands with an L2 analyst. Always fires.
pub struct ResidualRule;

impl DispositionRule for ResidualRule {
    fn rule(&self) -> PolicyRule {
        PolicyRule::Residual
    }

    fn disposition(&self) -> Disposition {
        Disposition::EscalateL2
    }

    fn check(&self, evidence: &EvidenceBundle, thresholds: &ThresholdConfig) -> Option<Vec<String>> {
        let mut conditions = Vec::new();

        if evidence.confidence >= thresholds.escalate_l2_conf {
            conditions.push(format!(
                "confidence {} ≥ escalate-L2 threshold {}",
                evidence.confidence, thresholds.escalate_l2_conf
            ));
        }
        if evidence.confidence < thresholds.auto_clear_conf {
            conditions.push(format!(
                "confidence {} < auto-clear threshold {}",
                evidence.confidence, thresholds.auto_clear_conf
            ));
        }
        if conditions.is_empty() {
            conditions.push("no earlier rule matched".to_string());
        }

        Some(conditions)
    }
}
