//! Follow-up work attached to a disposition.

use crate::config::ThresholdConfig;
use crate::models::{
    DecisionFactors, Disposition, EscalationDetails, EscalationPriority, EvidenceBundle,
    RecommendedAction,
};

fn action(action: &str, priority: u32, justification: &str) -> RecommendedAction {
    RecommendedAction {
        action: action.to_string(),
        priority,
        justification: justification.to_string(),
    }
}

pub fn recommended_actions(disposition: Disposition) -> Vec<RecommendedAction> {
    if disposition == Disposition::AutoClear {
        return vec![action(
            "Close alert with documented rationale",
            1,
            "Low risk assessment and high confidence in data",
        )];
    }

    let mut actions = Vec::with_capacity(3);

    if disposition == Disposition::BlockTransaction {
        actions.push(action(
            "Block pending transactions and freeze account activity",
            1,
            "Critical regulatory flag requires immediate containment",
        ));
    }

    actions.push(action(
        "Review alert details and enrichment data",
        actions.len() as u32 + 1,
        "Human review required for disposition decision",
    ));
    actions.push(action(
        "Verify customer identity and business activities",
        actions.len() as u32 + 1,
        "Ensure accurate risk assessment",
    ));

    if disposition == Disposition::EscalateSar {
        actions.push(action(
            "Prepare SAR filing package",
            actions.len() as u32 + 1,
            "Risk score reached the severe band",
        ));
    }

    actions
}

pub fn escalation_priority(disposition: Disposition) -> EscalationPriority {
    match disposition {
        Disposition::AutoClear => EscalationPriority::Low,
        Disposition::EscalateL2 => EscalationPriority::Medium,
        Disposition::EscalateL3 => EscalationPriority::High,
        Disposition::EscalateSar | Disposition::BlockTransaction => EscalationPriority::Urgent,
    }
}

pub fn suggested_reviewer(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::AutoClear | Disposition::EscalateL2 => "L2 Compliance Analyst",
        _ => "Senior Compliance Officer",
    }
}

/// Routing details for a reviewed disposition. `None` when nobody needs to look.
pub fn escalation_details(
    disposition: Disposition,
    requires_human_review: bool,
    reason: &str,
) -> Option<EscalationDetails> {
    requires_human_review.then(|| EscalationDetails {
        reason: reason.to_string(),
        priority: escalation_priority(disposition),
        suggested_reviewer: suggested_reviewer(disposition).to_string(),
    })
}

/// Split the evidence behind a disposition into primary, supporting,
/// contrary and uncertain items. `conditions` are the fired rule's.
pub fn decision_factors(
    disposition: Disposition,
    conditions: &[String],
    evidence: &EvidenceBundle,
    thresholds: &ThresholdConfig,
) -> DecisionFactors {
    let primary_factors = conditions.to_vec();
    let mut supporting_factors = Vec::new();
    let mut contrary_evidence = Vec::new();
    let mut uncertainty_factors = Vec::new();

    if disposition == Disposition::AutoClear {
        supporting_factors.push("no critical regulatory flags".to_string());
        supporting_factors.push("no novel patterns".to_string());
        if evidence.data_completeness >= thresholds.min_data_completeness {
            supporting_factors.push(format!(
                "data completeness {} ≥ minimum completeness {}",
                evidence.data_completeness, thresholds.min_data_completeness
            ));
        }
        contrary_evidence.extend(evidence.risk_factors.iter().cloned());
    } else {
        supporting_factors.extend(evidence.risk_factors.iter().cloned());
        if evidence.risk_score < thresholds.risk_high {
            contrary_evidence.push(format!(
                "risk score {} < high-risk threshold {}",
                evidence.risk_score, thresholds.risk_high
            ));
        }
        if evidence.confidence >= thresholds.auto_clear_conf {
            contrary_evidence.push(format!(
                "confidence {} ≥ auto-clear threshold {}",
                evidence.confidence, thresholds.auto_clear_conf
            ));
        }
    }

    if evidence.confidence < thresholds.auto_clear_conf {
        uncertainty_factors.push(format!(
            "confidence {} < auto-clear threshold {}",
            evidence.confidence, thresholds.auto_clear_conf
        ));
    }
    if evidence.data_completeness < thresholds.min_data_completeness {
        uncertainty_factors.push(format!(
            "data completeness {} < minimum completeness {}",
            evidence.data_completeness, thresholds.min_data_completeness
        ));
    }
    for pattern in &evidence.novel_patterns {
        uncertainty_factors.push(format!("novel pattern '{}' has no precedent", pattern));
    }
    uncertainty_factors.retain(|f| !primary_factors.contains(f));

    DecisionFactors {
        primary_factors,
        supporting_factors,
        contrary_evidence,
        uncertainty_factors,
    }
}

/// Factors for a decision no rule produced.
pub fn emergency_factors(reason: &str) -> DecisionFactors {
    DecisionFactors {
        primary_factors: vec![format!("System error during processing: {}", reason)],
        supporting_factors: vec![],
        contrary_evidence: vec![],
        uncertainty_factors: vec!["Unable to complete automated analysis".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::evidence;

    #[test]
    fn test_auto_clear_closes_alert() {
        let actions = recommended_actions(Disposition::AutoClear);
        assert_eq!(actions.len(), 1);
        assert!(actions[0].action.starts_with("Close alert"));
    }

    #[test]
    fn test_block_contains_first() {
        let actions = recommended_actions(Disposition::BlockTransaction);
        assert_eq!(actions[0].priority, 1);
        assert!(actions[0].action.starts_with("Block pending"));
        assert_eq!(actions.last().unwrap().priority, actions.len() as u32);
    }

    #[test]
    fn test_sar_adds_filing_step() {
        let actions = recommended_actions(Disposition::EscalateSar);
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[2].action, "Prepare SAR filing package");
        assert_eq!(actions[2].priority, 3);
    }

    #[test]
    fn test_escalation_routing() {
        assert!(escalation_details(Disposition::AutoClear, false, "n/a").is_none());

        let l2 = escalation_details(Disposition::EscalateL2, true, "low confidence").unwrap();
        assert_eq!(l2.priority, EscalationPriority::Medium);
        assert_eq!(l2.suggested_reviewer, "L2 Compliance Analyst");

        let sar = escalation_details(Disposition::EscalateSar, true, "severe").unwrap();
        assert_eq!(sar.priority, EscalationPriority::Urgent);
        assert_eq!(sar.suggested_reviewer, "Senior Compliance Officer");
    }

    #[test]
    fn test_factors_for_auto_clear() {
        let mut e = evidence(20, 0.95, 0.9);
        e.risk_factors.push("1 screening match(es), best score 0.40".into());
        let conditions = vec!["confidence 0.95 ≥ auto-clear threshold 0.85".to_string()];

        let factors = decision_factors(
            Disposition::AutoClear,
            &conditions,
            &e,
            &ThresholdConfig::default(),
        );

        assert_eq!(factors.primary_factors, conditions);
        assert_eq!(factors.contrary_evidence, e.risk_factors);
        assert!(factors.uncertainty_factors.is_empty());
        assert!(factors
            .supporting_factors
            .contains(&"data completeness 0.9 ≥ minimum completeness 0.6".to_string()));
    }

    #[test]
    fn test_factors_for_thin_data_escalation() {
        let mut e = evidence(30, 0.9, 0.4);
        e.novel_patterns.push("layering via prepaid cards".into());
        let conditions = vec!["data completeness 0.4 < minimum completeness 0.6".to_string()];

        let factors = decision_factors(
            Disposition::EscalateL2,
            &conditions,
            &e,
            &ThresholdConfig::default(),
        );

        // Already primary, not repeated as uncertainty.
        assert_eq!(
            factors.uncertainty_factors,
            vec!["novel pattern 'layering via prepaid cards' has no precedent".to_string()]
        );
        assert_eq!(
            factors.contrary_evidence,
            vec![
                "risk score 30 < high-risk threshold 70".to_string(),
                "confidence 0.9 ≥ auto-clear threshold 0.85".to_string(),
            ]
        );
    }

    #[test]
    fn test_emergency_factors() {
        let factors = emergency_factors("upstream 503");
        assert_eq!(factors.primary_factors.len(), 1);
        assert!(factors.primary_factors[0].contains("upstream 503"));
        assert_eq!(factors.uncertainty_factors.len(), 1);
    }
}
