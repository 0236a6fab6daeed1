//! Core data models for alert triage

use crate::audit::FrozenTrail;
use crate::error::TriageError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Sanctions,
    Pep,
    AdverseMedia,
    Transaction,
    KycOngoing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Individual,
    Business,
}

/// Final disposition of an alert, ordered by severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    AutoClear,
    EscalateL2,
    EscalateL3,
    EscalateSar,
    BlockTransaction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EscalationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Rules of the disposition policy, in evaluation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    CriticalRegulatoryFlag,
    SevereRisk,
    HighRiskOrNovelPattern,
    InsufficientConfidenceOrData,
    AutoClear,
    Residual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Success,
    Failure,
    Retried,
}

//
// ================= Alert =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub customer: CustomerData,
    pub screening_results: ScreeningResults,
    pub regulatory_context: RegulatoryContext,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerData {
    pub customer_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub entity_type: EntityType,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub city: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreeningResults {
    #[serde(default)]
    pub match_details: Vec<MatchDetail>,
    #[serde(default)]
    pub data_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetail {
    pub source: String,
    pub match_type: String,
    pub matched_name: String,
    pub match_score: f64,
    pub list_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryContext {
    pub jurisdiction: String,
    #[serde(default)]
    pub applicable_regulations: Vec<String>,
}

impl Alert {
    /// Reject alerts the screening system should never have emitted.
    pub fn validate(&self) -> Result<()> {
        if self.alert_id.trim().is_empty() {
            return Err(TriageError::InvalidAlert("alert_id is empty".into()));
        }
        if self.customer.customer_id.trim().is_empty() {
            return Err(TriageError::InvalidAlert(format!(
                "alert {}: customer_id is empty",
                self.alert_id
            )));
        }
        if self.customer.name.trim().is_empty() {
            return Err(TriageError::InvalidAlert(format!(
                "alert {}: customer name is empty",
                self.alert_id
            )));
        }
        if let Some(i) = self
            .customer
            .addresses
            .iter()
            .position(|a| a.country.trim().is_empty())
        {
            return Err(TriageError::InvalidAlert(format!(
                "alert {}: address {} has no country code",
                self.alert_id, i
            )));
        }
        for m in &self.screening_results.match_details {
            if !m.match_score.is_finite() || !(0.0..=1.0).contains(&m.match_score) {
                return Err(TriageError::InvalidAlert(format!(
                    "alert {}: match score {} for '{}' outside [0, 1]",
                    self.alert_id, m.match_score, m.matched_name
                )));
            }
        }
        Ok(())
    }

    /// Highest screening match score, 0 when nothing matched.
    pub fn max_match_score(&self) -> f64 {
        self.screening_results
            .match_details
            .iter()
            .map(|m| m.match_score)
            .fold(0.0, f64::max)
    }
}

//
// ================= Evidence =================
//

/// Scores and flags produced by the upstream enrichment pipeline.
///
/// This is an untrusted boundary value: `validate` rejects anything out of
/// range instead of clamping it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceBundle {
    pub risk_score: i64,
    pub confidence: f64,
    pub data_completeness: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub regulatory_citations: Vec<String>,
    #[serde(default)]
    pub critical_flags: Vec<String>,
    #[serde(default)]
    pub novel_patterns: Vec<String>,
}

impl EvidenceBundle {
    pub fn validate(&self) -> Result<()> {
        if !(0..=100).contains(&self.risk_score) {
            return Err(TriageError::InvalidEvidence(format!(
                "risk score {} outside [0, 100]",
                self.risk_score
            )));
        }
        check_unit("confidence", self.confidence)?;
        check_unit("data completeness", self.data_completeness)?;

        if self.critical_flags.iter().any(|f| f.trim().is_empty()) {
            return Err(TriageError::InvalidEvidence(
                "blank critical regulatory flag".into(),
            ));
        }
        if self.novel_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(TriageError::InvalidEvidence("blank novel pattern".into()));
        }
        Ok(())
    }

    pub fn has_critical_flag(&self) -> bool {
        !self.critical_flags.is_empty()
    }

    pub fn has_novel_pattern(&self) -> bool {
        !self.novel_patterns.is_empty()
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(TriageError::InvalidEvidence(format!(
            "{} {} outside [0, 1]",
            name, value
        )));
    }
    Ok(())
}

//
// ================= Decision =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedAction {
    pub action: String,
    pub priority: u32,
    pub justification: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationDetails {
    pub reason: String,
    pub priority: EscalationPriority,
    pub suggested_reviewer: String,
}

/// What the disposition rests on, split by how each item bears on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecisionFactors {
    /// Conditions of the rule that fired
    pub primary_factors: Vec<String>,
    pub supporting_factors: Vec<String>,
    /// Evidence that points the other way
    pub contrary_evidence: Vec<String>,
    pub uncertainty_factors: Vec<String>,
}

/// Final, immutable outcome for one alert. Corrections are new decisions
/// with `supersedes` pointing at the prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: Uuid,
    pub alert_id: String,
    pub disposition: Disposition,
    pub confidence_score: f64,
    pub risk_score: i64,
    pub rationale: String,
    #[serde(default)]
    pub decision_factors: DecisionFactors,
    /// `None` for emergency escalations, where no policy rule ran.
    pub rule: Option<PolicyRule>,
    pub recommended_actions: Vec<RecommendedAction>,
    pub requires_human_review: bool,
    pub escalation: Option<EscalationDetails>,
    pub regulatory_citations: Vec<String>,
    pub risk_factors: Vec<String>,
    pub audit_trail: FrozenTrail,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub supersedes: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_emergency(&self) -> bool {
        self.rule.is_none()
    }
}

//
// ================= Ordering & Display =================
//

impl Disposition {
    fn severity(&self) -> u8 {
        match self {
            Disposition::AutoClear => 0,
            Disposition::EscalateL2 => 1,
            Disposition::EscalateL3 => 2,
            Disposition::EscalateSar => 3,
            Disposition::BlockTransaction => 4,
        }
    }
}

impl PartialOrd for Disposition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Disposition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::AutoClear => "AUTO_CLEAR",
            Disposition::EscalateL2 => "ESCALATE_L2",
            Disposition::EscalateL3 => "ESCALATE_L3",
            Disposition::EscalateSar => "ESCALATE_SAR",
            Disposition::BlockTransaction => "BLOCK_TRANSACTION",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyRule::CriticalRegulatoryFlag => "critical_regulatory_flag",
            PolicyRule::SevereRisk => "severe_risk",
            PolicyRule::HighRiskOrNovelPattern => "high_risk_or_novel_pattern",
            PolicyRule::InsufficientConfidenceOrData => "insufficient_confidence_or_data",
            PolicyRule::AutoClear => "auto_clear",
            PolicyRule::Residual => "residual",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageOutcome::Success => "success",
            StageOutcome::Failure => "failure",
            StageOutcome::Retried => "retried",
        };
        write!(f, "{}", s)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{alert, evidence};
    use super::*;

    #[test]
    fn test_disposition_severity_order() {
        assert!(Disposition::AutoClear < Disposition::EscalateL2);
        assert!(Disposition::EscalateL2 < Disposition::EscalateL3);
        assert!(Disposition::EscalateL3 < Disposition::EscalateSar);
        assert!(Disposition::EscalateSar < Disposition::BlockTransaction);
    }

    #[test]
    fn test_disposition_wire_names() {
        let json = serde_json::to_string(&Disposition::EscalateSar).unwrap();
        assert_eq!(json, "\"ESCALATE_SAR\"");

        let parsed: Disposition = serde_json::from_str("\"ESCALATE_L2\"").unwrap();
        assert_eq!(parsed, Disposition::EscalateL2);
        assert_eq!(Disposition::EscalateL2.to_string(), "ESCALATE_L2");
    }

    #[test]
    fn test_evidence_rejects_out_of_range() {
        let cases = vec![
            evidence(150, 0.9, 0.9),
            evidence(-1, 0.9, 0.9),
            evidence(50, 1.2, 0.9),
            evidence(50, 0.9, -0.1),
            evidence(50, f64::NAN, 0.9),
        ];

        for e in cases {
            assert!(matches!(e.validate(), Err(TriageError::InvalidEvidence(_))));
        }
    }

    #[test]
    fn test_evidence_rejects_blank_flags() {
        let mut e = evidence(10, 0.9, 0.9);
        e.critical_flags.push("  ".into());
        assert!(matches!(e.validate(), Err(TriageError::InvalidEvidence(_))));
    }

    #[test]
    fn test_evidence_bounds_are_inclusive() {
        assert!(evidence(0, 0.0, 0.0).validate().is_ok());
        assert!(evidence(100, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_alert_validation() {
        assert!(alert("A-1", 0.92).validate().is_ok());

        let mut blank_id = alert("A-1", 0.92);
        blank_id.alert_id = " ".into();
        assert!(matches!(blank_id.validate(), Err(TriageError::InvalidAlert(_))));

        let bad_score = alert("A-2", 1.5);
        assert!(matches!(bad_score.validate(), Err(TriageError::InvalidAlert(_))));

        let mut no_country = alert("A-3", 0.5);
        no_country.customer.addresses[0].country = String::new();
        assert!(matches!(no_country.validate(), Err(TriageError::InvalidAlert(_))));
    }

    #[test]
    fn test_alert_deserializes_screening_payload() {
        let payload = serde_json::json!({
            "alert_id": "550e8400-e29b-41d4-a716-446655440000",
            "alert_type": "ADVERSE_MEDIA",
            "priority": "MEDIUM",
            "customer": {
                "customer_id": "CUST-12345",
                "name": "Acme Trading LLC",
                "entity_type": "BUSINESS",
                "addresses": [{ "country": "ARE" }]
            },
            "screening_results": {
                "match_details": [{
                    "source": "Dow Jones",
                    "match_type": "NAME",
                    "matched_name": "Acme Trading",
                    "match_score": 0.81,
                    "list_name": "Adverse Media"
                }]
            },
            "regulatory_context": { "jurisdiction": "UAE" }
        });

        let parsed: Alert = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.alert_type, AlertType::AdverseMedia);
        assert_eq!(parsed.customer.entity_type, EntityType::Business);
        assert!((parsed.max_match_score() - 0.81).abs() < f64::EPSILON);
        assert!(parsed.validate().is_ok());
    }
}
