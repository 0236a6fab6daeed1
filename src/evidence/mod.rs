//! Evidence sources
//!
//! The enrichment/scoring pipeline lives outside this crate. `EvidenceSource`
//! is the seam it plugs into; the implementations here keep the system
//! usable without it.

use crate::error::TriageError;
use crate::models::{Alert, AlertType, EvidenceBundle};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Trait for evidence gathering (upstream, possibly LLM backed)
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gather a fully resolved bundle for `alert`, or fail explicitly.
    async fn gather(&self, alert: &Alert) -> Result<EvidenceBundle>;
}

/// Pre-computed bundles keyed by alert id
#[derive(Default)]
pub struct StaticEvidenceSource {
    bundles: HashMap<String, EvidenceBundle>,
}

impl StaticEvidenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alert_id: impl Into<String>, bundle: EvidenceBundle) {
        self.bundles.insert(alert_id.into(), bundle);
    }

    pub fn with(mut self, alert_id: impl Into<String>, bundle: EvidenceBundle) -> Self {
        self.insert(alert_id, bundle);
        self
    }
}

#[async_trait]
impl EvidenceSource for StaticEvidenceSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn gather(&self, alert: &Alert) -> Result<EvidenceBundle> {
        self.bundles
            .get(&alert.alert_id)
            .cloned()
            .ok_or_else(|| TriageError::EvidenceGathering {
                message: format!("no evidence registered for alert {}", alert.alert_id),
                retryable: false,
            })
    }
}

/// FATF "call for action" jurisdictions
const HIGH_RISK_COUNTRIES: &[&str] = &["IRN", "PRK", "MMR"];

/// Deterministic stand-in for the scoring pipeline, driven by the
/// screening matches alone. For development and demos.
pub struct MockEvidenceSource;

#[async_trait]
impl EvidenceSource for MockEvidenceSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn gather(&self, alert: &Alert) -> Result<EvidenceBundle> {
        let max_score = alert.max_match_score();
        let matches = &alert.screening_results.match_details;

        let mut risk_factors = Vec::new();
        let mut critical_flags = Vec::new();

        let type_weight = match alert.alert_type {
            AlertType::Sanctions => 15,
            AlertType::Pep => 10,
            AlertType::AdverseMedia | AlertType::Transaction => 5,
            AlertType::KycOngoing => 0,
        };

        if !matches.is_empty() {
            risk_factors.push(format!(
                "{} screening match(es), best score {:.2}",
                matches.len(),
                max_score
            ));
        }

        let high_risk_country = alert
            .customer
            .addresses
            .iter()
            .find(|a| HIGH_RISK_COUNTRIES.contains(&a.country.to_uppercase().as_str()));
        if let Some(address) = high_risk_country {
            risk_factors.push(format!("address in high-risk jurisdiction {}", address.country));
        }

        if alert.alert_type == AlertType::Sanctions {
            for m in matches.iter().filter(|m| m.match_score >= 0.95) {
                critical_flags.push(format!(
                    "direct {} match on {} ({:.2})",
                    m.source, m.list_name, m.match_score
                ));
            }
        }

        let risk_score = ((max_score * 75.0).round() as i64
            + type_weight
            + if high_risk_country.is_some() { 10 } else { 0 })
        .clamp(0, 100);

        let sources = alert.screening_results.data_sources.len();
        let confidence = (0.55 + 0.15 * sources.min(3) as f64).min(1.0);

        let present = [
            !alert.customer.addresses.is_empty(),
            !alert.customer.aliases.is_empty(),
            sources > 0,
            !alert.regulatory_context.applicable_regulations.is_empty(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        let data_completeness = (1 + present) as f64 / 5.0;

        let citation = match alert.alert_type {
            AlertType::Sanctions => "31 CFR Part 501",
            AlertType::Pep => "31 CFR 1010.620",
            AlertType::Transaction => "31 CFR 1020.320",
            AlertType::AdverseMedia | AlertType::KycOngoing => "31 CFR 1020.220",
        };

        Ok(EvidenceBundle {
            risk_score,
            confidence,
            data_completeness,
            risk_factors,
            regulatory_citations: vec![citation.to_string()],
            critical_flags,
            novel_patterns: vec![],
        })
    }
}
