//! Regulator-facing export of an audit trail.
//!
//! Field names are part of the external contract. The export carries the
//! alert id and nothing else that identifies internal records.

use super::{data_sources_of, decision_chain_of, rfc3339, timeline_of, AuditEntry};
use crate::models::StageOutcome;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegulatorExport {
    pub alert_id: String,
    pub finalized: bool,
    pub finalized_at: Option<String>,
    pub entry_count: usize,
    pub workflow_timeline: Vec<ExportedEntry>,
    pub decision_chain: Vec<ExportedEntry>,
    pub data_sources: Vec<String>,
    pub regulatory_compliance: Vec<ComplianceCheck>,
    pub system_metadata: SystemMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedEntry {
    pub sequence: usize,
    pub timestamp: String,
    pub stage: String,
    pub input_digest: String,
    pub output_summary: String,
    pub outcome: StageOutcome,
    pub metadata: Map<String, Value>,
}

/// A stage that assessed the alert against named regulations or citations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceCheck {
    pub timestamp: String,
    pub stage: String,
    pub result: Option<String>,
    pub jurisdiction: Option<String>,
    pub regulations: Vec<String>,
    pub citations: Vec<String>,
}

/// Build that produced the trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetadata {
    pub system: String,
    pub system_version: String,
}

impl SystemMetadata {
    pub fn current() -> Self {
        Self {
            system: env!("CARGO_PKG_NAME").to_string(),
            system_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RegulatorExport {
    pub fn build(
        alert_id: &str,
        entries: &[AuditEntry],
        finalized_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            finalized: finalized_at.is_some(),
            finalized_at: finalized_at.as_ref().map(rfc3339),
            entry_count: entries.len(),
            workflow_timeline: exported(timeline_of(entries)),
            decision_chain: exported(decision_chain_of(entries)),
            data_sources: data_sources_of(entries),
            regulatory_compliance: compliance_checks(entries),
            system_metadata: SystemMetadata::current(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn exported(entries: Vec<AuditEntry>) -> Vec<ExportedEntry> {
    entries
        .into_iter()
        .enumerate()
        .map(|(i, e)| ExportedEntry {
            sequence: i + 1,
            timestamp: e.timestamp.as_ref().map(rfc3339).unwrap_or_default(),
            stage: e.stage,
            input_digest: e.input_digest,
            output_summary: e.output_summary,
            outcome: e.outcome,
            metadata: e.metadata,
        })
        .collect()
}

fn strings(metadata: &Map<String, Value>, key: &str) -> Vec<String> {
    metadata
        .get(key)
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn compliance_checks(entries: &[AuditEntry]) -> Vec<ComplianceCheck> {
    timeline_of(entries)
        .into_iter()
        .filter(|e| e.metadata.contains_key("regulations") || e.metadata.contains_key("citations"))
        .map(|e| ComplianceCheck {
            timestamp: e.timestamp.as_ref().map(rfc3339).unwrap_or_default(),
            result: e
                .metadata
                .get("compliance_result")
                .and_then(Value::as_str)
                .map(str::to_string),
            jurisdiction: e
                .metadata
                .get("jurisdiction")
                .and_then(Value::as_str)
                .map(str::to_string),
            regulations: strings(&e.metadata, "regulations"),
            citations: strings(&e.metadata, "citations"),
            stage: e.stage,
        })
        .collect()
}
