//! Audit trail and decision ledger
//!
//! Every stage that touches an alert leaves an entry. Trails are append-only
//! until finalized, after which they are shared read-only through
//! `FrozenTrail`.

use crate::error::TriageError;
use crate::models::{Decision, StageOutcome};
use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod export;

pub use export::{ComplianceCheck, ExportedEntry, RegulatorExport, SystemMetadata};

//
// ================= Entries =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub stage: String,
    pub input_digest: String,
    pub output_summary: String,
    pub outcome: StageOutcome,
    #[serde(default)]
    pub affects_disposition: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(stage: impl Into<String>, outcome: StageOutcome, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(at),
            stage: stage.into(),
            input_digest: String::new(),
            output_summary: String::new(),
            outcome,
            affects_disposition: false,
            metadata: Map::new(),
        }
    }

    /// Record a digest of the stage input, never the input itself.
    pub fn with_input<T: Serialize + ?Sized>(mut self, input: &T) -> Self {
        self.input_digest = digest(input);
        self
    }

    pub fn with_output(mut self, summary: impl Into<String>) -> Self {
        self.output_summary = summary.into();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_outcome(mut self, outcome: StageOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Mark the entry as part of the decision chain.
    pub fn affecting_disposition(mut self) -> Self {
        self.affects_disposition = true;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.timestamp.is_none() {
            return Err(TriageError::InvalidAuditEntry(format!(
                "entry for stage '{}' has no timestamp",
                self.stage
            )));
        }
        if self.stage.trim().is_empty() {
            return Err(TriageError::InvalidAuditEntry(
                "entry has no stage name".into(),
            ));
        }
        Ok(())
    }
}

//
// ================= Trail =================
//

/// Append-only trail for one alert's processing lifetime.
#[derive(Debug)]
pub struct AuditTrail {
    alert_id: String,
    entries: Vec<AuditEntry>,
    frozen: Option<FrozenTrail>,
}

impl AuditTrail {
    pub fn new(alert_id: impl Into<String>) -> Self {
        Self {
            alert_id: alert_id.into(),
            entries: Vec::new(),
            frozen: None,
        }
    }

    pub fn alert_id(&self) -> &str {
        &self.alert_id
    }

    pub fn append(&mut self, entry: AuditEntry) -> Result<()> {
        if self.frozen.is_some() {
            warn!(alert_id = %self.alert_id, stage = %entry.stage, "Append after finalize");
            return Err(TriageError::AuditTrailClosed(self.alert_id.clone()));
        }
        entry.validate()?;

        debug!(
            alert_id = %self.alert_id,
            stage = %entry.stage,
            outcome = %entry.outcome,
            "Audit entry appended"
        );
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[AuditEntry] {
        match &self.frozen {
            Some(frozen) => frozen.entries(),
            None => &self.entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.frozen.is_some()
    }

    /// Freeze the trail. Repeated calls hand back the same frozen view.
    pub fn finalize(&mut self) -> FrozenTrail {
        if let Some(frozen) = &self.frozen {
            return frozen.clone();
        }

        let entries = Arc::new(std::mem::take(&mut self.entries));
        let frozen = FrozenTrail {
            alert_id: self.alert_id.clone(),
            trail_digest: digest(entries.as_slice()),
            entries,
            finalized_at: Utc::now(),
        };

        self.frozen = Some(frozen.clone());
        frozen
    }

    pub fn timeline(&self) -> Vec<AuditEntry> {
        timeline_of(self.entries())
    }

    pub fn decision_chain(&self) -> Vec<AuditEntry> {
        decision_chain_of(self.entries())
    }

    /// Regulator export of the trail as it currently stands.
    pub fn export(&self) -> Result<String> {
        match &self.frozen {
            Some(frozen) => frozen.export(),
            None => RegulatorExport::build(&self.alert_id, &self.entries, None).to_json(),
        }
    }
}

/// Read-only, shareable view of a finalized trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenTrail {
    pub alert_id: String,
    pub entries: Arc<Vec<AuditEntry>>,
    pub finalized_at: DateTime<Utc>,
    pub trail_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrailSummary {
    pub alert_id: String,
    pub total_entries: usize,
    pub stages: Vec<String>,
    pub failures: usize,
    pub retries: usize,
}

impl FrozenTrail {
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn timeline(&self) -> Vec<AuditEntry> {
        timeline_of(&self.entries)
    }

    pub fn decision_chain(&self) -> Vec<AuditEntry> {
        decision_chain_of(&self.entries)
    }

    pub fn summary(&self) -> TrailSummary {
        let mut stages: Vec<String> = Vec::new();
        for entry in self.entries.iter() {
            if !stages.contains(&entry.stage) {
                stages.push(entry.stage.clone());
            }
        }

        TrailSummary {
            alert_id: self.alert_id.clone(),
            total_entries: self.entries.len(),
            stages,
            failures: self.count(StageOutcome::Failure),
            retries: self.count(StageOutcome::Retried),
        }
    }

    /// Data sources named in entry metadata, sorted and deduplicated.
    pub fn data_sources(&self) -> Vec<String> {
        data_sources_of(&self.entries)
    }

    pub fn regulator_export(&self) -> RegulatorExport {
        RegulatorExport::build(&self.alert_id, &self.entries, Some(self.finalized_at))
    }

    pub fn export(&self) -> Result<String> {
        self.regulator_export().to_json()
    }

    /// Recompute the entry digest and compare it with the one taken at
    /// finalize time.
    pub fn verify_integrity(&self) -> bool {
        digest(self.entries.as_slice()) == self.trail_digest
    }

    fn count(&self, outcome: StageOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// Wall-clock order, append order on equal timestamps.
fn timeline_of(entries: &[AuditEntry]) -> Vec<AuditEntry> {
    let mut indexed: Vec<(usize, &AuditEntry)> = entries.iter().enumerate().collect();
    indexed.sort_by_key(|(seq, e)| (e.timestamp, *seq));
    indexed.into_iter().map(|(_, e)| e.clone()).collect()
}

/// Append order, so a clock step cannot reorder cause and effect.
fn decision_chain_of(entries: &[AuditEntry]) -> Vec<AuditEntry> {
    entries
        .iter()
        .filter(|e| e.affects_disposition && e.outcome == StageOutcome::Success)
        .cloned()
        .collect()
}

pub(crate) fn data_sources_of(entries: &[AuditEntry]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for entry in entries {
        if let Some(list) = entry.metadata.get("sources").and_then(Value::as_array) {
            sources.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if let Some(source) = entry.metadata.get("data_source").and_then(Value::as_str) {
            sources.push(source.to_string());
        }
    }
    sources.sort();
    sources.dedup();
    sources
}

pub(crate) fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

//
// ================= Digests =================
//

/// SHA-256 over the JSON encoding of `value`, hex encoded.
/// Streams straight into the hasher without an intermediate String.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//
// ================= Decision Ledger =================
//

#[derive(Default)]
struct LedgerState {
    decisions: Vec<Decision>,
    by_id: HashMap<Uuid, usize>,
}

/// Insert-only store of produced decisions. A correction never replaces a
/// decision; it is recorded next to it with `supersedes` set.
pub struct DecisionLog {
    state: Arc<RwLock<LedgerState>>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
        }
    }

    /// Store a decision
    pub async fn record(&self, decision: Decision) -> Result<Uuid> {
        let mut state = self.state.write().await;
        insert(&mut state, decision)
    }

    /// Record `correction` as the successor of `prior_id`.
    ///
    /// The prior decision must exist, belong to the same alert and still be
    /// the latest decision for it.
    pub async fn supersede(&self, prior_id: Uuid, mut correction: Decision) -> Result<Uuid> {
        let mut state = self.state.write().await;

        let prior_index = *state
            .by_id
            .get(&prior_id)
            .ok_or_else(|| TriageError::DecisionNotFound(prior_id.to_string()))?;
        let prior_alert = state.decisions[prior_index].alert_id.clone();

        if prior_alert != correction.alert_id {
            return Err(TriageError::InvalidCorrection(format!(
                "correction for alert {} cannot supersede decision for alert {}",
                correction.alert_id, prior_alert
            )));
        }

        // Anything recorded later for the same alert already continues the
        // chain; superseding the prior again would fork it.
        if let Some(later) = state.decisions[prior_index + 1..]
            .iter()
            .find(|d| d.alert_id == prior_alert)
        {
            let reason = if later.supersedes == Some(prior_id) {
                format!("decision {} has already been superseded", prior_id)
            } else {
                format!(
                    "decision {} is not the latest for alert {}; {} was recorded after it",
                    prior_id, prior_alert, later.decision_id
                )
            };
            return Err(TriageError::InvalidCorrection(reason));
        }

        correction.supersedes = Some(prior_id);
        insert(&mut state, correction)
    }

    /// Retrieve a decision by id
    pub async fn get(&self, decision_id: Uuid) -> Result<Option<Decision>> {
        let state = self.state.read().await;
        Ok(state.by_id.get(&decision_id).map(|&i| state.decisions[i].clone()))
    }

    /// All decisions for an alert, oldest first
    pub async fn history(&self, alert_id: &str) -> Result<Vec<Decision>> {
        let state = self.state.read().await;
        Ok(state
            .decisions
            .iter()
            .filter(|d| d.alert_id == alert_id)
            .cloned()
            .collect())
    }

    pub async fn latest(&self, alert_id: &str) -> Result<Option<Decision>> {
        Ok(self.history(alert_id).await?.pop())
    }

    /// Verify a decision's audit trail against its finalize-time digest
    pub async fn verify_integrity(&self, decision_id: Uuid) -> Result<bool> {
        let state = self.state.read().await;

        match state.by_id.get(&decision_id) {
            Some(&i) => Ok(state.decisions[i].audit_trail.verify_integrity()),
            None => Ok(false),
        }
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(state: &mut LedgerState, decision: Decision) -> Result<Uuid> {
    let decision_id = decision.decision_id;
    if state.by_id.contains_key(&decision_id) {
        return Err(TriageError::InvalidCorrection(format!(
            "decision {} already recorded",
            decision_id
        )));
    }

    state.by_id.insert(decision_id, state.decisions.len());
    state.decisions.push(decision);
    Ok(decision_id)
}
