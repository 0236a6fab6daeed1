//! AML Alert Triage
//!
//! Decides what happens to an anti-money-laundering screening alert and
//! records how the decision was reached:
//! - Deterministic, ordered disposition policy over a scored evidence bundle
//! - Append-only, tamper-evident audit trail per alert
//! - Regulator-facing export of the trail
//! - Retry, timeout and emergency escalation around evidence gathering
//!
//! PIPELINE:
//! INTAKE → GATHER EVIDENCE → EVALUATE → DECIDE → FINALIZE TRAIL

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod evidence;
pub mod logging;
pub mod models;
pub mod triage;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use audit::{AuditEntry, AuditTrail, DecisionLog, FrozenTrail, RegulatorExport};
pub use config::{Settings, ThresholdConfig};
pub use evaluator::{evaluate, Evaluation, PolicyEvaluator};
pub use triage::{BatchReport, TriagePipeline};
