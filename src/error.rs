//! Error types for the alert triage core

use thiserror::Error;

/// Result type alias for triage operations
pub type Result<T> = std::result::Result<T, TriageError>;

#[derive(Error, Debug)]
pub enum TriageError {

    // =============================
    // Core Contract Errors
    // =============================

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("Invalid audit entry: {0}")]
    InvalidAuditEntry(String),

    #[error("Audit trail closed for alert {0}")]
    AuditTrailClosed(String),

    #[error("Threshold configuration error: {0}")]
    ThresholdConfiguration(String),

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Invalid alert: {0}")]
    InvalidAlert(String),

    #[error("Evidence gathering failed: {message}")]
    EvidenceGathering { message: String, retryable: bool },

    #[error("Stage '{stage}' timed out after {timeout_ms} ms")]
    StageTimeout { stage: String, timeout_ms: u64 },

    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    #[error("Invalid correction: {0}")]
    InvalidCorrection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TriageError {
    /// Only transient upstream failures are worth another attempt. The
    /// evaluator and audit trail have no transient dependency, so their
    /// errors fail identically on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TriageError::EvidenceGathering { retryable, .. } => *retryable,
            TriageError::StageTimeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_are_not_retryable() {
        let errors = vec![
            TriageError::InvalidEvidence("risk score 150".into()),
            TriageError::InvalidAuditEntry("missing stage".into()),
            TriageError::AuditTrailClosed("alert-1".into()),
            TriageError::ThresholdConfiguration("not monotonic".into()),
            TriageError::EvidenceGathering {
                message: "schema mismatch".into(),
                retryable: false,
            },
        ];

        for e in errors {
            assert!(!e.is_retryable(), "{} should not be retryable", e);
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(TriageError::EvidenceGathering {
            message: "upstream 503".into(),
            retryable: true,
        }
        .is_retryable());

        assert!(TriageError::StageTimeout {
            stage: "evidence_gathering".into(),
            timeout_ms: 100,
        }
        .is_retryable());
    }
}
