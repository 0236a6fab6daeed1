//! REST API for alert triage
//!
//! Exposes the evaluator, the pipeline and the decision ledger over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::DecisionLog;
use crate::config::ThresholdConfig;
use crate::error::TriageError;
use crate::evaluator;
use crate::models::{Alert, EvidenceBundle};
use crate::triage::TriagePipeline;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub evidence: EvidenceBundle,
    /// Per-request override of the configured thresholds
    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriageRequest {
    pub alert: Alert,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub alerts: Vec<Alert>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(e: TriageError) -> ApiResult {
    let status = match &e {
        TriageError::InvalidEvidence(_)
        | TriageError::ThresholdConfiguration(_)
        | TriageError::InvalidAlert(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TriageError::DecisionNotFound(_) => StatusCode::NOT_FOUND,
        TriageError::InvalidCorrection(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = status.as_u16(), error = %e, "Request failed");
    (status, Json(ApiResponse::error(e.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<TriagePipeline>,
}

impl ApiState {
    fn ledger(&self) -> Result<&Arc<DecisionLog>, ApiResult> {
        self.pipeline.ledger().ok_or_else(|| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error("decision ledger not configured".into())),
            )
        })
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "thresholds": state.pipeline.evaluator().thresholds(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Evaluation Endpoint
/// =============================

async fn evaluate(
    State(state): State<ApiState>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult {
    let result = match &req.thresholds {
        Some(thresholds) => evaluator::evaluate(&req.evidence, thresholds),
        None => state.pipeline.evaluator().evaluate(&req.evidence),
    };

    match result {
        Ok(evaluation) => ok(evaluation),
        Err(e) => failure(e),
    }
}

/// =============================
/// Triage Endpoints
/// =============================

async fn triage_alert(
    State(state): State<ApiState>,
    Json(req): Json<TriageRequest>,
) -> ApiResult {
    info!(alert_id = %req.alert.alert_id, "Received triage request");
    ok(state.pipeline.process_alert(&req.alert).await)
}

async fn triage_batch(State(state): State<ApiState>, Json(req): Json<BatchRequest>) -> ApiResult {
    info!(batch_size = req.alerts.len(), "Received batch triage request");
    ok(state.pipeline.process_batch(req.alerts).await)
}

/// =============================
/// Ledger Endpoints
/// =============================

async fn alert_history(
    State(state): State<ApiState>,
    Path(alert_id): Path<String>,
) -> ApiResult {
    let ledger = match state.ledger() {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };

    match ledger.history(&alert_id).await {
        Ok(history) => ok(history),
        Err(e) => failure(e),
    }
}

async fn get_decision(
    State(state): State<ApiState>,
    Path(decision_id): Path<Uuid>,
) -> ApiResult {
    let ledger = match state.ledger() {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };

    match ledger.get(decision_id).await {
        Ok(Some(decision)) => {
            let integrity_verified = decision.audit_trail.verify_integrity();
            ok(serde_json::json!({
                "decision": decision,
                "integrity_verified": integrity_verified,
            }))
        }
        Ok(None) => failure(TriageError::DecisionNotFound(decision_id.to_string())),
        Err(e) => failure(e),
    }
}

async fn decision_audit(
    State(state): State<ApiState>,
    Path(decision_id): Path<Uuid>,
) -> ApiResult {
    let ledger = match state.ledger() {
        Ok(ledger) => ledger,
        Err(response) => return response,
    };

    match ledger.get(decision_id).await {
        Ok(Some(decision)) => ok(decision.audit_trail.regulator_export()),
        Ok(None) => failure(TriageError::DecisionNotFound(decision_id.to_string())),
        Err(e) => failure(e),
    }
}

async fn reprocess_decision(
    State(state): State<ApiState>,
    Path(decision_id): Path<Uuid>,
    Json(req): Json<TriageRequest>,
) -> ApiResult {
    info!(prior = %decision_id, alert_id = %req.alert.alert_id, "Received reprocess request");

    match state.pipeline.correct(decision_id, &req.alert).await {
        Ok(decision) => ok(decision),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<TriagePipeline>) -> Router {
    let state = ApiState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/api/evaluate", post(evaluate))
        .route("/api/triage", post(triage_alert))
        .route("/api/triage/batch", post(triage_batch))
        .route("/api/alerts/:alert_id/decisions", get(alert_history))
        .route("/api/decisions/:decision_id", get(get_decision))
        .route("/api/decisions/:decision_id/audit", get(decision_audit))
        .route("/api/decisions/:decision_id/reprocess", post(reprocess_decision))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<TriagePipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
