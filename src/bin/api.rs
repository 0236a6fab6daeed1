use aml_alert_triage::{
    api::start_server, audit::DecisionLog, config::Settings, evidence::MockEvidenceSource,
    logging::init_tracing, triage::TriagePipeline,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env and validate thresholds before anything else
    let settings = Settings::from_env()?;
    init_tracing(&settings.log_level);

    info!("🚀 AML Alert Triage - API Server");
    info!("📍 Port: {}", settings.api_port);
    info!(thresholds = ?settings.thresholds, "Thresholds loaded");

    let ledger = Arc::new(DecisionLog::new());
    let pipeline = Arc::new(
        TriagePipeline::new(Arc::new(MockEvidenceSource), &settings)?.with_ledger(ledger),
    );

    info!("✅ Pipeline initialized");
    info!("📡 Starting API server...");

    start_server(pipeline, settings.api_port).await?;

    Ok(())
}
