use aml_alert_triage::{
    audit::DecisionLog,
    config::Settings,
    evidence::MockEvidenceSource,
    logging::init_tracing,
    models::{
        Address, Alert, AlertPriority, AlertType, CustomerData, EntityType, MatchDetail,
        RegulatoryContext, ScreeningResults,
    },
    triage::TriagePipeline,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

fn sample_alert(
    alert_id: &str,
    alert_type: AlertType,
    name: &str,
    country: &str,
    list_name: &str,
    match_score: f64,
) -> Alert {
    Alert {
        alert_id: alert_id.to_string(),
        alert_type,
        priority: AlertPriority::High,
        customer: CustomerData {
            customer_id: format!("CUST-{}", alert_id),
            name: name.to_string(),
            aliases: vec![],
            entity_type: EntityType::Individual,
            addresses: vec![Address {
                city: None,
                country: country.to_string(),
            }],
        },
        screening_results: ScreeningResults {
            match_details: vec![MatchDetail {
                source: "OFAC".to_string(),
                match_type: "NAME".to_string(),
                matched_name: name.to_string(),
                match_score,
                list_name: list_name.to_string(),
            }],
            data_sources: vec!["OFAC".to_string(), "UN".to_string(), "EU".to_string()],
        },
        regulatory_context: RegulatoryContext {
            jurisdiction: "USA".to_string(),
            applicable_regulations: vec!["BSA".to_string(), "OFAC".to_string()],
        },
        received_at: Utc::now(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    init_tracing(&settings.log_level);

    info!("AML alert triage starting");

    let ledger = Arc::new(DecisionLog::new());
    let pipeline = Arc::new(
        TriagePipeline::new(Arc::new(MockEvidenceSource), &settings)?.with_ledger(ledger.clone()),
    );

    let alerts = vec![
        sample_alert("ALERT-001", AlertType::Sanctions, "Ivan Petrov", "RUS", "SDN", 0.98),
        sample_alert("ALERT-002", AlertType::Pep, "Maria Lopez", "MEX", "PEP", 0.72),
        sample_alert("ALERT-003", AlertType::KycOngoing, "Jane Doe", "USA", "KYC", 0.15),
        sample_alert("ALERT-004", AlertType::Transaction, "Ali Karimi", "IRN", "WATCH", 0.55),
    ];

    let report = pipeline.process_batch(alerts).await;

    println!("\n=== TRIAGE RESULTS ===");
    for item in &report.items {
        let decision = &item.decision;
        println!("\nAlert: {}", item.alert_id);
        println!("  Disposition: {}", decision.disposition);
        println!("  Risk / Confidence: {} / {:.2}", decision.risk_score, decision.confidence_score);
        println!("  Human review: {}", decision.requires_human_review);
        if let Some(escalation) = &decision.escalation {
            println!(
                "  Escalation: {:?} to {}",
                escalation.priority, escalation.suggested_reviewer
            );
        }
        println!("  Rationale: {}", decision.rationale);
        println!("  Audit entries: {}", decision.audit_trail.len());
    }

    println!("\n=== SUMMARY ===");
    println!("{}", serde_json::to_string_pretty(&report.summary)?);

    if let Some(first) = report.items.first() {
        println!("\n=== REGULATOR EXPORT ({}) ===", first.alert_id);
        println!("{}", first.decision.audit_trail.export()?);
    }

    Ok(())
}
