// pdsync/src/sync/mod.rs
pub(crate) mod logic;

use anyhow::{Context, Result};
use log::info;

use crate::config::{AppConfig, OperationConfig};

/// Public entry point for the person sync.
pub async fn run_sync_flow(app_config: &AppConfig) -> Result<()> {
    let sync_config = match &app_config.operation {
        Some(OperationConfig::Sync(cfg)) => cfg,
        _ => anyhow::bail!("Sync operation selected but no sync configuration found."),
    };

    let outcome = logic::perform_sync_orchestration(sync_config).await?;
    let label = match &outcome {
        logic::UpsertOutcome::Created(_) => "Created new person",
        logic::UpsertOutcome::Updated(_) => "Updated existing person",
    };
    info!(
        "{} '{}' (id {})",
        label,
        outcome.record().name().unwrap_or("<unnamed>"),
        outcome.record().id
    );

    let record = outcome.into_record();
    let rendered = serde_json::to_string_pretty(&record)
        .context("Failed to render Pipedrive person")?;
    println!("✅ Final Pipedrive Person:\n{}", rendered);
    Ok(())
}

/// Resolves and prints the payload without contacting Pipedrive.
pub fn run_preview_flow(app_config: &AppConfig) -> Result<()> {
    let sources = match &app_config.operation {
        Some(OperationConfig::Preview(sources)) => sources,
        _ => anyhow::bail!("Preview selected but no mapping sources found."),
    };

    let payload = logic::build_payload(sources)?;
    let rendered =
        serde_json::to_string_pretty(&payload).context("Failed to render person payload")?;
    println!("{}", rendered);
    Ok(())
}
