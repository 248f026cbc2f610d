//! Pipedrive person sync
//!
//! Provides CLI interface for pushing one mapped person record into Pipedrive

// pdsync/src/main.rs
mod config;
mod crm;
mod errors;
mod mapping;
mod sync;

use anyhow::{Context, Result};
use config::{
    AppConfig, OperationConfig, load_pipedrive_config, load_source_files_from_json,
    load_sync_config_from_json, process_env,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Overrides the default `config.json` location.
const CONFIG_PATH_VAR: &str = "PDSYNC_CONFIG";

/// Main entry point for the sync tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json in the working directory unless PDSYNC_CONFIG points elsewhere.
    let config_path = env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let mut app_config = AppConfig::load_from_json(&config_path)
        .context(format!("Failed to load application configuration from {}", config_path.display()))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "sync" => {
            println!("🚀 Starting Person Sync...");
            let sync_config = load_sync_config_from_json(&app_config.raw_json_config, process_env)
                .context("Failed to load sync configuration")?;
            app_config.operation = Some(OperationConfig::Sync(sync_config));
            sync::run_sync_flow(&app_config).await
                .context("Sync process failed")?;
        }
        "2" | "domain" => {
            println!("🔎 Looking up company domain...");
            let pipedrive_config = load_pipedrive_config(&app_config.raw_json_config, false, process_env)
                .context("Failed to load Pipedrive configuration")?;
            app_config.operation = Some(OperationConfig::Domain(pipedrive_config));
            crm::run_domain_flow(&app_config).await
                .context("Domain lookup failed")?;
        }
        "3" | "preview" => {
            println!("📋 Resolving payload preview...");
            let sources = load_source_files_from_json(&app_config.raw_json_config)
                .context("Failed to load mapping sources from JSON")?;
            app_config.operation = Some(OperationConfig::Preview(sources));
            sync::run_preview_flow(&app_config)
                .context("Preview failed")?;
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (sync), '2' (domain), or '3' (preview).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Sync person to Pipedrive (or type 'sync')");
    println!("2. Look up company domain (or type 'domain')");
    println!("3. Preview mapped payload (or type 'preview')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
