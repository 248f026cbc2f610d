// pdsync/src/config/mod.rs
use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crm::{ApiVersion, LookupField};
use crate::errors::SyncError;
use crate::mapping::FieldMapping;

pub const API_KEY_VAR: &str = "PIPEDRIVE_API_KEY";
pub const COMPANY_DOMAIN_VAR: &str = "PIPEDRIVE_COMPANY_DOMAIN";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonPipedriveOptions {
    pub api_version: Option<ApiVersion>,
    pub lookup_field: Option<LookupField>,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub mappings_file: Option<PathBuf>,
    pub input_file: Option<PathBuf>,
    pub pipedrive: Option<JsonPipedriveOptions>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFiles {
    pub mappings_file: PathBuf,
    pub input_file: PathBuf,
}

/// Everything the Pipedrive adapters need. Built once at startup.
#[derive(Clone)]
pub struct PipedriveConfig {
    pub api_key: String,
    pub company_domain: Option<String>,
    /// Replaces `https://{company_domain}.pipedrive.com` when set.
    pub base_url: Option<String>,
    pub api_version: ApiVersion,
    pub lookup_field: LookupField,
    pub request_timeout_secs: u64,
}

impl PipedriveConfig {
    /// Scheme and host the persons endpoints live under.
    pub fn api_host(&self) -> crate::errors::Result<String> {
        match (&self.base_url, &self.company_domain) {
            (Some(base_url), _) => Ok(base_url.trim_end_matches('/').to_string()),
            (None, Some(domain)) => Ok(format!("https://{}.pipedrive.com", domain)),
            (None, None) => Err(SyncError::Config(format!(
                "{} must be set when no base_url is configured",
                COMPANY_DOMAIN_VAR
            ))),
        }
    }
}

impl fmt::Debug for PipedriveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipedriveConfig")
            .field("api_key", &"<redacted>")
            .field("company_domain", &self.company_domain)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("lookup_field", &self.lookup_field)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sources: SourceFiles,
    pub pipedrive: PipedriveConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub operation: Option<OperationConfig>,
    pub raw_json_config: RawJsonConfig,
}

#[derive(Debug, Clone)]
pub enum OperationConfig {
    Sync(SyncConfig),
    Preview(SourceFiles),
    Domain(PipedriveConfig),
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Ok(AppConfig {
            operation: None, // Filled by main after parsing CLI args
            raw_json_config,
        })
    }
}

pub fn load_source_files_from_json(raw_config: &RawJsonConfig) -> Result<SourceFiles> {
    let mappings_file = raw_config
        .mappings_file
        .as_ref()
        .context("mappings_file must be set in config.json")?
        .clone();
    let input_file = raw_config
        .input_file
        .as_ref()
        .context("input_file must be set in config.json")?
        .clone();

    if mappings_file.as_os_str().is_empty() || input_file.as_os_str().is_empty() {
        return Err(anyhow::anyhow!(
            "mappings_file and input_file cannot be empty in config.json."
        ));
    }

    Ok(SourceFiles {
        mappings_file,
        input_file,
    })
}

/// Combines the `pipedrive` section of config.json with credentials from the
/// environment. `require_domain` is false for calls that go to the public API
/// host instead of the company's own.
pub fn load_pipedrive_config(
    raw_config: &RawJsonConfig,
    require_domain: bool,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<PipedriveConfig> {
    let options = raw_config.pipedrive.clone().unwrap_or_default();
    let non_empty = |name: &str| env_lookup(name).filter(|v| !v.trim().is_empty());

    let api_key = non_empty(API_KEY_VAR)
        .with_context(|| format!("Missing env var: please set {} (or add it to .env)", API_KEY_VAR))?;
    let company_domain = non_empty(COMPANY_DOMAIN_VAR);
    let base_url = options.base_url.filter(|s| !s.trim().is_empty());

    if require_domain && company_domain.is_none() && base_url.is_none() {
        return Err(anyhow::anyhow!(
            "Missing env var: please set {} (or configure pipedrive.base_url in config.json)",
            COMPANY_DOMAIN_VAR
        ));
    }

    let request_timeout_secs = match options.request_timeout_secs {
        Some(0) => {
            anyhow::bail!("pipedrive.request_timeout_secs must be greater than 0 in config.json")
        }
        Some(secs) => secs,
        None => DEFAULT_REQUEST_TIMEOUT_SECS,
    };

    Ok(PipedriveConfig {
        api_key,
        company_domain,
        base_url,
        api_version: options.api_version.unwrap_or_default(),
        lookup_field: options.lookup_field.unwrap_or_default(),
        request_timeout_secs,
    })
}

pub fn load_sync_config_from_json(
    raw_config: &RawJsonConfig,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<SyncConfig> {
    Ok(SyncConfig {
        sources: load_source_files_from_json(raw_config)?,
        pipedrive: load_pipedrive_config(raw_config, true, env_lookup)?,
    })
}

/// Environment lookup used outside tests.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads the mapping table: a JSON array of `{ pipedriveKey, inputKey }`.
pub fn load_mappings(path: &Path) -> Result<Vec<FieldMapping>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read mappings file at {}", path.display()))?;
    let mappings: Vec<FieldMapping> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse mappings from {}", path.display()))?;
    if mappings.is_empty() {
        warn!("⚠️ Mappings file {} is empty.", path.display());
    }
    Ok(mappings)
}

pub fn load_input_document(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file at {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON from input file at {}", path.display()))
}
