// pdsync/src/crm/mod.rs
pub(crate) mod pipedrive;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{AppConfig, OperationConfig, PipedriveConfig};
use crate::errors::Result;
use crate::mapping::Payload;

pub use pipedrive::{PipedriveV1Client, PipedriveV2Client, fetch_company_domain};

/// A person as returned by the CRM. Only `id` is interpreted; the rest is kept
/// for display.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteRecord {
    pub id: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

/// Which payload field identifies an existing person. Pinned per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupField {
    #[default]
    Name,
    Email,
}

impl LookupField {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupField::Name => "name",
            LookupField::Email => "email",
        }
    }
}

/// Pipedrive REST API generation. Decides endpoint prefix, update verb and
/// the spelling of multi-value keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    #[default]
    V1,
    V2,
}

impl ApiVersion {
    pub fn path_segment(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }

    /// v1 replaces the person with `PUT`; v2 patches the given fields.
    pub fn update_method(&self) -> reqwest::Method {
        match self {
            ApiVersion::V1 => reqwest::Method::PUT,
            ApiVersion::V2 => reqwest::Method::PATCH,
        }
    }
}

/// Person operations the upsert needs from a CRM.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// First person matching `term`, or `None` when nothing matches.
    async fn search(&self, term: &str, field: LookupField) -> Result<Option<RemoteRecord>>;

    async fn create(&self, payload: &Payload) -> Result<RemoteRecord>;

    async fn update(&self, id: u64, payload: &Payload) -> Result<RemoteRecord>;
}

/// Builds the adapter for the configured API version.
pub fn build_client(config: &PipedriveConfig) -> Result<Box<dyn CrmClient>> {
    let client: Box<dyn CrmClient> = match config.api_version {
        ApiVersion::V1 => Box::new(PipedriveV1Client::new(config)?),
        ApiVersion::V2 => Box::new(PipedriveV2Client::new(config)?),
    };
    Ok(client)
}

/// Public entry point for the company domain lookup.
pub async fn run_domain_flow(app_config: &AppConfig) -> AnyResult<()> {
    let pipedrive_config = match &app_config.operation {
        Some(OperationConfig::Domain(cfg)) => cfg,
        _ => anyhow::bail!("Domain lookup selected but no Pipedrive configuration found."),
    };

    match fetch_company_domain(pipedrive_config)
        .await
        .context("Failed to fetch current user from Pipedrive")?
    {
        Some(domain) => {
            info!("✓ Company domain resolved");
            println!("The domain is: {}", domain);
        }
        None => println!("The domain was not found."),
    }
    Ok(())
}
