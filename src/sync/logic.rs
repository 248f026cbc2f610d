// pdsync/src/sync/logic.rs
use anyhow::{Context, Result as AnyResult};
use log::info;

use crate::config::{SourceFiles, SyncConfig, load_input_document, load_mappings};
use crate::crm::{CrmClient, LookupField, RemoteRecord, build_client};
use crate::errors::{Result, SyncError};
use crate::mapping::{Payload, REQUIRED_KEY, resolve};

/// Result of an upsert, tagged with the branch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(RemoteRecord),
    Updated(RemoteRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &RemoteRecord {
        match self {
            UpsertOutcome::Created(record) | UpsertOutcome::Updated(record) => record,
        }
    }

    pub fn into_record(self) -> RemoteRecord {
        match self {
            UpsertOutcome::Created(record) | UpsertOutcome::Updated(record) => record,
        }
    }
}

/// Search term and the field it should be matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub term: String,
    pub field: LookupField,
}

/// Picks the search term for the configured lookup field.
///
/// `Email` uses the payload's primary email and falls back to `name` when the
/// payload carries none. `Name` always uses `name`.
pub fn lookup_term(payload: &Payload, preferred: LookupField) -> Result<Lookup> {
    if preferred == LookupField::Email {
        if let Some(email) = payload.primary_email() {
            return Ok(Lookup {
                term: email.to_string(),
                field: LookupField::Email,
            });
        }
    }

    let name = payload
        .name()
        .ok_or_else(|| SyncError::MissingRequiredField(REQUIRED_KEY.to_string()))?;
    Ok(Lookup {
        term: name,
        field: LookupField::Name,
    })
}

/// Searches for the person and updates the first match, or creates it.
///
/// Sequential reruns with the same input land on the same record. Two runs in
/// parallel can both miss and both create. Any client error aborts
/// immediately; nothing is retried or rolled back.
pub async fn upsert<C>(payload: &Payload, client: &C, preferred: LookupField) -> Result<UpsertOutcome>
where
    C: CrmClient + ?Sized,
{
    let lookup = lookup_term(payload, preferred)?;
    info!("🔍 Searching for existing person by {}...", lookup.field.as_str());

    match client.search(&lookup.term, lookup.field).await? {
        Some(existing) => {
            info!("Found existing person with id {}, updating.", existing.id);
            let updated = client.update(existing.id, payload).await?;
            info!("✅ Updated existing person {}", updated.id);
            Ok(UpsertOutcome::Updated(updated))
        }
        None => {
            info!("No existing person found, creating.");
            let created = client.create(payload).await?;
            info!("✅ Created new person {}", created.id);
            Ok(UpsertOutcome::Created(created))
        }
    }
}

/// Loads the mapping table and input document, then resolves the payload.
pub fn build_payload(sources: &SourceFiles) -> AnyResult<Payload> {
    let mappings = load_mappings(&sources.mappings_file)?;
    let input = load_input_document(&sources.input_file)?;
    info!(
        "Resolving {} mapping(s) from {}",
        mappings.len(),
        sources.input_file.display()
    );
    resolve(&mappings, &input).context("Failed to build person payload from mappings")
}

/// Runs one person sync end to end:
/// 1. Loads mappings and input document.
/// 2. Resolves the payload (fails before any network call if `name` is missing).
/// 3. Builds the adapter for the configured API version.
/// 4. Searches, then updates or creates.
pub async fn perform_sync_orchestration(sync_config: &SyncConfig) -> AnyResult<UpsertOutcome> {
    println!("⚙️ Starting person synchronization...");
    println!("Sync configuration: {:?}", sync_config);

    let payload = build_payload(&sync_config.sources)?;
    info!("✓ Payload resolved with {} field(s).", payload.len());

    let client = build_client(&sync_config.pipedrive)
        .context("Failed to build Pipedrive client")?;

    let outcome = upsert(&payload, &*client, sync_config.pipedrive.lookup_field)
        .await
        .context("Synchronization failed")?;

    Ok(outcome)
}
