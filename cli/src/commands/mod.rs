pub mod migrate;
pub mod resolve;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use engine::migration::FileSessionStore;
use engine::services::client::{ClientSessionCredentials, PdsClient, PdsTransport};
use engine::services::config::MigrationConfig;

pub fn load_config() -> Result<MigrationConfig> {
    let config = MigrationConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

pub fn client(config: &MigrationConfig) -> Result<Arc<PdsClient>> {
    Ok(Arc::new(
        PdsClient::new(&config.network).context("Failed to create HTTP client")?,
    ))
}

pub fn store(state_dir: &Path) -> Arc<FileSessionStore> {
    Arc::new(FileSessionStore::new(state_dir))
}

/// Finds the account's current PDS from its handle or DID and logs in there
pub async fn login_source(
    transport: &dyn PdsTransport,
    identifier: &str,
    password: &str,
) -> Result<ClientSessionCredentials> {
    let identifier = identifier.trim().trim_start_matches('@');
    let did = if identifier.starts_with("did:") {
        identifier.to_string()
    } else {
        transport
            .resolve_handle(identifier)
            .await
            .with_context(|| format!("Could not resolve handle {}", identifier))?
    };

    let document = transport
        .resolve_did_document(&did)
        .await
        .with_context(|| format!("Could not resolve {}", did))?;
    let pds = document
        .pds_endpoint()
        .ok_or_else(|| anyhow!("{} does not name a PDS", did))?;

    let session = transport
        .login(pds, &did, password)
        .await
        .with_context(|| format!("Login to {} failed", pds))?;
    println!("Logged in to {} as {}", session.pds, session.handle);
    Ok(session)
}
