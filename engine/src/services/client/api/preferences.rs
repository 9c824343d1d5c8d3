//! Account preferences (`app.bsky.actor.getPreferences` / `putPreferences`).

use serde_json::Value;
use tracing::{info, instrument};

use super::{bearer, ensure_success, read_json, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::ClientSessionCredentials;
use crate::services::client::PdsClient;

#[instrument(skip(client), err)]
pub async fn export_preferences_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<Value> {
    info!("Exporting preferences for DID: {}", session.did);

    let response = client
        .http_client
        .get(xrpc_url(&session.pds, "app.bsky.actor.getPreferences"))
        .header("Authorization", bearer(session))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("getPreferences", e))?;

    read_json("getPreferences", response).await
}

#[instrument(skip(client, preferences), err)]
pub async fn import_preferences_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    preferences: &Value,
) -> ClientResult<()> {
    info!("Importing preferences for DID: {}", session.did);

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "app.bsky.actor.putPreferences"))
        .header("Authorization", bearer(session))
        .json(preferences)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("putPreferences", e))?;

    ensure_success("putPreferences", response).await?;
    Ok(())
}
