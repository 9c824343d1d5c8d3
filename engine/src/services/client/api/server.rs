//! Server discovery: health probe and `describeServer`.

use serde_json::Value;
use tracing::{info, instrument};

use super::{read_json, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::ServerDescription;
use crate::services::client::PdsClient;

#[instrument(skip(client), err)]
pub async fn check_health_impl(client: &PdsClient, server: &str) -> ClientResult<Value> {
    info!("Checking health of {}", server);

    let response = client
        .http_client
        .get(xrpc_url(server, "_health"))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("_health", e))?;

    read_json("_health", response).await
}

#[instrument(skip(client), err)]
pub async fn describe_server_impl(
    client: &PdsClient,
    server: &str,
) -> ClientResult<ServerDescription> {
    let response = client
        .http_client
        .get(xrpc_url(server, "com.atproto.server.describeServer"))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("describeServer", e))?;

    let description: ServerDescription = read_json("describeServer", response).await?;
    info!(
        "{} is {} with {} handle domains",
        server,
        description.did,
        description.available_user_domains.len()
    );
    Ok(description)
}
