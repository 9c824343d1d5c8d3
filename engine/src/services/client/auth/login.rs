use serde_json::json;
use tracing::{info, instrument};

use crate::services::client::api::{read_json, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::session::credentials_from_response;
use crate::services::client::types::{ClientSessionCredentials, SessionResponse};
use crate::services::client::PdsClient;

/// `com.atproto.server.createSession`
#[instrument(skip(client, password), err)]
pub async fn login_impl(
    client: &PdsClient,
    server: &str,
    identifier: &str,
    password: &str,
) -> ClientResult<ClientSessionCredentials> {
    info!("Creating session at {} for {}", server, identifier);

    let response = client
        .http_client
        .post(xrpc_url(server, "com.atproto.server.createSession"))
        .json(&json!({
            "identifier": identifier,
            "password": password,
        }))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("createSession", e))?;

    let session: SessionResponse = read_json("createSession", response)
        .await
        .map_err(|e| match e {
            ClientError::PdsOperationFailed {
                status: 401,
                message,
                ..
            } => ClientError::AuthenticationFailed { message },
            other => other,
        })?;

    info!("Session created for {}", session.did);
    Ok(credentials_from_response(server, session))
}

/// `com.atproto.server.refreshSession`, authenticated with the refresh token
#[instrument(skip(client), err)]
pub async fn refresh_session_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<ClientSessionCredentials> {
    info!("Refreshing session for {} at {}", session.did, session.pds);

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.server.refreshSession"))
        .header("Authorization", format!("Bearer {}", session.refresh_jwt))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("refreshSession", e))?;

    let refreshed: SessionResponse = read_json("refreshSession", response).await?;
    Ok(credentials_from_response(&session.pds, refreshed))
}
