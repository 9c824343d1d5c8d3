//! XRPC operations grouped by lexicon namespace.
//!
//! Every function takes the [`PdsClient`](super::PdsClient) as its first
//! parameter; the client's [`PdsTransport`](super::PdsTransport) impl is a thin
//! dispatch onto these.

pub mod blob;
pub mod plc;
pub mod preferences;
pub mod repo;
pub mod server;

use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::ClientSessionCredentials;

pub(crate) fn xrpc_url(base: &str, nsid: &str) -> String {
    format!("{}/xrpc/{}", base.trim_end_matches('/'), nsid)
}

pub(crate) fn bearer(session: &ClientSessionCredentials) -> String {
    format!("Bearer {}", session.access_jwt)
}

/// Passes successful responses through; turns anything else into a
/// [`ClientError`] carrying the server's own error code and message.
pub(crate) async fn ensure_success(operation: &str, response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("{} failed with {}: {}", operation, status, body);
    Err(ClientError::from_response(operation, status.as_u16(), &body))
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    operation: &str,
    response: Response,
) -> ClientResult<T> {
    let response = ensure_success(operation, response).await?;
    let body = response
        .bytes()
        .await
        .map_err(|e| ClientError::from_reqwest(operation, e))?;

    serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse {
        expected: format!("{} response", operation),
        got: e.to_string(),
    })
}
