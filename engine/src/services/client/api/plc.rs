//! Identity operations: handle/DID resolution, server-mediated PLC
//! operations and direct PLC directory reads.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{bearer, ensure_success, read_json, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::{ClientSessionCredentials, DidDocument, IdentityCredentials};
use crate::services::client::PdsClient;

#[derive(Deserialize)]
struct SignedOperationResponse {
    operation: Value,
}

/// Resolves a handle over HTTPS (`/.well-known/atproto-did`)
#[instrument(skip(client), err)]
pub async fn resolve_handle_impl(client: &PdsClient, handle: &str) -> ClientResult<String> {
    let handle = handle.trim().trim_start_matches('@').to_lowercase();
    let url = format!("https://{}/.well-known/atproto-did", handle);

    let response = client
        .http_client
        .get(&url)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("resolveHandle", e))?;

    let body = ensure_success("resolveHandle", response)
        .await?
        .text()
        .await
        .map_err(|e| ClientError::from_reqwest("resolveHandle", e))?;

    let did = body.trim();
    if !did.starts_with("did:") {
        return Err(ClientError::InvalidResponse {
            expected: "a DID".to_string(),
            got: did.chars().take(64).collect(),
        });
    }

    info!("Resolved {} to {}", handle, did);
    Ok(did.to_string())
}

/// Where a DID's document lives: the PLC directory for `did:plc`, the
/// well-known path of the host for `did:web`.
pub fn did_document_url(plc_directory: &str, did: &str) -> ClientResult<String> {
    if did.starts_with("did:plc:") {
        Ok(format!("{}/{}", plc_directory.trim_end_matches('/'), did))
    } else if let Some(host) = did.strip_prefix("did:web:") {
        let host = host.replace("%3A", ":").replace("%3a", ":");
        Ok(format!("https://{}/.well-known/did.json", host))
    } else {
        Err(ClientError::InvalidResponse {
            expected: "did:plc or did:web".to_string(),
            got: did.to_string(),
        })
    }
}

#[instrument(skip(client), err)]
pub async fn resolve_did_document_impl(client: &PdsClient, did: &str) -> ClientResult<DidDocument> {
    let url = did_document_url(&client.plc_directory, did)?;

    let response = client
        .http_client
        .get(&url)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("resolveDid", e))?;

    read_json("resolveDid", response).await
}

#[instrument(skip(client), err)]
pub async fn get_plc_recommendation_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<IdentityCredentials> {
    info!("Getting recommended DID credentials for DID: {}", session.did);

    let response = client
        .http_client
        .get(xrpc_url(
            &session.pds,
            "com.atproto.identity.getRecommendedDidCredentials",
        ))
        .header("Authorization", bearer(session))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("getRecommendedDidCredentials", e))?;

    read_json("getRecommendedDidCredentials", response).await
}

/// Makes the source server email a PLC signature token to the account owner
#[instrument(skip(client), err)]
pub async fn request_plc_token_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<()> {
    info!("Requesting PLC operation signature token for DID: {}", session.did);

    let response = client
        .http_client
        .post(xrpc_url(
            &session.pds,
            "com.atproto.identity.requestPlcOperationSignature",
        ))
        .header("Authorization", bearer(session))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("requestPlcOperationSignature", e))?;

    ensure_success("requestPlcOperationSignature", response).await?;
    Ok(())
}

#[instrument(skip(client, token), err)]
pub async fn sign_plc_operation_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    token: &str,
    credentials: &IdentityCredentials,
) -> ClientResult<Value> {
    info!("Signing PLC operation for DID: {}", session.did);

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.identity.signPlcOperation"))
        .header("Authorization", bearer(session))
        .json(&json!({
            "token": token,
            "rotationKeys": credentials.rotation_keys,
            "alsoKnownAs": credentials.also_known_as,
            "verificationMethods": credentials.verification_methods,
            "services": credentials.services,
        }))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("signPlcOperation", e))?;

    let signed: SignedOperationResponse = read_json("signPlcOperation", response).await?;
    Ok(signed.operation)
}

/// Submits a signed operation through the session's server, which relays it
/// to the PLC directory
#[instrument(skip(client, operation), err)]
pub async fn submit_plc_operation_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    operation: &Value,
) -> ClientResult<()> {
    info!("Submitting PLC operation for DID: {}", session.did);

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.identity.submitPlcOperation"))
        .header("Authorization", bearer(session))
        .json(&json!({ "operation": operation }))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("submitPlcOperation", e))?;

    ensure_success("submitPlcOperation", response).await?;
    info!("PLC operation submitted");
    Ok(())
}

/// Most recent operation in the DID's PLC log
#[instrument(skip(client), err)]
pub async fn get_last_plc_operation_impl(client: &PdsClient, did: &str) -> ClientResult<Value> {
    let url = format!(
        "{}/{}/log/last",
        client.plc_directory.trim_end_matches('/'),
        did
    );

    let response = client
        .http_client
        .get(&url)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("plcLogLast", e))?;

    read_json("plcLogLast", response).await
}
