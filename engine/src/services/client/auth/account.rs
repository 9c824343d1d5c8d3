use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::services::client::api::{bearer, ensure_success, read_json, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::session::credentials_from_response;
use crate::services::client::types::{
    ClientSessionCredentials, CreateAccountRequest, RepoStatusInfo, SessionResponse,
};
use crate::services::client::PdsClient;

#[derive(Deserialize)]
struct ServiceAuthResponse {
    token: String,
}

/// `com.atproto.server.getServiceAuth` on the session's server
#[instrument(skip(client), err)]
pub async fn get_service_auth_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    audience: &str,
    lexicon_method: Option<&str>,
    expires_at: Option<i64>,
) -> ClientResult<String> {
    info!("Requesting service auth for audience {}", audience);

    let mut query: Vec<(&str, String)> = vec![("aud", audience.to_string())];
    if let Some(lxm) = lexicon_method {
        query.push(("lxm", lxm.to_string()));
    }
    if let Some(exp) = expires_at {
        query.push(("exp", exp.to_string()));
    }

    let response = client
        .http_client
        .get(xrpc_url(&session.pds, "com.atproto.server.getServiceAuth"))
        .header("Authorization", bearer(session))
        .query(&query)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("getServiceAuth", e))?;

    let auth: ServiceAuthResponse = read_json("getServiceAuth", response).await?;
    Ok(auth.token)
}

/// `com.atproto.server.createAccount` for an existing DID, authorized by a
/// service auth token minted by the source server
#[instrument(skip(client), err)]
pub async fn create_account_impl(
    client: &PdsClient,
    server: &str,
    request: &CreateAccountRequest,
) -> ClientResult<ClientSessionCredentials> {
    info!("Creating account {} on {}", request.did, server);

    let response = client
        .http_client
        .post(xrpc_url(server, "com.atproto.server.createAccount"))
        .header("Authorization", format!("Bearer {}", request.service_auth_token))
        .json(request)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("createAccount", e))?;

    let session: SessionResponse = read_json("createAccount", response).await?;
    info!("Account created on {} with handle {}", server, session.handle);
    Ok(credentials_from_response(server, session))
}

/// `com.atproto.sync.getRepoStatus`; a missing repository is `Ok(None)`
#[instrument(skip(client), err)]
pub async fn get_repo_status_impl(
    client: &PdsClient,
    server: &str,
    did: &str,
) -> ClientResult<Option<RepoStatusInfo>> {
    let response = client
        .http_client
        .get(xrpc_url(server, "com.atproto.sync.getRepoStatus"))
        .query(&[("did", did)])
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("getRepoStatus", e))?;

    match read_json::<RepoStatusInfo>("getRepoStatus", response).await {
        Ok(info) => Ok(Some(info)),
        Err(e) if e.error_code() == Some("RepoNotFound") => Ok(None),
        Err(e) => Err(e),
    }
}

#[instrument(skip(client), err)]
pub async fn activate_account_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<()> {
    info!("Activating {} on {}", session.did, session.pds);

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.server.activateAccount"))
        .header("Authorization", bearer(session))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("activateAccount", e))?;

    ensure_success("activateAccount", response).await?;
    Ok(())
}

#[instrument(skip(client), err)]
pub async fn deactivate_account_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    delete_after: Option<DateTime<Utc>>,
) -> ClientResult<()> {
    info!("Deactivating {} on {}", session.did, session.pds);

    let body = match delete_after {
        Some(at) => json!({ "deleteAfter": at.to_rfc3339_opts(SecondsFormat::Millis, true) }),
        None => json!({}),
    };

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.server.deactivateAccount"))
        .header("Authorization", bearer(session))
        .json(&body)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("deactivateAccount", e))?;

    ensure_success("deactivateAccount", response).await?;
    Ok(())
}

/// Asks the server to email a deletion confirmation token
#[instrument(skip(client), err)]
pub async fn request_account_delete_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<()> {
    warn!("Requesting deletion of {} on {}", session.did, session.pds);

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.server.requestAccountDelete"))
        .header("Authorization", bearer(session))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("requestAccountDelete", e))?;

    ensure_success("requestAccountDelete", response).await?;
    Ok(())
}

#[instrument(skip(client, password, token), err)]
pub async fn delete_account_impl(
    client: &PdsClient,
    server: &str,
    did: &str,
    password: &str,
    token: &str,
) -> ClientResult<()> {
    warn!("Deleting {} on {}", did, server);

    let response = client
        .http_client
        .post(xrpc_url(server, "com.atproto.server.deleteAccount"))
        .json(&json!({
            "did": did,
            "password": password,
            "token": token,
        }))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("deleteAccount", e))?;

    ensure_success("deleteAccount", response).await?;
    Ok(())
}
