//! Repository export/import (`com.atproto.sync.getRepo`, `com.atproto.repo.importRepo`).

use bytes::Bytes;
use reqwest::header;
use tracing::{debug, info, instrument};

use super::{bearer, ensure_success, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::ClientSessionCredentials;
use crate::services::client::PdsClient;

/// Export the session's repository as a CAR file
#[instrument(skip(client), err)]
pub async fn export_repository_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<Bytes> {
    info!("Exporting repository for DID: {}", session.did);

    let response = client
        .http_client
        .get(xrpc_url(&session.pds, "com.atproto.sync.getRepo"))
        .query(&[("did", session.did.as_str())])
        .header("Authorization", bearer(session))
        .header(header::ACCEPT_ENCODING, "gzip, deflate")
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("getRepo", e))?;

    let car = ensure_success("getRepo", response)
        .await?
        .bytes()
        .await
        .map_err(|e| ClientError::from_reqwest("getRepo", e))?;

    debug!("Received CAR file: {} bytes (after decompression)", car.len());
    info!("Repository exported, size: {} bytes", car.len());
    Ok(car)
}

/// Import a CAR file into the session's repository
#[instrument(skip(client, car), fields(car_size = car.len()), err)]
pub async fn import_repository_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    car: Bytes,
) -> ClientResult<()> {
    info!(
        "Importing repository for DID: {}, CAR size: {} bytes",
        session.did,
        car.len()
    );

    // Raw CAR body; the server rejects compressed uploads
    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.repo.importRepo"))
        .header("Authorization", bearer(session))
        .header(header::CONTENT_TYPE, "application/vnd.ipld.car")
        .header(header::CONTENT_LENGTH, car.len().to_string())
        .body(car)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("importRepo", e))?;

    ensure_success("importRepo", response).await?;
    info!("Repository imported successfully");
    Ok(())
}
