//! Blob discovery and transfer (`listMissingBlobs`, `getBlob`, `uploadBlob`).

use cid::Cid;
use reqwest::header;
use tracing::{info, instrument, warn};

use super::{bearer, ensure_success, read_json, xrpc_url};
use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::{
    BlobPayload, ClientSessionCredentials, MissingBlobsPage, MissingBlobsWire,
};
use crate::services::client::PdsClient;

/// One page of blobs the session's server references but does not hold.
/// Entries whose CID does not parse are dropped with a warning.
#[instrument(skip(client), err)]
pub async fn list_missing_blobs_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    cursor: Option<&str>,
    limit: usize,
) -> ClientResult<MissingBlobsPage> {
    let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor.to_string()));
    }

    let response = client
        .http_client
        .get(xrpc_url(&session.pds, "com.atproto.repo.listMissingBlobs"))
        .header("Authorization", bearer(session))
        .query(&query)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("listMissingBlobs", e))?;

    let wire: MissingBlobsWire = read_json("listMissingBlobs", response).await?;
    let cids = wire
        .blobs
        .into_iter()
        .filter_map(|blob| match Cid::try_from(blob.cid.as_str()) {
            Ok(_) => Some(blob.cid),
            Err(e) => {
                warn!("Skipping missing blob with invalid CID {}: {}", blob.cid, e);
                None
            }
        })
        .collect::<Vec<_>>();

    info!("listMissingBlobs returned {} blobs", cids.len());
    Ok(MissingBlobsPage {
        cids,
        cursor: wire.cursor,
    })
}

#[instrument(skip(client), err)]
pub async fn get_blob_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    did: &str,
    cid: &str,
) -> ClientResult<BlobPayload> {
    let response = client
        .http_client
        .get(xrpc_url(&session.pds, "com.atproto.sync.getBlob"))
        .query(&[("did", did), ("cid", cid)])
        .header("Authorization", bearer(session))
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("getBlob", e))?;

    let response = ensure_success("getBlob", response).await?;
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let data = response
        .bytes()
        .await
        .map_err(|e| ClientError::from_reqwest("getBlob", e))?;

    Ok(BlobPayload { data, content_type })
}

#[instrument(skip(client, blob), fields(size = blob.data.len()), err)]
pub async fn upload_blob_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
    blob: BlobPayload,
) -> ClientResult<()> {
    let content_type = blob
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let response = client
        .http_client
        .post(xrpc_url(&session.pds, "com.atproto.repo.uploadBlob"))
        .header("Authorization", bearer(session))
        .header(header::CONTENT_TYPE, content_type)
        .body(blob.data)
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest("uploadBlob", e))?;

    ensure_success("uploadBlob", response).await?;
    Ok(())
}
