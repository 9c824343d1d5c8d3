//! `did:web` identities: the owner hosts the document, so we hand them the
//! document to publish and check the live copy afterwards.

use tracing::{info, instrument};

use super::same_endpoint;
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::{
    ClientSessionCredentials, DidDocument, DidService, IdentityCredentials, VerificationMethod,
};
use crate::services::errors::{MigrationError, MigrationResult};
use crate::services::plc::operation::PDS_SERVICE_TYPE;

/// Builds the document `did` should publish to be hosted at `target_endpoint`
pub fn build_document(
    did: &str,
    credentials: &IdentityCredentials,
    target_endpoint: &str,
) -> MigrationResult<DidDocument> {
    let signing_key = credentials.signing_key().ok_or_else(|| {
        MigrationError::fatal("target server recommended no atproto signing key")
    })?;
    let multibase = signing_key.strip_prefix("did:key:").unwrap_or(signing_key);

    Ok(DidDocument {
        id: did.to_string(),
        also_known_as: credentials.also_known_as.clone(),
        verification_method: vec![VerificationMethod {
            id: format!("{}#atproto", did),
            method_type: "Multikey".to_string(),
            controller: did.to_string(),
            public_key_multibase: Some(multibase.to_string()),
        }],
        service: vec![DidService {
            id: "#atproto_pds".to_string(),
            service_type: PDS_SERVICE_TYPE.to_string(),
            service_endpoint: target_endpoint.trim_end_matches('/').to_string(),
        }],
    })
}

/// Fetches the target's recommended credentials and turns them into the
/// document the owner should publish.
pub async fn recommended_document(
    transport: &dyn PdsTransport,
    did: &str,
    target: &ClientSessionCredentials,
) -> MigrationResult<DidDocument> {
    let credentials = transport.get_recommended_did_credentials(target).await?;
    build_document(did, &credentials, &target.pds)
}

/// Checks the published document against `expected`. A mismatch means the
/// owner has not published yet and can retry.
#[instrument(skip(transport, expected), err)]
pub async fn verify(
    transport: &dyn PdsTransport,
    did: &str,
    expected: &DidDocument,
) -> MigrationResult<()> {
    let live = transport.resolve_did_document(did).await?;

    let endpoint_matches = match (live.pds_endpoint(), expected.pds_endpoint()) {
        (Some(live), Some(expected)) => same_endpoint(live, expected),
        _ => false,
    };
    if !endpoint_matches {
        return Err(MigrationError::validation(
            "did_document",
            format!(
                "Published document points to {}, expected {}",
                live.pds_endpoint().unwrap_or("no PDS"),
                expected.pds_endpoint().unwrap_or_default()
            ),
        ));
    }

    if live.atproto_key().is_none() || live.atproto_key() != expected.atproto_key() {
        return Err(MigrationError::validation(
            "did_document",
            "Published document does not carry the new signing key",
        ));
    }

    info!("[Migration] Published document for {} verified", did);
    Ok(())
}
