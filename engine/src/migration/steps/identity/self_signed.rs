//! `did:plc` update signed locally with one of the identity's rotation keys.

use serde_json::Value;
use tracing::{info, instrument};

use crate::services::client::transport::PdsTransport;
use crate::services::client::types::ClientSessionCredentials;
use crate::services::errors::{MigrationError, MigrationResult};
use crate::services::plc::operation::authorized_rotation_keys;
use crate::services::plc::{operation_cid, RotationKey, UnsignedPlcOperation};

/// Builds, signs and submits an operation chained onto the last one in the
/// directory. Returns the submitted operation.
#[instrument(skip(transport, target, rotation_key), err)]
pub async fn submit(
    transport: &dyn PdsTransport,
    did: &str,
    target: &ClientSessionCredentials,
    rotation_key: &RotationKey,
) -> MigrationResult<Value> {
    let last = transport.get_last_plc_operation(did).await?;

    let own_key = rotation_key.did_key();
    if !authorized_rotation_keys(&last)?.contains(&own_key) {
        return Err(MigrationError::validation(
            "rotation_key",
            format!("{} is not a rotation key of {}", own_key, did),
        ));
    }

    let credentials = transport.get_recommended_did_credentials(target).await?;
    let prev = operation_cid(&last)?;
    let operation =
        UnsignedPlcOperation::repoint(rotation_key, &credentials, &target.pds, prev)?
            .sign(rotation_key)?;

    transport.submit_plc_operation(target, &operation).await?;
    info!("[Migration] Self-signed PLC operation submitted for {}", did);
    Ok(operation)
}
