use std::collections::BTreeMap;

use base64::Engine;
use cid::multihash::Multihash;
use cid::Cid;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::keys::RotationKey;
use super::PlcError;
use crate::services::client::types::{IdentityCredentials, ServiceEndpoint};

pub const PLC_OPERATION_TYPE: &str = "plc_operation";
pub const PLC_TOMBSTONE_TYPE: &str = "plc_tombstone";
pub const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

const DAG_CBOR_CODEC: u64 = 0x71;
const SHA2_256_CODE: u64 = 0x12;

/// A `plc_operation` before its signature is attached
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedPlcOperation {
    #[serde(rename = "type")]
    pub operation_type: String,
    pub rotation_keys: Vec<String>,
    pub verification_methods: BTreeMap<String, String>,
    pub also_known_as: Vec<String>,
    pub services: BTreeMap<String, ServiceEndpoint>,
    pub prev: Option<String>,
}

impl UnsignedPlcOperation {
    /// Operation that moves the identity to `target_endpoint`, keeping the
    /// caller's own key first in the rotation list.
    pub fn repoint(
        rotation_key: &RotationKey,
        credentials: &IdentityCredentials,
        target_endpoint: &str,
        prev: String,
    ) -> Result<Self, PlcError> {
        let signing_key = credentials.signing_key().ok_or_else(|| {
            PlcError::MalformedOperation("no atproto verification method recommended".to_string())
        })?;

        let own_key = rotation_key.did_key();
        let mut rotation_keys = vec![own_key.clone()];
        rotation_keys.extend(
            credentials
                .rotation_keys
                .iter()
                .filter(|key| **key != own_key)
                .cloned(),
        );

        let mut verification_methods = BTreeMap::new();
        verification_methods.insert("atproto".to_string(), signing_key.to_string());

        let mut services = BTreeMap::new();
        services.insert(
            "atproto_pds".to_string(),
            ServiceEndpoint {
                service_type: PDS_SERVICE_TYPE.to_string(),
                endpoint: target_endpoint.trim_end_matches('/').to_string(),
            },
        );

        Ok(Self {
            operation_type: PLC_OPERATION_TYPE.to_string(),
            rotation_keys,
            verification_methods,
            also_known_as: credentials.also_known_as.clone(),
            services,
            prev: Some(prev),
        })
    }

    pub fn to_value(&self) -> Result<Value, PlcError> {
        serde_json::to_value(self).map_err(|e| PlcError::Encoding(e.to_string()))
    }

    /// Signs the DAG-CBOR encoding and returns the operation with `sig` set
    pub fn sign(&self, key: &RotationKey) -> Result<Value, PlcError> {
        let mut operation = self.to_value()?;
        let signature = key.sign(&encode_dag_cbor(&operation)?)?;

        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature);
        match operation.as_object_mut() {
            Some(fields) => {
                fields.insert("sig".to_string(), Value::String(encoded));
            }
            None => {
                return Err(PlcError::Encoding(
                    "operation did not serialize to an object".to_string(),
                ))
            }
        }
        Ok(operation)
    }
}

/// Canonical DAG-CBOR bytes: map keys ordered by length, then bytewise
pub fn encode_dag_cbor(value: &Value) -> Result<Vec<u8>, PlcError> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| PlcError::Encoding(e.to_string()))
}

/// CIDv1 (dag-cbor, sha2-256) of a signed operation, as used in `prev`
pub fn operation_cid(operation: &Value) -> Result<String, PlcError> {
    let bytes = encode_dag_cbor(operation)?;
    let digest = Sha256::digest(&bytes);
    let hash = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
        .map_err(|e| PlcError::Encoding(e.to_string()))?;
    Ok(Cid::new_v1(DAG_CBOR_CODEC, hash).to_string())
}

/// Rotation keys that may sign the next operation after `previous`
pub fn authorized_rotation_keys(previous: &Value) -> Result<Vec<String>, PlcError> {
    let operation_type = previous
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if operation_type == PLC_TOMBSTONE_TYPE {
        return Err(PlcError::MalformedOperation(
            "identity has been tombstoned".to_string(),
        ));
    }

    // Legacy `create` operations carry a single recovery/signing key pair
    let keys = match previous.get("rotationKeys").and_then(Value::as_array) {
        Some(keys) => keys
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => ["recoveryKey", "signingKey"]
            .iter()
            .filter_map(|field| previous.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .collect::<Vec<_>>(),
    };

    if keys.is_empty() {
        return Err(PlcError::MalformedOperation(
            "previous operation lists no rotation keys".to_string(),
        ));
    }
    Ok(keys)
}
