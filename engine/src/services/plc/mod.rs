//! Self-signed PLC operations: canonical encoding, rotation keys and
//! operation construction.

pub mod keys;
pub mod operation;

use thiserror::Error;

pub use keys::RotationKey;
pub use operation::{encode_dag_cbor, operation_cid, UnsignedPlcOperation};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlcError {
    #[error("Invalid rotation key: {0}")]
    InvalidKey(String),

    #[error("Cannot encode as DAG-CBOR: {0}")]
    Encoding(String),

    #[error("Malformed PLC operation: {0}")]
    MalformedOperation(String),
}
