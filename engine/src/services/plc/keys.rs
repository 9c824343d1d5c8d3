use std::fmt;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use super::PlcError;

/// Multicodec prefix of a secp256k1 public key in `did:key` form
const SECP256K1_PUB_PREFIX: [u8; 2] = [0xe7, 0x01];
/// Multicodec prefix of a secp256k1 private key in multikey form
const SECP256K1_PRIV_PREFIX: [u8; 2] = [0x81, 0x26];

/// A secp256k1 rotation key held by the account owner.
///
/// Accepted encodings: 64 hex characters, or a base58btc multikey (`z...`)
/// with or without the private-key multicodec prefix.
#[derive(Clone)]
pub struct RotationKey {
    secret: SecretKey,
}

impl RotationKey {
    pub fn parse(input: &str) -> Result<Self, PlcError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PlcError::InvalidKey("key is empty".to_string()));
        }

        let bytes = if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(input).map_err(|e| PlcError::InvalidKey(e.to_string()))?
        } else if let Some(encoded) = input.strip_prefix('z') {
            let decoded = bs58::decode(encoded)
                .into_vec()
                .map_err(|e| PlcError::InvalidKey(format!("bad base58btc: {}", e)))?;
            match decoded.as_slice() {
                [0x81, 0x26, rest @ ..] if rest.len() == 32 => rest.to_vec(),
                raw if raw.len() == 32 => raw.to_vec(),
                other => {
                    return Err(PlcError::InvalidKey(format!(
                        "expected 32 key bytes, got {}",
                        other.len()
                    )))
                }
            }
        } else {
            return Err(PlcError::InvalidKey(
                "expected 64 hex characters or a z-prefixed multikey".to_string(),
            ));
        };

        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| PlcError::InvalidKey(format!("not a secp256k1 key: {}", e)))?;
        Ok(Self { secret })
    }

    /// Compressed SEC1 public key
    pub fn public_key_bytes(&self) -> [u8; 33] {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &self.secret).serialize()
    }

    pub fn did_key(&self) -> String {
        let mut bytes = Vec::with_capacity(35);
        bytes.extend_from_slice(&SECP256K1_PUB_PREFIX);
        bytes.extend_from_slice(&self.public_key_bytes());
        format!("did:key:z{}", bs58::encode(bytes).into_string())
    }

    /// Private multikey form, for displaying a freshly parsed hex key
    pub fn to_multikey(&self) -> String {
        let mut bytes = Vec::with_capacity(34);
        bytes.extend_from_slice(&SECP256K1_PRIV_PREFIX);
        bytes.extend_from_slice(&self.secret.secret_bytes());
        format!("z{}", bs58::encode(bytes).into_string())
    }

    /// SHA-256 then low-S ECDSA, as a 64-byte compact signature
    pub fn sign(&self, data: &[u8]) -> Result<[u8; 64], PlcError> {
        let digest = Sha256::digest(data);
        let message = Message::from_slice(&digest)
            .map_err(|e| PlcError::Encoding(format!("digest is not a message: {}", e)))?;

        let secp = Secp256k1::new();
        let mut signature = secp.sign_ecdsa(&message, &self.secret);
        signature.normalize_s();
        Ok(signature.serialize_compact())
    }
}

impl fmt::Debug for RotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationKey")
            .field("did_key", &self.did_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::ecdsa::Signature;

    const KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn hex_key_yields_secp256k1_did_key() {
        let key = RotationKey::parse(KEY_ONE).unwrap();
        let did_key = key.did_key();
        assert!(did_key.starts_with("did:key:zQ3s"), "{}", did_key);
        assert_eq!(
            hex::encode(key.public_key_bytes()),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn multikey_forms_are_equivalent() {
        let key = RotationKey::parse(KEY_ONE).unwrap();
        let prefixed = key.to_multikey();

        let mut raw = vec![0u8; 31];
        raw.push(1);
        let bare = format!("z{}", bs58::encode(raw).into_string());

        assert_eq!(RotationKey::parse(&prefixed).unwrap().did_key(), key.did_key());
        assert_eq!(RotationKey::parse(&bare).unwrap().did_key(), key.did_key());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(RotationKey::parse("").is_err());
        assert!(RotationKey::parse("not-a-key").is_err());
        assert!(RotationKey::parse("zzzz").is_err());
        // zero is outside the curve order
        assert!(RotationKey::parse(&"0".repeat(64)).is_err());
        assert!(RotationKey::parse(&"ab".repeat(31)).is_err());
    }

    #[test]
    fn signature_verifies_against_public_key() {
        let key = RotationKey::parse(KEY_ONE).unwrap();
        let data = b"plc operation bytes";
        let compact = key.sign(data).unwrap();

        let secp = Secp256k1::new();
        let public = PublicKey::from_slice(&key.public_key_bytes()).unwrap();
        let message = Message::from_slice(&Sha256::digest(data)).unwrap();
        let signature = Signature::from_compact(&compact).unwrap();
        assert!(secp.verify_ecdsa(&message, &signature, &public).is_ok());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let key = RotationKey::parse(KEY_ONE).unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(KEY_ONE));
        assert!(rendered.contains("did:key:"));
    }
}
