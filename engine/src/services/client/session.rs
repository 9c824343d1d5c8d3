use base64::Engine;

use super::types::{ClientSessionCredentials, SessionResponse};

/// Reads claims out of access tokens. Signatures are not verified; the
/// issuing server does that.
pub struct JwtUtils;

impl JwtUtils {
    /// `exp` claim of a JWT, in seconds since the epoch
    pub fn get_expiration(jwt: &str) -> Option<u64> {
        let mut parts = jwt.split('.');
        let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
        claims.get("exp")?.as_u64()
    }

    /// Unparseable tokens count as expired.
    pub fn is_expired_at(jwt: &str, now: u64) -> bool {
        match Self::get_expiration(jwt) {
            Some(exp) => now >= exp,
            None => true,
        }
    }
}

/// Turns a createSession/refreshSession response into stored credentials
/// bound to `server`.
pub fn credentials_from_response(server: &str, response: SessionResponse) -> ClientSessionCredentials {
    let expires_at = JwtUtils::get_expiration(&response.access_jwt);
    ClientSessionCredentials {
        did: response.did,
        handle: response.handle,
        pds: server.trim_end_matches('/').to_string(),
        access_jwt: response.access_jwt,
        refresh_jwt: response.refresh_jwt,
        expires_at,
    }
}
