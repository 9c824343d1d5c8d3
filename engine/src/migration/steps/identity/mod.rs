//! Re-pointing the account's identity at the target server.
//!
//! Exactly one of three paths runs, chosen by the caller:
//! - [`IdentityUpdate::ManualDocument`] for `did:web`, where the owner
//!   publishes the new document themselves and we only verify it
//! - [`IdentityUpdate::ServerMediated`] for `did:plc`, where the source signs
//!   an operation after an emailed confirmation
//! - [`IdentityUpdate::SelfSigned`] for `did:plc`, signed locally with a
//!   rotation key the owner holds

pub mod manual;
pub mod self_signed;
pub mod server_mediated;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::migration::progress::{MigrationEvent, MigrationStep, ProgressReporter};
use crate::migration::types::IdentityMethod;
use crate::migration::validation::ConfirmationToken;
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::ClientSessionCredentials;
use crate::services::errors::{MigrationError, MigrationResult};
use crate::services::plc::RotationKey;

#[derive(Clone)]
pub enum IdentityUpdate {
    ManualDocument,
    ServerMediated { token: ConfirmationToken },
    SelfSigned { rotation_key: RotationKey },
}

impl IdentityUpdate {
    /// Validates the token shape before anything is sent
    pub fn server_mediated(token: &str) -> MigrationResult<Self> {
        Ok(IdentityUpdate::ServerMediated {
            token: ConfirmationToken::parse(token)?,
        })
    }

    /// Parses the key locally; a malformed key never reaches the network
    pub fn self_signed(rotation_key: &str) -> MigrationResult<Self> {
        Ok(IdentityUpdate::SelfSigned {
            rotation_key: RotationKey::parse(rotation_key)?,
        })
    }

    pub fn method(&self) -> IdentityMethod {
        match self {
            IdentityUpdate::ManualDocument => IdentityMethod::Web,
            IdentityUpdate::ServerMediated { .. } | IdentityUpdate::SelfSigned { .. } => {
                IdentityMethod::Plc
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IdentityUpdate::ManualDocument => "manual_document",
            IdentityUpdate::ServerMediated { .. } => "server_mediated",
            IdentityUpdate::SelfSigned { .. } => "self_signed",
        }
    }

    /// Rejects a path that does not apply to `did`
    pub fn check_applies_to(&self, did: &str) -> MigrationResult<()> {
        match IdentityMethod::for_did(did) {
            Some(method) if method == self.method() => Ok(()),
            Some(IdentityMethod::Web) => Err(MigrationError::validation(
                "identity_method",
                "did:web identities can only be updated by publishing the document manually",
            )),
            Some(IdentityMethod::Plc) => Err(MigrationError::validation(
                "identity_method",
                "did:plc identities need a confirmation token or a rotation key",
            )),
            None => Err(MigrationError::validation(
                "did",
                format!("Unsupported DID method: {}", did),
            )),
        }
    }
}

impl fmt::Debug for IdentityUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Client-side spacing between PLC token emails
#[derive(Debug, Clone)]
pub struct TokenCooldown {
    cooldown: Duration,
    last_request: Option<DateTime<Utc>>,
}

impl TokenCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_request: None,
        }
    }

    /// Time left before another request is allowed
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_request?;
        let left = last + self.cooldown - now;
        (left > Duration::zero()).then_some(left)
    }

    pub fn check(&self, now: DateTime<Utc>) -> MigrationResult<()> {
        match self.remaining(now) {
            Some(left) => Err(MigrationError::validation(
                "token",
                format!(
                    "Please wait {} seconds before requesting another code",
                    left.num_seconds().max(1)
                ),
            )),
            None => Ok(()),
        }
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_request = Some(now);
    }
}

/// Everything an identity path needs from the engine
pub struct IdentityContext<'a> {
    pub transport: &'a dyn PdsTransport,
    pub did: &'a str,
    pub source: &'a ClientSessionCredentials,
    pub target: &'a ClientSessionCredentials,
    pub reporter: &'a dyn ProgressReporter,
}

/// Whether the live document already names `target_endpoint` as the PDS.
/// Resolution failures read as "not yet".
pub async fn already_points_to(
    transport: &dyn PdsTransport,
    did: &str,
    target_endpoint: &str,
) -> bool {
    match transport.resolve_did_document(did).await {
        Ok(document) => document
            .pds_endpoint()
            .is_some_and(|endpoint| same_endpoint(endpoint, target_endpoint)),
        Err(e) => {
            warn!("[Migration] Could not resolve {} to check its PDS: {}", did, e);
            false
        }
    }
}

pub(crate) fn same_endpoint(a: &str, b: &str) -> bool {
    a.trim_end_matches('/').eq_ignore_ascii_case(b.trim_end_matches('/'))
}

/// Runs the chosen path once
pub async fn apply(update: &IdentityUpdate, ctx: &IdentityContext<'_>) -> MigrationResult<()> {
    update.check_applies_to(ctx.did)?;
    ctx.reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::IdentityUpdate,
    });
    info!("[Migration] Updating identity via {}", update.name());

    match update {
        IdentityUpdate::ManualDocument => {
            let expected = manual::recommended_document(ctx.transport, ctx.did, ctx.target).await?;
            manual::verify(ctx.transport, ctx.did, &expected).await
        }
        IdentityUpdate::ServerMediated { token } => {
            server_mediated::submit(ctx.transport, ctx.source, ctx.target, token).await
        }
        IdentityUpdate::SelfSigned { rotation_key } => {
            self_signed::submit(ctx.transport, ctx.did, ctx.target, rotation_key)
                .await
                .map(|_| ())
        }
    }
}
