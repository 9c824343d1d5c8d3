//! `did:plc` update signed by the source server after an emailed code.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use super::TokenCooldown;
use crate::migration::validation::ConfirmationToken;
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::ClientSessionCredentials;
use crate::services::errors::MigrationResult;

/// Asks the source to email a PLC confirmation code. Within the cooldown
/// this fails without contacting the server.
#[instrument(skip(transport, source, cooldown), err)]
pub async fn request_token(
    transport: &dyn PdsTransport,
    source: &ClientSessionCredentials,
    cooldown: &mut TokenCooldown,
    now: DateTime<Utc>,
) -> MigrationResult<()> {
    cooldown.check(now)?;
    transport.request_plc_operation_signature(source).await?;
    cooldown.record(now);
    info!("[Migration] PLC confirmation code requested");
    Ok(())
}

/// Has the source sign an operation built from the target's recommended
/// credentials, then submits it through the target.
#[instrument(skip_all, fields(did = %source.did), err)]
pub async fn submit(
    transport: &dyn PdsTransport,
    source: &ClientSessionCredentials,
    target: &ClientSessionCredentials,
    token: &ConfirmationToken,
) -> MigrationResult<()> {
    let credentials = transport.get_recommended_did_credentials(target).await?;
    let operation = transport
        .sign_plc_operation(source, token.as_str(), &credentials)
        .await?;
    transport.submit_plc_operation(target, &operation).await?;
    info!("[Migration] Server-signed PLC operation submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::test_support::*;
    use chrono::Duration;

    #[tokio::test]
    async fn second_request_within_cooldown_stays_local() {
        let transport = FakeTransport::new();
        let mut cooldown = TokenCooldown::new(Duration::seconds(60));
        let now = start_time();

        request_token(&transport, &session(SOURCE), &mut cooldown, now)
            .await
            .unwrap();
        assert!(request_token(
            &transport,
            &session(SOURCE),
            &mut cooldown,
            now + Duration::seconds(30)
        )
        .await
        .is_err());
        assert_eq!(transport.calls("request_plc_operation_signature"), 1);

        request_token(
            &transport,
            &session(SOURCE),
            &mut cooldown,
            now + Duration::seconds(61),
        )
        .await
        .unwrap();
        assert_eq!(transport.calls("request_plc_operation_signature"), 2);
    }

    #[tokio::test]
    async fn rejected_request_does_not_start_cooldown() {
        let transport = FakeTransport::with_state(|s| {
            s.fail.insert("request_plc_operation_signature");
        });
        let mut cooldown = TokenCooldown::new(Duration::seconds(60));
        assert!(request_token(&transport, &session(SOURCE), &mut cooldown, start_time())
            .await
            .is_err());
        assert!(cooldown.remaining(start_time()).is_none());
    }

    #[tokio::test]
    async fn signed_operation_goes_to_target() {
        let transport = FakeTransport::new();
        let token = ConfirmationToken::parse("ABCDE-12345").unwrap();
        submit(&transport, &session(SOURCE), &session(TARGET), &token)
            .await
            .unwrap();

        let state = transport.state();
        assert_eq!(state.submitted.len(), 1);
        assert_eq!(state.submitted[0]["token"], "ABCDE-12345");
        assert_eq!(
            state.submitted[0]["services"]["atproto_pds"]["endpoint"],
            TARGET
        );
        assert_eq!(
            state.did_document.as_ref().and_then(|d| d.pds_endpoint()),
            Some(TARGET)
        );
    }
}
