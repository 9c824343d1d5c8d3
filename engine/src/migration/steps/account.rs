//! Target account lifecycle: what to do with whatever the target already
//! holds for the DID, and the final activation swap.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::migration::progress::{MigrationEvent, MigrationStep, ProgressReporter};
use crate::migration::types::MigrationSession;
use crate::migration::validation::ConfirmationToken;
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::{ClientSessionCredentials, RepoStatus};
use crate::services::errors::{MigrationError, MigrationResult};

/// Outcome of inspecting the target before the data phase
#[derive(Debug, Clone)]
pub enum TargetState {
    /// Nothing usable there; create the account
    Absent,
    /// Account exists and we hold a session for it
    Ready {
        session: ClientSessionCredentials,
        active: bool,
    },
    /// A deactivated leftover could not be revived; deletion was requested
    /// and an emailed token must be confirmed before creating again
    DeletionPending,
}

/// `None` when the target has no repository for `did`
pub async fn check_status(
    transport: &dyn PdsTransport,
    target_server: &str,
    did: &str,
) -> MigrationResult<Option<RepoStatus>> {
    let info = transport.get_repo_status(target_server, did).await?;
    Ok(info.map(|info| info.effective_status()))
}

#[instrument(skip_all, fields(did = %migration.did), err)]
pub async fn prepare_target(
    transport: &dyn PdsTransport,
    migration: &MigrationSession,
    reporter: &dyn ProgressReporter,
) -> MigrationResult<TargetState> {
    reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::AccountReconcile,
    });

    let status = check_status(transport, &migration.target_server, &migration.did).await?;
    info!(
        "[Migration] Target repository status: {}",
        status.map_or("not found".to_string(), |s| s.to_string())
    );

    match status {
        None | Some(RepoStatus::Deleted) => Ok(TargetState::Absent),
        Some(RepoStatus::Active) => {
            let session = login_target(transport, migration).await?;
            Ok(TargetState::Ready {
                session,
                active: true,
            })
        }
        Some(RepoStatus::Deactivated) => revive_or_delete(transport, migration, reporter).await,
        Some(status @ (RepoStatus::Takendown | RepoStatus::Suspended)) => {
            Err(MigrationError::StateConflict {
                status: Some(status),
                message: format!(
                    "The account is {} on {} and cannot be migrated there",
                    status, migration.target_server
                ),
            })
        }
    }
}

async fn login_target(
    transport: &dyn PdsTransport,
    migration: &MigrationSession,
) -> MigrationResult<ClientSessionCredentials> {
    Ok(transport
        .login(&migration.target_server, &migration.did, migration.new_password())
        .await?)
}

async fn revive_or_delete(
    transport: &dyn PdsTransport,
    migration: &MigrationSession,
    reporter: &dyn ProgressReporter,
) -> MigrationResult<TargetState> {
    let session = login_target(transport, migration).await.map_err(|e| {
        MigrationError::fatal(format!(
            "A deactivated account for {} exists on {} and the new credentials do not open it: {}",
            migration.did, migration.target_server, e
        ))
    })?;

    match transport.activate_account(&session).await {
        Ok(()) => {
            info!("[Migration] Reactivated existing account on target");
            Ok(TargetState::Ready {
                session,
                active: false,
            })
        }
        Err(e) => {
            warn!("[Migration] Reactivation failed ({}), requesting deletion", e);
            reporter.report(&MigrationEvent::Warning {
                message: "The existing target account could not be reactivated; a deletion \
                          confirmation code has been emailed"
                    .to_string(),
            });
            transport
                .request_account_delete(&session)
                .await
                .map_err(|e| {
                    MigrationError::fatal(format!(
                        "Could not reactivate or delete the existing account on {}: {}",
                        migration.target_server, e
                    ))
                })?;
            Ok(TargetState::DeletionPending)
        }
    }
}

/// Deletes the stale target account using the emailed token
#[instrument(skip_all, fields(did = %migration.did), err)]
pub async fn confirm_deletion(
    transport: &dyn PdsTransport,
    migration: &MigrationSession,
    token: &ConfirmationToken,
) -> MigrationResult<()> {
    transport
        .delete_account(
            &migration.target_server,
            &migration.did,
            migration.new_password(),
            token.as_str(),
        )
        .await?;
    info!("[Migration] Stale target account deleted");
    Ok(())
}

/// Activates the target then deactivates the source, scheduling its deletion
/// for `delete_after`. Any failure is fatal: the identity already points at
/// the target and is not rolled back.
#[instrument(skip_all, fields(did = %source.did), err)]
pub async fn finalize(
    transport: &dyn PdsTransport,
    source: &ClientSessionCredentials,
    target: &ClientSessionCredentials,
    delete_after: DateTime<Utc>,
    reporter: &dyn ProgressReporter,
) -> MigrationResult<()> {
    reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::Finalize,
    });

    transport.activate_account(target).await.map_err(|e| {
        MigrationError::fatal(format!(
            "Identity now points to {} but activating the account there failed: {}",
            target.pds, e
        ))
    })?;
    info!("[Migration] Target account activated");

    transport
        .deactivate_account(source, Some(delete_after))
        .await
        .map_err(|e| {
            MigrationError::fatal(format!(
                "Target is live but deactivating the old account on {} failed: {}",
                source.pds, e
            ))
        })?;
    info!(
        "[Migration] Source account deactivated, deletion after {}",
        delete_after.to_rfc3339()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::progress::LoggingReporter;
    use crate::migration::test_support::*;
    use crate::services::errors::ErrorKind;

    async fn prepare(transport: &FakeTransport) -> MigrationResult<TargetState> {
        prepare_target(transport, &migration_session(), &LoggingReporter).await
    }

    #[tokio::test]
    async fn missing_or_deleted_target_is_created() {
        for status in [None, Some(RepoStatus::Deleted)] {
            let transport = FakeTransport::with_state(|s| s.repo_status = status);
            assert!(matches!(prepare(&transport).await.unwrap(), TargetState::Absent));
            assert_eq!(transport.calls("login"), 0);
        }
    }

    #[tokio::test]
    async fn active_target_logs_in() {
        let transport = FakeTransport::with_state(|s| s.repo_status = Some(RepoStatus::Active));
        match prepare(&transport).await.unwrap() {
            TargetState::Ready { session, active } => {
                assert!(active);
                assert_eq!(session.pds, TARGET);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn deactivated_target_is_reactivated() {
        let transport =
            FakeTransport::with_state(|s| s.repo_status = Some(RepoStatus::Deactivated));
        let state = prepare(&transport).await.unwrap();
        assert!(matches!(state, TargetState::Ready { active: false, .. }));
        assert_eq!(transport.state().repo_status, Some(RepoStatus::Active));
    }

    #[tokio::test]
    async fn failed_reactivation_requests_deletion() {
        let transport = FakeTransport::with_state(|s| {
            s.repo_status = Some(RepoStatus::Deactivated);
            s.fail.insert("activate_account");
        });
        assert!(matches!(
            prepare(&transport).await.unwrap(),
            TargetState::DeletionPending
        ));
        assert_eq!(transport.calls("request_account_delete"), 1);

        let token = ConfirmationToken::parse("ABCDE-12345").unwrap();
        confirm_deletion(&transport, &migration_session(), &token)
            .await
            .unwrap();
        assert_eq!(transport.state().repo_status, None);
    }

    #[tokio::test]
    async fn failed_deletion_request_is_fatal() {
        let transport = FakeTransport::with_state(|s| {
            s.repo_status = Some(RepoStatus::Deactivated);
            s.fail.insert("activate_account");
            s.fail.insert("request_account_delete");
        });
        let err = prepare(&transport).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn takendown_target_is_not_retryable() {
        for status in [RepoStatus::Takendown, RepoStatus::Suspended] {
            let transport = FakeTransport::with_state(|s| s.repo_status = Some(status));
            let err = prepare(&transport).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StateConflict);
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn finalize_activates_then_deactivates_with_grace() {
        let transport = FakeTransport::new();
        let delete_after = start_time() + chrono::Duration::days(7);
        finalize(
            &transport,
            &session(SOURCE),
            &session(TARGET),
            delete_after,
            &LoggingReporter,
        )
        .await
        .unwrap();

        assert_eq!(
            transport.call_log(),
            vec!["activate_account", "deactivate_account"]
        );
        assert_eq!(transport.state().deactivated_with, Some(Some(delete_after)));
    }

    #[tokio::test]
    async fn finalize_failure_is_fatal() {
        let transport = FakeTransport::with_state(|s| {
            s.fail.insert("deactivate_account");
        });
        let err = finalize(
            &transport,
            &session(SOURCE),
            &session(TARGET),
            start_time(),
            &LoggingReporter,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.needs_manual_recovery());
    }
}
