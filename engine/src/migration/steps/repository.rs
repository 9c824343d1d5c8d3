//! Account creation on the target and the one-shot repository copy.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::migration::clock::to_chrono;
use crate::migration::progress::{MigrationEvent, MigrationStep, ProgressReporter};
use crate::migration::types::{MigrationSession, ServerDescriptor};
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::{ClientSessionCredentials, CreateAccountRequest};
use crate::services::config::IdentityConfig;
use crate::services::errors::MigrationResult;

pub const CREATE_ACCOUNT_LXM: &str = "com.atproto.server.createAccount";

/// Creates the account on the target under the existing DID, authorized by a
/// service token the source mints for the target's DID.
#[instrument(skip_all, fields(did = %migration.did, target = %descriptor.endpoint), err)]
pub async fn create_target_account(
    transport: &dyn PdsTransport,
    source: &ClientSessionCredentials,
    descriptor: &ServerDescriptor,
    migration: &MigrationSession,
    config: &IdentityConfig,
    now: DateTime<Utc>,
    reporter: &dyn ProgressReporter,
) -> MigrationResult<ClientSessionCredentials> {
    reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::AccountCreation,
    });

    let expires_at = (now + to_chrono(config.service_auth_lifetime)).timestamp();
    let service_auth_token = transport
        .get_service_auth(source, &descriptor.did, Some(CREATE_ACCOUNT_LXM), Some(expires_at))
        .await?;

    let request = CreateAccountRequest {
        did: migration.did.clone(),
        handle: migration.new_handle.clone(),
        email: migration.new_email.clone(),
        password: migration.new_password().to_string(),
        invite_code: migration.invite_code.clone(),
        service_auth_token,
    };
    let session = transport
        .create_account(&descriptor.endpoint, &request)
        .await?;

    info!(
        "[Migration] Created account {} on {}",
        session.handle, descriptor.endpoint
    );
    Ok(session)
}

/// Exports the repository CAR from the source and imports it into the
/// target. Returns the CAR size in bytes.
#[instrument(skip_all, fields(did = %source.did), err)]
pub async fn migrate_repository(
    transport: &dyn PdsTransport,
    source: &ClientSessionCredentials,
    target: &ClientSessionCredentials,
    reporter: &dyn ProgressReporter,
) -> MigrationResult<usize> {
    reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::RepositoryExport,
    });
    let car = transport.export_repo(source).await?;
    let size = car.len();
    info!("[Migration] Exported repository: {} bytes", size);

    reporter.report(&MigrationEvent::StepBegun {
        step: MigrationStep::RepositoryImport,
    });
    transport.import_repo(target, car).await?;
    info!("[Migration] Repository imported into {}", target.pds);

    Ok(size)
}
