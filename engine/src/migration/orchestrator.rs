//! Migration orchestrator - sequences the steps and owns persisted progress.
//!
//! [`MigrationEngine::advance`] is the single re-entry point. It reads the
//! current status, runs the matching step and persists every transition, so
//! calling it again after a crash, a failure or a pause for user input picks
//! up where the last stable status left off.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::migration::clock::{to_chrono, Clock, SystemClock};
use crate::migration::progress::{LoggingReporter, MigrationEvent, MigrationStep, ProgressReporter};
use crate::migration::steps::account::{self, TargetState};
use crate::migration::steps::blob::{BlobTransferEngine, BlobTransferReport};
use crate::migration::steps::descriptor::ServerDescriptorResolver;
use crate::migration::steps::identity::{
    self, manual, server_mediated, IdentityContext, IdentityUpdate, TokenCooldown,
};
use crate::migration::steps::{preferences, repository};
use crate::migration::storage::{
    MigrationDetails, MigrationProgress, PersistedMigration, SessionStore,
};
use crate::migration::types::{
    IdentityMethod, MigrationRequest, MigrationSession, MigrationStatus, ServerDescriptor,
};
use crate::migration::validation::{
    resolve_new_handle, validate_email, validate_invite_code, validate_password,
    ConfirmationToken,
};
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::{ClientSessionCredentials, DidDocument, RepoStatus};
use crate::services::config::{get_global_config, MigrationConfig};
use crate::services::errors::{MigrationError, MigrationResult, StorageError};

/// Collaborators an engine runs against
#[derive(Clone)]
pub struct EngineDeps {
    pub transport: Arc<dyn PdsTransport>,
    pub store: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub config: MigrationConfig,
}

impl EngineDeps {
    /// System clock, tracing reporter and the process-wide config
    pub fn new(transport: Arc<dyn PdsTransport>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            transport,
            store,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(LoggingReporter),
            config: get_global_config(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }
}

/// Why [`MigrationEngine::advance`] returned without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Completed,
    /// Data is on the target; supply an [`IdentityUpdate`] to continue
    AwaitingIdentityUpdate { method: IdentityMethod },
    /// A stale target account is being deleted; supply the emailed token
    /// through [`MigrationEngine::confirm_target_deletion`]
    AwaitingDeletionToken,
}

/// Loads the stored migration, discarding it when expired or unreadable
pub async fn load_pending(
    store: &dyn SessionStore,
    now: DateTime<Utc>,
) -> MigrationResult<Option<PersistedMigration>> {
    match store.load().await {
        Ok(Some(record)) if record.is_expired(now) => {
            info!("[Migration] Stored migration expired, discarding");
            store.clear().await?;
            Ok(None)
        }
        Ok(record) => Ok(record),
        Err(StorageError::Corrupt { key, reason }) => {
            warn!("[Migration] Discarding unreadable record {}: {}", key, reason);
            store.clear().await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub struct MigrationEngine {
    deps: EngineDeps,
    session: MigrationSession,
    method: IdentityMethod,
    source: ClientSessionCredentials,
    target: Option<ClientSessionCredentials>,
    descriptor: Option<ServerDescriptor>,
    identity_update: Option<IdentityUpdate>,
    cooldown: TokenCooldown,
    deletion_pending: bool,
    blob_report: Option<BlobTransferReport>,
    expires_at: DateTime<Utc>,
}

impl MigrationEngine {
    /// Validates the request against the resolved target and records a new
    /// migration. Nothing remote is touched yet.
    pub async fn start(
        deps: EngineDeps,
        source: ClientSessionCredentials,
        descriptor: ServerDescriptor,
        request: MigrationRequest,
    ) -> MigrationResult<Self> {
        let method = identity_method_of(&source.did)?;
        let now = deps.clock.now();

        if let Some(existing) = load_pending(deps.store.as_ref(), now).await? {
            return Err(MigrationError::StateConflict {
                status: None,
                message: format!(
                    "A migration of {} to {} is already in progress; resume or cancel it first",
                    existing.details.did, existing.details.target_server
                ),
            });
        }

        if identity::same_endpoint(&source.pds, &descriptor.endpoint) {
            return Err(MigrationError::validation(
                "target_server",
                "The target server is the server the account is already on",
            ));
        }

        let invite_code = match request.invite_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(validate_invite_code(code, descriptor.host())?),
            _ if descriptor.invite_code_required => {
                return Err(MigrationError::validation(
                    "invite_code",
                    format!("{} requires an invite code", descriptor.host()),
                ))
            }
            _ => None,
        };
        let handle = resolve_new_handle(&request.new_handle, &descriptor.available_handle_suffixes)?;
        let email = validate_email(&request.new_email)?;
        validate_password(&request.new_password)?;

        let session = MigrationSession::new(
            source.pds.clone(),
            descriptor.endpoint.clone(),
            source.did.clone(),
            invite_code,
            handle,
            email,
            request.new_password,
            now,
        );
        let cooldown = TokenCooldown::new(to_chrono(deps.config.identity.token_cooldown));

        let mut engine = Self {
            deps,
            session,
            method,
            source,
            target: None,
            descriptor: Some(descriptor),
            identity_update: None,
            cooldown,
            deletion_pending: false,
            blob_report: None,
            expires_at: now,
        };
        engine.persist().await?;
        info!(
            "[Migration] Recorded migration of {} to {}",
            engine.session.did, engine.session.target_server
        );
        Ok(engine)
    }

    /// Rebuilds the engine from the stored record. `Ok(None)` when there is
    /// nothing to resume. The password is never stored and must be supplied
    /// again.
    pub async fn resume(
        deps: EngineDeps,
        source: ClientSessionCredentials,
        new_password: String,
    ) -> MigrationResult<Option<Self>> {
        let now = deps.clock.now();
        let Some(record) = load_pending(deps.store.as_ref(), now).await? else {
            return Ok(None);
        };

        if record.details.did != source.did {
            return Err(MigrationError::StateConflict {
                status: None,
                message: format!(
                    "The stored migration belongs to {}, not {}",
                    record.details.did, source.did
                ),
            });
        }
        validate_password(&new_password)?;
        let method = identity_method_of(&source.did)?;

        let details = record.details;
        let mut session = MigrationSession::new(
            details.source_server,
            details.target_server,
            details.did,
            details.invite_code,
            details.new_handle,
            details.new_email,
            new_password,
            now,
        );
        if let Some(progress) = record.progress {
            session.status = progress.status;
            session.last_error = progress.error;
            session.last_updated = progress.last_updated;
            session.resume_from = progress.resume_from;
        }

        let cooldown = TokenCooldown::new(to_chrono(deps.config.identity.token_cooldown));
        info!(
            "[Migration] Resuming migration of {} at {}",
            session.did, session.status
        );
        Ok(Some(Self {
            deps,
            session,
            method,
            source,
            target: None,
            descriptor: None,
            identity_update: None,
            cooldown,
            deletion_pending: false,
            blob_report: None,
            expires_at: details.expires_at,
        }))
    }

    pub fn status(&self) -> MigrationStatus {
        self.session.status
    }

    pub fn session(&self) -> &MigrationSession {
        &self.session
    }

    pub fn identity_method(&self) -> IdentityMethod {
        self.method
    }

    /// Outcome of the last blob phase run by this engine
    pub fn blob_report(&self) -> Option<&BlobTransferReport> {
        self.blob_report.as_ref()
    }

    pub fn deletion_pending(&self) -> bool {
        self.deletion_pending
    }

    pub fn token_cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown.remaining(self.deps.clock.now())
    }

    /// Runs steps until the migration completes, needs caller input, or a
    /// step fails. Failures are persisted as `failed` with the cause and the
    /// step to retry; calling again resumes there.
    pub async fn advance(&mut self) -> MigrationResult<AdvanceOutcome> {
        self.check_expiry().await?;

        loop {
            let status = self.session.status;
            let step = match status {
                MigrationStatus::Completed => return Ok(AdvanceOutcome::Completed),
                MigrationStatus::Failed => {
                    let resume_at = self.session.resume_from.unwrap_or(MigrationStatus::NotStarted);
                    info!("[Migration] Retrying from {}", resume_at);
                    self.transition(resume_at).await?;
                    continue;
                }
                MigrationStatus::NotStarted => self.prepare_account().await,
                MigrationStatus::AccountCreated | MigrationStatus::DataMigrating => {
                    self.migrate_data().await.map(|_| None)
                }
                MigrationStatus::DataMigrated | MigrationStatus::IdentityUpdating => {
                    self.update_identity().await
                }
                MigrationStatus::IdentityUpdated | MigrationStatus::Finalizing => {
                    self.finalize().await.map(|_| None)
                }
            };

            match step {
                Ok(Some(waiting)) => return Ok(waiting),
                Ok(None) => {}
                Err(e) => return Err(self.record_failure(status, e).await),
            }
        }
    }

    /// Emails a PLC confirmation code from the source. Refused locally during
    /// the cooldown.
    pub async fn request_confirmation_token(&mut self) -> MigrationResult<()> {
        if self.method != IdentityMethod::Plc {
            return Err(MigrationError::validation(
                "identity_method",
                "Confirmation codes only apply to did:plc identities",
            ));
        }
        self.deps.reporter.report(&MigrationEvent::StepBegun {
            step: MigrationStep::PlcTokenRequest,
        });
        let now = self.deps.clock.now();
        self.cooldown.check(now)?;
        let source = self.source_session().await?;
        let transport = Arc::clone(&self.deps.transport);
        server_mediated::request_token(transport.as_ref(), &source, &mut self.cooldown, now).await
    }

    /// Document a `did:web` owner must publish before the identity step
    pub async fn recommended_did_document(&mut self) -> MigrationResult<DidDocument> {
        let target = self.target_session().await?;
        manual::recommended_document(self.deps.transport.as_ref(), &self.session.did, &target).await
    }

    /// Stores the caller's identity choice for the next [`advance`](Self::advance)
    pub fn set_identity_update(&mut self, update: IdentityUpdate) -> MigrationResult<()> {
        update.check_applies_to(&self.session.did)?;
        self.identity_update = Some(update);
        Ok(())
    }

    /// Deletes the stale target account so creation can start over
    pub async fn confirm_target_deletion(&mut self, token: &str) -> MigrationResult<()> {
        if !self.deletion_pending {
            return Err(MigrationError::StateConflict {
                status: None,
                message: "No target account deletion is pending".to_string(),
            });
        }
        let token = ConfirmationToken::parse(token)?;
        account::confirm_deletion(self.deps.transport.as_ref(), &self.session, &token).await?;
        self.deletion_pending = false;
        self.target = None;
        Ok(())
    }

    /// Abandons the migration between steps
    pub async fn cancel(self) -> MigrationResult<()> {
        self.deps.store.clear().await?;
        warn!("[Migration] Migration of {} cancelled", self.session.did);
        Ok(())
    }

    /// Discards a failed migration after the user has seen the error
    pub async fn acknowledge_failure(self) -> MigrationResult<()> {
        if self.session.status != MigrationStatus::Failed {
            return Err(MigrationError::StateConflict {
                status: None,
                message: format!("Migration is {}, not failed", self.session.status),
            });
        }
        self.deps.store.clear().await?;
        Ok(())
    }

    async fn prepare_account(&mut self) -> MigrationResult<Option<AdvanceOutcome>> {
        if self.deletion_pending {
            return Ok(Some(AdvanceOutcome::AwaitingDeletionToken));
        }
        let transport = Arc::clone(&self.deps.transport);
        let reporter = Arc::clone(&self.deps.reporter);

        let state = account::prepare_target(transport.as_ref(), &self.session, reporter.as_ref()).await?;
        match state {
            TargetState::Absent => {
                let source = self.source_session().await?;
                let descriptor = self.descriptor().await?;
                let target = repository::create_target_account(
                    transport.as_ref(),
                    &source,
                    &descriptor,
                    &self.session,
                    &self.deps.config.identity,
                    self.deps.clock.now(),
                    reporter.as_ref(),
                )
                .await?;
                self.target = Some(target);
            }
            TargetState::Ready { session, .. } => {
                info!("[Migration] Reusing existing account on target");
                self.target = Some(session);
            }
            TargetState::DeletionPending => {
                self.deletion_pending = true;
                return Ok(Some(AdvanceOutcome::AwaitingDeletionToken));
            }
        }

        self.transition(MigrationStatus::AccountCreated).await?;
        Ok(None)
    }

    async fn migrate_data(&mut self) -> MigrationResult<()> {
        self.transition(MigrationStatus::DataMigrating).await?;
        let source = self.source_session().await?;
        let target = self.target_session().await?;
        let transport = Arc::clone(&self.deps.transport);
        let reporter = Arc::clone(&self.deps.reporter);

        let target_status =
            account::check_status(transport.as_ref(), &self.session.target_server, &self.session.did)
                .await?;
        if target_status == Some(RepoStatus::Active) {
            info!("[Migration] Target repository already active, skipping repository import");
        } else {
            repository::migrate_repository(transport.as_ref(), &source, &target, reporter.as_ref())
                .await?;
        }

        let report = BlobTransferEngine::new(transport.as_ref(), &self.deps.config.blob, reporter.as_ref())
            .run(&source, &target)
            .await?;
        if let Some(partial) = report.partial_failure() {
            warn!("[Migration] {}", partial);
            reporter.report(&MigrationEvent::Warning {
                message: partial.to_string(),
            });
            self.session.last_error = Some(partial.to_string());
        }
        self.blob_report = Some(report);

        preferences::migrate_preferences(transport.as_ref(), &source, &target, reporter.as_ref())
            .await?;

        self.transition(MigrationStatus::DataMigrated).await
    }

    async fn update_identity(&mut self) -> MigrationResult<Option<AdvanceOutcome>> {
        let transport = Arc::clone(&self.deps.transport);

        if self.method == IdentityMethod::Plc
            && identity::already_points_to(
                transport.as_ref(),
                &self.session.did,
                &self.session.target_server,
            )
            .await
        {
            info!("[Migration] Identity already points to the target, skipping update");
            self.transition(MigrationStatus::IdentityUpdating).await?;
            return self.transition(MigrationStatus::IdentityUpdated).await.map(|_| None);
        }

        let Some(update) = self.identity_update.take() else {
            return Ok(Some(AdvanceOutcome::AwaitingIdentityUpdate {
                method: self.method,
            }));
        };

        self.transition(MigrationStatus::IdentityUpdating).await?;
        let source = self.source_session().await?;
        let target = self.target_session().await?;
        let reporter = Arc::clone(&self.deps.reporter);
        let ctx = IdentityContext {
            transport: transport.as_ref(),
            did: &self.session.did,
            source: &source,
            target: &target,
            reporter: reporter.as_ref(),
        };
        identity::apply(&update, &ctx).await?;

        self.transition(MigrationStatus::IdentityUpdated).await?;
        Ok(None)
    }

    async fn finalize(&mut self) -> MigrationResult<()> {
        self.transition(MigrationStatus::Finalizing).await?;
        let source = self.source_session().await?;
        let target = self.target_session().await?;
        let delete_after =
            self.deps.clock.now() + to_chrono(self.deps.config.finalize.deactivation_grace);

        account::finalize(
            self.deps.transport.as_ref(),
            &source,
            &target,
            delete_after,
            self.deps.reporter.as_ref(),
        )
        .await?;

        self.transition(MigrationStatus::Completed).await?;
        self.deps.store.clear().await?;
        self.deps.reporter.report(&MigrationEvent::Completed);
        info!("[Migration] Migration of {} completed", self.session.did);
        Ok(())
    }

    /// Source session, refreshed when its access token is about to expire
    async fn source_session(&mut self) -> MigrationResult<ClientSessionCredentials> {
        if self.source.needs_refresh_at(self.now_secs()) {
            info!("[Migration] Refreshing source session");
            self.source = self.deps.transport.refresh_session(&self.source).await?;
        }
        Ok(self.source.clone())
    }

    /// Target session, refreshed when close to expiry and re-established with
    /// the DID and new password when missing or unrefreshable
    async fn target_session(&mut self) -> MigrationResult<ClientSessionCredentials> {
        let now = self.now_secs();
        if let Some(target) = self.target.clone() {
            if !target.needs_refresh_at(now) {
                return Ok(target);
            }
            match self.deps.transport.refresh_session(&target).await {
                Ok(refreshed) => {
                    self.target = Some(refreshed.clone());
                    return Ok(refreshed);
                }
                Err(e) => warn!("[Migration] Target refresh failed, logging in again: {}", e),
            }
        }

        let target = self
            .deps
            .transport
            .login(
                &self.session.target_server,
                &self.session.did,
                self.session.new_password(),
            )
            .await?;
        self.target = Some(target.clone());
        Ok(target)
    }

    async fn descriptor(&mut self) -> MigrationResult<ServerDescriptor> {
        if let Some(descriptor) = &self.descriptor {
            return Ok(descriptor.clone());
        }
        let resolver = ServerDescriptorResolver::new(
            Arc::clone(&self.deps.transport),
            self.deps.config.network.clone(),
        )
        .with_source_server(&self.session.source_server);
        let descriptor = resolver.resolve(&self.session.target_server).await?;
        self.descriptor = Some(descriptor.clone());
        Ok(descriptor)
    }

    fn now_secs(&self) -> u64 {
        self.deps.clock.now().timestamp().max(0) as u64
    }

    async fn check_expiry(&mut self) -> MigrationResult<()> {
        if self.deps.clock.now() < self.expires_at {
            return Ok(());
        }
        self.deps.store.clear().await?;
        Err(MigrationError::StateConflict {
            status: None,
            message: "The migration session expired; start the migration again".to_string(),
        })
    }

    async fn transition(&mut self, next: MigrationStatus) -> MigrationResult<()> {
        let from = self.session.status;
        if !from.can_transition_to(next) {
            return Err(MigrationError::fatal(format!(
                "Invalid status transition {} -> {}",
                from, next
            )));
        }

        if from == MigrationStatus::Failed {
            self.session.last_error = None;
        }
        if next != MigrationStatus::Failed {
            self.session.resume_from = None;
        }
        self.session.status = next;
        self.session.last_updated = self.deps.clock.now();
        self.persist().await?;

        if from != next {
            self.deps
                .reporter
                .report(&MigrationEvent::StatusChanged { from, to: next });
        }
        Ok(())
    }

    /// Persists a step failure. Finalize failures keep `identity_updated`
    /// since the identity change cannot be undone.
    async fn record_failure(&mut self, during: MigrationStatus, error: MigrationError) -> MigrationError {
        let checkpoint = during.checkpoint();
        let error = if checkpoint == MigrationStatus::IdentityUpdated {
            self.session.status = MigrationStatus::IdentityUpdated;
            match error {
                fatal @ MigrationError::Fatal { .. } => fatal,
                other => MigrationError::fatal(other.to_string()),
            }
        } else {
            self.session.status = MigrationStatus::Failed;
            self.session.resume_from = Some(checkpoint);
            error
        };

        error!("[Migration] Step failed at {}: {}", during, error);
        self.session.last_error = Some(error.to_string());
        self.session.last_updated = self.deps.clock.now();
        if let Err(e) = self.persist().await {
            error!("[Migration] Could not persist failure: {}", e);
        }
        self.deps.reporter.report(&MigrationEvent::Error {
            message: error.to_string(),
        });
        error
    }

    /// Writes both records and slides the expiry forward
    async fn persist(&mut self) -> MigrationResult<()> {
        let now = self.deps.clock.now();
        self.expires_at = now + to_chrono(self.deps.config.session.ttl);

        let record = PersistedMigration {
            details: MigrationDetails {
                source_server: self.session.source_server.clone(),
                target_server: self.session.target_server.clone(),
                did: self.session.did.clone(),
                invite_code: self.session.invite_code.clone(),
                new_handle: self.session.new_handle.clone(),
                new_email: self.session.new_email.clone(),
                expires_at: self.expires_at,
            },
            progress: Some(MigrationProgress {
                status: self.session.status,
                error: self.session.last_error.clone(),
                last_updated: self.session.last_updated,
                resume_from: self.session.resume_from,
            }),
        };
        self.deps.store.save(&record).await?;
        Ok(())
    }
}

fn identity_method_of(did: &str) -> MigrationResult<IdentityMethod> {
    IdentityMethod::for_did(did).ok_or_else(|| {
        MigrationError::validation("did", format!("Unsupported DID method: {}", did))
    })
}
