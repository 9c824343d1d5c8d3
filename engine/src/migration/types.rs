use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::client::types::{ServerContact, ServerLinks};

/// Position of a migration in its lifecycle.
///
/// Statuses only move forward, except that `Failed` is reachable from every
/// non-terminal status and left again by resuming the failed step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    NotStarted,
    AccountCreated,
    DataMigrating,
    DataMigrated,
    IdentityUpdating,
    IdentityUpdated,
    Finalizing,
    Completed,
    Failed,
}

impl MigrationStatus {
    fn rank(self) -> Option<u8> {
        match self {
            MigrationStatus::NotStarted => Some(0),
            MigrationStatus::AccountCreated => Some(1),
            MigrationStatus::DataMigrating => Some(2),
            MigrationStatus::DataMigrated => Some(3),
            MigrationStatus::IdentityUpdating => Some(4),
            MigrationStatus::IdentityUpdated => Some(5),
            MigrationStatus::Finalizing => Some(6),
            MigrationStatus::Completed => Some(7),
            MigrationStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == MigrationStatus::Completed
    }

    pub fn can_transition_to(self, next: MigrationStatus) -> bool {
        match (self, next) {
            (MigrationStatus::Completed, _) => false,
            (_, MigrationStatus::Failed) => true,
            (MigrationStatus::Failed, next) => !next.is_terminal(),
            // finalize failure hands control back without undoing the identity change
            (MigrationStatus::Finalizing, MigrationStatus::IdentityUpdated) => true,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(from), Some(to)) => to >= from,
                _ => false,
            },
        }
    }

    /// Last stable status before the step this status belongs to; a failed
    /// step is retried from here.
    pub fn checkpoint(self) -> MigrationStatus {
        match self {
            MigrationStatus::NotStarted => MigrationStatus::NotStarted,
            MigrationStatus::AccountCreated | MigrationStatus::DataMigrating => {
                MigrationStatus::AccountCreated
            }
            MigrationStatus::DataMigrated | MigrationStatus::IdentityUpdating => {
                MigrationStatus::DataMigrated
            }
            MigrationStatus::IdentityUpdated | MigrationStatus::Finalizing => {
                MigrationStatus::IdentityUpdated
            }
            MigrationStatus::Completed => MigrationStatus::Completed,
            MigrationStatus::Failed => MigrationStatus::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::NotStarted => "not_started",
            MigrationStatus::AccountCreated => "account_created",
            MigrationStatus::DataMigrating => "data_migrating",
            MigrationStatus::DataMigrated => "data_migrated",
            MigrationStatus::IdentityUpdating => "identity_updating",
            MigrationStatus::IdentityUpdated => "identity_updated",
            MigrationStatus::Finalizing => "finalizing",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities of a prospective target server
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Normalized base URL, no trailing slash
    pub endpoint: String,
    /// The server's own DID, used as the service-auth audience
    pub did: String,
    pub available_handle_suffixes: Vec<String>,
    pub invite_code_required: bool,
    pub phone_verification_required: bool,
    pub links: ServerLinks,
    pub contact: ServerContact,
}

impl ServerDescriptor {
    pub fn host(&self) -> &str {
        let without_scheme = self
            .endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.endpoint);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

/// Which identity update sub-protocols apply to a DID
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMethod {
    /// `did:web`: the owner republishes the document themselves
    Web,
    /// `did:plc`: server-mediated token or self-signed rotation key
    Plc,
}

impl IdentityMethod {
    pub fn for_did(did: &str) -> Option<Self> {
        if did.starts_with("did:web:") {
            Some(IdentityMethod::Web)
        } else if did.starts_with("did:plc:") {
            Some(IdentityMethod::Plc)
        } else {
            None
        }
    }
}

/// What the caller supplies to start a migration
#[derive(Clone)]
pub struct MigrationRequest {
    pub target_server: String,
    pub invite_code: Option<String>,
    pub new_handle: String,
    pub new_email: String,
    pub new_password: String,
}

impl fmt::Debug for MigrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRequest")
            .field("target_server", &self.target_server)
            .field("invite_code", &self.invite_code)
            .field("new_handle", &self.new_handle)
            .field("new_email", &self.new_email)
            .finish_non_exhaustive()
    }
}

/// In-memory state of one migration. The password lives only here.
#[derive(Clone)]
pub struct MigrationSession {
    pub source_server: String,
    pub target_server: String,
    pub did: String,
    pub invite_code: Option<String>,
    pub new_handle: String,
    pub new_email: String,
    new_password: String,
    pub status: MigrationStatus,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Status a failed migration resumes from
    pub resume_from: Option<MigrationStatus>,
}

impl MigrationSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_server: String,
        target_server: String,
        did: String,
        invite_code: Option<String>,
        new_handle: String,
        new_email: String,
        new_password: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_server,
            target_server,
            did,
            invite_code,
            new_handle,
            new_email,
            new_password,
            status: MigrationStatus::NotStarted,
            last_error: None,
            last_updated: now,
            resume_from: None,
        }
    }

    pub fn new_password(&self) -> &str {
        &self.new_password
    }
}

impl fmt::Debug for MigrationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationSession")
            .field("source_server", &self.source_server)
            .field("target_server", &self.target_server)
            .field("did", &self.did)
            .field("new_handle", &self.new_handle)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .field("resume_from", &self.resume_from)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_only_move_forward() {
        use MigrationStatus::*;
        assert!(NotStarted.can_transition_to(AccountCreated));
        assert!(DataMigrating.can_transition_to(DataMigrating));
        assert!(!DataMigrated.can_transition_to(AccountCreated));
        assert!(!Completed.can_transition_to(Failed));
        assert!(Finalizing.can_transition_to(IdentityUpdated));
    }

    #[test]
    fn failed_is_reachable_and_recoverable() {
        use MigrationStatus::*;
        for status in [NotStarted, AccountCreated, DataMigrating, IdentityUpdating, Finalizing] {
            assert!(status.can_transition_to(Failed));
        }
        assert!(Failed.can_transition_to(DataMigrated));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn in_progress_statuses_checkpoint_to_step_start() {
        assert_eq!(
            MigrationStatus::DataMigrating.checkpoint(),
            MigrationStatus::AccountCreated
        );
        assert_eq!(
            MigrationStatus::IdentityUpdating.checkpoint(),
            MigrationStatus::DataMigrated
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MigrationStatus::IdentityUpdated).unwrap(),
            "\"identity_updated\""
        );
        assert_eq!(MigrationStatus::DataMigrating.to_string(), "data_migrating");
    }

    #[test]
    fn identity_method_from_did() {
        assert_eq!(IdentityMethod::for_did("did:web:alice.test"), Some(IdentityMethod::Web));
        assert_eq!(IdentityMethod::for_did("did:plc:abc"), Some(IdentityMethod::Plc));
        assert_eq!(IdentityMethod::for_did("did:key:z"), None);
    }

    #[test]
    fn session_debug_hides_password() {
        let session = MigrationSession::new(
            "https://old.test".into(),
            "https://new.test".into(),
            "did:plc:abc".into(),
            None,
            "alice.new.test".into(),
            "alice@example.com".into(),
            "hunter2".into(),
            Utc::now(),
        );
        assert!(!format!("{:?}", session).contains("hunter2"));
        assert_eq!(session.new_password(), "hunter2");
    }
}
