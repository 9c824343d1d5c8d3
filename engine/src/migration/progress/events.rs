//! Migration progress events

use serde::Serialize;

use crate::migration::types::MigrationStatus;

/// Units of work a migration announces as it starts them
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    AccountReconcile,
    AccountCreation,
    RepositoryExport,
    RepositoryImport,
    BlobDiscovery,
    BlobMigration,
    PreferencesMigration,
    PlcTokenRequest,
    IdentityUpdate,
    Finalize,
}

impl MigrationStep {
    pub fn describe(self) -> &'static str {
        match self {
            MigrationStep::AccountReconcile => "Checking the account on the new server",
            MigrationStep::AccountCreation => "Creating the account on the new server",
            MigrationStep::RepositoryExport => "Exporting repository from the old server",
            MigrationStep::RepositoryImport => "Importing repository to the new server",
            MigrationStep::BlobDiscovery => "Discovering missing blobs",
            MigrationStep::BlobMigration => "Migrating blob data",
            MigrationStep::PreferencesMigration => "Migrating preferences",
            MigrationStep::PlcTokenRequest => "Requesting PLC confirmation token",
            MigrationStep::IdentityUpdate => "Updating identity document",
            MigrationStep::Finalize => "Activating new account and deactivating old account",
        }
    }
}

/// Snapshot of blob transfer progress within one pass
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlobProgress {
    pub pass: u32,
    pub processed: u32,
    pub total: u32,
    pub percent: u8,
    /// Remaining seconds estimated from the running average
    pub eta_seconds: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    StatusChanged {
        from: MigrationStatus,
        to: MigrationStatus,
    },
    StepBegun {
        step: MigrationStep,
    },
    BlobPassStarted {
        pass: u32,
        missing: usize,
    },
    BlobProgress(BlobProgress),
    BlobFailed {
        cid: String,
        error: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    Completed,
}
