//! Resumable PDS-to-PDS account migration for AT Protocol.

pub mod migration;
pub mod services;

pub use migration::{
    AdvanceOutcome, EngineDeps, IdentityUpdate, MigrationEngine, MigrationRequest,
    MigrationStatus, ServerDescriptor, ServerDescriptorResolver,
};
pub use services::client::{PdsClient, PdsTransport};
pub use services::config::MigrationConfig;
pub use services::errors::{MigrationError, MigrationResult};
