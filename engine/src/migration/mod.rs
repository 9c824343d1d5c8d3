//! AT Protocol account migration engine
//!
//! Moves an account (repository, blobs, preferences and identity) from one
//! PDS to another, resumably.
//!
//! # Architecture
//!
//! - **orchestrator**: [`MigrationEngine`], the state machine that sequences
//!   steps and persists progress
//! - **steps**: server resolution, account lifecycle, repository and blob
//!   transfer, preferences, identity update
//! - **storage**: the persisted `migration_details` / `migration_progress`
//!   records behind the [`SessionStore`] trait
//! - **progress**: [`MigrationEvent`]s delivered to a [`ProgressReporter`]
//!
//! # Usage
//!
//! ```ignore
//! let deps = EngineDeps::new(transport, store);
//! let mut engine = MigrationEngine::start(deps, source_session, descriptor, request).await?;
//! match engine.advance().await? {
//!     AdvanceOutcome::AwaitingIdentityUpdate { .. } => {
//!         engine.set_identity_update(IdentityUpdate::server_mediated(&token)?)?;
//!         engine.advance().await?;
//!     }
//!     _ => {}
//! }
//! ```

pub mod clock;
pub mod orchestrator;
pub mod progress;
pub mod steps;
pub mod storage;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use orchestrator::{load_pending, AdvanceOutcome, EngineDeps, MigrationEngine};
pub use progress::*;
pub use steps::{
    BlobTransferReport, DescriptorError, IdentityUpdate, ServerDescriptorResolver, TargetState,
};
pub use storage::{FileSessionStore, MemorySessionStore, PersistedMigration, SessionStore};
pub use types::*;
