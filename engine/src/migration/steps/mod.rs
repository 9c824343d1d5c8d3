//! Individual migration steps, sequenced by the orchestrator.

pub mod account;
pub mod blob;
pub mod descriptor;
pub mod identity;
pub mod preferences;
pub mod repository;

pub use account::TargetState;
pub use blob::{BlobTransferEngine, BlobTransferReport};
pub use descriptor::{DescriptorError, ServerDescriptorResolver};
pub use identity::{IdentityUpdate, TokenCooldown};
