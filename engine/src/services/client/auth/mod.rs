//! Session and account lifecycle operations (`com.atproto.server.*`).

pub mod account;
pub mod login;

pub use account::*;
pub use login::*;
