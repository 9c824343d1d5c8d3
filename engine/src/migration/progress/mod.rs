pub mod events;
pub mod reporter;

pub use events::*;
pub use reporter::*;
