pub mod cancel;
pub mod config;
pub mod events;
pub mod phase;
pub mod plan;

pub use cancel::CancelToken;
pub use phase::{Phase, PhaseHolder};
