//! Pairing queued players into matches

pub mod queue;
pub mod service;

pub use queue::{MatchmakingError, QueuedPlayer};
pub use service::MatchmakingService;
