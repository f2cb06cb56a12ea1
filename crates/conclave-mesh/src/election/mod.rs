//! Leader election over the broadcast channel
//!
//! Exactly one instance per session group should hold leadership at a time;
//! brief overlap while a new leader takes over is tolerated. Leadership only
//! gates background maintenance, never query execution.

mod elector;
mod state;

pub use elector::{LeaderElector, LeadershipCallback};
pub use state::{ElectionConfig, ElectionState, Step};
