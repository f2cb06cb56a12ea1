//! # Conclave Mesh
//!
//! Coordination layer for the instances of one session group: a typed
//! broadcast channel and the leader election built on top of it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use conclave_mesh::{ElectionConfig, ElectionMessage, LeaderElector, LocalBus};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), conclave_mesh::MeshError> {
//! let bus: LocalBus<ElectionMessage> = LocalBus::new(256);
//! let elector = LeaderElector::start(Arc::new(bus.connect()), ElectionConfig::default())?;
//! elector.on_leadership_change(|is_leader| println!("leader: {is_leader}"));
//! # elector.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod election;
pub mod error;
pub mod message;

pub use channel::{BroadcastChannel, LocalBus, LocalChannel, MessageStream};
pub use election::{ElectionConfig, ElectionState, LeaderElector, LeadershipCallback, Step};
pub use error::{MeshError, MeshResult};
pub use message::ElectionMessage;
