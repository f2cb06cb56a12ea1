//! Session group: the broadcast bus and the one shared worker its members use

use conclave_core::ConclaveConfig;
use conclave_mesh::{ElectionMessage, LocalBus, LocalChannel};
use conclave_store::{SharedWorker, StoreResult, WorkerConfig};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Everything instances of one group share.
///
/// The worker is created by the first member that asks for it and lives as
/// long as any member holds it; once every member has let go, the next request
/// opens a fresh one.
pub struct SessionGroup {
    bus: LocalBus<ElectionMessage>,
    worker_config: WorkerConfig,
    worker: Mutex<Weak<SharedWorker>>,
}

impl SessionGroup {
    pub fn new(config: &ConclaveConfig) -> Arc<Self> {
        let worker_config = match &config.database_path {
            Some(path) => WorkerConfig::file(path),
            None => WorkerConfig::in_memory(),
        };
        Arc::new(Self {
            bus: LocalBus::new(config.channel_capacity),
            worker_config,
            worker: Mutex::new(Weak::new()),
        })
    }

    /// A fresh channel endpoint for a new member
    pub fn connect(&self) -> LocalChannel<ElectionMessage> {
        self.bus.connect()
    }

    /// Obtain the shared worker, opening it if no member currently holds it
    pub fn obtain_worker(&self) -> StoreResult<Arc<SharedWorker>> {
        let mut slot = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(worker) = slot.upgrade() {
            return Ok(worker);
        }

        let worker = Arc::new(SharedWorker::open(&self.worker_config)?);
        *slot = Arc::downgrade(&worker);
        debug!(location = worker.location(), "Shared worker created for session group");
        Ok(worker)
    }

    /// Whether a worker is currently held by some member
    pub fn has_worker(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .strong_count()
            > 0
    }

    /// Members currently connected to the bus
    pub fn member_count(&self) -> usize {
        self.bus.peer_count()
    }

    /// Close the bus; every member's election ends
    pub fn close(&self) {
        self.bus.close();
    }
}
