//! One running member of a session group

use conclave_core::{ConclaveConfig, ConclaveResult, InstanceId, Interrupt};
use conclave_mesh::{ElectionConfig, LeaderElector};
use conclave_store::{ContextManager, GenerationRepository, SharedWorker, StorageEngine};
use conclave_tools::{
    Services, ToolCallRequest, ToolCallResponse, ToolRegistry, builtin_registry, handle_call,
    handle_line,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::capabilities::Capabilities;
use crate::group::SessionGroup;
use crate::maintenance::LeaderDuties;

/// Owns every component of one instance, built in dependency order:
/// channel, elector, shared worker, context manager and repository, registry.
///
/// Tool calls and queries work on every instance; leadership only gates the
/// background duties in [`maintenance`](crate::maintenance).
pub struct Instance {
    config: ConclaveConfig,
    elector: LeaderElector,
    worker: Arc<SharedWorker>,
    contexts: Arc<ContextManager>,
    generations: Arc<GenerationRepository>,
    registry: Arc<ToolRegistry>,
    interrupt: Interrupt,
    duties: LeaderDuties,
}

impl Instance {
    /// Join `group` and start electing.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, a closed group channel, or a
    /// database that cannot be opened or migrated.
    pub async fn start(
        group: &Arc<SessionGroup>,
        config: ConclaveConfig,
        capabilities: Capabilities,
    ) -> ConclaveResult<Self> {
        config.validate()?;

        let channel = Arc::new(group.connect());
        let elector = LeaderElector::start(
            channel,
            ElectionConfig::new(config.heartbeat_interval, config.leader_timeout),
        )?;

        let worker = match group.obtain_worker() {
            Ok(worker) => worker,
            Err(e) => {
                elector.stop().await;
                return Err(e.into());
            }
        };

        let contexts = Arc::new(ContextManager::new(worker.clone()));
        let generations = Arc::new(GenerationRepository::new(
            worker.clone(),
            capabilities.embedder,
            capabilities.segmenter,
            config.segmentation_cache_capacity,
        ));

        let interrupt = Interrupt::new();
        let storage: Arc<dyn StorageEngine> = worker.clone();
        let services = Services {
            storage,
            contexts: contexts.clone(),
            generations: generations.clone(),
            generator: capabilities.generator,
            interrupt: interrupt.clone(),
        };
        let registry = match builtin_registry(&services) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                elector.stop().await;
                return Err(e.into());
            }
        };

        let duties = LeaderDuties::spawn(
            elector.watch(),
            contexts.clone(),
            generations.clone(),
            config.sync_interval,
        );

        info!(
            instance_id = %elector.instance_id(),
            database = worker.location(),
            tools = registry.len(),
            "Instance started"
        );

        Ok(Self {
            config,
            elector,
            worker,
            contexts,
            generations,
            registry,
            interrupt,
            duties,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.elector.instance_id()
    }

    pub fn is_leader(&self) -> bool {
        self.elector.is_leader()
    }

    /// Observe leadership transitions
    pub fn watch_leadership(&self) -> watch::Receiver<bool> {
        self.elector.watch()
    }

    /// Run `callback` on every promotion (`true`) and demotion (`false`).
    /// It runs on the election task and must not block.
    pub fn on_leadership_change<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.elector.on_leadership_change(callback);
    }

    pub fn config(&self) -> &ConclaveConfig {
        &self.config
    }

    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    pub fn generations(&self) -> &Arc<GenerationRepository> {
        &self.generations
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn worker(&self) -> &Arc<SharedWorker> {
        &self.worker
    }

    /// Dispatch one tool call; failures come back as error envelopes
    pub async fn call_tool(&self, request: ToolCallRequest) -> ToolCallResponse {
        handle_call(&self.registry, request).await
    }

    /// Dispatch one JSON-encoded request line and return the encoded response
    pub async fn handle_line(&self, line: &str) -> String {
        handle_line(&self.registry, line).await
    }

    /// Tear down in reverse order: abort generations, stop maintenance, save
    /// the active context, resign, release the worker.
    pub async fn shutdown(self) {
        let id = self.id();
        self.interrupt.fire();
        self.duties.stop().await;

        if let Err(e) = self.contexts.save_current().await {
            warn!(instance_id = %id, error = %e, "Failed to save active context on shutdown");
        }

        self.elector.stop().await;
        drop(self.registry);
        drop(self.generations);
        drop(self.contexts);
        drop(self.worker);
        info!(instance_id = %id, "Instance stopped");
    }
}
