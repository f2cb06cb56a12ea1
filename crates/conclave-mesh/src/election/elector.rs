//! Async driver for the election state machine

use conclave_core::InstanceId;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::state::{ElectionConfig, ElectionState, Step};
use crate::channel::{BroadcastChannel, MessageStream};
use crate::error::{MeshError, MeshResult};
use crate::message::ElectionMessage;

/// Callback invoked with the new leadership value on every transition
pub type LeadershipCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Shared {
    leadership: watch::Sender<bool>,
    callbacks: Mutex<Vec<LeadershipCallback>>,
}

impl Shared {
    fn callbacks(&self) -> MutexGuard<'_, Vec<LeadershipCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, id: InstanceId, is_leader: bool) {
        self.leadership.send_replace(is_leader);
        if is_leader {
            info!(instance_id = %id, "Promoted to leader");
        } else {
            info!(instance_id = %id, "No longer leader");
        }
        // Snapshot so a callback may register further callbacks.
        let callbacks: Vec<LeadershipCallback> = self.callbacks().clone();
        for callback in callbacks {
            callback(is_leader);
        }
    }
}

/// Runs the election for one instance.
///
/// The elector is the sole owner of the instance's leadership flag; everyone
/// else observes it through [`is_leader`](Self::is_leader),
/// [`watch`](Self::watch) or [`on_leadership_change`](Self::on_leadership_change).
pub struct LeaderElector {
    id: InstanceId,
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElector {
    /// Start electing with a fresh random identity
    pub fn start<C>(channel: Arc<C>, config: ElectionConfig) -> MeshResult<Self>
    where
        C: BroadcastChannel<ElectionMessage> + 'static,
    {
        Self::start_with_id(channel, config, InstanceId::new())
    }

    /// Start electing with a known identity
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the channel is already closed or the configuration is unusable.
    pub fn start_with_id<C>(
        channel: Arc<C>,
        config: ElectionConfig,
        id: InstanceId,
    ) -> MeshResult<Self>
    where
        C: BroadcastChannel<ElectionMessage> + 'static,
    {
        if config.heartbeat_interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }

        let inbox = channel.subscribe()?;
        let (leadership, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            leadership,
            callbacks: Mutex::new(Vec::new()),
        });
        let (stop_tx, stop_rx) = oneshot::channel();

        let state = ElectionState::new(id, config, Instant::now());
        let task = tokio::spawn(run_election(
            channel,
            inbox,
            state,
            config,
            shared.clone(),
            stop_rx,
        ));

        debug!(instance_id = %id, "Leader election started");
        Ok(Self {
            id,
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    pub fn is_leader(&self) -> bool {
        *self.shared.leadership.borrow()
    }

    /// Register a callback run on every promotion (`true`) and demotion
    /// (`false`). Callbacks run on the election task and must not block.
    pub fn on_leadership_change<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.callbacks().push(Arc::new(callback));
    }

    /// Observe leadership as a value that changes over time
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shared.leadership.subscribe()
    }

    /// Resign if leader and stop participating. Safe to call more than once.
    pub async fn stop(&self) {
        let stop_tx = lock(&self.stop_tx).take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(instance_id = %self.id, error = %e, "Election task ended abnormally");
            }
        }

        if self.is_leader() {
            self.shared.transition(self.id, false);
        }
    }
}

impl Drop for LeaderElector {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_election<C>(
    channel: Arc<C>,
    mut inbox: MessageStream<ElectionMessage>,
    mut state: ElectionState,
    config: ElectionConfig,
    shared: Arc<Shared>,
    mut stop_rx: oneshot::Receiver<()>,
) where
    C: BroadcastChannel<ElectionMessage> + 'static,
{
    let id = state.id();
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let step = state.on_start();
    apply(channel.as_ref(), &shared, id, step).await;

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                let step = state.on_stop();
                apply(channel.as_ref(), &shared, id, step).await;
                debug!(instance_id = %id, "Leader election stopped");
                break;
            }
            _ = ticker.tick() => {
                let step = state.on_tick(Instant::now());
                apply(channel.as_ref(), &shared, id, step).await;
            }
            next = inbox.next() => match next {
                Some(Ok(message)) => {
                    debug!(instance_id = %id, ?message, "Election message received");
                    let step = state.on_message(message, Instant::now());
                    apply(channel.as_ref(), &shared, id, step).await;
                }
                Some(Err(e)) => {
                    warn!(instance_id = %id, error = %e, "Dropping unreadable election message");
                }
                None => {
                    error!(instance_id = %id, "Broadcast channel lost, giving up leadership");
                    let step = state.on_channel_lost();
                    apply(channel.as_ref(), &shared, id, step).await;
                    break;
                }
            }
        }
    }
}

async fn apply<C>(channel: &C, shared: &Shared, id: InstanceId, step: Step)
where
    C: BroadcastChannel<ElectionMessage>,
{
    for message in step.outgoing {
        if let Err(e) = channel.post(message).await {
            warn!(instance_id = %id, error = %e, "Failed to post election message");
        }
    }
    if let Some(is_leader) = step.transition {
        shared.transition(id, is_leader);
    }
}
