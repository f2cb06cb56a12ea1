//! Leader-only background duties

use conclave_core::{ContextError, ContextId, ContextResult};
use conclave_store::{ContextManager, GenerationRepository, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONTEXT_ID: &str = "default";
pub const DEFAULT_CONTEXT_ROLE: &str = "chat";

/// Make sure the `default` context exists in the store, and activate it when
/// nothing else is active.
///
/// A `default` record that already carries another role is left alone.
pub async fn ensure_default_context(contexts: &ContextManager) -> ContextResult<()> {
    let id = ContextId::new_unchecked(DEFAULT_CONTEXT_ID);
    match contexts
        .create_context(id.clone(), DEFAULT_CONTEXT_ROLE, None)
        .await
    {
        Ok(_) => {}
        Err(ContextError::Conflict { existing_role, .. }) => {
            warn!(
                context_id = %id,
                existing_role = %existing_role,
                "Default context exists with a different role"
            );
        }
        Err(e) => return Err(e),
    }

    if !contexts.is_persisted(&id).await? {
        contexts.save_context_state(&id).await?;
        info!(context_id = %id, "Default context persisted");
    }

    if contexts.current_context_id().await.is_none() {
        contexts.switch_context(&id).await?;
    }
    Ok(())
}

/// Mark every generation still waiting for sync as synced
pub async fn sync_pending(generations: &GenerationRepository) -> StoreResult<usize> {
    let pending = generations.pending_sync().await?;
    if pending.is_empty() {
        return Ok(0);
    }
    generations.mark_synced(&pending).await
}

/// Follows the elector's leadership flag and runs leader duties while it is set
pub(crate) struct LeaderDuties {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LeaderDuties {
    pub(crate) fn spawn(
        leadership: watch::Receiver<bool>,
        contexts: Arc<ContextManager>,
        generations: Arc<GenerationRepository>,
        sync_interval: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            leadership,
            shutdown_rx,
            contexts,
            generations,
            sync_interval,
        ));
        Self { shutdown, task }
    }

    /// Stop the maintenance loop and wait for it to finish
    pub(crate) async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Leader duties ended abnormally");
        }
    }
}

async fn supervise(
    mut leadership: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    contexts: Arc<ContextManager>,
    generations: Arc<GenerationRepository>,
    sync_interval: Duration,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        if !*leadership.borrow_and_update() {
            tokio::select! {
                changed = leadership.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
            continue;
        }

        if let Err(e) = ensure_default_context(&contexts).await {
            error!(error = %e, "Failed to prepare default context");
        }

        info!(interval_ms = sync_interval.as_millis() as u64, "Maintenance started");
        let mut ticker = tokio::time::interval(sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => match sync_pending(&generations).await {
                    Ok(0) => {}
                    Ok(synced) => debug!(synced, "Maintenance run marked generations synced"),
                    Err(e) => error!(error = %e, "Maintenance run failed"),
                },
                changed = leadership.changed() => {
                    if changed.is_err() {
                        info!("Maintenance stopped");
                        return;
                    }
                    if !*leadership.borrow_and_update() {
                        info!("Maintenance stopped after demotion");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Maintenance stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{MediaKind, Unavailable};
    use conclave_store::{NewGeneration, SharedWorker};

    fn fixtures() -> (Arc<ContextManager>, Arc<GenerationRepository>) {
        let worker = Arc::new(SharedWorker::in_memory().unwrap());
        (
            Arc::new(ContextManager::new(worker.clone())),
            Arc::new(GenerationRepository::new(
                worker,
                Arc::new(Unavailable),
                Arc::new(Unavailable),
                8,
            )),
        )
    }

    #[tokio::test]
    async fn default_context_is_created_saved_and_activated() {
        let (contexts, _) = fixtures();
        ensure_default_context(&contexts).await.unwrap();

        let id = ContextId::new_unchecked(DEFAULT_CONTEXT_ID);
        assert!(contexts.is_persisted(&id).await.unwrap());
        assert_eq!(contexts.current_context_id().await, Some(id));
    }

    #[tokio::test]
    async fn default_context_does_not_steal_the_active_pointer() {
        let (contexts, _) = fixtures();
        let work = ContextId::parse("work").unwrap();
        contexts.create_context(work.clone(), "analyst", None).await.unwrap();
        contexts.switch_context(&work).await.unwrap();

        ensure_default_context(&contexts).await.unwrap();
        assert_eq!(contexts.current_context_id().await, Some(work));
    }

    #[tokio::test]
    async fn default_context_with_another_role_is_kept() {
        let (contexts, _) = fixtures();
        let id = ContextId::new_unchecked(DEFAULT_CONTEXT_ID);
        contexts.create_context(id.clone(), "system", None).await.unwrap();

        ensure_default_context(&contexts).await.unwrap();
        assert_eq!(contexts.get_context(&id).await.unwrap().role, "system");
    }

    #[tokio::test]
    async fn sync_marks_every_pending_generation() {
        let (_, generations) = fixtures();
        for prompt in ["a", "b"] {
            generations
                .insert(NewGeneration::new(MediaKind::Image, prompt, vec![1]))
                .await
                .unwrap();
        }

        assert_eq!(sync_pending(&generations).await.unwrap(), 2);
        assert_eq!(sync_pending(&generations).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duties_follow_leadership() {
        let (contexts, generations) = fixtures();
        let (leadership, leadership_rx) = watch::channel(false);
        let duties = LeaderDuties::spawn(
            leadership_rx,
            contexts.clone(),
            generations.clone(),
            Duration::from_millis(20),
        );

        generations
            .insert(NewGeneration::new(MediaKind::Music, "song", vec![2]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(generations.pending_sync().await.unwrap().len(), 1);

        leadership.send_replace(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(generations.pending_sync().await.unwrap().is_empty());
        assert!(contexts.current_context_id().await.is_some());

        leadership.send_replace(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        generations
            .insert(NewGeneration::new(MediaKind::Music, "later", vec![3]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(generations.pending_sync().await.unwrap().len(), 1);

        duties.stop().await;
    }
}
