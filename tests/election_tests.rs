//! Leader election across instances of one session group
//!
//! These run on real time with short intervals so the shared worker's
//! blocking calls and the election timers advance together.

use conclave::{Capabilities, ConclaveConfig, Instance, SessionGroup};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> ConclaveConfig {
    ConclaveConfig::builder()
        .heartbeat_interval(Duration::from_millis(50))
        .leader_timeout(Duration::from_millis(200))
        .sync_interval(Duration::from_millis(100))
        .build()
        .expect("valid config")
}

async fn start_many(group: &Arc<SessionGroup>, count: usize) -> Vec<Instance> {
    let mut instances = Vec::with_capacity(count);
    for _ in 0..count {
        instances.push(
            Instance::start(group, fast_config(), Capabilities::default())
                .await
                .expect("instance starts"),
        );
    }
    instances
}

fn leaders(instances: &[Instance]) -> Vec<&Instance> {
    instances.iter().filter(|i| i.is_leader()).collect()
}

#[tokio::test]
async fn test_group_converges_on_smallest_identity() {
    let group = SessionGroup::new(&fast_config());
    let instances = start_many(&group, 3).await;

    tokio::time::sleep(Duration::from_millis(700)).await;

    let elected = leaders(&instances);
    assert_eq!(elected.len(), 1, "exactly one leader expected");
    let smallest = instances.iter().map(Instance::id).min().expect("non-empty");
    assert_eq!(elected[0].id(), smallest);

    for instance in instances {
        instance.shutdown().await;
    }
}

#[tokio::test]
async fn test_leader_shutdown_hands_over() {
    let group = SessionGroup::new(&fast_config());
    let mut instances = start_many(&group, 3).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let position = instances
        .iter()
        .position(Instance::is_leader)
        .expect("a leader was elected");
    let old_leader = instances.remove(position);
    old_leader.shutdown().await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    let elected = leaders(&instances);
    assert_eq!(elected.len(), 1);
    let smallest = instances.iter().map(Instance::id).min().expect("non-empty");
    assert_eq!(elected[0].id(), smallest);

    for instance in instances {
        instance.shutdown().await;
    }
}

#[tokio::test]
async fn test_late_joiner_does_not_disturb_smaller_leader() {
    let group = SessionGroup::new(&fast_config());
    let mut instances = start_many(&group, 2).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let leader_before = leaders(&instances)[0].id();

    instances.extend(start_many(&group, 1).await);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let elected = leaders(&instances);
    assert_eq!(elected.len(), 1);
    let smallest = instances.iter().map(Instance::id).min().expect("non-empty");
    assert_eq!(elected[0].id(), smallest);
    if smallest != instances[2].id() {
        assert_eq!(elected[0].id(), leader_before);
    }

    for instance in instances {
        instance.shutdown().await;
    }
}

#[tokio::test]
async fn test_closed_channel_drops_leadership() {
    let group = SessionGroup::new(&fast_config());
    let instances = start_many(&group, 2).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(leaders(&instances).len(), 1);

    group.close();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(leaders(&instances).is_empty());

    // Queries still work without an election.
    let rows = instances[0]
        .call_tool(conclave::ToolCallRequest::new(
            "executeQuery",
            serde_json::json!({"query": "SELECT 1 AS one"}),
        ))
        .await;
    assert!(!rows.is_error, "{}", rows.text());

    for instance in instances {
        instance.shutdown().await;
    }
}

#[tokio::test]
async fn test_worker_is_released_when_everyone_leaves() {
    let group = SessionGroup::new(&fast_config());
    let instances = start_many(&group, 2).await;
    assert!(Arc::ptr_eq(instances[0].worker(), instances[1].worker()));

    for instance in instances {
        instance.shutdown().await;
    }
    assert!(!group.has_worker());
}
