//! Minimum-identity-wins election state machine
//!
//! The machine is pure: every input carries the current instant and every
//! output is a [`Step`] listing the messages to post and the leadership
//! transition, if any. [`LeaderElector`](super::LeaderElector) drives it.
//!
//! Rules:
//! - a live heartbeat from a smaller identity demotes a leader;
//! - a follower that hears a leader with a larger identity, and knows of no
//!   live smaller one, claims leadership at once;
//! - a follower that hears nothing from a leader for `leader_timeout`
//!   promotes itself on its next tick;
//! - a leader answers `leader-check` with an immediate heartbeat;
//! - a leader that stops announces `leader-change {isLeader: false}`.

use conclave_core::InstanceId;
use std::time::Duration;
use tokio::time::Instant;

use crate::message::ElectionMessage;

/// Timing parameters for the election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionConfig {
    /// Period between leader heartbeats and follower liveness checks
    pub heartbeat_interval: Duration,
    /// Silence after which a follower stops trusting the known leader
    pub leader_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            leader_timeout: Duration::from_secs(3),
        }
    }
}

impl ElectionConfig {
    pub fn new(heartbeat_interval: Duration, leader_timeout: Duration) -> Self {
        Self {
            heartbeat_interval,
            leader_timeout,
        }
    }
}

/// Output of one state machine input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub outgoing: Vec<ElectionMessage>,
    /// `Some(true)` on promotion, `Some(false)` on demotion
    pub transition: Option<bool>,
}

impl Step {
    fn idle() -> Self {
        Self::default()
    }

    fn send(message: ElectionMessage) -> Self {
        Self {
            outgoing: vec![message],
            transition: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KnownLeader {
    id: InstanceId,
    last_seen: Instant,
}

/// Per-instance leadership state
#[derive(Debug, Clone)]
pub struct ElectionState {
    id: InstanceId,
    config: ElectionConfig,
    is_leader: bool,
    leader: Option<KnownLeader>,
    started_at: Instant,
    stopped: bool,
}

impl ElectionState {
    pub fn new(id: InstanceId, config: ElectionConfig, now: Instant) -> Self {
        Self {
            id,
            config,
            is_leader: false,
            leader: None,
            started_at: now,
            stopped: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Leader this instance currently defers to, if any
    pub fn known_leader(&self) -> Option<InstanceId> {
        if self.is_leader {
            Some(self.id)
        } else {
            self.leader.map(|leader| leader.id)
        }
    }

    /// Announce ourselves so an incumbent answers without waiting a full interval
    pub fn on_start(&mut self) -> Step {
        Step::send(ElectionMessage::LeaderCheck {
            instance_id: self.id,
        })
    }

    pub fn on_tick(&mut self, now: Instant) -> Step {
        if self.stopped {
            return Step::idle();
        }

        if self.is_leader {
            return Step::send(ElectionMessage::Heartbeat {
                instance_id: self.id,
            });
        }

        self.expire_leader(now);

        let grace_elapsed = now.duration_since(self.started_at) >= self.config.leader_timeout;
        if self.leader.is_none() && grace_elapsed {
            return self.promote();
        }

        Step::idle()
    }

    pub fn on_message(&mut self, message: ElectionMessage, now: Instant) -> Step {
        if self.stopped || message.sender() == self.id {
            return Step::idle();
        }

        match message {
            ElectionMessage::LeaderCheck { .. } => {
                if self.is_leader {
                    Step::send(ElectionMessage::Heartbeat {
                        instance_id: self.id,
                    })
                } else {
                    Step::idle()
                }
            }
            ElectionMessage::Heartbeat { instance_id }
            | ElectionMessage::LeaderChange {
                instance_id,
                is_leader: true,
            } => self.observe_leader(instance_id, now),
            ElectionMessage::LeaderChange {
                instance_id,
                is_leader: false,
            } => {
                if self.leader.is_some_and(|leader| leader.id == instance_id) {
                    self.leader = None;
                }
                Step::idle()
            }
        }
    }

    /// Resign before leaving the group
    pub fn on_stop(&mut self) -> Step {
        if self.stopped {
            return Step::idle();
        }
        self.stopped = true;
        self.leader = None;
        if self.is_leader {
            self.demote()
        } else {
            Step::idle()
        }
    }

    /// The channel is gone: fall back to non-leadership and stop participating
    pub fn on_channel_lost(&mut self) -> Step {
        self.stopped = true;
        self.leader = None;
        if self.is_leader {
            self.is_leader = false;
            Step {
                outgoing: Vec::new(),
                transition: Some(false),
            }
        } else {
            Step::idle()
        }
    }

    fn observe_leader(&mut self, peer: InstanceId, now: Instant) -> Step {
        if peer < self.id {
            self.expire_leader(now);
            let replace = self.leader.is_none_or(|known| peer <= known.id);
            if replace {
                self.leader = Some(KnownLeader {
                    id: peer,
                    last_seen: now,
                });
            }
            return if self.is_leader {
                self.demote()
            } else {
                Step::idle()
            };
        }

        if self.is_leader {
            // Our answer demotes the larger rival right away.
            return Step::send(ElectionMessage::Heartbeat {
                instance_id: self.id,
            });
        }

        self.expire_leader(now);
        if self.leader.is_some() {
            // A live smaller leader will demote this one.
            return Step::idle();
        }
        self.promote()
    }

    fn expire_leader(&mut self, now: Instant) {
        let expired = self
            .leader
            .is_some_and(|known| now.duration_since(known.last_seen) > self.config.leader_timeout);
        if expired {
            self.leader = None;
        }
    }

    fn promote(&mut self) -> Step {
        self.is_leader = true;
        self.leader = None;
        Step {
            outgoing: vec![
                ElectionMessage::Heartbeat {
                    instance_id: self.id,
                },
                ElectionMessage::LeaderChange {
                    instance_id: self.id,
                    is_leader: true,
                },
            ],
            transition: Some(true),
        }
    }

    fn demote(&mut self) -> Step {
        self.is_leader = false;
        Step {
            outgoing: vec![ElectionMessage::LeaderChange {
                instance_id: self.id,
                is_leader: false,
            }],
            transition: Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn id(n: u128) -> InstanceId {
        InstanceId::from_u128(n)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn announces_itself_on_start() {
        let now = Instant::now();
        let mut state = ElectionState::new(id(1), ElectionConfig::default(), now);
        assert_eq!(
            state.on_start().outgoing,
            vec![ElectionMessage::LeaderCheck {
                instance_id: id(1)
            }]
        );
    }

    #[test]
    fn lone_instance_promotes_after_grace_period() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(9), ElectionConfig::default(), t0);

        assert_eq!(state.on_tick(t0 + secs(1)), Step::default());
        assert_eq!(state.on_tick(t0 + secs(2)), Step::default());
        let step = state.on_tick(t0 + secs(3));
        assert_eq!(step.transition, Some(true));
        assert!(state.is_leader());

        let step = state.on_tick(t0 + secs(4));
        assert_eq!(
            step.outgoing,
            vec![ElectionMessage::Heartbeat {
                instance_id: id(9)
            }]
        );
    }

    #[test]
    fn smaller_heartbeat_demotes_leader() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(5), ElectionConfig::default(), t0);
        state.on_tick(t0 + secs(3));
        assert!(state.is_leader());

        let step = state.on_message(
            ElectionMessage::Heartbeat {
                instance_id: id(2),
            },
            t0 + secs(4),
        );
        assert_eq!(step.transition, Some(false));
        assert!(!state.is_leader());
        assert_eq!(state.known_leader(), Some(id(2)));
    }

    #[test]
    fn follower_claims_over_larger_leader() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(1), ElectionConfig::default(), t0);
        let step = state.on_message(
            ElectionMessage::Heartbeat {
                instance_id: id(8),
            },
            t0,
        );
        assert_eq!(step.transition, Some(true));
        assert!(state.is_leader());
    }

    #[test]
    fn follower_defers_to_live_smaller_leader() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(5), ElectionConfig::default(), t0);
        state.on_message(
            ElectionMessage::Heartbeat {
                instance_id: id(2),
            },
            t0,
        );
        let step = state.on_message(
            ElectionMessage::Heartbeat {
                instance_id: id(7),
            },
            t0 + secs(1),
        );
        assert_eq!(step, Step::default());
        assert!(!state.is_leader());
    }

    #[test]
    fn silent_leader_times_out() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(5), ElectionConfig::default(), t0);
        state.on_message(
            ElectionMessage::Heartbeat {
                instance_id: id(2),
            },
            t0 + secs(3),
        );
        assert_eq!(state.on_tick(t0 + secs(5)).transition, None);
        assert_eq!(state.on_tick(t0 + secs(7)).transition, Some(true));
    }

    #[test]
    fn resignation_clears_known_leader() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(5), ElectionConfig::default(), t0);
        state.on_message(
            ElectionMessage::Heartbeat {
                instance_id: id(2),
            },
            t0 + secs(3),
        );
        state.on_message(
            ElectionMessage::LeaderChange {
                instance_id: id(2),
                is_leader: false,
            },
            t0 + secs(4),
        );
        assert_eq!(state.known_leader(), None);
        assert_eq!(state.on_tick(t0 + secs(4)).transition, Some(true));
    }

    #[test]
    fn leader_answers_leader_check() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(1), ElectionConfig::default(), t0);
        state.on_tick(t0 + secs(3));
        let step = state.on_message(
            ElectionMessage::LeaderCheck {
                instance_id: id(4),
            },
            t0 + secs(3),
        );
        assert_eq!(
            step.outgoing,
            vec![ElectionMessage::Heartbeat {
                instance_id: id(1)
            }]
        );
    }

    #[test]
    fn stop_resigns_once() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(1), ElectionConfig::default(), t0);
        state.on_tick(t0 + secs(3));
        let step = state.on_stop();
        assert_eq!(step.transition, Some(false));
        assert_eq!(
            step.outgoing,
            vec![ElectionMessage::LeaderChange {
                instance_id: id(1),
                is_leader: false
            }]
        );
        assert_eq!(state.on_stop(), Step::default());
        assert_eq!(state.on_tick(t0 + secs(10)), Step::default());
    }

    #[test]
    fn channel_loss_is_silent_demotion() {
        let t0 = Instant::now();
        let mut state = ElectionState::new(id(1), ElectionConfig::default(), t0);
        state.on_tick(t0 + secs(3));
        let step = state.on_channel_lost();
        assert!(step.outgoing.is_empty());
        assert_eq!(step.transition, Some(false));
        assert!(state.is_stopped());
    }

    /// Lossless synchronous simulation: every tick is followed by full delivery.
    fn simulate(ids: &[u128], rounds: u64) -> Vec<ElectionState> {
        let t0 = Instant::now();
        let config = ElectionConfig::default();
        let mut states: Vec<ElectionState> = ids
            .iter()
            .map(|n| ElectionState::new(id(*n), config, t0))
            .collect();

        let mut queue: VecDeque<(usize, ElectionMessage)> = VecDeque::new();
        for (i, state) in states.iter_mut().enumerate() {
            for message in state.on_start().outgoing {
                queue.push_back((i, message));
            }
        }

        for round in 1..=rounds {
            let now = t0 + secs(round);
            for i in 0..states.len() {
                for message in states[i].on_tick(now).outgoing {
                    queue.push_back((i, message));
                }
            }
            while let Some((from, message)) = queue.pop_front() {
                for to in 0..states.len() {
                    if to == from {
                        continue;
                    }
                    for reply in states[to].on_message(message, now).outgoing {
                        queue.push_back((to, reply));
                    }
                }
            }
        }
        states
    }

    #[test]
    fn three_instances_converge_on_minimum() {
        let states = simulate(&[30, 10, 20], 6);
        let leaders: Vec<_> = states.iter().filter(|s| s.is_leader()).map(|s| s.id()).collect();
        assert_eq!(leaders, vec![id(10)]);
    }

    proptest! {
        #[test]
        fn converges_to_unique_minimum(ids in proptest::collection::hash_set(1u128..10_000, 1..6)) {
            let ids: Vec<u128> = ids.into_iter().collect();
            let minimum = *ids.iter().min().unwrap();
            let states = simulate(&ids, 6);
            let leaders: Vec<_> = states.iter().filter(|s| s.is_leader()).map(|s| s.id()).collect();
            prop_assert_eq!(leaders, vec![id(minimum)]);
        }
    }
}
