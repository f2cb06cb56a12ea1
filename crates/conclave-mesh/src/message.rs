//! Messages exchanged by the leader election

use conclave_core::InstanceId;
use serde::{Deserialize, Serialize};

use crate::error::MeshResult;

/// Election traffic. All of it is fire-and-forget with no acknowledgement.
///
/// Serialized with a `type` tag:
/// `{"type":"heartbeat","instanceId":"…"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ElectionMessage {
    /// Sent once on start so an incumbent leader answers immediately
    LeaderCheck { instance_id: InstanceId },
    /// Periodic liveness announcement from a leader
    Heartbeat { instance_id: InstanceId },
    /// Sent when an instance gains or gives up leadership
    LeaderChange {
        instance_id: InstanceId,
        is_leader: bool,
    },
}

impl ElectionMessage {
    /// Instance that sent the message
    pub fn sender(&self) -> InstanceId {
        match self {
            Self::LeaderCheck { instance_id }
            | Self::Heartbeat { instance_id }
            | Self::LeaderChange { instance_id, .. } => *instance_id,
        }
    }

    pub fn to_json(&self) -> MeshResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> MeshResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
