//! Wire protocol for the deployment-events bus topic.
//!
//! Payloads are tagged JSON objects, one variant per lifecycle event the deployment
//! controller reacts to. Unknown or malformed payloads are the controller's problem to
//! log and drop, not this crate's to reject at parse time beyond basic shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::Platform;

/// A single message on the deployment-events topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentEvent {
    Start {
        deployment_id: Uuid,
        moderator_id: Uuid,
        platform: Platform,
        conf: serde_json::Value,
    },
    Stop {
        deployment_id: Uuid,
    },
}

impl DeploymentEvent {
    pub fn deployment_id(&self) -> Uuid {
        match self {
            DeploymentEvent::Start { deployment_id, .. } => *deployment_id,
            DeploymentEvent::Stop { deployment_id } => *deployment_id,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_round_trips_through_json() {
        let event = DeploymentEvent::Start {
            deployment_id: Uuid::new_v4(),
            moderator_id: Uuid::new_v4(),
            platform: Platform::Discord,
            conf: serde_json::json!({"guild_id": "123", "allowed_channels": ["*"]}),
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        let back = DeploymentEvent::from_slice(&bytes).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn stop_event_tag_is_snake_case() {
        let id = Uuid::new_v4();
        let event = DeploymentEvent::Stop { deployment_id: id };
        let value = event.to_value();
        assert_eq!(value["type"], "stop");
        assert_eq!(value["deployment_id"], id.to_string());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let payload = serde_json::json!({"type": "restart", "deployment_id": Uuid::new_v4()});
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert!(DeploymentEvent::from_slice(&bytes).is_err());
    }

    #[test]
    fn deployment_id_accessor_matches_both_variants() {
        let id = Uuid::new_v4();
        let start = DeploymentEvent::Start {
            deployment_id: id,
            moderator_id: Uuid::new_v4(),
            platform: Platform::Discord,
            conf: serde_json::json!({}),
        };
        let stop = DeploymentEvent::Stop { deployment_id: id };
        assert_eq!(start.deployment_id(), id);
        assert_eq!(stop.deployment_id(), id);
    }
}
