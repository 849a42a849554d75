//! Entity types for the moderation domain (users, guidelines, moderators, deployments,
//! action logs, messages and their evaluations).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat platform a deployment targets. Only `Discord` has a concrete adapter today;
/// the enum stays open so a second platform doesn't require touching every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Discord,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Discord => write!(f, "discord"),
        }
    }
}

/// Deployment lifecycle state. Transitions: `Offline -> Pending -> Online -> Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Offline,
    Pending,
    Online,
}

/// ActionLog state machine.
///
/// `Pending -> Success|Failed` for auto-executed actions.
/// `AwaitingApproval -> Approved -> Success|Failed` or `AwaitingApproval -> Declined`
/// for approval-gated actions. `Success`, `Failed` and `Declined` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    AwaitingApproval,
    Approved,
    Declined,
    Success,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Success | ActionStatus::Failed | ActionStatus::Declined
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guideline {
    pub guideline_id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub body: String,
    /// Ordered, derived from `body`. Order is significant: it is the tie-break order
    /// used when averaging neighbor scores during evaluation.
    pub topics: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Moderator {
    pub moderator_id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub guideline_id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_id: Uuid,
    pub moderator_id: Uuid,
    pub platform: Platform,
    pub name: String,
    pub conf: serde_json::Value,
    pub state: DeploymentState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub log_id: Uuid,
    pub moderator_id: Uuid,
    pub deployment_id: Uuid,
    pub action_type: String,
    pub action_params: serde_json::Value,
    pub context: serde_json::Value,
    pub status: ActionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub moderator_id: Uuid,
    pub deployment_id: Uuid,
    pub platform: Platform,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvaluation {
    pub evaluation_id: Uuid,
    pub message_id: Uuid,
    pub embedding: Vec<f32>,
    pub topic: String,
    pub topic_score: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Clamps a score into `[0, 1]`. Used whenever a score is parsed from LLM output or a
/// similarity distance, per the clamping rule on evaluation/topic scores.
pub fn clamp_unit(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}
