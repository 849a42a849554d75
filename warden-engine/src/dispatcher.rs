//! Persists an action log, gates on approval, and calls the platform effector for
//! auto-executed or operator-approved actions.
//!
//! `approve`/`decline` are the two call-ins a REST crate would use to implement the
//! operator-approval PATCH endpoint, built on the store's CAS-guarded status update so
//! a double approval only ever triggers one effector call.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;
use warden_core::ActionStatus;
use warden_store::Store;

use crate::error::DispatchError;
use crate::pipeline::ActionCandidate;

/// Platform-specific executor for an action already validated by the registry.
#[async_trait]
pub trait ActionEffector: Send + Sync {
    async fn execute(
        &self,
        action_type: &str,
        params: &serde_json::Value,
        context: &serde_json::Value,
    ) -> Result<(), DispatchError>;
}

pub struct ActionDispatcher {
    store: Arc<Store>,
    effector: Arc<dyn ActionEffector>,
    moderator_id: Uuid,
    deployment_id: Uuid,
}

impl ActionDispatcher {
    pub fn new(
        store: Arc<Store>,
        effector: Arc<dyn ActionEffector>,
        moderator_id: Uuid,
        deployment_id: Uuid,
    ) -> Self {
        Self {
            store,
            effector,
            moderator_id,
            deployment_id,
        }
    }

    /// Persists the action log and, if auto-executable, runs the effector and updates
    /// the log to its terminal state. Returns the log id either way.
    pub async fn dispatch(
        &self,
        action: &ActionCandidate,
        context: &serde_json::Value,
    ) -> Result<Uuid, DispatchError> {
        let initial_status = if action.requires_approval {
            ActionStatus::AwaitingApproval
        } else {
            ActionStatus::Pending
        };
        let log_id = self
            .store
            .insert_action_log(
                self.moderator_id,
                self.deployment_id,
                &action.action_type,
                action.params.clone(),
                context.clone(),
                initial_status,
            )
            .await?;

        if action.requires_approval {
            return Ok(log_id);
        }

        let outcome = self.effector.execute(&action.action_type, &action.params, context).await;
        self.finish(log_id, ActionStatus::Pending, outcome).await?;
        Ok(log_id)
    }

    /// Transitions an `AWAITING_APPROVAL` log to `APPROVED` and runs the effector.
    /// Returns `NotAwaitingApproval` if the log had already moved on (e.g. a racing
    /// double-approve or a prior decline); the CAS guarantees at most one effector call.
    pub async fn approve(&self, log_id: Uuid) -> Result<ActionStatus, DispatchError> {
        let transitioned = self
            .store
            .cas_action_status(log_id, ActionStatus::AwaitingApproval, ActionStatus::Approved)
            .await?;
        if !transitioned {
            return Err(DispatchError::NotAwaitingApproval(log_id));
        }

        let log = self.store.get_action_log(log_id).await?;
        let outcome = self
            .effector
            .execute(&log.action_type, &log.action_params, &log.context)
            .await;
        let final_status = self.finish(log_id, ActionStatus::Approved, outcome).await?;
        Ok(final_status)
    }

    /// Writes `DECLINED` directly, with no effector call.
    pub async fn decline(&self, log_id: Uuid) -> Result<(), DispatchError> {
        let transitioned = self
            .store
            .cas_action_status(log_id, ActionStatus::AwaitingApproval, ActionStatus::Declined)
            .await?;
        if !transitioned {
            return Err(DispatchError::NotAwaitingApproval(log_id));
        }
        Ok(())
    }

    async fn finish(
        &self,
        log_id: Uuid,
        from: ActionStatus,
        outcome: Result<(), DispatchError>,
    ) -> Result<ActionStatus, DispatchError> {
        let final_status = match &outcome {
            Ok(()) => ActionStatus::Success,
            Err(e) => {
                tracing::error!(%log_id, error = %e, "action dispatch failed");
                ActionStatus::Failed
            }
        };
        self.store.cas_action_status(log_id, from, final_status).await?;
        Ok(final_status)
    }
}
