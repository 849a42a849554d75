//! The per-deployment worker-process main loop tying together the stream, task pool,
//! pipeline, retry wrapper and dispatcher for one deployment.
//!
//! `MessageStream` and `ActionEffector` (see `dispatcher.rs`) are the two capability
//! seams a platform adapter implements; everything else here is platform-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_core::{ActionRegistry, DeploymentState, Platform};
use warden_store::Store;

use crate::dispatcher::{ActionDispatcher, ActionEffector};
use crate::embed::Embedder;
use crate::error::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::{MessageContext, Pipeline, Policy};
use crate::retry::{with_retry, RetryPolicy};
use crate::task_pool::TaskPool;

/// Produces the next inbound message for a deployment. Implementations own whatever
/// gateway connection or polling loop is needed; `recv` returning `None` means the
/// upstream source is exhausted and the moderator should stop.
#[async_trait]
pub trait MessageStream: Send {
    async fn recv(&mut self) -> Option<MessageContext>;
}

pub struct ModeratorHandles {
    pub store: Arc<Store>,
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn Embedder>,
    pub registry: Arc<ActionRegistry>,
    pub effector: Arc<dyn ActionEffector>,
}

pub struct ModeratorConfig {
    pub moderator_id: Uuid,
    pub deployment_id: Uuid,
    pub platform: Platform,
    pub policy: Policy,
    pub allowed_action_types: Vec<String>,
    pub task_pool_size: Option<usize>,
    pub similarity_distance_threshold: f32,
    pub validator_max_attempts: usize,
    pub retry_policy: RetryPolicy,
}

/// Runs one deployment's message loop until `recv` returns `None` or `shutdown` fires.
pub struct PerDeploymentModerator {
    handles: ModeratorHandles,
    config: ModeratorConfig,
    task_pool: Arc<TaskPool>,
    shutdown: CancellationToken,
}

impl PerDeploymentModerator {
    pub fn new(handles: ModeratorHandles, config: ModeratorConfig) -> Self {
        let task_pool = Arc::new(TaskPool::new(config.task_pool_size));
        Self {
            handles,
            config,
            task_pool,
            shutdown: CancellationToken::new(),
        }
    }

    /// A clone-able handle a controller can hold onto to request shutdown without
    /// waiting for `run` to return.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Transitions the deployment to `Online`, drains `stream` through the task pool,
    /// and transitions to `Offline` on the way out -- whether the stream ended
    /// naturally or shutdown was requested.
    pub async fn run(&self, mut stream: Box<dyn MessageStream>) -> Result<(), PipelineError> {
        self.handles
            .store
            .cas_deployment_state(self.config.deployment_id, DeploymentState::Pending, DeploymentState::Online)
            .await?;

        self.task_pool.start().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(deployment_id = %self.config.deployment_id, "shutdown requested, draining task pool");
                    break;
                }
                ctx = stream.recv() => {
                    match ctx {
                        Some(ctx) => self.dispatch_one(ctx).await,
                        None => {
                            tracing::info!(deployment_id = %self.config.deployment_id, "message stream ended");
                            break;
                        }
                    }
                }
            }
        }

        self.task_pool.stop().await;
        self.handles
            .store
            .cas_deployment_state(self.config.deployment_id, DeploymentState::Online, DeploymentState::Offline)
            .await?;
        Ok(())
    }

    async fn dispatch_one(&self, ctx: MessageContext) {
        let store = self.handles.store.clone();
        let llm = self.handles.llm.clone();
        let embedder = self.handles.embedder.clone();
        let registry = self.handles.registry.clone();
        let effector = self.handles.effector.clone();
        let moderator_id = self.config.moderator_id;
        let deployment_id = self.config.deployment_id;
        let platform = self.config.platform;
        let policy = self.config.policy.clone();
        let allowed = self.config.allowed_action_types.clone();
        let similarity_distance_threshold = self.config.similarity_distance_threshold;
        let validator_max_attempts = self.config.validator_max_attempts;
        let retry_policy = self.config.retry_policy;

        self.task_pool
            .submit(Box::pin(async move {
                let pipeline = Pipeline::new(
                    &*llm,
                    embedder.clone(),
                    &store,
                    &registry,
                    platform,
                    similarity_distance_threshold,
                    validator_max_attempts,
                );

                if !pipeline.screen(&ctx).await {
                    tracing::debug!("message screened as malicious, no row written");
                    return;
                }

                let result = with_retry(&retry_policy, || pipeline.score_and_verdict(&policy, &ctx, &allowed)).await;

                match result {
                    Ok(output) => {
                        let dispatcher = ActionDispatcher::new(store.clone(), effector.clone(), moderator_id, deployment_id);
                        if let Some(action) = &output.action {
                            if let Err(e) = dispatcher.dispatch(action, &ctx.routing).await {
                                tracing::error!(error = %e, "failed to dispatch action");
                            }
                        }
                        let embedding = output.embedding;
                        let evaluations = output
                            .topic_scores
                            .into_iter()
                            .map(|(topic, topic_score)| warden_store::NewEvaluation {
                                topic,
                                topic_score,
                                embedding: embedding.clone(),
                            })
                            .collect();
                        if let Err(e) = store
                            .insert_message_and_evaluations(moderator_id, deployment_id, platform, &ctx.content, evaluations)
                            .await
                        {
                            tracing::error!(error = %e, "failed to persist message evaluation");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "evaluation failed after retries");
                    }
                }
            }))
            .await;
    }
}
