//! Error taxonomy for the engine's components. Each enum mirrors a single concern
//! (`LlmError` for the LLM client, `EmbeddingError` for the embedder, `PipelineError`
//! for the evaluation pipeline, `DispatchError` for the action dispatcher); all convert
//! into `warden_core::ModerationError` for the places (retry wrapper, worker main loop)
//! that need the coarser classification.

use thiserror::Error;
use uuid::Uuid;
use warden_core::ModerationError;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("missing ```json fence in response")]
    MissingFence,
    #[error("malformed json: {0}")]
    MalformedJson(String),
}

impl From<LlmError> for ModerationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Transport(s) => ModerationError::Transport(s),
            LlmError::Status(code) if (500..600).contains(&code) => {
                ModerationError::Transport(format!("http {code}"))
            }
            LlmError::Status(code) => ModerationError::Protocol(format!("http {code}")),
            LlmError::MissingFence => ModerationError::Protocol("missing json fence".into()),
            LlmError::MalformedJson(s) => ModerationError::Protocol(s),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("transport: {0}")]
    Transport(String),
}

impl From<EmbeddingError> for ModerationError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Transport(s) => ModerationError::Transport(s),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("llm: {0}")]
    Llm(#[from] LlmError),
    #[error("embedding: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("store: {0}")]
    Store(#[from] warden_store::StoreError),
    #[error("registry: {0}")]
    Registry(#[from] warden_core::RegistryError),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl From<PipelineError> for ModerationError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Llm(e) => e.into(),
            PipelineError::Embedding(e) => e.into(),
            PipelineError::Store(e) => e.into(),
            PipelineError::Registry(e) => ModerationError::Validation(e.to_string()),
            PipelineError::Protocol(s) => ModerationError::Protocol(s),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store: {0}")]
    Store(#[from] warden_store::StoreError),
    #[error("registry: {0}")]
    Registry(#[from] warden_core::RegistryError),
    #[error("effector authorization: {0}")]
    Authorization(String),
    #[error("effector not found: {0}")]
    NotFound(String),
    #[error("effector transport: {0}")]
    Transport(String),
    #[error("effector internal: {0}")]
    Internal(String),
    #[error("action log {0} is not awaiting approval")]
    NotAwaitingApproval(Uuid),
}

impl From<DispatchError> for ModerationError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Store(e) => e.into(),
            DispatchError::Registry(e) => ModerationError::Validation(e.to_string()),
            DispatchError::Authorization(s) => ModerationError::Authorization(s),
            DispatchError::NotFound(s) => ModerationError::NotFound(s),
            DispatchError::Transport(s) => ModerationError::Transport(s),
            DispatchError::Internal(s) => ModerationError::Internal(s),
            DispatchError::NotAwaitingApproval(id) => {
                ModerationError::Validation(format!("action log {id} is not awaiting approval"))
            }
        }
    }
}
