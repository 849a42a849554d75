//! Encodes text to fixed-dimension vectors, plus the process-wide singleton the rest
//! of the engine reads from. The similarity query half (`nearest`) lives in
//! `warden_store::Store`.

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequest, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::error::EmbeddingError;

/// Produces fixed-size float vectors from text. One model instance per process,
/// lazily initialized on first use via [`init_embedder`] / [`embedder`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;
}

/// HTTP embedder speaking the OpenAI embeddings API shape, pointed at whatever
/// `embedding.dimension`-producing model the deployment is configured with.
pub struct HttpEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let inputs: Vec<String> = texts.iter().map(|s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs[0].clone())
        } else {
            EmbeddingInput::StringArray(inputs)
        };

        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            dimensions: Some(self.dimension as u32),
            ..Default::default()
        };

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

static EMBEDDER: OnceCell<Arc<dyn Embedder>> = OnceCell::new();

/// Installs the process-wide embedder. Idempotent: later calls after the first are
/// ignored, matching the lazy-init-once contract the worker's startup relies on.
pub fn init_embedder(embedder: Arc<dyn Embedder>) {
    let _ = EMBEDDER.set(embedder);
}

/// Returns the process-wide embedder installed by [`init_embedder`].
///
/// # Panics
/// Panics if called before `init_embedder`; the worker binary installs it during
/// startup before any message reaches the pipeline.
pub fn embedder() -> Arc<dyn Embedder> {
    EMBEDDER
        .get()
        .expect("embedder not initialized; call init_embedder at worker startup")
        .clone()
}
