//! Text-to-vector embedding provider.
//!
//! The engine treats embeddings as an external capability: text in, a
//! fixed-length vector out. [`EmbeddingProvider`] is the seam: the index
//! cache and context assembler only depend on the trait, and tests swap in
//! deterministic doubles. [`OpenAiEmbedder`] is the production
//! implementation over the OpenAI-compatible embeddings endpoint.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::embeddings::CreateEmbeddingRequestArgs,
};
use std::{future::Future, pin::Pin, time::Duration};

use crate::config::GuichetConfig;
use crate::error::{EngineError, Result};
use crate::provider::{self, RetryPolicy};

/// Largest number of inputs sent in one embeddings request.
const MAX_BATCH: usize = 256;

/// Boxed future returned by the object-safe trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Provider interface for embedding generation.
///
/// Async is required because real providers perform HTTP requests.
/// Implementations produce vectors of exactly [`dimensions`](Self::dimensions)
/// entries.
pub trait EmbeddingProvider: Send + Sync {
    /// Output dimensionality; fixed per configured model.
    fn dimensions(&self) -> usize;

    /// Embed a single text string into a vector.
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    /// Embed a batch of text strings, preserving input order.
    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

/// Embedding provider backed by the OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: &GuichetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: provider::create_client(config),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            retry: RetryPolicy::from_config(config),
            timeout: config.provider_timeout(),
        })
    }

    /// One retried, deadline-bounded embeddings request.
    async fn request(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        provider::with_retries(&self.retry, "embedding request", || {
            let inputs = inputs.clone();
            async move {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(self.model.clone())
                    .input(inputs.clone())
                    .build()
                    .map_err(provider::classify_error)?;

                let response = provider::within_deadline(
                    self.timeout,
                    "embedding request",
                    self.client.embeddings().create(request),
                )
                .await?;

                if response.data.len() != inputs.len() {
                    return Err(EngineError::ProviderUnavailable(format!(
                        "embedding response carried {} vectors for {} inputs",
                        response.data.len(),
                        inputs.len()
                    )));
                }

                let mut data = response.data;
                data.sort_by_key(|e| e.index);

                let mut vectors = Vec::with_capacity(data.len());
                for entry in data {
                    if entry.embedding.len() != self.dimensions {
                        return Err(EngineError::Configuration(format!(
                            "embedding model {} returned {} dimensions, expected {}",
                            self.model,
                            entry.embedding.len(),
                            self.dimensions
                        )));
                    }
                    vectors.push(entry.embedding);
                }
                Ok(vectors)
            }
        })
        .await
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(async move {
            let mut vectors = self.request(vec![text.to_string()]).await?;
            vectors.pop().ok_or_else(|| {
                EngineError::ProviderUnavailable("embedding response was empty".to_string())
            })
        })
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(MAX_BATCH) {
                vectors.extend(self.request(batch.to_vec()).await?);
            }
            Ok(vectors)
        })
    }
}
