//! Shared doubles and fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use guichet::catalog::{CatalogDocument, DocumentSource};
use guichet::config::GuichetConfig;
use guichet::embedding::{BoxFuture, EmbeddingProvider};
use guichet::error::Result;

/// Deterministic letter-frequency embedding: texts sharing vocabulary land
/// close together under the Euclidean metric.
pub fn toy_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    for byte in text.bytes() {
        if byte.is_ascii_alphabetic() {
            let slot = (byte.to_ascii_lowercase() - b'a') as usize % dim;
            vector[slot] += 1.0;
        }
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    vector
}

/// Embedding provider double built on [`toy_embedding`]; no network.
pub struct StubEmbedder {
    dim: usize,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingProvider for StubEmbedder {
    fn dimensions(&self) -> usize {
        self.dim
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(async move { Ok(toy_embedding(text, self.dim)) })
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(async move { Ok(texts.iter().map(|t| toy_embedding(t, self.dim)).collect()) })
    }
}

/// Spy document source that counts how many load cycles ran.
pub struct CountingSource {
    documents: Vec<CatalogDocument>,
    pub loads: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingSource {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            documents: texts
                .iter()
                .enumerate()
                .map(|(i, text)| CatalogDocument {
                    source_id: format!("doc-{i}.txt"),
                    text: text.to_string(),
                })
                .collect(),
            loads: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Make each load take a while, so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DocumentSource for CountingSource {
    fn load(&self) -> Result<Vec<CatalogDocument>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self.documents.clone())
    }
}

/// Source that fails its first load and succeeds afterwards.
pub struct FlakySource {
    inner: CountingSource,
}

impl FlakySource {
    pub fn new(texts: &[&str]) -> Self {
        Self {
            inner: CountingSource::new(texts),
        }
    }

    pub fn load_count(&self) -> usize {
        self.inner.load_count()
    }
}

impl DocumentSource for FlakySource {
    fn load(&self) -> Result<Vec<CatalogDocument>> {
        let documents = self.inner.load()?;
        if self.inner.load_count() == 1 {
            return Err(std::io::Error::other("catalog share offline").into());
        }
        Ok(documents)
    }
}

/// Config rooted in a scratch directory, pointing at `api_base`.
pub fn test_config(base: &tempfile::TempDir, api_base: &str) -> GuichetConfig {
    let catalog_dir = base.path().join("catalog");
    std::fs::create_dir_all(&catalog_dir).unwrap();
    GuichetConfig {
        api_key: "test-key".to_string(),
        api_base: api_base.to_string(),
        model: "gpt-4o-mini".to_string(),
        embedding_model: "text-embedding-3-small".to_string(),
        embedding_dimensions: 8,
        catalog_dir: catalog_dir.display().to_string(),
        index_dir: base.path().join("index").display().to_string(),
        session_db_url: base.path().join("sessions.db").display().to_string(),
        context_max_tokens: 8192,
        assistant_minimum_context_tokens: 2048,
        response_max_tokens: 500,
        retrieval_top_k: 4,
        chunk_size: 200,
        chunk_overlap: 20,
        provider_max_attempts: 2,
        provider_timeout_secs: 5,
    }
}
