//! Process-wide cache of realized catalog indexes, keyed by credential.
//!
//! The cache is the one piece of shared mutable state in the engine. It is
//! owned by the composition root and injected where needed, with explicit
//! lock discipline: a `tokio::sync::Mutex` guards the key→cell map, and a
//! per-key `OnceCell` guarantees **at-most-one build in flight per
//! credential**: concurrent callers either wait on the in-progress build
//! or receive the already-realized `Arc<CatalogIndex>`. Reads of a
//! realized index are lock-free.
//!
//! A failed build stores nothing: the error propagates to the caller and
//! the next call retries the full load+embed cycle.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::SystemTime};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::catalog::{self, DocumentSource};
use crate::config::GuichetConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::vector_index::CatalogIndex;

type IndexCell = Arc<OnceCell<Arc<CatalogIndex>>>;

pub struct IndexCache {
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_dir: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    cells: Mutex<HashMap<String, IndexCell>>,
}

impl IndexCache {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &GuichetConfig,
    ) -> Self {
        Self {
            source,
            embedder,
            index_dir: PathBuf::from(&config.index_dir),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the realized index for `credential`, building it on first use.
    ///
    /// The first caller loads a fresh persisted copy if one exists, and
    /// otherwise runs the full document-load + embed + build cycle and
    /// persists the result. Later callers share the same `Arc`.
    pub async fn get_or_build(&self, credential: &str) -> Result<Arc<CatalogIndex>> {
        let cell = self.cell_for(credential).await;
        cell.get_or_try_init(|| async {
            self.realize(credential, false).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Discard any cached or persisted copy for `credential` and build anew.
    pub async fn rebuild(&self, credential: &str) -> Result<Arc<CatalogIndex>> {
        let cell: IndexCell = Arc::new(OnceCell::new());
        self.cells
            .lock()
            .await
            .insert(credential.to_string(), cell.clone());
        cell.get_or_try_init(|| async { self.realize(credential, true).await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn cell_for(&self, credential: &str) -> IndexCell {
        self.cells
            .lock()
            .await
            .entry(credential.to_string())
            .or_default()
            .clone()
    }

    async fn realize(&self, credential: &str, force: bool) -> Result<CatalogIndex> {
        if !force {
            if let Some(index) = self.load_fresh(credential) {
                info!("reusing persisted catalog index");
                return Ok(index);
            }
        }

        info!("building catalog index");
        let documents = self.source.load()?;
        let chunks = catalog::split_documents(&documents, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            return Err(EngineError::EmptyCorpus);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let embedded = chunks.into_iter().zip(vectors).collect();

        let mut index = CatalogIndex::build(self.embedder.dimensions(), embedded)?;
        info!("catalog index built with {} chunks", index.len());

        // A persist failure only costs a rebuild on the next process start.
        if let Err(err) = index.persist(&self.index_dir, credential) {
            warn!("failed to persist catalog index: {err}");
        }

        Ok(index)
    }

    /// Load the persisted copy for `credential` if it exists and is not
    /// older than the newest source document. Corrupt copies are logged
    /// and discarded so the caller falls through to a rebuild.
    fn load_fresh(&self, credential: &str) -> Option<CatalogIndex> {
        let metadata_path = CatalogIndex::metadata_path(&self.index_dir, credential);
        if !metadata_path.exists() {
            return None;
        }

        if let (Ok(metadata), Ok(Some(source_latest))) = (
            std::fs::metadata(&metadata_path),
            self.source.latest_modification(),
        ) {
            let persisted_at = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if source_latest > persisted_at {
                info!("persisted catalog index is stale; rebuilding");
                return None;
            }
        }

        match CatalogIndex::load(&self.index_dir, credential, self.embedder.dimensions()) {
            Ok(index) => Some(index),
            Err(err) => {
                warn!("discarding persisted catalog index: {err}");
                None
            }
        }
    }
}
