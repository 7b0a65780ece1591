//! # CatalogIndex
//!
//! Searchable vector index over embedded catalog chunks.
//!
//! This module wraps a [HNSW](https://arxiv.org/abs/1603.09320)
//! approximate nearest-neighbor index (`hora` crate) together with an
//! ID↔chunk mapping, so a similarity hit can be resolved back to the
//! passage text and its source document.
//!
//! ## Responsibilities
//! - **Build**: insert pre-embedded chunks and finalize the HNSW graph.
//! - **Query**: nearest-neighbor lookup, best (smallest distance) first.
//! - **Persistence**: the index is dumped to a binary file and the chunk
//!   metadata to a YAML sidecar; both file names derive from the sha256
//!   digest of the cache key so one directory can hold an index per
//!   credential.
//!
//! Build and query share the same metric (Euclidean), and every vector
//! must match the dimensionality fixed at build time.
//!
//! ## Quick Example
//! ```no_run
//! use guichet::vector_index::{CatalogIndex, IndexedChunk};
//!
//! # fn main() -> Result<(), guichet::error::EngineError> {
//! let chunk = IndexedChunk { text: "Entry doors ship in 30 days.".into(), source_id: "faq.pdf".into() };
//! let index = CatalogIndex::build(3, vec![(chunk, vec![0.1, 0.2, 0.3])])?;
//! let hits = index.query(&[0.1, 0.2, 0.3], 1)?;
//! println!("best match: {}", hits[0].0.text);
//! # Ok(()) }
//! ```

use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// One retrievable passage: the unit of embedding and retrieval.
///
/// Immutable once indexed; chunks only go away with a full rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// The passage text handed to the context assembler on a hit.
    pub text: String,
    /// The document the passage was cut from.
    pub source_id: String,
}

/// Persisted sidecar: everything except the HNSW graph itself.
#[derive(Serialize, Deserialize)]
struct IndexMetadata {
    dimension: usize,
    current_id: usize,
    chunks: HashMap<usize, IndexedChunk>,
}

/// Vector index over one catalog, fixed to one embedding dimensionality.
#[derive(Debug)]
pub struct CatalogIndex {
    /// ANN index for similarity search.
    index: HNSWIndex<f32, usize>,
    /// Dimensionality shared by every stored and queried vector.
    dimension: usize,
    /// Next ID a rebuild would assign; persisted for integrity checks.
    current_id: usize,
    /// Mapping from ID → indexed chunk.
    chunks: HashMap<usize, IndexedChunk>,
}

impl CatalogIndex {
    /// Construct a searchable index from pre-embedded chunks.
    ///
    /// # Errors
    /// - [`EngineError::EmptyCorpus`] when `embedded` is empty.
    /// - [`EngineError::Configuration`] when a vector does not match
    ///   `dimension`.
    /// - [`EngineError::CorruptIndex`] when the HNSW graph rejects an
    ///   insert or fails to finalize.
    pub fn build(dimension: usize, embedded: Vec<(IndexedChunk, Vec<f32>)>) -> Result<Self> {
        if embedded.is_empty() {
            return Err(EngineError::EmptyCorpus);
        }

        let mut index = HNSWIndex::new(dimension, &HNSWParams::default());
        let mut chunks = HashMap::new();

        for (id, (chunk, vector)) in embedded.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(EngineError::Configuration(format!(
                    "chunk embedding has {} dimensions, expected {dimension}",
                    vector.len()
                )));
            }
            index
                .add(&vector, id)
                .map_err(|e| EngineError::CorruptIndex(format!("index insert failed: {e}")))?;
            chunks.insert(id, chunk);
        }

        let current_id = chunks.len();
        index
            .build(Metric::Euclidean)
            .map_err(|e| EngineError::CorruptIndex(format!("index build failed: {e}")))?;

        Ok(Self {
            index,
            dimension,
            current_id,
            chunks,
        })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dimensionality the index was built with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Query for the `k` chunks nearest to `embedding`.
    ///
    /// Returns `(chunk, distance)` pairs ordered by ascending Euclidean
    /// distance, i.e. best match first; at most `k` results. `k` is
    /// clamped to at least 1.
    ///
    /// # Errors
    /// [`EngineError::Configuration`] when the query vector does not match
    /// the index dimensionality.
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<(&IndexedChunk, f32)>> {
        if embedding.len() != self.dimension {
            return Err(EngineError::Configuration(format!(
                "query embedding has {} dimensions, index expects {}",
                embedding.len(),
                self.dimension
            )));
        }

        let mut hits = Vec::new();
        for (node, distance) in self.index.search_nodes(embedding, k.max(1)) {
            if let Some(id) = node.idx() {
                if let Some(chunk) = self.chunks.get(id) {
                    hits.push((chunk, distance));
                }
            }
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hits)
    }

    fn file_stem(key: &str) -> String {
        sha256::digest(key)
    }

    /// Path of the YAML metadata sidecar for `key` under `dir`.
    pub fn metadata_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.meta.yaml", Self::file_stem(key)))
    }

    /// Path of the binary HNSW dump for `key` under `dir`.
    pub fn index_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.hnsw.bin", Self::file_stem(key)))
    }

    /// Dump the HNSW graph to a binary file and the chunk metadata to a
    /// YAML sidecar under `dir`, named by the sha256 digest of `key`.
    pub fn persist(&mut self, dir: &Path, key: &str) -> Result<()> {
        fs::create_dir_all(dir)?;

        let index_path = Self::index_path(dir, key);
        let index_path = index_path
            .to_str()
            .ok_or_else(|| EngineError::CorruptIndex("index path is not valid UTF-8".into()))?;
        self.index
            .dump(index_path)
            .map_err(|e| EngineError::CorruptIndex(format!("index dump failed: {e}")))?;

        let metadata = IndexMetadata {
            dimension: self.dimension,
            current_id: self.current_id,
            chunks: self.chunks.clone(),
        };
        fs::write(
            Self::metadata_path(dir, key),
            serde_yaml::to_string(&metadata)?,
        )?;
        Ok(())
    }

    /// Reconstruct an index from a persisted binary dump and its sidecar.
    ///
    /// # Errors
    /// [`EngineError::CorruptIndex`] when either file is missing or
    /// unreadable, or when the stored dimensionality does not match
    /// `expected_dimension`.
    pub fn load(dir: &Path, key: &str, expected_dimension: usize) -> Result<Self> {
        let metadata_text = fs::read_to_string(Self::metadata_path(dir, key))
            .map_err(|e| EngineError::CorruptIndex(format!("unreadable index metadata: {e}")))?;
        let metadata: IndexMetadata = serde_yaml::from_str(&metadata_text)
            .map_err(|e| EngineError::CorruptIndex(format!("invalid index metadata: {e}")))?;

        if metadata.dimension != expected_dimension {
            return Err(EngineError::CorruptIndex(format!(
                "stored index dimension {} does not match configured embedding size {}",
                metadata.dimension, expected_dimension
            )));
        }

        let index_path = Self::index_path(dir, key);
        let index_path = index_path
            .to_str()
            .ok_or_else(|| EngineError::CorruptIndex("index path is not valid UTF-8".into()))?;
        let index = HNSWIndex::load(index_path)
            .map_err(|e| EngineError::CorruptIndex(format!("index load failed: {e}")))?;

        Ok(Self {
            index,
            dimension: metadata.dimension,
            current_id: metadata.current_id,
            chunks: metadata.chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> IndexedChunk {
        IndexedChunk {
            text: text.to_string(),
            source_id: "catalog.pdf".to_string(),
        }
    }

    fn sample_index() -> CatalogIndex {
        CatalogIndex::build(
            3,
            vec![
                (chunk("doors"), vec![1.0, 0.0, 0.0]),
                (chunk("glazing"), vec![0.0, 1.0, 0.0]),
                (chunk("blinds"), vec![0.0, 0.0, 1.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn build_rejects_empty_corpus() {
        let err = CatalogIndex::build(3, vec![]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyCorpus));
    }

    #[test]
    fn build_rejects_dimension_mismatch() {
        let err = CatalogIndex::build(3, vec![(chunk("doors"), vec![1.0, 0.0])]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn query_returns_at_most_k_ordered_by_distance() {
        let index = sample_index();
        let hits = index.query(&[0.9, 0.1, 0.0], 2).unwrap();

        assert!(hits.len() <= 2);
        assert_eq!(hits[0].0.text, "doors");
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn query_clamps_k_to_one() {
        let index = sample_index();
        let hits = index.query(&[1.0, 0.0, 0.0], 0).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn query_rejects_wrong_dimension() {
        let index = sample_index();
        let err = index.query(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = sample_index();
        index.persist(dir.path(), "credential-a").unwrap();

        let reloaded = CatalogIndex::load(dir.path(), "credential-a", 3).unwrap();
        assert_eq!(reloaded.len(), 3);
        let hits = reloaded.query(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].0.text, "glazing");
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = sample_index();
        index.persist(dir.path(), "credential-a").unwrap();

        let err = CatalogIndex::load(dir.path(), "credential-a", 1536).unwrap_err();
        assert!(matches!(err, EngineError::CorruptIndex(_)));
    }

    #[test]
    fn load_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = CatalogIndex::load(dir.path(), "nothing-here", 3).unwrap_err();
        assert!(matches!(err, EngineError::CorruptIndex(_)));
    }
}
