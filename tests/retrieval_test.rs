mod helpers;

use std::sync::Arc;

use helpers::{StubEmbedder, toy_embedding, test_config};
use guichet::catalog::CatalogLoader;
use guichet::index_cache::IndexCache;
use guichet::vector_index::{CatalogIndex, IndexedChunk};

fn chunk(text: &str, source_id: &str) -> IndexedChunk {
    IndexedChunk {
        text: text.to_string(),
        source_id: source_id.to_string(),
    }
}

fn embedded(texts: &[(&str, &str)], dim: usize) -> Vec<(IndexedChunk, Vec<f32>)> {
    texts
        .iter()
        .map(|(text, source)| (chunk(text, source), toy_embedding(text, dim)))
        .collect()
}

#[test]
fn querying_bonjour_returns_the_bonjour_passage() {
    let dim = 26;
    let index = CatalogIndex::build(
        dim,
        embedded(
            &[
                ("Bonjour FAISS", "greetings.pdf"),
                (
                    "Livraison et retours sous trente jours avec facture",
                    "returns.pdf",
                ),
            ],
            dim,
        ),
    )
    .unwrap();

    let hits = index.query(&toy_embedding("Bonjour", dim), 1).unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].0.text.contains("Bonjour FAISS"));
}

#[test]
fn results_are_bounded_by_k_and_ordered_best_first() {
    let dim = 26;
    let index = CatalogIndex::build(
        dim,
        embedded(
            &[
                ("entry doors and frames", "doors.pdf"),
                ("sliding glazing systems", "glazing.pdf"),
                ("outdoor blinds and shades", "blinds.pdf"),
            ],
            dim,
        ),
    )
    .unwrap();

    let hits = index.query(&toy_embedding("entry doors", dim), 10).unwrap();

    assert!(hits.len() <= 3);
    for pair in hits.windows(2) {
        assert!(pair[0].1 <= pair[1].1, "distances must not decrease");
    }
    assert_eq!(hits[0].0.source_id, "doors.pdf");
}

#[tokio::test]
async fn newer_catalog_documents_invalidate_the_persisted_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, "http://localhost:0");
    std::fs::write(
        std::path::Path::new(&config.catalog_dir).join("doors.txt"),
        "Entry doors ship in 30 days.",
    )
    .unwrap();

    let loader = Arc::new(CatalogLoader::new(&config.catalog_dir));
    let cache = IndexCache::new(loader.clone(), Arc::new(StubEmbedder::new(8)), &config);
    let first = cache.get_or_build("k").await.unwrap();
    assert_eq!(first.len(), 1);

    // mtime granularity on some filesystems is one second
    std::thread::sleep(std::time::Duration::from_millis(1100));
    std::fs::write(
        std::path::Path::new(&config.catalog_dir).join("glazing.txt"),
        "Glazing panels carry a five year warranty.",
    )
    .unwrap();

    // A cold cache must notice the newer document and rebuild.
    let cold_cache = IndexCache::new(loader, Arc::new(StubEmbedder::new(8)), &config);
    let rebuilt = cold_cache.get_or_build("k").await.unwrap();
    assert_eq!(rebuilt.len(), 2);
}
