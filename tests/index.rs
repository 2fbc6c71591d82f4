//! Retrieval index persistence and concurrency tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use readiness_report::chunk::content_hash;
use readiness_report::config::Config;
use readiness_report::db;
use readiness_report::embedding::{Embedder, Tier};
use readiness_report::index::{RetrievalIndex, SearchStrategy};
use readiness_report::migrate;
use readiness_report::models::Chunk;

fn chunk(text: &str) -> Chunk {
    let mut metadata = BTreeMap::new();
    metadata.insert("company".to_string(), "Beacon".to_string());
    Chunk {
        content: text.to_string(),
        metadata,
        hash: content_hash(text),
    }
}

/// Two-dimensional vectors keyed on a pair of marker words.
struct MarkerEmbedder {
    model: String,
    calls: AtomicUsize,
}

impl MarkerEmbedder {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for MarkerEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn tier(&self) -> Tier {
        Tier::Remote
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                vec![
                    t.matches("cloud").count() as f32 + 0.01,
                    t.matches("people").count() as f32 + 0.01,
                ]
            })
            .collect())
    }
}

async fn pool_in(dir: &std::path::Path) -> sqlx::SqlitePool {
    let mut config = Config::minimal();
    config.db.path = dir.join("index.sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::ensure_schema(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn test_namespaces_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(dir.path()).await;

    let first = RetrievalIndex::new(SearchStrategy::Keyword, vec![]).with_pool(pool.clone());
    first
        .build("provider", vec![chunk("AI literacy workshops"), chunk("pilot programs")])
        .await
        .unwrap();
    first
        .build("company:acme", vec![chunk("Acme ships freight")])
        .await
        .unwrap();

    let restored = RetrievalIndex::new(SearchStrategy::Keyword, vec![]).with_pool(pool);
    assert!(restored.is_empty());
    assert_eq!(restored.load().await.unwrap(), 3);
    let mut expected = first.namespaces();
    let mut got = restored.namespaces();
    expected.sort();
    got.sort();
    assert_eq!(got, expected);

    let hits = restored
        .search_namespace("provider", "literacy workshops", 1)
        .await
        .into_value();
    assert_eq!(hits[0].content, "AI literacy workshops");
    assert_eq!(hits[0].metadata["company"], "Beacon");
}

#[tokio::test]
async fn test_rebuild_replaces_persisted_rows() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(dir.path()).await;

    let index = RetrievalIndex::new(SearchStrategy::Keyword, vec![]).with_pool(pool.clone());
    index
        .build("provider", vec![chunk("old catalog"), chunk("older catalog")])
        .await
        .unwrap();
    index.build("provider", vec![chunk("new catalog")]).await.unwrap();

    let restored = RetrievalIndex::new(SearchStrategy::Keyword, vec![]).with_pool(pool);
    assert_eq!(restored.load().await.unwrap(), 1);
    let hits = restored.search("catalog", 5).await.into_value();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "new catalog");
}

#[tokio::test]
async fn test_rebuilt_namespace_keeps_restore_position() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(dir.path()).await;

    let index = RetrievalIndex::new(SearchStrategy::Keyword, vec![]).with_pool(pool.clone());
    index
        .build("company:acme", vec![chunk("Acme shared training calendar")])
        .await
        .unwrap();
    index
        .build("provider", vec![chunk("Beacon shared training calendar")])
        .await
        .unwrap();
    index
        .build("company:acme", vec![chunk("Acme revised training calendar")])
        .await
        .unwrap();

    let restored = RetrievalIndex::new(SearchStrategy::Keyword, vec![]).with_pool(pool);
    restored.load().await.unwrap();
    assert_eq!(restored.namespaces(), index.namespaces());

    // Equal keyword scores fall back to namespace order.
    let before: Vec<String> = index
        .search("training calendar", 2)
        .await
        .into_value()
        .into_iter()
        .map(|h| h.content)
        .collect();
    let after: Vec<String> = restored
        .search("training calendar", 2)
        .await
        .into_value()
        .into_iter()
        .map(|h| h.content)
        .collect();
    assert_eq!(before, vec!["Acme revised training calendar", "Beacon shared training calendar"]);
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_vectors_from_another_model_are_reembedded() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(dir.path()).await;

    let old = Arc::new(MarkerEmbedder::new("model-a"));
    let index = RetrievalIndex::new(SearchStrategy::Semantic(old), vec![]).with_pool(pool.clone());
    index
        .build("provider", vec![chunk("cloud cloud migration"), chunk("people programs")])
        .await
        .unwrap();

    let new = Arc::new(MarkerEmbedder::new("model-b"));
    let restored =
        RetrievalIndex::new(SearchStrategy::Semantic(new.clone()), vec![]).with_pool(pool.clone());
    assert_eq!(restored.load().await.unwrap(), 2);
    assert_eq!(new.calls.load(Ordering::SeqCst), 1);

    let hits = restored.search("people", 1).await;
    assert!(!hits.is_degraded());
    assert_eq!(hits.into_value()[0].content, "people programs");

    // Rewritten under the new model, so a second restart embeds nothing.
    let again = Arc::new(MarkerEmbedder::new("model-b"));
    let third = RetrievalIndex::new(SearchStrategy::Semantic(again.clone()), vec![]).with_pool(pool);
    third.load().await.unwrap();
    assert_eq!(again.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_index_serves_defaults() {
    let index = RetrievalIndex::new(
        SearchStrategy::Keyword,
        vec!["Start with executive sponsorship.".to_string()],
    );
    let out = index.search("anything at all", 5).await;
    assert!(out.is_degraded());
    assert_eq!(out.into_value().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_see_whole_snapshots_during_rebuild() {
    let index = Arc::new(RetrievalIndex::new(SearchStrategy::Keyword, vec![]));
    let generation = |g: usize| -> Vec<Chunk> {
        (0..20)
            .map(|i| chunk(&format!("gen{} training item {}", g, i)))
            .collect()
    };
    index.build("provider", generation(0)).await.unwrap();

    let writer = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for g in 1..=25 {
                index.build("provider", generation(g)).await.unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let index = Arc::clone(&index);
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                let hits = index.search("training", 20).await.into_value();
                assert_eq!(hits.len(), 20);
                let tag = hits[0].content.split(' ').next().unwrap().to_string();
                assert!(hits.iter().all(|h| h.content.starts_with(&format!("{} ", tag))));
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    let hits = index.search("training", 1).await.into_value();
    assert!(hits[0].content.starts_with("gen25 "));
}
