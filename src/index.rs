//! Process-wide retrieval index with a degradation ladder.
//!
//! [`RetrievalIndex`] owns every indexed chunk, grouped by namespace
//! (`provider` for the knowledge base, `company:<name>` for acquired sites).
//! Report grounding goes through [`RetrievalIndex::search_knowledge`], which
//! reads the knowledge base and the requesting company's own site only.
//! The search strategy is fixed when the index is constructed:
//!
//! | Tier | Strategy | When |
//! |------|----------|------|
//! | `remote` / `local` | cosine similarity over embeddings | an embedding backend answered at startup |
//! | `keyword` | distinct-token overlap count | no backend, or the query embedding failed |
//! | defaults | `retrieval.fallback_context` sentences | nothing has been built yet |
//!
//! Reads never block on a rebuild: [`RetrievalIndex::build`] prepares a new
//! snapshot off to the side and swaps it in under a short write lock, so an
//! in-flight search keeps reading the snapshot it started with.
//!
//! When a SQLite pool is attached, each build replaces its namespace's rows
//! in one transaction and [`RetrievalIndex::load`] restores every namespace
//! at startup.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{self, cosine_similarity, Embedder, Tier};
use crate::models::{Chunk, Outcome, SearchHit};
use crate::{db, migrate};

/// Namespace reported on default-context hits.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Prefix of namespaces that hold one company's acquired site.
const COMPANY_PREFIX: &str = "company:";

/// Namespaces a search reads.
#[derive(Debug, Clone, Copy)]
enum Scope<'a> {
    All,
    Namespace(&'a str),
    /// Every knowledge-base namespace plus the named company's own site.
    /// Other companies' sites are never visible.
    KnowledgeFor(Option<&'a str>),
}

impl Scope<'_> {
    fn includes(&self, namespace: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Namespace(only) => *only == namespace,
            Scope::KnowledgeFor(company) => match namespace.strip_prefix(COMPANY_PREFIX) {
                None => true,
                Some(site) => company.is_some_and(|c| {
                    site.trim().to_lowercase() == c.trim().to_lowercase()
                }),
            },
        }
    }
}

/// How queries are answered, chosen once at construction.
#[derive(Clone)]
pub enum SearchStrategy {
    Semantic(Arc<dyn Embedder>),
    Keyword,
}

impl SearchStrategy {
    pub fn tier(&self) -> Tier {
        match self {
            SearchStrategy::Semantic(e) => e.tier(),
            SearchStrategy::Keyword => Tier::Keyword,
        }
    }

    fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        match self {
            SearchStrategy::Semantic(e) => Some(e),
            SearchStrategy::Keyword => None,
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Chunk,
    vector: Option<Vec<f32>>,
}

/// Immutable view of the index. Namespaces keep the order in which they
/// were first built, which is the tie-break order for keyword scoring.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    namespaces: Vec<(String, Arc<Vec<IndexedChunk>>)>,
}

impl Snapshot {
    fn is_empty(&self) -> bool {
        self.namespaces.iter().all(|(_, chunks)| chunks.is_empty())
    }

    fn with_namespace(&self, namespace: &str, chunks: Vec<IndexedChunk>) -> Snapshot {
        let mut next = self.clone();
        match next.namespaces.iter().position(|(ns, _)| ns == namespace) {
            Some(i) if chunks.is_empty() => {
                next.namespaces.remove(i);
            }
            Some(i) => next.namespaces[i].1 = Arc::new(chunks),
            None if chunks.is_empty() => {}
            None => next
                .namespaces
                .push((namespace.to_string(), Arc::new(chunks))),
        }
        next
    }

    fn entries<'a>(
        &'a self,
        scope: Scope<'a>,
    ) -> impl Iterator<Item = (&'a str, &'a IndexedChunk)> + 'a {
        self.namespaces
            .iter()
            .filter(move |(ns, _)| scope.includes(ns))
            .flat_map(|(ns, chunks)| chunks.iter().map(move |c| (ns.as_str(), c)))
    }
}

pub struct RetrievalIndex {
    strategy: SearchStrategy,
    pool: Option<SqlitePool>,
    snapshot: RwLock<Arc<Snapshot>>,
    build_lock: tokio::sync::Mutex<()>,
    fallback: Vec<String>,
}

impl RetrievalIndex {
    /// In-memory index. Attach persistence with [`RetrievalIndex::with_pool`].
    pub fn new(strategy: SearchStrategy, fallback: Vec<String>) -> Self {
        Self {
            strategy,
            pool: None,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            build_lock: tokio::sync::Mutex::new(()),
            fallback,
        }
    }

    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Select the embedding tier, open the database and restore any
    /// persisted namespaces.
    pub async fn open(config: &Config) -> Result<Self> {
        let strategy = match embedding::select_embedder(&config.embedding).await {
            Some(embedder) => SearchStrategy::Semantic(embedder),
            None => SearchStrategy::Keyword,
        };

        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;

        let index =
            Self::new(strategy, config.retrieval.fallback_context.clone()).with_pool(pool);
        let restored = index.load().await?;
        info!(tier = %index.tier(), chunks = restored, "retrieval index ready");
        Ok(index)
    }

    pub fn tier(&self) -> Tier {
        self.strategy.tier()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// `(namespace, chunk count)` in build order.
    pub fn namespaces(&self) -> Vec<(String, usize)> {
        self.current()
            .namespaces
            .iter()
            .map(|(ns, chunks)| (ns.clone(), chunks.len()))
            .collect()
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn swap(&self, next: Snapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    // ============ Build ============

    /// Embed and store `chunks` as the complete contents of `namespace`,
    /// replacing whatever it held before. Returns the number of chunks stored.
    ///
    /// An embedding failure stores the chunks without vectors (they remain
    /// reachable through keyword scoring). A persistence failure leaves the
    /// live snapshot untouched.
    pub async fn build(&self, namespace: &str, chunks: Vec<Chunk>) -> Result<usize> {
        let _guard = self.build_lock.lock().await;

        let vectors = self.embed_chunks(namespace, &chunks).await;
        let model = self.strategy.embedder().map(|e| e.model_name().to_string());
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();

        if let Some(pool) = &self.pool {
            persist_namespace(pool, namespace, &indexed, model.as_deref())
                .await
                .with_context(|| format!("Failed to persist namespace '{}'", namespace))?;
        }

        let count = indexed.len();
        let next = self.current().with_namespace(namespace, indexed);
        self.swap(next);

        info!(namespace, chunks = count, tier = %self.tier(), "index namespace built");
        Ok(count)
    }

    async fn embed_chunks(&self, namespace: &str, chunks: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        let Some(embedder) = self.strategy.embedder() else {
            return vec![None; chunks.len()];
        };
        if chunks.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == chunks.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                warn!(
                    namespace,
                    expected = chunks.len(),
                    got = vectors.len(),
                    "embedding count mismatch, storing chunks for keyword scoring"
                );
                vec![None; chunks.len()]
            }
            Err(e) => {
                warn!(namespace, error = %e, "embedding failed, storing chunks for keyword scoring");
                vec![None; chunks.len()]
            }
        }
    }

    /// Restore every persisted namespace. Vectors written by a different
    /// model are re-embedded with the active one, or dropped if that fails.
    pub async fn load(&self) -> Result<usize> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };
        let _guard = self.build_lock.lock().await;

        let rows = sqlx::query(
            "SELECT namespace, content, metadata_json, hash, model, vector \
             FROM index_chunks ORDER BY created_at, namespace, position",
        )
        .fetch_all(pool)
        .await
        .context("Failed to read persisted index")?;

        let active_model = self.strategy.embedder().map(|e| e.model_name().to_string());
        let mut grouped: Vec<(String, Vec<IndexedChunk>)> = Vec::new();
        let mut stale: BTreeSet<String> = BTreeSet::new();

        for row in &rows {
            let namespace: String = row.get("namespace");
            let metadata_json: String = row.get("metadata_json");
            let model: Option<String> = row.get("model");
            let blob: Option<Vec<u8>> = row.get("vector");

            let metadata: BTreeMap<String, String> =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            let vector = match (&active_model, &model, blob) {
                (Some(active), Some(stored), Some(blob)) if active == stored => {
                    Some(embedding::blob_to_vec(&blob))
                }
                (Some(_), _, _) => {
                    stale.insert(namespace.clone());
                    None
                }
                (None, _, _) => None,
            };

            let chunk = IndexedChunk {
                chunk: Chunk {
                    content: row.get("content"),
                    metadata,
                    hash: row.get("hash"),
                },
                vector,
            };
            match grouped.iter_mut().find(|(ns, _)| *ns == namespace) {
                Some((_, chunks)) => chunks.push(chunk),
                None => grouped.push((namespace, vec![chunk])),
            }
        }

        let mut snapshot = Snapshot::default();
        let mut total = 0;
        for (namespace, mut chunks) in grouped {
            if stale.contains(&namespace) {
                let plain: Vec<Chunk> = chunks.iter().map(|c| c.chunk.clone()).collect();
                info!(namespace = %namespace, "re-embedding chunks written by another model");
                let vectors = self.embed_chunks(&namespace, &plain).await;
                for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                    chunk.vector = vector;
                }
                if chunks.iter().all(|c| c.vector.is_some()) {
                    persist_namespace(pool, &namespace, &chunks, active_model.as_deref())
                        .await?;
                }
            }
            total += chunks.len();
            snapshot = snapshot.with_namespace(&namespace, chunks);
        }

        self.swap(snapshot);
        Ok(total)
    }

    // ============ Search ============

    /// Top-`k` chunks across all namespaces. Never fails; returns at most
    /// `k` hits. Zero hits means no enrichment is available.
    pub async fn search(&self, query: &str, k: usize) -> Outcome<Vec<SearchHit>> {
        self.search_in(Scope::All, query, k).await
    }

    /// Top-`k` chunks within one namespace.
    pub async fn search_namespace(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> Outcome<Vec<SearchHit>> {
        self.search_in(Scope::Namespace(namespace), query, k).await
    }

    /// Top-`k` knowledge-base chunks for a report about `company`. Sites
    /// acquired for other companies are excluded.
    pub async fn search_knowledge(
        &self,
        company: Option<&str>,
        query: &str,
        k: usize,
    ) -> Outcome<Vec<SearchHit>> {
        self.search_in(Scope::KnowledgeFor(company), query, k).await
    }

    async fn search_in(&self, scope: Scope<'_>, query: &str, k: usize) -> Outcome<Vec<SearchHit>> {
        if k == 0 {
            return Outcome::Ok(Vec::new());
        }

        let snapshot = self.current();
        let candidates: Vec<(&str, &IndexedChunk)> = snapshot.entries(scope).collect();
        if candidates.is_empty() {
            let reason = match scope {
                Scope::Namespace(ns) => format!("namespace '{}' has not been built", ns),
                Scope::KnowledgeFor(_) => "no knowledge base has been built".to_string(),
                Scope::All => "index has not been built".to_string(),
            };
            debug!(%reason, "serving default context");
            return Outcome::degraded(reason, self.default_hits(k));
        }

        let Some(embedder) = self.strategy.embedder() else {
            return Outcome::Ok(keyword_rank(&candidates, query, k));
        };

        let with_vectors: Vec<(&str, &IndexedChunk)> = candidates
            .iter()
            .copied()
            .filter(|(_, c)| c.vector.is_some())
            .collect();
        if with_vectors.is_empty() {
            return Outcome::degraded(
                "no embedded chunks available, used keyword scoring",
                keyword_rank(&candidates, query, k),
            );
        }

        match embedding::embed_query(embedder.as_ref(), query).await {
            Ok(query_vec) => Outcome::Ok(semantic_rank(&with_vectors, &query_vec, k)),
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to keyword scoring");
                Outcome::degraded(
                    format!("query embedding failed: {}", e),
                    keyword_rank(&candidates, query, k),
                )
            }
        }
    }

    fn default_hits(&self, k: usize) -> Vec<SearchHit> {
        self.fallback
            .iter()
            .take(k)
            .map(|sentence| {
                let mut metadata = BTreeMap::new();
                metadata.insert("source".to_string(), DEFAULT_NAMESPACE.to_string());
                SearchHit {
                    content: sentence.clone(),
                    metadata,
                    namespace: DEFAULT_NAMESPACE.to_string(),
                    score: 0.0,
                }
            })
            .collect()
    }
}

// ============ Scoring ============

/// Distinct lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn keyword_rank(candidates: &[(&str, &IndexedChunk)], query: &str, k: usize) -> Vec<SearchHit> {
    let query_tokens = tokenize(query);
    let mut scored: Vec<(usize, &str, &IndexedChunk)> = candidates
        .iter()
        .map(|(ns, c)| {
            let tokens = tokenize(&c.chunk.content);
            let score = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
            (score, *ns, *c)
        })
        .filter(|(score, _, _)| *score > 0)
        .collect();

    // Stable: equal scores keep insertion order.
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(k)
        .map(|(score, ns, c)| to_hit(ns, c, score as f32))
        .collect()
}

fn semantic_rank(candidates: &[(&str, &IndexedChunk)], query_vec: &[f32], k: usize) -> Vec<SearchHit> {
    let mut scored: Vec<(f32, &str, &IndexedChunk)> = candidates
        .iter()
        .filter_map(|(ns, c)| {
            c.vector
                .as_ref()
                .map(|v| (cosine_similarity(query_vec, v), *ns, *c))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(k)
        .map(|(score, ns, c)| to_hit(ns, c, score))
        .collect()
}

fn to_hit(namespace: &str, c: &IndexedChunk, score: f32) -> SearchHit {
    SearchHit {
        content: c.chunk.content.clone(),
        metadata: c.chunk.metadata.clone(),
        namespace: namespace.to_string(),
        score,
    }
}

// ============ Persistence ============

async fn persist_namespace(
    pool: &SqlitePool,
    namespace: &str,
    chunks: &[IndexedChunk],
    model: Option<&str>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    // A rebuilt namespace keeps its original restore position.
    let first_built: Option<i64> =
        sqlx::query_scalar("SELECT MIN(created_at) FROM index_chunks WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&mut *tx)
            .await?;
    let created_at = first_built.unwrap_or_else(|| chrono::Utc::now().timestamp_micros());

    sqlx::query("DELETE FROM index_chunks WHERE namespace = ?")
        .bind(namespace)
        .execute(&mut *tx)
        .await?;

    for (position, c) in chunks.iter().enumerate() {
        let metadata_json = serde_json::to_string(&c.chunk.metadata)?;
        let (vector, dims, row_model) = match &c.vector {
            Some(v) => (Some(embedding::vec_to_blob(v)), v.len() as i64, model),
            None => (None, 0, None),
        };
        sqlx::query(
            "INSERT INTO index_chunks \
             (namespace, position, content, metadata_json, hash, model, dims, vector, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(namespace)
        .bind(position as i64)
        .bind(&c.chunk.content)
        .bind(&metadata_json)
        .bind(&c.chunk.hash)
        .bind(row_model)
        .bind(dims)
        .bind(vector)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
