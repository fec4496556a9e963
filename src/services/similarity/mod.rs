use crate::algorithms::{pairwise_sweep, BagOfWords, ScoredPair, SweepControl, TopicModel};
use crate::config::{SimilarityConfig, TrainingConfig};
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::utils::{descending, is_write_conflict, retry_with_backoff};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct NewEdge {
    pub source_item_id: ItemId,
    pub target_item_id: ItemId,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeUpdate {
    pub edge_id: i64,
    pub similarity: f64,
}

/// Version an edge batch is attributed to.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionRef {
    /// Created together with the edges, as the last step of a training run.
    New(NewSimilarityVersion),
    Existing(i64),
}

/// One atomic write: optional version insert, edge inserts and updates,
/// then the zero-similarity purge for the item type.
#[derive(Debug, Clone)]
pub struct SimilarityCommit {
    pub item_type: ItemType,
    pub version: VersionRef,
    pub inserts: Vec<NewEdge>,
    pub updates: Vec<EdgeUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub version_id: i64,
    pub inserted: usize,
    pub updated: usize,
    pub purged: usize,
}

#[async_trait]
pub trait SimilarityRepository: Send + Sync {
    async fn latest_version(&self, item_type: ItemType) -> Result<Option<SimilarityVersion>>;

    async fn versions(&self, item_type: ItemType) -> Result<Vec<SimilarityVersion>>;

    async fn edges_for_type(&self, item_type: ItemType) -> Result<Vec<SimilarityEdge>>;

    async fn edges_for_item(
        &self,
        item_type: ItemType,
        item_id: ItemId,
        min_similarity: f64,
    ) -> Result<Vec<SimilarityEdge>>;

    /// Applies the whole commit or nothing. A pair that already has an edge
    /// or an update whose edge vanished yields `StoreWriteConflict`.
    async fn commit(&self, commit: SimilarityCommit) -> Result<CommitReceipt>;
}

#[derive(Default)]
struct MemoryState {
    versions: Vec<SimilarityVersion>,
    edges: BTreeMap<i64, SimilarityEdge>,
    next_version_id: i64,
    next_edge_id: i64,
}

#[derive(Default)]
pub struct InMemorySimilarityRepository {
    state: RwLock<MemoryState>,
}

impl InMemorySimilarityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimilarityRepository for InMemorySimilarityRepository {
    async fn latest_version(&self, item_type: ItemType) -> Result<Option<SimilarityVersion>> {
        let state = self.state.read();
        Ok(state
            .versions
            .iter()
            .filter(|version| version.item_type == item_type)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn versions(&self, item_type: ItemType) -> Result<Vec<SimilarityVersion>> {
        let state = self.state.read();
        let mut versions: Vec<SimilarityVersion> = state
            .versions
            .iter()
            .filter(|version| version.item_type == item_type)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(versions)
    }

    async fn edges_for_type(&self, item_type: ItemType) -> Result<Vec<SimilarityEdge>> {
        let state = self.state.read();
        Ok(state
            .edges
            .values()
            .filter(|edge| edge.item_type == item_type)
            .cloned()
            .collect())
    }

    async fn edges_for_item(
        &self,
        item_type: ItemType,
        item_id: ItemId,
        min_similarity: f64,
    ) -> Result<Vec<SimilarityEdge>> {
        let state = self.state.read();
        Ok(state
            .edges
            .values()
            .filter(|edge| {
                edge.item_type == item_type
                    && edge.similarity >= min_similarity
                    && edge.other_end(item_id).is_some()
            })
            .cloned()
            .collect())
    }

    async fn commit(&self, commit: SimilarityCommit) -> Result<CommitReceipt> {
        let mut state = self.state.write();

        // Validate everything before touching state.
        let existing_pairs: HashMap<(ItemId, ItemId), i64> = state
            .edges
            .values()
            .filter(|edge| edge.item_type == commit.item_type)
            .map(|edge| (edge.pair_key(), edge.id))
            .collect();
        for insert in &commit.inserts {
            if existing_pairs.contains_key(&pair_key(insert.source_item_id, insert.target_item_id)) {
                return Err(RecommenderError::StoreWriteConflict(format!(
                    "edge ({}, {}) already exists for {}",
                    insert.source_item_id, insert.target_item_id, commit.item_type
                )));
            }
        }
        for update in &commit.updates {
            if !state.edges.contains_key(&update.edge_id) {
                return Err(RecommenderError::StoreWriteConflict(format!(
                    "edge {} no longer exists",
                    update.edge_id
                )));
            }
        }

        let version_id = match commit.version {
            VersionRef::New(new_version) => {
                state.next_version_id += 1;
                let id = state.next_version_id;
                state.versions.push(SimilarityVersion {
                    id,
                    item_type: new_version.item_type,
                    created_at: new_version.created_at,
                    n_topics: new_version.n_topics,
                    n_items_at_training_time: new_version.n_items_at_training_time,
                });
                id
            }
            VersionRef::Existing(id) => {
                if !state.versions.iter().any(|version| version.id == id) {
                    return Err(RecommenderError::MissingSimilarityData {
                        item_type: commit.item_type,
                    });
                }
                id
            }
        };

        for update in &commit.updates {
            if let Some(edge) = state.edges.get_mut(&update.edge_id) {
                edge.similarity = update.similarity;
                edge.version_id = version_id;
            }
        }

        for insert in &commit.inserts {
            state.next_edge_id += 1;
            let id = state.next_edge_id;
            state.edges.insert(
                id,
                SimilarityEdge {
                    id,
                    source_item_id: insert.source_item_id,
                    target_item_id: insert.target_item_id,
                    item_type: commit.item_type,
                    similarity: insert.similarity,
                    version_id,
                },
            );
        }

        let before = state.edges.len();
        state
            .edges
            .retain(|_, edge| !(edge.item_type == commit.item_type && edge.similarity == 0.0));
        let purged = before - state.edges.len();

        Ok(CommitReceipt {
            version_id,
            inserted: commit.inserts.len(),
            updated: commit.updates.len(),
            purged,
        })
    }
}

/// Computes, persists and serves pairwise similarity edges.
pub struct SimilarityStore {
    repository: Arc<dyn SimilarityRepository>,
    config: SimilarityConfig,
    max_write_retries: usize,
    retry_initial_delay: Duration,
}

impl SimilarityStore {
    pub fn new(
        repository: Arc<dyn SimilarityRepository>,
        config: SimilarityConfig,
        training: &TrainingConfig,
    ) -> Self {
        Self {
            repository,
            config,
            max_write_retries: training.max_write_retries,
            retry_initial_delay: Duration::from_millis(training.retry_initial_delay_ms),
        }
    }

    pub fn repository(&self) -> &Arc<dyn SimilarityRepository> {
        &self.repository
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Scores every unordered pair of the corpus on the blocking pool.
    ///
    /// This is the O(n²) step and dominates training time. Returns
    /// `None` when `control` was cancelled mid-sweep.
    pub async fn sweep(
        &self,
        model: Arc<dyn TopicModel>,
        corpus: Arc<Vec<BagOfWords>>,
        control: Arc<SweepControl>,
    ) -> Result<Option<Vec<ScoredPair>>> {
        let threshold = self.config.storage_threshold;
        let started = Instant::now();
        let n_items = corpus.len();

        let pairs = tokio::task::spawn_blocking(move || {
            let distributions: Vec<Vec<f64>> = corpus
                .iter()
                .map(|bow| model.document_topics(bow))
                .collect();
            pairwise_sweep(&distributions, threshold, &control)
        })
        .await?;

        match &pairs {
            Some(pairs) => info!(
                items = n_items,
                pairs = pairs.len(),
                threshold,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Similarity sweep finished"
            ),
            None => info!(items = n_items, "Similarity sweep cancelled"),
        }
        Ok(pairs)
    }

    /// Stages scored pairs against the stored edges and commits them as one
    /// unit. Conflicts are retried against a fresh read.
    pub async fn persist(
        &self,
        item_type: ItemType,
        item_ids: &[ItemId],
        pairs: &[ScoredPair],
        version: VersionRef,
    ) -> Result<CommitReceipt> {
        let repository = &self.repository;
        let version = &version;
        let receipt = retry_with_backoff(
            || async move {
                let existing = repository.edges_for_type(item_type).await?;
                let (inserts, updates) = stage_edges(item_ids, pairs, &existing);
                debug!(
                    item_type = %item_type,
                    inserts = inserts.len(),
                    updates = updates.len(),
                    "Staged similarity edges"
                );
                repository
                    .commit(SimilarityCommit {
                        item_type,
                        version: version.clone(),
                        inserts,
                        updates,
                    })
                    .await
            },
            is_write_conflict,
            self.max_write_retries,
            self.retry_initial_delay,
        )
        .await?;

        info!(
            item_type = %item_type,
            version_id = receipt.version_id,
            inserted = receipt.inserted,
            updated = receipt.updated,
            purged = receipt.purged,
            "Committed similarity edges"
        );
        Ok(receipt)
    }

    /// Sweep followed by a commit under a freshly created version.
    pub async fn compute_and_persist(
        &self,
        item_type: ItemType,
        model: Arc<dyn TopicModel>,
        corpus: Arc<Vec<BagOfWords>>,
        item_ids: &[ItemId],
        control: Arc<SweepControl>,
    ) -> Result<CommitReceipt> {
        let n_topics = model.n_topics();
        let pairs = self
            .sweep(model, corpus, control)
            .await?
            .ok_or(RecommenderError::TrainingCancelled { item_type })?;

        let version = VersionRef::New(NewSimilarityVersion {
            item_type,
            created_at: Utc::now(),
            n_topics,
            n_items_at_training_time: item_ids.len(),
        });
        self.persist(item_type, item_ids, &pairs, version).await
    }

    /// Items similar to `item_id` from either edge endpoint, most similar first.
    pub async fn similar_to(
        &self,
        item_type: ItemType,
        item_id: ItemId,
        min_similarity: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<SimilarItem>> {
        if self.repository.latest_version(item_type).await?.is_none() {
            return Err(RecommenderError::MissingSimilarityData { item_type });
        }

        let min_similarity = min_similarity.unwrap_or(self.config.retrieval_threshold);
        let mut similar: Vec<SimilarItem> = self
            .repository
            .edges_for_item(item_type, item_id, min_similarity)
            .await?
            .into_iter()
            .filter_map(|edge| {
                edge.other_end(item_id).map(|other| SimilarItem {
                    item_id: other,
                    similarity: edge.similarity,
                })
            })
            .collect();

        similar.sort_by(|a, b| descending(a.similarity, b.similarity).then(a.item_id.cmp(&b.item_id)));
        if let Some(limit) = limit {
            similar.truncate(limit);
        }
        Ok(similar)
    }
}

/// Splits scored pairs into new edges and in-place updates of stored ones.
pub fn stage_edges(
    item_ids: &[ItemId],
    pairs: &[ScoredPair],
    existing: &[SimilarityEdge],
) -> (Vec<NewEdge>, Vec<EdgeUpdate>) {
    let existing: HashMap<(ItemId, ItemId), i64> = existing
        .iter()
        .map(|edge| (edge.pair_key(), edge.id))
        .collect();

    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    for pair in pairs {
        let (Some(&source), Some(&target)) =
            (item_ids.get(pair.source_index), item_ids.get(pair.target_index))
        else {
            continue;
        };

        match existing.get(&pair_key(source, target)) {
            Some(&edge_id) => updates.push(EdgeUpdate {
                edge_id,
                similarity: pair.similarity,
            }),
            None => inserts.push(NewEdge {
                source_item_id: source,
                target_item_id: target,
                similarity: pair.similarity,
            }),
        }
    }
    (inserts, updates)
}
