pub mod artifacts;
pub mod jobs;

pub use artifacts::{ArtifactStore, CorpusIndex, TrainedModel};
pub use jobs::{JobKind, JobStatus, TrainingJob, TrainingService};

use crate::algorithms::{Dictionary, LdaModel, LdaParams, SweepControl, TextPreprocessor, TopicModel};
use crate::config::TopicModelConfig;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::catalog::ItemRegistry;
use crate::services::similarity::{SimilarityStore, VersionRef};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// Overrides the configured topic count for one run.
    pub n_topics: Option<usize>,
}

/// Offline pipeline: corpus → dictionary → LDA → similarity sweep → commit.
///
/// Nothing is persisted until the sweep has finished. Artifacts are staged,
/// the version row is committed together with the edges, and the staged
/// artifacts replace the previous set only once that commit succeeds.
pub struct TopicModelTrainer {
    catalog: Arc<ItemRegistry>,
    similarity: Arc<SimilarityStore>,
    artifacts: ArtifactStore,
    preprocessor: Arc<TextPreprocessor>,
    topic_model: TopicModelConfig,
}

impl TopicModelTrainer {
    pub fn new(
        catalog: Arc<ItemRegistry>,
        similarity: Arc<SimilarityStore>,
        artifacts: ArtifactStore,
        preprocessor: Arc<TextPreprocessor>,
        topic_model: TopicModelConfig,
    ) -> Self {
        Self {
            catalog,
            similarity,
            artifacts,
            preprocessor,
            topic_model,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub async fn train(&self, item_type: ItemType) -> Result<TrainingOutcome> {
        self.train_with(item_type, &TrainOptions::default(), Arc::new(SweepControl::new()))
            .await
    }

    pub async fn train_with(
        &self,
        item_type: ItemType,
        options: &TrainOptions,
        control: Arc<SweepControl>,
    ) -> Result<TrainingOutcome> {
        let started = Instant::now();
        let trained = self.fit(item_type, options).await?;
        let n_topics = trained.model.n_topics();

        if control.is_cancelled() {
            return Err(RecommenderError::TrainingCancelled { item_type });
        }

        let model: Arc<dyn TopicModel> = Arc::new(trained.model.clone());
        let corpus = Arc::new(trained.corpus.bows.clone());
        let pairs = self
            .similarity
            .sweep(model, corpus, control.clone())
            .await?
            .ok_or(RecommenderError::TrainingCancelled { item_type })?;

        if control.is_cancelled() {
            return Err(RecommenderError::TrainingCancelled { item_type });
        }

        self.artifacts.stage(&trained).await?;

        let version = VersionRef::New(NewSimilarityVersion {
            item_type,
            created_at: Utc::now(),
            n_topics,
            n_items_at_training_time: trained.corpus.len(),
        });
        let receipt = match self
            .similarity
            .persist(item_type, &trained.corpus.item_ids, &pairs, version)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.artifacts.discard(item_type).await?;
                return Err(e);
            }
        };
        self.artifacts.promote(item_type).await?;

        info!(
            item_type = %item_type,
            items = trained.corpus.len(),
            topics = n_topics,
            version_id = receipt.version_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Training finished"
        );

        Ok(TrainingOutcome {
            item_type,
            trained_count: trained.corpus.len(),
            latest_version_id: receipt.version_id,
            n_topics,
            edges_inserted: receipt.inserted,
            edges_updated: receipt.updated,
            edges_purged: receipt.purged,
        })
    }

    /// Re-runs the sweep with the latest saved model instead of refitting,
    /// attributing the edges to the latest version.
    pub async fn refresh_similarities(
        &self,
        item_type: ItemType,
        control: Arc<SweepControl>,
    ) -> Result<TrainingOutcome> {
        let latest = self
            .similarity
            .repository()
            .latest_version(item_type)
            .await?
            .ok_or(RecommenderError::MissingSimilarityData { item_type })?;
        let trained = self
            .artifacts
            .load(item_type)
            .await?
            .ok_or(RecommenderError::MissingSimilarityData { item_type })?;

        info!(item_type = %item_type, version_id = latest.id, "Refreshing similarities from saved model");

        let n_topics = trained.model.n_topics();
        let model: Arc<dyn TopicModel> = Arc::new(trained.model);
        let pairs = self
            .similarity
            .sweep(model, Arc::new(trained.corpus.bows), control)
            .await?
            .ok_or(RecommenderError::TrainingCancelled { item_type })?;

        let receipt = self
            .similarity
            .persist(item_type, &trained.corpus.item_ids, &pairs, VersionRef::Existing(latest.id))
            .await?;

        Ok(TrainingOutcome {
            item_type,
            trained_count: trained.corpus.item_ids.len(),
            latest_version_id: receipt.version_id,
            n_topics,
            edges_inserted: receipt.inserted,
            edges_updated: receipt.updated,
            edges_purged: receipt.purged,
        })
    }

    /// Builds the corpus for `item_type` and fits the topic model on the
    /// blocking pool. Fails with `EmptyCorpus` before anything is fitted.
    pub async fn fit(&self, item_type: ItemType, options: &TrainOptions) -> Result<TrainedModel> {
        let items = self.catalog.repository(item_type)?.list().await?;
        if items.is_empty() {
            warn!(item_type = %item_type, "No items to train on, skipping");
            return Err(RecommenderError::EmptyCorpus { item_type });
        }

        let mut topic_model = self.topic_model.clone();
        if let Some(n_topics) = options.n_topics {
            topic_model.n_topics = n_topics;
        }
        let params = LdaParams::from_config(&topic_model)?;
        info!(item_type = %item_type, items = items.len(), topics = params.n_topics, "Fitting topic model");

        let preprocessor = self.preprocessor.clone();
        tokio::task::spawn_blocking(move || -> Result<TrainedModel> {
            let documents: Vec<Vec<String>> = items
                .iter()
                .map(|item| preprocessor.preprocess_optional(item.description.as_deref()))
                .collect();
            let dictionary = Dictionary::from_documents(&documents);
            let bows = documents.iter().map(|document| dictionary.doc2bow(document)).collect::<Vec<_>>();
            let model = LdaModel::fit(&bows, dictionary.len(), params)?;

            Ok(TrainedModel {
                item_type,
                model,
                dictionary,
                corpus: CorpusIndex {
                    item_ids: items.iter().map(|item| item.id).collect(),
                    bows,
                },
            })
        })
        .await?
    }

    pub async fn latest_model(&self, item_type: ItemType) -> Result<Option<TrainedModel>> {
        self.artifacts.load(item_type).await
    }

    pub async fn training_info(&self) -> Result<Vec<TrainingInfo>> {
        let mut rows = Vec::with_capacity(ItemType::ALL.len());
        for item_type in ItemType::ALL {
            let Ok(repository) = self.catalog.repository(item_type) else {
                continue;
            };
            let latest = self.similarity.repository().latest_version(item_type).await?;
            rows.push(TrainingInfo {
                item_type,
                number_items: repository.count().await?,
                latest_training_at: latest.as_ref().map(|version| version.created_at),
                number_trained_items: latest.map(|version| version.n_items_at_training_time).unwrap_or(0),
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimilarityConfig, TextConfig, TrainingConfig};
    use crate::services::catalog::InMemoryItemRepository;
    use crate::services::similarity::{
        CommitReceipt, InMemorySimilarityRepository, SimilarityCommit, SimilarityRepository,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        trainer: TopicModelTrainer,
        products: Arc<InMemoryItemRepository>,
        similarity: Arc<SimilarityStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let products = Arc::new(InMemoryItemRepository::new(ItemType::Products));
        let events = Arc::new(InMemoryItemRepository::new(ItemType::Events));
        let mut registry = ItemRegistry::new();
        registry.register(products.clone());
        registry.register(events);

        let similarity = Arc::new(SimilarityStore::new(
            Arc::new(InMemorySimilarityRepository::new()),
            SimilarityConfig::default(),
            &TrainingConfig::default(),
        ));
        let text = TextConfig {
            stopword_language: "english".to_string(),
            ..TextConfig::default()
        };
        let topic_model = TopicModelConfig {
            n_topics: 3,
            iterations: 60,
            ..TopicModelConfig::default()
        };

        Fixture {
            trainer: TopicModelTrainer::new(
                Arc::new(registry),
                similarity.clone(),
                ArtifactStore::new(dir.path()),
                Arc::new(TextPreprocessor::new(&text).unwrap()),
                topic_model,
            ),
            products,
            similarity,
            _dir: dir,
        }
    }

    async fn seed_products(products: &InMemoryItemRepository) {
        products
            .insert_many(vec![
                Item::new(1, ItemType::Products, "Jazz vinyl")
                    .with_description("Jazz vinyl record with piano and saxophone solos"),
                Item::new(2, ItemType::Products, "Jazz vinyl deluxe")
                    .with_description("Jazz vinyl record with piano and saxophone solos"),
                Item::new(3, ItemType::Products, "Garden gloves")
                    .with_description("Leather gloves for gardening and pruning roses"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_corpus_creates_nothing() {
        let fx = fixture();
        let result = fx.trainer.train(ItemType::Products).await;
        assert!(matches!(result, Err(RecommenderError::EmptyCorpus { .. })));
        assert!(fx.similarity.repository().latest_version(ItemType::Products).await.unwrap().is_none());
        assert!(fx.trainer.latest_model(ItemType::Products).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_train_writes_artifacts_and_version() {
        let fx = fixture();
        seed_products(&fx.products).await;

        let outcome = fx.trainer.train(ItemType::Products).await.unwrap();
        assert_eq!(outcome.trained_count, 3);
        assert_eq!(outcome.n_topics, 3);

        let version = fx.similarity.repository().latest_version(ItemType::Products).await.unwrap().unwrap();
        assert_eq!(version.id, outcome.latest_version_id);
        assert_eq!(version.n_items_at_training_time, 3);
        assert!(fx.trainer.latest_model(ItemType::Products).await.unwrap().is_some());

        let similar = fx
            .similarity
            .similar_to(ItemType::Products, 1, Some(0.5), None)
            .await
            .unwrap();
        assert_eq!(similar.first().map(|s| s.item_id), Some(2));
    }

    #[tokio::test]
    async fn test_topic_override() {
        let fx = fixture();
        seed_products(&fx.products).await;
        let options = TrainOptions { n_topics: Some(5) };
        let outcome = fx
            .trainer
            .train_with(ItemType::Products, &options, Arc::new(SweepControl::new()))
            .await
            .unwrap();
        assert_eq!(outcome.n_topics, 5);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_storage_untouched() {
        let fx = fixture();
        seed_products(&fx.products).await;
        let control = Arc::new(SweepControl::new());
        control.cancel();

        let result = fx
            .trainer
            .train_with(ItemType::Products, &TrainOptions::default(), control)
            .await;
        assert!(matches!(result, Err(RecommenderError::TrainingCancelled { .. })));
        assert!(fx.similarity.repository().versions(ItemType::Products).await.unwrap().is_empty());
        assert!(fx.trainer.latest_model(ItemType::Products).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_reuses_latest_version() {
        let fx = fixture();
        seed_products(&fx.products).await;

        let refresh = fx
            .trainer
            .refresh_similarities(ItemType::Products, Arc::new(SweepControl::new()))
            .await;
        assert!(matches!(refresh, Err(RecommenderError::MissingSimilarityData { .. })));

        let trained = fx.trainer.train(ItemType::Products).await.unwrap();
        let before = fx.similarity.repository().edges_for_type(ItemType::Products).await.unwrap();

        let refreshed = fx
            .trainer
            .refresh_similarities(ItemType::Products, Arc::new(SweepControl::new()))
            .await
            .unwrap();
        assert_eq!(refreshed.latest_version_id, trained.latest_version_id);
        assert_eq!(refreshed.edges_inserted, 0);
        assert_eq!(refreshed.edges_updated, before.len());
        assert_eq!(fx.similarity.repository().versions(ItemType::Products).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_training_info() {
        let fx = fixture();
        seed_products(&fx.products).await;
        fx.trainer.train(ItemType::Products).await.unwrap();
        fx.products
            .insert(Item::new(4, ItemType::Products, "Poster").with_description("Concert poster"))
            .await
            .unwrap();

        let info = fx.trainer.training_info().await.unwrap();
        let products = info.iter().find(|i| i.item_type == ItemType::Products).unwrap();
        assert_eq!(products.number_items, 4);
        assert_eq!(products.number_trained_items, 3);
        assert!(products.latest_training_at.is_some());

        let events = info.iter().find(|i| i.item_type == ItemType::Events).unwrap();
        assert_eq!(events.number_items, 0);
        assert!(events.latest_training_at.is_none());
    }

    /// Reads go to memory; commits fail while `reject` is set.
    #[derive(Default)]
    struct FlakyCommits {
        inner: InMemorySimilarityRepository,
        reject: AtomicBool,
    }

    #[async_trait]
    impl SimilarityRepository for FlakyCommits {
        async fn latest_version(&self, item_type: ItemType) -> Result<Option<SimilarityVersion>> {
            self.inner.latest_version(item_type).await
        }

        async fn versions(&self, item_type: ItemType) -> Result<Vec<SimilarityVersion>> {
            self.inner.versions(item_type).await
        }

        async fn edges_for_type(&self, item_type: ItemType) -> Result<Vec<SimilarityEdge>> {
            self.inner.edges_for_type(item_type).await
        }

        async fn edges_for_item(
            &self,
            item_type: ItemType,
            item_id: ItemId,
            min_similarity: f64,
        ) -> Result<Vec<SimilarityEdge>> {
            self.inner.edges_for_item(item_type, item_id, min_similarity).await
        }

        async fn commit(&self, commit: SimilarityCommit) -> Result<CommitReceipt> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(RecommenderError::Storage("database unavailable".to_string()));
            }
            self.inner.commit(commit).await
        }
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let products = Arc::new(InMemoryItemRepository::new(ItemType::Products));
        seed_products(&products).await;
        let mut registry = ItemRegistry::new();
        registry.register(products.clone());

        let repository = Arc::new(FlakyCommits::default());
        let similarity = Arc::new(SimilarityStore::new(
            repository.clone(),
            SimilarityConfig::default(),
            &TrainingConfig::default(),
        ));
        let trainer = TopicModelTrainer::new(
            Arc::new(registry),
            similarity.clone(),
            ArtifactStore::new(dir.path()),
            Arc::new(TextPreprocessor::new(&TextConfig::default()).unwrap()),
            TopicModelConfig {
                n_topics: 2,
                iterations: 30,
                ..TopicModelConfig::default()
            },
        );

        let first = trainer.train(ItemType::Products).await.unwrap();

        products
            .insert(Item::new(4, ItemType::Products, "Poster").with_description("Concert poster print"))
            .await
            .unwrap();
        repository.reject.store(true, Ordering::SeqCst);
        let result = trainer.train(ItemType::Products).await;
        assert!(matches!(result, Err(RecommenderError::Storage(_))));

        let saved = trainer.latest_model(ItemType::Products).await.unwrap().unwrap();
        let mut saved_ids = saved.corpus.item_ids.clone();
        saved_ids.sort();
        assert_eq!(saved_ids, vec![1, 2, 3]);
        assert!(!trainer.artifacts().corpus_path(ItemType::Products).with_extension("json.staged").exists());

        // the saved model still belongs to the latest committed version
        repository.reject.store(false, Ordering::SeqCst);
        let refreshed = trainer
            .refresh_similarities(ItemType::Products, Arc::new(SweepControl::new()))
            .await
            .unwrap();
        assert_eq!(refreshed.latest_version_id, first.latest_version_id);
        assert_eq!(refreshed.trained_count, 3);
    }
}
