pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecommenderError, Result};
pub use models::*;

use algorithms::TextPreprocessor;
use config::StorageBackend;
use services::postgres::{PgActivityWeightStore, PgSimilarityRepository};
use services::*;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<ItemRegistry>,
    pub similarity: Arc<SimilarityStore>,
    pub popularity: Arc<PopularityScorer>,
    pub activity_weights: Arc<ActivityWeightService>,
    pub recommendation_service: Arc<RecommendationSelector>,
    pub training_service: Arc<TrainingService>,
}

impl AppState {
    /// Builds the state from `config`, seeding the catalog from
    /// `storage.seed_path` when set. Must run inside a tokio runtime.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let seed = match &config.storage.seed_path {
            Some(path) => SeedData::load(path).await?,
            None => SeedData::default(),
        };
        Self::with_seed(config, seed).await
    }

    pub async fn with_seed(config: Config, seed: SeedData) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let mut registry = ItemRegistry::new();
        for item_type in ItemType::ALL {
            let repository = Arc::new(InMemoryItemRepository::new(item_type));
            repository.insert_many(seed.items_of(item_type)).await?;
            registry.register(repository);
        }
        let catalog = Arc::new(registry);

        let sources: Vec<Arc<dyn InteractionSource>> = vec![Arc::new(
            InMemoryInteractionSource::with_records("seed", seed.interactions),
        )];

        let (similarity_repository, weight_store): (Arc<dyn SimilarityRepository>, Arc<dyn ActivityWeightStore>) =
            match config.storage.backend {
                StorageBackend::Memory => (
                    Arc::new(InMemorySimilarityRepository::new()),
                    Arc::new(InMemoryActivityWeightStore::new()),
                ),
                StorageBackend::Postgres => {
                    let pool = services::postgres::connect(&config.postgres).await?;
                    (
                        Arc::new(PgSimilarityRepository::new(pool.clone())),
                        Arc::new(PgActivityWeightStore::new(pool)),
                    )
                }
            };
        weight_store.upsert_many(&seed.activity_weights).await?;

        let similarity = Arc::new(SimilarityStore::new(
            similarity_repository,
            config.similarity.clone(),
            &config.training,
        ));

        let popularity = Arc::new(PopularityScorer::new(
            sources.clone(),
            weight_store.clone(),
            config.popularity.clone(),
        ));

        let activity_weights = Arc::new(ActivityWeightService::new(
            weight_store,
            sources,
            config.popularity.default_activity_weight,
        ));

        let recommendation_service = Arc::new(RecommendationSelector::new(
            catalog.clone(),
            similarity.clone(),
            popularity.clone(),
            config.recommendation.clone(),
            &config.server.public_base_url,
        ));

        let trainer = Arc::new(TopicModelTrainer::new(
            catalog.clone(),
            similarity.clone(),
            ArtifactStore::new(config.storage.artifact_dir.clone()),
            Arc::new(TextPreprocessor::new(&config.text)?),
            config.topic_model.clone(),
        ));
        let training_service = Arc::new(TrainingService::start(
            trainer,
            config.training.queue_capacity,
            config.training.job_retention,
        ));

        info!(backend = ?config.storage.backend, "Application state initialized");

        Ok(Self {
            config,
            catalog,
            similarity,
            popularity,
            activity_weights,
            recommendation_service,
            training_service,
        })
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
