pub mod catalog;
pub mod interactions;
pub mod popularity;
pub mod postgres;
pub mod recommendation;
pub mod similarity;
pub mod training;

pub use catalog::{InMemoryItemRepository, ItemRegistry, ItemRepository, SeedData};
pub use interactions::{
    ActivityWeightService, ActivityWeightStore, InMemoryActivityWeightStore, InMemoryInteractionSource,
    InteractionSource,
};
pub use popularity::PopularityScorer;
pub use recommendation::RecommendationSelector;
pub use similarity::{InMemorySimilarityRepository, SimilarityRepository, SimilarityStore};
pub use training::{ArtifactStore, TopicModelTrainer, TrainingService};
