use crate::models::{ItemType, Level, Strategy};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[derive(Error, Debug)]
pub enum RecommenderError {
    /// No items of the requested type exist, so there is nothing to fit.
    #[error("No {item_type} items to train on")]
    EmptyCorpus { item_type: ItemType },

    /// No training run has completed for this item type yet.
    #[error("No similarity data has been trained for {item_type}")]
    MissingSimilarityData { item_type: ItemType },

    #[error("Item not found: {item_type} '{reference}'")]
    UnresolvedAnchorItem { item_type: ItemType, reference: String },

    /// Concurrent upsert contention; callers retry with a fresh read.
    #[error("Store write conflict: {0}")]
    StoreWriteConflict(String),

    #[error("Strategy '{strategy}' cannot be used at level '{level}'")]
    InvalidStrategyForLevel { level: Level, strategy: Strategy },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown item type: {0}")]
    UnknownItemType(String),

    #[error("Training for {item_type} was cancelled")]
    TrainingCancelled { item_type: ItemType },

    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for RecommenderError {
    fn from(err: sqlx::Error) -> Self {
        // PostgreSQL unique violation
        let unique_violation = err
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| code == "23505")
            .unwrap_or(false);

        if unique_violation {
            RecommenderError::StoreWriteConflict(err.to_string())
        } else {
            RecommenderError::Database(err)
        }
    }
}

impl From<tokio::task::JoinError> for RecommenderError {
    fn from(err: tokio::task::JoinError) -> Self {
        RecommenderError::Task(err.to_string())
    }
}

impl RecommenderError {
    /// Conflicts are transient: re-reading and re-staging the write resolves them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecommenderError::StoreWriteConflict(_))
    }
}
