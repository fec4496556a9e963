use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub postgres: PostgresConfig,
    pub text: TextConfig,
    pub topic_model: TopicModelConfig,
    pub similarity: SimilarityConfig,
    pub popularity: PopularityConfig,
    pub recommendation: RecommendationConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Base used when building shareable recommendation URLs.
    pub public_base_url: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory holding one model/dictionary/corpus file set per item type.
    pub artifact_dir: PathBuf,
    /// Optional JSON file with catalog items and interaction records.
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub stopword_language: String,
    pub stemmer_language: String,
    /// Character class body kept after lowercasing, e.g. `a-z`.
    pub alphabet: String,
    pub extra_stopwords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicModelConfig {
    pub n_topics: usize,
    pub random_seed: u64,
    pub iterations: usize,
    /// Document-topic prior; `None` means `1 / n_topics`.
    pub alpha: Option<f64>,
    pub beta: f64,
    pub inference_iterations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub storage_threshold: f64,
    pub retrieval_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopularityConfig {
    pub default_activity_weight: f64,
    /// Match interactions on canonicalized URLs instead of exact strings.
    pub canonicalize_urls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub default_quantity: usize,
    pub max_quantity: usize,
    /// Restrict event recommendations to events with a future occurrence.
    pub future_events_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub queue_capacity: usize,
    /// Finished jobs kept for inspection; older ones are evicted.
    pub job_retention: usize,
    pub max_write_retries: usize,
    pub retry_initial_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: num_cpus::get(),
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            artifact_dir: PathBuf::from("model_recommend"),
            seed_path: None,
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/culturec".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            stopword_language: "french".to_string(),
            stemmer_language: "english".to_string(),
            alphabet: "a-z".to_string(),
            extra_stopwords: Vec::new(),
        }
    }
}

impl Default for TopicModelConfig {
    fn default() -> Self {
        Self {
            n_topics: 11,
            random_seed: 100,
            iterations: 200,
            alpha: None,
            beta: 0.01,
            inference_iterations: 50,
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            storage_threshold: 0.5,
            retrieval_threshold: 0.8,
        }
    }
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            default_activity_weight: 1.0,
            canonicalize_urls: false,
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_quantity: 5,
            max_quantity: 100,
            future_events_only: true,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            job_retention: 100,
            max_write_retries: 3,
            retry_initial_delay_ms: 50,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CULTUREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::info!("Config file {} not found, using default configuration", path);
            Ok(Config::default())
        }
    }
}
