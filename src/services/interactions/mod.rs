use crate::error::Result;
use crate::models::*;
use crate::utils::validation::validate_activity_weights;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::try_join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// One upstream feed of aggregated page-visit counts.
#[async_trait]
pub trait InteractionSource: Send + Sync {
    fn name(&self) -> &str;

    async fn records(&self) -> Result<Vec<InteractionRecord>>;

    async fn records_for_urls(&self, urls: &HashSet<String>) -> Result<Vec<InteractionRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|record| urls.contains(&record.page_url))
            .collect())
    }

    async fn activity_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .map(|record| record.activity_name)
            .collect())
    }
}

pub struct InMemoryInteractionSource {
    name: String,
    records: RwLock<Vec<InteractionRecord>>,
}

impl InMemoryInteractionSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn with_records(name: &str, records: Vec<InteractionRecord>) -> Self {
        Self {
            name: name.to_string(),
            records: RwLock::new(records),
        }
    }

    pub fn push(&self, record: InteractionRecord) {
        self.records.write().push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = InteractionRecord>) {
        self.records.write().extend(records);
    }
}

#[async_trait]
impl InteractionSource for InMemoryInteractionSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn records(&self) -> Result<Vec<InteractionRecord>> {
        Ok(self.records.read().clone())
    }
}

/// Key-value store of per-activity importance multipliers.
#[async_trait]
pub trait ActivityWeightStore: Send + Sync {
    /// Returns the stored weight, inserting `default_weight` first when the
    /// activity has never been seen. Concurrent callers observe one row.
    async fn get_or_create(&self, activity_name: &str, default_weight: f64) -> Result<f64>;

    async fn all(&self) -> Result<Vec<ActivityWeight>>;

    async fn upsert_many(&self, weights: &[ActivityWeight]) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryActivityWeightStore {
    weights: DashMap<String, f64>,
}

impl InMemoryActivityWeightStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityWeightStore for InMemoryActivityWeightStore {
    async fn get_or_create(&self, activity_name: &str, default_weight: f64) -> Result<f64> {
        let weight = *self
            .weights
            .entry(activity_name.to_string())
            .or_insert_with(|| {
                info!(activity = %activity_name, weight = default_weight, "Created default activity weight");
                default_weight
            });
        Ok(weight)
    }

    async fn all(&self) -> Result<Vec<ActivityWeight>> {
        let mut weights: Vec<ActivityWeight> = self
            .weights
            .iter()
            .map(|entry| ActivityWeight {
                activity_name: entry.key().clone(),
                weight: *entry.value(),
            })
            .collect();
        weights.sort_by(|a, b| a.activity_name.cmp(&b.activity_name));
        Ok(weights)
    }

    async fn upsert_many(&self, weights: &[ActivityWeight]) -> Result<()> {
        for weight in weights {
            self.weights.insert(weight.activity_name.clone(), weight.weight);
        }
        Ok(())
    }
}

/// Operator-facing view over the weight store.
pub struct ActivityWeightService {
    store: Arc<dyn ActivityWeightStore>,
    sources: Vec<Arc<dyn InteractionSource>>,
    default_weight: f64,
}

impl ActivityWeightService {
    pub fn new(
        store: Arc<dyn ActivityWeightStore>,
        sources: Vec<Arc<dyn InteractionSource>>,
        default_weight: f64,
    ) -> Self {
        Self {
            store,
            sources,
            default_weight,
        }
    }

    /// Configured weights merged with activity names seen in any source.
    /// Names without a configured weight report the default.
    pub async fn get_activity_weights(&self) -> Result<BTreeMap<String, f64>> {
        let discovered = try_join_all(self.sources.iter().map(|source| source.activity_names())).await?;

        let mut weights: BTreeMap<String, f64> = discovered
            .into_iter()
            .flatten()
            .map(|name| (name, self.default_weight))
            .collect();

        for configured in self.store.all().await? {
            weights.insert(configured.activity_name, configured.weight);
        }

        debug!(count = weights.len(), "Resolved activity weights");
        Ok(weights)
    }

    pub async fn set_activity_weights(&self, weights: &HashMap<String, f64>) -> Result<()> {
        validate_activity_weights(weights)?;

        let mut rows: Vec<ActivityWeight> = weights
            .iter()
            .map(|(name, weight)| ActivityWeight {
                activity_name: name.trim().to_string(),
                weight: *weight,
            })
            .collect();
        rows.sort_by(|a, b| a.activity_name.cmp(&b.activity_name));

        self.store.upsert_many(&rows).await?;
        info!(count = rows.len(), "Updated activity weights");
        Ok(())
    }

    pub async fn set_activity_weight(&self, name: &str, weight: f64) -> Result<()> {
        let mut weights = HashMap::new();
        weights.insert(name.to_string(), weight);
        self.set_activity_weights(&weights).await
    }
}
