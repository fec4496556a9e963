use crate::config::PopularityConfig;
use crate::error::Result;
use crate::models::*;
use crate::services::interactions::{ActivityWeightStore, InteractionSource};
use crate::utils::{canonicalize_url, descending};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: Item,
    pub popularity_score: f64,
}

/// Ranks items by weighted interaction counts gathered from every source.
pub struct PopularityScorer {
    sources: Vec<Arc<dyn InteractionSource>>,
    weights: Arc<dyn ActivityWeightStore>,
    config: PopularityConfig,
}

impl PopularityScorer {
    pub fn new(
        sources: Vec<Arc<dyn InteractionSource>>,
        weights: Arc<dyn ActivityWeightStore>,
        config: PopularityConfig,
    ) -> Self {
        Self {
            sources,
            weights,
            config,
        }
    }

    fn match_key(&self, url: &str) -> String {
        if self.config.canonicalize_urls {
            canonicalize_url(url)
        } else {
            url.to_string()
        }
    }

    /// Annotates candidates of `item_type` (restricted to `domain` when
    /// given) with their popularity and sorts them, highest first. Ties keep
    /// candidate order.
    pub async fn score(
        &self,
        item_type: ItemType,
        candidates: Vec<Item>,
        domain: Option<&str>,
    ) -> Result<Vec<ScoredItem>> {
        let candidates: Vec<Item> = candidates
            .into_iter()
            .filter(|item| item.item_type == item_type)
            .filter(|item| domain.map_or(true, |domain| item.in_domain(domain)))
            .collect();

        let totals = self.url_totals(&candidates).await?;

        let mut scored: Vec<ScoredItem> = candidates
            .into_iter()
            .map(|item| {
                let popularity_score = item
                    .url
                    .as_deref()
                    .and_then(|url| totals.get(&self.match_key(url)))
                    .copied()
                    .unwrap_or(0.0);
                ScoredItem {
                    item,
                    popularity_score,
                }
            })
            .collect();

        scored.sort_by(|a, b| descending(a.popularity_score, b.popularity_score));
        Ok(scored)
    }

    /// Weighted totals per matched URL: counts are summed per
    /// `(url, activity)` across sources before the weight is applied.
    pub async fn url_totals(&self, candidates: &[Item]) -> Result<HashMap<String, f64>> {
        let urls: HashSet<String> = candidates
            .iter()
            .filter_map(|item| item.url.as_deref())
            .map(|url| self.match_key(url))
            .collect();
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let batches = if self.config.canonicalize_urls {
            try_join_all(self.sources.iter().map(|source| source.records())).await?
        } else {
            try_join_all(self.sources.iter().map(|source| source.records_for_urls(&urls))).await?
        };

        let mut counts: BTreeMap<(String, String), u64> = BTreeMap::new();
        for record in batches.into_iter().flatten() {
            let key = self.match_key(&record.page_url);
            if !urls.contains(&key) {
                continue;
            }
            *counts.entry((key, record.activity_name)).or_insert(0) += record.count;
        }

        let mut weights: HashMap<String, f64> = HashMap::new();
        let mut totals: HashMap<String, f64> = HashMap::new();
        for ((url, activity), count) in counts {
            let weight = match weights.get(&activity) {
                Some(weight) => *weight,
                None => {
                    let weight = self
                        .weights
                        .get_or_create(&activity, self.config.default_activity_weight)
                        .await?;
                    weights.insert(activity.clone(), weight);
                    weight
                }
            };
            *totals.entry(url).or_insert(0.0) += weight * count as f64;
        }

        debug!(
            candidates = candidates.len(),
            matched = totals.len(),
            sources = self.sources.len(),
            "Aggregated popularity"
        );
        Ok(totals)
    }
}
