use crate::config::RecommendationConfig;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::catalog::{ItemRegistry, ItemRepository};
use crate::services::popularity::PopularityScorer;
use crate::services::similarity::SimilarityStore;
use crate::utils::descending;
use crate::utils::validation::validate_recommendation_request;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Serves recommendation requests by level and strategy.
///
/// Every strategy degrades to a random sample of the eligible pool rather
/// than returning an empty list while candidates exist.
pub struct RecommendationSelector {
    catalog: Arc<ItemRegistry>,
    similarity: Arc<SimilarityStore>,
    popularity: Arc<PopularityScorer>,
    config: RecommendationConfig,
    public_base_url: String,
}

enum Eligible {
    Pool(Vec<Item>),
    /// The requested domain matched nothing; holds the whole item type.
    UnknownDomain(Vec<Item>),
}

impl Eligible {
    fn into_items(self) -> Vec<Item> {
        match self {
            Eligible::Pool(items) | Eligible::UnknownDomain(items) => items,
        }
    }
}

struct Ranked {
    item: Item,
    popularity: Option<f64>,
    similarity: Option<f64>,
}

impl RecommendationSelector {
    pub fn new(
        catalog: Arc<ItemRegistry>,
        similarity: Arc<SimilarityStore>,
        popularity: Arc<PopularityScorer>,
        config: RecommendationConfig,
        public_base_url: &str,
    ) -> Self {
        Self {
            catalog,
            similarity,
            popularity,
            config,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn recommend(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        validate_recommendation_request(request, &self.config)?;

        let repository = self.catalog.repository(request.item_type)?;
        let now = Utc::now();

        let anchor = match request.level {
            Level::Item => Some(resolve_anchor(repository.as_ref(), request).await?),
            _ => None,
        };
        let pool = self
            .eligible_pool(repository.as_ref(), request, anchor.as_ref(), now)
            .await?;

        let mut ranked = match pool {
            Eligible::Pool(ref pool) => match self.rank(request, anchor.as_ref(), pool, now).await {
                Ok(ranked) => ranked,
                Err(e) => {
                    warn!(
                        strategy = %request.strategy,
                        item_type = %request.item_type,
                        error = %e,
                        "Strategy failed, serving a random sample"
                    );
                    Vec::new()
                }
            },
            Eligible::UnknownDomain(_) => Vec::new(),
        };
        let pool = pool.into_items();
        ranked.truncate(request.quantity);

        let fallback = ranked.is_empty();
        if ranked.len() < request.quantity {
            let chosen: HashSet<ItemId> = ranked.iter().map(|r| r.item.id).collect();
            let padding = random_sample(&pool, &chosen, request.quantity - ranked.len());
            if !padding.is_empty() {
                info!(
                    strategy = %request.strategy,
                    item_type = %request.item_type,
                    ranked = ranked.len(),
                    random = padding.len(),
                    "Filling recommendations with a random sample"
                );
            }
            ranked.extend(padding.into_iter().map(|item| Ranked {
                item,
                popularity: Some(0.0),
                similarity: Some(0.0),
            }));
        }

        let items = ranked
            .into_iter()
            .map(|ranked| project(ranked, request.strategy, now))
            .collect();

        Ok(RecommendationResponse {
            item_type: request.item_type,
            strategy: request.strategy,
            items,
            fallback,
            generated_at: now,
        })
    }

    async fn rank(
        &self,
        request: &RecommendationRequest,
        anchor: Option<&Item>,
        pool: &[Item],
        now: DateTime<Utc>,
    ) -> Result<Vec<Ranked>> {
        match request.strategy {
            Strategy::Upcoming => Ok(self.upcoming(request, pool, now)),
            Strategy::MostPopular => self.most_popular(request, pool).await,
            Strategy::Similar | Strategy::SimilarPopular => match anchor {
                Some(anchor) => self.similar(request, anchor, pool).await,
                None => Ok(Vec::new()),
            },
        }
    }

    /// Candidates after domain and date constraints, anchor excluded.
    async fn eligible_pool(
        &self,
        repository: &dyn ItemRepository,
        request: &RecommendationRequest,
        anchor: Option<&Item>,
        now: DateTime<Utc>,
    ) -> Result<Eligible> {
        let (mut pool, unknown_domain) = match (request.level, request.domain.as_deref()) {
            (Level::Domain, Some(domain)) => {
                let in_domain = repository.filter_by_domain(domain).await?;
                if in_domain.is_empty() {
                    warn!(domain = %domain, item_type = %request.item_type, "Unknown domain, serving a random sample");
                    (repository.list().await?, true)
                } else {
                    (in_domain, false)
                }
            }
            _ => (repository.list().await?, false),
        };

        let future_only = request.item_type.is_dated()
            && (request.strategy == Strategy::Upcoming || self.config.future_events_only);
        if future_only {
            pool.retain(|item| item.next_occurrence(now).is_some());
        }
        if let Some(anchor) = anchor {
            pool.retain(|item| item.id != anchor.id);
        }

        Ok(if unknown_domain {
            Eligible::UnknownDomain(pool)
        } else {
            Eligible::Pool(pool)
        })
    }

    fn upcoming(&self, request: &RecommendationRequest, pool: &[Item], now: DateTime<Utc>) -> Vec<Ranked> {
        if !request.item_type.is_dated() {
            debug!(item_type = %request.item_type, "Upcoming has no dates to sort by");
            return Vec::new();
        }

        let mut dated: Vec<(DateTime<Utc>, &Item)> = pool
            .iter()
            .filter_map(|item| item.next_occurrence(now).map(|date| (date, item)))
            .collect();
        dated.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));

        dated
            .into_iter()
            .map(|(_, item)| Ranked {
                item: item.clone(),
                popularity: None,
                similarity: None,
            })
            .collect()
    }

    async fn most_popular(&self, request: &RecommendationRequest, pool: &[Item]) -> Result<Vec<Ranked>> {
        let scored = self
            .popularity
            .score(request.item_type, pool.to_vec(), None)
            .await?;

        Ok(scored
            .into_iter()
            .map(|scored| Ranked {
                item: scored.item,
                popularity: Some(scored.popularity_score),
                similarity: None,
            })
            .collect())
    }

    async fn similar(
        &self,
        request: &RecommendationRequest,
        anchor: &Item,
        pool: &[Item],
    ) -> Result<Vec<Ranked>> {
        let similar = match self
            .similarity
            .similar_to(request.item_type, anchor.id, None, None)
            .await
        {
            Ok(similar) => similar,
            Err(RecommenderError::MissingSimilarityData { item_type }) => {
                warn!(item_type = %item_type, "No trained similarities yet, falling back");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let by_id: HashMap<ItemId, &Item> = pool.iter().map(|item| (item.id, item)).collect();
        let mut ranked: Vec<Ranked> = similar
            .into_iter()
            .filter_map(|similar| {
                by_id.get(&similar.item_id).map(|item| Ranked {
                    item: (*item).clone(),
                    popularity: None,
                    similarity: Some(similar.similarity),
                })
            })
            .collect();

        if request.strategy == Strategy::SimilarPopular && !ranked.is_empty() {
            let candidates: Vec<Item> = ranked.iter().map(|r| r.item.clone()).collect();
            let popularity: HashMap<ItemId, f64> = self
                .popularity
                .score(request.item_type, candidates, None)
                .await?
                .into_iter()
                .map(|scored| (scored.item.id, scored.popularity_score))
                .collect();

            for entry in ranked.iter_mut() {
                entry.popularity = Some(popularity.get(&entry.item.id).copied().unwrap_or(0.0));
            }
            ranked.sort_by(|a, b| {
                descending(a.similarity.unwrap_or(0.0), b.similarity.unwrap_or(0.0))
                    .then(descending(a.popularity.unwrap_or(0.0), b.popularity.unwrap_or(0.0)))
            });
        }

        Ok(ranked)
    }

    pub async fn domains(&self, item_type: ItemType) -> Result<Vec<String>> {
        self.catalog.repository(item_type)?.domains().await
    }

    /// Shareable query URL reproducing `request` against the public server.
    pub fn recommend_api_url(&self, request: &RecommendationRequest) -> String {
        let mut params = vec![
            ("level", request.level.to_string()),
            ("itemType", request.item_type.to_string()),
            ("recommendType", request.strategy.to_string()),
            ("quantity", request.quantity.to_string()),
        ];
        if let Some(domain) = &request.domain {
            params.push(("domain", domain.clone()));
        }
        if let Some(item_url) = &request.item_url {
            params.push(("itemUrl", item_url.clone()));
        }
        if let Some(item_id) = request.item_id {
            params.push(("itemId", item_id.to_string()));
        }

        let query = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/recommendations?{}", self.public_base_url, query)
    }
}

async fn resolve_anchor(repository: &dyn ItemRepository, request: &RecommendationRequest) -> Result<Item> {
    let found = match (&request.item_url, request.item_id) {
        (Some(url), _) => repository.find_by_url(url).await?,
        (None, Some(id)) => repository.get(id).await?,
        (None, None) => None,
    };

    found.ok_or_else(|| RecommenderError::UnresolvedAnchorItem {
        item_type: request.item_type,
        reference: request
            .item_url
            .clone()
            .or_else(|| request.item_id.map(|id| id.to_string()))
            .unwrap_or_default(),
    })
}

fn random_sample(pool: &[Item], exclude: &HashSet<ItemId>, amount: usize) -> Vec<Item> {
    let candidates: Vec<&Item> = pool.iter().filter(|item| !exclude.contains(&item.id)).collect();
    candidates
        .choose_multiple(&mut rand::thread_rng(), amount)
        .map(|item| (*item).clone())
        .collect()
}

fn project(ranked: Ranked, strategy: Strategy, now: DateTime<Utc>) -> RecommendedItem {
    let item = ranked.item;
    let next_date = item.next_occurrence(now);

    let mut projected = RecommendedItem {
        id: item.id,
        external_id: item.external_id,
        name: item.name,
        item_type: item.item_type,
        category: None,
        description: None,
        url: item.url,
        image: item.image,
        location_name: None,
        next_date: None,
        popularity_score: None,
        similarity_score: None,
    };

    match strategy {
        Strategy::Upcoming => {
            projected.location_name = item.location_name;
            projected.next_date = next_date;
        }
        Strategy::MostPopular => {
            projected.category = item.category;
            projected.next_date = next_date;
            projected.popularity_score = ranked.popularity;
        }
        Strategy::Similar => {
            projected.category = item.category;
            projected.description = item.description;
            projected.next_date = next_date;
            projected.similarity_score = ranked.similarity;
        }
        Strategy::SimilarPopular => {
            projected.category = item.category;
            projected.description = item.description;
            projected.next_date = next_date;
            projected.similarity_score = ranked.similarity;
            projected.popularity_score = ranked.popularity;
        }
    }
    projected
}
