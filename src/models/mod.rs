use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RecommenderError;

pub type ItemId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Events,
    Products,
}

impl ItemType {
    pub const ALL: [ItemType; 2] = [ItemType::Events, ItemType::Products];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Events => "events",
            ItemType::Products => "products",
        }
    }

    /// Events carry occurrence dates; products do not.
    pub fn is_dated(&self) -> bool {
        matches!(self, ItemType::Events)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = RecommenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "events" | "event" => Ok(ItemType::Events),
            "products" | "product" => Ok(ItemType::Products),
            other => Err(RecommenderError::UnknownItemType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Homepage,
    Domain,
    Item,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Homepage => "Homepage",
            Level::Domain => "Domain",
            Level::Item => "Item",
        };
        f.write_str(name)
    }
}

impl FromStr for Level {
    type Err = RecommenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "homepage" => Ok(Level::Homepage),
            "domain" => Ok(Level::Domain),
            "item" => Ok(Level::Item),
            other => Err(RecommenderError::InvalidRequest(format!("unknown level '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    Upcoming,
    #[serde(rename = "Most popular")]
    MostPopular,
    Similar,
    #[serde(rename = "Similar+Popular")]
    SimilarPopular,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Upcoming => "Upcoming",
            Strategy::MostPopular => "Most popular",
            Strategy::Similar => "Similar",
            Strategy::SimilarPopular => "Similar+Popular",
        }
    }

    pub fn allowed_at(&self, level: Level) -> bool {
        match level {
            Level::Homepage | Level::Domain => {
                matches!(self, Strategy::Upcoming | Strategy::MostPopular)
            }
            Level::Item => matches!(self, Strategy::Similar | Strategy::SimilarPopular),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RecommenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '+')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "upcoming" => Ok(Strategy::Upcoming),
            "mostpopular" | "popular" => Ok(Strategy::MostPopular),
            "similar" => Ok(Strategy::Similar),
            "similar+popular" | "similarpopular" | "hybrid" => Ok(Strategy::SimilarPopular),
            _ => Err(RecommenderError::InvalidRequest(format!("unknown strategy '{}'", s))),
        }
    }
}

/// A recommendable record supplied by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub external_id: String,
    pub item_type: ItemType,
    pub name: String,
    /// Domain value (event type or product type).
    pub category: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    pub location_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub occurrences: Vec<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: ItemId, item_type: ItemType, name: &str) -> Self {
        Self {
            id,
            external_id: format!("{}-{}", item_type, id),
            item_type,
            name: name.to_string(),
            category: None,
            description: None,
            url: None,
            image: None,
            location_name: None,
            created_at: Utc::now(),
            occurrences: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_occurrences(mut self, occurrences: Vec<DateTime<Utc>>) -> Self {
        self.occurrences = occurrences;
        self
    }

    /// Earliest occurrence at or after `now`, recomputed on every call.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.occurrences.iter().filter(|date| **date >= now).min().copied()
    }

    pub fn in_domain(&self, domain: &str) -> bool {
        self.category.as_deref() == Some(domain)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityVersion {
    pub id: i64,
    pub item_type: ItemType,
    pub created_at: DateTime<Utc>,
    pub n_topics: usize,
    pub n_items_at_training_time: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSimilarityVersion {
    pub item_type: ItemType,
    pub created_at: DateTime<Utc>,
    pub n_topics: usize,
    pub n_items_at_training_time: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub id: i64,
    pub source_item_id: ItemId,
    pub target_item_id: ItemId,
    pub item_type: ItemType,
    pub similarity: f64,
    pub version_id: i64,
}

impl SimilarityEdge {
    /// Order-independent identity of the pair.
    pub fn pair_key(&self) -> (ItemId, ItemId) {
        pair_key(self.source_item_id, self.target_item_id)
    }

    /// The endpoint opposite to `item_id`, if the edge touches it.
    pub fn other_end(&self, item_id: ItemId) -> Option<ItemId> {
        if self.source_item_id == item_id {
            Some(self.target_item_id)
        } else if self.target_item_id == item_id {
            Some(self.source_item_id)
        } else {
            None
        }
    }
}

pub fn pair_key(a: ItemId, b: ItemId) -> (ItemId, ItemId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityWeight {
    pub activity_name: String,
    pub weight: f64,
}

/// Aggregated page-visit counts as delivered by an interaction feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub page_url: String,
    pub activity_name: String,
    pub occurred_on: NaiveDate,
    pub count: u64,
}

impl InteractionRecord {
    pub fn new(page_url: &str, activity_name: &str, occurred_on: NaiveDate, count: u64) -> Self {
        Self {
            page_url: page_url.to_string(),
            activity_name: activity_name.to_string(),
            occurred_on,
            count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarItem {
    pub item_id: ItemId,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub level: Level,
    pub item_type: ItemType,
    pub strategy: Strategy,
    pub quantity: usize,
    pub domain: Option<String>,
    pub item_url: Option<String>,
    pub item_id: Option<ItemId>,
}

impl RecommendationRequest {
    pub fn new(level: Level, item_type: ItemType, strategy: Strategy, quantity: usize) -> Self {
        Self {
            level,
            item_type,
            strategy,
            quantity,
            domain: None,
            item_url: None,
            item_id: None,
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_item_url(mut self, url: &str) -> Self {
        self.item_url = Some(url.to_string());
        self
    }

    pub fn with_item_id(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

/// Field-projected recommendation; each strategy fills only its declared subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    pub id: ItemId,
    pub external_id: String,
    pub name: String,
    pub item_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popularity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub item_type: ItemType,
    pub strategy: Strategy,
    pub items: Vec<RecommendedItem>,
    /// True when the strategy produced nothing and a random sample was served.
    pub fallback: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub item_type: ItemType,
    pub trained_count: usize,
    pub latest_version_id: i64,
    pub n_topics: usize,
    pub edges_inserted: usize,
    pub edges_updated: usize,
    pub edges_purged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub item_type: ItemType,
    pub number_items: usize,
    pub latest_training_at: Option<DateTime<Utc>>,
    pub number_trained_items: usize,
}
