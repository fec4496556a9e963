use crate::error::{RecommenderError, Result};
use crate::models::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Read access to the items of one type.
///
/// `list` orders most-recent-first with ties broken by id, so corpus
/// indices built from it are reproducible.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    fn item_type(&self) -> ItemType;

    async fn list(&self) -> Result<Vec<Item>>;

    async fn get(&self, id: ItemId) -> Result<Option<Item>>;

    async fn find_by_url(&self, url: &str) -> Result<Option<Item>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|item| item.url.as_deref() == Some(url)))
    }

    async fn filter_by_domain(&self, domain: &str) -> Result<Vec<Item>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|item| item.in_domain(domain))
            .collect())
    }

    /// Sorted distinct domain values.
    async fn domains(&self) -> Result<Vec<String>> {
        let domains: BTreeSet<String> = self
            .list()
            .await?
            .into_iter()
            .filter_map(|item| item.category)
            .collect();
        Ok(domains.into_iter().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}

pub struct InMemoryItemRepository {
    item_type: ItemType,
    items: RwLock<HashMap<ItemId, Item>>,
}

impl InMemoryItemRepository {
    pub fn new(item_type: ItemType) -> Self {
        Self {
            item_type,
            items: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, item: Item) -> Result<()> {
        if item.item_type != self.item_type {
            return Err(RecommenderError::InvalidRequest(format!(
                "item {} is {} but this repository holds {}",
                item.id, item.item_type, self.item_type
            )));
        }
        self.items.write().await.insert(item.id, item);
        Ok(())
    }

    pub async fn insert_many(&self, items: Vec<Item>) -> Result<()> {
        for item in items {
            self.insert(item).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, id: ItemId) -> Option<Item> {
        self.items.write().await.remove(&id)
    }
}

#[async_trait]
impl ItemRepository for InMemoryItemRepository {
    fn item_type(&self) -> ItemType {
        self.item_type
    }

    async fn list(&self) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self.items.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn get(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.items.read().await.len())
    }
}

/// Resolves an item type to its repository once, at the request boundary.
#[derive(Clone, Default)]
pub struct ItemRegistry {
    repositories: HashMap<ItemType, Arc<dyn ItemRepository>>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, repository: Arc<dyn ItemRepository>) {
        self.repositories.insert(repository.item_type(), repository);
    }

    pub fn repository(&self, item_type: ItemType) -> Result<Arc<dyn ItemRepository>> {
        self.repositories
            .get(&item_type)
            .cloned()
            .ok_or_else(|| RecommenderError::UnknownItemType(item_type.to_string()))
    }
}

/// Catalog items, interaction records and weights loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub items: Vec<Item>,
    pub interactions: Vec<InteractionRecord>,
    pub activity_weights: Vec<ActivityWeight>,
}

impl SeedData {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await?;
        let seed: SeedData = serde_json::from_slice(&raw)?;
        info!(
            path = %path.display(),
            items = seed.items.len(),
            interactions = seed.interactions.len(),
            "Loaded seed data"
        );
        Ok(seed)
    }

    pub fn items_of(&self, item_type: ItemType) -> Vec<Item> {
        self.items
            .iter()
            .filter(|item| item.item_type == item_type)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn products() -> InMemoryItemRepository {
        let now = Utc::now();
        let repo = InMemoryItemRepository::new(ItemType::Products);
        repo.insert_many(vec![
            Item::new(1, ItemType::Products, "Poster")
                .with_category("print")
                .with_url("/p/1")
                .with_created_at(now - Duration::days(2)),
            Item::new(2, ItemType::Products, "Mug")
                .with_category("kitchen")
                .with_url("/p/2")
                .with_created_at(now),
            Item::new(3, ItemType::Products, "Card")
                .with_category("print")
                .with_created_at(now - Duration::days(2)),
        ])
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first_and_stable() {
        let repo = products().await;
        let ids: Vec<ItemId> = repo.list().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_lookup_and_domain_filter() {
        let repo = products().await;
        assert_eq!(repo.find_by_url("/p/2").await.unwrap().map(|i| i.id), Some(2));
        assert!(repo.find_by_url("/missing").await.unwrap().is_none());
        assert_eq!(repo.filter_by_domain("print").await.unwrap().len(), 2);
        assert!(repo.filter_by_domain("garden").await.unwrap().is_empty());
        assert_eq!(repo.domains().await.unwrap(), vec!["kitchen", "print"]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rejects_items_of_other_type() {
        let repo = InMemoryItemRepository::new(ItemType::Events);
        let result = repo.insert(Item::new(1, ItemType::Products, "Mug")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_registry_resolves_registered_types() {
        let mut registry = ItemRegistry::new();
        registry.register(Arc::new(products().await));
        assert!(registry.repository(ItemType::Products).is_ok());
        assert!(matches!(
            registry.repository(ItemType::Events),
            Err(RecommenderError::UnknownItemType(_))
        ));
    }

    #[tokio::test]
    async fn test_seed_file_round_trip() {
        let seed = SeedData {
            items: vec![Item::new(5, ItemType::Events, "Opera")],
            interactions: vec![InteractionRecord::new(
                "/e/5",
                "page_view",
                chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                4,
            )],
            activity_weights: Vec::new(),
        };
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_vec(&seed).unwrap()).unwrap();

        let loaded = SeedData::load(file.path()).await.unwrap();
        assert_eq!(loaded.items_of(ItemType::Events).len(), 1);
        assert!(loaded.items_of(ItemType::Products).is_empty());
        assert_eq!(loaded.interactions, seed.interactions);
    }
}
