use chrono::{Duration, NaiveDate, Utc};
use culturec::config::StorageBackend;
use culturec::services::similarity::{EdgeUpdate, SimilarityCommit, SimilarityRepository, VersionRef};
use culturec::services::training::{JobKind, JobStatus};
use culturec::services::SeedData;
use culturec::*;
use std::collections::{HashMap, HashSet};

const MUSIC: &str = "Live jazz concert with saxophone, piano and double bass quartet";

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Memory;
    config.storage.artifact_dir = dir.path().join("models");
    config.topic_model.n_topics = 3;
    config.topic_model.iterations = 80;
    config.server.public_base_url = "https://culture.example.org".to_string();
    config
}

fn product(id: ItemId, category: &str, description: &str) -> Item {
    Item::new(id, ItemType::Products, &format!("Product {}", id))
        .with_url(&format!("/products/{}", id))
        .with_category(category)
        .with_description(description)
}

fn catalog() -> Vec<Item> {
    vec![
        product(1, "music", MUSIC),
        product(2, "music", MUSIC),
        product(3, "painting", "Oil painting exhibition of impressionist landscapes on canvas"),
        product(4, "painting", "Watercolor painting workshop with landscape canvas sketches"),
        product(5, "music", "Symphony orchestra concert with violin and piano soloists"),
        product(6, "theatre", "Comedy theatre play with actors on stage, improvised scenes"),
    ]
}

async fn state_with(dir: &tempfile::TempDir, seed: SeedData) -> AppState {
    AppState::with_seed(test_config(dir), seed).await.unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

#[tokio::test]
async fn test_retraining_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;
    let trainer = state.training_service.trainer();

    let first = trainer.train(ItemType::Products).await.unwrap();
    let edges_first = state.similarity.repository().edges_for_type(ItemType::Products).await.unwrap();
    assert_eq!(first.trained_count, 6);
    assert_eq!(first.edges_inserted, edges_first.len());
    assert!(!edges_first.is_empty());

    let second = trainer.train(ItemType::Products).await.unwrap();
    let edges_second = state.similarity.repository().edges_for_type(ItemType::Products).await.unwrap();
    assert_eq!(second.edges_inserted, 0);
    assert_eq!(second.edges_updated, edges_first.len());
    assert_ne!(first.latest_version_id, second.latest_version_id);

    let before: HashMap<(ItemId, ItemId), f64> = edges_first.iter().map(|e| (e.pair_key(), e.similarity)).collect();
    let after: HashMap<(ItemId, ItemId), f64> = edges_second.iter().map(|e| (e.pair_key(), e.similarity)).collect();
    assert_eq!(before, after);
    assert!(edges_second.iter().all(|e| e.version_id == second.latest_version_id));

    let versions = state.similarity.repository().versions(ItemType::Products).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].id, second.latest_version_id);
}

#[tokio::test]
async fn test_identical_descriptions_rank_first() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;
    state.training_service.trainer().train(ItemType::Products).await.unwrap();

    let similar = state
        .similarity
        .similar_to(ItemType::Products, 1, Some(0.0), None)
        .await
        .unwrap();
    assert_eq!(similar[0].item_id, 2);
    assert!(similar[0].similarity > 0.99);

    let request = RecommendationRequest::new(Level::Item, ItemType::Products, Strategy::Similar, 1)
        .with_item_url("/products/1");
    let response = state.recommendation_service.recommend(&request).await.unwrap();
    let ids: Vec<ItemId> = response.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![2]);
    assert!(!response.fallback);
}

#[tokio::test]
async fn test_higher_threshold_returns_subset() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;
    state.training_service.trainer().train(ItemType::Products).await.unwrap();

    for id in 1..=6 {
        let loose: HashSet<ItemId> = state
            .similarity
            .similar_to(ItemType::Products, id, Some(0.5), None)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.item_id)
            .collect();
        let strict = state
            .similarity
            .similar_to(ItemType::Products, id, None, None)
            .await
            .unwrap();
        assert!(strict.iter().all(|s| s.similarity >= 0.8));
        assert!(strict.iter().all(|s| loose.contains(&s.item_id)));
    }
}

#[tokio::test]
async fn test_zero_similarity_edges_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;
    let outcome = state.training_service.trainer().train(ItemType::Products).await.unwrap();

    let repository = state.similarity.repository();
    let edges = repository.edges_for_type(ItemType::Products).await.unwrap();
    let target = edges[0].clone();

    let receipt = repository
        .commit(SimilarityCommit {
            item_type: ItemType::Products,
            version: VersionRef::Existing(outcome.latest_version_id),
            inserts: Vec::new(),
            updates: vec![EdgeUpdate {
                edge_id: target.id,
                similarity: 0.0,
            }],
        })
        .await
        .unwrap();
    assert_eq!(receipt.purged, 1);

    let remaining = repository.edges_for_type(ItemType::Products).await.unwrap();
    assert_eq!(remaining.len(), edges.len() - 1);
    assert!(remaining.iter().all(|e| e.similarity > 0.0));
}

#[tokio::test]
async fn test_weighted_popularity_order() {
    let dir = tempfile::tempdir().unwrap();
    let seed = SeedData {
        items: catalog(),
        interactions: vec![
            InteractionRecord::new("/products/3", "page_view", day(), 10),
            InteractionRecord::new("/products/4", "purchase", day(), 3),
        ],
        activity_weights: vec![ActivityWeight {
            activity_name: "purchase".to_string(),
            weight: 5.0,
        }],
    };
    let state = state_with(&dir, seed).await;

    let request = RecommendationRequest::new(Level::Domain, ItemType::Products, Strategy::MostPopular, 2)
        .with_domain("painting");
    let response = state.recommendation_service.recommend(&request).await.unwrap();
    let ranking: Vec<(ItemId, Option<f64>)> = response.items.iter().map(|i| (i.id, i.popularity_score)).collect();
    assert_eq!(ranking, vec![(4, Some(15.0)), (3, Some(10.0))]);

    let homepage = RecommendationRequest::new(Level::Homepage, ItemType::Products, Strategy::MostPopular, 2);
    let response = state.recommendation_service.recommend(&homepage).await.unwrap();
    let ids: Vec<ItemId> = response.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![4, 3]);
}

#[tokio::test]
async fn test_doubling_weight_doubles_its_contribution() {
    let dir = tempfile::tempdir().unwrap();
    let seed = SeedData {
        items: catalog(),
        interactions: vec![
            InteractionRecord::new("/products/5", "click", day(), 4),
            InteractionRecord::new("/products/5", "page_view", day(), 6),
        ],
        activity_weights: Vec::new(),
    };
    let state = state_with(&dir, seed).await;
    let request = RecommendationRequest::new(Level::Homepage, ItemType::Products, Strategy::MostPopular, 1);

    state
        .activity_weights
        .set_activity_weights(&HashMap::from([("click".to_string(), 1.5), ("page_view".to_string(), 1.0)]))
        .await
        .unwrap();
    let base = state.recommendation_service.recommend(&request).await.unwrap().items[0]
        .popularity_score
        .unwrap();

    state.activity_weights.set_activity_weight("click", 3.0).await.unwrap();
    let doubled = state.recommendation_service.recommend(&request).await.unwrap().items[0]
        .popularity_score
        .unwrap();

    assert_eq!(base, 12.0);
    assert_eq!(doubled - base, 1.5 * 4.0);
}

#[tokio::test]
async fn test_every_strategy_returns_items_without_training() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;

    let requests = vec![
        RecommendationRequest::new(Level::Homepage, ItemType::Products, Strategy::Upcoming, 3),
        RecommendationRequest::new(Level::Homepage, ItemType::Products, Strategy::MostPopular, 3),
        RecommendationRequest::new(Level::Domain, ItemType::Products, Strategy::MostPopular, 3).with_domain("music"),
        RecommendationRequest::new(Level::Item, ItemType::Products, Strategy::Similar, 3).with_item_id(3),
        RecommendationRequest::new(Level::Item, ItemType::Products, Strategy::SimilarPopular, 3).with_item_id(3),
    ];
    for request in requests {
        let response = state.recommendation_service.recommend(&request).await.unwrap();
        assert_eq!(response.items.len(), 3, "{:?}", request.strategy);
        assert!(response.items.iter().all(|i| i.id != 3 || request.level != Level::Item));
    }
}

#[tokio::test]
async fn test_upcoming_events_skip_past_dates() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let events = vec![
        Item::new(10, ItemType::Events, "Past").with_occurrences(vec![now - Duration::days(2)]),
        Item::new(11, ItemType::Events, "Later").with_occurrences(vec![now + Duration::days(9)]),
        Item::new(12, ItemType::Events, "Soon").with_occurrences(vec![now + Duration::days(1)]),
    ];
    let state = state_with(&dir, SeedData { items: events, ..SeedData::default() }).await;

    let request = RecommendationRequest::new(Level::Homepage, ItemType::Events, Strategy::Upcoming, 5);
    let response = state.recommendation_service.recommend(&request).await.unwrap();
    let ids: Vec<ItemId> = response.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![12, 11]);
}

#[tokio::test]
async fn test_training_job_and_info() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;

    let info = state.training_service.trainer().training_info().await.unwrap();
    let products = info.iter().find(|i| i.item_type == ItemType::Products).unwrap();
    assert_eq!(products.number_items, 6);
    assert!(products.latest_training_at.is_none());

    let job = state
        .training_service
        .submit(ItemType::Products, JobKind::Train, Some(2))
        .unwrap();
    let finished = state
        .training_service
        .wait(job.id, std::time::Duration::from_secs(60))
        .await
        .unwrap();
    match finished.status {
        JobStatus::Completed { outcome } => assert_eq!(outcome.n_topics, 2),
        other => panic!("unexpected status {:?}", other),
    }

    let info = state.training_service.trainer().training_info().await.unwrap();
    let products = info.iter().find(|i| i.item_type == ItemType::Products).unwrap();
    assert_eq!(products.number_trained_items, 6);
    assert!(products.latest_training_at.is_some());

    let refresh = state
        .training_service
        .submit(ItemType::Products, JobKind::Refresh, None)
        .unwrap();
    let refreshed = state
        .training_service
        .wait(refresh.id, std::time::Duration::from_secs(60))
        .await
        .unwrap();
    assert!(matches!(refreshed.status, JobStatus::Completed { .. }));
    let versions = state.similarity.repository().versions(ItemType::Products).await.unwrap();
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn test_training_empty_type_fails() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;
    let result = state.training_service.trainer().train(ItemType::Events).await;
    assert!(matches!(result, Err(RecommenderError::EmptyCorpus { .. })));
    assert!(state
        .similarity
        .repository()
        .latest_version(ItemType::Events)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_activity_weights_merge_discovered_names() {
    let dir = tempfile::tempdir().unwrap();
    let seed = SeedData {
        items: catalog(),
        interactions: vec![InteractionRecord::new("/products/1", "share", day(), 1)],
        activity_weights: vec![ActivityWeight {
            activity_name: "purchase".to_string(),
            weight: 4.0,
        }],
    };
    let state = state_with(&dir, seed).await;

    let weights = state.activity_weights.get_activity_weights().await.unwrap();
    assert_eq!(weights.get("purchase"), Some(&4.0));
    assert_eq!(weights.get("share"), Some(&1.0));

    let invalid = HashMap::from([("share".to_string(), -1.0)]);
    assert!(state.activity_weights.set_activity_weights(&invalid).await.is_err());
}

#[tokio::test]
async fn test_domains_and_shareable_url() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(&dir, SeedData { items: catalog(), ..SeedData::default() }).await;

    let domains = state.recommendation_service.domains(ItemType::Products).await.unwrap();
    assert_eq!(domains, vec!["music", "painting", "theatre"]);

    let request = RecommendationRequest::new(Level::Domain, ItemType::Products, Strategy::MostPopular, 3)
        .with_domain("music");
    assert_eq!(
        state.recommendation_service.recommend_api_url(&request),
        "https://culture.example.org/recommendations?level=Domain&itemType=products&recommendType=Most%20popular&quantity=3&domain=music"
    );
}
