use crate::config::RecommendationConfig;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use std::collections::HashMap;

pub fn validate_recommendation_request(
    request: &RecommendationRequest,
    config: &RecommendationConfig,
) -> Result<()> {
    if request.quantity == 0 {
        return Err(RecommenderError::InvalidRequest("quantity must be positive".to_string()));
    }

    if request.quantity > config.max_quantity {
        return Err(RecommenderError::InvalidRequest(format!(
            "quantity too large (max {})",
            config.max_quantity
        )));
    }

    if !request.strategy.allowed_at(request.level) {
        return Err(RecommenderError::InvalidStrategyForLevel {
            level: request.level,
            strategy: request.strategy,
        });
    }

    if request.level == Level::Domain
        && request.domain.as_deref().map(str::trim).unwrap_or("").is_empty()
    {
        return Err(RecommenderError::InvalidRequest(
            "domain level requires a domain".to_string(),
        ));
    }

    if request.level == Level::Item && request.item_url.is_none() && request.item_id.is_none() {
        return Err(RecommenderError::InvalidRequest(
            "item level requires an item url or id".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_activity_weights(weights: &HashMap<String, f64>) -> Result<()> {
    for (name, weight) in weights {
        if name.trim().is_empty() {
            return Err(RecommenderError::InvalidRequest(
                "activity name cannot be empty".to_string(),
            ));
        }

        if name.len() > 255 {
            return Err(RecommenderError::InvalidRequest(
                "activity name too long (max 255 characters)".to_string(),
            ));
        }

        if !weight.is_finite() || *weight < 0.0 {
            return Err(RecommenderError::InvalidRequest(format!(
                "weight for '{}' must be a non-negative number",
                name
            )));
        }
    }

    Ok(())
}

pub fn validate_similarity_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(RecommenderError::InvalidRequest(
            "similarity threshold must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RecommendationConfig {
        RecommendationConfig::default()
    }

    #[test]
    fn test_valid_requests() {
        let request = RecommendationRequest::new(Level::Homepage, ItemType::Events, Strategy::Upcoming, 5);
        assert!(validate_recommendation_request(&request, &config()).is_ok());

        let request = RecommendationRequest::new(Level::Item, ItemType::Products, Strategy::Similar, 1)
            .with_item_url("/p/1");
        assert!(validate_recommendation_request(&request, &config()).is_ok());
    }

    #[test]
    fn test_strategy_level_mismatch() {
        let request = RecommendationRequest::new(Level::Homepage, ItemType::Events, Strategy::Similar, 5);
        assert!(matches!(
            validate_recommendation_request(&request, &config()),
            Err(RecommenderError::InvalidStrategyForLevel { .. })
        ));
    }

    #[test]
    fn test_quantity_bounds() {
        let zero = RecommendationRequest::new(Level::Homepage, ItemType::Events, Strategy::Upcoming, 0);
        assert!(validate_recommendation_request(&zero, &config()).is_err());

        let huge = RecommendationRequest::new(Level::Homepage, ItemType::Events, Strategy::Upcoming, 10_000);
        assert!(validate_recommendation_request(&huge, &config()).is_err());
    }

    #[test]
    fn test_domain_and_item_targets_required() {
        let domain = RecommendationRequest::new(Level::Domain, ItemType::Events, Strategy::MostPopular, 3);
        assert!(validate_recommendation_request(&domain, &config()).is_err());

        let item = RecommendationRequest::new(Level::Item, ItemType::Events, Strategy::Similar, 3);
        assert!(validate_recommendation_request(&item, &config()).is_err());
    }

    #[test]
    fn test_activity_weights() {
        let mut weights = HashMap::new();
        weights.insert("purchase".to_string(), 10.0);
        weights.insert("scroll".to_string(), 0.0);
        assert!(validate_activity_weights(&weights).is_ok());

        weights.insert("broken".to_string(), f64::NAN);
        assert!(validate_activity_weights(&weights).is_err());
    }

    #[test]
    fn test_similarity_threshold() {
        assert!(validate_similarity_threshold(0.8).is_ok());
        assert!(validate_similarity_threshold(1.5).is_err());
    }
}
