use crate::error::RecommenderError;
use std::cmp::Ordering;

pub mod validation;

/// Descending order for scores; NaN compares equal so sorting stays stable.
pub fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Normalizes a page URL for interaction matching: drops the fragment and
/// query string, lowercases scheme and host, and trims trailing slashes.
pub fn canonicalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);

    let (scheme, rest) = match without_query.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_lowercase()), rest),
        None => (None, without_query),
    };
    let (host, path) = match (scheme.is_some(), rest.find('/')) {
        (true, Some(index)) => (rest[..index].to_lowercase(), &rest[index..]),
        (true, None) => (rest.to_lowercase(), ""),
        (false, _) => (String::new(), rest),
    };

    let path = path.trim_end_matches('/');
    match scheme {
        Some(scheme) => format!("{}://{}{}", scheme, host, path),
        None if path.is_empty() => "/".to_string(),
        None => path.to_string(),
    }
}

/// Retries `operation` with exponential backoff while `should_retry`
/// accepts the error.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    mut operation: F,
    should_retry: P,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
    P: Fn(&E) -> bool,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_retries || !should_retry(&e) {
                    return Err(e);
                }

                attempt += 1;
                tracing::warn!("Operation failed (attempt {}), retrying in {:?}: {:?}",
                              attempt, delay, e);
                tokio::time::sleep(delay).await;
                delay *= 2; // exponential backoff
            }
        }
    }
}

/// Retry policy for store writes: only conflicts are worth another attempt.
pub fn is_write_conflict(err: &RecommenderError) -> bool {
    err.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[test]
    fn test_descending_orders_high_first() {
        let mut scores = vec![0.2, 0.9, 0.5];
        scores.sort_by(|a, b| descending(*a, *b));
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
    }

    #[test]
    fn test_canonicalize_url() {
        assert_eq!(
            canonicalize_url("HTTPS://Example.org/events/42/?utm=mail#top"),
            "https://example.org/events/42"
        );
        assert_eq!(canonicalize_url("/events/42/"), "/events/42");
        assert_eq!(canonicalize_url("/"), "/");
        assert_eq!(canonicalize_url("https://example.org"), "https://example.org");
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<usize, RecommenderError> = retry_with_backoff(
            || async move {
                let n = counter.fetch_add(1, AtomicOrdering::SeqCst);
                if n < 2 {
                    Err(RecommenderError::StoreWriteConflict("edge".to_string()))
                } else {
                    Ok(n)
                }
            },
            is_write_conflict,
            3,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<(), RecommenderError> = retry_with_backoff(
            || async move {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Err(RecommenderError::Storage("down".to_string()))
            },
            is_write_conflict,
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }
}
