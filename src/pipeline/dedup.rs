// src/pipeline/dedup.rs

//! URL-based deduplication around the classification step.
//!
//! Runs twice per cycle: before classification so known articles never cost a
//! service call, and again at insert time because another cycle may have
//! stored the same URL meanwhile. The store's unique constraint has the final
//! word; a collision there is counted as a duplicate, never raised.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::{CandidateArticle, ClassifiedArticle};
use crate::storage::{InsertOutcome, NewsStorage};

/// Candidates that are neither repeated in the batch nor already stored.
#[derive(Debug, Default)]
pub struct Prefiltered {
    pub fresh: Vec<CandidateArticle>,
    pub duplicates: usize,
}

/// Counts from the final insert pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Drop candidates whose URL repeats within the batch or is already stored.
pub async fn prefilter<S: NewsStorage + ?Sized>(
    storage: &S,
    candidates: Vec<CandidateArticle>,
) -> Result<Prefiltered> {
    let total = candidates.len();
    let mut seen = HashSet::new();
    let unique: Vec<CandidateArticle> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect();

    let urls: Vec<String> = unique.iter().map(|c| c.url.clone()).collect();
    let known = storage.existing_urls(&urls).await?;

    let fresh: Vec<CandidateArticle> = unique
        .into_iter()
        .filter(|c| !known.contains(&c.url))
        .collect();

    Ok(Prefiltered {
        duplicates: total - fresh.len(),
        fresh,
    })
}

/// Insert every relevant article that is still new.
///
/// A storage error on one article is logged and counted; the rest proceed.
pub async fn store_relevant<S: NewsStorage + ?Sized>(
    storage: &S,
    articles: &[ClassifiedArticle],
) -> StoreOutcome {
    let mut outcome = StoreOutcome::default();

    for article in articles.iter().filter(|a| a.is_relevant()) {
        match insert_if_new(storage, article).await {
            Ok(true) => outcome.stored += 1,
            Ok(false) => {
                log::debug!("Already stored: {}", article.url());
                outcome.duplicates += 1;
            }
            Err(error) => {
                log::warn!("Failed to store {}: {}", article.url(), error);
                outcome.failed += 1;
            }
        }
    }
    outcome
}

async fn insert_if_new<S: NewsStorage + ?Sized>(
    storage: &S,
    article: &ClassifiedArticle,
) -> Result<bool> {
    if storage.exists(article.url()).await? {
        return Ok(false);
    }
    Ok(matches!(
        storage.insert_article(article).await?,
        InsertOutcome::Inserted(_)
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::storage::SqliteStorage;

    fn candidate(url: &str) -> CandidateArticle {
        CandidateArticle::new(format!("Title {url}"), url, "test.ua")
    }

    #[tokio::test]
    async fn test_prefilter_drops_repeats_and_known() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let known = ClassifiedArticle::fail_open(candidate("https://a.ua/known"), "test", Utc::now());
        store.insert_article(&known).await.unwrap();

        let prefiltered = prefilter(
            &store,
            vec![
                candidate("https://a.ua/1"),
                candidate("https://a.ua/known"),
                candidate("https://a.ua/1"),
                candidate("https://a.ua/2"),
            ],
        )
        .await
        .unwrap();

        let urls: Vec<&str> = prefiltered.fresh.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.ua/1", "https://a.ua/2"]);
        assert_eq!(prefiltered.duplicates, 2);
    }

    #[tokio::test]
    async fn test_store_relevant_skips_rejected_and_stored() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let now = Utc::now();
        let relevant = ClassifiedArticle::fail_open(candidate("https://a.ua/1"), "test", now);
        let rejected = ClassifiedArticle::unjudged(candidate("https://a.ua/2"), now);

        let first = store_relevant(&store, &[relevant.clone(), rejected.clone()]).await;
        assert_eq!(
            first,
            StoreOutcome {
                stored: 1,
                duplicates: 0,
                failed: 0
            }
        );

        // Same article offered again by an overlapping cycle
        let second = store_relevant(&store, &[relevant]).await;
        assert_eq!(second.stored, 0);
        assert_eq!(second.duplicates, 1);
        assert!(!store.exists("https://a.ua/2").await.unwrap());
    }
}
