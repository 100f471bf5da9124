// src/services/sources.rs

//! The source adapter seam.
//!
//! Every configured source becomes one adapter. Adapters share nothing but the
//! HTTP client and the optional browser renderer, so a slow or failing source
//! never affects its siblings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{CandidateArticle, Config, SourceConfig, SourceKind, SourcePage};
use crate::services::browser::BrowserRenderer;
use crate::services::rendered::RenderedPageAdapter;
use crate::services::static_page::StaticPageAdapter;

/// Fetches candidate articles from one source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The registry entry this adapter was built from.
    fn config(&self) -> &SourceConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    /// Fetch and extract every listing page of the source.
    ///
    /// Blocked pages contribute nothing; an error means the source as a whole
    /// produced nothing usable this cycle.
    async fn fetch(&self) -> Result<Vec<CandidateArticle>>;
}

/// Build an adapter for every enabled source.
///
/// Rendered sources need `renderer`; without one they get an adapter that
/// fails at fetch time so the crawl report still lists them.
pub fn build_adapters(
    config: &Config,
    client: &Client,
    renderer: Option<Arc<dyn BrowserRenderer>>,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let wait_timeout = Duration::from_secs(config.browser.wait_timeout_secs);
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    for source in config.sources.iter().filter(|s| s.enabled) {
        let adapter: Arc<dyn SourceAdapter> = match source.kind {
            SourceKind::Static => Arc::new(StaticPageAdapter::new(source.clone(), client.clone())?),
            SourceKind::Rendered => Arc::new(RenderedPageAdapter::new(
                source.clone(),
                renderer.clone(),
                wait_timeout,
            )?),
        };
        adapters.push(adapter);
    }

    if adapters.is_empty() {
        return Err(AppError::config("no enabled sources"));
    }
    Ok(adapters)
}

/// Merge per-page results of one source.
///
/// Candidates keep page order, repeats included, so the crawl cycle can count
/// them as duplicates. A failed page is logged and skipped; the source fails
/// only when every page failed.
pub(crate) fn merge_pages(
    source: &str,
    results: Vec<(&SourcePage, Result<Vec<CandidateArticle>>)>,
) -> Result<Vec<CandidateArticle>> {
    let total = results.len();
    let mut candidates = Vec::new();
    let mut failures = 0usize;
    let mut last_error = None;

    for (page, result) in results {
        match result {
            Ok(found) => {
                log::debug!("[{}] {} items on {}", source, found.len(), page.url);
                candidates.extend(found);
            }
            Err(error) => {
                failures += 1;
                log::warn!("[{}] failed to fetch {}: {}", source, page.url, error);
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(error) if failures == total => Err(error),
        _ => Ok(candidates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpConfig;
    use crate::utils::http::create_async_client;

    #[test]
    fn test_builds_one_adapter_per_enabled_source() {
        let mut config = Config::default();
        let total = config.sources.len();
        config.sources[0].enabled = false;

        let client = create_async_client(&HttpConfig::default()).unwrap();
        let adapters = build_adapters(&config, &client, None).unwrap();

        assert_eq!(adapters.len(), total - 1);
        assert!(adapters.iter().all(|a| a.name() != config.sources[0].name));
    }

    #[test]
    fn test_invalid_selector_fails_build() {
        let mut config = Config::default();
        config.sources[0].selectors.item = "[[broken".to_string();

        let client = create_async_client(&HttpConfig::default()).unwrap();
        assert!(build_adapters(&config, &client, None).is_err());
    }
}
