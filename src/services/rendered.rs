// src/services/rendered.rs

//! Rendered listing adapter.
//!
//! For sources whose listing only exists after client-side rendering. The
//! page is loaded in a headless browser and the same selectors a static
//! source would use are applied in-page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CandidateArticle, SourceConfig, SourcePage};
use crate::services::browser::{BrowserRenderer, RenderRequest};
use crate::services::sources::{SourceAdapter, merge_pages};
use crate::services::static_page::ListingSelectors;
use crate::utils::{canonical_url, collapse_whitespace};

/// Evaluated in the page with the serialized selectors as `arguments[0]`.
const EXTRACT_SCRIPT: &str = r#"
const sel = arguments[0];
const text = (el) => (el ? el.textContent : '').replace(/\s+/g, ' ').trim();
return Array.from(document.querySelectorAll(sel.item)).map((item) => {
  const link = item.querySelector(sel.link)
    || (sel.link_fallback ? item.querySelector(sel.link_fallback) : null);
  if (!link) return null;
  const titleEl = sel.title ? item.querySelector(sel.title) : null;
  const dateEl = sel.date ? item.querySelector(sel.date) : null;
  const excerptEl = sel.excerpt ? item.querySelector(sel.excerpt) : null;
  let rawDate = '';
  if (dateEl) {
    rawDate = (sel.date_attr && dateEl.getAttribute(sel.date_attr)) || text(dateEl);
  }
  return {
    title: text(titleEl || link),
    url: link.getAttribute('href') || '',
    raw_date: rawDate,
    excerpt: excerptEl ? text(excerptEl) : null,
  };
}).filter(Boolean);
"#;

/// One item as returned by the extraction script.
#[derive(Debug, Deserialize)]
struct RenderedItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    raw_date: String,
    #[serde(default)]
    excerpt: Option<String>,
}

/// Adapter for client-rendered sources.
pub struct RenderedPageAdapter {
    config: SourceConfig,
    renderer: Option<Arc<dyn BrowserRenderer>>,
    wait_timeout: Duration,
    base_url: Url,
}

impl RenderedPageAdapter {
    pub fn new(
        config: SourceConfig,
        renderer: Option<Arc<dyn BrowserRenderer>>,
        wait_timeout: Duration,
    ) -> Result<Self> {
        // Evaluated in the page, compiled here only to reject bad selectors early
        ListingSelectors::compile(&config)?;
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self {
            config,
            renderer,
            wait_timeout,
            base_url,
        })
    }

    async fn fetch_page(
        &self,
        renderer: &dyn BrowserRenderer,
        page: &SourcePage,
    ) -> Result<Vec<CandidateArticle>> {
        let request = RenderRequest {
            url: page.url.clone(),
            wait_for: self.config.selectors.ready_selector().to_string(),
            wait_timeout: self.wait_timeout,
            script: EXTRACT_SCRIPT.to_string(),
            args: vec![serde_json::to_value(&self.config.selectors)?],
        };

        let value = renderer.render(&request).await?;
        let items: Vec<RenderedItem> = serde_json::from_value(value)
            .map_err(|e| AppError::crawl(&page.url, format!("unexpected script result: {e}")))?;

        Ok(items
            .into_iter()
            .filter_map(|item| self.to_candidate(item, page))
            .collect())
    }

    fn to_candidate(&self, item: RenderedItem, page: &SourcePage) -> Option<CandidateArticle> {
        let title = collapse_whitespace(&item.title);
        if title.is_empty() {
            return None;
        }
        let url = canonical_url(&self.base_url, &item.url)?;
        Some(
            CandidateArticle::new(title, url, &self.config.name)
                .with_raw_date(item.raw_date.trim())
                .with_content_type(page.content_type.clone())
                .with_excerpt(item.excerpt.map(|e| collapse_whitespace(&e))),
        )
    }
}

#[async_trait]
impl SourceAdapter for RenderedPageAdapter {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn fetch(&self) -> Result<Vec<CandidateArticle>> {
        let renderer = self.renderer.as_deref().ok_or_else(|| {
            AppError::browser(format!(
                "{} needs a headless browser but rendering is disabled",
                self.config.name
            ))
        })?;

        let mut results = Vec::with_capacity(self.config.pages.len());
        for page in &self.config.pages {
            results.push((page, self.fetch_page(renderer, page).await));
        }
        merge_pages(&self.config.name, results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{Value, json};

    use super::*;
    use crate::models::{SourceKind, SourceSelectors};

    struct FakeRenderer {
        result: Value,
        requests: Mutex<Vec<RenderRequest>>,
    }

    impl FakeRenderer {
        fn returning(result: Value) -> Arc<Self> {
            Arc::new(Self {
                result,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BrowserRenderer for FakeRenderer {
        async fn render(&self, request: &RenderRequest) -> Result<Value> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.result.clone())
        }
    }

    fn source() -> SourceConfig {
        let mut selectors = SourceSelectors::new("div.news__item", "a.news__title");
        selectors.date = Some("div.shortnews__date".to_string());
        SourceConfig {
            name: "tax.gov.ua".to_string(),
            kind: SourceKind::Rendered,
            base_url: "https://tax.gov.ua".to_string(),
            pages: vec![SourcePage {
                url: "https://tax.gov.ua/media-tsentr/novini/".to_string(),
                content_type: Some("news".to_string()),
            }],
            locale: Default::default(),
            selectors,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_rendered_items_become_candidates() {
        let renderer = FakeRenderer::returning(json!([
            { "title": " ДПС  нагадує ", "url": "/media-tsentr/novini/1.html", "raw_date": "04.12.2025 10:15" },
            { "title": "", "url": "/media-tsentr/novini/2.html", "raw_date": "" },
            { "title": "Без посилання", "url": "", "raw_date": "" },
        ]));
        let adapter =
            RenderedPageAdapter::new(source(), Some(renderer.clone()), Duration::from_secs(10))
                .unwrap();

        let candidates = adapter.fetch().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "ДПС нагадує");
        assert_eq!(candidates[0].url, "https://tax.gov.ua/media-tsentr/novini/1.html");
        assert_eq!(candidates[0].raw_date, "04.12.2025 10:15");

        let requests = renderer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].wait_for, "div.news__item");
        assert_eq!(requests[0].args[0]["link"], "a.news__title");
    }

    #[tokio::test]
    async fn test_unexpected_script_result_fails_source() {
        let renderer = FakeRenderer::returning(json!({ "error": "boom" }));
        let adapter =
            RenderedPageAdapter::new(source(), Some(renderer), Duration::from_secs(1)).unwrap();
        assert!(adapter.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_without_renderer_fails_source() {
        let adapter = RenderedPageAdapter::new(source(), None, Duration::from_secs(1)).unwrap();
        assert!(matches!(adapter.fetch().await, Err(AppError::Browser(_))));
    }
}
