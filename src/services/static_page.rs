// src/services/static_page.rs

//! Static listing adapter.
//!
//! Fetches each listing page over plain HTTP and extracts candidates with the
//! source's CSS selectors. Selectors are compiled once per adapter.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CandidateArticle, SourceConfig, SourcePage};
use crate::services::sources::{SourceAdapter, merge_pages};
use crate::utils::http::{PageFetch, fetch_page_async};
use crate::utils::{canonical_url, collapse_whitespace};

/// Compiled form of `SourceSelectors`.
#[derive(Debug)]
pub(crate) struct ListingSelectors {
    item: Selector,
    link: Selector,
    link_fallback: Option<Selector>,
    title: Option<Selector>,
    date: Option<Selector>,
    date_attr: Option<String>,
    excerpt: Option<Selector>,
}

impl ListingSelectors {
    pub(crate) fn compile(config: &SourceConfig) -> Result<Self> {
        let selectors = &config.selectors;
        Ok(Self {
            item: parse_selector(&selectors.item)?,
            link: parse_selector(&selectors.link)?,
            link_fallback: parse_optional(selectors.link_fallback.as_deref())?,
            title: parse_optional(selectors.title.as_deref())?,
            date: parse_optional(selectors.date.as_deref())?,
            date_attr: selectors.date_attr.clone(),
            excerpt: parse_optional(selectors.excerpt.as_deref())?,
        })
    }
}

/// Adapter for sources whose listing is present in the served markup.
pub struct StaticPageAdapter {
    config: SourceConfig,
    client: Client,
    base_url: Url,
    selectors: ListingSelectors,
}

impl StaticPageAdapter {
    pub fn new(config: SourceConfig, client: Client) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let selectors = ListingSelectors::compile(&config)?;
        Ok(Self {
            config,
            client,
            base_url,
            selectors,
        })
    }

    async fn fetch_page(&self, page: &SourcePage) -> Result<Vec<CandidateArticle>> {
        match fetch_page_async(&self.client, &page.url).await? {
            PageFetch::Page(html) => Ok(self.parse_listing(&html, page)),
            PageFetch::Blocked(status) => {
                log::warn!(
                    "[{}] {} blocked with {}, skipping page",
                    self.config.name,
                    page.url,
                    status
                );
                Ok(Vec::new())
            }
        }
    }

    /// Extract candidates from one listing document.
    ///
    /// Kept synchronous: `Html` must not live across an await point.
    fn parse_listing(&self, html: &str, page: &SourcePage) -> Vec<CandidateArticle> {
        let document = Html::parse_document(html);
        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        for item in document.select(&self.selectors.item) {
            match self.parse_item(&item, page) {
                Some(candidate) => candidates.push(candidate),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            log::debug!(
                "[{}] skipped {} malformed items on {}",
                self.config.name,
                skipped,
                page.url
            );
        }
        candidates
    }

    fn parse_item(&self, item: &ElementRef, page: &SourcePage) -> Option<CandidateArticle> {
        let sel = &self.selectors;
        let link_elem = item
            .select(&sel.link)
            .next()
            .or_else(|| sel.link_fallback.as_ref().and_then(|f| item.select(f).next()))?;

        let href = link_elem.value().attr("href")?;
        let url = canonical_url(&self.base_url, href)?;

        let title_elem = sel
            .title
            .as_ref()
            .and_then(|s| item.select(s).next())
            .unwrap_or(link_elem);
        let title = element_text(&title_elem);
        if title.is_empty() {
            return None;
        }

        let raw_date = sel
            .date
            .as_ref()
            .and_then(|s| item.select(s).next())
            .map(|elem| {
                sel.date_attr
                    .as_deref()
                    .and_then(|attr| elem.value().attr(attr))
                    .map(|value| value.trim().to_string())
                    .unwrap_or_else(|| element_text(&elem))
            })
            .unwrap_or_default();

        let excerpt = sel
            .excerpt
            .as_ref()
            .and_then(|s| item.select(s).next())
            .map(|elem| element_text(&elem));

        Some(
            CandidateArticle::new(title, url, &self.config.name)
                .with_raw_date(raw_date)
                .with_content_type(page.content_type.clone())
                .with_excerpt(excerpt),
        )
    }
}

#[async_trait]
impl SourceAdapter for StaticPageAdapter {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn fetch(&self) -> Result<Vec<CandidateArticle>> {
        let mut results = Vec::with_capacity(self.config.pages.len());
        for page in &self.config.pages {
            results.push((page, self.fetch_page(page).await));
        }
        merge_pages(&self.config.name, results)
    }
}

fn element_text(elem: &ElementRef) -> String {
    collapse_whitespace(&elem.text().collect::<String>())
}

pub(crate) fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn parse_optional(s: Option<&str>) -> Result<Option<Selector>> {
    s.map(parse_selector).transpose()
}
