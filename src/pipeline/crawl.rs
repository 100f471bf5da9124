// src/pipeline/crawl.rs

//! Crawl cycle: fetch → normalize → prefilter → classify → store.
//!
//! Every source runs through the whole chain on its own, bounded by a fetch
//! ceiling. A source that fails or times out only empties its own report row.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::context::AppContext;
use crate::error::{AppError, Result};
use crate::models::SourceKind;
use crate::pipeline::dedup::{prefilter, store_relevant};
use crate::services::sources::SourceAdapter;

/// Outcome of one source within a crawl cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    /// Candidates extracted from the listing pages
    pub parsed: usize,
    /// Candidates judged (or defaulted to) relevant
    pub relevant: usize,
    pub stored: usize,
    /// Repeats within the fetch plus URLs already stored
    pub skipped_duplicates: usize,
    /// The classifier fell back to accepting everything
    pub classification_degraded: bool,
    /// Why the source produced nothing, if it failed
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-source rows of one crawl cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl CrawlReport {
    pub fn parsed(&self) -> usize {
        self.sources.iter().map(|s| s.parsed).sum()
    }

    pub fn relevant(&self) -> usize {
        self.sources.iter().map(|s| s.relevant).sum()
    }

    pub fn stored(&self) -> usize {
        self.sources.iter().map(|s| s.stored).sum()
    }

    pub fn skipped_duplicates(&self) -> usize {
        self.sources.iter().map(|s| s.skipped_duplicates).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| !s.is_ok()).count()
    }

    pub fn classification_degraded(&self) -> bool {
        self.sources.iter().any(|s| s.classification_degraded)
    }
}

/// Crawl every adapter, or only `source` when given.
pub async fn run_crawl_cycle(ctx: &AppContext, source: Option<&str>) -> Result<CrawlReport> {
    let started_at = Utc::now();
    let adapters: Vec<Arc<dyn SourceAdapter>> = match source {
        Some(name) => vec![Arc::clone(ctx.adapter(name)?)],
        None => ctx.adapters.clone(),
    };
    if adapters.is_empty() {
        return Err(AppError::config("no sources to crawl"));
    }

    log::info!("Starting crawl of {} sources", adapters.len());
    let concurrency = ctx.config.http.max_concurrent.max(1);

    let runs: Vec<_> = adapters
        .iter()
        .map(|adapter| run_source(ctx, adapter.as_ref()))
        .collect();
    let mut sources: Vec<SourceReport> = stream::iter(runs)
        .buffer_unordered(concurrency)
        .collect()
        .await;
    sources.sort_by(|a, b| a.source.cmp(&b.source));

    let report = CrawlReport {
        started_at,
        finished_at: Utc::now(),
        sources,
    };
    log::info!(
        "Crawl finished: {} parsed, {} relevant, {} stored, {} duplicates, {} failed sources",
        report.parsed(),
        report.relevant(),
        report.stored(),
        report.skipped_duplicates(),
        report.failed_sources()
    );
    Ok(report)
}

/// Run the full chain for one source. Never fails; errors land in the report.
pub async fn run_source(ctx: &AppContext, adapter: &dyn SourceAdapter) -> SourceReport {
    let config = adapter.config();
    let report = SourceReport::new(&config.name);
    let ceiling = fetch_ceiling(ctx, adapter);

    let mut candidates = match tokio::time::timeout(ceiling, adapter.fetch()).await {
        Ok(Ok(candidates)) => candidates,
        Ok(Err(error)) => {
            log::warn!("[{}] source unavailable: {}", config.name, error);
            return report.failed(error);
        }
        Err(_) => {
            log::warn!("[{}] fetch exceeded {:?}", config.name, ceiling);
            return report.failed(format!("timed out after {}s", ceiling.as_secs()));
        }
    };

    let mut report = SourceReport {
        parsed: candidates.len(),
        ..report
    };
    if candidates.is_empty() {
        log::info!("[{}] nothing parsed", config.name);
        return report;
    }

    ctx.normalizer
        .apply(&mut candidates, config.locale, Utc::now());

    let prefiltered = match prefilter(ctx.storage.as_ref(), candidates).await {
        Ok(prefiltered) => prefiltered,
        Err(error) => {
            log::error!("[{}] duplicate check failed: {}", config.name, error);
            return report.failed(error);
        }
    };
    report.skipped_duplicates = prefiltered.duplicates;
    if prefiltered.fresh.is_empty() {
        log::info!("[{}] {} parsed, all known", config.name, report.parsed);
        return report;
    }

    let classification = ctx.classifier.classify(prefiltered.fresh).await;
    report.relevant = classification.relevant_count();
    report.classification_degraded = classification.is_degraded();

    let stored = store_relevant(ctx.storage.as_ref(), &classification.articles).await;
    report.stored = stored.stored;
    report.skipped_duplicates += stored.duplicates;
    if stored.failed > 0 {
        report.error = Some(format!("{} articles could not be stored", stored.failed));
    }

    log::info!(
        "[{}] {} parsed, {} relevant, {} stored, {} duplicates",
        config.name,
        report.parsed,
        report.relevant,
        report.stored,
        report.skipped_duplicates
    );
    report
}

/// Fetch budget: one HTTP timeout per page, plus the render wait for
/// browser-backed sources.
fn fetch_ceiling(ctx: &AppContext, adapter: &dyn SourceAdapter) -> Duration {
    let config = adapter.config();
    let pages = config.pages.len().max(1) as u64;
    let mut secs = ctx.config.http.timeout_secs * pages;
    if config.kind == SourceKind::Rendered {
        secs += ctx.config.browser.wait_timeout_secs * pages;
    }
    Duration::from_secs(secs.max(1))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::{CandidateArticle, Config, SourceConfig, SourcePage, SourceSelectors};
    use crate::services::classifier::{Classification, PassThroughClassifier, RelevanceClassifier};
    use crate::services::push::{DeliveryOutcome, PushGateway, PushMessage};
    use crate::storage::{NewsStorage, SqliteStorage};

    struct FixedSource {
        config: SourceConfig,
        result: std::result::Result<Vec<CandidateArticle>, String>,
        delay: Duration,
    }

    impl FixedSource {
        fn new(name: &str, urls: &[&str]) -> Self {
            Self {
                config: source_config(name),
                result: Ok(urls
                    .iter()
                    .map(|u| {
                        CandidateArticle::new(format!("Новина {u}"), *u, name)
                            .with_raw_date("21.11.2025")
                    })
                    .collect()),
                delay: Duration::ZERO,
            }
        }

        fn failing(name: &str) -> Self {
            Self {
                result: Err("connection refused".to_string()),
                ..Self::new(name, &[])
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for FixedSource {
        fn config(&self) -> &SourceConfig {
            &self.config
        }

        async fn fetch(&self) -> Result<Vec<CandidateArticle>> {
            tokio::time::sleep(self.delay).await;
            self.result
                .clone()
                .map_err(|e| AppError::crawl(&self.config.name, e))
        }
    }

    /// Approves everything except titles containing "курс".
    struct KeywordClassifier;

    #[async_trait]
    impl RelevanceClassifier for KeywordClassifier {
        async fn classify(&self, candidates: Vec<CandidateArticle>) -> Classification {
            let inner = PassThroughClassifier::new("test");
            let mut outcome = inner.classify(candidates).await;
            outcome.degraded_batches = 0;
            for article in &mut outcome.articles {
                if article.candidate.title.contains("курс") {
                    article.verdict = crate::models::Verdict::Rejected;
                }
            }
            outcome
        }
    }

    struct NoPush;

    #[async_trait]
    impl PushGateway for NoPush {
        async fn send(&self, tokens: &[String], _message: &PushMessage) -> Vec<DeliveryOutcome> {
            vec![DeliveryOutcome::InvalidToken; tokens.len()]
        }
    }

    fn source_config(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            kind: SourceKind::Static,
            base_url: format!("https://{name}"),
            pages: vec![SourcePage {
                url: format!("https://{name}/news"),
                content_type: None,
            }],
            locale: Default::default(),
            selectors: SourceSelectors::new("li", "a"),
            enabled: true,
        }
    }

    async fn context(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        classifier: Arc<dyn RelevanceClassifier>,
        http_timeout: u64,
    ) -> (AppContext, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::open_in_memory().await.unwrap());
        let mut config = Config::default();
        config.http.timeout_secs = http_timeout;
        let ctx = AppContext::new(config, storage.clone(), adapters, classifier, Arc::new(NoPush))
            .unwrap();
        (ctx, storage)
    }

    #[tokio::test]
    async fn test_repeated_url_is_stored_once() {
        let adapter = Arc::new(FixedSource::new(
            "a.ua",
            &["https://a.ua/A", "https://a.ua/B", "https://a.ua/A"],
        ));
        let (ctx, storage) =
            context(vec![adapter], Arc::new(KeywordClassifier), 30).await;

        let report = run_crawl_cycle(&ctx, None).await.unwrap();
        assert_eq!(report.parsed(), 3);
        assert_eq!(report.stored(), 2);
        assert_eq!(report.skipped_duplicates(), 1);
        assert_eq!(storage.stats().await.unwrap().total, 2);

        // A second cycle finds everything already stored
        let again = run_crawl_cycle(&ctx, None).await.unwrap();
        assert_eq!(again.stored(), 0);
        assert_eq!(again.skipped_duplicates(), 3);
        assert_eq!(storage.stats().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_repeats_in_a_listing_are_counted() {
        use crate::models::HttpConfig;
        use crate::services::static_page::StaticPageAdapter;
        use crate::utils::http::create_async_client;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ul>
                     <li><a href="/A">Податкова знижка</a></li>
                     <li><a href="/B">Звіт з ЄСВ</a></li>
                     <li><a href="/A">Податкова знижка</a></li>
                   </ul>"#,
            ))
            .mount(&server)
            .await;

        let mut config = source_config("mock.ua");
        config.base_url = server.uri();
        config.pages[0].url = format!("{}/news", server.uri());
        let client = create_async_client(&HttpConfig::default()).unwrap();
        let adapter = Arc::new(StaticPageAdapter::new(config, client).unwrap());
        let (ctx, storage) = context(vec![adapter], Arc::new(KeywordClassifier), 30).await;

        let report = run_crawl_cycle(&ctx, None).await.unwrap();
        assert_eq!(report.parsed(), 3);
        assert_eq!(report.stored(), 2);
        assert_eq!(report.skipped_duplicates(), 1);
        assert_eq!(storage.stats().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_affect_siblings() {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(FixedSource::failing("down.ua")),
            Arc::new(FixedSource::new("up.ua", &["https://up.ua/1"])),
        ];
        let (ctx, _) = context(adapters, Arc::new(KeywordClassifier), 30).await;

        let report = run_crawl_cycle(&ctx, None).await.unwrap();
        assert_eq!(report.failed_sources(), 1);
        assert_eq!(report.stored(), 1);

        let down = report.sources.iter().find(|s| s.source == "down.ua").unwrap();
        assert!(down.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_slow_source_times_out_alone() {
        let slow = FixedSource {
            delay: Duration::from_secs(5),
            ..FixedSource::new("slow.ua", &["https://slow.ua/1"])
        };
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(slow),
            Arc::new(FixedSource::new("fast.ua", &["https://fast.ua/1"])),
        ];
        let (ctx, _) = context(adapters, Arc::new(KeywordClassifier), 1).await;

        let report = run_crawl_cycle(&ctx, None).await.unwrap();
        let slow = report.sources.iter().find(|s| s.source == "slow.ua").unwrap();
        assert!(slow.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.stored(), 1);
    }

    #[tokio::test]
    async fn test_rejected_articles_are_not_stored() {
        let adapter = Arc::new(FixedSource {
            result: Ok(vec![
                CandidateArticle::new("Новий курс долара", "https://a.ua/fx", "a.ua"),
                CandidateArticle::new("Звіт з ЄСВ", "https://a.ua/esv", "a.ua"),
            ]),
            ..FixedSource::new("a.ua", &[])
        });
        let (ctx, storage) = context(vec![adapter], Arc::new(KeywordClassifier), 30).await;

        let report = run_crawl_cycle(&ctx, Some("a.ua")).await.unwrap();
        assert_eq!(report.sources[0].relevant, 1);
        assert_eq!(report.stored(), 1);
        assert!(!storage.exists("https://a.ua/fx").await.unwrap());
    }

    #[tokio::test]
    async fn test_dates_are_normalized_before_storage() {
        let adapter = Arc::new(FixedSource::new("a.ua", &["https://a.ua/1"]));
        let (ctx, storage) = context(vec![adapter], Arc::new(KeywordClassifier), 30).await;

        run_crawl_cycle(&ctx, None).await.unwrap();
        let stored = storage
            .list_articles(&Default::default())
            .await
            .unwrap();
        // 21.11.2025 00:00 at +02:00
        assert_eq!(stored[0].published_at.to_rfc3339(), "2025-11-20T22:00:00+00:00");
    }

    #[tokio::test]
    async fn test_degraded_classification_is_reported() {
        let adapter = Arc::new(FixedSource::new("a.ua", &["https://a.ua/1"]));
        let (ctx, _) = context(
            vec![adapter],
            Arc::new(PassThroughClassifier::new("offline")),
            30,
        )
        .await;

        let report = run_crawl_cycle(&ctx, None).await.unwrap();
        assert!(report.classification_degraded());
        assert_eq!(report.stored(), 1);
    }

    #[tokio::test]
    async fn test_unknown_source_is_an_error() {
        let adapter = Arc::new(FixedSource::new("a.ua", &[]));
        let (ctx, _) = context(vec![adapter], Arc::new(KeywordClassifier), 30).await;
        assert!(run_crawl_cycle(&ctx, Some("b.ua")).await.is_err());
    }
}
