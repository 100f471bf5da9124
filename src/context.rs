// src/context.rs

//! Process-wide worker context.
//!
//! Built once at start-up and handed to every job by reference. It owns the
//! shared HTTP client (inside the adapters), the storage handle and the
//! external service clients, so jobs never reach for globals.

use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::pipeline::normalize::DateNormalizer;
use crate::services::browser::BrowserRenderer;
use crate::services::classifier::{self, RelevanceClassifier};
use crate::services::push::{ExpoPushGateway, PushGateway};
use crate::services::sources::{SourceAdapter, build_adapters};
use crate::storage::{SqliteStorage, Storage};
use crate::utils::http::create_async_client;

/// Everything a crawl or notification job needs.
pub struct AppContext {
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
    pub classifier: Arc<dyn RelevanceClassifier>,
    pub push: Arc<dyn PushGateway>,
    pub normalizer: DateNormalizer,
}

impl AppContext {
    /// Build the production context: SQLite storage, HTTP adapters, the
    /// configured classifier and the Expo gateway.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = open_storage(&config.storage.database_path).await?;
        let client = create_async_client(&config.http)?;
        let adapters = build_adapters(&config, &client, build_renderer(&config))?;
        let classifier = classifier::from_config(&config.classifier)?;
        let push: Arc<dyn PushGateway> = Arc::new(ExpoPushGateway::new(&config.push)?);

        Self::new(config, storage, adapters, classifier, push)
    }

    /// Assemble a context from explicit parts.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        classifier: Arc<dyn RelevanceClassifier>,
        push: Arc<dyn PushGateway>,
    ) -> Result<Self> {
        let normalizer = DateNormalizer::new(config.schedule.offset()?)?;
        Ok(Self {
            config: Arc::new(config),
            storage,
            adapters,
            classifier,
            push,
            normalizer,
        })
    }

    /// The adapter for a source name.
    pub fn adapter(&self, name: &str) -> Result<&Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| AppError::config(format!("unknown or disabled source '{name}'")))
    }
}

/// Open the SQLite store, creating parent directories as needed.
pub async fn open_storage(path: &str) -> Result<Arc<dyn Storage>> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    log::debug!("Opening database {}", path);
    Ok(Arc::new(SqliteStorage::open(path).await?))
}

#[cfg(feature = "browser")]
fn build_renderer(config: &Config) -> Option<Arc<dyn BrowserRenderer>> {
    use crate::services::browser::WebDriverRenderer;

    if !config.browser.enabled {
        return None;
    }
    Some(Arc::new(WebDriverRenderer::new(
        &config.browser,
        &config.http.user_agent,
    )))
}

#[cfg(not(feature = "browser"))]
fn build_renderer(config: &Config) -> Option<Arc<dyn BrowserRenderer>> {
    if config.browser.enabled {
        log::warn!("Built without the `browser` feature; rendered sources will fail");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::PassThroughClassifier;
    use crate::services::push::{DeliveryOutcome, PushMessage};
    use async_trait::async_trait;

    struct NoPush;

    #[async_trait]
    impl PushGateway for NoPush {
        async fn send(&self, tokens: &[String], _message: &PushMessage) -> Vec<DeliveryOutcome> {
            vec![DeliveryOutcome::Transient("disabled".to_string()); tokens.len()]
        }
    }

    #[tokio::test]
    async fn test_from_config_opens_database_under_new_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.database_path = dir
            .path()
            .join("data/news.db")
            .to_string_lossy()
            .into_owned();
        config.browser.enabled = false;

        let ctx = AppContext::from_config(config).await.unwrap();
        assert_eq!(ctx.adapters.len(), ctx.config.sources.len());
        assert!(dir.path().join("data/news.db").exists());
        assert!(ctx.adapter("minfin.com.ua").is_ok());
        assert!(ctx.adapter("nope").is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_bad_offset() {
        let mut config = Config::default();
        config.schedule.utc_offset = "Kyiv".to_string();
        let storage = open_storage(":memory:").await.unwrap();

        let result = AppContext::new(
            config,
            storage,
            Vec::new(),
            Arc::new(PassThroughClassifier::new("test")),
            Arc::new(NoPush),
        );
        assert!(result.is_err());
    }
}
