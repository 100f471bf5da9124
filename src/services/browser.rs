// src/services/browser.rs

//! Headless browser rendering for client-rendered sources.
//!
//! The crawler only needs three browser capabilities: navigate, wait for a
//! selector, evaluate a script. [`BrowserRenderer`] exposes exactly that so the
//! rendered adapter can be tested without a WebDriver session.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::Result;

/// One navigate / wait / evaluate round trip.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    /// CSS selector that signals the content has rendered
    pub wait_for: String,
    pub wait_timeout: Duration,
    /// Function body evaluated in the page; its return value is the result
    pub script: String,
    /// Passed to the script as `arguments`
    pub args: Vec<Value>,
}

/// Renders a page and evaluates a script in it.
#[async_trait]
pub trait BrowserRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<Value>;
}

type CloseFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Shuts a browser session down exactly once.
///
/// A render abandoned by the fetch ceiling drops its future mid-await; the
/// guard then hands the shutdown to the runtime instead of leaking the session.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) struct SessionGuard {
    close: Option<CloseFn>,
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl SessionGuard {
    pub(crate) fn new<F, Fut>(close: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            close: Some(Box::new(move || close().boxed())),
        }
    }

    /// Close now and wait for it.
    pub(crate) async fn close(mut self) {
        if let Some(close) = self.close.take() {
            close().await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(close) = self.close.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::debug!("Closing abandoned browser session in the background");
                handle.spawn(close());
            }
            Err(_) => log::warn!("No runtime left to close an abandoned browser session"),
        }
    }
}

#[cfg(feature = "browser")]
pub use webdriver::WebDriverRenderer;

#[cfg(feature = "browser")]
mod webdriver {
    use async_trait::async_trait;
    use fantoccini::{Client, ClientBuilder, Locator};
    use serde_json::{Map, Value, json};

    use super::{BrowserRenderer, RenderRequest, SessionGuard};
    use crate::error::{AppError, Result};
    use crate::models::BrowserConfig;

    /// Renderer backed by a WebDriver server (chromedriver or geckodriver).
    ///
    /// Each render opens a fresh headless session and closes it afterwards,
    /// also when the render itself is cancelled.
    pub struct WebDriverRenderer {
        webdriver_url: String,
        user_agent: String,
    }

    impl WebDriverRenderer {
        pub fn new(config: &BrowserConfig, user_agent: &str) -> Self {
            Self {
                webdriver_url: config.webdriver_url.clone(),
                user_agent: user_agent.to_string(),
            }
        }

        fn capabilities(&self) -> Map<String, Value> {
            let mut caps = Map::new();
            caps.insert(
                "goog:chromeOptions".to_string(),
                json!({
                    "args": [
                        "--headless=new",
                        "--no-sandbox",
                        "--disable-dev-shm-usage",
                        "--disable-blink-features=AutomationControlled",
                        format!("--user-agent={}", self.user_agent),
                    ]
                }),
            );
            caps.insert(
                "moz:firefoxOptions".to_string(),
                json!({ "args": ["-headless"] }),
            );
            caps
        }

        async fn extract(client: &Client, request: &RenderRequest) -> Result<Value> {
            client.goto(&request.url).await.map_err(AppError::browser)?;

            let waited = client
                .wait()
                .at_most(request.wait_timeout)
                .for_element(Locator::Css(&request.wait_for))
                .await;
            if let Err(e) = waited {
                log::warn!(
                    "'{}' did not appear on {} within {:?}: {}",
                    request.wait_for,
                    request.url,
                    request.wait_timeout,
                    e
                );
            }

            client
                .execute(&request.script, request.args.clone())
                .await
                .map_err(AppError::browser)
        }
    }

    #[async_trait]
    impl BrowserRenderer for WebDriverRenderer {
        async fn render(&self, request: &RenderRequest) -> Result<Value> {
            let client = ClientBuilder::native()
                .capabilities(self.capabilities())
                .connect(&self.webdriver_url)
                .await
                .map_err(|e| AppError::browser(format!("{}: {}", self.webdriver_url, e)))?;

            let session = client.clone();
            let guard = SessionGuard::new(move || async move {
                if let Err(e) = session.close().await {
                    log::debug!("Closing browser session failed: {}", e);
                }
            });

            let result = Self::extract(&client, request).await;
            guard.close().await;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_guard(closed: &Arc<AtomicUsize>) -> SessionGuard {
        let closed = Arc::clone(closed);
        SessionGuard::new(move || async move {
            closed.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_explicit_close_runs_once() {
        let closed = Arc::new(AtomicUsize::new(0));
        counting_guard(&closed).close().await;
        tokio::task::yield_now().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_render_still_closes_session() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let render = async move {
            let _guard = SessionGuard::new(move || async move {
                let _ = tx.send(());
            });
            // Stands in for a navigation that never finishes
            tokio::time::sleep(Duration::from_secs(30)).await;
        };

        let abandoned = tokio::time::timeout(Duration::from_millis(50), render).await;
        assert!(abandoned.is_err());

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("session was never closed")
            .unwrap();
    }
}
