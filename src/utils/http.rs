// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Outcome of fetching one listing page.
#[derive(Debug)]
pub enum PageFetch {
    /// Markup returned with a success status
    Page(String),
    /// The site refused us (401/403/429); not worth retrying this cycle
    Blocked(StatusCode),
}

/// Create an HTTP client that presents itself like a desktop browser.
pub fn create_async_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language)
            .map_err(|e| AppError::config(format!("http.accept_language: {e}")))?,
    );

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a listing page, separating "blocked" from other failures.
pub async fn fetch_page_async(client: &reqwest::Client, url: &str) -> Result<PageFetch> {
    let response = client.get(url).send().await?;
    let status = response.status();

    if is_block_status(status) {
        return Ok(PageFetch::Blocked(status));
    }
    if !status.is_success() {
        return Err(AppError::crawl(url, format!("unexpected status {status}")));
    }
    Ok(PageFetch::Page(response.text().await?))
}

fn is_block_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    )
}
