//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::FixedOffset;
use croner::Cron;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{SourceConfig, SourceKind};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client behaviour for static sources
    #[serde(default)]
    pub http: HttpConfig,

    /// Headless browser for rendered sources
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Relevance classification service
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Push delivery service
    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Job calendar and jitter
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Notification content and audience windows
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// News sources
    #[serde(default = "SourceConfig::builtin")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Find an enabled source by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.enabled && s.name == name)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.browser.wait_timeout_secs == 0 {
            return Err(AppError::validation("browser.wait_timeout_secs must be > 0"));
        }
        if self.classifier.batch_size == 0 {
            return Err(AppError::validation("classifier.batch_size must be > 0"));
        }
        if self.push.batch_size == 0 || self.push.batch_size > 100 {
            return Err(AppError::validation("push.batch_size must be within 1..=100"));
        }
        if self.push.max_concurrent == 0 {
            return Err(AppError::validation("push.max_concurrent must be > 0"));
        }
        if self.schedule.run_timeout_secs == 0 {
            return Err(AppError::validation("schedule.run_timeout_secs must be > 0"));
        }
        self.schedule.offset()?;
        for (job, expr) in self.schedule.expressions() {
            parse_cron(expr).map_err(|e| AppError::validation(format!("schedule.{job}: {e}")))?;
        }
        if self.notifications.news_window_days == 0 {
            return Err(AppError::validation("notifications.news_window_days must be > 0"));
        }

        if self.sources.iter().all(|s| !s.enabled) {
            return Err(AppError::validation("No enabled sources defined"));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate source name '{}'",
                    source.name
                )));
            }
            if source.pages.is_empty() {
                return Err(AppError::validation(format!(
                    "Source '{}' has no pages",
                    source.name
                )));
            }
            if source.selectors.item.trim().is_empty() || source.selectors.link.trim().is_empty()
            {
                return Err(AppError::validation(format!(
                    "Source '{}' needs item and link selectors",
                    source.name
                )));
            }
            if source.kind == SourceKind::Rendered && !self.browser.enabled {
                log::warn!(
                    "Source '{}' is rendered but the browser is disabled; it will report empty",
                    source.name
                );
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            browser: BrowserConfig::default(),
            classifier: ClassifierConfig::default(),
            push: PushConfig::default(),
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
            notifications: NotificationConfig::default(),
            sources: SourceConfig::builtin(),
        }
    }
}

/// Parse a five-field calendar expression.
pub fn parse_cron(expr: &str) -> Result<Cron> {
    expr.parse::<Cron>()
        .map_err(|e| AppError::schedule(format!("invalid cron '{expr}': {e}")))
}

/// HTTP client settings for static sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header sent with every page fetch
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum sources fetched at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// WebDriver endpoint for rendered sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// chromedriver / geckodriver URL
    #[serde(default = "defaults::webdriver_url")]
    pub webdriver_url: String,

    /// Upper bound on waiting for the content selector
    #[serde(default = "defaults::wait_timeout")]
    pub wait_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            webdriver_url: defaults::webdriver_url(),
            wait_timeout_secs: defaults::wait_timeout(),
        }
    }
}

/// Chat-completions endpoint used for relevance judgements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Without a key every candidate is passed through as relevant
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "defaults::classifier_url")]
    pub api_url: String,

    #[serde(default = "defaults::classifier_model")]
    pub model: String,

    #[serde(default = "defaults::temperature")]
    pub temperature: f32,

    /// Titles per request
    #[serde(default = "defaults::classifier_batch")]
    pub batch_size: usize,

    #[serde(default = "defaults::classifier_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: defaults::classifier_url(),
            model: defaults::classifier_model(),
            temperature: defaults::temperature(),
            batch_size: defaults::classifier_batch(),
            timeout_secs: defaults::classifier_timeout(),
        }
    }
}

/// Expo push service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "defaults::push_url")]
    pub api_url: String,

    /// Sent as a bearer token when enhanced push security is on
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    /// Messages per request; the service accepts at most 100
    #[serde(default = "defaults::push_batch")]
    pub batch_size: usize,

    /// Requests in flight at once
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::push_url(),
            access_token: None,
            batch_size: defaults::push_batch(),
            max_concurrent: defaults::max_concurrent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "defaults::database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
        }
    }
}

/// Calendar expressions are standard five-field cron, evaluated in `utc_offset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Offset used for calendar matching and for wall-clock dates on sources
    #[serde(default = "defaults::utc_offset")]
    pub utc_offset: String,

    #[serde(default = "defaults::crawl_cron")]
    pub crawl: String,

    #[serde(default = "defaults::deadline_cron")]
    pub deadline: String,

    #[serde(default = "defaults::news_cron")]
    pub news: String,

    /// Upper bound of the random delay before news fan-out
    #[serde(default = "defaults::news_jitter")]
    pub news_jitter_secs: u64,

    /// Upper bound of the random delay before deadline fan-out
    #[serde(default)]
    pub deadline_jitter_secs: u64,

    /// A run exceeding this is abandoned
    #[serde(default = "defaults::run_timeout")]
    pub run_timeout_secs: u64,
}

impl ScheduleConfig {
    /// Parse `utc_offset` (`+02:00`, `-05:30`, `Z`).
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.utc_offset).ok_or_else(|| {
            AppError::validation(format!("schedule.utc_offset '{}' is invalid", self.utc_offset))
        })
    }

    fn expressions(&self) -> [(&'static str, &str); 3] {
        [
            ("crawl", self.crawl.as_str()),
            ("deadline", self.deadline.as_str()),
            ("news", self.news.as_str()),
        ]
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset: defaults::utc_offset(),
            crawl: defaults::crawl_cron(),
            deadline: defaults::deadline_cron(),
            news: defaults::news_cron(),
            news_jitter_secs: defaults::news_jitter(),
            deadline_jitter_secs: 0,
            run_timeout_secs: defaults::run_timeout(),
        }
    }
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Notification content settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Only articles this recent are announced
    #[serde(default = "defaults::news_window")]
    pub news_window_days: i64,

    /// JSON reporting calendar for deadline reminders
    #[serde(default = "defaults::calendar_path")]
    pub calendar_path: String,

    /// Furthest lead time considered when scanning the calendar
    #[serde(default = "defaults::max_lead_days")]
    pub max_lead_days: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            news_window_days: defaults::news_window(),
            calendar_path: defaults::calendar_path(),
            max_lead_days: defaults::max_lead_days(),
        }
    }
}

mod defaults {
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/120.0.0.0 Safari/537.36"
            .to_string()
    }

    pub fn accept_language() -> String {
        "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
    }

    pub fn timeout() -> u64 {
        30
    }

    pub fn max_concurrent() -> usize {
        4
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn webdriver_url() -> String {
        "http://localhost:4444".to_string()
    }

    pub fn wait_timeout() -> u64 {
        10
    }

    pub fn classifier_url() -> String {
        "https://api.openai.com/v1/chat/completions".to_string()
    }

    pub fn classifier_model() -> String {
        "gpt-4o-mini".to_string()
    }

    pub fn temperature() -> f32 {
        0.3
    }

    pub fn classifier_batch() -> usize {
        20
    }

    pub fn classifier_timeout() -> u64 {
        60
    }

    pub fn push_url() -> String {
        "https://exp.host/--/api/v2/push/send".to_string()
    }

    pub fn push_batch() -> usize {
        100
    }

    pub fn database_path() -> String {
        "buhnews.db".to_string()
    }

    pub fn utc_offset() -> String {
        "+02:00".to_string()
    }

    pub fn crawl_cron() -> String {
        "0 8,20 * * *".to_string()
    }

    pub fn deadline_cron() -> String {
        "0 9 * * *".to_string()
    }

    pub fn news_cron() -> String {
        "0 10 * * 1,4".to_string()
    }

    pub fn news_jitter() -> u64 {
        2 * 60 * 60
    }

    pub fn run_timeout() -> u64 {
        30 * 60
    }

    pub fn news_window() -> i64 {
        7
    }

    pub fn calendar_path() -> String {
        "calendar.json".to_string()
    }

    pub fn max_lead_days() -> u32 {
        14
    }
}
