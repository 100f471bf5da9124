//! Storage abstractions for articles and the push audience.
//!
//! Two seams share one backend:
//! - [`NewsStorage`]: articles, keyed by their globally unique URL
//! - [`AudienceStorage`]: users, anonymous device tokens and notification settings
//!
//! The URL uniqueness constraint is enforced by the store itself, so
//! overlapping crawl cycles never need an external lock.

pub mod schema;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    AnonymousToken, ArticleQuery, ArticleStats, ClassifiedArticle, NewsAudience,
    NotificationSettings, Platform, PushTarget, StoredArticle, User,
};

// Re-export for convenience
pub use sqlite::SqliteStorage;

/// Result of offering an article to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New row with this id
    Inserted(i64),
    /// The URL was already stored; nothing written
    Duplicate,
}

/// Result of linking an anonymous token to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Token moved onto the user
    Linked,
    /// Token had already been absorbed by this user id
    AlreadyLinked(i64),
    /// No anonymous token with that value
    NotFound,
}

/// Trait for article storage backends.
#[async_trait]
pub trait NewsStorage: Send + Sync {
    /// Whether an article with this URL is stored.
    async fn exists(&self, url: &str) -> Result<bool>;

    /// The subset of `urls` already stored.
    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>>;

    /// Insert a classified article; a URL collision is reported, not raised.
    async fn insert_article(&self, article: &ClassifiedArticle) -> Result<InsertOutcome>;

    async fn get_article(&self, id: i64) -> Result<Option<StoredArticle>>;

    /// Published articles matching `query`, newest first.
    async fn list_articles(&self, query: &ArticleQuery) -> Result<Vec<StoredArticle>>;

    /// Categories with the number of published articles in each.
    async fn categories(&self) -> Result<Vec<(String, usize)>>;

    async fn stats(&self) -> Result<ArticleStats>;

    /// Newest published, not yet announced article published at or after `since`.
    async fn next_unsent(&self, since: DateTime<Utc>) -> Result<Option<StoredArticle>>;

    /// Flag an article as announced. Returns false if it was already flagged.
    async fn mark_push_sent(&self, id: i64) -> Result<bool>;
}

/// Trait for push audience backends.
#[async_trait]
pub trait AudienceStorage: Send + Sync {
    /// Create a user, or return the existing one with this email.
    async fn ensure_user(&self, email: &str) -> Result<User>;

    async fn get_user(&self, id: i64) -> Result<Option<User>>;

    async fn set_user_active(&self, id: i64, active: bool) -> Result<()>;

    /// Store the user's push token, replacing any previous one.
    async fn set_user_token(&self, user_id: i64, token: &str) -> Result<()>;

    async fn clear_user_token(&self, user_id: i64) -> Result<()>;

    /// Register a pre-login device token; re-registration refreshes it.
    async fn register_anonymous_token(
        &self,
        token: &str,
        platform: Platform,
        device_id: Option<&str>,
    ) -> Result<AnonymousToken>;

    async fn find_anonymous_token(&self, token: &str) -> Result<Option<AnonymousToken>>;

    /// Move an anonymous token onto a user. One way; never undone.
    async fn link_anonymous_token(&self, token: &str, user_id: i64) -> Result<LinkOutcome>;

    async fn remove_anonymous_token(&self, id: i64) -> Result<()>;

    /// Settings for a user, created with defaults on first access.
    async fn notification_settings(&self, user_id: i64) -> Result<NotificationSettings>;

    async fn update_notification_settings(&self, settings: &NotificationSettings) -> Result<()>;

    /// Registered users with news enabled plus unlinked anonymous tokens.
    async fn news_audience(&self) -> Result<NewsAudience>;

    /// Registered users whose reminder lead times include `days_until`.
    async fn deadline_audience(&self, days_until: u32) -> Result<Vec<PushTarget>>;
}

/// A backend serving both seams.
pub trait Storage: NewsStorage + AudienceStorage {}

impl<T: NewsStorage + AudienceStorage> Storage for T {}
