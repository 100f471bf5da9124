// src/models/mod.rs

//! Domain models for the news pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod article;
mod config;
mod deadline;
mod settings;
mod source;
mod token;

// Re-export all public types
pub use article::{
    AUDIENCE_ACCOUNTANT, AUDIENCE_FOP, AUDIENCE_LEGAL_ENTITY, AUDIENCES, ArticleQuery,
    ArticleStats, CATEGORIES, CATEGORY_GENERAL, CATEGORY_OTHER, CandidateArticle,
    ClassifiedArticle, StoredArticle, Verdict, audience_tag,
};
pub use config::{
    BrowserConfig, ClassifierConfig, Config, HttpConfig, NotificationConfig, PushConfig,
    ScheduleConfig, StorageConfig, parse_cron,
};
pub use deadline::{DeadlineCalendar, DeadlineEvent};
pub use settings::{DEFAULT_DAYS_BEFORE, NotificationSettings};
pub use source::{DateLocale, SourceConfig, SourceKind, SourcePage, SourceSelectors};
pub use token::{AnonymousToken, NewsAudience, Platform, PushTarget, TokenOwner, User};
