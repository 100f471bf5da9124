// src/pipeline/mod.rs

//! Pipeline entry points for scheduled work.
//!
//! - `run_crawl_cycle`: fetch, normalize, deduplicate, classify and store
//! - `run_deadline_cycle`: remind users of upcoming reporting deadlines
//! - `run_news_cycle`: announce the newest unannounced article

pub mod crawl;
pub mod dedup;
pub mod normalize;
pub mod notify;

pub use crawl::{CrawlReport, SourceReport, run_crawl_cycle, run_source};
pub use normalize::DateNormalizer;
pub use notify::{NotificationKind, NotificationReport, run_deadline_cycle, run_news_cycle};
