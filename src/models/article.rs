// src/models/article.rs

//! Article records as they move through a crawl cycle.
//!
//! `CandidateArticle` is what an adapter scrapes, `ClassifiedArticle` is what
//! the classifier hands to storage, and `StoredArticle` is the persisted row.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audience tag for individual entrepreneurs.
pub const AUDIENCE_FOP: &str = "ФОП";
/// Audience tag for legal entities.
pub const AUDIENCE_LEGAL_ENTITY: &str = "ЮО";
/// Audience tag for accountants.
pub const AUDIENCE_ACCOUNTANT: &str = "бухгалтери";

/// The fixed audience taxonomy.
pub const AUDIENCES: [&str; 3] = [AUDIENCE_FOP, AUDIENCE_LEGAL_ENTITY, AUDIENCE_ACCOUNTANT];

/// Resolve an audience tag, also accepting ASCII aliases for terminals
/// without Cyrillic input.
pub fn audience_tag(name: &str) -> Option<&'static str> {
    let name = name.trim();
    match name.to_lowercase().as_str() {
        "fop" => return Some(AUDIENCE_FOP),
        "legal_entity" | "yuo" => return Some(AUDIENCE_LEGAL_ENTITY),
        "accountant" | "accountants" => return Some(AUDIENCE_ACCOUNTANT),
        _ => {}
    }
    AUDIENCES
        .iter()
        .copied()
        .find(|tag| tag.to_lowercase() == name.to_lowercase())
}

/// Categories the classifier may assign.
pub const CATEGORIES: [&str; 7] = [
    "податки",
    "звітність",
    "законодавство",
    "ЄСВ",
    "зарплата",
    "бухоблік",
    CATEGORY_OTHER,
];

/// Category for judged items outside the taxonomy.
pub const CATEGORY_OTHER: &str = "інше";

/// Category given to everything when the classifier is unavailable.
pub const CATEGORY_GENERAL: &str = "загальне";

/// A raw record scraped from one source during one crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateArticle {
    pub title: String,
    /// Absolute, scheme-qualified URL; the deduplication key
    pub url: String,
    /// Name of the source that produced this record
    pub source: String,
    /// Date text exactly as the source printed it
    #[serde(default)]
    pub raw_date: String,
    /// Sub-type such as "news" or "articles"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Lead paragraph, when the listing shows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    /// Filled by the date normalizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl CandidateArticle {
    pub fn new(title: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            source: source.into(),
            raw_date: String::new(),
            content_type: None,
            excerpt: None,
            published_at: None,
        }
    }

    pub fn with_raw_date(mut self, raw_date: impl Into<String>) -> Self {
        self.raw_date = raw_date.into();
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_excerpt(mut self, excerpt: Option<String>) -> Self {
        self.excerpt = excerpt.filter(|e| !e.is_empty());
        self
    }
}

/// The classifier's decision on one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Judged relevant by the service
    Approved,
    /// Judged irrelevant, or not judged at all
    Rejected,
    /// The service could not be consulted; let through as relevant
    Defaulted { reason: String },
}

impl Verdict {
    pub fn is_relevant(&self) -> bool {
        !matches!(self, Verdict::Rejected)
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Verdict::Defaulted { .. })
    }
}

/// A candidate plus the classifier's judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedArticle {
    #[serde(flatten)]
    pub candidate: CandidateArticle,
    pub verdict: Verdict,
    pub target_audience: BTreeSet<String>,
    pub category: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
}

impl ClassifiedArticle {
    /// Judgement used when the classification service cannot be consulted.
    pub fn fail_open(
        candidate: CandidateArticle,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let published_at = candidate.published_at.unwrap_or(now);
        Self {
            summary: candidate.title.clone(),
            candidate,
            verdict: Verdict::Defaulted {
                reason: reason.into(),
            },
            target_audience: AUDIENCES.iter().map(|a| a.to_string()).collect(),
            category: CATEGORY_GENERAL.to_string(),
            published_at,
        }
    }

    /// Judgement for a candidate the service did not mention.
    pub fn unjudged(candidate: CandidateArticle, now: DateTime<Utc>) -> Self {
        let published_at = candidate.published_at.unwrap_or(now);
        Self {
            summary: candidate.title.clone(),
            candidate,
            verdict: Verdict::Rejected,
            target_audience: BTreeSet::new(),
            category: CATEGORY_OTHER.to_string(),
            published_at,
        }
    }

    pub fn url(&self) -> &str {
        &self.candidate.url
    }

    pub fn is_relevant(&self) -> bool {
        self.verdict.is_relevant()
    }
}

/// A persisted article row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    pub categories: Vec<String>,
    pub target_audience: Vec<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_published: bool,
    pub is_push_sent: bool,
}

/// Filter for reading stored articles.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    /// Only articles published at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub category: Option<String>,
    /// Audience tag the article must carry
    pub audience: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ArticleQuery {
    pub fn recent(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Self::default()
        }
    }
}

/// Aggregate numbers over the article table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArticleStats {
    pub total: usize,
    pub published: usize,
    pub push_sent: usize,
    /// (source, count), most productive first
    pub by_source: Vec<(String, usize)>,
}
