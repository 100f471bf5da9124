// src/services/classifier.rs

//! Relevance classification of candidate articles.
//!
//! Titles are sent in batches to an OpenAI-compatible chat-completions
//! endpoint which answers, per numbered title, whether it matters to
//! entrepreneurs, companies or accountants. The classifier never fails: a
//! batch the service cannot judge is let through with generic tags and a
//! [`Verdict::Defaulted`] marker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    AUDIENCES, CATEGORIES, CATEGORY_OTHER, CandidateArticle, ClassifiedArticle, ClassifierConfig,
    Verdict,
};

const SYSTEM_PROMPT: &str = "Ти - експерт з бухгалтерського обліку та оподаткування в Україні. \
                             Відповідай тільки у форматі JSON.";

/// Result of classifying one set of candidates.
#[derive(Debug, Default)]
pub struct Classification {
    /// One entry per candidate, in input order
    pub articles: Vec<ClassifiedArticle>,
    /// Batches that fell back to the permissive default
    pub degraded_batches: usize,
}

impl Classification {
    pub fn is_degraded(&self) -> bool {
        self.degraded_batches > 0
    }

    pub fn relevant_count(&self) -> usize {
        self.articles.iter().filter(|a| a.is_relevant()).count()
    }
}

/// Judges candidate relevance for the audience taxonomy.
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    /// Classify every candidate. Service failures degrade, they do not error.
    async fn classify(&self, candidates: Vec<CandidateArticle>) -> Classification;
}

/// Build the classifier described by `config`.
///
/// Without an API key every candidate passes through as relevant.
pub fn from_config(config: &ClassifierConfig) -> Result<Arc<dyn RelevanceClassifier>> {
    match &config.api_key {
        Some(key) if !key.trim().is_empty() => Ok(Arc::new(LlmClassifier::new(config, key)?)),
        _ => {
            log::warn!("Classifier API key not configured, all articles will be accepted");
            Ok(Arc::new(PassThroughClassifier::new(
                "classifier API key not configured",
            )))
        }
    }
}

/// Accepts everything with generic tags.
pub struct PassThroughClassifier {
    reason: String,
}

impl PassThroughClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RelevanceClassifier for PassThroughClassifier {
    async fn classify(&self, candidates: Vec<CandidateArticle>) -> Classification {
        let now = Utc::now();
        let degraded_batches = usize::from(!candidates.is_empty());
        Classification {
            articles: candidates
                .into_iter()
                .map(|c| ClassifiedArticle::fail_open(c, self.reason.clone(), now))
                .collect(),
            degraded_batches,
        }
    }
}

// --- Chat-completions wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// The service's judgement on one numbered title.
#[derive(Debug, Deserialize)]
struct Judgement {
    number: usize,
    #[serde(default)]
    is_relevant: bool,
    #[serde(default)]
    target_audience: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Classifier backed by a chat-completions API.
pub struct LlmClassifier {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    batch_size: usize,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn judge_batch(&self, batch: &[CandidateArticle]) -> Result<Vec<Judgement>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(batch),
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::classification(format!("{status}: {body}")));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::classification("response has no content"))?;

        extract_judgements(&content)
    }
}

#[async_trait]
impl RelevanceClassifier for LlmClassifier {
    async fn classify(&self, candidates: Vec<CandidateArticle>) -> Classification {
        let now = Utc::now();
        let mut outcome = Classification::default();

        for batch in candidates.chunks(self.batch_size) {
            match self.judge_batch(batch).await {
                Ok(judgements) => {
                    outcome.articles.extend(apply_judgements(batch, judgements, now));
                }
                Err(error) => {
                    log::warn!(
                        "Classification of {} titles failed, accepting them: {}",
                        batch.len(),
                        error
                    );
                    outcome.degraded_batches += 1;
                    let reason = error.to_string();
                    outcome.articles.extend(
                        batch
                            .iter()
                            .cloned()
                            .map(|c| ClassifiedArticle::fail_open(c, reason.clone(), now)),
                    );
                }
            }
        }

        log::info!(
            "Classified {} titles: {} relevant, {} degraded batches",
            outcome.articles.len(),
            outcome.relevant_count(),
            outcome.degraded_batches
        );
        outcome
    }
}

fn build_prompt(batch: &[CandidateArticle]) -> String {
    let titles = batch
        .iter()
        .enumerate()
        .map(|(i, c)| match &c.excerpt {
            Some(excerpt) => format!("{}. {}\n   {}", i + 1, c.title, excerpt),
            None => format!("{}. {}", i + 1, c.title),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Проаналізуй наступні новини та визнач, які з них будуть корисні для нашої аудиторії:
- ФОП (фізичні особи-підприємці)
- ЮО (юридичні особи)
- Бухгалтери

НОВИНИ:
{titles}

Для КОЖНОЇ новини поверни JSON об'єкт з полями:
- number: номер новини (1, 2, 3...)
- is_relevant: true/false
- target_audience: масив з ["ФОП", "ЮО", "бухгалтери"]
- category: одна з категорій ({categories})
- summary: короткий опис (1-2 речення), чому ця новина важлива

Релевантними є новини про зміни в податковому законодавстві, нові звіти та терміни подання,
ставки податків, ЄСВ і мінімальної зарплати, бухгалтерський облік, штрафи та практичні поради.
НЕ релевантні: макроекономіка без практичного застосування, політика, банківські акції, загальні новини.

Поверни об'єкт {{"news": [...]}} з одним елементом для кожної новини."#,
        categories = CATEGORIES.join(", ")
    )
}

/// Find the judgement array in the service's JSON answer.
///
/// Accepted shapes: `{"news": [..]}`, `{"results": [..]}`, a bare array, or
/// an object whose first array-valued field holds the judgements. Elements
/// that do not parse are dropped.
fn extract_judgements(content: &str) -> Result<Vec<Judgement>> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| AppError::classification(format!("response is not JSON: {e}")))?;

    let items = match parsed {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("news").or_else(|| map.remove("results")) {
            Some(Value::Array(items)) => items,
            _ => map
                .into_iter()
                .find_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .unwrap_or_default(),
        },
        _ => Vec::new(),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Merge judgements into the batch by 1-based number.
fn apply_judgements(
    batch: &[CandidateArticle],
    judgements: Vec<Judgement>,
    now: DateTime<Utc>,
) -> Vec<ClassifiedArticle> {
    batch
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let candidate = candidate.clone();
            match judgements.iter().find(|j| j.number == i + 1) {
                Some(judgement) => judged(candidate, judgement, now),
                None => ClassifiedArticle::unjudged(candidate, now),
            }
        })
        .collect()
}

fn judged(candidate: CandidateArticle, judgement: &Judgement, now: DateTime<Utc>) -> ClassifiedArticle {
    let target_audience = judgement
        .target_audience
        .iter()
        .filter(|tag| AUDIENCES.contains(&tag.as_str()))
        .cloned()
        .collect();
    let category = judgement
        .category
        .as_deref()
        .filter(|c| CATEGORIES.contains(c))
        .unwrap_or(CATEGORY_OTHER)
        .to_string();
    let summary = judgement
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&candidate.title)
        .to_string();

    ClassifiedArticle {
        published_at: candidate.published_at.unwrap_or(now),
        verdict: if judgement.is_relevant {
            Verdict::Approved
        } else {
            Verdict::Rejected
        },
        target_audience,
        category,
        summary,
        candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AUDIENCE_ACCOUNTANT, AUDIENCE_FOP, CATEGORY_GENERAL};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidates() -> Vec<CandidateArticle> {
        vec![
            CandidateArticle::new("Нові ставки ЄСВ з 2026 року", "https://a.ua/1", "a"),
            CandidateArticle::new("Курс біткоїна оновив максимум", "https://a.ua/2", "a"),
        ]
    }

    fn config(server: &MockServer) -> ClassifierConfig {
        ClassifierConfig {
            api_key: Some("test-key".to_string()),
            api_url: format!("{}/v1/chat/completions", server.uri()),
            ..ClassifierConfig::default()
        }
    }

    fn completion(content: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }]
        }))
    }

    #[tokio::test]
    async fn test_judgements_are_applied_by_number() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(completion(json!({ "news": [
                { "number": 2, "is_relevant": false, "target_audience": [], "category": "інше", "summary": "" },
                { "number": 1, "is_relevant": true, "target_audience": ["ФОП", "бухгалтери", "інвестори"],
                  "category": "ЄСВ", "summary": "Змінюються ставки внеску." },
            ]})))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = LlmClassifier::new(&config(&server), "test-key").unwrap();
        let outcome = classifier.classify(candidates()).await;

        assert!(!outcome.is_degraded());
        assert_eq!(outcome.articles.len(), 2);

        let first = &outcome.articles[0];
        assert_eq!(first.verdict, Verdict::Approved);
        assert_eq!(first.category, "ЄСВ");
        assert_eq!(first.summary, "Змінюються ставки внеску.");
        assert_eq!(
            first.target_audience.iter().map(String::as_str).collect::<Vec<_>>(),
            vec![AUDIENCE_FOP, AUDIENCE_ACCOUNTANT]
        );

        let second = &outcome.articles[1];
        assert_eq!(second.verdict, Verdict::Rejected);
        assert_eq!(second.summary, "Курс біткоїна оновив максимум");
    }

    #[tokio::test]
    async fn test_unmatched_number_is_not_relevant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion(json!({ "results": [
                { "number": 1, "is_relevant": true, "target_audience": ["ЮО"], "category": "податки", "summary": "s" },
            ]})))
            .mount(&server)
            .await;

        let classifier = LlmClassifier::new(&config(&server), "test-key").unwrap();
        let outcome = classifier.classify(candidates()).await;

        assert!(outcome.articles[0].is_relevant());
        assert!(!outcome.articles[1].is_relevant());
        assert_eq!(outcome.articles[1].verdict, Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_open() {
        let config = ClassifierConfig {
            api_key: Some("test-key".to_string()),
            api_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            timeout_secs: 2,
            ..ClassifierConfig::default()
        };
        let classifier = LlmClassifier::new(&config, "test-key").unwrap();
        let outcome = classifier.classify(candidates()).await;

        assert!(outcome.is_degraded());
        assert_eq!(outcome.articles.len(), 2);
        for article in &outcome.articles {
            assert!(article.is_relevant());
            assert!(article.verdict.is_defaulted());
            assert!(!article.target_audience.is_empty());
            assert_eq!(article.category, CATEGORY_GENERAL);
        }
    }

    #[tokio::test]
    async fn test_error_status_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let classifier = LlmClassifier::new(&config(&server), "test-key").unwrap();
        let outcome = classifier.classify(candidates()).await;
        assert_eq!(outcome.degraded_batches, 1);
        assert!(outcome.articles.iter().all(|a| a.verdict.is_defaulted()));
    }

    #[tokio::test]
    async fn test_batches_are_sent_separately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion(json!([
                { "number": 1, "is_relevant": true, "target_audience": ["ФОП"], "category": "податки", "summary": "s" },
            ])))
            .expect(2)
            .mount(&server)
            .await;

        let config = ClassifierConfig {
            batch_size: 1,
            ..config(&server)
        };
        let classifier = LlmClassifier::new(&config, "test-key").unwrap();
        let outcome = classifier.classify(candidates()).await;
        assert_eq!(outcome.relevant_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_key_passes_everything_through() {
        let classifier = from_config(&ClassifierConfig::default()).unwrap();
        let outcome = classifier.classify(candidates()).await;

        assert!(outcome.is_degraded());
        assert!(outcome.articles.iter().all(|a| a.is_relevant()));
    }

    #[test]
    fn test_extract_judgements_shapes() {
        let first_array = r#"{"items": [{"number": 1, "is_relevant": true}], "note": "ok"}"#;
        assert_eq!(extract_judgements(first_array).unwrap().len(), 1);

        let malformed_entry = r#"{"news": [{"number": 1}, {"title": "no number"}]}"#;
        assert_eq!(extract_judgements(malformed_entry).unwrap().len(), 1);

        assert!(extract_judgements(r#"{"news": "none"}"#).unwrap().is_empty());
        assert!(extract_judgements("not json").is_err());
    }

    #[test]
    fn test_unknown_category_becomes_other() {
        let judgement = Judgement {
            number: 1,
            is_relevant: true,
            target_audience: vec![],
            category: Some("криптовалюта".to_string()),
            summary: None,
        };
        let classified = judged(candidates().remove(0), &judgement, Utc::now());
        assert_eq!(classified.category, CATEGORY_OTHER);
        assert_eq!(classified.summary, "Нові ставки ЄСВ з 2026 року");
    }

    #[test]
    fn test_prompt_numbers_from_one() {
        let prompt = build_prompt(&candidates());
        assert!(prompt.contains("1. Нові ставки ЄСВ з 2026 року"));
        assert!(prompt.contains("2. Курс біткоїна оновив максимум"));
    }
}
