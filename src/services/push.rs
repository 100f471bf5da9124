// src/services/push.rs

//! Push delivery through the Expo push service.
//!
//! The gateway reports one [`DeliveryOutcome`] per token, in input order. It
//! never fails as a whole: a rejected request marks every token of that chunk
//! as a transient failure and the next scheduled cycle tries again.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::PushConfig;

/// Expo's marker for a token whose app was uninstalled or whose
/// registration expired.
const DEVICE_NOT_REGISTERED: &str = "DeviceNotRegistered";

/// Content shared by every recipient of one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// Structured payload delivered to the app
    pub data: Value,
}

/// What happened to one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the push service
    Delivered { ticket_id: Option<String> },
    /// Rejected for a reason that may go away; not retried this cycle
    Transient(String),
    /// The device no longer accepts pushes; the token should be dropped
    DeviceUnregistered,
    /// Not a push token at all; never sent
    InvalidToken,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Sends one message to many device tokens.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Vec<DeliveryOutcome>;
}

/// Whether `token` has the shape of an Expo push token.
pub fn is_valid_token(token: &str) -> bool {
    ["ExponentPushToken[", "ExpoPushToken["]
        .iter()
        .any(|prefix| {
            token
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(']'))
                .is_some_and(|inner| !inner.is_empty())
        })
}

#[derive(Debug, Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a Value,
    sound: &'static str,
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<ExpoTicket>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<TicketDetails>,
}

#[derive(Debug, Deserialize)]
struct TicketDetails {
    #[serde(default)]
    error: Option<String>,
}

impl ExpoTicket {
    fn into_outcome(self) -> DeliveryOutcome {
        if self.status == "ok" {
            return DeliveryOutcome::Delivered { ticket_id: self.id };
        }
        let code = self.details.and_then(|d| d.error);
        if code.as_deref() == Some(DEVICE_NOT_REGISTERED) {
            return DeliveryOutcome::DeviceUnregistered;
        }
        DeliveryOutcome::Transient(
            code.or(self.message)
                .unwrap_or_else(|| format!("status {}", self.status)),
        )
    }
}

/// Gateway for `https://exp.host/--/api/v2/push/send`.
pub struct ExpoPushGateway {
    client: Client,
    api_url: String,
    access_token: Option<String>,
    batch_size: usize,
    max_concurrent: usize,
}

impl ExpoPushGateway {
    pub fn new(config: &PushConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            access_token: config.access_token.clone().filter(|t| !t.trim().is_empty()),
            batch_size: config.batch_size.clamp(1, 100),
            max_concurrent: config.max_concurrent.max(1),
        })
    }

    /// Post one chunk; returns (input index, outcome) pairs.
    async fn send_chunk(
        &self,
        chunk: Vec<(usize, &str)>,
        message: &PushMessage,
    ) -> Vec<(usize, DeliveryOutcome)> {
        match self.post_chunk(&chunk, message).await {
            Ok(tickets) => {
                let mut tickets = tickets.into_iter();
                chunk
                    .into_iter()
                    .map(|(index, _)| {
                        let outcome = tickets.next().map_or_else(
                            || DeliveryOutcome::Transient("no ticket returned".to_string()),
                            ExpoTicket::into_outcome,
                        );
                        (index, outcome)
                    })
                    .collect()
            }
            Err(error) => {
                log::warn!("Push request for {} tokens failed: {}", chunk.len(), error);
                let reason = error.to_string();
                chunk
                    .into_iter()
                    .map(|(index, _)| (index, DeliveryOutcome::Transient(reason.clone())))
                    .collect()
            }
        }
    }

    async fn post_chunk(
        &self,
        chunk: &[(usize, &str)],
        message: &PushMessage,
    ) -> Result<Vec<ExpoTicket>> {
        let body: Vec<ExpoMessage> = chunk
            .iter()
            .map(|(_, token)| ExpoMessage {
                to: token,
                title: &message.title,
                body: &message.body,
                data: &message.data,
                sound: "default",
            })
            .collect();

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::push(format!("{status}: {text}")));
        }

        let parsed: ExpoResponse = response.json().await?;
        Ok(parsed.data)
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Vec<DeliveryOutcome> {
        let mut outcomes = vec![DeliveryOutcome::InvalidToken; tokens.len()];

        let valid: Vec<(usize, &str)> = tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| is_valid_token(token))
            .map(|(i, token)| (i, token.as_str()))
            .collect();

        let invalid = tokens.len() - valid.len();
        if invalid > 0 {
            log::warn!("Skipping {} malformed push tokens", invalid);
        }

        let requests: Vec<_> = valid
            .chunks(self.batch_size)
            .map(|chunk| self.send_chunk(chunk.to_vec(), message))
            .collect();

        let mut results = stream::iter(requests).buffer_unordered(self.max_concurrent);

        while let Some(chunk_outcomes) = results.next().await {
            for (index, outcome) in chunk_outcomes {
                outcomes[index] = outcome;
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> PushMessage {
        PushMessage {
            title: "📰 Нова стаття для вас".to_string(),
            body: "Зміни до ПДФО".to_string(),
            data: json!({ "type": "news", "news_id": 1 }),
        }
    }

    fn gateway(server: &MockServer, batch_size: usize) -> ExpoPushGateway {
        ExpoPushGateway::new(&PushConfig {
            api_url: format!("{}/--/api/v2/push/send", server.uri()),
            access_token: Some("expo-secret".to_string()),
            batch_size,
            ..PushConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_token_format() {
        assert!(is_valid_token("ExponentPushToken[abc123]"));
        assert!(is_valid_token("ExpoPushToken[abc123]"));
        assert!(!is_valid_token("ExponentPushToken[]"));
        assert!(!is_valid_token("fcm:abc123"));
        assert!(!is_valid_token("ExponentPushToken[abc"));
    }

    #[tokio::test]
    async fn test_outcomes_follow_tickets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/--/api/v2/push/send"))
            .and(header("authorization", "Bearer expo-secret"))
            .and(body_partial_json(json!([{ "to": "ExponentPushToken[a]", "sound": "default" }])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [
                { "status": "ok", "id": "ticket-a" },
                { "status": "error", "message": "gone", "details": { "error": "DeviceNotRegistered" } },
                { "status": "error", "message": "too big", "details": { "error": "MessageTooBig" } },
            ]})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = vec![
            "ExponentPushToken[a]".to_string(),
            "not-a-token".to_string(),
            "ExponentPushToken[b]".to_string(),
            "ExponentPushToken[c]".to_string(),
        ];
        let outcomes = gateway(&server, 100).send(&tokens, &message()).await;

        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::Delivered {
                    ticket_id: Some("ticket-a".to_string())
                },
                DeliveryOutcome::InvalidToken,
                DeliveryOutcome::DeviceUnregistered,
                DeliveryOutcome::Transient("MessageTooBig".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_request_is_transient_for_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tokens = vec![
            "ExponentPushToken[a]".to_string(),
            "ExponentPushToken[b]".to_string(),
        ];
        let outcomes = gateway(&server, 100).send(&tokens, &message()).await;
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o, DeliveryOutcome::Transient(_)))
        );
    }

    #[tokio::test]
    async fn test_tokens_are_chunked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": [{ "status": "ok", "id": "t" }] })),
            )
            .expect(3)
            .mount(&server)
            .await;

        let tokens: Vec<String> = (0..3).map(|i| format!("ExponentPushToken[{i}]")).collect();
        let outcomes = gateway(&server, 1).send(&tokens, &message()).await;
        assert!(outcomes.iter().all(DeliveryOutcome::is_delivered));
    }

    #[tokio::test]
    async fn test_missing_tickets_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": [{ "status": "ok", "id": "t" }] })),
            )
            .mount(&server)
            .await;

        let tokens = vec![
            "ExponentPushToken[a]".to_string(),
            "ExponentPushToken[b]".to_string(),
        ];
        let outcomes = gateway(&server, 100).send(&tokens, &message()).await;
        assert!(outcomes[0].is_delivered());
        assert!(matches!(outcomes[1], DeliveryOutcome::Transient(_)));
    }
}
