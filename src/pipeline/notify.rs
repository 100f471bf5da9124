// src/pipeline/notify.rs

//! Notification cycles.
//!
//! - Deadline reminders: calendar events 1..=N days out, sent to registered
//!   users whose lead times include that distance.
//! - News: the newest unannounced article, sent to registered users with news
//!   enabled plus every unlinked anonymous device.
//!
//! Tokens the push service reports as unregistered are removed right away.

use std::fmt;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;

use crate::context::AppContext;
use crate::error::Result;
use crate::models::{DeadlineCalendar, DeadlineEvent, PushTarget, StoredArticle, TokenOwner};
use crate::services::push::{DeliveryOutcome, PushMessage};

pub const DEADLINE_TITLE: &str = "⏰ Нагадування про дедлайн";
pub const NEWS_TITLE: &str = "📰 Нова стаття для вас";

/// The two notification classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Deadline,
    News,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Deadline => f.write_str("deadline"),
            NotificationKind::News => f.write_str("news"),
        }
    }
}

/// Counts from one notification cycle.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationReport {
    pub kind: NotificationKind,
    /// Distinct messages sent (events for deadlines, at most one article for news)
    pub messages: usize,
    /// Tokens addressed, over all messages
    pub audience: usize,
    pub registered: usize,
    pub anonymous: usize,
    pub success: usize,
    /// Transient rejections and malformed tokens
    pub failure: usize,
    pub removed_tokens: usize,
    /// The article announced by a news cycle
    pub article_id: Option<i64>,
}

impl NotificationReport {
    fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            messages: 0,
            audience: 0,
            registered: 0,
            anonymous: 0,
            success: 0,
            failure: 0,
            removed_tokens: 0,
            article_id: None,
        }
    }

    fn absorb(&mut self, dispatch: Dispatch) {
        self.messages += 1;
        self.audience += dispatch.audience;
        self.success += dispatch.success;
        self.failure += dispatch.failure;
        self.removed_tokens += dispatch.removed;
    }
}

/// Outcome counts for one message sent to one audience.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub audience: usize,
    pub success: usize,
    pub failure: usize,
    pub removed: usize,
}

/// Send `message` to `targets` and drop tokens the service says are dead.
pub async fn dispatch(ctx: &AppContext, targets: &[PushTarget], message: &PushMessage) -> Dispatch {
    let mut outcome = Dispatch {
        audience: targets.len(),
        ..Dispatch::default()
    };
    if targets.is_empty() {
        return outcome;
    }

    let tokens: Vec<String> = targets.iter().map(|t| t.token.clone()).collect();
    let deliveries = ctx.push.send(&tokens, message).await;

    for (target, delivery) in targets.iter().zip(deliveries) {
        match delivery {
            DeliveryOutcome::Delivered { .. } => outcome.success += 1,
            DeliveryOutcome::DeviceUnregistered => {
                if remove_token(ctx, target).await {
                    outcome.removed += 1;
                }
            }
            DeliveryOutcome::Transient(reason) => {
                log::warn!("Push to {:?} failed: {}", target.owner, reason);
                outcome.failure += 1;
            }
            DeliveryOutcome::InvalidToken => {
                log::warn!("Malformed push token for {:?}", target.owner);
                outcome.failure += 1;
            }
        }
    }
    outcome
}

async fn remove_token(ctx: &AppContext, target: &PushTarget) -> bool {
    let result = match target.owner {
        TokenOwner::User(id) => ctx.storage.clear_user_token(id).await,
        TokenOwner::Anonymous(id) => ctx.storage.remove_anonymous_token(id).await,
    };
    match result {
        Ok(()) => {
            log::info!("Removed unregistered token of {:?}", target.owner);
            true
        }
        Err(error) => {
            log::error!("Failed to remove token of {:?}: {}", target.owner, error);
            false
        }
    }
}

// --- News ---

/// Announce the newest stored article that has not been pushed yet.
pub async fn run_news_cycle(ctx: &AppContext) -> Result<NotificationReport> {
    let mut report = NotificationReport::new(NotificationKind::News);
    let since = Utc::now() - Duration::days(ctx.config.notifications.news_window_days);

    let Some(article) = ctx.storage.next_unsent(since).await? else {
        log::info!("No unannounced articles since {}", since.date_naive());
        return Ok(report);
    };

    let audience = ctx.storage.news_audience().await?;
    report.registered = audience.registered.len();
    report.anonymous = audience.anonymous.len();
    report.article_id = Some(article.id);
    if audience.is_empty() {
        log::info!("News audience is empty, '{}' stays unannounced", article.title);
        return Ok(report);
    }

    log::info!(
        "Announcing '{}' to {} registered and {} anonymous devices",
        article.title,
        report.registered,
        report.anonymous
    );
    let dispatched = dispatch(ctx, &audience.into_targets(), &news_message(&article)).await;
    report.absorb(dispatched);

    if report.success > 0 {
        ctx.storage.mark_push_sent(article.id).await?;
    } else {
        log::warn!("No device accepted article {}, it will be retried", article.id);
    }
    Ok(report)
}

pub fn news_message(article: &StoredArticle) -> PushMessage {
    PushMessage {
        title: NEWS_TITLE.to_string(),
        body: article.title.clone(),
        data: json!({
            "type": "news",
            "news_id": article.id,
            "news_url": article.url,
            "source": article.source,
        }),
    }
}

// --- Deadlines ---

/// Remind about calendar events coming up after `today`.
pub async fn run_deadline_cycle(ctx: &AppContext, today: NaiveDate) -> Result<NotificationReport> {
    let calendar = DeadlineCalendar::load_or_empty(&ctx.config.notifications.calendar_path);
    run_deadline_cycle_with(ctx, &calendar, today).await
}

/// [`run_deadline_cycle`] with an already loaded calendar.
pub async fn run_deadline_cycle_with(
    ctx: &AppContext,
    calendar: &DeadlineCalendar,
    today: NaiveDate,
) -> Result<NotificationReport> {
    let mut report = NotificationReport::new(NotificationKind::Deadline);
    let upcoming = calendar.upcoming(today, ctx.config.notifications.max_lead_days);
    if upcoming.is_empty() {
        log::info!("No deadlines in the next {} days", ctx.config.notifications.max_lead_days);
        return Ok(report);
    }

    for (days, event) in upcoming {
        let targets = ctx.storage.deadline_audience(days).await?;
        if targets.is_empty() {
            continue;
        }
        log::info!(
            "Reminding {} users about '{}' ({} days)",
            targets.len(),
            event.title,
            days
        );
        report.registered += targets.len();
        let dispatched = dispatch(ctx, &targets, &deadline_message(event, days)).await;
        report.absorb(dispatched);
    }
    Ok(report)
}

pub fn deadline_message(event: &DeadlineEvent, days: u32) -> PushMessage {
    let date = event.date.format("%d.%m.%Y").to_string();
    PushMessage {
        title: DEADLINE_TITLE.to_string(),
        body: format!("{} - {} ({})", event.title, days_phrase(days), date),
        data: json!({
            "type": "deadline",
            "report": event.title,
            "date": date,
            "days_before": days,
        }),
    }
}

fn days_phrase(days: u32) -> String {
    match days {
        1 => "завтра".to_string(),
        2..=4 => format!("через {days} дні"),
        _ => format!("через {days} днів"),
    }
}
