//! SQLite storage backend.
//!
//! All statements run on the connection's worker thread through
//! `tokio_rusqlite::Connection::call`. JSON columns and timestamps are decoded
//! after the call returns, so the closures only ever fail with SQLite errors.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use tokio_rusqlite::Connection;

use super::schema::SCHEMA;
use super::{AudienceStorage, InsertOutcome, LinkOutcome, NewsStorage};
use crate::error::{AppError, Result};
use crate::models::{
    AnonymousToken, ArticleQuery, ArticleStats, ClassifiedArticle, NewsAudience,
    NotificationSettings, Platform, PushTarget, StoredArticle, User,
};

const ARTICLE_COLUMNS: &str = "id, title, url, source, content_type, categories, target_audience, \
     summary, published_at, created_at, is_published, is_push_sent";

const ANONYMOUS_COLUMNS: &str =
    "id, token, platform, device_id, created_at, last_active_at, linked_user_id";

/// SQLite parameters per `IN (...)` lookup
const URL_CHUNK: usize = 500;

/// SQLite-backed store for articles and the push audience.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::init(conn).await
    }

    /// A private in-memory database, mostly for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn query_articles(&self, sql: String, values: Vec<Value>) -> Result<Vec<StoredArticle>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(values.iter()), article_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }
}

// --- Row decoding ---

struct ArticleRow {
    id: i64,
    title: String,
    url: String,
    source: String,
    content_type: Option<String>,
    categories: String,
    target_audience: String,
    summary: String,
    published_at: String,
    created_at: String,
    is_published: bool,
    is_push_sent: bool,
}

fn article_row(row: &Row) -> rusqlite::Result<ArticleRow> {
    Ok(ArticleRow {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        source: row.get(3)?,
        content_type: row.get(4)?,
        categories: row.get(5)?,
        target_audience: row.get(6)?,
        summary: row.get(7)?,
        published_at: row.get(8)?,
        created_at: row.get(9)?,
        is_published: row.get(10)?,
        is_push_sent: row.get(11)?,
    })
}

impl ArticleRow {
    fn into_article(self) -> Result<StoredArticle> {
        Ok(StoredArticle {
            id: self.id,
            title: self.title,
            url: self.url,
            source: self.source,
            content_type: self.content_type,
            categories: serde_json::from_str(&self.categories)?,
            target_audience: serde_json::from_str(&self.target_audience)?,
            summary: self.summary,
            published_at: parse_timestamp(&self.published_at)?,
            created_at: parse_timestamp(&self.created_at)?,
            is_published: self.is_published,
            is_push_sent: self.is_push_sent,
        })
    }
}

struct AnonymousRow {
    id: i64,
    token: String,
    platform: String,
    device_id: Option<String>,
    created_at: String,
    last_active_at: String,
    linked_user_id: Option<i64>,
}

fn anonymous_row(row: &Row) -> rusqlite::Result<AnonymousRow> {
    Ok(AnonymousRow {
        id: row.get(0)?,
        token: row.get(1)?,
        platform: row.get(2)?,
        device_id: row.get(3)?,
        created_at: row.get(4)?,
        last_active_at: row.get(5)?,
        linked_user_id: row.get(6)?,
    })
}

impl AnonymousRow {
    fn into_token(self) -> Result<AnonymousToken> {
        Ok(AnonymousToken {
            id: self.id,
            token: self.token,
            platform: self.platform.parse()?,
            device_id: self.device_id,
            created_at: parse_timestamp(&self.created_at)?,
            last_active_at: parse_timestamp(&self.last_active_at)?,
            linked_user_id: self.linked_user_id,
        })
    }
}

fn user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        is_active: row.get(2)?,
        push_token: row.get(3)?,
    })
}

/// Settings columns as stored; `None` when the row was never created.
struct SettingsRow {
    enable_deadline: Option<bool>,
    enable_news: Option<bool>,
    days_before: Option<String>,
}

impl SettingsRow {
    fn into_settings(self, user_id: i64) -> Result<NotificationSettings> {
        let mut settings = NotificationSettings::defaults_for(user_id);
        if let Some(enabled) = self.enable_deadline {
            settings.enable_deadline_notifications = enabled;
        }
        if let Some(enabled) = self.enable_news {
            settings.enable_news_notifications = enabled;
        }
        if let Some(days) = self.days_before {
            let days: Vec<u32> = serde_json::from_str(&days)?;
            settings.set_days_before(days);
        }
        Ok(settings)
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("stored timestamp '{raw}': {e}")))
}

// --- Articles ---

#[async_trait]
impl NewsStorage for SqliteStorage {
    async fn exists(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row("SELECT 1 FROM news WHERE url = ?1", params![url], |_| Ok(()))
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(found)
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        for chunk in urls.chunks(URL_CHUNK) {
            let chunk = chunk.to_vec();
            let found = self
                .conn
                .call(move |conn| {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!("SELECT url FROM news WHERE url IN ({placeholders})");
                    let mut stmt = conn.prepare(&sql)?;
                    let urls = stmt
                        .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    Ok(urls)
                })
                .await?;
            existing.extend(found);
        }
        Ok(existing)
    }

    async fn insert_article(&self, article: &ClassifiedArticle) -> Result<InsertOutcome> {
        let categories = serde_json::to_string(&[article.category.as_str()])?;
        let audience = serde_json::to_string(&article.target_audience)?;
        let candidate = article.candidate.clone();
        let summary = article.summary.clone();
        let published_at = timestamp(article.published_at);
        let created_at = timestamp(Utc::now());

        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO news (title, url, source, content_type, categories, target_audience,
                                         summary, published_at, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                       ON CONFLICT(url) DO NOTHING"#,
                    params![
                        candidate.title,
                        candidate.url,
                        candidate.source,
                        candidate.content_type,
                        categories,
                        audience,
                        summary,
                        published_at,
                        created_at,
                    ],
                )?;
                Ok((changed > 0).then(|| conn.last_insert_rowid()))
            })
            .await?;

        Ok(match inserted {
            Some(id) => InsertOutcome::Inserted(id),
            None => InsertOutcome::Duplicate,
        })
    }

    async fn get_article(&self, id: i64) -> Result<Option<StoredArticle>> {
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {ARTICLE_COLUMNS} FROM news WHERE id = ?1"),
                        params![id],
                        article_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(ArticleRow::into_article).transpose()
    }

    async fn list_articles(&self, query: &ArticleQuery) -> Result<Vec<StoredArticle>> {
        let mut sql = format!("SELECT {ARTICLE_COLUMNS} FROM news WHERE is_published = 1");
        let mut values = Vec::new();

        if let Some(since) = query.since {
            sql.push_str(" AND published_at >= ?");
            values.push(Value::Text(timestamp(since)));
        }
        if let Some(category) = &query.category {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM json_each(news.categories) WHERE json_each.value = ?)",
            );
            values.push(Value::Text(category.clone()));
        }
        if let Some(audience) = &query.audience {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM json_each(news.target_audience) WHERE json_each.value = ?)",
            );
            values.push(Value::Text(audience.clone()));
        }
        sql.push_str(" ORDER BY published_at DESC, id DESC LIMIT ? OFFSET ?");
        values.push(Value::Integer(query.limit.map_or(-1, |l| l as i64)));
        values.push(Value::Integer(query.offset as i64));

        self.query_articles(sql, values).await
    }

    async fn categories(&self) -> Result<Vec<(String, usize)>> {
        let categories = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT json_each.value, COUNT(*)
                       FROM news, json_each(news.categories)
                       WHERE news.is_published = 1
                       GROUP BY json_each.value
                       ORDER BY COUNT(*) DESC, json_each.value"#,
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(categories
            .into_iter()
            .map(|(name, count)| (name, count as usize))
            .collect())
    }

    async fn stats(&self) -> Result<ArticleStats> {
        let (totals, by_source) = self
            .conn
            .call(|conn| {
                let totals = conn.query_row(
                    r#"SELECT COUNT(*),
                              COALESCE(SUM(is_published), 0),
                              COALESCE(SUM(is_push_sent), 0)
                       FROM news"#,
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )?;
                let mut stmt = conn.prepare(
                    "SELECT source, COUNT(*) FROM news GROUP BY source ORDER BY COUNT(*) DESC, source",
                )?;
                let by_source = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok((totals, by_source))
            })
            .await?;

        Ok(ArticleStats {
            total: totals.0 as usize,
            published: totals.1 as usize,
            push_sent: totals.2 as usize,
            by_source: by_source
                .into_iter()
                .map(|(source, count)| (source, count as usize))
                .collect(),
        })
    }

    async fn next_unsent(&self, since: DateTime<Utc>) -> Result<Option<StoredArticle>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM news \
             WHERE is_published = 1 AND is_push_sent = 0 AND published_at >= ? \
             ORDER BY published_at DESC, id DESC LIMIT 1"
        );
        let mut rows = self
            .query_articles(sql, vec![Value::Text(timestamp(since))])
            .await?;
        Ok(rows.pop())
    }

    async fn mark_push_sent(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE news SET is_push_sent = 1 WHERE id = ?1 AND is_push_sent = 0",
                    params![id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }
}

// --- Audience ---

#[async_trait]
impl AudienceStorage for SqliteStorage {
    async fn ensure_user(&self, email: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::validation("user email is empty"));
        }
        let created_at = timestamp(Utc::now());
        let user = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (email, created_at) VALUES (?1, ?2) ON CONFLICT(email) DO NOTHING",
                    params![email, created_at],
                )?;
                let user = conn.query_row(
                    "SELECT id, email, is_active, push_token FROM users WHERE email = ?1",
                    params![email],
                    user_row,
                )?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, email, is_active, push_token FROM users WHERE id = ?1",
                        params![id],
                        user_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    async fn set_user_active(&self, id: i64, active: bool) -> Result<()> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET is_active = ?1 WHERE id = ?2",
                    params![active, id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::validation(format!("unknown user {id}")));
        }
        Ok(())
    }

    async fn set_user_token(&self, user_id: i64, token: &str) -> Result<()> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(AppError::validation("push token is empty"));
        }
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET push_token = ?1 WHERE id = ?2",
                    params![token, user_id],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::validation(format!("unknown user {user_id}")));
        }
        Ok(())
    }

    async fn clear_user_token(&self, user_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET push_token = NULL WHERE id = ?1",
                    params![user_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn register_anonymous_token(
        &self,
        token: &str,
        platform: Platform,
        device_id: Option<&str>,
    ) -> Result<AnonymousToken> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(AppError::validation("push token is empty"));
        }
        let platform = platform.as_str();
        let device_id = device_id.map(str::to_string);
        let now = timestamp(Utc::now());

        let row = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO anonymous_push_tokens (token, platform, device_id, created_at, last_active_at)
                       VALUES (?1, ?2, ?3, ?4, ?4)
                       ON CONFLICT(token) DO UPDATE SET
                           platform = excluded.platform,
                           device_id = COALESCE(excluded.device_id, anonymous_push_tokens.device_id),
                           last_active_at = excluded.last_active_at"#,
                    params![token, platform, device_id, now],
                )?;
                let row = conn.query_row(
                    &format!("SELECT {ANONYMOUS_COLUMNS} FROM anonymous_push_tokens WHERE token = ?1"),
                    params![token],
                    anonymous_row,
                )?;
                Ok(row)
            })
            .await?;
        row.into_token()
    }

    async fn find_anonymous_token(&self, token: &str) -> Result<Option<AnonymousToken>> {
        let token = token.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {ANONYMOUS_COLUMNS} FROM anonymous_push_tokens WHERE token = ?1"
                        ),
                        params![token],
                        anonymous_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(AnonymousRow::into_token).transpose()
    }

    async fn link_anonymous_token(&self, token: &str, user_id: i64) -> Result<LinkOutcome> {
        let token = token.to_string();
        let now = timestamp(Utc::now());

        // `None` means the user does not exist
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let found: Option<(i64, Option<i64>)> = tx
                    .query_row(
                        "SELECT id, linked_user_id FROM anonymous_push_tokens WHERE token = ?1",
                        params![token],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let outcome = match found {
                    None => Some(LinkOutcome::NotFound),
                    Some((_, Some(linked))) => Some(LinkOutcome::AlreadyLinked(linked)),
                    Some((id, None)) => {
                        let updated = tx.execute(
                            "UPDATE users SET push_token = ?1 WHERE id = ?2",
                            params![token, user_id],
                        )?;
                        if updated == 0 {
                            None
                        } else {
                            tx.execute(
                                "UPDATE anonymous_push_tokens SET linked_user_id = ?1, last_active_at = ?2 WHERE id = ?3",
                                params![user_id, now, id],
                            )?;
                            Some(LinkOutcome::Linked)
                        }
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        outcome.ok_or_else(|| AppError::validation(format!("unknown user {user_id}")))
    }

    async fn remove_anonymous_token(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM anonymous_push_tokens WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn notification_settings(&self, user_id: i64) -> Result<NotificationSettings> {
        let row = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO notification_settings (user_id) VALUES (?1) ON CONFLICT(user_id) DO NOTHING",
                    params![user_id],
                )?;
                let row = conn.query_row(
                    r#"SELECT enable_deadline_notifications, enable_news_notifications, deadline_days_before
                       FROM notification_settings WHERE user_id = ?1"#,
                    params![user_id],
                    |row| {
                        Ok(SettingsRow {
                            enable_deadline: row.get(0)?,
                            enable_news: row.get(1)?,
                            days_before: row.get(2)?,
                        })
                    },
                )?;
                Ok(row)
            })
            .await?;
        row.into_settings(user_id)
    }

    async fn update_notification_settings(&self, settings: &NotificationSettings) -> Result<()> {
        let mut normalized = settings.clone();
        normalized.set_days_before(settings.deadline_days_before.iter().copied());
        let days = serde_json::to_string(&normalized.deadline_days_before)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO notification_settings
                           (user_id, enable_deadline_notifications, enable_news_notifications, deadline_days_before)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(user_id) DO UPDATE SET
                           enable_deadline_notifications = excluded.enable_deadline_notifications,
                           enable_news_notifications = excluded.enable_news_notifications,
                           deadline_days_before = excluded.deadline_days_before"#,
                    params![
                        normalized.user_id,
                        normalized.enable_deadline_notifications,
                        normalized.enable_news_notifications,
                        days,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn news_audience(&self) -> Result<NewsAudience> {
        let (registered, anonymous) = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT u.id, u.push_token
                       FROM users u
                       LEFT JOIN notification_settings s ON s.user_id = u.id
                       WHERE u.is_active = 1
                         AND u.push_token IS NOT NULL AND u.push_token != ''
                         AND COALESCE(s.enable_news_notifications, 1) = 1
                       ORDER BY u.id"#,
                )?;
                let registered = stmt
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(
                    "SELECT id, token FROM anonymous_push_tokens WHERE linked_user_id IS NULL ORDER BY id",
                )?;
                let anonymous = stmt
                    .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok((registered, anonymous))
            })
            .await?;

        let anonymous = anonymous
            .into_iter()
            .map(|(id, token)| PushTarget::anonymous(id, token))
            .collect();
        let registered = registered
            .into_iter()
            .map(|(id, token)| PushTarget::user(id, token))
            .collect();

        Ok(NewsAudience {
            registered,
            anonymous,
        })
    }

    async fn deadline_audience(&self, days_until: u32) -> Result<Vec<PushTarget>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT u.id, u.push_token,
                              s.enable_deadline_notifications, s.enable_news_notifications,
                              s.deadline_days_before
                       FROM users u
                       LEFT JOIN notification_settings s ON s.user_id = u.id
                       WHERE u.is_active = 1
                         AND u.push_token IS NOT NULL AND u.push_token != ''
                       ORDER BY u.id"#,
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            SettingsRow {
                                enable_deadline: row.get(2)?,
                                enable_news: row.get(3)?,
                                days_before: row.get(4)?,
                            },
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut targets = Vec::new();
        for (user_id, token, settings) in rows {
            if settings.into_settings(user_id)?.wants_deadline_reminder(days_until) {
                targets.push(PushTarget::user(user_id, token));
            }
        }
        Ok(targets)
    }
}
