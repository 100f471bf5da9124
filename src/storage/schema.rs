//! SQLite schema, applied idempotently on open.

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS news (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    content_type TEXT,
    categories TEXT NOT NULL DEFAULT '[]',
    target_audience TEXT NOT NULL DEFAULT '[]',
    summary TEXT NOT NULL DEFAULT '',
    published_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    is_published INTEGER NOT NULL DEFAULT 1,
    is_push_sent INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_news_published_at ON news(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_news_source ON news(source);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    push_token TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_settings (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    enable_deadline_notifications INTEGER NOT NULL DEFAULT 1,
    enable_news_notifications INTEGER NOT NULL DEFAULT 1,
    deadline_days_before TEXT NOT NULL DEFAULT '[1,3]'
);

CREATE TABLE IF NOT EXISTS anonymous_push_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token TEXT NOT NULL UNIQUE,
    platform TEXT NOT NULL,
    device_id TEXT,
    created_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL,
    linked_user_id INTEGER REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_anonymous_unlinked ON anonymous_push_tokens(linked_user_id);
"#;
