//! buhnews CLI
//!
//! Runs crawl and notification cycles on demand, drives the scheduler, and
//! gives operators a window onto the article store and push audience.

use std::path::PathBuf;
use std::sync::Arc;

use buhnews::{
    config::load_config,
    context::{AppContext, open_storage},
    error::Result,
    models::{ArticleQuery, Config, Platform, audience_tag},
    pipeline::{CrawlReport, NotificationReport, run_crawl_cycle},
    scheduler::{JobKind, JobReport, Scheduler},
    storage::{AudienceStorage, LinkOutcome, NewsStorage},
    utils::log as console,
};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};

/// buhnews - accounting news aggregator
#[derive(Parser, Debug)]
#[command(
    name = "buhnews",
    version,
    about = "Accounting and tax news aggregator with push delivery"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "buhnews.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one crawl cycle
    Crawl {
        /// Crawl only this source
        #[arg(long)]
        source: Option<String>,
    },

    /// Run one notification cycle
    Notify {
        #[arg(value_enum)]
        kind: NotifyKind,

        /// Send right away instead of after the configured random delay
        #[arg(long)]
        no_jitter: bool,
    },

    /// Run all jobs on their calendars until interrupted
    Schedule,

    /// List stored articles
    Articles {
        /// Only articles from the last N days
        #[arg(long)]
        days: Option<i64>,

        #[arg(long)]
        category: Option<String>,

        /// Audience tag: ФОП, ЮО, бухгалтери (or fop, legal_entity, accountant)
        #[arg(long, value_parser = parse_audience)]
        audience: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List configured sources
    Sources,

    /// Show article store statistics
    Stats,

    /// Validate the configuration file
    Validate,

    /// Manage push tokens
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Show or change a user's notification settings
    Settings {
        email: String,

        #[arg(long, value_enum)]
        news: Option<Toggle>,

        #[arg(long, value_enum)]
        deadlines: Option<Toggle>,

        /// Reminder lead times in days, comma separated, up to
        /// `notifications.max_lead_days`
        #[arg(long, value_delimiter = ',')]
        days_before: Option<Vec<u32>>,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Register a device token before sign-in
    Register {
        token: String,

        #[arg(long)]
        platform: Platform,

        #[arg(long)]
        device_id: Option<String>,
    },

    /// Move an anonymous token onto a user account
    Link {
        token: String,

        #[arg(long)]
        email: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NotifyKind {
    Deadline,
    News,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli.config)?;
    log::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Crawl { source } => {
            let ctx = AppContext::from_config(config).await?;
            let report = run_crawl_cycle(&ctx, source.as_deref()).await?;
            print_crawl(&report);
        }

        Command::Notify { kind, no_jitter } => {
            let ctx = AppContext::from_config(config).await?;
            let scheduler = Scheduler::new(Arc::new(ctx))?;
            let job = match kind {
                NotifyKind::Deadline => JobKind::Deadline,
                NotifyKind::News => JobKind::News,
            };
            match scheduler.fire(job, !no_jitter).await? {
                JobReport::Notification(report) => print_notification(&report),
                JobReport::Crawl(report) => print_crawl(&report),
            }
        }

        Command::Schedule => {
            let ctx = AppContext::from_config(config).await?;
            let scheduler = Arc::new(Scheduler::new(Arc::new(ctx))?);
            for job in scheduler.jobs() {
                log::info!(
                    "{}: '{}' (jitter up to {}s)",
                    job.kind(),
                    job.expr(),
                    job.max_jitter().as_secs()
                );
            }

            tokio::select! {
                result = scheduler.run() => result?,
                _ = tokio::signal::ctrl_c() => log::info!("Interrupted, shutting down"),
            }
        }

        Command::Articles {
            days,
            category,
            audience,
            limit,
        } => {
            let storage = open_storage(&config.storage.database_path).await?;
            let query = ArticleQuery {
                since: days.map(|d| Utc::now() - Duration::days(d)),
                category,
                audience,
                limit: Some(limit),
                offset: 0,
            };
            let articles = storage.list_articles(&query).await?;

            console::header(&format!("{} articles", articles.len()));
            for article in &articles {
                console::sub_item(&format!(
                    "#{} [{}] {} ({})",
                    article.id,
                    article.published_at.format("%d.%m.%Y %H:%M"),
                    article.title,
                    article.source
                ));
                console::sub_item(&format!("      {}", article.url));
            }
        }

        Command::Sources => {
            console::header(&format!("{} sources", config.sources.len()));
            for source in &config.sources {
                console::sub_item(&format!(
                    "{} {:<22} {:?}, {} pages{}",
                    if source.enabled { "✓" } else { "✗" },
                    source.name,
                    source.kind,
                    source.pages.len(),
                    source
                        .pages
                        .first()
                        .map(|p| format!(", {}", p.url))
                        .unwrap_or_default()
                ));
            }
        }

        Command::Stats => {
            let storage = open_storage(&config.storage.database_path).await?;
            let stats = storage.stats().await?;
            let categories = storage.categories().await?;

            let mut items = vec![
                ("total", stats.total.to_string()),
                ("published", stats.published.to_string()),
                ("push sent", stats.push_sent.to_string()),
            ];
            items.extend(
                stats
                    .by_source
                    .iter()
                    .map(|(source, count)| (source.as_str(), count.to_string())),
            );
            console::summary("Articles", &items);

            let items: Vec<(&str, String)> = categories
                .iter()
                .map(|(category, count)| (category.as_str(), count.to_string()))
                .collect();
            console::summary("Categories", &items);
        }

        Command::Validate => {
            validate(&config);
        }

        Command::Tokens { action } => {
            let storage = open_storage(&config.storage.database_path).await?;
            match action {
                TokenAction::Register {
                    token,
                    platform,
                    device_id,
                } => {
                    let registered = storage
                        .register_anonymous_token(&token, platform, device_id.as_deref())
                        .await?;
                    log::info!(
                        "Registered anonymous token #{} ({})",
                        registered.id,
                        registered.platform
                    );
                }
                TokenAction::Link { token, email } => {
                    let user = storage.ensure_user(&email).await?;
                    match storage.link_anonymous_token(&token, user.id).await? {
                        LinkOutcome::Linked => log::info!("Linked token to {}", user.email),
                        LinkOutcome::AlreadyLinked(id) => {
                            log::warn!("Token was already linked to user #{}", id)
                        }
                        LinkOutcome::NotFound => log::warn!("No anonymous token {}", token),
                    }
                }
            }
        }

        Command::Settings {
            email,
            news,
            deadlines,
            days_before,
        } => {
            let storage = open_storage(&config.storage.database_path).await?;
            let user = storage.ensure_user(&email).await?;
            let mut settings = storage.notification_settings(user.id).await?;

            let changed = news.is_some() || deadlines.is_some() || days_before.is_some();
            if let Some(toggle) = news {
                settings.enable_news_notifications = toggle.enabled();
            }
            if let Some(toggle) = deadlines {
                settings.enable_deadline_notifications = toggle.enabled();
            }
            if let Some(days) = days_before {
                settings.set_days_before(days);
                settings.check_days_before(config.notifications.max_lead_days)?;
            }
            if changed {
                storage.update_notification_settings(&settings).await?;
            }

            console::summary(
                &user.email,
                &[
                    ("news", settings.enable_news_notifications.to_string()),
                    ("deadlines", settings.enable_deadline_notifications.to_string()),
                    ("days before", format!("{:?}", settings.deadline_days_before)),
                    (
                        "push token",
                        user.push_token.unwrap_or_else(|| "-".to_string()),
                    ),
                ],
            );
        }
    }

    Ok(())
}

fn parse_audience(value: &str) -> std::result::Result<String, String> {
    audience_tag(value)
        .map(str::to_string)
        .ok_or_else(|| format!("unknown audience '{value}', expected ФОП, ЮО or бухгалтери"))
}

fn validate(config: &Config) {
    // load_config already rejected anything invalid
    log::info!("✓ Config OK");
    log::info!(
        "  {} sources ({} enabled)",
        config.sources.len(),
        config.sources.iter().filter(|s| s.enabled).count()
    );
    log::info!(
        "  classifier: {}",
        if config.classifier.api_key.is_some() {
            config.classifier.model.as_str()
        } else {
            "not configured, articles pass through"
        }
    );
    log::info!(
        "  schedule ({}): crawl '{}', deadline '{}', news '{}'",
        config.schedule.utc_offset,
        config.schedule.crawl,
        config.schedule.deadline,
        config.schedule.news
    );
}

fn print_crawl(report: &CrawlReport) {
    console::header("Crawl report");
    for source in &report.sources {
        match &source.error {
            Some(error) => console::sub_item(&format!("✗ {}: {}", source.source, error)),
            None => console::sub_item(&format!(
                "✓ {}: {} parsed, {} relevant, {} stored, {} duplicates",
                source.source,
                source.parsed,
                source.relevant,
                source.stored,
                source.skipped_duplicates
            )),
        }
    }
    console::summary(
        "Crawl",
        &[
            ("parsed", report.parsed().to_string()),
            ("relevant", report.relevant().to_string()),
            ("stored", report.stored().to_string()),
            ("duplicates", report.skipped_duplicates().to_string()),
            ("failed sources", report.failed_sources().to_string()),
            (
                "classifier",
                if report.classification_degraded() {
                    "degraded".to_string()
                } else {
                    "ok".to_string()
                },
            ),
            (
                "duration",
                format!(
                    "{}s",
                    (report.finished_at - report.started_at).num_seconds()
                ),
            ),
        ],
    );
}

fn print_notification(report: &NotificationReport) {
    let mut items = vec![
        ("messages", report.messages.to_string()),
        ("audience", report.audience.to_string()),
        ("registered", report.registered.to_string()),
        ("anonymous", report.anonymous.to_string()),
        ("success", report.success.to_string()),
        ("failure", report.failure.to_string()),
        ("removed tokens", report.removed_tokens.to_string()),
    ];
    if let Some(id) = report.article_id {
        items.push(("article", format!("#{id}")));
    }
    console::summary(&format!("{} notifications", report.kind), &items);
}
