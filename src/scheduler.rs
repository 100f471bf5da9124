// src/scheduler.rs

//! Calendar-driven job runner.
//!
//! Three jobs, each on its own cron expression evaluated in the configured
//! UTC offset:
//!
//! | Job      | Default          | Jitter                 |
//! |----------|------------------|------------------------|
//! | crawl    | 08:00 and 20:00  | none                   |
//! | deadline | 09:00 daily      | `deadline_jitter_secs` |
//! | news     | 10:00 Mon, Thu   | `news_jitter_secs`     |
//!
//! Every job moves `Idle → Triggered → Running → Idle`. Jitter is slept in
//! `Triggered`; the run ceiling only bounds `Running`. A failed or abandoned
//! run is logged and the job waits for its next occurrence.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use croner::Cron;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::context::AppContext;
use crate::error::{AppError, Result};
use crate::models::parse_cron;
use crate::pipeline::{
    CrawlReport, NotificationReport, run_crawl_cycle, run_deadline_cycle, run_news_cycle,
};

/// The scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Crawl,
    Deadline,
    News,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Crawl, JobKind::Deadline, JobKind::News];
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Crawl => f.write_str("crawl"),
            JobKind::Deadline => f.write_str("deadline"),
            JobKind::News => f.write_str("news"),
        }
    }
}

/// Where a job is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    /// Calendar matched; waiting out the jitter
    Triggered,
    Running,
}

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobReport {
    Crawl(CrawlReport),
    Notification(NotificationReport),
}

/// One scheduled job and its calendar.
pub struct Job {
    kind: JobKind,
    expr: String,
    cron: Cron,
    max_jitter: Duration,
    state: watch::Sender<JobState>,
}

impl Job {
    pub fn new(kind: JobKind, expr: &str, max_jitter: Duration) -> Result<Self> {
        let (state, _) = watch::channel(JobState::Idle);
        Ok(Self {
            kind,
            expr: expr.to_string(),
            cron: parse_cron(expr)?,
            max_jitter,
            state,
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// First occurrence strictly after `after`.
    pub fn next_fire(&self, after: &DateTime<FixedOffset>) -> Result<DateTime<FixedOffset>> {
        self.cron
            .find_next_occurrence(after, false)
            .map_err(|e| AppError::schedule(format!("{} has no next occurrence: {e}", self.kind)))
    }

    /// Claim the job for a run. Fails if a run is already in flight.
    fn trigger(&self) -> Result<()> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == JobState::Idle {
                *state = JobState::Triggered;
                true
            } else {
                false
            }
        });
        if claimed {
            Ok(())
        } else {
            Err(AppError::schedule(format!("{} is already running", self.kind)))
        }
    }

    fn set_state(&self, state: JobState) {
        self.state.send_replace(state);
    }
}

/// Owns the jobs and the context they run against.
pub struct Scheduler {
    ctx: Arc<AppContext>,
    jobs: Vec<Job>,
    offset: FixedOffset,
    run_timeout: Duration,
}

impl Scheduler {
    /// Build the three jobs from the context's schedule settings.
    pub fn new(ctx: Arc<AppContext>) -> Result<Self> {
        let schedule = &ctx.config.schedule;
        let offset = schedule.offset()?;
        let jobs = vec![
            Job::new(JobKind::Crawl, &schedule.crawl, Duration::ZERO)?,
            Job::new(
                JobKind::Deadline,
                &schedule.deadline,
                Duration::from_secs(schedule.deadline_jitter_secs),
            )?,
            Job::new(
                JobKind::News,
                &schedule.news,
                Duration::from_secs(schedule.news_jitter_secs),
            )?,
        ];
        let run_timeout = Duration::from_secs(schedule.run_timeout_secs);

        Ok(Self {
            ctx,
            jobs,
            offset,
            run_timeout,
        })
    }

    /// Override the run ceiling.
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, kind: JobKind) -> Result<&Job> {
        self.jobs
            .iter()
            .find(|j| j.kind == kind)
            .ok_or_else(|| AppError::schedule(format!("no {kind} job")))
    }

    /// Current wall-clock time in the schedule's offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Run `kind` now, sleeping its jitter first when `jitter` is set.
    pub async fn fire(&self, kind: JobKind, jitter: bool) -> Result<JobReport> {
        let job = self.job(kind)?;
        job.trigger()?;

        if jitter {
            let delay = jitter_delay(job.max_jitter);
            if !delay.is_zero() {
                log::info!("Delaying {} by {}s", kind, delay.as_secs());
                tokio::time::sleep(delay).await;
            }
        }

        job.set_state(JobState::Running);
        let run = run_job(&self.ctx, kind, self.offset);
        let result = tokio::time::timeout(self.run_timeout, run).await;
        job.set_state(JobState::Idle);

        match result {
            Ok(report) => report,
            Err(_) => Err(AppError::schedule(format!(
                "{} abandoned after {}s",
                kind,
                self.run_timeout.as_secs()
            ))),
        }
    }

    /// Run every job on its calendar until the future is dropped.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks = JoinSet::new();
        for kind in JobKind::ALL {
            let scheduler = Arc::clone(&self);
            tasks.spawn(async move { scheduler.job_loop(kind).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Scheduler loop stopped: {}", e),
                Err(e) => log::error!("Scheduler task panicked: {}", e),
            }
        }
        Ok(())
    }

    async fn job_loop(&self, kind: JobKind) -> Result<()> {
        let job = self.job(kind)?;
        log::info!("Scheduled {} at '{}'", kind, job.expr);

        loop {
            let now = self.now();
            let next = job.next_fire(&now)?;
            log::debug!("Next {} run at {}", kind, next);

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            match self.fire(kind, true).await {
                Ok(report) => log::info!("{} run finished: {}", kind, describe(&report)),
                Err(e) => log::error!("{} run failed: {}", kind, e),
            }
        }
    }
}

/// Execute one job immediately, without jitter or ceiling.
pub async fn run_job(ctx: &AppContext, kind: JobKind, offset: FixedOffset) -> Result<JobReport> {
    match kind {
        JobKind::Crawl => run_crawl_cycle(ctx, None).await.map(JobReport::Crawl),
        JobKind::Deadline => {
            let today = Utc::now().with_timezone(&offset).date_naive();
            run_deadline_cycle(ctx, today)
                .await
                .map(JobReport::Notification)
        }
        JobKind::News => run_news_cycle(ctx).await.map(JobReport::Notification),
    }
}

/// Uniform random delay in `0..=max`, whole seconds.
pub fn jitter_delay(max: Duration) -> Duration {
    let max_secs = max.as_secs();
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::thread_rng().gen_range(0..=max_secs))
}

fn describe(report: &JobReport) -> String {
    match report {
        JobReport::Crawl(r) => format!(
            "{} parsed, {} stored, {} duplicates, {} failed sources",
            r.parsed(),
            r.stored(),
            r.skipped_duplicates(),
            r.failed_sources()
        ),
        JobReport::Notification(r) => format!(
            "{} messages, audience {}, {} ok, {} failed, {} tokens removed",
            r.messages, r.audience, r.success, r.failure, r.removed_tokens
        ),
    }
}
