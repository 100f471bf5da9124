// src/models/deadline.rs

//! Reporting calendar used for deadline reminders.
//!
//! The calendar file is a JSON array of `{ "date": "DD.MM.YY", "title": "..." }`
//! objects; four-digit years are accepted too. Entries whose date cannot be
//! read are skipped with a warning.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::Result;

/// Fallback report name for entries without a title.
const UNTITLED_REPORT: &str = "Звіт";

#[derive(Debug, Deserialize)]
struct RawEvent {
    date: String,
    #[serde(default)]
    title: Option<String>,
}

/// One reporting deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineEvent {
    pub date: NaiveDate,
    pub title: String,
}

/// All known deadlines.
#[derive(Debug, Clone, Default)]
pub struct DeadlineCalendar {
    events: Vec<DeadlineEvent>,
}

impl DeadlineCalendar {
    pub fn new(events: Vec<DeadlineEvent>) -> Self {
        Self { events }
    }

    /// Load the calendar from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load the calendar, or an empty one if the file is missing or broken.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Calendar load failed from {:?}: {}. No deadline reminders will be sent.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: Vec<RawEvent> = serde_json::from_str(content)?;
        let events = raw
            .into_iter()
            .filter_map(|event| match parse_calendar_date(&event.date) {
                Some(date) => Some(DeadlineEvent {
                    date,
                    title: event
                        .title
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| UNTITLED_REPORT.to_string()),
                }),
                None => {
                    log::warn!("Skipping calendar entry with unreadable date '{}'", event.date);
                    None
                }
            })
            .collect();
        Ok(Self { events })
    }

    pub fn events(&self) -> &[DeadlineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Deadlines between one and `max_days` days after `today`, paired with
    /// their distance in days.
    pub fn upcoming(&self, today: NaiveDate, max_days: u32) -> Vec<(u32, &DeadlineEvent)> {
        let mut upcoming: Vec<(u32, &DeadlineEvent)> = self
            .events
            .iter()
            .filter_map(|event| {
                let days = (event.date - today).num_days();
                (days >= 1 && days <= i64::from(max_days)).then_some((days as u32, event))
            })
            .collect();
        upcoming.sort_by_key(|(days, event)| (*days, event.date));
        upcoming
    }
}

/// Parse `DD.MM.YY` or `DD.MM.YYYY`.
fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let year_len = raw.rsplit('.').next().map(str::len)?;
    let format = if year_len == 2 { "%d.%m.%y" } else { "%d.%m.%Y" };
    NaiveDate::parse_from_str(raw, format).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_calendar_date_formats() {
        assert_eq!(parse_calendar_date("20.01.26"), Some(date(2026, 1, 20)));
        assert_eq!(parse_calendar_date("20.01.2026"), Some(date(2026, 1, 20)));
        assert_eq!(parse_calendar_date("2026-01-20"), None);
    }

    #[test]
    fn test_from_json_skips_bad_entries() {
        let calendar = DeadlineCalendar::from_json(
            r#"[
                {"date": "20.01.26", "title": "Декларація ФОП"},
                {"date": "soon", "title": "Broken"},
                {"date": "09.02.2026"}
            ]"#,
        )
        .unwrap();

        assert_eq!(calendar.len(), 2);
        assert_eq!(calendar.events()[1].title, UNTITLED_REPORT);
    }

    #[test]
    fn test_upcoming_window() {
        let today = date(2026, 1, 17);
        let calendar = DeadlineCalendar::new(vec![
            DeadlineEvent { date: date(2026, 1, 17), title: "today".into() },
            DeadlineEvent { date: date(2026, 1, 18), title: "tomorrow".into() },
            DeadlineEvent { date: date(2026, 1, 20), title: "in three".into() },
            DeadlineEvent { date: date(2026, 2, 20), title: "far".into() },
        ]);

        let upcoming = calendar.upcoming(today, 7);
        let days: Vec<u32> = upcoming.iter().map(|(d, _)| *d).collect();
        assert_eq!(days, vec![1, 3]);
    }

    #[test]
    fn test_load_or_empty_missing_file() {
        let calendar = DeadlineCalendar::load_or_empty("/nonexistent/calendar.json");
        assert!(calendar.is_empty());
    }
}
