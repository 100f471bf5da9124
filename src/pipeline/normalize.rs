// src/pipeline/normalize.rs

//! Date normalization for scraped listings.
//!
//! Sources print dates in whatever shape their CMS prefers. Formats are tried
//! in a fixed order and the first match wins:
//!
//! 1. ISO-8601 with an explicit offset (`2025-12-04T09:01:00+02:00`)
//! 2. Relative days with an optional clock time (`Сьогодні 11:30`, `Вчора`,
//!    `Позавчора`), matched as whole words
//! 3. Numeric `DD.MM.YYYY[ HH:MM]`
//! 4. `<day> <month name> <year>` (`4 грудня 2025`)
//!
//! Anything else resolves to the ingestion instant. Wall-clock values are read
//! in the configured UTC offset.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{CandidateArticle, DateLocale};

/// Converts source date strings into absolute timestamps.
#[derive(Debug, Clone)]
pub struct DateNormalizer {
    offset: FixedOffset,
    relative_word: Regex,
    numeric: Regex,
    month_name: Regex,
    clock: Regex,
}

impl DateNormalizer {
    pub fn new(offset: FixedOffset) -> Result<Self> {
        Ok(Self {
            offset,
            relative_word: compile(r"\b(позавчора|сьогодні|вчора|today|yesterday)\b")?,
            numeric: compile(r"(\d{1,2})\.(\d{1,2})\.(\d{4})")?,
            month_name: compile(r"(\d{1,2})\s+([^\W\d_]+)\.?\s+(\d{4})")?,
            clock: compile(r"(\d{1,2}):(\d{2})")?,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Normalize `raw`, falling back to `now` when nothing matches.
    pub fn normalize(&self, raw: &str, locale: DateLocale, now: DateTime<Utc>) -> DateTime<Utc> {
        self.try_normalize(raw, locale, now).unwrap_or(now)
    }

    /// Normalize `raw`, or `None` when no known format matches.
    pub fn try_normalize(
        &self,
        raw: &str,
        locale: DateLocale,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }

        self.relative(raw, locale, now)
            .or_else(|| self.numeric(raw))
            .or_else(|| self.month_named(raw, locale))
    }

    /// Stamp `published_at` on every candidate.
    pub fn apply(&self, candidates: &mut [CandidateArticle], locale: DateLocale, now: DateTime<Utc>) {
        for candidate in candidates.iter_mut() {
            let published = self.try_normalize(&candidate.raw_date, locale, now);
            if published.is_none() && !candidate.raw_date.trim().is_empty() {
                log::debug!(
                    "Unrecognized date '{}' from {}, using ingestion time",
                    candidate.raw_date,
                    candidate.source
                );
            }
            candidate.published_at = Some(published.unwrap_or(now));
        }
    }

    fn relative(&self, raw: &str, locale: DateLocale, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lower = raw.to_lowercase();
        let word = self.relative_word.captures(&lower)?;
        let back = days_back(&word[1], locale)?;

        let base = now - Duration::days(back);
        match self.clock_time(raw) {
            Some(time) => {
                let date = base.with_timezone(&self.offset).date_naive();
                self.local(date, time)
            }
            None => Some(base),
        }
    }

    fn numeric(&self, raw: &str) -> Option<DateTime<Utc>> {
        let caps = self.numeric.captures(raw)?;
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        let rest = &raw[caps.get(0)?.end()..];
        let time = self.clock_time(rest).unwrap_or(NaiveTime::MIN);
        self.local(date, time)
    }

    fn month_named(&self, raw: &str, locale: DateLocale) -> Option<DateTime<Utc>> {
        let caps = self.month_name.captures(raw)?;
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2].to_lowercase(), locale)?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        let rest = &raw[caps.get(0)?.end()..];
        let time = self.clock_time(rest).unwrap_or(NaiveTime::MIN);
        self.local(date, time)
    }

    fn clock_time(&self, raw: &str) -> Option<NaiveTime> {
        let caps = self.clock.captures(raw)?;
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        NaiveTime::from_hms_opt(hour, minute, 0)
    }

    fn local(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::config(format!("date pattern {pattern}: {e}")))
}

fn days_back(word: &str, locale: DateLocale) -> Option<i64> {
    match (locale, word) {
        (DateLocale::Uk, "сьогодні") | (DateLocale::En, "today") => Some(0),
        (DateLocale::Uk, "вчора") | (DateLocale::En, "yesterday") => Some(1),
        (DateLocale::Uk, "позавчора") => Some(2),
        _ => None,
    }
}

fn month_number(name: &str, locale: DateLocale) -> Option<u32> {
    let month = match locale {
        DateLocale::Uk => match name {
            "січня" | "січень" => 1,
            "лютого" | "лютий" => 2,
            "березня" | "березень" => 3,
            "квітня" | "квітень" => 4,
            "травня" | "травень" => 5,
            "червня" | "червень" => 6,
            "липня" | "липень" => 7,
            "серпня" | "серпень" => 8,
            "вересня" | "вересень" => 9,
            "жовтня" | "жовтень" => 10,
            "листопада" | "листопад" => 11,
            "грудня" | "грудень" => 12,
            _ => return None,
        },
        DateLocale::En => match name {
            "january" | "jan" => 1,
            "february" | "feb" => 2,
            "march" | "mar" => 3,
            "april" | "apr" => 4,
            "may" => 5,
            "june" | "jun" => 6,
            "july" | "jul" => 7,
            "august" | "aug" => 8,
            "september" | "sep" | "sept" => 9,
            "october" | "oct" => 10,
            "november" | "nov" => 11,
            "december" | "dec" => 12,
            _ => return None,
        },
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> DateNormalizer {
        DateNormalizer::new(FixedOffset::east_opt(2 * 3600).unwrap()).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        utc("2025-12-04T10:00:00Z")
    }

    #[test]
    fn test_iso_with_offset() {
        let parsed = normalizer().normalize("2025-12-04T09:01:00+02:00", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-12-04T07:01:00Z"));
    }

    #[test]
    fn test_today_with_time() {
        let parsed = normalizer().normalize("Сьогодні 11:30", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-12-04T09:30:00Z"));
    }

    #[test]
    fn test_yesterday_with_time() {
        let parsed = normalizer().normalize("вчора, 18:05", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-12-03T16:05:00Z"));
    }

    #[test]
    fn test_day_before_yesterday_is_not_yesterday() {
        let n = normalizer();
        assert_eq!(
            n.try_normalize("Позавчора 10:00", DateLocale::Uk, now()),
            Some(utc("2025-12-02T08:00:00Z"))
        );
        assert_eq!(
            n.normalize("позавчора", DateLocale::Uk, now()),
            now() - Duration::days(2)
        );
        // Only whole words count
        assert!(n.try_normalize("Невчорашні новини", DateLocale::Uk, now()).is_none());
    }

    #[test]
    fn test_today_without_time_is_ingestion_instant() {
        let parsed = normalizer().normalize("Сьогодні", DateLocale::Uk, now());
        assert_eq!(parsed, now());
    }

    #[test]
    fn test_numeric_date() {
        let parsed = normalizer().normalize("21.11.2025", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-11-20T22:00:00Z"));
    }

    #[test]
    fn test_numeric_date_with_time() {
        let parsed = normalizer().normalize("21.11.2025 14:45", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-11-21T12:45:00Z"));
    }

    #[test]
    fn test_month_name_genitive() {
        let parsed = normalizer().normalize("4 грудня 2025", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-12-03T22:00:00Z"));
    }

    #[test]
    fn test_month_name_with_time() {
        let parsed = normalizer().normalize("21 листопада 2025, 10:15", DateLocale::Uk, now());
        assert_eq!(parsed, utc("2025-11-21T08:15:00Z"));
    }

    #[test]
    fn test_english_locale() {
        let n = normalizer();
        assert_eq!(
            n.normalize("12 June 2025", DateLocale::En, now()),
            utc("2025-06-11T22:00:00Z")
        );
        assert_eq!(
            n.normalize("Today 08:00", DateLocale::En, now()),
            utc("2025-12-04T06:00:00Z")
        );
    }

    #[test]
    fn test_month_name_needs_matching_locale() {
        assert!(
            normalizer()
                .try_normalize("4 грудня 2025", DateLocale::En, now())
                .is_none()
        );
    }

    #[test]
    fn test_unrecognized_falls_back_to_now() {
        let start = Utc::now();
        let parsed = normalizer().normalize("???", DateLocale::Uk, Utc::now());
        assert!(parsed >= start);
    }

    #[test]
    fn test_invalid_calendar_date_falls_back() {
        assert!(
            normalizer()
                .try_normalize("31.02.2025", DateLocale::Uk, now())
                .is_none()
        );
    }

    #[test]
    fn test_apply_stamps_every_candidate() {
        let mut candidates = vec![
            CandidateArticle::new("a", "https://x.ua/a", "x").with_raw_date("21.11.2025"),
            CandidateArticle::new("b", "https://x.ua/b", "x"),
        ];
        normalizer().apply(&mut candidates, DateLocale::Uk, now());

        assert_eq!(candidates[0].published_at, Some(utc("2025-11-20T22:00:00Z")));
        assert_eq!(candidates[1].published_at, Some(now()));
    }
}
