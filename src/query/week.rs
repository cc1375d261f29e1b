use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc, Weekday,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static RE_ISO_WEEK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{1,2})$").unwrap());

/// Which weekday a week window begins on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    #[default]
    Monday,
    Sunday,
}

impl WeekStart {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mon" | "monday" => Ok(WeekStart::Monday),
            "sun" | "sunday" => Ok(WeekStart::Sunday),
            other => Err(Error::Config(format!("unknown week start day: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeekStart::Monday => "monday",
            WeekStart::Sunday => "sunday",
        }
    }

    pub fn weekday(&self) -> Weekday {
        match self {
            WeekStart::Monday => Weekday::Mon,
            WeekStart::Sunday => Weekday::Sun,
        }
    }
}

/// How week windows are laid over wall-clock time: the start-of-week
/// convention and the fixed UTC offset days are counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekConfig {
    pub start: WeekStart,
    pub offset: FixedOffset,
}

impl Default for WeekConfig {
    fn default() -> Self {
        Self {
            start: WeekStart::Monday,
            offset: utc(),
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

impl WeekConfig {
    pub fn new(start: WeekStart, utc_offset_hours: i32) -> Result<Self> {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::Config(format!("utc_offset_hours out of range: {utc_offset_hours}"))
            })?;
        Ok(Self { start, offset })
    }

    /// Today's date in the configured offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    pub fn current_week(&self) -> Week {
        Week::containing(self.today(), self.start)
    }

    /// Local wall-clock time of a UTC instant.
    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    /// Half-open `[start, end)` bounds of a week in microseconds since epoch.
    pub fn bounds_micros(&self, week: &Week) -> (i64, i64) {
        let to_micros = |d: NaiveDate| {
            let naive = d.and_time(chrono::NaiveTime::MIN);
            match self.offset.from_local_datetime(&naive).single() {
                Some(dt) => dt.timestamp_micros(),
                // A fixed offset never yields an ambiguous local time.
                None => naive.and_utc().timestamp_micros(),
            }
        };
        (to_micros(week.start), to_micros(week.start + Duration::days(7)))
    }

    /// Whether the week has fully elapsed.
    pub fn is_complete(&self, week: &Week) -> bool {
        let (_, end) = self.bounds_micros(week);
        Utc::now().timestamp_micros() >= end
    }
}

/// A 7-day window identified by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Week {
    pub start: NaiveDate,
}

impl Week {
    /// The week containing `date`.
    pub fn containing(date: NaiveDate, start: WeekStart) -> Self {
        let back = match start {
            WeekStart::Monday => date.weekday().num_days_from_monday(),
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
        };
        Self {
            start: date - Duration::days(back as i64),
        }
    }

    /// Parse a week string.
    ///
    /// Supported formats:
    /// - `2025-W05`: ISO week (shifted back a day for Sunday-start weeks)
    /// - `2025-01-15`: the week containing that date
    /// - `current` / `this`: the running week
    /// - `last` / `previous`: the week before
    pub fn parse(s: &str, config: &WeekConfig) -> Result<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "current" | "this" => return Ok(config.current_week()),
            "last" | "previous" | "prev" => return Ok(config.current_week().previous()),
            _ => {}
        }

        if let Some(caps) = RE_ISO_WEEK.captures(s) {
            let year: i32 = caps[1]
                .parse()
                .map_err(|_| Error::WeekParse(format!("invalid year: {s}")))?;
            let week: u32 = caps[2]
                .parse()
                .map_err(|_| Error::WeekParse(format!("invalid week: {s}")))?;
            let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
                .ok_or_else(|| Error::WeekParse(format!("no such ISO week: {s}")))?;
            return Ok(match config.start {
                WeekStart::Monday => Self { start: monday },
                WeekStart::Sunday => Self {
                    start: monday - Duration::days(1),
                },
            });
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::containing(date, config.start));
        }

        Err(Error::WeekParse(format!("unrecognized week: {s}")))
    }

    /// Canonical key used in storage: the start date.
    pub fn to_key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    /// Parse a stored key back into a week.
    pub fn from_key(key: &str) -> Result<Self> {
        NaiveDate::parse_from_str(key, "%Y-%m-%d")
            .map(|start| Self { start })
            .map_err(|_| Error::WeekParse(format!("invalid week key: {key}")))
    }

    /// Inclusive first and last day.
    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        (self.start, self.start + Duration::days(6))
    }

    /// Human-readable range, e.g. `2025-01-13 ~ 2025-01-19`.
    pub fn range_label(&self) -> String {
        let (s, e) = self.date_range();
        format!("{} ~ {}", s.format("%Y-%m-%d"), e.format("%Y-%m-%d"))
    }

    pub fn previous(&self) -> Self {
        Self {
            start: self.start - Duration::days(7),
        }
    }

    pub fn next(&self) -> Self {
        Self {
            start: self.start + Duration::days(7),
        }
    }
}

impl std::fmt::Display for Week {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Week of {}", self.to_key())
    }
}
