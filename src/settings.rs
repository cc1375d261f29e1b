use std::collections::HashMap;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::metrics::signals::{self, SignalRules};
use crate::query::week::{WeekConfig, WeekStart};
use crate::storage::repository;
use crate::storage::Database;

/// Runtime settings read from `app_config`.
///
/// Missing keys take their defaults. A value that doesn't parse is logged
/// and replaced by the default so one bad key never blocks a run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub week_start_day: WeekStart,
    pub utc_offset_hours: i32,
    pub top_channels_limit: usize,
    pub thread_lookback_days: i64,
    pub exclude_channel_keywords: Vec<String>,
    pub narrative_max_excerpts: u32,
    pub session_ttl_minutes: i64,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub allow_partial_week: bool,
    pub signal_rules: SignalRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            week_start_day: WeekStart::Monday,
            utc_offset_hours: 0,
            top_channels_limit: 3,
            thread_lookback_days: 14,
            exclude_channel_keywords: vec!["security".to_string(), "admin".to_string()],
            narrative_max_excerpts: 200,
            session_ttl_minutes: 480,
            llm_provider: "openai".to_string(),
            llm_model: None,
            allow_partial_week: false,
            signal_rules: SignalRules::default(),
        }
    }
}

/// Every key `Settings` understands, for `config list` and validation.
pub const KNOWN_KEYS: &[&str] = &[
    "week_start_day",
    "utc_offset_hours",
    "top_channels_limit",
    "thread_lookback_days",
    "exclude_channel_keywords",
    "narrative_max_excerpts",
    "session_ttl_minutes",
    "llm_provider",
    "llm_model",
    "allow_partial_week",
    signals::CONFIG_KEY,
];

const UTC_OFFSET_HOURS: RangeInclusive<i32> = -23..=23;
const TOP_CHANNELS_LIMIT: RangeInclusive<usize> = 0..=100;
const THREAD_LOOKBACK_DAYS: RangeInclusive<i64> = 0..=365;
const NARRATIVE_MAX_EXCERPTS: RangeInclusive<u32> = 0..=2000;
const SESSION_TTL_MINUTES: RangeInclusive<i64> = 1..=525_600;
const LLM_PROVIDERS: &[&str] = &["openai", "anthropic", "bedrock"];

fn parse_in<T>(key: &str, raw: &str, range: &RangeInclusive<T>) -> std::result::Result<T, String>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let value: T = raw
        .trim()
        .parse()
        .map_err(|e| format!("invalid {key}={raw:?} ({e})"))?;
    if !range.contains(&value) {
        return Err(format!(
            "{key}={value} is outside {}..={}",
            range.start(),
            range.end()
        ));
    }
    Ok(value)
}

fn parse_or<T>(values: &HashMap<String, String>, key: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    match values.get(key) {
        None => default,
        Some(raw) => parse_in(key, raw, &range).unwrap_or_else(|e| {
            log::warn!("Ignoring {e}; using default {default}");
            default
        }),
    }
}

impl Settings {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let values: HashMap<String, String> = pairs.into_iter().collect();
        let defaults = Settings::default();

        let week_start_day = match values.get("week_start_day") {
            None => defaults.week_start_day,
            Some(raw) => WeekStart::parse(raw).unwrap_or_else(|e| {
                log::warn!("{e}; using {}", defaults.week_start_day.as_str());
                defaults.week_start_day
            }),
        };

        let utc_offset_hours = parse_or(
            &values,
            "utc_offset_hours",
            defaults.utc_offset_hours,
            UTC_OFFSET_HOURS,
        );

        let exclude_channel_keywords = match values.get("exclude_channel_keywords") {
            None => defaults.exclude_channel_keywords,
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        Self {
            week_start_day,
            utc_offset_hours,
            top_channels_limit: parse_or(
                &values,
                "top_channels_limit",
                defaults.top_channels_limit,
                TOP_CHANNELS_LIMIT,
            ),
            thread_lookback_days: parse_or(
                &values,
                "thread_lookback_days",
                defaults.thread_lookback_days,
                THREAD_LOOKBACK_DAYS,
            ),
            exclude_channel_keywords,
            narrative_max_excerpts: parse_or(
                &values,
                "narrative_max_excerpts",
                defaults.narrative_max_excerpts,
                NARRATIVE_MAX_EXCERPTS,
            ),
            session_ttl_minutes: parse_or(
                &values,
                "session_ttl_minutes",
                defaults.session_ttl_minutes,
                SESSION_TTL_MINUTES,
            ),
            llm_provider: values
                .get("llm_provider")
                .map(|s| s.trim().to_lowercase())
                .unwrap_or(defaults.llm_provider),
            llm_model: values.get("llm_model").cloned().filter(|s| !s.is_empty()),
            allow_partial_week: parse_or(
                &values,
                "allow_partial_week",
                defaults.allow_partial_week,
                false..=true,
            ),
            signal_rules: SignalRules::from_config(
                values.get(signals::CONFIG_KEY).map(String::as_str),
            ),
        }
    }

    /// Check a value before it is stored, so `from_pairs` never has to fall
    /// back for it.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        let checked = match key {
            "week_start_day" => return WeekStart::parse(value).map(|_| ()),
            "utc_offset_hours" => parse_in(key, value, &UTC_OFFSET_HOURS).map(|_| ()),
            "top_channels_limit" => parse_in(key, value, &TOP_CHANNELS_LIMIT).map(|_| ()),
            "thread_lookback_days" => parse_in(key, value, &THREAD_LOOKBACK_DAYS).map(|_| ()),
            "narrative_max_excerpts" => parse_in(key, value, &NARRATIVE_MAX_EXCERPTS).map(|_| ()),
            "session_ttl_minutes" => parse_in(key, value, &SESSION_TTL_MINUTES).map(|_| ()),
            "allow_partial_week" => parse_in(key, value, &(false..=true)).map(|_| ()),
            "llm_provider" => {
                let provider = value.trim().to_lowercase();
                if LLM_PROVIDERS.contains(&provider.as_str()) {
                    Ok(())
                } else {
                    Err(format!(
                        "unknown llm_provider '{value}'; expected one of {}",
                        LLM_PROVIDERS.join(", ")
                    ))
                }
            }
            "llm_model" | "exclude_channel_keywords" => Ok(()),
            signals::CONFIG_KEY => return SignalRules::parse(value)?.compile().map(|_| ()),
            _ => Err(format!(
                "unknown setting '{key}'; known settings: {}",
                KNOWN_KEYS.join(", ")
            )),
        };
        checked.map_err(Error::Config)
    }

    pub async fn load(db: &Database) -> Result<Self> {
        let pairs = db.reader().call(|conn| repository::list_config(conn)).await?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn week_config(&self) -> WeekConfig {
        // Range was checked in from_pairs.
        WeekConfig::new(self.week_start_day, self.utc_offset_hours).unwrap_or_default()
    }
}
