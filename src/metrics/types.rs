use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Message volume in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCount {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    pub message_count: u32,
}

/// A user's activity over one week. Derived entirely from `messages`, so it
/// can be recomputed at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyMetric {
    pub user_id: String,
    /// Start date of the week (`YYYY-MM-DD`).
    pub week_start: String,
    pub message_count: u32,
    pub active_days: u32,
    /// Hours between consecutive messages; `None` with fewer than two.
    pub min_gap_h: Option<f64>,
    pub max_gap_h: Option<f64>,
    pub avg_gap_h: Option<f64>,
    pub done_signals: u32,
    pub blocker_signals: u32,
    /// Message counts for every configured signal, including done/blocker.
    pub signal_counts: BTreeMap<String, u32>,
    pub checklist_total: u32,
    pub checklist_done: u32,
    /// `checklist_done / checklist_total`; `None` when there are no items.
    pub checklist_ratio: Option<f64>,
    pub mention_count: u32,
    pub top_channels: Vec<ChannelCount>,
    pub tracked_channel_count: u32,
    /// Share of the user's tracked channels with at least one message this week.
    pub channel_coverage_ratio: f64,
}

impl WeeklyMetric {
    pub fn empty(user_id: &str, week_start: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            week_start: week_start.to_string(),
            message_count: 0,
            active_days: 0,
            min_gap_h: None,
            max_gap_h: None,
            avg_gap_h: None,
            done_signals: 0,
            blocker_signals: 0,
            signal_counts: BTreeMap::new(),
            checklist_total: 0,
            checklist_done: 0,
            checklist_ratio: None,
            mention_count: 0,
            top_channels: Vec::new(),
            tracked_channel_count: 0,
            channel_coverage_ratio: 0.0,
        }
    }
}

/// The slice of a stored message the aggregator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSample {
    pub channel_id: String,
    pub ts_micros: i64,
    pub text: String,
}
