use std::fmt::Write as _;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::metrics::WeeklyMetric;
use crate::query::week::Week;
use crate::storage::repository::{self, NarrativeEntry};
use crate::storage::Database;

/// A user's week: the metric and, when one has been generated, its narrative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub user_id: String,
    pub user_name: Option<String>,
    pub week_start: String,
    pub week_range: String,
    pub metric: WeeklyMetric,
    pub narrative: Option<NarrativeEntry>,
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}")).unwrap_or_default()
}

fn fmt_pct(v: f64) -> String {
    format!("{:.0}%", v * 100.0)
}

impl WeeklyReport {
    pub fn new(
        metric: WeeklyMetric,
        narrative: Option<NarrativeEntry>,
        user_name: Option<String>,
    ) -> Self {
        let week_range = Week::from_key(&metric.week_start)
            .map(|w| w.range_label())
            .unwrap_or_else(|_| metric.week_start.clone());
        Self {
            user_id: metric.user_id.clone(),
            user_name,
            week_start: metric.week_start.clone(),
            week_range,
            metric,
            narrative,
        }
    }

    /// Load the stored metric and narrative for a user's week.
    pub async fn load(db: &Database, user_id: &str, week: &Week) -> Result<Self> {
        let user_id = user_id.to_string();
        let week_key = week.to_key();
        let (metric, narrative, user) = db
            .reader()
            .call({
                let user_id = user_id.clone();
                let week_key = week_key.clone();
                move |conn| {
                    let metric = repository::get_weekly_metric(conn, &user_id, &week_key)?;
                    let narrative = repository::get_narrative(conn, &user_id, &week_key)?;
                    let user = repository::get_user(conn, &user_id)?;
                    Ok::<_, rusqlite::Error>((metric, narrative, user))
                }
            })
            .await?;
        let metric = metric.ok_or_else(|| {
            Error::NotFound(format!("no metrics for {user_id} in week {week_key}"))
        })?;
        Ok(Self::new(metric, narrative, user.map(|u| u.display_name)))
    }

    fn display_name(&self) -> &str {
        self.user_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.user_id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flat key/value pairs for tabular exports.
    ///
    /// The metric and narrative columns are always present, in a fixed order
    /// (narrative cells are empty when none was generated). Extra signals
    /// follow as `signal_<name>` columns sorted by name.
    pub fn to_key_values(&self) -> Vec<(String, String)> {
        let m = &self.metric;
        let narrative = self.narrative.as_ref();
        let mut kv: Vec<(String, String)> = [
            ("user_id", self.user_id.clone()),
            ("user_name", self.display_name().to_string()),
            ("week_start", self.week_start.clone()),
            ("week_range", self.week_range.clone()),
            ("message_count", m.message_count.to_string()),
            ("active_days", m.active_days.to_string()),
            ("min_gap_h", fmt_opt(m.min_gap_h)),
            ("max_gap_h", fmt_opt(m.max_gap_h)),
            ("avg_gap_h", fmt_opt(m.avg_gap_h)),
            ("done_signals", m.done_signals.to_string()),
            ("blocker_signals", m.blocker_signals.to_string()),
            ("checklist_total", m.checklist_total.to_string()),
            ("checklist_done", m.checklist_done.to_string()),
            ("checklist_ratio", fmt_opt(m.checklist_ratio)),
            ("mention_count", m.mention_count.to_string()),
            (
                "top_channels",
                m.top_channels
                    .iter()
                    .map(|c| {
                        format!(
                            "{}:{}",
                            c.channel_name.as_deref().unwrap_or(&c.channel_id),
                            c.message_count
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
            ("tracked_channel_count", m.tracked_channel_count.to_string()),
            ("channel_coverage_ratio", format!("{:.2}", m.channel_coverage_ratio)),
            (
                "narrative_model",
                narrative.map(|n| n.model.clone()).unwrap_or_default(),
            ),
            (
                "narrative_created_at",
                narrative.map(|n| n.created_at.clone()).unwrap_or_default(),
            ),
            (
                "narrative",
                narrative.map(|n| n.analysis_text.clone()).unwrap_or_default(),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        for (name, count) in &m.signal_counts {
            if name != crate::metrics::signals::DONE && name != crate::metrics::signals::BLOCKER {
                kv.push((format!("signal_{name}"), count.to_string()));
            }
        }
        kv
    }

    /// Human-readable report for the terminal or a plain-text download.
    pub fn to_plain_text(&self) -> String {
        let m = &self.metric;
        let mut out = String::new();
        let _ = writeln!(out, "{} · {}", self.display_name(), self.week_range);
        let _ = writeln!(out);
        let _ = writeln!(out, "Messages:         {}", m.message_count);
        let _ = writeln!(out, "Active days:      {}", m.active_days);
        match m.avg_gap_h {
            Some(avg) => {
                let _ = writeln!(
                    out,
                    "Gap (h):          avg {avg:.1}, min {:.1}, max {:.1}",
                    m.min_gap_h.unwrap_or(0.0),
                    m.max_gap_h.unwrap_or(0.0)
                );
            }
            None => {
                let _ = writeln!(out, "Gap (h):          n/a");
            }
        }
        let _ = writeln!(out, "Done signals:     {}", m.done_signals);
        let _ = writeln!(out, "Blocker signals:  {}", m.blocker_signals);
        match m.checklist_ratio {
            Some(ratio) => {
                let _ = writeln!(
                    out,
                    "Checklist:        {}/{} ({})",
                    m.checklist_done,
                    m.checklist_total,
                    fmt_pct(ratio)
                );
            }
            None => {
                let _ = writeln!(out, "Checklist:        none");
            }
        }
        let _ = writeln!(out, "Mentions:         {}", m.mention_count);
        let _ = writeln!(
            out,
            "Coverage:         {} of {} channels",
            fmt_pct(m.channel_coverage_ratio),
            m.tracked_channel_count
        );
        if !m.top_channels.is_empty() {
            let _ = writeln!(out, "Top channels:");
            for c in &m.top_channels {
                let _ = writeln!(
                    out,
                    "  #{:<20} {}",
                    c.channel_name.as_deref().unwrap_or(&c.channel_id),
                    c.message_count
                );
            }
        }
        if let Some(ref n) = self.narrative {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", n.analysis_text);
        }
        out
    }
}
