pub mod signals;
pub mod types;

pub use types::*;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::Result;
use crate::metrics::signals::CompiledRules;
use crate::query::week::{Week, WeekConfig};
use crate::settings::Settings;
use crate::slack::micros_to_datetime;
use crate::storage::repository;
use crate::storage::Database;

const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// Everything besides the messages themselves that shapes a weekly metric.
pub struct Aggregator<'a> {
    pub rules: &'a CompiledRules,
    pub week_config: WeekConfig,
    pub top_channels_limit: usize,
    pub channel_names: &'a HashMap<String, String>,
}

impl Aggregator<'_> {
    /// Compute a user's metric from their messages in one week.
    ///
    /// `tracked_channel_ids` are the tracked channels the user has ever
    /// posted in; they are the denominator of the coverage ratio.
    pub fn aggregate(
        &self,
        user_id: &str,
        week: &Week,
        samples: &[MessageSample],
        tracked_channel_ids: &[String],
    ) -> WeeklyMetric {
        let mut metric = WeeklyMetric::empty(user_id, &week.to_key());
        for name in self.rules.signal_names() {
            metric.signal_counts.insert(name.to_string(), 0);
        }
        metric.tracked_channel_count = tracked_channel_ids.len() as u32;

        let mut sorted: Vec<&MessageSample> = samples.iter().collect();
        sorted.sort_by(|a, b| {
            a.ts_micros
                .cmp(&b.ts_micros)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        metric.message_count = sorted.len() as u32;

        let mut days = HashSet::new();
        let mut per_channel: BTreeMap<&str, u32> = BTreeMap::new();
        for m in &sorted {
            if let Some(dt) = micros_to_datetime(m.ts_micros) {
                days.insert(self.week_config.local(dt).date_naive());
            }
            *per_channel.entry(m.channel_id.as_str()).or_default() += 1;

            for name in self.rules.matching_signals(&m.text) {
                *metric.signal_counts.entry(name.to_string()).or_default() += 1;
            }
            let checklist = self.rules.checklist(&m.text);
            metric.checklist_total += checklist.total;
            metric.checklist_done += checklist.done;
            if self.rules.has_mention(&m.text) {
                metric.mention_count += 1;
            }
        }
        metric.active_days = days.len() as u32;

        let gaps: Vec<f64> = sorted
            .windows(2)
            .map(|w| (w[1].ts_micros - w[0].ts_micros) as f64 / MICROS_PER_HOUR)
            .collect();
        if !gaps.is_empty() {
            metric.min_gap_h = gaps.iter().copied().reduce(f64::min);
            metric.max_gap_h = gaps.iter().copied().reduce(f64::max);
            metric.avg_gap_h = Some(gaps.iter().sum::<f64>() / gaps.len() as f64);
        }

        metric.done_signals = metric.signal_counts.get(signals::DONE).copied().unwrap_or(0);
        metric.blocker_signals = metric
            .signal_counts
            .get(signals::BLOCKER)
            .copied()
            .unwrap_or(0);
        if metric.checklist_total > 0 {
            metric.checklist_ratio =
                Some(metric.checklist_done as f64 / metric.checklist_total as f64);
        }

        // Count desc, then channel id asc. per_channel iterates in id order
        // and the sort is stable.
        let mut ranked: Vec<(&str, u32)> = per_channel.iter().map(|(k, v)| (*k, *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        metric.top_channels = ranked
            .into_iter()
            .take(self.top_channels_limit)
            .map(|(id, count)| ChannelCount {
                channel_id: id.to_string(),
                channel_name: self.channel_names.get(id).cloned(),
                message_count: count,
            })
            .collect();

        if !tracked_channel_ids.is_empty() {
            let active = tracked_channel_ids
                .iter()
                .filter(|id| per_channel.contains_key(id.as_str()))
                .count();
            metric.channel_coverage_ratio =
                (active as f64 / tracked_channel_ids.len() as f64).clamp(0.0, 1.0);
        }

        metric
    }
}

/// Compute and store one user's metric for a week.
pub async fn compute_weekly_metric(
    db: &Database,
    settings: &Settings,
    user_id: &str,
    week: &Week,
) -> Result<WeeklyMetric> {
    let mut metrics = compute_for_users(db, settings, week, vec![user_id.to_string()]).await?;
    Ok(metrics.pop().unwrap_or_else(|| WeeklyMetric::empty(user_id, &week.to_key())))
}

/// Compute and store the metric of every user with at least one message in
/// the week.
pub async fn compute_week_for_all_users(
    db: &Database,
    settings: &Settings,
    week: &Week,
) -> Result<Vec<WeeklyMetric>> {
    let (start, end) = settings.week_config().bounds_micros(week);
    let users = db
        .reader()
        .call(move |conn| repository::active_users_in_range(conn, start, end))
        .await?;
    log::info!("Computing {} metrics for {} users", week, users.len());
    compute_for_users(db, settings, week, users).await
}

async fn compute_for_users(
    db: &Database,
    settings: &Settings,
    week: &Week,
    user_ids: Vec<String>,
) -> Result<Vec<WeeklyMetric>> {
    let rules = settings.signal_rules.compile()?;
    let week_config = settings.week_config();
    let (start, end) = week_config.bounds_micros(week);

    let (channel_names, inputs) = db
        .reader()
        .call(move |conn| {
            let channel_names: HashMap<String, String> = repository::list_channels(conn)?
                .into_iter()
                .map(|c| (c.channel_id, c.name))
                .collect();
            let mut inputs = Vec::with_capacity(user_ids.len());
            for user_id in user_ids {
                let samples = repository::messages_for_user_in_range(conn, &user_id, start, end)?;
                let tracked = repository::user_tracked_channel_ids(conn, &user_id)?;
                inputs.push((user_id, samples, tracked));
            }
            Ok::<_, rusqlite::Error>((channel_names, inputs))
        })
        .await?;

    let aggregator = Aggregator {
        rules: &rules,
        week_config,
        top_channels_limit: settings.top_channels_limit,
        channel_names: &channel_names,
    };
    let metrics: Vec<WeeklyMetric> = inputs
        .iter()
        .map(|(user_id, samples, tracked)| aggregator.aggregate(user_id, week, samples, tracked))
        .collect();

    db.writer()
        .call({
            let metrics = metrics.clone();
            move |conn| {
                let tx = conn.transaction()?;
                for m in &metrics {
                    repository::upsert_weekly_metric(&tx, m)?;
                }
                tx.commit()?;
                Ok::<(), rusqlite::Error>(())
            }
        })
        .await?;

    Ok(metrics)
}
