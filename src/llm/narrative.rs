use crate::error::{Error, Result};
use crate::llm::TextGenerator;
use crate::metrics::WeeklyMetric;
use crate::query::week::Week;
use crate::settings::Settings;
use crate::slack::micros_to_datetime;
use crate::storage::repository::{self, Excerpt, NarrativeEntry};
use crate::storage::Database;
use crate::text::{clean_text, truncate_chars};

pub const PROMPT_VERSION: &str = "weekly-v1";

const EXCERPT_MAX_CHARS: usize = 400;

const SYSTEM_PROMPT: &str = "You are a data-driven coach who writes weekly activity reports \
for managers. Be decisive and practical; ground every point in the numbers and messages given.";

#[derive(Debug, Clone, Copy, Default)]
pub struct NarrativeOptions {
    /// Regenerate even if a cached entry exists.
    pub force: bool,
    /// Quote the user's messages in the prompt, not just the metrics.
    pub include_excerpts: bool,
}

/// Return the narrative for a user's week, generating it on a cache miss.
///
/// A cached entry is returned without calling the generator unless
/// `options.force` is set. A generator error or an empty response leaves
/// the cache untouched.
pub async fn generate_narrative(
    db: &Database,
    generator: &dyn TextGenerator,
    settings: &Settings,
    metric: &WeeklyMetric,
    week: &Week,
    options: &NarrativeOptions,
) -> Result<NarrativeEntry> {
    let user_id = metric.user_id.clone();
    let week_key = week.to_key();

    if !options.force {
        let cached = db
            .reader()
            .call({
                let user_id = user_id.clone();
                let week_key = week_key.clone();
                move |conn| repository::get_narrative(conn, &user_id, &week_key)
            })
            .await?;
        if let Some(entry) = cached {
            log::debug!("Narrative cache hit for {user_id} {week_key}");
            return Ok(entry);
        }
    }

    let week_config = settings.week_config();
    let (start, end) = week_config.bounds_micros(week);
    let limit = settings.narrative_max_excerpts;
    let include_excerpts = options.include_excerpts;
    let (user_name, excerpts, names) = db
        .reader()
        .call({
            let user_id = user_id.clone();
            move |conn| {
                let user_name = repository::get_user(conn, &user_id)?
                    .map(|u| u.display_name)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| user_id.clone());
                if !include_excerpts {
                    return Ok((user_name, Vec::new(), Default::default()));
                }
                let excerpts =
                    repository::excerpts_for_user_in_range(conn, &user_id, start, end, limit)?;
                let names = repository::user_names(conn)?;
                Ok::<_, rusqlite::Error>((user_name, excerpts, names))
            }
        })
        .await?;

    let excerpt_lines: Vec<String> = excerpts
        .iter()
        .map(|e| format_excerpt(e, &names, settings))
        .collect();
    let prompt = build_prompt(&user_name, week, metric, &excerpt_lines)?;

    log::info!("Generating narrative for {user_name} ({week})");
    let text = generator.generate(SYSTEM_PROMPT, &prompt).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Llm(format!(
            "empty response for {user_id} {week_key}"
        )));
    }

    let entry = NarrativeEntry {
        user_id: user_id.clone(),
        week_start: week_key.clone(),
        week_range: week.range_label(),
        analysis_text: text.to_string(),
        model: generator.model().to_string(),
        prompt_version: PROMPT_VERSION.to_string(),
        created_at: String::new(),
    };
    let stored = db
        .writer()
        .call(move |conn| {
            repository::store_narrative(conn, &entry)?;
            repository::get_narrative(conn, &entry.user_id, &entry.week_start)
        })
        .await?;
    stored.ok_or_else(|| Error::NotFound(format!("narrative for {user_id} {week_key}")))
}

/// `[YYYY-MM-DD HH:MM | #channel] text`, in the configured offset.
fn format_excerpt(
    excerpt: &Excerpt,
    names: &std::collections::HashMap<String, String>,
    settings: &Settings,
) -> String {
    let when = micros_to_datetime(excerpt.ts_micros)
        .map(|dt| {
            settings
                .week_config()
                .local(dt)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_default();
    let text = clean_text(&excerpt.text, names);
    let text = truncate_chars(&text, EXCERPT_MAX_CHARS);
    format!("[{when} | #{}] {text}", excerpt.channel_name)
}

fn build_prompt(
    user_name: &str,
    week: &Week,
    metric: &WeeklyMetric,
    excerpts: &[String],
) -> Result<String> {
    let metrics_json = serde_json::to_string_pretty(metric)?;
    let mut prompt = format!(
        r#"Write a weekly activity report for {user_name} covering {range}.

Use these sections:
1. Main work items: 3-6 bullets. Cite the quantitative metrics (message count, active days, gaps), collaboration (mentions), top channels and channel coverage.
2. Business advice: 3-5 concrete recommendations.
3. Personal coaching: 3-5 points on working habits and communication.
4. Next-week KPIs: 3 quantitative targets.

Metrics:
{metrics_json}
"#,
        range = week.range_label(),
    );
    if excerpts.is_empty() {
        prompt.push_str("\nNo message excerpts are included; base the report on the metrics.\n");
    } else {
        prompt.push_str(&format!("\nMessages ({}):\n", excerpts.len()));
        for line in excerpts {
            prompt.push_str(line);
            prompt.push('\n');
        }
    }
    Ok(prompt)
}
