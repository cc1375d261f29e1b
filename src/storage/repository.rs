use std::collections::{BTreeMap, HashMap};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::metrics::{ChannelCount, MessageSample, WeeklyMetric};

// ── Channels ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub name: String,
    pub channel_type: String,
    pub is_private: bool,
    pub is_archived: bool,
    pub is_tracked: bool,
    pub dm_user_id: Option<String>,
}

/// Insert or refresh a channel. `is_tracked` only applies on first insert so
/// a manual track/untrack survives later channel discovery.
pub fn upsert_channel(conn: &Connection, channel: &ChannelRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO channels (
            channel_id, name, channel_type, is_private, is_archived, is_tracked, dm_user_id, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
        ON CONFLICT(channel_id) DO UPDATE SET
            name=excluded.name, channel_type=excluded.channel_type,
            is_private=excluded.is_private, is_archived=excluded.is_archived,
            dm_user_id=excluded.dm_user_id, updated_at=excluded.updated_at",
        params![
            channel.channel_id,
            channel.name,
            channel.channel_type,
            channel.is_private as i32,
            channel.is_archived as i32,
            channel.is_tracked as i32,
            channel.dm_user_id,
        ],
    )?;
    Ok(())
}

/// Returns false when the channel is unknown.
pub fn set_channel_tracked(
    conn: &Connection,
    channel_id: &str,
    tracked: bool,
) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "UPDATE channels SET is_tracked = ?2, updated_at = datetime('now') WHERE channel_id = ?1",
        params![channel_id, tracked as i32],
    )?;
    Ok(changed > 0)
}

fn channel_from_row(row: &rusqlite::Row) -> Result<ChannelRecord, rusqlite::Error> {
    Ok(ChannelRecord {
        channel_id: row.get(0)?,
        name: row.get(1)?,
        channel_type: row.get(2)?,
        is_private: row.get::<_, i32>(3)? != 0,
        is_archived: row.get::<_, i32>(4)? != 0,
        is_tracked: row.get::<_, i32>(5)? != 0,
        dm_user_id: row.get(6)?,
    })
}

const CHANNEL_COLUMNS: &str =
    "channel_id, name, channel_type, is_private, is_archived, is_tracked, dm_user_id";

pub fn get_channel(
    conn: &Connection,
    channel_id: &str,
) -> Result<Option<ChannelRecord>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE channel_id = ?1"),
        params![channel_id],
        channel_from_row,
    )
    .optional()
}

pub fn list_channels(conn: &Connection) -> Result<Vec<ChannelRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY channel_type, name"
    ))?;
    let rows = stmt.query_map([], channel_from_row)?;
    rows.collect()
}

pub fn list_tracked_channels(conn: &Connection) -> Result<Vec<ChannelRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels
         WHERE is_tracked = 1 AND is_archived = 0
         ORDER BY channel_id"
    ))?;
    let rows = stmt.query_map([], channel_from_row)?;
    rows.collect()
}

// ── Users ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: String,
    pub handle: String,
    pub is_bot: bool,
}

pub fn upsert_user(conn: &Connection, user: &UserRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO users (user_id, display_name, handle, is_bot, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(user_id) DO UPDATE SET
           display_name = CASE WHEN excluded.display_name != '' THEN excluded.display_name ELSE users.display_name END,
           handle = CASE WHEN excluded.handle != '' THEN excluded.handle ELSE users.handle END,
           is_bot = excluded.is_bot,
           updated_at = excluded.updated_at",
        params![user.user_id, user.display_name, user.handle, user.is_bot as i32],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<UserRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id, display_name, handle, is_bot FROM users WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(UserRecord {
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                handle: row.get(2)?,
                is_bot: row.get::<_, i32>(3)? != 0,
            })
        },
    )
    .optional()
}

/// user_id → display name (falling back to handle) for every known user.
pub fn user_names(conn: &Connection) -> Result<HashMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT user_id, CASE WHEN display_name != '' THEN display_name ELSE handle END FROM users",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Resolve a user id, handle, or display name to a user id.
/// Returns None if no match is found.
pub fn resolve_user_identifier(
    conn: &Connection,
    identifier: &str,
) -> Result<Option<String>, rusqlite::Error> {
    let identifier = identifier.trim_start_matches('@');
    conn.query_row(
        "SELECT user_id FROM users
         WHERE user_id = ?1 OR handle = ?1 OR display_name = ?1
         ORDER BY user_id = ?1 DESC, handle = ?1 DESC
         LIMIT 1",
        params![identifier],
        |row| row.get(0),
    )
    .optional()
}

// ── Messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub channel_id: String,
    pub ts: String,
    pub ts_micros: i64,
    pub thread_ts: Option<String>,
    pub reply_count: u32,
    pub user_id: String,
    pub text: String,
    pub edited_ts: Option<String>,
    pub content_hash: String,
    pub channel_type: String,
    pub raw_json: String,
}

/// What `upsert_message` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Same key, different content hash: an edit.
    Updated,
    Unchanged,
}

/// Insert a message, or apply an edit when the stored content hash differs.
/// Re-fetching an identical message writes nothing but a changed reply count.
pub fn upsert_message(
    conn: &Connection,
    msg: &MessageRecord,
) -> Result<UpsertOutcome, rusqlite::Error> {
    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT content_hash, reply_count FROM messages WHERE channel_id = ?1 AND ts = ?2",
            params![msg.channel_id, msg.ts],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO messages (
                    channel_id, ts, ts_micros, thread_ts, reply_count, user_id, text,
                    edited_ts, content_hash, channel_type, raw_json, fetched_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'), datetime('now'))",
                params![
                    msg.channel_id,
                    msg.ts,
                    msg.ts_micros,
                    msg.thread_ts,
                    msg.reply_count,
                    msg.user_id,
                    msg.text,
                    msg.edited_ts,
                    msg.content_hash,
                    msg.channel_type,
                    msg.raw_json,
                ],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
        Some((hash, _)) if hash != msg.content_hash => {
            conn.execute(
                "UPDATE messages SET
                    text = ?3, edited_ts = ?4, content_hash = ?5, raw_json = ?6,
                    reply_count = ?7, thread_ts = COALESCE(?8, thread_ts),
                    updated_at = datetime('now')
                 WHERE channel_id = ?1 AND ts = ?2",
                params![
                    msg.channel_id,
                    msg.ts,
                    msg.text,
                    msg.edited_ts,
                    msg.content_hash,
                    msg.raw_json,
                    msg.reply_count,
                    msg.thread_ts,
                ],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        Some((_, reply_count)) => {
            if reply_count != msg.reply_count as i64 {
                conn.execute(
                    "UPDATE messages SET reply_count = ?3, thread_ts = COALESCE(?4, thread_ts)
                     WHERE channel_id = ?1 AND ts = ?2",
                    params![msg.channel_id, msg.ts, msg.reply_count, msg.thread_ts],
                )?;
            }
            Ok(UpsertOutcome::Unchanged)
        }
    }
}

pub fn count_messages(conn: &Connection, channel_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
        params![channel_id],
        |row| row.get(0),
    )
}

/// Thread parents in a channel posted at or after `since_micros`.
pub fn list_recent_threads(
    conn: &Connection,
    channel_id: &str,
    since_micros: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT ts FROM messages
         WHERE channel_id = ?1 AND reply_count > 0
           AND (thread_ts IS NULL OR thread_ts = ts)
           AND ts_micros >= ?2
         ORDER BY ts_micros",
    )?;
    let rows = stmt.query_map(params![channel_id, since_micros], |row| row.get(0))?;
    rows.collect()
}

/// A user's messages in `[start, end)`, oldest first.
pub fn messages_for_user_in_range(
    conn: &Connection,
    user_id: &str,
    start_micros: i64,
    end_micros: i64,
) -> Result<Vec<MessageSample>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT channel_id, ts_micros, text FROM messages
         WHERE user_id = ?1 AND ts_micros >= ?2 AND ts_micros < ?3
         ORDER BY ts_micros, channel_id",
    )?;
    let rows = stmt.query_map(params![user_id, start_micros, end_micros], |row| {
        Ok(MessageSample {
            channel_id: row.get(0)?,
            ts_micros: row.get(1)?,
            text: row.get(2)?,
        })
    })?;
    rows.collect()
}

/// Tracked channels in which the user has ever posted.
pub fn user_tracked_channel_ids(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.channel_id FROM messages m
         JOIN channels c ON c.channel_id = m.channel_id
         WHERE m.user_id = ?1 AND c.is_tracked = 1
         ORDER BY m.channel_id",
    )?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    rows.collect()
}

/// Users with at least one message in `[start, end)`.
pub fn active_users_in_range(
    conn: &Connection,
    start_micros: i64,
    end_micros: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT user_id FROM messages
         WHERE ts_micros >= ?1 AND ts_micros < ?2
         ORDER BY user_id",
    )?;
    let rows = stmt.query_map(params![start_micros, end_micros], |row| row.get(0))?;
    rows.collect()
}

/// A message as quoted in a narrative prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Excerpt {
    pub ts_micros: i64,
    pub channel_name: String,
    pub text: String,
}

pub fn excerpts_for_user_in_range(
    conn: &Connection,
    user_id: &str,
    start_micros: i64,
    end_micros: i64,
    limit: u32,
) -> Result<Vec<Excerpt>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT m.ts_micros, COALESCE(c.name, m.channel_id), m.text FROM messages m
         LEFT JOIN channels c ON c.channel_id = m.channel_id
         WHERE m.user_id = ?1 AND m.ts_micros >= ?2 AND m.ts_micros < ?3 AND m.text != ''
         ORDER BY m.ts_micros
         LIMIT ?4",
    )?;
    let rows = stmt.query_map(params![user_id, start_micros, end_micros, limit], |row| {
        Ok(Excerpt {
            ts_micros: row.get(0)?,
            channel_name: row.get(1)?,
            text: row.get(2)?,
        })
    })?;
    rows.collect()
}

// ── Sync Cursors ───────────────────────────────────────────────────

pub fn get_channel_cursor(
    conn: &Connection,
    channel_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT last_ts FROM sync_channel_state WHERE channel_id = ?1",
        params![channel_id],
        |row| row.get(0),
    )
    .optional()
}

/// Move the channel cursor forward. A ts older than the stored one is ignored.
pub fn advance_channel_cursor(
    conn: &Connection,
    channel_id: &str,
    ts: &str,
    ts_micros: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_channel_state (channel_id, last_ts, last_ts_micros, last_synced_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(channel_id) DO UPDATE SET
            last_ts = excluded.last_ts,
            last_ts_micros = excluded.last_ts_micros,
            last_synced_at = excluded.last_synced_at
         WHERE excluded.last_ts_micros > sync_channel_state.last_ts_micros",
        params![channel_id, ts, ts_micros],
    )?;
    Ok(())
}

pub fn get_thread_cursor(
    conn: &Connection,
    channel_id: &str,
    thread_ts: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT last_ts FROM sync_thread_state WHERE channel_id = ?1 AND thread_ts = ?2",
        params![channel_id, thread_ts],
        |row| row.get(0),
    )
    .optional()
}

pub fn advance_thread_cursor(
    conn: &Connection,
    channel_id: &str,
    thread_ts: &str,
    ts: &str,
    ts_micros: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_thread_state (channel_id, thread_ts, last_ts, last_ts_micros, last_synced_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(channel_id, thread_ts) DO UPDATE SET
            last_ts = excluded.last_ts,
            last_ts_micros = excluded.last_ts_micros,
            last_synced_at = excluded.last_synced_at
         WHERE excluded.last_ts_micros > sync_thread_state.last_ts_micros",
        params![channel_id, thread_ts, ts, ts_micros],
    )?;
    Ok(())
}

/// Drop a channel's cursor and all of its thread cursors. The next sync
/// re-reads the channel from the beginning.
pub fn reset_channel_cursor(conn: &Connection, channel_id: &str) -> Result<bool, rusqlite::Error> {
    let channel = conn.execute(
        "DELETE FROM sync_channel_state WHERE channel_id = ?1",
        params![channel_id],
    )?;
    let threads = conn.execute(
        "DELETE FROM sync_thread_state WHERE channel_id = ?1",
        params![channel_id],
    )?;
    Ok(channel + threads > 0)
}

// ── Weekly Metrics ─────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> Result<String, rusqlite::Error> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(idx: usize, s: &str) -> Result<T, rusqlite::Error> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn upsert_weekly_metric(conn: &Connection, m: &WeeklyMetric) -> Result<(), rusqlite::Error> {
    let signal_counts = to_json(&m.signal_counts)?;
    let top_channels = to_json(&m.top_channels)?;
    conn.execute(
        "INSERT INTO metrics_weekly (
            user_id, week_start, message_count, active_days,
            min_gap_h, max_gap_h, avg_gap_h,
            done_signals, blocker_signals, signal_counts,
            checklist_total, checklist_done, checklist_ratio,
            mention_count, top_channels, tracked_channel_count, channel_coverage_ratio,
            computed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, datetime('now'))
        ON CONFLICT(user_id, week_start) DO UPDATE SET
            message_count=excluded.message_count, active_days=excluded.active_days,
            min_gap_h=excluded.min_gap_h, max_gap_h=excluded.max_gap_h, avg_gap_h=excluded.avg_gap_h,
            done_signals=excluded.done_signals, blocker_signals=excluded.blocker_signals,
            signal_counts=excluded.signal_counts,
            checklist_total=excluded.checklist_total, checklist_done=excluded.checklist_done,
            checklist_ratio=excluded.checklist_ratio,
            mention_count=excluded.mention_count, top_channels=excluded.top_channels,
            tracked_channel_count=excluded.tracked_channel_count,
            channel_coverage_ratio=excluded.channel_coverage_ratio,
            computed_at=excluded.computed_at",
        params![
            m.user_id,
            m.week_start,
            m.message_count,
            m.active_days,
            m.min_gap_h,
            m.max_gap_h,
            m.avg_gap_h,
            m.done_signals,
            m.blocker_signals,
            signal_counts,
            m.checklist_total,
            m.checklist_done,
            m.checklist_ratio,
            m.mention_count,
            top_channels,
            m.tracked_channel_count,
            m.channel_coverage_ratio,
        ],
    )?;
    Ok(())
}

pub(crate) const METRIC_COLUMNS: &str = "user_id, week_start, message_count, active_days, \
     min_gap_h, max_gap_h, avg_gap_h, done_signals, blocker_signals, signal_counts, \
     checklist_total, checklist_done, checklist_ratio, mention_count, top_channels, \
     tracked_channel_count, channel_coverage_ratio";

/// Build a `WeeklyMetric` from a row selected with `METRIC_COLUMNS` starting at `base`.
pub(crate) fn metric_from_row(row: &rusqlite::Row, base: usize) -> Result<WeeklyMetric, rusqlite::Error> {
    let signal_counts: String = row.get(base + 9)?;
    let top_channels: String = row.get(base + 14)?;
    Ok(WeeklyMetric {
        user_id: row.get(base)?,
        week_start: row.get(base + 1)?,
        message_count: row.get(base + 2)?,
        active_days: row.get(base + 3)?,
        min_gap_h: row.get(base + 4)?,
        max_gap_h: row.get(base + 5)?,
        avg_gap_h: row.get(base + 6)?,
        done_signals: row.get(base + 7)?,
        blocker_signals: row.get(base + 8)?,
        signal_counts: from_json::<BTreeMap<String, u32>>(base + 9, &signal_counts)?,
        checklist_total: row.get(base + 10)?,
        checklist_done: row.get(base + 11)?,
        checklist_ratio: row.get(base + 12)?,
        mention_count: row.get(base + 13)?,
        top_channels: from_json::<Vec<ChannelCount>>(base + 14, &top_channels)?,
        tracked_channel_count: row.get(base + 15)?,
        channel_coverage_ratio: row.get(base + 16)?,
    })
}

pub fn get_weekly_metric(
    conn: &Connection,
    user_id: &str,
    week_start: &str,
) -> Result<Option<WeeklyMetric>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {METRIC_COLUMNS} FROM metrics_weekly WHERE user_id = ?1 AND week_start = ?2"),
        params![user_id, week_start],
        |row| metric_from_row(row, 0),
    )
    .optional()
}

// ── Narratives ─────────────────────────────────────────────────────

/// Cached language-model summary of one user's week.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct NarrativeEntry {
    pub user_id: String,
    pub week_start: String,
    pub week_range: String,
    pub analysis_text: String,
    pub model: String,
    pub prompt_version: String,
    pub created_at: String,
}

pub(crate) const NARRATIVE_COLUMNS: &str =
    "user_id, week_start, week_range, analysis_text, model, prompt_version, created_at";

pub(crate) fn narrative_from_row(row: &rusqlite::Row, base: usize) -> Result<NarrativeEntry, rusqlite::Error> {
    Ok(NarrativeEntry {
        user_id: row.get(base)?,
        week_start: row.get(base + 1)?,
        week_range: row.get(base + 2)?,
        analysis_text: row.get(base + 3)?,
        model: row.get(base + 4)?,
        prompt_version: row.get(base + 5)?,
        created_at: row.get(base + 6)?,
    })
}

pub fn get_narrative(
    conn: &Connection,
    user_id: &str,
    week_start: &str,
) -> Result<Option<NarrativeEntry>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {NARRATIVE_COLUMNS} FROM gpt_analyses WHERE user_id = ?1 AND week_start = ?2"),
        params![user_id, week_start],
        |row| narrative_from_row(row, 0),
    )
    .optional()
}

/// Store a narrative, replacing any previous one for the same (user, week).
/// `created_at` is assigned by the database.
pub fn store_narrative(conn: &Connection, entry: &NarrativeEntry) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO gpt_analyses (
            user_id, week_start, week_range, analysis_text, model, prompt_version, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
        ON CONFLICT(user_id, week_start) DO UPDATE SET
            week_range=excluded.week_range, analysis_text=excluded.analysis_text,
            model=excluded.model, prompt_version=excluded.prompt_version,
            created_at=excluded.created_at",
        params![
            entry.user_id,
            entry.week_start,
            entry.week_range,
            entry.analysis_text,
            entry.model,
            entry.prompt_version,
        ],
    )?;
    Ok(())
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(n > 0)
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync Jobs ──────────────────────────────────────────────────────

pub fn insert_sync_job(conn: &Connection, channel_id: &str) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_jobs (channel_id, status, started_at) VALUES (?1, 'running', datetime('now'))",
        params![channel_id],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn update_sync_job(
    conn: &Connection,
    job_id: i64,
    status: &str,
    inserted: u64,
    updated: u64,
    skipped: u64,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_jobs SET
            status = ?2, completed_at = datetime('now'),
            inserted = ?3, updated = ?4, skipped = ?5,
            error_message = ?6
         WHERE id = ?1",
        params![
            job_id,
            status,
            inserted as i64,
            updated as i64,
            skipped as i64,
            error_message,
        ],
    )?;
    Ok(())
}
