use std::collections::BTreeSet;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::slack::{ts_to_micros, ChannelType, SlackApi, SlackMessage};
use crate::storage::repository::{self, ChannelRecord, MessageRecord, UpsertOutcome, UserRecord};
use crate::storage::Database;
use crate::sync::api_helpers;
use crate::sync::{SyncOptions, SyncProgress, SyncReport, SyncRun, SyncStatus};

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Hex SHA-256 of a message's text. Two fetches of the same message with
/// different hashes mean it was edited.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Users & channels ───────────────────────────────────────────────

/// Fetch every workspace member and upsert them. Returns the count.
pub async fn sync_users(db: &Database, api: &dyn SlackApi) -> Result<usize> {
    let users = api_helpers::list_all_users(api).await?;
    let records: Vec<UserRecord> = users
        .iter()
        .map(|u| UserRecord {
            user_id: u.id.clone(),
            display_name: u.display_name(),
            handle: u.name.clone(),
            is_bot: u.is_bot,
        })
        .collect();
    let count = records.len();

    db.writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for user in &records {
                repository::upsert_user(&tx, user)?;
            }
            tx.commit()?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;

    log::info!("Synced {count} users");
    Ok(count)
}

fn excluded_by_name(name: &str, keywords: &[String]) -> bool {
    let name = name.to_lowercase();
    keywords.iter().any(|k| !k.is_empty() && name.contains(k.as_str()))
}

/// Discover conversations of every type and upsert them.
///
/// Channels whose name contains an excluded keyword are stored untracked.
/// DMs are never filtered by name; unnamed ones are labelled after the
/// counterpart user.
pub async fn sync_channels(
    db: &Database,
    api: &dyn SlackApi,
    settings: &Settings,
) -> Result<Vec<ChannelRecord>> {
    let channels = api_helpers::list_all_channels(api, &ChannelType::ALL).await?;
    let user_names = db.reader().call(|conn| repository::user_names(conn)).await?;

    let records: Vec<ChannelRecord> = channels
        .iter()
        .map(|c| {
            let channel_type = c.channel_type();
            let name = match c.name.as_deref().filter(|n| !n.is_empty()) {
                Some(n) => n.to_string(),
                None => match channel_type {
                    ChannelType::Im => {
                        let who = c
                            .user
                            .as_ref()
                            .and_then(|u| user_names.get(u))
                            .map(String::as_str)
                            .unwrap_or("Unknown");
                        format!("DM: {who}")
                    }
                    ChannelType::Mpim => "DM: Group".to_string(),
                    _ => c.id.clone(),
                },
            };
            let is_tracked = channel_type.is_direct()
                || !excluded_by_name(&name, &settings.exclude_channel_keywords);
            ChannelRecord {
                channel_id: c.id.clone(),
                name,
                channel_type: channel_type.as_str().to_string(),
                is_private: channel_type.is_private(),
                is_archived: c.is_archived,
                is_tracked,
                dm_user_id: if channel_type == ChannelType::Im {
                    c.user.clone()
                } else {
                    None
                },
            }
        })
        .collect();

    db.writer()
        .call({
            let records = records.clone();
            move |conn| {
                let tx = conn.transaction()?;
                for channel in &records {
                    repository::upsert_channel(&tx, channel)?;
                }
                tx.commit()?;
                Ok::<(), rusqlite::Error>(())
            }
        })
        .await?;

    log::info!("Discovered {} channels", records.len());
    Ok(records)
}

// ── Messages ───────────────────────────────────────────────────────

/// Turn a fetched message into a storable record.
///
/// Returns `None` for system messages (any `subtype`), messages without an
/// author, and messages whose timestamp doesn't parse.
fn to_record(channel: &ChannelRecord, msg: &SlackMessage) -> Option<MessageRecord> {
    if msg.subtype.is_some() {
        return None;
    }
    let user_id = msg.user.as_deref().filter(|u| !u.is_empty())?;
    let ts = match msg.ts.as_deref() {
        Some(ts) => ts,
        None => {
            log::warn!("Skipping message without ts in {}", channel.channel_id);
            return None;
        }
    };
    let Some(ts_micros) = ts_to_micros(ts) else {
        log::warn!("Skipping message with malformed ts {ts:?} in {}", channel.channel_id);
        return None;
    };
    Some(MessageRecord {
        channel_id: channel.channel_id.clone(),
        ts: ts.to_string(),
        ts_micros,
        thread_ts: msg.thread_ts.clone(),
        reply_count: msg.reply_count,
        user_id: user_id.to_string(),
        text: msg.text.clone(),
        edited_ts: msg.edited_ts().map(str::to_string),
        content_hash: content_hash(&msg.text),
        channel_type: channel.channel_type.clone(),
        raw_json: msg.raw.to_string(),
    })
}

/// Highest parseable ts in a batch, as (micros, original string).
fn max_ts<'a>(msgs: impl IntoIterator<Item = &'a SlackMessage>) -> Option<(i64, String)> {
    msgs.into_iter()
        .filter_map(|m| {
            let ts = m.ts.as_deref()?;
            ts_to_micros(ts).map(|micros| (micros, ts.to_string()))
        })
        .max_by_key(|(micros, _)| *micros)
}

/// Cursor move to apply in the same transaction as a page of messages.
enum CursorAdvance {
    None,
    Channel {
        ts: String,
        micros: i64,
    },
    Thread {
        thread_ts: String,
        ts: String,
        micros: i64,
    },
}

#[derive(Debug, Default, Clone, Copy)]
struct PageCounts {
    inserted: u64,
    updated: u64,
    unchanged: u64,
}

async fn store_page(
    db: &Database,
    channel_id: &str,
    records: Vec<MessageRecord>,
    advance: CursorAdvance,
) -> Result<PageCounts> {
    let channel_id = channel_id.to_string();
    let counts = db
        .writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut counts = PageCounts::default();
            for record in &records {
                match repository::upsert_message(&tx, record)? {
                    UpsertOutcome::Inserted => counts.inserted += 1,
                    UpsertOutcome::Updated => counts.updated += 1,
                    UpsertOutcome::Unchanged => counts.unchanged += 1,
                }
            }
            match &advance {
                CursorAdvance::None => {}
                CursorAdvance::Channel { ts, micros } => {
                    repository::advance_channel_cursor(&tx, &channel_id, ts, *micros)?;
                }
                CursorAdvance::Thread {
                    thread_ts,
                    ts,
                    micros,
                } => {
                    repository::advance_thread_cursor(&tx, &channel_id, thread_ts, ts, *micros)?;
                }
            }
            tx.commit()?;
            Ok::<PageCounts, rusqlite::Error>(counts)
        })
        .await?;
    Ok(counts)
}

fn tally(report: &mut SyncReport, counts: PageCounts) {
    report.inserted += counts.inserted;
    report.updated += counts.updated;
    report.unchanged += counts.unchanged;
}

/// Sync one channel's history and threads.
///
/// History is requested with `oldest` set to the stored cursor (or epoch for
/// a full run). Pages arrive newest first, so the cursor is only moved with
/// the last page. A failed history fetch fails the channel; a failed thread
/// marks it `PartialFailure` and the remaining threads still run.
pub async fn sync_channel(
    db: &Database,
    api: &dyn SlackApi,
    channel: &ChannelRecord,
    settings: &Settings,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    let channel_id = channel.channel_id.clone();
    let mut report = SyncReport::new(&channel_id);

    let stored_cursor = db
        .reader()
        .call({
            let channel_id = channel_id.clone();
            move |conn| repository::get_channel_cursor(conn, &channel_id)
        })
        .await?;
    let oldest = if options.full {
        "0".to_string()
    } else {
        stored_cursor.unwrap_or_else(|| "0".to_string())
    };
    log::debug!("Syncing {channel_id} from {oldest}");

    let mut parents: BTreeSet<String> = BTreeSet::new();
    let mut newest: Option<(i64, String)> = None;
    let mut page_cursor: Option<String> = None;
    loop {
        let page = api
            .conversations_history(&channel_id, &oldest, page_cursor.as_deref())
            .await?;
        progress.on_page(&channel_id, page.items.len());

        if let Some(page_max) = max_ts(&page.items) {
            match &newest {
                Some((n, _)) if *n >= page_max.0 => {}
                _ => newest = Some(page_max),
            }
        }

        let mut records = Vec::with_capacity(page.items.len());
        for msg in &page.items {
            match to_record(channel, msg) {
                Some(record) => {
                    if msg.is_thread_parent() {
                        parents.insert(record.ts.clone());
                    }
                    records.push(record);
                }
                None => report.skipped += 1,
            }
        }

        let advance = match (&page.next_cursor, &newest) {
            (None, Some((micros, ts))) => CursorAdvance::Channel {
                ts: ts.clone(),
                micros: *micros,
            },
            _ => CursorAdvance::None,
        };
        let counts = store_page(db, &channel_id, records, advance).await?;
        tally(&mut report, counts);

        match page.next_cursor {
            Some(next) => page_cursor = Some(next),
            None => break,
        }
    }

    // Threads seen in this run plus recent stored ones, so late replies to
    // older threads are still picked up.
    let lookback = settings
        .thread_lookback_days
        .max(0)
        .checked_mul(MICROS_PER_DAY)
        .unwrap_or(i64::MAX);
    let since = Utc::now().timestamp_micros().saturating_sub(lookback);
    let recent = db
        .reader()
        .call({
            let channel_id = channel_id.clone();
            move |conn| repository::list_recent_threads(conn, &channel_id, since)
        })
        .await?;
    parents.extend(recent);

    let mut thread_errors = Vec::new();
    for thread_ts in &parents {
        match sync_thread(db, api, channel, thread_ts, options, &mut report).await {
            Ok(()) => report.threads_synced += 1,
            Err(e) => {
                log::error!("Failed to sync thread {channel_id}/{thread_ts}: {e}");
                thread_errors.push(format!("thread {thread_ts}: {e}"));
            }
        }
    }
    if !thread_errors.is_empty() {
        report.status = SyncStatus::PartialFailure;
        report.error = Some(thread_errors.join("; "));
    }

    report.cursor = db
        .reader()
        .call({
            let channel_id = channel_id.clone();
            move |conn| repository::get_channel_cursor(conn, &channel_id)
        })
        .await?;

    log::info!(
        "{channel_id}: {} new, {} edited, {} skipped, {} threads",
        report.inserted,
        report.updated,
        report.skipped,
        report.threads_synced
    );
    Ok(report)
}

async fn sync_thread(
    db: &Database,
    api: &dyn SlackApi,
    channel: &ChannelRecord,
    thread_ts: &str,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<()> {
    let channel_id = channel.channel_id.clone();
    let oldest = if options.full {
        thread_ts.to_string()
    } else {
        db.reader()
            .call({
                let channel_id = channel_id.clone();
                let thread_ts = thread_ts.to_string();
                move |conn| repository::get_thread_cursor(conn, &channel_id, &thread_ts)
            })
            .await?
            .unwrap_or_else(|| thread_ts.to_string())
    };

    let mut page_cursor: Option<String> = None;
    loop {
        let page = api
            .conversations_replies(&channel_id, thread_ts, &oldest, page_cursor.as_deref())
            .await?;
        // The parent is echoed first; it is stored from channel history.
        let replies: Vec<&SlackMessage> = page
            .items
            .iter()
            .filter(|m| m.ts.as_deref() != Some(thread_ts))
            .collect();

        let mut records = Vec::with_capacity(replies.len());
        for msg in &replies {
            match to_record(channel, msg) {
                Some(mut record) => {
                    if record.thread_ts.is_none() {
                        record.thread_ts = Some(thread_ts.to_string());
                    }
                    records.push(record);
                }
                None => report.skipped += 1,
            }
        }

        let advance = match max_ts(replies.iter().copied()) {
            Some((micros, ts)) => CursorAdvance::Thread {
                thread_ts: thread_ts.to_string(),
                ts,
                micros,
            },
            None => CursorAdvance::None,
        };
        let counts = store_page(db, &channel_id, records, advance).await?;
        tally(report, counts);

        match page.next_cursor {
            Some(next) => page_cursor = Some(next),
            None => break,
        }
    }
    Ok(())
}

// ── Full run ───────────────────────────────────────────────────────

async fn channels_to_sync(
    db: &Database,
    options: &SyncOptions,
) -> Result<Vec<std::result::Result<ChannelRecord, String>>> {
    if options.channels.is_empty() {
        let tracked = db
            .reader()
            .call(|conn| repository::list_tracked_channels(conn))
            .await?;
        return Ok(tracked.into_iter().map(Ok).collect());
    }

    let requested = options.channels.clone();
    let found = db
        .reader()
        .call(move |conn| {
            let mut found = Vec::with_capacity(requested.len());
            for id in requested {
                found.push(repository::get_channel(conn, &id)?.ok_or(id));
            }
            Ok::<_, rusqlite::Error>(found)
        })
        .await?;
    Ok(found)
}

/// Sync users, discover channels, then sync every tracked channel (or the
/// ones named in `options.channels`) one after another.
///
/// A failure in one channel is logged, recorded in `sync_jobs` and reported;
/// it never stops the others.
pub async fn sync_all(
    db: &Database,
    api: &dyn SlackApi,
    settings: &Settings,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncRun> {
    let mut run = SyncRun::default();

    if let Err(e) = sync_users(db, api).await {
        log::error!("Failed to sync users: {e}");
        run.errors.push(format!("users: {e}"));
    }
    if let Err(e) = sync_channels(db, api, settings).await {
        log::error!("Failed to discover channels, using stored list: {e}");
        run.errors.push(format!("channels: {e}"));
    }

    let targets = channels_to_sync(db, options).await?;
    let total = targets.len();
    for (i, target) in targets.into_iter().enumerate() {
        let channel = match target {
            Ok(channel) => channel,
            Err(id) => {
                let e = Error::NotFound(format!("channel {id}"));
                log::error!("Cannot sync {id}: {e}");
                run.errors.push(format!("{id}: {e}"));
                let report = SyncReport::failed(&id, e.to_string());
                progress.on_channel_complete(&report);
                run.reports.push(report);
                continue;
            }
        };
        progress.on_channel_start(&channel.channel_id, i, total);

        let job_id = db
            .writer()
            .call({
                let channel_id = channel.channel_id.clone();
                move |conn| repository::insert_sync_job(conn, &channel_id)
            })
            .await?;

        let report = match sync_channel(db, api, &channel, settings, options, progress).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Failed to sync {}: {e}", channel.channel_id);
                SyncReport::failed(&channel.channel_id, e.to_string())
            }
        };
        if let Some(ref error) = report.error {
            run.errors.push(format!("{}: {error}", channel.channel_id));
        }

        db.writer()
            .call({
                let status = report.status.as_str();
                let (inserted, updated, skipped) = (report.inserted, report.updated, report.skipped);
                let error = report.error.clone();
                move |conn| {
                    repository::update_sync_job(
                        conn,
                        job_id,
                        status,
                        inserted,
                        updated,
                        skipped,
                        error.as_deref(),
                    )
                }
            })
            .await?;

        progress.on_channel_complete(&report);
        run.reports.push(report);
    }

    log::info!(
        "Sync finished: {} channels, {} failed",
        run.reports.len(),
        run.failed_count()
    );
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::mock::{self, MockSlack};
    use crate::sync::NoopProgress;

    /// A ts `offset_secs` after a point one hour ago, so threads fall inside
    /// the lookback window.
    fn ts(offset_secs: i64) -> String {
        let base = Utc::now().timestamp() - 3600;
        format!("{}.000100", base + offset_secs)
    }

    async fn run(db: &Database, slack: &MockSlack, options: &SyncOptions) -> SyncRun {
        sync_all(db, slack, &Settings::default(), options, &NoopProgress)
            .await
            .unwrap()
    }

    async fn message_count(db: &Database) -> i64 {
        db.reader()
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get::<_, i64>(0))
            })
            .await
            .unwrap()
    }

    fn general() -> MockSlack {
        let slack = MockSlack::new();
        slack.add_channel(mock::channel("C1", Some("general"), ChannelType::PublicChannel));
        slack.add_user(mock::user("U1", "Alice"));
        slack
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(content_hash("hello"), content_hash("hello!"));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_cursor_is_max_ts() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        for i in 1..=3 {
            slack.post("C1", mock::message(&ts(i), "U1", &format!("msg {i}")));
        }

        let first = run(&db, &slack, &SyncOptions::default()).await;
        assert_eq!(first.reports.len(), 1);
        let report = &first.reports[0];
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.cursor.as_deref(), Some(ts(3).as_str()));
        // Page size is two in the mock.
        assert_eq!(slack.call_count("conversations.history:C1"), 2);

        let second = run(&db, &slack, &SyncOptions::default()).await;
        let report = &second.reports[0];
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.cursor.as_deref(), Some(ts(3).as_str()));
        assert_eq!(message_count(&db).await, 3);
    }

    #[tokio::test]
    async fn test_full_sync_picks_up_edits() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        slack.post("C1", mock::message(&ts(1), "U1", "draft"));
        run(&db, &slack, &SyncOptions::default()).await;

        slack.edit("C1", &ts(1), "final", &ts(100));
        // The cursor is past the message, so an incremental run misses the edit.
        let incremental = run(&db, &slack, &SyncOptions::default()).await;
        assert_eq!(incremental.reports[0].updated, 0);

        let full = SyncOptions {
            full: true,
            ..Default::default()
        };
        let report = &run(&db, &slack, &full).await.reports[0];
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);
        assert_eq!(message_count(&db).await, 1);

        let (text, edited): (String, Option<String>) = db
            .reader()
            .call(|conn| {
                conn.query_row("SELECT text, edited_ts FROM messages", [], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })
            })
            .await
            .unwrap();
        assert_eq!(text, "final");
        assert_eq!(edited, Some(ts(100)));
    }

    #[tokio::test]
    async fn test_threads_and_late_replies() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        let parent = ts(1);
        slack.post("C1", mock::message(&parent, "U1", "question?"));
        slack.post_reply("C1", mock::reply(&ts(2), &parent, "U1", "answer 1"));
        slack.post_reply("C1", mock::reply(&ts(3), &parent, "U1", "answer 2"));

        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.threads_synced, 1);
        // The channel cursor only reflects channel history.
        assert_eq!(report.cursor, Some(parent.clone()));

        let thread_cursor = db
            .reader()
            .call({
                let parent = parent.clone();
                move |conn| repository::get_thread_cursor(conn, "C1", &parent)
            })
            .await
            .unwrap();
        assert_eq!(thread_cursor, Some(ts(3)));

        // A late reply on a thread whose parent is not new is still found.
        slack.post_reply("C1", mock::reply(&ts(4), &parent, "U1", "answer 3"));
        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.inserted, 1);
        assert_eq!(message_count(&db).await, 4);

        let stored_thread: Option<String> = db
            .reader()
            .call({
                let t = ts(4);
                move |conn| {
                    conn.query_row(
                        "SELECT thread_ts FROM messages WHERE ts = ?1",
                        [&t],
                        |r| r.get(0),
                    )
                }
            })
            .await
            .unwrap();
        assert_eq!(stored_thread, Some(parent));
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_stop_others() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        slack.add_channel(mock::channel("C2", Some("random"), ChannelType::PublicChannel));
        slack.post("C1", mock::message(&ts(1), "U1", "hi"));
        slack.post("C2", mock::message(&ts(2), "U1", "hi"));
        slack.fail_channel("C2");

        let result = run(&db, &slack, &SyncOptions::default()).await;
        assert_eq!(result.reports.len(), 2);
        let by_id = |id: &str| result.reports.iter().find(|r| r.channel_id == id).unwrap();
        assert_eq!(by_id("C1").status, SyncStatus::Success);
        assert_eq!(by_id("C1").inserted, 1);
        assert_eq!(by_id("C2").status, SyncStatus::Failed);
        assert!(by_id("C2").error.as_deref().unwrap().contains("channel_not_found"));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.failed_count(), 1);

        let statuses: Vec<(String, String)> = db
            .reader()
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT channel_id, status FROM sync_jobs ORDER BY channel_id")?;
                let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                ("C1".to_string(), "completed".to_string()),
                ("C2".to_string(), "failed".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_skips_system_and_malformed_messages() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        slack.post("C1", mock::message(&ts(1), "U1", "real"));
        slack.post(
            "C1",
            SlackMessage::from_value(serde_json::json!({
                "ts": ts(2), "user": "U1", "subtype": "channel_join", "text": "joined"
            }))
            .unwrap(),
        );
        slack.post(
            "C1",
            SlackMessage::from_value(serde_json::json!({"ts": ts(3), "text": "no author"})).unwrap(),
        );
        slack.post("C1", mock::message("not-a-ts", "U1", "broken"));

        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 3);
        // Skipped messages with a valid ts still move the cursor.
        assert_eq!(report.cursor, Some(ts(3)));
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        slack.post("C1", mock::message(&ts(1), "U1", "first"));
        slack.post(
            "C1",
            SlackMessage::from_value_lossy(serde_json::json!({
                "ts": 1700000000.0001, "user": "U1", "text": "numeric ts"
            })),
        );
        slack.post(
            "C1",
            SlackMessage::from_value_lossy(serde_json::json!({
                "ts": ts(3), "user": "U1", "text": null
            })),
        );

        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.cursor, Some(ts(3)));

        // The next run does not trip over it again.
        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn test_failure_mid_listing_keeps_cursor() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        slack.post("C1", mock::message(&ts(1), "U1", "old"));
        run(&db, &slack, &SyncOptions::default()).await;

        for i in 2..=4 {
            slack.post("C1", mock::message(&ts(i), "U1", &format!("new {i}")));
        }
        // The newest page (ts 4, 3) is stored, the second page fails.
        slack.fail_channel_after("C1", 1);
        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.status, SyncStatus::Failed);
        let cursor = db
            .reader()
            .call(|conn| repository::get_channel_cursor(conn, "C1"))
            .await
            .unwrap();
        assert_eq!(cursor, Some(ts(1)));
        assert_eq!(message_count(&db).await, 3);

        slack.heal_channel("C1");
        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.cursor, Some(ts(4)));
        assert_eq!(message_count(&db).await, 4);
    }

    #[tokio::test]
    async fn test_huge_thread_lookback_does_not_overflow() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        slack.post("C1", mock::message(&ts(1), "U1", "hi"));
        let settings = Settings {
            thread_lookback_days: i64::MAX,
            ..Settings::default()
        };
        let result = sync_all(&db, &slack, &settings, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(result.reports[0].status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn test_channel_discovery() {
        let db = Database::open_memory().await.unwrap();
        let slack = MockSlack::new();
        slack.add_user(mock::user("U2", "Bob"));
        slack.add_channel(mock::channel("C1", Some("general"), ChannelType::PublicChannel));
        slack.add_channel(mock::channel("C2", Some("Security-alerts"), ChannelType::PublicChannel));
        slack.add_channel(mock::channel("G1", Some("admin-only"), ChannelType::PrivateChannel));
        let mut dm = mock::channel("D1", None, ChannelType::Im);
        dm.user = Some("U2".into());
        slack.add_channel(dm);
        slack.add_channel(mock::channel("D2", None, ChannelType::Im));
        slack.add_channel(mock::channel("M1", None, ChannelType::Mpim));
        slack.deny_scope(ChannelType::PrivateChannel);

        sync_users(&db, &slack).await.unwrap();
        let channels = sync_channels(&db, &slack, &Settings::default()).await.unwrap();
        let find = |id: &str| channels.iter().find(|c| c.channel_id == id).cloned();

        assert!(find("C1").unwrap().is_tracked);
        assert!(!find("C2").unwrap().is_tracked);
        // Private channels were skipped for lack of scope.
        assert!(find("G1").is_none());
        assert_eq!(find("D1").unwrap().name, "DM: Bob");
        assert_eq!(find("D1").unwrap().dm_user_id.as_deref(), Some("U2"));
        assert_eq!(find("D2").unwrap().name, "DM: Unknown");
        assert_eq!(find("M1").unwrap().name, "DM: Group");
        assert!(find("M1").unwrap().is_tracked);

        let tracked = db
            .reader()
            .call(|conn| repository::list_tracked_channels(conn))
            .await
            .unwrap();
        assert_eq!(tracked.len(), 4);
    }

    #[tokio::test]
    async fn test_reset_cursor_rereads_without_duplicates() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        for i in 1..=3 {
            slack.post("C1", mock::message(&ts(i), "U1", "x"));
        }
        run(&db, &slack, &SyncOptions::default()).await;

        db.writer()
            .call(|conn| repository::reset_channel_cursor(conn, "C1"))
            .await
            .unwrap();
        let report = run(&db, &slack, &SyncOptions::default()).await.reports[0].clone();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.unchanged, 3);
        assert_eq!(message_count(&db).await, 3);
    }

    #[tokio::test]
    async fn test_unknown_requested_channel_is_reported() {
        let db = Database::open_memory().await.unwrap();
        let slack = general();
        let options = SyncOptions {
            channels: vec!["C404".into()],
            ..Default::default()
        };
        let result = run(&db, &slack, &options).await;
        assert_eq!(result.reports[0].status, SyncStatus::Failed);
        assert_eq!(slack.call_count("conversations.history"), 0);
    }
}
