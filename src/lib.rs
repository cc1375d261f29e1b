pub mod auth;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod query;
pub mod report;
pub mod settings;
pub mod slack;
pub mod storage;
pub mod sync;
pub mod text;
pub mod url;

pub use auth::Session;
pub use error::{Error, Result};
pub use llm::narrative::NarrativeOptions;
pub use llm::TextGenerator;
pub use metrics::signals::SignalRules;
pub use metrics::WeeklyMetric;
pub use query::builder::ReportQuery;
pub use query::week::{Week, WeekConfig, WeekStart};
pub use report::WeeklyReport;
pub use settings::Settings;
pub use slack::{SlackApi, SlackClient};
pub use storage::Database;
pub use sync::{NoopProgress, SyncOptions, SyncProgress, SyncReport, SyncRun, SyncStatus};
pub use url::{parse_slack_url, resolve_channel_id, SlackPermalink};

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{ChannelRecord, NarrativeEntry};

use serde::Serialize;

use auth::SessionRegistry;
use metrics::signals;
use storage::repository;
use sync::syncer;

/// A tracked or known channel with its stored message count and cursor.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: ChannelRecord,
    pub messages: i64,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseStatus {
    pub channels: i64,
    pub tracked_channels: i64,
    pub users: i64,
    pub messages: i64,
    pub weekly_metrics: i64,
    pub narratives: i64,
    pub last_sync: Option<String>,
}

/// Outcome of a weekly metrics + narratives run.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyRun {
    pub week: Week,
    pub metrics_computed: usize,
    pub narratives_generated: usize,
    /// Narratives were skipped because the week is still running.
    pub partial_week_skipped: bool,
    pub errors: Vec<String>,
}

/// Main entry point for the Slack Data Warehouse.
///
/// Every operation takes a `Session` from [`SlackDW::login`]; closed or
/// expired sessions are rejected.
pub struct SlackDW {
    db: Database,
    client: Option<Box<dyn SlackApi>>,
    sessions: SessionRegistry,
}

impl SlackDW {
    /// A warehouse without a Slack client. Everything but `sync` works.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            client: None,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn with_client(mut self, client: Box<dyn SlackApi>) -> Self {
        self.client = Some(client);
        self
    }

    // ── Session ────────────────────────────────────────────────────

    /// Store the first set of login credentials. Fails once credentials
    /// exist; use `change_credentials` from a session after that.
    pub async fn initialize_credentials(&self, username: &str, password: &str) -> Result<()> {
        let existing = self
            .db
            .reader()
            .call(|conn| repository::get_config(conn, auth::USERNAME_KEY))
            .await?;
        if existing.is_some() {
            return Err(Error::Auth(
                "credentials already configured; log in to change them".into(),
            ));
        }
        auth::set_credentials(&self.db, username, password).await
    }

    pub async fn change_credentials(
        &self,
        session: &Session,
        username: &str,
        password: &str,
    ) -> Result<()> {
        self.sessions.ensure_active(session)?;
        auth::set_credentials(&self.db, username, password).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let settings = Settings::load(&self.db).await?;
        self.sessions
            .login(&self.db, username, password, settings.session_ttl_minutes)
            .await
    }

    /// Returns false when the session was already closed.
    pub fn logout(&self, session: &Session) -> bool {
        self.sessions.logout(session)
    }

    /// Check the session and read the current settings.
    pub async fn settings(&self, session: &Session) -> Result<Settings> {
        self.sessions.ensure_active(session)?;
        Settings::load(&self.db).await
    }

    /// Parse a week expression (`current`, `last`, `2025-W05`, `2025-01-13`).
    /// `None` means the last complete week.
    pub async fn week(&self, session: &Session, input: Option<&str>) -> Result<Week> {
        let config = self.settings(session).await?.week_config();
        match input {
            Some(s) => Week::parse(s, &config),
            None => Ok(config.current_week().previous()),
        }
    }

    async fn resolve_user(&self, identifier: &str) -> Result<String> {
        let id = self
            .db
            .reader()
            .call({
                let identifier = identifier.to_string();
                move |conn| repository::resolve_user_identifier(conn, &identifier)
            })
            .await?;
        id.ok_or_else(|| Error::NotFound(format!("user '{identifier}'")))
    }

    // ── Sync commands ──────────────────────────────────────────────

    pub async fn sync(
        &self,
        session: &Session,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncRun> {
        let settings = self.settings(session).await?;
        let client = self
            .client
            .as_deref()
            .ok_or_else(|| Error::Config("SLACK_USER_TOKEN is not set".into()))?;
        let options = SyncOptions {
            full: options.full,
            channels: options
                .channels
                .iter()
                .map(|c| url::resolve_channel_id(c))
                .collect::<Result<Vec<_>>>()?,
        };
        syncer::sync_all(&self.db, client, &settings, &options, progress).await
    }

    /// Forget a channel's cursors so the next sync re-reads it from the start.
    pub async fn reset_cursor(&self, session: &Session, identifier: &str) -> Result<bool> {
        self.sessions.ensure_active(session)?;
        let channel_id = url::resolve_channel_id(identifier)?;
        log::info!("Resetting sync cursor for {channel_id}");
        self.db
            .writer()
            .call(move |conn| repository::reset_channel_cursor(conn, &channel_id))
            .await
            .map_err(Error::from)
    }

    pub async fn status(&self, session: &Session) -> Result<WarehouseStatus> {
        self.sessions.ensure_active(session)?;
        self.db
            .reader()
            .call(|conn| {
                let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));
                Ok::<_, rusqlite::Error>(WarehouseStatus {
                    channels: count("SELECT COUNT(*) FROM channels")?,
                    tracked_channels: count(
                        "SELECT COUNT(*) FROM channels WHERE is_tracked = 1 AND is_archived = 0",
                    )?,
                    users: count("SELECT COUNT(*) FROM users")?,
                    messages: count("SELECT COUNT(*) FROM messages")?,
                    weekly_metrics: count("SELECT COUNT(*) FROM metrics_weekly")?,
                    narratives: count("SELECT COUNT(*) FROM gpt_analyses")?,
                    last_sync: conn.query_row(
                        "SELECT MAX(completed_at) FROM sync_jobs WHERE status IN ('completed', 'partial')",
                        [],
                        |row| row.get(0),
                    )?,
                })
            })
            .await
            .map_err(Error::from)
    }

    // ── Channel commands ───────────────────────────────────────────

    pub async fn channels(&self, session: &Session) -> Result<Vec<ChannelStatus>> {
        self.sessions.ensure_active(session)?;
        self.db
            .reader()
            .call(|conn| {
                let mut out = Vec::new();
                for channel in repository::list_channels(conn)? {
                    let messages = repository::count_messages(conn, &channel.channel_id)?;
                    let cursor = repository::get_channel_cursor(conn, &channel.channel_id)?;
                    out.push(ChannelStatus {
                        channel,
                        messages,
                        cursor,
                    });
                }
                Ok::<_, rusqlite::Error>(out)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn set_channel_tracked(
        &self,
        session: &Session,
        identifier: &str,
        tracked: bool,
    ) -> Result<String> {
        self.sessions.ensure_active(session)?;
        let channel_id = url::resolve_channel_id(identifier)?;
        let found = self
            .db
            .writer()
            .call({
                let channel_id = channel_id.clone();
                move |conn| repository::set_channel_tracked(conn, &channel_id, tracked)
            })
            .await?;
        if !found {
            return Err(Error::NotFound(format!(
                "channel {channel_id}; run a sync to discover channels"
            )));
        }
        Ok(channel_id)
    }

    // ── Metrics & narratives ───────────────────────────────────────

    /// Compute and store metrics for one user, or every active user.
    pub async fn compute_metrics(
        &self,
        session: &Session,
        week: &Week,
        user: Option<&str>,
    ) -> Result<Vec<WeeklyMetric>> {
        let settings = self.settings(session).await?;
        match user {
            Some(identifier) => {
                let user_id = self.resolve_user(identifier).await?;
                let metric = metrics::compute_weekly_metric(&self.db, &settings, &user_id, week).await?;
                Ok(vec![metric])
            }
            None => metrics::compute_week_for_all_users(&self.db, &settings, week).await,
        }
    }

    /// Narrative for one user's week. The metric is recomputed first so it
    /// reflects messages synced since it was last stored.
    pub async fn summarize(
        &self,
        session: &Session,
        generator: &dyn TextGenerator,
        user: &str,
        week: &Week,
        options: &NarrativeOptions,
    ) -> Result<NarrativeEntry> {
        let settings = self.settings(session).await?;
        let user_id = self.resolve_user(user).await?;
        let metric = metrics::compute_weekly_metric(&self.db, &settings, &user_id, week).await?;
        llm::narrative::generate_narrative(&self.db, generator, &settings, &metric, week, options)
            .await
    }

    /// Recompute every active user's metric for `week`, then generate missing
    /// narratives. A failed narrative is recorded and the run moves on.
    ///
    /// Narratives are skipped for a week that hasn't ended unless
    /// `allow_partial_week` is set, or when `generator` is `None`.
    pub async fn run_weekly(
        &self,
        session: &Session,
        generator: Option<&dyn TextGenerator>,
        week: &Week,
        options: &NarrativeOptions,
    ) -> Result<WeeklyRun> {
        let settings = self.settings(session).await?;
        let metrics = metrics::compute_week_for_all_users(&self.db, &settings, week).await?;
        let mut run = WeeklyRun {
            week: *week,
            metrics_computed: metrics.len(),
            narratives_generated: 0,
            partial_week_skipped: false,
            errors: Vec::new(),
        };

        let Some(generator) = generator else {
            return Ok(run);
        };
        if !settings.allow_partial_week && !settings.week_config().is_complete(week) {
            log::warn!("{week} has not ended; skipping narratives");
            run.partial_week_skipped = true;
            return Ok(run);
        }

        for metric in metrics.iter().filter(|m| m.message_count > 0) {
            match llm::narrative::generate_narrative(
                &self.db, generator, &settings, metric, week, options,
            )
            .await
            {
                Ok(_) => run.narratives_generated += 1,
                Err(e) => {
                    log::error!("Narrative failed for {}: {e}", metric.user_id);
                    run.errors.push(format!("{}: {e}", metric.user_id));
                }
            }
        }
        log::info!(
            "{week}: {} metrics, {} narratives, {} errors",
            run.metrics_computed,
            run.narratives_generated,
            run.errors.len()
        );
        Ok(run)
    }

    /// The generator configured by `llm_provider` / `llm_model`.
    pub async fn generator(&self, session: &Session) -> Result<Box<dyn TextGenerator>> {
        let settings = self.settings(session).await?;
        llm::create_generator(&settings).await
    }

    // ── Reports ────────────────────────────────────────────────────

    pub async fn report(&self, session: &Session, user: &str, week: &Week) -> Result<WeeklyReport> {
        self.sessions.ensure_active(session)?;
        let user_id = self.resolve_user(user).await?;
        WeeklyReport::load(&self.db, &user_id, week).await
    }

    pub async fn reports(&self, session: &Session, query: ReportQuery) -> Result<Vec<WeeklyReport>> {
        self.sessions.ensure_active(session)?;
        query.reports(&self.db).await
    }

    pub async fn reports_csv(&self, session: &Session, query: ReportQuery) -> Result<String> {
        self.sessions.ensure_active(session)?;
        query.to_csv(&self.db).await
    }

    pub async fn reports_json(&self, session: &Session, query: ReportQuery) -> Result<String> {
        self.sessions.ensure_active(session)?;
        query.to_json(&self.db).await
    }

    // ── Signal rules ───────────────────────────────────────────────

    pub async fn rules(&self, session: &Session) -> Result<SignalRules> {
        Ok(self.settings(session).await?.signal_rules)
    }

    /// Replace the signal rules. The rules must compile.
    pub async fn set_rules(&self, session: &Session, rules: &SignalRules) -> Result<()> {
        self.sessions.ensure_active(session)?;
        rules.compile()?;
        let json = rules.to_json()?;
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, signals::CONFIG_KEY, &json))
            .await?;
        Ok(())
    }

    /// Go back to the built-in rules.
    pub async fn reset_rules(&self, session: &Session) -> Result<bool> {
        self.sessions.ensure_active(session)?;
        self.db
            .writer()
            .call(|conn| repository::delete_config(conn, signals::CONFIG_KEY))
            .await
            .map_err(Error::from)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, session: &Session, key: &str) -> Result<Option<String>> {
        self.sessions.ensure_active(session)?;
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(Error::from)
    }

    /// Set a runtime setting. Unknown keys and values `Settings` would not
    /// accept are rejected.
    pub async fn config_set(&self, session: &Session, key: &str, value: &str) -> Result<()> {
        self.sessions.ensure_active(session)?;
        Settings::validate(key, value)?;
        if key == signals::CONFIG_KEY {
            return self.set_rules(session, &SignalRules::parse(value)?).await;
        }
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await?;
        Ok(())
    }

    /// Every stored setting except the login credentials.
    pub async fn config_list(&self, session: &Session) -> Result<Vec<(String, String)>> {
        self.sessions.ensure_active(session)?;
        let pairs = self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Ok(pairs
            .into_iter()
            .filter(|(k, _)| {
                ![auth::USERNAME_KEY, auth::PASSWORD_KEY, auth::SALT_KEY].contains(&k.as_str())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::mock::{self, MockSlack};
    use crate::slack::ChannelType;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    struct CountingGenerator {
        calls: Mutex<usize>,
    }

    #[async_trait(?Send)]
    impl TextGenerator for CountingGenerator {
        fn model(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok("A focused week.".into())
        }
    }

    /// Two messages from Alice yesterday in #general.
    async fn setup() -> (SlackDW, Session) {
        let db = Database::open_memory().await.unwrap();
        let slack = MockSlack::new();
        slack.add_channel(mock::channel("C1", Some("general"), ChannelType::PublicChannel));
        slack.add_user(mock::user("U1", "Alice"));
        let base = (Utc::now() - Duration::days(1))
            .date_naive()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        slack.post("C1", mock::message(&format!("{base}.000100"), "U1", "done with the report"));
        slack.post("C1", mock::message(&format!("{}.000100", base + 60), "U1", "blocked on review"));

        let dw = SlackDW::new(db).with_client(Box::new(slack));
        dw.initialize_credentials("admin", "secret").await.unwrap();
        let session = dw.login("admin", "secret").await.unwrap();
        (dw, session)
    }

    #[tokio::test]
    async fn test_credentials_initialize_once() {
        let (dw, session) = setup().await;
        assert!(matches!(
            dw.initialize_credentials("mallory", "x").await,
            Err(Error::Auth(_))
        ));
        dw.change_credentials(&session, "admin", "new-secret").await.unwrap();
        assert!(dw.login("admin", "secret").await.is_err());
        assert!(dw.login("admin", "new-secret").await.is_ok());
    }

    #[tokio::test]
    async fn test_logged_out_session_is_rejected() {
        let (dw, session) = setup().await;
        dw.channels(&session).await.unwrap();
        assert!(dw.logout(&session));
        assert!(matches!(dw.channels(&session).await, Err(Error::Auth(_))));
        assert!(matches!(
            dw.sync(&session, &SyncOptions::default(), &NoopProgress).await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_metrics_and_report() {
        let (dw, session) = setup().await;
        let run = dw
            .sync(&session, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(run.failed_count(), 0);
        assert_eq!(run.reports[0].inserted, 2);

        let channels = dw.channels(&session).await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].messages, 2);
        assert!(channels[0].cursor.is_some());

        let status = dw.status(&session).await.unwrap();
        assert_eq!(status.messages, 2);
        assert_eq!(status.users, 1);
        assert_eq!(status.tracked_channels, 1);
        assert!(status.last_sync.is_some());

        let yesterday = (Utc::now() - Duration::days(1)).date_naive();
        let week = Week::containing(yesterday, WeekStart::Monday);
        let metrics = dw.compute_metrics(&session, &week, Some("@Alice")).await.unwrap();
        assert_eq!(metrics[0].message_count, 2);
        assert_eq!(metrics[0].done_signals, 1);
        assert_eq!(metrics[0].blocker_signals, 1);

        let report = dw.report(&session, "U1", &week).await.unwrap();
        assert_eq!(report.metric, metrics[0]);
        assert!(report.narrative.is_none());

        let listed = dw.reports(&session, ReportQuery::new().user("U1")).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_run_weekly_skips_partial_week() {
        let (dw, session) = setup().await;
        dw.sync(&session, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();
        let generator = CountingGenerator {
            calls: Mutex::new(0),
        };
        let options = NarrativeOptions::default();

        let current = dw.week(&session, Some("current")).await.unwrap();
        let run = dw
            .run_weekly(&session, Some(&generator), &current, &options)
            .await
            .unwrap();
        assert!(run.partial_week_skipped);
        assert_eq!(run.narratives_generated, 0);
        assert_eq!(*generator.calls.lock().unwrap(), 0);

        dw.config_set(&session, "allow_partial_week", "true").await.unwrap();
        let run = dw
            .run_weekly(&session, Some(&generator), &current, &options)
            .await
            .unwrap();
        assert!(!run.partial_week_skipped);
        // Whether yesterday falls in the current week depends on today's weekday.
        assert_eq!(run.narratives_generated, run.metrics_computed);
        assert_eq!(*generator.calls.lock().unwrap(), run.narratives_generated);

        // Cached narratives are not regenerated.
        dw.run_weekly(&session, Some(&generator), &current, &options)
            .await
            .unwrap();
        assert_eq!(*generator.calls.lock().unwrap(), run.narratives_generated);
    }

    #[tokio::test]
    async fn test_summarize_computes_missing_metric() {
        let (dw, session) = setup().await;
        dw.sync(&session, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();
        let generator = CountingGenerator {
            calls: Mutex::new(0),
        };
        let week = dw.week(&session, Some("last")).await.unwrap();
        let entry = dw
            .summarize(&session, &generator, "U1", &week, &NarrativeOptions::default())
            .await
            .unwrap();
        assert_eq!(entry.analysis_text, "A focused week.");
        assert_eq!(entry.week_start, week.to_key());

        let report = dw.report(&session, "U1", &week).await.unwrap();
        assert_eq!(report.narrative, Some(entry));
    }

    #[tokio::test]
    async fn test_summarize_uses_fresh_metric() {
        let (dw, session) = setup().await;
        dw.sync(&session, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();
        let yesterday = (Utc::now() - Duration::days(1)).date_naive();
        let week = Week::containing(yesterday, WeekStart::Monday);
        let metrics = dw.compute_metrics(&session, &week, Some("U1")).await.unwrap();
        assert_eq!(metrics[0].message_count, 2);

        // A message that arrives after the metric was stored.
        let ts_micros = yesterday
            .and_hms_opt(11, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        let record = repository::MessageRecord {
            channel_id: "C1".into(),
            ts: slack::micros_to_ts(ts_micros),
            ts_micros,
            thread_ts: None,
            reply_count: 0,
            user_id: "U1".into(),
            text: "shipped it".into(),
            edited_ts: None,
            content_hash: sync::syncer::content_hash("shipped it"),
            channel_type: "public_channel".into(),
            raw_json: "{}".into(),
        };
        dw.db
            .writer()
            .call(move |conn| repository::upsert_message(conn, &record).map(|_| ()))
            .await
            .unwrap();

        let generator = CountingGenerator {
            calls: Mutex::new(0),
        };
        dw.summarize(&session, &generator, "U1", &week, &NarrativeOptions::default())
            .await
            .unwrap();
        let report = dw.report(&session, "U1", &week).await.unwrap();
        assert_eq!(report.metric.message_count, 3);
    }

    #[tokio::test]
    async fn test_channel_tracking_and_cursor_reset() {
        let (dw, session) = setup().await;
        assert!(matches!(
            dw.set_channel_tracked(&session, "C1", false).await,
            Err(Error::NotFound(_))
        ));
        dw.sync(&session, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();

        dw.set_channel_tracked(&session, "https://acme.slack.com/archives/C1", false)
            .await
            .unwrap();
        let run = dw
            .sync(&session, &SyncOptions::default(), &NoopProgress)
            .await
            .unwrap();
        assert!(run.reports.is_empty());

        assert!(dw.reset_cursor(&session, "C1").await.unwrap());
        assert!(!dw.reset_cursor(&session, "C1").await.unwrap());
    }

    #[tokio::test]
    async fn test_config_and_rules() {
        let (dw, session) = setup().await;
        assert!(matches!(
            dw.config_set(&session, "no_such_key", "1").await,
            Err(Error::Config(_))
        ));
        dw.config_set(&session, "utc_offset_hours", "9").await.unwrap();
        assert_eq!(dw.settings(&session).await.unwrap().utc_offset_hours, 9);

        let keys: Vec<String> = dw
            .config_list(&session)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert!(keys.contains(&"utc_offset_hours".to_string()));
        assert!(!keys.contains(&auth::PASSWORD_KEY.to_string()));
        assert!(!keys.contains(&auth::SALT_KEY.to_string()));

        for (key, value) in [
            ("session_ttl_minutes", "9223372036854775807"),
            ("utc_offset_hours", "1000000"),
            ("thread_lookback_days", "200000000"),
            ("allow_partial_week", "maybe"),
        ] {
            assert!(matches!(
                dw.config_set(&session, key, value).await,
                Err(Error::Config(_))
            ));
        }
        // Nothing was stored, so logging in still works.
        dw.login("admin", "secret").await.unwrap();
        assert_eq!(dw.settings(&session).await.unwrap().utc_offset_hours, 9);

        let mut rules = dw.rules(&session).await.unwrap();
        rules
            .signals
            .insert("praise".into(), vec!["thanks".into()]);
        dw.set_rules(&session, &rules).await.unwrap();
        assert_eq!(dw.rules(&session).await.unwrap(), rules);

        assert!(dw.reset_rules(&session).await.unwrap());
        assert_eq!(dw.rules(&session).await.unwrap(), SignalRules::default());
    }
}
