use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slackdw", about = "Slack data warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.slackdw/slackdw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Login name
    #[arg(long, env = "SLACKDW_USERNAME", global = true)]
    username: Option<String>,

    /// Login password
    #[arg(long, env = "SLACKDW_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl slackdw::SyncProgress for StderrProgress {
    fn on_channel_start(&self, channel_id: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] Syncing {}...", index + 1, total, channel_id);
    }

    fn on_page(&self, _channel_id: &str, fetched: usize) {
        eprint!("\r  Fetched {} messages   ", fetched);
    }

    fn on_channel_complete(&self, report: &slackdw::SyncReport) {
        eprintln!(
            "\r  Done: {} new, {} edited, {} threads",
            report.inserted, report.updated, report.threads_synced
        );
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new messages from tracked channels
    Sync {
        /// Re-read every channel from the beginning (cursors are kept)
        #[arg(long)]
        full: bool,
        /// Only sync this channel (ID or Slack URL); repeatable
        #[arg(long = "channel", value_name = "CHANNEL")]
        channels: Vec<String>,
    },
    /// List and track channels
    Channels {
        #[command(subcommand)]
        action: ChannelAction,
    },
    /// Manage sync cursors
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },
    /// Compute weekly metrics
    Metrics {
        /// Week: current, last, 2025-W05 or a date in the week (default: last)
        #[arg(long)]
        week: Option<String>,
        /// User ID, @handle or display name (default: every active user)
        #[arg(long)]
        user: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate the weekly narrative for one user
    Summarize {
        /// User ID, @handle or display name
        #[arg(long)]
        user: String,
        #[arg(long)]
        week: Option<String>,
        /// Regenerate even if a narrative is cached
        #[arg(long)]
        force: bool,
        /// Include message excerpts in the prompt
        #[arg(long)]
        excerpts: bool,
    },
    /// Compute metrics and narratives for every active user
    Run {
        #[arg(long)]
        week: Option<String>,
        /// Only compute metrics
        #[arg(long)]
        no_narratives: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        excerpts: bool,
    },
    /// Show one user's weekly report
    Report {
        #[arg(long)]
        user: String,
        #[arg(long)]
        week: Option<String>,
        /// Output format: text, json, kv
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List stored weekly reports with filters
    Reports {
        #[arg(long)]
        user: Option<String>,
        /// Earliest week (default: no limit)
        #[arg(long)]
        from: Option<String>,
        /// Latest week (default: no limit)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        min_messages: Option<u32>,
        /// Only weeks with a narrative
        #[arg(long)]
        with_narrative: bool,
        /// Only weeks without a narrative
        #[arg(long)]
        without_narrative: bool,
        /// Sort by: week, user, messages, active_days, coverage
        #[arg(long, default_value = "week")]
        order_by: String,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value = "100")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },
    /// Manage signal rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Manage login credentials
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show warehouse status
    Status,
}

#[derive(Subcommand)]
enum ChannelAction {
    /// List known channels
    List {
        /// Only tracked channels
        #[arg(long)]
        tracked: bool,
    },
    /// Start syncing a channel
    Track { channel: String },
    /// Stop syncing a channel
    Untrack { channel: String },
}

#[derive(Subcommand)]
enum CursorAction {
    /// Forget a channel's cursors so the next sync starts over
    Reset { channel: String },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Print the rules as JSON
    Show,
    /// Replace the rules from a JSON file
    Set { file: String },
    /// Restore the built-in rules
    Reset,
}

#[derive(Subcommand)]
enum AuthAction {
    /// Set the login credentials (the first time, or from a session)
    Set {
        new_username: String,
        new_password: String,
    },
    /// Check that the current credentials log in
    Check,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => slackdw::Database::open_at(path).await?,
        None => slackdw::Database::open().await?,
    };

    let dw = match slackdw::SlackClient::from_env() {
        Ok(client) => slackdw::SlackDW::new(db).with_client(Box::new(client)),
        Err(e) => {
            log::debug!("No Slack client: {e}");
            slackdw::SlackDW::new(db)
        }
    };

    if let Commands::Auth {
        action: AuthAction::Set {
            new_username,
            new_password,
        },
    } = &cli.command
    {
        return set_credentials(&dw, &cli, new_username, new_password).await;
    }

    let session = login(&dw, &cli).await?;
    let result = run_command(&dw, &session, cli.command).await;
    dw.logout(&session);
    result
}

async fn login(dw: &slackdw::SlackDW, cli: &Cli) -> anyhow::Result<slackdw::Session> {
    let (Some(username), Some(password)) = (cli.username.as_deref(), cli.password.as_deref())
    else {
        anyhow::bail!("Login required: pass --username/--password or set SLACKDW_USERNAME and SLACKDW_PASSWORD");
    };
    Ok(dw.login(username, password).await?)
}

async fn set_credentials(
    dw: &slackdw::SlackDW,
    cli: &Cli,
    new_username: &str,
    new_password: &str,
) -> anyhow::Result<()> {
    match dw.initialize_credentials(new_username, new_password).await {
        Ok(()) => println!("Credentials stored."),
        Err(slackdw::Error::Auth(_)) if cli.username.is_some() => {
            let session = login(dw, cli).await?;
            dw.change_credentials(&session, new_username, new_password)
                .await?;
            dw.logout(&session);
            println!("Credentials updated.");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn run_command(
    dw: &slackdw::SlackDW,
    session: &slackdw::Session,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Status => print_status(dw, session).await?,
        Commands::Config { action } => handle_config(dw, session, action).await?,
        Commands::Sync { full, channels } => {
            let options = slackdw::SyncOptions { full, channels };
            let run = dw.sync(session, &options, &StderrProgress).await?;
            for report in &run.reports {
                print_sync_report(report);
            }
            if run.reports.is_empty() {
                println!("No tracked channels to sync. Use 'channels track' first.");
            }
            for error in &run.errors {
                eprintln!("error: {error}");
            }
            if run.failed_count() > 0 {
                anyhow::bail!("{} channel(s) failed", run.failed_count());
            }
        }
        Commands::Channels { action } => handle_channels(dw, session, action).await?,
        Commands::Cursor {
            action: CursorAction::Reset { channel },
        } => {
            if dw.reset_cursor(session, &channel).await? {
                println!("Cursor reset: {channel}");
            } else {
                println!("No cursor stored for {channel}");
            }
        }
        Commands::Metrics { week, user, json } => {
            let week = dw.week(session, week.as_deref()).await?;
            let metrics = dw.compute_metrics(session, &week, user.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else if metrics.is_empty() {
                println!("No activity in {week}.");
            } else {
                println!("{} ({})", week, week.range_label());
                for m in &metrics {
                    println!(
                        "  {:<12} {:>4} msgs  {} days  done {}  blockers {}  mentions {}  coverage {:.0}%",
                        m.user_id,
                        m.message_count,
                        m.active_days,
                        m.done_signals,
                        m.blocker_signals,
                        m.mention_count,
                        m.channel_coverage_ratio * 100.0
                    );
                }
            }
        }
        Commands::Summarize {
            user,
            week,
            force,
            excerpts,
        } => {
            let week = dw.week(session, week.as_deref()).await?;
            let generator = dw.generator(session).await?;
            let options = slackdw::NarrativeOptions {
                force,
                include_excerpts: excerpts,
            };
            let entry = dw
                .summarize(session, generator.as_ref(), &user, &week, &options)
                .await?;
            println!("{} · {}\n", entry.user_id, entry.week_range);
            println!("{}", entry.analysis_text);
        }
        Commands::Run {
            week,
            no_narratives,
            force,
            excerpts,
        } => {
            let week = dw.week(session, week.as_deref()).await?;
            let generator = if no_narratives {
                None
            } else {
                Some(dw.generator(session).await?)
            };
            let options = slackdw::NarrativeOptions {
                force,
                include_excerpts: excerpts,
            };
            let run = dw
                .run_weekly(session, generator.as_deref(), &week, &options)
                .await?;
            println!("{}: {} metrics computed", run.week, run.metrics_computed);
            if run.partial_week_skipped {
                println!("Narratives skipped: the week has not ended (set allow_partial_week to override).");
            } else if generator.is_some() {
                println!("{} narratives generated", run.narratives_generated);
            }
            for error in &run.errors {
                eprintln!("error: {error}");
            }
        }
        Commands::Report { user, week, format } => {
            let week = dw.week(session, week.as_deref()).await?;
            let report = dw.report(session, &user, &week).await?;
            match format.as_str() {
                "text" => print!("{}", report.to_plain_text()),
                "json" => println!("{}", report.to_json()?),
                "kv" => {
                    for (k, v) in report.to_key_values() {
                        println!("{k}={v}");
                    }
                }
                other => anyhow::bail!("Unknown format: {other}. Use: text, json, kv"),
            }
        }
        Commands::Reports {
            user,
            from,
            to,
            min_messages,
            with_narrative,
            without_narrative,
            order_by,
            desc,
            limit,
            json,
            csv,
        } => {
            let mut query = slackdw::ReportQuery::new().limit(limit).order_by(&order_by);
            if desc {
                query = query.descending();
            }
            if let Some(u) = user {
                query = query.user(&u);
            }
            if let Some(w) = from {
                query = query.week_from(&dw.week(session, Some(w.as_str())).await?.to_key());
            }
            if let Some(w) = to {
                query = query.week_to(&dw.week(session, Some(w.as_str())).await?.to_key());
            }
            if let Some(n) = min_messages {
                query = query.min_messages(n);
            }
            if with_narrative {
                query = query.has_narrative(true);
            }
            if without_narrative {
                query = query.has_narrative(false);
            }

            if json {
                println!("{}", dw.reports_json(session, query).await?);
            } else if csv {
                print!("{}", dw.reports_csv(session, query).await?);
            } else {
                let rows = dw.reports(session, query).await?;
                if rows.is_empty() {
                    println!("No reports found.");
                } else {
                    for r in &rows {
                        let name = r.user_name.as_deref().unwrap_or(&r.user_id);
                        let narrative = if r.narrative.is_some() { "yes" } else { "no" };
                        println!(
                            "{} {:<20} {:>4} msgs  {} days  narrative: {narrative}",
                            r.week_start, name, r.metric.message_count, r.metric.active_days
                        );
                    }
                    println!("\n{} reports", rows.len());
                }
            }
        }
        Commands::Rules { action } => match action {
            RulesAction::Show => {
                let rules = dw.rules(session).await?;
                println!("{}", serde_json::to_string_pretty(&rules)?);
            }
            RulesAction::Set { file } => {
                let json = std::fs::read_to_string(&file)?;
                let rules = slackdw::SignalRules::parse(&json)?;
                dw.set_rules(session, &rules).await?;
                println!("Signal rules updated.");
            }
            RulesAction::Reset => {
                dw.reset_rules(session).await?;
                println!("Signal rules reset to defaults.");
            }
        },
        Commands::Auth { action } => match action {
            AuthAction::Check => {
                println!(
                    "Logged in as {} (session expires {})",
                    session.username(),
                    session.expires_at()
                );
            }
            // Handled before login.
            AuthAction::Set { .. } => {}
        },
    }
    Ok(())
}

fn print_sync_report(report: &slackdw::SyncReport) {
    let status = match report.status {
        slackdw::SyncStatus::Success => "ok",
        slackdw::SyncStatus::PartialFailure => "partial",
        slackdw::SyncStatus::Failed => "FAILED",
    };
    println!(
        "{} [{status}] {} new, {} edited, {} unchanged, {} skipped, {} threads (cursor {})",
        report.channel_id,
        report.inserted,
        report.updated,
        report.unchanged,
        report.skipped,
        report.threads_synced,
        report.cursor.as_deref().unwrap_or("none")
    );
    if let Some(ref error) = report.error {
        println!("  {error}");
    }
}

async fn print_status(dw: &slackdw::SlackDW, session: &slackdw::Session) -> anyhow::Result<()> {
    let status = dw.status(session).await?;
    println!("Warehouse Status");
    println!("  Channels:   {} ({} tracked)", status.channels, status.tracked_channels);
    println!("  Users:      {}", status.users);
    println!("  Messages:   {}", status.messages);
    println!("  Metrics:    {}", status.weekly_metrics);
    println!("  Narratives: {}", status.narratives);
    println!(
        "  Last sync:  {}",
        status.last_sync.unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_channels(
    dw: &slackdw::SlackDW,
    session: &slackdw::Session,
    action: ChannelAction,
) -> anyhow::Result<()> {
    match action {
        ChannelAction::List { tracked } => {
            let channels = dw.channels(session).await?;
            let channels: Vec<_> = channels
                .into_iter()
                .filter(|c| !tracked || c.channel.is_tracked)
                .collect();
            if channels.is_empty() {
                println!("No channels. Run 'sync' to discover them.");
            }
            for c in channels {
                let mark = if c.channel.is_tracked { "*" } else { " " };
                println!(
                    "{mark} {} {:<24} {:<16} {:>6} msgs  cursor {}",
                    c.channel.channel_id,
                    c.channel.name,
                    c.channel.channel_type,
                    c.messages,
                    c.cursor.as_deref().unwrap_or("none")
                );
            }
        }
        ChannelAction::Track { channel } => {
            let id = dw.set_channel_tracked(session, &channel, true).await?;
            println!("Tracking {id}");
        }
        ChannelAction::Untrack { channel } => {
            let id = dw.set_channel_tracked(session, &channel, false).await?;
            println!("Stopped tracking {id}");
        }
    }
    Ok(())
}

async fn handle_config(
    dw: &slackdw::SlackDW,
    session: &slackdw::Session,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match dw.config_get(session, &key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            dw.config_set(session, &key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = dw.config_list(session).await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
