pub mod api_helpers;
pub mod syncer;

use serde::Serialize;

/// Options controlling a sync operation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Read every channel from the beginning for this run. Stored cursors
    /// are not rewound.
    pub full: bool,
    /// Restrict the run to these channel ids. Empty means every tracked channel.
    pub channels: Vec<String>,
}

/// Report returned after one channel has been synced.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub channel_id: String,
    pub status: SyncStatus,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub threads_synced: u64,
    /// Channel cursor after the run.
    pub cursor: Option<String>,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            status: SyncStatus::Success,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            threads_synced: 0,
            cursor: None,
            error: None,
        }
    }

    pub fn failed(channel_id: &str, error: String) -> Self {
        Self {
            status: SyncStatus::Failed,
            error: Some(error),
            ..Self::new(channel_id)
        }
    }

    pub fn stored(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    /// The channel history synced but some threads failed.
    PartialFailure,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "completed",
            SyncStatus::PartialFailure => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Outcome of a whole sync run: one report per channel plus every error
/// collected along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncRun {
    pub reports: Vec<SyncReport>,
    pub errors: Vec<String>,
}

impl SyncRun {
    pub fn failed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == SyncStatus::Failed)
            .count()
    }
}

/// Progress callbacks for long-running syncs.
pub trait SyncProgress: Send + Sync {
    fn on_channel_start(&self, _channel_id: &str, _index: usize, _total: usize) {}
    fn on_page(&self, _channel_id: &str, _fetched: usize) {}
    fn on_channel_complete(&self, _report: &SyncReport) {}
}

/// Progress sink that ignores everything.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}
