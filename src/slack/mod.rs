pub mod client;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use client::SlackClient;

/// The four conversation kinds Slack distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    PublicChannel,
    PrivateChannel,
    Mpim,
    Im,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::PublicChannel,
        ChannelType::PrivateChannel,
        ChannelType::Mpim,
        ChannelType::Im,
    ];

    /// The value Slack uses in `types=` and that we store in `channel_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::PublicChannel => "public_channel",
            ChannelType::PrivateChannel => "private_channel",
            ChannelType::Mpim => "mpim",
            ChannelType::Im => "im",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public_channel" => Some(ChannelType::PublicChannel),
            "private_channel" => Some(ChannelType::PrivateChannel),
            "mpim" => Some(ChannelType::Mpim),
            "im" => Some(ChannelType::Im),
            _ => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, ChannelType::Mpim | ChannelType::Im)
    }

    pub fn is_private(&self) -> bool {
        !matches!(self, ChannelType::PublicChannel)
    }
}

/// One page of a cursor-paginated Slack listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// A conversation as returned by `conversations.list`.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    /// Counterpart user for an `im`.
    #[serde(default)]
    pub user: Option<String>,
}

impl SlackChannel {
    pub fn channel_type(&self) -> ChannelType {
        if self.is_im {
            ChannelType::Im
        } else if self.is_mpim {
            ChannelType::Mpim
        } else if self.is_private {
            ChannelType::PrivateChannel
        } else {
            ChannelType::PublicChannel
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Edited {
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A message from `conversations.history` or `conversations.replies`.
///
/// The typed fields are what the warehouse reads; `raw` keeps the full
/// payload so fields we don't model today are not lost.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessage {
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reply_count: u32,
    #[serde(default)]
    pub edited: Option<Edited>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl SlackMessage {
    pub fn from_value(raw: Value) -> std::result::Result<Self, serde_json::Error> {
        let mut msg: SlackMessage = serde_json::from_value(raw.clone())?;
        msg.raw = raw;
        Ok(msg)
    }

    /// Decode one message of a listing without failing the page.
    ///
    /// A payload that doesn't fit the typed fields keeps only a string `ts`
    /// and carries no author, so the fetcher skips it.
    pub fn from_value_lossy(raw: Value) -> Self {
        match Self::from_value(raw.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Undecodable message {:?}: {e}", raw.get("ts"));
                SlackMessage {
                    ts: raw.get("ts").and_then(Value::as_str).map(str::to_string),
                    raw,
                    ..Default::default()
                }
            }
        }
    }

    /// A thread parent as seen in channel history.
    pub fn is_thread_parent(&self) -> bool {
        self.reply_count > 0
            && match (&self.thread_ts, &self.ts) {
                (Some(thread_ts), Some(ts)) => thread_ts == ts,
                (None, _) => true,
                _ => false,
            }
    }

    pub fn edited_ts(&self) -> Option<&str> {
        self.edited.as_ref().and_then(|e| e.ts.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
}

/// A workspace member from `users.list`.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: SlackProfile,
}

impl SlackUser {
    /// Profile display name, then real name, then handle.
    pub fn display_name(&self) -> String {
        let non_empty = |s: &Option<String>| s.as_deref().filter(|v| !v.trim().is_empty()).map(str::to_string);
        non_empty(&self.profile.display_name)
            .or_else(|| non_empty(&self.profile.real_name))
            .or_else(|| non_empty(&self.real_name))
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Read-only view of the Slack Web API used by the fetcher.
///
/// `oldest` is exclusive: only messages with `ts > oldest` are returned.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn conversations_list(
        &self,
        channel_type: ChannelType,
        cursor: Option<&str>,
    ) -> Result<Page<SlackChannel>>;

    async fn conversations_history(
        &self,
        channel_id: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SlackMessage>>;

    /// Replies in a thread. Slack echoes the parent as the first item.
    async fn conversations_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SlackMessage>>;

    async fn users_list(&self, cursor: Option<&str>) -> Result<Page<SlackUser>>;
}

// ── Timestamps ─────────────────────────────────────────────────────

/// Parse a Slack `ts` ("1700000000.000200") into microseconds since epoch.
///
/// Returns `None` for anything that isn't `<digits>[.<digits>]`.
pub fn ts_to_micros(ts: &str) -> Option<i64> {
    let ts = ts.trim();
    let (secs, frac) = match ts.split_once('.') {
        Some((s, f)) => (s, f),
        None => (ts, ""),
    };
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: i64 = secs.parse().ok()?;
    // Right-pad or truncate the fraction to six digits.
    let mut micros_str: String = frac.chars().take(6).collect();
    while micros_str.len() < 6 {
        micros_str.push('0');
    }
    let micros: i64 = micros_str.parse().ok()?;
    secs.checked_mul(1_000_000)?.checked_add(micros)
}

pub fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

/// Format microseconds as a Slack `ts` string.
pub fn micros_to_ts(micros: i64) -> String {
    format!("{}.{:06}", micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000))
}
