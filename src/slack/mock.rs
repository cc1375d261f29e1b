use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ts_to_micros, ChannelType, Page, SlackApi, SlackChannel, SlackMessage, SlackUser};
use crate::error::{Error, Result};

/// In-memory Slack workspace for tests. Pages are `page_size` items long and
/// cursors are plain offsets.
pub struct MockSlack {
    page_size: usize,
    channels: Mutex<Vec<SlackChannel>>,
    /// channel_id → top-level messages
    history: Mutex<HashMap<String, Vec<SlackMessage>>>,
    /// (channel_id, thread_ts) → replies, parent excluded
    replies: Mutex<HashMap<(String, String), Vec<SlackMessage>>>,
    users: Mutex<Vec<SlackUser>>,
    failing_channels: Mutex<HashSet<String>>,
    /// channel_id → history pages still served before calls start failing
    pages_before_failure: Mutex<HashMap<String, usize>>,
    missing_scope: Mutex<HashSet<ChannelType>>,
    /// Every call made, as "method:target".
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockSlack {
    fn default() -> Self {
        Self {
            page_size: 2,
            channels: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
            users: Mutex::new(Vec::new()),
            failing_channels: Mutex::new(HashSet::new()),
            pages_before_failure: Mutex::new(HashMap::new()),
            missing_scope: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

pub fn message(ts: &str, user: &str, text: &str) -> SlackMessage {
    SlackMessage::from_value(serde_json::json!({
        "type": "message",
        "ts": ts,
        "user": user,
        "text": text,
    }))
    .unwrap()
}

pub fn reply(ts: &str, thread_ts: &str, user: &str, text: &str) -> SlackMessage {
    SlackMessage::from_value(serde_json::json!({
        "type": "message",
        "ts": ts,
        "thread_ts": thread_ts,
        "user": user,
        "text": text,
    }))
    .unwrap()
}

pub fn channel(id: &str, name: Option<&str>, channel_type: ChannelType) -> SlackChannel {
    SlackChannel {
        id: id.to_string(),
        name: name.map(str::to_string),
        is_private: channel_type.is_private(),
        is_archived: false,
        is_im: channel_type == ChannelType::Im,
        is_mpim: channel_type == ChannelType::Mpim,
        user: None,
    }
}

pub fn user(id: &str, display_name: &str) -> SlackUser {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": id.to_lowercase(),
        "profile": {"display_name": display_name}
    }))
    .unwrap()
}

impl MockSlack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: SlackChannel) {
        self.channels.lock().unwrap().push(channel);
    }

    pub fn add_user(&self, user: SlackUser) {
        self.users.lock().unwrap().push(user);
    }

    pub fn post(&self, channel_id: &str, msg: SlackMessage) {
        self.history
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push(msg);
    }

    pub fn post_reply(&self, channel_id: &str, msg: SlackMessage) {
        let thread_ts = msg.thread_ts.clone().unwrap_or_default();
        self.replies
            .lock()
            .unwrap()
            .entry((channel_id.to_string(), thread_ts.clone()))
            .or_default()
            .push(msg);
        // Keep the parent's reply_count in step, as Slack does.
        if let Some(parent) = self
            .history
            .lock()
            .unwrap()
            .get_mut(channel_id)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.ts.as_deref() == Some(&thread_ts)))
        {
            parent.reply_count += 1;
            parent.thread_ts = Some(thread_ts.clone());
        }
    }

    /// Replace the text of a stored message, marking it edited.
    pub fn edit(&self, channel_id: &str, ts: &str, text: &str, edited_ts: &str) {
        let mut history = self.history.lock().unwrap();
        if let Some(m) = history
            .get_mut(channel_id)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.ts.as_deref() == Some(ts)))
        {
            m.text = text.to_string();
            m.edited = Some(super::Edited {
                ts: Some(edited_ts.to_string()),
                user: m.user.clone(),
            });
            m.raw["text"] = serde_json::json!(text);
            m.raw["edited"] = serde_json::json!({"ts": edited_ts});
        }
    }

    pub fn fail_channel(&self, channel_id: &str) {
        self.failing_channels
            .lock()
            .unwrap()
            .insert(channel_id.to_string());
    }

    /// Serve `pages` history pages for the channel, then fail every call.
    pub fn fail_channel_after(&self, channel_id: &str, pages: usize) {
        self.pages_before_failure
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), pages);
    }

    /// Undo `fail_channel` and `fail_channel_after`.
    pub fn heal_channel(&self, channel_id: &str) {
        self.failing_channels.lock().unwrap().remove(channel_id);
        self.pages_before_failure.lock().unwrap().remove(channel_id);
    }

    pub fn deny_scope(&self, channel_type: ChannelType) {
        self.missing_scope.lock().unwrap().insert(channel_type);
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn paginate<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> Page<T> {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let next_cursor = if end < items.len() {
            Some(end.to_string())
        } else {
            None
        };
        Page {
            items: items.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
            next_cursor,
        }
    }

    fn check_channel(&self, method: &str, channel_id: &str) -> Result<()> {
        if self.failing_channels.lock().unwrap().contains(channel_id) {
            return Err(Error::Api {
                method: method.to_string(),
                message: "channel_not_found".into(),
            });
        }
        Ok(())
    }
}

fn newer_than(msgs: &[SlackMessage], oldest: &str) -> Vec<SlackMessage> {
    let oldest = ts_to_micros(oldest).unwrap_or(0);
    msgs.iter()
        .filter(|m| {
            m.ts
                .as_deref()
                .and_then(ts_to_micros)
                .map(|t| t > oldest)
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

#[async_trait]
impl SlackApi for MockSlack {
    async fn conversations_list(
        &self,
        channel_type: ChannelType,
        cursor: Option<&str>,
    ) -> Result<Page<SlackChannel>> {
        self.record(format!("conversations.list:{}", channel_type.as_str()));
        if self.missing_scope.lock().unwrap().contains(&channel_type) {
            return Err(Error::Api {
                method: "conversations.list".into(),
                message: "missing_scope".into(),
            });
        }
        let matching: Vec<SlackChannel> = self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.channel_type() == channel_type && !c.is_archived)
            .cloned()
            .collect();
        Ok(self.paginate(&matching, cursor))
    }

    async fn conversations_history(
        &self,
        channel_id: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SlackMessage>> {
        self.record(format!("conversations.history:{channel_id}"));
        self.check_channel("conversations.history", channel_id)?;
        if let Some(left) = self.pages_before_failure.lock().unwrap().get_mut(channel_id) {
            if *left == 0 {
                return Err(Error::Api {
                    method: "conversations.history".into(),
                    message: "internal_error".into(),
                });
            }
            *left -= 1;
        }
        let mut msgs = newer_than(
            self.history
                .lock()
                .unwrap()
                .get(channel_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            oldest,
        );
        // Slack returns history newest first.
        msgs.reverse();
        Ok(self.paginate(&msgs, cursor))
    }

    async fn conversations_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SlackMessage>> {
        self.record(format!("conversations.replies:{channel_id}/{thread_ts}"));
        self.check_channel("conversations.replies", channel_id)?;
        let parent = self
            .history
            .lock()
            .unwrap()
            .get(channel_id)
            .and_then(|msgs| msgs.iter().find(|m| m.ts.as_deref() == Some(thread_ts)).cloned());
        let mut msgs: Vec<SlackMessage> = parent.into_iter().collect();
        msgs.extend(newer_than(
            self.replies
                .lock()
                .unwrap()
                .get(&(channel_id.to_string(), thread_ts.to_string()))
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            oldest,
        ));
        Ok(self.paginate(&msgs, cursor))
    }

    async fn users_list(&self, cursor: Option<&str>) -> Result<Page<SlackUser>> {
        self.record("users.list".to_string());
        let users = self.users.lock().unwrap().clone();
        Ok(self.paginate(&users, cursor))
    }
}
