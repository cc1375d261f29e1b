use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ChannelType, Page, SlackApi, SlackChannel, SlackMessage, SlackUser};
use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://slack.com/api";
const PAGE_LIMIT: &str = "200";

/// Slack Web API client authenticated with a user token.
///
/// Every call is attempted once. A 429 surfaces as `Error::RateLimited`.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Build a client from `SLACK_USER_TOKEN`. `SLACK_API_URL` overrides
    /// the API root (Enterprise Grid proxies, local fakes).
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("SLACK_USER_TOKEN")
            .map_err(|_| Error::Config("SLACK_USER_TOKEN is not set".into()))?;
        if token.trim().is_empty() {
            return Err(Error::Config("SLACK_USER_TOKEN is empty".into()));
        }
        let client = Self::new(token);
        match std::env::var("SLACK_API_URL") {
            Ok(url) if !url.trim().is_empty() => Ok(client.with_base_url(url)),
            _ => Ok(client),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        log::debug!("GET {method} {query:?}");
        let resp = self
            .http
            .get(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(Error::RateLimited { retry_after });
        }

        let body: Value = resp.error_for_status()?.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(Error::Api {
                method: method.to_string(),
                message,
            });
        }
        Ok(body)
    }
}

fn next_cursor(body: &Value) -> Option<String> {
    body.pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn take_array<T: DeserializeOwned>(body: &mut Value, field: &str) -> Result<Vec<T>> {
    match body.get_mut(field).map(Value::take) {
        Some(v @ Value::Array(_)) => Ok(serde_json::from_value(v)?),
        _ => Ok(Vec::new()),
    }
}

fn take_messages(body: &mut Value) -> Result<Vec<SlackMessage>> {
    let raw: Vec<Value> = take_array(body, "messages")?;
    Ok(raw.into_iter().map(SlackMessage::from_value_lossy).collect())
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn conversations_list(
        &self,
        channel_type: ChannelType,
        cursor: Option<&str>,
    ) -> Result<Page<SlackChannel>> {
        let mut query = vec![
            ("types", channel_type.as_str()),
            ("limit", PAGE_LIMIT),
            ("exclude_archived", "true"),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let mut body = self.get("conversations.list", &query).await?;
        Ok(Page {
            next_cursor: next_cursor(&body),
            items: take_array(&mut body, "channels")?,
        })
    }

    async fn conversations_history(
        &self,
        channel_id: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SlackMessage>> {
        let mut query = vec![
            ("channel", channel_id),
            ("oldest", oldest),
            ("inclusive", "false"),
            ("limit", PAGE_LIMIT),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let mut body = self.get("conversations.history", &query).await?;
        Ok(Page {
            next_cursor: next_cursor(&body),
            items: take_messages(&mut body)?,
        })
    }

    async fn conversations_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        oldest: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SlackMessage>> {
        let mut query = vec![
            ("channel", channel_id),
            ("ts", thread_ts),
            ("oldest", oldest),
            ("inclusive", "false"),
            ("limit", PAGE_LIMIT),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let mut body = self.get("conversations.replies", &query).await?;
        Ok(Page {
            next_cursor: next_cursor(&body),
            items: take_messages(&mut body)?,
        })
    }

    async fn users_list(&self, cursor: Option<&str>) -> Result<Page<SlackUser>> {
        let mut query = vec![("limit", PAGE_LIMIT)];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let mut body = self.get("users.list", &query).await?;
        Ok(Page {
            next_cursor: next_cursor(&body),
            items: take_array(&mut body, "members")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let client = SlackClient::new("xoxp-test");
        assert_eq!(client.base_url, "https://slack.com/api");
        let client = client.with_base_url("http://localhost:9000/api/");
        assert_eq!(client.base_url, "http://localhost:9000/api");
    }

    #[test]
    fn test_next_cursor() {
        let body = serde_json::json!({"ok": true, "response_metadata": {"next_cursor": "dXNlcjpVMEc5V0ZYTlo="}});
        assert_eq!(next_cursor(&body).as_deref(), Some("dXNlcjpVMEc5V0ZYTlo="));

        let body = serde_json::json!({"ok": true, "response_metadata": {"next_cursor": ""}});
        assert_eq!(next_cursor(&body), None);

        let body = serde_json::json!({"ok": true});
        assert_eq!(next_cursor(&body), None);
    }

    #[test]
    fn test_take_messages_keeps_raw() {
        let mut body = serde_json::json!({
            "ok": true,
            "messages": [
                {"ts": "1.000001", "user": "U1", "text": "a", "client_msg_id": "x"},
                {"ts": "1.000002", "subtype": "channel_join", "text": "joined"}
            ]
        });
        let msgs = take_messages(&mut body).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].raw["client_msg_id"], "x");
        assert_eq!(msgs[1].subtype.as_deref(), Some("channel_join"));
    }

    #[test]
    fn test_take_messages_tolerates_bad_entries() {
        let mut body = serde_json::json!({
            "ok": true,
            "messages": [
                {"ts": "1.000003", "user": "U1", "text": "fine"},
                {"ts": 1.000002, "user": "U1", "text": "numeric ts"},
                {"ts": "1.000001", "user": "U1", "text": null}
            ]
        });
        let msgs = take_messages(&mut body).unwrap();
        assert_eq!(msgs.len(), 3);
        assert!(msgs[1].ts.is_none());
        assert_eq!(msgs[2].text, "");
    }

    #[test]
    fn test_take_array_missing_field() {
        let mut body = serde_json::json!({"ok": true});
        let users: Vec<SlackUser> = take_array(&mut body, "members").unwrap();
        assert!(users.is_empty());
    }
}
