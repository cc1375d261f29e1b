use crate::error::{Error, Result};

/// Parsed information from a Slack permalink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackPermalink {
    pub channel_id: String,
    /// Message timestamp (`"1700000000.000200"`), when the link points at a message.
    pub ts: Option<String>,
    /// Parent timestamp, when the link points at a thread reply.
    pub thread_ts: Option<String>,
}

/// Parse a Slack URL into its component identifiers.
///
/// Supported URL patterns:
/// - `https://<team>.slack.com/archives/<channel>`
/// - `https://<team>.slack.com/archives/<channel>/p<ts>`
/// - `https://<team>.slack.com/archives/<channel>/p<ts>?thread_ts=<ts>&cid=<channel>`
/// - `https://app.slack.com/client/<team>/<channel>`
pub fn parse_slack_url(input: &str) -> Result<SlackPermalink> {
    let url = url::Url::parse(input).map_err(|e| Error::UrlParse(e.to_string()))?;

    let host = url.host_str().unwrap_or("");
    if !host.ends_with("slack.com") {
        return Err(Error::UrlParse(format!("not a Slack URL: {input}")));
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let (channel, message) = match segments.as_slice() {
        ["archives", channel, rest @ ..] => (*channel, rest.first().copied()),
        ["client", _team, channel, ..] => (*channel, None),
        _ => return Err(Error::UrlParse(format!("unexpected URL format: {input}"))),
    };

    if !is_channel_id(channel) {
        return Err(Error::UrlParse(format!(
            "missing channel ID in URL: {input}"
        )));
    }

    let ts = match message {
        Some(seg) => Some(
            permalink_ts(seg)
                .ok_or_else(|| Error::UrlParse(format!("bad message segment in URL: {input}")))?,
        ),
        None => None,
    };
    let thread_ts = url
        .query_pairs()
        .find(|(k, _)| k == "thread_ts")
        .map(|(_, v)| v.into_owned())
        .filter(|v| crate::slack::ts_to_micros(v).is_some());

    Ok(SlackPermalink {
        channel_id: channel.to_string(),
        ts,
        thread_ts,
    })
}

/// `p1700000000000200` → `1700000000.000200`.
fn permalink_ts(segment: &str) -> Option<String> {
    let digits = segment.strip_prefix('p')?;
    if digits.len() <= 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (secs, micros) = digits.split_at(digits.len() - 6);
    Some(format!("{secs}.{micros}"))
}

/// Channel, group and DM ids: an upper-case letter prefix (`C`, `G`, `D`)
/// followed by upper-case alphanumerics.
fn is_channel_id(s: &str) -> bool {
    s.len() > 1
        && s.starts_with(['C', 'G', 'D'])
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Accept a raw channel id or a Slack URL and return the channel id.
pub fn resolve_channel_id(input: &str) -> Result<String> {
    let input = input.trim();
    if input.contains("slack.com") {
        return parse_slack_url(input).map(|p| p.channel_id);
    }
    if is_channel_id(input) {
        Ok(input.to_string())
    } else {
        Err(Error::InvalidIdentifier(format!(
            "'{input}' is not a channel ID or Slack URL"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url() {
        let info = parse_slack_url("https://acme.slack.com/archives/C012AB3CD").unwrap();
        assert_eq!(
            info,
            SlackPermalink {
                channel_id: "C012AB3CD".into(),
                ts: None,
                thread_ts: None,
            }
        );
    }

    #[test]
    fn test_message_url() {
        let info =
            parse_slack_url("https://acme.slack.com/archives/C012AB3CD/p1700000000000200").unwrap();
        assert_eq!(info.channel_id, "C012AB3CD");
        assert_eq!(info.ts.as_deref(), Some("1700000000.000200"));
    }

    #[test]
    fn test_thread_reply_url() {
        let info = parse_slack_url(
            "https://acme.slack.com/archives/C012AB3CD/p1700000500000100?thread_ts=1700000000.000200&cid=C012AB3CD",
        )
        .unwrap();
        assert_eq!(info.ts.as_deref(), Some("1700000500.000100"));
        assert_eq!(info.thread_ts.as_deref(), Some("1700000000.000200"));
    }

    #[test]
    fn test_client_url() {
        let info = parse_slack_url("https://app.slack.com/client/T0001/G0ABCDEF12").unwrap();
        assert_eq!(info.channel_id, "G0ABCDEF12");
    }

    #[test]
    fn test_rejects() {
        assert!(parse_slack_url("https://example.com/archives/C012AB3CD").is_err());
        assert!(parse_slack_url("https://acme.slack.com/messages").is_err());
        assert!(parse_slack_url("https://acme.slack.com/archives/general").is_err());
        assert!(parse_slack_url("https://acme.slack.com/archives/C012AB3CD/x123").is_err());
        assert!(parse_slack_url("not a url").is_err());
    }

    #[test]
    fn test_resolve_channel_id() {
        assert_eq!(resolve_channel_id(" C012AB3CD ").unwrap(), "C012AB3CD");
        assert_eq!(
            resolve_channel_id("https://acme.slack.com/archives/D0123456789/p1700000000000200")
                .unwrap(),
            "D0123456789"
        );
        assert!(matches!(
            resolve_channel_id("general"),
            Err(Error::InvalidIdentifier(_))
        ));
    }
}
