use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static RE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|[^>]*)?>").unwrap());
static RE_CHANNEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#([CG][A-Z0-9]+)\|([^>]*)>").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<((?:https?|mailto):[^|>]+)(?:\|[^>]+)?>").unwrap());

/// Render Slack markup as plain text for prompts.
///
/// Mentions become `@name` (falling back to the raw id), channel links
/// become `#name`, links keep only the URL, and the three entities Slack
/// escapes are decoded.
pub fn clean_text(text: &str, user_names: &HashMap<String, String>) -> String {
    let out = RE_MENTION.replace_all(text, |caps: &Captures| {
        let id = &caps[1];
        let name = user_names.get(id).map(String::as_str).unwrap_or(id);
        format!("@{name}")
    });
    let out = RE_CHANNEL.replace_all(&out, |caps: &Captures| {
        let name = &caps[2];
        if name.is_empty() {
            format!("#{}", &caps[1])
        } else {
            format!("#{name}")
        }
    });
    let out = RE_LINK.replace_all(&out, "$1");
    unescape(out.trim())
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
