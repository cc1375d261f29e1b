use crate::error::Result;
use crate::slack::{ChannelType, SlackApi, SlackChannel, SlackUser};

/// List every non-archived conversation of the given types.
///
/// A `missing_scope` error for one type is logged and that type skipped, so
/// a token without DM scopes still syncs its channels.
pub async fn list_all_channels(
    api: &dyn SlackApi,
    types: &[ChannelType],
) -> Result<Vec<SlackChannel>> {
    let mut channels = Vec::new();
    for &channel_type in types {
        let mut cursor: Option<String> = None;
        loop {
            let page = match api.conversations_list(channel_type, cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) if e.api_code() == Some("missing_scope") => {
                    log::warn!(
                        "Token lacks scope for {} conversations; skipping them",
                        channel_type.as_str()
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            channels.extend(page.items.into_iter().filter(|c| !c.is_archived));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }
    Ok(channels)
}

/// List every workspace member.
pub async fn list_all_users(api: &dyn SlackApi) -> Result<Vec<SlackUser>> {
    let mut users = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = api.users_list(cursor.as_deref()).await?;
        users.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::mock::{self, MockSlack};

    #[tokio::test]
    async fn test_list_all_channels_paginates_and_skips_denied_types() {
        let slack = MockSlack::new();
        for id in ["C1", "C2", "C3"] {
            slack.add_channel(mock::channel(id, Some(id), ChannelType::PublicChannel));
        }
        slack.add_channel(mock::channel("D1", None, ChannelType::Im));
        slack.deny_scope(ChannelType::Im);

        let channels = list_all_channels(&slack, &ChannelType::ALL).await.unwrap();
        let ids: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "C2", "C3"]);
        // Two pages of public channels, one call per other type.
        assert_eq!(slack.call_count("conversations.list:public_channel"), 2);
        assert_eq!(slack.call_count("conversations.list:im"), 1);
    }

    #[tokio::test]
    async fn test_list_all_users() {
        let slack = MockSlack::new();
        for id in ["U1", "U2", "U3", "U4", "U5"] {
            slack.add_user(mock::user(id, id));
        }
        let users = list_all_users(&slack).await.unwrap();
        assert_eq!(users.len(), 5);
        assert_eq!(slack.call_count("users.list"), 3);
    }
}
