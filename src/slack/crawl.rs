//! Crawl configured channels into the message store.
//!
//! Per channel: page history from the stored cursor (or `days` back), pull
//! the replies of every thread that has any, map to [`Message`] rows with
//! their mentions, upsert, and advance the cursor. The user/group directory
//! is synced first and sender display names are backfilled last.

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{SlackChannel, SlackClient, SlackMessage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Identity, Mention, MentionKind, Message};
use crate::store::{Directory, MessageStore};

/// Subtypes that carry no conversation content.
const SKIPPED_SUBTYPES: &[&str] = &[
    "channel_join",
    "channel_leave",
    "channel_topic",
    "channel_purpose",
    "channel_name",
    "channel_archive",
    "channel_unarchive",
    "bot_add",
    "bot_remove",
    "pinned_item",
    "unpinned_item",
    "group_join",
    "group_leave",
];

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([UW][A-Z0-9]+)").expect("valid user mention regex"));

static GROUP_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!subteam\^([A-Z0-9]+)").expect("valid group mention regex"));

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub channels: Vec<String>,
    /// Look-back for channels without a cursor
    pub days: i64,
    /// Subdomain used for permalinks
    pub workspace: String,
}

impl CrawlOptions {
    pub fn from_config(config: &Config, channels: &[String], days: Option<i64>) -> Result<Self> {
        let days = days.unwrap_or(config.slack.default_days);
        if days <= 0 {
            return Err(Error::InvalidArgument(format!(
                "--days must be positive, got {}",
                days
            )));
        }
        Ok(Self {
            channels: config.crawl_channels(channels)?,
            days,
            workspace: config.slack.workspace.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlReport {
    pub channels: usize,
    pub messages: usize,
    pub mentions: usize,
    pub identities: usize,
    pub backfilled: u64,
}

/// A mapped message and the mention rows that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedMessage {
    pub message: Message,
    pub mentions: Vec<Mention>,
}

/// Parse a Slack `ts` (`seconds.micros`) into an instant.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, micros) = ts_parts(ts)?;
    Utc.timestamp_opt(secs, micros * 1_000).single()
}

fn ts_parts(ts: &str) -> Option<(i64, u32)> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    let secs = secs.parse::<i64>().ok()?;
    if frac.is_empty() {
        return Some((secs, 0));
    }
    if frac.len() > 6 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let micros = format!("{:0<6}", frac).parse::<u32>().ok()?;
    Some((secs, micros))
}

/// `https://<workspace>.slack.com/archives/<channel>/p<ts digits>`, with the
/// thread query for replies.
pub fn permalink(workspace: &str, channel_id: &str, ts: &str, thread_ts: Option<&str>) -> String {
    let host = if workspace.trim().is_empty() {
        "slack.com".to_string()
    } else {
        format!("{}.slack.com", workspace.trim())
    };
    let digits: String = ts.chars().filter(|c| *c != '.').collect();
    let mut link = format!("https://{}/archives/{}/p{}", host, channel_id, digits);
    if let Some(thread_ts) = thread_ts {
        link.push_str(&format!("?thread_ts={}&cid={}", thread_ts, channel_id));
    }
    link
}

/// Distinct user and group ids mentioned in `text`, in order of appearance.
pub fn extract_mentions(text: &str) -> Vec<(String, MentionKind)> {
    let mut found: Vec<(usize, String, MentionKind)> = USER_MENTION
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| (m.start(), m.as_str().to_string(), MentionKind::User)))
        .chain(GROUP_MENTION.captures_iter(text).filter_map(|c| {
            c.get(1)
                .map(|m| (m.start(), m.as_str().to_string(), MentionKind::Group))
        }))
        .collect();
    found.sort_by_key(|(position, _, _)| *position);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|(_, id, _)| seen.insert(id.clone()))
        .map(|(_, id, kind)| (id, kind))
        .collect()
}

/// Group wins over user; `None` when nothing is mentioned.
pub fn classify(mentions: &[(String, MentionKind)]) -> Option<MentionKind> {
    if mentions.iter().any(|(_, kind)| *kind == MentionKind::Group) {
        Some(MentionKind::Group)
    } else if mentions.is_empty() {
        None
    } else {
        Some(MentionKind::User)
    }
}

/// Map one API message; `None` for noise subtypes and unparsable timestamps.
pub fn map_message(
    raw: &SlackMessage,
    channel: &SlackChannel,
    directory: &Directory,
    workspace: &str,
) -> Option<MappedMessage> {
    if let Some(subtype) = raw.subtype.as_deref() {
        if SKIPPED_SUBTYPES.contains(&subtype) {
            return None;
        }
    }

    let Some(created_at) = parse_ts(&raw.ts) else {
        warn!(channel = %channel.id, ts = %raw.ts, "Skipping message with unparsable ts");
        return None;
    };

    let thread_parent_timestamp = raw
        .thread_ts
        .as_deref()
        .filter(|thread_ts| *thread_ts != raw.ts)
        .map(String::from);

    let sender_id = raw
        .user
        .clone()
        .or_else(|| raw.bot_id.clone())
        .unwrap_or_default();
    let sender_display_name = directory
        .get(&sender_id)
        .map(|identity| identity.preferred_name().to_string())
        .or_else(|| raw.username.clone())
        .unwrap_or_default();

    let found = extract_mentions(&raw.text);
    let mentions = found
        .iter()
        .map(|(id, kind)| Mention {
            channel_id: channel.id.clone(),
            message_timestamp: raw.ts.clone(),
            target_id: id.clone(),
            target_kind: *kind,
        })
        .collect();

    let message = Message {
        id: None,
        channel_id: channel.id.clone(),
        channel_name: channel.name.clone(),
        sender_id,
        sender_display_name,
        text: raw.text.clone(),
        timestamp: raw.ts.clone(),
        created_at,
        permalink: permalink(
            workspace,
            &channel.id,
            &raw.ts,
            thread_parent_timestamp.as_deref(),
        ),
        thread_parent_timestamp,
        mention_classification: classify(&found),
    };

    Some(MappedMessage { message, mentions })
}

/// Pull users and usergroups into the store and return the directory.
pub async fn sync_directory<S: MessageStore + ?Sized>(
    store: &S,
    client: &SlackClient,
) -> Result<Directory> {
    let users = client.users().await?;
    client.pause().await;
    let groups = client.usergroups().await?;

    let identities: Vec<Identity> = users
        .into_iter()
        .map(|user| Identity {
            id: user.id,
            kind: MentionKind::User,
            name: user.name,
            display_name: user.profile.display_name,
            real_name: user
                .real_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(user.profile.real_name),
        })
        .chain(groups.into_iter().map(|group| Identity {
            id: group.id,
            kind: MentionKind::Group,
            name: group.handle,
            display_name: group.name,
            real_name: String::new(),
        }))
        .collect();

    let stored = store.upsert_identities(&identities).await?;
    info!(identities = stored, "Directory synced");
    Ok(Directory::new(identities))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelReport {
    pub messages: usize,
    pub mentions: usize,
}

/// Crawl one channel from its cursor (or `default_oldest`).
pub async fn crawl_channel<S: MessageStore + ?Sized>(
    store: &S,
    client: &SlackClient,
    directory: &Directory,
    channel_id: &str,
    default_oldest: &str,
    workspace: &str,
) -> Result<ChannelReport> {
    let channel = client.channel_info(channel_id).await?;
    let oldest = store
        .crawl_cursor(channel_id)
        .await?
        .unwrap_or_else(|| default_oldest.to_string());
    debug!(channel = %channel.name, %oldest, "Fetching history");

    client.pause().await;
    let history = client.history(channel_id, Some(&oldest)).await?;
    let latest = history
        .iter()
        .filter_map(|m| ts_parts(&m.ts).map(|parts| (parts, m.ts.as_str())))
        .max_by_key(|(parts, _)| *parts)
        .map(|(_, ts)| ts.to_string());

    let mut seen: HashSet<String> = HashSet::new();
    let mut raw: Vec<SlackMessage> = Vec::with_capacity(history.len());
    for message in &history {
        if seen.insert(message.ts.clone()) {
            raw.push(message.clone());
        }
        if message.has_replies() {
            client.pause().await;
            let replies = client.replies(channel_id, &message.ts).await?;
            for reply in replies {
                if seen.insert(reply.ts.clone()) {
                    raw.push(reply);
                }
            }
        }
    }

    let mapped: Vec<MappedMessage> = raw
        .iter()
        .filter_map(|m| map_message(m, &channel, directory, workspace))
        .collect();
    let messages: Vec<Message> = mapped.iter().map(|m| m.message.clone()).collect();

    store.upsert_messages(&messages).await?;
    let mut mention_count = 0;
    for item in &mapped {
        store
            .replace_mentions(&item.message.key(), &item.mentions)
            .await?;
        mention_count += item.mentions.len();
    }

    if let Some(latest) = latest {
        store.set_crawl_cursor(channel_id, &latest).await?;
    }

    metrics::record_crawled_messages(channel_id, messages.len());
    info!(
        channel = %channel.name,
        messages = messages.len(),
        mentions = mention_count,
        "Channel crawled"
    );

    Ok(ChannelReport {
        messages: messages.len(),
        mentions: mention_count,
    })
}

/// Full crawl: directory, every channel, then display-name backfill.
pub async fn crawl<S: MessageStore + ?Sized>(
    store: &S,
    client: &SlackClient,
    options: &CrawlOptions,
) -> Result<CrawlReport> {
    let directory = sync_directory(store, client).await?;
    let default_oldest = format!(
        "{}.000000",
        (Utc::now() - Duration::days(options.days)).timestamp()
    );

    let mut report = CrawlReport {
        identities: directory.len(),
        ..CrawlReport::default()
    };

    for channel_id in &options.channels {
        client.pause().await;
        match crawl_channel(
            store,
            client,
            &directory,
            channel_id,
            &default_oldest,
            &options.workspace,
        )
        .await
        {
            Ok(channel) => {
                report.channels += 1;
                report.messages += channel.messages;
                report.mentions += channel.mentions;
            }
            Err(Error::ChannelNotFound(id)) => {
                warn!(channel = %id, "Channel not found or not visible to the token; skipping");
            }
            Err(err) => return Err(err),
        }
    }

    report.backfilled = store.backfill_display_names().await?;
    info!(
        channels = report.channels,
        messages = report.messages,
        backfilled = report.backfilled,
        "Crawl finished"
    );
    Ok(report)
}
