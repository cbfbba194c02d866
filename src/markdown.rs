//! Markdown projection of grouped messages and Slack markup cleanup.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::identity::DateRange;
use crate::models::{GroupedMessages, Message, MessageThread, ParentKind, ThreadKey};
use crate::store::Directory;

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|([^>]*))?>").expect("valid user mention regex"));
static GROUP_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!subteam\^([A-Z0-9]+)(?:\|([^>]*))?>").expect("valid group mention regex"));
static SPECIAL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!(here|channel|everyone)(?:\|[^>]*)?>").expect("valid special mention regex"));
static CHANNEL_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<#([A-Z0-9]+)(?:\|([^>]*))?>").expect("valid channel link regex"));
static URL_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<((?:https?|mailto):[^|>]+)(?:\|([^>]+))?>").expect("valid url link regex"));
static REF_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[?(?:ref:)?([A-Z0-9]+)/([0-9]+(?:\.[0-9]+)?)\]?$").expect("valid reference tag regex"));

/// How to render.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Append `[ref:<channel>/<ts>]` to every message line
    pub include_refs: bool,
    /// Truncate message text to this many characters
    pub max_text_chars: Option<usize>,
}

impl RenderOptions {
    /// Options used when the output is fed to the language model.
    pub fn for_llm() -> Self {
        Self {
            include_refs: true,
            max_text_chars: Some(2000),
        }
    }
}

/// Reference tag for one message.
pub fn reference_tag(key: &ThreadKey) -> String {
    format!("[ref:{}]", key)
}

/// Parse `C123/1700000000.000100`, with or without the `[ref:...]` wrapper.
pub fn parse_reference(value: &str) -> Option<ThreadKey> {
    REF_TAG
        .captures(value.trim())
        .map(|caps| ThreadKey::new(&caps[1], &caps[2]))
}

/// Replace Slack markup with readable text.
pub fn normalize_text(text: &str, directory: &Directory) -> String {
    let text = USER_MENTION.replace_all(text, |caps: &Captures| {
        let name = directory
            .get(&caps[1])
            .map(|identity| identity.preferred_name().to_string())
            .or_else(|| non_empty(caps.get(2).map(|m| m.as_str())))
            .unwrap_or_else(|| caps[1].to_string());
        format!("@{}", name)
    });

    let text = GROUP_MENTION.replace_all(&text, |caps: &Captures| {
        let name = non_empty(caps.get(2).map(|m| m.as_str().trim_start_matches('@')))
            .or_else(|| directory.get(&caps[1]).map(|g| g.name.clone()))
            .unwrap_or_else(|| caps[1].to_string());
        format!("@{}", name)
    });

    let text = SPECIAL_MENTION.replace_all(&text, "@$1");

    let text = CHANNEL_LINK.replace_all(&text, |caps: &Captures| {
        let name = non_empty(caps.get(2).map(|m| m.as_str())).unwrap_or_else(|| caps[1].to_string());
        format!("#{}", name)
    });

    let text = URL_LINK.replace_all(&text, |caps: &Captures| match caps.get(2) {
        Some(label) => format!("[{}]({})", label.as_str(), &caps[1]),
        None => caps[1].to_string(),
    });

    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn sender_name<'a>(message: &'a Message, directory: &'a Directory) -> &'a str {
    if !message.sender_display_name.trim().is_empty() {
        return &message.sender_display_name;
    }
    directory
        .get(&message.sender_id)
        .map(|identity| identity.preferred_name())
        .unwrap_or(&message.sender_id)
}

fn message_line(
    out: &mut String,
    message: &Message,
    indent: &str,
    directory: &Directory,
    options: &RenderOptions,
) {
    let mut text = normalize_text(&message.text, directory);
    if let Some(limit) = options.max_text_chars {
        if text.chars().count() > limit {
            text = text.chars().take(limit).collect::<String>() + "…";
        }
    }
    let text = text.trim().replace('\n', &format!("\n{}  ", indent));

    let _ = write!(
        out,
        "{}- **{}** ({}, #{}): {}",
        indent,
        sender_name(message, directory),
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.channel_name,
        text
    );
    if options.include_refs {
        let _ = write!(out, " {}", reference_tag(&message.key()));
    }
    out.push('\n');
}

/// Render one thread: parent line, then indented replies.
pub fn render_thread(
    thread: &MessageThread,
    directory: &Directory,
    options: &RenderOptions,
) -> String {
    let mut out = String::new();
    let parent = &thread.parent_message;
    let _ = write!(
        out,
        "### Thread in #{} ({} messages)",
        parent.channel_name, thread.message_count
    );
    if thread.parent_kind == ParentKind::Promoted {
        out.push_str(" (thread start not in range)");
    }
    out.push_str("\n\n");

    message_line(&mut out, parent, "", directory, options);
    for reply in &thread.replies {
        message_line(&mut out, reply, "  ", directory, options);
    }
    out
}

/// Render the whole grouping under a title naming the window.
pub fn render_grouped(
    grouped: &GroupedMessages,
    range: &DateRange,
    directory: &Directory,
    options: &RenderOptions,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Messages {} to {}\n",
        range.start().format("%Y-%m-%d %H:%M"),
        range.end().format("%Y-%m-%d %H:%M")
    );

    if grouped.is_empty() {
        out.push_str("_No messages in this window._\n");
        return out;
    }

    let _ = writeln!(
        out,
        "{} messages: {} threads, {} standalone\n",
        grouped.total_message_count,
        grouped.threads.len(),
        grouped.standalone_messages.len()
    );

    if !grouped.threads.is_empty() {
        out.push_str("## Threads\n\n");
        for thread in &grouped.threads {
            out.push_str(&render_thread(thread, directory, options));
            out.push('\n');
        }
    }

    if !grouped.standalone_messages.is_empty() {
        out.push_str("## Standalone messages\n\n");
        for message in &grouped.standalone_messages {
            message_line(&mut out, message, "", directory, options);
        }
    }

    out
}
