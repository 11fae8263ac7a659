// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented front end for the `chatsync` binary: input commands and
//! plain-text rendering of session state.

use chrono::NaiveDate;

use crate::channel::{ChannelKind, Reconnect};
use crate::error::ErrorCode;
use crate::model::{ConversationId, Message};
use crate::protocol::TYPING_LABEL;
use crate::reconcile::{group_by_date, mark_consecutive, RunPosition};
use crate::session::{ChatState, SessionEvent};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Typing,
    Idle,
    Open(ConversationId),
    List,
    Quit,
}

/// Parse an input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_owned())));
    };

    let mut parts = rest.split_whitespace();
    let command = match (parts.next(), parts.next()) {
        (Some("quit"), None) => Command::Quit,
        (Some("typing"), None) => Command::Typing,
        (Some("idle"), None) => Command::Idle,
        (Some("list"), None) => Command::List,
        (Some("open"), Some(id)) => {
            let id = id
                .parse()
                .map_err(|_| anyhow::Error::new(ErrorCode::InvalidPayload).context(format!("bad conversation id: {id}")))?;
            Command::Open(id)
        }
        _ => {
            return Err(anyhow::Error::new(ErrorCode::InvalidPayload).context(format!("unknown command: {line}")));
        }
    };
    Ok(Some(command))
}

/// Chat list, one row per conversation: marker, title, preview, time, unread.
pub fn render_list(state: &ChatState, me: Option<&str>, today: NaiveDate) -> Vec<String> {
    state
        .conversations
        .iter()
        .map(|c| {
            let marker = if state.active == Some(c.id) { '>' } else { ' ' };
            let time = c.last_message.as_ref().map(|m| m.sent_at.format_list_time(today)).unwrap_or_default();
            let unread = if c.unread_count > 0 { format!(" ({})", c.unread_count) } else { String::new() };
            format!("{marker} [{}] {} | {} {time}{unread}", c.id, c.title(me), c.preview())
        })
        .collect()
}

/// Transcript of the active conversation with day dividers. The sender is
/// printed once per run of consecutive messages.
pub fn render_messages(messages: &[Message], today: NaiveDate) -> Vec<String> {
    let mut lines = Vec::new();
    for group in group_by_date(messages, today) {
        lines.push(format!("── {} ──", group.label));
        for (message, position) in mark_consecutive(group.messages) {
            lines.push(render_message(message, matches!(position, RunPosition::Solo | RunPosition::First)));
        }
    }
    lines
}

fn render_message(message: &Message, with_sender: bool) -> String {
    let time = message.sent_at.format_time();
    if with_sender {
        let name = if message.sender_name.is_empty() { &message.sender_username } else { &message.sender_name };
        format!("[{time}] {name}: {}", message.text)
    } else {
        format!("[{time}]   {}", message.text)
    }
}

/// Status line for an event, if it deserves one.
pub fn render_event(event: &SessionEvent, state: &ChatState, me: Option<&str>) -> Option<String> {
    match event {
        SessionEvent::MessagesChanged { added, .. } if *added > 0 => {
            let tail = state.messages.len().saturating_sub(*added);
            let lines: Vec<String> = state.messages[tail..].iter().map(|m| render_message(m, true)).collect();
            Some(lines.join("\n"))
        }
        SessionEvent::TypingChanged { .. } => {
            let typing: Vec<&str> = state
                .typing
                .iter()
                .filter(|(user, status)| Some(user.as_str()) != me && status.as_str() == TYPING_LABEL)
                .map(|(user, _)| user.as_str())
                .collect();
            (!typing.is_empty()).then(|| format!("{} {}", typing.join(", "), TYPING_LABEL))
        }
        SessionEvent::ActiveChanged(Some(_)) => {
            let title = state.active_summary().map(|c| c.title(me));
            Some(format!("── {} ──", title.unwrap_or_default()))
        }
        SessionEvent::ChannelDown { kind, disconnect } => match disconnect.reconnect {
            Reconnect::GivenUp => Some(format!("{} connection lost; use /open to retry", channel_label(*kind))),
            _ if disconnect.is_auth_failure() => Some("server refused the session; log in again".to_owned()),
            _ => None,
        },
        SessionEvent::Unauthorized => Some("session expired; log in again".to_owned()),
        SessionEvent::SendFailed { reason, .. } => Some(format!("message not sent: {reason}")),
        _ => None,
    }
}

fn channel_label(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::List => "chat list",
        ChannelKind::Message => "conversation",
    }
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
