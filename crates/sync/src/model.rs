// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical client-side collections: conversation summaries and messages.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub type ConversationId = u64;
pub type MessageId = u64;

// -- Timestamps --------------------------------------------------------------

/// Server-side send time.
///
/// The server emits `YYYY-MM-DD HH:MM:SS[.ffffff]`; the `T`-separated form and
/// RFC 3339 (converted to local time) are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub NaiveDateTime);

const WIRE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl Timestamp {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        for fmt in [WIRE_FORMAT, "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(Self(dt));
            }
        }
        DateTime::parse_from_rfc3339(s).ok().map(|dt| Self(dt.with_timezone(&Local).naive_local()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    /// Milliseconds since the epoch, treating the timestamp as UTC.
    pub fn epoch_ms(&self) -> u64 {
        u64::try_from(self.0.and_utc().timestamp_millis()).unwrap_or(0)
    }

    /// `HH:MM`, as shown next to a message bubble.
    pub fn format_time(&self) -> String {
        self.0.format("%H:%M").to_string()
    }

    /// Time of day for today's messages, `Mon D` otherwise (chat list column).
    pub fn format_list_time(&self, today: NaiveDate) -> String {
        if self.date() == today {
            self.format_time()
        } else {
            self.0.format("%b %-d").to_string()
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(WIRE_FORMAT))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {raw}")))
    }
}

// -- Conversations -----------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    #[default]
    Private,
    Group,
}

/// Snapshot of the newest message in a conversation, as carried by list updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub sender_username: String,
    #[serde(default)]
    pub sender_name: String,
    pub text: String,
    pub sent_at: Timestamp,
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ConversationType,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    /// Local recency stamp (epoch ms); the list is sorted on this, newest first.
    #[serde(default)]
    pub updated_at: u64,
}

impl ConversationSummary {
    /// Title shown in the list and header.
    ///
    /// Falls back to the last sender's name, or `Chat {id}` when the last
    /// message was sent by `me`.
    pub fn title(&self, me: Option<&str>) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_owned();
        }
        match &self.last_message {
            Some(last) if Some(last.sender_username.as_str()) != me && !last.sender_name.is_empty() => {
                last.sender_name.clone()
            }
            _ => format!("Chat {}", self.id),
        }
    }

    /// Preview text for the list row.
    pub fn preview(&self) -> &str {
        self.last_message.as_ref().map_or("No messages yet", |m| m.text.as_str())
    }
}

// -- Messages ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Absent from socket frames; filled in from the channel's conversation.
    #[serde(default, alias = "chat", alias = "chat_id")]
    pub conversation_id: ConversationId,
    pub sender_username: String,
    #[serde(default)]
    pub sender_name: String,
    pub text: String,
    pub sent_at: Timestamp,
}

/// Authenticated user, from `GET {base}/me/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<u64>,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
