// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket frame shapes for the list and message channels.
//!
//! Channels hand inbound payloads over as untouched `serde_json::Value`s; the
//! decoding into typed frames happens here, on the reconciliation side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::model::{ConversationId, ConversationType, LastMessage, Message};

/// On-wire typing status while the user is composing.
pub const TYPING_LABEL: &str = "typing ...";
/// On-wire typing status once the user stopped composing.
pub const LAST_SEEN_LABEL: &str = "last seen recently";

// -- Outbound ----------------------------------------------------------------

/// First frame after open on either channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFrame {
    pub token: String,
}

/// Outbound chat message on the message channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFrame {
    pub chat_id: ConversationId,
    pub text: String,
}

/// Typing status, sent outbound and received as a presence update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingFrame {
    pub typing_status: String,
    pub username: String,
}

/// Composing state as the UI reports it; maps 1:1 to the wire labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Typing,
    Idle,
}

impl TypingState {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Typing => TYPING_LABEL,
            Self::Idle => LAST_SEEN_LABEL,
        }
    }
}

// -- Inbound: list channel ---------------------------------------------------

/// Inbound list-channel update. Every field except `id` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListUpdate {
    pub id: ConversationId,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(rename = "type", default)]
    pub kind: Option<ConversationType>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
}

impl ListUpdate {
    /// Decode a list-channel payload; a missing or null `id` is rejected.
    pub fn decode(value: &Value) -> Result<Self, ErrorCode> {
        match value.get("id") {
            None | Some(Value::Null) => return Err(ErrorCode::InvalidPayload),
            Some(_) => {}
        }
        Self::deserialize(value).map_err(|_| ErrorCode::InvalidPayload)
    }
}

// -- Inbound: message channel ------------------------------------------------

/// Message delivery carried by a message-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// Complete message set for the conversation; replaces local state.
    FullSync(Vec<Message>),
    /// One newly delivered message.
    Incremental(Message),
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FullSync(_) => "full_sync",
            Self::Incremental(_) => "incremental",
        }
    }
}

/// Inbound message-channel frame.
///
/// The wire format distinguishes full resyncs from incremental delivery only by
/// which key is present (`messages` vs `message`). That is decoded once, here,
/// into an explicit variant; a frame carrying both keys is rejected rather than
/// guessed at. A single tagged shape on the server side would remove the need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFrame {
    Messages(MessagePayload),
    /// Presence update for one participant.
    Typing { username: String, status: String },
}

impl MessageFrame {
    pub fn decode(value: &Value) -> Result<Self, ErrorCode> {
        let messages = value.get("messages");
        let message = value.get("message");
        let payload = match (messages, message) {
            (Some(_), Some(_)) => return Err(ErrorCode::InvalidPayload),
            (Some(list), None) => MessagePayload::FullSync(
                Vec::<Message>::deserialize(list).map_err(|_| ErrorCode::InvalidPayload)?,
            ),
            (None, Some(one)) => MessagePayload::Incremental(
                Message::deserialize(one).map_err(|_| ErrorCode::InvalidPayload)?,
            ),
            (None, None) if value.get("typing_status").is_some() => {
                let typing =
                    TypingFrame::deserialize(value).map_err(|_| ErrorCode::InvalidPayload)?;
                return Ok(Self::Typing { username: typing.username, status: typing.typing_status });
            }
            (None, None) => return Err(ErrorCode::InvalidPayload),
        };
        Ok(Self::Messages(payload))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Messages(payload) => payload.kind(),
            Self::Typing { .. } => "typing",
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
