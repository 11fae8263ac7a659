// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound message delivery: socket first, REST as the fallback.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::channel::ChannelConnection;
use crate::error::ErrorCode;
use crate::model::{ConversationId, Message};
use crate::protocol::{SendFrame, TypingFrame, TypingState};

/// Path a successfully sent message took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendRoute {
    /// Channel was already open for the conversation.
    Socket,
    /// Channel had to be (re)opened first.
    SocketAfterConnect,
    /// Socket unavailable; posted over REST. Carries the refreshed history.
    Rest(Vec<Message>),
}

/// Delivers outbound messages for the message channel.
#[derive(Clone)]
pub struct SendCoordinator {
    channel: ChannelConnection,
    api: Arc<dyn ChatApi>,
    settle: Duration,
}

impl SendCoordinator {
    pub fn new(channel: ChannelConnection, api: Arc<dyn ChatApi>, settle: Duration) -> Self {
        Self { channel, api, settle }
    }

    /// Send `text` to `conversation`.
    ///
    /// Over the socket when it is open for that conversation; otherwise connect,
    /// wait the settle window and retry the socket; failing that, post over REST
    /// and re-fetch the full history. Errors only when every path failed.
    pub async fn send(&self, text: &str, conversation: ConversationId) -> anyhow::Result<SendRoute> {
        if text.trim().is_empty() {
            return Err(ErrorCode::EmptyMessage.into());
        }
        let frame = SendFrame { chat_id: conversation, text: text.to_owned() };

        if self.channel.is_connected_to(Some(conversation)) && self.channel.send_json(&frame).is_ok() {
            debug!(conversation, "message sent over socket");
            return Ok(SendRoute::Socket);
        }

        info!(conversation, "message channel not open, connecting before send");
        self.channel.connect(Some(conversation));
        tokio::time::sleep(self.settle).await;

        if self.channel.is_connected_to(Some(conversation)) {
            match self.channel.send_json(&frame) {
                Ok(()) => return Ok(SendRoute::SocketAfterConnect),
                Err(e) => warn!(conversation, err = %e, "socket send failed after reconnect"),
            }
        }

        warn!(conversation, "socket unavailable, falling back to REST");
        let fallback = async {
            self.api.send_message(conversation, frame.text.clone()).await?;
            self.api.fetch_messages(conversation).await
        };
        match fallback.await {
            Ok(history) => Ok(SendRoute::Rest(history)),
            Err(e) => {
                warn!(conversation, code = %ErrorCode::SendFailed, err = %e, "REST fallback failed");
                Err(e.context(ErrorCode::SendFailed))
            }
        }
    }

    /// Publish the user's typing state. Dropped silently when not connected.
    pub fn send_typing(&self, state: TypingState, username: &str) -> bool {
        if !self.channel.is_connected() {
            return false;
        }
        let frame =
            TypingFrame { typing_status: state.as_wire().to_owned(), username: username.to_owned() };
        self.channel.send_json(&frame).is_ok()
    }
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
