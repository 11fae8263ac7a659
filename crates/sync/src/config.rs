// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::channel::ChannelKind;
use crate::channel::backoff::ReconnectPolicy;

/// Configuration for the chat sync core.
#[derive(Debug, Clone, clap::Args)]
pub struct SyncConfig {
    /// Chat server `host[:port]` serving both the sockets and the REST API.
    #[arg(long, default_value = "127.0.0.1:8000", env = "CHAT_SYNC_SERVER")]
    pub server: String,

    /// Use `wss://` and `https://` instead of `ws://` and `http://`.
    #[arg(long, env = "CHAT_SYNC_SECURE")]
    pub secure: bool,

    /// Path prefix of the REST API.
    #[arg(long, default_value = "/api/v1", env = "CHAT_SYNC_API_PREFIX")]
    pub api_prefix: String,

    /// Bearer token. If unset, the binary logs in with username/password.
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Reconnect attempts before a channel gives up.
    #[arg(long, default_value_t = 5, env = "CHAT_SYNC_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt, in milliseconds.
    #[arg(long, default_value_t = 2000, env = "CHAT_SYNC_RECONNECT_BASE_MS")]
    pub reconnect_base_ms: u64,

    /// Growth factor applied to the delay on every further attempt.
    #[arg(long, default_value_t = 1.5, env = "CHAT_SYNC_RECONNECT_FACTOR")]
    pub reconnect_factor: f64,

    /// Wait after socket open before sending the auth frame, in milliseconds.
    #[arg(long, default_value_t = 50, env = "CHAT_SYNC_AUTH_SETTLE_MS")]
    pub auth_settle_ms: u64,

    /// Wait after a send-triggered connect before retrying the socket, in milliseconds.
    #[arg(long, default_value_t = 1000, env = "CHAT_SYNC_SEND_SETTLE_MS")]
    pub send_settle_ms: u64,

    /// Timeout for REST requests, in milliseconds.
    #[arg(long, default_value_t = 10000, env = "CHAT_SYNC_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: u64,

    /// REST re-fetch interval for the conversation list, in milliseconds (0 = off).
    #[arg(long, default_value_t = 30000, env = "CHAT_SYNC_LIST_POLL_MS")]
    pub list_poll_ms: u64,

    /// REST re-fetch interval for the active conversation, in milliseconds (0 = off).
    #[arg(long, default_value_t = 0, env = "CHAT_SYNC_MESSAGE_POLL_MS")]
    pub message_poll_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:8000".to_owned(),
            secure: false,
            api_prefix: "/api/v1".to_owned(),
            token: None,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 2000,
            reconnect_factor: 1.5,
            auth_settle_ms: 50,
            send_settle_ms: 1000,
            http_timeout_ms: 10000,
            list_poll_ms: 30000,
            message_poll_ms: 0,
        }
    }
}

impl SyncConfig {
    /// WebSocket base, e.g. `ws://127.0.0.1:8000`.
    pub fn ws_base(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.server.trim_end_matches('/'))
    }

    /// REST base, e.g. `http://127.0.0.1:8000/api/v1`.
    pub fn api_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let prefix = self.api_prefix.trim_end_matches('/');
        format!("{scheme}://{}{prefix}", self.server.trim_end_matches('/'))
    }

    /// Socket URL for a channel; `identity` is the conversation id for the message channel.
    pub fn channel_url(&self, kind: ChannelKind, identity: Option<u64>) -> String {
        build_channel_url(&self.ws_base(), kind, identity)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            factor: self.reconnect_factor,
        }
    }

    pub fn auth_settle(&self) -> Duration {
        Duration::from_millis(self.auth_settle_ms)
    }

    pub fn send_settle(&self) -> Duration {
        Duration::from_millis(self.send_settle_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn list_poll(&self) -> Option<Duration> {
        (self.list_poll_ms > 0).then(|| Duration::from_millis(self.list_poll_ms))
    }

    pub fn message_poll(&self) -> Option<Duration> {
        (self.message_poll_ms > 0).then(|| Duration::from_millis(self.message_poll_ms))
    }
}

/// Build the socket URL for a channel from a `ws://` base.
pub fn build_channel_url(ws_base: &str, kind: ChannelKind, identity: Option<u64>) -> String {
    let base = ws_base.trim_end_matches('/');
    match (kind, identity) {
        (ChannelKind::Message, Some(id)) => format!("{base}/ws/chats/{id}/"),
        _ => format!("{base}/ws/chats/"),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
