// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the chat server's REST API.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::model::{ConversationId, ConversationSummary, Message, User};
use crate::token::TokenStore;

/// Boxed future returned by [`ChatApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// REST operations the sync core depends on.
///
/// Object-safe for use as `Arc<dyn ChatApi>`.
pub trait ChatApi: Send + Sync + 'static {
    /// Conversation list snapshot.
    fn list_chats(&self) -> ApiFuture<'_, Vec<ConversationSummary>>;

    /// Full message history of one conversation.
    fn fetch_messages(&self, id: ConversationId) -> ApiFuture<'_, Vec<Message>>;

    /// Fallback send path used when the message socket is unavailable.
    fn send_message(&self, id: ConversationId, text: String) -> ApiFuture<'_, ()>;
}

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    chat: ConversationId,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
}

/// reqwest-backed [`ChatApi`] with bearer auth from a [`TokenStore`].
pub struct RestClient {
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    client: Client,
}

impl RestClient {
    pub fn new(base_url: String, tokens: Arc<dyn TokenStore>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), tokens, client }
    }

    pub fn from_config(config: &SyncConfig, tokens: Arc<dyn TokenStore>) -> Self {
        Self::new(config.api_base(), tokens, config.http_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match self.tokens.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute(&self, req: RequestBuilder, what: &str) -> anyhow::Result<Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| anyhow::Error::new(e).context(ErrorCode::Transport))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let code = ErrorCode::from_http_status(status.as_u16());
        Err(anyhow::Error::new(code).context(format!("{what} returned {status}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let req = self.apply_auth(self.client.get(self.url(path)));
        let resp = self.execute(req, path).await?;
        let value = resp.json().await.map_err(|e| anyhow::Error::new(e).context(ErrorCode::InvalidPayload))?;
        Ok(value)
    }

    /// Exchange credentials for an access token and store it.
    pub async fn login(&self, username: &str, password: &str) -> anyhow::Result<String> {
        let req = self.client.post(self.url("/token/")).json(&LoginBody { username, password });
        let resp = self.execute(req, "/token/").await?;
        let TokenResponse { access } = resp.json().await?;
        self.tokens.set_token(Some(access.clone()));
        tracing::info!(username, "logged in");
        Ok(access)
    }

    /// Profile of the authenticated user.
    pub async fn current_user(&self) -> anyhow::Result<User> {
        self.get_json("/me/").await
    }

    /// Forget the stored token.
    pub fn logout(&self) {
        self.tokens.set_token(None);
    }
}

impl ChatApi for RestClient {
    fn list_chats(&self) -> ApiFuture<'_, Vec<ConversationSummary>> {
        Box::pin(self.get_json("/chats/"))
    }

    fn fetch_messages(&self, id: ConversationId) -> ApiFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let mut messages: Vec<Message> = self.get_json(&format!("/chats/{id}/messages")).await?;
            for message in &mut messages {
                message.conversation_id = id;
            }
            Ok(messages)
        })
    }

    fn send_message(&self, id: ConversationId, text: String) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let req = self.client.post(self.url("/send/")).json(&SendBody { chat: id, text: &text });
            self.execute(self.apply_auth(req), "/send/").await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
