// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-memory socket connector and a fake REST API.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::api::{ApiFuture, ChatApi};
use crate::channel::connector::{CloseInfo, Connector, Incoming, Outgoing, Socket};
use crate::error::{CloseCode, ErrorCode};
use crate::model::{ConversationId, ConversationSummary, Message, Timestamp};

// -- Connector ---------------------------------------------------------------

/// Connector whose sockets are queue pairs. Every accepted open yields a
/// [`ServerEnd`] on the receiver returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refusals: Mutex<u32>,
    opens: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            refusals: Mutex::new(0),
            opens: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        };
        (Arc::new(connector), rx)
    }

    /// Fail the next `n` opens as if the server were unreachable.
    pub fn refuse_next(&self, n: u32) {
        *self.refusals.lock() = n;
    }

    /// Number of open attempts so far, refused ones included.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// URLs of every open attempt, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl Connector for MemoryConnector {
    fn open(&self, url: String) -> Pin<Box<dyn Future<Output = anyhow::Result<Socket>> + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());

        let refuse = {
            let mut refusals = self.refusals.lock();
            let refuse = *refusals > 0;
            *refusals = refusals.saturating_sub(1);
            refuse
        };
        if refuse {
            return Box::pin(async move { Err(anyhow::anyhow!("connection refused: {url}")) });
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let server = ServerEnd { url, to_client: in_tx, from_client: out_rx };
        let delivered = self.accepted.send(server).is_ok();
        Box::pin(async move {
            if !delivered {
                anyhow::bail!("memory connector receiver dropped");
            }
            Ok(Socket { outgoing: out_tx, incoming: in_rx })
        })
    }
}

/// Server side of an in-memory socket. Dropping it looks like a transport drop.
pub struct ServerEnd {
    pub url: String,
    to_client: mpsc::UnboundedSender<Incoming>,
    from_client: mpsc::UnboundedReceiver<Outgoing>,
}

impl ServerEnd {
    /// Next frame the client sent; `None` once the client released the socket.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.from_client.recv().await
    }

    /// Next client frame, which must be a JSON text frame.
    pub async fn recv_json(&mut self) -> anyhow::Result<Value> {
        match self.from_client.recv().await {
            Some(Outgoing::Text(text)) => Ok(serde_json::from_str(&text)?),
            other => anyhow::bail!("expected text frame, got {other:?}"),
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Incoming::Text(text.into())).is_ok()
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Close from the server side with a status code.
    pub fn close(&self, code: CloseCode, reason: &str) -> bool {
        self.to_client.send(Incoming::Close(Some(CloseInfo::new(code, reason)))).is_ok()
    }
}

// -- REST --------------------------------------------------------------------

/// In-memory [`ChatApi`] with call recording and failure injection.
#[derive(Default)]
pub struct FakeApi {
    chats: Mutex<Vec<ConversationSummary>>,
    history: Mutex<HashMap<ConversationId, Vec<Message>>>,
    sent: Mutex<Vec<(ConversationId, String)>>,
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<ErrorCode>>,
    next_id: AtomicU64,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_id: AtomicU64::new(1000), ..Self::default() })
    }

    pub fn set_chats(&self, chats: Vec<ConversationSummary>) {
        *self.chats.lock() = chats;
    }

    pub fn set_history(&self, id: ConversationId, messages: Vec<Message>) {
        self.history.lock().insert(id, messages);
    }

    /// Make every subsequent call fail with `code`; `None` restores success.
    pub fn fail_with(&self, code: Option<ErrorCode>) {
        *self.failure.lock() = code;
    }

    /// Messages accepted through `send_message`.
    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().clone()
    }

    /// Call log, e.g. `["list_chats", "fetch_messages:3"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> anyhow::Result<()> {
        self.calls.lock().push(call);
        match *self.failure.lock() {
            Some(code) => Err(anyhow::Error::new(code).context("fake api failure")),
            None => Ok(()),
        }
    }
}

impl ChatApi for FakeApi {
    fn list_chats(&self) -> ApiFuture<'_, Vec<ConversationSummary>> {
        let result = self.record("list_chats".to_owned()).map(|()| self.chats.lock().clone());
        Box::pin(async move { result })
    }

    fn fetch_messages(&self, id: ConversationId) -> ApiFuture<'_, Vec<Message>> {
        let result = self
            .record(format!("fetch_messages:{id}"))
            .map(|()| self.history.lock().get(&id).cloned().unwrap_or_default());
        Box::pin(async move { result })
    }

    fn send_message(&self, id: ConversationId, text: String) -> ApiFuture<'_, ()> {
        let result = self.record(format!("send_message:{id}")).map(|()| {
            let message = Message {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                conversation_id: id,
                sender_username: "me".to_owned(),
                sender_name: "Me".to_owned(),
                text: text.clone(),
                sent_at: Timestamp(chrono::Local::now().naive_local()),
            };
            self.history.lock().entry(id).or_default().push(message);
            self.sent.lock().push((id, text));
        });
        Box::pin(async move { result })
    }
}
