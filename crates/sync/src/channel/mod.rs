// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived channel connection: connect, authenticate, receive, reconnect.
//!
//! One [`ChannelConnection`] exists per logical channel and is reused across
//! connect/disconnect cycles. Each socket it opens is served by one spawned
//! task, tagged with a generation number; events from a socket that has since
//! been replaced or deliberately closed are discarded, so a late close can
//! never schedule a second reconnect and a superseded conversation's frames
//! never reach the handlers.
//!
//! Locking: `inner` is only held for bookkeeping, never across `.await` and
//! never while handlers run, so handlers may call back into the channel.

pub mod backoff;
pub mod connector;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{build_channel_url, SyncConfig};
use crate::dispatch::{handler, DispatchRegistry, Handler};
use crate::error::ErrorCode;
use crate::protocol::AuthFrame;
use crate::token::TokenStore;

use self::backoff::ReconnectPolicy;
use self::connector::{CloseInfo, Connector, Incoming, Outgoing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Chat-list updates; no identity key.
    List,
    /// One conversation's messages; keyed by conversation id.
    Message,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Message => f.write_str("message"),
        }
    }
}

/// Connection lifecycle, including the reconnection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// Waiting `delay_ms` before reconnect attempt `attempt`.
    Backoff { attempt: u32, delay_ms: u64 },
    /// Attempt budget exhausted; only a manual `connect()` recovers.
    GivenUp,
}

impl ChannelState {
    fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    /// `onUpdate` on the list channel, `onMessage` on the message channel.
    Inbound,
}

/// What the channel decided to do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Deliberate or credential close; nothing scheduled.
    None,
    Scheduled { attempt: u32, delay: Duration },
    /// Terminal; surfaced to the UI through this disconnect.
    GivenUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub close: CloseInfo,
    pub reconnect: Reconnect,
}

impl Disconnect {
    /// The server (or the channel) refused for lack of a credential.
    pub fn is_auth_failure(&self) -> bool {
        self.close.code == crate::error::CloseCode::NO_CREDENTIAL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected(Disconnect),
    /// Parsed inbound frame, uninterpreted, tagged with the identity key of
    /// the socket it arrived on.
    Inbound { identity: Option<u64>, payload: Value },
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connect,
            Self::Disconnected(_) => EventKind::Disconnect,
            Self::Inbound { .. } => EventKind::Inbound,
        }
    }
}

/// Timing knobs for a channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// `ws://host[:port]`, without the `/ws/chats/` path.
    pub ws_base: String,
    pub policy: ReconnectPolicy,
    /// Wait after open before the auth frame goes out.
    pub auth_settle: Duration,
}

impl ChannelOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            ws_base: config.ws_base(),
            policy: config.reconnect_policy(),
            auth_settle: config.auth_settle(),
        }
    }
}

/// Handle to one logical channel. Clones share the same connection.
#[derive(Clone)]
pub struct ChannelConnection {
    shared: Arc<Shared>,
}

struct Shared {
    kind: ChannelKind,
    options: ChannelOptions,
    tokens: Arc<dyn TokenStore>,
    connector: Arc<dyn Connector>,
    registry: DispatchRegistry<EventKind, ChannelEvent>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ChannelState>,
}

struct Inner {
    state: ChannelState,
    attempts: u32,
    identity: Option<u64>,
    generation: u64,
    socket: Option<SocketSlot>,
    reconnect_timer: Option<CancellationToken>,
}

/// The live socket handle. `outgoing` is filled in once the socket opens.
struct SocketSlot {
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    cancel: CancellationToken,
}

impl ChannelConnection {
    pub fn new(
        kind: ChannelKind,
        options: ChannelOptions,
        tokens: Arc<dyn TokenStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        let shared = Shared {
            kind,
            options,
            tokens,
            connector,
            registry: DispatchRegistry::new(),
            inner: Mutex::new(Inner {
                state: ChannelState::Idle,
                attempts: 0,
                identity: None,
                generation: 0,
                socket: None,
                reconnect_timer: None,
            }),
            state_tx,
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn kind(&self) -> ChannelKind {
        self.shared.kind
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Open the channel for `identity` (conversation id; `None` for the list).
    ///
    /// No-op while already connecting or open for the same identity. Otherwise
    /// any stale socket and pending reconnect are dropped, the attempt counter
    /// resets, and a fresh socket is opened in the background. Must be called
    /// from within a tokio runtime.
    pub fn connect(&self, identity: Option<u64>) -> &Self {
        if self.shared.kind == ChannelKind::Message && identity.is_none() {
            warn!(channel = %self.shared.kind, "connect ignored, no conversation id");
            return self;
        }
        if self.is_active_for(identity) {
            debug!(channel = %self.shared.kind, ?identity, "connect ignored, already active");
            return self;
        }

        self.disconnect();

        let mut inner = self.shared.inner.lock();
        if inner.state.is_active() && inner.identity == identity {
            return self;
        }
        inner.attempts = 0;
        inner.identity = identity;
        self.shared.open_socket(&mut inner);
        self
    }

    /// Close the socket with 1000 and cancel any pending reconnect.
    ///
    /// Safe to call repeatedly; without a live socket it only cancels timers.
    pub fn disconnect(&self) -> &Self {
        let closed_generation = {
            let mut inner = self.shared.inner.lock();
            let timer_cancelled = match inner.reconnect_timer.take() {
                Some(timer) => {
                    timer.cancel();
                    true
                }
                None => false,
            };
            match inner.socket.take() {
                Some(slot) => {
                    slot.cancel.cancel();
                    inner.generation += 1;
                    self.shared.set_state(&mut inner, ChannelState::Closing);
                    Some(inner.generation)
                }
                None => {
                    if timer_cancelled {
                        self.shared.set_state(&mut inner, ChannelState::Closed);
                    }
                    None
                }
            }
        };

        if let Some(generation) = closed_generation {
            info!(channel = %self.shared.kind, "disconnected");
            self.shared.dispatch(ChannelEvent::Disconnected(Disconnect {
                close: CloseInfo::normal(),
                reconnect: Reconnect::None,
            }));
            let mut inner = self.shared.inner.lock();
            if inner.generation == generation && inner.state == ChannelState::Closing {
                self.shared.set_state(&mut inner, ChannelState::Closed);
            }
        }
        self
    }

    /// Disconnect and drop every handler registration.
    pub fn dispose(&self) {
        self.disconnect();
        self.shared.registry.clear();
    }

    // -- Queries --------------------------------------------------------------

    /// True iff a socket handle exists and it is open.
    pub fn is_connected(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == ChannelState::Open
            && inner.socket.as_ref().is_some_and(|slot| slot.outgoing.is_some())
    }

    /// [`is_connected`](Self::is_connected) for a specific identity key.
    pub fn is_connected_to(&self, identity: Option<u64>) -> bool {
        self.is_connected() && self.identity() == identity
    }

    pub fn state(&self) -> ChannelState {
        self.shared.inner.lock().state
    }

    pub fn identity(&self) -> Option<u64> {
        self.shared.inner.lock().identity
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.inner.lock().attempts
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    fn is_active_for(&self, identity: Option<u64>) -> bool {
        let inner = self.shared.inner.lock();
        inner.state.is_active() && inner.identity == identity
    }

    // -- Outbound -------------------------------------------------------------

    /// Serialize `frame` and queue it on the open socket.
    pub fn send_json<T: Serialize>(&self, frame: &T) -> anyhow::Result<()> {
        let text = serde_json::to_string(frame)?;
        let inner = self.shared.inner.lock();
        let outgoing = inner
            .socket
            .as_ref()
            .filter(|_| inner.state == ChannelState::Open)
            .and_then(|slot| slot.outgoing.as_ref())
            .ok_or(ErrorCode::NotConnected)?;
        outgoing.send(Outgoing::Text(text)).map_err(|_| ErrorCode::Transport)?;
        Ok(())
    }

    // -- Handlers -------------------------------------------------------------

    pub fn register(&self, kind: EventKind, h: Handler<ChannelEvent>) -> &Self {
        self.shared.registry.register(kind, h);
        self
    }

    pub fn remove(&self, kind: EventKind, h: &Handler<ChannelEvent>) -> &Self {
        self.shared.registry.remove(kind, h);
        self
    }

    /// Register an `onConnect` callback; keep the returned handle to remove it.
    pub fn on_connect<F>(&self, f: F) -> Handler<ChannelEvent>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let h = handler(move |event: &ChannelEvent| match event {
            ChannelEvent::Connected => f(),
            _ => Ok(()),
        });
        self.register(EventKind::Connect, Arc::clone(&h));
        h
    }

    /// Register an `onDisconnect` callback.
    pub fn on_disconnect<F>(&self, f: F) -> Handler<ChannelEvent>
    where
        F: Fn(&Disconnect) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let h = handler(move |event: &ChannelEvent| match event {
            ChannelEvent::Disconnected(d) => f(d),
            _ => Ok(()),
        });
        self.register(EventKind::Disconnect, Arc::clone(&h));
        h
    }

    /// Register an inbound-frame callback (`onUpdate` / `onMessage`).
    pub fn on_inbound<F>(&self, f: F) -> Handler<ChannelEvent>
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let h = handler(move |event: &ChannelEvent| match event {
            ChannelEvent::Inbound { payload, .. } => f(payload),
            _ => Ok(()),
        });
        self.register(EventKind::Inbound, Arc::clone(&h));
        h
    }
}

impl fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("ChannelConnection")
            .field("kind", &self.shared.kind)
            .field("state", &inner.state)
            .field("identity", &inner.identity)
            .field("attempts", &inner.attempts)
            .finish()
    }
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: ChannelState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn dispatch(&self, event: ChannelEvent) {
        self.registry.dispatch(event.kind(), &event);
    }

    /// Identity key of the socket with `generation`, if it is still current.
    fn current_identity(&self, generation: u64) -> Option<Option<u64>> {
        let inner = self.inner.lock();
        match inner.socket.as_ref() {
            Some(slot) if slot.generation == generation => Some(inner.identity),
            _ => None,
        }
    }

    /// Start a socket task for the current identity. Caller holds the lock.
    fn open_socket(self: &Arc<Self>, inner: &mut Inner) {
        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();
        inner.socket = Some(SocketSlot { generation, outgoing: None, cancel: cancel.clone() });
        self.set_state(inner, ChannelState::Connecting);

        let url = build_channel_url(&self.options.ws_base, self.kind, inner.identity);
        info!(channel = %self.kind, %url, attempt = inner.attempts, "connecting");
        tokio::spawn(run_socket(Arc::clone(self), generation, url, cancel));
    }

    fn handle_open(&self, generation: u64, outgoing: mpsc::UnboundedSender<Outgoing>) -> bool {
        {
            let mut inner = self.inner.lock();
            match inner.socket.as_mut() {
                Some(slot) if slot.generation == generation => slot.outgoing = Some(outgoing),
                _ => return false,
            }
            inner.attempts = 0;
            self.set_state(&mut inner, ChannelState::Open);
        }
        info!(channel = %self.kind, "connection established");
        self.dispatch(ChannelEvent::Connected);
        true
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        let Some(identity) = self.current_identity(generation) else {
            return;
        };
        match serde_json::from_str::<Value>(text) {
            Ok(payload) => self.dispatch(ChannelEvent::Inbound { identity, payload }),
            Err(e) => {
                warn!(channel = %self.kind, code = %ErrorCode::Protocol, err = %e, "dropping unparseable frame");
            }
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64, close: CloseInfo) {
        let reconnect = {
            let mut inner = self.inner.lock();
            // Only the current socket may schedule a reconnect.
            match inner.socket.as_ref() {
                Some(slot) if slot.generation == generation => {}
                _ => return,
            }
            inner.socket = None;

            if !close.code.should_reconnect() {
                self.set_state(&mut inner, ChannelState::Closed);
                Reconnect::None
            } else {
                let attempt = inner.attempts + 1;
                match self.options.policy.delay_for(attempt) {
                    Some(delay) => {
                        inner.attempts = attempt;
                        let delay_ms = delay.as_millis() as u64;
                        self.set_state(&mut inner, ChannelState::Backoff { attempt, delay_ms });
                        let timer = CancellationToken::new();
                        inner.reconnect_timer = Some(timer.clone());
                        tokio::spawn(reconnect_after(Arc::clone(self), timer, delay));
                        Reconnect::Scheduled { attempt, delay }
                    }
                    None => {
                        self.set_state(&mut inner, ChannelState::GivenUp);
                        Reconnect::GivenUp
                    }
                }
            }
        };

        match reconnect {
            Reconnect::None => {
                info!(channel = %self.kind, code = %close.code, reason = %close.reason, "connection closed");
            }
            Reconnect::Scheduled { attempt, delay } => {
                info!(
                    channel = %self.kind,
                    code = %close.code,
                    attempt,
                    max = self.options.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "connection lost, reconnect scheduled"
                );
            }
            Reconnect::GivenUp => {
                error!(
                    channel = %self.kind,
                    code = %close.code,
                    max = self.options.policy.max_attempts,
                    "maximum reconnection attempts reached"
                );
            }
        }
        self.dispatch(ChannelEvent::Disconnected(Disconnect { close, reconnect }));
    }
}

/// Serve one socket from connect to close.
async fn run_socket(
    shared: Arc<Shared>,
    generation: u64,
    url: String,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        result = shared.connector.open(url) => result,
    };
    let mut socket = match opened {
        Ok(socket) => socket,
        Err(e) => {
            warn!(channel = %shared.kind, err = %e, "connect failed");
            shared.handle_close(generation, CloseInfo::abnormal(e.to_string()));
            return;
        }
    };

    if !shared.handle_open(generation, socket.outgoing.clone()) {
        let _ = socket.outgoing.send(Outgoing::Close(CloseInfo::normal()));
        return;
    }

    let auth_due = tokio::time::sleep(shared.options.auth_settle);
    tokio::pin!(auth_due);
    let mut authed = false;

    let close = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = socket.outgoing.send(Outgoing::Close(CloseInfo::normal()));
                return;
            }
            _ = &mut auth_due, if !authed => {
                authed = true;
                let Some(token) = shared.tokens.token() else {
                    error!(channel = %shared.kind, "no authentication token available");
                    let info = CloseInfo::no_credential();
                    let _ = socket.outgoing.send(Outgoing::Close(info.clone()));
                    break info;
                };
                match serde_json::to_string(&AuthFrame { token }) {
                    Ok(text) => {
                        let _ = socket.outgoing.send(Outgoing::Text(text));
                        debug!(channel = %shared.kind, "authentication token sent");
                    }
                    Err(e) => warn!(channel = %shared.kind, err = %e, "auth frame encode failed"),
                }
            }
            frame = socket.incoming.recv() => {
                match frame {
                    Some(Incoming::Text(text)) => shared.handle_frame(generation, &text),
                    Some(Incoming::Close(info)) => break info.unwrap_or_else(CloseInfo::no_status),
                    None => break CloseInfo::abnormal("connection dropped"),
                }
            }
        }
    };

    shared.handle_close(generation, close);
}

/// Sleep out a backoff delay, then reopen unless cancelled in the meantime.
async fn reconnect_after(shared: Arc<Shared>, timer: CancellationToken, delay: Duration) {
    tokio::select! {
        _ = timer.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let mut inner = shared.inner.lock();
    // Cancellation happens under the lock, so this check cannot race it.
    if timer.is_cancelled() {
        return;
    }
    inner.reconnect_timer = None;
    info!(channel = %shared.kind, attempt = inner.attempts, "reconnecting");
    shared.open_socket(&mut inner);
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
