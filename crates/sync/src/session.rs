// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat session: owns both channels and the canonical UI state.
//!
//! Channel handlers and REST results never touch [`ChatState`] directly. They
//! push a [`SyncInput`] onto one queue, and a single reconciliation task drains
//! it, so every mutation is serialized regardless of which socket or request
//! produced it. The UI observes changes through [`SessionEvent`]s and reads
//! state with [`ChatSession::snapshot`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::channel::connector::Connector;
use crate::channel::{
    ChannelConnection, ChannelEvent, ChannelKind, ChannelOptions, Disconnect, EventKind,
};
use crate::config::SyncConfig;
use crate::dispatch::handler;
use crate::error::{has_error_code, requires_login, ErrorCode};
use crate::model::{ConversationId, ConversationSummary, Message};
use crate::protocol::{MessageFrame, TypingState};
use crate::reconcile::{
    apply_incoming_messages, apply_list_update, apply_typing, mark_read, merge_history, replace_list,
    TypingStatus,
};
use crate::send::{SendCoordinator, SendRoute};
use crate::token::TokenStore;

/// Canonical client-side view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Sorted most recently touched first.
    pub conversations: Vec<ConversationSummary>,
    /// Messages of the active conversation, ascending by send time.
    pub messages: Vec<Message>,
    /// Typing status per participant of the active conversation.
    pub typing: TypingStatus,
    pub active: Option<ConversationId>,
}

impl ChatState {
    pub fn active_summary(&self) -> Option<&ConversationSummary> {
        let id = self.active?;
        self.conversations.iter().find(|c| c.id == id)
    }
}

/// Change notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ListChanged,
    MessagesChanged { conversation: ConversationId, added: usize },
    TypingChanged { conversation: Option<ConversationId> },
    ActiveChanged(Option<ConversationId>),
    ChannelUp(ChannelKind),
    ChannelDown { kind: ChannelKind, disconnect: Disconnect },
    /// REST answered 401; the token was cleared and the user must log in again.
    Unauthorized,
    SendFailed { conversation: ConversationId, reason: String },
}

/// Work item for the reconciliation task.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncInput {
    ListFrame(Value),
    /// REST list, with the time the request went out.
    ListSnapshot { conversations: Vec<ConversationSummary>, requested_at_ms: u64 },
    MessageFrame { conversation: Option<ConversationId>, payload: Value },
    History { conversation: ConversationId, messages: Vec<Message> },
    Activate(ConversationId),
    MessageChannelDown,
    Reset,
}

/// Apply one input to `state`, returning the events it produced.
pub fn reconcile(state: &mut ChatState, input: SyncInput, now_ms: u64) -> Vec<SessionEvent> {
    match input {
        SyncInput::ListFrame(payload) => {
            match apply_list_update(&mut state.conversations, &payload, state.active, now_ms) {
                Ok(_) => vec![SessionEvent::ListChanged],
                Err(_) => vec![],
            }
        }
        SyncInput::ListSnapshot { conversations, requested_at_ms } => {
            replace_list(&mut state.conversations, conversations, state.active, requested_at_ms);
            vec![SessionEvent::ListChanged]
        }
        SyncInput::MessageFrame { conversation, payload } => {
            let Some(conversation) = conversation.filter(|id| state.active == Some(*id)) else {
                debug!(?conversation, active = ?state.active, "dropping frame for inactive conversation");
                return vec![];
            };
            match MessageFrame::decode(&payload) {
                Ok(MessageFrame::Messages(delivery)) => {
                    let added = apply_incoming_messages(&mut state.messages, conversation, delivery);
                    vec![SessionEvent::MessagesChanged { conversation, added }]
                }
                Ok(MessageFrame::Typing { username, status }) => {
                    apply_typing(&mut state.typing, username, status);
                    vec![SessionEvent::TypingChanged { conversation: Some(conversation) }]
                }
                Err(code) => {
                    warn!(%code, conversation, %payload, "rejected message frame");
                    vec![]
                }
            }
        }
        SyncInput::History { conversation, messages } => {
            if state.active != Some(conversation) {
                debug!(conversation, "discarding history for inactive conversation");
                return vec![];
            }
            let added = merge_history(&mut state.messages, conversation, messages);
            vec![SessionEvent::MessagesChanged { conversation, added }]
        }
        SyncInput::Activate(id) => {
            if state.active == Some(id) {
                return vec![];
            }
            state.active = Some(id);
            state.messages.clear();
            state.typing.clear();
            mark_read(&mut state.conversations, id);
            vec![SessionEvent::ActiveChanged(Some(id)), SessionEvent::ListChanged]
        }
        SyncInput::MessageChannelDown => {
            if state.typing.is_empty() {
                return vec![];
            }
            state.typing.clear();
            vec![SessionEvent::TypingChanged { conversation: state.active }]
        }
        SyncInput::Reset => {
            *state = ChatState::default();
            vec![SessionEvent::ActiveChanged(None), SessionEvent::ListChanged]
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Handle to a running chat session. Clones share the session.
#[derive(Clone)]
pub struct ChatSession {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    state: Arc<RwLock<ChatState>>,
    list: ChannelConnection,
    messages: ChannelConnection,
    sender: SendCoordinator,
    api: Arc<dyn ChatApi>,
    tokens: Arc<dyn TokenStore>,
    username: RwLock<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
    input: mpsc::UnboundedSender<SyncInput>,
    list_poll: Option<Duration>,
    message_poll: Option<Duration>,
    shutdown: CancellationToken,
    /// Cancels the pollers of the current login; child of `shutdown`.
    pollers: Mutex<CancellationToken>,
}

impl ChatSession {
    /// Build the session and spawn its reconciliation task. Channels stay idle
    /// until [`start`](Self::start).
    pub fn new(
        config: &SyncConfig,
        tokens: Arc<dyn TokenStore>,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        let options = ChannelOptions::from_config(config);
        let list = ChannelConnection::new(
            ChannelKind::List,
            options.clone(),
            Arc::clone(&tokens),
            Arc::clone(&connector),
        );
        let messages =
            ChannelConnection::new(ChannelKind::Message, options, Arc::clone(&tokens), connector);
        let sender = SendCoordinator::new(messages.clone(), Arc::clone(&api), config.send_settle());

        let (events, _) = broadcast::channel(256);
        let (input, input_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ChatState::default()));
        let shutdown = CancellationToken::new();

        tokio::spawn(run_reconciler(
            Arc::clone(&state),
            input_rx,
            events.clone(),
            shutdown.clone(),
        ));

        let session = Self {
            shared: Arc::new(SessionShared {
                state,
                list,
                messages,
                sender,
                api,
                tokens,
                username: RwLock::new(None),
                events,
                input,
                list_poll: config.list_poll(),
                message_poll: config.message_poll(),
                pollers: Mutex::new(shutdown.child_token()),
                shutdown,
            }),
        };
        session.wire_channel(ChannelKind::List);
        session.wire_channel(ChannelKind::Message);
        session
    }

    fn channel(&self, kind: ChannelKind) -> &ChannelConnection {
        match kind {
            ChannelKind::List => &self.shared.list,
            ChannelKind::Message => &self.shared.messages,
        }
    }

    /// Route channel events into the queue and onto the event bus.
    fn wire_channel(&self, kind: ChannelKind) {
        let channel = self.channel(kind);
        let events = self.shared.events.clone();
        let input = self.shared.input.clone();

        let on_event = handler(move |event: &ChannelEvent| {
            match event {
                ChannelEvent::Connected => {
                    let _ = events.send(SessionEvent::ChannelUp(kind));
                }
                ChannelEvent::Disconnected(disconnect) => {
                    if kind == ChannelKind::Message {
                        input.send(SyncInput::MessageChannelDown)?;
                    }
                    let _ = events.send(SessionEvent::ChannelDown { kind, disconnect: disconnect.clone() });
                }
                ChannelEvent::Inbound { identity, payload } => {
                    let item = match kind {
                        ChannelKind::List => SyncInput::ListFrame(payload.clone()),
                        ChannelKind::Message => {
                            SyncInput::MessageFrame { conversation: *identity, payload: payload.clone() }
                        }
                    };
                    input.send(item)?;
                }
            }
            Ok(())
        });
        for event_kind in [EventKind::Connect, EventKind::Disconnect, EventKind::Inbound] {
            channel.register(event_kind, Arc::clone(&on_event));
        }
    }

    fn push(&self, item: SyncInput) {
        if self.shared.input.send(item).is_err() {
            debug!("reconciliation task gone, input dropped");
        }
    }

    // -- Observation ----------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ChatState {
        self.shared.state.read().clone()
    }

    pub fn active(&self) -> Option<ConversationId> {
        self.shared.state.read().active
    }

    pub fn list_channel(&self) -> &ChannelConnection {
        &self.shared.list
    }

    pub fn message_channel(&self) -> &ChannelConnection {
        &self.shared.messages
    }

    /// Username used for outbound typing frames.
    pub fn set_username(&self, username: Option<String>) {
        *self.shared.username.write() = username;
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Open the list channel, load the list, and activate the first
    /// conversation when none is active yet.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.shared.list.connect(None);
        let snapshot = self.refresh_list().await?;
        if self.active().is_none() {
            if let Some(first) = snapshot.first() {
                self.select_conversation(first.id).await?;
            }
        }
        self.spawn_pollers();
        Ok(())
    }

    /// Re-fetch the conversation list over REST and replace local state with it.
    pub async fn refresh_list(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        let requested_at_ms = epoch_ms();
        match self.shared.api.list_chats().await {
            Ok(list) => {
                debug!(count = list.len(), "conversation list fetched");
                self.push(SyncInput::ListSnapshot { conversations: list.clone(), requested_at_ms });
                Ok(list)
            }
            Err(e) => {
                self.handle_api_error(&e);
                Err(e)
            }
        }
    }

    /// Make `id` the active conversation: switch the message channel to it and
    /// load its history as a full resync.
    pub async fn select_conversation(&self, id: ConversationId) -> anyhow::Result<()> {
        info!(conversation = id, "selecting conversation");
        self.push(SyncInput::Activate(id));
        self.shared.messages.connect(Some(id));
        self.load_history(id).await
    }

    /// Fetch the full history of `id`; applied only if `id` is still active.
    pub async fn load_history(&self, id: ConversationId) -> anyhow::Result<()> {
        match self.shared.api.fetch_messages(id).await {
            Ok(messages) => {
                self.push(SyncInput::History { conversation: id, messages });
                Ok(())
            }
            Err(e) => {
                self.handle_api_error(&e);
                Err(e)
            }
        }
    }

    /// Send `text` to the active conversation.
    pub async fn send_message(&self, text: &str) -> anyhow::Result<SendRoute> {
        let Some(conversation) = self.active() else {
            return Err(anyhow::Error::new(ErrorCode::NotConnected).context("no active conversation"));
        };
        match self.shared.sender.send(text, conversation).await {
            Ok(route) => {
                if let SendRoute::Rest(history) = &route {
                    self.push(SyncInput::History { conversation, messages: history.clone() });
                }
                Ok(route)
            }
            Err(e) => {
                if !has_error_code(&e, ErrorCode::EmptyMessage) {
                    self.handle_api_error(&e);
                    let _ = self.shared.events.send(SessionEvent::SendFailed {
                        conversation,
                        reason: format!("{e:#}"),
                    });
                }
                Err(e)
            }
        }
    }

    /// Publish the user's typing state on the active conversation.
    pub fn set_typing(&self, state: TypingState) -> bool {
        let Some(username) = self.shared.username.read().clone() else {
            return false;
        };
        self.shared.sender.send_typing(state, &username)
    }

    /// Clear the credential, close both channels and empty the state.
    pub fn logout(&self) {
        info!("logging out");
        self.shared.pollers.lock().cancel();
        self.shared.tokens.set_token(None);
        self.shared.list.disconnect();
        self.shared.messages.disconnect();
        self.push(SyncInput::Reset);
    }

    /// Stop pollers and the reconciliation task and release both channels.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.list.dispose();
        self.shared.messages.dispose();
    }

    fn handle_api_error(&self, err: &anyhow::Error) {
        if requires_login(err) {
            warn!(err = %err, "credential rejected by server");
            self.logout();
            let _ = self.shared.events.send(SessionEvent::Unauthorized);
        } else {
            warn!(err = %err, "request failed");
        }
    }

    /// Start the pollers for this login, replacing any from an earlier `start`.
    fn spawn_pollers(&self) {
        let cancel = self.shared.shutdown.child_token();
        std::mem::replace(&mut *self.shared.pollers.lock(), cancel.clone()).cancel();

        if let Some(every) = self.shared.list_poll {
            let session = self.clone();
            tokio::spawn(poll(every, cancel.clone(), move || {
                let session = session.clone();
                async move {
                    session.refresh_list().await?;
                    Ok(())
                }
            }));
        }
        if let Some(every) = self.shared.message_poll {
            let session = self.clone();
            tokio::spawn(poll(every, cancel, move || {
                let session = session.clone();
                async move {
                    match session.active() {
                        Some(id) => session.load_history(id).await,
                        None => Ok(()),
                    }
                }
            }));
        }
    }
}

/// Run `tick` every `every` until cancelled. The first run happens one
/// interval after start; failures are logged and polling continues.
async fn poll<F, Fut>(every: Duration, cancel: CancellationToken, tick: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = tick().await {
            debug!(err = %e, "poll failed");
        }
    }
}

async fn run_reconciler(
    state: Arc<RwLock<ChatState>>,
    mut input: mpsc::UnboundedReceiver<SyncInput>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = input.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let produced = reconcile(&mut state.write(), item, epoch_ms());
        for event in produced {
            let _ = events.send(event);
        }
    }
    debug!("reconciliation task stopped");
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
