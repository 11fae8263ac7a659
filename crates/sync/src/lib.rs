// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat sync: real-time synchronization core for a chat client.
//!
//! Two socket channels (conversation list and active conversation) plus a REST
//! client feed a single reconciliation task that owns the client-side state.

pub mod api;
pub mod channel;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod protocol;
pub mod reconcile;
pub mod send;
pub mod session;
pub mod test_support;
pub mod token;

use std::sync::Arc;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::RestClient;
use crate::channel::connector::TungsteniteConnector;
use crate::config::SyncConfig;
use crate::console::{parse_command, render_event, render_list, render_messages, Command};
use crate::model::ConversationId;
use crate::protocol::TypingState;
use crate::session::{ChatSession, SessionEvent};
use crate::token::{MemoryTokenStore, TokenStore};

/// Username/password pair for the token endpoint.
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Inputs to [`run`] that live on the binary's CLI rather than in [`SyncConfig`].
#[derive(Default)]
pub struct RunOptions {
    /// Used when no token is configured.
    pub credentials: Option<Credentials>,
    /// Conversation to open instead of the most recent one.
    pub conversation: Option<ConversationId>,
}

/// Run an interactive session on stdin/stdout until `/quit`, EOF, ctrl-c or
/// the server rejects the credential.
pub async fn run(config: SyncConfig, options: RunOptions) -> anyhow::Result<()> {
    let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new(config.token.clone()));
    let api = Arc::new(RestClient::from_config(&config, Arc::clone(&tokens)));

    if tokens.token().is_none() {
        let Some(ref creds) = options.credentials else {
            anyhow::bail!("no token configured and no credentials to log in with");
        };
        api.login(&creds.username, &creds.password).await?;
    }
    let me = api.current_user().await?;
    info!(server = %config.server, username = %me.username, "authenticated");

    let session = ChatSession::new(&config, tokens, Arc::new(TungsteniteConnector), api);
    session.set_username(Some(me.username.clone()));

    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_events(session.clone(), session.subscribe(), me.username.clone(), cancel.clone()));

    session.start().await?;
    if let Some(id) = options.conversation {
        session.select_conversation(id).await?;
    }
    print_lines(render_list(&session.snapshot(), Some(&me.username), Local::now().date_naive()));
    print_lines(render_messages(&session.snapshot().messages, Local::now().date_naive()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e:#}");
                continue;
            }
        };
        match command {
            Command::Quit => break,
            Command::Send(text) => {
                // Failures are reported through SessionEvent::SendFailed.
                if let Ok(route) = session.send_message(&text).await {
                    debug!(?route, "message sent");
                }
            }
            Command::Typing => {
                session.set_typing(TypingState::Typing);
            }
            Command::Idle => {
                session.set_typing(TypingState::Idle);
            }
            Command::List => {
                let today = Local::now().date_naive();
                print_lines(render_list(&session.snapshot(), Some(&me.username), today));
            }
            Command::Open(id) => match session.select_conversation(id).await {
                Ok(()) => {
                    print_lines(render_messages(&session.snapshot().messages, Local::now().date_naive()))
                }
                Err(e) => warn!(conversation = id, "open failed: {e:#}"),
            },
        }
    }

    session.shutdown();
    cancel.cancel();
    let _ = printer.await;
    info!("session closed");
    Ok(())
}

async fn print_events(
    session: ChatSession,
    mut events: broadcast::Receiver<SessionEvent>,
    me: String,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "event printer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        debug!(?event, "session event");
        if let Some(line) = render_event(&event, &session.snapshot(), Some(&me)) {
            println!("{line}");
        }
        if event == SessionEvent::Unauthorized {
            cancel.cancel();
        }
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
