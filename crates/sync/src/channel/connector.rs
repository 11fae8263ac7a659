// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket transport seam.
//!
//! A [`Connector`] opens one socket and hands back a pair of queues; the
//! channel never touches the WebSocket stream directly. The production
//! connector pumps a `tokio-tungstenite` stream; tests substitute an in-memory
//! one (see `test_support`).

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::CloseCode;

/// Close code plus human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    /// Deliberate local close.
    pub fn normal() -> Self {
        Self::new(CloseCode::NORMAL, "Disconnecting normally")
    }

    /// Transport loss or failed connect.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::ABNORMAL, reason)
    }

    pub fn no_credential() -> Self {
        Self::new(CloseCode::NO_CREDENTIAL, "No authentication token available")
    }

    pub fn no_status() -> Self {
        Self::new(CloseCode::NO_STATUS, "")
    }
}

/// Frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Server close frame; `None` when it carried no status.
    Close(Option<CloseInfo>),
}

/// Frame to send to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close(CloseInfo),
}

/// An open socket, as a pair of queues.
///
/// `incoming` ending without a [`Incoming::Close`] means the transport dropped.
/// Dropping `outgoing` closes the socket.
pub struct Socket {
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    pub incoming: mpsc::UnboundedReceiver<Incoming>,
}

/// Opens sockets for channels.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: String) -> Pin<Box<dyn Future<Output = anyhow::Result<Socket>> + Send>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn open(&self, url: String) -> Pin<Box<dyn Future<Output = anyhow::Result<Socket>> + Send>> {
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws_stream, out_rx, in_tx, url));
            Ok(Socket { outgoing: out_tx, incoming: in_rx })
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Shuttle frames between the WebSocket stream and the socket queues until
/// either side closes.
async fn pump(
    ws_stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    incoming: mpsc::UnboundedSender<Incoming>,
    url: String,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => {
                match out {
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            tracing::debug!(%url, err = %e, "ws write failed");
                            break;
                        }
                    }
                    Some(Outgoing::Close(info)) => {
                        let frame = CloseFrame {
                            code: WsCloseCode::from(info.code.0),
                            reason: info.reason.into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if incoming.send(Incoming::Text(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let info = frame.map(|f| {
                            CloseInfo::new(CloseCode(u16::from(f.code)), f.reason.to_string())
                        });
                        let _ = incoming.send(Incoming::Close(info));
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(%url, "ignoring binary frame");
                    }
                    Some(Ok(_)) => {} // ping/pong handled by tungstenite
                    Some(Err(e)) => {
                        tracing::debug!(%url, err = %e, "ws read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
