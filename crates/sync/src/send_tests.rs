// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::channel::backoff::ReconnectPolicy;
use crate::channel::{ChannelKind, ChannelOptions};
use crate::error::{error_code, has_error_code};
use crate::test_support::{FakeApi, MemoryConnector, ServerEnd};
use crate::token::MemoryTokenStore;

struct Harness {
    coordinator: SendCoordinator,
    channel: ChannelConnection,
    connector: Arc<MemoryConnector>,
    servers: UnboundedReceiver<ServerEnd>,
    api: Arc<FakeApi>,
}

fn harness() -> Harness {
    let (connector, servers) = MemoryConnector::new();
    let options = ChannelOptions {
        ws_base: "ws://chat.test".to_owned(),
        policy: ReconnectPolicy::default(),
        auth_settle: Duration::from_millis(50),
    };
    let tokens = Arc::new(MemoryTokenStore::new(Some("tok".to_owned())));
    let channel = ChannelConnection::new(ChannelKind::Message, options, tokens, connector.clone());
    let api = FakeApi::new();
    let coordinator = SendCoordinator::new(channel.clone(), api.clone(), Duration::from_millis(1000));
    Harness { coordinator, channel, connector, servers, api }
}

async fn open(h: &mut Harness, conversation: ConversationId) -> anyhow::Result<ServerEnd> {
    h.channel.connect(Some(conversation));
    let mut server = h.servers.recv().await.ok_or_else(|| anyhow::anyhow!("no socket"))?;
    assert_eq!(server.recv_json().await?, json!({"token": "tok"}));
    Ok(server)
}

#[tokio::test(start_paused = true)]
async fn blank_text_is_rejected_without_side_effects() -> anyhow::Result<()> {
    let h = harness();
    let err = h.coordinator.send("   ", 3).await.err();
    assert_eq!(err.as_ref().and_then(error_code), Some(ErrorCode::EmptyMessage));
    assert_eq!(h.connector.opens(), 0);
    assert!(h.api.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn open_socket_sends_directly() -> anyhow::Result<()> {
    let mut h = harness();
    let mut server = open(&mut h, 3).await?;

    assert_eq!(h.coordinator.send("hello", 3).await?, SendRoute::Socket);
    assert_eq!(server.recv_json().await?, json!({"chat_id": 3, "text": "hello"}));
    assert!(h.api.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn closed_socket_connects_then_sends() -> anyhow::Result<()> {
    let mut h = harness();

    let send = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.send("hello", 4).await }
    });
    let mut server = h.servers.recv().await.ok_or_else(|| anyhow::anyhow!("no socket"))?;
    assert_eq!(server.url, "ws://chat.test/ws/chats/4/");

    assert_eq!(send.await??, SendRoute::SocketAfterConnect);
    assert_eq!(server.recv_json().await?, json!({"token": "tok"}));
    assert_eq!(server.recv_json().await?, json!({"chat_id": 4, "text": "hello"}));
    assert!(h.api.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn socket_for_other_conversation_is_switched() -> anyhow::Result<()> {
    let mut h = harness();
    let _old = open(&mut h, 1).await?;

    let send = tokio::spawn({
        let coordinator = h.coordinator.clone();
        async move { coordinator.send("over here", 2).await }
    });
    let mut server = h.servers.recv().await.ok_or_else(|| anyhow::anyhow!("no socket"))?;
    assert_eq!(send.await??, SendRoute::SocketAfterConnect);
    server.recv_json().await?; // auth
    assert_eq!(server.recv_json().await?, json!({"chat_id": 2, "text": "over here"}));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unreachable_socket_falls_back_to_rest() -> anyhow::Result<()> {
    let h = harness();
    h.connector.refuse_next(u32::MAX);

    let route = h.coordinator.send("via rest", 5).await?;
    let SendRoute::Rest(history) = route else {
        anyhow::bail!("expected REST route, got {route:?}");
    };
    assert_eq!(history.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["via rest"]);
    assert_eq!(h.api.sent(), vec![(5, "via rest".to_owned())]);
    assert_eq!(h.api.calls(), vec!["send_message:5".to_owned(), "fetch_messages:5".to_owned()]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failure_surfaces_only_when_rest_also_fails() -> anyhow::Result<()> {
    let h = harness();
    h.connector.refuse_next(u32::MAX);
    h.api.fail_with(Some(ErrorCode::Unauthorized));

    let err = h.coordinator.send("lost", 5).await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("send should fail"))?;
    assert_eq!(error_code(&err), Some(ErrorCode::SendFailed));
    assert!(has_error_code(&err, ErrorCode::Unauthorized));
    assert!(h.api.sent().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn typing_is_fire_and_forget() -> anyhow::Result<()> {
    let mut h = harness();
    assert!(!h.coordinator.send_typing(TypingState::Typing, "ana"));
    assert_eq!(h.connector.opens(), 0);

    let mut server = open(&mut h, 3).await?;
    assert!(h.coordinator.send_typing(TypingState::Typing, "ana"));
    assert!(h.coordinator.send_typing(TypingState::Idle, "ana"));
    assert_eq!(server.recv_json().await?, json!({"typing_status": "typing ...", "username": "ana"}));
    assert_eq!(
        server.recv_json().await?,
        json!({"typing_status": "last seen recently", "username": "ana"})
    );
    Ok(())
}
