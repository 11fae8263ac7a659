// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn ts(s: &str) -> anyhow::Result<Timestamp> {
    Timestamp::parse(s).ok_or_else(|| anyhow::anyhow!("bad timestamp {s}"))
}

// ── Timestamp ─────────────────────────────────────────────────────────

#[yare::parameterized(
    space = { "2026-10-18 09:05:00" },
    space_fraction = { "2026-10-18 09:05:00.123456" },
    t_separated = { "2026-10-18T09:05:00" },
)]
fn timestamp_accepts_server_formats(raw: &str) {
    let parsed = Timestamp::parse(raw);
    assert!(parsed.is_some(), "failed to parse {raw}");
    assert_eq!(parsed.map(|t| t.format_time()), Some("09:05".to_owned()));
}

#[test]
fn timestamp_rejects_garbage() {
    assert!(Timestamp::parse("yesterday-ish").is_none());
    assert!(serde_json::from_str::<Timestamp>(r#""nope""#).is_err());
}

#[test]
fn timestamp_orders_chronologically() -> anyhow::Result<()> {
    assert!(ts("2026-10-18 09:05:00")? < ts("2026-10-18 09:05:00.5")?);
    assert!(ts("2026-10-17 23:59:59")? < ts("2026-10-18 00:00:00")?);
    Ok(())
}

#[test]
fn list_time_shows_clock_today_and_date_otherwise() -> anyhow::Result<()> {
    let today = NaiveDate::from_ymd_opt(2026, 10, 18).ok_or_else(|| anyhow::anyhow!("date"))?;
    assert_eq!(ts("2026-10-18 14:30:00")?.format_list_time(today), "14:30");
    assert_eq!(ts("2026-10-05 14:30:00")?.format_list_time(today), "Oct 5");
    Ok(())
}

// ── ConversationSummary ───────────────────────────────────────────────

#[test]
fn summary_deserializes_wire_shape() -> anyhow::Result<()> {
    let summary: ConversationSummary = serde_json::from_value(serde_json::json!({
        "id": 4,
        "type": "group",
        "display_name": "Ops",
        "unread_count": 2,
        "last_message": {
            "sender_username": "ana",
            "sender_name": "Ana",
            "text": "hi",
            "sent_at": "2026-10-18 10:00:00"
        }
    }))?;
    assert_eq!(summary.kind, ConversationType::Group);
    assert_eq!(summary.unread_count, 2);
    assert_eq!(summary.updated_at, 0);
    assert_eq!(summary.preview(), "hi");
    Ok(())
}

#[test]
fn title_falls_back_through_sender_and_id() -> anyhow::Result<()> {
    let mut summary: ConversationSummary = serde_json::from_value(serde_json::json!({
        "id": 9,
        "last_message": {
            "sender_username": "bo",
            "sender_name": "Bo",
            "text": "yo",
            "sent_at": "2026-10-18 10:00:00"
        }
    }))?;
    assert_eq!(summary.title(Some("me")), "Bo");
    assert_eq!(summary.title(Some("bo")), "Chat 9");

    summary.display_name = Some("Team".to_owned());
    assert_eq!(summary.title(Some("bo")), "Team");

    summary.last_message = None;
    summary.display_name = None;
    assert_eq!(summary.title(None), "Chat 9");
    assert_eq!(summary.preview(), "No messages yet");
    Ok(())
}

#[test]
fn message_accepts_rest_chat_alias() -> anyhow::Result<()> {
    let msg: Message = serde_json::from_value(serde_json::json!({
        "id": 1,
        "chat": 3,
        "sender_username": "ana",
        "text": "hello",
        "sent_at": "2026-10-18T08:00:00"
    }))?;
    assert_eq!(msg.conversation_id, 3);
    assert_eq!(msg.sender_name, "");
    Ok(())
}
