// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use serde_json::json;

use super::*;
use crate::model::{ConversationType, Timestamp};

fn base_time() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 18)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap_or_default()
}

fn msg(id: u64, offset_secs: i64, sender: &str) -> Message {
    Message {
        id,
        conversation_id: 0,
        sender_username: sender.to_owned(),
        sender_name: sender.to_uppercase(),
        text: format!("m{id}"),
        sent_at: Timestamp(base_time() + Duration::seconds(offset_secs)),
    }
}

fn ids(messages: &[Message]) -> Vec<u64> {
    messages.iter().map(|m| m.id).collect()
}

fn list_ids(list: &[ConversationSummary]) -> Vec<u64> {
    list.iter().map(|c| c.id).collect()
}

fn update(id: u64, unread: u32) -> Value {
    json!({
        "id": id,
        "type": "private",
        "unread_count": unread,
        "last_message": {
            "sender_username": "ana",
            "sender_name": "Ana",
            "text": format!("about {id}"),
            "sent_at": "2026-10-18 09:00:00"
        }
    })
}

// ── apply_list_update ─────────────────────────────────────────────────

#[test]
fn list_update_inserts_then_updates() -> anyhow::Result<()> {
    let mut list = vec![];
    assert_eq!(apply_list_update(&mut list, &update(1, 2), None, 100)?, ListChange::Inserted(1));
    assert_eq!(apply_list_update(&mut list, &update(1, 5), None, 100)?, ListChange::Updated(1));
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].unread_count, 5);
    Ok(())
}

#[test]
fn most_recently_touched_floats_to_top() -> anyhow::Result<()> {
    let mut list = vec![];
    for id in [10, 2, 7] {
        apply_list_update(&mut list, &update(id, 0), None, 1_000)?;
    }
    assert_eq!(list_ids(&list), vec![7, 2, 10]);

    apply_list_update(&mut list, &update(10, 1), None, 1_000)?;
    assert_eq!(list_ids(&list), vec![10, 7, 2]);
    Ok(())
}

#[test]
fn active_conversation_unread_is_suppressed() -> anyhow::Result<()> {
    let mut list = vec![];
    apply_list_update(&mut list, &update(3, 9), Some(3), 1)?;
    assert_eq!(list[0].unread_count, 0);

    apply_list_update(&mut list, &update(3, 4), Some(3), 2)?;
    assert_eq!(list[0].unread_count, 0);

    apply_list_update(&mut list, &update(3, 4), Some(8), 3)?;
    assert_eq!(list[0].unread_count, 4);
    Ok(())
}

#[test]
fn display_name_only_overwritten_when_present() -> anyhow::Result<()> {
    let mut list = vec![];
    apply_list_update(&mut list, &json!({"id": 1, "display_name": "Team", "type": "group"}), None, 1)?;
    apply_list_update(&mut list, &json!({"id": 1, "unread_count": 1}), None, 2)?;
    assert_eq!(list[0].display_name.as_deref(), Some("Team"));
    assert_eq!(list[0].kind, ConversationType::Group);

    apply_list_update(&mut list, &json!({"id": 1, "display_name": "Renamed"}), None, 3)?;
    assert_eq!(list[0].display_name.as_deref(), Some("Renamed"));
    Ok(())
}

#[test]
fn list_update_without_id_leaves_state_unchanged() -> anyhow::Result<()> {
    let mut list = vec![];
    apply_list_update(&mut list, &update(1, 0), None, 1)?;
    let before = list.clone();

    let result = apply_list_update(&mut list, &json!({"unread_count": 3}), None, 2);
    assert_eq!(result, Err(ErrorCode::InvalidPayload));
    assert_eq!(list, before);
    Ok(())
}

#[test]
fn stamps_stay_monotonic_when_clock_stalls() -> anyhow::Result<()> {
    let mut list = vec![];
    apply_list_update(&mut list, &update(1, 0), None, 500)?;
    apply_list_update(&mut list, &update(2, 0), None, 400)?;
    assert!(list[0].updated_at > list[1].updated_at);
    assert_eq!(list[0].id, 2);
    Ok(())
}

// ── replace_list / mark_read ──────────────────────────────────────────

#[test]
fn replace_list_sorts_snapshot_by_last_activity() -> anyhow::Result<()> {
    let snapshot: Vec<ConversationSummary> = serde_json::from_value(json!([
        {"id": 1, "unread_count": 2, "last_message": {"sender_username": "a", "text": "x", "sent_at": "2026-10-17 09:00:00"}},
        {"id": 2, "unread_count": 2, "last_message": {"sender_username": "a", "text": "x", "sent_at": "2026-10-18 09:00:00"}},
        {"id": 3},
        {"id": 1, "unread_count": 99},
    ]))?;
    let mut list = vec![];
    replace_list(&mut list, snapshot, Some(2), 0);

    assert_eq!(list_ids(&list), vec![2, 1, 3]);
    assert_eq!(list[0].unread_count, 0);
    assert_eq!(list[1].unread_count, 2);

    mark_read(&mut list, 1);
    assert_eq!(list[1].unread_count, 0);
    Ok(())
}

fn summary_at(id: u64, text: &str, sent_at: &str, unread: u32, updated_at: u64) -> anyhow::Result<ConversationSummary> {
    let mut summary: ConversationSummary = serde_json::from_value(json!({
        "id": id,
        "unread_count": unread,
        "last_message": {"sender_username": "bo", "text": text, "sent_at": sent_at}
    }))?;
    summary.updated_at = updated_at;
    Ok(summary)
}

#[test]
fn replace_list_keeps_newer_local_entries() -> anyhow::Result<()> {
    let mut list = vec![
        summary_at(7, "newest", "2026-10-18 09:05:00", 4, 2_000)?,
        summary_at(8, "older", "2026-10-18 07:00:00", 1, 100)?,
    ];
    let snapshot = vec![
        summary_at(7, "hi", "2026-10-18 09:00:00", 1, 0)?,
        summary_at(8, "caught up", "2026-10-18 08:00:00", 2, 0)?,
    ];
    replace_list(&mut list, snapshot, None, 1_000);

    assert_eq!(list_ids(&list), vec![7, 8]);
    assert_eq!((list[0].preview(), list[0].unread_count), ("newest", 4));
    assert_eq!((list[1].preview(), list[1].unread_count), ("caught up", 2));
    Ok(())
}

#[test]
fn replace_list_keeps_only_recently_touched_missing_entries() -> anyhow::Result<()> {
    let mut list = vec![
        summary_at(3, "socket only", "2026-10-18 09:00:00", 1, 5_000)?,
        summary_at(4, "deleted", "2026-10-18 09:00:00", 0, 10)?,
    ];
    replace_list(&mut list, vec![], None, 1_000);
    assert_eq!(list_ids(&list), vec![3]);
    Ok(())
}

#[test]
fn history_merge_keeps_local_only_messages() {
    let mut messages = vec![msg(2, 20, "bo"), msg(5, 50, "ana")];
    let added = merge_history(&mut messages, 1, vec![msg(1, 10, "bo"), msg(2, 20, "bo")]);
    assert_eq!(ids(&messages), vec![1, 2, 5]);
    assert_eq!(added, 1);
    assert!(messages.iter().all(|m| m.conversation_id == 1));
}

// ── apply_incoming_messages ───────────────────────────────────────────

#[test]
fn incremental_then_full_sync_converges() {
    let mut messages = vec![];
    apply_incoming_messages(&mut messages, 5, MessagePayload::Incremental(msg(1, 1, "a")));
    apply_incoming_messages(&mut messages, 5, MessagePayload::Incremental(msg(2, 2, "b")));
    let added = apply_incoming_messages(
        &mut messages,
        5,
        MessagePayload::FullSync(vec![msg(1, 1, "a"), msg(2, 2, "b"), msg(3, 3, "a")]),
    );

    assert_eq!(ids(&messages), vec![1, 2, 3]);
    assert_eq!(added, 1);
    assert!(messages.iter().all(|m| m.conversation_id == 5));
}

#[test]
fn redelivery_keeps_first_seen_copy() {
    let mut messages = vec![msg(1, 1, "a")];
    let mut edited = msg(1, 1, "a");
    edited.text = "changed".to_owned();

    let added = apply_incoming_messages(&mut messages, 5, MessagePayload::Incremental(edited));
    assert_eq!(added, 0);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "m1");
}

#[test]
fn full_sync_dedups_within_payload() {
    let mut messages = vec![msg(9, 0, "z")];
    let mut dup = msg(2, 5, "b");
    dup.text = "second copy".to_owned();
    apply_incoming_messages(
        &mut messages,
        1,
        MessagePayload::FullSync(vec![msg(2, 5, "b"), dup, msg(1, 1, "a")]),
    );

    assert_eq!(ids(&messages), vec![1, 2]);
    assert_eq!(messages[1].text, "m2");
}

#[test]
fn out_of_order_delivery_self_corrects() {
    let mut messages = vec![];
    for (id, offset) in [(3, 30), (1, 10), (2, 20)] {
        apply_incoming_messages(&mut messages, 1, MessagePayload::Incremental(msg(id, offset, "a")));
    }
    assert_eq!(ids(&messages), vec![1, 2, 3]);
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut messages = vec![];
    for id in [5, 4, 6] {
        apply_incoming_messages(&mut messages, 1, MessagePayload::Incremental(msg(id, 0, "a")));
    }
    assert_eq!(ids(&messages), vec![5, 4, 6]);
}

#[test]
fn typing_overwrites_per_participant() {
    let mut typing = TypingStatus::new();
    apply_typing(&mut typing, "bo".to_owned(), "typing ...".to_owned());
    apply_typing(&mut typing, "bo".to_owned(), "last seen recently".to_owned());
    assert_eq!(typing.len(), 1);
    assert_eq!(typing.get("bo").map(String::as_str), Some("last seen recently"));
}

// ── group_by_date ─────────────────────────────────────────────────────

#[test]
fn groups_are_labelled_relative_to_today() {
    let day = 24 * 3600;
    let messages = vec![msg(1, -3 * day, "a"), msg(2, -day, "a"), msg(3, -day + 60, "b"), msg(4, 0, "a")];
    let today = base_time().date();

    let groups: Vec<_> = group_by_date(&messages, today).collect();
    let labels: Vec<_> = groups.iter().map(|g| g.label.as_str()).collect();
    assert_eq!(labels, vec!["October 15, 2026", "Yesterday", "Today"]);
    assert_eq!(ids(groups[1].messages), vec![2, 3]);
}

#[test]
fn grouping_is_restartable() {
    let messages = vec![msg(1, 0, "a"), msg(2, 1, "a")];
    let groups = group_by_date(&messages, base_time().date());
    let replay = groups.clone();
    assert_eq!(groups.count(), 1);
    assert_eq!(replay.count(), 1);
    assert_eq!(group_by_date(&[], base_time().date()).count(), 0);
}

// ── mark_consecutive ──────────────────────────────────────────────────

#[test]
fn consecutive_runs_are_marked() {
    let messages =
        vec![msg(1, 0, "a"), msg(2, 1, "a"), msg(3, 2, "a"), msg(4, 3, "b"), msg(5, 4, "a"), msg(6, 5, "a")];
    let positions: Vec<_> = mark_consecutive(&messages).map(|(_, p)| p).collect();
    assert_eq!(
        positions,
        vec![
            RunPosition::First,
            RunPosition::Middle,
            RunPosition::Last,
            RunPosition::Solo,
            RunPosition::First,
            RunPosition::Last,
        ]
    );
}

// ── properties ────────────────────────────────────────────────────────

fn payload_strategy() -> impl Strategy<Value = MessagePayload> {
    let item = (0u64..20, 0i64..50).prop_map(|(id, offset)| msg(id, offset, "p"));
    prop_oneof![
        item.clone().prop_map(MessagePayload::Incremental),
        prop::collection::vec(item, 0..12).prop_map(MessagePayload::FullSync),
    ]
}

proptest! {
    /// Every id appears once and sent_at never decreases, whatever the mix of payloads.
    #[test]
    fn prop_messages_unique_and_ordered(payloads in prop::collection::vec(payload_strategy(), 0..30)) {
        let mut messages = vec![];
        for payload in payloads {
            apply_incoming_messages(&mut messages, 1, payload);

            let mut seen = HashSet::new();
            prop_assert!(messages.iter().all(|m| seen.insert(m.id)));
            prop_assert!(messages.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
        }
    }

    /// The list stays recency-sorted with one entry per distinct id seen.
    #[test]
    fn prop_list_recency(updates in prop::collection::vec((0u64..15, 0u32..5, 0u64..1000), 0..40)) {
        let mut list = vec![];
        let mut distinct = HashSet::new();
        for (id, unread, now) in updates {
            distinct.insert(id);
            prop_assert!(apply_list_update(&mut list, &update(id, unread), Some(0), now).is_ok());
            prop_assert_eq!(list.first().map(|c| c.id), Some(id));
        }
        prop_assert_eq!(list.len(), distinct.len());
        prop_assert!(list.windows(2).all(|w| w[0].updated_at > w[1].updated_at));
        prop_assert!(list.iter().filter(|c| c.id == 0).all(|c| c.unread_count == 0));
    }
}
