// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation: folding inbound server state into the canonical collections.
//!
//! Everything here is pure (callers pass the clock in) and is the only code
//! allowed to mutate the conversation list or a message list.
//!
//! Invariants maintained:
//! - the conversation list holds one entry per id, sorted by `updated_at`
//!   descending; each touch stamps a value strictly above every existing stamp;
//! - a message list holds one entry per id (first-seen copy wins), sorted by
//!   `sent_at` ascending with arrival order kept for equal timestamps.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::ErrorCode;
use crate::model::{ConversationId, ConversationSummary, Message};
use crate::protocol::{ListUpdate, MessagePayload};

/// Participant username → on-wire typing status, for the active conversation.
pub type TypingStatus = BTreeMap<String, String>;

// -- Conversation list -------------------------------------------------------

/// Effect of a successfully applied list update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Inserted(ConversationId),
    Updated(ConversationId),
}

/// Apply a raw list-channel payload. Payloads without an id are logged and
/// rejected with the list left untouched.
pub fn apply_list_update(
    list: &mut Vec<ConversationSummary>,
    payload: &Value,
    active: Option<ConversationId>,
    now_ms: u64,
) -> Result<ListChange, ErrorCode> {
    let update = match ListUpdate::decode(payload) {
        Ok(update) => update,
        Err(code) => {
            tracing::warn!(%code, %payload, "rejected list update");
            return Err(code);
        }
    };
    Ok(merge_list_update(list, update, active, now_ms))
}

/// Merge a decoded list update into `list`, then re-sort by recency.
pub fn merge_list_update(
    list: &mut Vec<ConversationSummary>,
    update: ListUpdate,
    active: Option<ConversationId>,
    now_ms: u64,
) -> ListChange {
    let stamp = fresh_stamp(list, now_ms);
    let is_active = active == Some(update.id);

    let change = match list.iter_mut().find(|c| c.id == update.id) {
        Some(existing) => {
            if let Some(last) = update.last_message {
                existing.last_message = Some(last);
            }
            if let Some(kind) = update.kind {
                existing.kind = kind;
            }
            if let Some(name) = update.display_name {
                existing.display_name = Some(name);
            }
            if is_active {
                existing.unread_count = 0;
            } else if let Some(unread) = update.unread_count {
                existing.unread_count = unread;
            }
            existing.updated_at = stamp;
            ListChange::Updated(update.id)
        }
        None => {
            list.push(ConversationSummary {
                id: update.id,
                display_name: update.display_name,
                kind: update.kind.unwrap_or_default(),
                last_message: update.last_message,
                unread_count: if is_active { 0 } else { update.unread_count.unwrap_or(0) },
                updated_at: stamp,
            });
            ListChange::Inserted(update.id)
        }
    };

    sort_by_recency(list);
    change
}

/// Fold a REST snapshot of the list into `list`.
///
/// The snapshot is deduplicated by id (first wins) and stamped from each last
/// message's send time so it sorts by activity. Local state the snapshot has
/// not caught up with survives: an entry whose last message is newer than the
/// snapshot's copy keeps its preview, unread count and stamp, and an entry
/// missing from the snapshot is kept if it was touched at or after
/// `requested_at_ms`, when the snapshot request went out.
pub fn replace_list(
    list: &mut Vec<ConversationSummary>,
    snapshot: Vec<ConversationSummary>,
    active: Option<ConversationId>,
    requested_at_ms: u64,
) {
    let mut seen = HashSet::new();
    let mut next: Vec<ConversationSummary> =
        snapshot.into_iter().filter(|c| seen.insert(c.id)).collect();
    for summary in &mut next {
        summary.updated_at = summary.last_message.as_ref().map_or(0, |m| m.sent_at.epoch_ms());
        if let Some(local) = list.iter().find(|c| c.id == summary.id) {
            if is_newer(local, summary) {
                summary.last_message.clone_from(&local.last_message);
                summary.unread_count = local.unread_count;
                summary.updated_at = summary.updated_at.max(local.updated_at);
            }
        }
        if active == Some(summary.id) {
            summary.unread_count = 0;
        }
    }
    next.extend(
        list.iter().filter(|c| !seen.contains(&c.id) && c.updated_at >= requested_at_ms).cloned(),
    );
    sort_by_recency(&mut next);
    *list = next;
}

fn is_newer(local: &ConversationSummary, remote: &ConversationSummary) -> bool {
    match (&local.last_message, &remote.last_message) {
        (Some(l), Some(r)) => l.sent_at > r.sent_at,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Zero the unread counter of the conversation the user just opened.
pub fn mark_read(list: &mut [ConversationSummary], id: ConversationId) {
    if let Some(summary) = list.iter_mut().find(|c| c.id == id) {
        summary.unread_count = 0;
    }
}

fn fresh_stamp(list: &[ConversationSummary], now_ms: u64) -> u64 {
    let newest = list.iter().map(|c| c.updated_at).max().unwrap_or(0);
    now_ms.max(newest.saturating_add(1))
}

fn sort_by_recency(list: &mut [ConversationSummary]) {
    list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

// -- Messages ----------------------------------------------------------------

/// Apply a message delivery for `conversation`.
///
/// Returns how many messages were not present before.
pub fn apply_incoming_messages(
    current: &mut Vec<Message>,
    conversation: ConversationId,
    payload: MessagePayload,
) -> usize {
    let previous: HashSet<_> = current.iter().map(|m| m.id).collect();

    match payload {
        MessagePayload::FullSync(items) => *current = items,
        MessagePayload::Incremental(item) => current.push(item),
    }
    for message in current.iter_mut() {
        message.conversation_id = conversation;
    }

    let mut seen = HashSet::new();
    current.retain(|m| seen.insert(m.id));
    current.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));

    current.iter().filter(|m| !previous.contains(&m.id)).count()
}

/// Apply a REST history for `conversation` as a full resync, keeping local
/// messages the history does not contain yet (delivered over the socket while
/// the request was in flight).
///
/// Returns how many messages were not present before.
pub fn merge_history(
    current: &mut Vec<Message>,
    conversation: ConversationId,
    history: Vec<Message>,
) -> usize {
    let fetched: HashSet<_> = history.iter().map(|m| m.id).collect();
    let mut items = history;
    items.extend(current.iter().filter(|m| !fetched.contains(&m.id)).cloned());
    apply_incoming_messages(current, conversation, MessagePayload::FullSync(items))
}

/// Record a participant's typing status, overwriting any previous value.
pub fn apply_typing(typing: &mut TypingStatus, username: String, status: String) {
    typing.insert(username, status);
}

// -- Display grouping --------------------------------------------------------

/// Messages sharing a calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateGroup<'a> {
    pub date: NaiveDate,
    /// `Today`, `Yesterday`, or e.g. `October 5, 2026`.
    pub label: String,
    pub messages: &'a [Message],
}

/// Lazy iterator over the day groups of a canonical (ascending) message list.
///
/// Borrows the list; a clone taken before consuming replays the same groups.
#[derive(Debug, Clone)]
pub struct DateGroups<'a> {
    rest: &'a [Message],
    today: NaiveDate,
}

/// Group consecutive messages by send date.
pub fn group_by_date(messages: &[Message], today: NaiveDate) -> DateGroups<'_> {
    DateGroups { rest: messages, today }
}

impl<'a> Iterator for DateGroups<'a> {
    type Item = DateGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.first()?;
        let date = first.sent_at.date();
        let len =
            self.rest.iter().position(|m| m.sent_at.date() != date).unwrap_or(self.rest.len());
        let (group, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(DateGroup { date, label: date_label(date, self.today), messages: group })
    }
}

/// Divider label for a day.
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_owned()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_owned()
    } else {
        date.format("%B %-d, %Y").to_string()
    }
}

/// Position of a message within a run of consecutive same-sender messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPosition {
    /// Neither neighbour shares the sender.
    Solo,
    First,
    Middle,
    Last,
}

/// Pair every message of a group with its run position.
pub fn mark_consecutive(messages: &[Message]) -> impl Iterator<Item = (&Message, RunPosition)> + '_ {
    messages.iter().enumerate().map(move |(i, m)| {
        let same = |other: Option<&Message>| other.is_some_and(|o| o.sender_username == m.sender_username);
        let prev = same(i.checked_sub(1).and_then(|j| messages.get(j)));
        let next = same(messages.get(i + 1));
        let position = match (prev, next) {
            (false, false) => RunPosition::Solo,
            (false, true) => RunPosition::First,
            (true, true) => RunPosition::Middle,
            (true, false) => RunPosition::Last,
        };
        (m, position)
    })
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
