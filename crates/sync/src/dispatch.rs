// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered observer registry keyed by event kind.
//!
//! Handlers are reference-counted closures; a registration is identified by
//! the `Arc` itself, so removal compares pointers rather than closure bodies.
//! Dispatch snapshots the handler list before invoking anything, which lets a
//! handler register or remove handlers (including itself) without deadlocking.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// A registered callback. Returning `Err` is logged and does not stop dispatch.
///
/// Handlers must not panic. Channel handlers run on the socket task, and a
/// panic there ends the task with the channel still marked open. Panics are
/// not caught: release builds abort on panic.
pub type Handler<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<T, F>(f: F) -> Handler<T>
where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Per-kind ordered handler lists.
pub struct DispatchRegistry<K, T> {
    handlers: Mutex<HashMap<K, Vec<Handler<T>>>>,
}

impl<K, T> DispatchRegistry<K, T>
where
    K: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self { handlers: Mutex::new(HashMap::new()) }
    }

    /// Append `handler` to the list for `kind`.
    ///
    /// Registering the same `Arc` twice makes it run twice per dispatch.
    pub fn register(&self, kind: K, handler: Handler<T>) {
        self.handlers.lock().entry(kind).or_default().push(handler);
    }

    /// Remove every registration of `handler` under `kind`. Returns how many were removed.
    pub fn remove(&self, kind: K, handler: &Handler<T>) -> usize {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return 0;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        before - list.len()
    }

    /// Invoke the handlers registered for `kind`, in registration order.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn dispatch(&self, kind: K, payload: &T) -> usize {
        let snapshot: Vec<Handler<T>> =
            self.handlers.lock().get(&kind).map(|list| list.to_vec()).unwrap_or_default();

        let mut ok = 0;
        for (index, h) in snapshot.iter().enumerate() {
            match h(payload) {
                Ok(()) => ok += 1,
                Err(e) => {
                    tracing::warn!(kind = ?kind, index, err = %e, "event handler failed");
                }
            }
        }
        ok
    }

    pub fn len(&self, kind: K) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().values().all(Vec::is_empty)
    }

    /// Drop every registration of every kind.
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

impl<K, T> Default for DispatchRegistry<K, T>
where
    K: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
