// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer credential store.
//!
//! The sync core only ever reads the token (on every connect/auth attempt and
//! every REST request). Writing happens at login and logout.

use parking_lot::RwLock;

/// Get/set primitive over the current bearer token.
pub trait TokenStore: Send + Sync + 'static {
    /// Current token, or `None` if the user is logged out.
    fn token(&self) -> Option<String>;

    /// Replace the stored token; `None` clears it.
    fn set_token(&self, token: Option<String>);
}

/// Session-scoped in-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self { token: RwLock::new(token.filter(|t| !t.trim().is_empty())) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.write() = token.filter(|t| !t.trim().is_empty());
    }
}
