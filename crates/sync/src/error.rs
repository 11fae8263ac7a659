// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the sync core.
///
/// Fallible operations return `anyhow::Result`; when the failure belongs to one
/// of these classes the code itself is the error value, so callers can recover
/// it with `err.downcast_ref::<ErrorCode>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Socket dropped or could not be opened.
    Transport,
    /// Inbound frame was not valid JSON.
    Protocol,
    /// No credential available, or the server rejected it.
    Unauthorized,
    /// Channel is not open for the requested operation.
    NotConnected,
    /// Payload parsed but lacks a required field or has the wrong shape.
    InvalidPayload,
    /// Outbound message was empty after trimming.
    EmptyMessage,
    /// Both the socket and the REST fallback failed.
    SendFailed,
    /// REST collaborator answered with an unexpected status.
    Upstream,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Protocol => "PROTOCOL",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::SendFailed => "SEND_FAILED",
            Self::Upstream => "UPSTREAM",
            Self::Internal => "INTERNAL",
        }
    }

    /// Map an HTTP status from the REST collaborator to an error code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            400 | 422 => Self::InvalidPayload,
            500..=599 => Self::Upstream,
            _ => Self::Internal,
        }
    }

    /// Whether this failure should force the user to re-authenticate.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

/// Extract the [`ErrorCode`] carried by an `anyhow` error, either as the error
/// itself, as attached context, or anywhere in its source chain.
pub fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.downcast_ref::<ErrorCode>()
        .copied()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<ErrorCode>().copied()))
}

/// Whether `code` appears anywhere in the error, including beneath other codes.
pub fn has_error_code(err: &anyhow::Error, code: ErrorCode) -> bool {
    err.downcast_ref::<ErrorCode>() == Some(&code)
        || err.chain().any(|cause| cause.downcast_ref::<ErrorCode>() == Some(&code))
}

/// Whether any code carried by the error forces the user to log in again.
pub fn requires_login(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ErrorCode>().is_some_and(ErrorCode::requires_login)
        || err.chain().filter_map(|cause| cause.downcast_ref::<ErrorCode>()).any(ErrorCode::requires_login)
}

/// WebSocket close code as seen by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Deliberate local close. Never reconnects.
    pub const NORMAL: Self = Self(1000);
    /// Close frame without a status code.
    pub const NO_STATUS: Self = Self(1005);
    /// Transport dropped without a close frame, or the connect attempt failed.
    pub const ABNORMAL: Self = Self(1006);
    /// No bearer token available for the auth frame. Never reconnects.
    pub const NO_CREDENTIAL: Self = Self(4001);

    /// Whether a close with this code should trigger the reconnection policy.
    pub fn should_reconnect(&self) -> bool {
        *self != Self::NORMAL && *self != Self::NO_CREDENTIAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
