// ── Core error types ──
//
// User-facing errors from drizzle-core. These are NOT transport-specific --
// consumers never see HTTP status codes or websocket close frames directly.
// The `From<drizzle_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the irrigation service: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Controller is not connected")]
    Disconnected,

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Caller errors ────────────────────────────────────────────────
    /// A command referenced an id absent from the current snapshot.
    /// Surfaced immediately and never retried.
    #[error("Unknown {kind}: {identifier}")]
    UnknownEntity { kind: &'static str, identifier: String },

    /// A projection was requested over an empty or inverted window.
    #[error("Invalid projection window: {start} .. {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    // ── Service errors ───────────────────────────────────────────────
    #[error("Service error (HTTP {status}): {message}")]
    Api { message: String, status: u16 },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<drizzle_api::Error> for CoreError {
    fn from(err: drizzle_api::Error) -> Self {
        match err {
            drizzle_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            drizzle_api::Error::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            drizzle_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map_or(0, |s| s.as_u16()),
                    }
                }
            }
            drizzle_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            drizzle_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            drizzle_api::Error::Api { message, status } => CoreError::Api { message, status },
            drizzle_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("event stream connection failed: {reason}"),
            },
            drizzle_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("event stream closed (code {code}): {reason}"),
            },
            drizzle_api::Error::ChannelClosed => CoreError::Disconnected,
            drizzle_api::Error::UnknownEventKind(kind) => {
                CoreError::Internal(format!("unknown event kind crossed the boundary: {kind}"))
            }
            drizzle_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
