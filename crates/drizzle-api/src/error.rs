use thiserror::Error;

/// Top-level error type for the `drizzle-api` crate.
///
/// Covers every failure mode across both API surfaces: the REST pull
/// path and the websocket push channel. `drizzle-core` maps these into
/// user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The credential provider could not produce a session token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session token rejected by the service (expired or revoked).
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Bounded wait exceeded (request or outbound send).
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success response from the service.
    #[error("API error (HTTP {status}): {message}")]
    Api { message: String, status: u16 },

    // ── Push channel ────────────────────────────────────────────────
    /// Websocket connection failed.
    #[error("Event stream connection failed: {0}")]
    WebSocketConnect(String),

    /// Websocket closed unexpectedly.
    #[error("Event stream closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Outbound send attempted while no connection is open.
    #[error("Event stream is not connected")]
    ChannelClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// Inbound message carried an event kind this client does not know.
    /// Non-fatal: callers log and skip rather than tearing the stream down.
    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::ChannelClosed => true,
            _ => false,
        }
    }
}
