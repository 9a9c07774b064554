// ── Credential provider contract ──
//
// The vendor login handshake lives outside this crate. Whatever performs
// it hands the resulting bearer credential in through `TokenProvider`;
// both API surfaces call it on demand (each REST request, each websocket
// connect), so a provider that refreshes behind the scenes just works.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// An opaque session token for the irrigation service.
///
/// Wraps [`SecretString`] so the credential never shows up in `Debug`
/// output or log lines.
#[derive(Debug, Clone)]
pub struct SessionToken(SecretString);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    /// Expose the raw token for header/handshake construction.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Supplies session tokens on demand.
///
/// Failure semantics: return [`Error::Authentication`] when a credential
/// cannot be produced and [`Error::SessionExpired`] when the provider
/// knows the session was revoked. Neither is retried blindly by this
/// crate -- refresh is the provider's responsibility.
pub trait TokenProvider: Send + Sync {
    fn session_token(&self) -> BoxFuture<'_, Result<SessionToken, Error>>;
}

/// A provider that always returns the same token.
///
/// Useful for tests and for hosts that manage the session externally
/// and re-create the client on refresh.
pub struct StaticToken(SessionToken);

impl StaticToken {
    pub fn new(raw: impl Into<String>) -> Arc<Self> {
        Arc::new(Self(SessionToken::new(raw)))
    }
}

impl TokenProvider for StaticToken {
    fn session_token(&self) -> BoxFuture<'_, Result<SessionToken, Error>> {
        Box::pin(future::ready(Ok(self.0.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_round_trips() {
        let provider = StaticToken::new("tok-123");
        let token = tokio_test::block_on(provider.session_token()).expect("token");
        assert_eq!(token.expose(), "tok-123");
    }

    #[test]
    fn token_debug_does_not_leak() {
        let token = SessionToken::new("super-secret");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
