// REST pull client
//
// Wraps `reqwest::Client` with service URL construction, per-request
// token injection, and status-to-error mapping. The push channel can
// lose messages across a disconnect; this is the authoritative
// full-state source the sync layer diffs against.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::token::TokenProvider;
use crate::transport::TransportConfig;
use crate::wire::{WireDevice, WireFullState, WireProgram};

/// Header carrying the bearer credential on every request.
const TOKEN_HEADER: &str = "session-token";

/// Raw HTTP client for the irrigation service's REST API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    provider: Arc<dyn TokenProvider>,
    timeout_secs: u64,
}

impl ApiClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the service root (e.g. `https://api.example.com`);
    /// endpoint paths are appended under `/v1/`.
    pub fn new(
        base_url: Url,
        provider: Arc<dyn TokenProvider>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            provider,
            timeout_secs: transport.timeout.as_secs(),
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url,
            provider,
            timeout_secs: TransportConfig::default().timeout.as_secs(),
        }
    }

    /// The service base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List all devices registered to the account, zones embedded.
    ///
    /// `GET /v1/devices`
    pub async fn fetch_devices(&self) -> Result<Vec<WireDevice>, Error> {
        let url = self.endpoint("devices")?;
        debug!("listing devices");
        self.get(url).await
    }

    /// List all watering programs across the account's devices.
    ///
    /// `GET /v1/watering_programs`
    pub async fn fetch_programs(&self) -> Result<Vec<WireProgram>, Error> {
        let url = self.endpoint("watering_programs")?;
        debug!("listing watering programs");
        self.get(url).await
    }

    /// Pull the full account state in one logical operation.
    ///
    /// Devices and programs are fetched in parallel; either failure
    /// fails the pull, so the sync layer never diffs a half-state.
    pub async fn fetch_full(&self) -> Result<WireFullState, Error> {
        let (devices, programs) = tokio::join!(self.fetch_devices(), self.fetch_programs());
        Ok(WireFullState {
            devices: devices?,
            programs: programs?,
        })
    }

    // ── Request plumbing ─────────────────────────────────────────────

    /// Build a full URL for a `/v1/{path}` endpoint.
    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/v1/{path}"))?)
    }

    /// Send a GET request with the session token attached.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        let token = self.provider.session_token().await?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(TOKEN_HEADER, token.expose())
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        parse_response(resp).await
    }

    /// Map a transport error, promoting client-side timeouts to the
    /// bounded-wait variant.
    fn map_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }

}

/// Map the response status, then deserialize the body.
async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::SessionExpired);
    }

    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            message,
            status: status.as_u16(),
        });
    }

    let body = resp.text().await.map_err(Error::Transport)?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}
