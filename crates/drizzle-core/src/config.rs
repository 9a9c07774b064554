// ── Runtime connection configuration ──
//
// These types describe *how* to reach the irrigation service. They
// carry connection tuning only and never touch disk -- the host builds
// a `ControllerConfig` and hands it in. Credentials travel separately,
// through the `TokenProvider` the host supplies.

use std::time::Duration;

use drizzle_api::ReconnectConfig;
use url::Url;

/// Configuration for a single controller connection.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// REST base URL (e.g., `https://api.example.com`).
    pub base_url: Url,
    /// Websocket event endpoint (e.g., `wss://api.example.com/v1/events`).
    pub ws_url: Url,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Bounded wait for outbound push-channel sends.
    pub send_timeout: Duration,
    /// How often to run the belt-and-suspenders full poll (seconds).
    /// Runs regardless of push-channel health. 0 = never.
    pub poll_interval_secs: u64,
    /// Enable the websocket push channel.
    pub websocket_enabled: bool,
    /// Push-channel reconnect tuning.
    pub reconnect: ReconnectConfig,
}

impl ControllerConfig {
    /// Build a config with default tuning for the given endpoints.
    pub fn new(base_url: Url, ws_url: Url) -> Self {
        Self {
            base_url,
            ws_url,
            timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            poll_interval_secs: 300,
            websocket_enabled: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}
