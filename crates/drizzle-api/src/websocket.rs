//! Websocket event stream with auto-reconnect.
//!
//! Connects to the irrigation service's event endpoint and streams
//! decoded [`WireEvent`]s through a [`tokio::sync::broadcast`] channel.
//! Handles reconnection with exponential backoff + jitter, sends the
//! post-connect hello carrying the session token, and keeps the
//! connection alive with periodic application-level pings.
//!
//! The channel is bidirectional: [`PushClient::send`] delivers outbound
//! command messages over the same socket with a bounded wait. The
//! stream never replays messages missed during an outage -- each
//! reconnect bumps a connection-epoch counter so the sync layer knows
//! to repair the gap with a full pull.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::token::TokenProvider;
use crate::wire::{WireCommand, WireEvent};

// ── Channel capacities ───────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,

    /// A connection held open at least this long resets the attempt
    /// counter, so a flap after an hour online starts backoff from the
    /// base delay again. Default: 60s.
    pub sustained_open: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
            sustained_open: Duration::from_secs(60),
        }
    }
}

// ── PushConfig ───────────────────────────────────────────────────────

/// Configuration for the push channel.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Websocket endpoint, e.g. `wss://api.example.com/v1/events`.
    pub ws_url: Url,

    pub reconnect: ReconnectConfig,

    /// Application-level ping cadence; the service drops connections
    /// that stay silent. Default: 25s.
    pub ping_interval: Duration,

    /// Bounded wait for an outbound send to be written to the socket.
    pub send_timeout: Duration,
}

impl PushConfig {
    pub fn new(ws_url: Url) -> Self {
        Self {
            ws_url,
            reconnect: ReconnectConfig::default(),
            ping_interval: Duration::from_secs(25),
            send_timeout: Duration::from_secs(5),
        }
    }
}

// ── PushClient ───────────────────────────────────────────────────────

/// An outbound command waiting for the writer to pick it up.
struct Outbound {
    command: WireCommand,
    ack: oneshot::Sender<Result<(), Error>>,
}

/// Handle to a running push-channel task.
pub struct PushClient {
    event_tx: broadcast::Sender<Arc<WireEvent>>,
    outbound_tx: mpsc::Sender<Outbound>,
    connected: watch::Receiver<bool>,
    epoch: watch::Receiver<u64>,
    cancel: CancellationToken,
    send_timeout: Duration,
}

impl PushClient {
    /// Spawn the reconnection loop and return a handle to it.
    ///
    /// Returns immediately; the first connection attempt happens
    /// asynchronously. Subscribe to the event receiver and the epoch
    /// watch before relying on either.
    pub fn connect(
        config: PushConfig,
        provider: Arc<dyn TokenProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (connected_tx, connected) = watch::channel(false);
        let (epoch_tx, epoch) = watch::channel(0u64);
        let send_timeout = config.send_timeout;

        let task_cancel = cancel.clone();
        let task_events = event_tx.clone();
        tokio::spawn(async move {
            ws_loop(
                config,
                provider,
                task_events,
                outbound_rx,
                connected_tx,
                epoch_tx,
                task_cancel,
            )
            .await;
        });

        Self {
            event_tx,
            outbound_tx,
            connected,
            epoch,
            cancel,
            send_timeout,
        }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// Multiple consumers can subscribe concurrently. If a consumer
    /// falls behind, it receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<WireEvent>> {
        self.event_tx.subscribe()
    }

    /// Watch the connection-epoch counter.
    ///
    /// Bumped once per successful (re)connect. A change means messages
    /// may have been missed and a full reconciliation pull is due.
    pub fn connection_epochs(&self) -> watch::Receiver<u64> {
        self.epoch.clone()
    }

    /// Whether the channel is currently open.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch connection up/down transitions.
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Deliver a command over the push channel.
    ///
    /// Resolves once the message has been written to the socket. Fails
    /// with [`Error::ChannelClosed`] when no connection is open and
    /// [`Error::Timeout`] when the bounded wait expires. Never retried
    /// internally.
    pub async fn send(&self, command: WireCommand) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ChannelClosed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound_tx
            .send(Outbound { command, ack: ack_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        match tokio::time::timeout(self.send_timeout, ack_rx).await {
            Err(_) => Err(Error::Timeout {
                timeout_secs: self.send_timeout.as_secs(),
            }),
            // Writer dropped the envelope: connection went down mid-send.
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read/write → on error, backoff → reconnect.
async fn ws_loop(
    config: PushConfig,
    provider: Arc<dyn TokenProvider>,
    event_tx: broadcast::Sender<Arc<WireEvent>>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    connected_tx: watch::Sender<bool>,
    epoch_tx: watch::Sender<u64>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let mut opened: Option<Instant> = None;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = run_connection(
                &config,
                provider.as_ref(),
                &event_tx,
                &mut outbound_rx,
                &connected_tx,
                &epoch_tx,
                &cancel,
                &mut opened,
            ) => {
                let _ = connected_tx.send(false);
                drain_outbound(&mut outbound_rx);

                match result {
                    // Clean disconnect (server close frame or stream ended).
                    // Reset attempt counter and reconnect immediately.
                    Ok(()) => {
                        tracing::info!("event stream disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        // A long-lived connection that finally dropped is not
                        // part of a failure streak.
                        if opened.is_some_and(|t| t.elapsed() >= config.reconnect.sustained_open) {
                            attempt = 0;
                        }

                        tracing::warn!(error = %e, attempt, "event stream error");

                        if let Some(max) = config.reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "event stream reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &config.reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    let _ = connected_tx.send(false);
    drain_outbound(&mut outbound_rx);
    tracing::debug!("event stream loop exiting");
}

/// Fail any queued outbound messages; nothing survives a disconnect.
fn drain_outbound(outbound_rx: &mut mpsc::Receiver<Outbound>) {
    while let Ok(out) = outbound_rx.try_recv() {
        let _ = out.ack.send(Err(Error::ChannelClosed));
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one connection, run the hello handshake, then pump frames
/// in both directions until the socket drops.
#[allow(clippy::too_many_arguments)]
async fn run_connection(
    config: &PushConfig,
    provider: &dyn TokenProvider,
    event_tx: &broadcast::Sender<Arc<WireEvent>>,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    connected_tx: &watch::Sender<bool>,
    epoch_tx: &watch::Sender<u64>,
    cancel: &CancellationToken,
    opened: &mut Option<Instant>,
) -> Result<(), Error> {
    let token = provider.session_token().await?;

    tracing::info!(url = %config.ws_url, "connecting to event stream");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(config.ws_url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    // The service expects an app-connection hello carrying the session
    // token before it will deliver events.
    let hello = json!({
        "event": "app_connection",
        "session_token": token.expose(),
    });
    write
        .send(tungstenite::Message::Text(hello.to_string().into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("event stream connected");
    epoch_tx.send_modify(|e| *e += 1);
    let _ = connected_tx.send(true);
    *opened = Some(Instant::now());

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            outbound = outbound_rx.recv() => {
                // Sender side dropped: the client handle is gone, so stop
                // reconnecting altogether.
                let Some(out) = outbound else {
                    cancel.cancel();
                    return Ok(());
                };
                write_command(&mut write, out).await?;
            }
            _ = ping.tick() => {
                let payload = json!({ "event": "ping" }).to_string();
                if let Err(e) = write.send(tungstenite::Message::Text(payload.into())).await {
                    return Err(Error::WebSocketConnect(e.to_string()));
                }
                tracing::trace!("sent keepalive ping");
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        decode_and_broadcast(&text, event_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("event stream ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "event stream close frame received"
                            );
                        } else {
                            tracing::info!("event stream close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("event stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Serialize and write one outbound command, acking the caller.
async fn write_command<S>(write: &mut S, out: Outbound) -> Result<(), Error>
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let payload = match serde_json::to_string(&out.command) {
        Ok(p) => p,
        Err(e) => {
            let _ = out.ack.send(Err(Error::Deserialization {
                message: e.to_string(),
                body: String::new(),
            }));
            return Ok(());
        }
    };

    match write.send(tungstenite::Message::Text(payload.into())).await {
        Ok(()) => {
            let _ = out.ack.send(Ok(()));
            Ok(())
        }
        Err(e) => {
            let reason = e.to_string();
            let _ = out.ack.send(Err(Error::WebSocketConnect(reason.clone())));
            Err(Error::WebSocketConnect(reason))
        }
    }
}

// ── Message decoding ─────────────────────────────────────────────────

/// Decode one text frame and broadcast the event.
///
/// Decode failures never tear the connection down: unknown kinds are
/// skipped with a log line (the service adds kinds faster than clients
/// update), malformed frames likewise.
fn decode_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<WireEvent>>) {
    match WireEvent::decode(text) {
        Ok(event) => {
            // Ignore send errors -- just means no active subscribers right now
            let _ = event_tx.send(Arc::new(event));
        }
        Err(Error::UnknownEventKind(kind)) => {
            tracing::debug!(kind, "skipping unknown event kind");
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to decode event frame");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    // Not cryptographically random, but good enough for backoff spread.
    let jitter_factor = 1.0 + 0.25 * ((f64::from(attempt) * 7.3).sin());
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::token::StaticToken;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        // Each step should roughly double (within jitter bounds)
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..ReconnectConfig::default()
        };

        let d10 = calculate_backoff(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn decode_and_broadcast_known_event() {
        let (tx, mut rx) = broadcast::channel(16);

        let raw = serde_json::json!({
            "event": "watering_complete",
            "device_id": "dev-1",
        });

        decode_and_broadcast(&raw.to_string(), &tx);

        let event = rx.try_recv().unwrap();
        assert!(matches!(
            event.as_ref(),
            WireEvent::WateringComplete { device_id, .. } if device_id == "dev-1"
        ));
    }

    #[test]
    fn decode_and_broadcast_skips_unknown_kind() {
        let (tx, mut rx) = broadcast::channel::<Arc<WireEvent>>(16);

        let raw = serde_json::json!({ "event": "firmware_gossip", "device_id": "dev-1" });
        decode_and_broadcast(&raw.to_string(), &tx);

        // Should not panic, should just log and skip
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn decode_and_broadcast_skips_malformed_frame() {
        let (tx, mut rx) = broadcast::channel::<Arc<WireEvent>>(16);

        decode_and_broadcast("not json at all", &tx);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_fails_fast_when_disconnected() {
        let config = PushConfig::new("wss://127.0.0.1:1/v1/events".parse().unwrap());
        let client = PushClient::connect(config, StaticToken::new("tok"), CancellationToken::new());

        let err = client
            .send(WireCommand::RainDelay {
                device_id: "dev-1".into(),
                delay: 24,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ChannelClosed));
        client.shutdown();
    }
}
