// ── Controller abstraction ──
//
// Full lifecycle management for one cloud irrigation account. Handles
// the initial full pull, background synchronization (push deltas,
// reconnect repair, periodic poll), command routing, and reactive
// change notification through the StateStore.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drizzle_api::{ApiClient, PushClient, PushConfig, TokenProvider, TransportConfig};

use crate::command::{plan, Command, CommandEnvelope, CommandResult};
use crate::config::ControllerConfig;
use crate::convert;
use crate::error::CoreError;
use crate::model::WateringOccurrence;
use crate::projector;
use crate::store::{ChangeSet, Snapshot, StateStore};
use crate::stream::ChangeStream;

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The push channel dropped; deltas are paused while the backoff
    /// loop re-establishes it. Polling still repairs state meanwhile.
    Reconnecting,
    Failed,
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns the store and
/// every background task; nothing survives [`disconnect`](Self::disconnect).
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    provider: Arc<dyn TokenProvider>,
    store: Arc<StateStore>,
    connection_state: watch::Sender<ConnectionState>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    api: Mutex<Option<Arc<ApiClient>>>,
    push: Mutex<Option<Arc<PushClient>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a new Controller from configuration. Does NOT connect --
    /// call [`connect()`](Self::connect) to pull state and start background tasks.
    pub fn new(config: ControllerConfig, provider: Arc<dyn TokenProvider>) -> Self {
        let store = Arc::new(StateStore::new());
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        Self {
            inner: Arc::new(ControllerInner {
                config,
                provider,
                store,
                connection_state,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                api: Mutex::new(None),
                push: Mutex::new(None),
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Access the controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Access the underlying StateStore.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.inner.store
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the service.
    ///
    /// Performs the initial full pull, then spawns background tasks
    /// (push-channel sync, periodic poll, command processor).
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        let config = &self.inner.config;
        let transport = TransportConfig {
            timeout: config.timeout,
            ..TransportConfig::default()
        };

        let api = match ApiClient::new(
            config.base_url.clone(),
            Arc::clone(&self.inner.provider),
            &transport,
        ) {
            Ok(api) => Arc::new(api),
            Err(e) => {
                let _ = self.inner.connection_state.send(ConnectionState::Failed);
                return Err(e.into());
            }
        };

        // Initial data load -- the store starts authoritative.
        let pulled = match api.fetch_full().await {
            Ok(pulled) => pulled,
            Err(e) => {
                let _ = self.inner.connection_state.send(ConnectionState::Failed);
                return Err(e.into());
            }
        };
        self.inner.store.apply_full(convert::full_state(&pulled));

        *self.inner.api.lock().await = Some(Arc::clone(&api));

        // Spawn background tasks
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            let ctrl = self.clone();
            handles.push(tokio::spawn(command_processor_task(ctrl, rx)));
        }

        let push = if config.websocket_enabled {
            let push_config = PushConfig {
                ws_url: config.ws_url.clone(),
                reconnect: config.reconnect.clone(),
                send_timeout: config.send_timeout,
                ..PushConfig::new(config.ws_url.clone())
            };
            let push = Arc::new(PushClient::connect(
                push_config,
                Arc::clone(&self.inner.provider),
                self.inner.cancel.child_token(),
            ));
            *self.inner.push.lock().await = Some(Arc::clone(&push));
            Some(push)
        } else {
            None
        };

        {
            let ctrl = self.clone();
            handles.push(tokio::spawn(sync_task(ctrl, api, push)));
        }

        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        info!(
            devices = self.inner.store.snapshot().device_count(),
            programs = self.inner.store.snapshot().program_count(),
            "connected to irrigation service"
        );
        Ok(())
    }

    /// Disconnect from the service.
    ///
    /// Cancels background tasks, closes the push channel, and resets
    /// the connection state to [`Disconnected`](ConnectionState::Disconnected).
    /// The store and its last snapshot remain readable.
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();

        // Join all background tasks
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        *self.inner.push.lock().await = None;
        *self.inner.api.lock().await = None;
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command against the service.
    ///
    /// Validates ids against the current snapshot, applies the
    /// optimistic update, and resolves once the outbound message is
    /// accepted for transmission. Confirmation arrives asynchronously
    /// as a delta event.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.connection_state.borrow() != ConnectionState::Connected {
            return Err(CoreError::Disconnected);
        }

        let (tx, rx) = oneshot::channel();

        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::Disconnected)?;

        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Open a zone for `run_time`, or close it with `None`.
    pub async fn set_zone_run(
        &self,
        zone_id: impl Into<crate::model::EntityId>,
        run_time: Option<Duration>,
    ) -> Result<CommandResult, CoreError> {
        self.execute(Command::SetZoneRun { zone_id: zone_id.into(), run_time }).await
    }

    /// Delay all watering on a device; 0 hours clears the delay.
    pub async fn set_rain_delay(
        &self,
        device_id: impl Into<crate::model::EntityId>,
        hours: u32,
    ) -> Result<CommandResult, CoreError> {
        self.execute(Command::SetRainDelay { device_id: device_id.into(), hours }).await
    }

    /// Enable or disable a program.
    pub async fn set_program_enabled(
        &self,
        program_id: impl Into<crate::model::EntityId>,
        enabled: bool,
    ) -> Result<CommandResult, CoreError> {
        self.execute(Command::SetProgramEnabled { program_id: program_id.into(), enabled }).await
    }

    /// Run a program immediately.
    pub async fn start_program(
        &self,
        program_id: impl Into<crate::model::EntityId>,
    ) -> Result<CommandResult, CoreError> {
        self.execute(Command::StartProgram { program_id: program_id.into() }).await
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// The current snapshot (wait-free).
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.store.snapshot()
    }

    /// Subscribe to changed-id notifications.
    pub fn changes(&self) -> tokio::sync::broadcast::Receiver<ChangeSet> {
        self.inner.store.changes()
    }

    /// Changed-id notifications as a `Stream`.
    pub fn change_stream(&self) -> ChangeStream {
        ChangeStream::new(self.inner.store.changes())
    }

    // ── Calendar projection ──────────────────────────────────────

    /// Project a program's watering occurrences over `[start, end)`.
    ///
    /// Reads one snapshot and computes from it; concurrent store
    /// mutations cannot tear the result.
    pub fn project_calendar(
        &self,
        program_id: &crate::model::EntityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WateringOccurrence>, CoreError> {
        let snapshot = self.inner.store.snapshot();
        let program = snapshot.program(program_id).ok_or_else(|| CoreError::UnknownEntity {
            kind: "program",
            identifier: program_id.to_string(),
        })?;
        let zones = snapshot.zones_of(&program.device_id);

        Ok(projector::project(&program, &zones, start, end)?.collect())
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// The single consumer of every state-mutating path.
///
/// Push deltas, reconnect-triggered reconciles, and the periodic poll
/// all run in this one task, so a delta can never interleave with a
/// reconciliation: events that arrive while a pull is in flight wait in
/// the broadcast channel and replay afterwards, against the new snapshot.
async fn sync_task(
    controller: Controller,
    api: Arc<ApiClient>,
    push: Option<Arc<PushClient>>,
) {
    let cancel = controller.inner.cancel.clone();
    let store = Arc::clone(&controller.inner.store);

    let poll_secs = controller.inner.config.poll_interval_secs;
    let poll_enabled = poll_secs > 0;
    let mut poll = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
    poll.tick().await; // consume the immediate first tick

    let (mut events, mut epochs, mut link) = match push {
        Some(ref push) => (
            Some(push.subscribe()),
            Some(push.connection_epochs()),
            Some(push.connected_watch()),
        ),
        None => (None, None, None),
    };
    // The connect-time pull already covered the first epoch.
    if let Some(ref mut epochs) = epochs {
        epochs.mark_unchanged();
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,

            // Reconciliation outranks delta application: after a reconnect
            // the full pull lands first, and deltas that queued up while it
            // was in flight replay afterwards, against the new snapshot.
            changed = epoch_changed(&mut epochs) => {
                match changed {
                    Ok(()) => {
                        // Messages in flight during the outage are unrecoverable
                        // from the push channel; diff against a fresh pull.
                        info!("push channel (re)connected, reconciling");
                        full_refresh(&api, &store).await;
                    }
                    // Push loop gone (shutdown or retry limit); stop watching.
                    Err(_) => epochs = None,
                }
            }

            event = recv_event(&mut events) => {
                match event {
                    Ok(event) => {
                        if let Some(delta) = convert::delta(&event, Utc::now()) {
                            store.apply_delta(delta);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event stream lagged, repairing with a full pull");
                        full_refresh(&api, &store).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("event stream closed");
                        events = None;
                    }
                }
            }

            changed = link_changed(&mut link) => {
                match changed {
                    Ok(()) => {
                        let connected = link.as_mut().is_some_and(|l| *l.borrow_and_update());
                        let state = if connected {
                            ConnectionState::Connected
                        } else {
                            ConnectionState::Reconnecting
                        };
                        let _ = controller.inner.connection_state.send(state);
                    }
                    Err(_) => link = None,
                }
            }

            _ = poll.tick(), if poll_enabled => {
                debug!("periodic poll");
                full_refresh(&api, &store).await;
            }
        }
    }
}

async fn recv_event(
    events: &mut Option<tokio::sync::broadcast::Receiver<Arc<drizzle_api::wire::WireEvent>>>,
) -> Result<Arc<drizzle_api::wire::WireEvent>, tokio::sync::broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn epoch_changed(epochs: &mut Option<watch::Receiver<u64>>) -> Result<(), watch::error::RecvError> {
    match epochs {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

async fn link_changed(link: &mut Option<watch::Receiver<bool>>) -> Result<(), watch::error::RecvError> {
    match link {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

/// Pull everything and reconcile. Failures are logged, not fatal: the
/// next poll or reconnect tries again.
async fn full_refresh(api: &ApiClient, store: &StateStore) {
    match api.fetch_full().await {
        Ok(pulled) => {
            let changes = store.apply_full(convert::full_state(&pulled));
            debug!(
                changed = changes.changed.len(),
                removed = changes.removed.len(),
                "refresh complete"
            );
        }
        Err(e) => warn!(error = %e, "full refresh failed"),
    }
}

/// Process commands from the mpsc channel.
async fn command_processor_task(controller: Controller, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = controller.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&controller, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

/// Plan, apply optimistically, transmit.
async fn route_command(controller: &Controller, cmd: Command) -> Result<CommandResult, CoreError> {
    let store = &controller.inner.store;
    let command_plan = plan(&store.snapshot(), &cmd, Utc::now())?;

    // Collapsed onto an identical in-flight command.
    let Some(wire) = command_plan.wire else {
        debug!(?cmd, "command collapsed onto in-flight duplicate");
        return Ok(CommandResult::Accepted);
    };

    store.apply_provisional(command_plan.deltas);

    let push = controller.inner.push.lock().await;
    let push = push.as_ref().ok_or(CoreError::Disconnected)?;
    push.send(wire).await?;

    Ok(CommandResult::Accepted)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use drizzle_api::StaticToken;

    use super::*;

    fn config() -> ControllerConfig {
        ControllerConfig::new(
            "https://irrigation.invalid".parse().expect("url"),
            "wss://irrigation.invalid/v1/events".parse().expect("url"),
        )
    }

    #[tokio::test]
    async fn execute_before_connect_is_rejected() {
        let controller = Controller::new(config(), StaticToken::new("tok"));

        let err = controller
            .set_rain_delay("dev-1", 24)
            .await
            .expect_err("must reject");

        assert!(matches!(err, CoreError::Disconnected));
    }

    #[tokio::test]
    async fn calendar_projection_for_unknown_program_is_rejected() {
        let controller = Controller::new(config(), StaticToken::new("tok"));

        let err = controller
            .project_calendar(&"ghost".into(), Utc::now(), Utc::now() + chrono::TimeDelta::days(7))
            .expect_err("must reject");

        assert!(matches!(err, CoreError::UnknownEntity { kind: "program", .. }));
    }

    #[tokio::test]
    async fn fresh_controller_has_an_empty_snapshot() {
        let controller = Controller::new(config(), StaticToken::new("tok"));

        assert_eq!(controller.snapshot().device_count(), 0);
        assert_eq!(
            *controller.connection_state().borrow(),
            ConnectionState::Disconnected
        );
    }
}
