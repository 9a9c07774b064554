// ── Command API ──
//
// All write operations flow through a unified `Command` enum, validated
// against the current snapshot and planned as (optimistic deltas,
// outbound wire message) before anything is sent. Planning is pure;
// the controller's command processor applies and transmits.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use drizzle_api::wire::WireCommand;

use crate::error::CoreError;
use crate::model::{EntityId, Revision, RunState};
use crate::store::{DeltaEvent, Snapshot};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All write operations against the irrigation service.
#[derive(Debug, Clone)]
pub enum Command {
    /// Open a zone for the given run time, or close it with `None`.
    SetZoneRun {
        zone_id: EntityId,
        run_time: Option<Duration>,
    },
    /// Delay all watering on a device for `hours`; 0 clears the delay.
    SetRainDelay { device_id: EntityId, hours: u32 },
    SetProgramEnabled { program_id: EntityId, enabled: bool },
    /// Run a program immediately, first zone first.
    StartProgram { program_id: EntityId },
}

/// Result of an accepted command.
///
/// `Accepted` means accepted for transmission -- confirmation arrives
/// asynchronously as a delta event on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Accepted,
}

/// What executing a command amounts to: optimistic state, then a wire
/// message. Both empty means the command collapsed onto an identical
/// in-flight one.
#[derive(Debug)]
pub(crate) struct CommandPlan {
    pub deltas: Vec<DeltaEvent>,
    pub wire: Option<WireCommand>,
}

impl CommandPlan {
    fn collapsed() -> Self {
        Self { deltas: Vec::new(), wire: None }
    }
}

/// Validate a command against the snapshot and plan its effects.
///
/// Fails with [`CoreError::UnknownEntity`] when a referenced id is not
/// in the snapshot. Re-issuing a command whose optimistic state is
/// already provisionally in the store collapses to an empty plan, so a
/// doubled `SetZoneRun` can never stack durations or transmit twice.
pub(crate) fn plan(
    snapshot: &Snapshot,
    command: &Command,
    now: DateTime<Utc>,
) -> Result<CommandPlan, CoreError> {
    match command {
        Command::SetZoneRun { zone_id, run_time } => {
            let zone = snapshot.zone(zone_id).ok_or_else(|| CoreError::UnknownEntity {
                kind: "zone",
                identifier: zone_id.to_string(),
            })?;

            let desired = match run_time {
                Some(duration) => RunState::Watering { duration: *duration },
                None => RunState::Idle,
            };
            if zone.run_state == desired && snapshot.is_provisional(zone_id) {
                return Ok(CommandPlan::collapsed());
            }

            let delta = match run_time {
                Some(duration) => DeltaEvent::WateringStarted {
                    device_id: zone.device_id.clone(),
                    zone_id: zone_id.clone(),
                    duration: *duration,
                    started_at: Some(now),
                    revision: Revision::Receipt(now),
                },
                None => {
                    let mut stopped = (*zone).clone();
                    stopped.run_state = RunState::Idle;
                    stopped.started_watering_at = None;
                    DeltaEvent::ZoneUpdated {
                        zone: stopped,
                        revision: Revision::Receipt(now),
                    }
                }
            };

            Ok(CommandPlan {
                deltas: vec![delta],
                wire: Some(WireCommand::ZoneRun {
                    device_id: zone.device_id.to_string(),
                    zone_id: zone_id.to_string(),
                    run_time: run_time.map(wire_minutes),
                }),
            })
        }

        Command::SetRainDelay { device_id, hours } => {
            if snapshot.device(device_id).is_none() {
                return Err(CoreError::UnknownEntity {
                    kind: "device",
                    identifier: device_id.to_string(),
                });
            }

            let until = (*hours > 0).then(|| now + TimeDelta::hours(i64::from(*hours)));

            Ok(CommandPlan {
                deltas: vec![DeltaEvent::RainDelay {
                    device_id: device_id.clone(),
                    until,
                    started_at: until.is_some().then_some(now),
                    revision: Revision::Receipt(now),
                }],
                wire: Some(WireCommand::RainDelay {
                    device_id: device_id.to_string(),
                    delay: *hours,
                }),
            })
        }

        Command::SetProgramEnabled { program_id, enabled } => {
            let program = snapshot.program(program_id).ok_or_else(|| CoreError::UnknownEntity {
                kind: "program",
                identifier: program_id.to_string(),
            })?;

            if program.enabled == *enabled && snapshot.is_provisional(program_id) {
                return Ok(CommandPlan::collapsed());
            }

            let mut updated = (*program).clone();
            updated.enabled = *enabled;

            Ok(CommandPlan {
                deltas: vec![DeltaEvent::ProgramUpdated {
                    program: updated,
                    revision: Revision::Receipt(now),
                }],
                wire: Some(WireCommand::ProgramEnable {
                    program_id: program_id.to_string(),
                    enabled: *enabled,
                }),
            })
        }

        Command::StartProgram { program_id } => {
            let program = snapshot.program(program_id).ok_or_else(|| CoreError::UnknownEntity {
                kind: "program",
                identifier: program_id.to_string(),
            })?;

            // Optimistically open the first zone of the sequence; the
            // rest follow as watering notices stream in.
            let deltas = match program.runs.first() {
                Some(first) => {
                    let desired = RunState::Watering { duration: first.duration };
                    let already_running = snapshot
                        .zone(&first.zone_id)
                        .is_some_and(|z| z.run_state == desired)
                        && snapshot.is_provisional(&first.zone_id);
                    if already_running {
                        return Ok(CommandPlan::collapsed());
                    }
                    vec![DeltaEvent::WateringStarted {
                        device_id: program.device_id.clone(),
                        zone_id: first.zone_id.clone(),
                        duration: first.duration,
                        started_at: Some(now),
                        revision: Revision::Receipt(now),
                    }]
                }
                None => Vec::new(),
            };

            Ok(CommandPlan {
                deltas,
                wire: Some(WireCommand::StartProgram {
                    device_id: program.device_id.to_string(),
                    program_id: program_id.to_string(),
                }),
            })
        }
    }
}

/// Wire run times are whole minutes; anything shorter rounds up to one.
fn wire_minutes(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs().div_ceil(60)).unwrap_or(u32::MAX).max(1)
}

// ── Tests ────────────────────────────────────────────────────────────
