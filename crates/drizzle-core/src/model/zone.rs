// ── Zone domain types ──

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// What a zone's valve is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RunState {
    Idle,
    /// The valve is open for the given requested run time.
    Watering { duration: Duration },
    /// The owning device is in standby; scheduled runs will not fire.
    ScheduledOff,
}

/// An individually controllable watering outlet.
///
/// Carries a back-reference to its device by id only -- reverse lookups
/// go through the snapshot's rebuilt index, never through pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: EntityId,
    pub device_id: EntityId,
    pub name: String,
    pub enabled: bool,
    pub run_state: RunState,
    pub started_watering_at: Option<DateTime<Utc>>,
    /// Whether the service's weather-driven schedule adjustment is on.
    pub smart_watering: bool,
}

impl Zone {
    pub fn is_watering(&self) -> bool {
        matches!(self.run_state, RunState::Watering { .. })
    }
}
