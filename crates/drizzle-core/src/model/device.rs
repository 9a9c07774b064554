// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// What kind of hardware a device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeviceKind {
    /// An irrigation controller with one or more zones.
    SprinklerTimer,
    /// A battery-powered leak/temperature sensor.
    FloodSensor,
    /// Reported by the service but not modeled here.
    Other,
}

/// Cloud connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Connectivity {
    Online,
    Offline,
    Unknown,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// A physical device registered to the account.
///
/// Owned exclusively by the state store; everything here mutates only
/// through delta application or a full reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: EntityId,
    pub name: String,
    pub kind: DeviceKind,
    /// Battery charge 0..=100, `None` when unknown or mains-powered.
    pub battery: Option<u8>,
    pub connectivity: Connectivity,
    pub last_seen: Option<DateTime<Utc>>,
    /// Ambient temperature reading, flood sensors only.
    pub temperature_c: Option<f64>,
    pub firmware_version: Option<String>,
}
