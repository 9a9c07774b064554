// ── Wire message model ──
//
// Raw shapes exchanged with the cloud service. The REST pull path and
// the websocket push channel share these DTOs; `drizzle-core` converts
// them into domain types and never touches JSON itself.
//
// Inbound events form a CLOSED enum keyed by the `"event"` field and are
// decoded exactly once, at the transport boundary. A kind this client
// does not know decodes to [`Error::UnknownEventKind`] so callers can
// log and skip it without guessing at a shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Pull-path DTOs ───────────────────────────────────────────────────

/// A controller or flood sensor as the device list endpoint returns it.
/// Zones come embedded in the owning device payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDevice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `"sprinkler_timer"` or `"flood_sensor"`; anything else maps to an
    /// unknown device kind downstream.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub battery: Option<WireBattery>,
    #[serde(default)]
    pub is_connected: Option<bool>,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub status: Option<WireDeviceStatus>,
    #[serde(default)]
    pub zones: Vec<WireZone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBattery {
    pub percent: u8,
}

/// Live status block on a device payload. Rain delay is expressed as
/// hours-from-start; the watering block names the zone currently open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireDeviceStatus {
    #[serde(default)]
    pub run_mode: Option<WireRunMode>,
    #[serde(default)]
    pub rain_delay: Option<u32>,
    #[serde(default)]
    pub rain_delay_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watering_status: Option<WireWateringStatus>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireRunMode {
    Auto,
    Manual,
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireWateringStatus {
    pub zone_id: String,
    #[serde(default)]
    pub started_watering_station_at: Option<DateTime<Utc>>,
    /// Requested run time in minutes.
    #[serde(default)]
    pub run_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireZone {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub smart_watering_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A watering program as the program list endpoint returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProgram {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub frequency: WireFrequency,
    /// Time of day, `"HH:MM"`.
    pub start_time: String,
    #[serde(default)]
    pub run_times: Vec<WireRun>,
    #[serde(default)]
    pub rain_delay_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rain_delay_started_at: Option<DateTime<Utc>>,
}

/// Recurrence block. `kind` selects which of the optional fields apply:
/// `"interval"` uses `interval` + `interval_start_time`, `"days"` uses
/// `days` (0 = Sunday), `"odd"`/`"even"` use neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrequency {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub interval: Option<u32>,
    #[serde(default)]
    pub interval_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub days: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRun {
    pub zone_id: String,
    /// Run time in minutes.
    pub run_time: u32,
}

/// Everything a full pull returns, fetched in one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFullState {
    pub devices: Vec<WireDevice>,
    pub programs: Vec<WireProgram>,
}

// ── Inbound events ───────────────────────────────────────────────────

/// A parsed event from the push channel.
///
/// Closed set: every variant the service emits that this client acts
/// on. The optional `version` is a per-entity sequence number; events
/// without one are ordered by receipt downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireEvent {
    /// Whole-device replacement, zones embedded.
    DeviceChanged {
        device: WireDevice,
        #[serde(default)]
        version: Option<u64>,
    },
    /// Whole-program replacement. The rule is re-derived from this
    /// payload in full; nothing is patched field-by-field.
    ProgramChanged {
        program: WireProgram,
        #[serde(default)]
        version: Option<u64>,
    },
    #[serde(rename = "watering_in_progress_notice")]
    WateringInProgress {
        device_id: String,
        zone_id: String,
        /// Requested run time in minutes.
        run_time: u32,
        #[serde(default)]
        started_watering_station_at: Option<DateTime<Utc>>,
        #[serde(default)]
        version: Option<u64>,
    },
    /// The device went idle; all of its zones stop.
    WateringComplete {
        device_id: String,
        #[serde(default)]
        version: Option<u64>,
    },
    ChangeMode {
        device_id: String,
        mode: WireRunMode,
        #[serde(default)]
        version: Option<u64>,
    },
    RainDelay {
        device_id: String,
        /// Delay duration in hours; 0 clears the delay.
        delay: u32,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(default)]
        version: Option<u64>,
    },
    BatteryStatus {
        device_id: String,
        percent: u8,
        #[serde(default)]
        version: Option<u64>,
    },
    DeviceConnected {
        device_id: String,
        #[serde(default)]
        version: Option<u64>,
    },
    DeviceDisconnected {
        device_id: String,
        #[serde(default)]
        version: Option<u64>,
    },
    EntityRemoved {
        entity_id: String,
        #[serde(default)]
        version: Option<u64>,
    },
}

const KNOWN_KINDS: &[&str] = &[
    "device_changed",
    "program_changed",
    "watering_in_progress_notice",
    "watering_complete",
    "change_mode",
    "rain_delay",
    "battery_status",
    "device_connected",
    "device_disconnected",
    "entity_removed",
];

impl WireEvent {
    /// Decode one inbound text frame.
    ///
    /// Distinguishes three failures: malformed JSON and a known kind
    /// with a bad payload both map to [`Error::Deserialization`]; a
    /// well-formed frame with an unrecognized kind maps to
    /// [`Error::UnknownEventKind`], which callers treat as skippable.
    pub fn decode(text: &str) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.to_owned(),
            })?;

        let kind = value
            .get("event")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::Deserialization {
                message: "missing event field".into(),
                body: text.to_owned(),
            })?;

        if !KNOWN_KINDS.contains(&kind) {
            return Err(Error::UnknownEventKind(kind.to_owned()));
        }

        serde_json::from_value(value).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }
}

// ── Outbound commands ────────────────────────────────────────────────

/// A command message for the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireCommand {
    /// Open a zone for `run_time` minutes, or close it when `None`.
    ZoneRun {
        device_id: String,
        zone_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        run_time: Option<u32>,
    },
    /// Set a rain delay in hours; 0 clears it.
    RainDelay { device_id: String, delay: u32 },
    ProgramEnable { program_id: String, enabled: bool },
    /// Kick off a program run immediately.
    StartProgram { device_id: String, program_id: String },
}

// ── Tests ────────────────────────────────────────────────────────────
