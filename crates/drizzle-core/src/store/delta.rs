// ── Typed change events ──
//
// Everything that can mutate the snapshot, already decoded and
// converted from the wire. Deltas come from two sources -- the push
// channel (confirmed) and the command façade (provisional) -- and are
// applied identically apart from the provisional flag.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{Device, EntityId, Program, Revision, Zone};

/// A single state mutation.
///
/// Device-scoped variants (`WateringStarted`, `WateringStopped`,
/// `StandbyChanged`, `RainDelay`, `BatteryChanged`,
/// `ConnectivityChanged`) ride the device's revision stream: their
/// staleness is judged against the stored device revision, and the
/// zone/program values they touch update without disturbing those
/// entities' own revision streams.
#[derive(Debug, Clone)]
pub enum DeltaEvent {
    /// Whole-device replacement. The embedded zone list is authoritative
    /// for this device: zones land together with their device in one
    /// atomic publish, and zones missing from the payload are removed.
    DeviceUpdated {
        device: Device,
        zones: Vec<Zone>,
        revision: Revision,
    },
    ZoneUpdated { zone: Zone, revision: Revision },
    /// Whole-program replacement, recurrence rule included.
    ProgramUpdated { program: Program, revision: Revision },
    /// One zone opened; any sibling that was watering goes idle
    /// (zones on a device run sequentially, never in parallel).
    WateringStarted {
        device_id: EntityId,
        zone_id: EntityId,
        duration: Duration,
        started_at: Option<DateTime<Utc>>,
        revision: Revision,
    },
    /// The device went idle; watering zones stop.
    WateringStopped { device_id: EntityId, revision: Revision },
    /// Device standby toggled; standby parks every zone in
    /// `ScheduledOff`, leaving it clears them back to `Idle`.
    StandbyChanged {
        device_id: EntityId,
        standby: bool,
        revision: Revision,
    },
    /// Rain delay set or cleared. Fans out to every program of the
    /// device inside the same publish.
    RainDelay {
        device_id: EntityId,
        until: Option<DateTime<Utc>>,
        started_at: Option<DateTime<Utc>>,
        revision: Revision,
    },
    BatteryChanged {
        device_id: EntityId,
        percent: u8,
        revision: Revision,
    },
    ConnectivityChanged {
        device_id: EntityId,
        online: bool,
        at: Option<DateTime<Utc>>,
        revision: Revision,
    },
    /// Explicit removal. Removing a device cascades to its zones and
    /// programs; removing a zone strips it from program run lists.
    EntityRemoved { entity_id: EntityId },
}

/// Everything a full pull yields, in domain form.
#[derive(Debug, Clone, Default)]
pub struct FullState {
    pub devices: Vec<Device>,
    pub zones: Vec<Zone>,
    pub programs: Vec<Program>,
}

/// The ids touched by one applied mutation.
///
/// Shape is identical whether the mutation was a live delta or a full
/// reconciliation, so downstream notification handling is uniform.
/// Ordered sets keep notification order deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Entities created or whose observable value changed.
    pub changed: BTreeSet<EntityId>,
    /// Entities removed from the snapshot.
    pub removed: BTreeSet<EntityId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}
