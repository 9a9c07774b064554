// ── Immutable world snapshot ──
//
// One consistent view of every device, zone, and program. Published
// snapshots are never mutated: the store clones, applies, rebuilds the
// reverse indexes, and swaps. Readers therefore never observe a torn
// write, and a zone's parent device always resolves within the same
// snapshot it came from.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::model::{Device, EntityId, Program, Revision, RunState, Zone};

use super::delta::{ChangeSet, DeltaEvent};

/// A stored entity plus its conflict-resolution metadata.
#[derive(Debug, Clone)]
pub(crate) struct Record<T> {
    pub(crate) value: Arc<T>,
    pub(crate) revision: Revision,
    /// Set by optimistic façade writes; the next confirmed event for
    /// the entity supersedes the record regardless of revision.
    pub(crate) provisional: bool,
}

impl<T> Record<T> {
    pub(crate) fn new(value: T, revision: Revision, provisional: bool) -> Self {
        Self {
            value: Arc::new(value),
            revision,
            provisional,
        }
    }
}

/// An immutable, internally consistent view of the account state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) devices: HashMap<EntityId, Record<Device>>,
    pub(crate) zones: HashMap<EntityId, Record<Zone>>,
    pub(crate) programs: HashMap<EntityId, Record<Program>>,

    // Reverse indexes, rebuilt on every publish. Forward ids live on
    // the entities; these exist so reverse lookups never need a scan
    // or a back-pointer.
    pub(crate) zones_by_device: HashMap<EntityId, Vec<EntityId>>,
    pub(crate) programs_by_device: HashMap<EntityId, Vec<EntityId>>,
}

impl Snapshot {
    // ── Single-entity lookups ────────────────────────────────────────

    pub fn device(&self, id: &EntityId) -> Option<Arc<Device>> {
        self.devices.get(id).map(|r| Arc::clone(&r.value))
    }

    pub fn zone(&self, id: &EntityId) -> Option<Arc<Zone>> {
        self.zones.get(id).map(|r| Arc::clone(&r.value))
    }

    pub fn program(&self, id: &EntityId) -> Option<Arc<Program>> {
        self.programs.get(id).map(|r| Arc::clone(&r.value))
    }

    /// Whether the entity's current value is an unconfirmed optimistic write.
    pub fn is_provisional(&self, id: &EntityId) -> bool {
        self.devices.get(id).map(|r| r.provisional)
            .or_else(|| self.zones.get(id).map(|r| r.provisional))
            .or_else(|| self.programs.get(id).map(|r| r.provisional))
            .unwrap_or(false)
    }

    // ── Collection accessors ─────────────────────────────────────────

    /// All devices, ordered by id.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut out: Vec<_> = self.devices.values().map(|r| Arc::clone(&r.value)).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// All programs, ordered by id.
    pub fn programs(&self) -> Vec<Arc<Program>> {
        let mut out: Vec<_> = self.programs.values().map(|r| Arc::clone(&r.value)).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// The zones belonging to one device, ordered by id.
    pub fn zones_of(&self, device_id: &EntityId) -> Vec<Arc<Zone>> {
        self.zones_by_device
            .get(device_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.zone(id))
            .collect()
    }

    /// The programs belonging to one device, ordered by id.
    pub fn programs_of(&self, device_id: &EntityId) -> Vec<Arc<Program>> {
        self.programs_by_device
            .get(device_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.program(id))
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    // ── Mutation (store-internal; runs on a private clone) ──────────

    /// Rebuild the reverse indexes from the forward ids.
    pub(crate) fn rebuild_indexes(&mut self) {
        let mut zones_by_device: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for (id, rec) in &self.zones {
            zones_by_device
                .entry(rec.value.device_id.clone())
                .or_default()
                .push(id.clone());
        }
        for ids in zones_by_device.values_mut() {
            ids.sort();
        }

        let mut programs_by_device: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for (id, rec) in &self.programs {
            programs_by_device
                .entry(rec.value.device_id.clone())
                .or_default()
                .push(id.clone());
        }
        for ids in programs_by_device.values_mut() {
            ids.sort();
        }

        self.zones_by_device = zones_by_device;
        self.programs_by_device = programs_by_device;
    }

    /// Apply one delta in place, recording touched ids in `changes`.
    ///
    /// Returns `true` when any record was written (including metadata-only
    /// writes such as confirming a provisional value), which is the
    /// store's cue to publish.
    pub(crate) fn apply(
        &mut self,
        delta: DeltaEvent,
        provisional: bool,
        changes: &mut ChangeSet,
    ) -> bool {
        match delta {
            DeltaEvent::DeviceUpdated { device, zones, revision } => {
                self.apply_device_updated(device, zones, revision, provisional, changes)
            }
            DeltaEvent::ZoneUpdated { zone, revision } => {
                if !self.devices.contains_key(&zone.device_id) {
                    debug!(zone = %zone.id, device = %zone.device_id,
                        "dropping zone delta for unknown device");
                    return false;
                }
                upsert(&mut self.zones, zone.id.clone(), zone, revision, provisional, false, changes)
            }
            DeltaEvent::ProgramUpdated { program, revision } => upsert(
                &mut self.programs,
                program.id.clone(),
                program,
                revision,
                provisional,
                false,
                changes,
            ),
            DeltaEvent::WateringStarted { device_id, zone_id, duration, started_at, revision } => {
                if !self.gate_device(&device_id, revision, provisional) {
                    return false;
                }
                self.patch_zones(&device_id, provisional, changes, |zone| {
                    if zone.id == zone_id {
                        zone.run_state = RunState::Watering { duration };
                        zone.started_watering_at = started_at;
                    } else if zone.is_watering() {
                        zone.run_state = RunState::Idle;
                        zone.started_watering_at = None;
                    }
                });
                true
            }
            DeltaEvent::WateringStopped { device_id, revision } => {
                if !self.gate_device(&device_id, revision, provisional) {
                    return false;
                }
                self.patch_zones(&device_id, provisional, changes, |zone| {
                    if zone.is_watering() {
                        zone.run_state = RunState::Idle;
                        zone.started_watering_at = None;
                    }
                });
                true
            }
            DeltaEvent::StandbyChanged { device_id, standby, revision } => {
                if !self.gate_device(&device_id, revision, provisional) {
                    return false;
                }
                self.patch_zones(&device_id, provisional, changes, |zone| {
                    if standby {
                        zone.run_state = RunState::ScheduledOff;
                        zone.started_watering_at = None;
                    } else if zone.run_state == RunState::ScheduledOff {
                        zone.run_state = RunState::Idle;
                    }
                });
                true
            }
            DeltaEvent::RainDelay { device_id, until, started_at, revision } => {
                if !self.gate_device(&device_id, revision, provisional) {
                    return false;
                }
                self.patch_programs(&device_id, provisional, changes, |program| {
                    program.rain_delay_until = until;
                    program.rain_delay_started_at = until.is_some().then_some(started_at).flatten();
                });
                true
            }
            DeltaEvent::BatteryChanged { device_id, percent, revision } => {
                self.patch_device(&device_id, revision, provisional, changes, |device| {
                    device.battery = Some(percent.min(100));
                })
            }
            DeltaEvent::ConnectivityChanged { device_id, online, at, revision } => {
                self.patch_device(&device_id, revision, provisional, changes, |device| {
                    device.connectivity = if online {
                        crate::model::Connectivity::Online
                    } else {
                        crate::model::Connectivity::Offline
                    };
                    if let Some(at) = at {
                        device.last_seen = Some(at);
                    }
                })
            }
            DeltaEvent::EntityRemoved { entity_id } => self.apply_removed(&entity_id, changes),
        }
    }

    fn apply_device_updated(
        &mut self,
        device: Device,
        zones: Vec<Zone>,
        revision: Revision,
        provisional: bool,
        changes: &mut ChangeSet,
    ) -> bool {
        if let Some(rec) = self.devices.get(&device.id) {
            if !provisional && !rec.provisional && revision.is_stale_against(&rec.revision) {
                debug!(device = %device.id, "dropping stale device delta");
                return false;
            }
        }

        let device_id = device.id.clone();
        upsert(&mut self.devices, device_id.clone(), device, revision, provisional, true, changes);

        // The payload's zone list is the device's whole zone set.
        let kept: Vec<EntityId> = zones.iter().map(|z| z.id.clone()).collect();
        for zone in zones {
            upsert(&mut self.zones, zone.id.clone(), zone, revision, provisional, true, changes);
        }

        let dropped: Vec<EntityId> = self
            .zones
            .iter()
            .filter(|(id, rec)| rec.value.device_id == device_id && !kept.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        for zone_id in dropped {
            self.zones.remove(&zone_id);
            changes.removed.insert(zone_id.clone());
            self.strip_zone_from_programs(&zone_id, changes);
        }

        true
    }

    fn apply_removed(&mut self, entity_id: &EntityId, changes: &mut ChangeSet) -> bool {
        if self.devices.remove(entity_id).is_some() {
            changes.removed.insert(entity_id.clone());

            let zone_ids: Vec<EntityId> = self
                .zones
                .iter()
                .filter(|(_, rec)| rec.value.device_id == *entity_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in zone_ids {
                self.zones.remove(&id);
                changes.removed.insert(id);
            }

            let program_ids: Vec<EntityId> = self
                .programs
                .iter()
                .filter(|(_, rec)| rec.value.device_id == *entity_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in program_ids {
                self.programs.remove(&id);
                changes.removed.insert(id);
            }

            return true;
        }

        if self.zones.remove(entity_id).is_some() {
            changes.removed.insert(entity_id.clone());
            self.strip_zone_from_programs(entity_id, changes);
            return true;
        }

        if self.programs.remove(entity_id).is_some() {
            changes.removed.insert(entity_id.clone());
            return true;
        }

        debug!(%entity_id, "removal for unknown entity");
        false
    }

    /// Revision-gate a device-scoped delta. Passing the gate bumps the
    /// device record's revision (these events ride the device stream).
    fn gate_device(&mut self, device_id: &EntityId, revision: Revision, provisional: bool) -> bool {
        let Some(rec) = self.devices.get_mut(device_id) else {
            debug!(device = %device_id, "delta for unknown device");
            return false;
        };
        if !provisional && !rec.provisional && revision.is_stale_against(&rec.revision) {
            debug!(device = %device_id, "dropping stale device-scoped delta");
            return false;
        }
        rec.revision = revision;
        true
    }

    /// Gate on the device revision, then patch the device value itself.
    fn patch_device(
        &mut self,
        device_id: &EntityId,
        revision: Revision,
        provisional: bool,
        changes: &mut ChangeSet,
        f: impl FnOnce(&mut Device),
    ) -> bool {
        if !self.gate_device(device_id, revision, provisional) {
            return false;
        }
        let Some(rec) = self.devices.get_mut(device_id) else {
            return false;
        };
        let mut value = (*rec.value).clone();
        f(&mut value);
        if value != *rec.value {
            changes.changed.insert(device_id.clone());
            rec.value = Arc::new(value);
        }
        rec.provisional = provisional;
        true
    }

    /// Patch every zone of a device in place; values only, revisions
    /// untouched (zones keep their own streams).
    fn patch_zones(
        &mut self,
        device_id: &EntityId,
        provisional: bool,
        changes: &mut ChangeSet,
        f: impl Fn(&mut Zone),
    ) {
        for (id, rec) in &mut self.zones {
            if rec.value.device_id != *device_id {
                continue;
            }
            let mut value = (*rec.value).clone();
            f(&mut value);
            if value != *rec.value {
                changes.changed.insert(id.clone());
                rec.value = Arc::new(value);
                if provisional {
                    rec.provisional = true;
                }
            }
        }
    }

    /// Patch every program of a device in place.
    fn patch_programs(
        &mut self,
        device_id: &EntityId,
        provisional: bool,
        changes: &mut ChangeSet,
        f: impl Fn(&mut Program),
    ) {
        for (id, rec) in &mut self.programs {
            if rec.value.device_id != *device_id {
                continue;
            }
            let mut value = (*rec.value).clone();
            f(&mut value);
            if value != *rec.value {
                changes.changed.insert(id.clone());
                rec.value = Arc::new(value);
                if provisional {
                    rec.provisional = true;
                }
            }
        }
    }

    fn strip_zone_from_programs(&mut self, zone_id: &EntityId, changes: &mut ChangeSet) {
        for (id, rec) in &mut self.programs {
            if rec.value.runs.iter().any(|r| r.zone_id == *zone_id) {
                let mut value = (*rec.value).clone();
                value.runs.retain(|r| r.zone_id != *zone_id);
                rec.value = Arc::new(value);
                changes.changed.insert(id.clone());
            }
        }
    }
}

/// Insert or update one record under the conflict policy.
///
/// `force` bypasses the stale check for family updates where the caller
/// already gated on the owning device. Returns `true` when the record
/// was written.
fn upsert<T: PartialEq>(
    map: &mut HashMap<EntityId, Record<T>>,
    id: EntityId,
    value: T,
    revision: Revision,
    provisional: bool,
    force: bool,
    changes: &mut ChangeSet,
) -> bool {
    match map.get_mut(&id) {
        Some(rec) => {
            if !force && !provisional && !rec.provisional && revision.is_stale_against(&rec.revision)
            {
                debug!(%id, "dropping stale delta");
                return false;
            }
            if *rec.value != value {
                changes.changed.insert(id);
                rec.value = Arc::new(value);
            }
            rec.revision = revision;
            rec.provisional = provisional;
            true
        }
        None => {
            changes.changed.insert(id.clone());
            map.insert(id, Record::new(value, revision, provisional));
            true
        }
    }
}
