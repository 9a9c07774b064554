// ── Wire-to-domain conversion ──
//
// One-way mapping from `drizzle_api::wire` DTOs into domain types and
// typed deltas. Decoding happened at the transport boundary; this layer
// only reshapes. Recurrence rules are re-derived whole from every
// program payload, never patched.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc, Weekday};
use tracing::warn;

use drizzle_api::wire::{
    WireDevice, WireEvent, WireFrequency, WireFullState, WireProgram, WireRunMode,
};

use crate::model::{
    Connectivity, Device, DeviceKind, EntityId, Program, RecurrenceRule, Revision, RunState, Zone,
    ZoneRun,
};
use crate::store::{DeltaEvent, FullState};

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: i64 = 3600;

// ── Entities ─────────────────────────────────────────────────────────

/// Map one wire device into its domain device plus its zones.
pub fn device(wire: &WireDevice) -> (Device, Vec<Zone>) {
    let status = wire.status.as_ref();

    let device = Device {
        id: wire.id.as_str().into(),
        name: wire.name.clone().unwrap_or_else(|| "Unnamed device".into()),
        kind: device_kind(&wire.kind),
        battery: wire.battery.as_ref().map(|b| b.percent.min(100)),
        connectivity: match wire.is_connected {
            Some(true) => Connectivity::Online,
            Some(false) => Connectivity::Offline,
            None => Connectivity::Unknown,
        },
        last_seen: wire.last_connected_at,
        temperature_c: status.and_then(|s| s.temperature_c),
        firmware_version: wire.firmware_version.clone(),
    };

    let standby = status.and_then(|s| s.run_mode) == Some(WireRunMode::Off);
    let watering = status.and_then(|s| s.watering_status.as_ref());

    let zones = wire
        .zones
        .iter()
        .map(|wz| {
            let run_state = if standby {
                RunState::ScheduledOff
            } else if watering.is_some_and(|w| w.zone_id == wz.id) {
                RunState::Watering {
                    duration: minutes(watering.and_then(|w| w.run_time).unwrap_or(0)),
                }
            } else {
                RunState::Idle
            };

            Zone {
                id: wz.id.as_str().into(),
                device_id: wire.id.as_str().into(),
                name: wz.name.clone().unwrap_or_else(|| "Unnamed zone".into()),
                enabled: wz.enabled,
                run_state,
                started_watering_at: watering
                    .filter(|w| w.zone_id == wz.id)
                    .and_then(|w| w.started_watering_station_at),
                smart_watering: wz.smart_watering_enabled,
            }
        })
        .collect();

    (device, zones)
}

/// Map one wire program. The rain-delay interval falls back to the
/// owning device's status when the payload does not carry it.
pub fn program(
    wire: &WireProgram,
    device_rain_delay: Option<(DateTime<Utc>, Option<DateTime<Utc>>)>,
) -> Program {
    let (rain_delay_until, rain_delay_started_at) = match (wire.rain_delay_until, device_rain_delay)
    {
        (Some(until), _) => (Some(until), wire.rain_delay_started_at),
        (None, Some((until, started_at))) => (Some(until), started_at),
        (None, None) => (None, None),
    };

    Program {
        id: wire.id.as_str().into(),
        device_id: wire.device_id.as_str().into(),
        name: wire.name.clone().unwrap_or_else(|| "Unnamed program".into()),
        enabled: wire.enabled,
        recurrence: recurrence(&wire.id, &wire.frequency),
        start_time: start_time(&wire.id, &wire.start_time),
        runs: wire
            .run_times
            .iter()
            .map(|r| ZoneRun {
                zone_id: r.zone_id.as_str().into(),
                duration: minutes(r.run_time),
            })
            .collect(),
        rain_delay_until,
        rain_delay_started_at,
    }
}

/// Re-derive the whole recurrence rule from a frequency block.
fn recurrence(program_id: &str, freq: &WireFrequency) -> RecurrenceRule {
    match freq.kind.as_str() {
        "interval" => RecurrenceRule::IntervalDays {
            interval: freq.interval.unwrap_or(1),
            start_date: freq
                .interval_start_time
                .unwrap_or_else(Utc::now)
                .date_naive(),
        },
        "days" => RecurrenceRule::Weekdays(
            freq.days
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(|d| weekday(*d))
                .collect(),
        ),
        "odd" => RecurrenceRule::OddDays,
        "even" => RecurrenceRule::EvenDays,
        other => {
            // An empty weekday set never matches, so the program stays
            // visible but projects nothing.
            warn!(program = program_id, kind = other, "unrecognized frequency kind");
            RecurrenceRule::Weekdays(Vec::new())
        }
    }
}

/// Service weekday numbering: 0 = Sunday through 6 = Saturday.
fn weekday(day: u8) -> Option<Weekday> {
    match day {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn start_time(program_id: &str, raw: &str) -> NaiveTime {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .unwrap_or_else(|_| {
            warn!(program = program_id, raw, "unparseable start time, using midnight");
            NaiveTime::MIN
        })
}

fn minutes(run_time: u32) -> Duration {
    Duration::from_secs(u64::from(run_time) * SECONDS_PER_MINUTE)
}

// ── Full pull ────────────────────────────────────────────────────────

/// Map a full pull into domain form.
///
/// Zones come embedded in devices; a program's run list is filtered to
/// zones of its own device here, at the construction boundary, so a
/// stored program can never reference a foreign zone.
pub fn full_state(wire: &WireFullState) -> FullState {
    let mut devices = Vec::with_capacity(wire.devices.len());
    let mut zones = Vec::new();
    for wd in &wire.devices {
        let (d, mut z) = device(wd);
        devices.push(d);
        zones.append(&mut z);
    }

    let programs = wire
        .programs
        .iter()
        .map(|wp| {
            let owner = wire.devices.iter().find(|d| d.id == wp.device_id);
            let mut p = program(wp, owner.and_then(device_rain_delay));
            if let Some(owner) = owner {
                let owned: Vec<EntityId> =
                    owner.zones.iter().map(|z| z.id.as_str().into()).collect();
                p.runs.retain(|r| owned.contains(&r.zone_id));
            }
            p
        })
        .collect();

    FullState { devices, zones, programs }
}

/// The rain-delay interval a device's status block describes, if any.
fn device_rain_delay(wire: &WireDevice) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>)> {
    let status = wire.status.as_ref()?;
    let hours = status.rain_delay.filter(|h| *h > 0)?;
    let started_at = status.rain_delay_started_at;
    let until =
        started_at.unwrap_or_else(Utc::now) + TimeDelta::seconds(i64::from(hours) * SECONDS_PER_HOUR);
    Some((until, started_at))
}

// ── Push events ──────────────────────────────────────────────────────

/// Map one decoded push event into a typed delta.
///
/// Returns `None` for events that carry no state the store tracks.
pub fn delta(event: &WireEvent, received_at: DateTime<Utc>) -> Option<DeltaEvent> {
    let rev = |version: Option<u64>| {
        version.map_or(Revision::Receipt(received_at), Revision::Server)
    };

    match event {
        WireEvent::DeviceChanged { device: wd, version } => {
            let (d, zones) = device(wd);
            Some(DeltaEvent::DeviceUpdated { device: d, zones, revision: rev(*version) })
        }
        WireEvent::ProgramChanged { program: wp, version } => Some(DeltaEvent::ProgramUpdated {
            program: program(wp, None),
            revision: rev(*version),
        }),
        WireEvent::WateringInProgress {
            device_id,
            zone_id,
            run_time,
            started_watering_station_at,
            version,
        } => Some(DeltaEvent::WateringStarted {
            device_id: device_id.as_str().into(),
            zone_id: zone_id.as_str().into(),
            duration: minutes(*run_time),
            started_at: started_watering_station_at.or(Some(received_at)),
            revision: rev(*version),
        }),
        WireEvent::WateringComplete { device_id, version } => Some(DeltaEvent::WateringStopped {
            device_id: device_id.as_str().into(),
            revision: rev(*version),
        }),
        WireEvent::ChangeMode { device_id, mode, version } => Some(DeltaEvent::StandbyChanged {
            device_id: device_id.as_str().into(),
            standby: *mode == WireRunMode::Off,
            revision: rev(*version),
        }),
        WireEvent::RainDelay { device_id, delay, timestamp, version } => {
            let started_at = timestamp.or(Some(received_at));
            let until = (*delay > 0).then(|| {
                started_at.unwrap_or(received_at)
                    + TimeDelta::seconds(i64::from(*delay) * SECONDS_PER_HOUR)
            });
            Some(DeltaEvent::RainDelay {
                device_id: device_id.as_str().into(),
                until,
                started_at: until.is_some().then_some(started_at).flatten(),
                revision: rev(*version),
            })
        }
        WireEvent::BatteryStatus { device_id, percent, version } => {
            Some(DeltaEvent::BatteryChanged {
                device_id: device_id.as_str().into(),
                percent: *percent,
                revision: rev(*version),
            })
        }
        WireEvent::DeviceConnected { device_id, version } => {
            Some(DeltaEvent::ConnectivityChanged {
                device_id: device_id.as_str().into(),
                online: true,
                at: Some(received_at),
                revision: rev(*version),
            })
        }
        WireEvent::DeviceDisconnected { device_id, version } => {
            Some(DeltaEvent::ConnectivityChanged {
                device_id: device_id.as_str().into(),
                online: false,
                at: None,
                revision: rev(*version),
            })
        }
        WireEvent::EntityRemoved { entity_id, version: _ } => Some(DeltaEvent::EntityRemoved {
            entity_id: entity_id.as_str().into(),
        }),
    }
}

fn device_kind(raw: &str) -> DeviceKind {
    match raw {
        "sprinkler_timer" => DeviceKind::SprinklerTimer,
        "flood_sensor" => DeviceKind::FloodSensor,
        _ => DeviceKind::Other,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Datelike, TimeZone};
    use pretty_assertions::assert_eq;

    use drizzle_api::wire::{WireBattery, WireDeviceStatus, WireRun, WireWateringStatus, WireZone};

    use super::*;

    fn wire_device(id: &str) -> WireDevice {
        WireDevice {
            id: id.to_owned(),
            name: Some(format!("device {id}")),
            kind: "sprinkler_timer".into(),
            battery: Some(WireBattery { percent: 64 }),
            is_connected: Some(true),
            last_connected_at: None,
            firmware_version: None,
            status: None,
            zones: vec![WireZone {
                id: format!("{id}-z1"),
                name: Some("Lawn".into()),
                enabled: true,
                smart_watering_enabled: true,
            }],
        }
    }

    fn wire_program(id: &str, dev: &str) -> WireProgram {
        WireProgram {
            id: id.to_owned(),
            device_id: dev.to_owned(),
            name: Some("Morning".into()),
            enabled: true,
            frequency: WireFrequency {
                kind: "interval".into(),
                interval: Some(3),
                interval_start_time: Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()),
                days: None,
            },
            start_time: "06:00".into(),
            run_times: vec![WireRun { zone_id: format!("{dev}-z1"), run_time: 10 }],
            rain_delay_until: None,
            rain_delay_started_at: None,
        }
    }

    #[test]
    fn device_maps_kind_battery_and_zones() {
        let (d, zones) = device(&wire_device("dev-1"));

        assert_eq!(d.kind, DeviceKind::SprinklerTimer);
        assert_eq!(d.battery, Some(64));
        assert!(d.connectivity.is_online());
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].device_id, d.id);
        assert!(zones[0].smart_watering);
    }

    #[test]
    fn watering_status_marks_the_active_zone() {
        let mut wd = wire_device("dev-1");
        wd.status = Some(WireDeviceStatus {
            watering_status: Some(WireWateringStatus {
                zone_id: "dev-1-z1".into(),
                started_watering_station_at: Some(Utc::now()),
                run_time: Some(10),
            }),
            ..WireDeviceStatus::default()
        });

        let (_, zones) = device(&wd);
        assert!(zones[0].is_watering());
        assert!(zones[0].started_watering_at.is_some());
    }

    #[test]
    fn standby_mode_parks_every_zone() {
        let mut wd = wire_device("dev-1");
        wd.status = Some(WireDeviceStatus {
            run_mode: Some(WireRunMode::Off),
            ..WireDeviceStatus::default()
        });

        let (_, zones) = device(&wd);
        assert_eq!(zones[0].run_state, RunState::ScheduledOff);
    }

    #[test]
    fn interval_frequency_becomes_an_interval_rule() {
        let p = program(&wire_program("p1", "dev-1"), None);

        assert_eq!(
            p.recurrence,
            RecurrenceRule::IntervalDays {
                interval: 3,
                start_date: chrono::NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            }
        );
        assert_eq!(p.start_time, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(p.runs.len(), 1);
        assert_eq!(p.runs[0].duration, Duration::from_secs(600));
    }

    #[test]
    fn weekday_frequency_maps_service_numbering() {
        let mut wp = wire_program("p1", "dev-1");
        wp.frequency = WireFrequency {
            kind: "days".into(),
            interval: None,
            interval_start_time: None,
            days: Some(vec![0, 3, 6]),
        };

        let p = program(&wp, None);
        assert_eq!(
            p.recurrence,
            RecurrenceRule::Weekdays(vec![Weekday::Sun, Weekday::Wed, Weekday::Sat])
        );
    }

    #[test]
    fn unknown_frequency_kind_projects_nothing_but_keeps_the_program() {
        let mut wp = wire_program("p1", "dev-1");
        wp.frequency.kind = "lunar".into();

        let p = program(&wp, None);
        assert_eq!(p.recurrence, RecurrenceRule::Weekdays(Vec::new()));
    }

    #[test]
    fn full_state_resolves_device_rain_delay_onto_programs() {
        let started = Utc.with_ymd_and_hms(2026, 4, 2, 18, 0, 0).unwrap();
        let mut wd = wire_device("dev-1");
        wd.status = Some(WireDeviceStatus {
            rain_delay: Some(24),
            rain_delay_started_at: Some(started),
            ..WireDeviceStatus::default()
        });

        let full = full_state(&WireFullState {
            devices: vec![wd],
            programs: vec![wire_program("p1", "dev-1")],
        });

        assert_eq!(
            full.programs[0].rain_delay_until,
            Some(started + TimeDelta::hours(24))
        );
        assert_eq!(full.programs[0].rain_delay_started_at, Some(started));
    }

    #[test]
    fn full_state_drops_runs_referencing_foreign_zones() {
        let mut wp = wire_program("p1", "dev-1");
        wp.run_times.push(WireRun { zone_id: "other-device-zone".into(), run_time: 5 });

        let full = full_state(&WireFullState {
            devices: vec![wire_device("dev-1")],
            programs: vec![wp],
        });

        assert_eq!(full.programs[0].runs.len(), 1);
    }

    #[test]
    fn rain_delay_event_computes_the_until_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let event = WireEvent::RainDelay {
            device_id: "dev-1".into(),
            delay: 24,
            timestamp: Some(ts),
            version: Some(7),
        };

        let Some(DeltaEvent::RainDelay { until, started_at, revision, .. }) =
            delta(&event, Utc::now())
        else {
            panic!("wrong delta");
        };

        assert_eq!(until, Some(ts + TimeDelta::hours(24)));
        assert_eq!(started_at, Some(ts));
        assert_eq!(revision, Revision::Server(7));
    }

    #[test]
    fn zero_delay_clears_the_rain_delay() {
        let event = WireEvent::RainDelay {
            device_id: "dev-1".into(),
            delay: 0,
            timestamp: None,
            version: None,
        };

        let Some(DeltaEvent::RainDelay { until, started_at, .. }) = delta(&event, Utc::now())
        else {
            panic!("wrong delta");
        };

        assert_eq!(until, None);
        assert_eq!(started_at, None);
    }

    #[test]
    fn unversioned_events_are_stamped_with_receipt_time() {
        let received = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let event = WireEvent::WateringComplete { device_id: "dev-1".into(), version: None };

        let Some(DeltaEvent::WateringStopped { revision, .. }) = delta(&event, received) else {
            panic!("wrong delta");
        };

        assert_eq!(revision, Revision::Receipt(received));
        // Receipt date round-trips intact.
        let Revision::Receipt(t) = revision else { panic!() };
        assert_eq!(t.day(), 1);
    }
}
