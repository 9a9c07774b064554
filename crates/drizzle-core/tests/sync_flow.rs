// End-to-end engine flow: wire payloads through decode, conversion,
// store application, and calendar projection -- everything except the
// network itself.

use chrono::{TimeZone, Utc};
use serde_json::json;

use drizzle_api::wire::{WireEvent, WireFullState};
use drizzle_core::{convert, OccurrenceStatus, RecurrenceRule, StateStore};

fn pull() -> WireFullState {
    let devices = json!([
        {
            "id": "dev-1",
            "name": "Front yard",
            "type": "sprinkler_timer",
            "battery": { "percent": 80 },
            "is_connected": true,
            "zones": [
                { "id": "z-1", "name": "Roses", "enabled": true, "smart_watering_enabled": false },
                { "id": "z-2", "name": "Lawn", "enabled": true, "smart_watering_enabled": false }
            ]
        }
    ]);
    let programs = json!([
        {
            "id": "prog-1",
            "device_id": "dev-1",
            "name": "Morning",
            "enabled": true,
            "frequency": {
                "type": "interval",
                "interval": 3,
                "interval_start_time": "2026-04-01T00:00:00Z"
            },
            "start_time": "06:00",
            "run_times": [
                { "zone_id": "z-1", "run_time": 10 },
                { "zone_id": "z-2", "run_time": 5 }
            ]
        }
    ]);

    WireFullState {
        devices: serde_json::from_value(devices).expect("devices"),
        programs: serde_json::from_value(programs).expect("programs"),
    }
}

fn seeded_store() -> StateStore {
    let store = StateStore::new();
    store.apply_full(convert::full_state(&pull()));
    store
}

#[test]
fn full_pull_populates_a_projectable_snapshot() {
    let store = seeded_store();
    let snapshot = store.snapshot();

    assert_eq!(snapshot.device_count(), 1);
    assert_eq!(snapshot.zone_count(), 2);

    let program = snapshot.program(&"prog-1".into()).expect("program");
    assert_eq!(
        program.recurrence,
        RecurrenceRule::IntervalDays {
            interval: 3,
            start_date: chrono::NaiveDate::from_ymd_opt(2026, 4, 1).expect("date"),
        }
    );

    // Every 3 days over a one-week window, two zones in sequence.
    let zones = snapshot.zones_of(&program.device_id);
    let window_start = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).single().expect("time");
    let window_end = Utc.with_ymd_and_hms(2026, 4, 8, 0, 0, 0).single().expect("time");
    let occurrences: Vec<_> = drizzle_core::project(&program, &zones, window_start, window_end)
        .expect("projection")
        .collect();

    assert_eq!(occurrences.len(), 6, "3 days x 2 zones");
    assert_eq!(
        occurrences[0].start,
        Utc.with_ymd_and_hms(2026, 4, 1, 6, 0, 0).single().expect("time")
    );
    // Second zone starts when the first finishes.
    assert_eq!(
        occurrences[1].start,
        Utc.with_ymd_and_hms(2026, 4, 1, 6, 10, 0).single().expect("time")
    );
    assert!(occurrences.iter().all(|o| o.status == OccurrenceStatus::Scheduled));
}

#[test]
fn push_events_flow_through_to_the_projection() {
    let store = seeded_store();

    // A rain delay notice arrives over the push channel.
    let frame = json!({
        "event": "rain_delay",
        "device_id": "dev-1",
        "delay": 24,
        "timestamp": "2026-04-03T12:00:00Z"
    })
    .to_string();

    let event = WireEvent::decode(&frame).expect("decode");
    let delta = convert::delta(&event, Utc::now()).expect("delta");
    let changes = store.apply_delta(delta);
    assert!(changes.changed.contains(&"prog-1".into()));

    let snapshot = store.snapshot();
    let program = snapshot.program(&"prog-1".into()).expect("program");
    let zones = snapshot.zones_of(&program.device_id);

    let window_start = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).single().expect("time");
    let window_end = Utc.with_ymd_and_hms(2026, 4, 8, 0, 0, 0).single().expect("time");
    let occurrences: Vec<_> = drizzle_core::project(&program, &zones, window_start, window_end)
        .expect("projection")
        .collect();

    // Day 4 (2026-04-04) falls inside the 24h delay window; days 1 and 7 do not.
    let day4: Vec<_> = occurrences
        .iter()
        .filter(|o| o.start.date_naive() == chrono::NaiveDate::from_ymd_opt(2026, 4, 4).expect("date"))
        .collect();
    assert!(!day4.is_empty());
    assert!(day4.iter().all(|o| o.status == OccurrenceStatus::SkippedRainDelay));

    let day1: Vec<_> = occurrences
        .iter()
        .filter(|o| o.start.date_naive() == chrono::NaiveDate::from_ymd_opt(2026, 4, 1).expect("date"))
        .collect();
    assert!(day1.iter().all(|o| o.status == OccurrenceStatus::Scheduled));
}

#[test]
fn reconnect_pull_repairs_a_flag_flipped_during_the_gap() {
    let store = seeded_store();

    // Server-side, the program was disabled while the stream was down.
    let mut repaired = pull();
    repaired.programs[0].enabled = false;

    let changes = store.apply_full(convert::full_state(&repaired));

    assert_eq!(changes.changed.len(), 1);
    assert!(changes.changed.contains(&"prog-1".into()));
    assert!(!store.snapshot().program(&"prog-1".into()).expect("program").enabled);

    // Reconciling the same state again is a no-op.
    let again = store.apply_full(convert::full_state(&repaired));
    assert!(again.is_empty());
}

#[test]
fn watering_notices_track_the_sequential_zone_queue() {
    let store = seeded_store();

    let start = |zone: &str| {
        let frame = json!({
            "event": "watering_in_progress_notice",
            "device_id": "dev-1",
            "zone_id": zone,
            "run_time": 10,
            "started_watering_station_at": "2026-04-01T06:00:00Z"
        })
        .to_string();
        let event = WireEvent::decode(&frame).expect("decode");
        store.apply_delta(convert::delta(&event, Utc::now()).expect("delta"));
    };

    start("z-1");
    assert!(store.snapshot().zone(&"z-1".into()).expect("zone").is_watering());

    start("z-2");
    let snapshot = store.snapshot();
    assert!(!snapshot.zone(&"z-1".into()).expect("zone").is_watering());
    assert!(snapshot.zone(&"z-2".into()).expect("zone").is_watering());

    let complete = json!({ "event": "watering_complete", "device_id": "dev-1" }).to_string();
    let event = WireEvent::decode(&complete).expect("decode");
    store.apply_delta(convert::delta(&event, Utc::now()).expect("delta"));

    assert!(!store.snapshot().zone(&"z-2".into()).expect("zone").is_watering());
}

#[test]
fn unknown_event_kinds_are_skippable_without_state_damage() {
    let store = seeded_store();
    let before = store.snapshot();

    let frame = json!({ "event": "pump_telemetry", "device_id": "dev-1" }).to_string();
    let err = WireEvent::decode(&frame).expect_err("unknown kind");
    assert!(matches!(err, drizzle_api::Error::UnknownEventKind(_)));

    // Nothing applied; the snapshot is untouched.
    assert_eq!(before.device_count(), store.snapshot().device_count());
}
