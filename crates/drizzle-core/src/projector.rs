// ── Schedule projection ──
//
// Turns a program's recurrence rule plus live override state into
// concrete future watering intervals. Pure computation over values the
// caller hands in: the projector never touches the store, so a
// projection can never observe a mutation mid-computation.
//
// Output is a lazy, finite iterator bounded to the requested window.
// Skipped occurrences (rain delay, disabled program or zone) are still
// emitted so a calendar can render them distinctly.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};

use crate::error::CoreError;
use crate::model::{
    EntityId, OccurrenceStatus, Program, RecurrenceRule, WateringOccurrence, Zone,
};

/// Project a program's occurrences for every zone it runs, bounded to
/// `[window_start, window_end)`.
///
/// Zones run sequentially within a program: each run's start is offset
/// by the cumulative duration of the runs before it. Runs referencing a
/// zone absent from `zones` project nothing.
///
/// Fails with [`CoreError::InvalidWindow`] when `window_end <= window_start`.
pub fn project(
    program: &Program,
    zones: &[Arc<Zone>],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Projection, CoreError> {
    if window_end <= window_start {
        return Err(CoreError::InvalidWindow {
            start: window_start,
            end: window_end,
        });
    }

    // Resolve (zone, duration) pairs to templates with cumulative offsets.
    let mut runs = Vec::with_capacity(program.runs.len());
    let mut offset = TimeDelta::zero();
    for run in &program.runs {
        let duration = TimeDelta::from_std(run.duration).unwrap_or_else(|_| TimeDelta::zero());
        if let Some(zone) = zones.iter().find(|z| z.id == run.zone_id) {
            runs.push(RunTemplate {
                zone_id: zone.id.clone(),
                offset,
                duration,
                zone_enabled: zone.enabled,
            });
        }
        offset += duration;
    }

    // The last run's start can trail the nominal start by the whole
    // program length, so date scanning begins that far before the window.
    let scan_start = (window_start - offset).date_naive();
    let scan_end = window_end.date_naive();

    Ok(Projection {
        program_id: program.id.clone(),
        program_enabled: program.enabled,
        rain_delay_until: program.rain_delay_until,
        rain_delay_started_at: program.rain_delay_started_at,
        start_time: program.start_time,
        window_start,
        window_end,
        days: DayIter::new(&program.recurrence, scan_start, scan_end),
        runs,
        current_date: None,
        run_idx: 0,
    })
}

/// One resolved program step.
#[derive(Debug)]
struct RunTemplate {
    zone_id: EntityId,
    offset: TimeDelta,
    duration: TimeDelta,
    zone_enabled: bool,
}

/// Lazy occurrence sequence for one program over one window.
///
/// Finite by construction; restart by calling [`project`] again.
#[derive(Debug)]
pub struct Projection {
    program_id: EntityId,
    program_enabled: bool,
    rain_delay_until: Option<DateTime<Utc>>,
    rain_delay_started_at: Option<DateTime<Utc>>,
    start_time: NaiveTime,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    days: DayIter,
    runs: Vec<RunTemplate>,
    current_date: Option<NaiveDate>,
    run_idx: usize,
}

impl Iterator for Projection {
    type Item = WateringOccurrence;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let date = match self.current_date {
                Some(d) => d,
                None => {
                    let d = self.days.next()?;
                    self.current_date = Some(d);
                    self.run_idx = 0;
                    d
                }
            };

            let day_start = date.and_time(self.start_time).and_utc();

            while let Some(run) = self.runs.get(self.run_idx) {
                self.run_idx += 1;

                let start = day_start + run.offset;
                if start < self.window_start || start >= self.window_end {
                    continue;
                }

                return Some(WateringOccurrence {
                    program_id: self.program_id.clone(),
                    zone_id: run.zone_id.clone(),
                    start,
                    end: start + run.duration,
                    status: self.status_for(start, run.zone_enabled),
                });
            }

            self.current_date = None;
        }
    }
}

impl Projection {
    /// Override state, evaluated per occurrence after date generation.
    /// Rain delay is checked first, then the enable flags.
    ///
    /// The delay suppresses occurrences starting inside
    /// `[started_at, until]`; when the delay's start is unknown, every
    /// occurrence starting at or before `until` is suppressed.
    fn status_for(&self, start: DateTime<Utc>, zone_enabled: bool) -> OccurrenceStatus {
        let rain_delayed = self.rain_delay_until.is_some_and(|until| {
            until >= start && self.rain_delay_started_at.is_none_or(|s| s <= start)
        });

        if rain_delayed {
            OccurrenceStatus::SkippedRainDelay
        } else if !self.program_enabled || !zone_enabled {
            OccurrenceStatus::SkippedDisabled
        } else {
            OccurrenceStatus::Scheduled
        }
    }
}

// ── Date enumeration per rule variant ────────────────────────────────

/// Yields the calendar dates a rule matches inside `[start, end]`.
///
/// Interval rules step arithmetically (O(window / interval)); the
/// other variants walk days and test membership.
#[derive(Debug)]
enum DayIter {
    Interval {
        next: Option<NaiveDate>,
        step: u32,
        end: NaiveDate,
    },
    Scan {
        rule: RecurrenceRule,
        next: Option<NaiveDate>,
        end: NaiveDate,
    },
}

impl DayIter {
    fn new(rule: &RecurrenceRule, start: NaiveDate, end: NaiveDate) -> Self {
        match rule {
            RecurrenceRule::IntervalDays { interval, start_date } => {
                // A zero interval cannot recur; an empty iterator keeps the
                // contract honest instead of looping on one date.
                if *interval == 0 {
                    return Self::Interval { next: None, step: 0, end };
                }

                // First multiple of `interval` days from `start_date` that
                // lands at or after the scan start.
                let first = if *start_date >= start {
                    Some(*start_date)
                } else {
                    let elapsed = (start - *start_date).num_days();
                    let step = i64::from(*interval);
                    let k = elapsed.div_euclid(step) + i64::from(elapsed % step != 0);
                    start_date.checked_add_days(Days::new(
                        (k * step).try_into().unwrap_or(u64::MAX),
                    ))
                };

                Self::Interval {
                    next: first.filter(|d| *d <= end),
                    step: *interval,
                    end,
                }
            }
            rule => Self::Scan {
                rule: rule.clone(),
                next: Some(start),
                end,
            },
        }
    }
}

impl Iterator for DayIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Interval { next, step, end } => {
                let current = (*next)?;
                *next = current
                    .checked_add_days(Days::new(u64::from(*step)))
                    .filter(|d| *d <= *end);
                Some(current)
            }
            Self::Scan { rule, next, end } => {
                let mut candidate = (*next)?;
                loop {
                    if candidate > *end {
                        *next = None;
                        return None;
                    }
                    let following = candidate.checked_add_days(Days::new(1));
                    if rule.matches(candidate) {
                        *next = following;
                        return Some(candidate);
                    }
                    candidate = following?;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Weekday};
    use pretty_assertions::assert_eq;

    use crate::model::{RunState, ZoneRun};

    use super::*;

    const DAY: i64 = 86_400;

    /// Day 0 of the test calendar, at midnight.
    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(n * DAY)
    }

    fn at(n: i64, h: u32, m: u32) -> DateTime<Utc> {
        day(n) + TimeDelta::seconds(i64::from(h) * 3600 + i64::from(m) * 60)
    }

    fn zone(id: &str, enabled: bool) -> Arc<Zone> {
        Arc::new(Zone {
            id: id.into(),
            device_id: "d1".into(),
            name: id.to_owned(),
            enabled,
            run_state: RunState::Idle,
            started_watering_at: None,
            smart_watering: false,
        })
    }

    fn every_three_days(runs: &[(&str, u64)]) -> Program {
        Program {
            id: "p1".into(),
            device_id: "d1".into(),
            name: "Morning".into(),
            enabled: true,
            recurrence: RecurrenceRule::IntervalDays {
                interval: 3,
                start_date: day(0).date_naive(),
            },
            start_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            runs: runs
                .iter()
                .map(|(z, secs)| ZoneRun {
                    zone_id: (*z).into(),
                    duration: Duration::from_secs(*secs),
                })
                .collect(),
            rain_delay_until: None,
            rain_delay_started_at: None,
        }
    }

    #[test]
    fn interval_rule_projects_expected_days() {
        // Every 3 days from day 0, one zone, 10 minutes at 06:00,
        // window [day 0, day 7): occurrences at days 0, 3, and 6.
        let program = every_three_days(&[("z1", 600)]);
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        assert_eq!(got.len(), 3);
        assert_eq!(got[0].start, at(0, 6, 0));
        assert_eq!(got[0].end, at(0, 6, 10));
        assert_eq!(got[1].start, at(3, 6, 0));
        assert_eq!(got[2].start, at(6, 6, 0));
        assert!(got.iter().all(|o| o.status == OccurrenceStatus::Scheduled));
    }

    #[test]
    fn rain_delay_marks_covered_occurrences_without_dropping_them() {
        // A 24h delay running until day 3 18:00: the day-3 occurrence is
        // skipped, days 0 and 6 stay scheduled.
        let mut program = every_three_days(&[("z1", 600)]);
        program.rain_delay_until = Some(at(3, 18, 0));
        program.rain_delay_started_at = Some(at(2, 18, 0));
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        assert_eq!(got.len(), 3);
        assert_eq!(got[0].status, OccurrenceStatus::Scheduled);
        assert_eq!(got[1].status, OccurrenceStatus::SkippedRainDelay);
        assert_eq!(got[2].status, OccurrenceStatus::Scheduled);
        assert_eq!(got[1].start, at(3, 6, 0));
    }

    #[test]
    fn rain_delay_without_a_start_covers_everything_up_to_until() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.rain_delay_until = Some(at(3, 18, 0));
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        assert_eq!(got[0].status, OccurrenceStatus::SkippedRainDelay);
        assert_eq!(got[1].status, OccurrenceStatus::SkippedRainDelay);
        assert_eq!(got[2].status, OccurrenceStatus::Scheduled);
    }

    #[test]
    fn zones_run_sequentially_with_cumulative_offsets() {
        let program = every_three_days(&[("z1", 600), ("z2", 300), ("z3", 900)]);
        let zones = vec![zone("z1", true), zone("z2", true), zone("z3", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(1)).unwrap().collect();

        assert_eq!(got.len(), 3);
        assert_eq!(got[0].start, at(0, 6, 0));
        assert_eq!(got[0].end, at(0, 6, 10));
        assert_eq!(got[1].start, at(0, 6, 10));
        assert_eq!(got[1].end, at(0, 6, 15));
        assert_eq!(got[2].start, at(0, 6, 15));
        assert_eq!(got[2].end, at(0, 6, 30));
    }

    #[test]
    fn occurrence_starts_stay_inside_the_window() {
        let program = every_three_days(&[("z1", 600)]);
        let zones = vec![zone("z1", true)];

        // Window starting after 06:00 excludes day 0's occurrence.
        let got: Vec<_> = project(&program, &zones, at(0, 7, 0), at(6, 6, 0))
            .unwrap()
            .collect();

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].start, at(3, 6, 0));

        for o in &got {
            assert!(o.start >= at(0, 7, 0));
            assert!(o.start < at(6, 6, 0));
        }
    }

    #[test]
    fn disabled_program_emits_skipped_occurrences() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.enabled = false;
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|o| o.status == OccurrenceStatus::SkippedDisabled));
    }

    #[test]
    fn disabled_zone_skips_only_its_own_occurrences() {
        let program = every_three_days(&[("z1", 600), ("z2", 300)]);
        let zones = vec![zone("z1", true), zone("z2", false)];

        let got: Vec<_> = project(&program, &zones, day(0), day(1)).unwrap().collect();

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].status, OccurrenceStatus::Scheduled);
        assert_eq!(got[1].status, OccurrenceStatus::SkippedDisabled);
    }

    #[test]
    fn rain_delay_outranks_disabled() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.enabled = false;
        program.rain_delay_until = Some(at(0, 12, 0));
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(1)).unwrap().collect();

        assert_eq!(got[0].status, OccurrenceStatus::SkippedRainDelay);
    }

    #[test]
    fn weekday_rule_projects_matching_days_only() {
        let mut program = every_three_days(&[("z1", 600)]);
        // 2026-04-01 (day 0) is a Wednesday.
        program.recurrence = RecurrenceRule::Weekdays(vec![Weekday::Wed, Weekday::Sat]);
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        let starts: Vec<_> = got.iter().map(|o| o.start).collect();
        assert_eq!(starts, vec![at(0, 6, 0), at(3, 6, 0)]);
    }

    #[test]
    fn parity_rules_follow_day_of_month() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.recurrence = RecurrenceRule::OddDays;
        let zones = vec![zone("z1", true)];

        // April 1 is odd; days 0 (1st), 2 (3rd), 4 (5th), 6 (7th).
        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        assert_eq!(got.len(), 4);
        assert_eq!(got[0].start, at(0, 6, 0));
        assert_eq!(got[1].start, at(2, 6, 0));
    }

    #[test]
    fn empty_run_list_projects_nothing() {
        let program = every_three_days(&[]);

        let got: Vec<_> = project(&program, &[], day(0), day(7)).unwrap().collect();
        assert!(got.is_empty());
    }

    #[test]
    fn window_before_the_interval_anchor_projects_nothing() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.recurrence = RecurrenceRule::IntervalDays {
            interval: 3,
            start_date: day(30).date_naive(),
        };
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();
        assert!(got.is_empty());
    }

    #[test]
    fn zero_interval_projects_nothing() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.recurrence = RecurrenceRule::IntervalDays {
            interval: 0,
            start_date: day(0).date_naive(),
        };
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();
        assert!(got.is_empty());
    }

    #[test]
    fn inverted_window_is_a_contract_violation() {
        let program = every_three_days(&[("z1", 600)]);
        let zones = vec![zone("z1", true)];

        let err = project(&program, &zones, day(7), day(7)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidWindow { .. }));
    }

    #[test]
    fn runs_for_unknown_zones_are_skipped() {
        let program = every_three_days(&[("z1", 600), ("ghost", 300)]);
        let zones = vec![zone("z1", true)];

        let got: Vec<_> = project(&program, &zones, day(0), day(1)).unwrap().collect();

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].zone_id, "z1".into());
    }

    #[test]
    fn projection_is_restartable() {
        let program = every_three_days(&[("z1", 600)]);
        let zones = vec![zone("z1", true)];

        let first: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();
        let second: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        assert_eq!(first, second);
    }

    #[test]
    fn interval_anchor_far_in_the_past_stays_cheap_and_correct() {
        let mut program = every_three_days(&[("z1", 600)]);
        program.recurrence = RecurrenceRule::IntervalDays {
            interval: 3,
            start_date: day(-3000).date_naive(),
        };
        let zones = vec![zone("z1", true)];

        // -3000 is a multiple of 3, so the phase matches day 0 exactly.
        let got: Vec<_> = project(&program, &zones, day(0), day(7)).unwrap().collect();

        let starts: Vec<_> = got.iter().map(|o| o.start).collect();
        assert_eq!(starts, vec![at(0, 6, 0), at(3, 6, 0), at(6, 6, 0)]);
    }
}
