// ── Program domain types ──

use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// When a program recurs.
///
/// A pure value: program updates replace the whole rule rather than
/// patching fields, so a half-applied update can never mix variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceRule {
    /// Every `interval` days counted from `start_date`.
    /// `interval == 0` cannot recur and never matches a date.
    IntervalDays { interval: u32, start_date: NaiveDate },
    /// On the listed weekdays.
    Weekdays(Vec<Weekday>),
    /// On odd calendar days of the month.
    OddDays,
    /// On even calendar days of the month.
    EvenDays,
}

impl RecurrenceRule {
    /// Whether the rule matches a calendar date.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::IntervalDays { interval, start_date } => {
                if *interval == 0 || date < *start_date {
                    return false;
                }
                let elapsed = (date - *start_date).num_days();
                elapsed % i64::from(*interval) == 0
            }
            Self::Weekdays(days) => days.contains(&date.weekday()),
            Self::OddDays => date.day() % 2 == 1,
            Self::EvenDays => date.day() % 2 == 0,
        }
    }
}

/// One step in a program: open `zone_id` for `duration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRun {
    pub zone_id: EntityId,
    pub duration: Duration,
}

/// A named, scheduled sequence of zone runs.
///
/// Zones in `runs` execute sequentially in list order; they reference
/// zones of `device_id` by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: EntityId,
    pub device_id: EntityId,
    pub name: String,
    pub enabled: bool,
    pub recurrence: RecurrenceRule,
    /// Time of day the first zone opens.
    pub start_time: NaiveTime,
    pub runs: Vec<ZoneRun>,
    /// Watering suppressed for occurrences starting at or before this.
    pub rain_delay_until: Option<DateTime<Utc>>,
    /// When the active rain delay began; bounds the suppressed interval
    /// from below when known.
    pub rain_delay_started_at: Option<DateTime<Utc>>,
}

impl Program {
    /// Total sequential run time across all zones.
    pub fn total_run_time(&self) -> Duration {
        self.runs.iter().map(|r| r.duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn interval_rule_matches_multiples_only() {
        let rule = RecurrenceRule::IntervalDays {
            interval: 3,
            start_date: date(2026, 4, 1),
        };

        assert!(rule.matches(date(2026, 4, 1)));
        assert!(!rule.matches(date(2026, 4, 2)));
        assert!(rule.matches(date(2026, 4, 4)));
        assert!(rule.matches(date(2026, 4, 7)));
    }

    #[test]
    fn interval_rule_never_matches_before_start() {
        let rule = RecurrenceRule::IntervalDays {
            interval: 3,
            start_date: date(2026, 4, 10),
        };
        assert!(!rule.matches(date(2026, 4, 7)));
    }

    #[test]
    fn zero_interval_never_matches() {
        let rule = RecurrenceRule::IntervalDays {
            interval: 0,
            start_date: date(2026, 4, 1),
        };
        assert!(!rule.matches(date(2026, 4, 1)));
        assert!(!rule.matches(date(2026, 4, 2)));
    }

    #[test]
    fn weekday_rule_matches_listed_days() {
        let rule = RecurrenceRule::Weekdays(vec![Weekday::Mon, Weekday::Fri]);

        // 2026-04-06 is a Monday
        assert!(rule.matches(date(2026, 4, 6)));
        assert!(!rule.matches(date(2026, 4, 7)));
        assert!(rule.matches(date(2026, 4, 10)));
    }

    #[test]
    fn parity_rules_split_the_month() {
        assert!(RecurrenceRule::OddDays.matches(date(2026, 4, 15)));
        assert!(!RecurrenceRule::OddDays.matches(date(2026, 4, 16)));
        assert!(RecurrenceRule::EvenDays.matches(date(2026, 4, 16)));
    }

    #[test]
    fn total_run_time_sums_sequential_zones() {
        let program = Program {
            id: "p".into(),
            device_id: "d".into(),
            name: "Morning".into(),
            enabled: true,
            recurrence: RecurrenceRule::OddDays,
            start_time: NaiveTime::from_hms_opt(6, 0, 0).expect("valid time"),
            runs: vec![
                ZoneRun { zone_id: "z1".into(), duration: Duration::from_secs(600) },
                ZoneRun { zone_id: "z2".into(), duration: Duration::from_secs(300) },
            ],
            rain_delay_until: None,
            rain_delay_started_at: None,
        };

        assert_eq!(program.total_run_time(), Duration::from_secs(900));
    }
}
