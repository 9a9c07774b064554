// ── Projection output ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// Why a projected occurrence will or will not water.
///
/// Skipped occurrences are still emitted so a calendar can render them
/// distinctly instead of silently dropping expected events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccurrenceStatus {
    Scheduled,
    SkippedRainDelay,
    SkippedDisabled,
}

/// One concrete projected watering interval for one zone.
///
/// Ephemeral: recomputed on demand from a snapshot and never cached,
/// because override state can change between projection calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WateringOccurrence {
    pub program_id: EntityId,
    pub zone_id: EntityId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: OccurrenceStatus,
}
