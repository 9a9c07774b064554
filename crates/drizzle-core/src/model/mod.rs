// ── Domain model ──
//
// Pure value types shared across the store, projector, and façade.
// Forward references only: zones point at their device, programs at
// their zones, always by id.

mod device;
mod entity_id;
mod occurrence;
mod program;
mod revision;
mod zone;

pub use device::{Connectivity, Device, DeviceKind};
pub use entity_id::EntityId;
pub use occurrence::{OccurrenceStatus, WateringOccurrence};
pub use program::{Program, RecurrenceRule, ZoneRun};
pub use revision::Revision;
pub use zone::{RunState, Zone};
