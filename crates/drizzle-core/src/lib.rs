// drizzle-core: State synchronization and schedule projection engine
// between drizzle-api and consumers (host automation platforms).

pub mod command;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod model;
pub mod projector;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::ControllerConfig;
pub use controller::{ConnectionState, Controller};
pub use error::CoreError;
pub use projector::{project, Projection};
pub use store::{ChangeSet, DeltaEvent, FullState, Snapshot, StateStore};
pub use stream::ChangeStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Connectivity, Device, DeviceKind, EntityId, OccurrenceStatus, Program, RecurrenceRule,
    Revision, RunState, WateringOccurrence, Zone, ZoneRun,
};
