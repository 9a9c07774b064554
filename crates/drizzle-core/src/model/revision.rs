// ── Per-entity revision ordering ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an entity's current value came from, for last-writer-wins
/// conflict resolution.
///
/// Events that carry a per-entity sequence number become `Server`
/// revisions and order strictly among themselves. Events without one
/// (and full-pull results) are stamped with their local receipt time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Revision {
    /// Sequence number assigned by the service.
    Server(u64),
    /// Local arrival timestamp, assigned when the source carried no
    /// sequence number.
    Receipt(DateTime<Utc>),
}

impl Revision {
    /// Whether an incoming event with this revision must be dropped in
    /// favor of the stored one.
    ///
    /// Only a strictly lower server sequence is stale: redeliveries and
    /// reorderings on the versioned stream lose to what is already
    /// stored. Every other combination accepts the incoming value --
    /// receipt-stamped events are ordered by arrival, and the server is
    /// authoritative whenever it speaks.
    pub fn is_stale_against(&self, stored: &Revision) -> bool {
        matches!((self, stored), (Self::Server(incoming), Self::Server(current)) if incoming < current)
    }
}
