// ── Authoritative state store ──
//
// Single writer, any number of wait-free readers. The current snapshot
// lives behind an `ArcSwap`: mutation clones it, applies, rebuilds the
// reverse indexes, and swaps the whole world in one publish. Changed-id
// sets fan out to subscribers over a broadcast channel with the same
// shape regardless of whether the mutation came from a live delta or a
// full reconciliation.

mod delta;
mod reconcile;
mod snapshot;

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::debug;

pub use delta::{ChangeSet, DeltaEvent, FullState};
pub use snapshot::Snapshot;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Central store for all account entities.
pub struct StateStore {
    current: ArcSwap<Snapshot>,
    /// Serializes writers; delta volume is low enough that one mutation
    /// in flight at a time is sufficient.
    write_lock: Mutex<()>,
    changes_tx: broadcast::Sender<ChangeSet>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    last_push_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (last_full_refresh, _) = watch::channel(None);
        let (last_push_event, _) = watch::channel(None);

        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
            changes_tx,
            last_full_refresh,
            last_push_event,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The current snapshot. Wait-free; the returned view is immutable
    /// and internally consistent for as long as the caller holds it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Subscribe to changed-id notifications.
    pub fn changes(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes_tx.subscribe()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Apply one confirmed delta from the push channel.
    ///
    /// Returns the ids whose observable value changed; empty for
    /// no-ops (stale revision, duplicate redelivery, unknown entity).
    pub fn apply_delta(&self, delta: DeltaEvent) -> ChangeSet {
        let changes = self.mutate(|next, changes| next.apply(delta, false, changes));
        let _ = self.last_push_event.send(Some(Utc::now()));
        changes
    }

    /// Apply optimistic writes from the command façade.
    ///
    /// Records touched here are marked provisional: the next confirmed
    /// event for the entity supersedes them regardless of revision.
    pub fn apply_provisional(&self, deltas: Vec<DeltaEvent>) -> ChangeSet {
        self.mutate(|next, changes| {
            let mut mutated = false;
            for delta in deltas {
                mutated |= next.apply(delta, true, changes);
            }
            mutated
        })
    }

    /// Replace the snapshot with the result of a full pull, diffing
    /// against the previous snapshot so downstream notifications look
    /// identical to live-delta notifications.
    pub fn apply_full(&self, pulled: FullState) -> ChangeSet {
        let guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let received_at = Utc::now();

        let (next, changes) = reconcile::reconcile(&self.current.load(), pulled, received_at);
        self.current.store(Arc::new(next));
        drop(guard);

        if !changes.is_empty() {
            debug!(
                changed = changes.changed.len(),
                removed = changes.removed.len(),
                "full reconciliation applied"
            );
            let _ = self.changes_tx.send(changes.clone());
        }
        let _ = self.last_full_refresh.send(Some(received_at));
        changes
    }

    /// Clone-apply-swap under the writer lock.
    fn mutate(&self, f: impl FnOnce(&mut Snapshot, &mut ChangeSet) -> bool) -> ChangeSet {
        let guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut next = Snapshot::clone(&self.current.load());
        let mut changes = ChangeSet::default();
        let mutated = f(&mut next, &mut changes);

        if mutated {
            next.rebuild_indexes();
            self.current.store(Arc::new(next));
        }
        drop(guard);

        if !changes.is_empty() {
            let _ = self.changes_tx.send(changes.clone());
        }
        changes
    }

    // ── Freshness metadata ───────────────────────────────────────────

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_push_event(&self) -> Option<DateTime<Utc>> {
        *self.last_push_event.borrow()
    }

    /// How long ago the last full refresh occurred, or `None` if never refreshed.
    pub fn data_age(&self) -> Option<chrono::Duration> {
        self.last_full_refresh().map(|t| Utc::now() - t)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
