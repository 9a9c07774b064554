// ── Full-state reconciliation ──
//
// Diffs a pulled full state against the current snapshot to repair
// whatever the push channel missed. Pure and order-independent: the
// result never depends on iteration order of the inputs, and pulled
// state always wins over cached state. Entities absent from the pull
// are tombstoned by omission.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{EntityId, Revision};

use super::delta::{ChangeSet, FullState};
use super::snapshot::{Record, Snapshot};

/// Build the post-reconciliation snapshot and the uniform change-id
/// sets. Unchanged entities keep their stored revision (so later
/// versioned deltas still compare correctly); changed and added ones
/// are stamped with the pull's receipt time. Provisional flags clear
/// across the board -- a full pull is the server speaking.
pub(crate) fn reconcile(
    current: &Snapshot,
    pulled: FullState,
    received_at: DateTime<Utc>,
) -> (Snapshot, ChangeSet) {
    let mut changes = ChangeSet::default();

    let devices = reconcile_map(
        &current.devices,
        pulled.devices.into_iter().map(|d| (d.id.clone(), d)),
        received_at,
        &mut changes,
    );
    let zones = reconcile_map(
        &current.zones,
        pulled.zones.into_iter().map(|z| (z.id.clone(), z)),
        received_at,
        &mut changes,
    );
    let programs = reconcile_map(
        &current.programs,
        pulled.programs.into_iter().map(|p| (p.id.clone(), p)),
        received_at,
        &mut changes,
    );

    let mut next = Snapshot {
        devices,
        zones,
        programs,
        ..Snapshot::default()
    };
    next.rebuild_indexes();

    (next, changes)
}

/// Reconcile one entity kind: field-by-field compare for ids present on
/// both sides, added for pull-only ids, removed for cache-only ids.
fn reconcile_map<T: PartialEq>(
    current: &HashMap<EntityId, Record<T>>,
    pulled: impl Iterator<Item = (EntityId, T)>,
    received_at: DateTime<Utc>,
    changes: &mut ChangeSet,
) -> HashMap<EntityId, Record<T>> {
    let mut next: HashMap<EntityId, Record<T>> = HashMap::new();

    for (id, value) in pulled {
        match current.get(&id) {
            Some(rec) if *rec.value == value => {
                // Unchanged; confirm in place. A provisional record whose
                // optimistic value the server now reports back is simply
                // confirmed without a notification.
                next.insert(
                    id,
                    Record {
                        value: std::sync::Arc::clone(&rec.value),
                        revision: rec.revision,
                        provisional: false,
                    },
                );
            }
            _ => {
                changes.changed.insert(id.clone());
                next.insert(id, Record::new(value, Revision::Receipt(received_at), false));
            }
        }
    }

    for id in current.keys() {
        if !next.contains_key(id) {
            changes.removed.insert(id.clone());
        }
    }

    next
}
