//! Reconciling pushed row changes into the local set.

use api::{Note, NoteChange};

/// Newest `updated_at` first. Stable, so equal timestamps keep their order.
pub(crate) fn sort_by_recency(notes: &mut [Note]) {
    notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Apply one push event. Inserts are skipped if the id is already present
/// (the local create's confirmation may have landed first); updates and
/// deletes for unknown ids are no-ops.
pub(crate) fn apply_change(notes: &mut Vec<Note>, change: NoteChange) {
    match change {
        NoteChange::Insert { new } => {
            if !notes.iter().any(|n| n.id == new.id) {
                notes.insert(0, new);
            }
        }
        NoteChange::Update { new } => {
            if let Some(slot) = notes.iter_mut().find(|n| n.id == new.id) {
                *slot = new;
            }
        }
        NoteChange::Delete { old } => notes.retain(|n| n.id != old.id),
    }
    sort_by_recency(notes);
}
