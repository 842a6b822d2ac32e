//! Optimistic mutations as apply / commit / compensate triples.
//!
//! `apply` runs before the gateway call, then exactly one of `commit` (with
//! the gateway's answer) or `compensate` runs after it. Pushed events may land
//! in between, so every step looks entries up by id and never leaves two
//! entries with the same id.
//!
//! A [`Transaction`] carries a mutation across the gateway call. If the
//! collection was reset meanwhile (sign-out), neither step touches it; if the
//! caller's future is dropped first, the mutation is compensated.

use api::{GatewayError, Note};
use tokio::sync::watch;

use super::remote::sort_by_recency;
use super::state::CollectionState;
use crate::error::NotesError;

pub(crate) trait Mutation {
    type Confirmed;

    fn apply(&mut self, notes: &mut Vec<Note>);
    fn commit(&self, notes: &mut Vec<Note>, confirmed: &Self::Confirmed);
    fn compensate(&self, notes: &mut Vec<Note>);
}

/// An applied mutation awaiting the gateway. Holds one unit of the loading
/// count until settled or dropped.
pub(crate) struct Transaction<'a, M: Mutation> {
    state: &'a watch::Sender<CollectionState>,
    mutation: M,
    epoch: u64,
    open: bool,
}

impl<'a, M: Mutation> Transaction<'a, M> {
    pub(crate) fn begin(state: &'a watch::Sender<CollectionState>, mut mutation: M) -> Self {
        let mut epoch = 0;
        state.send_modify(|s| {
            s.begin();
            mutation.apply(&mut s.notes);
            epoch = s.epoch();
        });
        Self {
            state,
            mutation,
            epoch,
            open: true,
        }
    }

    pub(crate) fn commit(mut self, confirmed: &M::Confirmed) {
        self.open = false;
        let epoch = self.epoch;
        let mutation = &self.mutation;
        self.state.send_modify(|s| {
            if s.epoch() == epoch {
                mutation.commit(&mut s.notes, confirmed);
            }
            s.finish();
        });
    }

    /// Compensate and record the gateway's message in the error slot.
    pub(crate) fn fail(mut self, operation: &str, err: GatewayError) -> NotesError {
        tracing::warn!("{} failed, rolling back: {}", operation, err);
        self.open = false;
        let epoch = self.epoch;
        let mutation = &self.mutation;
        let message = err.to_string();
        self.state.send_modify(|s| {
            if s.epoch() == epoch {
                mutation.compensate(&mut s.notes);
                s.error = Some(message);
            }
            s.finish();
        });
        NotesError::Gateway(err)
    }
}

impl<M: Mutation> Drop for Transaction<'_, M> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        tracing::debug!("Abandoned mutation, rolling back");
        let epoch = self.epoch;
        let mutation = &self.mutation;
        self.state.send_modify(|s| {
            if s.epoch() == epoch {
                mutation.compensate(&mut s.notes);
            }
            s.finish();
        });
    }
}

fn position(notes: &[Note], id: &str) -> Option<usize> {
    notes.iter().position(|n| n.id == id)
}

/// Replace the whole set with the server's rows. Nothing to undo.
pub(crate) struct ReplaceAll;

impl Mutation for ReplaceAll {
    type Confirmed = Vec<Note>;

    fn apply(&mut self, _notes: &mut Vec<Note>) {}

    fn commit(&self, notes: &mut Vec<Note>, rows: &Vec<Note>) {
        *notes = rows.clone();
        sort_by_recency(notes);
    }

    fn compensate(&self, _notes: &mut Vec<Note>) {}
}

/// Insert under a temporary id, swap in the server row on confirmation.
pub(crate) struct CreateNote {
    temp: Note,
}

impl CreateNote {
    pub(crate) fn new(temp: Note) -> Self {
        Self { temp }
    }
}

impl Mutation for CreateNote {
    type Confirmed = Note;

    fn apply(&mut self, notes: &mut Vec<Note>) {
        notes.insert(0, self.temp.clone());
    }

    fn commit(&self, notes: &mut Vec<Note>, confirmed: &Note) {
        let temp = position(notes, &self.temp.id);
        let pushed = position(notes, &confirmed.id);
        match (temp, pushed) {
            // The push for this insert arrived first.
            (Some(t), Some(p)) => {
                notes[p] = confirmed.clone();
                notes.remove(t);
            }
            (Some(t), None) => notes[t] = confirmed.clone(),
            (None, Some(p)) => notes[p] = confirmed.clone(),
            // Collection was cleared meanwhile.
            (None, None) => return,
        }
        sort_by_recency(notes);
    }

    fn compensate(&self, notes: &mut Vec<Note>) {
        notes.retain(|n| n.id != self.temp.id);
    }
}

/// Rewrite in place; restore the original on failure.
pub(crate) struct UpdateNote {
    original: Note,
    optimistic: Note,
}

impl UpdateNote {
    pub(crate) fn new(original: Note, optimistic: Note) -> Self {
        Self {
            original,
            optimistic,
        }
    }
}

impl Mutation for UpdateNote {
    type Confirmed = Note;

    fn apply(&mut self, notes: &mut Vec<Note>) {
        if let Some(i) = position(notes, &self.original.id) {
            notes[i] = self.optimistic.clone();
        }
    }

    fn commit(&self, notes: &mut Vec<Note>, confirmed: &Note) {
        if let Some(i) = position(notes, &confirmed.id) {
            notes[i] = confirmed.clone();
            sort_by_recency(notes);
        }
    }

    /// Only undoes our own write: a pushed value that replaced the optimistic
    /// one in the meantime is newer and stays.
    fn compensate(&self, notes: &mut Vec<Note>) {
        if let Some(i) = position(notes, &self.original.id) {
            if notes[i] == self.optimistic {
                notes[i] = self.original.clone();
            }
        }
    }
}

/// Remove; reinsert at the old position on failure.
pub(crate) struct DeleteNote {
    id: String,
    removed: Option<(usize, Note)>,
}

impl DeleteNote {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            removed: None,
        }
    }
}

impl Mutation for DeleteNote {
    type Confirmed = ();

    fn apply(&mut self, notes: &mut Vec<Note>) {
        if let Some(i) = position(notes, &self.id) {
            self.removed = Some((i, notes.remove(i)));
        }
    }

    fn commit(&self, _notes: &mut Vec<Note>, _confirmed: &()) {}

    fn compensate(&self, notes: &mut Vec<Note>) {
        let Some((index, note)) = &self.removed else {
            return;
        };
        if position(notes, &note.id).is_some() {
            return;
        }
        notes.insert((*index).min(notes.len()), note.clone());
        sort_by_recency(notes);
    }
}
