//! # Row-level `notes` table
//!
//! [`NotesTable`] is the slice of the hosted database the notes feature uses:
//! owner-filtered reads ordered by `updated_at` descending, single-row writes
//! that return the stored row, and a change feed scoped to one owner.
//!
//! The backend re-stamps `updated_at` on every write, so whatever row a write
//! returns is authoritative for timestamps.

use std::future::Future;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::models::{NewNote, Note, NoteChange, NotePatch};
use crate::subscription::Subscription;

/// Callback invoked for every pushed row change.
pub type ChangeListener = Arc<dyn Fn(NoteChange) + Send + Sync>;

pub trait NotesTable {
    /// All rows owned by `user_id`, newest `updated_at` first.
    fn select_by_owner(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<Note>, GatewayError>>;

    fn insert(&self, note: NewNote) -> impl Future<Output = Result<Note, GatewayError>>;

    /// Update the row matching both `id` and `user_id`.
    fn update(
        &self,
        id: &str,
        user_id: &str,
        patch: &NotePatch,
    ) -> impl Future<Output = Result<Note, GatewayError>>;

    /// Delete the row matching both `id` and `user_id`.
    fn delete(&self, id: &str, user_id: &str) -> impl Future<Output = Result<(), GatewayError>>;

    /// Push insert/update/delete events for rows owned by `user_id` until the
    /// returned handle is closed.
    fn subscribe(&self, user_id: &str, listener: ChangeListener) -> Subscription;
}
