//! # Notes collection store
//!
//! [`NotesStore`] mirrors the signed-in user's rows of the remote `notes`
//! table. Local writes are applied optimistically, then committed with the
//! gateway's row or compensated on failure (see [`mutation`]); pushed row
//! changes are merged by [`remote::apply_change`]. Any of these may interleave
//! at a gateway suspension point, and none of them can produce two entries
//! with the same id.
//!
//! State is published through a `tokio::sync::watch` channel. The session is
//! only read, through a [`SessionWatch`]; operations that need a user fail
//! with [`NotesError::Unauthenticated`] without contacting the gateway.

mod mutation;
mod remote;
mod state;

pub use state::CollectionState;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use api::{GatewayError, NewNote, Note, NoteChange, NotePatch, NotesTable, Subscription, TEMP_ID_PREFIX};
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::NotesError;
use crate::session::SessionWatch;
use mutation::{CreateNote, DeleteNote, Mutation, ReplaceAll, Transaction, UpdateNote};
use remote::apply_change;

/// The push subscription owned by an active store.
struct Feed {
    user_id: String,
    subscription: Subscription,
}

pub struct NotesStore<T> {
    table: T,
    session: SessionWatch,
    state: Arc<watch::Sender<CollectionState>>,
    feed: Mutex<Option<Feed>>,
}

impl<T: NotesTable> NotesStore<T> {
    pub fn new(table: T, session: SessionWatch) -> Self {
        let (state, _) = watch::channel(CollectionState::default());
        Self {
            table,
            session,
            state: Arc::new(state),
            feed: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CollectionState> {
        self.state.subscribe()
    }

    /// Replace the whole set with the server's rows.
    pub async fn fetch_all(&self) -> Result<usize, NotesError> {
        let user_id = self.require_user()?;
        let tx = Transaction::begin(&self.state, ReplaceAll);

        match self.table.select_by_owner(&user_id).await {
            Ok(rows) => {
                if self.session.user_id().as_deref() != Some(user_id.as_str()) {
                    tracing::debug!("Dropping fetched notes: session changed");
                    drop(tx);
                    return Err(NotesError::Unauthenticated);
                }
                let count = rows.len();
                tracing::debug!("Fetched {} notes", count);
                tx.commit(&rows);
                Ok(count)
            }
            Err(e) => Err(tx.fail("Fetching notes", e)),
        }
    }

    /// Create a note. It is visible at the top under a `temp-` id until the
    /// gateway confirms it.
    pub async fn create(&self, title: &str, content: &str) -> Result<Note, NotesError> {
        let user_id = self.require_user()?;
        let now = Utc::now();
        let temp = Note {
            id: format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()),
            user_id: user_id.clone(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        let payload = NewNote {
            user_id,
            title: title.to_string(),
            content: content.to_string(),
        };

        let note = self
            .transact("Creating note", CreateNote::new(temp), self.table.insert(payload))
            .await?;
        tracing::debug!("Created note {}", note.id);
        Ok(note)
    }

    /// Patch title and/or content. The original is restored exactly if the
    /// gateway refuses.
    pub async fn update(&self, id: &str, patch: NotePatch) -> Result<Note, NotesError> {
        let user_id = self.require_user()?;
        let original = self.state.borrow().get(id).cloned();
        let Some(original) = original else {
            return Err(self.not_found(id));
        };
        let optimistic = original.patched(&patch, Utc::now());

        let note = self
            .transact(
                "Updating note",
                UpdateNote::new(original, optimistic),
                self.table.update(id, &user_id, &patch),
            )
            .await?;
        tracing::debug!("Updated note {}", note.id);
        Ok(note)
    }

    pub async fn delete(&self, id: &str) -> Result<(), NotesError> {
        let user_id = self.require_user()?;
        if self.state.borrow().get(id).is_none() {
            return Err(self.not_found(id));
        }

        self.transact("Deleting note", DeleteNote::new(id), self.table.delete(id, &user_id))
            .await?;
        tracing::debug!("Deleted note {}", id);
        Ok(())
    }

    pub fn set_search_query(&self, query: &str) {
        let query = query.to_string();
        self.state.send_modify(|s| s.search_query = query);
    }

    /// Recomputed from the current set on every call.
    pub fn get_filtered(&self) -> Vec<Note> {
        self.state.borrow().filtered()
    }

    pub fn select(&self, id: Option<&str>) {
        let id = id.map(str::to_string);
        self.state.send_modify(|s| s.selected_id = id);
    }

    pub fn selected(&self) -> Option<Note> {
        self.state.borrow().selected().cloned()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_modify(|s| s.error = Some(message));
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Open the push feed for the current user. Events are merged until the
    /// returned handle is closed; after that, late deliveries are dropped.
    /// Without a session this is a closed no-op handle.
    pub fn subscribe_to_remote_changes(&self) -> Subscription {
        let Some(user_id) = self.session.user_id() else {
            return Subscription::noop();
        };

        let active = Arc::new(AtomicBool::new(true));
        let listening = active.clone();
        let state = self.state.clone();
        let mut upstream = self.table.subscribe(
            &user_id,
            Arc::new(move |change: NoteChange| {
                if !listening.load(Ordering::SeqCst) {
                    tracing::debug!("Ignoring {} after feed closed", change.id());
                    return;
                }
                tracing::debug!("Push event for note {}", change.id());
                state.send_modify(|s| apply_change(&mut s.notes, change));
            }),
        );
        tracing::debug!("Subscribed to note changes");

        Subscription::new(move || {
            active.store(false, Ordering::SeqCst);
            upstream.close();
        })
    }

    /// Subscribe and fetch for the current user. Re-activating for the same
    /// user only refetches.
    pub async fn activate(&self) -> Result<usize, NotesError> {
        let Some(user_id) = self.session.user_id() else {
            return Err(self.unauthenticated());
        };
        let same_user = self
            .feed()
            .as_ref()
            .is_some_and(|feed| feed.user_id == user_id);
        if !same_user {
            self.deactivate();
            let subscription = self.subscribe_to_remote_changes();
            *self.feed() = Some(Feed {
                user_id,
                subscription,
            });
        }
        self.fetch_all().await
    }

    /// Close the push feed and forget the collection.
    pub fn deactivate(&self) {
        let feed = self.feed().take();
        if let Some(mut feed) = feed {
            feed.subscription.close();
            tracing::debug!("Closed note feed for {}", feed.user_id);
        }
        self.state.send_modify(|s| s.reset());
    }

    /// User the push feed is open for.
    pub fn active_user(&self) -> Option<String> {
        self.feed().as_ref().map(|feed| feed.user_id.clone())
    }

    fn feed(&self) -> MutexGuard<'_, Option<Feed>> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn transact<M: Mutation>(
        &self,
        operation: &str,
        mutation: M,
        remote: impl Future<Output = Result<M::Confirmed, GatewayError>>,
    ) -> Result<M::Confirmed, NotesError> {
        let tx = Transaction::begin(&self.state, mutation);
        match remote.await {
            Ok(confirmed) => {
                tx.commit(&confirmed);
                Ok(confirmed)
            }
            Err(e) => Err(tx.fail(operation, e)),
        }
    }

    fn require_user(&self) -> Result<String, NotesError> {
        self.session.user_id().ok_or_else(|| self.unauthenticated())
    }

    fn unauthenticated(&self) -> NotesError {
        let err = NotesError::Unauthenticated;
        let message = err.to_string();
        self.state.send_modify(|s| s.error = Some(message));
        err
    }

    fn not_found(&self, id: &str) -> NotesError {
        let err = NotesError::NotFound(id.to_string());
        let message = err.to_string();
        self.state.send_modify(|s| s.error = Some(message));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use crate::testing::{init_tracing, FakeDevice, Yielding};
    use api::{ClientConfig, MemoryGateway, Operation};

    type Session = SessionManager<MemoryGateway, FakeDevice>;

    async fn signed_in(gateway: &MemoryGateway) -> (Session, String) {
        init_tracing();
        let user_id = gateway.restore_session_for("a@b.com").user.id;
        let session = SessionManager::new(gateway.clone(), FakeDevice::default(), ClientConfig::default());
        session.initialize().await;
        (session, user_id)
    }

    fn ids(notes: &[Note]) -> Vec<String> {
        notes.iter().map(|n| n.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_requires_session_without_network() {
        init_tracing();
        let gateway = MemoryGateway::new();
        let session = SessionManager::new(gateway.clone(), FakeDevice::default(), ClientConfig::default());
        session.initialize().await;
        let notes = NotesStore::new(gateway.clone(), session.watch());

        assert_eq!(notes.fetch_all().await, Err(NotesError::Unauthenticated));
        assert_eq!(notes.create("T", "C").await, Err(NotesError::Unauthenticated));
        assert_eq!(notes.delete("1").await, Err(NotesError::Unauthenticated));
        assert_eq!(gateway.call_count(Operation::Select), 0);
        assert_eq!(gateway.call_count(Operation::Insert), 0);
        assert_eq!(notes.state().error.as_deref(), Some("User not authenticated"));
        assert!(notes.subscribe_to_remote_changes().is_closed());
    }

    #[tokio::test]
    async fn test_fetch_replaces_everything() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        gateway.remote_insert(&user_id, "Old", "a");
        gateway.remote_insert(&user_id, "New", "b");
        gateway.remote_insert("someone-else", "Hidden", "c");

        assert_eq!(notes.fetch_all().await, Ok(2));
        let state = notes.state();
        assert_eq!(
            state.notes.iter().map(|n| n.title.as_str()).collect::<Vec<_>>(),
            vec!["New", "Old"]
        );
        assert!(!state.is_loading());

        gateway.remote_delete(&state.notes[0].id);
        notes.fetch_all().await.unwrap();
        assert_eq!(notes.state().notes.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_set() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        gateway.remote_insert(&user_id, "T", "C");
        notes.fetch_all().await.unwrap();

        gateway.fail_next(Operation::Select, GatewayError::Network("offline".to_string()));
        assert!(notes.fetch_all().await.is_err());
        let state = notes.state();
        assert_eq!(state.notes.len(), 1);
        assert_eq!(state.error.as_deref(), Some("offline"));
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_fetch_dropped_when_session_ends_midway() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        gateway.remote_insert(&user_id, "T", "C");

        let (fetched, signed_out) = tokio::join!(notes.fetch_all(), session.sign_out());
        assert!(signed_out.is_success());
        assert_eq!(fetched, Err(NotesError::Unauthenticated));
        assert!(notes.state().notes.is_empty());
        assert!(!notes.state().is_loading());
    }

    #[tokio::test]
    async fn test_failed_delete_after_sign_out_stays_cleared() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        let private = gateway.remote_insert(&user_id, "Private", "x");
        notes.activate().await.unwrap();

        gateway.fail_next(Operation::Delete, GatewayError::Network("offline".to_string()));
        let (deleted, signed_out) = tokio::join!(notes.delete(&private.id), async {
            notes.deactivate();
            session.sign_out().await
        });
        assert!(deleted.is_err());
        assert!(signed_out.is_success());
        let state = notes.state();
        assert!(state.notes.is_empty());
        assert!(state.error.is_none());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_confirmed_create_after_sign_out_stays_cleared() {
        let gateway = MemoryGateway::new();
        let (session, _user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        notes.activate().await.unwrap();

        let (created, _) = tokio::join!(notes.create("New", "Body"), async {
            notes.deactivate();
            session.sign_out().await
        });
        assert!(created.is_ok());
        assert!(notes.state().notes.is_empty());
        assert!(!notes.state().is_loading());
    }

    #[tokio::test]
    async fn test_dropped_create_rolls_back() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        gateway.remote_insert(&user_id, "T", "C");
        notes.activate().await.unwrap();
        let before = notes.state().notes;

        tokio::select! {
            biased;
            _ = notes.create("New", "Body") => panic!("create settled without suspending"),
            _ = std::future::ready(()) => {}
        }
        let state = notes.state();
        assert_eq!(state.notes, before);
        assert!(!state.is_loading());
        assert_eq!(gateway.call_count(Operation::Insert), 0);
    }

    #[tokio::test]
    async fn test_dropped_update_restores_original() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        let note = gateway.remote_insert(&user_id, "T", "C");
        notes.activate().await.unwrap();
        let before = notes.state().notes;

        tokio::select! {
            biased;
            _ = notes.update(&note.id, NotePatch::content("C2")) => {
                panic!("update settled without suspending")
            }
            _ = std::future::ready(()) => {}
        }
        assert_eq!(notes.state().notes, before);
        assert!(!notes.state().is_loading());
    }

    #[tokio::test]
    async fn test_create_shows_temp_then_server_id() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        gateway.remote_insert(&user_id, "Older", "x");
        notes.activate().await.unwrap();
        gateway.set_next_note_id(42);

        let (created, during) = tokio::join!(notes.create("New", "Body"), async {
            notes.state()
        });
        assert!(during.is_loading());
        assert!(during.notes[0].is_temporary());
        assert!(during.notes[0].id.starts_with(TEMP_ID_PREFIX));
        assert_eq!(during.notes[0].content, "Body");
        assert_eq!(during.notes.len(), 2);

        let created = created.unwrap();
        assert_eq!(created.id, "42");
        let state = notes.state();
        assert_eq!(state.notes.iter().filter(|n| n.id == "42").count(), 1);
        assert!(state.notes.iter().all(|n| !n.is_temporary()));
        assert_eq!(state.notes[0].id, "42");
        assert_eq!(state.notes[0].content, "Body");
        assert_eq!(state.notes.len(), 2);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_create_without_push_echo() {
        let gateway = MemoryGateway::new();
        gateway.set_echo_writes(false);
        let (session, _user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        notes.activate().await.unwrap();

        let created = notes.create("New", "Body").await.unwrap();
        assert_eq!(ids(&notes.state().notes), vec![created.id]);
    }

    #[tokio::test]
    async fn test_create_failure_removes_temp() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        gateway.remote_insert(&user_id, "T", "C");
        notes.activate().await.unwrap();
        let before = notes.state().notes;

        gateway.fail_next(
            Operation::Insert,
            GatewayError::Conflict("new row violates row-level security policy".to_string()),
        );
        assert!(notes.create("New", "Body").await.is_err());
        let state = notes.state();
        assert_eq!(state.notes, before);
        assert_eq!(
            state.error.as_deref(),
            Some("new row violates row-level security policy")
        );
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_update_failure_reverts() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        gateway.set_next_note_id(1);
        gateway.remote_insert(&user_id, "T", "C");
        gateway.remote_insert(&user_id, "Other", "D");
        notes.activate().await.unwrap();
        let before = notes.state().notes;

        gateway.fail_next(Operation::Update, GatewayError::Network("offline".to_string()));
        let (result, during) = tokio::join!(notes.update("1", NotePatch::content("C2")), async {
            notes.state().get("1").map(|n| n.content.clone())
        });

        assert_eq!(during.as_deref(), Some("C2"));
        assert!(result.is_err());
        assert_eq!(notes.state().notes, before);
        assert_eq!(notes.state().get("1").unwrap().content, "C");
        assert_eq!(notes.state().error.as_deref(), Some("offline"));
    }

    #[tokio::test]
    async fn test_update_success_adopts_server_row() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        let older = gateway.remote_insert(&user_id, "A", "a");
        gateway.remote_insert(&user_id, "B", "b");
        notes.activate().await.unwrap();

        let updated = notes.update(&older.id, NotePatch::title("A2")).await.unwrap();
        assert_eq!(notes.state().notes[0], updated);
        let stored = gateway.rows().into_iter().find(|n| n.id == older.id).unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_update_unknown_note() {
        let gateway = MemoryGateway::new();
        let (session, _user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        assert_eq!(
            notes.update("nope", NotePatch::title("x")).await,
            Err(NotesError::NotFound("nope".to_string()))
        );
        assert_eq!(gateway.call_count(Operation::Update), 0);
        assert_eq!(notes.state().error.as_deref(), Some("Note not found"));
    }

    #[tokio::test]
    async fn test_delete_failure_restores_order() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        for title in ["A", "B", "C"] {
            gateway.remote_insert(&user_id, title, "x");
        }
        notes.activate().await.unwrap();
        let before = notes.state().notes;
        let middle = before[1].id.clone();

        gateway.fail_next(Operation::Delete, GatewayError::Network("offline".to_string()));
        let (result, during) = tokio::join!(notes.delete(&middle), async { notes.state() });
        assert!(during.get(&middle).is_none());
        assert!(result.is_err());
        assert_eq!(notes.state().notes, before);

        notes.delete(&middle).await.unwrap();
        assert_eq!(notes.state().notes.len(), 2);
        assert!(notes.state().get(&middle).is_none());
    }

    #[tokio::test]
    async fn test_overlapping_mutations_keep_loading() {
        let gateway = MemoryGateway::new();
        let (session, _user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(Yielding(gateway.clone()), session.watch());
        notes.activate().await.unwrap();

        let (a, b, during) = tokio::join!(notes.create("A", "a"), notes.create("B", "b"), async {
            notes.state()
        });
        assert!(during.is_loading());
        assert_eq!(during.notes.len(), 2);
        let (a, b) = (a.unwrap(), b.unwrap());
        let state = notes.state();
        assert!(!state.is_loading());
        assert_eq!(state.notes.len(), 2);
        assert!(state.get(&a.id).is_some() && state.get(&b.id).is_some());
    }

    #[tokio::test]
    async fn test_push_events_merge() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        notes.activate().await.unwrap();

        let first = gateway.remote_insert(&user_id, "From phone", "x");
        gateway.emit_note_change(&user_id, NoteChange::Insert { new: first.clone() });
        assert_eq!(notes.state().notes.len(), 1);

        let second = gateway.remote_insert(&user_id, "Later", "y");
        assert_eq!(ids(&notes.state().notes), vec![second.id.clone(), first.id.clone()]);

        gateway.remote_update(&first.id, &NotePatch::content("edited"));
        assert_eq!(notes.state().notes[0].content, "edited");

        gateway.remote_delete(&second.id);
        assert_eq!(ids(&notes.state().notes), vec![first.id]);
    }

    #[tokio::test]
    async fn test_closed_feed_ignores_events() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        let mut feed = notes.subscribe_to_remote_changes();
        gateway.remote_insert(&user_id, "Seen", "x");
        assert_eq!(notes.state().notes.len(), 1);

        feed.close();
        feed.close();
        assert_eq!(gateway.note_listener_count(), 0);
        gateway.remote_insert(&user_id, "Unseen", "y");
        assert_eq!(notes.state().notes.len(), 1);
    }

    #[tokio::test]
    async fn test_filter_and_selection() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        gateway.remote_insert(&user_id, "Groceries", "milk");
        let ideas = gateway.remote_insert(&user_id, "Ideas", "Buy a bike");
        notes.activate().await.unwrap();

        notes.set_search_query("BIKE");
        let first = notes.get_filtered();
        assert_eq!(first, notes.get_filtered());
        assert_eq!(ids(&first), vec![ideas.id.clone()]);

        notes.set_search_query("");
        assert_eq!(notes.get_filtered(), notes.state().notes);

        notes.select(Some(&ideas.id));
        assert_eq!(notes.selected().unwrap().title, "Ideas");
        gateway.remote_delete(&ideas.id);
        assert!(notes.selected().is_none());
    }

    #[tokio::test]
    async fn test_deactivate_clears_and_unsubscribes() {
        let gateway = MemoryGateway::new();
        let (session, user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        gateway.remote_insert(&user_id, "T", "C");
        notes.activate().await.unwrap();
        assert_eq!(notes.active_user(), Some(user_id.clone()));
        notes.activate().await.unwrap();
        assert_eq!(gateway.note_listener_count(), 1);

        notes.deactivate();
        assert!(notes.state().notes.is_empty());
        assert_eq!(notes.active_user(), None);
        assert_eq!(gateway.note_listener_count(), 0);
        gateway.remote_insert(&user_id, "Late", "x");
        assert!(notes.state().notes.is_empty());
    }

    #[tokio::test]
    async fn test_errors_can_be_set_and_cleared() {
        let gateway = MemoryGateway::new();
        let (session, _user_id) = signed_in(&gateway).await;
        let notes = NotesStore::new(gateway.clone(), session.watch());
        notes.set_error("Something went wrong");
        assert_eq!(notes.state().error.as_deref(), Some("Something went wrong"));
        notes.clear_error();
        assert_eq!(notes.state().error, None);
    }
}
