//! One explicitly constructed pair of state containers per running app.

use api::{AuthGateway, ClientConfig, NotesTable};

use crate::capability::Device;
use crate::error::NotesError;
use crate::notes::NotesStore;
use crate::session::{AuthOutcome, SessionManager};

/// Owns the session manager and the notes store, both talking to the same
/// backend. UI code borrows the containers; nothing is global.
pub struct AppContext<G, D> {
    pub session: SessionManager<G, D>,
    pub notes: NotesStore<G>,
}

impl<G, D> AppContext<G, D>
where
    G: AuthGateway + NotesTable + Clone,
    D: Device,
{
    pub fn new(gateway: G, device: D, config: ClientConfig) -> Self {
        let session = SessionManager::new(gateway.clone(), device, config);
        let notes = NotesStore::new(gateway, session.watch());
        Self { session, notes }
    }

    /// Initialize the session and, if signed in, load the notes.
    pub async fn start(&self) -> Result<(), NotesError> {
        self.session.initialize().await;
        self.sync_notes_with_session().await
    }

    /// Open or close the notes feed to match the current session. Call after
    /// any flow that may have changed identity.
    pub async fn sync_notes_with_session(&self) -> Result<(), NotesError> {
        let signed_in = self.session.state().user_id().map(str::to_string);
        match (signed_in, self.notes.active_user()) {
            (Some(user), Some(active)) if user == active => Ok(()),
            (Some(_), _) => self.notes.activate().await.map(|_| ()),
            (None, Some(_)) => {
                self.notes.deactivate();
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    /// Close the notes feed first, then end the session.
    pub async fn sign_out(&self) -> AuthOutcome {
        self.notes.deactivate();
        self.session.sign_out().await
    }

    pub fn shutdown(&self) {
        self.notes.deactivate();
        self.session.shutdown();
    }
}
