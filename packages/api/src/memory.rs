//! # In-memory backend
//!
//! [`MemoryGateway`] implements both [`AuthGateway`] and [`NotesTable`] against
//! process-local state. Tests use it to script the backend; offline builds can
//! use it as a stand-in. Clones share the same state.
//!
//! Behaviour follows the hosted service where the client can observe it:
//!
//! - credential calls install a session and notify auth listeners with
//!   `SIGNED_IN`; sign-out notifies `SIGNED_OUT`;
//! - with email confirmation on, sign-up returns a user but no session;
//! - every table write re-stamps `updated_at` (strictly increasing) and, unless
//!   disabled with [`set_echo_writes`](MemoryGateway::set_echo_writes), pushes
//!   the change to the owner's change-feed listeners before returning.
//!
//! Listeners are invoked after the internal lock is released, so a listener may
//! call back into the gateway.
//!
//! ## Scripting hooks
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`fail_next`](MemoryGateway::fail_next) | The next call of an [`Operation`] returns the given error. |
//! | [`call_count`](MemoryGateway::call_count) | How many times an [`Operation`] reached the gateway. |
//! | [`with_otp_code`](MemoryGateway::with_otp_code) | Every emailed code is this value instead of a random one. |
//! | [`set_next_note_id`](MemoryGateway::set_next_note_id) | Id the next inserted row receives. |
//! | [`restore_session_for`](MemoryGateway::restore_session_for) | Seed a persisted session, as if from a previous run. |
//! | [`refresh_session`](MemoryGateway::refresh_session) / [`revoke_session`](MemoryGateway::revoke_session) | Background session changes the client did not ask for. |
//! | [`remote_insert`](MemoryGateway::remote_insert) / [`remote_update`](MemoryGateway::remote_update) / [`remote_delete`](MemoryGateway::remote_delete) | Writes from another device. |
//! | [`emit_note_change`](MemoryGateway::emit_note_change) | Push a raw event without touching the table. |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use oauth2::url::Url;
use rand::Rng;
use uuid::Uuid;

use crate::auth::{
    AuthChange, AuthEvent, AuthGateway, AuthListener, AuthResponse, IdTokenCredentials,
    OAuthProvider,
};
use crate::error::GatewayError;
use crate::models::{NewNote, Note, NoteChange, NotePatch, NoteRef, Session, UserInfo, UserMetadata};
use crate::subscription::Subscription;
use crate::table::{ChangeListener, NotesTable};

const AUTHORIZE_BASE: &str = "https://memory.invalid/auth/v1/authorize";

/// Gateway calls that can be counted and scripted to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSession,
    SignIn,
    SignUp,
    SignOut,
    SendOtp,
    VerifyOtp,
    OAuth,
    IdToken,
    SetSession,
    ResetPassword,
    UpdateUser,
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Debug)]
struct Account {
    user: UserInfo,
    password: Option<String>,
}

struct Inner {
    accounts: HashMap<String, Account>,
    otps: HashMap<String, String>,
    fixed_otp: Option<String>,
    redirect_tokens: HashMap<String, String>,
    session: Option<Session>,
    require_confirmation: bool,
    notes: Vec<Note>,
    next_note_id: u64,
    last_stamp: Option<DateTime<Utc>>,
    echo_writes: bool,
    auth_listeners: Vec<(u64, AuthListener)>,
    note_listeners: Vec<(u64, String, ChangeListener)>,
    next_listener_id: u64,
    failures: HashMap<Operation, GatewayError>,
    calls: HashMap<Operation, usize>,
    id_tokens: Vec<IdTokenCredentials>,
    recovery_emails: Vec<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            otps: HashMap::new(),
            fixed_otp: None,
            redirect_tokens: HashMap::new(),
            session: None,
            require_confirmation: false,
            notes: Vec::new(),
            next_note_id: 1,
            last_stamp: None,
            echo_writes: true,
            auth_listeners: Vec::new(),
            note_listeners: Vec::new(),
            next_listener_id: 0,
            failures: HashMap::new(),
            calls: HashMap::new(),
            id_tokens: Vec::new(),
            recovery_emails: Vec::new(),
        }
    }
}

impl Inner {
    /// Count the call and consume a scripted failure, if any.
    fn enter(&mut self, op: Operation) -> Result<(), GatewayError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Strictly increasing server timestamp.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamped = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamped);
        stamped
    }

    fn account(&mut self, email: &str, provider: &str) -> UserInfo {
        let key = email.trim().to_lowercase();
        self.accounts
            .entry(key.clone())
            .or_insert_with(|| Account {
                user: UserInfo {
                    id: Uuid::new_v4().to_string(),
                    email: key,
                    provider: provider.to_string(),
                    metadata: UserMetadata::default(),
                },
                password: None,
            })
            .user
            .clone()
    }

    fn issue_session(&mut self, user: UserInfo) -> Session {
        let session = Session {
            access_token: format!("access-{}", Uuid::new_v4()),
            refresh_token: format!("refresh-{}", Uuid::new_v4()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            user,
        };
        self.session = Some(session.clone());
        session
    }

    fn auth_listeners(&self) -> Vec<AuthListener> {
        self.auth_listeners.iter().map(|(_, l)| l.clone()).collect()
    }

    fn note_listeners(&self, user_id: &str) -> Vec<ChangeListener> {
        self.note_listeners
            .iter()
            .filter(|(_, owner, _)| owner == user_id)
            .map(|(_, _, l)| l.clone())
            .collect()
    }

    fn position(&self, id: &str, user_id: &str) -> Option<usize> {
        self.notes
            .iter()
            .position(|n| n.id == id && n.user_id == user_id)
    }
}

/// In-memory [`AuthGateway`] + [`NotesTable`].
#[derive(Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_auth(&self, event: AuthEvent, session: Option<Session>) {
        let listeners = self.lock().auth_listeners();
        tracing::debug!("Emitting {:?} to {} auth listeners", event, listeners.len());
        for listener in listeners {
            listener(AuthChange {
                event,
                session: session.clone(),
            });
        }
    }

    fn notify_notes(&self, user_id: &str, change: NoteChange) {
        let listeners = self.lock().note_listeners(user_id);
        tracing::debug!("Pushing change for note {} to {} listeners", change.id(), listeners.len());
        for listener in listeners {
            listener(change.clone());
        }
    }

    fn echo(&self, user_id: &str, change: NoteChange) {
        if self.lock().echo_writes {
            self.notify_notes(user_id, change);
        }
    }

    /// Install a fresh session for `user` and announce it.
    fn sign_in_user(&self, user: UserInfo) -> AuthResponse {
        let session = self.lock().issue_session(user);
        self.notify_auth(AuthEvent::SignedIn, Some(session.clone()));
        AuthResponse::with_session(session)
    }

    // ----- scripting -----

    /// Emailed one-time codes are always `code`.
    pub fn with_otp_code(self, code: &str) -> Self {
        self.lock().fixed_otp = Some(code.to_string());
        self
    }

    /// Sign-up returns no session until the address is confirmed.
    pub fn with_email_confirmation(self, required: bool) -> Self {
        self.lock().require_confirmation = required;
        self
    }

    /// Register an email/password account.
    pub fn with_account(self, email: &str, password: &str) -> Self {
        {
            let mut inner = self.lock();
            let user = inner.account(email, "email");
            if let Some(account) = inner.accounts.get_mut(&user.email) {
                account.password = Some(password.to_string());
            }
        }
        self
    }

    pub fn fail_next(&self, op: Operation, error: GatewayError) {
        self.lock().failures.insert(op, error);
    }

    pub fn call_count(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn set_next_note_id(&self, id: u64) {
        self.lock().next_note_id = id;
    }

    /// Whether the gateway pushes its own writes back through the change feed.
    pub fn set_echo_writes(&self, echo: bool) {
        self.lock().echo_writes = echo;
    }

    /// The code most recently emailed to `email`.
    pub fn issued_otp(&self, email: &str) -> Option<String> {
        self.lock().otps.get(&email.trim().to_lowercase()).cloned()
    }

    /// Identity-token credentials received so far, oldest first.
    pub fn id_tokens(&self) -> Vec<IdTokenCredentials> {
        self.lock().id_tokens.clone()
    }

    pub fn recovery_emails(&self) -> Vec<String> {
        self.lock().recovery_emails.clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn auth_listener_count(&self) -> usize {
        self.lock().auth_listeners.len()
    }

    pub fn note_listener_count(&self) -> usize {
        self.lock().note_listeners.len()
    }

    /// Seed a persisted session without notifying anyone.
    pub fn restore_session_for(&self, email: &str) -> Session {
        let mut inner = self.lock();
        let user = inner.account(email, "email");
        inner.issue_session(user)
    }

    /// Mint tokens a deep link would carry back after a redirect sign-in.
    pub fn issue_redirect_tokens(&self, email: &str, provider: OAuthProvider) -> (String, String) {
        let mut inner = self.lock();
        let user = inner.account(email, provider.as_str());
        let access = format!("access-{}", Uuid::new_v4());
        let refresh = format!("refresh-{}", Uuid::new_v4());
        inner.redirect_tokens.insert(access.clone(), user.email);
        (access, refresh)
    }

    /// Rotate the current session's tokens and announce `TOKEN_REFRESHED`.
    pub fn refresh_session(&self) -> Option<Session> {
        let session = {
            let mut inner = self.lock();
            let user = inner.session.as_ref()?.user.clone();
            inner.issue_session(user)
        };
        self.notify_auth(AuthEvent::TokenRefreshed, Some(session.clone()));
        Some(session)
    }

    /// Drop the current session server-side and announce `SIGNED_OUT`.
    pub fn revoke_session(&self) {
        self.lock().session = None;
        self.notify_auth(AuthEvent::SignedOut, None);
    }

    /// All rows, any owner, in storage order.
    pub fn rows(&self) -> Vec<Note> {
        self.lock().notes.clone()
    }

    /// Insert a row as another device would, pushing `INSERT` to listeners.
    pub fn remote_insert(&self, user_id: &str, title: &str, content: &str) -> Note {
        let note = {
            let mut inner = self.lock();
            let now = inner.stamp();
            let note = Note {
                id: inner.next_note_id.to_string(),
                user_id: user_id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                created_at: now,
                updated_at: now,
            };
            inner.next_note_id += 1;
            inner.notes.push(note.clone());
            note
        };
        self.notify_notes(user_id, NoteChange::Insert { new: note.clone() });
        note
    }

    /// Update a row as another device would, pushing `UPDATE` to listeners.
    pub fn remote_update(&self, id: &str, patch: &NotePatch) -> Option<Note> {
        let note = {
            let mut inner = self.lock();
            let now = inner.stamp();
            let slot = inner.notes.iter_mut().find(|n| n.id == id)?;
            *slot = slot.patched(patch, now);
            slot.clone()
        };
        self.notify_notes(&note.user_id, NoteChange::Update { new: note.clone() });
        Some(note)
    }

    /// Delete a row as another device would, pushing `DELETE` to listeners.
    pub fn remote_delete(&self, id: &str) -> Option<Note> {
        let note = {
            let mut inner = self.lock();
            let idx = inner.notes.iter().position(|n| n.id == id)?;
            inner.notes.remove(idx)
        };
        self.notify_notes(
            &note.user_id,
            NoteChange::Delete {
                old: NoteRef { id: note.id.clone() },
            },
        );
        Some(note)
    }

    /// Push `change` to `user_id`'s listeners without touching the table.
    pub fn emit_note_change(&self, user_id: &str, change: NoteChange) {
        self.notify_notes(user_id, change);
    }
}

impl AuthGateway for MemoryGateway {
    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        let mut inner = self.lock();
        inner.enter(Operation::GetSession)?;
        Ok(inner.session.clone())
    }

    fn on_auth_state_change(&self, listener: AuthListener) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.auth_listeners.push((id, listener));
            id
        };
        let shared = self.inner.clone();
        Subscription::new(move || {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .auth_listeners
                .retain(|(existing, _)| *existing != id);
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, GatewayError> {
        let user = {
            let mut inner = self.lock();
            inner.enter(Operation::SignIn)?;
            match inner.accounts.get(&email.trim().to_lowercase()) {
                Some(account) if account.password.as_deref() == Some(password) => {
                    account.user.clone()
                }
                _ => {
                    return Err(GatewayError::Rejected(
                        "Invalid login credentials".to_string(),
                    ))
                }
            }
        };
        Ok(self.sign_in_user(user))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, GatewayError> {
        let (user, confirm) = {
            let mut inner = self.lock();
            inner.enter(Operation::SignUp)?;
            let key = email.trim().to_lowercase();
            if inner.accounts.contains_key(&key) {
                return Err(GatewayError::Conflict("User already registered".to_string()));
            }
            let user = inner.account(&key, "email");
            if let Some(account) = inner.accounts.get_mut(&key) {
                account.password = Some(password.to_string());
            }
            (user, inner.require_confirmation)
        };
        if confirm {
            return Ok(AuthResponse {
                user: Some(user),
                session: None,
            });
        }
        Ok(self.sign_in_user(user))
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        {
            let mut inner = self.lock();
            inner.enter(Operation::SignOut)?;
            inner.session = None;
        }
        self.notify_auth(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn sign_in_with_otp(&self, email: &str, _redirect_to: &str) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        inner.enter(Operation::SendOtp)?;
        let user = inner.account(email, "email");
        let code = match &inner.fixed_otp {
            Some(code) => code.clone(),
            None => format!("{:06}", rand::thread_rng().gen_range(0..1_000_000)),
        };
        inner.otps.insert(user.email, code);
        Ok(())
    }

    async fn verify_otp(&self, email: &str, token: &str) -> Result<AuthResponse, GatewayError> {
        let user = {
            let mut inner = self.lock();
            inner.enter(Operation::VerifyOtp)?;
            let key = email.trim().to_lowercase();
            if inner.otps.get(&key).map(String::as_str) != Some(token.trim()) {
                return Err(GatewayError::Rejected(
                    "Token has expired or is invalid".to_string(),
                ));
            }
            inner.otps.remove(&key);
            inner.account(&key, "email")
        };
        Ok(self.sign_in_user(user))
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, GatewayError> {
        self.lock().enter(Operation::OAuth)?;
        let mut url = Url::parse(AUTHORIZE_BASE)
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to);
        Ok(url.to_string())
    }

    async fn sign_in_with_id_token(
        &self,
        credentials: IdTokenCredentials,
    ) -> Result<AuthResponse, GatewayError> {
        let user = {
            let mut inner = self.lock();
            inner.enter(Operation::IdToken)?;
            if credentials.token.is_empty() || credentials.nonce.is_empty() {
                return Err(GatewayError::Rejected("Invalid identity token".to_string()));
            }
            let email = format!("{}@privaterelay.appleid.com", credentials.provider);
            let user = inner.account(&email, credentials.provider.as_str());
            inner.id_tokens.push(credentials);
            user
        };
        Ok(self.sign_in_user(user))
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, GatewayError> {
        let session = {
            let mut inner = self.lock();
            inner.enter(Operation::SetSession)?;
            let email = inner
                .redirect_tokens
                .remove(access_token)
                .ok_or_else(|| GatewayError::Rejected("Invalid session".to_string()))?;
            let user = inner.account(&email, "email");
            let session = Session {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                user,
            };
            inner.session = Some(session.clone());
            session
        };
        self.notify_auth(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        _redirect_to: &str,
    ) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        inner.enter(Operation::ResetPassword)?;
        inner.recovery_emails.push(email.trim().to_lowercase());
        Ok(())
    }

    async fn update_user(&self, metadata: UserMetadata) -> Result<UserInfo, GatewayError> {
        let session = {
            let mut inner = self.lock();
            inner.enter(Operation::UpdateUser)?;
            let Some(session) = inner.session.as_mut() else {
                return Err(GatewayError::Rejected("Auth session missing!".to_string()));
            };
            session.user.metadata = metadata;
            let session = session.clone();
            if let Some(account) = inner.accounts.get_mut(&session.user.email) {
                account.user = session.user.clone();
            }
            session
        };
        self.notify_auth(AuthEvent::UserUpdated, Some(session.clone()));
        Ok(session.user)
    }
}

impl NotesTable for MemoryGateway {
    async fn select_by_owner(&self, user_id: &str) -> Result<Vec<Note>, GatewayError> {
        let mut inner = self.lock();
        inner.enter(Operation::Select)?;
        let mut rows: Vec<Note> = inner
            .notes
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn insert(&self, note: NewNote) -> Result<Note, GatewayError> {
        let row = {
            let mut inner = self.lock();
            inner.enter(Operation::Insert)?;
            let now = inner.stamp();
            let row = Note {
                id: inner.next_note_id.to_string(),
                user_id: note.user_id,
                title: note.title,
                content: note.content,
                created_at: now,
                updated_at: now,
            };
            inner.next_note_id += 1;
            inner.notes.push(row.clone());
            row
        };
        self.echo(&row.user_id, NoteChange::Insert { new: row.clone() });
        Ok(row)
    }

    async fn update(
        &self,
        id: &str,
        user_id: &str,
        patch: &NotePatch,
    ) -> Result<Note, GatewayError> {
        let row = {
            let mut inner = self.lock();
            inner.enter(Operation::Update)?;
            let idx = inner
                .position(id, user_id)
                .ok_or_else(|| GatewayError::NotFound(format!("Note {id} not found")))?;
            let now = inner.stamp();
            let row = inner.notes[idx].patched(patch, now);
            inner.notes[idx] = row.clone();
            row
        };
        self.echo(user_id, NoteChange::Update { new: row.clone() });
        Ok(row)
    }

    async fn delete(&self, id: &str, user_id: &str) -> Result<(), GatewayError> {
        {
            let mut inner = self.lock();
            inner.enter(Operation::Delete)?;
            let idx = inner
                .position(id, user_id)
                .ok_or_else(|| GatewayError::NotFound(format!("Note {id} not found")))?;
            inner.notes.remove(idx);
        }
        self.echo(
            user_id,
            NoteChange::Delete {
                old: NoteRef { id: id.to_string() },
            },
        );
        Ok(())
    }

    fn subscribe(&self, user_id: &str, listener: ChangeListener) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.note_listeners.push((id, user_id.to_string(), listener));
            id
        };
        let shared = self.inner.clone();
        Subscription::new(move || {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .note_listeners
                .retain(|(existing, _, _)| *existing != id);
        })
    }
}
