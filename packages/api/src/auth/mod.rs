//! # Authentication seam
//!
//! [`AuthGateway`] is everything the client needs from the hosted auth service:
//! password sign-in/up, one-time codes by email, redirect and identity-token
//! OAuth, sign-out, and a push notification every time the service's idea of
//! the current session changes.
//!
//! Every call settles into a `Result`; implementations never panic on a
//! rejected credential. Session installation triggered outside the client's own
//! calls (background token refresh, a redirect landing through a deep link)
//! only surfaces through listeners registered with
//! [`on_auth_state_change`](AuthGateway::on_auth_state_change).
//!
//! [`callback`] parses the deep link the service redirects back to.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::models::{Session, UserInfo, UserMetadata};
use crate::subscription::Subscription;

pub mod callback;

/// Why the service's current session changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// One session-changed notification.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

/// Callback invoked for every [`AuthChange`].
pub type AuthListener = Arc<dyn Fn(AuthChange) + Send + Sync>;

/// What a credential call produced. Either half may be absent: a sign-up under
/// an email-confirmation policy returns a user without a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthResponse {
    pub user: Option<UserInfo>,
    pub session: Option<Session>,
}

impl AuthResponse {
    pub fn with_session(session: Session) -> Self {
        Self {
            user: Some(session.user.clone()),
            session: Some(session),
        }
    }
}

/// Third-party identity providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform-issued identity token plus the raw nonce it was bound to.
#[derive(Clone, PartialEq)]
pub struct IdTokenCredentials {
    pub provider: OAuthProvider,
    pub token: String,
    pub nonce: String,
}

impl fmt::Debug for IdTokenCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdTokenCredentials")
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("nonce", &"<redacted>")
            .finish()
    }
}

/// Async interface to the hosted auth service.
pub trait AuthGateway {
    /// The session persisted from a previous run, if any.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, GatewayError>>;

    /// Register a standing listener. It stays registered until the returned
    /// handle is closed.
    fn on_auth_state_change(&self, listener: AuthListener) -> Subscription;

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, GatewayError>>;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, GatewayError>>;

    fn sign_out(&self) -> impl Future<Output = Result<(), GatewayError>>;

    /// Email a one-time code and a magic link pointing at `redirect_to`.
    fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> impl Future<Output = Result<(), GatewayError>>;

    fn verify_otp(
        &self,
        email: &str,
        token: &str,
    ) -> impl Future<Output = Result<AuthResponse, GatewayError>>;

    /// Start a redirect-based authorization-code flow. Returns the URL to open;
    /// the service completes the code exchange itself.
    fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> impl Future<Output = Result<String, GatewayError>>;

    fn sign_in_with_id_token(
        &self,
        credentials: IdTokenCredentials,
    ) -> impl Future<Output = Result<AuthResponse, GatewayError>>;

    /// Install a session from tokens delivered through a deep link.
    fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Session, GatewayError>>;

    fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> impl Future<Output = Result<(), GatewayError>>;

    fn update_user(
        &self,
        metadata: UserMetadata,
    ) -> impl Future<Output = Result<UserInfo, GatewayError>>;
}
