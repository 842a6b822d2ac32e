//! # Session manager
//!
//! [`SessionManager`] mediates every identity-changing operation and publishes
//! a [`SessionState`] snapshot through a `tokio::sync::watch` channel.
//!
//! Lifecycle: `Uninitialized → Initializing → {Authenticated, Unauthenticated}`.
//! [`initialize`](SessionManager::initialize) restores a persisted session,
//! registers the standing session-changed listener and leaves `Initializing`
//! exactly once. From then on every push from the gateway (including ones the
//! client did not trigger, such as a background token refresh or a session
//! installed from a deep link) replaces the identity.
//!
//! Credential flows share one in-flight slot: starting any flow while another
//! is running returns [`AuthOutcome::Busy`] without contacting the gateway.
//! Every operation settles into an [`AuthOutcome`] (or a `bool` for biometric
//! prompts); none of them return `Err` or leave the slot occupied.

mod flow;
mod nonce;
mod state;

pub use flow::{AuthFlow, AuthOutcome, BiometricPurpose, FlowKind, MagicLinkState};
pub use nonce::AppleNonce;
pub use state::{Phase, SessionState};

use std::sync::{Arc, Mutex, PoisonError};

use api::{
    AuthCallback, AuthChange, AuthGateway, ClientConfig, GatewayError, IdTokenCredentials,
    OAuthProvider, Subscription,
};
use tokio::sync::watch;

use crate::capability::{BiometricResult, BrowserOutcome, CredentialError, Device};
use flow::FlowGuard;

const APPLE_UNAVAILABLE: &str = "Apple sign-in is only available in the iOS app";

/// Read-only view of the session state, handed to the notes store and the UI.
#[derive(Clone, Debug)]
pub struct SessionWatch {
    rx: watch::Receiver<SessionState>,
}

impl SessionWatch {
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Id of the signed-in user, if a session exists.
    pub fn user_id(&self) -> Option<String> {
        self.rx.borrow().user_id().map(str::to_string)
    }

    /// Wait for the next change. `false` once the manager is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

pub struct SessionManager<G, D> {
    gateway: G,
    device: D,
    config: ClientConfig,
    state: Arc<watch::Sender<SessionState>>,
    listener: Mutex<Option<Subscription>>,
}

impl<G: AuthGateway, D: Device> SessionManager<G, D> {
    pub fn new(gateway: G, device: D, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            gateway,
            device,
            config,
            state: Arc::new(state),
            listener: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> SessionWatch {
        SessionWatch {
            rx: self.state.subscribe(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Restore the persisted session, start listening for session changes and
    /// probe biometrics. Only the first call does anything.
    pub async fn initialize(&self) {
        let started = self.state.send_if_modified(|s| {
            if s.phase != Phase::Uninitialized {
                return false;
            }
            s.phase = Phase::Initializing;
            true
        });
        if !started {
            tracing::debug!("Session manager already initialized");
            return;
        }

        match self.gateway.get_session().await {
            Ok(Some(session)) => {
                tracing::info!("Restored session for {}", session.user.email);
                self.state.send_modify(|s| s.install(Some(session)));
            }
            Ok(None) => tracing::debug!("No persisted session"),
            Err(e) => tracing::warn!("Failed to restore session: {}", e),
        }

        self.listen();
        self.state.send_modify(|s| s.phase = s.resolved_phase());

        self.check_biometric().await;
    }

    fn listen(&self) {
        let state = self.state.clone();
        let subscription = self
            .gateway
            .on_auth_state_change(Arc::new(move |change: AuthChange| {
                tracing::debug!("Auth state changed: {:?}", change.event);
                state.send_modify(|s| s.install(change.session));
            }));
        // Replacing the slot drops, and so closes, any earlier listener.
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
    }

    /// Stop listening for session changes.
    pub fn shutdown(&self) {
        let subscription = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut subscription) = subscription {
            subscription.close();
        }
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthOutcome {
        let Some(_flow) = self.begin(AuthFlow::Password) else {
            return AuthOutcome::Busy;
        };
        match self.gateway.sign_in_with_password(email, password).await {
            Ok(response) => {
                tracing::info!("Signed in {} with password", email);
                self.state.send_modify(|s| s.adopt(response));
                AuthOutcome::Success
            }
            Err(e) => self.fail("Password sign-in", e),
        }
    }

    /// Create an account. Whether a session starts right away is up to the
    /// backend's confirmation policy; the state mirrors whatever comes back.
    pub async fn sign_up_with_password(&self, email: &str, password: &str) -> AuthOutcome {
        let Some(_flow) = self.begin(AuthFlow::SignUp) else {
            return AuthOutcome::Busy;
        };
        match self.gateway.sign_up(email, password).await {
            Ok(response) => {
                if response.session.is_some() {
                    tracing::info!("Signed up {}", email);
                } else {
                    tracing::info!("Signed up {}; awaiting email confirmation", email);
                }
                self.state.send_modify(|s| s.adopt(response));
                AuthOutcome::Success
            }
            Err(e) => self.fail("Sign-up", e),
        }
    }

    /// Revoke the session. Local identity is cleared whatever the gateway
    /// answers; a gateway error is reported, not retried.
    pub async fn sign_out(&self) -> AuthOutcome {
        let started = self.state.send_if_modified(|s| {
            if s.signing_out {
                return false;
            }
            s.signing_out = true;
            true
        });
        if !started {
            return AuthOutcome::Busy;
        }

        let result = self.gateway.sign_out().await;
        let error = result.as_ref().err().map(ToString::to_string);
        self.state.send_modify(|s| {
            s.signing_out = false;
            s.clear_identity();
            s.error = error;
        });

        match result {
            Ok(()) => {
                tracing::info!("Signed out");
                AuthOutcome::Success
            }
            Err(e) => {
                tracing::warn!("Sign-out failed at the gateway, local session cleared: {}", e);
                AuthOutcome::Failed(e.to_string())
            }
        }
    }

    /// Email a one-time code plus a magic link back to the app.
    pub async fn sign_in_with_magic_link(&self, email: &str) -> AuthOutcome {
        let Some(_flow) = self.begin(AuthFlow::MagicLink {
            email: email.to_string(),
        }) else {
            return AuthOutcome::Busy;
        };
        let redirect_to = match self.redirect_to() {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        match self.gateway.sign_in_with_otp(email, &redirect_to).await {
            Ok(()) => {
                tracing::info!("Magic link sent to {}", email);
                let magic_link = MagicLinkState {
                    email: email.to_string(),
                    resend_cooldown: self.config.auth.resend_cooldown_secs,
                };
                self.state.send_modify(|s| s.magic_link = Some(magic_link));
                AuthOutcome::Success
            }
            Err(e) => self.fail("Magic link", e),
        }
    }

    /// Same request as [`sign_in_with_magic_link`](Self::sign_in_with_magic_link).
    /// Throttling is the caller's job; see [`tick_resend_cooldown`](Self::tick_resend_cooldown).
    pub async fn resend_magic_link(&self, email: &str) -> AuthOutcome {
        self.sign_in_with_magic_link(email).await
    }

    pub async fn verify_otp(&self, email: &str, token: &str) -> AuthOutcome {
        let Some(_flow) = self.begin(AuthFlow::VerifyOtp {
            email: email.to_string(),
        }) else {
            return AuthOutcome::Busy;
        };
        match self.gateway.verify_otp(email, token.trim()).await {
            Ok(response) => {
                tracing::info!("Verified one-time code for {}", email);
                self.state.send_modify(|s| {
                    s.adopt(response);
                    s.magic_link = None;
                });
                AuthOutcome::Success
            }
            Err(e) => self.fail("OTP verification", e),
        }
    }

    pub fn clear_magic_link_state(&self) {
        self.state.send_if_modified(|s| s.magic_link.take().is_some());
    }

    /// Count the resend cooldown down by one second. Returns what is left.
    pub fn tick_resend_cooldown(&self) -> u32 {
        let mut remaining = 0;
        self.state.send_if_modified(|s| match s.magic_link.as_mut() {
            Some(link) if link.resend_cooldown > 0 => {
                link.resend_cooldown -= 1;
                remaining = link.resend_cooldown;
                true
            }
            _ => false,
        });
        remaining
    }

    /// Google goes through a browser redirect; Apple through the native
    /// credential dialog.
    pub async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> AuthOutcome {
        match provider {
            OAuthProvider::Google => self.sign_in_with_redirect(provider).await,
            OAuthProvider::Apple => self.sign_in_with_apple().await,
        }
    }

    async fn sign_in_with_redirect(&self, provider: OAuthProvider) -> AuthOutcome {
        let Some(_flow) = self.begin(AuthFlow::OAuth { provider }) else {
            return AuthOutcome::Busy;
        };
        let redirect_to = match self.redirect_to() {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        let url = match self.gateway.sign_in_with_oauth(provider, &redirect_to).await {
            Ok(url) => url,
            Err(e) => return self.fail("OAuth sign-in", e),
        };

        match self.device.open_auth_url(&url, &redirect_to).await {
            BrowserOutcome::Opened => {
                tracing::debug!("Opened {} sign-in page", provider);
                AuthOutcome::Success
            }
            BrowserOutcome::Redirected(callback_url) => {
                match AuthCallback::parse(&callback_url, &self.config.auth.redirect_scheme) {
                    Some(callback) => self.apply_callback(callback).await,
                    None => self.fail_with("Sign-in was not completed".to_string()),
                }
            }
            BrowserOutcome::Cancelled => {
                tracing::debug!("{} sign-in cancelled", provider);
                AuthOutcome::Cancelled
            }
        }
    }

    async fn sign_in_with_apple(&self) -> AuthOutcome {
        if !self.config.platform.supports_apple_sign_in() {
            return self.fail_with(APPLE_UNAVAILABLE.to_string());
        }
        let Some(_flow) = self.begin(AuthFlow::OAuth {
            provider: OAuthProvider::Apple,
        }) else {
            return AuthOutcome::Busy;
        };

        let nonce = AppleNonce::generate();
        let credential = match self.device.request_apple_credential(nonce.hashed()).await {
            Ok(credential) => credential,
            Err(CredentialError::Cancelled) => {
                tracing::debug!("Apple sign-in cancelled");
                return AuthOutcome::Cancelled;
            }
            Err(CredentialError::Failed(message)) => {
                tracing::warn!("Apple credential request failed: {}", message);
                return self.fail_with(message);
            }
        };
        let Some(token) = credential.identity_token else {
            return self.fail_with("No identity token returned by Apple".to_string());
        };

        let credentials = IdTokenCredentials {
            provider: OAuthProvider::Apple,
            token,
            nonce: nonce.into_raw(),
        };
        match self.gateway.sign_in_with_id_token(credentials).await {
            Ok(response) => {
                tracing::info!("Signed in with Apple");
                self.state.send_modify(|s| s.adopt(response));
                AuthOutcome::Success
            }
            Err(e) => self.fail("Apple sign-in", e),
        }
    }

    /// Handle a deep link. `None` if `url` is not an auth callback.
    ///
    /// Tokens are handed to the gateway; the session itself arrives through
    /// the session-changed listener.
    pub async fn handle_auth_callback(&self, url: &str) -> Option<AuthOutcome> {
        let callback = AuthCallback::parse(url, &self.config.auth.redirect_scheme)?;
        Some(self.apply_callback(callback).await)
    }

    async fn apply_callback(&self, callback: AuthCallback) -> AuthOutcome {
        match callback {
            AuthCallback::Error { error, description } => {
                let message = description.unwrap_or(error);
                tracing::warn!("Auth callback carried an error: {}", message);
                let shown = message.clone();
                self.state.send_modify(|s| {
                    s.error = Some(shown);
                    s.magic_link = None;
                });
                AuthOutcome::Failed(message)
            }
            AuthCallback::Tokens {
                access_token,
                refresh_token,
            } => match self.gateway.set_session(&access_token, &refresh_token).await {
                Ok(session) => {
                    tracing::info!("Session from auth callback for {}", session.user.email);
                    self.state.send_modify(|s| s.magic_link = None);
                    AuthOutcome::Success
                }
                Err(e) => self.fail("Auth callback", e),
            },
        }
    }

    pub async fn reset_password(&self, email: &str) -> AuthOutcome {
        let Some(_flow) = self.begin(AuthFlow::PasswordReset {
            email: email.to_string(),
        }) else {
            return AuthOutcome::Busy;
        };
        let redirect_to = match self.redirect_to() {
            Ok(url) => url,
            Err(outcome) => return outcome,
        };
        match self.gateway.reset_password_for_email(email, &redirect_to).await {
            Ok(()) => {
                tracing::info!("Password reset requested for {}", email);
                AuthOutcome::Success
            }
            Err(e) => self.fail("Password reset", e),
        }
    }

    pub async fn update_profile(&self, display_name: &str) -> AuthOutcome {
        let current = self
            .state
            .borrow()
            .session
            .as_ref()
            .map(|s| s.user.metadata.clone());
        let Some(mut metadata) = current else {
            return self.fail_with("User not authenticated".to_string());
        };
        let Some(_flow) = self.begin(AuthFlow::ProfileUpdate) else {
            return AuthOutcome::Busy;
        };

        metadata.display_name = Some(display_name.trim().to_string());
        match self.gateway.update_user(metadata).await {
            Ok(user) => {
                tracing::info!("Updated profile for {}", user.email);
                self.state.send_modify(|s| {
                    if let Some(session) = s.session.as_mut() {
                        session.user = user.clone();
                    }
                    s.user = Some(user);
                });
                AuthOutcome::Success
            }
            Err(e) => self.fail("Profile update", e),
        }
    }

    pub async fn check_biometric(&self) {
        let available = self.device.biometric_available().await;
        tracing::debug!("Biometric available: {}", available);
        self.state.send_modify(|s| s.biometric_available = available);
    }

    /// Confirm with a biometric prompt and remember the opt-in.
    pub async fn enable_biometric(&self) -> bool {
        let Some(_flow) = self.begin(AuthFlow::Biometric {
            purpose: BiometricPurpose::Enable,
        }) else {
            return false;
        };
        let auth = &self.config.auth;
        let result = self
            .device
            .authenticate_biometric(&auth.biometric_enable_prompt, &auth.biometric_fallback_label)
            .await;
        if result != BiometricResult::Success {
            tracing::debug!("Biometric enable not confirmed: {:?}", result);
            return false;
        }
        self.state.send_modify(|s| s.biometric_enabled = true);
        true
    }

    /// Local re-authentication gate. Never creates or ends a session.
    pub async fn authenticate_with_biometric(&self) -> bool {
        let Some(_flow) = self.begin(AuthFlow::Biometric {
            purpose: BiometricPurpose::Authenticate,
        }) else {
            return false;
        };
        let auth = &self.config.auth;
        let result = self
            .device
            .authenticate_biometric(&auth.biometric_prompt, &auth.biometric_fallback_label)
            .await;
        tracing::debug!("Biometric authentication: {:?}", result);
        result == BiometricResult::Success
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_modify(|s| s.error = Some(message));
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    fn begin(&self, flow: AuthFlow) -> Option<FlowGuard> {
        let kind = flow.kind();
        let guard = FlowGuard::acquire(&self.state, flow);
        if guard.is_none() {
            tracing::debug!("{:?} refused: another flow is in flight", kind);
        }
        guard
    }

    fn redirect_to(&self) -> Result<String, AuthOutcome> {
        self.config
            .redirect_url()
            .map(|url| url.as_str().to_string())
            .map_err(|e| self.fail_with(e.to_string()))
    }

    fn fail(&self, operation: &str, err: GatewayError) -> AuthOutcome {
        tracing::warn!("{} failed: {}", operation, err);
        self.fail_with(err.to_string())
    }

    fn fail_with(&self, message: String) -> AuthOutcome {
        let shown = message.clone();
        self.state.send_modify(|s| s.error = Some(shown));
        AuthOutcome::Failed(message)
    }
}
