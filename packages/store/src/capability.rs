//! # Device capabilities
//!
//! Platform prompts the client core consumes as plain outcomes: the biometric
//! sheet, the Apple credential dialog, the in-app browser used for redirect
//! sign-in, and the location permission dialog. None of them carry identity on
//! their own; the session manager decides what each outcome means.
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`Device`] | [`SessionManager`](crate::SessionManager) |
//! | [`LocationPermissions`] | [`PermissionGuard`] |

use std::future::Future;

use thiserror::Error;

/// Result of a biometric prompt. Carries no payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiometricResult {
    Success,
    Failed,
    Cancelled,
}

/// What the native Apple dialog hands back.
#[derive(Clone, PartialEq, Eq)]
pub struct AppleCredential {
    pub user: String,
    pub identity_token: Option<String>,
    pub email: Option<String>,
}

impl std::fmt::Debug for AppleCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleCredential")
            .field("user", &self.user)
            .field("identity_token", &self.identity_token.as_ref().map(|_| "<redacted>"))
            .field("email", &self.email)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("Sign-in was cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// How an in-app browser session for redirect sign-in ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrowserOutcome {
    /// The page was handed off (external browser, web navigation). Any session
    /// arrives later through the deep-link callback.
    Opened,
    /// The browser closed on our redirect URL; carries the full callback URL.
    Redirected(String),
    /// The user closed the browser.
    Cancelled,
}

/// Native capabilities the session manager delegates to.
pub trait Device {
    /// Hardware present and at least one biometric enrolled. Never fails;
    /// probe errors read as unavailable.
    fn biometric_available(&self) -> impl Future<Output = bool>;

    fn authenticate_biometric(
        &self,
        prompt: &str,
        fallback_label: &str,
    ) -> impl Future<Output = BiometricResult>;

    /// Show the Apple credential dialog, bound to `hashed_nonce`.
    fn request_apple_credential(
        &self,
        hashed_nonce: &str,
    ) -> impl Future<Output = Result<AppleCredential, CredentialError>>;

    /// Open `url` and wait for a redirect to `redirect_url`, if the platform
    /// can observe one.
    fn open_auth_url(&self, url: &str, redirect_url: &str) -> impl Future<Output = BrowserOutcome>;
}

/// A platform permission answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermissionResponse {
    pub status: PermissionStatus,
    pub can_ask_again: bool,
}

/// Foreground location permission, as the platform exposes it.
pub trait LocationPermissions {
    fn check(&self) -> impl Future<Output = Result<PermissionResponse, String>>;
    fn request(&self) -> impl Future<Output = Result<PermissionResponse, String>>;
    fn open_settings(&self);
}

/// Snapshot of the last permission answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionState {
    pub status: Option<PermissionStatus>,
    pub loading: bool,
    pub error: Option<String>,
    pub can_ask_again: bool,
}

impl Default for PermissionState {
    fn default() -> Self {
        Self {
            status: None,
            loading: false,
            error: None,
            can_ask_again: true,
        }
    }
}

/// Caches the last location-permission answer and exposes it to a screen.
pub struct PermissionGuard<P> {
    permissions: P,
    state: PermissionState,
}

impl<P: LocationPermissions> PermissionGuard<P> {
    pub fn new(permissions: P) -> Self {
        Self {
            permissions,
            state: PermissionState::default(),
        }
    }

    pub fn state(&self) -> &PermissionState {
        &self.state
    }

    pub async fn check(&mut self) -> Option<PermissionStatus> {
        self.state.loading = true;
        self.state.error = None;
        let result = self.permissions.check().await;
        self.settle(result, "Failed to check location permission")
    }

    pub async fn request(&mut self) -> Option<PermissionStatus> {
        self.state.loading = true;
        self.state.error = None;
        let result = self.permissions.request().await;
        self.settle(result, "Failed to request location permission")
    }

    pub fn open_settings(&self) {
        self.permissions.open_settings();
    }

    pub fn is_granted(&self) -> bool {
        self.state.status == Some(PermissionStatus::Granted)
    }

    pub fn is_denied(&self) -> bool {
        self.state.status == Some(PermissionStatus::Denied)
    }

    pub fn is_undetermined(&self) -> bool {
        self.state.status == Some(PermissionStatus::Undetermined)
    }

    fn settle(
        &mut self,
        result: Result<PermissionResponse, String>,
        fallback: &str,
    ) -> Option<PermissionStatus> {
        self.state.loading = false;
        match result {
            Ok(response) => {
                self.state.status = Some(response.status);
                self.state.can_ask_again = response.can_ask_again;
                Some(response.status)
            }
            Err(message) => {
                tracing::warn!("Location permission error: {}", message);
                self.state.error = Some(if message.is_empty() {
                    fallback.to_string()
                } else {
                    message
                });
                None
            }
        }
    }
}
