//! Credential flows and the single in-flight slot.

use std::sync::Arc;

use api::OAuthProvider;
use tokio::sync::watch;

use super::state::SessionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiometricPurpose {
    Enable,
    Authenticate,
}

/// A running credential flow and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthFlow {
    Password,
    SignUp,
    MagicLink { email: String },
    VerifyOtp { email: String },
    OAuth { provider: OAuthProvider },
    Biometric { purpose: BiometricPurpose },
    PasswordReset { email: String },
    ProfileUpdate,
}

/// Payload-free tag of an [`AuthFlow`], for per-button loading indicators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowKind {
    Password,
    SignUp,
    MagicLink,
    VerifyOtp,
    OAuthGoogle,
    OAuthApple,
    BiometricEnable,
    BiometricAuth,
    PasswordReset,
    ProfileUpdate,
}

impl AuthFlow {
    pub fn kind(&self) -> FlowKind {
        match self {
            AuthFlow::Password => FlowKind::Password,
            AuthFlow::SignUp => FlowKind::SignUp,
            AuthFlow::MagicLink { .. } => FlowKind::MagicLink,
            AuthFlow::VerifyOtp { .. } => FlowKind::VerifyOtp,
            AuthFlow::OAuth {
                provider: OAuthProvider::Google,
            } => FlowKind::OAuthGoogle,
            AuthFlow::OAuth {
                provider: OAuthProvider::Apple,
            } => FlowKind::OAuthApple,
            AuthFlow::Biometric {
                purpose: BiometricPurpose::Enable,
            } => FlowKind::BiometricEnable,
            AuthFlow::Biometric {
                purpose: BiometricPurpose::Authenticate,
            } => FlowKind::BiometricAuth,
            AuthFlow::PasswordReset { .. } => FlowKind::PasswordReset,
            AuthFlow::ProfileUpdate => FlowKind::ProfileUpdate,
        }
    }
}

/// Settled result of a session operation. Operations never return `Err`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    /// The user dismissed a prompt. Not an error; nothing is shown.
    Cancelled,
    /// Another flow was already in flight; nothing was sent.
    Busy,
    Failed(String),
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AuthOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Transient state of the "check your email" screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MagicLinkState {
    pub email: String,
    /// Seconds until the UI offers a resend. Informational only.
    pub resend_cooldown: u32,
}

/// Holds the in-flight slot; releases it on drop.
pub(crate) struct FlowGuard {
    state: Arc<watch::Sender<SessionState>>,
}

impl FlowGuard {
    /// Claim the slot for `flow`, clearing the previous error. `None` if any
    /// flow is already running.
    pub(crate) fn acquire(state: &Arc<watch::Sender<SessionState>>, flow: AuthFlow) -> Option<Self> {
        let acquired = state.send_if_modified(|s| {
            if s.in_flight.is_some() {
                return false;
            }
            s.in_flight = Some(flow);
            s.error = None;
            true
        });
        acquired.then(|| FlowGuard {
            state: state.clone(),
        })
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.in_flight = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Arc<watch::Sender<SessionState>> {
        Arc::new(watch::channel(SessionState::default()).0)
    }

    #[test]
    fn second_flow_is_refused_until_release() {
        let state = slot();
        let first = FlowGuard::acquire(&state, AuthFlow::Password);
        assert!(first.is_some());
        assert!(state.borrow().is_running(FlowKind::Password));

        assert!(FlowGuard::acquire(
            &state,
            AuthFlow::MagicLink {
                email: "a@b.com".to_string()
            }
        )
        .is_none());
        assert!(state.borrow().is_running(FlowKind::Password));

        drop(first);
        assert!(!state.borrow().is_loading());
        assert!(FlowGuard::acquire(&state, AuthFlow::SignUp).is_some());
    }

    #[test]
    fn acquiring_clears_previous_error() {
        let state = slot();
        state.send_modify(|s| s.error = Some("Invalid login credentials".to_string()));
        let _guard = FlowGuard::acquire(&state, AuthFlow::Password);
        assert_eq!(state.borrow().error, None);
    }

    #[test]
    fn kinds_split_by_payload() {
        let apple = AuthFlow::OAuth {
            provider: OAuthProvider::Apple,
        };
        assert_eq!(apple.kind(), FlowKind::OAuthApple);
        let unlock = AuthFlow::Biometric {
            purpose: BiometricPurpose::Authenticate,
        };
        assert_eq!(unlock.kind(), FlowKind::BiometricAuth);
    }
}
