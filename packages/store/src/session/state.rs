use api::{AuthResponse, Session, UserInfo};

use super::flow::{AuthFlow, FlowKind, MagicLinkState};

/// Overall session lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// Everything the session manager exposes to the UI.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub session: Option<Session>,
    pub user: Option<UserInfo>,
    /// The one credential flow currently running, if any.
    pub in_flight: Option<AuthFlow>,
    pub signing_out: bool,
    pub error: Option<String>,
    pub magic_link: Option<MagicLinkState>,
    pub biometric_available: bool,
    pub biometric_enabled: bool,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_initializing(&self) -> bool {
        matches!(self.phase, Phase::Uninitialized | Phase::Initializing)
    }

    /// Any flow or sign-out in progress.
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some() || self.signing_out
    }

    /// Whether a flow of `kind` is the one in flight.
    pub fn is_running(&self, kind: FlowKind) -> bool {
        self.in_flight.as_ref().is_some_and(|flow| flow.kind() == kind)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.id.as_str())
    }

    /// Replace the identity with `session`. Used for every push from the
    /// gateway and for restored sessions.
    pub(crate) fn install(&mut self, session: Option<Session>) {
        self.user = session.as_ref().map(|s| s.user.clone());
        self.session = session;
        self.settle_phase();
    }

    /// Adopt exactly what a credential call returned, including a user
    /// without a session.
    pub(crate) fn adopt(&mut self, response: AuthResponse) {
        self.user = response
            .user
            .or_else(|| response.session.as_ref().map(|s| s.user.clone()));
        self.session = response.session;
        self.settle_phase();
    }

    pub(crate) fn clear_identity(&mut self) {
        self.session = None;
        self.user = None;
        self.magic_link = None;
        self.biometric_enabled = false;
        self.settle_phase();
    }

    /// Track the session once initialization is over. Before that the phase
    /// belongs to `initialize`.
    fn settle_phase(&mut self) {
        if !self.is_initializing() {
            self.phase = self.resolved_phase();
        }
    }

    pub(crate) fn resolved_phase(&self) -> Phase {
        if self.session.is_some() {
            Phase::Authenticated
        } else {
            Phase::Unauthenticated
        }
    }
}
