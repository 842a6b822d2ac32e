//! # Store crate: client state containers
//!
//! The two cooperating containers at the core of the client, generic over the
//! backend seams declared in `api`.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`session`] | [`SessionManager`]: session lifecycle, credential flows, biometric gate |
//! | [`notes`] | [`NotesStore`]: optimistic notes mirror reconciled with push events |
//! | [`capability`] | [`Device`] and location-permission contracts |
//! | [`context`] | [`AppContext`] wiring both containers to one backend |

pub mod capability;
pub mod context;
pub mod error;
pub mod notes;
pub mod session;

#[cfg(test)]
mod testing;

pub use capability::{
    AppleCredential, BiometricResult, BrowserOutcome, CredentialError, Device,
    LocationPermissions, PermissionGuard, PermissionResponse, PermissionState, PermissionStatus,
};
pub use context::AppContext;
pub use error::NotesError;
pub use notes::{CollectionState, NotesStore};
pub use session::{
    AppleNonce, AuthFlow, AuthOutcome, BiometricPurpose, FlowKind, MagicLinkState, Phase,
    SessionManager, SessionState, SessionWatch,
};
