//! # API crate: backend seams for the zkorp client
//!
//! This crate defines everything the client core needs from the hosted backend,
//! without committing to a transport. The session manager and notes store in the
//! `store` crate are generic over the traits declared here.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`auth`] | [`AuthGateway`] trait, auth events, OAuth providers, deep-link callback parsing |
//! | [`table`] | [`NotesTable`] trait: owner-scoped reads, writes and the change feed |
//! | [`models`] | `Session`, `UserInfo`, `Note` and the change-feed payloads |
//! | [`subscription`] | Owned, idempotent listener handle |
//! | [`config`] | `zkorp.toml` / `ZKORP_*` client configuration |
//! | [`validate`] | Form validation rules (email, password, one-time code, note fields) |
//! | [`memory`] | [`MemoryGateway`], an in-process backend used by tests and offline builds |
//! | [`error`] | `GatewayError`, `ConfigError` |

pub mod auth;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod subscription;
pub mod table;
pub mod validate;

pub use auth::callback::AuthCallback;
pub use auth::{
    AuthChange, AuthEvent, AuthGateway, AuthListener, AuthResponse, IdTokenCredentials,
    OAuthProvider,
};
pub use config::{ClientConfig, PlatformConfig, Runtime, Target};
pub use error::{ConfigError, GatewayError};
pub use memory::{MemoryGateway, Operation};
pub use models::{
    NewNote, Note, NoteChange, NotePatch, NoteRef, Session, UserInfo, UserMetadata, TEMP_ID_PREFIX,
};
pub use subscription::Subscription;
pub use table::{ChangeListener, NotesTable};
pub use validate::ValidationError;
