use api::GatewayError;
use thiserror::Error;

/// Failure of a notes collection operation. The same text is mirrored into the
/// collection's error slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotesError {
    #[error("User not authenticated")]
    Unauthenticated,

    #[error("Note not found")]
    NotFound(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
