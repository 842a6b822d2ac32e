//! Data models shared by the gateway and the client state containers.

mod note;
mod user;

pub use note::{NewNote, Note, NoteChange, NotePatch, NoteRef, TEMP_ID_PREFIX};
pub use user::{Session, UserInfo, UserMetadata};
