//! # Note rows and their change-feed payloads
//!
//! Mirrors the remote `notes` table: `id`, `user_id`, `title`, `content`,
//! `created_at`, `updated_at`. Timestamps are authoritative only when they come
//! back from the backend; values stamped locally are provisional.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Note`] | One row. |
//! | [`NewNote`] | Insert payload; the backend assigns `id` and both timestamps. |
//! | [`NotePatch`] | Partial update of the user-editable columns. |
//! | [`NoteChange`] | One push event from the change feed, tagged by `eventType`. |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix for ids minted locally before the backend confirms an insert.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A note row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Whether this row still carries a locally minted id.
    pub fn is_temporary(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Copy of this note with `patch` applied and `updated_at` re-stamped.
    pub fn patched(&self, patch: &NotePatch, now: DateTime<Utc>) -> Note {
        Note {
            title: patch.title.clone().unwrap_or_else(|| self.title.clone()),
            content: patch.content.clone().unwrap_or_else(|| self.content.clone()),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Case-insensitive substring match over title or content.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.content.to_lowercase().contains(needle)
    }
}

/// Insert payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    pub user_id: String,
    pub title: String,
    pub content: String,
}

/// Update payload. `None` leaves the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// The identifying part of a deleted row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteRef {
    pub id: String,
}

/// A row-level change pushed by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "UPPERCASE")]
pub enum NoteChange {
    Insert { new: Note },
    Update { new: Note },
    Delete { old: NoteRef },
}

impl NoteChange {
    /// Id of the row this event concerns.
    pub fn id(&self) -> &str {
        match self {
            NoteChange::Insert { new } | NoteChange::Update { new } => &new.id,
            NoteChange::Delete { old } => &old.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Note {
        let at = "2024-05-01T10:00:00Z".parse().unwrap();
        Note {
            id: "1".to_string(),
            user_id: "u1".to_string(),
            title: "Groceries".to_string(),
            content: "Milk and Eggs".to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn patch_keeps_untouched_columns() {
        let original = note();
        let now = Utc::now();
        let patched = original.patched(&NotePatch::content("Bread"), now);
        assert_eq!(patched.title, "Groceries");
        assert_eq!(patched.content, "Bread");
        assert_eq!(patched.created_at, original.created_at);
        assert_eq!(patched.updated_at, now);
    }

    #[test]
    fn matches_title_or_content() {
        let n = note();
        assert!(n.matches("groc"));
        assert!(n.matches("eggs"));
        assert!(!n.matches("butter"));
    }

    #[test]
    fn temp_ids_are_recognised() {
        let mut n = note();
        assert!(!n.is_temporary());
        n.id = format!("{TEMP_ID_PREFIX}abc");
        assert!(n.is_temporary());
    }

    #[test]
    fn change_feed_payloads_deserialize() {
        let raw = r#"{
            "eventType": "UPDATE",
            "new": {
                "id": "7", "user_id": "u1", "title": "T", "content": "C",
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-02T10:00:00Z"
            }
        }"#;
        let change: NoteChange = serde_json::from_str(raw).unwrap();
        assert_eq!(change.id(), "7");
        assert!(matches!(change, NoteChange::Update { .. }));

        let raw = r#"{ "eventType": "DELETE", "old": { "id": "9" } }"#;
        let change: NoteChange = serde_json::from_str(raw).unwrap();
        assert_eq!(change, NoteChange::Delete { old: NoteRef { id: "9".to_string() } });
    }
}
