//! # Identity models
//!
//! ## [`UserInfo`]
//!
//! The authenticated identity as the backend reports it: a stable `id`, the
//! account `email`, the auth `provider` that created it (`"email"`, `"google"`,
//! `"apple"`), and free-form profile [`UserMetadata`]. The helper
//! [`UserInfo::display_name`] returns the profile name or falls back to the email
//! address.
//!
//! ## [`Session`]
//!
//! The renewable credential pair plus the identity it proves. The client never
//! inspects the tokens; it only stores them, hands them back to the gateway, and
//! drops them on sign-out. `Debug` output redacts both tokens so sessions can be
//! logged safely.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile fields editable by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserMetadata {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// User information as returned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub provider: String,
    #[serde(default)]
    pub metadata: UserMetadata,
}

impl UserInfo {
    /// Get display name, falling back to email if name is not set.
    pub fn display_name(&self) -> &str {
        self.metadata.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// An active authenticated session.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// `None` when the backend did not report an expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserInfo,
}

impl Session {
    /// Whether the access token has passed its reported expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> UserInfo {
        UserInfo {
            id: "u1".to_string(),
            email: "a@b.com".to_string(),
            provider: "email".to_string(),
            metadata: UserMetadata::default(),
        }
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let mut u = user();
        assert_eq!(u.display_name(), "a@b.com");
        u.metadata.display_name = Some("Ada".to_string());
        assert_eq!(u.display_name(), "Ada");
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = Session {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            expires_at: None,
            user: user(),
        };
        let printed = format!("{session:?}");
        assert!(!printed.contains("secret-access"));
        assert!(!printed.contains("secret-refresh"));
        assert!(printed.contains("a@b.com"));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let mut session = Session {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(now),
            user: user(),
        };
        assert!(session.is_expired(now));
        session.expires_at = Some(now + Duration::seconds(60));
        assert!(!session.is_expired(now));
        session.expires_at = None;
        assert!(!session.is_expired(now));
    }
}
