//! # Deep-link auth callback
//!
//! Magic links and OAuth redirects land back in the app as
//! `<scheme>://auth/callback`, carrying either an `access_token` /
//! `refresh_token` pair or an `error` / `error_description` pair. The service
//! puts them in the query string or in the fragment depending on the flow, so
//! both are read; fragment values win on conflict.
//!
//! Some launchers drop the host and deliver `<scheme>:///auth/callback`; that
//! shape is accepted too.

use std::collections::HashMap;
use std::fmt;

use oauth2::url::{form_urlencoded, Url};

pub const CALLBACK_HOST: &str = "auth";
pub const CALLBACK_PATH: &str = "/callback";

/// A parsed callback.
#[derive(Clone, PartialEq)]
pub enum AuthCallback {
    Tokens {
        access_token: String,
        refresh_token: String,
    },
    Error {
        error: String,
        description: Option<String>,
    },
}

impl AuthCallback {
    /// Parse `url` if it is an auth callback for `scheme` that carries tokens or
    /// an error. Anything else yields `None`.
    pub fn parse(url: &str, scheme: &str) -> Option<Self> {
        let url = callback_url(url, scheme)?;

        let mut params: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if let Some(fragment) = url.fragment() {
            params.extend(
                form_urlencoded::parse(fragment.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }

        if let Some(error) = params.remove("error") {
            return Some(AuthCallback::Error {
                error,
                description: params.remove("error_description"),
            });
        }

        match (params.remove("access_token"), params.remove("refresh_token")) {
            (Some(access_token), Some(refresh_token)) => Some(AuthCallback::Tokens {
                access_token,
                refresh_token,
            }),
            _ => None,
        }
    }

    /// User-facing text for an error callback.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            AuthCallback::Error { error, description } => {
                Some(description.as_deref().unwrap_or(error))
            }
            AuthCallback::Tokens { .. } => None,
        }
    }
}

impl fmt::Debug for AuthCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthCallback::Tokens { .. } => f.write_str("AuthCallback::Tokens(<redacted>)"),
            AuthCallback::Error { error, description } => f
                .debug_struct("AuthCallback::Error")
                .field("error", error)
                .field("description", description)
                .finish(),
        }
    }
}

/// Whether `url` targets the auth callback route for `scheme`.
pub fn is_auth_callback(url: &str, scheme: &str) -> bool {
    callback_url(url, scheme).is_some()
}

fn callback_url(url: &str, scheme: &str) -> Option<Url> {
    let url = Url::parse(url).ok()?;
    if url.scheme() != scheme {
        return None;
    }
    let routed = match url.host_str().filter(|host| !host.is_empty()) {
        Some(CALLBACK_HOST) => url.path() == CALLBACK_PATH,
        Some(_) => false,
        None => url.path() == format!("/{CALLBACK_HOST}{CALLBACK_PATH}"),
    };
    routed.then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEME: &str = "zkorpmobileweb2playground";

    #[test]
    fn parses_tokens_from_query() {
        let cb = AuthCallback::parse(
            "zkorpmobileweb2playground://auth/callback?access_token=a1&refresh_token=r1",
            SCHEME,
        );
        assert_eq!(
            cb,
            Some(AuthCallback::Tokens {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
            })
        );
    }

    #[test]
    fn parses_tokens_from_fragment() {
        let cb = AuthCallback::parse(
            "zkorpmobileweb2playground://auth/callback#access_token=a2&refresh_token=r2&type=magiclink",
            SCHEME,
        );
        assert!(matches!(cb, Some(AuthCallback::Tokens { ref access_token, .. }) if access_token == "a2"));
    }

    #[test]
    fn parses_error_with_description() {
        let cb = AuthCallback::parse(
            "zkorpmobileweb2playground://auth/callback?error=access_denied&error_description=Email+link+is+invalid+or+has+expired",
            SCHEME,
        )
        .unwrap();
        assert_eq!(cb.error_message(), Some("Email link is invalid or has expired"));
    }

    #[test]
    fn error_without_description_falls_back_to_code() {
        let cb = AuthCallback::parse(
            "zkorpmobileweb2playground://auth/callback?error=server_error",
            SCHEME,
        )
        .unwrap();
        assert_eq!(cb.error_message(), Some("server_error"));
    }

    #[test]
    fn accepts_hostless_form() {
        assert!(is_auth_callback(
            "zkorpmobileweb2playground:///auth/callback?access_token=a&refresh_token=r",
            SCHEME
        ));
    }

    #[test]
    fn ignores_other_routes_and_schemes() {
        assert!(!is_auth_callback("zkorpmobileweb2playground://notes", SCHEME));
        assert!(!is_auth_callback("otherapp://auth/callback", SCHEME));
        assert!(!is_auth_callback("not a url", SCHEME));
        assert_eq!(
            AuthCallback::parse("zkorpmobileweb2playground://auth/callback", SCHEME),
            None
        );
    }
}
