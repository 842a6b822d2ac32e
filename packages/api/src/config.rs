//! # Client configuration: `zkorp.toml`
//!
//! Everything the client needs to reach the hosted backend and build its
//! redirect targets, plus the facts about the running platform that gate
//! provider-specific sign-in.
//!
//! ```toml
//! [backend]
//! url = "https://project.example.co"
//! anon_key = "public-anon-key"
//!
//! [auth]
//! redirect_scheme = "zkorpmobileweb2playground"
//! callback_path = "auth/callback"
//! resend_cooldown_secs = 30
//!
//! [platform]
//! target = "ios"      # ios | android | web
//! runtime = "custom"  # custom | sandbox
//! ```
//!
//! Every section is `#[serde(default)]`, so a missing or empty file is the
//! default configuration. [`ClientConfig::from_env`] builds the same structure
//! from `ZKORP_*` environment variables (loading `.env` first via `dotenvy`).

use oauth2::RedirectUrl;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration stored in `zkorp.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Where the hosted backend lives.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
}

/// Auth flow settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Custom URL scheme registered for deep links.
    #[serde(default = "default_redirect_scheme")]
    pub redirect_scheme: String,
    /// Route the backend redirects to after a magic link or OAuth round-trip.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Seconds the UI waits before offering another magic-link resend.
    #[serde(default = "default_resend_cooldown")]
    pub resend_cooldown_secs: u32,
    #[serde(default = "default_biometric_prompt")]
    pub biometric_prompt: String,
    #[serde(default = "default_biometric_enable_prompt")]
    pub biometric_enable_prompt: String,
    #[serde(default = "default_biometric_fallback_label")]
    pub biometric_fallback_label: String,
}

fn default_redirect_scheme() -> String {
    "zkorpmobileweb2playground".to_string()
}

fn default_callback_path() -> String {
    "auth/callback".to_string()
}

fn default_resend_cooldown() -> u32 {
    30
}

fn default_biometric_prompt() -> String {
    "Authenticate to access your account".to_string()
}

fn default_biometric_enable_prompt() -> String {
    "Enable biometric authentication".to_string()
}

fn default_biometric_fallback_label() -> String {
    "Use password".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            redirect_scheme: default_redirect_scheme(),
            callback_path: default_callback_path(),
            resend_cooldown_secs: default_resend_cooldown(),
            biometric_prompt: default_biometric_prompt(),
            biometric_enable_prompt: default_biometric_enable_prompt(),
            biometric_fallback_label: default_biometric_fallback_label(),
        }
    }
}

/// The platform the client is running on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Ios,
    Android,
    #[default]
    Web,
}

/// How the native binary was built. `Sandbox` is a shared host app that cannot
/// carry custom entitlements (Apple sign-in among them).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    #[default]
    Custom,
    Sandbox,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub runtime: Runtime,
}

impl PlatformConfig {
    pub fn is_native(&self) -> bool {
        matches!(self.target, Target::Ios | Target::Android)
    }

    /// Apple sign-in needs the native iOS credential dialog and an app built
    /// with its own entitlements.
    pub fn supports_apple_sign_in(&self) -> bool {
        self.target == Target::Ios && self.runtime == Runtime::Custom
    }
}

impl ClientConfig {
    /// The well-known filename for the config file.
    pub fn filename() -> &'static str {
        "zkorp.toml"
    }

    /// Parse from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Build from environment variables, loading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let url = std::env::var("ZKORP_BACKEND_URL")
            .map_err(|_| ConfigError::Missing("ZKORP_BACKEND_URL"))?;
        let anon_key = std::env::var("ZKORP_ANON_KEY")
            .map_err(|_| ConfigError::Missing("ZKORP_ANON_KEY"))?;

        let mut config = Self {
            backend: BackendConfig { url, anon_key },
            ..Self::default()
        };
        if let Ok(scheme) = std::env::var("ZKORP_REDIRECT_SCHEME") {
            config.auth.redirect_scheme = scheme;
        }
        if let Ok(target) = std::env::var("ZKORP_PLATFORM") {
            config.platform.target = parse_target(&target)?;
        }
        if let Ok(runtime) = std::env::var("ZKORP_RUNTIME") {
            config.platform.runtime = parse_runtime(&runtime)?;
        }
        tracing::debug!(
            "Loaded client config from environment ({:?}/{:?})",
            config.platform.target,
            config.platform.runtime
        );
        Ok(config)
    }

    /// `<scheme>://<callback_path>`, the target for magic links and OAuth.
    pub fn redirect_url(&self) -> Result<RedirectUrl, ConfigError> {
        let raw = format!(
            "{}://{}",
            self.auth.redirect_scheme,
            self.auth.callback_path.trim_start_matches('/')
        );
        RedirectUrl::new(raw).map_err(|e| ConfigError::InvalidUrl(e.to_string()))
    }
}

fn parse_target(value: &str) -> Result<Target, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "ios" => Ok(Target::Ios),
        "android" => Ok(Target::Android),
        "web" => Ok(Target::Web),
        _ => Err(ConfigError::UnknownValue {
            key: "ZKORP_PLATFORM",
            value: value.to_string(),
        }),
    }
}

fn parse_runtime(value: &str) -> Result<Runtime, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "custom" => Ok(Runtime::Custom),
        "sandbox" => Ok(Runtime::Sandbox),
        _ => Err(ConfigError::UnknownValue {
            key: "ZKORP_RUNTIME",
            value: value.to_string(),
        }),
    }
}
