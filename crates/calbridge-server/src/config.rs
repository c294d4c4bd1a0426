//! Server configuration.
//!
//! All settings live in one `config.toml`, by default at
//! `~/.config/calbridge/config.toml`.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8065"
//! public_url = "https://chat.example.com/plugins/calendar"
//!
//! [google]
//! client_id = "env::GOOGLE_CLIENT_ID"
//! client_secret = "pass::google/calendar-secret"
//! ```
//!
//! `client_id` and `client_secret` support secret references (see
//! [`crate::secret`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use calbridge_core::{TracingConfig, TracingOutputFormat};
use calbridge_providers::google::{GoogleConfig, GoogleEndpoints, OAuthCredentials};

use crate::error::{ServerError, ServerResult};
use crate::scheduler::RenewalConfig;
use crate::secret::SecretRef;

/// Header carrying the authenticated user id, set by the fronting proxy.
pub const DEFAULT_USER_HEADER: &str = "Mattermost-User-Id";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub google: GoogleSettings,
    pub renewal: RenewalSettings,
    pub notify: NotifySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: String,

    /// Externally reachable base URL of this server, without trailing
    /// slash. The OAuth redirect and the webhook address derive from it.
    pub public_url: String,

    /// Header holding the authenticated user id.
    pub user_header: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8065".to_string(),
            public_url: "http://localhost:8065".to_string(),
            user_header: DEFAULT_USER_HEADER.to_string(),
        }
    }
}

impl ServerSettings {
    fn base(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    pub fn redirect_url(&self) -> String {
        format!("{}/oauth/complete", self.base())
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/watch", self.base())
    }
}

/// Google Calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    pub scopes: Vec<String>,

    /// Timeout for every request to Google.
    pub timeout_secs: u64,

    /// Endpoint overrides, mostly for testing.
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub api_base: Option<String>,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scopes: vec![GoogleConfig::DEFAULT_SCOPE.to_string()],
            timeout_secs: GoogleConfig::DEFAULT_TIMEOUT_SECS,
            auth_url: None,
            token_url: None,
            api_base: None,
        }
    }
}

impl GoogleSettings {
    /// Resolves credentials, expanding `pass::` / `env::` references.
    pub fn resolve_credentials(&self) -> ServerResult<OAuthCredentials> {
        let raw_id = self.client_id.as_deref().ok_or_else(|| {
            ServerError::config(format!(
                "Google credentials not found. Add to {}:\n  \
                 [google]\n  \
                 client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                 client_secret = \"YOUR_SECRET\"",
                Config::default_path().display()
            ))
        })?;
        let raw_secret = self.client_secret.as_deref().ok_or_else(|| {
            ServerError::config("client_secret is missing from [google] section")
        })?;

        let client_id = crate::secret::resolve(raw_id)
            .map_err(|e| ServerError::config(format!("failed to resolve client_id: {}", e)))?;
        let client_secret = crate::secret::resolve(raw_secret)
            .map_err(|e| ServerError::config(format!("failed to resolve client_secret: {}", e)))?;

        Ok(OAuthCredentials::new(client_id, client_secret))
    }

    /// Builds the provider configuration for `redirect_url`.
    pub fn to_provider_config(&self, redirect_url: &str) -> ServerResult<GoogleConfig> {
        let mut endpoints = GoogleEndpoints::default();
        if let Some(ref url) = self.auth_url {
            endpoints.auth_url = url.clone();
        }
        if let Some(ref url) = self.token_url {
            endpoints.token_url = url.clone();
        }
        if let Some(ref url) = self.api_base {
            endpoints.api_base = url.clone();
        }

        let config = GoogleConfig::new(self.resolve_credentials()?, redirect_url)
            .with_scopes(self.scopes.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_endpoints(endpoints);
        config.validate().map_err(ServerError::config)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalSettings {
    pub interval_secs: u64,
    pub jitter_fraction: f64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub max_consecutive_failures: u32,
    /// Requested channel lifetime; provider default when unset.
    pub channel_ttl_secs: Option<u64>,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        let defaults = RenewalConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            jitter_fraction: defaults.jitter_fraction,
            initial_backoff_secs: defaults.initial_backoff.as_secs(),
            max_backoff_secs: defaults.max_backoff.as_secs(),
            backoff_multiplier: defaults.backoff_multiplier,
            max_consecutive_failures: defaults.max_consecutive_failures,
            channel_ttl_secs: None,
        }
    }
}

impl RenewalSettings {
    pub fn to_renewal_config(&self) -> RenewalConfig {
        RenewalConfig::new(Duration::from_secs(self.interval_secs))
            .with_jitter(self.jitter_fraction)
            .with_backoff(
                Duration::from_secs(self.initial_backoff_secs),
                Duration::from_secs(self.max_backoff_secs),
                self.backoff_multiplier,
            )
            .with_max_failures(self.max_consecutive_failures)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Relay endpoint for user messages; messages are only logged when
    /// unset.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `pretty`, `compact` or `json`.
    pub format: String,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            level: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn to_tracing_config(&self) -> ServerResult<TracingConfig> {
        let format: TracingOutputFormat = self
            .format
            .parse()
            .map_err(|e| ServerError::config(format!("invalid logging.format: {}", e)))?;
        let level: tracing::Level = self
            .level
            .parse()
            .map_err(|_| ServerError::config(format!("invalid logging.level: {:?}", self.level)))?;
        Ok(TracingConfig::server()
            .with_format(format)
            .with_level(level))
    }
}

impl Config {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> ServerResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ServerResult<()> {
        url::Url::parse(&self.server.public_url).map_err(|e| {
            ServerError::config(format!(
                "invalid server.public_url {:?}: {}",
                self.server.public_url, e
            ))
        })?;
        axum::http::HeaderName::from_bytes(self.server.user_header.as_bytes()).map_err(|e| {
            ServerError::config(format!(
                "invalid server.user_header {:?}: {}",
                self.server.user_header, e
            ))
        })?;
        Ok(())
    }

    /// Copy safe to print: literal client secrets are masked, secret
    /// references are kept.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(ref secret) = copy.google.client_secret
            && SecretRef::parse(secret).is_literal()
        {
            copy.google.client_secret = Some("<redacted>".to_string());
        }
        copy
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calbridge")
            .join("config.toml")
    }
}
