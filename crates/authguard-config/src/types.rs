//! Configuration types.
//!
//! ```toml
//! [server]
//! url = "http://localhost:8888"
//! api_prefix = "api/v1"
//!
//! [guard]
//! bypass_patterns = ["/auth/enabled", "/auth/login", "/onboarding"]
//! refresh_pattern = "/auth/token"
//! refresh_lookahead_ms = 10000
//! refresh_timeout_ms = 30000
//! session_cookie = "user"
//!
//! [endpoints]
//! capabilities = "auth/enabled"
//! login = "auth/login"
//! token = "auth/token"
//! logout = "auth/logout"
//!
//! [storage]
//! token_file = "/var/lib/authguard/tokens.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Where requests go.
    pub server: ServerConfig,
    /// Interception and refresh tuning.
    pub guard: GuardSettings,
    /// Auth endpoint paths, relative to the API prefix.
    pub endpoints: EndpointConfig,
    /// Token persistence.
    pub storage: StorageConfig,
}

impl GuardConfig {
    /// Create a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the guard cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.server.url.trim().is_empty() {
            return Err(invalid("server.url", "must not be empty"));
        }
        if self.guard.refresh_pattern.trim().is_empty() {
            return Err(invalid("guard.refresh_pattern", "must not be empty"));
        }
        if self.guard.bypass_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(
                "guard.bypass_patterns",
                "patterns must not be blank (a blank pattern matches every URL)",
            ));
        }
        if self.guard.session_cookie.trim().is_empty() {
            return Err(invalid("guard.session_cookie", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Default server URL.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8888";

/// Server connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the backend.
    pub url: String,
    /// Path prefix every API path is joined under.
    pub api_prefix: String,
    /// Per-request timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            api_prefix: "api/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Request timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Default lookahead before expiry at which tokens are refreshed.
pub const DEFAULT_REFRESH_LOOKAHEAD_MS: u64 = 10_000;

/// Default upper bound on a single refresh call.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 30_000;

/// Request interception settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// URL substrings that skip all token handling.
    #[serde(alias = "bypassPatterns")]
    pub bypass_patterns: Vec<String>,
    /// URL substring identifying the refresh endpoint itself.
    #[serde(alias = "refreshPattern")]
    pub refresh_pattern: String,
    /// Tokens expiring within this window are refreshed before use.
    #[serde(alias = "refreshLookaheadMs")]
    pub refresh_lookahead_ms: u64,
    /// Upper bound on one refresh call; 0 waits forever.
    #[serde(alias = "refreshTimeoutMs")]
    pub refresh_timeout_ms: u64,
    /// Name of the cookie whose presence signals a live session.
    #[serde(alias = "sessionCookie")]
    pub session_cookie: String,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            bypass_patterns: vec![
                "/auth/enabled".to_string(),
                "/auth/login".to_string(),
                "/onboarding".to_string(),
            ],
            refresh_pattern: "/auth/token".to_string(),
            refresh_lookahead_ms: DEFAULT_REFRESH_LOOKAHEAD_MS,
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
            session_cookie: "user".to_string(),
        }
    }
}

impl GuardSettings {
    /// Refresh timeout, or `None` when disabled.
    pub fn refresh_timeout(&self) -> Option<Duration> {
        (self.refresh_timeout_ms > 0).then(|| Duration::from_millis(self.refresh_timeout_ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Auth endpoint paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// No-auth probe reporting whether auth is enforced.
    pub capabilities: String,
    /// Username/password login.
    pub login: String,
    /// Refresh grant.
    pub token: String,
    /// Session teardown.
    pub logout: String,
    /// First-run setup.
    pub onboarding: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            capabilities: "auth/enabled".to_string(),
            login: "auth/login".to_string(),
            token: "auth/token".to_string(),
            logout: "auth/logout".to_string(),
            onboarding: "onboarding".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Token persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Token file; defaults to `tokens.json` in the config directory.
    pub token_file: Option<PathBuf>,
}
