//! Error types for the request guard.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while authorizing or dispatching requests.
///
/// `Clone` because one refresh outcome is handed to every caller that
/// waited on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The session marker is gone; the request was never dispatched.
    #[error("Invalid session: session marker is missing")]
    SessionExpired,

    /// The coordinated refresh failed. Every concurrent waiter sees the same error.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(Box<AuthError>),

    /// The identity endpoint rejected the grant or could not be reached.
    #[error("Issuer error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    IssuerTransport {
        /// HTTP status, when the server answered at all.
        status: Option<u16>,
        /// Response body or transport error text.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Network/HTTP error while dispatching a request.
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered a guarded request with an error status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Token storage could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AuthError {
    /// Check if this is the terminal no-session failure.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, AuthError::SessionExpired)
    }

    /// Check if the server rejected the supplied credentials.
    pub fn is_invalid_credentials(&self) -> bool {
        match self {
            AuthError::IssuerTransport { status, .. } => *status == Some(401),
            AuthError::RefreshFailed(inner) => inner.is_invalid_credentials(),
            _ => false,
        }
    }

    /// Whether a caller-side policy may retry the request.
    ///
    /// The guard itself never retries anything.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::SessionExpired | AuthError::RefreshFailed(_) => false,
            AuthError::IssuerTransport { status, .. } => status.is_none_or(|s| s >= 500),
            AuthError::Api { status, .. } => *status >= 500 || *status == 429,
            AuthError::Timeout(_) | AuthError::Network(_) => true,
            _ => false,
        }
    }

    /// Short text suitable for a login form.
    pub fn user_message(&self) -> &'static str {
        if self.is_invalid_credentials() {
            "Incorrect username or password."
        } else if self.is_session_expired() {
            crate::notify::SESSION_EXPIRED_MESSAGE
        } else {
            "An error occurred."
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AuthError::Timeout(e.to_string())
        } else {
            AuthError::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        AuthError::InvalidUrl(e.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Serialization(e.to_string())
    }
}

impl From<authguard_config::ConfigError> for AuthError {
    fn from(e: authguard_config::ConfigError) -> Self {
        AuthError::Config(e.to_string())
    }
}
