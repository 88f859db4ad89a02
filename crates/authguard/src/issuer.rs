//! Token issuance: one network round trip per grant.
//!
//! The issuer never stores what it returns and never retries. Refresh
//! grants reach it only through [`RefreshCoordinator`](crate::coordinator::RefreshCoordinator).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::error::{AuthError, Result};
use crate::token::{TokenPair, TokenResponse, now_ms};

/// A grant presented to the identity endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// Initial login.
    Password {
        username: String,
        password: String,
        client_id: String,
    },
    /// Exchange the server-held refresh credential for a new pair.
    RefreshToken { client_id: String },
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Grant::Password { client_id, .. } | Grant::RefreshToken { client_id } => client_id,
        }
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::Password {
                username,
                client_id,
                ..
            } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .field("client_id", client_id)
                .finish(),
            Grant::RefreshToken { client_id } => f
                .debug_struct("RefreshToken")
                .field("client_id", client_id)
                .finish(),
        }
    }
}

/// Turns a grant into a token pair.
#[async_trait]
pub trait TokenIssuer: Send + Sync + std::fmt::Debug {
    async fn issue(&self, grant: Grant) -> Result<TokenPair>;
}

pub type SharedTokenIssuer = Arc<dyn TokenIssuer>;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    client_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TokenRefreshRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
}

/// Issuer backed by the server's login and token endpoints.
///
/// Shares the guarded client's cookie jar so the session marker set by the
/// server on login/refresh is visible to the authorizer.
#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    http: reqwest::Client,
    login_url: Url,
    token_url: Url,
}

impl HttpTokenIssuer {
    pub fn new(http: reqwest::Client, login_url: Url, token_url: Url) -> Self {
        Self {
            http,
            login_url,
            token_url,
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &Url, body: &B) -> Result<TokenPair> {
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AuthError::IssuerTransport {
                status: Some(status.as_u16()),
                message: error_text,
            });
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| {
            AuthError::Serialization(format!("Failed to parse token response: {}", e))
        })?;
        Ok(tokens.into_pair(now_ms()))
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    AuthError::IssuerTransport {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, grant: Grant) -> Result<TokenPair> {
        tracing::debug!(grant_type = grant.grant_type(), "Requesting tokens");
        match &grant {
            Grant::Password {
                username,
                password,
                client_id,
            } => {
                let body = LoginRequest {
                    username,
                    password,
                    client_id,
                };
                self.post(&self.login_url, &body).await
            }
            Grant::RefreshToken { client_id } => {
                let body = TokenRefreshRequest {
                    grant_type: grant.grant_type(),
                    client_id,
                };
                self.post(&self.token_url, &body).await
            }
        }
    }
}
