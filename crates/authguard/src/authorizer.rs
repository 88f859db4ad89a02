//! The request interceptor.
//!
//! Every outgoing request passes through [`RequestAuthorizer::authorize`],
//! which decides, in order:
//!
//! 1. auth disabled for this deployment → pass through untouched
//! 2. bypass endpoint (probe, login, onboarding) → pass through untouched
//! 3. session marker missing → notify the user, clear tokens, fail with `SessionExpired`
//! 4. refresh endpoint itself → pass through untouched
//! 5. stored pair missing or inside the lookahead window, and this request has
//!    not refreshed yet → obtain a fresh pair through the coordinator
//! 6. attach `Authorization: Bearer {header}.{payload}`
//!
//! Steps 1 and 2 are evaluated bypass-first so the capability probe can be
//! sent while the auth flag is still unresolved; both outcomes are identical.

use std::sync::Arc;

use async_trait::async_trait;
use authguard_config::GuardSettings;
use reqwest::header::AUTHORIZATION;

use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use crate::notify::{SESSION_EXPIRED_MESSAGE, Severity, SharedNotifier};
use crate::request::{OutgoingRequest, RequestMiddleware};
use crate::session::{SessionState, SharedSessionPresence};
use crate::store::SharedTokenStore;
use crate::token::now_ms;

/// Substitutable interception options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizerConfig {
    /// URL substrings that skip all token logic.
    pub bypass_patterns: Vec<String>,
    /// URL substring identifying the refresh endpoint.
    pub refresh_pattern: String,
    /// Refresh tokens expiring within this many milliseconds.
    pub refresh_lookahead_ms: u64,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self::from(&GuardSettings::default())
    }
}

impl From<&GuardSettings> for AuthorizerConfig {
    fn from(settings: &GuardSettings) -> Self {
        Self {
            bypass_patterns: settings.bypass_patterns.clone(),
            refresh_pattern: settings.refresh_pattern.clone(),
            refresh_lookahead_ms: settings.refresh_lookahead_ms,
        }
    }
}

impl AuthorizerConfig {
    pub fn is_bypass(&self, url: &str) -> bool {
        self.bypass_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    pub fn is_refresh_endpoint(&self, url: &str) -> bool {
        url.contains(self.refresh_pattern.as_str())
    }
}

/// Attaches bearer tokens to outgoing requests.
#[derive(Debug, Clone)]
pub struct RequestAuthorizer {
    config: AuthorizerConfig,
    session: Arc<SessionState>,
    presence: SharedSessionPresence,
    store: SharedTokenStore,
    coordinator: Arc<RefreshCoordinator>,
    notifier: SharedNotifier,
}

impl RequestAuthorizer {
    pub fn new(
        config: AuthorizerConfig,
        session: Arc<SessionState>,
        presence: SharedSessionPresence,
        store: SharedTokenStore,
        coordinator: Arc<RefreshCoordinator>,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            config,
            session,
            presence,
            store,
            coordinator,
            notifier,
        }
    }

    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn presence(&self) -> &SharedSessionPresence {
        &self.presence
    }

    /// Decide bypass/refresh/attach/reject for one request.
    pub async fn authorize(&self, mut request: OutgoingRequest) -> Result<OutgoingRequest> {
        let target = request.url.as_str();

        if self.config.is_bypass(target) {
            tracing::trace!(url = %request.url, "Bypass endpoint, no token handling");
            return Ok(request);
        }

        if !self.session.auth_required().await {
            return Ok(request);
        }

        if !self.presence.is_present() {
            tracing::debug!(url = %request.url, "Session marker missing, blocking request");
            self.notifier.notify(Severity::Error, SESSION_EXPIRED_MESSAGE);
            if let Err(e) = self.store.clear().await {
                tracing::warn!(error = %e, "Failed to clear tokens for expired session");
            }
            return Err(AuthError::SessionExpired);
        }

        if self.config.is_refresh_endpoint(target) {
            return Ok(request);
        }

        let mut tokens = self.store.load().await?;
        let stale = tokens
            .as_ref()
            .is_none_or(|t| t.is_stale(now_ms(), self.config.refresh_lookahead_ms));

        if stale && !request.token_refreshed() {
            tracing::debug!(url = %request.url, "Stored token missing or stale, refreshing");
            tokens = Some(self.coordinator.refresh_replacing(tokens).await?);
            request.mark_token_refreshed();
        }

        if let Some(tokens) = tokens {
            request.set_header(AUTHORIZATION, &tokens.bearer())?;
        }
        Ok(request)
    }
}

#[async_trait]
impl RequestMiddleware for RequestAuthorizer {
    async fn handle(&self, request: OutgoingRequest) -> Result<OutgoingRequest> {
        self.authorize(request).await
    }
}
