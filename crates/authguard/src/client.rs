//! Guarded HTTP client.
//!
//! Owns the reqwest client, the cookie jar holding the session marker and
//! the request pipeline. The authorizer is registered once, as the first
//! pipeline stage, when the client is built.

use std::sync::Arc;
use std::time::Duration;

use authguard_config::{EndpointConfig, GuardConfig};
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use url::Url;

use crate::authorizer::{AuthorizerConfig, RequestAuthorizer};
use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use crate::issuer::{Grant, HttpTokenIssuer, SharedTokenIssuer};
use crate::notify::{SharedNotifier, TracingNotifier};
use crate::request::{OutgoingRequest, SharedMiddleware};
use crate::session::{
    Capabilities, CookieSessionPresence, SessionJar, SessionState, SharedSessionPresence,
};
use crate::store::{InMemoryTokenStore, SharedTokenStore};
use crate::token::{TokenInfo, TokenPair, now_ms};

/// Resolved endpoint URLs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub capabilities: Url,
    pub login: Url,
    pub token: Url,
    pub logout: Url,
    pub onboarding: Url,
}

impl Endpoints {
    fn resolve(api_base: &Url, paths: &EndpointConfig) -> Result<Self> {
        let join = |p: &str| api_base.join(p.trim_start_matches('/')).map_err(AuthError::from);
        Ok(Self {
            capabilities: join(&paths.capabilities)?,
            login: join(&paths.login)?,
            token: join(&paths.token)?,
            logout: join(&paths.logout)?,
            onboarding: join(&paths.onboarding)?,
        })
    }
}

/// HTTP client that runs every request through the authorizer.
#[derive(Debug, Clone)]
pub struct GuardedClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    http: reqwest::Client,
    jar: Arc<SessionJar>,
    base_url: Url,
    api_base: Url,
    endpoints: Endpoints,
    timeout: Option<Duration>,
    session: Arc<SessionState>,
    store: SharedTokenStore,
    issuer: SharedTokenIssuer,
    authorizer: RequestAuthorizer,
    pipeline: Vec<SharedMiddleware>,
}

impl GuardedClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.inner.session
    }

    pub fn token_store(&self) -> &SharedTokenStore {
        &self.inner.store
    }

    pub fn authorizer(&self) -> &RequestAuthorizer {
        &self.inner.authorizer
    }

    /// The cookie jar the session marker lives in.
    pub fn cookie_jar(&self) -> &Arc<SessionJar> {
        &self.inner.jar
    }

    /// Build a URL for an API path.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.inner
            .api_base
            .join(path.trim_start_matches('/'))
            .map_err(AuthError::from)
    }

    /// Start a request descriptor for an API path.
    pub fn request(&self, method: Method, path: &str) -> Result<OutgoingRequest> {
        Ok(OutgoingRequest::new(method, self.url(path)?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the startup capability probe. Guarded requests wait for this.
    pub async fn probe(&self) -> Result<Capabilities> {
        self.inner
            .session
            .probe(&self.inner.http, self.inner.endpoints.capabilities.clone())
            .await
    }

    /// Log in with username and password and store the issued pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let client_id = self.inner.store.client_id().await?;
        let tokens = self
            .inner
            .issuer
            .issue(Grant::Password {
                username: username.to_string(),
                password: password.to_string(),
                client_id,
            })
            .await?;
        self.inner.store.save(&tokens).await?;
        tracing::info!(username, "Logged in");
        Ok(tokens)
    }

    /// End the session: tell the server, erase tokens, re-check capabilities.
    ///
    /// Tokens are erased even when the server call fails; that error is returned.
    pub async fn logout(&self) -> Result<()> {
        let request = OutgoingRequest::post(self.inner.endpoints.logout.clone());
        let server_result = match self.send(request).await {
            Ok(response) if !response.status().is_success() => Err(AuthError::Api {
                status: response.status().as_u16(),
                message: "Logout failed".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        self.inner.store.clear().await?;
        tracing::info!("Logged out");

        if let Err(e) = self.probe().await {
            tracing::warn!(error = %e, "Capability re-check after logout failed");
        }
        server_result
    }

    /// Whether the session marker is currently present.
    pub fn session_present(&self) -> bool {
        self.inner.authorizer.presence().is_present()
    }

    /// Stored token summary, if any.
    pub async fn token_info(&self) -> Result<Option<TokenInfo>> {
        let lookahead = self.inner.authorizer.config().refresh_lookahead_ms;
        Ok(self
            .inner
            .store
            .load()
            .await?
            .map(|t| t.info(now_ms(), lookahead)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the pipeline, then dispatch. Pipeline failures never reach the network.
    pub async fn send(&self, request: OutgoingRequest) -> Result<reqwest::Response> {
        let mut request = request;
        for stage in &self.inner.pipeline {
            request = stage.handle(request).await?;
        }
        let mut builder = request.into_builder(&self.inner.http);
        if let Some(timeout) = self.inner.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.send().await?)
    }

    /// Guarded GET returning JSON.
    pub async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        handle_response(response).await
    }

    /// Guarded POST with a JSON body returning JSON.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let request = self.request(Method::POST, path)?.json(body)?;
        let response = self.send(request).await?;
        handle_response(response).await
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response
            .text()
            .await
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        Err(AuthError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Builder for creating a [`GuardedClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: GuardConfig,
    base_url: Option<String>,
    store: Option<SharedTokenStore>,
    issuer: Option<SharedTokenIssuer>,
    presence: Option<SharedSessionPresence>,
    notifier: Option<SharedNotifier>,
    session: Option<Arc<SessionState>>,
    jar: Option<Arc<SessionJar>>,
    middleware: Vec<SharedMiddleware>,
    user_agent: Option<String>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take server, guard and endpoint settings from a loaded config.
    pub fn config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the server URL from the config.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Where tokens are kept; defaults to memory.
    pub fn token_store(mut self, store: SharedTokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the HTTP issuer.
    pub fn issuer(mut self, issuer: SharedTokenIssuer) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Replace the cookie-based session check.
    pub fn session_presence(mut self, presence: SharedSessionPresence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Where user-facing errors go; defaults to the log.
    pub fn notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start with an already-resolved (or shared) auth flag.
    pub fn session_state(mut self, session: Arc<SessionState>) -> Self {
        self.session = Some(session);
        self
    }

    /// Share a cookie jar, e.g. one restored from disk.
    pub fn cookie_jar(mut self, jar: Arc<SessionJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    /// Append a pipeline stage after the authorizer.
    pub fn middleware(mut self, stage: SharedMiddleware) -> Self {
        self.middleware.push(stage);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GuardedClient> {
        self.config.validate()?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| self.config.server.url.clone());
        let base_url = with_trailing_slash(Url::parse(&base_url)?);

        let prefix = self.config.server.api_prefix.trim_matches('/');
        let api_base = if prefix.is_empty() {
            base_url.clone()
        } else {
            base_url.join(&format!("{}/", prefix))?
        };
        let endpoints = Endpoints::resolve(&api_base, &self.config.endpoints)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("authguard/{}", env!("CARGO_PKG_VERSION")));

        let jar = self.jar.unwrap_or_default();
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .cookie_provider(jar.clone())
            .build()?;

        let settings = &self.config.guard;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTokenStore::new()));
        let issuer = self.issuer.unwrap_or_else(|| {
            Arc::new(HttpTokenIssuer::new(
                http.clone(),
                endpoints.login.clone(),
                endpoints.token.clone(),
            ))
        });
        let presence = self.presence.unwrap_or_else(|| {
            Arc::new(CookieSessionPresence::new(
                jar.clone(),
                base_url.clone(),
                settings.session_cookie.clone(),
            ))
        });
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(SessionState::new()));

        let coordinator = Arc::new(
            RefreshCoordinator::new(issuer.clone(), store.clone())
                .with_timeout(settings.refresh_timeout()),
        );
        let authorizer = RequestAuthorizer::new(
            AuthorizerConfig::from(settings),
            session.clone(),
            presence,
            store.clone(),
            coordinator,
            notifier,
        );

        let mut pipeline: Vec<SharedMiddleware> = vec![Arc::new(authorizer.clone())];
        pipeline.extend(self.middleware);

        Ok(GuardedClient {
            inner: Arc::new(ClientInner {
                http,
                jar,
                base_url,
                api_base,
                endpoints,
                timeout: self.config.server.timeout(),
                session,
                store,
                issuer,
                authorizer,
                pipeline,
            }),
        })
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_config_url() {
        let client = ClientBuilder::new().build().unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8888/");
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        let client = ClientBuilder::new()
            .base_url("http://nvr.local:8888/viseron")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://nvr.local:8888/viseron/");
        assert_eq!(
            client.url("cameras").unwrap().as_str(),
            "http://nvr.local:8888/viseron/api/v1/cameras"
        );
    }

    #[test]
    fn test_builder_rejects_bad_url() {
        let result = ClientBuilder::new().base_url("not a url").build();
        assert!(matches!(result, Err(AuthError::InvalidUrl(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = GuardConfig::default();
        config.guard.refresh_pattern = String::new();
        let result = ClientBuilder::new().config(config).build();
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_endpoint_resolution() {
        let client = ClientBuilder::new()
            .base_url("http://nvr.local")
            .build()
            .unwrap();
        let endpoints = client.endpoints();
        assert_eq!(
            endpoints.capabilities.as_str(),
            "http://nvr.local/api/v1/auth/enabled"
        );
        assert_eq!(endpoints.token.as_str(), "http://nvr.local/api/v1/auth/token");
        assert_eq!(endpoints.login.as_str(), "http://nvr.local/api/v1/auth/login");
        assert_eq!(endpoints.onboarding.as_str(), "http://nvr.local/api/v1/onboarding");
    }

    #[test]
    fn test_url_building_strips_leading_slash() {
        let client = ClientBuilder::new()
            .base_url("http://nvr.local")
            .build()
            .unwrap();
        assert_eq!(
            client.url("/events").unwrap().as_str(),
            "http://nvr.local/api/v1/events"
        );
    }

    #[test]
    fn test_empty_api_prefix() {
        let mut config = GuardConfig::default();
        config.server.api_prefix = String::new();
        let client = ClientBuilder::new()
            .config(config)
            .base_url("http://nvr.local")
            .build()
            .unwrap();
        assert_eq!(
            client.endpoints().login.as_str(),
            "http://nvr.local/auth/login"
        );
    }
}
