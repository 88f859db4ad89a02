//! Bearer-token request guard with single-flight token refresh.
//!
//! Sits in front of every outgoing request, attaching a valid bearer
//! token, refreshing it transparently when it is about to expire, and
//! refusing to send anything once the server-owned session marker is gone.
//!
//! # Components
//!
//! - [`store`]: token pair and client id persistence
//! - [`issuer`]: login/refresh round trips to the identity endpoints
//! - [`coordinator`]: single-flight refresh shared by concurrent requests
//! - [`authorizer`]: the per-request bypass/refresh/attach/reject decision
//! - [`session`]: session marker check and the startup "auth required" probe
//! - [`client`]: reqwest client with the authorizer registered as middleware
//!
//! # Example
//!
//! ```no_run
//! use authguard::{GuardedClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = GuardedClient::builder()
//!     .base_url("http://localhost:8888")
//!     .build()?;
//!
//! client.probe().await?;
//! client.login("admin", "secret").await?;
//! let cameras: serde_json::Value = client.get("cameras").await?;
//! # Ok(())
//! # }
//! ```

pub mod authorizer;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod issuer;
pub mod notify;
pub mod request;
pub mod session;
pub mod store;
pub mod token;

pub use authorizer::{AuthorizerConfig, RequestAuthorizer};
pub use client::{ClientBuilder, Endpoints, GuardedClient};
pub use coordinator::RefreshCoordinator;
pub use error::{AuthError, Result};
pub use issuer::{Grant, HttpTokenIssuer, SharedTokenIssuer, TokenIssuer};
pub use notify::{
    ChannelNotifier, Notification, Notifier, SESSION_EXPIRED_MESSAGE, Severity, SharedNotifier,
    TracingNotifier,
};
pub use request::{OutgoingRequest, RequestMiddleware, SharedMiddleware};
pub use session::{
    Capabilities, CookieSessionPresence, SavedCookie, SessionJar, SessionPresence, SessionState,
    SharedSessionPresence, StaticSessionPresence,
};
pub use store::{FileTokenStore, InMemoryTokenStore, SharedTokenStore, TokenStore};
pub use token::{TokenInfo, TokenPair};
