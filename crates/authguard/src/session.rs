//! Session presence and the process-wide "auth required" flag.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;

use crate::error::{AuthError, Result};
use crate::token::now_ms;

// ─────────────────────────────────────────────────────────────────────────────
// Cookie jar
// ─────────────────────────────────────────────────────────────────────────────

/// A cookie as remembered for saving between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCookie {
    /// `scheme://host:port` the cookie was received from.
    pub origin: String,
    pub name: String,
    pub value: String,
    /// Epoch milliseconds; `None` when the server sent no Expires/Max-Age.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl SavedCookie {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    /// Whether this cookie was received from `url`'s origin.
    pub fn is_for(&self, url: &Url) -> bool {
        self.origin == origin_of(url)
    }
}

/// Cookie jar that also records the origin and expiry of every cookie it is
/// given, so the session marker can be saved and restored without outliving
/// the deadline the server set.
///
/// Sending and matching is delegated to reqwest's [`Jar`].
#[derive(Debug, Default)]
pub struct SessionJar {
    jar: Jar,
    saved: parking_lot::Mutex<Vec<SavedCookie>>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cookie in `Set-Cookie` syntax, as if `url` had sent it.
    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        self.record(cookie, url, now_ms());
        self.jar.add_cookie_str(cookie, url);
    }

    /// Unexpired cookies this jar would send to `url`, with their expiry.
    pub fn snapshot(&self, url: &Url) -> Vec<SavedCookie> {
        let live = self.live_names(url);
        let now = now_ms();
        self.saved
            .lock()
            .iter()
            .filter(|c| c.is_for(url) && !c.is_expired(now) && live.contains(&c.name))
            .cloned()
            .collect()
    }

    /// Re-add saved cookies that belong to `url`'s origin and have not expired.
    ///
    /// Returns how many were added.
    pub fn restore(&self, cookies: &[SavedCookie], url: &Url) -> usize {
        let now = now_ms();
        let mut restored = 0;
        for cookie in cookies.iter().filter(|c| c.is_for(url) && !c.is_expired(now)) {
            let mut line = format!("{}={}; Path=/", cookie.name, cookie.value);
            if let Some(at) = cookie.expires_at {
                let remaining_secs = (at - now) / 1000;
                if remaining_secs <= 0 {
                    continue;
                }
                line.push_str(&format!("; Max-Age={}", remaining_secs));
            }
            self.add_cookie_str(&line, url);
            restored += 1;
        }
        restored
    }

    fn live_names(&self, url: &Url) -> Vec<String> {
        let Some(header) = self.jar.cookies(url) else {
            return Vec::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn record(&self, set_cookie: &str, url: &Url, now: i64) {
        let mut parts = set_cookie.split(';');
        let Some((name, value)) = parts.next().and_then(|p| p.split_once('=')) else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let cookie = SavedCookie {
            origin: origin_of(url),
            name: name.to_string(),
            value: value.trim().to_string(),
            expires_at: parse_expiry(parts, now),
        };

        let mut saved = self.saved.lock();
        saved.retain(|c| !(c.origin == cookie.origin && c.name == cookie.name));
        if !cookie.is_expired(now) {
            saved.push(cookie);
        }
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        let now = now_ms();
        for header in &headers {
            if let Ok(line) = header.to_str() {
                self.record(line, url, now);
            }
        }
        self.jar.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Max-Age wins over Expires; neither means a session cookie.
fn parse_expiry<'a>(attributes: impl Iterator<Item = &'a str>, now: i64) -> Option<i64> {
    let mut expires = None;
    for attribute in attributes {
        let Some((key, value)) = attribute.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "max-age" => {
                if let Ok(secs) = value.parse::<i64>() {
                    return Some(now.saturating_add(secs.max(0).saturating_mul(1000)));
                }
            }
            "expires" => expires = parse_http_date(value),
            _ => {}
        }
    }
    expires
}

fn parse_http_date(value: &str) -> Option<i64> {
    if let Ok(at) = chrono::DateTime::parse_from_rfc2822(value) {
        return Some(at.timestamp_millis());
    }
    chrono::NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|at| at.and_utc().timestamp_millis())
}

// ─────────────────────────────────────────────────────────────────────────────
// Session presence
// ─────────────────────────────────────────────────────────────────────────────

/// Capability check against the server-owned session marker.
pub trait SessionPresence: Send + Sync + std::fmt::Debug {
    fn is_present(&self) -> bool;
}

pub type SharedSessionPresence = Arc<dyn SessionPresence>;

/// Reads the session marker cookie from the HTTP client's cookie jar.
#[derive(Debug, Clone)]
pub struct CookieSessionPresence {
    jar: Arc<SessionJar>,
    url: Url,
    cookie_name: String,
}

impl CookieSessionPresence {
    pub fn new(jar: Arc<SessionJar>, url: Url, cookie_name: impl Into<String>) -> Self {
        Self {
            jar,
            url,
            cookie_name: cookie_name.into(),
        }
    }
}

impl SessionPresence for CookieSessionPresence {
    fn is_present(&self) -> bool {
        let Some(header) = self.jar.cookies(&self.url) else {
            return false;
        };
        let Ok(header) = header.to_str() else {
            return false;
        };
        header.split(';').any(|pair| {
            pair.trim()
                .split_once('=')
                .is_some_and(|(name, value)| name == self.cookie_name && !value.is_empty())
        })
    }
}

/// Fixed answer; for tests and embedders that track sessions themselves.
#[derive(Debug, Default)]
pub struct StaticSessionPresence {
    present: std::sync::atomic::AtomicBool,
}

impl StaticSessionPresence {
    pub fn new(present: bool) -> Self {
        Self {
            present: std::sync::atomic::AtomicBool::new(present),
        }
    }

    pub fn set(&self, present: bool) {
        self.present
            .store(present, std::sync::atomic::Ordering::SeqCst);
    }
}

impl SessionPresence for StaticSessionPresence {
    fn is_present(&self) -> bool {
        self.present.load(std::sync::atomic::Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session state
// ─────────────────────────────────────────────────────────────────────────────

/// Response of the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Capabilities {
    /// Whether this deployment enforces authentication.
    pub enabled: bool,
    #[serde(default)]
    pub onboarding_complete: bool,
}

/// Process-wide `auth_required` flag.
///
/// Unresolved until the startup probe answers; readers wait until then.
#[derive(Debug)]
pub struct SessionState {
    auth_required: watch::Sender<Option<bool>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Unresolved state; `auth_required()` blocks until a probe or `set_auth_required`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { auth_required: tx }
    }

    /// Already-resolved state.
    pub fn resolved(auth_required: bool) -> Self {
        let (tx, _rx) = watch::channel(Some(auth_required));
        Self { auth_required: tx }
    }

    /// Wait for the probe, then report whether requests need a token.
    pub async fn auth_required(&self) -> bool {
        let mut rx = self.auth_required.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(true),
            Err(_) => true,
        }
    }

    /// Current value without waiting.
    pub fn current(&self) -> Option<bool> {
        *self.auth_required.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.current().is_some()
    }

    pub fn set_auth_required(&self, required: bool) {
        self.auth_required.send_replace(Some(required));
    }

    /// Ask the capability endpoint whether auth is enforced and record the answer.
    ///
    /// A failed probe resolves to `auth_required = true` before the error is
    /// returned, so waiting requests fail closed instead of hanging.
    pub async fn probe(&self, http: &reqwest::Client, url: Url) -> Result<Capabilities> {
        match fetch_capabilities(http, url).await {
            Ok(caps) => {
                tracing::info!(
                    auth_enabled = caps.enabled,
                    onboarding_complete = caps.onboarding_complete,
                    "Capability probe resolved"
                );
                self.set_auth_required(caps.enabled);
                Ok(caps)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Capability probe failed, assuming auth is required");
                self.set_auth_required(true);
                Err(e)
            }
        }
    }
}

async fn fetch_capabilities(http: &reqwest::Client, url: Url) -> Result<Capabilities> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Api {
            status: status.as_u16(),
            message: "Capability probe failed".to_string(),
        });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cookie_presence() {
        let jar = Arc::new(SessionJar::new());
        let url = Url::parse("http://nvr.local/").unwrap();
        let presence = CookieSessionPresence::new(jar.clone(), url.clone(), "user");
        assert!(!presence.is_present());

        jar.add_cookie_str("theme=dark", &url);
        assert!(!presence.is_present());

        jar.add_cookie_str("user=admin", &url);
        assert!(presence.is_present());
    }

    #[test]
    fn test_cookie_presence_ignores_prefix_names() {
        let jar = Arc::new(SessionJar::new());
        let url = Url::parse("http://nvr.local/").unwrap();
        jar.add_cookie_str("username=admin", &url);

        let presence = CookieSessionPresence::new(jar, url, "user");
        assert!(!presence.is_present());
    }

    fn nvr() -> Url {
        Url::parse("http://nvr.local:8888/").unwrap()
    }

    #[test]
    fn test_jar_records_max_age() {
        let jar = SessionJar::new();
        let before = now_ms();
        jar.add_cookie_str("user=admin; Path=/; Max-Age=60", &nvr());

        let saved = jar.snapshot(&nvr());
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "user");
        assert_eq!(saved[0].value, "admin");
        assert_eq!(saved[0].origin, "http://nvr.local:8888");
        let at = saved[0].expires_at.unwrap();
        assert!(at >= before + 60_000 && at <= now_ms() + 60_000);
    }

    #[test]
    fn test_jar_records_set_cookie_headers() {
        let jar = SessionJar::new();
        let headers = [
            HeaderValue::from_static("user=admin; Path=/; Expires=Wed, 21 Oct 2099 07:28:00 GMT"),
            HeaderValue::from_static("theme=dark; Path=/"),
        ];
        jar.set_cookies(&mut headers.iter(), &nvr());

        let saved = jar.snapshot(&nvr());
        let user = saved.iter().find(|c| c.name == "user").unwrap();
        assert_eq!(user.expires_at, Some(4_096_250_880_000));
        let theme = saved.iter().find(|c| c.name == "theme").unwrap();
        assert_eq!(theme.expires_at, None);
        assert!(jar.cookies(&nvr()).is_some());
    }

    #[test]
    fn test_jar_forgets_deleted_cookie() {
        let jar = SessionJar::new();
        jar.add_cookie_str("user=admin; Path=/", &nvr());
        jar.add_cookie_str("user=; Path=/; Max-Age=0", &nvr());

        assert!(jar.snapshot(&nvr()).is_empty());
        let presence = CookieSessionPresence::new(Arc::new(jar), nvr(), "user");
        assert!(!presence.is_present());
    }

    #[test]
    fn test_restore_skips_expired_cookie() {
        let expired = SavedCookie {
            origin: "http://nvr.local:8888".to_string(),
            name: "user".to_string(),
            value: "admin".to_string(),
            expires_at: Some(now_ms() - 1_000),
        };
        let jar = Arc::new(SessionJar::new());
        assert_eq!(jar.restore(&[expired], &nvr()), 0);

        let presence = CookieSessionPresence::new(jar, nvr(), "user");
        assert!(!presence.is_present());
    }

    #[test]
    fn test_restore_keeps_remaining_lifetime() {
        let saved = SavedCookie {
            origin: "http://nvr.local:8888".to_string(),
            name: "user".to_string(),
            value: "admin".to_string(),
            expires_at: Some(now_ms() + 120_000),
        };
        let jar = Arc::new(SessionJar::new());
        assert_eq!(jar.restore(std::slice::from_ref(&saved), &nvr()), 1);

        let restored = jar.snapshot(&nvr());
        let at = restored[0].expires_at.unwrap();
        assert!(at <= saved.expires_at.unwrap());
        assert!(at > now_ms() + 100_000);
        assert!(CookieSessionPresence::new(jar, nvr(), "user").is_present());
    }

    #[test]
    fn test_restore_ignores_other_origin() {
        let other = SavedCookie {
            origin: "http://other.local:8888".to_string(),
            name: "user".to_string(),
            value: "admin".to_string(),
            expires_at: None,
        };
        let jar = Arc::new(SessionJar::new());
        assert_eq!(jar.restore(&[other], &nvr()), 0);
        assert!(!CookieSessionPresence::new(jar, nvr(), "user").is_present());
    }

    #[test]
    fn test_parse_expiry_variants() {
        let now = 1_700_000_000_000;
        assert_eq!(parse_expiry("Max-Age=10".split(';'), now), Some(now + 10_000));
        assert_eq!(parse_expiry(" max-age=-5".split(';'), now), Some(now));
        assert_eq!(
            parse_expiry(" Expires=Wed, 21-Oct-2099 07:28:00 GMT".split(';'), now),
            Some(4_096_250_880_000)
        );
        assert_eq!(
            parse_expiry(" Expires=Wed, 21 Oct 2099 07:28:00 GMT; Max-Age=10".split(';'), now),
            Some(now + 10_000)
        );
        assert_eq!(parse_expiry(" Path=/; HttpOnly".split(';'), now), None);
    }

    #[test]
    fn test_static_presence_toggles() {
        let presence = StaticSessionPresence::new(true);
        assert!(presence.is_present());
        presence.set(false);
        assert!(!presence.is_present());
    }

    #[tokio::test]
    async fn test_resolved_state_does_not_wait() {
        assert!(!SessionState::resolved(false).auth_required().await);
        assert!(SessionState::resolved(true).auth_required().await);
    }

    #[tokio::test]
    async fn test_unresolved_state_waits_for_probe() {
        let state = Arc::new(SessionState::new());
        assert!(!state.is_resolved());

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.auth_required().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.set_auth_required(false);
        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn test_capabilities_parse() {
        let caps: Capabilities =
            serde_json::from_str(r#"{"enabled":false,"onboarding_complete":true}"#).unwrap();
        assert!(!caps.enabled);
        assert!(caps.onboarding_complete);

        let minimal: Capabilities = serde_json::from_str(r#"{"enabled":true}"#).unwrap();
        assert!(!minimal.onboarding_complete);
    }
}
