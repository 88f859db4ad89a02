//! Token pair model and expiry arithmetic.

use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Signed token material attached to guarded requests.
///
/// `header` and `payload` are opaque signed segments; joined with `.` they
/// form the bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub header: String,
    pub payload: String,
    /// Expiry in epoch milliseconds.
    pub expires_at: i64,
}

impl TokenPair {
    pub fn new(header: impl Into<String>, payload: impl Into<String>, expires_at: i64) -> Self {
        Self {
            header: header.into(),
            payload: payload.into(),
            expires_at,
        }
    }

    /// The credential sent after `Bearer `.
    pub fn credential(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }

    /// Full `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.credential())
    }

    /// True when the pair expires within `lookahead_ms` of `now_ms`, or already has.
    pub fn is_stale(&self, now_ms: i64, lookahead_ms: u64) -> bool {
        let lookahead = i64::try_from(lookahead_ms).unwrap_or(i64::MAX);
        self.expires_at <= now_ms.saturating_add(lookahead)
    }

    /// Summary for display.
    pub fn info(&self, now_ms: i64, lookahead_ms: u64) -> TokenInfo {
        let remaining = self.expires_at.saturating_sub(now_ms).max(0);
        TokenInfo {
            expires_in_secs: u64::try_from(remaining / 1000).unwrap_or(0),
            is_expired: self.expires_at <= now_ms,
            is_stale: self.is_stale(now_ms, lookahead_ms),
        }
    }
}

/// Body returned by the login and token endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub header: String,
    pub payload: String,
    /// Lifetime in seconds.
    #[serde(alias = "expires_in")]
    pub expiration: i64,
}

impl TokenResponse {
    /// Anchor the relative lifetime at `issued_at_ms`.
    pub fn into_pair(self, issued_at_ms: i64) -> TokenPair {
        TokenPair {
            header: self.header,
            payload: self.payload,
            expires_at: issued_at_ms.saturating_add(self.expiration.saturating_mul(1000)),
        }
    }
}

/// Information about stored tokens for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub expires_in_secs: u64,
    pub is_expired: bool,
    /// Would be refreshed before the next guarded request.
    pub is_stale: bool,
}

impl TokenInfo {
    pub fn expires_in_display(&self) -> String {
        if self.is_expired {
            "Expired (will refresh on next use)".to_string()
        } else {
            let hours = self.expires_in_secs / 3600;
            let minutes = (self.expires_in_secs % 3600) / 60;
            let seconds = self.expires_in_secs % 60;
            if hours == 0 && minutes == 0 {
                format!("{}s", seconds)
            } else {
                format!("{}h {}m", hours, minutes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const LOOKAHEAD: u64 = 10_000;

    #[test]
    fn test_bearer_joins_segments() {
        let pair = TokenPair::new("eyJhbGciOi", "eyJzdWIiOi", NOW);
        assert_eq!(pair.credential(), "eyJhbGciOi.eyJzdWIiOi");
        assert_eq!(pair.bearer(), "Bearer eyJhbGciOi.eyJzdWIiOi");
    }

    #[test]
    fn test_staleness_window() {
        let far = TokenPair::new("h", "p", NOW + 10_001);
        assert!(!far.is_stale(NOW, LOOKAHEAD));

        let edge = TokenPair::new("h", "p", NOW + 10_000);
        assert!(edge.is_stale(NOW, LOOKAHEAD));

        let soon = TokenPair::new("h", "p", NOW + 3_000);
        assert!(soon.is_stale(NOW, LOOKAHEAD));

        let expired = TokenPair::new("h", "p", NOW - 1_000);
        assert!(expired.is_stale(NOW, LOOKAHEAD));
    }

    #[test]
    fn test_zero_lookahead_only_refreshes_expired() {
        let pair = TokenPair::new("h", "p", NOW + 1);
        assert!(!pair.is_stale(NOW, 0));
        assert!(pair.is_stale(NOW + 1, 0));
    }

    #[test]
    fn test_response_into_pair() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"header":"h","payload":"p","expiration":3600}"#).unwrap();
        let pair = response.into_pair(NOW);
        assert_eq!(pair.expires_at, NOW + 3_600_000);

        let aliased: TokenResponse =
            serde_json::from_str(r#"{"header":"h","payload":"p","expires_in":60}"#).unwrap();
        assert_eq!(aliased.into_pair(NOW).expires_at, NOW + 60_000);
    }

    #[test]
    fn test_token_info_display() {
        let pair = TokenPair::new("h", "p", NOW + 7_200_000);
        let info = pair.info(NOW, LOOKAHEAD);
        assert!(!info.is_expired);
        assert!(!info.is_stale);
        assert_eq!(info.expires_in_display(), "2h 0m");

        let expired = TokenPair::new("h", "p", NOW - 5).info(NOW, LOOKAHEAD);
        assert!(expired.is_expired);
        assert!(expired.expires_in_display().contains("Expired"));

        let closing = TokenPair::new("h", "p", NOW + 8_000).info(NOW, LOOKAHEAD);
        assert!(closing.is_stale);
        assert_eq!(closing.expires_in_display(), "8s");
    }
}
