//! Single-flight token refresh.
//!
//! At most one refresh call is outstanding at any time. The first caller
//! that needs fresh tokens starts the call and publishes a shared pending
//! result; every caller arriving while it is outstanding awaits that same
//! result. The pending result removes itself from the slot as soon as the
//! issuer call resolves, so the next caller starts a new call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::error::{AuthError, Result};
use crate::issuer::{Grant, SharedTokenIssuer};
use crate::store::SharedTokenStore;
use crate::token::TokenPair;

/// Outcome handle shared by every caller of one refresh cycle.
pub type PendingRefresh = Shared<BoxFuture<'static, Result<TokenPair>>>;

struct InFlight {
    ticket: u64,
    pending: PendingRefresh,
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<Mutex<Option<InFlight>>>;

/// Coordinates refreshes so concurrent callers share one issuer call.
#[derive(Debug)]
pub struct RefreshCoordinator {
    issuer: SharedTokenIssuer,
    store: SharedTokenStore,
    timeout: Option<Duration>,
    in_flight: Slot,
    next_ticket: AtomicU64,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(issuer: SharedTokenIssuer, store: SharedTokenStore) -> Self {
        Self {
            issuer,
            store,
            timeout: None,
            in_flight: Arc::new(Mutex::new(None)),
            next_ticket: AtomicU64::new(0),
            started: AtomicU64::new(0),
        }
    }

    /// Bound each refresh call; on expiry every waiter gets `RefreshFailed(Timeout)`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of refresh calls started so far.
    pub fn refresh_count(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether a refresh call is outstanding right now.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Obtain a freshly issued pair, joining an outstanding refresh if there is one.
    ///
    /// On success the pair has already been written to the store. On failure
    /// nothing is stored and the error is `RefreshFailed`, identical for every
    /// caller that shared the call.
    pub async fn obtain_fresh_token_pair(&self) -> Result<TokenPair> {
        self.run_cycle(None).await
    }

    /// Refresh because `observed` was found stale.
    ///
    /// A new cycle first re-reads the store; when it no longer holds
    /// `observed` another cycle has already replaced the pair, and that pair
    /// is returned without an issuer call.
    pub async fn refresh_replacing(&self, observed: Option<TokenPair>) -> Result<TokenPair> {
        self.run_cycle(Some(observed)).await
    }

    async fn run_cycle(&self, observed: Option<Option<TokenPair>>) -> Result<TokenPair> {
        let issuer = self.issuer.clone();
        let store = self.store.clone();
        let timeout = self.timeout;

        let pending = self.get_or_start(move || {
            async move {
                if let Some(observed) = observed
                    && let Some(current) = store.load().await?
                    && observed.as_ref() != Some(&current)
                {
                    tracing::debug!("Stored pair already replaced, skipping issuer call");
                    return Ok(current);
                }

                let client_id = store.client_id().await?;
                let call = issuer.issue(Grant::RefreshToken { client_id });
                let tokens = match timeout {
                    Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                        AuthError::Timeout(format!("token refresh exceeded {:?}", limit))
                    })??,
                    None => call.await?,
                };
                store.save(&tokens).await?;
                Ok(tokens)
            }
            .boxed()
        });

        pending.await
    }

    /// Return the outstanding refresh, or start one with `start`.
    ///
    /// `start` runs at most once per refresh cycle, under the slot lock, and
    /// must not block.
    pub fn get_or_start<F>(&self, start: F) -> PendingRefresh
    where
        F: FnOnce() -> BoxFuture<'static, Result<TokenPair>>,
    {
        let mut slot = self.in_flight.lock();
        if let Some(in_flight) = slot.as_ref() {
            tracing::debug!(ticket = in_flight.ticket, "Joining in-flight token refresh");
            return in_flight.pending.clone();
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        tracing::info!(ticket, "Starting token refresh");

        let refresh = start();
        let release = Arc::clone(&self.in_flight);
        let pending = async move {
            let outcome = refresh.await.map_err(|e| match e {
                already @ AuthError::RefreshFailed(_) => already,
                other => AuthError::RefreshFailed(Box::new(other)),
            });

            {
                let mut slot = release.lock();
                if slot.as_ref().is_some_and(|f| f.ticket == ticket) {
                    *slot = None;
                }
            }

            match &outcome {
                Ok(_) => tracing::info!(ticket, "Token refresh succeeded"),
                Err(e) => tracing::warn!(ticket, error = %e, "Token refresh failed"),
            }
            outcome
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            ticket,
            pending: pending.clone(),
        });
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::TokenIssuer;
    use crate::store::{InMemoryTokenStore, TokenStore};
    use crate::token::now_ms;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Issuer that counts calls, waits, then answers from a script.
    #[derive(Debug)]
    struct ScriptedIssuer {
        calls: AtomicU32,
        delay: Duration,
        fail_with: Option<u16>,
    }

    impl ScriptedIssuer {
        fn ok(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                delay,
                fail_with: None,
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                delay: Duration::from_millis(20),
                fail_with: Some(status),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenIssuer for ScriptedIssuer {
        async fn issue(&self, grant: Grant) -> Result<TokenPair> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(grant.grant_type(), "refresh_token");
            tokio::time::sleep(self.delay).await;
            match self.fail_with {
                Some(status) => Err(AuthError::IssuerTransport {
                    status: Some(status),
                    message: "refresh rejected".to_string(),
                }),
                None => Ok(TokenPair::new(
                    format!("h{}", n),
                    format!("p{}", n),
                    now_ms() + 3_600_000,
                )),
            }
        }
    }

    fn coordinator(issuer: Arc<ScriptedIssuer>) -> (RefreshCoordinator, Arc<InMemoryTokenStore>) {
        let store = Arc::new(InMemoryTokenStore::new());
        (RefreshCoordinator::new(issuer, store.clone()), store)
    }

    #[tokio::test]
    async fn test_refresh_stores_new_pair() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(1));
        let (coordinator, store) = coordinator(issuer.clone());

        let pair = coordinator.obtain_fresh_token_pair().await.unwrap();
        assert_eq!(pair.header, "h1");
        assert_eq!(store.load().await.unwrap(), Some(pair));
        assert_eq!(issuer.calls(), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(50));
        let (coordinator, _store) = coordinator(issuer.clone());

        let results = futures::future::join_all(
            (0..8).map(|_| coordinator.obtain_fresh_token_pair()),
        )
        .await;

        assert_eq!(issuer.calls(), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_across_tasks_share_one_call() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(50));
        let (coordinator, _store) = coordinator(issuer.clone());
        let coordinator = Arc::new(coordinator);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.obtain_fresh_token_pair().await })
            })
            .collect();

        let mut headers = Vec::new();
        for handle in handles {
            headers.push(handle.await.unwrap().unwrap().header);
        }
        assert_eq!(issuer.calls(), 1);
        assert!(headers.iter().all(|h| h == "h1"));
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_stores_nothing() {
        let issuer = ScriptedIssuer::failing(401);
        let (coordinator, store) = coordinator(issuer.clone());

        let (a, b, c) = tokio::join!(
            coordinator.obtain_fresh_token_pair(),
            coordinator.obtain_fresh_token_pair(),
            coordinator.obtain_fresh_token_pair(),
        );

        assert_eq!(issuer.calls(), 1);
        for result in [a, b, c] {
            let err = result.unwrap_err();
            assert!(matches!(err, AuthError::RefreshFailed(_)));
            assert!(err.is_invalid_credentials());
        }
        assert_eq!(store.load().await.unwrap(), None);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_next_staleness_starts_new_call() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(1));
        let (coordinator, store) = coordinator(issuer.clone());

        coordinator.obtain_fresh_token_pair().await.unwrap();
        let second = coordinator.obtain_fresh_token_pair().await.unwrap();

        assert_eq!(issuer.calls(), 2);
        assert_eq!(second.header, "h2");
        assert_eq!(store.load().await.unwrap().unwrap().header, "h2");
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_next_cycle() {
        let failing = ScriptedIssuer::failing(500);
        let store: SharedTokenStore = Arc::new(InMemoryTokenStore::new());
        let coordinator = RefreshCoordinator::new(failing, store);

        assert!(coordinator.obtain_fresh_token_pair().await.is_err());
        assert!(!coordinator.is_refreshing());
        assert!(coordinator.obtain_fresh_token_pair().await.is_err());
        assert_eq!(coordinator.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_all_waiters() {
        let issuer = ScriptedIssuer::ok(Duration::from_secs(60));
        let (coordinator, store) = coordinator(issuer.clone());
        let coordinator = coordinator.with_timeout(Some(Duration::from_millis(20)));

        let (a, b) = tokio::join!(
            coordinator.obtain_fresh_token_pair(),
            coordinator.obtain_fresh_token_pair(),
        );

        assert_eq!(issuer.calls(), 1);
        for result in [a, b] {
            match result.unwrap_err() {
                AuthError::RefreshFailed(inner) => {
                    assert!(matches!(*inner, AuthError::Timeout(_)))
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_replacing_skips_issuer_when_pair_already_replaced() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(1));
        let (coordinator, store) = coordinator(issuer.clone());

        let seen = TokenPair::new("old", "p", now_ms() - 1_000);
        let replaced = TokenPair::new("newer", "p", now_ms() + 3_600_000);
        store.save(&replaced).await.unwrap();

        let pair = coordinator.refresh_replacing(Some(seen)).await.unwrap();
        assert_eq!(pair, replaced);
        assert_eq!(issuer.calls(), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_replacing_calls_issuer_when_pair_unchanged() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(1));
        let (coordinator, store) = coordinator(issuer.clone());

        let seen = TokenPair::new("old", "p", now_ms() - 1_000);
        store.save(&seen).await.unwrap();

        let pair = coordinator.refresh_replacing(Some(seen)).await.unwrap();
        assert_eq!(pair.header, "h1");
        assert_eq!(issuer.calls(), 1);

        // Nothing was stored when the caller looked, nothing is stored now.
        store.clear().await.unwrap();
        let pair = coordinator.refresh_replacing(None).await.unwrap();
        assert_eq!(pair.header, "h2");
        assert_eq!(issuer.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_after_completed_cycle_reuses_stored_pair() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(1));
        let (coordinator, store) = coordinator(issuer.clone());
        let stale = TokenPair::new("old", "p", now_ms() - 1_000);
        store.save(&stale).await.unwrap();

        // Two requests both saw `stale`; the second arrives after the first
        // cycle has finished and released the slot.
        let first = coordinator.refresh_replacing(Some(stale.clone())).await.unwrap();
        let second = coordinator.refresh_replacing(Some(stale)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(issuer.calls(), 1);
        assert_eq!(coordinator.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_get_or_start_runs_start_once() {
        let issuer = ScriptedIssuer::ok(Duration::from_millis(1));
        let (coordinator, _store) = coordinator(issuer);
        let starts = AtomicU32::new(0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));
        let make = || {
            starts.fetch_add(1, Ordering::SeqCst);
            let rx = rx.clone();
            async move {
                if let Some(rx) = rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok::<_, AuthError>(TokenPair::new("gh", "gp", now_ms() + 60_000))
            }
            .boxed()
        };

        let first = coordinator.get_or_start(make);
        let second = coordinator.get_or_start(make);
        assert!(coordinator.is_refreshing());

        tx.send(()).unwrap();
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }
}
