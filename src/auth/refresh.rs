//! Single-flight token refresh
//!
//! Concurrent callers that hit an expired token share one refresh future
//! instead of each calling the refresh endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;

use super::tokens::{CredentialPair, TokenResponse, TokenStore};
use crate::api::transport::{HttpRequest, Transport};

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<TokenStore>,
    refresh_url: String,
    timeout: Duration,
    /// Generation id plus the running refresh, if any
    in_flight: Arc<Mutex<Option<(u64, RefreshFuture)>>>,
    generation: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<TokenStore>,
        refresh_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            refresh_url,
            timeout,
            in_flight: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Refresh the credential pair, joining a refresh that is already running.
    /// Returns true once the store holds a freshly issued pair.
    ///
    /// The refresh runs as its own task and clears the in-flight slot when it
    /// finishes, so it completes even if every caller gives up on it.
    pub async fn ensure_fresh_token(&self) -> bool {
        let refresh = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let running = slot.as_ref().map(|(_, fut)| fut.clone());
            match running {
                Some(running) => {
                    tracing::debug!("Joining in-flight token refresh");
                    running
                }
                None => {
                    let id = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fut = self.spawn_refresh(id);
                    *slot = Some((id, fut.clone()));
                    fut
                }
            }
        };

        refresh.await
    }

    /// Start refresh generation `id`. Called with the slot locked, so the
    /// task cannot clear the slot before the caller has filled it.
    fn spawn_refresh(&self, id: u64) -> RefreshFuture {
        let in_flight = self.in_flight.clone();
        let refresh = refresh_once(
            self.transport.clone(),
            self.store.clone(),
            self.refresh_url.clone(),
            self.timeout,
        );

        let task = tokio::spawn(async move {
            let refreshed = refresh.await;

            let mut slot = in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
                *slot = None;
            }
            refreshed
        });

        async move {
            task.await.unwrap_or_else(|e| {
                tracing::warn!("Token refresh task failed: {}", e);
                false
            })
        }
        .boxed()
        .shared()
    }

    /// Like [`ensure_fresh_token`](Self::ensure_fresh_token), but skips the
    /// network when the store already moved past `stale_access`, i.e. another
    /// request refreshed while ours was in flight.
    pub async fn ensure_fresh_token_after(&self, stale_access: &str) -> bool {
        match self.store.get() {
            Some(current) if current.access_token != stale_access => {
                tracing::debug!("Token already rotated, skipping refresh");
                true
            }
            Some(_) => self.ensure_fresh_token().await,
            None => false,
        }
    }
}

async fn refresh_once(
    transport: Arc<dyn Transport>,
    store: Arc<TokenStore>,
    refresh_url: String,
    timeout: Duration,
) -> bool {
    let Some(current) = store.get() else {
        tracing::info!("No refresh token available");
        return false;
    };

    tracing::info!("Refreshing access token...");

    let request = HttpRequest {
        method: Method::POST,
        url: refresh_url,
        headers: Vec::new(),
        body: Some(serde_json::json!({ "refresh_token": current.refresh_token })),
    };

    let resp = match tokio::time::timeout(timeout, transport.execute(request)).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            tracing::warn!("Token refresh failed: {}", e);
            return false;
        }
        Err(_) => {
            tracing::warn!("Token refresh timed out after {:?}", timeout);
            return false;
        }
    };

    if !resp.is_success() {
        tracing::warn!("Token refresh rejected (HTTP {})", resp.status);
        return false;
    }

    let pair: CredentialPair = match serde_json::from_str::<TokenResponse>(&resp.body) {
        Ok(tokens) => tokens.into(),
        Err(e) => {
            tracing::warn!("Malformed refresh response: {}", e);
            return false;
        }
    };

    // The new pair is live in memory even if persisting it fails.
    if let Err(e) = store.set(pair) {
        tracing::warn!("Refreshed tokens not persisted: {:#}", e);
    }
    tracing::info!("Token refreshed");
    true
}
