//! Short-lived bearer tokens for the cloud-invoke backend.
//!
//! The cache coalesces concurrent refreshes: when the cached token is expired
//! and several requests need a fresh one at once, exactly one fetch runs and
//! every waiter shares its outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use lq_domain::error::{Error, Result};

/// Tokens within this margin of expiry are treated as already expired, so a
/// request never goes out with a token about to lapse mid-flight.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A fetched bearer token with its expiry.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub secret: String,
    pub expires_at: Instant,
}

/// Where fresh tokens come from (an HTTP exchange in production, a scripted
/// double in tests).
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<BearerToken>;
}

/// Time source, injectable so expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<BearerToken, Arc<Error>>>>;

struct State {
    cached: Option<BearerToken>,
    inflight: Option<SharedFetch>,
}

/// Coalescing token cache.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self::with_clock(source, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            state: Mutex::new(State {
                cached: None,
                inflight: None,
            }),
        }
    }

    /// Return a valid bearer secret, fetching a fresh token if needed.
    ///
    /// Concurrent callers that all find the cache stale join one in-flight
    /// fetch rather than each issuing their own.
    pub async fn token(&self) -> Result<String> {
        let fetch = {
            let mut state = self.state.lock();

            if let Some(cached) = &state.cached {
                if self.is_valid(cached) {
                    return Ok(cached.secret.clone());
                }
            }

            match &state.inflight {
                Some(fetch) => fetch.clone(),
                None => {
                    let source = Arc::clone(&self.source);
                    let fetch: SharedFetch = async move {
                        source.fetch().await.map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    state.inflight = Some(fetch.clone());
                    tracing::debug!("starting bearer token fetch");
                    fetch
                }
            }
        };

        let outcome = fetch.await;

        let mut state = self.state.lock();
        // Whichever waiter gets here first settles the cache; the rest see
        // `inflight` already cleared.
        if state.inflight.is_some() {
            state.inflight = None;
            if let Ok(token) = &outcome {
                state.cached = Some(token.clone());
            }
        }

        match outcome {
            Ok(token) => Ok(token.secret),
            Err(e) => Err(Error::Auth(format!("bearer token fetch failed: {e}"))),
        }
    }

    fn is_valid(&self, token: &BearerToken) -> bool {
        token.expires_at > self.clock.now() + REFRESH_MARGIN
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP token exchange
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exchanges a long-lived API key for a short-lived bearer token at the
/// provider's token endpoint.
pub struct HttpTokenSource {
    client: reqwest::Client,
    token_url: String,
    api_key: String,
}

impl HttpTokenSource {
    pub fn new(client: reqwest::Client, token_url: String, api_key: String) -> Self {
        Self {
            client,
            token_url,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> Result<BearerToken> {
        let resp = self
            .client
            .post(&self.token_url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| crate::util::from_reqwest("token-exchange", e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| crate::util::from_reqwest("token-exchange", e))?;
        if !status.is_success() {
            return Err(crate::util::status_error("token-exchange", status, &body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        let secret = parsed
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Auth("token endpoint returned no token field".into()))?
            .to_string();
        let expires_in = parsed
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(300);

        Ok(BearerToken {
            secret,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
