//! Access token management
//!
//! Every API call needs an `access_token` obtained from `/cgi-bin/token`.
//! Tokens live for `expires_in` seconds (7200 in practice) and the issuer
//! rate-limits how often they may be fetched, so one token is cached per
//! application and refreshed shortly before it expires.
//!
//! [`DefaultAccessToken`] holds its single credential behind an async
//! `RwLock` and performs the whole check-then-refresh sequence under the
//! write side. Concurrent callers therefore serialize, but at most one
//! issuer request is ever in flight per cache and nobody can observe a
//! half-replaced credential.
//!
//! Each finished issuer request bumps a generation counter. A caller that
//! queued behind a request which failed gets that request's error instead
//! of starting another one; only callers arriving afterwards try again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{ApiError, ApiResult, WechatError, codes};
use crate::transport::HttpTransport;
use crate::types::{ApiStatus, DEFAULT_API_BASE, TOKEN_PATH, api_url};

/// Seconds subtracted from `expires_in` so a token is never used right at
/// the edge of its lifetime on the platform side
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 200;

// =============================================================================
// Credential
// =============================================================================

/// Access token as issued by the platform, stamped with its receipt time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
    /// Unix seconds at which the issuer response was received
    pub created_at: i64,
}

impl AccessToken {
    /// First instant (unix seconds) at which the token counts as stale
    ///
    /// `expires_in` comes straight from the issuer, so the sum saturates
    /// rather than overflowing on an absurd value.
    pub fn refresh_at(&self) -> i64 {
        self.created_at
            .saturating_add(self.expires_in)
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        now < self.refresh_at()
    }
}

/// Issuer response body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock source in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

// =============================================================================
// Token Handle
// =============================================================================

/// Anything able to hand out a currently valid access token
///
/// Implement this to share tokens across processes (Redis, a central token
/// service, ...) or to add retry policies; [`DefaultAccessToken`] is the
/// in-memory implementation.
#[async_trait]
pub trait AccessTokenHandle: Send + Sync {
    async fn access_token(&self) -> ApiResult<String>;
}

/// In-memory token cache for one `(app_id, app_secret)` pair
pub struct DefaultAccessToken<T: ?Sized, C = SystemClock> {
    app_id: String,
    app_secret: String,
    api_base: String,
    transport: Arc<T>,
    clock: C,
    state: RwLock<TokenState>,
    /// Number of finished issuer requests, readable without the lock
    generation: AtomicU64,
}

#[derive(Default)]
struct TokenState {
    token: Option<AccessToken>,
    /// Error of the most recent issuer request, cleared on success
    last_failure: Option<ApiError>,
}

impl<T: HttpTransport + ?Sized> DefaultAccessToken<T, SystemClock> {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>, transport: Arc<T>) -> Self {
        Self::with_clock(app_id, app_secret, transport, SystemClock)
    }
}

impl<T: HttpTransport + ?Sized, C: Clock> DefaultAccessToken<T, C> {
    pub fn with_clock(
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        transport: Arc<T>,
        clock: C,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            transport,
            clock,
            state: RwLock::new(TokenState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Point the issuer request at another host (proxies, tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Get a valid access token, refreshing it if absent or stale
    pub async fn get_access_token(&self) -> ApiResult<String> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut state = self.state.write().await;
        let now = self.clock.now();

        if let Some(ref token) = state.token
            && token.is_valid_at(now)
        {
            debug!("Using cached access token for {}", self.app_id);
            return Ok(token.access_token.clone());
        }

        // A request finished while we waited for the lock and it failed
        if self.generation.load(Ordering::Acquire) != observed
            && let Some(ref err) = state.last_failure
        {
            debug!("Sharing failed token refresh for {}", self.app_id);
            return Err(err.clone());
        }

        self.refresh_locked(&mut state).await
    }

    /// Force a refresh even if the cached token still looks valid
    ///
    /// Use after the platform rejects a token with `40001`/`42001`. On
    /// failure the previous credential stays cached.
    pub async fn refresh(&self) -> ApiResult<String> {
        let mut state = self.state.write().await;
        self.refresh_locked(&mut state).await
    }

    /// Snapshot of the cached credential
    pub async fn cached(&self) -> Option<AccessToken> {
        self.state.read().await.token.clone()
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> ApiResult<String> {
        let result = self.fetch().await;
        self.generation.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(fresh) => {
                let access_token = fresh.access_token.clone();
                state.token = Some(fresh);
                state.last_failure = None;
                Ok(access_token)
            }
            Err(err) => {
                state.last_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> ApiResult<AccessToken> {
        debug!("Refreshing access token for {}", self.app_id);
        fetch_access_token(
            self.transport.as_ref(),
            &self.api_base,
            &self.app_id,
            &self.app_secret,
            &self.clock,
        )
        .await
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized, C: Clock> AccessTokenHandle for DefaultAccessToken<T, C> {
    async fn access_token(&self) -> ApiResult<String> {
        self.get_access_token().await
    }
}

/// Request a fresh token from the issuer without touching any cache
pub async fn fetch_access_token<T, C>(
    transport: &T,
    api_base: &str,
    app_id: &str,
    app_secret: &str,
    clock: &C,
) -> ApiResult<AccessToken>
where
    T: HttpTransport + ?Sized,
    C: Clock + ?Sized,
{
    let url = api_url(
        api_base,
        TOKEN_PATH,
        &[
            ("grant_type", "client_credential"),
            ("appid", app_id),
            ("secret", app_secret),
        ],
    )?;

    let body = transport.get(&url).await?;
    let created_at = clock.now();

    let token_resp: TokenResponse = serde_json::from_slice(&body)?;

    if token_resp.status.errcode != codes::OK {
        error!(
            "WeChat token error for {}: {} - {}",
            app_id, token_resp.status.errcode, token_resp.status.errmsg
        );
        return Err(WechatError::new(token_resp.status.errcode, token_resp.status.errmsg).into());
    }

    let (Some(access_token), Some(expires_in)) = (token_resp.access_token, token_resp.expires_in)
    else {
        error!("WeChat token response for {} is missing fields", app_id);
        return Err(ApiError::Remote(WechatError::new(
            codes::SYSTEM_BUSY,
            "token response missing access_token or expires_in",
        )));
    };

    info!(
        "Refreshed access token for {} (expires in {}s)",
        app_id, expires_in
    );

    Ok(AccessToken {
        access_token,
        expires_in,
        created_at,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::MockTransport;

    /// Clock the test moves by hand
    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn at(now: i64) -> Self {
            Self(Arc::new(AtomicI64::new(now)))
        }

        fn set(&self, now: i64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn token_body(token: &str, expires_in: i64) -> String {
        format!(r#"{{"access_token":"{token}","expires_in":{expires_in}}}"#)
    }

    fn new_cache(
        mock: &MockTransport,
        clock: &ManualClock,
    ) -> DefaultAccessToken<MockTransport, ManualClock> {
        DefaultAccessToken::with_clock("wx123", "secret", Arc::new(mock.clone()), clock.clone())
            .with_api_base("https://mock.weixin")
    }

    #[test]
    fn test_token_validity_window() {
        let token = AccessToken {
            access_token: "t".to_string(),
            expires_in: 7200,
            created_at: 0,
        };
        assert_eq!(token.refresh_at(), 7000);
        assert!(token.is_valid_at(0));
        assert!(token.is_valid_at(6999));
        assert!(!token.is_valid_at(7000));
        assert!(!token.is_valid_at(9000));
    }

    #[test]
    fn test_huge_expires_in_saturates() {
        let token = AccessToken {
            access_token: "t".to_string(),
            expires_in: i64::MAX,
            created_at: 1_700_000_000,
        };
        assert_eq!(token.refresh_at(), i64::MAX - TOKEN_EXPIRY_MARGIN_SECS);
        assert!(token.is_valid_at(1_700_000_000));

        let token = AccessToken {
            expires_in: i64::MIN,
            ..token
        };
        assert!(!token.is_valid_at(1_700_000_000));
    }

    #[tokio::test]
    async fn test_huge_expires_in_is_cached() {
        let mock = MockTransport::new();
        mock.push_body(&token_body("long", i64::MAX));
        let clock = ManualClock::at(1_700_000_000);
        let cache = new_cache(&mock, &clock);

        assert_eq!(cache.get_access_token().await.unwrap(), "long");
        assert_eq!(cache.get_access_token().await.unwrap(), "long");
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_short_lived_token_is_immediately_stale() {
        let token = AccessToken {
            access_token: "t".to_string(),
            expires_in: 150,
            created_at: 1_000,
        };
        assert!(!token.is_valid_at(1_000));
    }

    #[tokio::test]
    async fn test_fetch_builds_issuer_url() {
        let mock = MockTransport::new();
        mock.push_body(&token_body("ACCESS", 7200));
        let clock = ManualClock::at(42);

        let token = fetch_access_token(&mock, "https://mock.weixin", "wxA", "sB", &clock)
            .await
            .unwrap();

        assert_eq!(token.access_token, "ACCESS");
        assert_eq!(token.expires_in, 7200);
        assert_eq!(token.created_at, 42);
        assert_eq!(
            mock.requests()[0].0,
            "https://mock.weixin/cgi-bin/token?grant_type=client_credential&appid=wxA&secret=sB"
        );
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let mock = MockTransport::new();
        mock.push_body(&token_body("first", 7200))
            .push_body(&token_body("second", 7200));
        let clock = ManualClock::at(0);
        let cache = new_cache(&mock, &clock);

        assert_eq!(cache.get_access_token().await.unwrap(), "first");
        assert_eq!(mock.calls(), 1);

        clock.set(6999);
        assert_eq!(cache.get_access_token().await.unwrap(), "first");
        assert_eq!(mock.calls(), 1);

        clock.set(7000);
        assert_eq!(cache.get_access_token().await.unwrap(), "second");
        assert_eq!(mock.calls(), 2);
        assert_eq!(cache.cached().await.unwrap().created_at, 7000);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mock = MockTransport::new().with_delay(Duration::from_millis(50));
        mock.push_body(&token_body("shared", 7200));
        let clock = ManualClock::at(1_000);
        let cache = Arc::new(new_cache(&mock, &clock));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_access_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_see_same_error() {
        let mock = MockTransport::always(r#"{"errcode":40125,"errmsg":"invalid appsecret"}"#)
            .with_delay(Duration::from_millis(20));
        let clock = ManualClock::at(0);
        let cache = Arc::new(new_cache(&mock, &clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_access_token().await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.remote().map(|e| e.errcode), Some(40125));
        }
        assert_eq!(mock.calls(), 1);
        assert!(cache.cached().await.is_none());

        // Callers arriving after the failure try again
        assert!(cache.get_access_token().await.is_err());
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_failure_succeeds() {
        let mock = MockTransport::new();
        mock.push_status(502).push_body(&token_body("second", 7200));
        let clock = ManualClock::at(0);
        let cache = new_cache(&mock, &clock);

        assert!(cache.get_access_token().await.is_err());
        assert_eq!(cache.get_access_token().await.unwrap(), "second");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_remote_rejection_carries_code_and_message() {
        let mock = MockTransport::new();
        mock.push_body(r#"{"errcode":40013,"errmsg":"invalid appid"}"#);
        let clock = ManualClock::at(0);
        let cache = new_cache(&mock, &clock);

        let err = cache.get_access_token().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("40013"));
        assert!(msg.contains("invalid appid"));
        assert!(!msg.contains("secret"));
        assert!(cache.cached().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_token() {
        let mock = MockTransport::new();
        mock.push_body(&token_body("first", 7200)).push_status(502);
        let clock = ManualClock::at(0);
        let cache = new_cache(&mock, &clock);

        cache.get_access_token().await.unwrap();
        let before = cache.cached().await;

        clock.set(7000);
        let err = cache.get_access_token().await.unwrap_err();
        assert!(matches!(
            err.transport(),
            Some(TransportError::Status { status: 502, .. })
        ));
        assert_eq!(cache.cached().await, before);
    }

    #[tokio::test]
    async fn test_forced_refresh_failure_keeps_valid_token() {
        let mock = MockTransport::new();
        mock.push_body(&token_body("first", 7200))
            .push_body(r#"{"errcode":-1,"errmsg":"system error"}"#)
            .push_body(&token_body("second", 7200));
        let clock = ManualClock::at(0);
        let cache = new_cache(&mock, &clock);

        cache.get_access_token().await.unwrap();
        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.get_access_token().await.unwrap(), "first");

        assert_eq!(cache.refresh().await.unwrap(), "second");
        assert_eq!(cache.get_access_token().await.unwrap(), "second");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mock = MockTransport::new();
        mock.push_body("<html>gateway</html>");
        let clock = ManualClock::at(0);
        let cache = new_cache(&mock, &clock);

        let err = cache.get_access_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let mock = MockTransport::new();
        mock.push_body(&token_body("dyn", 7200));
        let clock = ManualClock::at(0);
        let handle: Arc<dyn AccessTokenHandle> = Arc::new(new_cache(&mock, &clock));

        assert_eq!(handle.access_token().await.unwrap(), "dyn");
    }
}
