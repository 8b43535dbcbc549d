//! Per-key rate limiting and request logging middleware.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;

/// Direct (single-bucket) limiter.
pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One limiter per API key, built lazily with that key's quota.
///
/// Keys can carry their own requests-per-minute override; the registry keeps
/// a bucket per key id so one noisy caller cannot exhaust another's quota.
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<DirectLimiter>>>,
    window: Duration,
    default_quota: u32,
}

impl RateLimiterRegistry {
    pub fn new(window: Duration, default_quota: u32) -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
            window,
            default_quota,
        }
    }

    /// Check the caller's quota; `Err` carries the retry-after hint.
    pub fn check(&self, key_id: &str, override_rpm: Option<u32>) -> Result<(), u64> {
        let limiter = {
            let mut limiters = self.limiters.lock().unwrap();
            limiters
                .entry(key_id.to_string())
                .or_insert_with(|| Arc::new(self.build_limiter(override_rpm)))
                .clone()
        };

        limiter.check().map_err(|_| {
            // Round the window up to whole seconds for the Retry-After hint.
            self.window.as_secs().max(1)
        })
    }

    fn build_limiter(&self, override_rpm: Option<u32>) -> DirectLimiter {
        let quota = override_rpm.unwrap_or(self.default_quota).max(1);
        let burst = NonZeroU32::new(quota).unwrap_or(NonZeroU32::new(1).unwrap());
        // One cell replenishes every window/quota, with the full quota
        // available as burst: `quota` requests per window.
        let per_cell = self
            .window
            .checked_div(quota)
            .unwrap_or(Duration::from_millis(1))
            .max(Duration::from_millis(1));
        RateLimiter::direct(
            Quota::with_period(per_cell)
                .expect("non-zero period")
                .allow_burst(burst),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Enforce the authenticated caller's rate limit.
///
/// Runs after auth, so the key id and per-key quota are in extensions.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(context) = request.extensions().get::<AuthContext>() else {
        // Unauthenticated routes are not rate limited per key.
        return next.run(request).await;
    };

    match state
        .limiters()
        .check(&context.key_id, context.rate_limit_rpm)
    {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(
                key_id = %context.key_id,
                path = %request.uri().path(),
                retry_after,
                "rate limit exceeded"
            );
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

/// Structured request logging.
pub async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis();
    if status.is_server_error() {
        tracing::error!(%method, %path, status = %status.as_u16(), duration_ms, "request completed");
    } else if status.is_client_error() {
        tracing::warn!(%method, %path, status = %status.as_u16(), duration_ms, "request completed");
    } else {
        tracing::info!(%method, %path, status = %status.as_u16(), duration_ms, "request completed");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_enforced() {
        let registry = RateLimiterRegistry::new(Duration::from_secs(60), 3);

        for _ in 0..3 {
            assert!(registry.check("key-a", None).is_ok());
        }
        let retry_after = registry.check("key-a", None).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn test_keys_have_independent_buckets() {
        let registry = RateLimiterRegistry::new(Duration::from_secs(60), 1);
        assert!(registry.check("key-a", None).is_ok());
        assert!(registry.check("key-a", None).is_err());
        // A different key still has its own budget.
        assert!(registry.check("key-b", None).is_ok());
    }

    #[test]
    fn test_per_key_override() {
        let registry = RateLimiterRegistry::new(Duration::from_secs(60), 1);
        assert!(registry.check("generous", Some(5)).is_ok());
        assert!(registry.check("generous", Some(5)).is_ok());
        assert!(registry.check("stingy", None).is_ok());
        assert!(registry.check("stingy", None).is_err());
    }
}
