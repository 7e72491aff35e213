//! Fixed-window request limiter for the credential endpoints.
//!
//! Signup and the two login routes are the only endpoints worth brute
//! forcing, so the limiter guards `/auth/*` and `/api/admin/login` and
//! leaves the rest of the API alone. Counters live in process memory
//! (dashmap); a multi-instance deployment would move them to Redis, but
//! the storefront runs as a single binary.

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::errors::ServiceError;

/// Paths the limiter applies to. Everything else passes through untouched.
fn is_guarded(path: &str) -> bool {
    path.starts_with("/auth/") || path == "/api/admin/login"
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
    pub enable_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 10,
            window_duration: Duration::from_secs(60),
            enable_headers: true,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

impl WindowEntry {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Counts one request, resetting the window first if it has lapsed.
    fn record(&mut self, window: Duration) -> u32 {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
        self.count += 1;
        self.count
    }

    fn time_until_reset(&self, window: Duration) -> Duration {
        let elapsed = Instant::now().duration_since(self.window_start);
        window.saturating_sub(elapsed)
    }
}

#[derive(Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: Duration,
}

/// In-memory fixed-window limiter keyed by caller identity.
#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<DashMap<String, WindowEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records a request against `key` and says whether it fit the window.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(WindowEntry::new);
        let count = entry.record(self.config.window_duration);
        let retry_after = entry.time_until_reset(self.config.window_duration);
        let allowed = count <= self.config.requests_per_window;
        RateLimitDecision {
            allowed,
            limit: self.config.requests_per_window,
            remaining: self.config.requests_per_window.saturating_sub(count),
            retry_after,
        }
    }

    pub fn remaining_quota(&self, key: &str) -> u32 {
        match self.entries.get(key) {
            Some(entry) => {
                if Instant::now().duration_since(entry.window_start) >= self.config.window_duration
                {
                    self.config.requests_per_window
                } else {
                    self.config.requests_per_window.saturating_sub(entry.count)
                }
            }
            None => self.config.requests_per_window,
        }
    }

    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops entries whose window has lapsed. Called opportunistically,
    /// not on a timer.
    pub fn cleanup_expired(&self) {
        let window = self.config.window_duration;
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < window);
    }
}

/// Best-effort client key. Proxied deployments put the real address in
/// `x-forwarded-for`; without one the limiter degrades to a shared bucket.
fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(raw) = forwarded.to_str() {
            if let Some(ip) = raw.split(',').next() {
                return format!("ip:{}", ip.trim());
            }
        }
    }
    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return format!("ip:{}", ip);
        }
    }
    "ip:unknown".to_string()
}

fn num_header<T: ToString>(n: T) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", num_header(decision.limit));
    headers.insert("x-ratelimit-remaining", num_header(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        num_header(decision.retry_after.as_secs()),
    );
}

/// Middleware wired at the top of the router. Non-guarded paths skip the
/// counter entirely.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !is_guarded(&path) {
        return next.run(request).await;
    }

    let key = client_key(&request);
    let decision = limiter.check(&key);

    if !decision.allowed {
        warn!(key = %key, path = %path, "rate limit exceeded");
        let mut response = ServiceError::RateLimitExceeded.into_response();
        if limiter.config.enable_headers {
            apply_headers(&mut response, &decision);
            response.headers_mut().insert(
                "retry-after",
                num_header(decision.retry_after.as_secs().max(1)),
            );
        }
        return response;
    }

    let mut response = next.run(request).await;
    if limiter.config.enable_headers {
        apply_headers(&mut response, &decision);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::post, Router};
    use tower::ServiceExt;

    fn limiter(limit: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window_duration: window,
            enable_headers: true,
        })
    }

    #[test]
    fn allows_up_to_the_limit_then_denies() {
        let limiter = limiter(2, Duration::from_secs(60));

        assert!(limiter.check("ip:1.2.3.4").allowed);
        assert!(limiter.check("ip:1.2.3.4").allowed);
        let third = limiter.check("ip:1.2.3.4");
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn tracks_keys_independently() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert!(limiter.check("ip:a").allowed);
        assert!(limiter.check("ip:b").allowed);
        assert!(!limiter.check("ip:a").allowed);
        assert!(!limiter.check("ip:b").allowed);
    }

    #[tokio::test]
    async fn window_lapse_restores_quota() {
        let limiter = limiter(1, Duration::from_millis(20));

        assert!(limiter.check("ip:a").allowed);
        assert!(!limiter.check("ip:a").allowed);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("ip:a").allowed);
    }

    #[test]
    fn remaining_quota_reports_unseen_keys_at_full() {
        let limiter = limiter(5, Duration::from_secs(60));
        assert_eq!(limiter.remaining_quota("ip:a"), 5);

        limiter.check("ip:a");
        assert_eq!(limiter.remaining_quota("ip:a"), 4);
    }

    #[test]
    fn cleanup_drops_lapsed_entries() {
        let limiter = limiter(1, Duration::from_millis(1));
        limiter.check("ip:a");
        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup_expired();
        assert_eq!(limiter.entries.len(), 0);
    }

    #[test]
    fn guards_auth_and_admin_login_only() {
        assert!(is_guarded("/auth/login"));
        assert!(is_guarded("/auth/signup"));
        assert!(is_guarded("/api/admin/login"));
        assert!(!is_guarded("/api/product"));
        assert!(!is_guarded("/api/admin/logout"));
        assert!(!is_guarded("/health"));
    }

    fn guarded_app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/auth/login", post(|| async { "ok" }))
            .route("/api/product", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ))
    }

    fn request(path: &str, ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn middleware_denies_with_429_and_headers() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(60)));
        let app = guarded_app(limiter);

        let ok = app
            .clone()
            .oneshot(request("/auth/login", "9.9.9.9"))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["x-ratelimit-limit"], "1");

        let denied = app
            .clone()
            .oneshot(request("/auth/login", "9.9.9.9"))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.headers()["x-ratelimit-remaining"], "0");
        assert!(denied.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn middleware_ignores_unguarded_paths() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(60)));
        let app = guarded_app(limiter);

        for _ in 0..3 {
            let res = app
                .clone()
                .oneshot(request("/api/product", "9.9.9.9"))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(!res.headers().contains_key("x-ratelimit-limit"));
        }
    }
}
