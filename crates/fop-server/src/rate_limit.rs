//! Per-client token-bucket rate limiting.
//!
//! Field devices retry aggressively after connectivity returns, so every
//! client IP gets its own bucket. Requests with no identifiable client are
//! let through.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ServerConfig;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            refilled_at: now,
        }
    }

    fn take(&mut self, rate: f64, capacity: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.refilled_at = now;
        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity: capacity.max(1.0),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.rate_limit_per_sec, config.rate_limit_burst)
    }

    /// Take one token for `ip`. Returns false when the bucket is empty.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert_with(|| Bucket::full(self.capacity, now))
            .take(self.rate, self.capacity, now)
    }

    /// Drop buckets untouched for longer than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.refilled_at) < max_idle);
        before - buckets.len()
    }

    /// Seconds until one token is available again, rounded up.
    fn retry_after_secs(&self) -> u64 {
        if self.rate <= 0.0 {
            return 60;
        }
        (1.0 / self.rate).ceil().max(1.0) as u64
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
            let retry_after = limiter.retry_after_secs().to_string();
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                axum::Json(serde_json::json!({ "error": "Too many requests" })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

/// The proxy headers win over the socket peer: in deployment the server
/// sits behind the airport network's reverse proxy.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_throttle() {
        let limiter = RateLimiter::new(1.0, 3.0);
        let ip: IpAddr = "10.20.0.7".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn test_buckets_are_per_client() {
        let limiter = RateLimiter::new(1.0, 1.0);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).await);
        assert!(!limiter.check(a).await);
        assert!(limiter.check(b).await);
    }

    #[tokio::test]
    async fn test_purge_drops_idle_buckets() {
        let limiter = RateLimiter::new(10.0, 5.0);
        limiter.check("192.168.1.1".parse().unwrap()).await;

        assert_eq!(limiter.purge_stale(Duration::from_secs(600)).await, 0);
        assert_eq!(limiter.purge_stale(Duration::ZERO).await, 1);
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn test_forwarded_header_preferred() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("203.0.113.9".parse().unwrap()));

        let bare = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&bare), None);
    }
}
