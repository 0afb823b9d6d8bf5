// src/api/rate_limit.rs
//! Per-client token buckets and the axum middleware that applies them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde_json::json;
use sha2::{Digest, Sha256};

pub const API_KEY_HEADER: &str = "x-api-key";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    #[default]
    ApiKeyOrIp,
    ApiKey,
    Ip,
}

impl FromStr for KeyStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api_key_or_ip" => Ok(KeyStrategy::ApiKeyOrIp),
            "api_key" => Ok(KeyStrategy::ApiKey),
            "ip" => Ok(KeyStrategy::Ip),
            other => Err(anyhow::anyhow!(
                "unknown rate limit key strategy {other:?} (expected api_key_or_ip, api_key or ip)"
            )),
        }
    }
}

impl KeyStrategy {
    /// Raw client identity for this request, before hashing. `api_key` falls
    /// back to the address when no key is sent, same as `api_key_or_ip`.
    pub fn client_key(self, api_key: Option<&str>, ip: &str) -> String {
        match (self, api_key.filter(|k| !k.is_empty())) {
            (KeyStrategy::Ip, _) | (_, None) => format!("ip:{ip}"),
            (_, Some(k)) => format!("key:{k}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Admitted { remaining: u32 },
    Rejected { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

struct Buckets {
    map: HashMap<[u8; 32], Bucket>,
    last_sweep: Instant,
}

pub struct RateLimiter {
    per_minute: u32,
    capacity: f64,
    refill_per_sec: f64,
    strategy: KeyStrategy,
    idle_ttl: Duration,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32, strategy: KeyStrategy, idle_ttl: Duration) -> Self {
        Self {
            per_minute,
            capacity: f64::from(burst.max(1)),
            refill_per_sec: f64::from(per_minute) / 60.0,
            strategy,
            idle_ttl,
            buckets: Mutex::new(Buckets {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    fn hash_key(key: &str) -> [u8; 32] {
        Sha256::digest(key.as_bytes()).into()
    }

    /// Take one token for `key` at `now`.
    pub fn check(&self, key: &str, now: Instant) -> Decision {
        let id = Self::hash_key(key);
        let mut guard = match self.buckets.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if now.saturating_duration_since(guard.last_sweep) >= SWEEP_INTERVAL {
            Self::sweep_locked(&mut guard, now, self.idle_ttl);
        }

        let capacity = self.capacity;
        let bucket = guard.map.entry(id).or_insert(Bucket {
            tokens: capacity,
            last: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(capacity);
        bucket.last = now;

        if bucket.tokens < 1.0 {
            let retry_after_secs = if self.refill_per_sec > 0.0 {
                ((1.0 - bucket.tokens) / self.refill_per_sec).ceil().max(1.0) as u64
            } else {
                u64::MAX
            };
            return Decision::Rejected { retry_after_secs };
        }
        bucket.tokens -= 1.0;
        Decision::Admitted {
            remaining: bucket.tokens.floor() as u32,
        }
    }

    fn sweep_locked(b: &mut Buckets, now: Instant, ttl: Duration) -> usize {
        let before = b.map.len();
        b.map
            .retain(|_, bucket| now.saturating_duration_since(bucket.last) <= ttl);
        b.last_sweep = now;
        before - b.map.len()
    }

    /// Drop buckets idle longer than the TTL. Returns how many were removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let mut guard = match self.buckets.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::sweep_locked(&mut guard, now, self.idle_ttl)
    }

    pub fn tracked_keys(&self) -> usize {
        match self.buckets.lock() {
            Ok(g) => g.map.len(),
            Err(poisoned) => poisoned.into_inner().map.len(),
        }
    }

    /// Periodic sweep on a background task.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut every = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                every.tick().await;
                let removed = self.sweep_idle(Instant::now());
                if removed > 0 {
                    tracing::debug!(target: "rate_limit", removed, "idle buckets evicted");
                }
            }
        })
    }
}

/// Address the request came from: socket peer when known, else "unknown".
pub fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, v);
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let ip = client_ip(&req);
    let key = limiter.strategy.client_key(api_key(req.headers()), &ip);

    match limiter.check(&key, Instant::now()) {
        Decision::Admitted { remaining } => {
            let mut rsp = next.run(req).await;
            let h = rsp.headers_mut();
            set_header(h, "x-ratelimit-limit", limiter.per_minute);
            set_header(h, "x-ratelimit-remaining", remaining);
            set_header(h, "x-ratelimit-reset", 0);
            rsp
        }
        Decision::Rejected { retry_after_secs } => {
            counter!("api_rate_limited_total").increment(1);
            tracing::info!(target: "rate_limit", %ip, path = %req.uri().path(), retry_after_secs, "rate limited");
            let mut rsp = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"detail": "Rate limit exceeded"})),
            )
                .into_response();
            let h = rsp.headers_mut();
            set_header(h, "x-ratelimit-limit", limiter.per_minute);
            set_header(h, "x-ratelimit-remaining", 0);
            set_header(h, "x-ratelimit-reset", retry_after_secs);
            rsp
        }
    }
}
