//! Fixed-window request throttling keyed by client address.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::AnalysisError;
use crate::AppState;

/// Key shared by every request whose peer address is not known.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

pub struct RateLimiter {
    max_requests: u64,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: Duration::from_secs(cfg.window_secs),
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count < self.max_requests {
            entry.count += 1;
            return Decision::Allowed;
        }
        let remaining = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started));
        // Round up so clients never retry inside the closed window.
        let mut retry_after_secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            retry_after_secs += 1;
        }
        Decision::Limited {
            retry_after_secs: retry_after_secs.max(1),
        }
    }

    /// Drop windows that have fully elapsed.
    pub fn purge_expired(&self, now: Instant) {
        let window = self.window;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

pub fn client_key(connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Middleware applied to `/analisar`.
pub async fn throttle(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(request.extensions().get::<ConnectInfo<SocketAddr>>());
    match state.limiter.check(&key) {
        Decision::Allowed => next.run(request).await,
        Decision::Limited { retry_after_secs } => {
            tracing::warn!(client = %key, retry_after_secs, "rate limit exceeded");
            let err = AnalysisError::TooManyRequests { retry_after_secs };
            state.metrics.observe_outcome(err.classify().1);
            err.into_response_with(state.config.production)
        }
    }
}
