//! Fixed-window request limits keyed by client address.
//!
//! Two classes with separate counters: `Auth` guards register/login,
//! `General` covers every other API route and WebSocket upgrades.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::{debug, warn};

use parley_types::api::ErrorBody;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    Auth,
    General,
}

#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub max_requests: u32,
    pub window: Duration,
}

impl Quota {
    pub const AUTH: Quota = Quota {
        max_requests: 5,
        window: Duration::from_secs(15 * 60),
    };
    pub const GENERAL: Quota = Quota {
        max_requests: 100,
        window: Duration::from_secs(60),
    };
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    auth: Quota,
    general: Quota,
    windows: DashMap<(LimitClass, IpAddr), Window>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Quota::AUTH, Quota::GENERAL)
    }
}

impl RateLimiter {
    pub fn new(auth: Quota, general: Quota) -> Self {
        Self {
            auth,
            general,
            windows: DashMap::new(),
        }
    }

    fn quota(&self, class: LimitClass) -> Quota {
        match class {
            LimitClass::Auth => self.auth,
            LimitClass::General => self.general,
        }
    }

    /// Count one request. `Err` carries the time until the window resets.
    pub fn check(&self, class: LimitClass, ip: IpAddr) -> Result<(), Duration> {
        self.check_at(class, ip, Instant::now())
    }

    pub fn check_at(&self, class: LimitClass, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        let quota = self.quota(class);
        let mut window = self.windows.entry((class, ip)).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= quota.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= quota.max_requests {
            return Err(quota.window.saturating_sub(elapsed));
        }
        window.count += 1;
        Ok(())
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|(class, _), window| {
            now.saturating_duration_since(window.started) < self.quota(*class).window
        });
        before - self.windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// Periodically forget expired windows.
pub async fn run_sweep_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let removed = state.limiter.sweep();
        if removed > 0 {
            debug!("Rate limiter swept {} expired windows", removed);
        }
    }
}

pub async fn limit_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(&state, LimitClass::Auth, req, next).await
}

pub async fn limit_general(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(&state, LimitClass::General, req, next).await
}

async fn enforce(state: &AppState, class: LimitClass, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(req.headers(), peer, state.trust_proxy);

    match state.limiter.check(class, ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!("Rate limited {} on {:?} ({})", ip, class, req.uri().path());
            too_many_requests(retry_after)
        }
    }
}

/// First `X-Forwarded-For` hop when behind a trusted proxy, else the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn too_many_requests(retry_after: Duration) -> Response {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            error: "Too many requests, try again later".to_string(),
        }),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    response
}
