/// Per-client rate limiting for credential endpoints
use crate::{
    config::RateLimitConfig,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, DefaultKeyedRateLimiter, Quota};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

const DEFAULT_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(30) {
    Some(n) => n,
    None => unreachable!(),
};

/// Checks between sweeps of idle client entries
const PRUNE_EVERY: u64 = 1024;

/// Keyed by client IP; disabled limiters admit everything
pub struct RateLimiter {
    limiter: Option<DefaultKeyedRateLimiter<IpAddr>>,
    trust_proxy_headers: bool,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = config.enabled.then(|| {
            let per_minute = NonZeroU32::new(config.credential_requests_per_minute)
                .unwrap_or(DEFAULT_PER_MINUTE);
            governor::RateLimiter::keyed(Quota::per_minute(per_minute))
        });

        Self {
            limiter,
            trust_proxy_headers: config.trust_proxy_headers,
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, client: IpAddr) -> ApiResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }

        limiter.check_key(&client).map_err(|not_until| {
            use governor::clock::Clock;
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            tracing::warn!("Rate limit exceeded for {}", client);
            ApiError::RateLimitExceeded {
                retry_after: wait.max(Duration::from_secs(1)),
            }
        })
    }

    /// Address a request is counted against. Forwarding headers only count
    /// when the deployment says a proxy sets them.
    pub fn client_for(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
        self.trust_proxy_headers
            .then(|| forwarded_ip(headers))
            .flatten()
            .or_else(|| peer.map(|addr| addr.ip()))
            .unwrap_or(IpAddr::from([0, 0, 0, 0]))
    }

    /// Clients currently holding limiter state
    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.len())
    }
}

/// Client address from `x-forwarded-for`, then `x-real-ip`
pub fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .and_then(|v| v.trim().parse().ok())
}

/// Rate limiting middleware for credential routes
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = ctx.rate_limiter.client_for(request.headers(), peer);

    ctx.rate_limiter.check(client)?;

    Ok(next.run(request).await)
}
