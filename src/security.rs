use crate::errors::AppError;
use axum::http::HeaderMap;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Keyed state is pruned of idle entries once it grows past this.
const PRUNE_AT: usize = 1024;

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Rate-limit identity of a request. A bearer token only identifies a
/// caller when the server checks it; otherwise every caller is anonymous.
pub fn rate_key(headers: &HeaderMap, expected: Option<&str>) -> Option<String> {
    expected.and_then(|_| extract_bearer(headers))
}

pub fn require_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let token = extract_bearer(headers).ok_or(AppError::Unauthorized)?;
    if token != expected {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// An empty allow-list admits every caller.
pub fn check_origin(headers: &HeaderMap, allowed: &[String]) -> Result<(), AppError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let origin = headers
        .get("Origin")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::OriginDenied)?;
    if allowed.iter().any(|o| o == origin) {
        Ok(())
    } else {
        Err(AppError::OriginDenied)
    }
}

pub fn content_length_ok(headers: &HeaderMap, max_kb: usize) -> Result<(), AppError> {
    if let Some(len) = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if len > max_kb * 1024 {
            return Err(AppError::RequestTooLarge);
        }
    }
    Ok(())
}

/// Per-token and process-wide request budgets.
#[derive(Clone)]
pub struct RateLimiters {
    per_token: Arc<DefaultKeyedRateLimiter<String>>,
    global: Arc<DefaultDirectRateLimiter>,
}

impl RateLimiters {
    pub fn new(token_rps: u32, token_burst: u32, global_rps: u32, global_burst: u32) -> Self {
        Self {
            per_token: Arc::new(RateLimiter::keyed(quota(token_rps, token_burst))),
            global: Arc::new(RateLimiter::direct(quota(global_rps, global_burst))),
        }
    }

    /// Anonymous callers share one bucket.
    pub fn check(&self, token: Option<&str>) -> Result<(), AppError> {
        self.global.check().map_err(|_| AppError::RateLimited)?;
        let key = token.unwrap_or("").to_string();
        let admitted = self.per_token.check_key(&key).map_err(|_| AppError::RateLimited);
        if self.per_token.len() > PRUNE_AT {
            self.per_token.retain_recent();
            self.per_token.shrink_to_fit();
        }
        admitted
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.per_token.len()
    }
}

fn quota(rps: u32, burst: u32) -> Quota {
    let rps = NonZeroU32::new(rps).unwrap_or(nonzero!(1u32));
    let burst = NonZeroU32::new(burst).unwrap_or(rps);
    Quota::per_second(rps).allow_burst(burst)
}
