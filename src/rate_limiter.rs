//! Fixed-window rate limiting against a shared counter store.
//!
//! Counter state lives only in the store. Every request goes through one
//! atomic script run, so concurrent callers need no in-process locking and
//! can never both pass a check that only one of them should have passed.
//!
//! The window is fixed, not sliding: it starts with the first request and is
//! never extended. A client bursting at the end of one window and the start
//! of the next can get up to twice the limit through in a short span.

use crate::cache::{CacheClient, Value};
use crate::error::RateLimitError;
use crate::key_generator::{KeyGenerator, RateLimitKey};
use crate::middleware::RouteGuard;
use crate::rate_limit_config::{RateLimitConfig, RateLimitPolicy};
use std::sync::Arc;

/// KEYS[1] = counter key, ARGV[1] = limit, ARGV[2] = window seconds.
/// Replies `{count, ttl_seconds, allowed}` with `allowed` 0 or 1.
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local current = tonumber(redis.call('GET', key) or '0')
local allowed = 0

if current < limit then
    current = redis.call('INCR', key)
    if current == 1 then
        redis.call('EXPIRE', key, window)
    end
    allowed = 1
end

local ttl = redis.call('TTL', key)
if ttl == -1 then
    redis.call('EXPIRE', key, window)
    ttl = window
end

return {current, ttl, allowed}
"#;

/// Typed reply of [`FIXED_WINDOW_SCRIPT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: i64,
    pub ttl_seconds: i64,
    pub allowed: bool,
}

impl TryFrom<Value> for WindowCount {
    type Error = RateLimitError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let items = match value {
            Value::Bulk(items) => items,
            other => {
                return Err(RateLimitError::ProtocolDecode(format!(
                    "expected an array, got {:?}",
                    other
                )))
            }
        };

        match items.as_slice() {
            [Value::Int(count), Value::Int(ttl_seconds), Value::Int(flag)] => {
                let allowed = match flag {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(RateLimitError::ProtocolDecode(format!(
                            "allowed flag must be 0 or 1, got {}",
                            other
                        )))
                    }
                };
                Ok(WindowCount {
                    count: *count,
                    ttl_seconds: *ttl_seconds,
                    allowed,
                })
            }
            other => Err(RateLimitError::ProtocolDecode(format!(
                "expected three integers, got {:?}",
                other
            ))),
        }
    }
}

/// Outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: i64,
    pub current_count: i64,
    pub remaining: i64,
    /// Seconds until the window ends; never negative.
    pub reset_seconds: i64,
}

impl Decision {
    pub fn from_window(limit: i64, window: WindowCount) -> Self {
        Self {
            allowed: window.allowed,
            limit,
            current_count: window.count,
            remaining: limit.saturating_sub(window.count).max(0),
            reset_seconds: window.ttl_seconds.max(0),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CacheClient>,
    keys: KeyGenerator,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheClient>, keys: KeyGenerator) -> Self {
        Self { store, keys }
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Validates `config` and returns the guard for one route. Call this while
    /// building the router so a bad policy stops startup.
    pub fn limit_route(&self, config: &RateLimitConfig) -> Result<RouteGuard, RateLimitError> {
        let policy = config.validate()?;
        tracing::debug!(
            limit = policy.limit(),
            window_secs = policy.window_secs(),
            "registered rate limited route"
        );
        Ok(RouteGuard::new(self.clone(), policy))
    }

    /// Counts one request against `key`. Store and decode failures are
    /// returned as errors; they never turn into a decision.
    pub async fn check(
        &self,
        policy: &RateLimitPolicy,
        key: &RateLimitKey,
    ) -> Result<Decision, RateLimitError> {
        let args = [policy.limit().to_string(), policy.window_secs().to_string()];
        let reply = self
            .store
            .eval(FIXED_WINDOW_SCRIPT, &[key.as_str()], &args)
            .await?;
        let window = WindowCount::try_from(reply)?;

        Ok(Decision::from_window(policy.limit(), window))
    }
}
