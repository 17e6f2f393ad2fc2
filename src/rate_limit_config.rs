use crate::error::RateLimitError;
use crate::key_generator::IdentityOption;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest window a route may use; longer windows are clamped, not rejected.
pub const MAX_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Per-route policy as written by the operator. Turn it into a
/// [`RateLimitPolicy`] with [`RateLimitConfig::validate`] before serving traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(default = "default_identity_options")]
    pub identity_options: Vec<IdentityOption>,
}

fn default_identity_options() -> Vec<IdentityOption> {
    vec![IdentityOption::ClientIp]
}

impl RateLimitConfig {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            identity_options: default_identity_options(),
        }
    }

    pub fn with_identity_options(mut self, options: Vec<IdentityOption>) -> Self {
        self.identity_options = options;
        self
    }

    pub fn validate(&self) -> Result<RateLimitPolicy, RateLimitError> {
        if self.limit == 0 {
            return Err(RateLimitError::ConfigInvalid("limit must be positive".into()));
        }
        let limit = i64::try_from(self.limit).map_err(|_| {
            RateLimitError::ConfigInvalid(format!("limit {} is too large", self.limit))
        })?;

        // Store expiry has whole-second granularity.
        if self.window.as_secs() == 0 {
            return Err(RateLimitError::ConfigInvalid(
                "window must be at least one second".into(),
            ));
        }
        if self.identity_options.is_empty() {
            return Err(RateLimitError::ConfigInvalid(
                "at least one identity option required".into(),
            ));
        }

        let window = if self.window > MAX_WINDOW {
            tracing::debug!(
                requested = ?self.window,
                max = ?MAX_WINDOW,
                "clamping rate limit window"
            );
            MAX_WINDOW
        } else {
            self.window
        };

        let mut identity_options = Vec::with_capacity(self.identity_options.len());
        for option in &self.identity_options {
            match option {
                IdentityOption::Unsupported(name) => {
                    tracing::warn!(option = %name, "unsupported identity option, skipping");
                }
                supported if !identity_options.contains(supported) => {
                    identity_options.push(supported.clone())
                }
                _ => {}
            }
        }

        Ok(RateLimitPolicy {
            limit,
            window,
            identity_options,
        })
    }
}

/// A validated, immutable route policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    limit: i64,
    window: Duration,
    identity_options: Vec<IdentityOption>,
}

impl RateLimitPolicy {
    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_secs(&self) -> i64 {
        self.window.as_secs() as i64
    }

    /// Supported options only, in configured order. May be empty when every
    /// configured option was unsupported; key derivation then uses the client IP.
    pub fn identity_options(&self) -> &[IdentityOption] {
        &self.identity_options
    }
}

/// Policies for every throttled route, built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePolicies {
    pub calculate: RateLimitConfig,
    pub categories: RateLimitConfig,
    pub category_products: RateLimitConfig,
    pub product: RateLimitConfig,
    pub ping: RateLimitConfig,
}

impl Default for RoutePolicies {
    fn default() -> Self {
        Self {
            calculate: RateLimitConfig::new(100, Duration::from_secs(5 * 60)),
            categories: RateLimitConfig::new(50, Duration::from_secs(60)),
            category_products: RateLimitConfig::new(20, Duration::from_secs(60)),
            product: RateLimitConfig::new(50, Duration::from_secs(60)),
            ping: RateLimitConfig::new(8, Duration::from_secs(20)),
        }
    }
}

impl RoutePolicies {
    pub fn from_json(raw: &str) -> Result<Self, RateLimitError> {
        serde_json::from_str(raw)
            .map_err(|e| RateLimitError::ConfigInvalid(format!("malformed route policies: {}", e)))
    }
}
