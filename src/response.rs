use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Body of a 429 answer.
#[derive(Debug, Serialize)]
pub struct RateLimitExceeded {
    pub error: String,
    pub retry_after: String,
}

impl RateLimitExceeded {
    pub fn new(retry_after_secs: i64) -> Self {
        Self {
            error: "rate limit exceeded".to_string(),
            retry_after: format!("{} secs", retry_after_secs),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub store_connected: bool,
}

impl ReadinessResponse {
    pub fn ready(store_connected: bool) -> Self {
        Self::with_status(if store_connected { "ready" } else { "not_ready" }, store_connected)
    }

    fn with_status(status: &str, store_connected: bool) -> Self {
        Self {
            status: status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_exceeded_body() {
        let json = serde_json::to_value(RateLimitExceeded::new(17)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"error": "rate limit exceeded", "retry_after": "17 secs"})
        );
    }

    #[test]
    fn test_readiness_status() {
        assert_eq!(ReadinessResponse::ready(true).status, "ready");
        assert_eq!(ReadinessResponse::ready(false).status, "not_ready");
    }
}
