pub mod cache;
pub mod config;
pub mod error;
pub mod fakestore;
pub mod financial;
pub mod handlers;
pub mod health;
pub mod httpclient;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis;
pub mod response;
pub mod server;

pub use config::Config;
pub use error::{ApiError, RateLimitError, Result};
pub use rate_limit_config::{RateLimitConfig, RateLimitPolicy};
pub use rate_limiter::{Decision, RateLimiter};
pub use server::{build_router, create_app};
