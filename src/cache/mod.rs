//! Key-value store abstraction shared by the rate limiter and the catalog cache.
//!
//! The rate limiter only ever calls [`CacheClient::eval`]; the remaining
//! operations back the general-purpose response cache.

pub mod memory;

use crate::error::CacheError;
use async_trait::async_trait;
use std::time::Duration;

pub use memory::InMemoryStore;

/// Store reply type; both store implementations speak the Redis value model.
pub type Value = ::redis::Value;

#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Missing keys are `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `None` stores the value without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Runs a server-side script atomically.
    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> Result<Value, CacheError>;

    /// Sends a batch of counter commands in one round trip.
    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<Vec<i64>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Yields the incremented value.
    Incr(String),
    /// Yields raw TTL seconds: -2 for a missing key, -1 for no expiry.
    Ttl(String),
}

/// Batched INCR/TTL commands, executed in order.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<PipelineCommand>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Incr(key.into()));
        self
    }

    pub fn ttl(mut self, key: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Ttl(key.into()));
        self
    }

    pub fn commands(&self) -> &[PipelineCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_keeps_command_order() {
        let pipeline = Pipeline::new().incr("a").ttl("a").incr("b");

        assert_eq!(pipeline.len(), 3);
        assert_eq!(
            pipeline.commands(),
            &[
                PipelineCommand::Incr("a".into()),
                PipelineCommand::Ttl("a".into()),
                PipelineCommand::Incr("b".into()),
            ]
        );
    }
}
