use crate::cache::{CacheClient, Pipeline, PipelineCommand, Value};
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue};
use std::future::Future;
use std::time::Duration;

/// Redis-backed [`CacheClient`]. Cheap to clone; clones share one
/// multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisClient {
    /// Connects and pings once. `timeout` bounds the connect and every
    /// later command.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(|e| CacheError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        let redis = Self { manager, timeout };
        redis.ping().await?;
        Ok(redis)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, CacheError> {
        let mut conn = self.manager.clone();
        self.bounded(cmd.query_async::<_, T>(&mut conn)).await
    }
}

#[async_trait]
impl CacheClient for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        // Zero means no expiry in both stores; anything else keeps at least 1 ms.
        if let Some(millis) = ttl.filter(|t| !t.is_zero()).map(|t| (t.as_millis() as u64).max(1)) {
            cmd.arg("PX").arg(millis);
        }
        self.query(&cmd).await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.query(redis::cmd("INCR").arg(key)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let secs: i64 = self.query(redis::cmd("TTL").arg(key)).await?;
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.query(redis::cmd("EXPIRE").arg(key).arg(ttl.as_secs())).await
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> Result<Value, CacheError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(arg.as_str());
        }
        self.query(&cmd).await
    }

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<Vec<i64>, CacheError> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for command in pipeline.commands() {
            match command {
                PipelineCommand::Incr(key) => pipe.cmd("INCR").arg(key),
                PipelineCommand::Ttl(key) => pipe.cmd("TTL").arg(key),
            };
        }

        let mut conn = self.manager.clone();
        self.bounded(pipe.query_async::<_, Vec<i64>>(&mut conn)).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let reply: String = self.query(&redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::InvalidValue(format!("unexpected PING reply: {}", reply)))
        }
    }
}
