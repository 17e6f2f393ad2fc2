//! Single-process store used for local development and as the test double.
//!
//! All state sits behind one mutex, so every operation (script runs included)
//! is serialised exactly like a single Redis instance would serialise them.

use super::{CacheClient, Pipeline, PipelineCommand, Value};
use crate::error::CacheError;
use crate::rate_limiter::FIXED_WINDOW_SCRIPT;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

const TTL_MISSING: i64 = -2;
const TTL_PERSISTENT: i64 = -1;

/// Expired entries are swept from the whole map at most this often.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

impl State {
    fn sweep_if_due(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.last_sweep = now;
        tracing::trace!(evicted = before - self.entries.len(), "swept expired entries");
    }

    fn at(&mut self, now: Instant) -> Locked<'_> {
        Locked {
            entries: &mut self.entries,
            now,
        }
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held, live or not yet swept.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lock(&self) -> (MutexGuard<'_, State>, Instant) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.sweep_if_due(now);
        (state, now)
    }
}

/// Operations on an already locked map. Expired keys are evicted lazily on access.
struct Locked<'a> {
    entries: &'a mut HashMap<String, Entry>,
    now: Instant,
}

impl<'a> Locked<'a> {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        if self.entries.get(key).map_or(false, |e| e.is_expired(self.now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.live(key).map(|e| e.value.clone())
    }

    fn get_int(&mut self, key: &str) -> Result<i64, CacheError> {
        match self.get(key) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| CacheError::Command("value is not an integer".into())),
            None => Ok(0),
        }
    }

    fn incr(&mut self, key: &str) -> Result<i64, CacheError> {
        let next = self
            .get_int(key)?
            .checked_add(1)
            .ok_or_else(|| CacheError::Command("increment would overflow".into()))?;

        match self.live(key) {
            Some(entry) => entry.value = next.to_string(),
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: next.to_string(),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(next)
    }

    /// Redis TTL semantics, rounded to the nearest second.
    fn ttl_secs(&mut self, key: &str) -> i64 {
        let now = self.now;
        match self.live(key) {
            None => TTL_MISSING,
            Some(Entry { expires_at: None, .. }) => TTL_PERSISTENT,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let millis = at.saturating_duration_since(now).as_millis();
                ((millis + 500) / 1000) as i64
            }
        }
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        let at = self.now + ttl;
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Native rendition of [`FIXED_WINDOW_SCRIPT`].
    fn fixed_window(&mut self, key: &str, limit: i64, window_secs: i64) -> Result<Value, CacheError> {
        let window = Duration::from_secs(window_secs.max(0) as u64);
        let mut current = self.get_int(key)?;
        let mut allowed = 0;

        if current < limit {
            current = self.incr(key)?;
            if current == 1 {
                self.expire(key, window);
            }
            allowed = 1;
        }

        let mut ttl = self.ttl_secs(key);
        if ttl == TTL_PERSISTENT {
            self.expire(key, window);
            ttl = window_secs;
        }

        Ok(Value::Bulk(vec![
            Value::Int(current),
            Value::Int(ttl),
            Value::Int(allowed),
        ]))
    }
}

fn int_arg(args: &[String], index: usize) -> Result<i64, CacheError> {
    args.get(index)
        .ok_or_else(|| CacheError::Command("wrong number of arguments".into()))?
        .parse::<i64>()
        .map_err(|_| CacheError::Command(format!("argument {} is not an integer", index + 1)))
}

#[async_trait]
impl CacheClient for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let (mut state, now) = self.lock().await;
        Ok(state.at(now).get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let (mut state, now) = self.lock().await;
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|t| now + t);
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let (mut state, now) = self.lock().await;
        state.at(now).incr(key)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let (mut state, now) = self.lock().await;
        let secs = state.at(now).ttl_secs(key);
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let (mut state, now) = self.lock().await;
        Ok(state.at(now).expire(key, ttl))
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> Result<Value, CacheError> {
        if script != FIXED_WINDOW_SCRIPT {
            return Err(CacheError::UnsupportedScript);
        }
        let key = match keys {
            [key] => *key,
            _ => return Err(CacheError::Command("script expects exactly one key".into())),
        };
        let limit = int_arg(args, 0)?;
        let window_secs = int_arg(args, 1)?;

        let (mut state, now) = self.lock().await;
        state.at(now).fixed_window(key, limit, window_secs)
    }

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<Vec<i64>, CacheError> {
        let (mut state, now) = self.lock().await;
        let mut locked = state.at(now);

        pipeline
            .commands()
            .iter()
            .map(|command| match command {
                PipelineCommand::Incr(key) => locked.incr(key),
                PipelineCommand::Ttl(key) => Ok(locked.ttl_secs(key)),
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_args(limit: i64, window: i64) -> Vec<String> {
        vec![limit.to_string(), window.to_string()]
    }

    fn triple(value: Value) -> (i64, i64, i64) {
        match value {
            Value::Bulk(items) => match items.as_slice() {
                [Value::Int(a), Value::Int(b), Value::Int(c)] => (*a, *b, *c),
                other => panic!("unexpected items: {:?}", other),
            },
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_set_with_expiry() {
        tokio::time::pause();
        let store = InMemoryStore::new();

        store.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_counters_are_swept() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        let args = window_args(5, 1);

        for i in 0..1000 {
            let key = format!("client-{}", i);
            store.eval(FIXED_WINDOW_SCRIPT, &[key.as_str()], &args).await.unwrap();
        }
        assert_eq!(store.len().await, 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        for i in 0..10 {
            let key = format!("late-{}", i);
            store.eval(FIXED_WINDOW_SCRIPT, &[key.as_str()], &args).await.unwrap();
        }

        assert_eq!(store.len().await, 10);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        store.set("short", "1", Some(Duration::from_secs(1))).await.unwrap();
        store.set("long", "1", Some(Duration::from_secs(600))).await.unwrap();
        store.set("forever", "1", None).await.unwrap();

        tokio::time::advance(SWEEP_INTERVAL).await;
        store.incr("touch").await.unwrap();

        assert_eq!(store.len().await, 3);
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_and_expire() {
        let store = InMemoryStore::new();

        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        assert_eq!(store.ttl("counter").await.unwrap(), None);

        assert!(store.expire("counter", Duration::from_secs(30)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.ttl("counter").await.unwrap(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = InMemoryStore::new();
        store.set("text", "abc", None).await.unwrap();

        assert!(matches!(store.incr("text").await, Err(CacheError::Command(_))));
    }

    #[tokio::test]
    async fn test_pipeline_reports_raw_ttl() {
        let store = InMemoryStore::new();
        let results = store
            .exec_pipeline(Pipeline::new().ttl("p").incr("p").incr("p").ttl("p"))
            .await
            .unwrap();

        assert_eq!(results, vec![-2, 1, 2, -1]);
    }

    #[tokio::test]
    async fn test_unknown_script_is_rejected() {
        let store = InMemoryStore::new();
        let result = store.eval("return 1", &["k"], &[]).await;

        assert!(matches!(result, Err(CacheError::UnsupportedScript)));
    }

    #[tokio::test]
    async fn test_fixed_window_script_counts_and_denies() {
        let store = InMemoryStore::new();
        let args = window_args(2, 60);

        let first = triple(store.eval(FIXED_WINDOW_SCRIPT, &["w"], &args).await.unwrap());
        let second = triple(store.eval(FIXED_WINDOW_SCRIPT, &["w"], &args).await.unwrap());
        let third = triple(store.eval(FIXED_WINDOW_SCRIPT, &["w"], &args).await.unwrap());

        assert_eq!(first, (1, 60, 1));
        assert_eq!(second, (2, 60, 1));
        assert_eq!(third, (2, 60, 0));
    }

    #[tokio::test]
    async fn test_fixed_window_does_not_extend_expiry() {
        tokio::time::pause();
        let store = InMemoryStore::new();
        let args = window_args(10, 60);

        store.eval(FIXED_WINDOW_SCRIPT, &["w"], &args).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        let (count, ttl, _) = triple(store.eval(FIXED_WINDOW_SCRIPT, &["w"], &args).await.unwrap());

        assert_eq!(count, 2);
        assert_eq!(ttl, 40);
    }

    #[tokio::test]
    async fn test_fixed_window_repairs_key_without_expiry() {
        let store = InMemoryStore::new();
        store.set("w", "5", None).await.unwrap();

        let (count, ttl, allowed) =
            triple(store.eval(FIXED_WINDOW_SCRIPT, &["w"], &window_args(5, 30)).await.unwrap());

        assert_eq!((count, ttl, allowed), (5, 30, 0));
        assert_eq!(store.ttl("w").await.unwrap(), Some(Duration::from_secs(30)));
    }
}
