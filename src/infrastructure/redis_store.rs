//! Redis-backed counter store.
//!
//! Distributed backend that lets multiple application instances share rate
//! limiting state. Window logs are Redis sorted sets keyed by the rule's
//! storage key, scored by request timestamp.
//!
//! The check-and-record path runs as a Lua script so the prune, count and
//! insert happen atomically on the server; concurrent checks at the limit
//! boundary from different instances cannot over-admit. Keys expire one
//! window after the last recorded request.

use crate::application::ports::{CounterStore, StoreError, WindowCheck};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prune the window, reject at the limit, otherwise record the request.
/// Returns `{allowed, prior_count, oldest_or_minus_one}`.
const CHECK_AND_RECORD_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)

if count >= limit then
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    local oldest_score = -1
    if oldest[2] then
        oldest_score = tonumber(oldest[2])
    end
    return {0, count, oldest_score}
end

redis.call('ZADD', key, now, now .. ':' .. math.random(1000000))
redis.call('EXPIRE', key, window)
return {1, count, now}
"#;

/// Redis-backed sliding-window counter store.
pub struct RedisCounterStore {
    connection: Arc<RwLock<ConnectionManager>>,
    check_script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl Clone for RedisCounterStore {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            check_script: Script::new(CHECK_AND_RECORD_SCRIPT),
        }
    }
}

impl RedisCounterStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            check_script: Script::new(CHECK_AND_RECORD_SCRIPT),
        })
    }
}

fn unavailable(error: RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_record(
        &self,
        key: &str,
        window_seconds: u64,
        limit: u32,
        now: u64,
    ) -> Result<WindowCheck, StoreError> {
        let mut conn = self.connection.write().await;
        let reply: Vec<i64> = self
            .check_script
            .key(key)
            .arg(window_seconds)
            .arg(limit)
            .arg(now)
            .invoke_async(&mut *conn)
            .await
            .map_err(unavailable)?;

        let allowed = reply.first().copied().unwrap_or(0) == 1;
        let count = reply.get(1).copied().unwrap_or(0).max(0) as u64;
        let oldest = match reply.get(2).copied() {
            Some(score) if score >= 0 => Some(score as u64),
            _ => None,
        };
        Ok(WindowCheck {
            allowed,
            count,
            oldest,
        })
    }

    async fn entries(
        &self,
        key: &str,
        window_seconds: u64,
        now: u64,
    ) -> Result<Vec<u64>, StoreError> {
        let cutoff = now.saturating_sub(window_seconds);
        let mut conn = self.connection.write().await;
        let _: () = conn
            .zrembyscore(key, 0, cutoff)
            .await
            .map_err(unavailable)?;
        let scored: Vec<(String, f64)> = conn
            .zrange_withscores(key, 0, -1)
            .await
            .map_err(unavailable)?;
        Ok(scored.into_iter().map(|(_, score)| score as u64).collect())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.write().await;
        let _: () = conn.del(key).await.map_err(unavailable)?;
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{prefix}*");
        let mut conn = self.connection.write().await;
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if new_cursor == 0 {
                break;
            }
            cursor = new_cursor;
        }
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.write().await;
        let _: () = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
