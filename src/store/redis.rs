//! Redis queue store.
//!
//! Enqueue, dequeue and requeue run as Lua scripts so that every dedup check
//! and list move happens in one indivisible step on the server. The
//! connection is opened lazily on first use and reused afterwards.

use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{EnqueueRequest, EnqueueStatus, QueueKeys, QueueStats, QueueStore};
use crate::error::{Error, Result};

// KEYS: unique, delayed, ready
// ARGV: uniqueId ("" = none), readyAtMs ("" = now), message, debounce ("1"/"0")
macro_rules! enqueue_lua {
    () => {
        r#"
local uniqueSetKey = KEYS[1]
local delayedSetKey = KEYS[2]
local readyKey = KEYS[3]
local uniqueId = ARGV[1]
local readyAt = ARGV[2]
local message = ARGV[3]
local debounce = ARGV[4]

if uniqueId ~= "" and redis.call("SISMEMBER", uniqueSetKey, uniqueId) == 1 then
  if debounce ~= "1" or readyAt == "" then
    return 1
  end
  local removed = redis.call("ZREM", delayedSetKey, message)
  if removed == 0 then
    for _, pending in ipairs(redis.call("ZRANGE", delayedSetKey, 0, -1)) do
      local ok, decoded = pcall(cjson.decode, pending)
      if ok and type(decoded) == "table" and decoded["uniqueId"] == uniqueId then
        removed = removed + redis.call("ZREM", delayedSetKey, pending)
      end
    end
  end
  if removed == 0 then
    -- the pending copy was already promoted to the ready list
    return 1
  end
  redis.call("ZADD", delayedSetKey, readyAt, message)
  return 3
end

if uniqueId ~= "" then
  redis.call("SADD", uniqueSetKey, uniqueId)
end

if readyAt ~= "" then
  redis.call("ZADD", delayedSetKey, readyAt, message)
else
  redis.call("LPUSH", readyKey, message)
end
return 2
"#
    };
}

static ENQUEUE: LazyLock<Script> = LazyLock::new(|| Script::new(enqueue_lua!()));

// KEYS: unique, delayed, ready, processing; ARGV as for enqueue
static REQUEUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(concat!(
        r#"
if redis.call("LREM", KEYS[4], 1, ARGV[3]) == 0 then
  return 0
end
"#,
        enqueue_lua!()
    ))
});

// KEYS: unique, delayed, ready, processing
// ARGV: nowMs
static DEQUEUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local uniqueSetKey = KEYS[1]
local delayedSetKey = KEYS[2]
local readyKey = KEYS[3]
local processingKey = KEYS[4]
local nowMs = ARGV[1]

for _, message in ipairs(redis.call("ZRANGEBYSCORE", delayedSetKey, "-inf", nowMs)) do
  redis.call("LPUSH", readyKey, message)
  redis.call("ZREM", delayedSetKey, message)
end

local message = redis.call("RPOPLPUSH", readyKey, processingKey)
if not message then
  return false
end

local ok, decoded = pcall(cjson.decode, message)
if ok and type(decoded) == "table" and type(decoded["uniqueId"]) == "string" then
  redis.call("SREM", uniqueSetKey, decoded["uniqueId"])
end

return message
"#,
    )
});

/// Queue store backed by a Redis server.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RedisStore {
    /// Create a store for the given Redis URL. No connection is made yet.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis connection info: {e}")))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    /// Connect on first call, reuse the connection afterwards.
    pub async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone()).await?;
                debug!("redis connection established");
                Ok::<_, Error>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(Error::Transport(format!("unexpected PING reply: {pong}")))
        }
    }
}

fn status_from(code: i64) -> Result<EnqueueStatus> {
    EnqueueStatus::from_code(code)
        .ok_or_else(|| Error::Transport(format!("unexpected enqueue status code {code}")))
}

fn ready_at_arg(request: &EnqueueRequest<'_>) -> String {
    request
        .ready_at_ms
        .map(|ms| ms.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue(
        &self,
        keys: &QueueKeys,
        request: EnqueueRequest<'_>,
    ) -> Result<EnqueueStatus> {
        let mut conn = self.connection().await?;
        let code: i64 = ENQUEUE
            .key(&keys.unique)
            .key(&keys.delayed)
            .key(&keys.ready)
            .arg(request.unique_id.unwrap_or(""))
            .arg(ready_at_arg(&request))
            .arg(request.message)
            .arg(if request.debounce { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        status_from(code)
    }

    async fn dequeue(&self, keys: &QueueKeys, now_ms: i64) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let message: Option<String> = DEQUEUE
            .key(&keys.unique)
            .key(&keys.delayed)
            .key(&keys.ready)
            .key(&keys.processing)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(message)
    }

    async fn remove_processing(&self, keys: &QueueKeys, raw: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.lrem(&keys.processing, 1, raw).await?;
        Ok(removed > 0)
    }

    async fn requeue(
        &self,
        keys: &QueueKeys,
        request: EnqueueRequest<'_>,
    ) -> Result<Option<EnqueueStatus>> {
        let mut conn = self.connection().await?;
        let code: i64 = REQUEUE
            .key(&keys.unique)
            .key(&keys.delayed)
            .key(&keys.ready)
            .key(&keys.processing)
            .arg(request.unique_id.unwrap_or(""))
            .arg(ready_at_arg(&request))
            .arg(request.message)
            .arg(if request.debounce { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        if code == 0 {
            return Ok(None);
        }
        status_from(code).map(Some)
    }

    async fn push_raw(&self, keys: &QueueKeys, raw: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(&keys.ready, raw).await?;
        Ok(())
    }

    async fn ready_len(&self, keys: &QueueKeys) -> Result<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(&keys.ready).await?)
    }

    async fn stats(&self, keys: &QueueKeys) -> Result<QueueStats> {
        let mut conn = self.connection().await?;
        let (ready, processing, delayed, unique): (u64, u64, u64, u64) = redis::pipe()
            .llen(&keys.ready)
            .llen(&keys.processing)
            .zcard(&keys.delayed)
            .scard(&keys.unique)
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            ready,
            processing,
            delayed,
            unique,
        })
    }
}
