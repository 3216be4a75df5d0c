//! Redis cache backend with server-side expiry.
//!
//! Every command is bounded by [`CACHE_OPERATION_TIMEOUT_MS`]; a stalled
//! server surfaces as a backend operation error. Status transitions run as
//! compare-and-swap scripts (`KEEPTTL` needs redis 6.0 or newer).

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use std::future::Future;
use std::time::Duration;

use bastion_common::constants::{CACHE_CONNECT_TIMEOUT_SECS, CACHE_OPERATION_TIMEOUT_MS};
use bastion_common::{BastionError, CacheEntry};

use super::{CacheBackend, CacheParams};
use crate::config::CacheType;

/// Replace KEYS[1] with ARGV[2] only while it still holds ARGV[1]
const SWAP_IF_UNCHANGED: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
    return 1
end
return 0
";

/// Delete KEYS[1] only while it still holds ARGV[1]
const DELETE_IF_UNCHANGED: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";

/// Redis-backed cache
pub struct RedisCache {
    prefix: String,
    ttl_secs: u64,
    op_timeout: Duration,
    swap_if_unchanged: Script,
    delete_if_unchanged: Script,
    /// Address the connection was established against
    addr: String,
    /// Connection manager (auto-reconnecting); `None` once closed
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisCache {
    /// Connect to the first address in `params.addrs` that answers
    pub async fn connect(params: &CacheParams) -> Result<Self, BastionError> {
        if params.addrs.trim().is_empty() {
            return Err(BastionError::BackendConstruction("no cache_addrs configured".into()));
        }

        let timeout = Duration::from_secs(CACHE_CONNECT_TIMEOUT_SECS);
        let mut last_error = String::new();

        for addr in params.addrs.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let url = connection_url(addr, &params.username, &params.password);
            let client = match redis::Client::open(url.as_str()) {
                Ok(client) => client,
                Err(e) => {
                    last_error = format!("{addr}: {e}");
                    continue;
                }
            };

            match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
                Ok(Ok(conn)) => {
                    tracing::info!(addr = %addr, prefix = %params.key_prefix, "Redis cache connected");
                    return Ok(Self {
                        prefix: params.key_prefix.clone(),
                        ttl_secs: params.ttl.as_secs().max(1),
                        op_timeout: Duration::from_millis(CACHE_OPERATION_TIMEOUT_MS),
                        swap_if_unchanged: Script::new(SWAP_IF_UNCHANGED),
                        delete_if_unchanged: Script::new(DELETE_IF_UNCHANGED),
                        addr: addr.to_string(),
                        conn: RwLock::new(Some(conn)),
                    });
                }
                Ok(Err(e)) => last_error = format!("{addr}: {e}"),
                Err(_) => last_error = format!("{addr}: connect timed out after {timeout:?}"),
            }
            tracing::warn!(error = %last_error, "Redis address unreachable, trying next");
        }

        Err(BastionError::BackendConstruction(format!(
            "no reachable redis address ({last_error})"
        )))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Clone of the live connection; in-flight calls keep theirs after close
    fn connection(&self) -> Result<ConnectionManager, BastionError> {
        self.conn
            .read()
            .clone()
            .ok_or_else(|| BastionError::BackendOperation("redis backend is closed".into()))
    }

    /// Raw stored value and its decoded entry
    async fn load(
        &self,
        conn: &mut ConnectionManager,
        key: &str,
    ) -> Result<Option<(String, CacheEntry)>, BastionError> {
        let raw: Option<String> = bounded(self.op_timeout, conn.get(key)).await?;
        raw.map(|raw| decode(&raw).map(|entry| (raw, entry))).transpose()
    }
}

/// Run one redis command with a response deadline
async fn bounded<T>(limit: Duration, op: impl Future<Output = RedisResult<T>>) -> Result<T, BastionError> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(operation_error),
        Err(_) => Err(BastionError::BackendOperation(format!(
            "redis command timed out after {limit:?}"
        ))),
    }
}

fn operation_error(e: redis::RedisError) -> BastionError {
    BastionError::BackendOperation(e.to_string())
}

fn decode(raw: &str) -> Result<CacheEntry, BastionError> {
    serde_json::from_str(raw).map_err(|e| BastionError::BackendOperation(format!("corrupt cache entry: {e}")))
}

fn encode(entry: &CacheEntry) -> Result<String, BastionError> {
    serde_json::to_string(entry).map_err(|e| BastionError::Internal(e.to_string()))
}

/// `redis://[user[:password]@]host:port/` with credentials URL-encoded
fn connection_url(addr: &str, username: &str, password: &str) -> String {
    match (username.is_empty(), password.is_empty()) {
        (true, true) => format!("redis://{addr}/"),
        (true, false) => format!("redis://:{}@{addr}/", urlencoding::encode(password)),
        (false, true) => format!("redis://{}@{addr}/", urlencoding::encode(username)),
        (false, false) => format!(
            "redis://{}:{}@{addr}/",
            urlencoding::encode(username),
            urlencoding::encode(password)
        ),
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, BastionError> {
        let mut conn = self.connection()?;
        Ok(self.load(&mut conn, &self.prefixed(key)).await?.map(|(_, entry)| entry))
    }

    async fn set_cache(&self, key: &str, entry: &CacheEntry) -> Result<(), BastionError> {
        let mut conn = self.connection()?;
        let data = encode(entry)?;
        bounded(self.op_timeout, conn.set_ex::<_, _, ()>(self.prefixed(key), data, self.ttl_secs)).await
    }

    async fn delete_cache(&self, key: &str) -> Result<(), BastionError> {
        let mut conn = self.connection()?;
        bounded(self.op_timeout, conn.del::<_, ()>(self.prefixed(key))).await
    }

    async fn mark_verified(&self, key: &str) -> Result<bool, BastionError> {
        let mut conn = self.connection()?;
        let key = self.prefixed(key);
        let Some((raw, mut entry)) = self.load(&mut conn, &key).await? else {
            return Ok(false);
        };
        if entry.is_verified() {
            return Ok(false);
        }
        entry.mark_verified();
        let next = encode(&entry)?;

        let mut invocation = self.swap_if_unchanged.key(&key);
        invocation.arg(&raw).arg(&next);
        let swapped: i32 = bounded(self.op_timeout, invocation.invoke_async(&mut conn)).await?;
        Ok(swapped == 1)
    }

    async fn take_verified(&self, key: &str) -> Result<bool, BastionError> {
        let mut conn = self.connection()?;
        let key = self.prefixed(key);
        let Some((raw, entry)) = self.load(&mut conn, &key).await? else {
            return Ok(false);
        };
        if !entry.is_verified() {
            return Ok(false);
        }

        let mut invocation = self.delete_if_unchanged.key(&key);
        invocation.arg(&raw);
        let deleted: i32 = bounded(self.op_timeout, invocation.invoke_async(&mut conn)).await?;
        Ok(deleted == 1)
    }

    async fn close(&self) -> Result<(), BastionError> {
        // Dropping our manager closes the socket once in-flight clones finish
        if self.conn.write().take().is_some() {
            tracing::info!(addr = %self.addr, "Redis cache connection closed");
        }
        Ok(())
    }

    fn kind(&self) -> CacheType {
        CacheType::Redis
    }

    fn is_closed(&self) -> bool {
        self.conn.read().is_none()
    }
}
