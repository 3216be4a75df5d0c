//! In-process cache backend with read-triggered expiry and a background
//! sweeper that bounds memory under low read traffic.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bastion_common::{BastionError, CacheEntry};

use super::CacheBackend;
use crate::config::CacheType;

type EntryMap = Arc<RwLock<HashMap<String, StoredEntry>>>;

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Sweeper task plus its stop signal
struct Sweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// In-process TTL cache
pub struct MemoryCache {
    prefix: String,
    ttl: Duration,
    entries: EntryMap,
    sweeper: Mutex<Option<Sweeper>>,
    closed: AtomicBool,
}

impl MemoryCache {
    /// Create the store and start its sweeper on the current tokio runtime
    pub fn new(prefix: &str, ttl: Duration, cleanup_interval: Duration) -> Result<Self, BastionError> {
        if ttl.is_zero() {
            return Err(BastionError::BackendConstruction("memory cache ttl must be positive".into()));
        }
        if cleanup_interval.is_zero() {
            return Err(BastionError::BackendConstruction(
                "memory cache cleanup interval must be positive".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BastionError::BackendConstruction(format!("no tokio runtime: {e}")))?;

        let entries: EntryMap = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = runtime.spawn(sweep_worker(entries.clone(), cleanup_interval, shutdown_rx));

        tracing::debug!(
            prefix = %prefix,
            ttl_ms = ttl.as_millis() as u64,
            cleanup_ms = cleanup_interval.as_millis() as u64,
            "Memory cache started"
        );

        Ok(Self {
            prefix: prefix.to_string(),
            ttl,
            entries,
            sweeper: Mutex::new(Some(Sweeper { shutdown, handle })),
            closed: AtomicBool::new(false),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Stored entries, including expired ones the sweeper has not reached
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether the background sweeper is still running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, BastionError> {
        let key = self.prefixed(key);
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(&key) {
                None => return Ok(None),
                Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.entry.clone())),
                Some(_) => {}
            }
        }

        // Expired: evict on read
        let mut entries = self.entries.write();
        if entries.get(&key).is_some_and(|s| s.is_expired(now)) {
            entries.remove(&key);
        }
        Ok(None)
    }

    async fn set_cache(&self, key: &str, entry: &CacheEntry) -> Result<(), BastionError> {
        let stored = StoredEntry {
            entry: entry.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(self.prefixed(key), stored);
        Ok(())
    }

    async fn delete_cache(&self, key: &str) -> Result<(), BastionError> {
        self.entries.write().remove(&self.prefixed(key));
        Ok(())
    }

    async fn mark_verified(&self, key: &str) -> Result<bool, BastionError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(&self.prefixed(key)) {
            // expires_at is left alone
            Some(stored) if !stored.is_expired(now) && !stored.entry.is_verified() => {
                stored.entry.mark_verified();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take_verified(&self, key: &str) -> Result<bool, BastionError> {
        let key = self.prefixed(key);
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(stored) if stored.is_expired(now) => {
                entries.remove(&key);
                Ok(false)
            }
            Some(stored) if stored.entry.is_verified() => {
                entries.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close(&self) -> Result<(), BastionError> {
        self.closed.store(true, Ordering::SeqCst);

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(());
            if let Err(e) = sweeper.handle.await {
                tracing::warn!(error = %e, "Memory cache sweeper ended abnormally");
            }
            tracing::debug!(prefix = %self.prefix, "Memory cache sweeper stopped");
        }
        Ok(())
    }

    fn kind(&self) -> CacheType {
        CacheType::Memory
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Periodically evict expired entries until told to stop (or the cache is dropped)
async fn sweep_worker(entries: EntryMap, interval: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = purge_expired(&entries);
                if removed > 0 {
                    tracing::trace!(removed, "Swept expired cache entries");
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

fn purge_expired(entries: &EntryMap) -> usize {
    let now = Instant::now();
    let mut entries = entries.write();
    let before = entries.len();
    entries.retain(|_, stored| !stored.is_expired(now));
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_common::{ChallengeStatus, ChallengeType};
    use tokio_test::assert_ok;

    fn entry(answer: &str) -> CacheEntry {
        CacheEntry::new(ChallengeType::Text, serde_json::json!({ "answer": answer }))
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let cache = MemoryCache::new("T:", Duration::from_secs(60), Duration::from_secs(60)).unwrap();
        let value = entry("XK42P");

        assert_ok!(cache.set_cache("abc", &value).await);
        assert_eq!(cache.get_cache("abc").await.unwrap(), Some(value));
        assert_eq!(cache.get_cache("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_updates_status() {
        let cache = MemoryCache::new("T:", Duration::from_secs(60), Duration::from_secs(60)).unwrap();
        let mut value = entry("XK42P");
        cache.set_cache("abc", &value).await.unwrap();

        value.mark_verified();
        cache.set_cache("abc", &value).await.unwrap();

        let stored = cache.get_cache("abc").await.unwrap().unwrap();
        assert_eq!(stored.status, ChallengeStatus::Verified);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_verified_keeps_original_deadline() {
        let cache = MemoryCache::new("T:", Duration::from_millis(150), Duration::from_secs(60)).unwrap();
        cache.set_cache("abc", &entry("A")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.mark_verified("abc").await.unwrap());
        assert!(cache.get_cache("abc").await.unwrap().unwrap().is_verified());

        // Still bound to the deadline set when the entry was stored
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get_cache("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_verified_only_from_pending() {
        let cache = MemoryCache::new("T:", Duration::from_secs(60), Duration::from_secs(60)).unwrap();
        assert!(!cache.mark_verified("missing").await.unwrap());

        cache.set_cache("abc", &entry("A")).await.unwrap();
        assert!(cache.mark_verified("abc").await.unwrap());
        assert!(!cache.mark_verified("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_verified_consumes_once() {
        let cache = MemoryCache::new("T:", Duration::from_secs(60), Duration::from_secs(60)).unwrap();
        cache.set_cache("abc", &entry("A")).await.unwrap();

        // Pending entries stay put
        assert!(!cache.take_verified("abc").await.unwrap());
        assert!(cache.get_cache("abc").await.unwrap().is_some());

        cache.mark_verified("abc").await.unwrap();
        let (first, second) = tokio::join!(cache.take_verified("abc"), cache.take_verified("abc"));
        assert!(first.unwrap() ^ second.unwrap());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new("T:", Duration::from_millis(50), Duration::from_secs(60)).unwrap();
        cache.set_cache("abc", &entry("A")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get_cache("abc").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_absent_key_succeeds() {
        let cache = MemoryCache::new("T:", Duration::from_secs(60), Duration::from_secs(60)).unwrap();
        assert_ok!(cache.delete_cache("never-set").await);

        cache.set_cache("abc", &entry("A")).await.unwrap();
        assert_ok!(cache.delete_cache("abc").await);
        assert_eq!(cache.get_cache("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_without_reads() {
        let cache = MemoryCache::new("T:", Duration::from_millis(20), Duration::from_millis(25)).unwrap();
        for i in 0..10 {
            cache.set_cache(&format!("k{i}"), &entry("A")).await.unwrap();
        }
        assert_eq!(cache.len(), 10);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_close_stops_sweeper() {
        let cache = MemoryCache::new("T:", Duration::from_secs(1), Duration::from_millis(10)).unwrap();
        assert!(cache.is_sweeping());
        assert!(!cache.is_closed());

        assert_ok!(cache.close().await);

        assert!(!cache.is_sweeping());
        assert!(cache.is_closed());
        // Closing twice is harmless
        assert_ok!(cache.close().await);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        assert!(matches!(
            MemoryCache::new("T:", Duration::from_secs(1), Duration::ZERO),
            Err(BastionError::BackendConstruction(_))
        ));
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(
            MemoryCache::new("T:", Duration::from_secs(1), Duration::from_secs(1)),
            Err(BastionError::BackendConstruction(_))
        ));
    }
}
