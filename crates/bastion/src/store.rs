//! Dynamic configuration store.
//!
//! Holds the one validated [`AppConfig`] snapshot for the process and the
//! ordered registry of hooks that react to every successful update.
//!
//! ## Locking
//! ```text
//! update/hot_update ──► validate (no lock)
//!                  ──► update_gate (serializes writers, held through hooks)
//!                  ──► current.write() (pointer-sized swap only)
//!                  ──► hooks, in registration order
//! get ──► current.read() ──► clone
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use bastion_common::BastionError;

use crate::config::AppConfig;

/// Where a configuration update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSource {
    /// The watched configuration file changed on disk
    LocalFile,
    /// Pushed through the management API
    Remote,
}

impl fmt::Display for ReloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalFile => f.write_str("local_file"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Reaction to a successful configuration update.
///
/// Hooks log their own failures; nothing they do can abort the update or
/// the hooks registered after them.
#[async_trait]
pub trait HotReloadHook: Send + Sync {
    async fn on_reload(&self, store: &ConfigStore, source: ReloadSource);
}

/// Process-wide source of truth for all tunables
pub struct ConfigStore {
    current: RwLock<Arc<AppConfig>>,
    hooks: Mutex<Vec<(String, Arc<dyn HotReloadHook>)>>,
    update_gate: AsyncMutex<()>,
}

impl ConfigStore {
    /// Create a store from an initial snapshot, which must be valid
    pub fn new(config: AppConfig) -> Result<Self, BastionError> {
        config.validate()?;

        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            hooks: Mutex::new(Vec::new()),
            update_gate: AsyncMutex::new(()),
        })
    }

    /// Point-in-time copy of the current configuration
    pub fn get(&self) -> AppConfig {
        self.current.read().as_ref().clone()
    }

    /// Serialize the current snapshot
    pub fn to_json(&self) -> Result<String, BastionError> {
        let snapshot = Arc::clone(&self.current.read());
        serde_json::to_string(snapshot.as_ref()).map_err(|e| BastionError::Internal(e.to_string()))
    }

    /// Replace the whole snapshot, then run every hook
    pub async fn update(&self, config: AppConfig, source: ReloadSource) -> Result<(), BastionError> {
        config.validate()?;

        let _gate = self.update_gate.lock().await;
        let version = config.config_version;
        *self.current.write() = Arc::new(config);

        tracing::info!(version, source = %source, "Configuration updated");
        self.run_hooks(source).await;

        Ok(())
    }

    /// Merge only the hot-swappable fields of `config`, then run every hook
    pub async fn hot_update(
        &self,
        config: AppConfig,
        source: ReloadSource,
    ) -> Result<(), BastionError> {
        config.validate()?;

        let _gate = self.update_gate.lock().await;
        {
            let mut current = self.current.write();
            if current.http_port != config.http_port || current.grpc_port != config.grpc_port {
                tracing::warn!(
                    http_port = %config.http_port,
                    grpc_port = %config.grpc_port,
                    "Listener port change ignored, restart required"
                );
            }

            let mut merged = current.as_ref().clone();
            merged.merge_hot_fields(&config);
            *current = Arc::new(merged);
        }

        tracing::info!(version = config.config_version, source = %source, "Configuration hot-updated");
        self.run_hooks(source).await;

        Ok(())
    }

    /// Hot update from a pushed JSON payload
    pub async fn hot_update_json(
        &self,
        payload: &str,
        source: ReloadSource,
    ) -> Result<(), BastionError> {
        let config: AppConfig = serde_json::from_str(payload)
            .map_err(|e| BastionError::InvalidInput(format!("invalid config payload: {e}")))?;
        self.hot_update(config, source).await
    }

    /// Register a hook under `key`; a second registration under the same
    /// key is ignored and returns false.
    pub fn register_hook(&self, key: impl Into<String>, hook: Arc<dyn HotReloadHook>) -> bool {
        let key = key.into();
        let mut hooks = self.hooks.lock();
        if hooks.iter().any(|(k, _)| *k == key) {
            tracing::debug!(key = %key, "Hook already registered, ignoring");
            return false;
        }
        hooks.push((key, hook));
        true
    }

    /// Remove the hook under `key`, returning whether one existed
    pub fn unregister_hook(&self, key: &str) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(k, _)| k != key);
        hooks.len() != before
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }

    async fn run_hooks(&self, source: ReloadSource) {
        // Snapshot the registry so hooks may (un)register without deadlocking
        let hooks: Vec<(String, Arc<dyn HotReloadHook>)> = self.hooks.lock().clone();

        for (key, hook) in hooks {
            tracing::debug!(hook = %key, source = %source, "Running reload hook");
            hook.on_reload(self, source).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheType;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    struct CountingHook {
        calls: AtomicUsize,
        sources: Mutex<Vec<ReloadSource>>,
    }

    impl CountingHook {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                sources: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HotReloadHook for CountingHook {
        async fn on_reload(&self, _store: &ConfigStore, source: ReloadSource) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sources.lock().push(source);
        }
    }

    struct OrderHook {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl HotReloadHook for OrderHook {
        async fn on_reload(&self, _store: &ConfigStore, _source: ReloadSource) {
            self.log.lock().push(self.name);
        }
    }

    fn valid_config(version: i64) -> AppConfig {
        AppConfig {
            config_version: version,
            http_port: "9090".into(),
            cache_ttl: 30,
            rate_limit_qps: 200,
            rate_limit_burst: 50,
            api_keys: vec!["key-a".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_update_then_get_returns_same_config() {
        let store = ConfigStore::new(AppConfig::default()).unwrap();
        let config = valid_config(1);

        assert_ok!(store.update(config.clone(), ReloadSource::Remote).await);
        assert_eq!(store.get(), config);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_store_untouched() {
        let store = ConfigStore::new(valid_config(1)).unwrap();
        let hook = CountingHook::new();
        store.register_hook("count", hook.clone());
        let before = store.get();

        let bad = AppConfig {
            http_port: "99999".into(),
            cache_ttl: 0,
            ..valid_config(2)
        };

        match store.update(bad.clone(), ReloadSource::Remote).await {
            Err(BastionError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_err!(store.hot_update(bad, ReloadSource::LocalFile).await);

        assert_eq!(store.get(), before);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_new_rejects_invalid_initial_config() {
        let config = AppConfig {
            rate_limit_burst: 0,
            ..Default::default()
        };
        assert!(matches!(ConfigStore::new(config), Err(BastionError::Validation(_))));
    }

    #[tokio::test]
    async fn test_hot_update_preserves_ports() {
        let store = ConfigStore::new(valid_config(1)).unwrap();

        let incoming = AppConfig {
            config_version: 2,
            http_port: "7070".into(),
            grpc_port: "50099".into(),
            cache_type: CacheType::Redis,
            cache_addrs: "127.0.0.1:6379".into(),
            cache_ttl: 120,
            log_level: "debug".into(),
            api_keys: vec!["key-b".into()],
            ..valid_config(2)
        };
        assert_ok!(store.hot_update(incoming, ReloadSource::LocalFile).await);

        let current = store.get();
        assert_eq!(current.config_version, 2);
        assert_eq!(current.http_port, "9090");
        assert_eq!(current.grpc_port, "50051");
        assert_eq!(current.cache_type, CacheType::Redis);
        assert_eq!(current.cache_ttl, 120);
        assert_eq!(current.log_level, "debug");
        assert_eq!(current.api_keys, vec!["key-b".to_string()]);
    }

    #[tokio::test]
    async fn test_hooks_fire_once_per_update_in_order() {
        let store = ConfigStore::new(AppConfig::default()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            store.register_hook(name, Arc::new(OrderHook { name, log: log.clone() }));
        }
        let counter = CountingHook::new();
        store.register_hook("count", counter.clone());

        assert_ok!(store.update(valid_config(1), ReloadSource::Remote).await);
        assert_ok!(store.hot_update(valid_config(2), ReloadSource::LocalFile).await);

        assert_eq!(*log.lock(), vec!["first", "second", "third", "first", "second", "third"]);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *counter.sources.lock(),
            vec![ReloadSource::Remote, ReloadSource::LocalFile]
        );
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_key() {
        let store = ConfigStore::new(AppConfig::default()).unwrap();
        let first = CountingHook::new();
        let second = CountingHook::new();

        assert!(store.register_hook("limiter", first.clone()));
        assert!(!store.register_hook("limiter", second.clone()));
        assert_eq!(store.hook_count(), 1);

        assert_ok!(store.update(valid_config(1), ReloadSource::Remote).await);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);

        assert!(store.unregister_hook("limiter"));
        assert!(!store.unregister_hook("limiter"));
        assert_ok!(store.update(valid_config(2), ReloadSource::Remote).await);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hot_update_json() {
        let store = ConfigStore::new(AppConfig::default()).unwrap();

        assert_ok!(
            store
                .hot_update_json(r#"{"config_version":3,"cache_ttl":15}"#, ReloadSource::Remote)
                .await
        );
        assert_eq!(store.get().cache_ttl, 15);

        assert!(matches!(
            store.hot_update_json("{not json", ReloadSource::Remote).await,
            Err(BastionError::InvalidInput(_))
        ));
        assert!(matches!(
            store.hot_update_json(r#"{"rate_limit_qps":0}"#, ReloadSource::Remote).await,
            Err(BastionError::Validation(_))
        ));
        assert_eq!(store.get().config_version, 3);
    }

    #[test]
    fn test_to_json_round_trips_snapshot() {
        let store = ConfigStore::new(valid_config(4)).unwrap();
        let json = store.to_json().unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, store.get());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_never_see_torn_snapshot() {
        // Each snapshot ties ports, ttl and version together; a torn read
        // would mix fields from two snapshots.
        fn snapshot(n: i64) -> AppConfig {
            AppConfig {
                config_version: n,
                http_port: (8000 + n).to_string(),
                grpc_port: (50000 + n).to_string(),
                cache_ttl: n,
                ..Default::default()
            }
        }

        let store = Arc::new(ConfigStore::new(snapshot(1)).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let stop = stop.clone();
            readers.push(tokio::spawn(async move {
                let mut last_version = 0;
                while !stop.load(Ordering::Relaxed) {
                    let c = store.get();
                    let n = c.config_version;
                    assert_eq!(c.http_port, (8000 + n).to_string());
                    assert_eq!(c.grpc_port, (50000 + n).to_string());
                    assert_eq!(c.cache_ttl, n);
                    assert!(n >= last_version, "stale snapshot reappeared");
                    last_version = n;
                    tokio::task::yield_now().await;
                }
            }));
        }

        for n in 2..200 {
            store.update(snapshot(n), ReloadSource::Remote).await.unwrap();
        }
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(store.get().config_version, 199);
    }
}
