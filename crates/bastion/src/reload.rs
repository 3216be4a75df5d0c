//! Configuration file watcher.
//!
//! Watches the directory holding the config file and pushes every change
//! through [`ConfigStore::hot_update`]. A file that fails to load or
//! validate is logged and skipped; the store keeps its last-good snapshot.

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::new_debouncer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bastion_common::BastionError;

use crate::config::AppConfig;
use crate::store::{ConfigStore, ReloadSource};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Builder for the config file watcher
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: Duration::from_millis(200),
        }
    }

    /// Coalesce bursts of writes (editors often write twice)
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching; must be called from within a tokio runtime
    pub fn spawn(self, store: Arc<ConfigStore>) -> Result<WatchHandle, BastionError> {
        let watch_dir = watch_dir(&self.path);
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| BastionError::Config(format!("not a file path: {}", self.path.display())))?;

        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(self.debounce, notify_tx)
            .map_err(|e| BastionError::Config(format!("failed to create file watcher: {e}")))?;
        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| BastionError::Config(format!("failed to watch {}: {e}", watch_dir.display())))?;

        tracing::info!(path = %self.path.display(), "👀 Watching config file");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let path = self.path;

        let handle = tokio::spawn(async move {
            // Dropping the debouncer stops the OS watch
            let _debouncer = debouncer;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::info!("Config watcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(POLL_INTERVAL) => {
                        let mut changed = false;
                        while let Ok(result) = notify_rx.try_recv() {
                            match result {
                                Ok(events) => {
                                    changed |= events
                                        .iter()
                                        .any(|event| event.path.file_name() == Some(file_name.as_os_str()));
                                }
                                Err(e) => tracing::error!(error = %e, "Config watcher error"),
                            }
                        }

                        if changed {
                            reload(&store, &path).await;
                        }
                    }
                }
            }
        });

        Ok(WatchHandle {
            shutdown: Some(shutdown_tx),
            handle,
        })
    }
}

/// Re-read the file and hot-apply it; failures keep the current snapshot
async fn reload(store: &ConfigStore, path: &Path) {
    tracing::info!(path = %path.display(), "Config file changed, reloading");

    let config = match AppConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable config file");
            return;
        }
    };

    match store.hot_update(config, ReloadSource::LocalFile).await {
        Ok(()) => tracing::info!(version = store.get().config_version, "✅ Config reloaded from file"),
        Err(e) => tracing::warn!(error = %e, "Rejected config file update"),
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Running watcher; [`stop`](Self::stop) is the only way to end it
pub struct WatchHandle {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl WatchHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Config watcher task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
