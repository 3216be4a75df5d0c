//! Structured logging with a hot-swappable level filter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::store::{ConfigStore, HotReloadHook, ReloadSource};

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Map a configured level name onto a filter directive
fn level_directive(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => Some("error"),
        "warn" | "warning" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" => Some("trace"),
        "none" | "off" => Some("off"),
        _ => None,
    }
}

fn directive_or_default(level: &str) -> &'static str {
    level_directive(level).unwrap_or_else(|| {
        tracing::warn!(level = %level, "Unknown log level, falling back to info");
        "info"
    })
}

/// Install the global subscriber.
///
/// Returns the reload handle for the level filter, or `None` when
/// `RUST_LOG` is set: an explicit environment filter is never overridden
/// by configuration.
pub fn init_logging(level: &str, json: bool) -> Result<Option<FilterHandle>> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let known = level_directive(level);
    let filter = from_env.unwrap_or_else(|| EnvFilter::new(known.unwrap_or("info")));
    let (filter, handle) = reload::Layer::new(filter);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }

    if known.is_none() {
        tracing::warn!(level = %level, "Unknown log level, falling back to info");
    }

    Ok((!pinned).then_some(handle))
}

/// Re-applies `log_level` after every configuration update
pub struct LogLevelHook {
    handle: FilterHandle,
    applied: Mutex<String>,
}

impl LogLevelHook {
    pub fn new(handle: FilterHandle, initial_level: &str) -> Self {
        Self {
            handle,
            applied: Mutex::new(directive_or_default(initial_level).to_string()),
        }
    }
}

#[async_trait]
impl HotReloadHook for LogLevelHook {
    async fn on_reload(&self, store: &ConfigStore, _source: ReloadSource) {
        let level = store.get().log_level;
        let directive = directive_or_default(&level);

        let mut applied = self.applied.lock();
        if *applied == directive {
            return;
        }

        match self.handle.reload(EnvFilter::new(directive)) {
            Ok(()) => {
                tracing::info!(from = %*applied, to = directive, "Log level changed");
                *applied = directive.to_string();
            }
            Err(e) => tracing::error!(error = %e, "Failed to change log level"),
        }
    }
}
