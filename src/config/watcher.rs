//! Configuration file watcher for hot reload.
//!
//! # Data Flow
//! ```text
//! notify event on the file's directory
//!     → filtered to the watched file name
//!     → debounce task (one reload per burst of events)
//!     → load + validate + compile routing
//!     → Reload on the update channel, unless nothing changed
//! ```
//!
//! # Design Decisions
//! - The parent directory is watched, so editors that save by rename keep
//!   triggering reloads
//! - Routing patterns are compiled here; the receiver swaps a finished snapshot
//! - A rejected file keeps the current configuration

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::BridgeConfig;
use crate::routing::RoutingConfig;

/// Quiet period after the last change before the file is reloaded.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// A validated configuration with its routing already compiled.
#[derive(Clone)]
pub struct Reload {
    pub config: BridgeConfig,
    pub routing: RoutingConfig,
}

impl Reload {
    /// Load, validate and compile the file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        let routing = RoutingConfig::compile(&config.routing)?;
        Ok(Self { config, routing })
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<Reload>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for compiled configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Reload>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a Tokio runtime; the returned
    /// watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let file_name = self.path.file_name().map(OsString::from);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, file_name.as_deref()) => {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default(),
        )?;

        let dir = watch_dir(&self.path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce_ms = self.debounce.as_millis() as u64, "Config watcher started");
        tokio::spawn(debounce_reloads(self.path, self.debounce, change_rx, self.update_tx));
        Ok(watcher)
    }
}

fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if !(event.kind.is_modify() || event.kind.is_create()) {
        return false;
    }
    match file_name {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
        None => true,
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Turn bursts of change notifications into single reloads.
async fn debounce_reloads(
    path: PathBuf,
    debounce: Duration,
    mut changes: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<Reload>,
) {
    let mut current: Option<BridgeConfig> = None;

    while changes.recv().await.is_some() {
        let mut coalesced = 1u32;
        while let Ok(Some(())) = tokio::time::timeout(debounce, changes.recv()).await {
            coalesced += 1;
        }

        match Reload::from_path(&path) {
            Ok(reload) => {
                if current.as_ref() == Some(&reload.config) {
                    tracing::debug!(path = ?path, coalesced, "Config unchanged, skipping reload");
                    continue;
                }
                tracing::info!(path = ?path, coalesced, "Config file changed, reloading");
                current = Some(reload.config.clone());
                if updates.send(reload).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to reload config, keeping current configuration"
                );
            }
        }
    }
}
