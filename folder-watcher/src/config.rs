//! Watcher configuration.

use serde::{Deserialize, Serialize};

/// Which change-notification backend drives a watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStrategy {
    /// Pick the native overlapped backend on Windows and the portable
    /// backend everywhere else.
    #[default]
    Auto,

    /// Raw overlapped reads against the directory handle. Windows only;
    /// starting with this strategy elsewhere is a configuration error.
    Overlapped,

    /// The cross-platform `notify` backend.
    Portable,
}

/// Configuration for a [`FolderWatcher`](crate::FolderWatcher).
///
/// The default filter set observes directory names, file names,
/// last-write times and sizes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Also report attribute-only changes. Consumers that track
    /// sync-status attribute flips opt into this; everyone else skips
    /// the extra noise.
    pub include_attribute_changes: bool,

    /// Watch the whole subtree instead of the top level only.
    pub recursive: bool,

    /// Backend selection.
    pub strategy: WatchStrategy,
}

impl WatcherConfig {
    /// Create a config with the default filter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also observe attribute changes.
    pub fn with_attribute_changes(mut self) -> Self {
        self.include_attribute_changes = true;
        self
    }

    /// Watch the whole subtree.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Force a specific backend.
    pub fn with_strategy(mut self, strategy: WatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}
