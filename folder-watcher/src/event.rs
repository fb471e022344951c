//! Change records and the typed events delivered to observers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Raw action reported by the operating system for one record.
///
/// The numeric codes are part of the native notification contract; see
/// [`ChangeAction::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// An item was created (code 1).
    Added,

    /// An item was deleted (code 2).
    Removed,

    /// An item's contents or metadata changed (code 3).
    Modified,

    /// An item was renamed; this record carries the old name (code 4).
    RenamedFrom,

    /// An item was renamed; this record carries the new name (code 5).
    RenamedTo,
}

impl ChangeAction {
    /// Map a native action code.
    ///
    /// Codes outside the documented 1-5 range return `None`; the decoder
    /// skips them so an undocumented code can never take the watcher down.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Added),
            2 => Some(Self::Removed),
            3 => Some(Self::Modified),
            4 => Some(Self::RenamedFrom),
            5 => Some(Self::RenamedTo),
            _ => None,
        }
    }
}

/// A single decoded change notification.
///
/// Records are created while decoding a native notification buffer (or by
/// the portable backend's event mapping) and consumed by the dispatch
/// loop; nothing mutates them in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// What happened.
    pub action: ChangeAction,

    /// Full path of the affected item: the watched root joined with the
    /// name the OS reported.
    pub path: PathBuf,
}

impl ChangeRecord {
    /// Create a new change record.
    pub fn new(action: ChangeAction, path: impl Into<PathBuf>) -> Self {
        Self {
            action,
            path: path.into(),
        }
    }
}

/// A typed event delivered to registered observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// An item appeared in the watched folder.
    ItemAdded {
        /// Full path of the new item.
        path: PathBuf,
    },

    /// An item disappeared from the watched folder.
    ItemRemoved {
        /// Full path the item had.
        path: PathBuf,
    },

    /// An item's contents or metadata changed.
    ItemChanged {
        /// Full path of the changed item.
        path: PathBuf,
    },

    /// An item was renamed within the watched folder.
    ItemRenamed {
        /// Path before the rename.
        old_path: PathBuf,
        /// Path after the rename.
        new_path: PathBuf,
    },
}

impl WatcherEvent {
    /// The path a consumer should treat as current after this event.
    pub fn path(&self) -> &Path {
        match self {
            Self::ItemAdded { path } | Self::ItemRemoved { path } | Self::ItemChanged { path } => {
                path
            }
            Self::ItemRenamed { new_path, .. } => new_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_action_code_mapping() {
        assert_eq!(ChangeAction::from_code(1), Some(ChangeAction::Added));
        assert_eq!(ChangeAction::from_code(2), Some(ChangeAction::Removed));
        assert_eq!(ChangeAction::from_code(3), Some(ChangeAction::Modified));
        assert_eq!(ChangeAction::from_code(4), Some(ChangeAction::RenamedFrom));
        assert_eq!(ChangeAction::from_code(5), Some(ChangeAction::RenamedTo));
    }

    #[test]
    fn test_unknown_codes_are_none() {
        assert_eq!(ChangeAction::from_code(0), None);
        assert_eq!(ChangeAction::from_code(6), None);
        assert_eq!(ChangeAction::from_code(u32::MAX), None);
    }

    #[test]
    fn test_event_current_path() {
        let renamed = WatcherEvent::ItemRenamed {
            old_path: "/watched/a.txt".into(),
            new_path: "/watched/b.txt".into(),
        };
        assert_eq!(renamed.path(), Path::new("/watched/b.txt"));

        let added = WatcherEvent::ItemAdded {
            path: "/watched/a.txt".into(),
        };
        assert_eq!(added.path(), Path::new("/watched/a.txt"));
    }
}
