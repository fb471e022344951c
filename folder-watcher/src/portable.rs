//! Portable change source backed by the `notify` crate.
//!
//! Used where raw overlapped directory reads are unavailable. The
//! backend's own watch thread plays the producer role: every `notify`
//! event is mapped onto change records, appended to the shared queue
//! and followed by one wake signal, so the dispatch loop sees the same
//! stream regardless of backend.

use std::path::Path;
use std::sync::Arc;

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error};

use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::event::{ChangeAction, ChangeRecord};
use crate::queue::OperationQueue;

/// Open a notify watcher on `path` feeding `queue`.
///
/// The returned watcher owns the underlying OS watch; dropping it tears
/// the watch down.
pub(crate) fn spawn(
    path: &Path,
    config: &WatcherConfig,
    queue: Arc<OperationQueue>,
) -> Result<RecommendedWatcher> {
    if !path.is_dir() {
        return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
    }

    let include_attribute_changes = config.include_attribute_changes;
    let mut watcher = notify::recommended_watcher(
        move |res: std::result::Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let records = map_event(&event, include_attribute_changes);
                if records.is_empty() {
                    return;
                }
                for record in records {
                    queue.enqueue(record);
                }
                queue.signal();
            }
            Err(e) => {
                error!("watch error: {e}");
            }
        },
    )?;

    let mode = if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(path, mode)?;
    debug!(path = %path.display(), "portable backend watching");

    Ok(watcher)
}

/// Map one notify event onto zero or more change records.
///
/// Renames become `RenamedFrom`/`RenamedTo` pairs so the dispatch loop
/// pairs them the same way it pairs native records. Metadata-only
/// changes are gated the way the native attribute filter is: write-time
/// updates always count, everything else only when the caller opted in.
fn map_event(event: &notify::Event, include_attribute_changes: bool) -> Vec<ChangeRecord> {
    let per_path = |action: ChangeAction| {
        event
            .paths
            .iter()
            .map(|path| ChangeRecord::new(action, path.clone()))
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => per_path(ChangeAction::Added),
        EventKind::Remove(_) => per_path(ChangeAction::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            per_path(ChangeAction::RenamedFrom)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => per_path(ChangeAction::RenamedTo),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            // One event carrying [old, new].
            [old, new] => vec![
                ChangeRecord::new(ChangeAction::RenamedFrom, old.clone()),
                ChangeRecord::new(ChangeAction::RenamedTo, new.clone()),
            ],
            _ => per_path(ChangeAction::Modified),
        },
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => {
            per_path(ChangeAction::Modified)
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => {
            if include_attribute_changes {
                per_path(ChangeAction::Modified)
            } else {
                Vec::new()
            }
        }
        EventKind::Modify(_) => per_path(ChangeAction::Modified),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use pretty_assertions::assert_eq;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for &path in paths {
            event = event.add_path(path.into());
        }
        event
    }

    #[test]
    fn test_create_maps_to_added() {
        let records = map_event(
            &event(EventKind::Create(CreateKind::File), &["/watched/a.txt"]),
            false,
        );
        assert_eq!(
            records,
            vec![ChangeRecord::new(ChangeAction::Added, "/watched/a.txt")]
        );
    }

    #[test]
    fn test_remove_maps_to_removed() {
        let records = map_event(
            &event(EventKind::Remove(RemoveKind::File), &["/watched/a.txt"]),
            false,
        );
        assert_eq!(
            records,
            vec![ChangeRecord::new(ChangeAction::Removed, "/watched/a.txt")]
        );
    }

    #[test]
    fn test_rename_both_splits_into_pair() {
        let records = map_event(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/watched/a.txt", "/watched/b.txt"],
            ),
            false,
        );
        assert_eq!(
            records,
            vec![
                ChangeRecord::new(ChangeAction::RenamedFrom, "/watched/a.txt"),
                ChangeRecord::new(ChangeAction::RenamedTo, "/watched/b.txt"),
            ]
        );
    }

    #[test]
    fn test_rename_halves_map_individually() {
        let from = map_event(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/watched/a.txt"],
            ),
            false,
        );
        let to = map_event(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/watched/b.txt"],
            ),
            false,
        );
        assert_eq!(
            from,
            vec![ChangeRecord::new(ChangeAction::RenamedFrom, "/watched/a.txt")]
        );
        assert_eq!(
            to,
            vec![ChangeRecord::new(ChangeAction::RenamedTo, "/watched/b.txt")]
        );
    }

    #[test]
    fn test_attribute_changes_are_gated() {
        let attrib = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/watched/a.txt"],
        );

        assert!(map_event(&attrib, false).is_empty());
        assert_eq!(
            map_event(&attrib, true),
            vec![ChangeRecord::new(ChangeAction::Modified, "/watched/a.txt")]
        );
    }

    #[test]
    fn test_write_time_always_counts() {
        let records = map_event(
            &event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
                &["/watched/a.txt"],
            ),
            false,
        );
        assert_eq!(
            records,
            vec![ChangeRecord::new(ChangeAction::Modified, "/watched/a.txt")]
        );
    }

    #[test]
    fn test_access_events_are_dropped() {
        let records = map_event(
            &event(
                EventKind::Access(notify::event::AccessKind::Read),
                &["/watched/a.txt"],
            ),
            false,
        );
        assert!(records.is_empty());
    }
}
