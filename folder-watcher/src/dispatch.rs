//! The dispatch loop: turns queued change records into typed events and
//! fans them out to registered observers.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::event::{ChangeAction, ChangeRecord, WatcherEvent};
use crate::queue::OperationQueue;

/// How long one wait on the wake signal may block before the loop
/// re-checks the cancellation token.
pub(crate) const DRAIN_WAIT: Duration = Duration::from_millis(200);

/// Identifier for a registered observer, returned by
/// [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&WatcherEvent) + Send + Sync>;

/// The set of registered event observers.
///
/// Fan-out is multicast: every observer sees every event. Delivery to
/// one observer is isolated from the others — a panicking observer is
/// logged and skipped, never allowed to stop the loop.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer and return its id.
    pub fn subscribe(
        &self,
        observer: impl Fn(&WatcherEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().push((id, Box::new(observer)));
        id
    }

    /// Remove a previously registered observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.write().retain(|(oid, _)| *oid != id);
    }

    /// Drop every registered observer.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one event to every observer, isolating panics.
    pub(crate) fn emit(&self, event: &WatcherEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (id, observer) in observers.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                warn!(observer = id.0, ?event, "observer panicked while handling event");
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(ObserverId, Observer)>> {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The consumer half of a running watcher session.
///
/// Waits on the wake signal with a bounded timeout, drains the queue in
/// FIFO order and raises one typed event per record. Runs until the
/// shared cancellation token fires, then exits without error.
pub(crate) struct DispatchLoop {
    queue: Arc<OperationQueue>,
    observers: Arc<ObserverRegistry>,
    token: CancellationToken,
    /// Old path of a rename whose matching `RenamedTo` has not arrived
    /// yet. Survives empty drains: the partner record may sit in the
    /// next buffer.
    pending_rename: Option<PathBuf>,
}

impl DispatchLoop {
    pub(crate) fn new(
        queue: Arc<OperationQueue>,
        observers: Arc<ObserverRegistry>,
        token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            observers,
            token,
            pending_rename: None,
        }
    }

    /// Run until canceled. Cancellation is observed within one
    /// [`DRAIN_WAIT`] period even when no records arrive.
    pub(crate) async fn run(mut self) {
        while !self.token.is_cancelled() {
            if self.queue.wait(DRAIN_WAIT).await {
                self.drain();
            }
        }
        debug!("dispatch loop exited");
    }

    fn drain(&mut self) {
        while let Some(record) = self.queue.try_dequeue() {
            if self.token.is_cancelled() {
                break;
            }
            trace!(action = ?record.action, path = %record.path.display(), "dispatching record");
            self.dispatch(record);
        }
    }

    fn dispatch(&mut self, record: ChangeRecord) {
        // A rename arrives as two records; the old name is held until
        // its partner shows up.
        if let Some(old_path) = self.pending_rename.take() {
            if record.action == ChangeAction::RenamedTo {
                self.observers.emit(&WatcherEvent::ItemRenamed {
                    old_path,
                    new_path: record.path,
                });
                return;
            }
            // The partner never arrived; the item is gone under its old
            // name.
            self.observers
                .emit(&WatcherEvent::ItemRemoved { path: old_path });
        }

        let event = match record.action {
            ChangeAction::Added => WatcherEvent::ItemAdded { path: record.path },
            ChangeAction::Modified => WatcherEvent::ItemChanged { path: record.path },
            ChangeAction::Removed => WatcherEvent::ItemRemoved { path: record.path },
            ChangeAction::RenamedFrom => {
                self.pending_rename = Some(record.path);
                return;
            }
            // A new name with no old name on record reads as an addition.
            ChangeAction::RenamedTo => WatcherEvent::ItemAdded { path: record.path },
        };
        self.observers.emit(&event);
    }
}
