//! The public watcher: lifecycle state machine and observer surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{WatchStrategy, WatcherConfig};
use crate::dispatch::{DispatchLoop, ObserverId, ObserverRegistry};
use crate::error::{Result, WatcherError};
use crate::event::WatcherEvent;
use crate::queue::OperationQueue;

/// Lifecycle state of a [`FolderWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Created but never started.
    Idle,

    /// Actively delivering events.
    Running,

    /// Stopped; may be started again.
    Stopped,
}

/// Resolved backend for one running session.
enum Backend {
    #[cfg(windows)]
    Overlapped(crate::overlapped::NativeSource),
    Portable(notify::RecommendedWatcher),
}

/// One `Running` session's resources, discarded wholesale on `stop`.
struct WatchSession {
    token: CancellationToken,
    queue: Arc<OperationQueue>,
    dispatch: tokio::task::JoinHandle<()>,
    backend: Backend,
}

/// Watches a single folder for changes and relays them, in order, to
/// registered observers.
///
/// A watcher binds to one folder path for its whole lifetime. It can be
/// started, stopped and started again; every session gets a fresh
/// directory handle, a fresh queue and a fresh cancellation token.
pub struct FolderWatcher {
    path: PathBuf,
    config: WatcherConfig,
    observers: Arc<ObserverRegistry>,
    state: WatcherState,
    session: Option<WatchSession>,
    disposed: bool,
}

impl FolderWatcher {
    /// Create a watcher for `path` with the default configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, WatcherConfig::default())
    }

    /// Create a watcher for `path` with an explicit configuration.
    pub fn with_config(path: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            path: path.into(),
            config,
            observers: Arc::new(ObserverRegistry::new()),
            state: WatcherState::Idle,
            session: None,
            disposed: false,
        }
    }

    /// The watched folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Whether a session is currently running.
    pub fn is_running(&self) -> bool {
        self.state == WatcherState::Running
    }

    /// Register an observer for change events; returns an id usable
    /// with [`unsubscribe`](Self::unsubscribe). Observers survive
    /// `stop`/`start` cycles and are released on `dispose`.
    pub fn subscribe(
        &self,
        observer: impl Fn(&WatcherEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers.unsubscribe(id);
    }

    /// Start delivering change events.
    ///
    /// A no-op when already running. Fails fast when the folder cannot
    /// be opened for watching, and with [`WatcherError::Disposed`] after
    /// [`dispose`](Self::dispose).
    pub async fn start(&mut self) -> Result<()> {
        if self.disposed {
            return Err(WatcherError::Disposed);
        }
        if self.state == WatcherState::Running {
            return Ok(());
        }

        let token = CancellationToken::new();
        let queue = Arc::new(OperationQueue::new());

        let backend = self.open_backend(Arc::clone(&queue), token.clone())?;

        let dispatch = tokio::spawn(
            DispatchLoop::new(Arc::clone(&queue), Arc::clone(&self.observers), token.clone())
                .run(),
        );

        self.session = Some(WatchSession {
            token,
            queue,
            dispatch,
            backend,
        });
        self.state = WatcherState::Running;
        info!(path = %self.path.display(), "folder watcher started");

        Ok(())
    }

    /// Stop the running session.
    ///
    /// Cancels the shared token, actively cancels any in-flight native
    /// read, waits for both execution contexts to wind down and clears
    /// the queue. A no-op unless running; stopping twice is safe.
    pub async fn stop(&mut self) {
        if self.state != WatcherState::Running {
            return;
        }
        let Some(session) = self.session.take() else {
            self.state = WatcherState::Stopped;
            return;
        };

        session.token.cancel();

        match session.backend {
            #[cfg(windows)]
            Backend::Overlapped(source) => {
                source.cancel.cancel_io();
                // The reader blocks in native waits; join it off the
                // async scheduler.
                let _ = tokio::task::spawn_blocking(move || source.reader.join()).await;
            }
            Backend::Portable(watcher) => drop(watcher),
        }

        if session.dispatch.await.is_err() {
            debug!("dispatch task ended abnormally");
        }

        session.queue.clear();
        self.state = WatcherState::Stopped;
        info!(path = %self.path.display(), "folder watcher stopped");
    }

    /// Stop and release all retained observers; the watcher cannot be
    /// started again afterwards.
    pub async fn dispose(&mut self) {
        self.stop().await;
        self.observers.clear();
        self.disposed = true;
        debug!(path = %self.path.display(), "folder watcher disposed");
    }

    #[cfg(windows)]
    fn open_backend(
        &self,
        queue: Arc<OperationQueue>,
        token: CancellationToken,
    ) -> Result<Backend> {
        match self.config.strategy {
            WatchStrategy::Auto | WatchStrategy::Overlapped => {
                crate::overlapped::spawn(&self.path, &self.config, queue, token)
                    .map(Backend::Overlapped)
            }
            WatchStrategy::Portable => {
                crate::portable::spawn(&self.path, &self.config, queue).map(Backend::Portable)
            }
        }
    }

    #[cfg(not(windows))]
    fn open_backend(
        &self,
        queue: Arc<OperationQueue>,
        _token: CancellationToken,
    ) -> Result<Backend> {
        match self.config.strategy {
            WatchStrategy::Overlapped => Err(WatcherError::UnsupportedStrategy("overlapped")),
            WatchStrategy::Auto | WatchStrategy::Portable => {
                crate::portable::spawn(&self.path, &self.config, queue).map(Backend::Portable)
            }
        }
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        // A watcher dropped while running cannot await its session;
        // cancel everything so neither execution context outlives it.
        if let Some(session) = self.session.take() {
            session.token.cancel();
            #[cfg(windows)]
            if let Backend::Overlapped(source) = &session.backend {
                source.cancel.cancel_io();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn portable_watcher(path: &Path) -> FolderWatcher {
        FolderWatcher::with_config(
            path,
            WatcherConfig::new().with_strategy(WatchStrategy::Portable),
        )
    }

    #[tokio::test]
    async fn test_starts_and_stops() {
        let dir = TempDir::new().unwrap();
        let mut watcher = portable_watcher(dir.path());
        assert_eq!(watcher.state(), WatcherState::Idle);

        watcher.start().await.unwrap();
        assert!(watcher.is_running());

        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut watcher = portable_watcher(dir.path());

        watcher.start().await.unwrap();
        watcher.start().await.unwrap();
        assert!(watcher.is_running());

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut watcher = portable_watcher(dir.path());

        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_start_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let mut watcher = portable_watcher(&missing);

        let err = watcher.start().await.unwrap_err();
        assert!(matches!(err, WatcherError::DirectoryNotFound(_)));
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_restart_uses_fresh_session() {
        let dir = TempDir::new().unwrap();
        let mut watcher = portable_watcher(dir.path());

        watcher.start().await.unwrap();
        watcher.stop().await;
        watcher.start().await.unwrap();
        assert!(watcher.is_running());

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_dispose_prevents_restart() {
        let dir = TempDir::new().unwrap();
        let mut watcher = portable_watcher(dir.path());

        watcher.start().await.unwrap();
        watcher.dispose().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);

        let err = watcher.start().await.unwrap_err();
        assert!(matches!(err, WatcherError::Disposed));
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_overlapped_strategy_unsupported_off_windows() {
        let dir = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::with_config(
            dir.path(),
            WatcherConfig::new().with_strategy(WatchStrategy::Overlapped),
        );

        let err = watcher.start().await.unwrap_err();
        assert!(matches!(err, WatcherError::UnsupportedStrategy(_)));
    }
}
