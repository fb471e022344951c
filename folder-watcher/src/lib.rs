//! # Folder Watcher
//!
//! Native directory change notifications for live folder views.
//!
//! A [`FolderWatcher`] attaches to a single folder, continuously
//! receives low-level change notifications from the operating system,
//! decodes them into typed events and delivers them — in order, without
//! loss under normal operation — to registered observers.
//!
//! ## Architecture
//!
//! ```text
//! kernel ──► change source (dedicated reader thread) ──► decoder
//!                                                          │
//!                              operation queue ◄───────────┘
//!                                    │  wake signal
//!                                    ▼
//!                              dispatch loop ──► observers
//! ```
//!
//! Two backends feed the same queue/dispatch pipeline: raw overlapped
//! directory reads on Windows, and the `notify` crate everywhere else.
//! The blocking native read always runs on its own dedicated thread;
//! only the drain/dispatch side runs on the async scheduler.

pub mod config;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod queue;
pub mod watcher;

#[cfg(windows)]
mod overlapped;
mod portable;

pub use config::{WatchStrategy, WatcherConfig};
pub use decode::{READ_BUFFER_SIZE, decode_notification_buffer};
pub use dispatch::{ObserverId, ObserverRegistry};
pub use error::{Result, WatcherError};
pub use event::{ChangeAction, ChangeRecord, WatcherEvent};
pub use watcher::{FolderWatcher, WatcherState};
