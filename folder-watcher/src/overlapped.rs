//! Native change source: overlapped directory reads on a dedicated
//! thread.
//!
//! For the underlying API see the [ReadDirectoryChangesW reference][ref].
//!
//! [ref]: https://learn.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-readdirectorychangesw

use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_OPERATION_ABORTED,
    ERROR_PATH_NOT_FOUND, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY,
    FILE_NOTIFY_CHANGE_ATTRIBUTES, FILE_NOTIFY_CHANGE_DIR_NAME, FILE_NOTIFY_CHANGE_FILE_NAME,
    FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SIZE, FILE_SHARE_DELETE, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING, ReadDirectoryChangesW,
};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
use windows_sys::Win32::System::Threading::{
    CreateEventW, INFINITE, SetEvent, WaitForSingleObjectEx,
};

use crate::config::WatcherConfig;
use crate::decode::{READ_BUFFER_SIZE, decode_notification_buffer};
use crate::error::{Result, WatcherError};
use crate::queue::OperationQueue;

/// Raw handle values that may cross threads for cancellation.
///
/// Only `CancelIoEx`/`SetEvent` are ever issued through this copy; the
/// reader thread keeps exclusive ownership of the handles themselves
/// and is the only one that closes them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CancelHandle {
    dir: isize,
    event: isize,
}

impl CancelHandle {
    /// Abort the in-flight overlapped read and wake the reader's wait.
    ///
    /// The event is set as well as the I/O canceled: if the reader has
    /// not issued its next read yet, the latched event makes the
    /// upcoming wait return immediately and the thread sees the
    /// canceled token instead of blocking on a read nobody will abort.
    pub(crate) fn cancel_io(self) {
        unsafe {
            CancelIoEx(self.dir as HANDLE, ptr::null());
            SetEvent(self.event as HANDLE);
        }
    }
}

/// A running native read session: the dedicated reader thread plus the
/// handle used to cancel it.
pub(crate) struct NativeSource {
    pub(crate) reader: JoinHandle<()>,
    pub(crate) cancel: CancelHandle,
}

/// Open `path` for change notification and spawn the reader thread.
///
/// Failing to open the directory is terminal for the session and is
/// reported synchronously.
pub(crate) fn spawn(
    path: &Path,
    config: &WatcherConfig,
    queue: Arc<OperationQueue>,
    token: CancellationToken,
) -> Result<NativeSource> {
    let handle = open_directory(path)?;

    let event = unsafe { CreateEventW(ptr::null(), 0, 0, ptr::null()) };
    if event.is_null() {
        let err = std::io::Error::last_os_error();
        unsafe { CloseHandle(handle) };
        return Err(WatcherError::Io(err));
    }

    let cancel = CancelHandle {
        dir: handle as isize,
        event: event as isize,
    };
    let filters = notify_filters(config);
    let watch_subtree = config.recursive;
    let root = path.to_path_buf();

    let reader = match thread::Builder::new()
        .name("folder-watcher reader".to_string())
        .spawn(move || read_loop(cancel, root, filters, watch_subtree, queue, token))
    {
        Ok(reader) => reader,
        Err(err) => {
            unsafe {
                CloseHandle(event);
                CloseHandle(handle);
            }
            return Err(WatcherError::Io(err));
        }
    };

    Ok(NativeSource { reader, cancel })
}

fn open_directory(path: &Path) -> Result<HANDLE> {
    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();

    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            FILE_LIST_DIRECTORY,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
            ptr::null_mut(),
        )
    };

    if handle == INVALID_HANDLE_VALUE {
        return Err(open_error(path));
    }
    Ok(handle)
}

fn open_error(path: &Path) -> WatcherError {
    let err = std::io::Error::last_os_error();
    match err.raw_os_error().map(|code| code as u32) {
        Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND) => {
            WatcherError::DirectoryNotFound(path.display().to_string())
        }
        Some(ERROR_ACCESS_DENIED) => WatcherError::PermissionDenied(path.display().to_string()),
        _ => WatcherError::Io(err),
    }
}

fn notify_filters(config: &WatcherConfig) -> u32 {
    let mut filters = FILE_NOTIFY_CHANGE_DIR_NAME
        | FILE_NOTIFY_CHANGE_FILE_NAME
        | FILE_NOTIFY_CHANGE_LAST_WRITE
        | FILE_NOTIFY_CHANGE_SIZE;
    if config.include_attribute_changes {
        filters |= FILE_NOTIFY_CHANGE_ATTRIBUTES;
    }
    filters
}

enum ReadOutcome {
    /// A completed read with this many valid bytes in the buffer.
    Data(usize),
    /// Zero-byte completion: the kernel's internal buffer overflowed
    /// and individual records were lost.
    Overflow,
    /// The session is shutting down.
    Canceled,
    Failed(std::io::Error),
}

/// Blocking read loop. Runs on its own thread for the whole session; it
/// owns the directory and event handles and closes them on the way out.
fn read_loop(
    handles: CancelHandle,
    root: PathBuf,
    filters: u32,
    watch_subtree: bool,
    queue: Arc<OperationQueue>,
    token: CancellationToken,
) {
    let handle = handles.dir as HANDLE;
    let event = handles.event as HANDLE;
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while !token.is_cancelled() {
        match read_once(handle, event, &mut buf, filters, watch_subtree, &token) {
            ReadOutcome::Data(valid_len) => {
                let records = decode_notification_buffer(&buf[..valid_len], &root);
                if records.is_empty() {
                    continue;
                }
                for record in records {
                    queue.enqueue(record);
                }
                // One wake per buffer, not per record.
                queue.signal();
            }
            ReadOutcome::Overflow => {
                warn!(path = %root.display(), "change buffer overflowed, records were dropped");
            }
            ReadOutcome::Canceled => break,
            ReadOutcome::Failed(err) => {
                warn!(path = %root.display(), "directory read failed: {err}");
                break;
            }
        }
    }

    unsafe {
        CloseHandle(event);
        CloseHandle(handle);
    }
    debug!(path = %root.display(), "reader thread exited");
}

/// Issue one overlapped read and block until it completes or is
/// canceled. Never returns while an issued request is still pending —
/// the kernel must be done with `buf` before the caller may reuse or
/// drop it.
fn read_once(
    handle: HANDLE,
    event: HANDLE,
    buf: &mut [u8],
    filters: u32,
    watch_subtree: bool,
    token: &CancellationToken,
) -> ReadOutcome {
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    overlapped.hEvent = event;
    let mut returned = 0u32;

    let issued = unsafe {
        ReadDirectoryChangesW(
            handle,
            buf.as_mut_ptr() as *mut c_void,
            buf.len() as u32,
            i32::from(watch_subtree),
            filters,
            &mut returned, // unused for overlapped requests
            &mut overlapped,
            None,
        )
    };

    if issued == 0 {
        let err = std::io::Error::last_os_error();
        if token.is_cancelled() || err.raw_os_error() == Some(ERROR_OPERATION_ABORTED as i32) {
            return ReadOutcome::Canceled;
        }
        return ReadOutcome::Failed(err);
    }

    // Alertable wait, matching the cancel path's completion delivery.
    unsafe { WaitForSingleObjectEx(event, INFINITE, 1) };

    if token.is_cancelled() {
        // The wait may have been broken by SetEvent rather than by a
        // completed or aborted read; make sure the request is dead
        // before the buffer goes out of scope.
        let mut bytes = 0u32;
        unsafe {
            CancelIoEx(handle, &overlapped);
            GetOverlappedResult(handle, &overlapped, &mut bytes, 1);
        }
        return ReadOutcome::Canceled;
    }

    let mut bytes = 0u32;
    let ok = unsafe { GetOverlappedResult(handle, &overlapped, &mut bytes, 0) };
    if ok == 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_OPERATION_ABORTED as i32) {
            return ReadOutcome::Canceled;
        }
        return ReadOutcome::Failed(err);
    }

    if bytes == 0 {
        ReadOutcome::Overflow
    } else {
        ReadOutcome::Data(bytes as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_directory_fails() {
        let err = open_directory(Path::new(r"C:\folder-watcher\does\not\exist")).unwrap_err();
        assert!(matches!(err, WatcherError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_attribute_filter_is_opt_in() {
        let default = notify_filters(&WatcherConfig::new());
        let with_attrs = notify_filters(&WatcherConfig::new().with_attribute_changes());

        assert_eq!(default & FILE_NOTIFY_CHANGE_ATTRIBUTES, 0);
        assert_eq!(
            with_attrs,
            default | FILE_NOTIFY_CHANGE_ATTRIBUTES
        );
    }

    #[test]
    fn test_cancel_stops_reader_and_releases_handle() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(OperationQueue::new());
        let token = CancellationToken::new();
        let source = spawn(dir.path(), &WatcherConfig::new(), queue, token.clone()).unwrap();

        token.cancel();
        source.cancel.cancel_io();
        source.reader.join().unwrap();

        // The directory handle was closed by the thread: a fresh open
        // must succeed.
        let handle = open_directory(dir.path()).unwrap();
        unsafe { CloseHandle(handle) };
    }
}
