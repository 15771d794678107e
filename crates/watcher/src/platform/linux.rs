//! inotify backend
//!
//! One inotify instance serves the whole process. The same descriptor is
//! used for adding/removing watches (any thread) and for the blocking
//! reads of the event loop.

use crate::error::SourceError;
use crate::event::{EventMask, EventSource, WatchHandle};
use crate::tree::DirMonitor;
use std::ffi::CString;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

/// Handle to an inotify instance
#[derive(Debug)]
pub struct Inotify {
    fd: OwnedFd,
}

impl Inotify {
    pub fn init() -> Result<Self, SourceError> {
        // SAFETY: plain syscall, no pointers involved
        let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(SourceError::Init(io::Error::last_os_error()));
        }
        // SAFETY: fd was just returned by the kernel and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    /// Event stream over this instance; blocks the calling thread on reads
    pub fn events(self: Arc<Self>) -> EventSource<InotifyReader> {
        EventSource::new(InotifyReader { inotify: self })
    }
}

impl DirMonitor for Inotify {
    fn watch(&self, dir: &Path) -> io::Result<WatchHandle> {
        let path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mask = EventMask::WATCHED.bits() | libc::IN_ONLYDIR | libc::IN_DONT_FOLLOW;

        // SAFETY: path is a valid NUL-terminated string for the duration of the call
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), path.as_ptr(), mask) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WatchHandle::from_raw(wd))
    }

    fn unwatch(&self, handle: WatchHandle) -> io::Result<()> {
        // SAFETY: plain syscall on a descriptor we own
        let rc = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), handle.as_raw()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Blocking reader over a shared inotify descriptor
#[derive(Debug, Clone)]
pub struct InotifyReader {
    inotify: Arc<Inotify>,
}

impl Read for InotifyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(self.inotify.fd.as_raw_fd(), buf).map_err(io::Error::from)
    }
}
