//! Readiness-backend selection.
//!
//! At build time the best available primitive is chosen in priority order:
//! epoll (Linux) → kqueue (macOS/BSD) → a portable `poll(2)` fallback. The
//! `Backend` trait hides the choice behind one interface so `Reactor`'s
//! external behavior is identical regardless of which module compiled in.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::reactor::fd_table::EventFlags;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
mod poll;

/// One fd's readiness as reported by the backend for this wakeup.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// A platform readiness multiplexer. Interest is tracked per-fd as
/// READ/WRITE bits; ERROR is always implicitly monitored.
pub trait Backend {
    fn register(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()>;
    fn modify(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()>;
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;
    /// Blocks up to `timeout` (None = forever) for readiness, appending
    /// every ready fd to `out`. Returns the number of events appended.
    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadinessEvent>) -> io::Result<usize>;
}

#[cfg(target_os = "linux")]
pub type DefaultBackend = epoll::Epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub type DefaultBackend = kqueue::Kqueue;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
pub type DefaultBackend = poll::Poll;

pub fn new_default() -> io::Result<DefaultBackend> {
    DefaultBackend::new()
}

#[cfg(target_os = "linux")]
pub use epoll::Epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub use kqueue::Kqueue;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
pub use poll::Poll;
