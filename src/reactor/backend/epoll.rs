//! Linux backend: `epoll` in level-triggered mode.
//!
//! Level-triggered is used (rather than edge-triggered) so that a partially
//! drained fd keeps reporting readiness without the reactor having to track
//! "did I read everything" itself — this matches the portable `poll`
//! fallback's semantics exactly, which is required for backend-transparent
//! external behavior (§4.1 "Backend selection").

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Backend, ReadinessEvent};
use crate::reactor::fd_table::EventFlags;

pub struct Epoll {
    epfd: RawFd,
    registered: HashMap<RawFd, EventFlags>,
}

fn epoll_events_for(interest: EventFlags) -> u32 {
    let mut bits = 0u32;
    if interest.contains(EventFlags::READ) {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.contains(EventFlags::WRITE) {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            registered: HashMap::new(),
        })
    }
}

impl Backend for Epoll {
    fn register(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: epoll_events_for(interest),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: epoll_events_for(interest),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        self.registered.remove(&fd);
        if rc < 0 {
            let err = io::Error::last_os_error();
            // Already-gone fd is not an error for our purposes: CLEAR must
            // be idempotent with respect to backend state.
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<ReadinessEvent>,
    ) -> io::Result<usize> {
        const MAX_EVENTS: usize = 256;
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        let n = unsafe {
            libc::epoll_wait(self.epfd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        for ev in &events[..n as usize] {
            let fd = ev.u64 as RawFd;
            let bits = ev.events as i32;
            out.push(ReadinessEvent {
                fd,
                readable: bits & libc::EPOLLIN != 0,
                writable: bits & libc::EPOLLOUT != 0,
                error: bits & (libc::EPOLLERR | libc::EPOLLHUP) != 0,
            });
        }
        Ok(n as usize)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
