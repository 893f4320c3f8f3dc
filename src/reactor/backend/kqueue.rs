//! BSD/macOS backend: `kqueue`.
//!
//! Read and write interest are tracked as two independent filters
//! (`EVFILT_READ`/`EVFILT_WRITE`) per fd, mirroring the epoll backend's
//! level-triggered behavior (kqueue's default mode already reports
//! readiness until drained, so no `EV_CLEAR` is requested).

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Backend, ReadinessEvent};
use crate::reactor::fd_table::EventFlags;

pub struct Kqueue {
    kq: RawFd,
    registered: HashMap<RawFd, EventFlags>,
}

fn kevent_change(fd: RawFd, filter: i16, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    }
}

impl Kqueue {
    pub fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            kq,
            registered: HashMap::new(),
        })
    }

    fn apply(&mut self, fd: RawFd, from: EventFlags, to: EventFlags) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        let want_read = to.contains(EventFlags::READ);
        let want_write = to.contains(EventFlags::WRITE);
        let had_read = from.contains(EventFlags::READ);
        let had_write = from.contains(EventFlags::WRITE);

        if want_read && !had_read {
            changes.push(kevent_change(fd, libc::EVFILT_READ, libc::EV_ADD | libc::EV_ENABLE));
        } else if !want_read && had_read {
            changes.push(kevent_change(fd, libc::EVFILT_READ, libc::EV_DELETE));
        }
        if want_write && !had_write {
            changes.push(kevent_change(fd, libc::EVFILT_WRITE, libc::EV_ADD | libc::EV_ENABLE));
        } else if !want_write && had_write {
            changes.push(kevent_change(fd, libc::EVFILT_WRITE, libc::EV_DELETE));
        }
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Backend for Kqueue {
    fn register(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()> {
        self.apply(fd, EventFlags::empty(), interest)?;
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()> {
        let prev = self.registered.get(&fd).copied().unwrap_or(EventFlags::empty());
        self.apply(fd, prev, interest)?;
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let prev = self.registered.remove(&fd).unwrap_or(EventFlags::empty());
        self.apply(fd, prev, EventFlags::empty())
    }

    fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<ReadinessEvent>,
    ) -> io::Result<usize> {
        const MAX_EVENTS: usize = 256;
        let mut events: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as i64,
            tv_nsec: d.subsec_nanos() as i64,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());
        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                MAX_EVENTS as i32,
                ts_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        for ev in &events[..n as usize] {
            let fd = ev.ident as RawFd;
            out.push(ReadinessEvent {
                fd,
                readable: ev.filter == libc::EVFILT_READ,
                writable: ev.filter == libc::EVFILT_WRITE,
                error: ev.flags & libc::EV_ERROR != 0,
            });
        }
        Ok(n as usize)
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
