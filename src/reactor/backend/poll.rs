//! Portable fallback backend: a readiness scan built on `poll(2)`.
//!
//! Used on Unix targets with neither `epoll` nor `kqueue`. `O(n)` in the
//! number of registered fds per wakeup, which is the acceptable tradeoff for
//! "works everywhere" per §4.1.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Backend, ReadinessEvent};
use crate::reactor::fd_table::EventFlags;

pub struct Poll {
    registered: HashMap<RawFd, EventFlags>,
}

impl Poll {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            registered: HashMap::new(),
        })
    }
}

impl Backend for Poll {
    fn register(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()> {
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: EventFlags) -> io::Result<()> {
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.registered.remove(&fd);
        Ok(())
    }

    fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<ReadinessEvent>,
    ) -> io::Result<usize> {
        let mut pollfds: Vec<libc::pollfd> = self
            .registered
            .iter()
            .map(|(&fd, &interest)| {
                let mut events = 0;
                if interest.contains(EventFlags::READ) {
                    events |= libc::POLLIN;
                }
                if interest.contains(EventFlags::WRITE) {
                    events |= libc::POLLOUT;
                }
                libc::pollfd {
                    fd,
                    events,
                    revents: 0,
                }
            })
            .collect();

        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as u64, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let mut n = 0;
        for pfd in &pollfds {
            if pfd.revents == 0 {
                continue;
            }
            out.push(ReadinessEvent {
                fd: pfd.fd,
                readable: pfd.revents & libc::POLLIN != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                error: pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
            });
            n += 1;
        }
        Ok(n)
    }
}
