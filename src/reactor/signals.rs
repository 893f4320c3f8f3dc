//! The signal bridge: a process-wide table of signal handlers plus the
//! self-pipe used to deliver async signal arrivals into the reactor's wait
//! primitive.
//!
//! POSIX signals are a process resource (§9 Design Notes), so registration
//! is serialized through a single process-level lock even though dispatch
//! itself is single-threaded per reactor. Each distinct signal number gets
//! exactly one [`signal_hook`] pipe registration (deduped by signum) plus
//! one atomic pending flag; any number of script-level handlers can then
//! share that single OS-level registration.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::unistd::{close, pipe, read};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::ReactorError;

pub type UserData = *mut c_void;
pub type SignalHandler = fn(signum: i32, data: UserData);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOp {
    Set,
    Unset,
}

struct SignalRecord {
    handler: SignalHandler,
    data: usize,
}

struct Registration {
    pending: Arc<AtomicBool>,
    flag_id: signal_hook::SigId,
    pipe_id: signal_hook::SigId,
}

/// Process-wide state: one [`Registration`] per signal number that has at
/// least one handler, plus the handler list itself.
struct GlobalBridge {
    handlers: HashMap<i32, Vec<SignalRecord>>,
    registrations: HashMap<i32, Registration>,
}

static BRIDGE: OnceCell<Mutex<GlobalBridge>> = OnceCell::new();

fn bridge() -> &'static Mutex<GlobalBridge> {
    BRIDGE.get_or_init(|| {
        Mutex::new(GlobalBridge {
            handlers: HashMap::new(),
            registrations: HashMap::new(),
        })
    })
}

/// One reactor's view onto the signal bridge: its private self-pipe read end
/// and a dup'd write end registered per signal (the write end is owned by
/// `signal_hook` once registered, so every signum we register gets its own
/// `dup`).
pub struct SignalBridge {
    read_fd: RawFd,
    write_fd: RawFd,
    owned_signals: Vec<(i32, SignalHandler, usize)>,
}

impl SignalBridge {
    pub fn new() -> Result<Self, ReactorError> {
        let (read_fd, write_fd) = pipe().map_err(|e| ReactorError::Signal {
            signum: 0,
            source: std::io::Error::from_raw_os_error(e as i32),
        })?;
        nix::fcntl::fcntl(
            read_fd,
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .ok();
        Ok(Self {
            read_fd,
            write_fd,
            owned_signals: Vec::new(),
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Registers (SET) or removes (UNSET) a handler for `signum`.
    pub fn set_signal(
        &mut self,
        op: SignalOp,
        signum: i32,
        data: UserData,
        handler: SignalHandler,
    ) -> Result<(), ReactorError> {
        let data_addr = data as usize;
        match op {
            SignalOp::Set => {
                let mut guard = bridge().lock();
                guard
                    .handlers
                    .entry(signum)
                    .or_default()
                    .push(SignalRecord {
                        handler,
                        data: data_addr,
                    });
                if let std::collections::hash_map::Entry::Vacant(entry) = guard.registrations.entry(signum) {
                    let dup_fd = nix::unistd::dup(self.write_fd).map_err(|e| {
                        ReactorError::Signal {
                            signum,
                            source: std::io::Error::from_raw_os_error(e as i32),
                        }
                    })?;
                    let pipe_id = signal_hook::low_level::pipe::register(signum, dup_fd)
                        .map_err(|e| ReactorError::Signal { signum, source: e })?;
                    let pending = Arc::new(AtomicBool::new(false));
                    let flag_id =
                        signal_hook::flag::register(signum, Arc::clone(&pending))
                            .map_err(|e| ReactorError::Signal { signum, source: e })?;
                    entry.insert(Registration {
                        pending,
                        flag_id,
                        pipe_id,
                    });
                }
                self.owned_signals.push((signum, handler, data_addr));
                Ok(())
            }
            SignalOp::Unset => {
                let mut guard = bridge().lock();
                if let Some(list) = guard.handlers.get_mut(&signum) {
                    if let Some(pos) = list
                        .iter()
                        .position(|r| std::ptr::fn_addr_eq(r.handler, handler) && r.data == data_addr)
                    {
                        list.remove(pos);
                    }
                }
                self.owned_signals
                    .retain(|(s, h, d)| !(*s == signum && std::ptr::fn_addr_eq(*h, handler) && *d == data_addr));
                Ok(())
            }
        }
    }

    /// Drains the self-pipe and, for every signal whose pending flag is set,
    /// invokes every registered handler for that signal in registration
    /// order, then clears the flag.
    pub fn drain_and_dispatch(&self) {
        let mut buf = [0u8; 256];
        let mut woke = false;
        loop {
            match read(self.read_fd, &mut buf) {
                Ok(0) => break,
                Ok(_n) => woke = true,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        if !woke {
            return;
        }
        let guard = bridge().lock();
        for (&signum, reg) in guard.registrations.iter() {
            if reg.pending.swap(false, Ordering::SeqCst) {
                if let Some(list) = guard.handlers.get(&signum) {
                    for record in list {
                        (record.handler)(signum, record.data as UserData);
                    }
                }
            }
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        let mut guard = bridge().lock();
        for (signum, handler, data) in self.owned_signals.drain(..) {
            if let Some(list) = guard.handlers.get_mut(&signum) {
                if let Some(pos) = list
                    .iter()
                    .position(|r| std::ptr::fn_addr_eq(r.handler, handler) && r.data == data)
                {
                    list.remove(pos);
                }
                if list.is_empty() {
                    if let Some(reg) = guard.registrations.remove(&signum) {
                        signal_hook::low_level::unregister(reg.flag_id);
                        signal_hook::low_level::unregister(reg.pipe_id);
                    }
                }
            }
        }
        let _ = close(self.read_fd);
        let _ = close(self.write_fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static HITS: AtomicUsize = AtomicUsize::new(0);
    static ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    fn handler_a(_signum: i32, _data: UserData) {
        HITS.fetch_add(1, Ordering::SeqCst);
        ORDER.lock().push(b'a');
    }
    fn handler_b(_signum: i32, _data: UserData) {
        HITS.fetch_add(1, Ordering::SeqCst);
        ORDER.lock().push(b'b');
    }

    #[test]
    fn two_handlers_fire_in_registration_order() {
        ORDER.lock().clear();
        HITS.store(0, Ordering::SeqCst);
        let mut bridge = SignalBridge::new().unwrap();
        bridge
            .set_signal(SignalOp::Set, libc::SIGUSR2, std::ptr::null_mut(), handler_a)
            .unwrap();
        bridge
            .set_signal(SignalOp::Set, libc::SIGUSR2, std::ptr::null_mut(), handler_b)
            .unwrap();

        unsafe { libc::raise(libc::SIGUSR2) };
        std::thread::sleep(std::time::Duration::from_millis(20));
        bridge.drain_and_dispatch();

        assert_eq!(HITS.load(Ordering::SeqCst), 2);
        assert_eq!(*ORDER.lock(), vec![b'a', b'b']);

        bridge
            .set_signal(SignalOp::Unset, libc::SIGUSR2, std::ptr::null_mut(), handler_a)
            .unwrap();
        bridge
            .set_signal(SignalOp::Unset, libc::SIGUSR2, std::ptr::null_mut(), handler_b)
            .unwrap();
    }
}
