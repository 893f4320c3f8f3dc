//! The reactor core: a single-threaded dispatch loop multiplexing fd
//! readiness, timers, and POSIX signals over the best backend the target
//! supports.

pub mod backend;
pub mod fd_table;
pub mod heap;
pub mod signals;

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::RuntimeConfig;
use crate::error::ReactorError;
use backend::{Backend, DefaultBackend, ReadinessEvent};
pub use fd_table::{EventFlags, FdTimeout, Handler as FdHandler, UserData};
pub use heap::{TimerHandler, TimerKind};
use fd_table::FdRecord;
use heap::TimeoutHeap;
pub use signals::SignalOp;
use signals::{SignalBridge, SignalHandler};

pub type LoopHook = fn(data: UserData);

/// The single-threaded I/O event reactor.
///
/// Owns the FD table, timeout heap, signal bridge, and the chosen readiness
/// backend. All public operations return `Result<_, ReactorError>` in the
/// Rust-native rendition of the spec's 0/-1 convention.
pub struct Reactor<B: Backend = DefaultBackend> {
    backend: B,
    fds: fd_table::FdTable,
    heap: TimeoutHeap,
    signals: SignalBridge,
    heartbeat: Duration,
    break_requested: bool,
    dispatching: bool,
    loop_hook: Option<(LoopHook, UserData)>,
}

impl Reactor<DefaultBackend> {
    /// Initializes the reactor on the default backend for this target.
    ///
    /// `is_main` is accepted for parity with the spec's `init(is_main)`
    /// contract; a single-reactor-per-thread core has no other use for it
    /// here (multi-reactor setups are independent instances per §5).
    pub fn init(_is_main: bool, config: &RuntimeConfig) -> Result<Self, ReactorError> {
        let backend = backend::new_default().map_err(|source| ReactorError::Fatal { source })?;
        let signals = SignalBridge::new()?;
        let read_fd = signals.read_fd();
        let mut reactor = Self {
            backend,
            fds: fd_table::FdTable::new(),
            heap: TimeoutHeap::new(),
            signals,
            heartbeat: config.heartbeat,
            break_requested: false,
            dispatching: false,
            loop_hook: None,
        };
        reactor
            .backend
            .register(read_fd, EventFlags::READ)
            .map_err(|source| ReactorError::Register {
                fd: read_fd,
                source,
            })?;
        Ok(reactor)
    }
}

impl<B: Backend> Reactor<B> {
    /// Tears the reactor down. No-op beyond normal `Drop`; kept as an
    /// explicit method to mirror the spec's `destroy` entry point.
    pub fn destroy(self) {}

    pub fn set_callback(&mut self, hook: LoopHook, data: UserData) {
        self.loop_hook = Some((hook, data));
    }

    pub fn set_break(&mut self) {
        self.break_requested = true;
    }

    /// Installs or updates interest for `fd`.
    ///
    /// `CLEAR` removes all interest and the fd record atomically with
    /// respect to dispatch. `APPEND` ORs the new bits into the existing
    /// record without disturbing unrelated state (the other side's data,
    /// handlers, or timeout).
    pub fn set_fd(
        &mut self,
        fd: RawFd,
        flags: EventFlags,
        timeout: FdTimeout,
        data: UserData,
        handler: FdHandler,
    ) -> Result<(), ReactorError> {
        if flags.contains(EventFlags::CLEAR) {
            if let Some(record) = self.fds.get(fd) {
                if let Some(slot) = record.heap_slot {
                    self.heap.remove(slot);
                }
            }
            if self.fds.contains(fd) {
                self.backend
                    .deregister(fd)
                    .map_err(|source| ReactorError::Deregister { fd, source })?;
                self.fds.remove(fd);
            }
            return Ok(());
        }

        let append = flags.contains(EventFlags::APPEND);
        let existed = self.fds.contains(fd);

        let new_interest = if append {
            self.fds
                .get(fd)
                .map(|r| r.interest | (flags & !EventFlags::APPEND))
                .unwrap_or(flags & !EventFlags::APPEND)
        } else {
            flags
        };

        if existed {
            self.backend
                .modify(fd, new_interest)
                .map_err(|source| ReactorError::Modify { fd, source })?;
        } else {
            self.backend
                .register(fd, new_interest)
                .map_err(|source| ReactorError::Register { fd, source })?;
        }

        let is_write_side = new_interest.contains(EventFlags::WRITE) && !new_interest.contains(EventFlags::READ);
        // For APPEND, the side being touched is determined by the bits this
        // call is adding, not by the merged interest — otherwise appending
        // WRITE to an fd that already holds READ looks like a read-side
        // registration and clobbers `read_data` instead of `write_data`.
        let appended_flags = flags & !EventFlags::APPEND;
        let append_is_write_side = appended_flags.contains(EventFlags::WRITE) && !appended_flags.contains(EventFlags::READ);

        let prev_slot = self.fds.get(fd).and_then(|r| r.heap_slot);
        let prev_deadline = self.fds.get(fd).and_then(|r| r.deadline);
        let (deadline, heap_slot) = self.resolve_timeout(fd, timeout, prev_slot, prev_deadline, handler);

        let record = if let Some(existing) = self.fds.get_mut(fd) {
            if append {
                if append_is_write_side {
                    existing.write_data = data;
                } else {
                    existing.read_data = data;
                }
                existing.ready_handler = handler;
            } else {
                existing.read_data = if is_write_side { existing.read_data } else { data };
                existing.write_data = if is_write_side { data } else { existing.write_data };
                existing.ready_handler = handler;
            }
            existing.interest = new_interest;
            existing.deadline = deadline;
            existing.heap_slot = heap_slot;
            None
        } else {
            Some(FdRecord {
                fd,
                interest: new_interest,
                read_data: if is_write_side { std::ptr::null_mut() } else { data },
                write_data: if is_write_side { data } else { std::ptr::null_mut() },
                ready_handler: handler,
                timeout_handler: None,
                timeout_data: std::ptr::null_mut(),
                deadline,
                heap_slot,
            })
        };
        if let Some(record) = record {
            self.fds.insert(record);
        }
        trace!(fd, ?new_interest, "fd interest updated");
        Ok(())
    }

    /// Sets the handler invoked on fd-timeout expiry, independent of the
    /// readiness handler (§3 "Timer record").
    pub fn set_fd_timeout_handler(&mut self, fd: RawFd, data: UserData, handler: FdHandler) {
        if let Some(record) = self.fds.get_mut(fd) {
            record.timeout_handler = Some(handler);
            record.timeout_data = data;
        }
    }

    fn resolve_timeout(
        &mut self,
        fd: RawFd,
        timeout: FdTimeout,
        prev_slot: Option<u64>,
        prev_deadline: Option<Instant>,
        handler: FdHandler,
    ) -> (Option<Instant>, Option<u64>) {
        match timeout {
            FdTimeout::Unlimited => {
                if let Some(slot) = prev_slot {
                    self.heap.remove(slot);
                }
                (None, None)
            }
            FdTimeout::Unmodified => (prev_deadline, prev_slot),
            FdTimeout::After(d) => {
                if let Some(slot) = prev_slot {
                    self.heap.remove(slot);
                }
                let deadline = Instant::now() + d;
                let data = fd as usize as UserData;
                let slot = self.heap.insert(deadline, TimerKind::FdTimeout, data, fd_timeout_trampoline);
                let _ = handler;
                (Some(deadline), Some(slot))
            }
        }
    }

    /// Schedules a one-shot timer. Removed from the heap before its handler
    /// runs (§3 "Timer record").
    pub fn set_timer(&mut self, ms: u64, data: UserData, handler: TimerHandler) -> u64 {
        let deadline = Instant::now() + Duration::from_millis(ms);
        self.heap.insert(deadline, TimerKind::OneShot, data, handler)
    }

    /// Cancels a previously scheduled timer by the slot `set_timer` returned.
    pub fn cancel_timer(&mut self, slot: u64) {
        self.heap.remove(slot);
    }

    pub fn set_signal(
        &mut self,
        op: SignalOp,
        signum: i32,
        data: UserData,
        handler: SignalHandler,
    ) -> Result<(), ReactorError> {
        self.signals.set_signal(op, signum, data, handler)
    }

    /// Runs the dispatch loop until `set_break` is called or a fatal
    /// backend error occurs.
    pub fn dispatch(&mut self) -> Result<(), ReactorError> {
        loop {
            if self.break_requested {
                self.break_requested = false;
                return Ok(());
            }
            self.dispatch_once()?;
        }
    }

    /// Runs exactly one iteration of the loop body (§4.1 steps 1–7), useful
    /// for embedders driving the loop themselves and for deterministic
    /// tests.
    pub fn dispatch_once(&mut self) -> Result<(), ReactorError> {
        if self.dispatching {
            return Err(ReactorError::Reentrant);
        }
        self.dispatching = true;
        let result = self.dispatch_once_inner();
        self.dispatching = false;
        result
    }

    fn dispatch_once_inner(&mut self) -> Result<(), ReactorError> {
        if let Some((hook, data)) = self.loop_hook {
            hook(data);
        }

        let now = Instant::now();
        let heartbeat_deadline = now + self.heartbeat;
        let deadline = match self.heap.peek_deadline() {
            Some(d) => d.min(heartbeat_deadline),
            None => heartbeat_deadline,
        };
        let timeout = deadline.saturating_duration_since(now);

        let mut events: Vec<ReadinessEvent> = Vec::new();
        match self.backend.wait(Some(timeout), &mut events) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(source) => return Err(ReactorError::Fatal { source }),
        }

        let signal_fd = self.signals.read_fd();
        for event in &events {
            if event.fd == signal_fd {
                continue;
            }
            self.dispatch_fd_event(*event);
        }

        self.signals.drain_and_dispatch();

        let fired = self.heap.pop_expired(Instant::now());
        for entry in fired {
            debug!(slot = entry.slot, ?entry.kind, "timer fired");
            if entry.kind == TimerKind::FdTimeout {
                let fd = entry.data as usize as RawFd;
                if let Some(record) = self.fds.get_mut(fd) {
                    record.heap_slot = None;
                    record.deadline = None;
                    if let Some(handler) = record.timeout_handler {
                        handler(fd, record.timeout_data, EventFlags::empty());
                    }
                }
            } else {
                (entry.handler)(entry.data);
            }
        }

        Ok(())
    }

    fn dispatch_fd_event(&mut self, event: ReadinessEvent) {
        let Some(record) = self.fds.get(event.fd) else {
            // Stale readiness: record was removed since the wait started.
            return;
        };
        let interest = record.interest;
        let oneshot = interest.contains(EventFlags::ONESHOT);
        let read_handler_present = interest.contains(EventFlags::READ);
        let write_handler_present = interest.contains(EventFlags::WRITE);

        let ready_handler = record.ready_handler;
        let read_data = record.read_data;
        let write_data = record.write_data;

        if oneshot {
            self.fds.remove(event.fd);
            let _ = self.backend.deregister(event.fd);
        }

        if event.error {
            let (data, side) = if read_handler_present {
                (read_data, EventFlags::READ)
            } else {
                (write_data, EventFlags::WRITE)
            };
            ready_handler(event.fd, data, side | EventFlags::ERROR);
            return;
        }

        if event.readable && read_handler_present {
            ready_handler(event.fd, read_data, EventFlags::READ);
        }
        if event.writable && write_handler_present {
            ready_handler(event.fd, write_data, EventFlags::WRITE);
        }
    }
}

fn fd_timeout_trampoline(_data: UserData) {
    // fd-timeout entries are special-cased in `dispatch_once_inner`, which
    // reads the handler off the fd record directly; this trampoline exists
    // only so the timer entry can carry a `TimerHandler`-shaped slot in the
    // heap without a second code path for timer storage.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ORDER: parking_lot::Mutex<Vec<&'static str>> = parking_lot::Mutex::new(Vec::new());

    fn record(tag: &'static str) {
        ORDER.lock().push(tag);
    }

    fn timer_a(_: UserData) {
        record("a");
    }
    fn timer_b(_: UserData) {
        record("b");
    }
    fn timer_c(_: UserData) {
        record("c");
    }

    #[test]
    fn timer_fan_out_fires_in_deadline_order() {
        ORDER.lock().clear();
        let config = RuntimeConfig::default();
        let mut reactor = Reactor::init(true, &config).unwrap();
        reactor.set_timer(30, std::ptr::null_mut(), timer_c);
        reactor.set_timer(10, std::ptr::null_mut(), timer_a);
        reactor.set_timer(20, std::ptr::null_mut(), timer_b);

        let deadline = Instant::now() + Duration::from_millis(200);
        while ORDER.lock().len() < 3 && Instant::now() < deadline {
            reactor.dispatch_once().unwrap();
        }
        assert_eq!(*ORDER.lock(), vec!["a", "b", "c"]);
    }

    static READ_HITS: AtomicUsize = AtomicUsize::new(0);
    static TIMEOUT_HITS: AtomicUsize = AtomicUsize::new(0);

    fn on_read(_fd: RawFd, _data: UserData, _flags: EventFlags) {
        READ_HITS.fetch_add(1, Ordering::SeqCst);
    }
    fn on_timeout(_fd: RawFd, _data: UserData, _flags: EventFlags) {
        TIMEOUT_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn fd_readiness_fires_before_its_timeout() {
        READ_HITS.store(0, Ordering::SeqCst);
        TIMEOUT_HITS.store(0, Ordering::SeqCst);
        let config = RuntimeConfig::default();
        let mut reactor = Reactor::init(true, &config).unwrap();
        let (read_end, write_end) = nix::unistd::pipe().unwrap();

        reactor
            .set_fd(
                read_end,
                EventFlags::READ,
                FdTimeout::After(Duration::from_millis(200)),
                std::ptr::null_mut(),
                on_read,
            )
            .unwrap();
        reactor.set_fd_timeout_handler(read_end, std::ptr::null_mut(), on_timeout);

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            nix::unistd::write(write_end, b"x").unwrap();
        });

        let deadline = Instant::now() + Duration::from_millis(400);
        while READ_HITS.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            reactor.dispatch_once().unwrap();
        }
        assert_eq!(READ_HITS.load(Ordering::SeqCst), 1);
        assert_eq!(TIMEOUT_HITS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fd_timeout_fires_without_read_and_interest_remains() {
        READ_HITS.store(0, Ordering::SeqCst);
        TIMEOUT_HITS.store(0, Ordering::SeqCst);
        let config = RuntimeConfig::default();
        let mut reactor = Reactor::init(true, &config).unwrap();
        let (fd, _write_end) = nix::unistd::pipe().unwrap();

        reactor
            .set_fd(
                fd,
                EventFlags::READ,
                FdTimeout::After(Duration::from_millis(30)),
                std::ptr::null_mut(),
                on_read,
            )
            .unwrap();
        reactor.set_fd_timeout_handler(fd, std::ptr::null_mut(), on_timeout);

        let deadline = Instant::now() + Duration::from_millis(400);
        while TIMEOUT_HITS.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            reactor.dispatch_once().unwrap();
        }
        assert_eq!(TIMEOUT_HITS.load(Ordering::SeqCst), 1);
        assert_eq!(READ_HITS.load(Ordering::SeqCst), 0);

        reactor
            .set_fd(fd, EventFlags::CLEAR, FdTimeout::Unlimited, std::ptr::null_mut(), on_read)
            .unwrap();
        unsafe { libc::close(fd) };
    }

    static TIMEOUT_DATA_SEEN: AtomicUsize = AtomicUsize::new(0);

    fn on_timeout_capture_data(_fd: RawFd, data: UserData, _flags: EventFlags) {
        TIMEOUT_DATA_SEEN.store(data as usize, Ordering::SeqCst);
    }

    #[test]
    fn fd_timeout_handler_receives_its_own_registered_data() {
        TIMEOUT_DATA_SEEN.store(0, Ordering::SeqCst);
        let config = RuntimeConfig::default();
        let mut reactor = Reactor::init(true, &config).unwrap();
        let (fd, _write_end) = nix::unistd::pipe().unwrap();

        // A READ-only fd: `write_data` is never touched, so a timeout
        // handler reading it (instead of a dedicated slot) would see null.
        reactor
            .set_fd(fd, EventFlags::READ, FdTimeout::After(Duration::from_millis(20)), std::ptr::null_mut(), on_read)
            .unwrap();
        let marker = 0xBEEFusize as UserData;
        reactor.set_fd_timeout_handler(fd, marker, on_timeout_capture_data);

        let deadline = Instant::now() + Duration::from_millis(400);
        while TIMEOUT_DATA_SEEN.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            reactor.dispatch_once().unwrap();
        }
        assert_eq!(TIMEOUT_DATA_SEEN.load(Ordering::SeqCst), 0xBEEF);

        reactor
            .set_fd(fd, EventFlags::CLEAR, FdTimeout::Unlimited, std::ptr::null_mut(), on_read)
            .unwrap();
        unsafe { libc::close(fd) };
    }

    #[test]
    fn append_does_not_clobber_the_other_sides_data() {
        let config = RuntimeConfig::default();
        let mut reactor = Reactor::init(true, &config).unwrap();
        let (read_end, _write_end) = nix::unistd::pipe().unwrap();

        let read_marker = 0x1111usize as UserData;
        reactor
            .set_fd(read_end, EventFlags::READ, FdTimeout::Unlimited, read_marker, on_read)
            .unwrap();

        let write_marker = 0x2222usize as UserData;
        reactor
            .set_fd(
                read_end,
                EventFlags::WRITE | EventFlags::APPEND,
                FdTimeout::Unmodified,
                write_marker,
                on_read,
            )
            .unwrap();

        let record = reactor.fds.get(read_end).unwrap();
        assert_eq!(record.read_data, read_marker);
        assert_eq!(record.write_data, write_marker);
        assert!(record.interest.contains(EventFlags::READ | EventFlags::WRITE));

        reactor
            .set_fd(read_end, EventFlags::CLEAR, FdTimeout::Unlimited, std::ptr::null_mut(), on_read)
            .unwrap();
        unsafe { libc::close(read_end) };
    }
}
