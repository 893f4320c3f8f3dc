//! Per-descriptor interest records.
//!
//! Invariant (§3): a descriptor is present in the table iff it has at least
//! one of `READ`/`WRITE` set in its interest bits.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::time::Instant;

use bitflags::bitflags;

bitflags! {
    /// Interest bits for a watched fd. Orthogonal and combinable by OR,
    /// except `CLEAR` which takes precedence over everything else.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const READ     = 0b0000_0001;
        const WRITE    = 0b0000_0010;
        const ERROR    = 0b0000_0100;
        const ONESHOT  = 0b0000_1000;
        const NONBLOCK = 0b0001_0000;
        const BLOCK    = 0b0010_0000;
        const APPEND   = 0b0100_0000;
        const CLEAR    = 0b1000_0000;
    }
}

/// Opaque user data pointer passed through to handlers untouched.
///
/// Safety: the reactor never dereferences this; it is the caller's
/// responsibility to keep the pointee alive for as long as the interest is
/// registered.
pub type UserData = *mut c_void;

/// A ready/timeout callback. Receives the fd, the user data registered for
/// that side, and the flags that fired.
pub type Handler = fn(fd: i32, data: UserData, flags: EventFlags);

/// What to do with an fd's timeout deadline on a `set_fd` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdTimeout {
    /// Remove any pending timeout entry.
    Unlimited,
    /// Preserve whatever deadline is already scheduled.
    Unmodified,
    /// Schedule a new absolute deadline `now + d`, replacing any prior entry.
    After(std::time::Duration),
}

/// One watched descriptor: interest bits, per-side user data, handlers, and
/// the deadline (if any) backing its fd-timeout entry.
pub struct FdRecord {
    pub fd: i32,
    pub interest: EventFlags,
    pub read_data: UserData,
    pub write_data: UserData,
    pub ready_handler: Handler,
    pub timeout_handler: Option<Handler>,
    /// User data for `timeout_handler`, set independently of `read_data`/
    /// `write_data` since a timeout can fire for a fd registered on either
    /// side (or both).
    pub timeout_data: UserData,
    pub deadline: Option<Instant>,
    /// Handle into the timeout heap, if a deadline is scheduled.
    pub heap_slot: Option<u64>,
}

impl FdRecord {
    /// Data to hand to the handler for `side` (`READ` or `WRITE`).
    pub fn data_for(&self, side: EventFlags) -> UserData {
        if side.contains(EventFlags::WRITE) {
            self.write_data
        } else {
            self.read_data
        }
    }
}

/// The FD Table: descriptor → current record.
#[derive(Default)]
pub struct FdTable {
    records: HashMap<i32, FdRecord>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fd: i32) -> Option<&FdRecord> {
        self.records.get(&fd)
    }

    pub fn get_mut(&mut self, fd: i32) -> Option<&mut FdRecord> {
        self.records.get_mut(&fd)
    }

    pub fn contains(&self, fd: i32) -> bool {
        self.records.contains_key(&fd)
    }

    pub fn insert(&mut self, record: FdRecord) {
        self.records.insert(record.fd, record);
    }

    /// Removes a record entirely (the `CLEAR` path).
    pub fn remove(&mut self, fd: i32) -> Option<FdRecord> {
        self.records.remove(&fd)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FdRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_fd: i32, _data: UserData, _flags: EventFlags) {}

    #[test]
    fn table_presence_follows_read_write_invariant() {
        let mut table = FdTable::new();
        assert!(!table.contains(3));
        table.insert(FdRecord {
            fd: 3,
            interest: EventFlags::READ,
            read_data: std::ptr::null_mut(),
            write_data: std::ptr::null_mut(),
            ready_handler: noop,
            timeout_handler: None,
            timeout_data: std::ptr::null_mut(),
            deadline: None,
            heap_slot: None,
        });
        assert!(table.contains(3));
        table.remove(3);
        assert!(!table.contains(3));
    }

    #[test]
    fn clear_removes_the_whole_record() {
        let mut table = FdTable::new();
        table.insert(FdRecord {
            fd: 5,
            interest: EventFlags::READ | EventFlags::WRITE,
            read_data: std::ptr::null_mut(),
            write_data: std::ptr::null_mut(),
            ready_handler: noop,
            timeout_handler: None,
            timeout_data: std::ptr::null_mut(),
            deadline: None,
            heap_slot: None,
        });
        assert_eq!(table.len(), 1);
        let removed = table.remove(5);
        assert!(removed.is_some());
        assert!(table.is_empty());
    }
}
