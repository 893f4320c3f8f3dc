//! Named per-job message channels between host and script (§4.5).

use std::cell::RefCell;
use std::rc::Rc;

use snafu::ensure;

use crate::error::{AlreadyPendingSnafu, ChannelError};
use crate::value::Value;

pub type HostHandler = fn(channel: &str, value: &Value);

/// One named channel. Each direction is a single-slot buffer: at most one
/// outstanding value may wait to be read at any time.
pub struct MessageChannel {
    pub name: Rc<str>,
    script_to_host: RefCell<Option<Value>>,
    host_to_script: RefCell<Option<Value>>,
    pub host_handler: Option<HostHandler>,
    read_pending: RefCell<bool>,
}

impl MessageChannel {
    pub fn new(name: impl Into<Rc<str>>, host_handler: Option<HostHandler>) -> Self {
        Self {
            name: name.into(),
            script_to_host: RefCell::new(None),
            host_to_script: RefCell::new(None),
            host_handler,
            read_pending: RefCell::new(false),
        }
    }

    /// Script posts a value for the host. Fails if a prior value from the
    /// script side hasn't been drained yet.
    pub fn send_from_script(&self, value: Value) -> Result<(), ChannelError> {
        let mut slot = self.script_to_host.borrow_mut();
        ensure!(slot.is_none(), AlreadyPendingSnafu { name: self.name.to_string() });
        *slot = Some(value);
        if let Some(handler) = self.host_handler {
            let v = slot.clone().unwrap();
            drop(slot);
            handler(&self.name, &v);
        }
        Ok(())
    }

    pub fn take_for_host(&self) -> Option<Value> {
        self.script_to_host.borrow_mut().take()
    }

    /// Host posts a value for the script, re-queuing whichever job reads it.
    pub fn send_from_host(&self, value: Value) -> Result<(), ChannelError> {
        let mut slot = self.host_to_script.borrow_mut();
        ensure!(slot.is_none(), AlreadyPendingSnafu { name: self.name.to_string() });
        *slot = Some(value);
        Ok(())
    }

    /// Script attempts to read. `None` means the job should block until a
    /// value arrives.
    pub fn try_read_for_script(&self) -> Option<Value> {
        let value = self.host_to_script.borrow_mut().take();
        *self.read_pending.borrow_mut() = value.is_none();
        value
    }

    pub fn is_read_pending(&self) -> bool {
        *self.read_pending.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_outstanding_value_per_direction() {
        let chan = MessageChannel::new("c", None);
        chan.send_from_script(Value::Int(1)).unwrap();
        let err = chan.send_from_script(Value::Int(2)).unwrap_err();
        assert_eq!(err, ChannelError::AlreadyPending { name: "c".to_string() });
        assert_eq!(chan.take_for_host().unwrap().to_int(), 1);
        chan.send_from_script(Value::Int(3)).unwrap();
        assert_eq!(chan.take_for_host().unwrap().to_int(), 3);
    }

    #[test]
    fn script_read_on_empty_channel_marks_pending() {
        let chan = MessageChannel::new("c", None);
        assert!(chan.try_read_for_script().is_none());
        assert!(chan.is_read_pending());
        chan.send_from_host(Value::Int(7)).unwrap();
        assert_eq!(chan.try_read_for_script().unwrap().to_int(), 7);
        assert!(!chan.is_read_pending());
    }
}
