//! Error taxonomy for the reactor and interpreter core.
//!
//! Each concern in §7 of the design gets its own `snafu`-derived enum so that
//! callers can match on failure category instead of parsing strings.

use std::io;

use snafu::Snafu;

/// Errors raised while registering or modifying reactor interest.
///
/// These are always local: the caller gets an `Err` and the FD table is left
/// untouched.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReactorError {
    #[snafu(display("failed to register fd {fd} with the readiness backend"))]
    Register { fd: i32, source: io::Error },

    #[snafu(display("failed to modify interest for fd {fd}"))]
    Modify { fd: i32, source: io::Error },

    #[snafu(display("failed to remove fd {fd} from the readiness backend"))]
    Deregister { fd: i32, source: io::Error },

    #[snafu(display("failed to install signal handler for signal {signum}"))]
    Signal { signum: i32, source: io::Error },

    #[snafu(display("dispatch() called re-entrantly from inside a handler"))]
    Reentrant,

    #[snafu(display("readiness backend returned a fatal error"))]
    Fatal { source: io::Error },
}

/// Errors raised by the script interpreter while advancing a job.
///
/// These propagate up the evaluation stack via the job's error slot; they
/// never abort the reactor.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum ScriptError {
    #[snafu(display("no operator table entry for {op:?} on type {type_name}"))]
    UnknownOperator { op: String, type_name: &'static str },

    #[snafu(display("undefined symbol '{name}'"))]
    UndefinedSymbol { name: String },

    #[snafu(display("expected {expected} arguments, got {got}"))]
    ArityMismatch { expected: usize, got: usize },

    #[snafu(display("division by zero"))]
    DivisionByZero,

    #[snafu(display("array index {index} out of range (len {len})"))]
    IndexOutOfRange { index: i64, len: usize },

    #[snafu(display("value is not callable"))]
    NotCallable,

    #[snafu(display("too many open files for this job (limit {limit})"))]
    TooManyOpenFiles { limit: usize },
}

/// Errors raised by the host/script message-channel protocol.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum ChannelError {
    #[snafu(display("channel '{name}' already has a pending value in this direction"))]
    AlreadyPending { name: String },

    #[snafu(display("no channel named '{name}' on this job"))]
    NoSuchChannel { name: String },
}
