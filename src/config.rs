//! Runtime tunables.
//!
//! The base design leaves `step`, the heartbeat period, and the open-file
//! bound as build-time constants. We collect them in one struct so an
//! embedder can override them before constructing a [`crate::runtime::Runtime`].

use std::time::Duration;

/// Tunables for one [`crate::runtime::Runtime`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of stack-node step units a job gets per driver activation.
    pub step: u32,
    /// Upper bound on how long `dispatch` blocks between heartbeats, used to
    /// preempt long-running scripted jobs.
    pub heartbeat: Duration,
    /// Per-job bound on simultaneously open files (M_LANG_MAX_OPENFILE).
    pub max_open_files: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            step: 64,
            heartbeat: Duration::from_millis(100),
            max_open_files: 64,
        }
    }
}
