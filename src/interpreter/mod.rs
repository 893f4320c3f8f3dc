//! The cooperative tree-walking interpreter: job state, per-node dispatch,
//! and the budgeted driver loop that ties them together (§3, §4.3).

pub mod dispatch;
pub mod driver;
pub mod job;

pub use driver::{drive, StepOutcome};
pub use job::{Job, JobState};
