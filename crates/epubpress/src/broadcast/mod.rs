//! Broadcasting of queue events to the presentation layer.

pub mod job_progress;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
