//! The conversion queue: job records, output resolution and the worker pool.

pub mod coordinator;
pub mod destination;
pub mod job;
mod worker;

pub use coordinator::{ConversionQueue, PipelineFactory, QueueOptions};
pub use destination::{resolve_output, CollisionPolicy, DestinationPolicy};
pub use job::{ConversionJob, JobError, JobId, JobStatus, QueueSummary};
