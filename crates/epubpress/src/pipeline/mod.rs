pub mod config;
pub mod context;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use context::{CancelFlag, JobOutcome, JobRequest};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::Pipeline;
