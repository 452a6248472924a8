pub mod broadcast;
pub mod config;
mod entities;
pub mod epub;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod sanitize;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod fixtures;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_config_from_str, Config};
pub use epub::{BookExtractor, EpubExtractor, ExtractedBook};
pub use error::{
    ConfigError, ConversionError, EpubpressError, ErrorKind, FontError, QueueError, Result,
    TelemetryError,
};
pub use normalize::{NormalizedChapter, Normalizer};
pub use pipeline::{Pipeline, PipelineConfig};
pub use queue::{
    CollisionPolicy, ConversionJob, ConversionQueue, DestinationPolicy, JobId, JobStatus,
    QueueOptions, QueueSummary,
};
pub use render::{FontSource, LopdfRenderer, PdfRenderer};
pub use telemetry::init_tracing;
