use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::queue::JobId;
use crate::render::OutputTarget;

/// What a worker hands the pipeline for one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: JobId,
    pub source_path: PathBuf,
    pub output: OutputTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub output_path: PathBuf,
    pub page_count: usize,
    /// 1-based first page of each rendered chapter, in spine order.
    pub chapter_start_pages: Vec<usize>,
    pub warnings: Vec<String>,
}

/// Cooperative cancellation, checked between pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
