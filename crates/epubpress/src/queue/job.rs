use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConversionError, ErrorKind};
use crate::render::OverwriteRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Pending or running.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ConversionError> for JobError {
    fn from(error: &ConversionError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// One EPUB to convert. Snapshots handed out by the queue are clones.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub id: JobId,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub overwrite: OverwriteRule,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// 0.0 to 1.0, advanced at stage boundaries.
    pub progress: f32,
    pub message: String,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The failed job this one retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<JobId>,
}

impl ConversionJob {
    pub fn new(source_path: PathBuf, output_path: PathBuf, overwrite: OverwriteRule) -> Self {
        Self {
            id: JobId::new(),
            source_path,
            output_path,
            overwrite,
            status: JobStatus::Pending,
            error: None,
            progress: 0.0,
            message: "Waiting".to_string(),
            warnings: Vec::new(),
            page_count: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retry_of: None,
        }
    }

    /// A fresh pending job for the same source and output.
    pub fn retry(&self) -> Self {
        let mut job = Self::new(
            self.source_path.clone(),
            self.output_path.clone(),
            self.overwrite,
        );
        job.retry_of = Some(self.id);
        job
    }

    pub fn filename(&self) -> String {
        crate::sanitize::redact_path(&self.source_path)
    }

    pub(crate) fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.message = "Starting".to_string();
    }

    pub(crate) fn succeed(&mut self, page_count: usize, warnings: Vec<String>) {
        self.status = JobStatus::Succeeded;
        self.progress = 1.0;
        self.page_count = Some(page_count);
        self.message = format!("Converted ({} pages)", page_count);
        self.warnings = warnings;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: &ConversionError) {
        let error = JobError::from(error);
        self.status = JobStatus::Failed;
        self.message = error.kind.to_string();
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

/// Counts by status, for a progress header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl QueueSummary {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

impl<'a> FromIterator<&'a ConversionJob> for QueueSummary {
    fn from_iter<I: IntoIterator<Item = &'a ConversionJob>>(jobs: I) -> Self {
        let mut summary = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Running => summary.running += 1,
                JobStatus::Succeeded => summary.succeeded += 1,
                JobStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}
