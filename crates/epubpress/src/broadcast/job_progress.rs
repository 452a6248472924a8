//! Job progress broadcaster for real-time queue updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::{ConversionJob, JobError, JobId, JobStatus};

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Started,
    Progress,
    Warning,
    Succeeded,
    Failed,
    Removed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Started => write!(f, "Started"),
            JobPhase::Progress => write!(f, "Progress"),
            JobPhase::Warning => write!(f, "Warning"),
            JobPhase::Succeeded => write!(f, "Succeeded"),
            JobPhase::Failed => write!(f, "Failed"),
            JobPhase::Removed => write!(f, "Removed"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: JobId,
    /// Source file name, without its directory.
    pub filename: String,
    pub phase: JobPhase,
    /// Job status after this event.
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobProgressEvent {
    /// Describes `job` as it is right now.
    pub fn from_job(phase: JobPhase, job: &ConversionJob) -> Self {
        Self {
            job_id: job.id,
            filename: job.filename(),
            phase,
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            timestamp: Utc::now(),
            output_path: (job.status == JobStatus::Succeeded)
                .then(|| job.output_path.display().to_string()),
            error: job.error.clone(),
        }
    }

    pub fn warning(job: &ConversionJob, warning: &str) -> Self {
        Self {
            message: warning.to_string(),
            ..Self::from_job(JobPhase::Warning, job)
        }
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::error::ConversionError;
    use crate::render::OverwriteRule;

    fn job() -> ConversionJob {
        ConversionJob::new(
            PathBuf::from("/library/emma.epub"),
            PathBuf::from("/library/emma.pdf"),
            OverwriteRule::OwnOutputOnly,
        )
    }

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.receiver_count(), 1);

        let job = job();
        broadcaster.send(JobProgressEvent::from_job(JobPhase::Queued, &job));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, job.id);
        assert_eq!(received.filename, "emma.epub");
        assert_eq!(received.phase, JobPhase::Queued);
        assert_eq!(received.status, JobStatus::Pending);
        assert!(received.output_path.is_none());
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::from_job(JobPhase::Queued, &job()));
    }

    #[test]
    fn test_completion_carries_output_path() {
        let mut job = job();
        job.succeed(12, vec![]);
        let event = JobProgressEvent::from_job(JobPhase::Succeeded, &job);
        assert_eq!(event.output_path.as_deref(), Some("/library/emma.pdf"));
        assert_eq!(event.progress, 1.0);
    }

    #[test]
    fn test_failure_carries_error() {
        let mut job = job();
        job.fail(&ConversionError::malformed("not a zip"));
        let event = JobProgressEvent::from_job(JobPhase::Failed, &job);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["error"]["kind"], "malformed_input");
        assert_eq!(json["status"], "failed");
        assert!(json.get("outputPath").is_none());
    }
}
