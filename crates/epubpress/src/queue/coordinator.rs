use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::error::{ConversionError, QueueError};
use crate::pipeline::{CancelFlag, JobOutcome, JobRequest, Pipeline, PipelineConfig};
use crate::render::OutputTarget;

use super::destination::{resolve_output, CollisionPolicy, DestinationPolicy};
use super::job::{ConversionJob, JobId, JobStatus, QueueSummary};
use super::worker::run_worker;

/// Builds one pipeline per worker; called again after a worker recovers
/// from a panic.
pub type PipelineFactory = Arc<dyn Fn() -> Pipeline + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    pub worker_count: usize,
    pub destination: DestinationPolicy,
    pub collision: CollisionPolicy,
    /// Capacity of the event channel; slow subscribers lag past it.
    pub event_capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            worker_count: crate::config::default_worker_count(),
            destination: DestinationPolicy::default(),
            collision: CollisionPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl QueueOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            destination: config.output.destination.clone(),
            collision: config.output.on_collision,
            ..Self::default()
        }
    }
}

struct JobEntry {
    job: ConversionJob,
    cancel: CancelFlag,
}

struct QueueState {
    /// Insertion order is display order.
    jobs: Vec<JobEntry>,
    destination: DestinationPolicy,
    collision: CollisionPolicy,
}

impl QueueState {
    fn entry(&self, id: JobId) -> Option<&JobEntry> {
        self.jobs.iter().find(|e| e.job.id == id)
    }

    fn entry_mut(&mut self, id: JobId) -> Option<&mut JobEntry> {
        self.jobs.iter_mut().find(|e| e.job.id == id)
    }

    /// The live job already writing to `path`, if any.
    fn live_output(&self, path: &Path) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|e| e.job.status.is_live() && e.job.output_path == path)
            .map(|e| e.job.id)
    }

    fn summary(&self) -> QueueSummary {
        self.jobs.iter().map(|e| &e.job).collect()
    }
}

/// State shared between the queue handle and its workers. Every job
/// mutation happens under `state`.
pub(crate) struct Shared {
    state: Mutex<QueueState>,
    idle: Condvar,
    events: JobProgressBroadcaster,
    shutdown: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Moves a pending job to Running. `None` when it was cancelled or
    /// removed while waiting.
    pub(crate) fn start(&self, id: JobId) -> Option<(JobRequest, CancelFlag)> {
        let mut state = self.lock();
        let entry = state.entry_mut(id)?;
        if entry.job.status != JobStatus::Pending {
            return None;
        }
        entry.job.start();
        self.events
            .send(JobProgressEvent::from_job(JobPhase::Started, &entry.job));

        let request = JobRequest {
            id,
            source_path: entry.job.source_path.clone(),
            output: OutputTarget {
                path: entry.job.output_path.clone(),
                overwrite: entry.job.overwrite,
            },
        };
        Some((request, entry.cancel.clone()))
    }

    pub(crate) fn update_progress(&self, id: JobId, progress: f32, message: String) {
        let mut state = self.lock();
        if let Some(entry) = state.entry_mut(id) {
            entry.job.progress = progress.clamp(0.0, 1.0);
            entry.job.message = message;
            self.events
                .send(JobProgressEvent::from_job(JobPhase::Progress, &entry.job));
        }
    }

    pub(crate) fn add_warning(&self, id: JobId, warning: String) {
        let mut state = self.lock();
        if let Some(entry) = state.entry_mut(id) {
            self.events
                .send(JobProgressEvent::warning(&entry.job, &warning));
            entry.job.warnings.push(warning);
        }
    }

    pub(crate) fn finish(&self, id: JobId, result: Result<JobOutcome, ConversionError>) {
        let mut state = self.lock();
        match state.entry_mut(id) {
            Some(entry) => {
                let phase = match result {
                    Ok(outcome) => {
                        info!(
                            "Job {} succeeded: {} pages",
                            id, outcome.page_count
                        );
                        entry.job.succeed(outcome.page_count, outcome.warnings);
                        JobPhase::Succeeded
                    }
                    Err(e) => {
                        warn!("Job {} failed: {}", id, e);
                        entry.job.fail(&e);
                        JobPhase::Failed
                    }
                };
                self.events
                    .send(JobProgressEvent::from_job(phase, &entry.job));
            }
            None => error!("Finished job {} is no longer in the queue", id),
        }
        self.idle.notify_all();
    }
}

/// Ordered collection of conversion jobs processed by a fixed pool of
/// worker threads. Jobs start in FIFO order and at most `worker_count`
/// run at once. The queue lives in memory only.
pub struct ConversionQueue {
    shared: Arc<Shared>,
    sender: Option<Sender<JobId>>,
    workers: Vec<JoinHandle<()>>,
}

impl ConversionQueue {
    pub fn from_config(config: &Config) -> Result<Self, QueueError> {
        Self::new(
            QueueOptions::from_config(config),
            PipelineConfig::from_config(config),
        )
    }

    pub fn new(options: QueueOptions, pipeline: PipelineConfig) -> Result<Self, QueueError> {
        let pipeline = Arc::new(pipeline);
        let factory: PipelineFactory =
            Arc::new(move || Pipeline::from_config(Arc::clone(&pipeline)));
        Self::with_pipeline_factory(options, factory)
    }

    pub fn with_pipeline_factory(
        options: QueueOptions,
        factory: PipelineFactory,
    ) -> Result<Self, QueueError> {
        let worker_count = options.worker_count.max(1);
        let (sender, receiver) = unbounded::<JobId>();

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: Vec::new(),
                destination: options.destination,
                collision: options.collision,
            }),
            idle: Condvar::new(),
            events: JobProgressBroadcaster::new(options.event_capacity),
            shutdown: AtomicBool::new(false),
        });

        let mut queue = Self {
            shared,
            sender: Some(sender),
            workers: Vec::with_capacity(worker_count),
        };

        for worker_id in 0..worker_count {
            let job_rx = receiver.clone();
            let worker_shared = Arc::clone(&queue.shared);
            let worker_factory = Arc::clone(&factory);

            // On error the partially built queue is dropped, which stops
            // the workers spawned so far.
            let handle = thread::Builder::new()
                .name(format!("epubpress-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, worker_shared, worker_factory))
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;
            queue.workers.push(handle);
        }

        info!("Started {} workers", worker_count);
        Ok(queue)
    }

    /// Enqueues `source` using the current destination policy.
    pub fn enqueue(&self, source: impl AsRef<Path>) -> Result<JobId, QueueError> {
        let destination = self.shared.lock().destination.clone();
        self.enqueue_with_policy(source, &destination)
    }

    pub fn enqueue_with_policy(
        &self,
        source: impl AsRef<Path>,
        destination: &DestinationPolicy,
    ) -> Result<JobId, QueueError> {
        if self.shared.is_shut_down() {
            return Err(QueueError::ShutDown);
        }
        let source: PathBuf = source.as_ref().to_path_buf();

        let mut state = self.shared.lock();
        let (output, overwrite) = resolve_output(&source, destination, state.collision, |p| {
            state.live_output(p).is_some()
        })?;
        if let Some(existing) = state.live_output(&output) {
            return Err(QueueError::OutputConflict {
                path: output,
                existing,
            });
        }

        let job = ConversionJob::new(source, output, overwrite);
        debug!(
            "Enqueued {} as job {} -> {}",
            job.filename(),
            job.id,
            job.output_path.display()
        );
        self.push(&mut state, job)
    }

    /// Removes a pending or finished job. Running jobs stay.
    pub fn remove(&self, id: JobId) -> bool {
        let mut state = self.shared.lock();
        let Some(position) = state.jobs.iter().position(|e| e.job.id == id) else {
            return false;
        };
        if state.jobs[position].job.status == JobStatus::Running {
            return false;
        }
        let entry = state.jobs.remove(position);
        entry.cancel.cancel();
        self.shared
            .events
            .send(JobProgressEvent::from_job(JobPhase::Removed, &entry.job));
        self.shared.idle.notify_all();
        true
    }

    /// Removes all succeeded and failed jobs; returns how many.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.shared.lock();
        let (finished, live): (Vec<_>, Vec<_>) = std::mem::take(&mut state.jobs)
            .into_iter()
            .partition(|e| e.job.status.is_terminal());
        state.jobs = live;
        for entry in &finished {
            self.shared
                .events
                .send(JobProgressEvent::from_job(JobPhase::Removed, &entry.job));
        }
        finished.len()
    }

    /// Pending jobs fail as cancelled at once; running jobs stop at their
    /// next stage boundary.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.shared.lock();
        let Some(entry) = state.entry_mut(id) else {
            return false;
        };
        match entry.job.status {
            JobStatus::Pending => {
                entry.cancel.cancel();
                entry.job.fail(&ConversionError::Cancelled);
                self.shared
                    .events
                    .send(JobProgressEvent::from_job(JobPhase::Failed, &entry.job));
                self.shared.idle.notify_all();
                true
            }
            JobStatus::Running => {
                entry.cancel.cancel();
                entry.job.message = "Cancelling".to_string();
                self.shared
                    .events
                    .send(JobProgressEvent::from_job(JobPhase::Progress, &entry.job));
                true
            }
            JobStatus::Succeeded | JobStatus::Failed => false,
        }
    }

    /// Enqueues a fresh job for the source and output of a finished one.
    /// The original stays in the queue.
    pub fn retry(&self, id: JobId) -> Result<JobId, QueueError> {
        if self.shared.is_shut_down() {
            return Err(QueueError::ShutDown);
        }
        let mut state = self.shared.lock();
        let original = state.entry(id).ok_or(QueueError::UnknownJob(id))?;
        if !original.job.status.is_terminal() {
            return Err(QueueError::NotTerminal(id));
        }
        let job = original.job.retry();
        if let Some(existing) = state.live_output(&job.output_path) {
            return Err(QueueError::OutputConflict {
                path: job.output_path,
                existing,
            });
        }
        debug!("Retrying job {} as {}", id, job.id);
        self.push(&mut state, job)
    }

    fn push(&self, state: &mut QueueState, job: ConversionJob) -> Result<JobId, QueueError> {
        let sender = self.sender.as_ref().ok_or(QueueError::ShutDown)?;
        let id = job.id;
        self.shared
            .events
            .send(JobProgressEvent::from_job(JobPhase::Queued, &job));
        state.jobs.push(JobEntry {
            job,
            cancel: CancelFlag::new(),
        });
        // Workers block on the state lock we hold until the job is in place.
        if sender.send(id).is_err() {
            state.jobs.pop();
            return Err(QueueError::ShutDown);
        }
        Ok(id)
    }

    pub fn snapshot(&self) -> Vec<ConversionJob> {
        self.shared.lock().jobs.iter().map(|e| e.job.clone()).collect()
    }

    pub fn job(&self, id: JobId) -> Option<ConversionJob> {
        self.shared.lock().entry(id).map(|e| e.job.clone())
    }

    pub fn summary(&self) -> QueueSummary {
        self.shared.lock().summary()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.shared.events.subscribe()
    }

    /// Applies to jobs enqueued from now on.
    pub fn set_destination_policy(&self, destination: DestinationPolicy) {
        self.shared.lock().destination = destination;
    }

    pub fn destination_policy(&self) -> DestinationPolicy {
        self.shared.lock().destination.clone()
    }

    /// Applies to jobs enqueued from now on.
    pub fn set_collision_policy(&self, collision: CollisionPolicy) {
        self.shared.lock().collision = collision;
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until no job is pending or running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (_state, result) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| !s.summary().is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Stops the workers. Pending jobs fail as cancelled; running jobs are
    /// asked to stop and awaited.
    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("Shutting down conversion queue...");

        {
            let mut state = self.shared.lock();
            for entry in state.jobs.iter_mut() {
                match entry.job.status {
                    JobStatus::Pending => {
                        entry.cancel.cancel();
                        entry.job.fail(&ConversionError::Cancelled);
                        self.shared
                            .events
                            .send(JobProgressEvent::from_job(JobPhase::Failed, &entry.job));
                    }
                    JobStatus::Running => entry.cancel.cancel(),
                    JobStatus::Succeeded | JobStatus::Failed => {}
                }
            }
        }

        // Drop sender to signal workers to exit
        self.sender.take();

        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        self.shared.idle.notify_all();

        info!("All workers have stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }
}

impl Drop for ConversionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::Receiver;
    use tempfile::TempDir;

    use crate::epub::{BookExtractor, ExtractedBook};
    use crate::error::ErrorKind;
    use crate::fixtures::EpubFixture;
    use crate::normalize::Normalizer;
    use crate::render::LopdfRenderer;

    const WAIT: Duration = Duration::from_secs(30);

    fn queue(workers: usize) -> ConversionQueue {
        ConversionQueue::new(
            QueueOptions {
                worker_count: workers,
                ..QueueOptions::default()
            },
            PipelineConfig::default(),
        )
        .unwrap()
    }

    fn book(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        EpubFixture::new(name).chapter("<p>text</p>").write_to(&path);
        path
    }

    #[test]
    fn test_queue_creation_and_shutdown() {
        let mut queue = queue(2);
        assert_eq!(queue.worker_count(), 2);
        assert!(!queue.is_shut_down());
        queue.shutdown();
        assert!(queue.is_shut_down());
        assert!(matches!(
            queue.enqueue("/tmp/a.epub"),
            Err(QueueError::ShutDown)
        ));
    }

    #[test]
    fn test_enqueue_and_convert() {
        let dir = TempDir::new().unwrap();
        let queue = queue(1);
        let mut events = queue.subscribe();

        let id = queue.enqueue(book(dir.path(), "one.epub")).unwrap();
        assert!(queue.wait_idle(WAIT));

        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);
        assert_eq!(job.output_path, dir.path().join("one.pdf"));
        assert!(job.output_path.exists());
        assert_eq!(job.progress, 1.0);

        let first = events.try_recv().unwrap();
        assert_eq!(first.phase, JobPhase::Queued);
        let mut last = first;
        while let Ok(event) = events.try_recv() {
            last = event;
        }
        assert_eq!(last.phase, JobPhase::Succeeded);
    }

    #[test]
    fn test_missing_file_fails_job() {
        let dir = TempDir::new().unwrap();
        let queue = queue(1);
        let id = queue.enqueue(dir.path().join("absent.epub")).unwrap();
        assert!(queue.wait_idle(WAIT));

        let job = queue.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn test_output_conflict_between_live_jobs() {
        let (queue, release) = gated_queue();

        let first = queue.enqueue("/library/a.epub").unwrap();
        let err = queue
            .enqueue_with_policy(
                "/elsewhere/a.epub",
                &DestinationPolicy::Directory {
                    path: PathBuf::from("/library"),
                },
            )
            .unwrap_err();
        match err {
            QueueError::OutputConflict { existing, .. } => assert_eq!(existing, first),
            other => panic!("unexpected error: {}", other),
        }
        drop(release);
    }

    #[test]
    fn test_retry_requires_terminal_job() {
        let (queue, release) = gated_queue();

        let _running = queue.enqueue("/library/a.epub").unwrap();
        let id = queue.enqueue("/library/b.epub").unwrap();
        assert!(matches!(queue.retry(id), Err(QueueError::NotTerminal(_))));
        assert!(matches!(
            queue.retry(JobId::new()),
            Err(QueueError::UnknownJob(_))
        ));

        assert!(queue.cancel(id));
        let retry = queue.retry(id).unwrap();
        assert_eq!(queue.job(retry).unwrap().retry_of, Some(id));
        assert_eq!(queue.snapshot().len(), 3);
        drop(release);
    }

    #[test]
    fn test_policy_change_applies_to_new_jobs_only() {
        let (queue, release) = gated_queue();

        let before = queue.enqueue("/library/a.epub").unwrap();
        queue.set_destination_policy(DestinationPolicy::Directory {
            path: PathBuf::from("/out"),
        });
        let after = queue.enqueue("/library/b.epub").unwrap();

        assert_eq!(
            queue.job(before).unwrap().output_path,
            PathBuf::from("/library/a.pdf")
        );
        assert_eq!(
            queue.job(after).unwrap().output_path,
            PathBuf::from("/out/b.pdf")
        );
        drop(release);
    }

    #[test]
    fn test_shutdown_reports_pending_jobs_as_failed() {
        let (mut queue, release) = gated_queue();
        let mut events = queue.subscribe();

        let running = queue.enqueue("/library/a.epub").unwrap();
        let pending = queue.enqueue("/library/b.epub").unwrap();
        while queue.job(running).unwrap().status != JobStatus::Running {
            std::thread::sleep(Duration::from_millis(5));
        }

        // The gate opens only after shutdown has claimed the pending job.
        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(release);
        });
        queue.shutdown();
        opener.join().unwrap();

        let job = queue.job(pending).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);

        let mut pending_phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.job_id == pending {
                pending_phases.push(event.phase);
            }
        }
        assert_eq!(pending_phases, vec![JobPhase::Queued, JobPhase::Failed]);
    }

    /// Blocks in `extract` until released, then fails.
    struct GatedExtractor(Receiver<()>);

    impl BookExtractor for GatedExtractor {
        fn extract(&self, _path: &Path) -> Result<ExtractedBook, ConversionError> {
            let _ = self.0.recv_timeout(Duration::from_secs(5));
            Err(ConversionError::malformed("gated"))
        }
    }

    /// One worker whose first job stays Running until the sender drops.
    fn gated_queue() -> (ConversionQueue, crossbeam_channel::Sender<()>) {
        let (release, gate) = crossbeam_channel::unbounded::<()>();
        let factory: PipelineFactory = Arc::new(move || {
            Pipeline::new(
                Box::new(GatedExtractor(gate.clone())),
                Normalizer::new(),
                Box::new(LopdfRenderer::default()),
            )
        });
        let queue = ConversionQueue::with_pipeline_factory(
            QueueOptions {
                worker_count: 1,
                ..QueueOptions::default()
            },
            factory,
        )
        .unwrap();
        (queue, release)
    }
}
