use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error};

use crate::error::ConversionError;
use crate::pipeline::{ProgressEvent, ProgressReporter};

use super::coordinator::{PipelineFactory, Shared};
use super::job::JobId;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bridges pipeline events into the queue's job records.
struct QueueProgress<'a> {
    shared: &'a Shared,
    id: JobId,
}

impl ProgressReporter for QueueProgress<'_> {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage { progress, message } => {
                self.shared.update_progress(self.id, progress, message)
            }
            ProgressEvent::Warning(warning) => self.shared.add_warning(self.id, warning),
        }
    }
}

pub(crate) fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<JobId>,
    shared: Arc<Shared>,
    factory: PipelineFactory,
) {
    debug!("Worker {} started", worker_id);

    let mut pipeline = factory();

    loop {
        if shared.is_shut_down() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(id) => {
                let Some((request, cancel)) = shared.start(id) else {
                    debug!("Worker {} skipping job {}: no longer pending", worker_id, id);
                    continue;
                };
                debug!("Worker {} processing job {}", worker_id, id);

                let progress = QueueProgress {
                    shared: &shared,
                    id,
                };
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.run(&request, &cancel, &progress)
                }));

                let result = match result {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("Worker {} panicked on job {}: {}", worker_id, id, message);
                        pipeline = factory();
                        Err(ConversionError::render(format!(
                            "internal error while converting: {}",
                            message
                        )))
                    }
                };

                shared.finish(id, result);
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
