/// Events emitted by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Stage { progress: f32, message: String },
    Warning(String),
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Collects events in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingProgress {
    pub events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingProgress {
    pub fn progress_values(&self) -> Vec<f32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Stage { progress, .. } => Some(*progress),
                ProgressEvent::Warning(_) => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Warning(warning) => Some(warning.clone()),
                ProgressEvent::Stage { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
