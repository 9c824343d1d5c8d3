//! Progress reporting abstraction for migration operations

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::events::MigrationEvent;

/// Receives every [`MigrationEvent`] an engine emits
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &MigrationEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(&MigrationEvent) + Send + Sync,
{
    fn report(&self, event: &MigrationEvent) {
        self(event)
    }
}

/// Writes events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter;

impl ProgressReporter for LoggingReporter {
    fn report(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::StatusChanged { from, to } => {
                info!("[Progress] Status: {} -> {}", from, to);
            }
            MigrationEvent::StepBegun { step } => {
                info!("[Progress] {}", step.describe());
            }
            MigrationEvent::BlobPassStarted { pass, missing } => {
                info!("[Progress] Blob pass {}: {} blobs missing", pass, missing);
            }
            MigrationEvent::BlobProgress(progress) => {
                debug!(
                    "[Progress] Blob Progress: {}/{} blobs ({}% complete, ~{}s left)",
                    progress.processed, progress.total, progress.percent, progress.eta_seconds
                );
            }
            MigrationEvent::BlobFailed { cid, error } => {
                warn!("[Progress] Blob failed: {} - {}", cid, error);
            }
            MigrationEvent::Warning { message } => {
                warn!("[Progress] Warning: {}", message);
            }
            MigrationEvent::Error { message } => {
                error!("[Progress] Migration Error: {}", message);
            }
            MigrationEvent::Completed => {
                info!("[Progress] Migration completed successfully");
            }
        }
    }
}

/// Forwards events to several reporters in order
#[derive(Default, Clone)]
pub struct CompositeReporter {
    reporters: Vec<Arc<dyn ProgressReporter>>,
}

impl CompositeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl ProgressReporter for CompositeReporter {
    fn report(&self, event: &MigrationEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn composite_forwards_to_every_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            move |event: &MigrationEvent| seen.lock().unwrap().push(("first", event.clone()))
        };
        let second = {
            let seen = seen.clone();
            move |event: &MigrationEvent| seen.lock().unwrap().push(("second", event.clone()))
        };

        let composite = CompositeReporter::new()
            .with(Arc::new(first))
            .with(Arc::new(LoggingReporter))
            .with(Arc::new(second));
        composite.report(&MigrationEvent::Completed);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "first");
        assert_eq!(seen[1].0, "second");
    }
}
