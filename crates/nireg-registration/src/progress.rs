//! Progress reporting for the registration pipeline.
//!
//! The pipeline reports at stage granularity: start, each finished stage,
//! completion or failure. Iteration-level progress lives inside the external
//! engine and is only visible in its log.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Rigid,
    Affine,
    Output,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Rigid => "rigid",
            Stage::Affine => "affine",
            Stage::Output => "output",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Information about a finished stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageInfo {
    pub stage: Stage,
    /// Time spent in this stage.
    pub stage_elapsed: Duration,
    /// Time since the pipeline started.
    pub total_elapsed: Duration,
    /// Transform named by the stage's parameter map, if any.
    pub transform: Option<String>,
}

/// Callback trait for monitoring a registration task.
pub trait ProgressCallback: Send + Sync {
    /// Called after each stage completes.
    fn on_stage(&self, info: &StageInfo);

    /// Called when the pipeline starts.
    fn on_start(&self) {}

    /// Called when the whole pipeline succeeded.
    fn on_complete(&self, _elapsed: Duration) {}

    /// Called when a stage fails.
    fn on_error(&self, _stage: Stage, _error: &str) {}
}

/// Logs stage events through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct ConsoleProgressCallback {
    /// Label prefixed to every line, e.g. the moving image name in batch runs.
    pub label: Option<String>,
}

impl ConsoleProgressCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    fn prefix(&self) -> String {
        self.label
            .as_ref()
            .map(|l| format!("[{}] ", l))
            .unwrap_or_default()
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_stage(&self, info: &StageInfo) {
        tracing::info!(
            "{}Stage {} done in {:.2}s{} | Elapsed: {:.2}s",
            self.prefix(),
            info.stage,
            info.stage_elapsed.as_secs_f64(),
            info.transform
                .as_ref()
                .map(|t| format!(" ({})", t))
                .unwrap_or_default(),
            info.total_elapsed.as_secs_f64()
        );
    }

    fn on_start(&self) {
        tracing::info!("{}Registration started", self.prefix());
    }

    fn on_complete(&self, elapsed: Duration) {
        tracing::info!(
            "{}Registration completed in {:.2}s",
            self.prefix(),
            elapsed.as_secs_f64()
        );
    }

    fn on_error(&self, stage: Stage, error: &str) {
        tracing::error!("{}Registration failed during {}: {}", self.prefix(), stage, error);
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started,
    StageDone(StageInfo),
    Completed,
    Failed { stage: Stage, error: String },
}

/// Records every event, in order.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, Vec<ProgressEvent>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_history(&self) -> Vec<ProgressEvent> {
        self.events().clone()
    }

    /// Stages that finished, in order.
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StageDone(info) => Some(info.stage),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events().clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_stage(&self, info: &StageInfo) {
        self.events().push(ProgressEvent::StageDone(info.clone()));
    }

    fn on_start(&self) {
        self.events().push(ProgressEvent::Started);
    }

    fn on_complete(&self, _elapsed: Duration) {
        self.events().push(ProgressEvent::Completed);
    }

    fn on_error(&self, stage: Stage, error: &str) {
        self.events().push(ProgressEvent::Failed {
            stage,
            error: error.to_string(),
        });
    }
}

/// Fans events out to the registered callbacks and keeps the clock.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Option<Instant>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("callbacks", &self.callbacks.len())
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Start the clock unless already running.
    pub fn start(&mut self) {
        if self.start_time.is_some() {
            return;
        }
        self.start_time = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    pub fn stage(&self, stage: Stage, stage_elapsed: Duration, transform: Option<&str>) {
        let info = StageInfo {
            stage,
            stage_elapsed,
            total_elapsed: self.elapsed(),
            transform: transform.map(str::to_owned),
        };
        for callback in &self.callbacks {
            callback.on_stage(&info);
        }
    }

    /// Report success and stop the clock.
    pub fn complete(&mut self) {
        let elapsed = self.elapsed();
        for callback in &self.callbacks {
            callback.on_complete(elapsed);
        }
        self.start_time = None;
    }

    /// Report failure and stop the clock.
    pub fn error(&mut self, stage: Stage, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(stage, error);
        }
        self.start_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_callback_records_in_order() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new();
        tracker.add_callback(history.clone());

        tracker.start();
        tracker.stage(Stage::Rigid, Duration::from_millis(5), Some("EulerTransform"));
        tracker.stage(Stage::Affine, Duration::from_millis(5), Some("AffineTransform"));
        tracker.complete();

        let events = history.get_history();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ProgressEvent::Started);
        assert_eq!(events[3], ProgressEvent::Completed);
        assert_eq!(history.completed_stages(), vec![Stage::Rigid, Stage::Affine]);

        match &events[1] {
            ProgressEvent::StageDone(info) => {
                assert_eq!(info.transform.as_deref(), Some("EulerTransform"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new();
        tracker.add_callback(history.clone());

        tracker.start();
        tracker.start();
        assert_eq!(history.get_history(), vec![ProgressEvent::Started]);
    }

    #[test]
    fn test_error_event() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new();
        tracker.add_callback(history.clone());

        tracker.start();
        tracker.error(Stage::Rigid, "boom");
        assert_eq!(
            history.get_history()[1],
            ProgressEvent::Failed {
                stage: Stage::Rigid,
                error: "boom".to_string()
            }
        );
        assert_eq!(tracker.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_console_callback_does_not_panic() {
        let callback = ConsoleProgressCallback::with_label("moving.nii");
        callback.on_start();
        callback.on_stage(&StageInfo {
            stage: Stage::Output,
            stage_elapsed: Duration::ZERO,
            total_elapsed: Duration::ZERO,
            transform: None,
        });
        callback.on_error(Stage::Cleanup, "missing file");
    }
}
