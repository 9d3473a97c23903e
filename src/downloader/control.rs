// Cooperative pause/cancel and the callback context handed to backends
//
// The paused flag and the cancellation token are the only job state changed
// from outside the worker task.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::config::WorkerConfig;
use super::errors::DownloadError;
use super::models::{ConversionPhase, JobEvent, JobState, ProgressSample};
use super::progress::{
    DownloadStatus, ProgressReporter, RawProgress, STATUS_CONVERTING, STATUS_PROCESSING,
    STATUS_READY,
};
use super::traits::ProgressEmitter;

/// What the worker learned about the media
#[derive(Debug, Default, Clone)]
struct Resolved {
    title: Option<String>,
    output_path: Option<PathBuf>,
}

/// Shared flags of one job
#[derive(Debug, Default)]
pub struct JobControl {
    cancel: CancellationToken,
    paused: AtomicBool,
    state: AtomicU8,
    resolved: Mutex<Resolved>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// False once `cancel` was called
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Flip the paused flag, returning the new value
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> JobState {
        match self.state.load(Ordering::SeqCst) {
            0 => JobState::Idle,
            1 if self.is_paused() => JobState::Paused,
            1 => JobState::Running,
            2 => JobState::Completed,
            3 => JobState::Canceled,
            _ => JobState::Errored,
        }
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let raw = match state {
            JobState::Idle => 0,
            JobState::Running | JobState::Paused => 1,
            JobState::Completed => 2,
            JobState::Canceled => 3,
            JobState::Errored => 4,
        };
        self.state.store(raw, Ordering::SeqCst);
    }

    /// Title reported by the title probe
    pub fn title(&self) -> Option<String> {
        self.resolved().title
    }

    /// File the job produced, once it completed
    pub fn output_path(&self) -> Option<PathBuf> {
        self.resolved().output_path
    }

    pub(crate) fn set_title(&self, title: impl Into<String>) {
        self.lock_resolved().title = Some(title.into());
    }

    pub(crate) fn set_output_path(&self, path: PathBuf) {
        self.lock_resolved().output_path = Some(path);
    }

    fn resolved(&self) -> Resolved {
        self.lock_resolved().clone()
    }

    fn lock_resolved(&self) -> std::sync::MutexGuard<'_, Resolved> {
        self.resolved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Callback surface of a running job: progress, phases, log lines, and the
/// pause/cancel checkpoint.
#[derive(Debug)]
pub struct JobContext {
    control: Arc<JobControl>,
    emitter: ProgressEmitter,
    reporter: Mutex<ProgressReporter>,
    poll_interval: Duration,
}

impl JobContext {
    pub fn new(control: Arc<JobControl>, emitter: ProgressEmitter, config: &WorkerConfig) -> Self {
        Self {
            control,
            emitter,
            reporter: Mutex::new(ProgressReporter::new(config.progress_interval)),
            poll_interval: config.pause_poll_interval,
        }
    }

    /// Returns `Canceled` if the job was canceled; blocks while paused.
    pub async fn checkpoint(&self) -> Result<(), DownloadError> {
        if !self.control.is_running() {
            return Err(DownloadError::Canceled);
        }
        while self.control.is_paused() {
            tokio::time::sleep(self.poll_interval).await;
            if !self.control.is_running() {
                return Err(DownloadError::Canceled);
            }
        }
        Ok(())
    }

    /// Download-phase callback
    pub async fn on_progress(&self, raw: &RawProgress) -> Result<(), DownloadError> {
        self.checkpoint().await?;

        match raw.status() {
            DownloadStatus::Downloading => {
                let sample = raw.normalize();
                let ready = self.with_reporter(|r| r.offer(sample, Instant::now()));
                if let Some(sample) = ready {
                    self.emitter.emit(JobEvent::Progress(sample));
                }
            }
            DownloadStatus::Finished => {
                self.flush_pending();
                self.emitter
                    .emit(JobEvent::Progress(ProgressSample::sentinel(STATUS_PROCESSING)));
            }
            DownloadStatus::Other => {}
        }
        Ok(())
    }

    /// Post-processing callback; never throttled
    pub fn on_conversion(&self, phase: ConversionPhase) {
        self.flush_pending();
        self.emitter.emit(JobEvent::Conversion(phase));
        let status = match phase {
            ConversionPhase::Started => STATUS_CONVERTING,
            ConversionPhase::Finished => STATUS_READY,
        };
        self.emitter
            .emit(JobEvent::Progress(ProgressSample::sentinel(status)));
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emitter.log(message);
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// How often a paused job rechecks its flags
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Resolves when the job is canceled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.control.token().cancelled()
    }

    /// Emit the most recent sample the throttle held back
    pub fn flush_pending(&self) {
        if let Some(sample) = self.with_reporter(ProgressReporter::take_pending) {
            self.emitter.emit(JobEvent::Progress(sample));
        }
    }

    fn with_reporter<T>(&self, f: impl FnOnce(&mut ProgressReporter) -> T) -> T {
        let mut guard = self.reporter.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}
