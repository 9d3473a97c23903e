// Job worker - one download job on its own tokio task
//
// Flow: resolve cookies -> select backend -> probe title -> extract.
// A failure carrying a recoverable signature is retried once with the
// unconstrained `best` selector; any other failure lists the available formats
// into the log and ends the job. Exactly one terminal event is emitted.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use super::backends::BackendSelector;
use super::config::{BackendConfig, WorkerConfig};
use super::control::{JobContext, JobControl};
use super::cookies::CookieResolver;
use super::models::{JobEvent, JobOutcome, JobRequest, JobState};
use super::traits::{ExtractionBackend, ExtractionParams, ProgressEmitter};

/// Starts jobs with a shared backend selector and cookie resolver
#[derive(Clone)]
pub struct JobWorker {
    selector: BackendSelector,
    cookies: CookieResolver,
    config: WorkerConfig,
}

impl JobWorker {
    pub fn new(selector: BackendSelector, cookies: CookieResolver, config: WorkerConfig) -> Self {
        Self {
            selector,
            cookies,
            config,
        }
    }

    pub fn from_config(backend: BackendConfig, config: WorkerConfig) -> Self {
        let cookies = CookieResolver::new(&backend);
        Self::new(BackendSelector::new(backend), cookies, config)
    }

    pub fn with_cookie_resolver(mut self, cookies: CookieResolver) -> Self {
        self.cookies = cookies;
        self
    }

    /// Spawn the job and return immediately. Must be called inside a tokio runtime.
    pub fn start(&self, request: JobRequest) -> JobHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = ProgressEmitter::new(tx);
        let control = Arc::new(JobControl::new());
        let ctx = JobContext::new(control.clone(), emitter.clone(), &self.config);
        control.set_state(JobState::Running);

        log::info!("[Worker] Starting {} job for {}", request.kind, request.url);

        let job = Job {
            selector: self.selector.clone(),
            cookies: self.cookies.clone(),
            request,
            emitter: emitter.clone(),
            control: control.clone(),
            ctx,
        };

        JobHandle {
            controller: JobController { control, emitter },
            events: rx,
            task: tokio::spawn(job.run()),
            terminated: false,
        }
    }
}

struct Job {
    selector: BackendSelector,
    cookies: CookieResolver,
    request: JobRequest,
    emitter: ProgressEmitter,
    control: Arc<JobControl>,
    ctx: JobContext,
}

impl Job {
    async fn run(self) -> JobOutcome {
        let outcome = self.execute().await;

        let (event, state) = match &outcome {
            JobOutcome::Completed(path) => (JobEvent::Finished(path.clone()), JobState::Completed),
            JobOutcome::Canceled => (JobEvent::Canceled, JobState::Canceled),
            JobOutcome::Failed(message) => (JobEvent::Error(message.clone()), JobState::Errored),
        };
        log::info!("[Worker] {} finished: {:?}", self.request.url, outcome);
        if let JobOutcome::Completed(Some(path)) = &outcome {
            self.control.set_output_path(path.clone());
        }
        self.control.set_state(state);
        self.emitter.emit(event);
        outcome
    }

    async fn execute(&self) -> JobOutcome {
        let cookies = self.cookies.resolve(&self.request.cookies, &self.emitter).await;

        let backend = match self.selector.select(&self.emitter) {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("[Worker] {}", e);
                return JobOutcome::Failed(e.to_string());
            }
        };
        log::debug!("[Worker] Using backend {}", backend.name());

        let params = ExtractionParams::new(
            &self.request,
            cookies,
            &self.selector.config().audio_quality,
        );

        let title = tokio::select! {
            _ = self.ctx.cancelled() => return JobOutcome::Canceled,
            title = backend.probe_title(&params) => title,
        };
        match title {
            Ok(Some(title)) => {
                self.control.set_title(title.as_str());
                self.emitter.emit(JobEvent::Title(title));
            }
            Ok(None) => {}
            Err(e) => self.emitter.log(format!("Could not get title: {}", e)),
        }

        if self.ctx.checkpoint().await.is_err() {
            return JobOutcome::Canceled;
        }

        let err = match backend.run_extraction(&params, &self.ctx).await {
            Ok(outcome) => return JobOutcome::Completed(outcome.output_path),
            Err(e) if e.is_canceled() => return JobOutcome::Canceled,
            Err(e) => e,
        };
        self.emitter.log(format!("Download error: {}", err));

        if !err.is_recoverable() {
            self.list_formats(backend.as_ref(), &params).await;
            return JobOutcome::Failed(err.to_string());
        }

        self.emitter.log("Retrying with fallback format: best");
        match backend.run_extraction(&params.relaxed(), &self.ctx).await {
            Ok(outcome) => JobOutcome::Completed(outcome.output_path),
            Err(e) if e.is_canceled() => JobOutcome::Canceled,
            Err(e) => {
                self.emitter.log(format!("Fallback failed: {}", e));
                self.list_formats(backend.as_ref(), &params).await;
                JobOutcome::Failed(e.to_string())
            }
        }
    }

    /// Best-effort diagnostics; never fails the job
    async fn list_formats(&self, backend: &dyn ExtractionBackend, params: &ExtractionParams) {
        self.emitter
            .log(format!("Listing available formats for: {}", params.url));
        let lines = match backend.list_formats(params).await {
            Ok(lines) => lines,
            Err(e) => {
                self.emitter.log(format!("List formats error: {}", e));
                let Some(fallback) = self.selector.listing_fallback(backend) else {
                    return;
                };
                self.emitter
                    .log(format!("Listing formats with {}", fallback.name()));
                match fallback.list_formats(params).await {
                    Ok(lines) => lines,
                    Err(e) => {
                        self.emitter.log(format!("List formats error: {}", e));
                        return;
                    }
                }
            }
        };
        for line in lines {
            self.emitter.log(line);
        }
    }
}

/// Cloneable pause/cancel access to a running job
#[derive(Debug, Clone)]
pub struct JobController {
    control: Arc<JobControl>,
    emitter: ProgressEmitter,
}

impl JobController {
    /// Flip pause; returns whether the job is now paused
    pub fn toggle_pause(&self) -> bool {
        if self.control.state().is_terminal() {
            return false;
        }
        let paused = self.control.toggle_pause();
        self.emitter
            .log(if paused { "Download paused" } else { "Download resumed" });
        paused
    }

    pub fn cancel(&self) {
        if self.control.state().is_terminal() || !self.control.is_running() {
            return;
        }
        self.control.cancel();
        self.emitter.log("Download canceled by user");
    }

    pub fn state(&self) -> JobState {
        self.control.state()
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn title(&self) -> Option<String> {
        self.control.title()
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.control.output_path()
    }
}

/// Owner side of a started job: controls, event stream and join
pub struct JobHandle {
    controller: JobController,
    events: UnboundedReceiver<JobEvent>,
    task: JoinHandle<JobOutcome>,
    terminated: bool,
}

impl JobHandle {
    pub fn controller(&self) -> JobController {
        self.controller.clone()
    }

    pub fn toggle_pause(&self) -> bool {
        self.controller.toggle_pause()
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }

    pub fn state(&self) -> JobState {
        self.controller.state()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Next event; `None` once the terminal event has been delivered
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if self.terminated {
            return None;
        }
        let event = self.events.recv().await?;
        self.terminated = event.is_terminal();
        Some(event)
    }

    /// Wait for the worker task to end
    pub async fn join(self) -> JobOutcome {
        join_task(self.task).await
    }

    pub fn into_parts(
        self,
    ) -> (JobController, UnboundedReceiver<JobEvent>, JoinHandle<JobOutcome>) {
        (self.controller, self.events, self.task)
    }
}

/// Await a job task; a panicked task counts as failed
pub async fn join_task(task: JoinHandle<JobOutcome>) -> JobOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("[Worker] Job task failed: {}", e);
            JobOutcome::Failed(format!("Worker task failed: {}", e))
        }
    }
}
