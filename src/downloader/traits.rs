// Extraction backend trait and the parameters every backend receives

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

use super::control::JobContext;
use super::cookies::CookieConfig;
use super::errors::DownloadError;
use super::format_selector::{FormatSelector, PostProcessing, FALLBACK_FORMAT};
use super::models::{JobEvent, JobRequest, MediaKind};

/// Everything a backend needs to run one extraction attempt
#[derive(Debug, Clone)]
pub struct ExtractionParams {
    pub url: String,
    pub kind: MediaKind,
    pub output_dir: PathBuf,
    /// `<output_dir>/%(title)s.%(ext)s`
    pub output_template: String,
    pub format: String,
    /// Container to merge separate video/audio streams into
    pub merge_output_format: Option<String>,
    pub post_processing: Option<PostProcessing>,
    pub cookies: CookieConfig,
}

impl ExtractionParams {
    pub fn new(request: &JobRequest, cookies: CookieConfig, audio_quality: &str) -> Self {
        let merge_output_format = match request.kind {
            MediaKind::Video if !request.video_format.is_empty() => {
                Some(request.video_format.clone())
            }
            _ => None,
        };

        Self {
            url: request.url.clone(),
            kind: request.kind,
            output_dir: request.output_dir.clone(),
            output_template: request
                .output_dir
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
                .to_string(),
            format: FormatSelector::for_request(request),
            merge_output_format,
            post_processing: PostProcessing::for_request(request, audio_quality),
            cookies,
        }
    }

    /// Same request with the unconstrained `best` selector
    pub fn relaxed(&self) -> Self {
        Self {
            format: FALLBACK_FORMAT.to_string(),
            ..self.clone()
        }
    }
}

/// What a successful extraction produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    /// Final file, if the backend could determine it
    pub output_path: Option<PathBuf>,
}

/// A way of running yt-dlp: spawned executable or the Python library.
///
/// Backends report progress through the `JobContext` and must return
/// `DownloadError::Canceled` as soon as a context call does.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Title of the media without downloading it
    async fn probe_title(&self, params: &ExtractionParams) -> Result<Option<String>, DownloadError>;

    /// Download and post-process
    async fn run_extraction(
        &self,
        params: &ExtractionParams,
        ctx: &JobContext,
    ) -> Result<ExtractionOutcome, DownloadError>;

    /// Available formats, one human-readable line each (diagnostics only)
    async fn list_formats(&self, params: &ExtractionParams) -> Result<Vec<String>, DownloadError>;
}

/// Event sink of one job
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: UnboundedSender<JobEvent>,
}

impl ProgressEmitter {
    pub fn new(tx: UnboundedSender<JobEvent>) -> Self {
        Self { tx }
    }

    /// Send an event; a dropped receiver is not an error for the job
    pub fn emit(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[Job] {}", message);
        self.emit(JobEvent::Log(message));
    }
}
