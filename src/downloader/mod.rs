// Downloader module - job worker over pluggable yt-dlp backends

pub mod backends;
pub mod config;
pub mod control;
pub mod cookies;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod tools;
pub mod traits;
pub mod utils;
pub mod worker;

pub use backends::{BackendChoice, BackendSelector};
pub use config::{BackendConfig, WorkerConfig};
pub use cookies::{CookieConfig, CookieResolver};
pub use errors::DownloadError;
pub use models::{
    ConversionPhase, CookieSource, JobEvent, JobOutcome, JobRequest, JobState, MediaKind,
    ProgressSample,
};
pub use orchestrator::{DownloadManager, JobKey};
pub use traits::{ExtractionBackend, ExtractionOutcome, ExtractionParams, ProgressEmitter};
pub use worker::{JobController, JobHandle, JobWorker};
