// Backend and worker configuration
//
// Tool paths are resolved once by the application and injected into the
// backend selector, so workers can be driven with fake paths in tests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::tools::{python_has_module, ToolManager};

/// Where the extraction backends live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Local yt-dlp executable (preferred backend when it exists)
    pub extractor_exe: Option<PathBuf>,
    /// Python interpreter that can `import yt_dlp`; `None` if the library is missing
    pub python: Option<String>,
    /// Directory holding ffmpeg; prepended to PATH of spawned extractors
    pub transcoder_dir: Option<PathBuf>,
    /// Timeout for `--get-title` style probes
    pub title_timeout_secs: u64,
    /// Timeout for diagnostic format listing
    pub list_formats_timeout_secs: u64,
    /// Timeout for the file-based cookie export
    pub cookie_export_timeout_secs: u64,
    /// Audio bitrate passed to audio extraction (kbps)
    pub audio_quality: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            extractor_exe: None,
            python: None,
            transcoder_dir: None,
            title_timeout_secs: 15,
            list_formats_timeout_secs: 60,
            cookie_export_timeout_secs: 30,
            audio_quality: "192".to_string(),
        }
    }
}

impl BackendConfig {
    /// Resolve tools relative to the application folder.
    ///
    /// Environment overrides: `YTDLP_EXE` (executable), `YTDLP_PYTHON`
    /// (interpreter, e.g. a venv), `FFMPEG_BIN` (ffmpeg directory).
    pub fn detect(base_dir: &Path) -> Self {
        let manager = ToolManager::new(base_dir);
        let status = manager.status();

        let extractor_exe = std::env::var_os("YTDLP_EXE")
            .map(PathBuf::from)
            .or(status.extractor);

        let python_cmd = python_cmd();
        let python = if python_has_module(&python_cmd, "yt_dlp") {
            Some(python_cmd)
        } else {
            log::info!("[Config] Python module yt_dlp is not installed, library backend disabled");
            None
        };

        let transcoder_dir = std::env::var_os("FFMPEG_BIN")
            .map(PathBuf::from)
            .or_else(|| status.transcoder.and_then(|p| p.parent().map(Path::to_path_buf)));

        log::info!(
            "[Config] extractor={:?} python={:?} transcoder_dir={:?}",
            extractor_exe,
            python,
            transcoder_dir
        );

        Self {
            extractor_exe,
            python,
            transcoder_dir,
            ..Self::default()
        }
    }

    pub fn with_extractor_exe(mut self, path: Option<PathBuf>) -> Self {
        self.extractor_exe = path;
        self
    }

    pub fn with_python(mut self, python: Option<String>) -> Self {
        self.python = python;
        self
    }

    pub fn with_transcoder_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.transcoder_dir = dir;
        self
    }

    pub fn with_audio_quality(mut self, quality: impl Into<String>) -> Self {
        self.audio_quality = quality.into();
        self
    }
}

/// Python interpreter to drive yt_dlp with; `YTDLP_PYTHON` overrides
pub fn python_cmd() -> String {
    std::env::var("YTDLP_PYTHON").unwrap_or_else(|_| "python3".to_string())
}

/// Timing knobs of a job worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Minimum spacing between downloading-phase progress events
    pub progress_interval: Duration,
    /// Sleep increment of the pause loop
    pub pause_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(200),
            pause_poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }
}
