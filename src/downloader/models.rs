// Common data models for the download worker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of media the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "Video"),
            Self::Audio => write!(f, "Audio"),
        }
    }
}

/// Where cookies come from: a browser's local store, or nowhere
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CookieSource {
    #[default]
    Disabled,
    Browser(String),
}

impl FromStr for CookieSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if name.is_empty() || name == "disabled" {
            Ok(Self::Disabled)
        } else {
            Ok(Self::Browser(name))
        }
    }
}

impl fmt::Display for CookieSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Browser(name) => write!(f, "{}", name),
        }
    }
}

/// Immutable input to a job worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    pub kind: MediaKind,
    /// Resolution label such as "720p", or "Original"
    pub resolution: String,
    /// Target container for video (mp4, mkv, webm...)
    pub video_format: String,
    /// Target codec for audio (mp3, m4a, opus...)
    pub audio_format: String,
    pub cookies: CookieSource,
    pub output_dir: PathBuf,
}

impl JobRequest {
    pub fn video(
        url: impl Into<String>,
        resolution: impl Into<String>,
        container: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
            resolution: resolution.into(),
            video_format: container.into(),
            audio_format: String::new(),
            cookies: CookieSource::Disabled,
            output_dir: output_dir.into(),
        }
    }

    pub fn audio(
        url: impl Into<String>,
        codec: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Audio,
            resolution: String::new(),
            video_format: String::new(),
            audio_format: codec.into(),
            cookies: CookieSource::Disabled,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_cookies(mut self, source: CookieSource) -> Self {
        self.cookies = source;
        self
    }

    /// Container or codec the result is converted into
    pub fn target_format(&self) -> &str {
        match self.kind {
            MediaKind::Video => &self.video_format,
            MediaKind::Audio => &self.audio_format,
        }
    }
}

impl Default for JobRequest {
    fn default() -> Self {
        Self::video(
            "",
            "Original",
            "mp4",
            dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
        )
    }
}

/// One normalized progress tuple as shown next to a download item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub percent: f32,
    pub speed: String,
    pub size: String,
    pub eta: String,
}

impl ProgressSample {
    /// Fixed 100% tuple used for phase transitions ("Processing...", "Converting...", "Ready")
    pub fn sentinel(status: &str) -> Self {
        Self {
            percent: 100.0,
            speed: "0 B/s".to_string(),
            size: status.to_string(),
            eta: "0:00".to_string(),
        }
    }
}

/// Post-processing (ffmpeg) phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionPhase {
    Started,
    Finished,
}

impl fmt::Display for ConversionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Events emitted by a job worker, in order: title, then progress/log/conversion,
/// then exactly one of `Finished`, `Error` or `Canceled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    Title(String),
    Progress(ProgressSample),
    Conversion(ConversionPhase),
    Log(String),
    /// `None` means the output file could not be located (degraded success)
    Finished(Option<PathBuf>),
    Error(String),
    Canceled,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Error(_) | Self::Canceled)
    }
}

/// Final result of a job, returned when the worker is joined
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Option<PathBuf>),
    Canceled,
    Failed(String),
}

/// Lifecycle state; `Paused` is a sub-state of running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Running,
    Paused,
    Completed,
    Canceled,
    Errored,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Errored)
    }
}

/// Format entry as reported by the yt_dlp library (`info["formats"]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatEntry {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub tbr: Option<f64>,
}

impl FormatEntry {
    /// One diagnostic line: `id - ext - heightp - acodec/vcodec - tbrkbps`
    pub fn describe(&self) -> String {
        format!(
            "{} - {} - {}p - {}/{} - {}kbps",
            self.format_id.as_deref().unwrap_or(""),
            self.ext.as_deref().unwrap_or(""),
            self.height.map(|h| h.to_string()).unwrap_or_default(),
            self.acodec.as_deref().unwrap_or(""),
            self.vcodec.as_deref().unwrap_or(""),
            self.tbr.map(|t| format!("{:.0}", t)).unwrap_or_default(),
        )
    }
}
