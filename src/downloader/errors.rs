// Error types for the download worker and its backends

use thiserror::Error;

/// Error-message fragments meaning the requested format could not be satisfied
/// but a relaxed `best` request may still succeed.
pub const RECOVERABLE_SIGNATURES: [&str; 3] = [
    "Requested format is not available",
    "Signature extraction failed",
    "Only images are available",
];

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Neither the local yt-dlp executable nor the Python yt_dlp module is usable
    #[error("yt-dlp not available: neither local executable nor Python yt_dlp module found")]
    BackendUnavailable,

    /// The job was canceled by its owner
    #[error("Download canceled")]
    Canceled,

    /// yt-dlp reported a failure while extracting or downloading
    #[error("{0}")]
    Extraction(String),

    /// yt-dlp, python or ffmpeg not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Failed to parse output of a helper process
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Process could not be spawned or awaited
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Helper process exceeded its time budget
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// A job for the same URL and media kind is still in flight
    #[error("Download already in progress: {0}")]
    DuplicateJob(String),
}

impl DownloadError {
    /// True when the failure carries one of the known recoverable signatures.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Canceled | Self::BackendUnavailable | Self::DuplicateJob(_) => false,
            other => matches_recoverable_signature(&other.to_string()),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Check raw tool output for any recoverable failure signature
pub fn matches_recoverable_signature(output: &str) -> bool {
    RECOVERABLE_SIGNATURES.iter().any(|sig| output.contains(sig))
}

impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        // The last ERROR line of multi-line yt-dlp output is the most useful one
        let error_line = s
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("ERROR:"))
            .last()
            .map(|l| l.trim_start_matches("ERROR:").trim().to_string());

        if let Some(message) = error_line {
            return Self::Extraction(message);
        }

        if s.contains("command not found") || s.contains("No such file") {
            return Self::ToolNotFound(s.trim().to_string());
        }

        if s.contains("Invalid JSON") || s.contains("JSON parse") {
            return Self::ParseError(s);
        }

        Self::Extraction(s.trim().to_string())
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::ToolNotFound(e.to_string())
        } else {
            Self::ExecutionError(e.to_string())
        }
    }
}
