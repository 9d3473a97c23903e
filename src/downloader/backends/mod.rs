// Extraction backends and the selection between them

pub mod executable;
pub mod library;

pub use executable::ExecutableBackend;
pub use library::LibraryBackend;

use std::path::PathBuf;
use std::sync::Arc;

use super::config::BackendConfig;
use super::errors::DownloadError;
use super::traits::{ExtractionBackend, ProgressEmitter};

/// Which backend a job will run on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    /// Local yt-dlp executable at this path
    Executable(PathBuf),
    /// yt_dlp library under this interpreter
    Library(String),
}

/// Picks the backend for each job.
///
/// Rule: the local executable if it exists on disk, else the library if the
/// interpreter has it, else `BackendUnavailable`.
#[derive(Clone)]
pub struct BackendSelector {
    config: BackendConfig,
    fixed: Option<Arc<dyn ExtractionBackend>>,
    listing_fallback: Option<Arc<dyn ExtractionBackend>>,
}

impl BackendSelector {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            fixed: None,
            listing_fallback: None,
        }
    }

    /// Always hand out `backend` (embedding, tests)
    pub fn fixed(backend: Arc<dyn ExtractionBackend>) -> Self {
        Self {
            config: BackendConfig::default(),
            fixed: Some(backend),
            listing_fallback: None,
        }
    }

    /// Backend to list formats with when the selected one cannot
    pub fn with_listing_fallback(mut self, backend: Arc<dyn ExtractionBackend>) -> Self {
        self.listing_fallback = Some(backend);
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn choose(&self) -> Result<BackendChoice, DownloadError> {
        if let Some(exe) = self.config.extractor_exe.as_ref().filter(|p| p.exists()) {
            return Ok(BackendChoice::Executable(exe.clone()));
        }
        if let Some(python) = &self.config.python {
            return Ok(BackendChoice::Library(python.clone()));
        }
        Err(DownloadError::BackendUnavailable)
    }

    /// Backend for one job; logs which one was picked
    pub fn select(&self, emitter: &ProgressEmitter) -> Result<Arc<dyn ExtractionBackend>, DownloadError> {
        if let Some(backend) = &self.fixed {
            return Ok(backend.clone());
        }

        match self.choose()? {
            BackendChoice::Executable(exe) => {
                emitter.log(format!("Using local yt-dlp from: {}", exe.display()));
                Ok(Arc::new(ExecutableBackend::new(exe, &self.config)))
            }
            BackendChoice::Library(python) => {
                emitter.log("Using Python yt_dlp module");
                Ok(Arc::new(LibraryBackend::new(python, &self.config)))
            }
        }
    }

    /// Second try for format listing after `current` failed: the library
    /// backend when the executable was in use and the interpreter has yt_dlp.
    pub fn listing_fallback(&self, current: &dyn ExtractionBackend) -> Option<Arc<dyn ExtractionBackend>> {
        if let Some(backend) = &self.listing_fallback {
            return Some(backend.clone());
        }
        if self.fixed.is_some() || current.name() != ExecutableBackend::NAME {
            return None;
        }
        let python = self.config.python.clone()?;
        Some(Arc::new(LibraryBackend::new(python, &self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prefers_existing_executable() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("yt-dlp");
        std::fs::write(&exe, b"").unwrap();

        let selector = BackendSelector::new(
            BackendConfig::default()
                .with_extractor_exe(Some(exe.clone()))
                .with_python(Some("python3".into())),
        );
        assert_eq!(selector.choose().unwrap(), BackendChoice::Executable(exe));
    }

    #[test]
    fn test_missing_executable_falls_back_to_library() {
        let selector = BackendSelector::new(
            BackendConfig::default()
                .with_extractor_exe(Some(PathBuf::from("/nonexistent/yt-dlp")))
                .with_python(Some("python3".into())),
        );
        assert_eq!(selector.choose().unwrap(), BackendChoice::Library("python3".into()));
    }

    #[test]
    fn test_nothing_available_fails_fast() {
        let selector = BackendSelector::new(
            BackendConfig::default().with_extractor_exe(Some(PathBuf::from("/nonexistent/yt-dlp"))),
        );
        assert!(matches!(selector.choose(), Err(DownloadError::BackendUnavailable)));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        assert!(selector.select(&ProgressEmitter::new(tx)).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_listing_falls_back_from_executable_to_library() {
        let config = BackendConfig::default().with_python(Some("python3".into()));
        let selector = BackendSelector::new(config.clone());

        let executable = ExecutableBackend::new("/app/yt-dlp", &config);
        let fallback = selector.listing_fallback(&executable).unwrap();
        assert_eq!(fallback.name(), LibraryBackend::NAME);

        let library = LibraryBackend::new("python3", &config);
        assert!(selector.listing_fallback(&library).is_none());

        let without_python = BackendSelector::new(BackendConfig::default());
        assert!(without_python.listing_fallback(&executable).is_none());
    }
}
