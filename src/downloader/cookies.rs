// Cookie source resolution
//
// Primary: let yt-dlp read the browser's cookie store directly.
// Secondary: export the browser's cookies into a Netscape cookie file with
// browser_cookie3 and hand yt-dlp that file. Cookie failures are only logged.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::config::BackendConfig;
use super::errors::DownloadError;
use super::models::CookieSource;
use super::traits::ProgressEmitter;
use super::utils::{combined_output, run_output_with_timeout};

/// Browsers yt-dlp can read cookies from
pub const SUPPORTED_BROWSERS: [&str; 9] = [
    "brave", "chrome", "chromium", "edge", "firefox", "opera", "safari", "vivaldi", "whale",
];

const EXPORT_SCRIPT: &str = r#"
import sys
from http.cookiejar import MozillaCookieJar
import browser_cookie3

jar = getattr(browser_cookie3, sys.argv[1])()
out = MozillaCookieJar(sys.argv[2])
for cookie in jar:
    out.set_cookie(cookie)
out.save(ignore_discard=True, ignore_expires=True)
"#;

/// Cookie options passed to a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieConfig {
    pub from_browser: Option<String>,
    pub cookie_file: Option<PathBuf>,
}

impl CookieConfig {
    pub fn browser(name: impl Into<String>) -> Self {
        Self {
            from_browser: Some(name.into()),
            cookie_file: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            from_browser: None,
            cookie_file: Some(path.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.from_browser.is_none() && self.cookie_file.is_none()
    }

    /// yt-dlp flags; the browser store wins over a cookie file
    pub fn cli_args(&self) -> Vec<String> {
        if let Some(browser) = &self.from_browser {
            vec!["--cookies-from-browser".to_string(), browser.clone()]
        } else if let Some(file) = &self.cookie_file {
            vec!["--cookies".to_string(), file.to_string_lossy().to_string()]
        } else {
            Vec::new()
        }
    }

    /// Entries for the yt_dlp library options dict
    pub fn library_options(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut opts = serde_json::Map::new();
        if let Some(browser) = &self.from_browser {
            opts.insert("cookiesfrombrowser".into(), serde_json::json!([browser]));
        } else if let Some(file) = &self.cookie_file {
            opts.insert(
                "cookiefile".into(),
                serde_json::Value::String(file.to_string_lossy().to_string()),
            );
        }
        opts
    }
}

/// Direct access to a browser's cookie store
#[async_trait]
pub trait BrowserCookieStore: Send + Sync {
    /// Ok if yt-dlp can be pointed at this browser's store
    async fn verify(&self, browser: &str) -> Result<(), DownloadError>;
}

/// Exports a browser's cookies into a cookie file
#[async_trait]
pub trait CookieFileExporter: Send + Sync {
    async fn export(&self, browser: &str) -> Result<PathBuf, DownloadError>;
}

/// Checks that the browser is supported and has a profile on this machine
pub struct LocalBrowserStore;

impl LocalBrowserStore {
    fn profile_candidates(browser: &str) -> Vec<PathBuf> {
        let home = dirs::home_dir();
        let config = dirs::config_dir();
        let data = dirs::data_dir();
        let local = dirs::data_local_dir();

        let join = |base: &Option<PathBuf>, rel: &str| base.as_ref().map(|b| b.join(rel));

        let candidates = match browser {
            "firefox" => vec![
                join(&home, ".mozilla/firefox"),
                join(&data, "Firefox"),
                join(&data, "Mozilla/Firefox"),
            ],
            "chrome" => vec![
                join(&config, "google-chrome"),
                join(&data, "Google/Chrome"),
                join(&local, "Google/Chrome"),
            ],
            "chromium" => vec![
                join(&config, "chromium"),
                join(&data, "Chromium"),
                join(&local, "Chromium"),
            ],
            "brave" => vec![
                join(&config, "BraveSoftware/Brave-Browser"),
                join(&data, "BraveSoftware/Brave-Browser"),
                join(&local, "BraveSoftware/Brave-Browser"),
            ],
            "edge" => vec![
                join(&config, "microsoft-edge"),
                join(&data, "Microsoft Edge"),
                join(&local, "Microsoft/Edge"),
            ],
            "opera" => vec![
                join(&config, "opera"),
                join(&data, "com.operasoftware.Opera"),
                join(&data, "Opera Software/Opera Stable"),
            ],
            "vivaldi" => vec![
                join(&config, "vivaldi"),
                join(&data, "Vivaldi"),
                join(&local, "Vivaldi"),
            ],
            "whale" => vec![
                join(&config, "naver-whale"),
                join(&data, "Naver/Whale"),
                join(&local, "Naver/Naver Whale"),
            ],
            "safari" => vec![
                join(&home, "Library/Cookies"),
                join(&home, "Library/Containers/com.apple.Safari"),
            ],
            _ => Vec::new(),
        };

        candidates.into_iter().flatten().collect()
    }
}

#[async_trait]
impl BrowserCookieStore for LocalBrowserStore {
    async fn verify(&self, browser: &str) -> Result<(), DownloadError> {
        if !SUPPORTED_BROWSERS.contains(&browser) {
            return Err(DownloadError::Extraction(format!(
                "unsupported browser specified for cookies: \"{}\". Supported browsers are: {}",
                browser,
                SUPPORTED_BROWSERS.join(", ")
            )));
        }

        if Self::profile_candidates(browser).iter().any(|p| p.exists()) {
            Ok(())
        } else {
            Err(DownloadError::Extraction(format!(
                "could not find {} cookies database",
                browser
            )))
        }
    }
}

/// Runs python with browser_cookie3 and saves a Mozilla cookie jar
pub struct BrowserCookie3Exporter {
    python: Option<String>,
    out_dir: PathBuf,
    timeout_secs: u64,
}

impl BrowserCookie3Exporter {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            python: config.python.clone(),
            out_dir: std::env::temp_dir(),
            timeout_secs: config.cookie_export_timeout_secs,
        }
    }

    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = dir.into();
        self
    }
}

#[async_trait]
impl CookieFileExporter for BrowserCookie3Exporter {
    async fn export(&self, browser: &str) -> Result<PathBuf, DownloadError> {
        let python = self
            .python
            .as_deref()
            .ok_or_else(|| DownloadError::ToolNotFound("python with browser_cookie3".into()))?;
        let cookie_file = self.out_dir.join(format!("{}_cookies.txt", browser));

        let args = vec![
            "-c".to_string(),
            EXPORT_SCRIPT.to_string(),
            browser.to_string(),
            cookie_file.to_string_lossy().to_string(),
        ];
        let output = run_output_with_timeout(python, args, None, self.timeout_secs).await?;
        if !output.status.success() {
            return Err(DownloadError::from(combined_output(&output)));
        }
        Ok(cookie_file)
    }
}

/// Turns a cookie source into backend cookie options
#[derive(Clone)]
pub struct CookieResolver {
    store: Arc<dyn BrowserCookieStore>,
    exporter: Arc<dyn CookieFileExporter>,
}

impl CookieResolver {
    pub fn new(config: &BackendConfig) -> Self {
        Self::with_stores(
            Arc::new(LocalBrowserStore),
            Arc::new(BrowserCookie3Exporter::new(config)),
        )
    }

    pub fn with_stores(
        store: Arc<dyn BrowserCookieStore>,
        exporter: Arc<dyn CookieFileExporter>,
    ) -> Self {
        Self { store, exporter }
    }

    /// Never fails; problems end up in the job log
    pub async fn resolve(&self, source: &CookieSource, emitter: &ProgressEmitter) -> CookieConfig {
        let browser = match source {
            CookieSource::Disabled => return CookieConfig::default(),
            CookieSource::Browser(name) => name.to_lowercase(),
        };

        match self.store.verify(&browser).await {
            Ok(()) => {
                emitter.log(format!("Using cookies from browser: {}", browser));
                CookieConfig::browser(browser)
            }
            Err(e) => {
                emitter.log(format!("Error setting cookies: {}", e));
                match self.exporter.export(&browser).await {
                    Ok(path) => {
                        emitter.log(format!("Used fallback cookie method: {}", path.display()));
                        CookieConfig::file(path)
                    }
                    Err(e) => {
                        emitter.log(format!("Fallback cookie error: {}", e));
                        CookieConfig::default()
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::JobEvent;
    use tokio::sync::mpsc;

    struct Store(bool);

    #[async_trait]
    impl BrowserCookieStore for Store {
        async fn verify(&self, browser: &str) -> Result<(), DownloadError> {
            if self.0 {
                Ok(())
            } else {
                Err(DownloadError::Extraction(format!("could not find {} cookies database", browser)))
            }
        }
    }

    struct Exporter(Option<&'static str>);

    #[async_trait]
    impl CookieFileExporter for Exporter {
        async fn export(&self, _browser: &str) -> Result<PathBuf, DownloadError> {
            self.0
                .map(PathBuf::from)
                .ok_or_else(|| DownloadError::ToolNotFound("browser_cookie3".into()))
        }
    }

    async fn resolve(
        store: bool,
        exporter: Option<&'static str>,
        source: CookieSource,
    ) -> (CookieConfig, Vec<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = CookieResolver::with_stores(Arc::new(Store(store)), Arc::new(Exporter(exporter)));
        let config = resolver.resolve(&source, &ProgressEmitter::new(tx)).await;

        let mut logs = Vec::new();
        while let Ok(JobEvent::Log(line)) = rx.try_recv() {
            logs.push(line);
        }
        (config, logs)
    }

    #[tokio::test]
    async fn test_disabled_is_silent() {
        let (config, logs) = resolve(true, None, CookieSource::Disabled).await;
        assert!(config.is_empty());
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_primary_store() {
        let (config, logs) = resolve(true, None, CookieSource::Browser("Chrome".into())).await;
        assert_eq!(config, CookieConfig::browser("chrome"));
        assert_eq!(logs, vec!["Using cookies from browser: chrome"]);
        assert_eq!(config.cli_args(), vec!["--cookies-from-browser", "chrome"]);
    }

    #[tokio::test]
    async fn test_fallback_to_cookie_file() {
        let (config, logs) =
            resolve(false, Some("/tmp/chrome_cookies.txt"), CookieSource::Browser("chrome".into())).await;
        assert_eq!(config, CookieConfig::file("/tmp/chrome_cookies.txt"));
        assert!(logs[0].starts_with("Error setting cookies:"));
        assert_eq!(logs[1], "Used fallback cookie method: /tmp/chrome_cookies.txt");
        assert_eq!(config.cli_args(), vec!["--cookies", "/tmp/chrome_cookies.txt"]);
        assert!(config.library_options().contains_key("cookiefile"));
    }

    #[tokio::test]
    async fn test_both_mechanisms_fail() {
        let (config, logs) = resolve(false, None, CookieSource::Browser("firefox".into())).await;
        assert!(config.is_empty());
        assert_eq!(logs.len(), 2);
        assert!(logs[1].starts_with("Fallback cookie error:"));
    }

    #[tokio::test]
    async fn test_unsupported_browser() {
        let err = LocalBrowserStore.verify("netscape").await.unwrap_err();
        assert!(err.to_string().contains("unsupported browser"));
    }

    #[tokio::test]
    async fn test_exporter_without_python() {
        let exporter = BrowserCookie3Exporter::new(&BackendConfig::default());
        let err = exporter.export("chrome").await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exporter_writes_into_out_dir() {
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        let tools = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        // argv: -c <script> <browser> <file>
        let python = tools.path().join("python3");
        std::fs::write(&python, "#!/bin/sh\necho \"# Netscape HTTP Cookie File\" > \"$4\"\n").unwrap();
        std::fs::set_permissions(&python, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = BackendConfig::default().with_python(Some(python.to_string_lossy().to_string()));
        let exporter = BrowserCookie3Exporter::new(&config).with_out_dir(out.path());

        let path = exporter.export("chrome").await.unwrap();
        assert_eq!(path, out.path().join("chrome_cookies.txt"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("Netscape"));
    }
}
