// yt_dlp Python library backend
//
// Runs the bundled driver script under the configured interpreter. The driver
// reports hook callbacks as JSON lines and waits for an acknowledgement after
// each progress event, so a paused job holds the download inside the hook.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::downloader::config::BackendConfig;
use crate::downloader::control::JobContext;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{ConversionPhase, FormatEntry};
use crate::downloader::progress::RawProgress;
use crate::downloader::traits::{ExtractionBackend, ExtractionOutcome, ExtractionParams};
use crate::downloader::utils::{combined_output, run_output_with_timeout, tool_command};

const DRIVER: &str = include_str!("ytdlp_driver.py");

/// One JSON line written by the driver
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverEvent {
    Progress(RawProgress),
    Postprocess {
        status: String,
        #[serde(default)]
        filename: Option<String>,
    },
    Log {
        message: String,
    },
    Title {
        #[serde(default)]
        title: Option<String>,
    },
    Format(FormatEntry),
    Done {
        #[serde(default)]
        filename: Option<String>,
    },
    Error {
        message: String,
    },
}

/// `None` for lines that are not driver events (stray library output)
pub fn parse_driver_line(line: &str) -> Option<DriverEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

pub struct LibraryBackend {
    python: String,
    transcoder_dir: Option<PathBuf>,
    title_timeout_secs: u64,
    list_formats_timeout_secs: u64,
}

impl LibraryBackend {
    pub const NAME: &'static str = "yt-dlp-library";

    pub fn new(python: impl Into<String>, config: &BackendConfig) -> Self {
        Self {
            python: python.into(),
            transcoder_dir: config.transcoder_dir.clone(),
            title_timeout_secs: config.title_timeout_secs,
            list_formats_timeout_secs: config.list_formats_timeout_secs,
        }
    }

    /// Options handed to the driver, named as yt_dlp names them
    pub fn request_json(params: &ExtractionParams) -> serde_json::Value {
        let mut request = serde_json::Map::new();
        request.insert("url".into(), params.url.clone().into());
        request.insert("outtmpl".into(), params.output_template.clone().into());
        request.insert("format".into(), params.format.clone().into());
        if let Some(container) = &params.merge_output_format {
            request.insert("merge_output_format".into(), container.clone().into());
        }
        if let Some(pp) = &params.post_processing {
            request.insert(
                "postprocessors".into(),
                serde_json::Value::Array(vec![pp.library_options()]),
            );
        }
        request.extend(params.cookies.library_options());
        serde_json::Value::Object(request)
    }

    fn driver_args(mode: &str, params: &ExtractionParams) -> Vec<String> {
        vec![
            "-c".to_string(),
            DRIVER.to_string(),
            mode.to_string(),
            Self::request_json(params).to_string(),
        ]
    }

    /// Run a short driver mode to completion and collect its events
    async fn query(
        &self,
        mode: &str,
        params: &ExtractionParams,
        timeout_secs: u64,
    ) -> Result<Vec<DriverEvent>, DownloadError> {
        let output = run_output_with_timeout(
            &self.python,
            Self::driver_args(mode, params),
            self.transcoder_dir.as_deref(),
            timeout_secs,
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let events: Vec<DriverEvent> = stdout.lines().filter_map(parse_driver_line).collect();

        if let Some(message) = events.iter().find_map(|e| match e {
            DriverEvent::Error { message } => Some(message.clone()),
            _ => None,
        }) {
            return Err(DownloadError::from(message));
        }
        if !output.status.success() {
            return Err(DownloadError::from(combined_output(&output)));
        }
        Ok(events)
    }
}

#[async_trait]
impl ExtractionBackend for LibraryBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe_title(&self, params: &ExtractionParams) -> Result<Option<String>, DownloadError> {
        let events = self.query("title", params, self.title_timeout_secs).await?;
        Ok(events.into_iter().find_map(|e| match e {
            DriverEvent::Title { title } => title.filter(|t| !t.trim().is_empty()),
            _ => None,
        }))
    }

    async fn run_extraction(
        &self,
        params: &ExtractionParams,
        ctx: &JobContext,
    ) -> Result<ExtractionOutcome, DownloadError> {
        let mut command = tool_command(
            &self.python,
            &Self::driver_args("download", params),
            self.transcoder_dir.as_deref(),
        );
        command.stdin(Stdio::piped());
        let mut child = command.spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut done_file: Option<String> = None;
        let mut converted_file: Option<String> = None;
        let mut driver_error: Option<String> = None;

        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(DownloadError::Canceled);
                }
                line = lines.next_line() => line,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[Library] Failed to read driver output: {}", e);
                    break;
                }
            };

            let event = match parse_driver_line(&line) {
                Some(event) => event,
                None => {
                    if !line.trim().is_empty() {
                        ctx.log(line);
                    }
                    continue;
                }
            };

            match event {
                DriverEvent::Progress(raw) => {
                    if let Err(e) = ctx.on_progress(&raw).await {
                        let _ = child.kill().await;
                        stderr_task.abort();
                        return Err(e);
                    }
                    if let Err(e) = stdin.write_all(b"go\n").await {
                        log::warn!("[Library] Failed to resume driver: {}", e);
                    }
                }
                DriverEvent::Postprocess { status, filename } => {
                    let phase = match status.as_str() {
                        "started" => ConversionPhase::Started,
                        "finished" => ConversionPhase::Finished,
                        _ => continue,
                    };
                    if phase == ConversionPhase::Finished && filename.is_some() {
                        converted_file = filename;
                    }
                    ctx.on_conversion(phase);
                }
                DriverEvent::Log { message } => ctx.log(message),
                DriverEvent::Done { filename } => done_file = filename,
                DriverEvent::Error { message } => driver_error = Some(message),
                DriverEvent::Title { .. } | DriverEvent::Format(_) => {}
            }
        }

        drop(stdin);
        let status = child.wait().await?;
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if !ctx.is_running() {
            return Err(DownloadError::Canceled);
        }
        if let Some(message) = driver_error {
            return Err(DownloadError::from(message));
        }
        if !status.success() {
            return Err(DownloadError::from(stderr_lines.join("\n")));
        }

        Ok(ExtractionOutcome {
            output_path: done_file.or(converted_file).map(PathBuf::from),
        })
    }

    async fn list_formats(&self, params: &ExtractionParams) -> Result<Vec<String>, DownloadError> {
        let events = self
            .query("formats", params, self.list_formats_timeout_secs)
            .await?;
        Ok(events
            .into_iter()
            .filter_map(|e| match e {
                DriverEvent::Format(entry) => Some(entry.describe()),
                _ => None,
            })
            .collect())
    }
}
