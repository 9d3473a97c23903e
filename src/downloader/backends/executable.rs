// Local yt-dlp executable backend
//
// Spawns the binary with a progress template, streams its stdout through the
// job context, and resolves the result file from the output directory since
// the executable does not report it.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

use crate::downloader::config::BackendConfig;
use crate::downloader::control::JobContext;
use crate::downloader::errors::{matches_recoverable_signature, DownloadError};
use crate::downloader::progress::{parse_output_line, progress_template_args, OutputLine};
use crate::downloader::traits::{ExtractionBackend, ExtractionOutcome, ExtractionParams};
use crate::downloader::utils::{
    combined_output, filter_empty_args, find_newest_file, run_output_with_timeout, tool_command,
    ChildSuspender,
};

pub struct ExecutableBackend {
    exe: PathBuf,
    transcoder_dir: Option<PathBuf>,
    title_timeout_secs: u64,
    list_formats_timeout_secs: u64,
}

impl ExecutableBackend {
    pub const NAME: &'static str = "yt-dlp-executable";

    pub fn new(exe: impl Into<PathBuf>, config: &BackendConfig) -> Self {
        Self {
            exe: exe.into(),
            transcoder_dir: config.transcoder_dir.clone(),
            title_timeout_secs: config.title_timeout_secs,
            list_formats_timeout_secs: config.list_formats_timeout_secs,
        }
    }

    fn program(&self) -> String {
        self.exe.to_string_lossy().to_string()
    }

    /// Full argument list for a download attempt (without the program)
    pub fn download_args(params: &ExtractionParams) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            params.output_template.clone(),
            "-f".to_string(),
            params.format.clone(),
        ];
        if let Some(container) = &params.merge_output_format {
            args.push("--merge-output-format".to_string());
            args.push(container.clone());
        }
        args.extend(params.cookies.cli_args());
        if let Some(pp) = &params.post_processing {
            args.extend(pp.cli_args());
        }
        args.extend(progress_template_args());
        args.push(params.url.clone());
        filter_empty_args(args)
    }

    fn query_args(flag: &str, params: &ExtractionParams) -> Vec<String> {
        let mut args = vec![flag.to_string()];
        args.extend(params.cookies.cli_args());
        args.push(params.url.clone());
        filter_empty_args(args)
    }

    /// Error for a failed run, keeping a recoverable signature visible even
    /// when it was printed outside the final ERROR line
    fn failure(output: &str) -> DownloadError {
        let err = DownloadError::from(output.to_string());
        if !err.is_recoverable() && matches_recoverable_signature(output) {
            DownloadError::Extraction(output.trim().to_string())
        } else {
            err
        }
    }
}

/// Kill the child, continuing it first if it is stopped
async fn kill(child: &mut Child, suspender: &mut ChildSuspender) {
    suspender.resume();
    if let Err(e) = child.kill().await {
        log::warn!("[Executable] Failed to kill yt-dlp: {}", e);
    }
}

#[async_trait]
impl ExtractionBackend for ExecutableBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn probe_title(&self, params: &ExtractionParams) -> Result<Option<String>, DownloadError> {
        let output = run_output_with_timeout(
            &self.program(),
            Self::query_args("--get-title", params),
            self.transcoder_dir.as_deref(),
            self.title_timeout_secs,
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let title = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string);

        if title.is_none() && !output.status.success() {
            return Err(Self::failure(&combined_output(&output)));
        }
        Ok(title)
    }

    async fn run_extraction(
        &self,
        params: &ExtractionParams,
        ctx: &JobContext,
    ) -> Result<ExtractionOutcome, DownloadError> {
        let args = Self::download_args(params);
        log::info!("[Executable] {} {}", self.exe.display(), args.join(" "));

        let started = SystemTime::now();
        let mut child = tool_command(&self.program(), &args, self.transcoder_dir.as_deref()).spawn()?;

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

        // A paused job stops the process (SIGSTOP) on the next output line or
        // poll tick. Without signals the unread stdout pipe fills and yt-dlp
        // blocks on it instead.
        let mut suspender = ChildSuspender::new(&child);
        let mut lines = BufReader::new(stdout).lines();
        let mut captured = Vec::new();
        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => {
                    kill(&mut child, &mut suspender).await;
                    stderr_task.abort();
                    return Err(DownloadError::Canceled);
                }
                line = lines.next_line() => line,
                _ = tokio::time::sleep(ctx.poll_interval()) => {
                    suspender.sync(ctx.is_paused());
                    continue;
                }
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[Executable] Failed to read output: {}", e);
                    break;
                }
            };

            suspender.sync(ctx.is_paused());
            let step = match parse_output_line(&line) {
                OutputLine::Download(raw) => ctx.on_progress(&raw).await,
                OutputLine::Postprocess(phase) => {
                    ctx.on_conversion(phase);
                    Ok(())
                }
                OutputLine::PostprocessOther => Ok(()),
                OutputLine::Other => {
                    captured.push(line);
                    ctx.checkpoint().await
                }
            };
            if let Err(e) = step {
                kill(&mut child, &mut suspender).await;
                stderr_task.abort();
                return Err(e);
            }
            suspender.sync(ctx.is_paused());
        }
        suspender.resume();

        let status = child.wait().await?;
        captured.extend(stderr_task.await.unwrap_or_default());
        let output = captured.join("\n");
        if !output.trim().is_empty() {
            ctx.log(output.clone());
        }

        if !ctx.is_running() {
            return Err(DownloadError::Canceled);
        }
        if !status.success() {
            return Err(Self::failure(&output));
        }

        Ok(ExtractionOutcome {
            output_path: find_newest_file(&params.output_dir, started),
        })
    }

    async fn list_formats(&self, params: &ExtractionParams) -> Result<Vec<String>, DownloadError> {
        let output = run_output_with_timeout(
            &self.program(),
            Self::query_args("--list-formats", params),
            self.transcoder_dir.as_deref(),
            self.list_formats_timeout_secs,
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let text = if stdout.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            stdout
        };
        Ok(text.lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::cookies::CookieConfig;
    use crate::downloader::models::JobRequest;

    fn params(request: &JobRequest) -> ExtractionParams {
        ExtractionParams::new(request, CookieConfig::default(), "192")
    }

    #[test]
    fn test_download_args_for_audio() {
        let request = JobRequest::audio("https://example.com/a", "mp3", "/music");
        let args = ExecutableBackend::download_args(&params(&request));

        assert_eq!(args[0], "-o");
        assert_eq!(args[2], "-f");
        assert_eq!(args[3], "bestaudio/best");
        assert!(args.windows(2).any(|w| w == ["--audio-quality", "192K"]));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/a"));
        assert!(args.iter().all(|a| !a.is_empty()));
    }

    #[test]
    fn test_retry_args_carry_exactly_one_best() {
        let request = JobRequest::video("https://example.com/v", "1080p", "mp4", "/videos");
        let args = ExecutableBackend::download_args(&params(&request).relaxed());

        let selectors: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "-f")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(selectors, vec!["best"]);
        assert!(args.windows(2).any(|w| w == ["--recode-video", "mp4"]));
    }

    #[test]
    fn test_cookie_flags() {
        let request = JobRequest::video("https://example.com/v", "720p", "mp4", "/videos");
        let p = ExtractionParams::new(&request, CookieConfig::browser("firefox"), "192");
        let args = ExecutableBackend::download_args(&p);
        assert!(args.windows(2).any(|w| w == ["--cookies-from-browser", "firefox"]));
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn test_failure_keeps_signature() {
        let output = "WARNING: Signature extraction failed: Some formats may be missing\nERROR: unable to download video data";
        assert!(ExecutableBackend::failure(output).is_recoverable());

        let output = "ERROR: [youtube] abc: Video unavailable";
        let err = ExecutableBackend::failure(output);
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "[youtube] abc: Video unavailable");
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::downloader::config::WorkerConfig;
        use crate::downloader::control::JobControl;
        use crate::downloader::models::JobEvent;
        use crate::downloader::traits::ProgressEmitter;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::sync::Arc;
        use std::time::Duration;
        use tempfile::TempDir;
        use tokio::sync::mpsc;

        fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("yt-dlp");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        const DOWNLOAD_SCRIPT: &str = r#"
if [ "$1" = "--get-title" ]; then echo "Sample"; exit 0; fi
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo "[youtube] abc: Downloading webpage"
echo "[job-progress] downloading|  0.0%|1.00MiB/s|0.00MiB|10.00MiB|00:10"
echo "[job-progress] finished|100.0%|1.00MiB/s|10.00MiB|10.00MiB|00:00"
echo "[job-postprocess] started|FFmpegVideoConvertor"
echo "[job-postprocess] finished|FFmpegVideoConvertor"
echo data > "$(dirname "$out")/Sample.mp4"
"#;

        #[tokio::test]
        async fn test_streams_progress_and_finds_output() {
            let tools = TempDir::new().unwrap();
            let out = TempDir::new().unwrap();
            let exe = fake_ytdlp(tools.path(), DOWNLOAD_SCRIPT);
            let backend = ExecutableBackend::new(&exe, &BackendConfig::default());

            let request = JobRequest::video("https://example.com/v", "720p", "mp4", out.path());
            let p = params(&request);

            let (tx, mut rx) = mpsc::unbounded_channel();
            let ctx = JobContext::new(
                Arc::new(JobControl::new()),
                ProgressEmitter::new(tx),
                &WorkerConfig::default(),
            );

            assert_eq!(backend.probe_title(&p).await.unwrap().as_deref(), Some("Sample"));

            let outcome = backend.run_extraction(&p, &ctx).await.unwrap();
            assert_eq!(outcome.output_path, Some(out.path().join("Sample.mp4")));

            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            let progress = events.iter().filter(|e| matches!(e, JobEvent::Progress(_))).count();
            assert_eq!(progress, 4);
            assert!(events.iter().any(|e| matches!(e, JobEvent::Log(l) if l.contains("Downloading webpage"))));
        }

        #[tokio::test]
        async fn test_failed_run_is_recoverable() {
            let tools = TempDir::new().unwrap();
            let out = TempDir::new().unwrap();
            let exe = fake_ytdlp(
                tools.path(),
                r#"echo "ERROR: [youtube] abc: Requested format is not available. Use --list-formats" >&2; exit 1"#,
            );
            let backend = ExecutableBackend::new(&exe, &BackendConfig::default());
            let request = JobRequest::video("https://example.com/v", "2160p", "mp4", out.path());

            let (tx, _rx) = mpsc::unbounded_channel();
            let ctx = JobContext::new(
                Arc::new(JobControl::new()),
                ProgressEmitter::new(tx),
                &WorkerConfig::default(),
            );

            let err = backend.run_extraction(&params(&request), &ctx).await.unwrap_err();
            assert!(err.is_recoverable());
        }

        #[tokio::test]
        async fn test_cancel_kills_process() {
            let tools = TempDir::new().unwrap();
            let out = TempDir::new().unwrap();
            let exe = fake_ytdlp(tools.path(), "sleep 30");
            let backend = ExecutableBackend::new(&exe, &BackendConfig::default());
            let request = JobRequest::audio("https://example.com/a", "mp3", out.path());

            let control = Arc::new(JobControl::new());
            let (tx, _rx) = mpsc::unbounded_channel();
            let ctx = JobContext::new(control.clone(), ProgressEmitter::new(tx), &WorkerConfig::default());

            let canceller = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                control.cancel();
            });

            let result = tokio::time::timeout(
                Duration::from_secs(10),
                backend.run_extraction(&params(&request), &ctx),
            )
            .await
            .unwrap();
            assert!(matches!(result, Err(DownloadError::Canceled)));
            canceller.await.unwrap();
        }

        fn read_counter(path: &Path) -> u64 {
            std::fs::read_to_string(path)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0)
        }

        #[tokio::test]
        async fn test_pause_stops_process() {
            let tools = TempDir::new().unwrap();
            let out = TempDir::new().unwrap();
            let counter = out.path().join("counter");
            let script = format!(
                r#"
i=0
while [ $i -lt 3000 ]; do
  i=$((i+1))
  echo $i > "{0}.tmp"
  mv "{0}.tmp" "{0}"
  echo "[job-progress] downloading|  1.0%|1.00MiB/s|0.10MiB|10.00MiB|00:10"
  sleep 0.01
done
"#,
                counter.display()
            );
            let exe = fake_ytdlp(tools.path(), &script);
            let backend = ExecutableBackend::new(&exe, &BackendConfig::default());
            let request = JobRequest::video("https://example.com/v", "720p", "mp4", out.path());
            let p = params(&request);

            let control = Arc::new(JobControl::new());
            let (tx, _rx) = mpsc::unbounded_channel();
            let config = WorkerConfig::default().with_pause_poll_interval(Duration::from_millis(100));
            let ctx = JobContext::new(control.clone(), ProgressEmitter::new(tx), &config);

            let run = tokio::spawn(async move { backend.run_extraction(&p, &ctx).await });

            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(control.toggle_pause());

            tokio::time::sleep(Duration::from_millis(600)).await;
            let held = read_counter(&counter);
            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert!(held > 0);
            assert_eq!(read_counter(&counter), held);

            assert!(!control.toggle_pause());
            tokio::time::sleep(Duration::from_millis(600)).await;
            assert!(read_counter(&counter) > held);

            // cancel while paused continues the stopped process before killing it
            control.toggle_pause();
            tokio::time::sleep(Duration::from_millis(300)).await;
            control.cancel();

            let result = tokio::time::timeout(Duration::from_secs(10), run)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(DownloadError::Canceled)));
        }
    }
}
