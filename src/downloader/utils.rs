// Helper functions for backend implementations

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::{timeout, Duration as TokioDuration};

use super::errors::DownloadError;

/// Command with piped output and `path_prefix` ahead of the inherited PATH
pub fn tool_command(program: &str, args: &[String], path_prefix: Option<&Path>) -> TokioCommand {
    let mut command = TokioCommand::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = path_prefix {
        command.env("PATH", prepend_path(dir));
    }
    command
}

/// Stops and continues a spawned tool so it follows the job's paused flag.
///
/// Unix only; elsewhere the process keeps running until its stdout pipe fills.
#[derive(Debug)]
pub struct ChildSuspender {
    pid: Option<u32>,
    suspended: bool,
}

impl ChildSuspender {
    pub fn new(child: &Child) -> Self {
        Self {
            pid: child.id(),
            suspended: false,
        }
    }

    /// Send SIGSTOP or SIGCONT when the process does not match `paused`
    pub fn sync(&mut self, paused: bool) {
        if paused == self.suspended {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };
        if send_stop_signal(pid, paused) {
            self.suspended = paused;
            log::debug!(
                "[Process] {} pid {}",
                if paused { "Suspended" } else { "Resumed" },
                pid
            );
        }
    }

    pub fn resume(&mut self) {
        self.sync(false);
    }
}

#[cfg(unix)]
fn send_stop_signal(pid: u32, stop: bool) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = if stop { Signal::SIGSTOP } else { Signal::SIGCONT };
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("[Process] Failed to send {} to pid {}: {}", signal, pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_stop_signal(_pid: u32, _stop: bool) -> bool {
    false
}

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    path_prefix: Option<&Path>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = tool_command(program, &args, path_prefix)
        .spawn()
        .map_err(DownloadError::from)?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let waited = timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = join_pipe(stdout_task, "stdout").await?;
            let stderr = join_pipe(stderr_task, "stderr").await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout(timeout_secs))
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::ExecutionError(format!("{} task failed: {}", name, e)))?
        .map_err(|e| DownloadError::ExecutionError(format!("Failed to read {}: {}", name, e)))
}

/// Stdout and stderr of a finished process as one string
pub fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}

/// `dir` followed by the current PATH
pub fn prepend_path(dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

/// Drop empty strings so optional flags never reach the extractor as ""
pub fn filter_empty_args(args: Vec<String>) -> Vec<String> {
    args.into_iter().filter(|a| !a.is_empty()).collect()
}

/// Most recently modified file under `dir` (recursive) changed at or after
/// `since`. One second of slack covers coarse filesystem timestamps.
pub fn find_newest_file(dir: &Path, since: SystemTime) -> Option<PathBuf> {
    let threshold = since.checked_sub(Duration::from_secs(1)).unwrap_or(since);
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_dir() {
                stack.push(path);
                continue;
            }
            let modified = match meta.modified() {
                Ok(time) => time,
                Err(_) => continue,
            };
            if modified < threshold {
                continue;
            }
            if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
                newest = Some((modified, path));
            }
        }
    }

    newest.map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn touch(path: &Path, time: SystemTime) {
        std::fs::write(path, b"data").unwrap();
        filetime::set_file_mtime(path, FileTime::from_system_time(time)).unwrap();
    }

    #[test]
    fn test_filter_empty_args() {
        let args = vec!["-f".to_string(), String::new(), "best".to_string(), String::new()];
        assert_eq!(filter_empty_args(args), vec!["-f", "best"]);
    }

    #[test]
    fn test_prepend_path_puts_dir_first() {
        let joined = prepend_path(Path::new("/opt/ffmpeg/bin"));
        let first = std::env::split_paths(&joined).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/ffmpeg/bin"));
    }

    #[test]
    fn test_find_newest_file_ignores_older_files() {
        let dir = TempDir::new().unwrap();
        let start = SystemTime::now();

        touch(&dir.path().join("old.mp4"), start - Duration::from_secs(3600));
        touch(&dir.path().join("first.webm"), start + Duration::from_secs(5));
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let nested = dir.path().join("nested").join("final.mp4");
        touch(&nested, start + Duration::from_secs(10));

        assert_eq!(find_newest_file(dir.path(), start), Some(nested));
    }

    #[test]
    fn test_find_newest_file_none_when_nothing_new() {
        let dir = TempDir::new().unwrap();
        let start = SystemTime::now();
        touch(&dir.path().join("old.mp3"), start - Duration::from_secs(60));

        assert_eq!(find_newest_file(dir.path(), start), None);
        assert_eq!(find_newest_file(&dir.path().join("missing"), start), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_output_with_timeout() {
        let output = run_output_with_timeout(
            "sh",
            vec!["-c".into(), "echo out; echo err 1>&2".into()],
            None,
            5,
        )
        .await
        .unwrap();
        assert!(output.status.success());
        assert_eq!(combined_output(&output), "out\n\nerr\n");

        let timed_out =
            run_output_with_timeout("sh", vec!["-c".into(), "sleep 5".into()], None, 1).await;
        assert!(matches!(timed_out, Err(DownloadError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let result =
            run_output_with_timeout("definitely-not-a-real-tool-xyz", vec![], None, 5).await;
        assert!(matches!(result, Err(DownloadError::ToolNotFound(_))));
    }
}
