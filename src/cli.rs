use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::downloader::config::python_cmd;
use crate::downloader::tools::ToolManager;
use crate::downloader::{
    BackendConfig, CookieSource, JobEvent, JobOutcome, JobRequest, JobWorker, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "video-downloader")]
#[command(author, version, about = "Download video or audio with yt-dlp and ffmpeg", long_about = None)]
pub struct Cli {
    /// Folder holding a bundled yt-dlp and ffmpeg/bin (defaults to the program's folder)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a video
    Video {
        url: String,

        /// Maximum height such as 720p, or Original
        #[arg(short, long, default_value = "Original")]
        resolution: String,

        /// Target container
        #[arg(short, long, default_value = "mp4")]
        format: String,

        /// Browser to take cookies from, or disabled
        #[arg(short, long, default_value = "disabled")]
        cookies: String,

        /// Output folder (defaults to the Downloads folder)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download audio only
    Audio {
        url: String,

        /// Target codec
        #[arg(short, long, default_value = "mp3")]
        format: String,

        /// Browser to take cookies from, or disabled
        #[arg(short, long, default_value = "disabled")]
        cookies: String,

        /// Output folder (defaults to the Downloads folder)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show which tools were found
    Tools,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Job for the download subcommands
    pub fn request(&self) -> Option<JobRequest> {
        match &self.command {
            Commands::Video {
                url,
                resolution,
                format,
                cookies,
                output,
            } => Some(
                JobRequest::video(url.as_str(), resolution.as_str(), format.as_str(), output_dir(output))
                    .with_cookies(parse_cookies(cookies)),
            ),
            Commands::Audio {
                url,
                format,
                cookies,
                output,
            } => Some(
                JobRequest::audio(url.as_str(), format.as_str(), output_dir(output))
                    .with_cookies(parse_cookies(cookies)),
            ),
            Commands::Tools => None,
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn output_dir(output: &Option<PathBuf>) -> PathBuf {
    output
        .clone()
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_cookies(value: &str) -> CookieSource {
    value.parse().unwrap_or_default()
}

/// Run the parsed command; returns the process exit code
pub async fn run(cli: Cli) -> i32 {
    let base_dir = cli.base_dir();

    let request = match cli.request() {
        Some(request) => request,
        None => {
            print_tools(&base_dir);
            return 0;
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&request.output_dir).await {
        eprintln!("Cannot create {}: {}", request.output_dir.display(), e);
        return 1;
    }

    let worker = JobWorker::from_config(BackendConfig::detect(&base_dir), WorkerConfig::default());
    let mut handle = worker.start(request);

    let controller = handle.controller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            controller.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        print_event(&event);
    }

    match handle.join().await {
        JobOutcome::Completed(_) => 0,
        JobOutcome::Canceled => 130,
        JobOutcome::Failed(_) => 1,
    }
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::Title(title) => println!("Title: {}", title),
        JobEvent::Progress(s) => {
            println!("{:>5.1}%  {}  {}  ETA {}", s.percent, s.speed, s.size, s.eta)
        }
        JobEvent::Conversion(phase) => println!("Conversion {}", phase),
        JobEvent::Log(line) => println!("{}", line),
        JobEvent::Finished(Some(path)) => println!("Saved to {}", path.display()),
        JobEvent::Finished(None) => println!("Finished (output file not located)"),
        JobEvent::Error(message) => eprintln!("Error: {}", message),
        JobEvent::Canceled => println!("Canceled"),
    }
}

fn print_tools(base_dir: &Path) {
    let manager = ToolManager::new(base_dir);
    for tool in manager.get_all_tools(&python_cmd()) {
        let status = if tool.is_available { "found" } else { "missing" };
        println!(
            "{:<10} {:<8} {:<20} {}",
            tool.name,
            status,
            tool.version.as_deref().unwrap_or("-"),
            tool.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::MediaKind;

    #[test]
    fn test_video_request() {
        let cli = Cli::try_parse_from([
            "video-downloader",
            "video",
            "https://example.com/v",
            "-r",
            "1080p",
            "-f",
            "mkv",
            "-c",
            "Firefox",
            "-o",
            "/tmp/out",
        ])
        .unwrap();

        let request = cli.request().unwrap();
        assert_eq!(request.kind, MediaKind::Video);
        assert_eq!(request.resolution, "1080p");
        assert_eq!(request.video_format, "mkv");
        assert_eq!(request.cookies, CookieSource::Browser("firefox".into()));
        assert_eq!(request.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_audio_defaults() {
        let cli = Cli::try_parse_from(["video-downloader", "audio", "https://example.com/a"]).unwrap();
        let request = cli.request().unwrap();
        assert_eq!(request.kind, MediaKind::Audio);
        assert_eq!(request.audio_format, "mp3");
        assert_eq!(request.cookies, CookieSource::Disabled);
    }

    #[test]
    fn test_tools_has_no_request() {
        let cli = Cli::try_parse_from(["video-downloader", "--base-dir", "/app", "tools"]).unwrap();
        assert!(cli.request().is_none());
        assert_eq!(cli.base_dir(), PathBuf::from("/app"));
    }
}
