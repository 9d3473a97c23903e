// Progress normalization and throttling
//
// Raw yt-dlp progress (hook dicts from the library, template lines from the
// executable) becomes one (percent, speed, size, eta) tuple. Downloading-phase
// samples are rate limited; phase sentinels always pass.

use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

use super::models::{ConversionPhase, ProgressSample};

pub const PROGRESS_MARKER: &str = "[job-progress]";
pub const POSTPROCESS_MARKER: &str = "[job-postprocess]";

/// Sentinel labels for phase transitions
pub const STATUS_PROCESSING: &str = "Processing...";
pub const STATUS_CONVERTING: &str = "Converting...";
pub const STATUS_READY: &str = "Ready";

lazy_static::lazy_static! {
    static ref ANSI_RE: Regex = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    static ref DOWNLOAD_LINE_RE: Regex = Regex::new(
        r"^\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~?\s*(\S+)(?:\s+in\s+\S+)?(?:\s+at\s+(.+?))?(?:\s+ETA\s+(\S+))?(?:\s+\(frag\s+\d+/\d+\))?\s*$"
    ).unwrap();
}

/// yt-dlp `--progress-template` arguments producing lines `parse_output_line` understands
pub fn progress_template_args() -> Vec<String> {
    vec![
        "--newline".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{} %(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._downloaded_bytes_str)s|%(progress._total_bytes_str)s|%(progress._eta_str)s",
            PROGRESS_MARKER
        ),
        "--progress-template".to_string(),
        format!(
            "postprocess:{} %(progress.status)s|%(progress.postprocessor)s",
            POSTPROCESS_MARKER
        ),
    ]
}

/// Phase of a raw download callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Finished,
    Other,
}

impl DownloadStatus {
    fn parse(s: &str) -> Self {
        match s.trim() {
            "downloading" => Self::Downloading,
            "finished" => Self::Finished,
            _ => Self::Other,
        }
    }
}

/// Progress as yt-dlp reports it (same field names as its progress hook dict)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProgress {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "_percent_str", default)]
    pub percent: Option<String>,
    #[serde(rename = "_speed_str", default)]
    pub speed: Option<String>,
    #[serde(rename = "_downloaded_bytes_str", default)]
    pub downloaded: Option<String>,
    #[serde(rename = "_total_bytes_str", default)]
    pub total: Option<String>,
    #[serde(rename = "_eta_str", default)]
    pub eta: Option<String>,
}

impl RawProgress {
    pub fn status(&self) -> DownloadStatus {
        DownloadStatus::parse(&self.status)
    }

    /// Normalize into the four-field tuple shown to the user
    pub fn normalize(&self) -> ProgressSample {
        let percent = self
            .percent
            .as_deref()
            .map(clean_percent)
            .and_then(|p| p.parse::<f32>().ok())
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);

        ProgressSample {
            percent,
            speed: display_field(self.speed.as_deref()),
            size: format!(
                "{}/{}",
                display_field(self.downloaded.as_deref()),
                display_field(self.total.as_deref())
            ),
            eta: display_field(self.eta.as_deref()),
        }
    }
}

/// Keep only digits and the decimal point: " 45.3%" -> "45.3"
fn clean_percent(raw: &str) -> String {
    ANSI_RE
        .replace_all(raw, "")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

fn display_field(raw: Option<&str>) -> String {
    let value = raw.map(|s| ANSI_RE.replace_all(s, "").trim().to_string());
    match value {
        Some(v) if !v.is_empty() && v != "NA" && v != "N/A" => v,
        _ => "?".to_string(),
    }
}

/// What a line of executable output means to the worker
#[derive(Debug, Clone)]
pub enum OutputLine {
    Download(RawProgress),
    Postprocess(ConversionPhase),
    /// A post-processor reported an intermediate state
    PostprocessOther,
    Other,
}

pub fn parse_output_line(line: &str) -> OutputLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        let fields: Vec<&str> = rest.trim().split('|').collect();
        if fields.len() == 6 {
            return OutputLine::Download(RawProgress {
                status: fields[0].trim().to_string(),
                percent: Some(fields[1].to_string()),
                speed: Some(fields[2].to_string()),
                downloaded: Some(fields[3].to_string()),
                total: Some(fields[4].to_string()),
                eta: Some(fields[5].to_string()),
            });
        }
        return OutputLine::Other;
    }

    if let Some(rest) = line.strip_prefix(POSTPROCESS_MARKER) {
        let status = rest.trim().split('|').next().unwrap_or("").trim();
        return match status {
            "started" => OutputLine::Postprocess(ConversionPhase::Started),
            "finished" => OutputLine::Postprocess(ConversionPhase::Finished),
            _ => OutputLine::PostprocessOther,
        };
    }

    // Plain progress line from builds that ignore the template
    if let Some(caps) = DOWNLOAD_LINE_RE.captures(line) {
        let percent = caps.get(1).map(|m| m.as_str().to_string());
        let finished = percent
            .as_deref()
            .and_then(|p| p.parse::<f32>().ok())
            .is_some_and(|p| p >= 100.0);
        return OutputLine::Download(RawProgress {
            status: if finished { "finished" } else { "downloading" }.to_string(),
            percent,
            speed: caps.get(3).map(|m| m.as_str().to_string()),
            downloaded: None,
            total: caps.get(2).map(|m| m.as_str().to_string()),
            eta: caps.get(4).map(|m| m.as_str().to_string()),
        });
    }

    OutputLine::Other
}

/// Rate limiter for downloading-phase samples.
///
/// A sample arriving inside the interval is held as pending; the latest pending
/// sample is handed back by `take_pending` at the next phase change.
#[derive(Debug)]
pub struct ProgressReporter {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<ProgressSample>,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    /// Returns the sample if it may be emitted now
    pub fn offer(&mut self, sample: ProgressSample, now: Instant) -> Option<ProgressSample> {
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                self.pending = Some(sample);
                return None;
            }
        }
        self.last_emit = Some(now);
        self.pending = None;
        Some(sample)
    }

    pub fn take_pending(&mut self) -> Option<ProgressSample> {
        self.pending.take()
    }
}
