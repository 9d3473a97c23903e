// FormatSelector - format expressions and post-processing from user choices
//
// Video: best video at or below the requested height plus best audio, degrading
// to unrestricted best video + best audio. Audio: always the best audio source;
// the target codec is applied afterwards by ffmpeg, not by the selector.

use serde::{Deserialize, Serialize};

use super::models::{JobRequest, MediaKind};

/// Unconstrained selector used for the one-shot fallback retry
pub const FALLBACK_FORMAT: &str = "best";

const BEST_VIDEO: &str = "bestvideo+bestaudio/best";
const BEST_AUDIO: &str = "bestaudio/best";

/// ffmpeg step that runs after the raw transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostProcessing {
    /// Remux/re-encode video into the container
    RecodeVideo { container: String },
    /// Extract audio with the codec at the given quality (kbps)
    ExtractAudio { codec: String, quality: String },
}

impl PostProcessing {
    pub fn for_request(request: &JobRequest, audio_quality: &str) -> Option<Self> {
        match request.kind {
            MediaKind::Video if !request.video_format.is_empty() => Some(Self::RecodeVideo {
                container: request.video_format.clone(),
            }),
            MediaKind::Video => None,
            MediaKind::Audio => Some(Self::ExtractAudio {
                codec: if request.audio_format.is_empty() {
                    "mp3".to_string()
                } else {
                    request.audio_format.clone()
                },
                quality: audio_quality.to_string(),
            }),
        }
    }

    /// yt-dlp command-line flags for this step
    pub fn cli_args(&self) -> Vec<String> {
        match self {
            Self::RecodeVideo { container } => {
                vec!["--recode-video".to_string(), container.clone()]
            }
            Self::ExtractAudio { codec, quality } => vec![
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                codec.clone(),
                "--audio-quality".to_string(),
                format!("{}K", quality),
            ],
        }
    }

    /// `postprocessors` entry for the yt_dlp library options
    pub fn library_options(&self) -> serde_json::Value {
        match self {
            Self::RecodeVideo { container } => serde_json::json!({
                "key": "FFmpegVideoConvertor",
                "preferedformat": container,
            }),
            Self::ExtractAudio { codec, quality } => serde_json::json!({
                "key": "FFmpegExtractAudio",
                "preferredcodec": codec,
                "preferredquality": quality,
            }),
        }
    }
}

pub struct FormatSelector;

impl FormatSelector {
    /// Format expression for a job
    pub fn for_request(request: &JobRequest) -> String {
        match request.kind {
            MediaKind::Audio => BEST_AUDIO.to_string(),
            MediaKind::Video => Self::video_spec(&request.resolution),
        }
    }

    /// Numeric height from a resolution label ("1080p" -> "1080").
    /// `None` for "Original" and for labels without digits.
    pub fn height_limit(label: &str) -> Option<String> {
        if label.trim().eq_ignore_ascii_case("original") {
            return None;
        }
        let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            Some(digits)
        }
    }

    pub fn video_spec(label: &str) -> String {
        match Self::height_limit(label) {
            Some(height) => format!(
                "bestvideo[height<={h}]+bestaudio/best[height<={h}]/{best}",
                h = height,
                best = BEST_VIDEO
            ),
            None => BEST_VIDEO.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_limit_takes_digits_only() {
        for (label, expected) in [("720p", "720"), ("1080p", "1080"), ("2160p", "2160"), ("360p", "360")] {
            assert_eq!(FormatSelector::height_limit(label).as_deref(), Some(expected));

            let spec = FormatSelector::video_spec(label);
            assert!(spec.contains(&format!("[height<={}]", expected)), "{}", spec);
            // every height constraint carries exactly the digits
            for part in spec.split("[height<=").skip(1) {
                let value = part.split(']').next().unwrap();
                assert_eq!(value, expected);
            }
        }
    }

    #[test]
    fn test_original_has_no_height_constraint() {
        assert_eq!(FormatSelector::height_limit("Original"), None);
        let spec = FormatSelector::video_spec("Original");
        assert_eq!(spec, "bestvideo+bestaudio/best");
        assert!(!spec.contains("height"));
    }

    #[test]
    fn test_constrained_spec_degrades_to_unrestricted() {
        let spec = FormatSelector::video_spec("480p");
        assert!(spec.ends_with("/bestvideo+bestaudio/best"));
    }

    #[test]
    fn test_audio_ignores_codec() {
        let mp3 = JobRequest::audio("u", "mp3", "/tmp");
        let opus = JobRequest::audio("u", "opus", "/tmp");
        assert_eq!(FormatSelector::for_request(&mp3), "bestaudio/best");
        assert_eq!(FormatSelector::for_request(&opus), "bestaudio/best");
    }

    #[test]
    fn test_post_processing_args() {
        let audio = JobRequest::audio("u", "m4a", "/tmp");
        let pp = PostProcessing::for_request(&audio, "192").unwrap();
        assert_eq!(
            pp.cli_args(),
            vec!["--extract-audio", "--audio-format", "m4a", "--audio-quality", "192K"]
        );
        assert_eq!(pp.library_options()["key"], "FFmpegExtractAudio");

        let video = JobRequest::video("u", "720p", "mkv", "/tmp");
        let pp = PostProcessing::for_request(&video, "192").unwrap();
        assert_eq!(pp.cli_args(), vec!["--recode-video", "mkv"]);
        assert_eq!(pp.library_options()["preferedformat"], "mkv");
    }
}
