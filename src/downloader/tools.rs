// Tool availability check for yt-dlp, ffmpeg and the Python yt_dlp module
//
// Only reports what is present. Installing missing tools is the front-end's job.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    /// yt-dlp executable
    Extractor,
    /// ffmpeg executable
    Transcoder,
    /// Python interpreter with the yt_dlp module importable
    Library,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Extractor => "yt-dlp",
            ToolType::Transcoder => "ffmpeg",
            ToolType::Library => "python yt_dlp",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub is_available: bool,
}

/// Presence report for the two executables the worker cares about
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStatus {
    pub extractor: Option<PathBuf>,
    pub transcoder: Option<PathBuf>,
}

impl ToolStatus {
    pub fn all_present(&self) -> bool {
        self.extractor.is_some() && self.transcoder.is_some()
    }
}

/// Check candidate paths for the transcoder and the extractor executable
pub fn check_tools(transcoder_candidates: &[PathBuf], extractor_candidates: &[PathBuf]) -> ToolStatus {
    ToolStatus {
        extractor: first_existing(extractor_candidates),
        transcoder: first_existing(transcoder_candidates),
    }
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

pub struct ToolManager {
    base_dir: PathBuf,
}

impl ToolManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `<base>/ffmpeg/bin`, where a bundled ffmpeg lives
    pub fn local_transcoder_dir(&self) -> PathBuf {
        self.base_dir.join("ffmpeg").join("bin")
    }

    /// yt-dlp candidates: application folder first, then common install paths
    pub fn extractor_candidates(&self) -> Vec<PathBuf> {
        let name = exe_name("yt-dlp");
        let mut paths = vec![self.base_dir.join(&name)];
        paths.extend(system_candidates(&name));
        paths
    }

    /// ffmpeg candidates: bundled `ffmpeg/bin` first, then common install paths
    pub fn transcoder_candidates(&self) -> Vec<PathBuf> {
        let name = exe_name("ffmpeg");
        let mut paths = vec![self.local_transcoder_dir().join(&name)];
        paths.extend(system_candidates(&name));
        paths
    }

    pub fn status(&self) -> ToolStatus {
        check_tools(&self.transcoder_candidates(), &self.extractor_candidates())
    }

    pub fn get_tool_info(&self, tool_type: ToolType, python_cmd: &str) -> ToolInfo {
        let path = match tool_type {
            ToolType::Extractor => first_existing(&self.extractor_candidates()),
            ToolType::Transcoder => first_existing(&self.transcoder_candidates()),
            ToolType::Library => {
                python_has_module(python_cmd, "yt_dlp").then(|| PathBuf::from(python_cmd))
            }
        };
        let version = path.as_ref().and_then(|p| get_version(p, tool_type));

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub fn get_all_tools(&self, python_cmd: &str) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::Extractor, python_cmd),
            self.get_tool_info(ToolType::Transcoder, python_cmd),
            self.get_tool_info(ToolType::Library, python_cmd),
        ]
    }
}

fn system_candidates(name: &str) -> Vec<PathBuf> {
    ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"]
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .collect()
}

/// Quick import check; avoids noisy failures when the module is missing
pub fn python_has_module(python_cmd: &str, module: &str) -> bool {
    let code = format!("import {}", module);
    match Command::new(python_cmd).args(["-c", &code]).output() {
        Ok(out) => out.status.success(),
        Err(_) => false,
    }
}

fn get_version(path: &Path, tool_type: ToolType) -> Option<String> {
    let output = match tool_type {
        ToolType::Extractor => Command::new(path).arg("--version").output(),
        ToolType::Transcoder => Command::new(path).arg("-version").output(),
        ToolType::Library => Command::new(path)
            .args(["-c", "import yt_dlp.version; print(yt_dlp.version.__version__)"])
            .output(),
    };

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tools_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let ytdlp = dir.path().join("yt-dlp");
        std::fs::write(&ytdlp, b"#!/bin/sh\n").unwrap();
        let missing_ffmpeg = dir.path().join("ffmpeg").join("bin").join("ffmpeg");

        let status = check_tools(&[missing_ffmpeg], &[dir.path().join("nope"), ytdlp.clone()]);

        assert_eq!(status.extractor, Some(ytdlp));
        assert!(status.transcoder.is_none());
        assert!(!status.all_present());
    }

    #[test]
    fn test_local_candidates_come_first() {
        let manager = ToolManager::new("/opt/app");
        let extractors = manager.extractor_candidates();
        assert_eq!(extractors[0], Path::new("/opt/app").join(exe_name("yt-dlp")));
        let transcoders = manager.transcoder_candidates();
        assert_eq!(
            transcoders[0],
            Path::new("/opt/app/ffmpeg/bin").join(exe_name("ffmpeg"))
        );
    }

    #[test]
    fn test_directory_is_not_a_tool() {
        let dir = tempfile::tempdir().unwrap();
        let status = check_tools(&[dir.path().to_path_buf()], &[]);
        assert!(status.transcoder.is_none());
    }
}
