//! Thin wrapper around the ffmpeg / ffprobe command-line tools
//!
//! Only exit status, stderr and the produced files are inspected; the
//! transcoder itself is a black box.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::MediaConfig;

/// Video stream properties reported by ffprobe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub codec: String,
}

/// Handle on the external transcoder binaries
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl Transcoder {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Run ffmpeg to completion. The error string carries stderr (or the spawn failure).
    pub fn run<I, S>(&self, args: I) -> std::result::Result<(), String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("failed to execute {:?}: {}", self.ffmpeg_path, e))?;

        if !output.status.success() {
            return Err(format!(
                "{:?} exited with {}: {}",
                self.ffmpeg_path,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(())
    }

    /// Spawn ffmpeg with stdout and stderr piped, for streaming decodes.
    /// The caller must drain stderr so the child cannot block on it.
    pub fn spawn_piped<I, S>(&self, args: I) -> std::io::Result<Child>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }

    /// Probe the first video stream of a file
    pub fn probe_video(&self, input: &Path) -> std::result::Result<StreamInfo, String> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v", "error",
                "-print_format", "json",
                "-show_streams",
                "-select_streams", "v:0",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("failed to execute {:?}: {}", self.ffprobe_path, e))?;

        if !output.status.success() {
            return Err(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        parse_probe_output(&output.stdout)
    }
}

fn parse_probe_output(stdout: &[u8]) -> std::result::Result<StreamInfo, String> {
    let json: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|e| format!("invalid ffprobe output: {}", e))?;

    let stream = json["streams"]
        .as_array()
        .and_then(|s| s.first())
        .ok_or_else(|| "no video stream found".to_string())?;

    let width = stream["width"].as_u64().unwrap_or(0) as u32;
    let height = stream["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(format!("video stream has invalid dimensions {}x{}", width, height));
    }

    let codec = stream["codec_name"]
        .as_str()
        .unwrap_or("unknown")
        .to_string();

    // e.g. "30000/1001" or "30"
    let framerate = parse_framerate(
        stream["avg_frame_rate"]
            .as_str()
            .or_else(|| stream["r_frame_rate"].as_str())
            .unwrap_or("0"),
    );

    Ok(StreamInfo {
        width,
        height,
        framerate,
        codec,
    })
}

fn parse_framerate(fps: &str) -> f64 {
    if let Some((num, den)) = fps.split_once('/') {
        let num: f64 = num.parse().unwrap_or(0.0);
        let den: f64 = den.parse().unwrap_or(1.0);
        if den != 0.0 {
            return num / den;
        }
        return 0.0;
    }
    fps.parse().unwrap_or(0.0)
}

/// Seconds as ffmpeg accepts them, millisecond precision
pub fn format_seconds(seconds: f64) -> String {
    format!("{:.3}", seconds)
}
