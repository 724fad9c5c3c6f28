//! Video stream decoding
//!
//! Frames are decoded by ffmpeg into packed RGB24 and streamed over a pipe.
//! The decoder process is owned by [`FfmpegVideoStream`] and is killed and
//! reaped when the stream is dropped. End of output only counts as the end of
//! the stream once the decoder has exited successfully.

use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::core::error::{EmoError, Result};
use crate::media::{StreamInfo, Transcoder};

/// One decoded frame, packed RGB24 in (height, width, channel) order
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RawFrame {
    /// Build from packed RGB bytes; length must be `width * height * 3`
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(EmoError::invalid_input(
                "frame",
                format!(
                    "{}x{} RGB frame needs {} bytes, got {}",
                    width,
                    height,
                    expected,
                    data.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Sequential access to the frames of a video stream
pub trait VideoStream {
    /// Next frame, or `None` once the stream is exhausted
    fn read_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Restart the stream at frame 0
    fn rewind(&mut self) -> Result<()>;
}

/// ffmpeg-backed stream over the first video track of a file
pub struct FfmpegVideoStream {
    transcoder: Transcoder,
    path: PathBuf,
    info: StreamInfo,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegVideoStream {
    /// Probe the file and start decoding at frame 0
    pub fn open(transcoder: &Transcoder, path: &Path) -> Result<Self> {
        let info = transcoder
            .probe_video(path)
            .map_err(|m| EmoError::video_decode(path, format!("cannot open video stream: {}", m)))?;
        debug!(
            "Opened {:?}: {}x{} {} @ {:.2} fps",
            path, info.width, info.height, info.codec, info.framerate
        );

        let mut stream = Self {
            transcoder: transcoder.clone(),
            path: path.to_path_buf(),
            info,
            child: None,
            stdout: None,
            stderr: None,
        };
        stream.start()?;
        Ok(stream)
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn start(&mut self) -> Result<()> {
        self.stop();

        // Autorotation would make the decoded size disagree with the probe
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-noautorotate".into(),
            "-i".into(),
            self.path.as_os_str().to_os_string(),
            "-map".into(),
            "0:v:0".into(),
            "-vsync".into(),
            "passthrough".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-".into(),
        ];

        let mut child = self
            .transcoder
            .spawn_piped(&args)
            .map_err(|e| EmoError::video_decode(&self.path, format!("cannot start decoder: {}", e)))?;
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut message = String::new();
                let _ = stderr.read_to_string(&mut message);
                message
            })
        });
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        // The drain thread ends once the killed decoder's pipe closes
        self.stderr = None;
    }

    /// Reap the decoder after its output ended; a failed exit is a decode error
    fn finish(&mut self) -> Result<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| EmoError::video_decode(&self.path, format!("cannot reap decoder: {}", e)))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }
        Err(EmoError::video_decode(
            &self.path,
            format!("decoder exited with {}: {}", status, stderr.trim()),
        ))
    }
}

impl VideoStream for FfmpegVideoStream {
    fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        let frame_len = self.frame_len();
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| EmoError::video_decode(&self.path, "decoder is not running"))?;

        let mut buf = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(EmoError::video_decode(
                        &self.path,
                        format!("frame read failed: {}", e),
                    ))
                }
            }
        }

        if filled < frame_len {
            self.finish()?;
            if filled > 0 {
                warn!(
                    "Dropping truncated trailing frame from {:?} ({} of {} bytes)",
                    self.path, filled, frame_len
                );
            }
            return Ok(None);
        }

        RawFrame::from_rgb(self.info.width, self.info.height, buf).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.start()
    }
}

impl Drop for FfmpegVideoStream {
    fn drop(&mut self) {
        self.stop();
    }
}
