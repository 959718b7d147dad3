//! FFmpeg encoder backend
//!
//! Pipes raw BGRA video into an `ffmpeg` child over stdin and mixed f32 PCM
//! over a Unix socket, reading the muxed container back from the child's
//! stdout. Only stream-safe muxer settings are used (fragmented MP4, live
//! Matroska/WebM), so the bytes drained between chunk ticks concatenate into
//! a playable file.

use super::container::ContainerType;
use super::encoder::{EncoderBackend, EncoderParams};
use super::RecorderError;
use crate::capture::{AudioFrame, VideoFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

const SOCKET_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);
const CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that an `ffmpeg` binary is on the PATH.
pub fn ffmpeg_available() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

struct Running {
    child: Child,
    video_in: ChildStdin,
    audio_in: UnixStream,
    out_buf: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
    // Holds the socket path alive for the child's lifetime.
    _dir: tempfile::TempDir,
}

/// Encoder backend running a muxing `ffmpeg` child process.
pub struct FfmpegEncoder {
    available: bool,
    running: Option<Running>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        let available = ffmpeg_available();
        if !available {
            tracing::warn!("ffmpeg not found on PATH; encoder reports no supported containers");
        }
        Self {
            available,
            running: None,
        }
    }

    fn running_mut(&mut self) -> Result<&mut Running, RecorderError> {
        self.running.as_mut().ok_or(RecorderError::NotRecording)
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn codec_args(container: ContainerType) -> Vec<&'static str> {
    match container {
        ContainerType::Mp4 => vec![
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-movflags",
            "+frag_keyframe+empty_moov",
            "-f",
            "mp4",
        ],
        ContainerType::Matroska => vec![
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-f",
            "matroska",
        ],
        ContainerType::Webm => vec![
            "-c:v",
            "libvpx-vp9",
            "-deadline",
            "realtime",
            "-cpu-used",
            "8",
            "-c:a",
            "libopus",
            "-f",
            "webm",
        ],
    }
}

#[async_trait]
impl EncoderBackend for FfmpegEncoder {
    fn supports(&self, _container: ContainerType) -> bool {
        self.available
    }

    async fn start(
        &mut self,
        container: ContainerType,
        params: EncoderParams,
    ) -> Result<(), RecorderError> {
        let dir = tempfile::tempdir()?;
        let sock_path = dir.path().join("audio.sock");
        let listener = UnixListener::bind(&sock_path)?;

        let video_size = format!("{}x{}", params.video.width, params.video.height);
        let framerate = params.video.frame_rate.max(1).to_string();
        let sample_rate = params.audio.sample_rate.to_string();
        let channels = params.audio.channels.max(1).to_string();
        let audio_url = format!("unix://{}", sock_path.display());

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            // Video: raw BGRA frames on stdin.
            .args(["-f", "rawvideo", "-pixel_format", "bgra"])
            .args(["-video_size", &video_size, "-framerate", &framerate])
            .args(["-i", "pipe:0"])
            // Audio: mixed f32 PCM over the unix socket.
            .args(["-f", "f32le", "-ar", &sample_rate, "-ac", &channels])
            .args(["-i", &audio_url])
            .args(codec_args(container))
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        tracing::info!(%container, video = %video_size, "starting ffmpeg encoder");

        let mut child = cmd
            .spawn()
            .map_err(|e| RecorderError::EncoderFault(format!("failed to start ffmpeg: {e}")))?;

        let video_in = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::EncoderFault("ffmpeg stdin unavailable".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::EncoderFault("ffmpeg stdout unavailable".into()))?;

        // ffmpeg connects to its audio input as a client during demux init.
        let (audio_in, _addr) = tokio::time::timeout(SOCKET_ACCEPT_TIMEOUT, listener.accept())
            .await
            .map_err(|_| {
                RecorderError::EncoderFault("ffmpeg did not open its audio input".into())
            })??;

        let out_buf = Arc::new(Mutex::new(Vec::new()));
        let reader_buf = out_buf.clone();
        let reader = tokio::spawn(async move {
            let mut chunk = [0u8; 64 * 1024];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => reader_buf.lock().extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::error!("ffmpeg stdout read error: {e}");
                        break;
                    }
                }
            }
        });

        self.running = Some(Running {
            child,
            video_in,
            audio_in,
            out_buf,
            reader,
            _dir: dir,
        });
        Ok(())
    }

    async fn push_video(&mut self, frame: &VideoFrame) -> Result<(), RecorderError> {
        let running = self.running_mut()?;
        running
            .video_in
            .write_all(&frame.data)
            .await
            .map_err(|e| RecorderError::EncoderFault(format!("video pipe: {e}")))
    }

    async fn push_audio(&mut self, frame: &AudioFrame) -> Result<(), RecorderError> {
        let running = self.running_mut()?;
        let mut bytes = Vec::with_capacity(frame.samples.len() * 4);
        for sample in &frame.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        running
            .audio_in
            .write_all(&bytes)
            .await
            .map_err(|e| RecorderError::EncoderFault(format!("audio socket: {e}")))
    }

    async fn take_output(&mut self) -> Result<Vec<u8>, RecorderError> {
        let running = self.running_mut()?;
        Ok(std::mem::take(&mut *running.out_buf.lock()))
    }

    async fn finish(&mut self) -> Result<Vec<u8>, RecorderError> {
        let mut running = self.running.take().ok_or(RecorderError::NotRecording)?;

        // Close both inputs so the child drains and exits.
        running
            .video_in
            .shutdown()
            .await
            .map_err(|e| RecorderError::EncoderFault(format!("closing video pipe: {e}")))?;
        drop(running.video_in);
        let _ = running.audio_in.shutdown().await;
        drop(running.audio_in);

        match tokio::time::timeout(CHILD_EXIT_TIMEOUT, running.child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    tracing::warn!("ffmpeg exited with status {status}");
                }
            }
            Ok(Err(e)) => {
                return Err(RecorderError::EncoderFault(format!(
                    "waiting for ffmpeg: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!("ffmpeg did not exit in time, killing");
                let _ = running.child.kill().await;
            }
        }

        let _ = running.reader.await;
        let tail = std::mem::take(&mut *running.out_buf.lock());
        tracing::info!(tail_bytes = tail.len(), "ffmpeg encoder finished");
        Ok(tail)
    }
}
