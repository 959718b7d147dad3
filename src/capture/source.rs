//! Live media source handles
//!
//! A [`MediaSource`] is one independently acquired stream (screen, camera, or
//! microphone). Producers feed frames through a [`SourceFeeder`]; consumers
//! take the tracks out of the handle. Each source carries an `ended` watch
//! that fires at most once when the stream stops for a reason the engine did
//! not initiate (revocation).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Kind of a media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Screen/display capture (video + optional system audio)
    Screen,
    /// Camera capture (video only)
    Camera,
    /// Microphone capture (audio only)
    Microphone,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Screen => write!(f, "screen"),
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::Microphone => write!(f, "microphone"),
        }
    }
}

/// One captured video frame (BGRA pixels).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw pixel data (BGRA format)
    pub data: Vec<u8>,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Bytes per row (may include padding)
    pub bytes_per_row: u32,

    /// Timestamp in milliseconds since the source started
    pub timestamp_ms: f64,
}

/// One captured audio buffer (interleaved f32 samples).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved samples in the -1.0..=1.0 range
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Timestamp in milliseconds since the source started
    pub timestamp_ms: f64,
}

impl AudioFrame {
    /// Duration covered by this buffer, in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        frames * 1000.0 / self.sample_rate as f64
    }
}

/// Declared geometry and cadence of a video track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Declared shape of an audio track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Receiving end of a source's video frames.
#[derive(Debug)]
pub struct VideoTrack {
    rx: mpsc::Receiver<VideoFrame>,
    format: VideoFormat,
}

impl VideoTrack {
    /// Declared format of the track.
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Receive the next frame. `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<VideoFrame> {
        self.rx.try_recv().ok()
    }
}

/// Receiving end of a source's audio buffers.
#[derive(Debug)]
pub struct AudioTrack {
    rx: mpsc::Receiver<AudioFrame>,
    format: AudioFormat,
}

impl AudioTrack {
    /// Bare track pair for derived audio (the mixer's output).
    pub(crate) fn channel(
        format: AudioFormat,
        capacity: usize,
    ) -> (mpsc::Sender<AudioFrame>, AudioTrack) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, AudioTrack { rx, format })
    }

    /// Declared format of the track.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Receive the next buffer. `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        self.rx.try_recv().ok()
    }
}

/// Shape of the channels backing a new source.
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub video: Option<VideoFormat>,
    pub audio: Option<AudioFormat>,
}

/// Per-track channel capacity. Producers block (async) when a consumer
/// falls behind, which bounds memory without dropping frames on the floor.
const TRACK_CAPACITY: usize = 16;

/// Create a connected producer/consumer pair for one source.
///
/// The [`SourceFeeder`] goes to the capture backend; the [`MediaSource`] is
/// the handle the engine holds.
pub fn source_channel(spec: SourceSpec, label: impl Into<String>) -> (SourceFeeder, MediaSource) {
    let live = Arc::new(AtomicBool::new(true));
    let (ended_tx, ended_rx) = watch::channel(false);

    let (video_tx, video) = match spec.video {
        Some(format) => {
            let (tx, rx) = mpsc::channel(TRACK_CAPACITY);
            (Some(tx), Some(VideoTrack { rx, format }))
        }
        None => (None, None),
    };
    let (audio_tx, audio) = match spec.audio {
        Some(format) => {
            let (tx, rx) = mpsc::channel(TRACK_CAPACITY);
            (Some(tx), Some(AudioTrack { rx, format }))
        }
        None => (None, None),
    };

    let feeder = SourceFeeder {
        kind: spec.kind,
        video: video_tx,
        audio: audio_tx,
        live: live.clone(),
        ended: ended_tx,
    };
    let source = MediaSource {
        kind: spec.kind,
        label: label.into(),
        video,
        audio,
        live,
        ended: ended_rx,
    };
    (feeder, source)
}

/// Producer side of a source. Held by the capture backend.
pub struct SourceFeeder {
    kind: SourceKind,
    /// Video frame sink, if the source carries video.
    video: Option<mpsc::Sender<VideoFrame>>,
    /// Audio buffer sink, if the source carries audio.
    audio: Option<mpsc::Sender<AudioFrame>>,
    live: Arc<AtomicBool>,
    ended: watch::Sender<bool>,
}

impl SourceFeeder {
    /// Whether the engine still wants frames. Producers should exit their
    /// capture loop once this turns false.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Push a video frame. Returns `false` once the source is stopped or the
    /// consumer is gone; the producer should then wind down.
    pub async fn push_video(&self, frame: VideoFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.video {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Push an audio buffer. Returns `false` once the source is stopped or
    /// the consumer is gone.
    pub async fn push_audio(&self, frame: AudioFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.audio {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Blocking video push for dedicated capture threads (camera backends).
    /// Must not be called from async context.
    pub fn push_video_blocking(&self, frame: VideoFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.video {
            Some(tx) => tx.blocking_send(frame).is_ok(),
            None => false,
        }
    }

    /// Non-async audio push for real-time capture callbacks. Drops the buffer
    /// when the consumer is saturated rather than blocking the audio thread.
    pub fn push_audio_nonblocking(&self, frame: AudioFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        match &self.audio {
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!("{} consumer saturated, dropping audio buffer", self.kind);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Report that the stream ended outside the engine's control (the user
    /// revoked sharing, the device went away). Fires the `ended` watch at
    /// most once and stops the source. Engine-initiated stops never pass
    /// through here, so a stop the controller issued is not re-reported as a
    /// revocation.
    pub fn revoke(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::info!("{} source revoked externally", self.kind);
            let _ = self.ended.send(true);
        }
    }
}

/// Handle for one acquired live source.
pub struct MediaSource {
    kind: SourceKind,
    label: String,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    live: Arc<AtomicBool>,
    ended: watch::Receiver<bool>,
}

impl MediaSource {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Human-readable device/source label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the video track is still attached to this handle.
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Whether the audio track is still attached to this handle.
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Declared video format, while the track is attached.
    pub fn video_format(&self) -> Option<VideoFormat> {
        self.video.as_ref().map(|t| t.format())
    }

    /// Move the video track out of the handle. The handle keeps ownership of
    /// the source lifetime; only the frame stream is transferred.
    pub fn take_video(&mut self) -> Option<VideoTrack> {
        self.video.take()
    }

    /// Move the audio track out of the handle.
    pub fn take_audio(&mut self) -> Option<AudioTrack> {
        self.audio.take()
    }

    /// Whether the producer is still running.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst) && !*self.ended.borrow()
    }

    /// Watch that flips to `true` if the source is revoked externally.
    /// Engine-initiated stops close the watch without firing it.
    pub fn ended_watch(&self) -> watch::Receiver<bool> {
        self.ended.clone()
    }

    /// Stop the producer. Idempotent; never fires the `ended` watch.
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("stopping {} source ({})", self.kind, self.label);
        }
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("has_video", &self.video.is_some())
            .field("has_audio", &self.audio.is_some())
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_spec() -> SourceSpec {
        SourceSpec {
            kind: SourceKind::Microphone,
            video: None,
            audio: Some(AudioFormat {
                sample_rate: 48_000,
                channels: 1,
            }),
        }
    }

    #[test]
    fn audio_frame_duration() {
        let frame = AudioFrame {
            samples: vec![0.0; 4800],
            sample_rate: 48_000,
            channels: 1,
            timestamp_ms: 0.0,
        };
        assert!((frame.duration_ms() - 100.0).abs() < f64::EPSILON);

        let stereo = AudioFrame {
            samples: vec![0.0; 9600],
            sample_rate: 48_000,
            channels: 2,
            timestamp_ms: 0.0,
        };
        assert!((stereo.duration_ms() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stop_does_not_fire_ended_watch() {
        let (feeder, source) = source_channel(audio_spec(), "test-mic");
        let mut ended = source.ended_watch();

        source.stop();
        assert!(!feeder.is_live());
        assert!(!source.is_live());

        // Producer winds down and drops the feeder; the watch closes without
        // ever carrying `true`.
        drop(feeder);
        assert!(ended.changed().await.is_err());
        assert!(!*ended.borrow());
    }

    #[tokio::test]
    async fn revoke_fires_ended_watch_once() {
        let (feeder, source) = source_channel(audio_spec(), "test-mic");
        let mut ended = source.ended_watch();

        feeder.revoke();
        feeder.revoke();

        ended.changed().await.unwrap();
        assert!(*ended.borrow());
        assert!(!source.is_live());
    }

    #[tokio::test]
    async fn push_after_stop_is_rejected() {
        let (feeder, mut source) = source_channel(audio_spec(), "test-mic");
        let frame = AudioFrame {
            samples: vec![0.0; 480],
            sample_rate: 48_000,
            channels: 1,
            timestamp_ms: 0.0,
        };
        assert!(feeder.push_audio(frame.clone()).await);
        source.stop();
        assert!(!feeder.push_audio(frame).await);

        // The buffer pushed before the stop is still readable.
        let mut track = source.take_audio().unwrap();
        assert!(track.recv().await.is_some());
    }
}
