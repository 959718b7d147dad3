//! Synthetic capture provider
//!
//! Generates deterministic test-pattern video and tone audio without touching
//! any hardware. Used by the demo binary and the test suite, and doubles as
//! the reference [`SourceProvider`] implementation: scripted denials and
//! revocations let callers exercise every acquisition failure path the real
//! host can produce.

use super::provider::{AcquireError, MicrophoneOptions, SourceProvider};
use super::source::{
    source_channel, AudioFormat, AudioFrame, MediaSource, SourceFeeder, SourceKind, SourceSpec,
    VideoFormat, VideoFrame,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

/// Scripted behavior for a [`SyntheticProvider`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Refuse screen acquisition with `PermissionDenied`.
    pub deny_screen: bool,

    /// Refuse screen acquisition with `NoSourceSelected` (picker dismissed).
    pub dismiss_screen_picker: bool,

    /// Refuse camera acquisition with `PermissionDenied`.
    pub deny_camera: bool,

    /// Refuse microphone acquisition with `PermissionDenied`.
    pub deny_microphone: bool,

    /// Whether the screen source carries a system-audio track.
    pub screen_audio: bool,

    /// Revoke the screen source this long after acquisition, as if the user
    /// stopped sharing at the OS level.
    pub revoke_screen_after: Option<Duration>,

    /// Video geometry for screen and camera sources.
    pub video: VideoFormat,

    /// Sample rate for generated audio.
    pub sample_rate: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            deny_screen: false,
            dismiss_screen_picker: false,
            deny_camera: false,
            deny_microphone: false,
            screen_audio: false,
            revoke_screen_after: None,
            video: VideoFormat {
                width: 640,
                height: 360,
                frame_rate: 10,
            },
            sample_rate: 48_000,
        }
    }
}

/// Handle for revoking the most recently acquired screen source, as the user
/// would by stopping the share from OS chrome.
#[derive(Clone)]
pub struct ScreenRevoker {
    slot: Arc<Mutex<Option<Arc<SourceFeeder>>>>,
}

impl ScreenRevoker {
    /// Fire the revocation. No-op before a screen source exists.
    pub fn revoke(&self) {
        if let Some(feeder) = self.slot.lock().as_ref() {
            feeder.revoke();
        }
    }
}

/// Deterministic provider producing test-pattern frames and tone audio.
pub struct SyntheticProvider {
    config: SyntheticConfig,
    screen_feeder: Arc<Mutex<Option<Arc<SourceFeeder>>>>,
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            screen_feeder: Arc::new(Mutex::new(None)),
        }
    }

    /// External-revocation handle for the screen source.
    pub fn screen_revoker(&self) -> ScreenRevoker {
        ScreenRevoker {
            slot: self.screen_feeder.clone(),
        }
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.config.sample_rate,
            channels: 1,
        }
    }
}

#[async_trait]
impl SourceProvider for SyntheticProvider {
    async fn acquire_screen(&self) -> Result<MediaSource, AcquireError> {
        if self.config.deny_screen {
            return Err(AcquireError::PermissionDenied(SourceKind::Screen));
        }
        if self.config.dismiss_screen_picker {
            return Err(AcquireError::NoSourceSelected(SourceKind::Screen));
        }

        let spec = SourceSpec {
            kind: SourceKind::Screen,
            video: Some(self.config.video),
            audio: self.config.screen_audio.then(|| self.audio_format()),
        };
        let (feeder, source) = source_channel(spec, "synthetic-display");
        let feeder = Arc::new(feeder);
        *self.screen_feeder.lock() = Some(feeder.clone());

        if let Some(delay) = self.config.revoke_screen_after {
            let revoke_feeder = feeder.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                revoke_feeder.revoke();
            });
        }

        spawn_video_producer(feeder.clone(), self.config.video);
        if self.config.screen_audio {
            // Quiet hum standing in for system audio.
            spawn_tone_producer(feeder, self.audio_format(), 110.0, 0.05);
        }
        Ok(source)
    }

    async fn acquire_camera(&self) -> Result<MediaSource, AcquireError> {
        if self.config.deny_camera {
            return Err(AcquireError::PermissionDenied(SourceKind::Camera));
        }
        let spec = SourceSpec {
            kind: SourceKind::Camera,
            video: Some(self.config.video),
            audio: None,
        };
        let (feeder, source) = source_channel(spec, "synthetic-camera");
        spawn_video_producer(Arc::new(feeder), self.config.video);
        Ok(source)
    }

    async fn acquire_microphone(
        &self,
        options: MicrophoneOptions,
    ) -> Result<MediaSource, AcquireError> {
        if self.config.deny_microphone {
            return Err(AcquireError::PermissionDenied(SourceKind::Microphone));
        }
        tracing::debug!(?options, "synthetic microphone acquired");
        let spec = SourceSpec {
            kind: SourceKind::Microphone,
            video: None,
            audio: Some(self.audio_format()),
        };
        let (feeder, source) = source_channel(spec, "synthetic-microphone");
        spawn_tone_producer(Arc::new(feeder), self.audio_format(), 440.0, 0.2);
        Ok(source)
    }
}

/// Solid-shade BGRA frame whose color walks with the frame index, so
/// successive frames are distinguishable in assertions and ffmpeg output.
fn test_pattern(format: VideoFormat, index: u64) -> VideoFrame {
    let shade = ((index * 7) % 256) as u8;
    let pixel = [shade, shade.wrapping_add(64), shade.wrapping_add(128), 0xff];
    let mut data = Vec::with_capacity((format.width * format.height * 4) as usize);
    for _ in 0..format.width * format.height {
        data.extend_from_slice(&pixel);
    }
    VideoFrame {
        data,
        width: format.width,
        height: format.height,
        bytes_per_row: format.width * 4,
        timestamp_ms: index as f64 * 1000.0 / format.frame_rate.max(1) as f64,
    }
}

fn spawn_video_producer(feeder: Arc<SourceFeeder>, format: VideoFormat) {
    tokio::spawn(async move {
        let frame_interval = Duration::from_millis(1000 / format.frame_rate.max(1) as u64);
        let mut ticker = tokio::time::interval(frame_interval);
        let mut index: u64 = 0;
        while feeder.is_live() {
            ticker.tick().await;
            if !feeder.push_video(test_pattern(format, index)).await {
                break;
            }
            index += 1;
        }
    });
}

/// 100 ms sine-tone buffers at the given frequency and amplitude.
fn spawn_tone_producer(feeder: Arc<SourceFeeder>, format: AudioFormat, hz: f32, amplitude: f32) {
    tokio::spawn(async move {
        let buffer_len = (format.sample_rate / 10).max(1) as usize;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut position: u64 = 0;
        while feeder.is_live() {
            ticker.tick().await;
            let samples: Vec<f32> = (0..buffer_len)
                .map(|i| {
                    let t = (position + i as u64) as f32 / format.sample_rate as f32;
                    (TAU * hz * t).sin() * amplitude
                })
                .collect();
            let frame = AudioFrame {
                samples,
                sample_rate: format.sample_rate,
                channels: format.channels,
                timestamp_ms: position as f64 * 1000.0 / format.sample_rate as f64,
            };
            if !feeder.push_audio(frame).await {
                break;
            }
            position += buffer_len as u64;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn screen_source_produces_frames() {
        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let mut source = provider.acquire_screen().await.unwrap();
        let mut video = source.take_video().unwrap();

        let first = video.recv().await.unwrap();
        let second = video.recv().await.unwrap();
        assert_eq!(first.width, 640);
        assert_eq!(first.data.len(), 640 * 360 * 4);
        assert_ne!(first.data[0], second.data[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_revocation_fires_ended_watch() {
        let config = SyntheticConfig {
            revoke_screen_after: Some(Duration::from_secs(2)),
            ..SyntheticConfig::default()
        };
        let provider = SyntheticProvider::new(config);
        let source = provider.acquire_screen().await.unwrap();
        let mut ended = source.ended_watch();

        ended.changed().await.unwrap();
        assert!(*ended.borrow());
        assert!(!source.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_revoker_targets_current_screen() {
        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let revoker = provider.screen_revoker();
        // Before acquisition the revoker is a no-op.
        revoker.revoke();

        let source = provider.acquire_screen().await.unwrap();
        let mut ended = source.ended_watch();
        revoker.revoke();
        ended.changed().await.unwrap();
        assert!(*ended.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn tone_is_audible_and_mono() {
        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let mut source = provider
            .acquire_microphone(MicrophoneOptions::default())
            .await
            .unwrap();
        let mut audio = source.take_audio().unwrap();
        let frame = audio.recv().await.unwrap();
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.samples.len(), 4800);
        assert!(frame.samples.iter().any(|s| s.abs() > 0.1));
    }
}
