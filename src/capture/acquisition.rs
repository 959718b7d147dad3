//! Device acquisition and source-set lifecycle
//!
//! [`DeviceAcquisition`] owns the live handles for one capture session: the
//! mandatory screen source, the optional camera preview, and the optional
//! microphone. It is the only place source handles live, so releasing it
//! releases everything. All release paths are idempotent and safe from any
//! state.

use super::provider::{AcquireError, MicrophoneOptions, SourceProvider};
use super::source::MediaSource;
use crate::capture::SourceKind;

/// The live handles acquired for one session.
#[derive(Debug, Default)]
pub struct MediaSourceSet {
    /// Combined video + optional-audio stream. Mandatory for recording.
    pub screen: Option<MediaSource>,

    /// Optional video-only preview stream, toggleable while not recording.
    pub camera: Option<MediaSource>,

    /// Optional audio-only stream, captured once at countdown entry.
    pub microphone: Option<MediaSource>,
}

impl MediaSourceSet {
    /// Whether any handle is still held.
    pub fn holds_any(&self) -> bool {
        self.screen.is_some() || self.camera.is_some() || self.microphone.is_some()
    }

    fn stop_all(&mut self) {
        for source in [
            self.screen.take(),
            self.camera.take(),
            self.microphone.take(),
        ]
        .into_iter()
        .flatten()
        {
            source.stop();
        }
    }
}

/// Acquires and holds the session's sources through a [`SourceProvider`].
pub struct DeviceAcquisition {
    provider: Box<dyn SourceProvider>,
    sources: MediaSourceSet,
}

impl DeviceAcquisition {
    pub fn new(provider: Box<dyn SourceProvider>) -> Self {
        Self {
            provider,
            sources: MediaSourceSet::default(),
        }
    }

    /// Request the screen stream. The returned handle must carry video;
    /// a provider handing back an audio-only stream is a backend error.
    pub async fn acquire_screen(&mut self) -> Result<(), AcquireError> {
        if self.sources.screen.is_some() {
            return Ok(());
        }
        let source = self.provider.acquire_screen().await?;
        if !source.has_video() {
            source.stop();
            return Err(AcquireError::Backend(
                "screen source carries no video track".into(),
            ));
        }
        tracing::info!(
            label = source.label(),
            has_audio = source.has_audio(),
            "screen source acquired"
        );
        self.sources.screen = Some(source);
        Ok(())
    }

    /// Request the camera preview stream. Idempotent: a second call while a
    /// camera is held is a no-op.
    pub async fn acquire_camera(&mut self) -> Result<(), AcquireError> {
        if self.sources.camera.is_some() {
            return Ok(());
        }
        let source = self.provider.acquire_camera().await?;
        tracing::info!(label = source.label(), "camera source acquired");
        self.sources.camera = Some(source);
        Ok(())
    }

    /// Release the camera preview. Idempotent.
    pub fn release_camera(&mut self) {
        if let Some(camera) = self.sources.camera.take() {
            camera.stop();
            tracing::info!("camera source released");
        }
    }

    /// Request the microphone stream. Called once, at countdown entry, so
    /// toggling the flag during setup never re-prompts the user.
    pub async fn acquire_microphone(
        &mut self,
        options: MicrophoneOptions,
    ) -> Result<(), AcquireError> {
        if self.sources.microphone.is_some() {
            return Ok(());
        }
        let source = self.provider.acquire_microphone(options).await?;
        if !source.has_audio() {
            source.stop();
            return Err(AcquireError::Backend(
                "microphone source carries no audio track".into(),
            ));
        }
        tracing::info!(label = source.label(), ?options, "microphone source acquired");
        self.sources.microphone = Some(source);
        Ok(())
    }

    /// The held screen source, if any.
    pub fn screen(&self) -> Option<&MediaSource> {
        self.sources.screen.as_ref()
    }

    pub fn screen_mut(&mut self) -> Option<&mut MediaSource> {
        self.sources.screen.as_mut()
    }

    pub fn camera(&self) -> Option<&MediaSource> {
        self.sources.camera.as_ref()
    }

    pub fn microphone_mut(&mut self) -> Option<&mut MediaSource> {
        self.sources.microphone.as_mut()
    }

    /// Whether a given source is held and still live.
    pub fn is_live(&self, kind: SourceKind) -> bool {
        let source = match kind {
            SourceKind::Screen => self.sources.screen.as_ref(),
            SourceKind::Camera => self.sources.camera.as_ref(),
            SourceKind::Microphone => self.sources.microphone.as_ref(),
        };
        source.map(MediaSource::is_live).unwrap_or(false)
    }

    /// Whether any handle is still held. Used to verify teardown.
    pub fn holds_any(&self) -> bool {
        self.sources.holds_any()
    }

    /// Stop every still-live track across screen, camera, and microphone.
    /// Safe to call multiple times and from any state.
    pub fn release_all(&mut self) {
        if self.sources.holds_any() {
            tracing::info!("releasing all acquired sources");
        }
        self.sources.stop_all();
    }
}

impl std::fmt::Debug for DeviceAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAcquisition")
            .field("sources", &self.sources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{SyntheticConfig, SyntheticProvider};

    fn acquisition() -> DeviceAcquisition {
        DeviceAcquisition::new(Box::new(SyntheticProvider::new(SyntheticConfig::default())))
    }

    #[tokio::test]
    async fn screen_then_release_all_holds_nothing() {
        let mut acq = acquisition();
        acq.acquire_screen().await.unwrap();
        assert!(acq.holds_any());
        acq.release_all();
        assert!(!acq.holds_any());
        // Idempotent from the released state.
        acq.release_all();
        assert!(!acq.holds_any());
    }

    #[tokio::test]
    async fn screen_denied_leaves_nothing_held() {
        let config = SyntheticConfig {
            deny_screen: true,
            ..SyntheticConfig::default()
        };
        let mut acq = DeviceAcquisition::new(Box::new(SyntheticProvider::new(config)));
        let err = acq.acquire_screen().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!acq.holds_any());
    }

    #[tokio::test]
    async fn camera_toggle_is_idempotent() {
        let mut acq = acquisition();
        acq.acquire_camera().await.unwrap();
        acq.acquire_camera().await.unwrap();
        assert!(acq.camera().is_some());
        acq.release_camera();
        acq.release_camera();
        assert!(acq.camera().is_none());
    }

    #[tokio::test]
    async fn camera_denied_is_not_fatal() {
        let config = SyntheticConfig {
            deny_camera: true,
            ..SyntheticConfig::default()
        };
        let mut acq = DeviceAcquisition::new(Box::new(SyntheticProvider::new(config)));
        assert!(acq.acquire_camera().await.is_err());
        // Screen acquisition is unaffected by the camera denial.
        acq.acquire_screen().await.unwrap();
        assert!(acq.screen().is_some());
    }

    #[tokio::test]
    async fn microphone_acquired_once() {
        let mut acq = acquisition();
        acq.acquire_microphone(MicrophoneOptions::default())
            .await
            .unwrap();
        acq.acquire_microphone(MicrophoneOptions::default())
            .await
            .unwrap();
        assert!(acq.is_live(SourceKind::Microphone));
    }
}
