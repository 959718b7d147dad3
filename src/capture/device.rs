//! Host-device source provider
//!
//! [`DeviceProvider`] implements the acquisition seam on top of the machine's
//! real input devices: microphone capture through cpal and camera capture
//! through nokhwa. Screen capture is platform-specific, so screen requests
//! are delegated to an embedder-supplied provider. Camera and microphone
//! selection defaults to the host's default device; specific devices can be
//! chosen by the ids reported by [`camera::list_cameras`] and
//! [`microphone::list_input_devices`].

use super::camera;
use super::microphone;
use super::provider::{AcquireError, MicrophoneOptions, SourceProvider};
use super::source::MediaSource;
use async_trait::async_trait;

/// Source provider backed by the host's real camera and microphone.
pub struct DeviceProvider {
    screen: Box<dyn SourceProvider>,
    camera_id: Option<String>,
    microphone_id: Option<String>,
}

impl DeviceProvider {
    /// Create a provider using the default camera and microphone, forwarding
    /// screen requests to `screen`.
    pub fn new(screen: Box<dyn SourceProvider>) -> Self {
        Self {
            screen,
            camera_id: None,
            microphone_id: None,
        }
    }

    /// Select a specific camera by enumeration id.
    pub fn with_camera(mut self, id: impl Into<String>) -> Self {
        self.camera_id = Some(id.into());
        self
    }

    /// Select a specific input device by enumeration id.
    pub fn with_microphone(mut self, id: impl Into<String>) -> Self {
        self.microphone_id = Some(id.into());
        self
    }
}

#[async_trait]
impl SourceProvider for DeviceProvider {
    async fn acquire_screen(&self) -> Result<MediaSource, AcquireError> {
        self.screen.acquire_screen().await
    }

    async fn acquire_camera(&self) -> Result<MediaSource, AcquireError> {
        // Device negotiation blocks until the camera reports ready.
        let id = self.camera_id.clone();
        tokio::task::spawn_blocking(move || camera::open_camera(id.as_deref()))
            .await
            .map_err(|e| AcquireError::Backend(format!("camera open task failed: {e}")))?
    }

    async fn acquire_microphone(
        &self,
        options: MicrophoneOptions,
    ) -> Result<MediaSource, AcquireError> {
        let id = self.microphone_id.clone();
        tokio::task::spawn_blocking(move || microphone::open_microphone(id.as_deref(), options))
            .await
            .map_err(|e| AcquireError::Backend(format!("microphone open task failed: {e}")))?
    }
}
