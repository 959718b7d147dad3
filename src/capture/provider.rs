//! Source provider seam
//!
//! The engine never talks to capture hardware directly. It requests sources
//! through a [`SourceProvider`], the host-environment seam: desktop builds
//! implement it on top of OS capture APIs, and the crate ships
//! [`SyntheticProvider`](crate::capture::synthetic::SyntheticProvider) as the
//! reference implementation for development and tests.

use super::source::{MediaSource, SourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced while acquiring a source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The user (or the OS on their behalf) declined the capture request.
    /// Recoverable: the session stays in Setup.
    #[error("permission denied for {0} capture")]
    PermissionDenied(SourceKind),

    /// The user closed the source picker without choosing anything.
    /// Recoverable: the session stays in Setup.
    #[error("no {0} source selected")]
    NoSourceSelected(SourceKind),

    /// The requested device does not exist (unplugged, bad id).
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The source went away between acquisition and use.
    #[error("{0} source is no longer live")]
    SourceGone(SourceKind),

    /// The capture backend failed in a way the engine cannot interpret.
    #[error("capture backend error: {0}")]
    Backend(String),
}

impl AcquireError {
    /// Setup-time errors the session recovers from without aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AcquireError::PermissionDenied(_) | AcquireError::NoSourceSelected(_)
        )
    }
}

/// Processing flags requested for microphone capture.
///
/// Whether a backend can honor them depends on the host; backends record the
/// request and apply what they support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicrophoneOptions {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for MicrophoneOptions {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: false,
            auto_gain: true,
        }
    }
}

/// Host seam through which the engine acquires live sources.
///
/// Implementations must return sources whose producers honor the
/// [`MediaSource::stop`] contract and report external revocation through the
/// source's `ended` watch.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Request the screen/display stream (video plus optional system audio).
    async fn acquire_screen(&self) -> Result<MediaSource, AcquireError>;

    /// Request the camera stream (video only).
    async fn acquire_camera(&self) -> Result<MediaSource, AcquireError>;

    /// Request the microphone stream (audio only).
    async fn acquire_microphone(
        &self,
        options: MicrophoneOptions,
    ) -> Result<MediaSource, AcquireError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(AcquireError::PermissionDenied(SourceKind::Screen).is_recoverable());
        assert!(AcquireError::NoSourceSelected(SourceKind::Screen).is_recoverable());
        assert!(!AcquireError::DeviceNotFound("mic-3".into()).is_recoverable());
        assert!(!AcquireError::SourceGone(SourceKind::Microphone).is_recoverable());
    }
}
