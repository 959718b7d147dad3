//! recordkit - capture-and-composition engine for screen recordings.
//!
//! The crate acquires independent live media sources (screen, optional
//! camera, optional microphone), mixes their audio into a single track,
//! feeds the combined stream into a chunked encoder, and drives the full
//! session lifecycle: setup, armed countdown, recording with pause/resume,
//! and a finalized immutable artifact. Every exit path - user stop, modal
//! close, external revocation, encoder fault - releases all acquired
//! sources through a single teardown routine.
//!
//! Capture hardware and codecs sit behind two seams:
//! [`capture::SourceProvider`] for acquisition and
//! [`recorder::EncoderBackend`] for encoding. The crate ships a synthetic
//! provider for development and tests, cpal/nokhwa device backends for
//! microphone and camera, and an ffmpeg encoder backend on Unix.

pub mod artifact;
pub mod capture;
pub mod mixer;
pub mod recorder;
pub mod session;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;

pub use artifact::{ArtifactBuilder, ArtifactMetadata, RecordingArtifact};
pub use capture::{
    AcquireError, DeviceAcquisition, DeviceProvider, MediaSource, MicrophoneOptions, SourceKind,
    SourceProvider, SyntheticConfig, SyntheticProvider,
};
pub use mixer::{AudioMixer, MixerConfig, MixerInput};
pub use recorder::{
    ContainerType, EncoderBackend, EncoderFactory, Recorder, RecorderError,
    DEFAULT_CONTAINER_PREFERENCES,
};
pub use session::{
    CaptureSession, SessionConfig, SessionError, SessionEvent, SessionState, SourceFlags,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for binaries embedding the engine.
///
/// Honors `RUST_LOG`; defaults to debug-level engine logs.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recordkit=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
