//! Source acquisition
//!
//! This module owns everything between the host's capture APIs and the
//! engine: the [`SourceProvider`] seam, the live [`MediaSource`] handles with
//! their revocation watches, and [`DeviceAcquisition`], which holds one
//! session's source set and guarantees idempotent release.

pub mod acquisition;
pub mod camera;
pub mod device;
pub mod microphone;
pub mod provider;
pub mod source;
pub mod synthetic;

pub use acquisition::{DeviceAcquisition, MediaSourceSet};
pub use camera::{list_cameras, CameraInfo, Resolution};
pub use device::DeviceProvider;
pub use microphone::{list_input_devices, AudioDeviceInfo};
pub use provider::{AcquireError, MicrophoneOptions, SourceProvider};
pub use source::{
    source_channel, AudioFormat, AudioFrame, AudioTrack, MediaSource, SourceFeeder, SourceKind,
    SourceSpec, VideoFormat, VideoFrame, VideoTrack,
};
pub use synthetic::{ScreenRevoker, SyntheticConfig, SyntheticProvider};
