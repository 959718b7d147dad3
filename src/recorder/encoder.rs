//! Encoder backend seam
//!
//! The recorder is generic over how bytes actually get encoded. A backend
//! accepts raw video frames and mixed audio buffers and yields encoded
//! output on demand; the recorder owns timing, chunk boundaries, and
//! pause/stop semantics.

use super::container::ContainerType;
use super::RecorderError;
use crate::capture::{AudioFormat, AudioFrame, VideoFormat, VideoFrame};
use async_trait::async_trait;

/// Stream geometry handed to a backend at start.
#[derive(Debug, Clone, Copy)]
pub struct EncoderParams {
    pub video: VideoFormat,
    pub audio: AudioFormat,
}

/// One encoding implementation (ffmpeg child process, host codec, test stub).
#[async_trait]
pub trait EncoderBackend: Send {
    /// Whether this backend can produce the given container.
    fn supports(&self, container: ContainerType) -> bool;

    /// Begin an encode run. Called at most once per backend instance.
    async fn start(
        &mut self,
        container: ContainerType,
        params: EncoderParams,
    ) -> Result<(), RecorderError>;

    /// Feed one video frame.
    async fn push_video(&mut self, frame: &VideoFrame) -> Result<(), RecorderError>;

    /// Feed one mixed audio buffer.
    async fn push_audio(&mut self, frame: &AudioFrame) -> Result<(), RecorderError>;

    /// Drain the bytes encoded since the previous call. May be empty while
    /// the encoder is still buffering.
    async fn take_output(&mut self) -> Result<Vec<u8>, RecorderError>;

    /// Flush, seal the container framing, and return any trailing bytes.
    /// The backend is unusable afterwards.
    async fn finish(&mut self) -> Result<Vec<u8>, RecorderError>;
}

/// Factory producing one backend per recording attempt (a discarded preview
/// starts a fresh attempt, and finished backends cannot be restarted).
pub type EncoderFactory = Box<dyn Fn() -> Box<dyn EncoderBackend> + Send + Sync>;

/// Select the first preferred container the backend supports.
pub fn negotiate_container(
    backend: &dyn EncoderBackend,
    preferences: &[ContainerType],
) -> Result<ContainerType, RecorderError> {
    preferences
        .iter()
        .copied()
        .find(|&c| backend.supports(c))
        .ok_or(RecorderError::NoSupportedContainer)
}
