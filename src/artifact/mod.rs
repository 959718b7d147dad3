//! Recording artifacts
//!
//! [`ArtifactBuilder::finalize`] assembles the sealed chunk sequence into one
//! immutable [`RecordingArtifact`]: the byte-exact concatenation of all
//! chunks in arrival order plus derived metadata. Pure assembly; persistence
//! belongs to the caller.

use crate::recorder::{Chunk, ContainerType};
use crate::utils::time::format_clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The finalized, immutable recording.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    /// Unique artifact ID
    pub id: Uuid,

    /// Byte-exact concatenation of all chunks in arrival order
    pub payload: Vec<u8>,

    /// Container the payload is framed in
    pub container: ContainerType,

    /// Active recording time (paused time excluded), in whole seconds
    pub duration_seconds: u64,

    /// Payload size in bytes
    pub size_bytes: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl RecordingArtifact {
    /// Metadata view for display and persistence records (the payload
    /// travels separately, by reference).
    pub fn metadata(&self) -> ArtifactMetadata {
        ArtifactMetadata {
            id: self.id,
            container: self.container,
            mime_type: self.container.mime_type().to_string(),
            duration_seconds: self.duration_seconds,
            duration_clock: format_clock(self.duration_seconds),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
        }
    }
}

/// Serializable artifact metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub id: Uuid,
    pub container: ContainerType,
    pub mime_type: String,
    pub duration_seconds: u64,
    /// `MM:SS` display form of the duration
    pub duration_clock: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Assembles sealed chunks into artifacts.
pub struct ArtifactBuilder;

impl ArtifactBuilder {
    /// Concatenate `chunks` in order, compute size, and stamp creation time.
    ///
    /// Pure function of its inputs apart from the ID and timestamp; no side
    /// effects beyond allocation.
    pub fn finalize(
        chunks: Vec<Chunk>,
        container: ContainerType,
        active_seconds: u64,
    ) -> RecordingArtifact {
        let mut payload = Vec::with_capacity(chunks.iter().map(|c| c.data.len()).sum());
        for chunk in &chunks {
            payload.extend_from_slice(&chunk.data);
        }
        let size_bytes = payload.len() as u64;

        let artifact = RecordingArtifact {
            id: Uuid::new_v4(),
            payload,
            container,
            duration_seconds: active_seconds,
            size_bytes,
            created_at: Utc::now(),
        };
        tracing::info!(
            id = %artifact.id,
            %container,
            duration = %format_clock(active_seconds),
            size_bytes,
            "artifact finalized"
        );
        artifact
    }
}
