//! Container types and negotiation
//!
//! The recorder selects the first container in the caller's ordered
//! preference list that the encoder backend supports. Concatenating the
//! emitted chunks in order must yield a playable file of the selected type,
//! so only stream-safe containers (no trailing index rewrite) are offered.

use serde::{Deserialize, Serialize};

/// Encoding container options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    /// Fragmented MP4 (H.264 + AAC)
    Mp4,
    /// WebM (VP8/VP9 + Opus)
    Webm,
    /// Matroska (H.264 + AAC)
    Matroska,
}

impl ContainerType {
    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerType::Mp4 => "mp4",
            ContainerType::Webm => "webm",
            ContainerType::Matroska => "mkv",
        }
    }

    /// Get the MIME type for this container
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerType::Mp4 => "video/mp4",
            ContainerType::Webm => "video/webm",
            ContainerType::Matroska => "video/x-matroska",
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Default preference order: broad playability first.
pub const DEFAULT_CONTAINER_PREFERENCES: [ContainerType; 3] = [
    ContainerType::Mp4,
    ContainerType::Webm,
    ContainerType::Matroska,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_and_mime_agree() {
        assert_eq!(ContainerType::Mp4.extension(), "mp4");
        assert_eq!(ContainerType::Webm.mime_type(), "video/webm");
        assert_eq!(ContainerType::Matroska.to_string(), "mkv");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&ContainerType::Matroska).unwrap();
        assert_eq!(json, "\"matroska\"");
    }
}
