//! Session state, flags, config, and events

use crate::artifact::RecordingArtifact;
use crate::mixer::MixerConfig;
use crate::recorder::{ContainerType, DEFAULT_CONTAINER_PREFERENCES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Choosing sources and flags; camera preview live if enabled
    Setup,
    /// Armed countdown before recording starts
    Countdown,
    /// Actively recording
    Recording,
    /// Recording suspended; sources stay live
    Paused,
    /// Sealing the chunk sequence and releasing resources
    Finalizing,
    /// Artifact ready for review
    Preview,
    /// Terminal: torn down without a retained artifact
    Aborted,
}

impl SessionState {
    /// Recording or its paused sub-state.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Aborted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Setup => "setup",
            SessionState::Countdown => "countdown",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Finalizing => "finalizing",
            SessionState::Preview => "preview",
            SessionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Source toggles chosen during Setup. Immutable once the countdown begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFlags {
    pub camera_enabled: bool,
    pub microphone_enabled: bool,
    pub noise_suppression_enabled: bool,
}

impl Default for SourceFlags {
    fn default() -> Self {
        Self {
            camera_enabled: false,
            microphone_enabled: true,
            noise_suppression_enabled: true,
        }
    }
}

/// Callback invoked with the artifact when the user saves.
pub type SavedCallback = Arc<dyn Fn(&RecordingArtifact) + Send + Sync>;

/// Session-level configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Countdown length in one-second ticks.
    pub countdown_ticks: u8,

    /// Cadence of encoder chunk emission.
    pub chunk_interval: Duration,

    /// Audio graph settings.
    pub mixer: MixerConfig,

    /// Ordered container preference list for negotiation.
    pub container_preferences: Vec<ContainerType>,

    /// Invoked with the finalized artifact on save, before ownership
    /// transfers to the caller.
    pub on_saved: Option<SavedCallback>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            chunk_interval: Duration::from_secs(1),
            mixer: MixerConfig::default(),
            container_preferences: DEFAULT_CONTAINER_PREFERENCES.to_vec(),
            on_saved: None,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("countdown_ticks", &self.countdown_ticks)
            .field("chunk_interval", &self.chunk_interval)
            .field("mixer", &self.mixer)
            .field("container_preferences", &self.container_preferences)
            .field("on_saved", &self.on_saved.is_some())
            .finish()
    }
}

/// Events emitted over the session's broadcast channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// Countdown tick; the payload counts down to 1
    CountdownTick(u8),
    /// Accumulated active recording time
    ElapsedSeconds(u64),
    /// A recoverable or terminal error, already handled by the controller
    Error(String),
    /// The artifact was handed to the caller
    Saved { id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(SessionState::Recording.is_active());
        assert!(SessionState::Paused.is_active());
        assert!(!SessionState::Setup.is_active());
        assert!(!SessionState::Preview.is_active());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Finalizing).unwrap();
        assert_eq!(json, "\"finalizing\"");
    }

    #[test]
    fn default_flags_favor_microphone() {
        let flags = SourceFlags::default();
        assert!(flags.microphone_enabled);
        assert!(!flags.camera_enabled);
    }
}
