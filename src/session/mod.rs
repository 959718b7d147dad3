//! Capture session lifecycle
//!
//! The session module hosts the state machine that drives one recording
//! attempt: acquisition, countdown, recording with pause/resume, finalize,
//! preview, and teardown.

pub mod controller;
pub mod state;

pub use controller::CaptureSession;
pub use state::{SavedCallback, SessionConfig, SessionEvent, SessionState, SourceFlags};

use crate::capture::AcquireError;
use thiserror::Error;

/// Session-level errors. Internal failures are handled by the controller
/// (reported as events, routed through finalize); only invalid calls and
/// acquisition refusals surface here.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: SessionState,
    },

    #[error(transparent)]
    Acquire(#[from] AcquireError),
}
