//! Shared test support: a deterministic encoder stub and event-wait helpers.

use crate::capture::{AudioFrame, VideoFrame};
use crate::recorder::{ContainerType, EncoderBackend, EncoderParams, RecorderError};
use crate::session::{SessionEvent, SessionState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Virtual-time guard so a missing event fails the test instead of hanging.
const EVENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Encoder stub emitting fixed markers per frame, so tests can assert exact
/// payload bytes and ordering without a real codec.
pub(crate) struct StubEncoder {
    supported: Vec<ContainerType>,
    buf: Vec<u8>,
    pushes: usize,
    fail_after: Option<usize>,
    fail_flag: Option<Arc<AtomicBool>>,
    failed: bool,
}

impl StubEncoder {
    pub(crate) const VIDEO_MARK: &'static [u8] = b"V;";
    pub(crate) const AUDIO_MARK: &'static [u8] = b"A;";
    pub(crate) const TAIL: &'static [u8] = b"END";

    pub(crate) fn new() -> Self {
        Self::supporting(vec![
            ContainerType::Mp4,
            ContainerType::Webm,
            ContainerType::Matroska,
        ])
    }

    pub(crate) fn supporting(supported: Vec<ContainerType>) -> Self {
        Self {
            supported,
            buf: Vec::new(),
            pushes: 0,
            fail_after: None,
            fail_flag: None,
            failed: false,
        }
    }

    /// Fail on the (n+1)th push.
    pub(crate) fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    /// Fail on the first push after `trigger` turns true.
    pub(crate) fn with_trigger(trigger: Arc<AtomicBool>) -> Self {
        Self {
            fail_flag: Some(trigger),
            ..Self::new()
        }
    }

    /// Payload produced by `video` video pushes and `audio` audio pushes in
    /// that order, followed by the sealing tail.
    pub(crate) fn expected_payload(video: usize, audio: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..video {
            out.extend_from_slice(Self::VIDEO_MARK);
        }
        for _ in 0..audio {
            out.extend_from_slice(Self::AUDIO_MARK);
        }
        out.extend_from_slice(Self::TAIL);
        out
    }

    fn check_fail(&mut self) -> Result<(), RecorderError> {
        self.pushes += 1;
        if let Some(flag) = &self.fail_flag {
            if flag.load(Ordering::SeqCst) {
                self.failed = true;
                return Err(RecorderError::EncoderFault("stub trigger tripped".into()));
            }
        }
        if let Some(limit) = self.fail_after {
            if self.pushes > limit {
                self.failed = true;
                return Err(RecorderError::EncoderFault("stub push limit hit".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EncoderBackend for StubEncoder {
    fn supports(&self, container: ContainerType) -> bool {
        self.supported.contains(&container)
    }

    async fn start(
        &mut self,
        _container: ContainerType,
        _params: EncoderParams,
    ) -> Result<(), RecorderError> {
        Ok(())
    }

    async fn push_video(&mut self, _frame: &VideoFrame) -> Result<(), RecorderError> {
        self.check_fail()?;
        self.buf.extend_from_slice(Self::VIDEO_MARK);
        Ok(())
    }

    async fn push_audio(&mut self, _frame: &AudioFrame) -> Result<(), RecorderError> {
        self.check_fail()?;
        self.buf.extend_from_slice(Self::AUDIO_MARK);
        Ok(())
    }

    async fn take_output(&mut self) -> Result<Vec<u8>, RecorderError> {
        Ok(std::mem::take(&mut self.buf))
    }

    async fn finish(&mut self) -> Result<Vec<u8>, RecorderError> {
        // A faulted encoder has nothing coherent left to flush.
        if self.failed {
            return Ok(Vec::new());
        }
        let mut tail = std::mem::take(&mut self.buf);
        tail.extend_from_slice(Self::TAIL);
        Ok(tail)
    }
}

/// Await a specific state transition on the session's event stream.
pub(crate) async fn wait_for_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    want: SessionState,
) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged(state)) if state == want => return,
                Ok(_) => {}
                Err(e) => panic!("event stream closed while waiting for {want}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want}"))
}

/// Await an elapsed-seconds tick of at least `want`.
pub(crate) async fn wait_for_elapsed(events: &mut broadcast::Receiver<SessionEvent>, want: u64) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::ElapsedSeconds(s)) if s >= want => return,
                Ok(_) => {}
                Err(e) => panic!("event stream closed while waiting for elapsed {want}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for elapsed {want}"))
}

/// Await an error event whose message contains `needle`.
pub(crate) async fn wait_for_error(events: &mut broadcast::Receiver<SessionEvent>, needle: &str) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Error(msg)) if msg.contains(needle) => return,
                Ok(_) => {}
                Err(e) => panic!("event stream closed while waiting for error '{needle}': {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for error '{needle}'"))
}
