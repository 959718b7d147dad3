//! Capture session controller
//!
//! [`CaptureSession`] is the state machine orchestrating acquisition, mixing,
//! and encoding for one recording attempt. It is the only component that
//! commands those layers to start or stop, and it funnels every exit path
//! (user stop, modal close, external revocation, encoder fault) through one
//! teardown routine so no source handle survives a terminal transition.

use super::state::{SessionConfig, SessionEvent, SessionState, SourceFlags};
use super::SessionError;
use crate::artifact::{ArtifactBuilder, RecordingArtifact};
use crate::capture::{DeviceAcquisition, MicrophoneOptions, SourceProvider};
use crate::mixer::AudioMixer;
use crate::recorder::{CombinedStream, EncoderFactory, Recorder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Why a finalize pass is running. Finalize must not abort the watcher task
/// that invoked it, so the reason doubles as a self-identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    User,
    Revoked,
    EncoderFault,
}

struct Inner {
    flags: SourceFlags,
    acquisition: DeviceAcquisition,
    encoder_factory: EncoderFactory,
    mixer: Option<AudioMixer>,
    recorder: Option<Recorder>,
    artifact: Option<Arc<RecordingArtifact>>,
    countdown_task: Option<JoinHandle<()>>,
    elapsed_task: Option<JoinHandle<()>>,
    revoke_task: Option<JoinHandle<()>>,
    fault_task: Option<JoinHandle<()>>,
}

struct Shared {
    config: SessionConfig,
    state: parking_lot::RwLock<SessionState>,
    elapsed: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<Inner>,
}

/// One recording attempt, from setup to saved artifact or abort.
///
/// Call [`CaptureSession::close`] (or [`CaptureSession::save`]) before
/// dropping; dropping a non-terminal session falls back to spawning the
/// teardown on the current runtime.
pub struct CaptureSession {
    shared: Arc<Shared>,
}

impl CaptureSession {
    /// Open a session in Setup with the given source flags. If the camera
    /// flag is set, the preview is acquired eagerly; a camera failure
    /// downgrades the flag rather than failing the open.
    pub async fn open(
        provider: Box<dyn SourceProvider>,
        encoder_factory: EncoderFactory,
        flags: SourceFlags,
        config: SessionConfig,
    ) -> CaptureSession {
        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            config,
            state: parking_lot::RwLock::new(SessionState::Setup),
            elapsed: AtomicU64::new(0),
            events,
            inner: Mutex::new(Inner {
                flags,
                acquisition: DeviceAcquisition::new(provider),
                encoder_factory,
                mixer: None,
                recorder: None,
                artifact: None,
                countdown_task: None,
                elapsed_task: None,
                revoke_task: None,
                fault_task: None,
            }),
        });

        {
            let mut inner = shared.inner.lock().await;
            shared.ensure_camera_preview(&mut inner).await;
        }
        tracing::info!(?flags, "capture session opened");
        CaptureSession { shared }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Accumulated active recording time in seconds (paused time excluded).
    pub fn elapsed_seconds(&self) -> u64 {
        self.shared.elapsed.load(Ordering::SeqCst)
    }

    /// Current source flags.
    pub async fn flags(&self) -> SourceFlags {
        self.shared.inner.lock().await.flags
    }

    /// Whether any source handle is still held. False on every path out of
    /// the session.
    pub async fn holds_sources(&self) -> bool {
        self.shared.inner.lock().await.acquisition.holds_any()
    }

    /// Session-scoped handle to the finalized artifact, once in Preview.
    pub async fn artifact(&self) -> Option<Arc<RecordingArtifact>> {
        self.shared.inner.lock().await.artifact.clone()
    }

    /// Toggle the camera preview. Setup only. A camera failure downgrades
    /// the flag and reports the error instead of failing the session;
    /// the returned bool is the effective flag.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<bool, SessionError> {
        let mut inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Setup, "setup")?;
        if enabled {
            inner.flags.camera_enabled = true;
            self.shared.ensure_camera_preview(&mut inner).await;
        } else {
            inner.flags.camera_enabled = false;
            inner.acquisition.release_camera();
        }
        Ok(inner.flags.camera_enabled)
    }

    /// Toggle the microphone flag. Setup only; acquisition itself is
    /// deferred to countdown-zero so repeated toggles never re-prompt.
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Setup, "setup")?;
        inner.flags.microphone_enabled = enabled;
        Ok(())
    }

    /// Toggle noise suppression for the (future) microphone capture.
    /// Setup only.
    pub async fn set_noise_suppression(&self, enabled: bool) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Setup, "setup")?;
        inner.flags.noise_suppression_enabled = enabled;
        Ok(())
    }

    /// Acquire the screen source and arm the countdown.
    ///
    /// On acquisition failure the session stays in Setup, the error is
    /// reported, and already-granted sources (camera preview) are kept.
    pub async fn begin_countdown(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Setup, "setup")?;

        if let Err(e) = inner.acquisition.acquire_screen().await {
            tracing::warn!("screen acquisition failed: {e}");
            self.shared
                .emit(SessionEvent::Error(format!("screen capture failed: {e}")));
            return Err(e.into());
        }

        // The revocation watcher covers Countdown through Finalizing.
        let ended = inner
            .acquisition
            .screen()
            .expect("screen acquired above")
            .ended_watch();
        inner.revoke_task = Some(tokio::spawn(watch_revocation(self.shared.clone(), ended)));

        self.shared.set_state(SessionState::Countdown);
        inner.countdown_task = Some(tokio::spawn(run_countdown(self.shared.clone())));
        Ok(())
    }

    /// Suspend recording. The elapsed counter stops and chunk emission is
    /// suspended; sources stay live.
    pub async fn pause(&self) -> Result<(), SessionError> {
        let inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Recording, "recording")?;
        if let Some(recorder) = inner.recorder.as_ref() {
            recorder.pause();
        }
        self.shared.set_state(SessionState::Paused);
        Ok(())
    }

    /// Resume a paused recording.
    pub async fn resume(&self) -> Result<(), SessionError> {
        let inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Paused, "paused")?;
        if let Some(recorder) = inner.recorder.as_ref() {
            recorder.resume();
        }
        self.shared.set_state(SessionState::Recording);
        Ok(())
    }

    /// Stop recording and finalize into Preview (or Aborted when nothing was
    /// captured).
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock().await;
        let state = self.shared.state();
        if !state.is_active() {
            return Err(SessionError::InvalidState {
                expected: "recording or paused",
                found: state,
            });
        }
        self.shared.finalize(&mut inner, StopReason::User).await;
        Ok(())
    }

    /// Drop the preview artifact and return to a fresh Setup. The camera
    /// preview is restored per the surviving flags.
    pub async fn discard(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Preview, "preview")?;
        inner.artifact = None;
        self.shared.elapsed.store(0, Ordering::SeqCst);
        self.shared.set_state(SessionState::Setup);
        self.shared.ensure_camera_preview(&mut inner).await;
        tracing::info!("preview discarded, session reset to setup");
        Ok(())
    }

    /// Hand the artifact to the caller and tear the session down.
    ///
    /// Consumes the session: ownership of the artifact transfers out, the
    /// configured saved-callback fires first, and no further operations are
    /// possible.
    pub async fn save(self) -> Result<Arc<RecordingArtifact>, SessionError> {
        let mut inner = self.shared.inner.lock().await;
        self.shared.expect_state(SessionState::Preview, "preview")?;
        let artifact = inner.artifact.take().ok_or(SessionError::InvalidState {
            expected: "preview with artifact",
            found: SessionState::Preview,
        })?;

        if let Some(callback) = &self.shared.config.on_saved {
            callback(&artifact);
        }
        self.shared.emit(SessionEvent::Saved { id: artifact.id });

        inner.abort_tasks();
        inner.acquisition.release_all();
        self.shared.set_state(SessionState::Aborted);
        drop(inner);

        tracing::info!(id = %artifact.id, "artifact saved, session torn down");
        Ok(artifact)
    }

    /// Force Aborted and release everything, from any state. Idempotent.
    pub async fn close(&self) {
        Shared::close_internal(&self.shared).await;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.shared.state().is_terminal() {
            return;
        }
        tracing::warn!("capture session dropped without close(), tearing down in background");
        let shared = self.shared.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                Shared::close_internal(&shared).await;
            });
        }
        // Without a runtime, the source handles' own drops stop the
        // producers once `Inner` is released.
    }
}

impl Inner {
    fn abort_tasks(&mut self) {
        for task in [
            self.countdown_task.take(),
            self.elapsed_task.take(),
            self.revoke_task.take(),
            self.fault_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::info!(from = %*state, to = %next, "session state changed");
            *state = next;
            drop(state);
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn expect_state(
        &self,
        expected: SessionState,
        description: &'static str,
    ) -> Result<(), SessionError> {
        let found = self.state();
        if found == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected: description,
                found,
            })
        }
    }

    /// Acquire the camera preview when the flag asks for one. Failure
    /// downgrades the flag instead of propagating.
    async fn ensure_camera_preview(&self, inner: &mut Inner) {
        if !inner.flags.camera_enabled || inner.acquisition.camera().is_some() {
            return;
        }
        if let Err(e) = inner.acquisition.acquire_camera().await {
            tracing::warn!("camera acquisition failed, disabling camera: {e}");
            inner.flags.camera_enabled = false;
            self.emit(SessionEvent::Error(format!("camera unavailable: {e}")));
        }
    }

    /// Countdown-time failure: report, release everything, return to Setup
    /// with the camera preview restored per flags.
    async fn fail_back_to_setup(&self, inner: &mut Inner, message: String) {
        tracing::warn!("countdown failed: {message}");
        self.emit(SessionEvent::Error(message));
        if let Some(task) = inner.revoke_task.take() {
            task.abort();
        }
        if let Some(task) = inner.fault_task.take() {
            task.abort();
        }
        if let Some(mut mixer) = inner.mixer.take() {
            mixer.teardown().await;
        }
        inner.acquisition.release_all();
        self.set_state(SessionState::Setup);
        self.ensure_camera_preview(inner).await;
    }

    /// The single teardown routine behind every exit from Countdown,
    /// Recording, and Paused. Seals the recorder first (the encoder must
    /// observe the last chunk), then releases sources, then closes the audio
    /// graph.
    async fn finalize(&self, inner: &mut Inner, reason: StopReason) {
        let from = self.state();
        self.set_state(SessionState::Finalizing);

        if let Some(task) = inner.countdown_task.take() {
            task.abort();
        }
        if let Some(task) = inner.elapsed_task.take() {
            task.abort();
        }
        // Never abort the watcher that called us; it is mid-await in this
        // very function.
        if let Some(task) = inner.revoke_task.take() {
            if reason != StopReason::Revoked {
                task.abort();
            }
        }
        if let Some(task) = inner.fault_task.take() {
            if reason != StopReason::EncoderFault {
                task.abort();
            }
        }

        let sealed = match inner.recorder.take() {
            Some(recorder) => Some(recorder.stop().await),
            None => None,
        };
        inner.acquisition.release_all();
        if let Some(mut mixer) = inner.mixer.take() {
            mixer.teardown().await;
        }

        match sealed {
            Some(sealed) if !sealed.chunks.is_empty() => {
                if let Some(fault) = &sealed.fault {
                    self.emit(SessionEvent::Error(format!(
                        "encoder fault, keeping {} captured chunks: {fault}",
                        sealed.chunks.len()
                    )));
                }
                let artifact = ArtifactBuilder::finalize(
                    sealed.chunks,
                    sealed.container,
                    self.elapsed.load(Ordering::SeqCst),
                );
                inner.artifact = Some(Arc::new(artifact));
                self.set_state(SessionState::Preview);
            }
            Some(_) => {
                self.emit(SessionEvent::Error(
                    "recording produced no chunks, nothing to preview".into(),
                ));
                self.set_state(SessionState::Aborted);
            }
            None => {
                // Exited from Countdown; there was never a recorder.
                self.set_state(SessionState::Aborted);
            }
        }
        tracing::info!(?reason, %from, to = %self.state(), "session finalized");
    }

    /// Modal-close teardown: discard any artifact and force Aborted.
    async fn close_internal(shared: &Arc<Shared>) {
        let mut inner = shared.inner.lock().await;
        if shared.state().is_terminal() {
            return;
        }
        tracing::info!(state = %shared.state(), "closing capture session");

        inner.abort_tasks();
        if let Some(recorder) = inner.recorder.take() {
            // Still sealed before source teardown; the output is discarded.
            let _ = recorder.stop().await;
        }
        inner.acquisition.release_all();
        if let Some(mut mixer) = inner.mixer.take() {
            mixer.teardown().await;
        }
        inner.artifact = None;
        shared.set_state(SessionState::Aborted);
    }
}

/// Countdown task: one tick per second, counting down to zero, then arm.
async fn run_countdown(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.tick().await;
    for remaining in (1..=shared.config.countdown_ticks).rev() {
        shared.emit(SessionEvent::CountdownTick(remaining));
        interval.tick().await;
    }
    arm_recording(shared).await;
}

/// Countdown-zero: finalize microphone capture, build the audio graph, start
/// the recorder, and enter Recording. Runs on the countdown task; any failure
/// in the sequence returns the session to Setup with everything released.
async fn arm_recording(shared: Arc<Shared>) {
    let mut inner = shared.inner.lock().await;
    if shared.state() != SessionState::Countdown {
        // Closed or revoked while the last tick was pending.
        return;
    }

    if inner.flags.microphone_enabled {
        let options = MicrophoneOptions {
            noise_suppression: inner.flags.noise_suppression_enabled,
            ..MicrophoneOptions::default()
        };
        if let Err(e) = inner.acquisition.acquire_microphone(options).await {
            return shared
                .fail_back_to_setup(&mut inner, format!("microphone capture failed: {e}"))
                .await;
        }
    }

    let taken = inner
        .acquisition
        .screen_mut()
        .map(|screen| (screen.take_video(), screen.take_audio()));
    let Some((video, screen_audio)) = taken else {
        return shared
            .fail_back_to_setup(&mut inner, "screen source disappeared".into())
            .await;
    };
    let Some(video) = video else {
        return shared
            .fail_back_to_setup(&mut inner, "screen video track unavailable".into())
            .await;
    };
    let mic_audio = inner
        .acquisition
        .microphone_mut()
        .and_then(|mic| mic.take_audio());

    // Graph before recorder: the encoder needs the mixed track at start.
    let (mixer, mixed) = AudioMixer::build(shared.config.mixer, screen_audio, mic_audio);
    inner.mixer = Some(mixer);

    let backend = (inner.encoder_factory)();
    let stream = CombinedStream {
        video,
        audio: mixed,
    };
    match Recorder::start(
        backend,
        stream,
        &shared.config.container_preferences,
        shared.config.chunk_interval,
    )
    .await
    {
        Ok(recorder) => {
            let fault = recorder.fault_watch();
            inner.fault_task = Some(tokio::spawn(watch_encoder_fault(shared.clone(), fault)));
            inner.recorder = Some(recorder);
        }
        Err(e) => {
            return shared
                .fail_back_to_setup(&mut inner, format!("recorder start failed: {e}"))
                .await;
        }
    }

    shared.elapsed.store(0, Ordering::SeqCst);
    shared.set_state(SessionState::Recording);
    inner.elapsed_task = Some(tokio::spawn(run_elapsed(shared.clone())));
}

/// Elapsed-time task: accumulate once per second while Recording; hold still
/// while Paused; end on any other state.
async fn run_elapsed(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.tick().await;
    loop {
        interval.tick().await;
        match shared.state() {
            SessionState::Recording => {
                let seconds = shared.elapsed.fetch_add(1, Ordering::SeqCst) + 1;
                shared.emit(SessionEvent::ElapsedSeconds(seconds));
            }
            SessionState::Paused => {}
            _ => break,
        }
    }
}

/// Revocation watcher: an `ended` signal on the screen source is an
/// authoritative asynchronous stop, honored from Countdown, Recording, and
/// Paused alike. Controller-initiated stops close the watch without firing
/// it, so they are never double-handled here.
async fn watch_revocation(shared: Arc<Shared>, mut ended: watch::Receiver<bool>) {
    loop {
        if *ended.borrow() {
            break;
        }
        if ended.changed().await.is_err() {
            return;
        }
    }

    let mut inner = shared.inner.lock().await;
    match shared.state() {
        SessionState::Countdown => {
            shared.emit(SessionEvent::Error(
                "screen sharing ended before recording started".into(),
            ));
            shared.finalize(&mut inner, StopReason::Revoked).await;
        }
        state if state.is_active() => {
            tracing::info!("screen sharing revoked, stopping recording");
            shared.finalize(&mut inner, StopReason::Revoked).await;
        }
        _ => {
            // Already finalizing or torn down.
        }
    }
}

/// Encoder-fault watcher: a mid-recording fault forces finalize with
/// whatever chunks were captured.
async fn watch_encoder_fault(shared: Arc<Shared>, mut fault: watch::Receiver<bool>) {
    loop {
        if *fault.borrow() {
            break;
        }
        if fault.changed().await.is_err() {
            return;
        }
    }

    let mut inner = shared.inner.lock().await;
    if shared.state().is_active() {
        shared.emit(SessionEvent::Error("encoder fault during recording".into()));
        shared.finalize(&mut inner, StopReason::EncoderFault).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticConfig, SyntheticProvider};
    use crate::testutil::{wait_for_elapsed, wait_for_error, wait_for_state, StubEncoder};
    use std::sync::atomic::AtomicBool;

    fn stub_factory() -> EncoderFactory {
        Box::new(|| Box::new(StubEncoder::new()))
    }

    async fn open_session(
        provider_config: SyntheticConfig,
        flags: SourceFlags,
    ) -> (CaptureSession, broadcast::Receiver<SessionEvent>) {
        let provider = SyntheticProvider::new(provider_config);
        let session = CaptureSession::open(
            Box::new(provider),
            stub_factory(),
            flags,
            SessionConfig::default(),
        )
        .await;
        let events = session.subscribe();
        (session, events)
    }

    fn all_sources() -> SourceFlags {
        SourceFlags {
            camera_enabled: true,
            microphone_enabled: true,
            noise_suppression_enabled: true,
        }
    }

    fn screen_only() -> SourceFlags {
        SourceFlags {
            camera_enabled: false,
            microphone_enabled: false,
            noise_suppression_enabled: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_session_counts_down_records_pauses_and_saves() {
        let saved_flag = Arc::new(AtomicBool::new(false));
        let saved_seen = saved_flag.clone();

        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let on_saved: crate::session::SavedCallback =
            Arc::new(move |_artifact: &RecordingArtifact| {
                saved_seen.store(true, Ordering::SeqCst);
            });
        let config = SessionConfig {
            on_saved: Some(on_saved),
            ..SessionConfig::default()
        };
        let session =
            CaptureSession::open(Box::new(provider), stub_factory(), all_sources(), config).await;
        let mut events = session.subscribe();

        session.begin_countdown().await.unwrap();

        // Three one-second ticks, counting down, then Recording.
        let mut ticks = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::CountdownTick(n) => ticks.push(n),
                SessionEvent::StateChanged(SessionState::Recording) => break,
                _ => {}
            }
        }
        assert_eq!(ticks, vec![3, 2, 1]);

        // Record ten seconds of active time.
        wait_for_elapsed(&mut events, 10).await;
        session.pause().await.unwrap();
        assert_eq!(session.state(), SessionState::Paused);

        // Three paused seconds do not accumulate.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.elapsed_seconds(), 10);

        session.resume().await.unwrap();
        wait_for_elapsed(&mut events, 12).await;
        session.stop().await.unwrap();
        wait_for_state(&mut events, SessionState::Preview).await;

        let artifact = session.artifact().await.expect("artifact in preview");
        // 10s + 2s active, 3s paused: within one tick of 12, never 15.
        assert!((11..=13).contains(&artifact.duration_seconds));
        assert!(!artifact.payload.is_empty());
        assert!(!session.holds_sources().await);

        let saved = session.save().await.unwrap();
        assert!(saved_flag.load(Ordering::SeqCst));
        assert_eq!(saved.id, artifact.id);
    }

    #[tokio::test(start_paused = true)]
    async fn screen_denied_stays_in_setup_holding_nothing() {
        let config = SyntheticConfig {
            deny_screen: true,
            ..SyntheticConfig::default()
        };
        let (session, _events) = open_session(config, screen_only()).await;

        let err = session.begin_countdown().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Acquire(crate::capture::AcquireError::PermissionDenied(_))
        ));
        assert_eq!(session.state(), SessionState::Setup);
        assert!(!session.holds_sources().await);
        assert!(session.artifact().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dismissed_picker_is_recoverable_too() {
        let config = SyntheticConfig {
            dismiss_screen_picker: true,
            ..SyntheticConfig::default()
        };
        let (session, _events) = open_session(config, screen_only()).await;

        assert!(session.begin_countdown().await.is_err());
        assert_eq!(session.state(), SessionState::Setup);
        // A fresh user-initiated attempt is allowed (and fails the same way).
        assert!(session.begin_countdown().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn revocation_while_recording_finalizes_once_into_preview() {
        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let revoker = provider.screen_revoker();
        let session = CaptureSession::open(
            Box::new(provider),
            stub_factory(),
            screen_only(),
            SessionConfig::default(),
        )
        .await;
        let mut events = session.subscribe();

        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Recording).await;
        wait_for_elapsed(&mut events, 2).await;

        // The user stops sharing from OS chrome.
        revoker.revoke();

        let mut finalizing_count = 0;
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::StateChanged(SessionState::Finalizing) => finalizing_count += 1,
                SessionEvent::StateChanged(SessionState::Preview) => break,
                SessionEvent::StateChanged(SessionState::Aborted) => {
                    panic!("revocation with captured chunks must preview, not abort")
                }
                _ => {}
            }
        }
        assert_eq!(finalizing_count, 1, "revocation handled exactly once");

        assert!(session.artifact().await.is_some());
        assert!(!session.holds_sources().await);
        // The revocation already stopped everything; a user stop now is a
        // state error, not a second teardown.
        assert!(session.stop().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn revocation_during_countdown_aborts_without_artifact() {
        let config = SyntheticConfig {
            revoke_screen_after: Some(Duration::from_millis(1500)),
            ..SyntheticConfig::default()
        };
        let (session, mut events) = open_session(config, screen_only()).await;

        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Aborted).await;

        assert!(session.artifact().await.is_none());
        assert!(!session.holds_sources().await);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_container_returns_to_setup_with_sources_released() {
        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let factory: EncoderFactory = Box::new(|| Box::new(StubEncoder::supporting(vec![])));
        let session = CaptureSession::open(
            Box::new(provider),
            factory,
            all_sources(),
            SessionConfig::default(),
        )
        .await;
        let mut events = session.subscribe();

        session.begin_countdown().await.unwrap();
        wait_for_error(&mut events, "no supported container").await;
        wait_for_state(&mut events, SessionState::Setup).await;

        // Screen and microphone were released; the camera preview is
        // restored for the still-enabled flag.
        assert!(!session
            .shared
            .inner
            .lock()
            .await
            .acquisition
            .is_live(crate::capture::SourceKind::Screen));
        assert_eq!(session.state(), SessionState::Setup);
    }

    #[tokio::test(start_paused = true)]
    async fn close_from_recording_aborts_and_is_idempotent() {
        let (session, mut events) = open_session(SyntheticConfig::default(), all_sources()).await;

        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Recording).await;

        session.close().await;
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(!session.holds_sources().await);
        assert!(session.artifact().await.is_none());

        session.close().await;
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn encoder_fault_with_captured_chunks_salvages_a_preview() {
        let trigger = Arc::new(AtomicBool::new(false));
        let factory_trigger = trigger.clone();
        let factory: EncoderFactory =
            Box::new(move || Box::new(StubEncoder::with_trigger(factory_trigger.clone())));

        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let session = CaptureSession::open(
            Box::new(provider),
            factory,
            screen_only(),
            SessionConfig::default(),
        )
        .await;
        let mut events = session.subscribe();

        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Recording).await;
        wait_for_elapsed(&mut events, 2).await;

        trigger.store(true, Ordering::SeqCst);
        wait_for_error(&mut events, "encoder fault").await;
        wait_for_state(&mut events, SessionState::Preview).await;

        let artifact = session.artifact().await.expect("salvaged artifact");
        assert!(!artifact.payload.is_empty());
        assert!(!session.holds_sources().await);
    }

    #[tokio::test(start_paused = true)]
    async fn encoder_fault_before_any_chunk_aborts() {
        let trigger = Arc::new(AtomicBool::new(true));
        let factory: EncoderFactory =
            Box::new(move || Box::new(StubEncoder::with_trigger(trigger.clone())));

        let provider = SyntheticProvider::new(SyntheticConfig::default());
        let session = CaptureSession::open(
            Box::new(provider),
            factory,
            screen_only(),
            SessionConfig::default(),
        )
        .await;
        let mut events = session.subscribe();

        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Aborted).await;

        assert!(session.artifact().await.is_none());
        assert!(!session.holds_sources().await);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_resets_for_a_fresh_attempt() {
        let (session, mut events) = open_session(SyntheticConfig::default(), screen_only()).await;

        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Recording).await;
        wait_for_elapsed(&mut events, 2).await;
        session.stop().await.unwrap();
        wait_for_state(&mut events, SessionState::Preview).await;

        session.discard().await.unwrap();
        assert_eq!(session.state(), SessionState::Setup);
        assert!(session.artifact().await.is_none());
        assert_eq!(session.elapsed_seconds(), 0);

        // Second attempt with a fresh encoder from the factory.
        session.begin_countdown().await.unwrap();
        wait_for_state(&mut events, SessionState::Recording).await;
        wait_for_elapsed(&mut events, 1).await;
        session.stop().await.unwrap();
        wait_for_state(&mut events, SessionState::Preview).await;
        assert!(session.artifact().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn camera_denial_downgrades_the_flag() {
        let config = SyntheticConfig {
            deny_camera: true,
            ..SyntheticConfig::default()
        };
        let (session, _events) = open_session(config, screen_only()).await;

        let effective = session.set_camera_enabled(true).await.unwrap();
        assert!(!effective);
        assert!(!session.flags().await.camera_enabled);
        assert!(!session.holds_sources().await);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_toggle_acquires_and_releases_preview() {
        let (session, _events) = open_session(SyntheticConfig::default(), screen_only()).await;

        assert!(session.set_camera_enabled(true).await.unwrap());
        assert!(session.holds_sources().await);
        assert!(!session.set_camera_enabled(false).await.unwrap());
        assert!(!session.holds_sources().await);
    }

    #[tokio::test(start_paused = true)]
    async fn flags_are_immutable_once_countdown_begins() {
        let (session, mut events) = open_session(SyntheticConfig::default(), screen_only()).await;

        session.begin_countdown().await.unwrap();
        assert!(matches!(
            session.set_microphone_enabled(true).await,
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.set_camera_enabled(true).await,
            Err(SessionError::InvalidState { .. })
        ));

        wait_for_state(&mut events, SessionState::Recording).await;
        assert!(matches!(
            session.set_noise_suppression(false).await,
            Err(SessionError::InvalidState { .. })
        ));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_outside_recording_is_rejected() {
        let (session, _events) = open_session(SyntheticConfig::default(), screen_only()).await;
        assert!(matches!(
            session.pause().await,
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.stop().await,
            Err(SessionError::InvalidState { .. })
        ));
    }
}
