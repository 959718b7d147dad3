//! Streaming recorder
//!
//! [`Recorder`] accepts one combined stream (screen video plus the mixed
//! audio track), negotiates a container with the encoder backend, and emits a
//! finite, append-only sequence of binary [`Chunk`]s at a fixed interval
//! while active. Arrival order is the only valid concatenation order for the
//! final payload. Stopping is asynchronous: callers await the sealed result,
//! which is only produced after the backend has flushed its last bytes.

pub mod container;
pub mod encoder;
#[cfg(unix)]
pub mod ffmpeg;

pub use container::{ContainerType, DEFAULT_CONTAINER_PREFERENCES};
pub use encoder::{negotiate_container, EncoderBackend, EncoderFactory, EncoderParams};
#[cfg(unix)]
pub use ffmpeg::FfmpegEncoder;

use crate::capture::{AudioTrack, VideoTrack};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that can occur while encoding.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// None of the preferred containers is supported by the backend.
    #[error("no supported container in preference list")]
    NoSupportedContainer,

    /// The encoder failed mid-run. Chunks captured before the fault remain
    /// valid.
    #[error("encoder fault: {0}")]
    EncoderFault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recorder is not running")]
    NotRecording,
}

/// One unit of encoder output.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the emission sequence (0-based, contiguous).
    pub index: u64,

    /// Encoded bytes.
    pub data: Vec<u8>,

    /// Active recording time at emission, in milliseconds.
    pub timestamp_ms: f64,
}

/// The single stream fed to the encoder: screen video plus mixed audio.
#[derive(Debug)]
pub struct CombinedStream {
    pub video: VideoTrack,
    pub audio: AudioTrack,
}

impl CombinedStream {
    fn encoder_params(&self) -> EncoderParams {
        EncoderParams {
            video: self.video.format(),
            audio: self.audio.format(),
        }
    }
}

/// Result of a sealed recording run.
#[derive(Debug)]
pub struct SealedRecording {
    /// Container the chunks were encoded into.
    pub container: ContainerType,

    /// Every emitted chunk, in emission order.
    pub chunks: Vec<Chunk>,

    /// Present when the encoder faulted mid-run; the chunks are the
    /// best-effort capture up to the fault.
    pub fault: Option<String>,
}

impl SealedRecording {
    /// Total payload size across all chunks.
    pub fn payload_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.data.len() as u64).sum()
    }
}

/// Active encoding run. Created by [`Recorder::start`], consumed by
/// [`Recorder::stop`].
#[derive(Debug)]
pub struct Recorder {
    container: ContainerType,
    chunks: Arc<Mutex<Vec<Chunk>>>,
    paused: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<String>>>,
    faulted_rx: watch::Receiver<bool>,
    finalized_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Recorder {
    /// Negotiate a container, start the backend, and begin pumping frames.
    ///
    /// Fails with [`RecorderError::NoSupportedContainer`] when the preference
    /// list and the backend have no overlap, or with the backend's startup
    /// error; both are countdown-time failures for the session.
    pub async fn start(
        mut backend: Box<dyn EncoderBackend>,
        stream: CombinedStream,
        preferences: &[ContainerType],
        chunk_interval: Duration,
    ) -> Result<Recorder, RecorderError> {
        let container = negotiate_container(backend.as_ref(), preferences)?;
        let params = stream.encoder_params();
        backend.start(container, params).await?;

        tracing::info!(%container, ?chunk_interval, "recorder started");

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let paused = Arc::new(AtomicBool::new(false));
        let fault = Arc::new(Mutex::new(None));
        let (faulted_tx, faulted_rx) = watch::channel(false);
        let (finalized_tx, finalized_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_pump(
            backend,
            stream,
            chunk_interval,
            PumpShared {
                chunks: chunks.clone(),
                paused: paused.clone(),
                fault: fault.clone(),
                faulted_tx,
                finalized_tx,
            },
            stop_rx,
        ));

        Ok(Recorder {
            container,
            chunks,
            paused,
            fault,
            faulted_rx,
            finalized_rx,
            stop_tx,
            task,
        })
    }

    /// Container selected at negotiation.
    pub fn container(&self) -> ContainerType {
        self.container
    }

    /// Suspend chunk emission and frame feeding. Previously emitted chunks
    /// are retained; the source streams keep running.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("recorder paused");
        }
    }

    /// Resume chunk emission after [`Recorder::pause`].
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("recorder resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Number of chunks emitted so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Watch that flips to `true` if the encoder faults mid-run.
    pub fn fault_watch(&self) -> watch::Receiver<bool> {
        self.faulted_rx.clone()
    }

    /// Watch that flips to `true` once the chunk sequence is sealed.
    pub fn finalized_watch(&self) -> watch::Receiver<bool> {
        self.finalized_rx.clone()
    }

    /// Flush the backend, seal the chunk sequence, and return it.
    ///
    /// Asynchronous by design: the returned future resolves only after the
    /// backend has drained, so callers can safely tear down sources once it
    /// completes.
    pub async fn stop(self) -> SealedRecording {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("recorder pump task failed: {e}");
        }
        let chunks = std::mem::take(&mut *self.chunks.lock());
        let fault = self.fault.lock().take();
        tracing::info!(
            chunks = chunks.len(),
            fault = fault.as_deref().unwrap_or("none"),
            "recorder sealed"
        );
        SealedRecording {
            container: self.container,
            chunks,
            fault,
        }
    }
}

struct PumpShared {
    chunks: Arc<Mutex<Vec<Chunk>>>,
    paused: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<String>>>,
    faulted_tx: watch::Sender<bool>,
    finalized_tx: watch::Sender<bool>,
}

/// Feeds frames into the backend and cuts a chunk once per interval.
async fn run_pump(
    mut backend: Box<dyn EncoderBackend>,
    mut stream: CombinedStream,
    chunk_interval: Duration,
    shared: PumpShared,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(chunk_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; the first chunk should land
    // one full interval in.
    ticker.tick().await;

    let interval_ms = chunk_interval.as_secs_f64() * 1000.0;
    let mut active_ms: f64 = 0.0;
    let mut index: u64 = 0;
    let mut video_done = false;
    let mut audio_done = false;
    let mut fault: Option<String> = None;

    'pump: loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break 'pump,
            _ = ticker.tick() => {
                if shared.paused.load(Ordering::SeqCst) {
                    continue;
                }
                active_ms += interval_ms;
                match backend.take_output().await {
                    Ok(data) if !data.is_empty() => {
                        shared.chunks.lock().push(Chunk {
                            index,
                            data,
                            timestamp_ms: active_ms,
                        });
                        index += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        fault = Some(e.to_string());
                        break 'pump;
                    }
                }
            }
            frame = stream.video.recv(), if !video_done => {
                match frame {
                    Some(f) => {
                        if !shared.paused.load(Ordering::SeqCst) {
                            if let Err(e) = backend.push_video(&f).await {
                                fault = Some(e.to_string());
                                break 'pump;
                            }
                        }
                    }
                    None => video_done = true,
                }
            }
            frame = stream.audio.recv(), if !audio_done => {
                match frame {
                    Some(f) => {
                        if !shared.paused.load(Ordering::SeqCst) {
                            if let Err(e) = backend.push_audio(&f).await {
                                fault = Some(e.to_string());
                                break 'pump;
                            }
                        }
                    }
                    None => audio_done = true,
                }
            }
        }
    }

    // Seal: flush whatever the backend still buffers. A fault makes this
    // best-effort; chunks already cut stay valid.
    match backend.finish().await {
        Ok(tail) if !tail.is_empty() => {
            shared.chunks.lock().push(Chunk {
                index,
                data: tail,
                timestamp_ms: active_ms,
            });
        }
        Ok(_) => {}
        Err(e) => {
            if fault.is_none() {
                fault = Some(e.to_string());
            }
        }
    }

    if let Some(msg) = fault {
        tracing::error!("encoder faulted: {msg}");
        *shared.fault.lock() = Some(msg);
        let _ = shared.faulted_tx.send(true);
    }
    let _ = shared.finalized_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{
        source_channel, AudioFormat, AudioFrame, SourceKind, SourceSpec, VideoFormat, VideoFrame,
    };
    use crate::testutil::StubEncoder;

    const TICK: Duration = Duration::from_secs(1);

    fn combined_stream() -> (
        crate::capture::SourceFeeder,
        CombinedStream,
        crate::capture::MediaSource,
    ) {
        let spec = SourceSpec {
            kind: SourceKind::Screen,
            video: Some(VideoFormat {
                width: 64,
                height: 36,
                frame_rate: 10,
            }),
            audio: Some(AudioFormat {
                sample_rate: 48_000,
                channels: 1,
            }),
        };
        let (feeder, mut source) = source_channel(spec, "test-screen");
        let stream = CombinedStream {
            video: source.take_video().unwrap(),
            audio: source.take_audio().unwrap(),
        };
        (feeder, stream, source)
    }

    fn video_frame(i: u64) -> VideoFrame {
        VideoFrame {
            data: vec![i as u8; 64 * 36 * 4],
            width: 64,
            height: 36,
            bytes_per_row: 64 * 4,
            timestamp_ms: i as f64 * 100.0,
        }
    }

    fn audio_frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0.1; 4800],
            sample_rate: 48_000,
            channels: 1,
            timestamp_ms: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_container_fails_before_backend_start() {
        let (_feeder, stream, _source) = combined_stream();
        let backend = Box::new(StubEncoder::supporting(vec![]));
        let err = Recorder::start(
            backend,
            stream,
            &[ContainerType::Mp4, ContainerType::Webm],
            TICK,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RecorderError::NoSupportedContainer));
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_arrive_in_order_and_concatenate() {
        let (feeder, stream, _source) = combined_stream();
        let backend = Box::new(StubEncoder::new());
        let recorder = Recorder::start(backend, stream, &DEFAULT_CONTAINER_PREFERENCES, TICK)
            .await
            .unwrap();
        assert_eq!(recorder.container(), ContainerType::Mp4);

        for i in 0..5 {
            feeder.push_video(video_frame(i)).await;
        }
        feeder.push_audio(audio_frame()).await;

        // Let a couple of chunk ticks elapse.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let sealed = recorder.stop().await;

        assert!(sealed.fault.is_none());
        assert!(!sealed.chunks.is_empty());
        for (i, chunk) in sealed.chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u64);
        }
        let concatenated: Vec<u8> = sealed
            .chunks
            .iter()
            .flat_map(|c| c.data.iter().copied())
            .collect();
        // The stub encodes 5 video markers, 1 audio marker, and a tail.
        let expected = StubEncoder::expected_payload(5, 1);
        assert_eq!(concatenated, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suspends_chunk_emission() {
        let (feeder, stream, _source) = combined_stream();
        let backend = Box::new(StubEncoder::new());
        let recorder = Recorder::start(backend, stream, &DEFAULT_CONTAINER_PREFERENCES, TICK)
            .await
            .unwrap();

        feeder.push_video(video_frame(0)).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let before_pause = recorder.chunk_count();
        assert!(before_pause >= 1);

        recorder.pause();
        feeder.push_video(video_frame(1)).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.chunk_count(), before_pause);

        // Frames that arrived while paused were dropped, not queued.
        recorder.resume();
        feeder.push_video(video_frame(2)).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(recorder.chunk_count() > before_pause);

        let sealed = recorder.stop().await;
        let concatenated: Vec<u8> = sealed
            .chunks
            .iter()
            .flat_map(|c| c.data.iter().copied())
            .collect();
        // Two unpaused video frames plus the tail; the paused frame is absent.
        assert_eq!(concatenated, StubEncoder::expected_payload(2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_final_boundary() {
        let (_feeder, stream, _source) = combined_stream();
        let backend = Box::new(StubEncoder::new());
        let recorder = Recorder::start(backend, stream, &DEFAULT_CONTAINER_PREFERENCES, TICK)
            .await
            .unwrap();
        let mut finalized = recorder.finalized_watch();
        assert!(!*finalized.borrow());

        let sealed = recorder.stop().await;
        assert!(*finalized.borrow_and_update());
        // No frames were fed, but the sealing boundary is still present.
        assert_eq!(sealed.chunks.len(), 1);
        assert_eq!(sealed.chunks[0].data, StubEncoder::TAIL);
    }

    #[tokio::test(start_paused = true)]
    async fn encoder_fault_is_reported_and_partial_chunks_survive() {
        let (feeder, stream, _source) = combined_stream();
        let backend = Box::new(StubEncoder::failing_after(2));
        let recorder = Recorder::start(backend, stream, &DEFAULT_CONTAINER_PREFERENCES, TICK)
            .await
            .unwrap();
        let mut fault = recorder.fault_watch();

        feeder.push_video(video_frame(0)).await;
        feeder.push_video(video_frame(1)).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // Third push trips the stub's failure threshold.
        feeder.push_video(video_frame(2)).await;

        fault.changed().await.unwrap();
        assert!(*fault.borrow());

        let sealed = recorder.stop().await;
        assert!(sealed.fault.is_some());
        assert!(!sealed.chunks.is_empty());
    }
}
