//! Audio mixing graph
//!
//! [`AudioMixer`] combines zero, one, or two live audio sources (screen
//! audio, microphone) into exactly one mixed track. Each input passes an
//! independent gain stage into a shared summing loop; a missing input
//! contributes silence rather than failing, so the downstream recorder
//! always sees a consistent video+audio shape.

use crate::capture::{AudioFormat, AudioFrame, AudioTrack};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Graph-level configuration.
#[derive(Debug, Clone, Copy)]
pub struct MixerConfig {
    /// Output sample rate; inputs at other rates are linearly resampled.
    pub sample_rate: u32,

    /// Cadence of mixed output buffers.
    pub frame_interval: Duration,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frame_interval: Duration::from_millis(100),
        }
    }
}

/// Named mixer inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerInput {
    /// System/screen audio
    Screen,
    /// Microphone audio
    Microphone,
}

/// Lock-free gain value shared with the mixing task.
struct GainStage {
    bits: AtomicU32,
}

impl GainStage {
    fn new(gain: f32) -> Self {
        Self {
            bits: AtomicU32::new(gain.to_bits()),
        }
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, gain: f32) {
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
    }
}

struct InputLane {
    track: AudioTrack,
    gain: Arc<GainStage>,
    /// Mono samples at the graph rate, pending mix-down.
    pending: VecDeque<f32>,
}

/// The audio-routing graph for one recording attempt.
///
/// Built once at countdown-zero, torn down exactly once on session exit.
pub struct AudioMixer {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    screen_gain: Arc<GainStage>,
    microphone_gain: Arc<GainStage>,
    torn_down: bool,
}

impl AudioMixer {
    /// Construct the summing graph and return it with its single output
    /// track. Either input may be absent; with none, the output still exists
    /// and carries silence.
    pub fn build(
        config: MixerConfig,
        screen: Option<AudioTrack>,
        microphone: Option<AudioTrack>,
    ) -> (AudioMixer, AudioTrack) {
        let screen_gain = Arc::new(GainStage::new(1.0));
        let microphone_gain = Arc::new(GainStage::new(1.0));

        let mut lanes = Vec::new();
        if let Some(track) = screen {
            lanes.push(InputLane {
                track,
                gain: screen_gain.clone(),
                pending: VecDeque::new(),
            });
        }
        if let Some(track) = microphone {
            lanes.push(InputLane {
                track,
                gain: microphone_gain.clone(),
                pending: VecDeque::new(),
            });
        }

        tracing::info!(
            inputs = lanes.len(),
            sample_rate = config.sample_rate,
            "audio graph built"
        );

        let format = AudioFormat {
            sample_rate: config.sample_rate,
            channels: 1,
        };
        let (out_tx, output) = AudioTrack::channel(format, 32);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_mix_loop(config, lanes, out_tx, shutdown_rx));

        let mixer = AudioMixer {
            shutdown,
            task: Mutex::new(Some(task)),
            screen_gain,
            microphone_gain,
            torn_down: false,
        };
        (mixer, output)
    }

    /// Adjust one input's gain stage (default unity).
    pub fn set_gain(&self, input: MixerInput, gain: f32) {
        let stage = match input {
            MixerInput::Screen => &self.screen_gain,
            MixerInput::Microphone => &self.microphone_gain,
        };
        stage.set(gain.max(0.0));
    }

    pub fn gain(&self, input: MixerInput) -> f32 {
        match input {
            MixerInput::Screen => self.screen_gain.get(),
            MixerInput::Microphone => self.microphone_gain.get(),
        }
    }

    /// Stop the summing loop and disconnect the inputs. Must be called once
    /// per built graph; further calls are no-ops.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("audio graph torn down");
    }
}

async fn run_mix_loop(
    config: MixerConfig,
    mut lanes: Vec<InputLane>,
    out_tx: mpsc::Sender<AudioFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let samples_per_frame =
        ((config.sample_rate as f64 * config.frame_interval.as_secs_f64()) as usize).max(1);
    let mut ticker = tokio::time::interval(config.frame_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut emitted: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for lane in &mut lanes {
                    ingest(lane, config.sample_rate);
                }
                let mut samples = vec![0.0f32; samples_per_frame];
                for lane in &mut lanes {
                    let gain = lane.gain.get();
                    for slot in samples.iter_mut() {
                        match lane.pending.pop_front() {
                            Some(s) => *slot += s * gain,
                            None => break,
                        }
                    }
                }
                for s in samples.iter_mut() {
                    *s = s.clamp(-1.0, 1.0);
                }
                let frame = AudioFrame {
                    samples,
                    sample_rate: config.sample_rate,
                    channels: 1,
                    timestamp_ms: emitted as f64 * 1000.0 / config.sample_rate as f64,
                };
                emitted += samples_per_frame as u64;
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Pull everything the input has buffered, downmix to mono, and resample to
/// the graph rate.
fn ingest(lane: &mut InputLane, graph_rate: u32) {
    while let Some(frame) = lane.track.try_recv() {
        let mono = downmix(&frame);
        if frame.sample_rate == graph_rate {
            lane.pending.extend(mono);
        } else {
            lane.pending
                .extend(resample_linear(&mono, frame.sample_rate, graph_rate));
        }
    }
}

/// Average interleaved channels down to mono.
fn downmix(frame: &AudioFrame) -> Vec<f32> {
    let channels = frame.channels.max(1) as usize;
    if channels == 1 {
        return frame.samples.clone();
    }
    frame
        .samples
        .chunks_exact(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler. Adequate for voice-grade mixing; inputs
/// and the graph rarely differ by more than 44.1 vs 48 kHz.
fn resample_linear(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || input.is_empty() {
        return input.to_vec();
    }
    let out_len = ((input.len() as u64 * to as u64) / from as u64).max(1) as usize;
    let step = (input.len() - 1) as f64 / (out_len - 1).max(1) as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx];
            let b = input[(idx + 1).min(input.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
