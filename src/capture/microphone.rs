//! Microphone capture using cpal
//!
//! Provides input-device enumeration and a microphone source that feeds the
//! engine's audio track. The cpal stream is not `Send`, so capture runs on a
//! dedicated thread that winds down when the source is stopped.

use super::provider::{AcquireError, MicrophoneOptions};
use super::source::{
    source_channel, AudioFormat, AudioFrame, MediaSource, SourceFeeder, SourceKind, SourceSpec,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Information about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is the default input device
    pub is_default: bool,
}

/// Get list of available audio input devices.
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_name.as_ref() == Some(&name);
                devices.push(AudioDeviceInfo {
                    id: name.clone(),
                    name,
                    is_default,
                });
            }
        }
    }

    devices
}

fn resolve_device(device_id: Option<&str>) -> Result<Device, AcquireError> {
    let host = cpal::default_host();
    match device_id {
        Some(name) => {
            if let Ok(devices) = host.input_devices() {
                for device in devices {
                    if device.name().as_deref().ok() == Some(name) {
                        return Ok(device);
                    }
                }
            }
            Err(AcquireError::DeviceNotFound(format!(
                "audio input '{name}' not found"
            )))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| AcquireError::DeviceNotFound("no default audio input device".into())),
    }
}

/// Open a microphone source.
///
/// `device_id` of `None` uses the default input device. The requested
/// [`MicrophoneOptions`] are recorded with the stream; this backend captures
/// the raw device signal and leaves DSP (echo cancellation, noise
/// suppression) to hosts that expose it.
pub fn open_microphone(
    device_id: Option<&str>,
    options: MicrophoneOptions,
) -> Result<MediaSource, AcquireError> {
    let device = resolve_device(device_id)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = device
        .default_input_config()
        .map_err(|e| AcquireError::Backend(format!("failed to get audio config: {e}")))?;

    let format = AudioFormat {
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    };
    let spec = SourceSpec {
        kind: SourceKind::Microphone,
        video: None,
        audio: Some(format),
    };
    let (feeder, source) = source_channel(spec, device_name.clone());
    let feeder = Arc::new(feeder);

    tracing::info!(
        device = %device_name,
        sample_rate = format.sample_rate,
        channels = format.channels,
        ?options,
        "opening microphone stream"
    );

    let device_id = device_id.map(str::to_owned);
    std::thread::spawn(move || run_capture_thread(device_id, feeder, format));

    Ok(source)
}

/// Owns the cpal stream for one microphone source. Exits when the source is
/// stopped or the device errors out.
fn run_capture_thread(device_id: Option<String>, feeder: Arc<SourceFeeder>, format: AudioFormat) {
    let device = match resolve_device(device_id.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("microphone thread lost its device: {e}");
            feeder.revoke();
            return;
        }
    };
    let config = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to get audio config in capture thread: {e}");
            feeder.revoke();
            return;
        }
    };

    let sample_format = config.sample_format();
    let stream_config: StreamConfig = config.into();
    if stream_config.sample_rate.0 != format.sample_rate || stream_config.channels != format.channels
    {
        tracing::warn!(
            declared_rate = format.sample_rate,
            actual_rate = stream_config.sample_rate.0,
            "microphone stream config changed between open and capture"
        );
    }

    let stream = build_stream(&device, &stream_config, sample_format, feeder.clone());
    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to build microphone stream: {e}");
            feeder.revoke();
            return;
        }
    };

    if let Err(e) = stream.play() {
        tracing::error!("failed to start microphone stream: {e}");
        feeder.revoke();
        return;
    }

    tracing::info!("microphone stream running");
    while feeder.is_live() {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    // Stream drops here, stopping capture.
    tracing::debug!("microphone stream stopped");
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    feeder: Arc<SourceFeeder>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let err_feeder = feeder.clone();
    let err_fn = move |err| {
        tracing::error!("microphone stream error: {err}");
        err_feeder.revoke();
    };

    let mut position: u64 = 0;
    let mut frame = move |samples: Vec<f32>| {
        let timestamp_ms = position as f64 * 1000.0 / sample_rate as f64;
        position += (samples.len() / channels.max(1) as usize) as u64;
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms,
        }
    };

    match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                feeder.push_audio_nonblocking(frame(data.to_vec()));
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data
                    .iter()
                    .map(|&s| s as f32 / i16::MAX as f32)
                    .collect::<Vec<_>>();
                feeder.push_audio_nonblocking(frame(samples));
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples = data
                    .iter()
                    .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                    .collect::<Vec<_>>();
                feeder.push_audio_nonblocking(frame(samples));
            },
            err_fn,
            None,
        ),
        other => {
            tracing::error!("unsupported microphone sample format: {other:?}");
            Err(cpal::BuildStreamError::StreamConfigNotSupported)
        }
    }
}
