//! Camera capture using nokhwa
//!
//! Provides camera enumeration and a camera source feeding BGRA frames into
//! the engine's video track. The camera handle is platform-specific and not
//! guaranteed `Send`, so it is created and driven entirely on a dedicated
//! capture thread; acquisition failures are handed back over a
//! ready-handshake before the source is returned.

use super::provider::AcquireError;
use super::source::{
    source_channel, MediaSource, SourceFeeder, SourceKind, SourceSpec, VideoFormat, VideoFrame,
};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use serde::{Deserialize, Serialize};
use std::sync::{mpsc, Arc};

/// Video resolution
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Information about a camera/webcam.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Get list of available cameras.
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };

                // Common resolutions; per-mode probing needs an open device.
                let resolutions = vec![
                    Resolution {
                        width: 1920,
                        height: 1080,
                    },
                    Resolution {
                        width: 1280,
                        height: 720,
                    },
                    Resolution {
                        width: 640,
                        height: 480,
                    },
                ];

                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    supported_resolutions: resolutions,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate cameras: {e:?}");
            Vec::new()
        }
    }
}

fn camera_index(device_id: Option<&str>) -> CameraIndex {
    match device_id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        None => CameraIndex::Index(0),
    }
}

/// Open a camera source. `device_id` of `None` uses the first camera.
///
/// Blocks until the device reports ready or refuses to open, so failures
/// (no device, OS-level permission refusal) surface to the caller. Call from
/// a blocking-friendly context (`spawn_blocking` in async code).
pub fn open_camera(device_id: Option<&str>) -> Result<MediaSource, AcquireError> {
    let index = camera_index(device_id);

    let (ready_tx, ready_rx) = mpsc::channel::<Result<(VideoFormat, String), AcquireError>>();
    let (feeder_tx, feeder_rx) = mpsc::channel::<Arc<SourceFeeder>>();

    std::thread::spawn(move || {
        let format =
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = match Camera::new(index.clone(), format) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready_tx.send(Err(AcquireError::DeviceNotFound(format!(
                    "camera {index:?}: {e}"
                ))));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = ready_tx.send(Err(AcquireError::Backend(format!(
                "failed to open camera stream: {e}"
            ))));
            return;
        }

        let camera_format = camera.camera_format();
        let video_format = VideoFormat {
            width: camera_format.resolution().width(),
            height: camera_format.resolution().height(),
            frame_rate: camera_format.frame_rate(),
        };
        let label = camera.info().human_name().to_string();
        if ready_tx.send(Ok((video_format, label))).is_err() {
            let _ = camera.stop_stream();
            return;
        }
        let feeder = match feeder_rx.recv() {
            Ok(f) => f,
            Err(_) => {
                let _ = camera.stop_stream();
                return;
            }
        };

        run_capture_loop(&mut camera, &feeder);
        let _ = camera.stop_stream();
    });

    let (video_format, label) = ready_rx
        .recv()
        .map_err(|_| AcquireError::Backend("camera thread exited before ready".into()))??;

    tracing::info!(
        camera = %label,
        width = video_format.width,
        height = video_format.height,
        fps = video_format.frame_rate,
        "camera stream opened"
    );

    let spec = SourceSpec {
        kind: SourceKind::Camera,
        video: Some(video_format),
        audio: None,
    };
    let (feeder, source) = source_channel(spec, label);
    let _ = feeder_tx.send(Arc::new(feeder));

    Ok(source)
}

fn run_capture_loop(camera: &mut Camera, feeder: &SourceFeeder) {
    let start = std::time::Instant::now();
    let mut count: u64 = 0;
    while feeder.is_live() {
        // frame() blocks until the camera delivers; the camera controls the
        // timing.
        match camera.frame() {
            Ok(frame) => {
                let decoded = match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => image,
                    Err(e) => {
                        tracing::debug!("failed to decode camera frame: {e:?}");
                        continue;
                    }
                };
                let (width, height) = (decoded.width(), decoded.height());
                let mut data = decoded.into_raw();
                // RGBA -> BGRA, the engine's frame layout.
                for px in data.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                let frame = VideoFrame {
                    data,
                    width,
                    height,
                    bytes_per_row: width * 4,
                    timestamp_ms: start.elapsed().as_secs_f64() * 1000.0,
                };
                if !feeder.push_video_blocking(frame) {
                    break;
                }
                count += 1;
            }
            Err(e) => {
                tracing::error!("camera frame error, ending source: {e:?}");
                feeder.revoke();
                break;
            }
        }
    }
    tracing::debug!("camera thread exiting after {count} frames");
}
