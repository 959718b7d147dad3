//! End-to-end demo: synthetic sources through the real ffmpeg encoder.
//!
//! Runs a short capture session against the synthetic provider (test-pattern
//! video, tone microphone, humming system audio), records a few seconds, and
//! writes the finalized artifact to the temp directory.

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::{bail, Context};
    use recordkit::recorder::{ffmpeg::ffmpeg_available, EncoderFactory, FfmpegEncoder};
    use recordkit::{
        CaptureSession, SessionConfig, SessionEvent, SourceFlags, SyntheticConfig,
        SyntheticProvider,
    };
    use std::time::Duration;

    recordkit::init_tracing();

    if !ffmpeg_available() {
        bail!("ffmpeg not found on PATH; the demo needs the ffmpeg encoder backend");
    }

    let provider = SyntheticProvider::new(SyntheticConfig {
        screen_audio: true,
        ..SyntheticConfig::default()
    });
    let factory: EncoderFactory = Box::new(|| Box::new(FfmpegEncoder::new()));
    let flags = SourceFlags {
        camera_enabled: false,
        microphone_enabled: true,
        noise_suppression_enabled: true,
    };

    let session =
        CaptureSession::open(Box::new(provider), factory, flags, SessionConfig::default()).await;

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::CountdownTick(n) => println!("countdown: {n}"),
                SessionEvent::StateChanged(state) => println!("state: {state}"),
                SessionEvent::ElapsedSeconds(s) => println!("recording: {s}s"),
                SessionEvent::Error(message) => eprintln!("error: {message}"),
                SessionEvent::Saved { id } => println!("saved: {id}"),
            }
        }
    });

    session.begin_countdown().await?;
    // Countdown (3s) plus roughly five seconds of recording.
    tokio::time::sleep(Duration::from_secs(8)).await;
    session.stop().await?;

    let artifact = session.save().await?;
    let meta = artifact.metadata();
    let path = std::env::temp_dir().join(format!(
        "synthcap-{}.{}",
        artifact.id,
        artifact.container.extension()
    ));
    std::fs::write(&path, &artifact.payload).context("writing artifact to disk")?;
    println!(
        "wrote {} ({} bytes, {})",
        path.display(),
        meta.size_bytes,
        meta.duration_clock
    );

    printer.abort();
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the synthcap demo needs a Unix host for the ffmpeg encoder backend");
}
