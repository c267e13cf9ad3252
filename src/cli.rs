// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Recording video, optionally in slow motion and with live tracking
//! - Extracting a smoothed subject trajectory from a recorded file
//! - Re-smoothing the detection log stored with a recording

use crate::RecordArgs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use trackcam::Config;
use trackcam::backends::camera::types::{CameraFormat, Framerate};
use trackcam::backends::camera::{CameraSource, CaptureConfig, CaptureDevice, GstCameraSource};
use trackcam::frame_processor::{DetectionAdapter, QrMarkerDetector};
use trackcam::pipelines::trajectory::{
    OfflineTrajectoryExtractor, TrajectorySmoother, smooth_detection_log,
};
use trackcam::pipelines::video::{
    CapturePipeline, GstEncoderFactory, RecorderState, RecordingEvent, check_available_encoders,
};
use trackcam::storage::{DirectorySink, StoredDetectionLog};

/// How often the capture bus is checked for device faults
const FAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn qr_adapter(config: &Config) -> DetectionAdapter {
    let label = &config.detection.subject_label;
    DetectionAdapter::new(Box::new(QrMarkerDetector::with_label(label.as_str())))
        .with_subject_label(label.as_str())
        .with_confidence_threshold(config.detection.confidence_threshold)
}

/// Record a video
pub fn record(args: RecordArgs, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;
    check_available_encoders();

    let device = if args.test_source {
        CaptureDevice::TestPattern
    } else {
        CaptureDevice::parse(&args.device)
    };

    let framerate = if args.slow_motion {
        config.format.slow_motion_framerate
    } else {
        config.format.framerate
    };
    let format = CameraFormat {
        width: config.format.width,
        height: config.format.height,
        framerate: Framerate::from_int(framerate),
    };

    let mut capture = CaptureConfig::new(device, format);
    // Slow-motion recordings carry no audio track
    capture.audio = config.audio && !args.no_audio && !args.slow_motion;
    capture.facing = config.facing;
    capture.rotation = config.rotation;

    let mut settings = config.to_session_settings();
    settings.audio = capture.audio;
    settings.orientation = capture.orientation();

    let detector = (args.track || config.detection.enabled).then(|| qr_adapter(&config));
    let output_dir = args.output.clone().unwrap_or_else(|| config.output_dir());
    println!("Saving to: {}", output_dir.display());

    let pipeline = CapturePipeline::new(
        settings,
        Arc::new(GstEncoderFactory),
        Arc::new(DirectorySink::new(output_dir)),
        detector,
    );
    pipeline.set_slow_motion(args.slow_motion);

    let mut source = GstCameraSource::new(capture);
    source.start(Arc::new(pipeline.clone()))?;
    println!("Capturing: {}", format);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run_session(&pipeline, &mut source, &args));

    source.stop();
    if source.dropped_samples() > 0 {
        println!("Dropped {} samples", source.dropped_samples());
    }
    result
}

async fn run_session(
    pipeline: &CapturePipeline,
    source: &mut GstCameraSource,
    args: &RecordArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    let mut events = pipeline.subscribe();
    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    pipeline.start_with_delay(Duration::from_secs(args.delay), duration)?;

    if args.delay > 0 {
        println!("Recording starts in {}s (press Ctrl+C to cancel)", args.delay);
    }

    let mut faults = tokio::time::interval(FAULT_POLL_INTERVAL);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RecordingEvent::Started(_)) => {
                    println!("Recording... (press Ctrl+C to stop early)");
                }
                Ok(RecordingEvent::Finished(path)) => {
                    println!("Video saved: {}", path.display());
                    return Ok(());
                }
                Ok(RecordingEvent::Failed(msg)) => return Err(msg.into()),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = stop_rx.recv() => {
                println!();
                println!("Stopping early...");
                let armed = pipeline.state() == RecorderState::Armed;
                if pipeline.stop().await?.is_none() && armed {
                    println!("Recording cancelled");
                    return Ok(());
                }
                // The stored path arrives as an event
            }
            _ = faults.tick() => {
                if let Some(fault) = source.poll_fault() {
                    if pipeline.stop().await.is_err() {
                        tracing::warn!("Recording could not be saved after camera fault");
                    }
                    return Err(fault.into());
                }
            }
        }
    }
}

/// Extract the subject trajectory from a recorded file
pub fn extract(
    input: PathBuf,
    stride: Option<usize>,
    output: Option<PathBuf>,
    config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let mut extractor_config = config.extractor_config();
    if let Some(stride) = stride {
        extractor_config.frame_skip = stride;
    }

    let mut extractor = OfflineTrajectoryExtractor::new(qr_adapter(&config), extractor_config);
    let trajectory = extractor.extract_file(&input)?;
    eprintln!(
        "Extracted {} frames ({}x{})",
        trajectory.centers.len(),
        trajectory.frame_width,
        trajectory.frame_height
    );

    write_json(&trajectory, output.as_deref())
}

/// Re-smooth a stored detection log
pub fn smooth(
    log: PathBuf,
    output: Option<PathBuf>,
    config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let stored = StoredDetectionLog::load(&log)?;
    let smoother = TrajectorySmoother::new(config.smoother);
    let trajectory = smooth_detection_log(&smoother, &stored);
    eprintln!("Smoothed {} entries", trajectory.centers.len());

    write_json(&trajectory, output.as_deref())
}

fn write_json<T: Serialize>(
    value: &T,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("Written: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
