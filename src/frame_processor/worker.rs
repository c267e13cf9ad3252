// SPDX-License-Identifier: GPL-3.0-only

//! Dedicated detection worker thread
//!
//! The capture delivery context acquires the [`DetectionGate`](super::DetectionGate)
//! first and only then enqueues a job, so a busy detector shows up as an
//! explicit drop at the call site rather than a growing queue.

use crate::backends::camera::types::{MediaTime, VideoFrame};
use crate::frame_processor::gate::GatePermit;
use crate::frame_processor::tasks::subject_detector::DetectionAdapter;
use crate::frame_processor::types::Point;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// A frame handed to the worker together with the gate permit it holds
pub struct DetectionJob {
    /// Recording session the frame belongs to
    pub session: u64,
    /// Slot in the session's detection log
    pub slot: usize,
    pub frame: VideoFrame,
    pub permit: GatePermit,
}

/// Result of one job; `centers` is empty when nothing matched or detection failed
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub session: u64,
    pub slot: usize,
    pub timestamp: MediaTime,
    pub centers: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// A job is already queued
    Full,
    /// The worker thread has exited
    Closed,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Full => write!(f, "detection queue full"),
            SubmitError::Closed => write!(f, "detection worker stopped"),
        }
    }
}

impl std::error::Error for SubmitError {}

pub struct DetectionWorker {
    sender: Option<mpsc::Sender<DetectionJob>>,
    handle: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    /// Start the worker thread
    ///
    /// `on_outcome` runs on the worker thread after each job. The job's gate
    /// permit is released only after it returns.
    pub fn spawn<F>(mut adapter: DetectionAdapter, mut on_outcome: F) -> std::io::Result<Self>
    where
        F: FnMut(DetectionOutcome) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<DetectionJob>(1);

        let handle = std::thread::Builder::new()
            .name("detection-worker".into())
            .spawn(move || {
                info!(label = adapter.subject_label(), "Detection worker started");
                let mut processed: u64 = 0;

                while let Some(job) = receiver.blocking_recv() {
                    let DetectionJob {
                        session,
                        slot,
                        frame,
                        permit,
                    } = job;

                    let centers = adapter.detect(&frame);
                    processed += 1;
                    debug!(session, slot, found = centers.len(), "Detection job complete");

                    on_outcome(DetectionOutcome {
                        session,
                        slot,
                        timestamp: frame.pts,
                        centers,
                    });
                    drop(permit);
                }

                info!(processed, "Detection worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Enqueue a job without blocking
    ///
    /// On failure the job (and with it the permit) is dropped, releasing the gate.
    pub fn try_submit(&self, job: DetectionJob) -> Result<(), SubmitError> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(SubmitError::Closed);
        };
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Close the queue and wait for the in-flight job to finish
    pub fn shutdown(mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Detection worker panicked");
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread exit after its current job
        self.sender.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;
    use crate::errors::DetectionError;
    use crate::frame_processor::gate::DetectionGate;
    use crate::frame_processor::tasks::subject_detector::ObjectDetector;
    use crate::frame_processor::types::{Detection, FrameRegion};
    use image::RgbaImage;
    use std::sync::mpsc as std_mpsc;

    struct Fixed;

    impl ObjectDetector for Fixed {
        fn infer(&mut self, _: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
            Ok(vec![Detection::new(
                "person",
                0.9,
                FrameRegion::new(0.25, 0.25, 0.5, 0.5),
            )])
        }
    }

    struct Failing;

    impl ObjectDetector for Failing {
        fn infer(&mut self, _: &RgbaImage) -> Result<Vec<Detection>, DetectionError> {
            Err(DetectionError::InferenceFailed("model unavailable".into()))
        }
    }

    fn frame(index: i64) -> VideoFrame {
        VideoFrame::from_bytes(4, 4, PixelFormat::RGBA, vec![0; 64], MediaTime::new(index, 30))
    }

    #[test]
    fn test_outcome_delivered_and_gate_released() {
        let gate = DetectionGate::new();
        let (tx, rx) = std_mpsc::channel();
        let worker = DetectionWorker::spawn(DetectionAdapter::new(Box::new(Fixed)), move |o| {
            tx.send(o).unwrap();
        })
        .unwrap();

        let permit = gate.try_acquire().unwrap();
        worker
            .try_submit(DetectionJob {
                session: 1,
                slot: 7,
                frame: frame(3),
                permit,
            })
            .unwrap();

        let outcome = rx.recv().unwrap();
        assert_eq!(outcome.session, 1);
        assert_eq!(outcome.slot, 7);
        assert_eq!(outcome.timestamp, MediaTime::new(1, 10));
        assert_eq!(outcome.centers, vec![Point::new(0.5, 0.5)]);

        worker.shutdown();
        assert!(!gate.is_busy());
    }

    #[test]
    fn test_failure_still_releases_gate() {
        let gate = DetectionGate::new();
        let (tx, rx) = std_mpsc::channel();
        let worker = DetectionWorker::spawn(DetectionAdapter::new(Box::new(Failing)), move |o| {
            tx.send(o).unwrap();
        })
        .unwrap();

        worker
            .try_submit(DetectionJob {
                session: 0,
                slot: 0,
                frame: frame(0),
                permit: gate.try_acquire().unwrap(),
            })
            .unwrap();

        assert!(rx.recv().unwrap().centers.is_empty());
        worker.shutdown();
        assert!(gate.try_acquire().is_some());
    }
}
