use crate::frame::RawFrame;
use crate::labels::{decode, Emotion};
use crate::model_service::{InferenceError, ModelService};
use crate::preprocess::{preprocess, PreprocessError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// A frame is already in flight; this one was dropped, not queued.
    DroppedBusy,
    /// The pipeline has shut down and accepts no further frames.
    Closed,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("inference engine failed: {0}")]
    EngineFailure(String),
    #[error("pipeline worker panicked")]
    WorkerPanicked,
}

#[derive(Error, Debug)]
enum FrameError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

struct InFlight {
    frame: RawFrame,
    // Held until the worker finishes the frame; its release reopens the slot.
    _permit: OwnedSemaphorePermit,
}

/// Submission side of the pipeline. Cheap to clone; safe to call from the
/// frame source's own context since `try_submit` never blocks.
#[derive(Clone)]
pub struct FrameIntake {
    tx: mpsc::Sender<InFlight>,
    slot: Arc<Semaphore>,
}

impl FrameIntake {
    /// Hands a frame to the worker, or drops it if one is already in
    /// flight. The frame's release hook fires on every path.
    pub fn try_submit(&self, frame: RawFrame) -> SubmitOutcome {
        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return SubmitOutcome::DroppedBusy,
            Err(TryAcquireError::Closed) => return SubmitOutcome::Closed,
        };

        match self.tx.try_send(InFlight {
            frame,
            _permit: permit,
        }) {
            Ok(()) => SubmitOutcome::Accepted,
            // The permit gates the channel slot, so Full is unreachable.
            Err(mpsc::error::TrySendError::Full(_)) => SubmitOutcome::DroppedBusy,
            Err(mpsc::error::TrySendError::Closed(_)) => SubmitOutcome::Closed,
        }
    }
}

pub struct PipelineHandle {
    intake: FrameIntake,
    labels: watch::Receiver<Emotion>,
    worker: JoinHandle<Result<(), PipelineError>>,
}

impl PipelineHandle {
    pub fn intake(&self) -> FrameIntake {
        self.intake.clone()
    }

    /// Latest classified label; updated fire-and-forget, so reading it
    /// never blocks the worker.
    pub fn labels(&self) -> watch::Receiver<Emotion> {
        self.labels.clone()
    }

    /// Waits for the worker to drain any in-flight frame and stop. The
    /// model service is released when the worker returns.
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        drop(self.intake);
        match self.worker.await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::WorkerPanicked),
        }
    }
}

/// Spawns the single inference worker. One frame is processed at a time;
/// the one-permit slot enforces drop-on-busy backpressure at submission.
pub fn start<M: ModelService>(
    model_service: M,
    shutdown_rx: broadcast::Receiver<()>,
) -> PipelineHandle {
    let (tx, rx) = mpsc::channel::<InFlight>(1);
    let slot = Arc::new(Semaphore::new(1));
    let (labels_tx, labels_rx) = watch::channel(Emotion::Unknown);

    let worker = tokio::spawn(run_worker(model_service, rx, labels_tx, shutdown_rx));

    PipelineHandle {
        intake: FrameIntake { tx, slot },
        labels: labels_rx,
        worker,
    }
}

async fn run_worker<M: ModelService>(
    model_service: M,
    mut rx: mpsc::Receiver<InFlight>,
    labels_tx: watch::Sender<Emotion>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PipelineError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                rx.close();
                // Drain the frame that was already accepted, if any.
                while let Ok(in_flight) = rx.try_recv() {
                    handle_frame(&model_service, in_flight, &labels_tx)?;
                }
                break;
            }
            maybe_frame = rx.recv() => {
                match maybe_frame {
                    Some(in_flight) => {
                        if let Err(e) = handle_frame(&model_service, in_flight, &labels_tx) {
                            rx.close();
                            return Err(e);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("pipeline worker stopped");
    Ok(())
}

fn handle_frame<M: ModelService>(
    model_service: &M,
    in_flight: InFlight,
    labels_tx: &watch::Sender<Emotion>,
) -> Result<(), PipelineError> {
    let InFlight { frame, _permit } = in_flight;

    match classify(model_service, &frame) {
        Ok(label) => {
            tracing::info!(label = %label, "frame classified");
            let _ = labels_tx.send(label);
        }
        Err(FrameError::Inference(e)) if e.is_fatal() => {
            tracing::error!(error = %e, "inference engine lost, stopping worker");
            return Err(PipelineError::EngineFailure(e.to_string()));
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping frame");
        }
    }

    Ok(())
    // frame and permit drop here: the source is released, the slot reopens
}

fn classify<M: ModelService>(model_service: &M, frame: &RawFrame) -> Result<Emotion, FrameError> {
    let input = preprocess(frame)?;
    let output = model_service.infer(&input)?;
    tracing::debug!(scores = ?output.scores(), "raw model output");
    Ok(decode(&output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use crate::model_service::{InputTensor, OutputTensor};
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    struct MockModel {
        scores: Vec<f32>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
        fatal: bool,
    }

    impl MockModel {
        fn instant(scores: Vec<f32>) -> (Self, Arc<AtomicUsize>) {
            Self::with_delay(scores, Duration::ZERO)
        }

        fn with_delay(scores: Vec<f32>, delay: Duration) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    scores,
                    delay,
                    calls: calls.clone(),
                    fatal: false,
                },
                calls,
            )
        }

        fn failing() -> Self {
            Self {
                scores: vec![],
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
                fatal: true,
            }
        }
    }

    impl ModelService for MockModel {
        fn infer(&self, _input: &InputTensor) -> Result<OutputTensor, InferenceError> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(InferenceError::SessionLost("mock engine gone".into()));
            }
            Ok(OutputTensor::new(self.scores.clone()))
        }
    }

    fn valid_frame() -> RawFrame {
        let img = ImageBuffer::from_pixel(64, 64, Rgb([128u8, 128, 128]));
        let mut data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .unwrap();
        RawFrame::new(data, FrameFormat::Png)
    }

    fn corrupt_frame() -> RawFrame {
        RawFrame::new(b"not an image at all".to_vec(), FrameFormat::Unspecified)
    }

    async fn next_label(labels: &mut watch::Receiver<Emotion>) -> Emotion {
        timeout(Duration::from_secs(2), labels.changed())
            .await
            .expect("timed out waiting for a label")
            .expect("label channel closed");
        *labels.borrow_and_update()
    }

    #[tokio::test]
    async fn test_successful_frame_publishes_label() {
        let (model, _) = MockModel::instant(vec![0.1, 0.1, 0.1, 0.9, 0.1, 0.1, 0.1]);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(model, shutdown_tx.subscribe());
        let mut labels = handle.labels();

        assert_eq!(handle.intake().try_submit(valid_frame()), SubmitOutcome::Accepted);
        assert_eq!(next_label(&mut labels).await, Emotion::Happy);

        let _ = shutdown_tx.send(());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_pipeline_drops_frames_instead_of_queueing() {
        let (model, calls) = MockModel::with_delay(vec![0.0; 7], Duration::from_millis(300));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(model, shutdown_tx.subscribe());
        let intake = handle.intake();

        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::Accepted);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Worker is mid-inference: everything arriving now is dropped.
        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::DroppedBusy);
        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::DroppedBusy);
        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::DroppedBusy);

        let _ = shutdown_tx.send(());
        handle.shutdown().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_and_processed_frames_are_all_released() {
        let released = Arc::new(AtomicUsize::new(0));
        let tracked = |counter: &Arc<AtomicUsize>| {
            let counter = counter.clone();
            valid_frame().with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };

        let (model, _) = MockModel::with_delay(vec![0.0; 7], Duration::from_millis(300));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(model, shutdown_tx.subscribe());
        let intake = handle.intake();

        assert_eq!(intake.try_submit(tracked(&released)), SubmitOutcome::Accepted);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(intake.try_submit(tracked(&released)), SubmitOutcome::DroppedBusy);
        // A dropped frame is released before try_submit even returns.
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let _ = shutdown_tx.send(());
        handle.shutdown().await.unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_preprocess_failure_does_not_stall_pipeline() {
        let (model, _) = MockModel::instant(vec![0.1, 0.1, 0.1, 0.9, 0.1, 0.1, 0.1]);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(model, shutdown_tx.subscribe());
        let intake = handle.intake();
        let mut labels = handle.labels();

        assert_eq!(intake.try_submit(corrupt_frame()), SubmitOutcome::Accepted);
        // The failed frame is logged and skipped; the next one goes through.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::Accepted);
        assert_eq!(next_label(&mut labels).await, Emotion::Happy);

        let _ = shutdown_tx.send(());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_output_decodes_to_unknown_without_stalling() {
        let (model, _) = MockModel::instant(vec![0.5, 0.5, 0.5]);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(model, shutdown_tx.subscribe());
        let mut labels = handle.labels();

        assert_eq!(handle.intake().try_submit(valid_frame()), SubmitOutcome::Accepted);
        assert_eq!(next_label(&mut labels).await, Emotion::Unknown);

        let _ = shutdown_tx.send(());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_engine_fault_closes_the_pipeline() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(MockModel::failing(), shutdown_tx.subscribe());
        let intake = handle.intake();

        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::Accepted);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::Closed);
        assert!(matches!(
            handle.shutdown().await,
            Err(PipelineError::EngineFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_frames() {
        let (model, _) = MockModel::instant(vec![0.0; 7]);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = start(model, shutdown_tx.subscribe());
        let intake = handle.intake();

        let _ = shutdown_tx.send(());
        handle.shutdown().await.unwrap();

        assert_eq!(intake.try_submit(valid_frame()), SubmitOutcome::Closed);
    }
}
