use crate::config::SourceSettings;
use crate::frame::{FrameFormat, RawFrame};
use crate::pipeline::{FrameIntake, SubmitOutcome};
use std::path::PathBuf;
use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{sleep, Duration},
};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to scan frame directory {dir:?}: {source}")]
    Scan {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("no image files found in {0:?}")]
    NoFrames(PathBuf),
}

/// Replays image files from a directory at a fixed rate, standing in for
/// a live camera. Frames are pushed through the intake with no retry;
/// whatever the pipeline drops stays dropped.
pub struct FileFrameSource {
    frames_dir: PathBuf,
    frame_delay_ms: u64,
}

impl FileFrameSource {
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            frames_dir: settings.frames_dir.clone(),
            frame_delay_ms: settings.get_frame_delay_ms(),
        }
    }

    pub fn start(
        self,
        intake: FrameIntake,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<Result<(), SourceError>> {
        tokio::spawn(async move {
            let paths = self.scan_frames()?;
            tracing::info!(
                frames = paths.len(),
                dir = %self.frames_dir.display(),
                "frame source started"
            );

            let mut index = 0usize;
            let mut dropped = 0u64;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!(dropped, "frame source stopping");
                        return Ok(());
                    }
                    _ = sleep(Duration::from_millis(self.frame_delay_ms)) => {
                        let path = &paths[index % paths.len()];
                        index += 1;

                        let data = match tokio::fs::read(path).await {
                            Ok(data) => data,
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "failed to read frame file");
                                continue;
                            }
                        };

                        let format = path
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .map(FrameFormat::from_extension)
                            .unwrap_or(FrameFormat::Unspecified);

                        match intake.try_submit(RawFrame::new(data, format)) {
                            SubmitOutcome::Accepted => {}
                            SubmitOutcome::DroppedBusy => {
                                dropped += 1;
                                tracing::debug!(path = %path.display(), "inference busy, frame dropped");
                            }
                            SubmitOutcome::Closed => {
                                tracing::info!(dropped, "pipeline closed, frame source stopping");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        })
    }

    fn scan_frames(&self) -> Result<Vec<PathBuf>, SourceError> {
        let entries = std::fs::read_dir(&self.frames_dir).map_err(|e| SourceError::Scan {
            dir: self.frames_dir.clone(),
            source: e,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .map(FrameFormat::from_extension),
                    Some(FrameFormat::Jpeg) | Some(FrameFormat::Png)
                )
            })
            .collect();

        if paths.is_empty() {
            return Err(SourceError::NoFrames(self.frames_dir.clone()));
        }

        paths.sort();
        Ok(paths)
    }
}
