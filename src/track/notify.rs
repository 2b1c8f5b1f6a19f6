use crate::track::{FinalizeEvent, ReportEvent};
use crate::utils::bbox::{BoundingBox, FrameDimensions};
use anyhow::Result;
use log::info;

/// Receiver of the engine output: change reports and final determinations.
///
/// Implementations run on the dispatch worker thread, never on the thread that ingests snapshots,
/// so a slow receiver does not stall the engine. Returned errors are logged and dropped.
///
pub trait TrackObserver: Send + 'static {
    fn on_report(&mut self, _event: &ReportEvent) -> Result<()> {
        Ok(())
    }

    /// Called exactly once per track.
    ///
    fn on_finalized(&mut self, event: &FinalizeEvent) -> Result<()>;
}

#[derive(Default, Clone, Debug)]
pub struct NoopObserver;

impl TrackObserver for NoopObserver {
    fn on_finalized(&mut self, _event: &FinalizeEvent) -> Result<()> {
        Ok(())
    }
}

/// Writes reports and final reports to the log.
///
#[derive(Default, Clone, Debug)]
pub struct LogObserver;

impl TrackObserver for LogObserver {
    fn on_report(&mut self, event: &ReportEvent) -> Result<()> {
        info!("{}", event.summary);
        Ok(())
    }

    fn on_finalized(&mut self, event: &FinalizeEvent) -> Result<()> {
        info!("{}", event.summary);
        Ok(())
    }
}

/// Crop (or whole frame) persistence request for the image collaborator.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSaveRequest {
    pub source_id: String,
    pub frame_seq: u64,
    pub image_id: Option<String>,
    pub label: String,
    pub bbox: BoundingBox,
    pub frame: FrameDimensions,
}

impl ImageSaveRequest {
    /// File name the persisted crop is expected to get: `{source}-{frame}-{label}.png`.
    ///
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.png", self.source_id, self.frame_seq, self.label)
    }
}

/// Image cropper/persister. Best effort: failures are logged, never retried.
///
pub trait ImageSink: Send + 'static {
    fn save(&mut self, request: &ImageSaveRequest) -> Result<()>;
}

#[derive(Default, Clone, Debug)]
pub struct NoopImageSink;

impl ImageSink for NoopImageSink {
    fn save(&mut self, _request: &ImageSaveRequest) -> Result<()> {
        Ok(())
    }
}
