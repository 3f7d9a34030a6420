//! Video pipeline: sampled detection with per-individual deduplication.
//!
//! The run is a small state machine:
//!
//! ```text
//! Reading --sampled frame--> Detecting --> Aggregating --> Reading
//!    |                           |
//!    +--end of stream--> Done    +--error--> Failed
//! ```
//!
//! Only every `frame_skip`-th frame (positions 0, N, 2N, ...) reaches
//! detection. The first sampled frame in which an individual is recognised
//! is annotated and saved; later sightings are ignored. Object labels from
//! all sampled frames are collected into a sorted set.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use super::source::{FrameSource, SourceGuard};
use super::{FramePipeline, ImageDetection};
use crate::annotate::save_annotated;
use crate::catalog::IndividualId;
use crate::config::RecognitionConfig;
use crate::error::{Result, RostroError};
use crate::imaging::downscale;

/// Per-run video settings, validated once when the pipeline is built.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOptions {
    pub frame_skip: usize,
    pub downscale: f32,
    /// Feed each sampled frame to the preview channel
    pub live: bool,
    /// Destination of representative frames
    pub output_dir: PathBuf,
}

impl VideoOptions {
    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self {
            frame_skip: config.frame_skip,
            downscale: config.downscale,
            live: false,
            output_dir: config.detected_dir.clone(),
        }
    }

    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_skip == 0 {
            return Err(RostroError::InvalidConfig(
                "frame_skip must be at least 1".into(),
            ));
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(RostroError::InvalidConfig(format!(
                "downscale must be in (0, 1], got {}",
                self.downscale
            )));
        }
        Ok(())
    }
}

/// Cloneable cancellation signal, checked at sampled-frame boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Answer from the live preview after each sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewControl {
    Continue,
    Stop,
}

/// Live side channel. It observes sampled frames and never alters the aggregate.
pub trait FramePreview {
    fn show(
        &mut self,
        frame_index: usize,
        frame: &RgbImage,
        detection: &ImageDetection,
    ) -> PreviewControl;
}

impl<F> FramePreview for F
where
    F: FnMut(usize, &RgbImage, &ImageDetection) -> PreviewControl,
{
    fn show(
        &mut self,
        frame_index: usize,
        frame: &RgbImage,
        detection: &ImageDetection,
    ) -> PreviewControl {
        self(frame_index, frame, detection)
    }
}

/// First sampled frame in which an individual was recognised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstSighting {
    pub individual_id: IndividualId,
    pub frame_index: usize,
    pub frame_path: PathBuf,
}

/// Aggregate result of a video run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoDetection {
    /// One entry per distinct individual, in order of first sighting
    pub per_individual_first_frame: Vec<FirstSighting>,
    /// Sorted, without duplicates
    pub distinct_object_labels: Vec<String>,
    pub frames_read: usize,
    pub frames_sampled: usize,
    /// The run stopped early through the cancel flag or the preview
    pub cancelled: bool,
}

enum VideoState {
    Reading,
    Detecting { index: usize, frame: RgbImage },
    Aggregating {
        index: usize,
        frame: RgbImage,
        detection: ImageDetection,
    },
    Done,
    Failed(RostroError),
}

impl VideoState {
    fn name(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Detecting { .. } => "detecting",
            Self::Aggregating { .. } => "aggregating",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Default)]
struct Aggregate {
    seen: HashSet<IndividualId>,
    sightings: Vec<FirstSighting>,
    labels: BTreeSet<String>,
    frames_read: usize,
    frames_sampled: usize,
    cancelled: bool,
}

impl Aggregate {
    fn finish(self) -> VideoDetection {
        VideoDetection {
            per_individual_first_frame: self.sightings,
            distinct_object_labels: self.labels.into_iter().collect(),
            frames_read: self.frames_read,
            frames_sampled: self.frames_sampled,
            cancelled: self.cancelled,
        }
    }
}

/// Runs a [`FramePipeline`] over a frame source.
#[derive(Debug, Clone)]
pub struct VideoPipeline {
    frames: FramePipeline,
    options: VideoOptions,
}

impl VideoPipeline {
    pub fn new(frames: FramePipeline, options: VideoOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { frames, options })
    }

    pub fn options(&self) -> &VideoOptions {
        &self.options
    }

    /// Process `source` to the end, or until cancelled.
    ///
    /// The source is released on every exit path. A decode or provider
    /// error aborts the run and discards partial results; cancellation
    /// returns everything aggregated so far.
    #[instrument(level = "info", skip_all, fields(frame_skip = self.options.frame_skip, live = self.options.live))]
    pub fn run<S: FrameSource>(
        &self,
        source: S,
        cancel: &CancelFlag,
        mut preview: Option<&mut dyn FramePreview>,
    ) -> Result<VideoDetection> {
        let mut source = SourceGuard::new(source);
        let mut agg = Aggregate::default();
        let mut state = VideoState::Reading;

        loop {
            state = match state {
                VideoState::Reading => match source.next_frame() {
                    Ok(Some(frame)) => {
                        let index = agg.frames_read;
                        agg.frames_read += 1;
                        if index % self.options.frame_skip != 0 {
                            VideoState::Reading
                        } else if cancel.is_cancelled() {
                            agg.cancelled = true;
                            VideoState::Done
                        } else {
                            VideoState::Detecting { index, frame }
                        }
                    }
                    Ok(None) => VideoState::Done,
                    Err(e) => VideoState::Failed(e),
                },
                VideoState::Detecting { index, frame } => {
                    let frame = downscale(&frame, self.options.downscale);
                    agg.frames_sampled += 1;
                    match self.frames.process_image(&frame) {
                        Ok(detection) => VideoState::Aggregating {
                            index,
                            frame,
                            detection,
                        },
                        Err(e) => VideoState::Failed(e),
                    }
                }
                VideoState::Aggregating {
                    index,
                    frame,
                    detection,
                } => match self.aggregate(&mut agg, index, &frame, &detection) {
                    Err(e) => VideoState::Failed(e),
                    Ok(()) => {
                        let control = match preview.as_deref_mut() {
                            Some(preview) if self.options.live => {
                                preview.show(index, &frame, &detection)
                            }
                            _ => PreviewControl::Continue,
                        };
                        if control == PreviewControl::Stop {
                            agg.cancelled = true;
                            VideoState::Done
                        } else {
                            VideoState::Reading
                        }
                    }
                },
                VideoState::Done => break,
                VideoState::Failed(e) => {
                    source.release();
                    warn!(
                        error = %e,
                        frames_read = agg.frames_read,
                        "Video run failed, partial results discarded"
                    );
                    return Err(e);
                }
            };
            trace!(state = state.name(), "Video state transition");
        }

        source.release();
        info!(
            frames_read = agg.frames_read,
            frames_sampled = agg.frames_sampled,
            individuals = agg.sightings.len(),
            labels = agg.labels.len(),
            cancelled = agg.cancelled,
            "Video run finished"
        );
        Ok(agg.finish())
    }

    fn aggregate(
        &self,
        agg: &mut Aggregate,
        index: usize,
        frame: &RgbImage,
        detection: &ImageDetection,
    ) -> Result<()> {
        agg.labels
            .extend(detection.objects.iter().map(|o| o.label.clone()));

        for individual_id in detection.known_individuals() {
            if agg.seen.contains(individual_id) {
                continue;
            }
            let file_name = format!("{individual_id}_frame_{index}.jpg");
            let frame_path = save_annotated(frame, detection, &self.options.output_dir, &file_name)?;
            debug!(individual_id, frame_index = index, "First sighting captured");

            agg.seen.insert(individual_id.to_string());
            agg.sightings.push(FirstSighting {
                individual_id: individual_id.to_string(),
                frame_index: index,
                frame_path,
            });
        }
        Ok(())
    }
}
