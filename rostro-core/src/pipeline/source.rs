//! Video frame sources.
//!
//! A source wraps a limited OS resource (a container handle, a directory
//! walk). The video pipeline owns it through a [`SourceGuard`], which
//! releases it exactly once on every exit path.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;
use tracing::debug;

use crate::error::{Result, RostroError};
use crate::imaging::read_image;

/// Sequential frame reader.
pub trait FrameSource {
    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Free the underlying resource. Called once by [`SourceGuard`].
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Owns a [`FrameSource`] and releases it exactly once.
pub struct SourceGuard<S: FrameSource> {
    source: S,
    released: bool,
}

impl<S: FrameSource> SourceGuard<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Ok(None);
        }
        self.source.next_frame()
    }

    /// Release now. Later calls, including the one from `Drop`, are no-ops.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
            debug!("Frame source released");
        }
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// In-memory frames, optionally failing at a given position.
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
    frames: VecDeque<RgbImage>,
    fail_at: Option<usize>,
    position: usize,
    releases: Arc<AtomicUsize>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
            ..Default::default()
        }
    }

    /// Report a decode error instead of returning frame `index`.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Shared counter of `release` calls.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl FrameSource for MemoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.fail_at == Some(self.position) {
            return Err(RostroError::VideoDecode(format!(
                "corrupt frame at position {}",
                self.position
            )));
        }
        self.position += 1;
        Ok(self.frames.pop_front())
    }

    fn release(&mut self) {
        self.frames.clear();
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Directory of still images played back in file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    /// List the image files in `dir`. Fails with `VideoDecode` when the
    /// directory cannot be read.
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)
            .map_err(|e| RostroError::VideoDecode(format!("{}: {e}", dir.display())))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
            .collect();
        frames.sort();

        debug!(dir = %dir.display(), frames = frames.len(), "Image sequence opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            pending: frames.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        read_image(&path).map(Some).map_err(|e| {
            RostroError::VideoDecode(format!("{} ({}): {e}", self.dir.display(), path.display()))
        })
    }

    fn release(&mut self) {
        self.pending.clear();
    }
}

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg_source::FfmpegFrameSource;

#[cfg(feature = "ffmpeg")]
mod ffmpeg_source {
    use std::collections::VecDeque;
    use std::path::Path;

    use ffmpeg_next as ffmpeg;
    use ffmpeg_next::{codec, decoder, format, frame, media, software::scaling};
    use image::RgbImage;
    use tracing::info;

    use super::FrameSource;
    use crate::error::{Result, RostroError};

    fn decode_err(context: &str, e: impl std::fmt::Display) -> RostroError {
        RostroError::VideoDecode(format!("{context}: {e}"))
    }

    /// Container decoding through FFmpeg, converted to RGB24.
    pub struct FfmpegFrameSource {
        input: Option<format::context::Input>,
        decoder: decoder::Video,
        scaler: scaling::Context,
        stream_index: usize,
        width: u32,
        height: u32,
        ready: VecDeque<RgbImage>,
        eof: bool,
    }

    impl FfmpegFrameSource {
        pub fn open(path: &Path) -> Result<Self> {
            ffmpeg::init().map_err(|e| decode_err("failed to initialise FFmpeg", e))?;

            let input = format::input(&path).map_err(|e| decode_err("could not open input", e))?;
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| RostroError::VideoDecode("no video stream found".into()))?;
            let stream_index = stream.index();

            let context = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| decode_err("failed to build decoder context", e))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| decode_err("failed to open video decoder", e))?;

            let (width, height) = (decoder.width(), decoder.height());
            let scaler = scaling::Context::get(
                decoder.format(),
                width,
                height,
                format::Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| decode_err("failed to create RGB scaler", e))?;

            info!(width, height, path = %path.display(), "Opened video stream");
            Ok(Self {
                input: Some(input),
                decoder,
                scaler,
                stream_index,
                width,
                height,
                ready: VecDeque::new(),
                eof: false,
            })
        }

        fn drain_decoder(&mut self) -> Result<()> {
            let mut decoded = frame::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| decode_err("RGB conversion failed", e))?;

                // Strip stride padding
                let stride = rgb.stride(0);
                let row_len = self.width as usize * 3;
                let raw = rgb.data(0);
                let mut data = Vec::with_capacity(row_len * self.height as usize);
                for row in 0..self.height as usize {
                    let start = row * stride;
                    data.extend_from_slice(&raw[start..start + row_len]);
                }

                let image = RgbImage::from_raw(self.width, self.height, data)
                    .ok_or_else(|| RostroError::VideoDecode("frame buffer size mismatch".into()))?;
                self.ready.push_back(image);
            }
            Ok(())
        }
    }

    impl FrameSource for FfmpegFrameSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            loop {
                if let Some(image) = self.ready.pop_front() {
                    return Ok(Some(image));
                }
                if self.eof {
                    return Ok(None);
                }
                let Some(input) = self.input.as_mut() else {
                    return Ok(None);
                };

                let next = input
                    .packets()
                    .next()
                    .map(|(stream, packet)| (stream.index(), packet));
                match next {
                    Some((index, packet)) if index == self.stream_index => {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(|e| decode_err("decoder rejected packet", e))?;
                        self.drain_decoder()?;
                    }
                    Some(_) => {}
                    None => {
                        self.eof = true;
                        self.decoder.send_eof().ok();
                        self.drain_decoder()?;
                    }
                }
            }
        }

        fn release(&mut self) {
            self.input = None;
            self.ready.clear();
            self.eof = true;
        }
    }
}
