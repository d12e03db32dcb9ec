//! Assembles the rotation's frames into a looping GIF.
//!
//! Encoding runs on a blocking thread; frames are handed over one at a time through a
//! small channel, so the capture loop never holds more than a couple of frames in memory.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, ImageFormat};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::capture::Frame;
use crate::config::AnimationConfig;

const FRAME_CHANNEL_CAPACITY: usize = 2;

#[derive(Error, Debug)]
pub enum AnimationError {
    #[error("Could not create animation file {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not decode frame {step}: {source}")]
    Decode {
        step: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("Could not encode animation: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Animation encoder stopped unexpectedly.")]
    EncoderStopped,
}


#[derive(Clone, Debug)]
pub struct GifAssembler {
    width: u32,
    height: u32,
    frame_delay: Duration,
    quality: i32,
}

impl GifAssembler {
    pub fn new(config: &AnimationConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            frame_delay: config.frame_delay,
            quality: config.quality,
        }
    }

    /// Opens a sink that writes the animation to `path` as frames arrive.
    ///
    /// The file is created on the encoder thread; a failure to create it surfaces
    /// from the next `add_frame` or from `finish`.
    pub fn open(&self, path: &Path) -> AnimationSink {
        let (frame_sender, frame_receiver) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let assembler = self.clone();
        let path = path.to_path_buf();

        let encoder_handle =
            tokio::task::spawn_blocking(move || assembler.encode_frames(&path, frame_receiver));

        AnimationSink {
            frame_sender: Some(frame_sender),
            encoder_handle: Some(encoder_handle),
        }
    }

    fn encode_frames(
        &self,
        path: &Path,
        mut frame_receiver: mpsc::Receiver<Frame>,
    ) -> Result<usize, AnimationError> {
        let file = File::create(path).map_err(|source| AnimationError::Create {
            path: path.to_path_buf(),
            source,
        })?;

        let mut encoder = GifEncoder::new_with_speed(BufWriter::new(file), self.quality);
        encoder.set_repeat(Repeat::Infinite)?;

        let delay = Delay::from_saturating_duration(self.frame_delay);
        let mut encoded_frames = 0;

        while let Some(frame) = frame_receiver.blocking_recv() {
            let decoded = image::load_from_memory_with_format(&frame.png, ImageFormat::Png)
                .map_err(|source| AnimationError::Decode {
                    step: frame.step,
                    source,
                })?;

            let mut pixels = decoded.to_rgba8();
            if pixels.dimensions() != (self.width, self.height) {
                pixels = image::imageops::resize(&pixels, self.width, self.height, FilterType::Triangle);
            }

            encoder.encode_frame(image::Frame::from_parts(pixels, 0, 0, delay))?;
            encoded_frames += 1;
        }

        // Dropping the encoder writes the GIF trailer and flushes the file.
        drop(encoder);

        debug!(encoded_frames, "Animation encoder finished.");
        Ok(encoded_frames)
    }
}


/// Accepts frames in call order. Must be finished (or aborted) once the rotation ends.
pub struct AnimationSink {
    frame_sender: Option<mpsc::Sender<Frame>>,
    encoder_handle: Option<JoinHandle<Result<usize, AnimationError>>>,
}

impl AnimationSink {
    pub async fn add_frame(&mut self, frame: Frame) -> Result<(), AnimationError> {
        let sender = self
            .frame_sender
            .as_ref()
            .ok_or(AnimationError::EncoderStopped)?;

        if sender.send(frame).await.is_ok() {
            return Ok(());
        }

        // The encoder hung up early, which only happens when it failed.
        self.frame_sender = None;
        match self.wait_for_encoder().await {
            Err(error) => Err(error),
            Ok(_) => Err(AnimationError::EncoderStopped),
        }
    }

    /// Closes the animation and returns the number of frames written.
    pub async fn finish(mut self) -> Result<usize, AnimationError> {
        self.frame_sender = None;
        self.wait_for_encoder().await
    }

    /// Stops encoding without caring about the (partial) result.
    pub async fn abort(mut self) {
        self.frame_sender = None;
        let _ = self.wait_for_encoder().await;
    }

    async fn wait_for_encoder(&mut self) -> Result<usize, AnimationError> {
        let handle = self
            .encoder_handle
            .take()
            .ok_or(AnimationError::EncoderStopped)?;

        handle
            .await
            .map_err(|_| AnimationError::EncoderStopped)?
    }
}
