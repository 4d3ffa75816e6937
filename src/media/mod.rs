// Media primitives used by the capture stages
//
// The extractor and the recombiner never touch codecs directly. They work
// against the handles defined here:
// - MediaBackend: probes media and opens the handles below
// - AudioCapture: live capture of a source's audio channel as encoded chunks
// - VideoPlayback / AudioPlayback: real-time decoders feeding the draw loop
// - Recorder: sink that encodes drawn frames plus mixed audio
//
// Every handle implements `Release` so it can be held in a `Session`, which
// releases it on drop regardless of how the owning stage exits.

pub mod commands;
pub mod ffmpeg;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use commands::*;
pub use session::Session;

use crate::config::{ContainerFormat, MediaConfig};
use crate::error::Result;
use crate::model::{MediaDuration, MediaFile, MediaInfo};

/// Sample rate of the mixing graph
pub const MIX_SAMPLE_RATE: u32 = 48_000;

/// Channel count of the mixing graph
pub const MIX_CHANNELS: u32 = 2;

/// One decoded RGBA frame at the source's native resolution
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

/// Interleaved signed 16-bit PCM at the mixing graph's rate and layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<i16>,
}

impl AudioBlock {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / MIX_CHANNELS as f64;
        Duration::from_secs_f64(frames / MIX_SAMPLE_RATE as f64)
    }
}

/// Geometry and limits of a recording
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// The encoded result is trimmed to this length
    pub max_duration: MediaDuration,
    pub format: ContainerFormat,
}

/// Encoded result of a finished recording
#[derive(Debug, Clone)]
pub struct RecordedMedia {
    pub payload: Vec<u8>,
    pub mime_type: String,
    pub duration: MediaDuration,
}

/// Synchronous, idempotent teardown of a media handle
pub trait Release: Send {
    fn release(&mut self);
}

#[async_trait]
pub trait AudioCapture: Release {
    /// Next encoded chunk, or `None` once playback reached its natural end
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// MIME type of the concatenated chunks
    fn mime_type(&self) -> &str;
}

pub trait VideoPlayback: Release {
    /// Current playback position
    fn position(&self) -> Duration;

    /// Latest decoded frame, if one arrived since the previous call
    fn take_frame(&mut self) -> Option<VideoFrame>;
}

pub trait AudioPlayback: Release {
    /// Decoded audio produced since the previous call
    fn drain(&mut self) -> Vec<AudioBlock>;
}

#[async_trait]
pub trait Recorder: Release {
    /// Append one frame of the constant-rate video track
    async fn push_frame(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Append mixed audio
    async fn push_audio(&mut self, block: &AudioBlock) -> Result<()>;

    /// Stop recording and encode everything pushed so far
    async fn finish(&mut self) -> Result<RecordedMedia>;
}

/// Main trait for media capture operations
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Check that the backend's tools are usable
    fn check_availability(&self) -> Result<()>;

    /// Load metadata of a media object
    async fn probe(&self, media: &MediaFile) -> Result<MediaInfo>;

    /// Start playback of `media` while capturing only its audio channel
    async fn capture_audio(&self, media: &MediaFile) -> Result<Box<dyn AudioCapture>>;

    /// Start real-time decoding of a video's frames
    async fn play_video(
        &self,
        video: &MediaFile,
        info: &MediaInfo,
    ) -> Result<Box<dyn VideoPlayback>>;

    /// Start real-time decoding of an audio object into the mixing graph
    async fn play_audio(&self, audio: &MediaFile) -> Result<Box<dyn AudioPlayback>>;

    /// Open a recorder sink
    async fn open_recorder(&self, spec: RecorderSpec) -> Result<Box<dyn Recorder>>;
}

/// Factory for creating media backend instances
pub struct MediaBackendFactory;

impl MediaBackendFactory {
    /// Create the default media backend (FFmpeg-based)
    pub fn create_backend(config: MediaConfig) -> Arc<dyn MediaBackend> {
        Arc::new(ffmpeg::FfmpegBackend::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_block_duration() {
        let block = AudioBlock {
            samples: vec![0; (MIX_SAMPLE_RATE * MIX_CHANNELS) as usize / 2],
        };
        assert_eq!(block.duration(), Duration::from_millis(500));
    }
}
