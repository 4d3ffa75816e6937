// In-memory media backend driven by the tokio clock.
//
// Tests run with paused time, so playback positions, capture chunks and
// recorder lengths are deterministic functions of virtual elapsed time.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

use crate::config::ContainerFormat;
use crate::error::{DubError, Result};
use crate::model::{MediaDuration, MediaFile, MediaInfo, MediaKind};
use super::{
    AudioBlock, AudioCapture, AudioPlayback, MIX_CHANNELS, MIX_SAMPLE_RATE, MediaBackend,
    RecordedMedia, Recorder, RecorderSpec, Release, VideoFrame, VideoPlayback,
};

const CHUNK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
pub(crate) struct FakeStats {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub probes: AtomicUsize,
}

impl FakeStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeMediaBackend {
    pub video_duration: f64,
    pub audio_duration: f64,
    pub has_audio: bool,
    pub dimensions: Option<(u32, u32)>,
    /// Metadata never loads
    pub probe_hangs: bool,
    /// Capture reports its natural end once the source duration elapsed
    pub end_of_media: bool,
    /// Video position freezes here instead of reaching the end
    pub video_stalls_at: Option<f64>,
    /// Capture ends immediately without producing data
    pub silent_capture: bool,
    /// Capture reports a device fault after its first chunk
    pub capture_fails: bool,
    pub recorder_fails: bool,
    /// Finalising the recording never completes
    pub finish_hangs: bool,
    pub available: bool,
    pub stats: Arc<FakeStats>,
}

impl FakeMediaBackend {
    pub fn new(video_duration: f64, audio_duration: f64) -> Self {
        Self {
            video_duration,
            audio_duration,
            has_audio: true,
            dimensions: Some((4, 4)),
            probe_hangs: false,
            end_of_media: true,
            video_stalls_at: None,
            silent_capture: false,
            capture_fails: false,
            recorder_fails: false,
            finish_hangs: false,
            available: true,
            stats: Arc::new(FakeStats::default()),
        }
    }
}

/// Counts one open and at most one release against the shared stats
struct Tracked {
    stats: Arc<FakeStats>,
    released: bool,
}

impl Tracked {
    fn open(stats: &Arc<FakeStats>) -> Self {
        stats.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            stats: Arc::clone(stats),
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaBackend for FakeMediaBackend {
    fn check_availability(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(DubError::Config("ffmpeg not found".to_string()))
        }
    }

    async fn probe(&self, media: &MediaFile) -> Result<MediaInfo> {
        self.stats.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_hangs {
            return std::future::pending().await;
        }

        let info = match media.kind() {
            MediaKind::Video => MediaInfo {
                duration: MediaDuration::new(self.video_duration).unwrap_or_default(),
                dimensions: self.dimensions,
                frame_rate: Some(30.0),
                has_audio: self.has_audio,
            },
            MediaKind::Audio => MediaInfo {
                duration: MediaDuration::new(self.audio_duration).unwrap_or_default(),
                dimensions: None,
                frame_rate: None,
                has_audio: true,
            },
        };
        Ok(info)
    }

    async fn capture_audio(&self, _media: &MediaFile) -> Result<Box<dyn AudioCapture>> {
        Ok(Box::new(FakeCapture {
            started: Instant::now(),
            duration: Duration::from_secs_f64(self.video_duration),
            end_of_media: self.end_of_media,
            silent: self.silent_capture,
            fails: self.capture_fails,
            emitted: 0,
            tracked: Tracked::open(&self.stats),
        }))
    }

    async fn play_video(
        &self,
        _video: &MediaFile,
        info: &MediaInfo,
    ) -> Result<Box<dyn VideoPlayback>> {
        let (width, height) = info.dimensions.unwrap_or((4, 4));
        let end = self.video_stalls_at.unwrap_or(self.video_duration);
        Ok(Box::new(FakeVideoPlayback {
            started: Instant::now(),
            end: Duration::from_secs_f64(end),
            last_position: None,
            frame: VideoFrame {
                width,
                height,
                data: Arc::from(vec![0u8; (width * height * 4) as usize]),
            },
            tracked: Tracked::open(&self.stats),
        }))
    }

    async fn play_audio(&self, _audio: &MediaFile) -> Result<Box<dyn AudioPlayback>> {
        Ok(Box::new(FakeAudioPlayback {
            started: Instant::now(),
            duration: Duration::from_secs_f64(self.audio_duration),
            emitted_frames: 0,
            tracked: Tracked::open(&self.stats),
        }))
    }

    async fn open_recorder(&self, spec: RecorderSpec) -> Result<Box<dyn Recorder>> {
        Ok(Box::new(FakeRecorder {
            spec,
            frames: 0,
            samples: 0,
            fails: self.recorder_fails,
            hangs: self.finish_hangs,
            tracked: Tracked::open(&self.stats),
        }))
    }
}

struct FakeCapture {
    started: Instant,
    duration: Duration,
    end_of_media: bool,
    silent: bool,
    fails: bool,
    emitted: u32,
    tracked: Tracked,
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.silent {
            return Ok(None);
        }
        if self.fails && self.emitted > 0 {
            return Err(DubError::Media("capture device fault".to_string()));
        }

        let end = self.started + self.duration;
        if Instant::now() >= end {
            if self.end_of_media {
                return Ok(None);
            }
            return std::future::pending().await;
        }

        let next = (self.started + CHUNK_INTERVAL * (self.emitted + 1)).min(end);
        sleep_until(next).await;
        self.emitted += 1;
        Ok(Some(vec![0xA5; 1024]))
    }

    fn mime_type(&self) -> &str {
        "audio/webm"
    }
}

impl Release for FakeCapture {
    fn release(&mut self) {
        self.tracked.release();
    }
}

struct FakeVideoPlayback {
    started: Instant,
    end: Duration,
    last_position: Option<Duration>,
    frame: VideoFrame,
    tracked: Tracked,
}

impl VideoPlayback for FakeVideoPlayback {
    fn position(&self) -> Duration {
        self.started.elapsed().min(self.end)
    }

    fn take_frame(&mut self) -> Option<VideoFrame> {
        let position = self.position();
        if self.last_position == Some(position) {
            return None;
        }
        self.last_position = Some(position);
        Some(self.frame.clone())
    }
}

impl Release for FakeVideoPlayback {
    fn release(&mut self) {
        self.tracked.release();
    }
}

struct FakeAudioPlayback {
    started: Instant,
    duration: Duration,
    emitted_frames: u64,
    tracked: Tracked,
}

impl AudioPlayback for FakeAudioPlayback {
    fn drain(&mut self) -> Vec<AudioBlock> {
        let played = self.started.elapsed().min(self.duration);
        let due = (played.as_secs_f64() * MIX_SAMPLE_RATE as f64).floor() as u64;
        if due <= self.emitted_frames {
            return Vec::new();
        }

        let frames = due - self.emitted_frames;
        self.emitted_frames = due;
        vec![AudioBlock {
            samples: vec![0; (frames * MIX_CHANNELS as u64) as usize],
        }]
    }
}

impl Release for FakeAudioPlayback {
    fn release(&mut self) {
        self.tracked.release();
    }
}

struct FakeRecorder {
    spec: RecorderSpec,
    frames: u64,
    samples: u64,
    fails: bool,
    hangs: bool,
    tracked: Tracked,
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn push_frame(&mut self, _frame: &VideoFrame) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    async fn push_audio(&mut self, block: &AudioBlock) -> Result<()> {
        self.samples += block.samples.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<RecordedMedia> {
        if self.fails {
            return Err(DubError::Media("encoder crashed".to_string()));
        }
        if self.hangs {
            return std::future::pending().await;
        }

        let duration = MediaDuration::new(self.frames as f64 / self.spec.fps as f64)
            .unwrap_or_default()
            .min(self.spec.max_duration);

        Ok(RecordedMedia {
            payload: format!("{} frames, {} samples", self.frames, self.samples).into_bytes(),
            mime_type: ContainerFormat::Webm.mime_type().to_string(),
            duration,
        })
    }
}

impl Release for FakeRecorder {
    fn release(&mut self) {
        self.tracked.release();
    }
}

pub(crate) fn video_file() -> MediaFile {
    MediaFile::new("clip.mp4", MediaKind::Video, "video/mp4", vec![1; 64])
}

pub(crate) fn audio_file() -> MediaFile {
    MediaFile::new("speech.mp3", MediaKind::Audio, "audio/mpeg", vec![2; 64])
}
