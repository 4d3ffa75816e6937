use async_trait::async_trait;
use serde::Deserialize;
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::error::{DubError, Result};
use crate::model::{MediaDuration, MediaFile, MediaInfo};
use super::{
    AudioBlock, AudioCapture, AudioPlayback, MIX_CHANNELS, MIX_SAMPLE_RATE, MediaBackend,
    MediaCommandBuilder, RecordedMedia, Recorder, RecorderSpec, Release, VideoFrame, VideoPlayback,
};

/// Bytes read per capture chunk
const CAPTURE_CHUNK_BYTES: usize = 64 * 1024;

/// 10 ms of mixing graph audio
const PCM_BLOCK_BYTES: usize = (MIX_SAMPLE_RATE / 100 * MIX_CHANNELS * 2) as usize;

/// Frames buffered between the draw loop and the encoder
const FRAME_QUEUE: usize = 8;

/// Media backend driving ffmpeg and ffprobe subprocesses
pub struct FfmpegBackend {
    config: MediaConfig,
    commands: Arc<MediaCommandBuilder>,
}

impl FfmpegBackend {
    pub fn new(config: MediaConfig) -> Self {
        let commands = Arc::new(MediaCommandBuilder::new(
            &config.ffmpeg_path,
            &config.ffprobe_path,
        ));
        Self { config, commands }
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    fn check_availability(&self) -> Result<()> {
        for binary in [&self.config.ffmpeg_path, &self.config.ffprobe_path] {
            let output = StdCommand::new(binary)
                .arg("-version")
                .output()
                .map_err(|e| DubError::Config(format!("{} not found: {}", binary, e)))?;

            if !output.status.success() {
                return Err(DubError::Config(format!("{} version check failed", binary)));
            }
        }

        info!("Media backend is available");
        Ok(())
    }

    async fn probe(&self, media: &MediaFile) -> Result<MediaInfo> {
        let source = spool(media).await?;
        let stdout = self.commands.probe(source.path()).execute().await?;
        let info = parse_probe_output(&stdout)?;

        debug!("Probed {}: {:?}", media.name(), info);
        Ok(info)
    }

    async fn capture_audio(&self, media: &MediaFile) -> Result<Box<dyn AudioCapture>> {
        let source = spool(media).await?;
        let mut child = self
            .commands
            .capture_audio(source.path(), self.config.realtime_capture)
            .spawn(false)?;
        let stdout = take_stdout(&mut child)?;

        Ok(Box::new(FfmpegAudioCapture {
            child,
            stdout,
            _source: source,
            buffer: vec![0; CAPTURE_CHUNK_BYTES],
            finished: false,
        }))
    }

    async fn play_video(
        &self,
        video: &MediaFile,
        info: &MediaInfo,
    ) -> Result<Box<dyn VideoPlayback>> {
        let (width, height) = info
            .dimensions
            .ok_or_else(|| DubError::Media(format!("{} has no video track", video.name())))?;
        let fps = info.frame_rate.filter(|r| *r > 0.0).unwrap_or(30.0);

        let source = spool(video).await?;
        let mut child = self
            .commands
            .decode_frames(source.path())
            .spawn(false)?;
        let mut stdout = take_stdout(&mut child)?;

        let (sender, frames) = watch::channel(None);
        let decoded = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&decoded);
        let frame_bytes = width as usize * height as usize * 4;

        let reader = tokio::spawn(async move {
            let _source = source;
            loop {
                let mut data = vec![0u8; frame_bytes];
                if stdout.read_exact(&mut data).await.is_err() {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                sender.send_replace(Some(VideoFrame {
                    width,
                    height,
                    data: Arc::from(data),
                }));
            }
            if let Err(e) = child.wait().await {
                warn!("Video decoder did not exit cleanly: {}", e);
            }
        });

        Ok(Box::new(FfmpegVideoPlayback {
            frames,
            decoded,
            fps,
            reader,
        }))
    }

    async fn play_audio(&self, audio: &MediaFile) -> Result<Box<dyn AudioPlayback>> {
        let source = spool(audio).await?;
        let mut child = self
            .commands
            .decode_audio(source.path())
            .spawn(false)?;
        let mut stdout = take_stdout(&mut child)?;

        let (sender, blocks) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let _source = source;
            let mut data = vec![0u8; PCM_BLOCK_BYTES];
            while stdout.read_exact(&mut data).await.is_ok() {
                let samples = data
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                if sender.send(AudioBlock { samples }).is_err() {
                    break;
                }
            }
            if let Err(e) = child.wait().await {
                warn!("Audio decoder did not exit cleanly: {}", e);
            }
        });

        Ok(Box::new(FfmpegAudioPlayback { blocks, reader }))
    }

    async fn open_recorder(&self, spec: RecorderSpec) -> Result<Box<dyn Recorder>> {
        let workdir = tempfile::Builder::new().prefix("redub-rec-").tempdir()?;
        let video_path = workdir.path().join(format!("frames.{}", spec.format.muxer()));
        let pcm_path = workdir.path().join("audio.pcm");

        let mut encoder = self
            .commands
            .encode_frames(spec.width, spec.height, spec.fps, spec.format, &video_path)
            .spawn(true)?;
        let stdin = encoder
            .stdin
            .take()
            .ok_or_else(|| DubError::Media("Frame encoder has no stdin".to_string()))?;
        let pcm = fs::File::create(&pcm_path).await?;

        let (frames, queue) = mpsc::channel(FRAME_QUEUE);
        let written = Arc::new(AtomicU64::new(0));
        let writer = tokio::spawn(write_frames(queue, stdin, Arc::clone(&written)));

        info!(
            "Recording {}x{} at {} fps (max {})",
            spec.width, spec.height, spec.fps, spec.max_duration
        );

        Ok(Box::new(FfmpegRecorder {
            commands: Arc::clone(&self.commands),
            spec,
            workdir,
            encoder: Some(encoder),
            frames: Some(frames),
            writer: Some(writer),
            written,
            pcm: Some(pcm),
            samples: 0,
            finished: false,
        }))
    }
}

/// Feed queued frames to the encoder so a slow encoder does not hold up the draw loop
async fn write_frames(
    mut queue: mpsc::Receiver<VideoFrame>,
    mut stdin: ChildStdin,
    written: Arc<AtomicU64>,
) -> std::io::Result<()> {
    while let Some(frame) = queue.recv().await {
        stdin.write_all(&frame.data).await?;
        written.fetch_add(1, Ordering::SeqCst);
    }
    stdin.shutdown().await
}

/// Write a payload to a scratch file the subprocesses can read
async fn spool(media: &MediaFile) -> Result<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("redub-")
        .suffix(&format!(".{}", media.extension()))
        .tempfile()?;
    fs::write(file.path(), media.bytes()).await?;
    Ok(file)
}

fn take_stdout(child: &mut Child) -> Result<ChildStdout> {
    child
        .stdout
        .take()
        .ok_or_else(|| DubError::Media("Media processor has no stdout".to_string()))
}

async fn collect_stderr(child: &mut Child) -> String {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr).await;
    }
    stderr.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| DubError::Media(format!("Failed to parse probe output: {}", e)))?;

    let stream_duration = probe
        .streams
        .iter()
        .filter_map(|s| s.duration.as_deref())
        .filter_map(|d| d.parse::<f64>().ok())
        .fold(None, |max: Option<f64>, d| Some(max.map_or(d, |m| m.max(d))));

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .or(stream_duration)
        .and_then(MediaDuration::new)
        .ok_or_else(|| DubError::Media("Media duration is unavailable".to_string()))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let dimensions = video.and_then(|s| match (s.width, s.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    });

    Ok(MediaInfo {
        duration,
        dimensions,
        frame_rate: video
            .and_then(|s| s.avg_frame_rate.as_deref())
            .and_then(parse_frame_rate),
        has_audio: probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

/// Parse an ffprobe rational such as `30000/1001`
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

struct FfmpegAudioCapture {
    child: Child,
    stdout: ChildStdout,
    _source: NamedTempFile,
    buffer: Vec<u8>,
    finished: bool,
}

#[async_trait]
impl AudioCapture for FfmpegAudioCapture {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }

        let read = self.stdout.read(&mut self.buffer).await?;
        if read > 0 {
            return Ok(Some(self.buffer[..read].to_vec()));
        }

        self.finished = true;
        let status = self.child.wait().await?;
        if !status.success() {
            let stderr = collect_stderr(&mut self.child).await;
            return Err(DubError::Media(format!("Audio capture failed: {}", stderr)));
        }
        Ok(None)
    }

    fn mime_type(&self) -> &str {
        "audio/webm"
    }
}

impl Release for FfmpegAudioCapture {
    fn release(&mut self) {
        self.finished = true;
        if let Err(e) = self.child.start_kill() {
            debug!("Audio capture already stopped: {}", e);
        }
    }
}

struct FfmpegVideoPlayback {
    frames: watch::Receiver<Option<VideoFrame>>,
    decoded: Arc<AtomicU64>,
    fps: f64,
    reader: JoinHandle<()>,
}

impl VideoPlayback for FfmpegVideoPlayback {
    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.decoded.load(Ordering::SeqCst) as f64 / self.fps)
    }

    fn take_frame(&mut self) -> Option<VideoFrame> {
        match self.frames.has_changed() {
            Ok(true) => self.frames.borrow_and_update().clone(),
            _ => None,
        }
    }
}

impl Release for FfmpegVideoPlayback {
    fn release(&mut self) {
        self.reader.abort();
    }
}

struct FfmpegAudioPlayback {
    blocks: mpsc::UnboundedReceiver<AudioBlock>,
    reader: JoinHandle<()>,
}

impl AudioPlayback for FfmpegAudioPlayback {
    fn drain(&mut self) -> Vec<AudioBlock> {
        let mut drained = Vec::new();
        while let Ok(block) = self.blocks.try_recv() {
            drained.push(block);
        }
        drained
    }
}

impl Release for FfmpegAudioPlayback {
    fn release(&mut self) {
        self.reader.abort();
    }
}

struct FfmpegRecorder {
    commands: Arc<MediaCommandBuilder>,
    spec: RecorderSpec,
    workdir: TempDir,
    encoder: Option<Child>,
    frames: Option<mpsc::Sender<VideoFrame>>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    written: Arc<AtomicU64>,
    pcm: Option<fs::File>,
    samples: u64,
    finished: bool,
}

/// Length of a recording: the video frames that reached the encoder, capped
/// at the recording limit. Audio past the last frame is trimmed by the mux.
fn recorded_duration(frames: u64, fps: u32, max_duration: MediaDuration) -> MediaDuration {
    MediaDuration::new(frames as f64 / fps.max(1) as f64)
        .unwrap_or_default()
        .min(max_duration)
}

impl FfmpegRecorder {
    /// Wait for every queued frame to reach the encoder, then for the encoder to exit
    async fn close_video(&mut self) -> Result<()> {
        drop(self.frames.take());
        if let Some(writer) = self.writer.take() {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Frame writer stopped early: {}", e),
                Err(e) => warn!("Frame writer task failed: {}", e),
            }
        }

        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| DubError::Media("Frame encoder is gone".to_string()))?;
        let status = encoder.wait().await?;
        if !status.success() {
            let stderr = collect_stderr(&mut encoder).await;
            return Err(DubError::Media(format!("Frame encoding failed: {}", stderr)));
        }
        Ok(())
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    async fn push_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if (frame.width, frame.height) != (self.spec.width, self.spec.height) {
            return Err(DubError::Media(format!(
                "Frame size {}x{} does not match recording size {}x{}",
                frame.width, frame.height, self.spec.width, self.spec.height
            )));
        }

        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| DubError::Media("Recorder is not recording".to_string()))?;
        frames
            .send(frame.clone())
            .await
            .map_err(|_| DubError::Media("Frame encoder stopped accepting frames".to_string()))
    }

    async fn push_audio(&mut self, block: &AudioBlock) -> Result<()> {
        let pcm = self
            .pcm
            .as_mut()
            .ok_or_else(|| DubError::Media("Recorder is not recording".to_string()))?;

        let bytes: Vec<u8> = block.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        pcm.write_all(&bytes).await?;
        self.samples += block.samples.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<RecordedMedia> {
        if self.finished {
            return Err(DubError::Media("Recorder already finished".to_string()));
        }
        self.finished = true;

        self.close_video().await?;
        if let Some(mut pcm) = self.pcm.take() {
            pcm.flush().await?;
        }

        let frames = self.written.load(Ordering::SeqCst);
        if frames == 0 {
            return Err(DubError::Media("No video frames were recorded".to_string()));
        }

        let duration = recorded_duration(frames, self.spec.fps, self.spec.max_duration);
        let format = self.spec.format;
        let video_path = self.workdir.path().join(format!("frames.{}", format.muxer()));
        let pcm_path = self.workdir.path().join("audio.pcm");
        let output_path = self.workdir.path().join(format!("output.{}", format.muxer()));

        self.commands
            .mux_recording(
                &video_path,
                (self.samples > 0).then_some(&pcm_path),
                format.audio_codec(),
                format.muxer(),
                duration.seconds(),
                &output_path,
            )
            .execute()
            .await?;

        let payload = fs::read(&output_path).await?;
        info!(
            "Recorded {} frames and {} audio samples ({} bytes, {})",
            frames,
            self.samples,
            payload.len(),
            duration
        );

        Ok(RecordedMedia {
            payload,
            mime_type: format.mime_type().to_string(),
            duration,
        })
    }
}

impl Release for FfmpegRecorder {
    fn release(&mut self) {
        self.finished = true;
        drop(self.frames.take());
        drop(self.pcm.take());
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(mut encoder) = self.encoder.take() {
            if let Err(e) = encoder.start_kill() {
                debug!("Frame encoder already stopped: {}", e);
            }
        }
    }
}
