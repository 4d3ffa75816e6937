//! Replays the original frames with the synthesized speech and records the result.

use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{ContainerFormat, MediaConfig};
use crate::error::{DubError, Result};
use crate::media::{
    AudioPlayback, MediaBackend, Recorder, RecorderSpec, Session, VideoFrame, VideoPlayback,
};
use crate::model::{MediaDuration, MediaFile, MediaInfo, SynthesizedAudio};
use crate::progress::PipelineStage;
use crate::timing::{CancelToken, TimeoutPolicy};

/// Encoded output of a recombination
#[derive(Debug, Clone)]
pub struct RecombinedMedia {
    pub payload: Vec<u8>,
    pub mime_type: String,
    pub duration: MediaDuration,
}

pub struct Recombiner {
    backend: Arc<dyn MediaBackend>,
    timeouts: TimeoutPolicy,
    fps: u32,
    format: ContainerFormat,
}

impl Recombiner {
    pub fn new(backend: Arc<dyn MediaBackend>, config: &MediaConfig) -> Self {
        Self {
            backend,
            timeouts: config.timeouts(),
            fps: config.capture_fps.max(1),
            format: config.output_format,
        }
    }

    /// Record the video's frames together with `speech` into one container.
    ///
    /// The recording is `duration` long at most: speech that runs longer is
    /// cut off, shorter speech leaves trailing silence.
    pub async fn recombine(
        &self,
        video: &MediaFile,
        speech: &SynthesizedAudio,
        duration: MediaDuration,
        cancel: &CancelToken,
    ) -> Result<RecombinedMedia> {
        let (video_info, audio_info) =
            tokio::try_join!(self.load_metadata(video), self.load_metadata(&speech.audio))?;

        let (width, height) = video_info.dimensions.ok_or_else(|| {
            DubError::Recombination(format!("{} has no video track", video.name()))
        })?;

        info!(
            "Recombining {}x{} video ({}) with {} of {} speech",
            width, height, duration, audio_info.duration, speech.voice
        );

        let spec = RecorderSpec {
            width,
            height,
            fps: self.fps,
            max_duration: duration,
            format: self.format,
        };

        let mut recorder = Session::new(
            "recorder",
            self.backend.open_recorder(spec).await.map_err(stage_error)?,
        );
        let mut video_playback = Session::new(
            "video playback",
            self.backend.play_video(video, &video_info).await.map_err(stage_error)?,
        );
        let mut audio_playback = Session::new(
            "audio playback",
            self.backend.play_audio(&speech.audio).await.map_err(stage_error)?,
        );

        let limit = self.timeouts.recombination_limit(duration);
        let drawing = self.draw(
            &mut *video_playback,
            &mut *audio_playback,
            &mut *recorder,
            duration,
        );

        tokio::select! {
            result = drawing => result.map_err(stage_error)?,
            _ = sleep(limit) => {
                warn!("Video end not reached, stopping recording after {:?}", limit);
            }
            _ = cancel.cancelled() => {
                return Err(DubError::cancelled(PipelineStage::Recombining));
            }
        }

        let finalize = self.timeouts.finalize_timeout;
        let recorded = timeout(finalize, recorder.finish())
            .await
            .map_err(|_| {
                DubError::Recombination(format!(
                    "Finalising the recording took over {:?}",
                    finalize
                ))
            })?
            .map_err(stage_error)?;
        info!("Recombined output: {} bytes, {}", recorded.payload.len(), recorded.duration);

        Ok(RecombinedMedia {
            payload: recorded.payload,
            mime_type: recorded.mime_type,
            duration: recorded.duration,
        })
    }

    async fn load_metadata(&self, media: &MediaFile) -> Result<MediaInfo> {
        timeout(self.timeouts.metadata_timeout, self.backend.probe(media))
            .await
            .map_err(|_| {
                DubError::Recombination(format!("Timed out loading metadata of {}", media.name()))
            })?
            .map_err(stage_error)
    }

    /// Frame-draw loop followed by the audio settle period
    async fn draw(
        &self,
        video: &mut dyn VideoPlayback,
        audio: &mut dyn AudioPlayback,
        recorder: &mut dyn Recorder,
        duration: MediaDuration,
    ) -> Result<()> {
        let end = duration.as_duration();
        let fps = self.fps as f64;
        let mut ticker = interval(self.timeouts.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut surface: Option<VideoFrame> = None;
        let mut frames_written: u64 = 0;

        loop {
            ticker.tick().await;
            if video.position() >= end {
                break;
            }

            if let Some(frame) = video.take_frame() {
                surface = Some(frame);
            }

            // The recorder samples the surface at a constant rate
            if let Some(frame) = &surface {
                let due = (started.elapsed().as_secs_f64() * fps).floor() as u64 + 1;
                while frames_written < due {
                    recorder.push_frame(frame).await?;
                    frames_written += 1;
                }
            }

            pump_audio(audio, recorder).await?;
        }

        debug!("Video reached {:?} after {} frames, settling audio", end, frames_written);

        let settled = Instant::now() + self.timeouts.settle;
        while Instant::now() < settled {
            ticker.tick().await;
            pump_audio(audio, recorder).await?;
        }
        Ok(())
    }
}

async fn pump_audio(audio: &mut dyn AudioPlayback, recorder: &mut dyn Recorder) -> Result<()> {
    for block in audio.drain() {
        recorder.push_audio(&block).await?;
    }
    Ok(())
}

fn stage_error(error: DubError) -> DubError {
    error.at_stage(PipelineStage::Recombining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::media::testing::{FakeMediaBackend, audio_file, video_file};
    use crate::model::{AudioFormat, VoiceId};
    use std::time::Duration;

    fn recombiner(backend: &FakeMediaBackend) -> Recombiner {
        Recombiner::new(Arc::new(backend.clone()), &Config::default().media)
    }

    fn speech() -> SynthesizedAudio {
        SynthesizedAudio {
            audio: audio_file(),
            voice: VoiceId::new("alloy"),
            format: AudioFormat::Mp3,
        }
    }

    fn seconds(value: f64) -> MediaDuration {
        MediaDuration::new(value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_speech_keeps_output_within_bounds() {
        let backend = FakeMediaBackend::new(10.0, 8.0);

        let output = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(10.0), &CancelToken::new())
            .await
            .unwrap();

        let recorded = output.duration.seconds();
        assert!((8.0..=10.0).contains(&recorded), "recorded {}", recorded);
        assert_eq!(output.mime_type, "video/webm");
        assert_eq!(backend.stats.opened(), 3);
        assert_eq!(backend.stats.released(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_speech_is_truncated() {
        let backend = FakeMediaBackend::new(4.0, 9.0);

        let output = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(4.0), &CancelToken::new())
            .await
            .unwrap();

        assert!(output.duration.seconds() <= 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_video_stops_at_fallback() {
        let mut backend = FakeMediaBackend::new(6.0, 5.0);
        backend.video_stalls_at = Some(3.0);
        let started = Instant::now();

        let output = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(6.0), &CancelToken::new())
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8), "stopped early: {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(8_100), "stopped late: {:?}", elapsed);
        assert!(output.duration.seconds() <= 6.0);
        assert_eq!(backend.stats.released(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_without_frames_is_rejected() {
        let mut backend = FakeMediaBackend::new(3.0, 3.0);
        backend.dimensions = None;

        let err = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(3.0), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DubError::Recombination(_)));
        assert_eq!(backend.stats.opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorder_fault_is_a_stage_error() {
        let mut backend = FakeMediaBackend::new(2.0, 2.0);
        backend.recorder_fails = true;

        let err = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(2.0), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DubError::Recombination(ref msg) if msg.contains("encoder crashed")));
        assert_eq!(backend.stats.released(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalising_is_bounded() {
        let mut backend = FakeMediaBackend::new(2.0, 2.0);
        backend.finish_hangs = true;
        let started = Instant::now();

        let err = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(2.0), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DubError::Recombination(ref msg) if msg.starts_with("Finalising")));
        // Drawing and settling take 2.5 s, then the 30 s finalise bound applies
        assert!(started.elapsed() <= Duration::from_millis(32_600), "{:?}", started.elapsed());
        assert_eq!(backend.stats.released(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_all_handles() {
        let backend = FakeMediaBackend::new(20.0, 20.0);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let err = recombiner(&backend)
            .recombine(&video_file(), &speech(), seconds(20.0), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DubError::Recombination(ref msg) if msg == "cancelled"));
        assert_eq!(backend.stats.released(), backend.stats.opened());
    }
}
