//! Isolates the audio track of a video into a standalone audio object.

use std::sync::Arc;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::error::{DubError, Result};
use crate::media::{MediaBackend, Session};
use crate::model::{MediaDuration, MediaFile, MediaKind, extension_for_mime};
use crate::progress::PipelineStage;
use crate::timing::{CancelToken, TimeoutPolicy};

/// Audio captured from a video, with the source's duration
#[derive(Debug, Clone)]
pub struct ExtractedAudio {
    pub audio: MediaFile,
    pub duration: MediaDuration,
}

pub struct TrackExtractor {
    backend: Arc<dyn MediaBackend>,
    timeouts: TimeoutPolicy,
}

impl TrackExtractor {
    pub fn new(backend: Arc<dyn MediaBackend>, timeouts: TimeoutPolicy) -> Self {
        Self { backend, timeouts }
    }

    /// Play the video while capturing only its audio channel.
    ///
    /// Capture stops at the natural end of the stream or once the source
    /// duration plus the extraction slack has elapsed, whichever comes first.
    pub async fn extract(&self, video: &MediaFile, cancel: &CancelToken) -> Result<ExtractedAudio> {
        if video.kind() != MediaKind::Video {
            return Err(DubError::Extraction(format!("{} is not a video", video.name())));
        }

        let info = timeout(self.timeouts.metadata_timeout, self.backend.probe(video))
            .await
            .map_err(|_| DubError::Extraction("Timed out loading video metadata".to_string()))?
            .map_err(|e| e.at_stage(PipelineStage::ExtractingAudio))?;

        if !info.has_audio {
            return Err(DubError::Extraction("Video has no audio track".to_string()));
        }

        let limit = self.timeouts.extraction_limit(info.duration);
        info!("Capturing audio of {} ({}, limit {:?})", video.name(), info.duration, limit);

        let capture = self
            .backend
            .capture_audio(video)
            .await
            .map_err(|e| e.at_stage(PipelineStage::ExtractingAudio))?;
        let mut capture = Session::new("audio capture", capture);

        let deadline = Instant::now() + limit;
        let mut chunks: Vec<Vec<u8>> = Vec::new();

        loop {
            tokio::select! {
                next = timeout_at(deadline, capture.next_chunk()) => match next {
                    Ok(Ok(Some(chunk))) => {
                        if !chunk.is_empty() {
                            chunks.push(chunk);
                        }
                    }
                    Ok(Ok(None)) => {
                        debug!("Audio capture reached end of stream");
                        break;
                    }
                    Ok(Err(e)) => return Err(e.at_stage(PipelineStage::ExtractingAudio)),
                    Err(_) => {
                        warn!("End of stream not reported, stopping capture after {:?}", limit);
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    return Err(DubError::cancelled(PipelineStage::ExtractingAudio));
                }
            }
        }

        let data = chunks.concat();
        if data.is_empty() {
            return Err(DubError::Extraction("No audio data captured".to_string()));
        }

        let mime_type = capture.mime_type().to_string();
        let audio = MediaFile::new(
            format!("audio.{}", extension_for_mime(&mime_type)),
            MediaKind::Audio,
            mime_type,
            data,
        );

        info!("Captured {} bytes of audio from {} chunks", audio.size(), chunks.len());
        Ok(ExtractedAudio {
            audio,
            duration: info.duration,
        })
    }
}
