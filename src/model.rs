use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::error::{DubError, Result};

/// Recognized video container extensions
const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "mov", "avi", "webm", "mkv", "m4v", "wmv", "flv"];

/// Recognized audio container extensions
const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "wav", "ogg", "opus", "m4a", "aac", "flac"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

/// An immutable media payload selected for one run.
///
/// The payload is reference counted so that stages and the media backend can
/// hold it without copying; it is never mutated after construction.
#[derive(Clone)]
pub struct MediaFile {
    name: String,
    kind: MediaKind,
    mime_type: String,
    data: Arc<[u8]>,
}

impl MediaFile {
    pub fn new<N, M>(name: N, kind: MediaKind, mime_type: M, data: Vec<u8>) -> Self
    where
        N: Into<String>,
        M: Into<String>,
    {
        Self {
            name: name.into(),
            kind,
            mime_type: mime_type.into(),
            data: Arc::from(data),
        }
    }

    /// Load a media file from disk, inferring its kind from the extension
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DubError::Validation(format!("File not found: {}", path.display())));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let (kind, mime_type) = if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            (MediaKind::Video, video_mime_type(&extension))
        } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            (MediaKind::Audio, audio_mime_type(&extension))
        } else {
            return Err(DubError::Validation(format!(
                "Unsupported media format '{}': {}",
                extension,
                path.display()
            )));
        };

        let data = fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());

        Ok(Self::new(name, kind, mime_type, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension matching the MIME subtype, used for scratch files
    pub fn extension(&self) -> &str {
        extension_for_mime(&self.mime_type)
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

fn video_mime_type(extension: &str) -> &'static str {
    match extension {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        _ => "application/octet-stream",
    }
}

fn audio_mime_type(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "m4a" | "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

pub(crate) fn extension_for_mime(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    match base {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/webm" | "audio/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-ms-wmv" => "wmv",
        "video/x-flv" => "flv",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/aac" => "m4a",
        "audio/flac" => "flac",
        _ => "bin",
    }
}

/// A nonnegative length of media time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct MediaDuration(f64);

impl MediaDuration {
    /// Returns `None` for negative, NaN or infinite values
    pub fn new(seconds: f64) -> Option<Self> {
        (seconds.is_finite() && seconds >= 0.0).then_some(Self(seconds))
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs_f64(self.0)
    }

    pub fn min(self, other: Self) -> Self {
        if other.0 < self.0 { other } else { self }
    }
}

impl From<Duration> for MediaDuration {
    fn from(duration: Duration) -> Self {
        Self(duration.as_secs_f64())
    }
}

impl fmt::Display for MediaDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}s", self.0)
    }
}

/// Metadata obtained once a media object has loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration: MediaDuration,
    /// Native video resolution, absent for audio-only media
    pub dimensions: Option<(u32, u32)>,
    pub frame_rate: Option<f64>,
    pub has_audio: bool,
}

/// Opaque language label supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguageId(String);

impl LanguageId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque synthesis voice label supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceId(String);

impl VoiceId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoded audio formats the synthesizer can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Opus,
    Aac,
    Flac,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Opus => "audio/ogg",
            Self::Aac => "audio/aac",
            Self::Flac => "audio/flac",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    pub language: LanguageId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResult {
    pub text: String,
    pub language: LanguageId,
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio: MediaFile,
    pub voice: VoiceId,
    pub format: AudioFormat,
}

/// Final result of a successful run, kept for preview and export.
#[derive(Debug, Clone)]
pub struct DubbedOutput {
    pub payload: Vec<u8>,
    pub mime_type: String,
    /// Duration of the input video
    pub duration: MediaDuration,
    /// Duration actually recorded into `payload`
    pub output_duration: MediaDuration,
    pub source_language: LanguageId,
    pub target_language: LanguageId,
    pub source_label: String,
    pub target_label: String,
    pub voice: VoiceId,
    pub transcript: String,
    pub translation: String,
}

impl DubbedOutput {
    pub fn extension(&self) -> &str {
        extension_for_mime(&self.mime_type)
    }
}
