use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{DubError, Result};
use crate::model::{AudioFormat, LanguageId, VoiceId};
use crate::timing::TimeoutPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Voices offered for speech synthesis
    pub voices: Vec<String>,
    pub recognizer: RecognizerConfig,
    pub translator: TranslatorConfig,
    pub synthesizer: SynthesizerConfig,
    pub media: MediaConfig,
    /// Supported languages: identifier -> display name
    pub languages: Languages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Base URL of the OpenAI-compatible speech API
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Base URL of the generative language API
    pub endpoint: String,
    /// Model used for translation
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_output_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    /// Base URL of the OpenAI-compatible speech API
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Audio format requested from the synthesizer
    pub format: AudioFormat,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Webm,
    Mp4,
}

impl ContainerFormat {
    pub fn muxer(self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
        }
    }

    pub fn video_codec(self) -> &'static str {
        match self {
            Self::Webm => "libvpx-vp9",
            Self::Mp4 => "libx264",
        }
    }

    /// Encoder options that keep up with frames pushed at playback rate
    pub fn realtime_encoder_options(self) -> &'static [&'static str] {
        match self {
            Self::Webm => &["-deadline", "realtime", "-cpu-used", "8", "-row-mt", "1"],
            Self::Mp4 => &["-preset", "ultrafast", "-tune", "zerolatency"],
        }
    }

    pub fn audio_codec(self) -> &'static str {
        match self {
            Self::Webm => "libopus",
            Self::Mp4 => "aac",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Webm => "video/webm",
            Self::Mp4 => "video/mp4",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Frame rate of the recombined video track
    pub capture_fps: u32,
    /// Container of the recombined output
    pub output_format: ContainerFormat,
    /// Extract audio at native speed (live capture) instead of as fast as
    /// possible. Recombination playback always runs at native speed.
    pub realtime_capture: bool,
    /// How long to wait for media metadata to load
    pub metadata_timeout_ms: u64,
    /// Extra time after the source duration before audio capture is force-stopped
    pub extraction_slack_ms: u64,
    /// Extra time after the source duration before recombination is force-stopped
    pub recombination_slack_ms: u64,
    /// Time allowed for trailing audio to flush after the last video frame
    pub settle_ms: u64,
    /// Interval of the frame-draw loop
    pub refresh_interval_ms: u64,
    /// Time allowed for encoding and muxing after recording stopped
    pub finalize_timeout_ms: u64,
}

impl MediaConfig {
    pub fn timeouts(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            metadata_timeout: Duration::from_millis(self.metadata_timeout_ms),
            extraction_slack: Duration::from_millis(self.extraction_slack_ms),
            recombination_slack: Duration::from_millis(self.recombination_slack_ms),
            settle: Duration::from_millis(self.settle_ms),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms.max(1)),
            finalize_timeout: Duration::from_millis(self.finalize_timeout_ms),
        }
    }
}

/// Catalog of supported languages and their display names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Languages(BTreeMap<String, String>);

impl Languages {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    /// Display name of a language, falling back to its identifier
    pub fn label(&self, language: &LanguageId) -> String {
        self.0
            .get(language.as_str())
            .cloned()
            .unwrap_or_else(|| language.to_string())
    }

    pub fn contains(&self, language: &LanguageId) -> bool {
        self.0.contains_key(language.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl Default for Config {
    fn default() -> Self {
        let languages = [
            ("english", "English"),
            ("swahili", "Kiswahili"),
            ("spanish", "Spanish"),
            ("french", "French"),
            ("german", "German"),
            ("italian", "Italian"),
            ("portuguese", "Portuguese"),
            ("dutch", "Dutch"),
            ("russian", "Russian"),
            ("chinese", "Chinese"),
            ("japanese", "Japanese"),
            ("korean", "Korean"),
            ("arabic", "Arabic"),
            ("hindi", "Hindi"),
            ("urdu", "Urdu"),
            ("turkish", "Turkish"),
            ("greek", "Greek"),
            ("hebrew", "Hebrew"),
            ("thai", "Thai"),
            ("vietnamese", "Vietnamese"),
        ]
        .into_iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();

        Self {
            recognizer: RecognizerConfig {
                endpoint: "https://api.lemonfox.ai/v1".to_string(),
                api_key_env: "LEMONFOX_API_KEY".to_string(),
                timeout_secs: 300,
            },
            translator: TranslatorConfig {
                endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-1.5-flash".to_string(),
                api_key_env: "GEMINI_API_KEY".to_string(),
                temperature: 0.3,
                max_output_tokens: 2048,
                timeout_secs: 120,
            },
            synthesizer: SynthesizerConfig {
                endpoint: "https://api.lemonfox.ai/v1".to_string(),
                api_key_env: "LEMONFOX_API_KEY".to_string(),
                format: AudioFormat::Mp3,
                timeout_secs: 300,
            },
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
                capture_fps: 30,
                output_format: ContainerFormat::Webm,
                realtime_capture: true,
                metadata_timeout_ms: 10_000,
                extraction_slack_ms: 1_000,
                recombination_slack_ms: 2_000,
                settle_ms: 500,
                refresh_interval_ms: 16,
                finalize_timeout_ms: 30_000,
            },
            languages: Languages::new(languages),
            voices: ["alloy", "echo", "fable", "onyx", "nova", "shimmer"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DubError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DubError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Check that a language is part of the configured catalog
    pub fn validate_language(&self, language: &LanguageId) -> Result<()> {
        if self.languages.contains(language) {
            Ok(())
        } else {
            Err(DubError::Validation(format!(
                "Unsupported language '{}'. Run `redub languages` for the list",
                language
            )))
        }
    }

    /// Check that a voice is offered by the synthesizer
    pub fn validate_voice(&self, voice: &VoiceId) -> Result<()> {
        if self.voices.iter().any(|v| v == voice.as_str()) {
            Ok(())
        } else {
            Err(DubError::Validation(format!(
                "Unknown voice '{}'. Available voices: {}",
                voice,
                self.voices.join(", ")
            )))
        }
    }

    pub fn default_voice(&self) -> VoiceId {
        VoiceId::new(self.voices.first().cloned().unwrap_or_else(|| "alloy".to_string()))
    }
}
