// External collaborators of the pipeline
// - SpeechRecognizer: encoded audio -> transcript text
// - TextTranslator: transcript -> text in the target language
// - SpeechSynthesizer: text + voice -> encoded speech
//
// The pipeline only sees the traits. Responses are checked by the
// `validate_*` functions before they become pipeline results.

pub mod gemini;
pub mod lemonfox;

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{DubError, Result};
use crate::model::{
    AudioFormat, LanguageId, MediaFile, MediaKind, SynthesizedAudio, TranscriptResult,
    TranslationResult, VoiceId,
};

pub use gemini::GeminiTranslator;
pub use lemonfox::{LemonfoxRecognizer, LemonfoxSynthesizer};

#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub audio: MediaFile,
    pub file_name: String,
    pub mime_type: String,
    /// Spoken language of the audio, when known
    pub language_hint: Option<LanguageId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResponse {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub text: String,
    pub source_language: LanguageId,
    pub target_language: LanguageId,
    /// Display names used when phrasing the request
    pub source_label: String,
    pub target_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationResponse {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceId,
    pub format: AudioFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResponse {
    pub audio: Vec<u8>,
}

/// Speech to text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Check that credentials and endpoint configuration are present
    fn check_availability(&self) -> Result<()>;

    async fn transcribe(&self, request: RecognitionRequest) -> Result<RecognitionResponse>;
}

/// Text to text in another language
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextTranslator: Send + Sync {
    /// Check that credentials and endpoint configuration are present
    fn check_availability(&self) -> Result<()>;

    async fn translate(&self, request: TranslationRequest) -> Result<TranslationResponse>;
}

/// Text to speech
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Check that credentials and endpoint configuration are present
    fn check_availability(&self) -> Result<()>;

    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse>;
}

/// Turn a recognizer response into a transcript, rejecting blank text
pub fn validate_transcript(
    response: RecognitionResponse,
    language: &LanguageId,
) -> Result<TranscriptResult> {
    let text = response.text.trim();
    if text.is_empty() {
        return Err(DubError::Recognition("No transcript text received".to_string()));
    }

    Ok(TranscriptResult {
        text: text.to_string(),
        language: language.clone(),
    })
}

/// Turn a translator response into a translation, rejecting blank text
pub fn validate_translation(
    response: TranslationResponse,
    language: &LanguageId,
) -> Result<TranslationResult> {
    let text = response.text.trim();
    if text.is_empty() {
        return Err(DubError::Translation("Empty translation received".to_string()));
    }

    Ok(TranslationResult {
        text: text.to_string(),
        language: language.clone(),
    })
}

/// Turn a synthesizer response into an audio object, rejecting empty payloads
pub fn validate_synthesis(
    response: SynthesisResponse,
    request: &SynthesisRequest,
) -> Result<SynthesizedAudio> {
    if response.audio.is_empty() {
        return Err(DubError::Synthesis("Generated audio is empty".to_string()));
    }

    let format = request.format;
    Ok(SynthesizedAudio {
        audio: MediaFile::new(
            format!("speech.{}", format.as_str()),
            MediaKind::Audio,
            format.mime_type(),
            response.audio,
        ),
        voice: request.voice.clone(),
        format,
    })
}

/// Factory for the shipped HTTP collaborators
pub struct ServiceFactory;

impl ServiceFactory {
    pub fn create_recognizer(config: &Config) -> Result<Arc<dyn SpeechRecognizer>> {
        Ok(Arc::new(LemonfoxRecognizer::new(config.recognizer.clone())?))
    }

    pub fn create_translator(config: &Config) -> Result<Arc<dyn TextTranslator>> {
        Ok(Arc::new(GeminiTranslator::new(config.translator.clone())?))
    }

    pub fn create_synthesizer(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
        Ok(Arc::new(LemonfoxSynthesizer::new(config.synthesizer.clone())?))
    }
}

pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DubError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Read an API key from the environment variable named in the config
pub(crate) fn api_key(variable: &str) -> Result<String> {
    match std::env::var(variable) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(DubError::Config(format!(
            "API key not found in environment variable {}",
            variable
        ))),
    }
}

/// Describe a failed request without its URL
pub(crate) fn transport_error(error: reqwest::Error) -> String {
    format!("HTTP request failed: {}", error.without_url())
}

/// Pass through 2xx responses; otherwise build an error from status and body
pub(crate) async fn check_status<F>(response: Response, make_error: F) -> Result<Response>
where
    F: FnOnce(String) -> DubError,
{
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!("Service returned {}: {}", status, body);
    Err(make_error(format!("{} - {}", status, body.trim())))
}
