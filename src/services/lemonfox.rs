use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{RecognizerConfig, SynthesizerConfig};
use crate::error::{DubError, Result};
use super::{
    RecognitionRequest, RecognitionResponse, SpeechRecognizer, SpeechSynthesizer, SynthesisRequest,
    SynthesisResponse, api_key, build_client, check_status, transport_error,
};

/// Transcription response; some deployments name the field `transcript`
#[derive(Debug, Clone, Deserialize)]
struct TranscriptionBody {
    text: Option<String>,
    transcript: Option<String>,
}

impl TranscriptionBody {
    fn into_text(self) -> String {
        self.text.or(self.transcript).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
struct SpeechBody<'a> {
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Speech recognizer backed by an OpenAI-compatible transcription endpoint
pub struct LemonfoxRecognizer {
    client: Client,
    config: RecognizerConfig,
}

impl LemonfoxRecognizer {
    pub fn new(config: RecognizerConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config,
        })
    }

    fn build_form(request: RecognitionRequest) -> Result<Form> {
        let file = Part::bytes(request.audio.bytes().to_vec())
            .file_name(request.file_name)
            .mime_str(&request.mime_type)
            .map_err(|e| DubError::Recognition(format!("Invalid audio MIME type: {}", e)))?;

        let form = Form::new().part("file", file).text("response_format", "json");
        Ok(match request.language_hint {
            Some(language) => form.text("language", language.to_string()),
            None => form,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for LemonfoxRecognizer {
    fn check_availability(&self) -> Result<()> {
        api_key(&self.config.api_key_env).map(|_| ())
    }

    async fn transcribe(&self, request: RecognitionRequest) -> Result<RecognitionResponse> {
        let key = api_key(&self.config.api_key_env)?;
        let url = format!("{}/audio/transcriptions", self.config.endpoint.trim_end_matches('/'));

        info!("Uploading {} bytes of audio for transcription", request.audio.size());
        debug!("Sending transcription request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .multipart(Self::build_form(request)?)
            .send()
            .await
            .map_err(|e| DubError::Recognition(transport_error(e)))?;
        let response = check_status(response, DubError::Recognition).await?;

        let body: TranscriptionBody = response
            .json()
            .await
            .map_err(|e| DubError::Recognition(format!("Failed to parse response: {}", e)))?;

        Ok(RecognitionResponse { text: body.into_text() })
    }
}

/// Speech synthesizer backed by an OpenAI-compatible speech endpoint
pub struct LemonfoxSynthesizer {
    client: Client,
    config: SynthesizerConfig,
}

impl LemonfoxSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for LemonfoxSynthesizer {
    fn check_availability(&self) -> Result<()> {
        api_key(&self.config.api_key_env).map(|_| ())
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse> {
        let key = api_key(&self.config.api_key_env)?;
        let url = format!("{}/audio/speech", self.config.endpoint.trim_end_matches('/'));
        let body = SpeechBody {
            input: &request.text,
            voice: request.voice.as_str(),
            response_format: request.format.as_str(),
        };

        info!("Requesting {} speech with voice {}", request.format.as_str(), request.voice);
        debug!("Sending speech request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DubError::Synthesis(transport_error(e)))?;
        let response = check_status(response, DubError::Synthesis).await?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| DubError::Synthesis(format!("Failed to read audio: {}", e)))?;

        debug!("Received {} bytes of speech", audio.len());
        Ok(SynthesisResponse { audio: audio.to_vec() })
    }
}
