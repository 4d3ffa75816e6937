use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TranslatorConfig;
use crate::error::{DubError, Result};
use super::{
    TextTranslator, TranslationRequest, TranslationResponse, api_key, build_client, check_status,
    transport_error,
};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .parts
            .first()
            .map(|part| part.text.trim())
    }
}

/// Text translator backed by a generative language model
pub struct GeminiTranslator {
    client: Client,
    config: TranslatorConfig,
}

impl GeminiTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            config,
        })
    }

    /// Build the dubbing-oriented translation prompt
    fn build_prompt(request: &TranslationRequest) -> String {
        let source = &request.source_label;
        let target = &request.target_label;

        format!(
            r#"You are a professional translator specializing in video dubbing.

Translate the following {source} speech to {target}.

IMPORTANT: Keep the translation in the same length and natural for dubbing. Avoid overly long and overly short sentences that would be difficult to lip-sync. Maintain the original meaning while making it sound natural when spoken.

Original {source}:
"""
{text}
"""

Provide a high-quality, concise translation optimized for video dubbing in {target}."#,
            text = request.text
        )
    }

    fn build_request(&self, request: &TranslationRequest) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![ContentPart {
                    text: Self::build_prompt(request),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    async fn generate(
        &self,
        key: &str,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );

        info!(
            "Translating {} characters from {} to {}",
            request.text.chars().count(),
            request.source_label,
            request.target_label
        );
        debug!("Sending translation request to: {}", url);

        // The key travels in a header so it never shows up in a logged URL
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, key)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| DubError::Translation(transport_error(e)))?;
        let response = check_status(response, DubError::Translation).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DubError::Translation(format!("Failed to parse response: {}", e)))?;

        let text = body.first_text().ok_or_else(|| {
            DubError::Translation("Invalid translation response format".to_string())
        })?;

        debug!("Raw translation: {}", text);
        Ok(TranslationResponse {
            text: text.to_string(),
        })
    }
}

#[async_trait]
impl TextTranslator for GeminiTranslator {
    fn check_availability(&self) -> Result<()> {
        api_key(&self.config.api_key_env).map(|_| ())
    }

    async fn translate(&self, request: TranslationRequest) -> Result<TranslationResponse> {
        let key = api_key(&self.config.api_key_env)?;
        self.generate(&key, &request).await
    }
}
