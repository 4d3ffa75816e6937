use thiserror::Error;

use crate::progress::PipelineStage;

#[derive(Error, Debug)]
pub enum DubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Audio extraction failed: {0}")]
    Extraction(String),

    #[error("Transcription failed: {0}")]
    Recognition(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Speech generation failed: {0}")]
    Synthesis(String),

    #[error("Video merging failed: {0}")]
    Recombination(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DubError {
    /// Stamp this error with the pipeline stage it escaped from.
    ///
    /// Errors that already carry the stage's variant are returned unchanged;
    /// everything else is wrapped into that variant using its display text.
    /// Stages without a dedicated variant leave the error as is.
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        let reason = match &self {
            Self::Extraction(msg)
            | Self::Recognition(msg)
            | Self::Translation(msg)
            | Self::Synthesis(msg)
            | Self::Recombination(msg) => {
                if self.stage() == Some(stage) {
                    return self;
                }
                msg.clone()
            }
            other => other.to_string(),
        };

        match stage {
            PipelineStage::ExtractingAudio => Self::Extraction(reason),
            PipelineStage::Transcribing => Self::Recognition(reason),
            PipelineStage::Translating => Self::Translation(reason),
            PipelineStage::SynthesizingSpeech => Self::Synthesis(reason),
            PipelineStage::Recombining => Self::Recombination(reason),
            _ => self,
        }
    }

    /// Error reported by a stage that was stopped through its cancel token
    pub fn cancelled(stage: PipelineStage) -> Self {
        Self::Extraction("cancelled".to_string()).at_stage(stage)
    }

    /// The pipeline stage this error belongs to, if it is a stage error.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Extraction(_) => Some(PipelineStage::ExtractingAudio),
            Self::Recognition(_) => Some(PipelineStage::Transcribing),
            Self::Translation(_) => Some(PipelineStage::Translating),
            Self::Synthesis(_) => Some(PipelineStage::SynthesizingSpeech),
            Self::Recombination(_) => Some(PipelineStage::Recombining),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DubError>;
