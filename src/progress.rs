//! Pipeline stage state machine and progress reporting.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// One discrete state of a dubbing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineStage {
    Idle,
    ExtractingAudio,
    Transcribing,
    Translating,
    SynthesizingSpeech,
    Recombining,
    Completed,
    Failed,
}

impl PipelineStage {
    /// Fixed progress checkpoint reached when entering this stage.
    ///
    /// Network stages carry more weight than local capture. `Failed` has no
    /// checkpoint of its own; a failed run keeps the percent it reached.
    pub fn checkpoint(self) -> Option<u8> {
        match self {
            Self::Idle => Some(0),
            Self::ExtractingAudio => Some(20),
            Self::Transcribing => Some(40),
            Self::Translating => Some(55),
            Self::SynthesizingSpeech => Some(70),
            Self::Recombining => Some(90),
            Self::Completed => Some(100),
            Self::Failed => None,
        }
    }

    /// The stage that follows this one on the success path
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::ExtractingAudio),
            Self::ExtractingAudio => Some(Self::Transcribing),
            Self::Transcribing => Some(Self::Translating),
            Self::Translating => Some(Self::SynthesizingSpeech),
            Self::SynthesizingSpeech => Some(Self::Recombining),
            Self::Recombining => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// A new run may only start from these stages
    pub fn accepts_new_run(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        match target {
            Self::Failed => !self.is_terminal(),
            Self::Idle => self.accepts_new_run(),
            _ => self.next() == Some(target),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ExtractingAudio => "extract",
            Self::Transcribing => "transcribe",
            Self::Translating => "translate",
            Self::SynthesizingSpeech => "synthesize",
            Self::Recombining => "recombine",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot emitted after every stage transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub stage: PipelineStage,
    pub percent: u8,
    pub label: String,
}

/// The "current run" view shared with whoever presents progress.
///
/// Only the orchestrator writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub stage: PipelineStage,
    pub percent: u8,
    pub label: String,
    pub last_error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Idle,
            percent: 0,
            label: String::new(),
            last_error: None,
        }
    }
}

impl RunState {
    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            stage: self.stage,
            percent: self.percent,
            label: self.label.clone(),
        }
    }

    /// Reset for a new run: clears the previous error and progress
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Move to `stage`, raising the percent to its checkpoint but never lowering it
    pub(crate) fn enter(&mut self, stage: PipelineStage, label: String) {
        debug_assert!(
            self.stage.can_transition_to(stage),
            "illegal transition {} -> {}",
            self.stage,
            stage
        );
        self.stage = stage;
        if let Some(checkpoint) = stage.checkpoint() {
            self.percent = self.percent.max(checkpoint);
        }
        self.label = label;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.stage = PipelineStage::Failed;
        self.label = "Dubbing failed".to_string();
        self.last_error = Some(message);
    }
}

/// Receives every progress snapshot of a run
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, report: &ProgressReport);
}

/// Observer that writes progress to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_progress(&self, report: &ProgressReport) {
        match report.stage {
            PipelineStage::Failed => warn!("[{:>3}%] {}", report.percent, report.label),
            _ => info!("[{:>3}%] {}", report.percent, report.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_are_monotone_along_success_path() {
        let mut stage = PipelineStage::Idle;
        let mut last = 0;
        while let Some(next) = stage.next() {
            let checkpoint = next.checkpoint().unwrap();
            assert!(checkpoint > last, "{} did not advance progress", next);
            last = checkpoint;
            stage = next;
        }
        assert_eq!(stage, PipelineStage::Completed);
        assert_eq!(last, 100);
    }

    #[test]
    fn test_transitions() {
        use PipelineStage::*;
        assert!(Idle.can_transition_to(ExtractingAudio));
        assert!(!Idle.can_transition_to(Transcribing));
        assert!(Translating.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Idle));
        assert!(Failed.can_transition_to(Idle));
        assert!(!Recombining.can_transition_to(Idle));
    }

    #[test]
    fn test_run_state_fail_keeps_percent() {
        let mut state = RunState::default();
        state.enter(PipelineStage::ExtractingAudio, "Extracting".to_string());
        state.enter(PipelineStage::Transcribing, "Transcribing".to_string());
        state.fail("Transcription failed: boom".to_string());

        assert_eq!(state.stage, PipelineStage::Failed);
        assert_eq!(state.percent, 40);
        assert_eq!(state.last_error.as_deref(), Some("Transcription failed: boom"));

        state.reset();
        assert_eq!(state, RunState::default());
    }
}
