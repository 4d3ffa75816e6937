use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, Languages};
use crate::error::{DubError, Result};
use crate::extract::TrackExtractor;
use crate::media::{MediaBackend, MediaBackendFactory};
use crate::model::{AudioFormat, DubbedOutput, LanguageId, MediaFile, MediaKind, VoiceId};
use crate::progress::{LogObserver, PipelineStage, ProgressObserver, RunState};
use crate::recombine::Recombiner;
use crate::services::{
    RecognitionRequest, ServiceFactory, SpeechRecognizer, SpeechSynthesizer, SynthesisRequest,
    TextTranslator, TranslationRequest, validate_synthesis, validate_transcript,
    validate_translation,
};
use crate::timing::CancelToken;

/// Everything the pipeline calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn TextTranslator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub media: Arc<dyn MediaBackend>,
}

impl Collaborators {
    /// Build the shipped HTTP services and the ffmpeg media backend
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            recognizer: ServiceFactory::create_recognizer(config)?,
            translator: ServiceFactory::create_translator(config)?,
            synthesizer: ServiceFactory::create_synthesizer(config)?,
            media: MediaBackendFactory::create_backend(config.media.clone()),
        })
    }

    fn check_availability(&self) -> Result<()> {
        self.recognizer.check_availability()?;
        self.translator.check_availability()?;
        self.synthesizer.check_availability()?;
        self.media.check_availability()
    }
}

/// Input of one dubbing run
#[derive(Debug, Clone)]
pub struct DubRequest {
    pub video: Option<MediaFile>,
    pub source: LanguageId,
    pub target: LanguageId,
    pub voice: VoiceId,
}

/// Cancels whichever run the orchestrator is currently executing
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    current: Arc<Mutex<CancelToken>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.lock().cancel();
    }

    fn start_run(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.lock() = token.clone();
        token
    }

    fn lock(&self) -> MutexGuard<'_, CancelToken> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The stages of a run and what they need
struct Pipeline {
    collaborators: Collaborators,
    languages: Languages,
    speech_format: AudioFormat,
    extractor: TrackExtractor,
    recombiner: Recombiner,
}

/// Sequences the dubbing stages and owns the run state.
///
/// Runs take `&mut self`, so one orchestrator never executes two runs at
/// once. Whatever way a run ends, the state is left `Completed` or `Failed`.
pub struct Orchestrator {
    pipeline: Pipeline,
    state: RunState,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancelHandle,
}

impl Orchestrator {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let media = Arc::clone(&collaborators.media);

        Self {
            pipeline: Pipeline {
                extractor: TrackExtractor::new(Arc::clone(&media), config.media.timeouts()),
                recombiner: Recombiner::new(media, &config.media),
                languages: config.languages.clone(),
                speech_format: config.synthesizer.format,
                collaborators,
            },
            state: RunState::default(),
            observer: Arc::new(LogObserver),
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Current run state, including the last error until the next run starts
    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Dub a video from `source` into `target`.
    ///
    /// Preconditions are checked before any collaborator is called. A stage
    /// failure stops the run and is returned stamped with that stage.
    pub async fn run(&mut self, request: DubRequest) -> Result<DubbedOutput> {
        let run_id = Uuid::new_v4();
        let cancel = self.cancel.start_run();

        self.state.reset();
        let mut run = ActiveRun::new(&mut self.state, self.observer.as_ref());

        info!(
            "Starting dubbing run {}: {} -> {} ({})",
            run_id, request.source, request.target, request.voice
        );

        let result = self.pipeline.execute(&mut run, request, &cancel).await;
        match &result {
            Ok(output) => info!(
                "Dubbing run {} completed: {} bytes, {}",
                run_id,
                output.payload.len(),
                output.output_duration
            ),
            Err(e) => {
                warn!("Dubbing run {} failed: {}", run_id, e);
                run.fail(e);
            }
        }
        result
    }
}

impl Pipeline {
    async fn execute(
        &self,
        run: &mut ActiveRun<'_>,
        request: DubRequest,
        cancel: &CancelToken,
    ) -> Result<DubbedOutput> {
        let video = validate_request(&request)?;
        self.collaborators.check_availability()?;

        let source_label = self.languages.label(&request.source);
        let target_label = self.languages.label(&request.target);

        run.enter(PipelineStage::ExtractingAudio, "Extracting audio from video...".to_string());
        let extracted = self
            .extractor
            .extract(&video, cancel)
            .await
            .map_err(|e| e.at_stage(PipelineStage::ExtractingAudio))?;

        run.enter(
            PipelineStage::Transcribing,
            format!("Transcribing audio from {}...", source_label),
        );
        let recognition = RecognitionRequest {
            file_name: extracted.audio.name().to_string(),
            mime_type: extracted.audio.mime_type().to_string(),
            audio: extracted.audio.clone(),
            language_hint: Some(request.source.clone()),
        };
        let transcript = cancellable(
            PipelineStage::Transcribing,
            cancel,
            self.collaborators.recognizer.transcribe(recognition),
        )
        .await
        .and_then(|response| validate_transcript(response, &request.source))
        .map_err(|e| e.at_stage(PipelineStage::Transcribing))?;
        info!("Transcript: {} characters", transcript.text.chars().count());

        run.enter(
            PipelineStage::Translating,
            format!("Translating from {} to {}...", source_label, target_label),
        );
        let translation_request = TranslationRequest {
            text: transcript.text.clone(),
            source_language: request.source.clone(),
            target_language: request.target.clone(),
            source_label: source_label.clone(),
            target_label: target_label.clone(),
        };
        let translation = cancellable(
            PipelineStage::Translating,
            cancel,
            self.collaborators.translator.translate(translation_request),
        )
        .await
        .and_then(|response| validate_translation(response, &request.target))
        .map_err(|e| e.at_stage(PipelineStage::Translating))?;
        info!("Translation: {} characters", translation.text.chars().count());

        run.enter(
            PipelineStage::SynthesizingSpeech,
            format!("Generating {} speech...", target_label),
        );
        let synthesis = SynthesisRequest {
            text: translation.text.clone(),
            voice: request.voice.clone(),
            format: self.speech_format,
        };
        let speech = cancellable(
            PipelineStage::SynthesizingSpeech,
            cancel,
            self.collaborators.synthesizer.synthesize(synthesis.clone()),
        )
        .await
        .and_then(|response| validate_synthesis(response, &synthesis))
        .map_err(|e| e.at_stage(PipelineStage::SynthesizingSpeech))?;
        info!("Synthesized {} bytes of speech", speech.audio.size());

        run.enter(PipelineStage::Recombining, "Merging dubbed audio with video...".to_string());
        let recombined = self
            .recombiner
            .recombine(&video, &speech, extracted.duration, cancel)
            .await
            .map_err(|e| e.at_stage(PipelineStage::Recombining))?;

        run.enter(PipelineStage::Completed, "Video dubbing completed!".to_string());

        Ok(DubbedOutput {
            payload: recombined.payload,
            mime_type: recombined.mime_type,
            duration: extracted.duration,
            output_duration: recombined.duration,
            source_language: request.source,
            target_language: request.target,
            source_label,
            target_label,
            voice: speech.voice,
            transcript: transcript.text,
            translation: translation.text,
        })
    }
}

/// Check the request before anything is started
fn validate_request(request: &DubRequest) -> Result<MediaFile> {
    let video = request
        .video
        .as_ref()
        .ok_or_else(|| DubError::Validation("Please select a video file first".to_string()))?;

    if video.is_empty() {
        return Err(DubError::Validation(format!("{} is empty", video.name())));
    }
    if video.kind() != MediaKind::Video {
        return Err(DubError::Validation(format!("{} is not a video file", video.name())));
    }
    if request.source == request.target {
        return Err(DubError::Validation(
            "Source and target languages must be different".to_string(),
        ));
    }

    Ok(video.clone())
}

/// Race a collaborator call against the run's cancel token
async fn cancellable<T, F>(stage: PipelineStage, cancel: &CancelToken, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        result = work => result,
        _ = cancel.cancelled() => Err(DubError::cancelled(stage)),
    }
}

/// Writes stage transitions for the run in flight.
///
/// Dropping it before the run reached a terminal stage marks the run failed,
/// so an abandoned run future never leaves the state mid-stage.
struct ActiveRun<'a> {
    state: &'a mut RunState,
    observer: &'a dyn ProgressObserver,
}

impl<'a> ActiveRun<'a> {
    fn new(state: &'a mut RunState, observer: &'a dyn ProgressObserver) -> Self {
        Self { state, observer }
    }

    fn enter(&mut self, stage: PipelineStage, label: String) {
        self.state.enter(stage, label);
        self.observer.on_progress(&self.state.report());
    }

    fn fail(&mut self, error: &DubError) {
        self.state.fail(error.to_string());
        self.observer.on_progress(&self.state.report());
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.state.stage.is_terminal() {
            self.state.fail("run interrupted".to_string());
            self.observer.on_progress(&self.state.report());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::{FakeMediaBackend, audio_file, video_file};
    use crate::progress::ProgressReport;
    use crate::services::{
        MockSpeechRecognizer, MockSpeechSynthesizer, MockTextTranslator, RecognitionResponse,
        SynthesisResponse, TranslationResponse,
    };
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingObserver {
        reports: Mutex<Vec<ProgressReport>>,
    }

    impl RecordingObserver {
        fn reports(&self) -> Vec<ProgressReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl ProgressObserver for RecordingObserver {
        fn on_progress(&self, report: &ProgressReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn recognizer(text: &'static str, calls: usize) -> MockSpeechRecognizer {
        let mut mock = MockSpeechRecognizer::new();
        mock.expect_check_availability().returning(|| Ok(()));
        mock.expect_transcribe()
            .times(calls)
            .returning(move |_| Ok(RecognitionResponse { text: text.to_string() }));
        mock
    }

    fn translator(calls: usize) -> MockTextTranslator {
        let mut mock = MockTextTranslator::new();
        mock.expect_check_availability().returning(|| Ok(()));
        mock.expect_translate().times(calls).returning(|request| {
            Ok(TranslationResponse {
                text: format!("[{}] {}", request.target_language, request.text),
            })
        });
        mock
    }

    fn synthesizer(calls: usize) -> MockSpeechSynthesizer {
        let mut mock = MockSpeechSynthesizer::new();
        mock.expect_check_availability().returning(|| Ok(()));
        mock.expect_synthesize()
            .times(calls)
            .returning(|_| Ok(SynthesisResponse { audio: vec![7; 128] }));
        mock
    }

    fn untouched_recognizer() -> MockSpeechRecognizer {
        let mut mock = MockSpeechRecognizer::new();
        mock.expect_check_availability().never();
        mock.expect_transcribe().never();
        mock
    }

    fn untouched_translator() -> MockTextTranslator {
        let mut mock = MockTextTranslator::new();
        mock.expect_check_availability().never();
        mock.expect_translate().never();
        mock
    }

    fn untouched_synthesizer() -> MockSpeechSynthesizer {
        let mut mock = MockSpeechSynthesizer::new();
        mock.expect_check_availability().never();
        mock.expect_synthesize().never();
        mock
    }

    fn orchestrator(
        backend: &FakeMediaBackend,
        recognizer: MockSpeechRecognizer,
        translator: MockTextTranslator,
        synthesizer: MockSpeechSynthesizer,
    ) -> (Orchestrator, Arc<RecordingObserver>) {
        let collaborators = Collaborators {
            recognizer: Arc::new(recognizer),
            translator: Arc::new(translator),
            synthesizer: Arc::new(synthesizer),
            media: Arc::new(backend.clone()),
        };
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = Orchestrator::new(&Config::default(), collaborators)
            .with_observer(Arc::clone(&observer) as Arc<dyn ProgressObserver>);
        (orchestrator, observer)
    }

    fn request(target: &str) -> DubRequest {
        DubRequest {
            video: Some(video_file()),
            source: LanguageId::new("english"),
            target: LanguageId::new(target),
            voice: VoiceId::new("alloy"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_reports_every_stage() {
        let backend = FakeMediaBackend::new(3.0, 2.5);
        let (mut orchestrator, observer) =
            orchestrator(&backend, recognizer("Good morning", 1), translator(1), synthesizer(1));

        let output = orchestrator.run(request("swahili")).await.unwrap();

        let reports = observer.reports();
        let percents: Vec<u8> = reports.iter().map(|r| r.percent).collect();
        assert_eq!(percents, vec![20, 40, 55, 70, 90, 100]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.iter().filter(|r| r.percent == 100).count(), 1);
        assert_eq!(reports.last().unwrap().stage, PipelineStage::Completed);
        assert_eq!(reports[1].label, "Transcribing audio from English...");
        assert_eq!(reports[2].label, "Translating from English to Kiswahili...");
        assert_eq!(reports[3].label, "Generating Kiswahili speech...");

        assert_eq!(output.transcript, "Good morning");
        assert_eq!(output.translation, "[swahili] Good morning");
        assert_eq!(output.target_label, "Kiswahili");
        assert_eq!(output.mime_type, "video/webm");
        assert!(output.output_duration.seconds() <= output.duration.seconds());

        assert_eq!(orchestrator.state().stage, PipelineStage::Completed);
        assert_eq!(orchestrator.state().percent, 100);
        assert_eq!(orchestrator.state().last_error, None);
        assert_eq!(backend.stats.released(), backend.stats.opened());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_speech_output_stays_within_video() {
        let backend = FakeMediaBackend::new(10.0, 8.0);
        let (mut orchestrator, _) =
            orchestrator(&backend, recognizer("Hello", 1), translator(1), synthesizer(1));

        let output = orchestrator.run(request("french")).await.unwrap();

        let recorded = output.output_duration.seconds();
        assert_eq!(output.duration.seconds(), 10.0);
        assert!((8.0..=10.0).contains(&recorded), "recorded {}", recorded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_languages_rejected_without_calls() {
        let backend = FakeMediaBackend::new(3.0, 3.0);
        let (mut orchestrator, observer) = orchestrator(
            &backend,
            untouched_recognizer(),
            untouched_translator(),
            untouched_synthesizer(),
        );

        let err = orchestrator.run(request("english")).await.unwrap_err();

        assert!(matches!(err, DubError::Validation(_)));
        assert_eq!(backend.stats.probes(), 0);
        assert_eq!(backend.stats.opened(), 0);
        assert_eq!(orchestrator.state().stage, PipelineStage::Failed);
        assert_eq!(orchestrator.state().percent, 0);
        assert!(orchestrator.state().last_error.is_some());
        assert_eq!(observer.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_rejected() {
        let backend = FakeMediaBackend::new(3.0, 3.0);
        let (mut orchestrator, _) = orchestrator(
            &backend,
            untouched_recognizer(),
            untouched_translator(),
            untouched_synthesizer(),
        );

        let mut missing = request("swahili");
        missing.video = None;
        let err = orchestrator.run(missing).await.unwrap_err();
        assert!(matches!(err, DubError::Validation(_)));

        let mut not_a_video = request("swahili");
        not_a_video.video = Some(audio_file());
        let err = orchestrator.run(not_a_video).await.unwrap_err();
        assert!(matches!(err, DubError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transcript_stops_before_translation() {
        let backend = FakeMediaBackend::new(2.0, 2.0);
        let (mut orchestrator, observer) =
            orchestrator(&backend, recognizer("   ", 1), translator(0), synthesizer(0));

        let err = orchestrator.run(request("swahili")).await.unwrap_err();

        assert!(matches!(err, DubError::Recognition(_)));
        assert_eq!(err.stage(), Some(PipelineStage::Transcribing));
        let state = orchestrator.state();
        assert_eq!(state.stage, PipelineStage::Failed);
        assert_eq!(state.percent, 40);
        assert_eq!(state.last_error.as_deref(), Some(err.to_string().as_str()));
        assert_eq!(observer.reports().last().unwrap().stage, PipelineStage::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_is_config_error() {
        let backend = FakeMediaBackend::new(2.0, 2.0);
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer
            .expect_check_availability()
            .returning(|| Err(DubError::Config("API key not found".to_string())));
        recognizer.expect_transcribe().never();
        let (mut orchestrator, _) =
            orchestrator(&backend, recognizer, untouched_translator(), untouched_synthesizer());

        let err = orchestrator.run(request("swahili")).await.unwrap_err();

        assert!(matches!(err, DubError::Config(_)));
        assert_eq!(backend.stats.probes(), 0);
        assert_eq!(orchestrator.state().stage, PipelineStage::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_media_backend_is_config_error() {
        let mut backend = FakeMediaBackend::new(2.0, 2.0);
        backend.available = false;
        let (mut orchestrator, _) =
            orchestrator(&backend, recognizer("unused", 0), translator(0), synthesizer(0));

        let err = orchestrator.run(request("swahili")).await.unwrap_err();
        assert!(matches!(err, DubError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_produces_independent_output() {
        let backend = FakeMediaBackend::new(2.0, 2.0);
        let (mut orchestrator, observer) =
            orchestrator(&backend, recognizer("Hello", 2), translator(2), synthesizer(2));

        let first = orchestrator.run(request("swahili")).await.unwrap();
        let second = orchestrator.run(request("german")).await.unwrap();

        assert_eq!(first.translation, "[swahili] Hello");
        assert_eq!(second.translation, "[german] Hello");
        assert_eq!(first.target_label, "Kiswahili");
        assert_eq!(second.target_label, "German");

        let percents: Vec<u8> = observer.reports().iter().map(|r| r.percent).collect();
        assert_eq!(percents, vec![20, 40, 55, 70, 90, 100, 20, 40, 55, 70, 90, 100]);
        assert_eq!(orchestrator.state().stage, PipelineStage::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_clears_error_on_next_run() {
        let mut backend = FakeMediaBackend::new(2.0, 2.0);
        backend.recorder_fails = true;
        let (mut orchestrator, _) =
            orchestrator(&backend, recognizer("Hello", 1), translator(1), synthesizer(1));

        let err = orchestrator.run(request("swahili")).await.unwrap_err();
        assert!(matches!(err, DubError::Recombination(_)));
        assert_eq!(orchestrator.state().percent, 90);

        let err = orchestrator.run(request("english")).await.unwrap_err();
        assert!(matches!(err, DubError::Validation(_)));
        assert_eq!(
            orchestrator.state().last_error.as_deref(),
            Some("Validation error: Source and target languages must be different")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_video_terminates_within_fallback() {
        let mut backend = FakeMediaBackend::new(4.0, 3.0);
        backend.video_stalls_at = Some(1.0);
        let (mut orchestrator, _) =
            orchestrator(&backend, recognizer("Hello", 1), translator(1), synthesizer(1));

        let started = Instant::now();
        let output = orchestrator.run(request("swahili")).await.unwrap();

        // Extraction runs for the source duration, recombination for at most duration + 2 s
        assert!(started.elapsed() <= Duration::from_millis(4_000 + 6_100));
        assert!(output.output_duration.seconds() <= 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_handle_stops_current_run() {
        let backend = FakeMediaBackend::new(30.0, 30.0);
        let (mut orchestrator, _) =
            orchestrator(&backend, recognizer("unused", 0), translator(0), synthesizer(0));

        let handle = orchestrator.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        });

        let err = orchestrator.run(request("swahili")).await.unwrap_err();

        assert!(matches!(err, DubError::Extraction(ref msg) if msg == "cancelled"));
        assert_eq!(orchestrator.state().stage, PipelineStage::Failed);
        assert_eq!(backend.stats.released(), backend.stats.opened());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_leaves_failed_state() {
        let backend = FakeMediaBackend::new(30.0, 30.0);
        let (mut orchestrator, observer) =
            orchestrator(&backend, recognizer("unused", 0), translator(0), synthesizer(0));

        let run = orchestrator.run(request("swahili"));
        let abandoned = tokio::time::timeout(Duration::from_secs(1), run).await;
        assert!(abandoned.is_err());

        let state = orchestrator.state();
        assert_eq!(state.stage, PipelineStage::Failed);
        assert_eq!(state.percent, 20);
        assert_eq!(state.last_error.as_deref(), Some("run interrupted"));
        assert_eq!(observer.reports().last().unwrap().stage, PipelineStage::Failed);
        assert_eq!(backend.stats.released(), backend.stats.opened());

        // The orchestrator accepts a new run afterwards
        assert!(orchestrator.state().stage.accepts_new_run());
    }
}
