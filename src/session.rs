//! # Practice Session
//!
//! Owns the exercise, the playback scheduler, the metronome, the recorder
//! and the grading pipeline, and keeps at most one of playback or
//! recording active.
//!
//! ## Ordering
//! - `play` stops the metronome and any recording first.
//! - `start_recording` stops playback and any running metronome first.
//! - The metronome follows the recorder through `RecorderEvent`s that the
//!   session drains on every call to `pump` and after each recorder
//!   transition.
//!
//! The scheduler and the metronome share one audio context, held in the
//! scheduler's [`AudioContextSlot`].

use crossbeam_channel::Receiver;

use crate::audio::{AudioContext, AudioContextSlot};
use crate::config::PracticeConfig;
use crate::error::SightSingError;
use crate::exercise::ExerciseScore;
use crate::grading::{GradingPipeline, GradingResults};
use crate::metronome::Metronome;
use crate::musicxml::{exercise_to_musicxml, parse, parse_with_warnings, ParseWarning};
use crate::playback::{PlaybackMode, PlaybackReport, PlaybackScheduler};
use crate::recorder::{CaptureSource, Recorder, RecorderEvent, Recording};
use crate::score::ParsedScore;

pub struct PracticeSession<C: AudioContext, S: CaptureSource> {
    config: PracticeConfig,
    tempo: f64,
    scheduler: PlaybackScheduler<C>,
    metronome: Metronome,
    recorder: Recorder<S>,
    events: Receiver<RecorderEvent>,
    grading: GradingPipeline,
    exercise: Option<ExerciseScore>,
    /// MusicXML the score is timed from, re-parsed on tempo changes.
    source_xml: Option<String>,
    score: Option<ParsedScore>,
    recording: Option<Recording>,
    results: Option<GradingResults>,
}

impl<C: AudioContext, S: CaptureSource> PracticeSession<C, S> {
    pub fn new(
        config: PracticeConfig,
        audio: AudioContextSlot<C>,
        source: S,
    ) -> Result<Self, SightSingError> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let metronome = Metronome::new(config.tempo, config.metronome.volume)?
            .with_sound(config.sounds.click)
            .with_enabled(config.metronome.enabled);
        Ok(Self {
            tempo: config.tempo,
            scheduler: PlaybackScheduler::new(audio),
            metronome,
            recorder: Recorder::new(source, tx),
            events: rx,
            grading: GradingPipeline::from_config(&config),
            exercise: None,
            source_xml: None,
            score: None,
            recording: None,
            results: None,
            config,
        })
    }

    pub fn with_grading(mut self, grading: GradingPipeline) -> Self {
        self.grading = grading;
        self
    }

    /// Replace the current exercise. Playback stops; the previous take and
    /// its grade are discarded.
    pub fn load_exercise(&mut self, exercise: ExerciseScore) {
        self.scheduler.stop();
        let xml = exercise_to_musicxml(&exercise);
        let score = parse(&xml, self.tempo);
        log::info!(
            "loaded exercise: {} in {}, {} notes over {:.2}s",
            exercise.key_signature_label(),
            exercise.time_signature_label(),
            score.note_count(),
            score.total_duration
        );
        self.install(exercise, xml, score);
    }

    /// Load MusicXML text, returning what the parser had to skip or repair.
    ///
    /// The text is kept as loaded: tempo changes re-parse it and grading
    /// sends it to the evaluator unchanged.
    pub fn load_musicxml(&mut self, xml: &str) -> Vec<ParseWarning> {
        self.scheduler.stop();
        let outcome = parse_with_warnings(xml, self.tempo);
        let exercise = ExerciseScore::from_parsed(&outcome.score);
        let source = if outcome.used_fallback {
            log::warn!("MusicXML unreadable, loaded the fallback score");
            exercise_to_musicxml(&exercise)
        } else {
            xml.to_string()
        };
        self.install(exercise, source, outcome.score);
        outcome.warnings
    }

    fn install(&mut self, exercise: ExerciseScore, source_xml: String, score: ParsedScore) {
        self.metronome.set_beats_per_measure(score.time_signature.beats);
        self.exercise = Some(exercise);
        self.source_xml = Some(source_xml);
        self.score = Some(score);
        self.recording = None;
        self.results = None;
    }

    pub fn exercise(&self) -> Option<&ExerciseScore> {
        self.exercise.as_ref()
    }

    pub fn score(&self) -> Option<&ParsedScore> {
        self.score.as_ref()
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn config(&self) -> &PracticeConfig {
        &self.config
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn last_recording(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    pub fn last_results(&self) -> Option<&GradingResults> {
        self.results.as_ref()
    }

    /// The shared audio context slot.
    pub fn audio_mut(&mut self) -> &mut AudioContextSlot<C> {
        self.scheduler.audio_mut()
    }

    /// Play the loaded exercise.
    pub async fn play(&mut self, mode: PlaybackMode) -> Result<PlaybackReport, SightSingError> {
        if self.score.is_none() {
            return Err(SightSingError::NoExercise);
        }
        self.stop_metronome();
        if self.recorder.is_recording() {
            log::info!("stopping the recording before playback");
            self.stop_recording().await?;
        }
        let Some(score) = self.score.as_ref() else {
            return Err(SightSingError::NoExercise);
        };
        self.scheduler.play_score(score, mode, &self.config.sounds)
    }

    /// Acquire the microphone and begin a take.
    pub async fn start_recording(&mut self) -> Result<(), SightSingError> {
        self.scheduler.stop();
        self.stop_metronome();
        self.recorder.start().await?;
        self.dispatch_events();
        Ok(())
    }

    /// Pull buffered input into the take.
    pub async fn capture(&mut self) -> Result<usize, SightSingError> {
        let captured = self.recorder.capture().await?;
        self.pump();
        Ok(captured)
    }

    pub async fn stop_recording(&mut self) -> Result<&Recording, SightSingError> {
        let recording = self.recorder.stop().await?;
        self.dispatch_events();
        self.results = None;
        Ok(self.recording.insert(recording))
    }

    /// Drive timers: recorder events, metronome look-ahead, playback.
    ///
    /// Returns whether playback is still running.
    pub fn pump(&mut self) -> bool {
        self.dispatch_events();
        if let Some(ctx) = self.scheduler.audio_mut().get_mut() {
            self.metronome.pump(ctx);
        }
        self.scheduler.poll()
    }

    /// Change the session tempo.
    ///
    /// A running metronome follows from its next unsounded beat. The loaded
    /// score is re-timed for the next `play`; a session already playing
    /// keeps its schedule.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), SightSingError> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(SightSingError::InvalidTempo(bpm));
        }
        if self.metronome.is_running() {
            if let Some(ctx) = self.scheduler.audio_mut().get_mut() {
                self.metronome.set_tempo(ctx, bpm)?;
            }
        } else {
            let (volume, enabled) = (self.metronome.volume(), self.metronome.is_enabled());
            self.metronome.configure(bpm, volume, enabled)?;
        }

        self.tempo = bpm;
        if let Some(xml) = &self.source_xml {
            self.score = Some(parse(xml, bpm));
        }
        log::info!("tempo set to {} BPM", bpm);
        Ok(())
    }

    pub fn set_metronome_volume(&mut self, volume: f64) -> Result<(), SightSingError> {
        if self.metronome.is_running() {
            if let Some(ctx) = self.scheduler.audio_mut().get_mut() {
                return self.metronome.set_volume(ctx, volume);
            }
        }
        let (tempo, enabled) = (self.metronome.tempo(), self.metronome.is_enabled());
        self.metronome.configure(tempo, volume, enabled)
    }

    pub fn set_metronome_enabled(&mut self, enabled: bool) -> Result<(), SightSingError> {
        if let Some(ctx) = self.scheduler.audio_mut().get_mut() {
            self.metronome.set_enabled(ctx, enabled);
            return Ok(());
        }
        let (tempo, volume) = (self.metronome.tempo(), self.metronome.volume());
        self.metronome.configure(tempo, volume, enabled)
    }

    /// Grade the last take against the loaded exercise.
    pub async fn grade(&mut self) -> Result<&GradingResults, SightSingError> {
        let (Some(exercise), Some(xml)) = (&self.exercise, &self.source_xml) else {
            return Err(SightSingError::NoExercise);
        };
        let recording = self
            .recording
            .as_ref()
            .filter(|r| !r.is_empty())
            .ok_or(SightSingError::NoRecording)?;
        let results = self
            .grading
            .grade_against(recording, exercise, xml, self.tempo)
            .await;
        Ok(self.results.insert(results))
    }

    /// Stop playback, the metronome and any recording.
    pub async fn stop_all(&mut self) -> Result<(), SightSingError> {
        self.scheduler.stop();
        self.stop_metronome();
        if self.recorder.is_recording() {
            self.stop_recording().await?;
        }
        Ok(())
    }

    /// Stop everything and release the audio context.
    pub async fn close(&mut self) -> Result<(), SightSingError> {
        self.stop_all().await?;
        self.scheduler.close();
        Ok(())
    }

    fn stop_metronome(&mut self) {
        if let Some(ctx) = self.scheduler.audio_mut().get_mut() {
            self.metronome.stop(ctx);
        }
    }

    fn dispatch_events(&mut self) {
        let events: Vec<RecorderEvent> = self.events.try_iter().collect();
        if events.is_empty() {
            return;
        }
        let starting = events
            .iter()
            .any(|e| matches!(e, RecorderEvent::Started { .. }));
        let wants_clicks = starting && self.metronome.is_enabled();
        let ctx = if wants_clicks {
            self.scheduler.audio_mut().acquire().map(Some)
        } else {
            Ok(self.scheduler.audio_mut().get_mut())
        };

        match ctx {
            Ok(Some(ctx)) => {
                for event in events {
                    self.metronome.handle_recorder_event(ctx, event);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("metronome unavailable while recording: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineContext;
    use crate::exercise::{generate_exercise, ExerciseParams};
    use crate::grading::{
        Assessment, EvaluationRequest, EvaluationResponse, Evaluator, GradingSource,
        SyntheticEvaluator,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    use crate::recorder::CaptureConstraints;

    /// A microphone delivering 100 ms of quiet signal per read.
    struct SteadySource;

    #[async_trait]
    impl CaptureSource for SteadySource {
        async fn open(&mut self, _: &CaptureConstraints) -> Result<u32, SightSingError> {
            Ok(8_000)
        }

        async fn read(&mut self) -> Result<Vec<f32>, SightSingError> {
            Ok(vec![0.05; 800])
        }

        async fn close(&mut self) {}
    }

    fn session_with(config: PracticeConfig) -> PracticeSession<OfflineContext, SteadySource> {
        PracticeSession::new(
            config,
            AudioContextSlot::new(|| Ok(OfflineContext::new(8_000))),
            SteadySource,
        )
        .unwrap()
        .with_grading(
            GradingPipeline::offline().with_fallback(Box::new(SyntheticEvaluator::with_seed(3))),
        )
    }

    fn session() -> PracticeSession<OfflineContext, SteadySource> {
        let mut session = session_with(PracticeConfig::default());
        session.load_exercise(generate_exercise(&ExerciseParams::default(), 8).unwrap());
        session
    }

    #[tokio::test]
    async fn test_play_requires_exercise() {
        let mut session = session_with(PracticeConfig::default());
        assert!(matches!(
            session.play(PlaybackMode::ClickAndScore).await,
            Err(SightSingError::NoExercise)
        ));
    }

    #[tokio::test]
    async fn test_play_loaded_exercise() {
        let mut session = session();
        assert_eq!(session.score().unwrap().total_duration, 8.0);
        let report = session.play(PlaybackMode::ClickAndScore).await.unwrap();
        assert_eq!(report.melody_offset, 2.0);
        assert_eq!(report.note_count, 16);
        assert!(session.is_playing());
    }

    #[tokio::test]
    async fn test_recording_stops_playback_and_starts_metronome() {
        let mut session = session();
        session.play(PlaybackMode::ClickAndScore).await.unwrap();

        session.start_recording().await.unwrap();
        assert!(!session.is_playing());
        assert!(session.is_recording());
        assert!(session.metronome().is_running());

        session.capture().await.unwrap();
        let recording = session.stop_recording().await.unwrap();
        assert_eq!(recording.samples.len(), 1_600);
        assert!(!session.metronome().is_running());
    }

    #[tokio::test]
    async fn test_play_stops_recording() {
        let mut session = session();
        session.start_recording().await.unwrap();
        session.play(PlaybackMode::PitchOnly).await.unwrap();
        assert!(!session.is_recording());
        assert!(!session.metronome().is_running());
        assert!(session.last_recording().is_some());
        assert!(session.is_playing());
    }

    #[tokio::test]
    async fn test_disabled_metronome_stays_silent() {
        let mut config = PracticeConfig::default();
        config.metronome.enabled = false;
        let mut session = session_with(config);
        session.load_exercise(generate_exercise(&ExerciseParams::default(), 8).unwrap());

        session.start_recording().await.unwrap();
        assert!(!session.metronome().is_running());
    }

    #[tokio::test]
    async fn test_grade_preconditions() {
        let mut empty = session_with(PracticeConfig::default());
        assert!(matches!(empty.grade().await, Err(SightSingError::NoExercise)));

        let mut session = session();
        assert!(matches!(session.grade().await, Err(SightSingError::NoRecording)));
    }

    #[tokio::test]
    async fn test_grade_last_take_offline() {
        let mut session = session();
        session.start_recording().await.unwrap();
        session.stop_recording().await.unwrap();

        let results = session.grade().await.unwrap();
        assert_eq!(results.source, GradingSource::Offline);
        assert_eq!(results.per_note.len(), 16);
        assert!(session.last_results().is_some());
    }

    #[tokio::test]
    async fn test_live_tempo_change() {
        let mut session = session();
        session.start_recording().await.unwrap();
        session.set_tempo(90.0).unwrap();

        assert!(session.metronome().is_running());
        assert_eq!(session.metronome().tempo(), 90.0);
        let score = session.score().unwrap();
        assert_eq!(score.tempo, 90.0);
        assert!((score.intro_duration() - 4.0 * 60.0 / 90.0).abs() < 1e-9);

        session.set_metronome_volume(0.6).unwrap();
        assert_eq!(session.metronome().volume(), 0.6);
        assert!(matches!(
            session.set_tempo(-1.0),
            Err(SightSingError::InvalidTempo(_))
        ));
    }

    #[tokio::test]
    async fn test_settings_before_any_audio() {
        let mut session = session();
        session.set_tempo(72.0).unwrap();
        session.set_metronome_enabled(false).unwrap();
        assert_eq!(session.metronome().tempo(), 72.0);
        assert!(!session.metronome().is_enabled());
    }

    #[tokio::test]
    async fn test_load_musicxml_reports_fallback() {
        let mut session = session_with(PracticeConfig::default());
        let warnings = session.load_musicxml("<score-partwise><part");
        assert!(!warnings.is_empty());
        assert_eq!(session.score().unwrap().note_count(), 4);
        assert_eq!(session.exercise().unwrap().note_count(), 4);
    }

    const TRIPLETS: &str = r#"<score-partwise><part id="P1"><measure number="1">
        <attributes><divisions>3</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>
        <note><pitch><step>C</step><octave>4</octave></pitch><duration>2</duration><time-modification><actual-notes>3</actual-notes><normal-notes>2</normal-notes></time-modification></note>
        <note><pitch><step>D</step><octave>4</octave></pitch><duration>2</duration><time-modification><actual-notes>3</actual-notes><normal-notes>2</normal-notes></time-modification></note>
        <note><pitch><step>E</step><octave>4</octave></pitch><duration>2</duration><time-modification><actual-notes>3</actual-notes><normal-notes>2</normal-notes></time-modification></note>
        <note><pitch><step>F</step><octave>4</octave></pitch><duration>6</duration></note>
        </measure></part></score-partwise>"#;

    #[tokio::test]
    async fn test_retiming_keeps_loaded_durations() {
        let mut session = session_with(PracticeConfig::default());
        session.load_musicxml(TRIPLETS);
        let before = session.score().unwrap().clone();
        assert_eq!(before.total_duration, 2.0);
        assert!((before.measures[0].notes[0].duration - 1.0 / 3.0).abs() < 1e-9);

        session.set_tempo(120.0).unwrap();
        assert_eq!(session.score().unwrap(), &before);

        session.set_tempo(60.0).unwrap();
        let slow = session.score().unwrap();
        assert!((slow.total_duration - 4.0).abs() < 1e-9);
        assert!((slow.measures[0].notes[1].start_time - 2.0 / 3.0).abs() < 1e-9);
        assert!((slow.measures[0].notes[3].start_time - 2.0).abs() < 1e-9);
    }

    /// Records what it was asked to grade.
    #[derive(Clone, Default)]
    struct CapturingEvaluator(Arc<Mutex<Vec<EvaluationRequest>>>);

    #[async_trait]
    impl Evaluator for CapturingEvaluator {
        fn name(&self) -> &str {
            "capturing"
        }

        async fn evaluate(
            &self,
            request: &EvaluationRequest,
        ) -> Result<EvaluationResponse, SightSingError> {
            self.0.lock().unwrap().push(request.clone());
            Ok(EvaluationResponse::new(Assessment {
                pitch_accuracy: 80.0,
                rhythm_accuracy: 80.0,
                timing_accuracy: 80.0,
                overall_score: 80.0,
            }))
        }
    }

    #[tokio::test]
    async fn test_grading_sends_loaded_musicxml() {
        let evaluator = CapturingEvaluator::default();
        let mut session = session_with(PracticeConfig::default())
            .with_grading(GradingPipeline::new(Some(Box::new(evaluator.clone()))));
        session.load_musicxml(TRIPLETS);
        session.start_recording().await.unwrap();
        session.capture().await.unwrap();
        session.stop_recording().await.unwrap();

        let results = session.grade().await.unwrap();
        assert_eq!(results.source, GradingSource::Evaluator);
        assert_eq!(results.per_note.len(), 4);

        let requests = evaluator.0.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].music_xml, TRIPLETS);
        assert_eq!(requests[0].exercise_metadata.expected_notes, 4);
    }

    #[tokio::test]
    async fn test_new_exercise_discards_take() {
        let mut session = session();
        session.start_recording().await.unwrap();
        session.stop_recording().await.unwrap();
        session.load_exercise(generate_exercise(&ExerciseParams::default(), 9).unwrap());
        assert!(session.last_recording().is_none());
    }

    #[tokio::test]
    async fn test_close_releases_audio() {
        let mut session = session();
        session.start_recording().await.unwrap();
        session.close().await.unwrap();
        assert!(!session.is_recording());
        assert!(session.audio_mut().get().is_none());
    }
}
