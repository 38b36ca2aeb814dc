//! Grading pipeline: evaluate, fall back, normalize, diagnose, persist.

use std::time::Duration;

use crate::config::PracticeConfig;
use crate::error::SightSingError;
use crate::exercise::ExerciseScore;
use crate::musicxml::{exercise_to_musicxml, parse};
use crate::pitch::cents_between;
use crate::recorder::Recording;
use crate::score::{ParsedNote, ParsedScore};

use super::evaluator::{Assessment, DebugTrace, EvaluationRequest, EvaluationResponse, Evaluator};
use super::remote::RemoteEvaluator;
use super::store::{JsonlScoreStore, ScoreRecord, ScoreStore};
use super::synthetic::SyntheticEvaluator;
use super::{GradingResults, GradingSource, LetterGrade, NoteDiagnostic};

pub const ONSET_TOLERANCE_MS: f64 = 80.0;
pub const DURATION_TOLERANCE_PCT: f64 = 20.0;
pub const PITCH_TOLERANCE_CENTS: f64 = 35.0;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Scores a take. Never fails; see the module docs for the fallback policy.
pub struct GradingPipeline {
    primary: Option<Box<dyn Evaluator>>,
    fallback: Box<dyn Evaluator>,
    store: Option<Box<dyn ScoreStore>>,
    timeout: Duration,
    count_in: bool,
}

impl GradingPipeline {
    pub fn new(primary: Option<Box<dyn Evaluator>>) -> Self {
        Self {
            primary,
            fallback: Box::new(SyntheticEvaluator::new()),
            store: None,
            timeout: DEFAULT_TIMEOUT,
            count_in: true,
        }
    }

    /// A pipeline that always grades with the synthetic evaluator.
    pub fn offline() -> Self {
        Self::new(None)
    }

    /// Remote evaluator and score log as configured. An evaluator that
    /// cannot be built leaves the pipeline offline.
    pub fn from_config(config: &PracticeConfig) -> Self {
        let mut pipeline = Self::configured_offline(config);
        if config.evaluator.base_url.is_some() {
            match RemoteEvaluator::from_settings(&config.evaluator) {
                Ok(remote) => pipeline.primary = Some(Box::new(remote)),
                Err(e) => log::warn!("evaluator disabled: {}", e),
            }
        }
        pipeline
    }

    /// Configured score log and count-in, but never the remote evaluator.
    pub fn configured_offline(config: &PracticeConfig) -> Self {
        let mut pipeline = Self::offline()
            .with_timeout(Duration::from_secs(config.evaluator.timeout_secs))
            .with_count_in(config.count_in);
        if let Some(path) = &config.score_log {
            pipeline = pipeline.with_store(Box::new(JsonlScoreStore::new(path)));
        }
        pipeline
    }

    /// Evaluator used when the primary is missing, fails or times out.
    pub fn with_fallback(mut self, fallback: Box<dyn Evaluator>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_store(mut self, store: Box<dyn ScoreStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether takes begin at the start of the count-in measure.
    pub fn with_count_in(mut self, count_in: bool) -> Self {
        self.count_in = count_in;
        self
    }

    pub fn is_offline(&self) -> bool {
        self.primary.is_none()
    }

    /// Grade a take against a generated exercise.
    pub async fn grade_recording(
        &self,
        recording: &Recording,
        exercise: &ExerciseScore,
        bpm: f64,
    ) -> GradingResults {
        self.grade_against(recording, exercise, &exercise_to_musicxml(exercise), bpm)
            .await
    }

    /// Grade a take against `music_xml` as loaded. `exercise` supplies the
    /// metadata sent alongside it.
    pub async fn grade_against(
        &self,
        recording: &Recording,
        exercise: &ExerciseScore,
        music_xml: &str,
        bpm: f64,
    ) -> GradingResults {
        let encoded = EvaluationRequest::for_score(recording, exercise, music_xml, bpm);
        let primary = match &encoded {
            Ok(request) => self.evaluate_primary(request).await,
            Err(e) => Err(SightSingError::Encoding(format!("take not encodable: {}", e))),
        };
        let request = encoded
            .unwrap_or_else(|_| EvaluationRequest::without_audio(exercise, music_xml, bpm));

        let (response, source) = match primary {
            Ok(response) => (response, GradingSource::Evaluator),
            Err(e) => {
                if self.primary.is_some() {
                    log::warn!("evaluator unavailable, grading offline: {}", e);
                } else {
                    log::info!("no evaluator configured, grading offline");
                }
                (self.evaluate_fallback(&request).await, GradingSource::Offline)
            }
        };

        let expected = request.exercise_metadata.expected_notes;
        let assessment = &response.assessment;
        let overall = normalize(assessment.overall_score);
        let per_note = match &response.debug {
            Some(trace) if !trace.is_empty() && exercise.note_count() > 0 => {
                diagnose(trace, &parse(music_xml, bpm), self.count_in)
            }
            _ if response.per_note.len() == expected => response.per_note.clone(),
            _ => self.evaluate_fallback(&request).await.per_note,
        };

        let results = GradingResults {
            pitch_acc: normalize(assessment.pitch_accuracy),
            rhythm_acc: normalize(assessment.rhythm_accuracy),
            rest_acc: normalize(assessment.timing_accuracy),
            overall,
            letter: LetterGrade::from_fraction(overall),
            per_note,
            source,
        };
        log::info!(
            "graded take: {} ({:.0}%) via {}",
            results.letter,
            results.overall * 100.0,
            results.source
        );

        self.persist(&results).await;
        results
    }

    async fn evaluate_primary(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse, SightSingError> {
        let Some(primary) = &self.primary else {
            return Err(SightSingError::Evaluator("no evaluator configured".to_string()));
        };
        match tokio::time::timeout(self.timeout, primary.evaluate(request)).await {
            Ok(result) => result,
            Err(_) => Err(SightSingError::Evaluator(format!(
                "{} evaluator gave no answer within {:?}",
                primary.name(),
                self.timeout
            ))),
        }
    }

    /// Fallback scores with exactly one diagnostic per expected note.
    async fn evaluate_fallback(&self, request: &EvaluationRequest) -> EvaluationResponse {
        let expected = request.exercise_metadata.expected_notes;
        let mut response = match self.fallback.evaluate(request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("{} evaluator failed: {}", self.fallback.name(), e);
                EvaluationResponse::new(Assessment {
                    pitch_accuracy: 0.0,
                    rhythm_accuracy: 0.0,
                    timing_accuracy: 0.0,
                    overall_score: 0.0,
                })
            }
        };
        response.per_note.truncate(expected);
        for index in response.per_note.len()..expected {
            response.per_note.push(NoteDiagnostic::missed(index));
        }
        response
    }

    async fn persist(&self, results: &GradingResults) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&ScoreRecord::from_results(results)).await {
            log::error!("failed to save score: {}", e);
        }
    }
}

/// 0-100 to `[0, 1]`.
fn normalize(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    (score / 100.0).clamp(0.0, 1.0)
}

/// Compare the evaluator's trace against the timed score.
fn diagnose(trace: &DebugTrace, score: &ParsedScore, count_in: bool) -> Vec<NoteDiagnostic> {
    let offset = if count_in { score.intro_duration() } else { 0.0 };
    score
        .notes()
        .enumerate()
        .map(|(index, note)| diagnose_note(trace, index, note, offset + note.start_time))
        .collect()
}

fn diagnose_note(trace: &DebugTrace, index: usize, note: &ParsedNote, expected_onset: f64) -> NoteDiagnostic {
    let window = note.duration.max(0.25);
    let onset = trace
        .onsets
        .iter()
        .copied()
        .filter(|o| (o - expected_onset).abs() <= window)
        .min_by(|a, b| (a - expected_onset).abs().total_cmp(&(b - expected_onset).abs()));
    let Some(onset) = onset else {
        return NoteDiagnostic::missed(index);
    };

    let next_onset = trace
        .onsets
        .iter()
        .copied()
        .filter(|o| *o > onset + 1e-6)
        .fold(f64::INFINITY, f64::min);

    let (sung, pitch_err_cents) = if trace.f0.is_empty() {
        let sung = if next_onset.is_finite() {
            next_onset - onset
        } else {
            note.duration
        };
        (sung, 0.0)
    } else {
        let until = next_onset.min(onset + note.duration * 2.0);
        let frame = trace.frame();
        let voiced: Vec<(f64, f64)> = trace
            .f0
            .iter()
            .enumerate()
            .map(|(k, hz)| (k as f64 * frame, *hz))
            .filter(|(t, hz)| *t >= onset - frame / 2.0 && *t < until && *hz > 0.0)
            .collect();
        let Some(&(last, _)) = voiced.last() else {
            return NoteDiagnostic::missed(index);
        };
        let mut pitches: Vec<f64> = voiced.iter().map(|(_, hz)| *hz).collect();
        pitches.sort_by(f64::total_cmp);
        let median = pitches[pitches.len() / 2];
        (last + frame - onset, cents_between(note.frequency, median))
    };

    NoteDiagnostic::measured(
        index,
        (onset - expected_onset) * 1000.0,
        (sung - note.duration) / note.duration * 100.0,
        pitch_err_cents,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exercise::{generate_exercise, ExerciseParams};
    use crate::time_exercise;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct FixedEvaluator(EvaluationResponse);

    #[async_trait]
    impl Evaluator for FixedEvaluator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResponse, SightSingError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenEvaluator;

    #[async_trait]
    impl Evaluator for BrokenEvaluator {
        fn name(&self) -> &str {
            "broken"
        }

        async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResponse, SightSingError> {
            Err(SightSingError::Evaluator("HTTP 500".to_string()))
        }
    }

    struct SlowEvaluator;

    #[async_trait]
    impl Evaluator for SlowEvaluator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResponse, SightSingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(SightSingError::Evaluator("unreachable".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore(Arc<Mutex<Vec<ScoreRecord>>>);

    #[async_trait]
    impl ScoreStore for MemoryStore {
        async fn save(&self, record: &ScoreRecord) -> Result<(), SightSingError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ScoreStore for FailingStore {
        async fn save(&self, _: &ScoreRecord) -> Result<(), SightSingError> {
            Err(SightSingError::Persistence("disk full".to_string()))
        }
    }

    fn assessment(pitch: f64, rhythm: f64, timing: f64, overall: f64) -> Assessment {
        Assessment {
            pitch_accuracy: pitch,
            rhythm_accuracy: rhythm,
            timing_accuracy: timing,
            overall_score: overall,
        }
    }

    fn exercise() -> ExerciseScore {
        generate_exercise(&ExerciseParams::default(), 9).unwrap()
    }

    fn take() -> Recording {
        Recording::new(vec![0.0; 8_000], 8_000)
    }

    fn assert_offline_band(results: &GradingResults) {
        assert_eq!(results.source, GradingSource::Offline);
        for acc in [results.pitch_acc, results.rhythm_acc, results.rest_acc, results.overall] {
            assert!((0.6..=0.95).contains(&acc), "accuracy {} out of band", acc);
        }
    }

    #[tokio::test]
    async fn test_evaluator_scores_are_normalized() {
        let pipeline = GradingPipeline::new(Some(Box::new(FixedEvaluator(EvaluationResponse::new(assessment(95.0, 85.0, 75.0, 85.0))))))
        .with_fallback(Box::new(SyntheticEvaluator::with_seed(1)));

        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert_eq!(results.source, GradingSource::Evaluator);
        assert_eq!(results.pitch_acc, 0.95);
        assert_eq!(results.rhythm_acc, 0.85);
        assert_eq!(results.rest_acc, 0.75);
        assert_eq!(results.letter, LetterGrade::B);
        assert_eq!(results.per_note.len(), 16);
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_clamped() {
        let pipeline = GradingPipeline::new(Some(Box::new(FixedEvaluator(EvaluationResponse::new(assessment(130.0, -5.0, f64::NAN, 100.0))))));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert_eq!(results.pitch_acc, 1.0);
        assert_eq!(results.rhythm_acc, 0.0);
        assert_eq!(results.rest_acc, 0.0);
        assert_eq!(results.letter, LetterGrade::APlus);
    }

    #[tokio::test]
    async fn test_failing_evaluator_falls_back() {
        let pipeline = GradingPipeline::new(Some(Box::new(BrokenEvaluator)))
            .with_fallback(Box::new(SyntheticEvaluator::with_seed(4)));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert_offline_band(&results);
        assert_eq!(results.per_note.len(), 16);
        assert_eq!(results.letter, LetterGrade::from_fraction(results.overall));
    }

    #[tokio::test]
    async fn test_fallback_is_any_evaluator() {
        let pipeline = GradingPipeline::new(Some(Box::new(BrokenEvaluator))).with_fallback(Box::new(
            FixedEvaluator(EvaluationResponse::new(assessment(70.0, 70.0, 70.0, 70.0))),
        ));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert_eq!(results.source, GradingSource::Offline);
        assert_eq!(results.overall, 0.7);
        assert_eq!(results.letter, LetterGrade::CMinus);
        // The fixed fallback judges no notes, so every note is reported missed
        assert_eq!(results.per_note.len(), 16);
        assert!(results.per_note.iter().all(|n| !n.detected));
    }

    #[tokio::test]
    async fn test_failing_fallback_still_grades() {
        let pipeline = GradingPipeline::offline().with_fallback(Box::new(BrokenEvaluator));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert!(results.is_offline());
        assert_eq!(results.overall, 0.0);
        assert_eq!(results.letter, LetterGrade::F);
        assert_eq!(results.per_note.len(), 16);
    }

    #[tokio::test]
    async fn test_evaluator_per_note_is_used() {
        let mut response = EvaluationResponse::new(assessment(90.0, 90.0, 90.0, 90.0));
        response.per_note = (0..16).map(|i| NoteDiagnostic::measured(i, 5.0, 0.0, 0.0)).collect();
        let pipeline = GradingPipeline::new(Some(Box::new(FixedEvaluator(response))));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert!(results.per_note.iter().all(|n| n.onset_err_ms == 5.0 && n.ok));
    }

    #[tokio::test]
    async fn test_slow_evaluator_times_out() {
        let pipeline = GradingPipeline::new(Some(Box::new(SlowEvaluator)))
            .with_timeout(Duration::from_millis(20));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert_offline_band(&results);
    }

    #[tokio::test]
    async fn test_empty_exercise_expects_eight_notes() {
        let mut empty = exercise();
        for part in &mut empty.parts {
            part.measures.clear();
        }
        let results = GradingPipeline::offline()
            .grade_recording(&take(), &empty, 120.0)
            .await;
        assert_eq!(results.per_note.len(), 8);
    }

    #[tokio::test]
    async fn test_results_are_persisted() {
        let store = MemoryStore::default();
        let pipeline = GradingPipeline::new(Some(Box::new(FixedEvaluator(EvaluationResponse::new(assessment(90.0, 90.0, 90.0, 88.0))))))
        .with_store(Box::new(store.clone()));

        pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        let saved = store.0.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].score_value, 88);
        assert!(saved[0].notes.starts_with("B+ (evaluator)"));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_grading() {
        let pipeline = GradingPipeline::offline().with_store(Box::new(FailingStore));
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;
        assert!(results.is_offline());
    }

    #[tokio::test]
    async fn test_configured_offline_keeps_score_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("scores.jsonl");
        let config = PracticeConfig {
            score_log: Some(log_path.clone()),
            ..PracticeConfig::default()
        };

        let pipeline = GradingPipeline::configured_offline(&config);
        assert!(pipeline.is_offline());
        let results = pipeline.grade_recording(&take(), &exercise(), 120.0).await;

        let records = JsonlScoreStore::new(&log_path).records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], ScoreRecord::from_results(&results));
    }

    /// A trace of a singer hitting every note 20 ms late, exactly in tune.
    fn clean_trace(exercise: &ExerciseScore, offset: f64) -> DebugTrace {
        let score = time_exercise(exercise, 120.0);
        let notes: Vec<&ParsedNote> = score.notes().collect();
        let onsets: Vec<f64> = notes.iter().map(|n| offset + n.start_time + 0.02).collect();
        let frames = ((offset + score.total_duration + 0.5) / 0.01) as usize;
        let f0 = (0..frames)
            .map(|k| {
                let t = k as f64 * 0.01;
                notes
                    .iter()
                    .find(|n| {
                        let start = offset + n.start_time + 0.02;
                        t >= start && t < offset + n.start_time + 0.49
                    })
                    .map(|n| n.frequency)
                    .unwrap_or(0.0)
            })
            .collect();
        DebugTrace {
            onsets,
            f0,
            frame_seconds: 0.01,
        }
    }

    #[tokio::test]
    async fn test_trace_diagnostics_follow_count_in() {
        let exercise = exercise();
        let pipeline = GradingPipeline::new(Some(Box::new(FixedEvaluator(EvaluationResponse::new(assessment(90.0, 90.0, 90.0, 90.0)).with_debug(clean_trace(&exercise, 2.0))))));

        let results = pipeline.grade_recording(&take(), &exercise, 120.0).await;
        assert_eq!(results.per_note.len(), 16);
        for note in &results.per_note {
            assert!(note.detected);
            assert!((note.onset_err_ms - 20.0).abs() < 1.0, "{:?}", note);
            assert!(note.pitch_err_cents.abs() < 1.0, "{:?}", note);
            assert!(note.ok, "{:?}", note);
        }
    }

    #[tokio::test]
    async fn test_trace_without_count_in() {
        let exercise = exercise();
        let pipeline = GradingPipeline::new(Some(Box::new(FixedEvaluator(EvaluationResponse::new(assessment(90.0, 90.0, 90.0, 90.0)).with_debug(clean_trace(&exercise, 0.0))))))
        .with_count_in(false);

        let results = pipeline.grade_recording(&take(), &exercise, 120.0).await;
        assert!(results.per_note.iter().all(|n| n.ok));
    }

    #[test]
    fn test_missing_onset_is_missed() {
        let exercise = exercise();
        let trace = DebugTrace {
            onsets: vec![2.0],
            f0: Vec::new(),
            frame_seconds: 0.01,
        };
        let notes = diagnose(&trace, &time_exercise(&exercise, 120.0), true);
        assert!(notes[0].detected);
        assert!(!notes[15].detected);
        assert_eq!(notes[15].dur_err_pct, -100.0);
    }
}
