//! Offline stand-in evaluator.
//!
//! Produces bounded random scores so practice can continue without the
//! service. Nothing here listens to the audio.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::error::SightSingError;

use super::evaluator::{Assessment, EvaluationRequest, EvaluationResponse, Evaluator};
use super::NoteDiagnostic;

const SCORE_LOW: f64 = 60.0;
const SCORE_HIGH: f64 = 95.0;

pub struct SyntheticEvaluator {
    rng: Mutex<StdRng>,
}

impl Default for SyntheticEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticEvaluator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Each axis in `[60, 95]`; overall is their mean.
    pub fn assessment(&self) -> Assessment {
        self.with_rng(|rng| {
            let pitch = rng.random_range(SCORE_LOW..=SCORE_HIGH);
            let rhythm = rng.random_range(SCORE_LOW..=SCORE_HIGH);
            let timing = rng.random_range(SCORE_LOW..=SCORE_HIGH);
            Assessment {
                pitch_accuracy: pitch,
                rhythm_accuracy: rhythm,
                timing_accuracy: timing,
                overall_score: (pitch + rhythm + timing) / 3.0,
            }
        })
    }

    /// Plausible per-note errors, `ok` judged by the usual tolerances.
    pub fn per_note(&self, count: usize) -> Vec<NoteDiagnostic> {
        self.with_rng(|rng| {
            (0..count)
                .map(|index| {
                    NoteDiagnostic::measured(
                        index,
                        rng.random_range(-100.0..=100.0),
                        rng.random_range(-25.0..=25.0),
                        rng.random_range(-45.0..=45.0),
                    )
                })
                .collect()
        })
    }
}

#[async_trait]
impl Evaluator for SyntheticEvaluator {
    fn name(&self) -> &str {
        "synthetic"
    }

    /// Scores plus one diagnostic per expected note.
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse, SightSingError> {
        let mut response = EvaluationResponse::new(self.assessment());
        response.per_note = self.per_note(request.exercise_metadata.expected_notes);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_stay_in_band() {
        let synthetic = SyntheticEvaluator::with_seed(11);
        for _ in 0..200 {
            let a = synthetic.assessment();
            for score in [a.pitch_accuracy, a.rhythm_accuracy, a.timing_accuracy] {
                assert!((SCORE_LOW..=SCORE_HIGH).contains(&score));
            }
            let mean = (a.pitch_accuracy + a.rhythm_accuracy + a.timing_accuracy) / 3.0;
            assert!((a.overall_score - mean).abs() < 1e-9);
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = SyntheticEvaluator::with_seed(5).assessment();
        let b = SyntheticEvaluator::with_seed(5).assessment();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_evaluate_sizes_notes_from_metadata() {
        let exercise = crate::exercise::generate_exercise(&crate::exercise::ExerciseParams::default(), 6).unwrap();
        let request = EvaluationRequest::without_audio(&exercise, "", 120.0);
        let response = SyntheticEvaluator::with_seed(8).evaluate(&request).await.unwrap();
        assert_eq!(response.per_note.len(), 16);
        assert!(response.debug.is_none());
        assert!((SCORE_LOW..=SCORE_HIGH).contains(&response.assessment.overall_score));
    }

    #[test]
    fn test_per_note_sized_and_indexed() {
        let notes = SyntheticEvaluator::with_seed(2).per_note(8);
        assert_eq!(notes.len(), 8);
        assert!(notes.iter().enumerate().all(|(i, n)| n.index == i && n.detected));
    }
}
