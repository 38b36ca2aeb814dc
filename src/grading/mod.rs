//! # Grading Module
//!
//! Turn a recorded take into a [`GradingResults`] report.
//!
//! ## Purpose
//! The pipeline sends the take, a MusicXML re-encoding of the exercise and
//! the exercise metadata to an external evaluator and normalizes its
//! 0-100 scores. Grading never fails the caller: when the evaluator is
//! missing, slow or broken, a [`SyntheticEvaluator`] produces a bounded
//! random report tagged [`GradingSource::Offline`].
//!
//! ## Sub-modules
//! - `evaluator` - [`Evaluator`] trait and the wire types
//! - `remote` - [`RemoteEvaluator`] over an HTTP [`Transport`]
//! - `synthetic` - [`SyntheticEvaluator`], the offline stand-in
//! - `pipeline` - [`GradingPipeline`], fallback policy and diagnostics
//! - `store` - [`ScoreStore`] persistence of one record per attempt
//!
//! ## Letter Grades
//!
//! | Overall | Letter | Overall | Letter |
//! |---------|--------|---------|--------|
//! | ≥ 97 | A+ | ≥ 77 | C+ |
//! | ≥ 93 | A  | ≥ 73 | C  |
//! | ≥ 90 | A- | ≥ 70 | C- |
//! | ≥ 87 | B+ | ≥ 67 | D+ |
//! | ≥ 83 | B  | ≥ 63 | D  |
//! | ≥ 80 | B- | ≥ 60 | D- |
//! |      |    | < 60 | F  |

mod evaluator;
mod pipeline;
mod remote;
mod store;
mod synthetic;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use evaluator::{
    Assessment, DebugTrace, EvaluationRequest, EvaluationResponse, Evaluator, ExerciseMetadata,
};
pub use pipeline::{
    GradingPipeline, DURATION_TOLERANCE_PCT, ONSET_TOLERANCE_MS, PITCH_TOLERANCE_CENTS,
};
pub use remote::{HttpTransport, RemoteEvaluator, Transport};
pub use store::{JsonlScoreStore, ScoreRecord, ScoreStore};
pub use synthetic::SyntheticEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D+")]
    DPlus,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D-")]
    DMinus,
    #[serde(rename = "F")]
    F,
}

impl LetterGrade {
    const BREAKPOINTS: [(f64, LetterGrade); 12] = [
        (97.0, LetterGrade::APlus),
        (93.0, LetterGrade::A),
        (90.0, LetterGrade::AMinus),
        (87.0, LetterGrade::BPlus),
        (83.0, LetterGrade::B),
        (80.0, LetterGrade::BMinus),
        (77.0, LetterGrade::CPlus),
        (73.0, LetterGrade::C),
        (70.0, LetterGrade::CMinus),
        (67.0, LetterGrade::DPlus),
        (63.0, LetterGrade::D),
        (60.0, LetterGrade::DMinus),
    ];

    /// Letter for an overall fraction in `[0, 1]`.
    ///
    /// # Example
    /// ```rust
    /// use sightsing::grading::LetterGrade;
    ///
    /// assert_eq!(LetterGrade::from_fraction(0.95), LetterGrade::A);
    /// assert_eq!(LetterGrade::from_fraction(0.85), LetterGrade::B);
    /// assert_eq!(LetterGrade::from_fraction(0.55), LetterGrade::F);
    /// ```
    pub fn from_fraction(overall: f64) -> Self {
        // Round away representation noise so 0.9 lands on the 90 breakpoint
        let percent = (overall * 100.0 * 1e6).round() / 1e6;
        Self::BREAKPOINTS
            .iter()
            .find(|(min, _)| percent >= *min)
            .map(|(_, letter)| *letter)
            .unwrap_or(LetterGrade::F)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::APlus => "A+",
            LetterGrade::A => "A",
            LetterGrade::AMinus => "A-",
            LetterGrade::BPlus => "B+",
            LetterGrade::B => "B",
            LetterGrade::BMinus => "B-",
            LetterGrade::CPlus => "C+",
            LetterGrade::C => "C",
            LetterGrade::CMinus => "C-",
            LetterGrade::DPlus => "D+",
            LetterGrade::D => "D",
            LetterGrade::DMinus => "D-",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a report's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradingSource {
    /// The external evaluator scored the take.
    Evaluator,
    /// The synthetic stand-in; numbers are not derived from the audio.
    Offline,
}

impl fmt::Display for GradingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradingSource::Evaluator => f.write_str("evaluator"),
            GradingSource::Offline => f.write_str("offline"),
        }
    }
}

/// Per-note comparison against the expected timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDiagnostic {
    pub index: usize,
    /// Positive when the note started late.
    pub onset_err_ms: f64,
    /// Positive when the note was held too long.
    pub dur_err_pct: f64,
    /// Positive when sharp.
    pub pitch_err_cents: f64,
    pub ok: bool,
    /// False when nothing in the take could be matched to this note.
    pub detected: bool,
}

impl NoteDiagnostic {
    /// Build a diagnostic whose `ok` flag follows the tolerances.
    pub fn measured(index: usize, onset_err_ms: f64, dur_err_pct: f64, pitch_err_cents: f64) -> Self {
        let ok = onset_err_ms.abs() <= ONSET_TOLERANCE_MS
            && dur_err_pct.abs() <= DURATION_TOLERANCE_PCT
            && pitch_err_cents.abs() <= PITCH_TOLERANCE_CENTS;
        Self {
            index,
            onset_err_ms,
            dur_err_pct,
            pitch_err_cents,
            ok,
            detected: true,
        }
    }

    pub fn missed(index: usize) -> Self {
        Self {
            index,
            onset_err_ms: 0.0,
            dur_err_pct: -100.0,
            pitch_err_cents: 0.0,
            ok: false,
            detected: false,
        }
    }
}

/// One graded attempt. Accuracies are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResults {
    pub pitch_acc: f64,
    pub rhythm_acc: f64,
    pub rest_acc: f64,
    pub overall: f64,
    pub letter: LetterGrade,
    pub per_note: Vec<NoteDiagnostic>,
    pub source: GradingSource,
}

impl GradingResults {
    pub fn is_offline(&self) -> bool {
        self.source == GradingSource::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_breakpoints() {
        let cases = [
            (1.0, LetterGrade::APlus),
            (0.97, LetterGrade::APlus),
            (0.95, LetterGrade::A),
            (0.93, LetterGrade::A),
            (0.9, LetterGrade::AMinus),
            (0.89, LetterGrade::BPlus),
            (0.85, LetterGrade::B),
            (0.8, LetterGrade::BMinus),
            (0.77, LetterGrade::CPlus),
            (0.7, LetterGrade::CMinus),
            (0.65, LetterGrade::D),
            (0.6, LetterGrade::DMinus),
            (0.599, LetterGrade::F),
            (0.55, LetterGrade::F),
            (0.0, LetterGrade::F),
        ];
        for (overall, letter) in cases {
            assert_eq!(LetterGrade::from_fraction(overall), letter, "overall {}", overall);
        }
    }

    #[test]
    fn test_letter_serializes_as_symbol() {
        assert_eq!(serde_json::to_string(&LetterGrade::AMinus).unwrap(), "\"A-\"");
        assert_eq!(LetterGrade::BPlus.to_string(), "B+");
    }

    #[test]
    fn test_measured_diagnostic_tolerances() {
        assert!(NoteDiagnostic::measured(0, 79.0, -19.0, 34.0).ok);
        assert!(!NoteDiagnostic::measured(1, 81.0, 0.0, 0.0).ok);
        assert!(!NoteDiagnostic::measured(2, 0.0, 0.0, -36.0).ok);
        assert!(!NoteDiagnostic::missed(3).ok);
    }

    #[test]
    fn test_results_json_shape() {
        let results = GradingResults {
            pitch_acc: 0.9,
            rhythm_acc: 0.8,
            rest_acc: 0.7,
            overall: 0.8,
            letter: LetterGrade::BMinus,
            per_note: vec![NoteDiagnostic::measured(0, 10.0, 5.0, -3.0)],
            source: GradingSource::Offline,
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["pitchAcc"], 0.9);
        assert_eq!(json["letter"], "B-");
        assert_eq!(json["source"], "offline");
        assert_eq!(json["perNote"][0]["onsetErrMs"], 10.0);
        assert_eq!(json["perNote"][0]["ok"], true);
    }
}
