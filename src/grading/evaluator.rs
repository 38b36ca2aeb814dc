//! Evaluator seam and the wire types exchanged with the evaluation service.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::SightSingError;
use crate::exercise::ExerciseScore;
use crate::musicxml::exercise_to_musicxml;
use crate::recorder::Recording;

use super::NoteDiagnostic;

/// Seconds between `f0` frames when the service does not say.
const DEFAULT_FRAME_SECONDS: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseMetadata {
    pub bpm: f64,
    /// e.g. `C major`
    pub key_signature: String,
    /// e.g. `4/4`
    pub time_signature: String,
    pub expected_notes: usize,
}

impl ExerciseMetadata {
    pub fn for_exercise(exercise: &ExerciseScore, bpm: f64) -> Self {
        Self {
            bpm,
            key_signature: exercise.key_signature_label(),
            time_signature: exercise.time_signature_label(),
            expected_notes: exercise.expected_note_count(),
        }
    }
}

/// Body posted to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Base64 of a 16-bit mono WAV file.
    #[serde(rename = "audioData")]
    pub audio_data: String,
    #[serde(rename = "musicXML")]
    pub music_xml: String,
    #[serde(rename = "exerciseMetadata")]
    pub exercise_metadata: ExerciseMetadata,
}

impl EvaluationRequest {
    pub fn build(
        recording: &Recording,
        exercise: &ExerciseScore,
        bpm: f64,
    ) -> Result<Self, SightSingError> {
        Self::for_score(recording, exercise, &exercise_to_musicxml(exercise), bpm)
    }

    /// A request carrying `music_xml` as written rather than re-encoding
    /// the exercise.
    pub fn for_score(
        recording: &Recording,
        exercise: &ExerciseScore,
        music_xml: &str,
        bpm: f64,
    ) -> Result<Self, SightSingError> {
        let wav = recording.to_wav_bytes()?;
        Ok(Self {
            audio_data: STANDARD.encode(wav),
            music_xml: music_xml.to_string(),
            exercise_metadata: ExerciseMetadata::for_exercise(exercise, bpm),
        })
    }

    /// Score and metadata only, for evaluators that never listen.
    pub fn without_audio(exercise: &ExerciseScore, music_xml: &str, bpm: f64) -> Self {
        Self {
            audio_data: String::new(),
            music_xml: music_xml.to_string(),
            exercise_metadata: ExerciseMetadata::for_exercise(exercise, bpm),
        }
    }

    /// Decode `audio_data` back into WAV bytes.
    pub fn audio_bytes(&self) -> Result<Vec<u8>, SightSingError> {
        STANDARD
            .decode(&self.audio_data)
            .map_err(|e| SightSingError::Encoding(e.to_string()))
    }
}

/// Scores on a 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub pitch_accuracy: f64,
    pub rhythm_accuracy: f64,
    pub timing_accuracy: f64,
    pub overall_score: f64,
}

/// Raw analysis the service may return alongside the scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTrace {
    /// Detected note onsets, seconds from the start of the take.
    #[serde(default)]
    pub onsets: Vec<f64>,
    /// Fundamental frequency per frame in Hz; zero or negative when unvoiced.
    #[serde(default)]
    pub f0: Vec<f64>,
    #[serde(default = "default_frame_seconds")]
    pub frame_seconds: f64,
}

fn default_frame_seconds() -> f64 {
    DEFAULT_FRAME_SECONDS
}

impl DebugTrace {
    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty() && self.f0.is_empty()
    }

    /// Frame spacing, guarded against zero or garbage values.
    pub fn frame(&self) -> f64 {
        if self.frame_seconds.is_finite() && self.frame_seconds > 0.0 {
            self.frame_seconds
        } else {
            DEFAULT_FRAME_SECONDS
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub assessment: Assessment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugTrace>,
    /// Per-note results, when the evaluator judges notes itself.
    #[serde(default, rename = "perNote", skip_serializing_if = "Vec::is_empty")]
    pub per_note: Vec<NoteDiagnostic>,
}

impl EvaluationResponse {
    pub fn new(assessment: Assessment) -> Self {
        Self {
            assessment,
            debug: None,
            per_note: Vec::new(),
        }
    }

    pub fn with_debug(mut self, trace: DebugTrace) -> Self {
        self.debug = Some(trace);
        self
    }
}

/// Something that scores a take.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse, SightSingError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exercise::{generate_exercise, ExerciseParams};

    #[test]
    fn test_request_wire_names() {
        let exercise = generate_exercise(&ExerciseParams::default(), 3).unwrap();
        let recording = Recording::new(vec![0.0; 800], 8_000);
        let request = EvaluationRequest::build(&recording, &exercise, 96.0).unwrap();

        let json = serde_json::to_value(&request).unwrap();
        assert!(json["audioData"].as_str().unwrap().starts_with("UklGR"));
        assert!(json["musicXML"].as_str().unwrap().contains("<score-partwise"));
        assert_eq!(json["exerciseMetadata"]["bpm"], 96.0);
        assert_eq!(json["exerciseMetadata"]["keySignature"], "C major");
        assert_eq!(json["exerciseMetadata"]["timeSignature"], "4/4");
        assert_eq!(json["exerciseMetadata"]["expectedNotes"], 16);

        let wav = request.audio_bytes().unwrap();
        assert_eq!(&wav[..4], b"RIFF");
    }

    #[test]
    fn test_response_without_debug() {
        let body = r#"{"assessment":{"pitchAccuracy":91,"rhythmAccuracy":84.5,"timingAccuracy":70,"overallScore":82}}"#;
        let response: EvaluationResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.assessment.rhythm_accuracy, 84.5);
        assert!(response.debug.is_none());
        assert!(response.per_note.is_empty());
    }

    #[test]
    fn test_response_with_per_note() {
        let body = r#"{"assessment":{"pitchAccuracy":80,"rhythmAccuracy":80,"timingAccuracy":80,"overallScore":80},
            "perNote":[{"index":0,"onsetErrMs":12.0,"durErrPct":-5.0,"pitchErrCents":8.0,"ok":true,"detected":true}]}"#;
        let response: EvaluationResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.per_note.len(), 1);
        assert!(response.per_note[0].ok);
    }

    #[test]
    fn test_request_keeps_score_text() {
        let exercise = generate_exercise(&ExerciseParams::default(), 3).unwrap();
        let recording = Recording::new(vec![0.0; 80], 8_000);
        let xml = "<score-partwise><!-- as uploaded --></score-partwise>";
        let request = EvaluationRequest::for_score(&recording, &exercise, xml, 100.0).unwrap();
        assert_eq!(request.music_xml, xml);
        assert_eq!(request.exercise_metadata.expected_notes, 16);

        let bare = EvaluationRequest::without_audio(&exercise, xml, 100.0);
        assert!(bare.audio_data.is_empty());
        assert_eq!(bare.exercise_metadata, request.exercise_metadata);
    }

    #[test]
    fn test_debug_trace_defaults_frame() {
        let body = r#"{"assessment":{"pitchAccuracy":1,"rhythmAccuracy":1,"timingAccuracy":1,"overallScore":1},"debug":{"onsets":[0.5]}}"#;
        let response: EvaluationResponse = serde_json::from_str(body).unwrap();
        let trace = response.debug.unwrap();
        assert_eq!(trace.onsets, vec![0.5]);
        assert!(trace.f0.is_empty());
        assert_eq!(trace.frame(), DEFAULT_FRAME_SECONDS);
    }
}
