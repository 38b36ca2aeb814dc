//! # Parsed Score Types
//!
//! Absolute, time-stamped note data produced by the MusicXML parser and
//! consumed by the playback scheduler and the grading pipeline.
//!
//! ## Type Hierarchy
//! ```text
//! ParsedScore
//!   ├── tempo (quarter notes per minute)
//!   ├── time_signature: TimeSignature { beats, beat_type }
//!   ├── total_duration (seconds, latest note end)
//!   └── Vec<ParsedMeasure>
//!         ├── number (1-based, as notated)
//!         └── Vec<ParsedNote> (all parts flattened, document order)
//!               ├── step / octave / alter / frequency
//!               └── start_time / duration (seconds, count-in excluded)
//! ```
//!
//! A `ParsedScore` is built once and never mutated; loading a new exercise
//! replaces it wholesale.

use serde::{Deserialize, Serialize};

use crate::pitch::{frequency, Step};

/// Tempo used when a caller passes an unusable value.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSignature {
    pub beats: u32,
    pub beat_type: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
        }
    }
}

impl TimeSignature {
    /// Length of one measure in quarter notes.
    pub fn quarters_per_measure(&self) -> f64 {
        self.beats as f64 * (4.0 / self.beat_type as f64)
    }
}

/// One sounding pitch event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedNote {
    pub step: Step,
    pub octave: i32,
    pub alter: f64,
    pub frequency: f64,
    /// Seconds.
    pub duration: f64,
    /// Seconds from the start of the musical content.
    pub start_time: f64,
    /// Index of the `<part>` this note came from.
    pub part: usize,
}

impl ParsedNote {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMeasure {
    pub number: u32,
    pub notes: Vec<ParsedNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedScore {
    pub measures: Vec<ParsedMeasure>,
    pub tempo: f64,
    pub time_signature: TimeSignature,
    pub total_duration: f64,
}

impl ParsedScore {
    /// Build a score and derive `total_duration` from the latest note end.
    pub fn new(measures: Vec<ParsedMeasure>, tempo: f64, time_signature: TimeSignature) -> Self {
        let total_duration = measures
            .iter()
            .flat_map(|m| m.notes.iter())
            .map(ParsedNote::end_time)
            .fold(0.0, f64::max);
        Self {
            measures,
            tempo,
            time_signature,
            total_duration,
        }
    }

    /// The deterministic score used when the input cannot be read:
    /// C4 D4 E4 F4 as quarter notes at 120 BPM in one 4/4 measure.
    pub fn fallback() -> Self {
        let quarter = 60.0 / DEFAULT_TEMPO;
        let notes = [Step::C, Step::D, Step::E, Step::F]
            .iter()
            .enumerate()
            .map(|(i, &step)| ParsedNote {
                step,
                octave: 4,
                alter: 0.0,
                frequency: frequency(step, 4, 0.0),
                duration: quarter,
                start_time: i as f64 * quarter,
                part: 0,
            })
            .collect();
        Self::new(
            vec![ParsedMeasure { number: 1, notes }],
            DEFAULT_TEMPO,
            TimeSignature::default(),
        )
    }

    /// Seconds per quarter note, also the click interval.
    pub fn seconds_per_quarter(&self) -> f64 {
        60.0 / self.tempo
    }

    /// Length of the count-in: `beats` clicks, one per quarter.
    pub fn intro_duration(&self) -> f64 {
        self.time_signature.beats as f64 * self.seconds_per_quarter()
    }

    /// All notes in temporal order of their measures.
    pub fn notes(&self) -> impl Iterator<Item = &ParsedNote> {
        self.measures.iter().flat_map(|m| m.notes.iter())
    }

    pub fn note_count(&self) -> usize {
        self.measures.iter().map(|m| m.notes.len()).sum()
    }
}
