pub mod audio;
pub mod config;
pub mod error;
pub mod exercise;
pub mod export;
pub mod grading;
pub mod metronome;
pub mod musicxml;
pub mod pitch;
pub mod playback;
pub mod recorder;
pub mod score;
pub mod session;

pub use error::*;
pub use musicxml::{parse, parse_with_warnings};
pub use score::{ParsedMeasure, ParsedNote, ParsedScore, TimeSignature};

/// Re-time an exercise at a tempo, the way playback and grading see it.
/// The exercise is encoded to MusicXML and parsed back.
pub fn time_exercise(exercise: &exercise::ExerciseScore, tempo: f64) -> ParsedScore {
    parse(&musicxml::exercise_to_musicxml(exercise), tempo)
}
