//! Pitch names and equal-temperament frequency math (A4 = 440 Hz).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pitch letter names A through G.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Step {
    #[default]
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::C,
        Step::D,
        Step::E,
        Step::F,
        Step::G,
        Step::A,
        Step::B,
    ];

    /// Parse a single letter (case-insensitive, surrounding whitespace ignored).
    pub fn from_letter(s: &str) -> Option<Self> {
        match s.trim() {
            "C" | "c" => Some(Step::C),
            "D" | "d" => Some(Step::D),
            "E" | "e" => Some(Step::E),
            "F" | "f" => Some(Step::F),
            "G" | "g" => Some(Step::G),
            "A" | "a" => Some(Step::A),
            "B" | "b" => Some(Step::B),
            _ => None,
        }
    }

    /// Frequency of the natural letter in octave 4.
    pub fn base_frequency(self) -> f64 {
        match self {
            Step::C => 261.63,
            Step::D => 293.66,
            Step::E => 329.63,
            Step::F => 349.23,
            Step::G => 392.00,
            Step::A => 440.00,
            Step::B => 493.88,
        }
    }

    /// Semitones above C for the natural letter.
    pub fn semitone(self) -> i32 {
        match self {
            Step::C => 0,
            Step::D => 2,
            Step::E => 4,
            Step::F => 5,
            Step::G => 7,
            Step::A => 9,
            Step::B => 11,
        }
    }

    /// Position within the C-to-B letter cycle.
    pub fn index(self) -> usize {
        match self {
            Step::C => 0,
            Step::D => 1,
            Step::E => 2,
            Step::F => 3,
            Step::G => 4,
            Step::A => 5,
            Step::B => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 7]
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::C => "C",
            Step::D => "D",
            Step::E => "E",
            Step::F => "F",
            Step::G => "G",
            Step::A => "A",
            Step::B => "B",
        };
        f.write_str(s)
    }
}

/// Frequency in Hz for a notated pitch.
///
/// `alter` is in semitones (MusicXML allows fractional microtonal values).
///
/// # Example
/// ```rust
/// use sightsing::pitch::{frequency, Step};
///
/// assert!((frequency(Step::A, 4, 0.0) - 440.0).abs() < 0.01);
/// assert!((frequency(Step::C, 4, 1.0) - 277.18).abs() < 0.01);
/// ```
pub fn frequency(step: Step, octave: i32, alter: f64) -> f64 {
    step.base_frequency() * 2f64.powi(octave - 4) * 2f64.powf(alter / 12.0)
}

/// Interval between two frequencies in cents (positive when `actual` is sharp).
pub fn cents_between(expected_hz: f64, actual_hz: f64) -> f64 {
    1200.0 * (actual_hz / expected_hz).log2()
}

/// MIDI note number for a notated pitch (C4 = 60), ignoring fractional alters.
pub fn midi_number(step: Step, octave: i32, alter: f64) -> i32 {
    (octave + 1) * 12 + step.semitone() + alter.round() as i32
}

/// Parse scientific pitch notation such as `C4`, `F#3` or `Bb5`.
///
/// Returns `(step, alter, octave)`.
pub fn parse_pitch_name(s: &str) -> Option<(Step, i32, i32)> {
    let s = s.trim();
    let mut chars = s.chars();
    let step = Step::from_letter(&chars.next()?.to_string())?;
    let rest: String = chars.collect();
    let (alter, octave_str) = if let Some(r) = rest.strip_prefix("##") {
        (2, r)
    } else if let Some(r) = rest.strip_prefix('#') {
        (1, r)
    } else if let Some(r) = rest.strip_prefix("bb") {
        (-2, r)
    } else if let Some(r) = rest.strip_prefix('b') {
        (-1, r)
    } else {
        (0, rest.as_str())
    };
    let octave = octave_str.parse().ok()?;
    Some((step, alter, octave))
}
