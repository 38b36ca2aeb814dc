//! # Exercise Model
//!
//! The structured exercise a session practices: key, meter, and parts made
//! of measures of note/rest events with symbolic durations. Exercises come
//! from the seeded generator below or from a parsed MusicXML file, and are
//! re-encoded to MusicXML (`musicxml::exercise_to_musicxml`) for the
//! evaluator.
//!
//! ## Example
//! ```rust
//! use sightsing::exercise::{generate_exercise, ExerciseParams};
//!
//! let exercise = generate_exercise(&ExerciseParams::default(), 7).unwrap();
//! assert_eq!(exercise.note_count(), 16);
//! assert_eq!(exercise.key_signature_label(), "C major");
//! assert_eq!(exercise.time_signature_label(), "4/4");
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SightSingError;
use crate::pitch::{frequency, midi_number, parse_pitch_name, Step};
use crate::score::{ParsedScore, TimeSignature};

/// Expected note count reported to the evaluator when an exercise has none.
pub const DEFAULT_EXPECTED_NOTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    #[default]
    Major,
    Minor,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Major => f.write_str("major"),
            KeyMode::Minor => f.write_str("minor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    /// Tonic spelling such as `C`, `F#` or `Bb`.
    pub tonic: String,
    #[serde(default)]
    pub mode: KeyMode,
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::new("C", KeyMode::Major)
    }
}

impl KeySpec {
    pub fn new(tonic: &str, mode: KeyMode) -> Self {
        Self {
            tonic: tonic.to_string(),
            mode,
        }
    }

    /// Tonic letter and alteration in semitones.
    pub fn tonic_pitch(&self) -> Option<(Step, i32)> {
        parse_pitch_name(&format!("{}4", self.tonic.trim())).map(|(step, alter, _)| (step, alter))
    }

    /// Key signature as a count of sharps (positive) or flats (negative).
    ///
    /// Returns `None` for keys that need more than seven accidentals.
    pub fn fifths(&self) -> Option<i32> {
        let (step, alter) = self.tonic_pitch()?;
        // Position of the natural letter on the line of fifths, C = 0
        let letter = match step {
            Step::F => -1,
            Step::C => 0,
            Step::G => 1,
            Step::D => 2,
            Step::A => 3,
            Step::E => 4,
            Step::B => 5,
        };
        let major = letter + alter * 7;
        let fifths = match self.mode {
            KeyMode::Major => major,
            KeyMode::Minor => major - 3,
        };
        (-7..=7).contains(&fifths).then_some(fifths)
    }

    /// The seven scale degrees spelled with one letter each, tonic first.
    pub fn scale(&self) -> Option<Vec<(Step, i32)>> {
        let (tonic, tonic_alter) = self.tonic_pitch()?;
        self.fifths()?;
        let intervals = match self.mode {
            KeyMode::Major => [0, 2, 4, 5, 7, 9, 11],
            KeyMode::Minor => [0, 2, 3, 5, 7, 8, 10],
        };
        Some(
            intervals
                .iter()
                .enumerate()
                .map(|(degree, interval)| {
                    let letter_index = tonic.index() + degree;
                    let step = Step::from_index(letter_index);
                    let natural = step.semitone() + if letter_index >= 7 { 12 } else { 0 };
                    let target = tonic.semitone() + tonic_alter + interval;
                    (step, target - natural)
                })
                .collect(),
        )
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.tonic.trim(), self.mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSpec {
    pub num: u32,
    pub den: u32,
}

impl Default for MeterSpec {
    fn default() -> Self {
        Self { num: 4, den: 4 }
    }
}

impl MeterSpec {
    pub fn label(&self) -> String {
        format!("{}/{}", self.num, self.den)
    }

    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature {
            beats: self.num,
            beat_type: self.den,
        }
    }
}

/// Singable range in scientific pitch notation, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub min: String,
    pub max: String,
}

impl Default for RangeSpec {
    fn default() -> Self {
        Self {
            min: "C4".to_string(),
            max: "C5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationKind {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl DurationKind {
    const ALL: [DurationKind; 5] = [
        DurationKind::Whole,
        DurationKind::Half,
        DurationKind::Quarter,
        DurationKind::Eighth,
        DurationKind::Sixteenth,
    ];

    /// Length in quarter notes.
    pub fn quarters(self) -> f64 {
        match self {
            DurationKind::Whole => 4.0,
            DurationKind::Half => 2.0,
            DurationKind::Quarter => 1.0,
            DurationKind::Eighth => 0.5,
            DurationKind::Sixteenth => 0.25,
        }
    }

    /// MusicXML `<type>` value.
    pub fn musicxml_type(self) -> &'static str {
        match self {
            DurationKind::Whole => "whole",
            DurationKind::Half => "half",
            DurationKind::Quarter => "quarter",
            DurationKind::Eighth => "eighth",
            DurationKind::Sixteenth => "16th",
        }
    }

    fn doubled(self) -> Option<Self> {
        match self {
            DurationKind::Whole => None,
            DurationKind::Half => Some(DurationKind::Whole),
            DurationKind::Quarter => Some(DurationKind::Half),
            DurationKind::Eighth => Some(DurationKind::Quarter),
            DurationKind::Sixteenth => Some(DurationKind::Eighth),
        }
    }

    fn halved(self) -> Option<Self> {
        match self {
            DurationKind::Whole => Some(DurationKind::Half),
            DurationKind::Half => Some(DurationKind::Quarter),
            DurationKind::Quarter => Some(DurationKind::Eighth),
            DurationKind::Eighth => Some(DurationKind::Sixteenth),
            DurationKind::Sixteenth => None,
        }
    }

    fn for_beat_type(beat_type: u32) -> Option<Self> {
        match beat_type {
            1 => Some(DurationKind::Whole),
            2 => Some(DurationKind::Half),
            4 => Some(DurationKind::Quarter),
            8 => Some(DurationKind::Eighth),
            16 => Some(DurationKind::Sixteenth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteValue {
    pub kind: DurationKind,
    #[serde(default)]
    pub dots: u8,
}

impl NoteValue {
    pub fn new(kind: DurationKind) -> Self {
        Self { kind, dots: 0 }
    }

    pub fn dotted(kind: DurationKind) -> Self {
        Self { kind, dots: 1 }
    }

    pub fn quarters(&self) -> f64 {
        self.kind.quarters() * (2.0 - 0.5f64.powi(self.dots as i32))
    }

    /// The plain or single-dotted value closest to a length in quarter notes.
    pub fn nearest(quarters: f64) -> Self {
        DurationKind::ALL
            .iter()
            .flat_map(|&kind| [Self::new(kind), Self::dotted(kind)])
            .min_by(|a, b| {
                (a.quarters() - quarters)
                    .abs()
                    .total_cmp(&(b.quarters() - quarters).abs())
            })
            .unwrap_or(Self::new(DurationKind::Quarter))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExercisePitch {
    pub step: Step,
    #[serde(default)]
    pub alter: i32,
    pub octave: i32,
}

impl ExercisePitch {
    pub fn frequency(&self) -> f64 {
        frequency(self.step, self.octave, self.alter as f64)
    }

    pub fn midi(&self) -> i32 {
        midi_number(self.step, self.octave, self.alter as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExerciseEvent {
    Note { pitch: ExercisePitch, dur: NoteValue },
    Rest { dur: NoteValue },
}

impl ExerciseEvent {
    pub fn value(&self) -> NoteValue {
        match self {
            ExerciseEvent::Note { dur, .. } | ExerciseEvent::Rest { dur } => *dur,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, ExerciseEvent::Note { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExercisePart {
    /// Voice label, e.g. `S` for soprano.
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeSpec>,
    pub measures: Vec<Vec<ExerciseEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseScore {
    pub key: KeySpec,
    pub time: MeterSpec,
    pub num_measures: u32,
    pub parts: Vec<ExercisePart>,
}

impl ExerciseScore {
    pub fn note_count(&self) -> usize {
        self.parts
            .iter()
            .flat_map(|p| p.measures.iter())
            .flat_map(|m| m.iter())
            .filter(|e| e.is_note())
            .count()
    }

    /// Note count sent as `expectedNotes`; an empty exercise reports 8.
    pub fn expected_note_count(&self) -> usize {
        match self.note_count() {
            0 => DEFAULT_EXPECTED_NOTES,
            n => n,
        }
    }

    pub fn key_signature_label(&self) -> String {
        self.key.label()
    }

    pub fn time_signature_label(&self) -> String {
        self.time.label()
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time.time_signature()
    }

    /// Rebuild an exercise from a parsed score, one exercise part per
    /// source part. Gaps between notes become rests and durations snap to
    /// the nearest plain or dotted value. The key is not recoverable from
    /// timing data and is reported as C major.
    pub fn from_parsed(score: &ParsedScore) -> Self {
        let part_count = score.notes().map(|n| n.part + 1).max().unwrap_or(1);
        let seconds_per_quarter = score.seconds_per_quarter();
        let measure_seconds = score.time_signature.quarters_per_measure() * seconds_per_quarter;

        let parts = (0..part_count)
            .map(|part| {
                let measures = score
                    .measures
                    .iter()
                    .enumerate()
                    .map(|(index, measure)| {
                        let mut cursor = index as f64 * measure_seconds;
                        let mut events = Vec::new();
                        for note in measure.notes.iter().filter(|n| n.part == part) {
                            let gap = note.start_time - cursor;
                            if gap > 1e-6 {
                                events.push(ExerciseEvent::Rest {
                                    dur: NoteValue::nearest(gap / seconds_per_quarter),
                                });
                            }
                            events.push(ExerciseEvent::Note {
                                pitch: ExercisePitch {
                                    step: note.step,
                                    alter: note.alter.round() as i32,
                                    octave: note.octave,
                                },
                                dur: NoteValue::nearest(note.duration / seconds_per_quarter),
                            });
                            cursor = note.end_time();
                        }
                        events
                    })
                    .collect();
                ExercisePart {
                    role: format!("P{}", part + 1),
                    range: None,
                    measures,
                }
            })
            .collect();

        Self {
            key: KeySpec::default(),
            time: MeterSpec {
                num: score.time_signature.beats,
                den: score.time_signature.beat_type,
            },
            num_measures: score.measures.len() as u32,
            parts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RhythmStyle {
    /// One note per notated beat.
    #[default]
    Quarters,
    /// Beats, two-beat notes, split beats and occasional rests.
    Mixed,
}

/// Inputs to [`generate_exercise`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExerciseParams {
    pub key: KeySpec,
    pub time: MeterSpec,
    pub measures: u32,
    pub range: RangeSpec,
    pub rhythm: RhythmStyle,
    pub role: String,
}

impl Default for ExerciseParams {
    fn default() -> Self {
        Self {
            key: KeySpec::default(),
            time: MeterSpec::default(),
            measures: 4,
            range: RangeSpec::default(),
            rhythm: RhythmStyle::Quarters,
            role: "S".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tone {
    pitch: ExercisePitch,
    midi: i32,
    degree: usize,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: NoteValue,
    rest: bool,
}

/// Mostly stepwise motion with the occasional third.
const MELODIC_STEPS: [i32; 6] = [-2, -1, -1, 1, 1, 2];

/// Generate a single-part diatonic exercise.
///
/// The melody starts on the lowest tonic inside the range, moves mostly by
/// step and ends on the tonic nearest its last note. The same parameters
/// and seed always produce the same exercise.
pub fn generate_exercise(params: &ExerciseParams, seed: u64) -> Result<ExerciseScore, SightSingError> {
    if params.measures == 0 {
        return Err(SightSingError::Config(
            "an exercise needs at least one measure".to_string(),
        ));
    }
    let beat = DurationKind::for_beat_type(params.time.den)
        .filter(|_| params.time.num > 0)
        .ok_or_else(|| {
            SightSingError::Config(format!("unsupported meter {}", params.time.label()))
        })?;
    let scale = params
        .key
        .scale()
        .ok_or_else(|| SightSingError::Config(format!("unsupported key {}", params.key.label())))?;

    let (low, high) = match (range_bound(&params.range.min), range_bound(&params.range.max)) {
        (Some(low), Some(high)) if low <= high => (low, high),
        _ => {
            return Err(SightSingError::Config(format!(
                "invalid range {}..{}",
                params.range.min, params.range.max
            )))
        }
    };

    let tones = diatonic_tones(&scale, low, high);
    if tones.is_empty() {
        return Err(SightSingError::Config(format!(
            "range {}..{} contains no tones of {}",
            params.range.min,
            params.range.max,
            params.key.label()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let slots = rhythm_slots(params, beat, &mut rng);
    let note_total = slots.iter().flatten().filter(|s| !s.rest).count();
    let mut melody = melody(&tones, note_total, &mut rng).into_iter();

    let measures = slots
        .into_iter()
        .map(|measure| {
            measure
                .into_iter()
                .map(|slot| match (slot.rest, melody.next()) {
                    (false, Some(pitch)) => ExerciseEvent::Note {
                        pitch,
                        dur: slot.value,
                    },
                    _ => ExerciseEvent::Rest { dur: slot.value },
                })
                .collect()
        })
        .collect();

    log::debug!(
        "generated {} measure exercise in {} ({} notes, seed {})",
        params.measures,
        params.key.label(),
        note_total,
        seed
    );

    Ok(ExerciseScore {
        key: params.key.clone(),
        time: params.time,
        num_measures: params.measures,
        parts: vec![ExercisePart {
            role: params.role.clone(),
            range: Some(params.range.clone()),
            measures,
        }],
    })
}

fn range_bound(name: &str) -> Option<i32> {
    parse_pitch_name(name).map(|(step, alter, octave)| midi_number(step, octave, alter as f64))
}

fn diatonic_tones(scale: &[(Step, i32)], low: i32, high: i32) -> Vec<Tone> {
    let Some(&(tonic, _)) = scale.first() else {
        return Vec::new();
    };
    let mut tones = Vec::new();
    for octave in (low / 12 - 2)..=(high / 12) {
        for (degree, &(step, alter)) in scale.iter().enumerate() {
            // Degrees whose letter wraps past B belong to the next octave
            let octave = if step.index() < tonic.index() {
                octave + 1
            } else {
                octave
            };
            let pitch = ExercisePitch {
                step,
                alter,
                octave,
            };
            let midi = pitch.midi();
            if (low..=high).contains(&midi) {
                tones.push(Tone {
                    pitch,
                    midi,
                    degree,
                });
            }
        }
    }
    tones.sort_by_key(|t| t.midi);
    tones.dedup_by_key(|t| t.midi);
    tones
}

fn rhythm_slots(params: &ExerciseParams, beat: DurationKind, rng: &mut StdRng) -> Vec<Vec<Slot>> {
    let note = |kind| Slot {
        value: NoteValue::new(kind),
        rest: false,
    };

    (0..params.measures)
        .map(|index| {
            let last_measure = index + 1 == params.measures;
            let mut slots = Vec::new();
            let mut remaining = params.time.num;
            while remaining > 0 {
                if params.rhythm == RhythmStyle::Quarters {
                    slots.push(note(beat));
                    remaining -= 1;
                    continue;
                }

                let opening = index == 0 && slots.is_empty();
                let roll: f64 = rng.random();
                match (beat.doubled(), beat.halved()) {
                    (Some(long), _) if remaining >= 2 && roll < 0.2 => {
                        slots.push(note(long));
                        remaining -= 2;
                    }
                    (_, Some(short)) if roll < 0.4 => {
                        slots.push(note(short));
                        slots.push(note(short));
                        remaining -= 1;
                    }
                    _ if roll < 0.5 && !opening && !last_measure => {
                        slots.push(Slot {
                            value: NoteValue::new(beat),
                            rest: true,
                        });
                        remaining -= 1;
                    }
                    _ => {
                        slots.push(note(beat));
                        remaining -= 1;
                    }
                }
            }
            slots
        })
        .collect()
}

fn melody(tones: &[Tone], count: usize, rng: &mut StdRng) -> Vec<ExercisePitch> {
    let tonics: Vec<usize> = tones
        .iter()
        .enumerate()
        .filter(|(_, t)| t.degree == 0)
        .map(|(i, _)| i)
        .collect();
    let last = tones.len() as i32 - 1;
    let mut index = tonics.first().copied().unwrap_or(tones.len() / 2);

    let mut pitches = Vec::with_capacity(count);
    for i in 0..count {
        if i > 0 && i + 1 == count && !tonics.is_empty() {
            index = tonics
                .iter()
                .copied()
                .min_by_key(|&t| (t as i32 - index as i32).abs())
                .unwrap_or(index);
        } else if i > 0 {
            let delta = MELODIC_STEPS[rng.random_range(0..MELODIC_STEPS.len())];
            let mut next = index as i32 + delta;
            if next < 0 || next > last {
                next = index as i32 - delta;
            }
            index = next.clamp(0, last) as usize;
        }
        pitches.push(tones[index].pitch);
    }
    pitches
}
