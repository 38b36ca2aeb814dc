//! Streaming MusicXML reader.
//!
//! The reader walks the document once, collecting a raw part/measure/note
//! tree, then lays every measure out on an absolute time axis:
//! `measure_start = index * quarters_per_measure * seconds_per_quarter`.
//! Notes of all parts that share a measure index are flattened into that
//! measure in part order. Parts shorter than the longest part simply
//! contribute nothing to the measures they lack.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Serialize;

use crate::pitch::{frequency, Step};
use crate::score::{ParsedMeasure, ParsedNote, ParsedScore, TimeSignature, DEFAULT_TEMPO};

/// Ticks per quarter note assumed when `<divisions>` is absent.
pub const DEFAULT_DIVISIONS: f64 = 4.0;

/// Data loss or substitution noticed while reading a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ParseWarning {
    /// The document is not well-formed XML; the fallback score was used.
    XmlError { message: String },
    /// Neither `<part>` nor `<measure>` elements were found; the fallback score was used.
    NoParts,
    /// `<measure>` elements were found outside any `<part>` and read as one part.
    LegacyTraversal { measures: usize },
    /// The requested tempo was not a positive number; 120 BPM was used.
    InvalidTempo { tempo: f64 },
    /// `<divisions>` was not a positive number; 4 was used.
    InvalidDivisions { value: String },
    /// `<beats>`/`<beat-type>` were not positive integers; 4/4 was used.
    InvalidTimeSignature { beats: String, beat_type: String },
    /// A note without a usable `<duration>` was skipped.
    MissingDuration { measure: u32, part: usize, note: usize },
    /// A sounding note without a usable `<pitch>` was skipped.
    MissingPitch { measure: u32, part: usize, note: usize },
    /// A `<chord/>` note was laid out sequentially.
    ChordNotModeled { measure: u32, part: usize, note: usize },
    /// A part has fewer measures than the longest part.
    PartLengthMismatch { part: usize, measures: usize, expected: usize },
}

/// A score plus everything the reader had to skip or substitute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutcome {
    pub score: ParsedScore,
    pub warnings: Vec<ParseWarning>,
    pub used_fallback: bool,
}

impl ParseOutcome {
    fn fallback(warnings: Vec<ParseWarning>) -> Self {
        Self {
            score: ParsedScore::fallback(),
            warnings,
            used_fallback: true,
        }
    }
}

/// Parse MusicXML text at the given tempo (quarter notes per minute).
///
/// Never fails: unreadable input yields [`ParsedScore::fallback`].
pub fn parse(xml: &str, tempo: f64) -> ParsedScore {
    parse_with_warnings(xml, tempo).score
}

/// Parse MusicXML text and report every skipped or substituted element.
///
/// # Example
/// ```rust
/// use sightsing::musicxml::{parse_with_warnings, ParseWarning};
///
/// let outcome = parse_with_warnings("", 120.0);
/// assert!(outcome.used_fallback);
/// assert_eq!(outcome.warnings, vec![ParseWarning::NoParts]);
/// ```
pub fn parse_with_warnings(xml: &str, tempo: f64) -> ParseOutcome {
    let mut warnings = Vec::new();

    let tempo = if tempo.is_finite() && tempo > 0.0 {
        tempo
    } else {
        warnings.push(ParseWarning::InvalidTempo { tempo });
        DEFAULT_TEMPO
    };

    let doc = match read_document(xml) {
        Ok(doc) => doc,
        Err(message) => {
            log::warn!("MusicXML could not be read, using fallback score: {}", message);
            warnings.push(ParseWarning::XmlError { message });
            return ParseOutcome::fallback(warnings);
        }
    };

    let parts = if !doc.parts.is_empty() {
        doc.parts
    } else if !doc.loose_measures.is_empty() {
        warnings.push(ParseWarning::LegacyTraversal {
            measures: doc.loose_measures.len(),
        });
        vec![RawPart {
            measures: doc.loose_measures,
        }]
    } else {
        log::warn!("MusicXML has no parts, using fallback score");
        warnings.push(ParseWarning::NoParts);
        return ParseOutcome::fallback(warnings);
    };

    let divisions = match doc.divisions {
        None => DEFAULT_DIVISIONS,
        Some(value) => match value.trim().parse::<f64>() {
            Ok(d) if d.is_finite() && d > 0.0 => d,
            _ => {
                warnings.push(ParseWarning::InvalidDivisions { value });
                DEFAULT_DIVISIONS
            }
        },
    };

    let time_signature = match (doc.beats, doc.beat_type) {
        (None, None) => TimeSignature::default(),
        (beats, beat_type) => {
            let parsed = (
                beats.as_deref().and_then(parse_positive),
                beat_type.as_deref().and_then(parse_positive),
            );
            match parsed {
                (Some(beats), Some(beat_type)) => TimeSignature { beats, beat_type },
                _ => {
                    warnings.push(ParseWarning::InvalidTimeSignature {
                        beats: beats.unwrap_or_default(),
                        beat_type: beat_type.unwrap_or_default(),
                    });
                    TimeSignature::default()
                }
            }
        }
    };

    let seconds_per_quarter = 60.0 / tempo;
    let measure_seconds = time_signature.quarters_per_measure() * seconds_per_quarter;
    let max_measures = parts.iter().map(|p| p.measures.len()).max().unwrap_or(0);

    for (index, part) in parts.iter().enumerate() {
        if part.measures.len() < max_measures {
            warnings.push(ParseWarning::PartLengthMismatch {
                part: index,
                measures: part.measures.len(),
                expected: max_measures,
            });
        }
    }

    let mut measures = Vec::with_capacity(max_measures);
    for index in 0..max_measures {
        let measure_start = index as f64 * measure_seconds;
        let number = parts
            .iter()
            .find_map(|p| p.measures.get(index).and_then(|m| m.number))
            .unwrap_or(index as u32 + 1);

        let mut notes = Vec::new();
        for (part_index, part) in parts.iter().enumerate() {
            let Some(raw) = part.measures.get(index) else {
                continue;
            };

            // Time-in-measure cursor; rests advance it without emitting
            let mut cursor = 0.0;
            for (note_index, raw_note) in raw.notes.iter().enumerate() {
                let Some(ticks) = raw_note.duration.filter(|d| d.is_finite() && *d > 0.0) else {
                    warnings.push(ParseWarning::MissingDuration {
                        measure: number,
                        part: part_index,
                        note: note_index,
                    });
                    continue;
                };
                let seconds = ticks / divisions * seconds_per_quarter;

                if raw_note.is_rest {
                    cursor += seconds;
                    continue;
                }

                let (Some(step), Some(octave)) = (raw_note.step, raw_note.octave) else {
                    warnings.push(ParseWarning::MissingPitch {
                        measure: number,
                        part: part_index,
                        note: note_index,
                    });
                    continue;
                };

                if raw_note.is_chord {
                    warnings.push(ParseWarning::ChordNotModeled {
                        measure: number,
                        part: part_index,
                        note: note_index,
                    });
                }

                notes.push(ParsedNote {
                    step,
                    octave,
                    alter: raw_note.alter,
                    frequency: frequency(step, octave, raw_note.alter),
                    duration: seconds,
                    start_time: measure_start + cursor,
                    part: part_index,
                });
                cursor += seconds;
            }
        }

        measures.push(ParsedMeasure { number, notes });
    }

    let score = ParsedScore::new(measures, tempo, time_signature);
    log::debug!(
        "parsed {} measures, {} notes, {:.3}s at {} BPM",
        score.measures.len(),
        score.note_count(),
        score.total_duration,
        tempo
    );

    ParseOutcome {
        score,
        warnings,
        used_fallback: false,
    }
}

fn parse_positive(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

#[derive(Debug, Default)]
struct RawNote {
    step: Option<Step>,
    octave: Option<i32>,
    alter: f64,
    duration: Option<f64>,
    is_rest: bool,
    is_chord: bool,
}

#[derive(Debug, Default)]
struct RawMeasure {
    number: Option<u32>,
    notes: Vec<RawNote>,
}

#[derive(Debug, Default)]
struct RawPart {
    measures: Vec<RawMeasure>,
}

#[derive(Debug, Default)]
struct RawDocument {
    parts: Vec<RawPart>,
    loose_measures: Vec<RawMeasure>,
    divisions: Option<String>,
    beats: Option<String>,
    beat_type: Option<String>,
}

/// Event-driven builder for [`RawDocument`].
#[derive(Default)]
struct DocumentBuilder {
    doc: RawDocument,
    path: Vec<String>,
    part: Option<RawPart>,
    measure: Option<RawMeasure>,
    note: Option<RawNote>,
    measures_seen: usize,
}

impl DocumentBuilder {
    fn open(&mut self, element: &BytesStart) {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        match name.as_str() {
            // Timewise documents nest <part> inside <measure>; those are not parts here
            "part" if self.measure.is_none() => self.part = Some(RawPart::default()),
            "measure" => {
                self.measures_seen += 1;
                self.measure = Some(RawMeasure {
                    number: attribute(element, "number").and_then(|n| n.trim().parse().ok()),
                    notes: Vec::new(),
                });
            }
            "note" if self.measure.is_some() => self.note = Some(RawNote::default()),
            "rest" => {
                if let Some(note) = self.note.as_mut() {
                    note.is_rest = true;
                }
            }
            "chord" => {
                if let Some(note) = self.note.as_mut() {
                    note.is_chord = true;
                }
            }
            _ => {}
        }
        self.path.push(name);
    }

    fn close(&mut self) {
        let Some(name) = self.path.pop() else {
            return;
        };
        match name.as_str() {
            "note" => {
                if let (Some(note), Some(measure)) = (self.note.take(), self.measure.as_mut()) {
                    measure.notes.push(note);
                }
            }
            "measure" => {
                if let Some(measure) = self.measure.take() {
                    match self.part.as_mut() {
                        Some(part) => part.measures.push(measure),
                        None => self.doc.loose_measures.push(measure),
                    }
                }
            }
            "part" => {
                if let Some(part) = self.part.take() {
                    self.doc.parts.push(part);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        let depth = self.path.len();
        let Some(current) = self.path.last().map(String::as_str) else {
            return;
        };
        let parent = if depth >= 2 {
            Some(self.path[depth - 2].as_str())
        } else {
            None
        };
        // Attributes are read once, from the first measure in the document
        let in_first_measure = self.measure.is_some() && self.measures_seen == 1;

        match (parent, current) {
            (Some("pitch"), "step") => {
                if let Some(note) = self.note.as_mut() {
                    note.step = Step::from_letter(text);
                }
            }
            (Some("pitch"), "octave") => {
                if let Some(note) = self.note.as_mut() {
                    note.octave = text.trim().parse().ok();
                }
            }
            (Some("pitch"), "alter") => {
                if let Some(note) = self.note.as_mut() {
                    note.alter = text.trim().parse().unwrap_or(0.0);
                }
            }
            (Some("note"), "duration") => {
                if let Some(note) = self.note.as_mut() {
                    note.duration = text.trim().parse().ok();
                }
            }
            (Some("attributes"), "divisions") if in_first_measure => {
                self.doc.divisions.get_or_insert_with(|| text.to_string());
            }
            (Some("time"), "beats") if in_first_measure => {
                self.doc.beats.get_or_insert_with(|| text.to_string());
            }
            (Some("time"), "beat-type") if in_first_measure => {
                self.doc.beat_type.get_or_insert_with(|| text.to_string());
            }
            _ => {}
        }
    }
}

fn attribute(element: &BytesStart, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn read_document(xml: &str) -> Result<RawDocument, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut builder = DocumentBuilder::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => builder.open(&e),
            Ok(Event::Empty(e)) => {
                builder.open(&e);
                builder.close();
            }
            Ok(Event::End(_)) => builder.close(),
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                builder.text(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
    }

    if let Some(open) = builder.path.last() {
        return Err(format!("unexpected end of document inside <{}>", open));
    }

    Ok(builder.doc)
}
