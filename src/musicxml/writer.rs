use crate::exercise::{ExerciseEvent, ExercisePart, ExerciseScore, NoteValue};

/// Ticks per quarter note in generated documents; fine enough for dotted sixteenths.
pub const DIVISIONS: u32 = 16;

/// Convert an exercise to partwise MusicXML.
pub fn exercise_to_musicxml(exercise: &ExerciseScore) -> String {
    let mut xml = String::new();

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(r#"<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 4.0 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">"#);
    xml.push('\n');
    xml.push_str(r#"<score-partwise version="4.0">"#);
    xml.push('\n');

    // Part list
    xml.push_str("  <part-list>\n");
    for (i, part) in exercise.parts.iter().enumerate() {
        xml.push_str(&format!("    <score-part id=\"P{}\">\n", i + 1));
        xml.push_str(&format!(
            "      <part-name>{}</part-name>\n",
            escape_xml(&part.role)
        ));
        xml.push_str("    </score-part>\n");
    }
    xml.push_str("  </part-list>\n");

    for (i, part) in exercise.parts.iter().enumerate() {
        xml.push_str(&format!("  <part id=\"P{}\">\n", i + 1));
        xml.push_str(&part_to_xml(exercise, part));
        xml.push_str("  </part>\n");
    }

    xml.push_str("</score-partwise>\n");
    xml
}

fn part_to_xml(exercise: &ExerciseScore, part: &ExercisePart) -> String {
    let mut xml = String::new();

    // An exercise without events still gets one measure to carry attributes
    let empty = [Vec::new()];
    let measures: &[Vec<ExerciseEvent>] = if part.measures.is_empty() {
        &empty
    } else {
        &part.measures
    };

    for (i, events) in measures.iter().enumerate() {
        xml.push_str(&format!("    <measure number=\"{}\">\n", i + 1));
        if i == 0 {
            xml.push_str(&attributes_to_xml(exercise, part));
        }
        for event in events {
            xml.push_str(&event_to_xml(event));
        }
        xml.push_str("    </measure>\n");
    }

    xml
}

fn attributes_to_xml(exercise: &ExerciseScore, part: &ExercisePart) -> String {
    let mut xml = String::new();

    xml.push_str("      <attributes>\n");
    xml.push_str(&format!("        <divisions>{}</divisions>\n", DIVISIONS));
    xml.push_str("        <key>\n");
    xml.push_str(&format!(
        "          <fifths>{}</fifths>\n",
        exercise.key.fifths().unwrap_or(0)
    ));
    xml.push_str(&format!("          <mode>{}</mode>\n", exercise.key.mode));
    xml.push_str("        </key>\n");
    xml.push_str("        <time>\n");
    xml.push_str(&format!("          <beats>{}</beats>\n", exercise.time.num));
    xml.push_str(&format!(
        "          <beat-type>{}</beat-type>\n",
        exercise.time.den
    ));
    xml.push_str("        </time>\n");

    // Bass voices read from the F clef, everything else from treble
    let (sign, line) = match part.role.as_str() {
        "B" | "Bass" | "bass" => ("F", 4),
        _ => ("G", 2),
    };
    xml.push_str("        <clef>\n");
    xml.push_str(&format!("          <sign>{}</sign>\n", sign));
    xml.push_str(&format!("          <line>{}</line>\n", line));
    xml.push_str("        </clef>\n");
    xml.push_str("      </attributes>\n");

    xml
}

fn event_to_xml(event: &ExerciseEvent) -> String {
    let mut xml = String::new();

    xml.push_str("      <note>\n");
    match event {
        ExerciseEvent::Note { pitch, .. } => {
            xml.push_str("        <pitch>\n");
            xml.push_str(&format!("          <step>{}</step>\n", pitch.step));
            if pitch.alter != 0 {
                xml.push_str(&format!("          <alter>{}</alter>\n", pitch.alter));
            }
            xml.push_str(&format!("          <octave>{}</octave>\n", pitch.octave));
            xml.push_str("        </pitch>\n");
        }
        ExerciseEvent::Rest { .. } => xml.push_str("        <rest/>\n"),
    }

    let value = event.value();
    xml.push_str(&format!(
        "        <duration>{}</duration>\n",
        value_to_divisions(&value)
    ));
    xml.push_str(&format!("        <type>{}</type>\n", value.kind.musicxml_type()));
    for _ in 0..value.dots {
        xml.push_str("        <dot/>\n");
    }
    xml.push_str("      </note>\n");

    xml
}

fn value_to_divisions(value: &NoteValue) -> u32 {
    (value.quarters() * DIVISIONS as f64).round() as u32
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exercise::{
        generate_exercise, DurationKind, ExerciseParams, ExercisePitch, KeyMode, KeySpec,
        MeterSpec,
    };
    use crate::musicxml::parse;
    use crate::pitch::Step;

    fn single_measure(events: Vec<ExerciseEvent>) -> ExerciseScore {
        ExerciseScore {
            key: KeySpec::new("F", KeyMode::Major),
            time: MeterSpec { num: 3, den: 4 },
            num_measures: 1,
            parts: vec![ExercisePart {
                role: "S".to_string(),
                range: None,
                measures: vec![events],
            }],
        }
    }

    #[test]
    fn test_generated_exercise_round_trips_timing() {
        let exercise = generate_exercise(&ExerciseParams::default(), 3).unwrap();
        let xml = exercise_to_musicxml(&exercise);
        let score = parse(&xml, 120.0);
        assert_eq!(score.measures.len(), 4);
        assert_eq!(score.note_count(), 16);
        assert_eq!(score.total_duration, 8.0);
    }

    #[test]
    fn test_attributes_and_dotted_values() {
        let b_flat = ExercisePitch {
            step: Step::B,
            alter: -1,
            octave: 4,
        };
        let xml = exercise_to_musicxml(&single_measure(vec![
            ExerciseEvent::Note {
                pitch: b_flat,
                dur: NoteValue::dotted(DurationKind::Quarter),
            },
            ExerciseEvent::Rest {
                dur: NoteValue::new(DurationKind::Eighth),
            },
            ExerciseEvent::Note {
                pitch: b_flat,
                dur: NoteValue::new(DurationKind::Quarter),
            },
        ]));

        assert!(xml.contains("<divisions>16</divisions>"));
        assert!(xml.contains("<fifths>-1</fifths>"));
        assert!(xml.contains("<beats>3</beats>"));
        assert!(xml.contains("<alter>-1</alter>"));
        assert!(xml.contains("<duration>24</duration>"));
        assert!(xml.contains("<dot/>"));
        assert!(xml.contains("<rest/>"));

        let score = parse(&xml, 60.0);
        assert_eq!(score.measures[0].notes[1].start_time, 2.0);
        assert!((score.measures[0].notes[0].frequency - 466.16).abs() < 0.05);
    }

    #[test]
    fn test_empty_exercise_still_has_a_measure() {
        let mut exercise = single_measure(Vec::new());
        exercise.parts[0].measures.clear();
        let xml = exercise_to_musicxml(&exercise);
        assert!(xml.contains("<measure number=\"1\">"));
        assert!(xml.contains("<part id=\"P1\">"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("S & A <1>"), "S &amp; A &lt;1&gt;");
    }
}
