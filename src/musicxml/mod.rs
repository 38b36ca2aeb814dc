//! # MusicXML Module
//!
//! Read partwise MusicXML into absolute note timing, and write the minimal
//! MusicXML re-encoding of an exercise that is sent to the evaluator.
//!
//! ## Sub-modules
//! - `parser` - streaming reader (quick-xml) producing a [`ParseOutcome`]
//! - `writer` - string-built MusicXML for an [`ExerciseScore`](crate::exercise::ExerciseScore)
//!
//! ## Example
//! ```rust
//! use sightsing::musicxml::parse;
//!
//! // Unreadable input degrades to the four-note fallback instead of failing
//! let score = parse("<not-musicxml", 120.0);
//! assert_eq!(score.note_count(), 4);
//! assert_eq!(score.total_duration, 2.0);
//! ```

mod parser;
mod writer;

pub use parser::{parse, parse_with_warnings, ParseOutcome, ParseWarning, DEFAULT_DIVISIONS};
pub use writer::{exercise_to_musicxml, DIVISIONS};
