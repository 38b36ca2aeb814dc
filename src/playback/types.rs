//! Playback type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audio::{ClickSound, NoteSound};

/// What a playback session sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackMode {
    /// Metronome clicks only.
    ClickOnly,
    /// Count-in and clicks under the melody.
    #[default]
    ClickAndScore,
    /// Melody only, starting immediately.
    PitchOnly,
}

impl PlaybackMode {
    pub fn has_clicks(self) -> bool {
        matches!(self, PlaybackMode::ClickOnly | PlaybackMode::ClickAndScore)
    }

    pub fn has_notes(self) -> bool {
        matches!(self, PlaybackMode::ClickAndScore | PlaybackMode::PitchOnly)
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::ClickOnly => f.write_str("click-only"),
            PlaybackMode::ClickAndScore => f.write_str("click-and-score"),
            PlaybackMode::PitchOnly => f.write_str("pitch-only"),
        }
    }
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "click-only" => Ok(PlaybackMode::ClickOnly),
            "click-and-score" => Ok(PlaybackMode::ClickAndScore),
            "pitch-only" => Ok(PlaybackMode::PitchOnly),
            other => Err(format!(
                "unknown playback mode '{}' (expected click-only, click-and-score or pitch-only)",
                other
            )),
        }
    }
}

/// Timbres and levels for a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SoundSettings {
    pub notes: NoteSound,
    pub click: ClickSound,
    pub note_volume: f64,
    pub click_volume: f64,
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self {
            notes: NoteSound::Piano,
            click: ClickSound::Woodblock,
            note_volume: 0.4,
            click_volume: 0.2,
        }
    }
}

/// Summary of what one `play_score` call scheduled.
///
/// # Fields
/// - `start_time`: audio-clock snapshot every event is timed against
/// - `melody_offset`: seconds between `start_time` and the first beat of
///   the melody (the count-in when clicks play, otherwise zero)
/// - `stop_at`: audio-clock time of the auto-stop
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackReport {
    pub mode: PlaybackMode,
    pub start_time: f64,
    pub melody_offset: f64,
    pub click_count: usize,
    pub note_count: usize,
    pub stop_at: f64,
}
