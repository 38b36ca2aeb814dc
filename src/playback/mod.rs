//! # Playback Module
//!
//! Play a [`ParsedScore`](crate::score::ParsedScore) as synthesized melody
//! over a metronome click track with a one-measure count-in.
//!
//! ## Purpose
//! A sight-singer hears one measure of clicks to set the tempo, then the
//! melody (or only the clicks, or only the melody). Every sound of a
//! session is timed against one audio-clock snapshot, so ordering and the
//! count-in offset do not depend on when the scheduling code runs.
//!
//! ## Sub-modules
//! - `types` - PlaybackMode, SoundSettings, PlaybackReport
//! - `scheduler` - PlaybackScheduler and its session state
//! - `timer` - timer queue polled against the audio clock
//!
//! ## Example
//! ```rust
//! use sightsing::audio::{AudioContextSlot, OfflineContext};
//! use sightsing::playback::{PlaybackMode, PlaybackScheduler, SoundSettings};
//! use sightsing::score::ParsedScore;
//!
//! let slot = AudioContextSlot::new(|| Ok(OfflineContext::new(8_000)));
//! let mut scheduler = PlaybackScheduler::with_seed(slot, 1);
//!
//! let report = scheduler
//!     .play_score(&ParsedScore::fallback(), PlaybackMode::ClickAndScore, &SoundSettings::default())
//!     .unwrap();
//!
//! // 4/4 at 120 BPM: the melody waits for four half-second clicks
//! assert_eq!(report.melody_offset, 2.0);
//! assert_eq!(report.click_count, 8);
//! assert!(scheduler.is_playing());
//!
//! scheduler.stop();
//! scheduler.stop();
//! assert!(!scheduler.is_playing());
//! ```
//!
//! ## Session Lifecycle
//!
//! ```text
//! play_score ──► acquire context ──► snapshot start_time
//!                                        │
//!             clicks: start + i * quarter   │   notes: start + offset + note.start_time
//!                                        ▼
//!                          timers: ReleaseNode per node, AutoStop
//!                                        │
//!        poll() at audio time ≥ stop_at ─┴─► stop() ──► every tracked node stopped
//! ```
//!
//! Auto-stop fires at `start + offset + total_duration + 1s`; clicks still
//! scheduled past that point are cancelled with the session.

mod scheduler;
mod timer;
mod types;

#[cfg(test)]
mod tests;

pub use scheduler::{PlaybackScheduler, PlaybackSession, AUTO_STOP_BUFFER};
pub use timer::{TimerAction, TimerQueue};
pub use types::{PlaybackMode, PlaybackReport, SoundSettings};
