//! Playback scheduler
//!
//! Schedules one session of clicks and melody against a single audio-clock
//! snapshot and tears the whole session down on `stop()` or auto-stop.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::audio::{
    click_buffer, click_gain, AudioContext, AudioContextSlot, AudioSource, ContextState, NodeId,
    ToneSpec,
};
use crate::error::SightSingError;
use crate::score::ParsedScore;

use super::timer::{TimerAction, TimerQueue};
use super::types::{PlaybackMode, PlaybackReport, SoundSettings};

/// Seconds kept after the end of the melody before auto-stop.
pub const AUTO_STOP_BUFFER: f64 = 1.0;

/// State of the session currently playing.
#[derive(Debug)]
pub struct PlaybackSession {
    report: PlaybackReport,
    nodes: Vec<NodeId>,
    timers: TimerQueue,
}

impl PlaybackSession {
    pub fn report(&self) -> &PlaybackReport {
        &self.report
    }

    pub fn start_time(&self) -> f64 {
        self.report.start_time
    }

    /// Nodes that may still sound and would be stopped by `stop()`.
    pub fn tracked_nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

/// Plays parsed scores through an owned audio context.
///
/// At most one session exists at a time: `play_score` stops the current
/// session before scheduling a new one.
pub struct PlaybackScheduler<C: AudioContext> {
    audio: AudioContextSlot<C>,
    session: Option<PlaybackSession>,
    rng: StdRng,
}

impl<C: AudioContext> PlaybackScheduler<C> {
    pub fn new(audio: AudioContextSlot<C>) -> Self {
        Self {
            audio,
            session: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// A scheduler whose click noise is reproducible.
    pub fn with_seed(audio: AudioContextSlot<C>, seed: u64) -> Self {
        Self {
            audio,
            session: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Schedule a whole session and return once scheduling is done.
    ///
    /// Clicks cover a one-measure count-in plus every notated measure,
    /// `beats` clicks per measure one quarter apart, with the first click of
    /// each measure accented. In `click-and-score` the melody starts after
    /// the count-in; in `pitch-only` it starts at the session start. The
    /// session auto-stops at `melody_offset + total_duration + 1s`.
    pub fn play_score(
        &mut self,
        score: &ParsedScore,
        mode: PlaybackMode,
        sounds: &SoundSettings,
    ) -> Result<PlaybackReport, SightSingError> {
        if self.session.is_some() {
            log::info!("already playing, stopping the previous session first");
            self.stop();
        }

        let context = self.audio.acquire()?;
        let start_time = context.current_time();
        let sample_rate = context.sample_rate();

        let beat = score.seconds_per_quarter();
        let beats_per_measure = score.time_signature.beats.max(1) as usize;
        let melody_offset = if mode.has_clicks() {
            score.intro_duration()
        } else {
            0.0
        };

        let mut nodes = Vec::new();
        let mut timers = TimerQueue::new();
        let mut click_count = 0;
        let mut note_count = 0;

        if mode.has_clicks() {
            let total_beats = (score.measures.len() + 1) * beats_per_measure;
            for index in 0..total_beats {
                let downbeat = index % beats_per_measure == 0;
                let when = start_time + index as f64 * beat;
                let source = AudioSource::Buffer {
                    samples: click_buffer(sounds.click, downbeat, sample_rate, &mut self.rng),
                    gain: click_gain(sounds.click_volume, downbeat),
                };
                let end = when + source.duration(sample_rate);
                let id = context.start_source(source, when);
                timers.schedule(end, TimerAction::ReleaseNode(id));
                nodes.push(id);
                click_count += 1;
            }
        }

        if mode.has_notes() {
            for note in score.notes() {
                let when = start_time + melody_offset + note.start_time;
                let spec =
                    ToneSpec::for_note(sounds.notes, note.frequency, note.duration, sounds.note_volume);
                let id = context.start_source(AudioSource::Tone(spec), when);
                let end = when + note.duration;
                timers.schedule(end, TimerAction::ReleaseNode(id));
                nodes.push(id);
                note_count += 1;
            }
            if note_count == 0 {
                log::warn!("score has no notes to play");
            }
        }

        let stop_at = start_time + melody_offset + score.total_duration + AUTO_STOP_BUFFER;
        timers.schedule(stop_at, TimerAction::AutoStop);

        let report = PlaybackReport {
            mode,
            start_time,
            melody_offset,
            click_count,
            note_count,
            stop_at,
        };
        log::info!(
            "playing {} from {:.3}s: {} clicks, {} notes, auto-stop at {:.3}s",
            mode,
            start_time,
            click_count,
            note_count,
            stop_at
        );

        self.session = Some(PlaybackSession {
            report: report.clone(),
            nodes,
            timers,
        });
        Ok(report)
    }

    /// Run timers that have come due on the audio clock.
    ///
    /// Returns whether a session is still playing afterwards.
    pub fn poll(&mut self) -> bool {
        let Some(now) = self.audio.get().map(AudioContext::current_time) else {
            return false;
        };
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let mut auto_stop = false;
        for action in session.timers.take_due(now) {
            match action {
                TimerAction::ReleaseNode(id) => session.nodes.retain(|n| *n != id),
                TimerAction::AutoStop => auto_stop = true,
            }
        }

        if auto_stop {
            log::info!("playback finished, auto-stop at {:.3}s", now);
            self.stop();
            return false;
        }
        true
    }

    /// Cancel every node and timer of the current session.
    ///
    /// Safe to call repeatedly and when nothing is playing.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Some(context) = self.audio.get_mut() {
            if context.state() != ContextState::Closed {
                for id in &session.nodes {
                    context.stop_source(*id);
                }
            }
        }
        log::debug!("stopped playback, {} nodes cancelled", session.nodes.len());
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    /// Audio-clock time of the next pending timer.
    pub fn next_timer(&self) -> Option<f64> {
        self.session.as_ref().and_then(|s| s.timers.next_due())
    }

    pub fn audio(&self) -> &AudioContextSlot<C> {
        &self.audio
    }

    /// The audio context slot, shared with the metronome.
    pub fn audio_mut(&mut self) -> &mut AudioContextSlot<C> {
        &mut self.audio
    }

    /// Stop playback and release the audio context.
    pub fn close(&mut self) {
        self.stop();
        self.audio.release();
    }
}

impl<C: AudioContext> Drop for PlaybackScheduler<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
