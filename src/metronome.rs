//! # Metronome
//!
//! A free-running click track for recording. Clicks are scheduled a short
//! look-ahead window in advance each time [`Metronome::pump`] runs, so
//! tempo and volume changes take effect on the next unsounded beat without
//! restarting the track.

use crossbeam_channel::Receiver;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::audio::{
    click_buffer, click_gain, AudioContext, AudioSource, ClickSound, NodeId, CLICK_DURATION,
};
use crate::error::SightSingError;
use crate::recorder::RecorderEvent;

/// How far ahead of the audio clock clicks are scheduled, in seconds.
pub const LOOKAHEAD: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct ScheduledClick {
    id: NodeId,
    start: f64,
}

#[derive(Debug)]
struct MetronomeRun {
    next_time: f64,
    next_index: u64,
    clicks: Vec<ScheduledClick>,
}

pub struct Metronome {
    tempo: f64,
    volume: f64,
    beats_per_measure: u32,
    sound: ClickSound,
    enabled: bool,
    run: Option<MetronomeRun>,
    rng: StdRng,
}

impl Metronome {
    pub fn new(tempo: f64, volume: f64) -> Result<Self, SightSingError> {
        validate_tempo(tempo)?;
        validate_volume(volume)?;
        Ok(Self {
            tempo,
            volume,
            beats_per_measure: 4,
            sound: ClickSound::Woodblock,
            enabled: true,
            run: None,
            rng: StdRng::from_os_rng(),
        })
    }

    pub fn with_sound(mut self, sound: ClickSound) -> Self {
        self.sound = sound;
        self
    }

    /// Accent every `beats`th click. Zero is treated as one.
    pub fn with_beats_per_measure(mut self, beats: u32) -> Self {
        self.set_beats_per_measure(beats);
        self
    }

    pub fn set_beats_per_measure(&mut self, beats: u32) {
        self.beats_per_measure = beats.max(1);
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replace tempo, volume and the enabled flag of a stopped metronome.
    ///
    /// A running track must be changed through [`set_tempo`](Self::set_tempo)
    /// and friends so its beat grid is kept.
    pub fn configure(&mut self, tempo: f64, volume: f64, enabled: bool) -> Result<(), SightSingError> {
        if self.is_running() {
            return Err(SightSingError::InvalidState(
                "metronome is running".to_string(),
            ));
        }
        validate_tempo(tempo)?;
        validate_volume(volume)?;
        self.tempo = tempo;
        self.volume = volume;
        self.enabled = enabled;
        Ok(())
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled<C: AudioContext>(&mut self, ctx: &mut C, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.stop(ctx);
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Seconds between clicks.
    pub fn interval(&self) -> f64 {
        60.0 / self.tempo
    }

    /// Start clicking at the current audio time, replacing any running track.
    pub fn start<C: AudioContext>(&mut self, ctx: &mut C) {
        self.stop(ctx);
        self.run = Some(MetronomeRun {
            next_time: ctx.current_time(),
            next_index: 0,
            clicks: Vec::new(),
        });
        log::debug!("metronome started at {} BPM", self.tempo);
        self.pump(ctx);
    }

    /// Schedule every click that falls inside the look-ahead window.
    ///
    /// Beats that fell into the past while nobody pumped are skipped.
    /// Returns the number of clicks scheduled.
    pub fn pump<C: AudioContext>(&mut self, ctx: &mut C) -> usize {
        let interval = self.interval();
        let Some(run) = self.run.as_mut() else {
            return 0;
        };

        let now = ctx.current_time();
        run.clicks.retain(|c| c.start + CLICK_DURATION > now);

        while run.next_time < now {
            run.next_time += interval;
            run.next_index += 1;
        }

        let mut scheduled = 0;
        let horizon = now + LOOKAHEAD;
        while run.next_time < horizon {
            let downbeat = run.next_index % self.beats_per_measure as u64 == 0;
            let source = AudioSource::Buffer {
                samples: click_buffer(self.sound, downbeat, ctx.sample_rate(), &mut self.rng),
                gain: click_gain(self.volume, downbeat),
            };
            let id = ctx.start_source(source, run.next_time);
            run.clicks.push(ScheduledClick {
                id,
                start: run.next_time,
            });
            run.next_time += interval;
            run.next_index += 1;
            scheduled += 1;
        }
        scheduled
    }

    /// Silence the track. Safe to call when not running.
    pub fn stop<C: AudioContext>(&mut self, ctx: &mut C) {
        if let Some(run) = self.run.take() {
            for click in run.clicks {
                ctx.stop_source(click.id);
            }
            log::debug!("metronome stopped");
        }
    }

    /// Change tempo while running.
    ///
    /// Only clicks that have not started are cancelled; the beat grid
    /// continues from the last sounded beat at the new interval.
    pub fn set_tempo<C: AudioContext>(&mut self, ctx: &mut C, bpm: f64) -> Result<(), SightSingError> {
        validate_tempo(bpm)?;
        let old_interval = self.interval();
        self.tempo = bpm;
        self.reschedule(ctx, old_interval);
        Ok(())
    }

    /// Change click volume while running, from the next unsounded beat.
    pub fn set_volume<C: AudioContext>(&mut self, ctx: &mut C, volume: f64) -> Result<(), SightSingError> {
        validate_volume(volume)?;
        self.volume = volume;
        let interval = self.interval();
        self.reschedule(ctx, interval);
        Ok(())
    }

    /// Follow the recorder: start with it, stop with it.
    pub fn handle_recorder_event<C: AudioContext>(&mut self, ctx: &mut C, event: RecorderEvent) {
        match event {
            RecorderEvent::Started { .. } if self.enabled => self.start(ctx),
            RecorderEvent::Started { .. } => {}
            RecorderEvent::Stopped { .. } => self.stop(ctx),
        }
    }

    /// Apply every pending recorder event.
    pub fn drain_events<C: AudioContext>(&mut self, ctx: &mut C, events: &Receiver<RecorderEvent>) {
        for event in events.try_iter() {
            self.handle_recorder_event(ctx, event);
        }
    }

    fn reschedule<C: AudioContext>(&mut self, ctx: &mut C, old_interval: f64) {
        let new_interval = self.interval();
        let Some(run) = self.run.as_mut() else {
            return;
        };

        let now = ctx.current_time();
        let (pending, sounded): (Vec<ScheduledClick>, Vec<ScheduledClick>) =
            run.clicks.drain(..).partition(|c| c.start > now);
        for click in &pending {
            ctx.stop_source(click.id);
        }
        run.clicks = sounded;

        let first_unsounded = pending
            .iter()
            .map(|c| c.start)
            .fold(run.next_time, f64::min);
        let last_sounded = first_unsounded - old_interval;
        run.next_index -= pending.len() as u64;
        run.next_time = (last_sounded + new_interval).max(now);

        self.pump(ctx);
    }
}

fn validate_tempo(bpm: f64) -> Result<(), SightSingError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(SightSingError::InvalidTempo(bpm))
    }
}

fn validate_volume(volume: f64) -> Result<(), SightSingError> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(SightSingError::Config(format!(
            "metronome volume must be between 0 and 1, got {}",
            volume
        )))
    }
}
