//! Tone and click synthesis.
//!
//! Notes are oscillators with a short linear fade in and out. Clicks are
//! generated buffers: a smoothed white-noise burst (woodblock) or a short
//! sine burst (beep), both under an exponential decay. Nothing here
//! depends on sample files.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Length of one generated click buffer in seconds.
pub const CLICK_DURATION: f64 = 0.1;

/// Fade used by every note sound except the xylophone.
pub const DEFAULT_FADE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// One sample at `phase` cycles (only the fractional part matters).
    pub fn sample(self, phase: f64) -> f64 {
        let p = phase.fract();
        match self {
            Waveform::Sine => (TAU * p).sin(),
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * p - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
        }
    }
}

/// Timbre used for melody notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSound {
    #[default]
    Piano,
    Flute,
    Xylophone,
    Synth,
}

impl NoteSound {
    pub fn waveform(self) -> Waveform {
        match self {
            NoteSound::Piano | NoteSound::Flute => Waveform::Sine,
            NoteSound::Xylophone => Waveform::Square,
            NoteSound::Synth => Waveform::Sawtooth,
        }
    }

    /// Multiplier applied to the note volume.
    pub fn volume_scale(self) -> f64 {
        match self {
            NoteSound::Flute => 0.8,
            NoteSound::Xylophone => 0.6,
            NoteSound::Piano | NoteSound::Synth => 1.0,
        }
    }

    pub fn fade(self) -> f64 {
        match self {
            NoteSound::Xylophone => 0.01,
            _ => DEFAULT_FADE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickSound {
    #[default]
    Woodblock,
    Beep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSpec {
    pub frequency: f64,
    /// Seconds.
    pub duration: f64,
    /// Peak gain after the fade in.
    pub gain: f64,
    pub waveform: Waveform,
    /// Linear fade length at each end, in seconds.
    pub fade: f64,
}

impl ToneSpec {
    pub fn for_note(sound: NoteSound, frequency: f64, duration: f64, volume: f64) -> Self {
        Self {
            frequency,
            duration,
            gain: volume * sound.volume_scale(),
            waveform: sound.waveform(),
            fade: sound.fade(),
        }
    }

    /// Envelope gain `t` seconds after the tone starts.
    pub fn envelope(&self, t: f64) -> f64 {
        if t < 0.0 || t >= self.duration {
            return 0.0;
        }
        let fade = self.fade.min(self.duration / 2.0);
        if fade <= 0.0 {
            return self.gain;
        }
        let ramp = (t / fade).min((self.duration - t) / fade).min(1.0);
        self.gain * ramp
    }
}

/// Render a tone to mono samples.
pub fn render_tone(spec: &ToneSpec, sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as f64;
    let len = (spec.duration * rate).round().max(0.0) as usize;
    (0..len)
        .map(|i| {
            let t = i as f64 / rate;
            (spec.waveform.sample(spec.frequency * t) * spec.envelope(t)) as f32
        })
        .collect()
}

/// Generate one metronome click.
///
/// Downbeats decay more slowly (woodblock) or sit higher (beep, 800 Hz vs
/// 600 Hz). Gain is applied separately by [`click_gain`].
pub fn click_buffer(sound: ClickSound, downbeat: bool, sample_rate: u32, rng: &mut impl Rng) -> Vec<f32> {
    let len = (sample_rate as f64 * CLICK_DURATION) as usize;
    let mut output = vec![0.0f32; len];

    for i in 0..len {
        let phase = i as f64 / len as f64;
        let (signal, envelope) = match sound {
            ClickSound::Beep => {
                let freq = if downbeat { 800.0 } else { 600.0 };
                let signal = (TAU * freq * i as f64 / sample_rate as f64).sin();
                (signal, (-phase * 4.0).exp())
            }
            ClickSound::Woodblock => {
                let mut noise: f64 = rng.random_range(-1.0..1.0);
                // One-pole smoothing against the previous output sample
                if i > 0 {
                    noise = noise * 0.7 + output[i - 1] as f64 * 0.3;
                }
                let decay = if downbeat { 8.0 } else { 12.0 };
                (noise, (-phase * decay).exp())
            }
        };
        output[i] = (signal * envelope) as f32;
    }

    output
}

/// Click gain: downbeats are louder.
pub fn click_gain(volume: f64, downbeat: bool) -> f32 {
    (volume * if downbeat { 1.2 } else { 0.8 }) as f32
}
