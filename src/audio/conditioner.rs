//! Live input conditioning: a noise gate and an automatic gain control,
//! both running per sample so chunk boundaries do not matter.

use crate::recorder::CaptureConstraints;

/// Envelope level below which the gate closes, about -40 dBFS.
pub const GATE_THRESHOLD: f32 = 0.01;
/// Peak level the gain control steers toward.
pub const AGC_TARGET: f32 = 0.5;

const GATE_ATTACK_SECONDS: f64 = 0.002;
const GATE_RELEASE_SECONDS: f64 = 0.08;
const ENVELOPE_RELEASE_SECONDS: f64 = 0.05;
const AGC_PEAK_RELEASE_SECONDS: f64 = 0.4;
const AGC_SMOOTHING_SECONDS: f64 = 0.2;
const AGC_MIN_GAIN: f32 = 0.25;
const AGC_MAX_GAIN: f32 = 8.0;

/// One-pole coefficient for a time constant at `sample_rate`.
fn pole(seconds: f64, sample_rate: u32) -> f32 {
    (-1.0 / (seconds * sample_rate.max(1) as f64)).exp() as f32
}

#[derive(Debug, Clone)]
struct NoiseGate {
    envelope: f32,
    gain: f32,
    envelope_release: f32,
    attack: f32,
    release: f32,
}

impl NoiseGate {
    fn new(sample_rate: u32) -> Self {
        Self {
            envelope: 0.0,
            gain: 0.0,
            envelope_release: pole(ENVELOPE_RELEASE_SECONDS, sample_rate),
            attack: pole(GATE_ATTACK_SECONDS, sample_rate),
            release: pole(GATE_RELEASE_SECONDS, sample_rate),
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.envelope = x.abs().max(self.envelope * self.envelope_release);
        let (target, coef) = if self.envelope >= GATE_THRESHOLD {
            (1.0, self.attack)
        } else {
            (0.0, self.release)
        };
        self.gain = target + (self.gain - target) * coef;
        x * self.gain
    }
}

#[derive(Debug, Clone)]
struct AutoGain {
    peak: f32,
    gain: f32,
    peak_release: f32,
    smoothing: f32,
}

impl AutoGain {
    fn new(sample_rate: u32) -> Self {
        Self {
            peak: 0.0,
            gain: 1.0,
            peak_release: pole(AGC_PEAK_RELEASE_SECONDS, sample_rate),
            smoothing: pole(AGC_SMOOTHING_SECONDS, sample_rate),
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.peak = x.abs().max(self.peak * self.peak_release);
        let desired = (AGC_TARGET / self.peak.max(1e-4)).clamp(AGC_MIN_GAIN, AGC_MAX_GAIN);
        self.gain = desired + (self.gain - desired) * self.smoothing;
        (x * self.gain).clamp(-1.0, 1.0)
    }
}

/// Average interleaved frames down to mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Processing requested by [`CaptureConstraints`], gate first.
#[derive(Debug, Clone)]
pub struct InputConditioner {
    gate: Option<NoiseGate>,
    agc: Option<AutoGain>,
}

impl InputConditioner {
    pub fn new(constraints: &CaptureConstraints, sample_rate: u32) -> Self {
        Self {
            gate: constraints
                .noise_suppression
                .then(|| NoiseGate::new(sample_rate)),
            agc: constraints
                .auto_gain_control
                .then(|| AutoGain::new(sample_rate)),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.gate.is_none() && self.agc.is_none()
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        if self.is_passthrough() {
            return;
        }
        for sample in samples.iter_mut() {
            let mut x = *sample;
            if let Some(gate) = self.gate.as_mut() {
                x = gate.process(x);
            }
            if let Some(agc) = self.agc.as_mut() {
                x = agc.process(x);
            }
            *sample = x;
        }
    }
}
