//! # Export
//!
//! Downloadable artifacts: the exercise as a `.xml` file, an offline render
//! of the reference melody, and a take mixed with that reference as `.wav`.

use std::path::Path;

use crate::audio::wav::write_wav;
use crate::audio::{AudioContextSlot, OfflineContext};
use crate::error::SightSingError;
use crate::exercise::ExerciseScore;
use crate::musicxml::exercise_to_musicxml;
use crate::playback::{PlaybackMode, PlaybackScheduler, SoundSettings};
use crate::recorder::Recording;
use crate::score::ParsedScore;

/// Peak level after normalization.
const TARGET_PEAK: f32 = 0.95;

/// Relative levels of the two sources in a mix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixLevels {
    pub recording: f32,
    pub reference: f32,
}

impl Default for MixLevels {
    fn default() -> Self {
        Self {
            recording: 1.0,
            reference: 0.5,
        }
    }
}

pub fn write_musicxml(exercise: &ExerciseScore, path: &Path) -> Result<(), SightSingError> {
    std::fs::write(path, exercise_to_musicxml(exercise))?;
    log::info!("wrote MusicXML to {}", path.display());
    Ok(())
}

/// Render a score offline with the playback scheduler.
///
/// The render covers the whole session, count-in included when `mode`
/// plays clicks.
pub fn render_reference(
    score: &ParsedScore,
    mode: PlaybackMode,
    sounds: &SoundSettings,
    sample_rate: u32,
) -> Result<Vec<f32>, SightSingError> {
    let slot = AudioContextSlot::new(move || Ok(OfflineContext::new(sample_rate)));
    let mut scheduler = PlaybackScheduler::new(slot);
    let report = scheduler.play_score(score, mode, sounds)?;

    let duration = report.stop_at - report.start_time;
    let samples = scheduler
        .audio()
        .get()
        .map(|ctx| ctx.render(duration))
        .ok_or_else(|| SightSingError::AudioContext("offline context vanished".to_string()))?;
    log::debug!("rendered {:.2}s of {}", duration, mode);
    Ok(samples)
}

/// Mix a take with a reference render. The result is as long as the take
/// and peak-normalized.
pub fn mix_with_reference(
    recording: &Recording,
    reference: &[f32],
    reference_rate: u32,
    levels: MixLevels,
) -> Vec<f32> {
    let reference = resample(reference, reference_rate, recording.sample_rate);
    let mut mixed: Vec<f32> = recording
        .samples
        .iter()
        .enumerate()
        .map(|(i, s)| {
            s * levels.recording + reference.get(i).copied().unwrap_or(0.0) * levels.reference
        })
        .collect();
    normalize_peak(&mut mixed);
    mixed
}

/// Mix and write the result as a 16-bit WAV file.
pub fn write_mix(
    recording: &Recording,
    reference: &[f32],
    reference_rate: u32,
    levels: MixLevels,
    path: &Path,
) -> Result<(), SightSingError> {
    let mixed = mix_with_reference(recording, reference, reference_rate, levels);
    write_wav(path, &mixed, recording.sample_rate)?;
    log::info!("wrote {:.2}s mix to {}", recording.duration(), path.display());
    Ok(())
}

fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let scale = TARGET_PEAK / peak;
    for s in samples.iter_mut() {
        *s *= scale;
    }
}

/// Linear-interpolation resampling.
fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || to == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let len = (samples.len() as f64 / ratio).floor() as usize;
    (0..len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let index = pos.floor() as usize;
            let frac = (pos - index as f64) as f32;
            let a = samples[index.min(samples.len() - 1)];
            let b = samples[(index + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
