//! Sample-clock mixer behind a live output stream.
//!
//! The output callback pulls frames with [`Mixer::fill`]; the frame counter
//! it advances is the context clock. Voices are pre-rendered buffers placed
//! at absolute frames, so a voice scheduled for a future frame sounds with
//! no further involvement from the scheduler.

use super::context::NodeId;

#[derive(Debug)]
struct Voice {
    id: NodeId,
    samples: Vec<f32>,
    start: u64,
    stop: Option<u64>,
}

impl Voice {
    fn end(&self) -> u64 {
        let natural = self.start + self.samples.len() as u64;
        self.stop.map_or(natural, |stop| stop.min(natural))
    }

    fn sample_at(&self, frame: u64) -> f32 {
        if frame < self.start || frame >= self.end() {
            return 0.0;
        }
        self.samples
            .get((frame - self.start) as usize)
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
pub struct Mixer {
    clock: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Place `samples` at `start`, or at the next frame if `start` has passed.
    pub fn schedule(&mut self, id: NodeId, samples: Vec<f32>, start: u64) {
        self.voices.push(Voice {
            id,
            samples,
            start: start.max(self.clock),
            stop: None,
        });
    }

    /// Stop a voice at the current frame. A voice that has not started is
    /// dropped and never sounds.
    pub fn stop(&mut self, id: NodeId) {
        let now = self.clock;
        self.voices.retain_mut(|voice| {
            if voice.id != id {
                return true;
            }
            if voice.start >= now {
                return false;
            }
            voice.stop.get_or_insert(now);
            true
        });
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    /// Voices that are playing or waiting to play.
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Render interleaved frames of `channels` identical samples and advance
    /// the clock by the number of frames written.
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut frames = 0u64;
        for frame in out.chunks_mut(channels) {
            let t = self.clock + frames;
            let mix: f32 = self.voices.iter().map(|v| v.sample_at(t)).sum();
            frame.fill(mix.clamp(-1.0, 1.0));
            frames += 1;
        }
        self.clock += frames;
        let now = self.clock;
        self.voices.retain(|v| v.end() > now);
    }
}
