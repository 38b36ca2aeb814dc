//! # Recorder
//!
//! Microphone capture behind the [`CaptureSource`] seam. Acquiring the
//! microphone is asynchronous and is the place permission failures
//! surface. The recorder announces `Started`/`Stopped` on a crossbeam
//! channel so other components (the metronome) can follow the recording
//! without holding a reference to it.

use async_trait::async_trait;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::path::PathBuf;

use crate::audio::wav::{decode_wav, encode_wav};
use crate::error::SightSingError;

/// Requested capture format and processing. A live microphone honors the
/// rate and channel count where the device allows and runs the gate and
/// gain control in software; [`WavFileSource`] delivers the file as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// A source of mono input samples.
#[async_trait]
pub trait CaptureSource: Send {
    /// Acquire the device. Returns the sample rate actually delivered.
    async fn open(&mut self, constraints: &CaptureConstraints) -> Result<u32, SightSingError>;

    /// Samples captured since the previous read; empty when none are ready.
    async fn read(&mut self) -> Result<Vec<f32>, SightSingError>;

    async fn close(&mut self);
}

/// Samples read from a WAV file, delivered in fixed-size chunks.
pub struct WavFileSource {
    path: PathBuf,
    chunk: usize,
    samples: Vec<f32>,
    position: usize,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk: 4_096,
            samples: Vec::new(),
            position: 0,
        }
    }
}

#[async_trait]
impl CaptureSource for WavFileSource {
    async fn open(&mut self, _constraints: &CaptureConstraints) -> Result<u32, SightSingError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            SightSingError::Permission(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let (samples, sample_rate) = decode_wav(&bytes)?;
        self.samples = samples;
        self.position = 0;
        Ok(sample_rate)
    }

    async fn read(&mut self) -> Result<Vec<f32>, SightSingError> {
        let end = (self.position + self.chunk).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    async fn close(&mut self) {
        self.samples.clear();
        self.position = 0;
    }
}

/// Recorder notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecorderEvent {
    Started { sample_rate: u32 },
    Stopped { duration: f64 },
}

/// A finished take.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, SightSingError> {
        encode_wav(&self.samples, self.sample_rate)
    }

    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, SightSingError> {
        let (samples, sample_rate) = decode_wav(bytes)?;
        Ok(Self::new(samples, sample_rate))
    }
}

enum RecorderState {
    Idle,
    Recording { sample_rate: u32, samples: Vec<f32> },
}

pub struct Recorder<S: CaptureSource> {
    source: S,
    constraints: CaptureConstraints,
    state: RecorderState,
    events: Sender<RecorderEvent>,
}

impl<S: CaptureSource> Recorder<S> {
    pub fn new(source: S, events: Sender<RecorderEvent>) -> Self {
        Self {
            source,
            constraints: CaptureConstraints::default(),
            state: RecorderState::Idle,
            events,
        }
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Acquire the input and begin a new take.
    pub async fn start(&mut self) -> Result<(), SightSingError> {
        if self.is_recording() {
            return Err(SightSingError::InvalidState(
                "a recording is already in progress".to_string(),
            ));
        }

        let sample_rate = self.source.open(&self.constraints).await?;
        self.state = RecorderState::Recording {
            sample_rate,
            samples: Vec::new(),
        };
        log::info!("recording started at {} Hz", sample_rate);
        self.notify(RecorderEvent::Started { sample_rate });
        Ok(())
    }

    /// Pull whatever the source has buffered. Returns the number of new samples.
    pub async fn capture(&mut self) -> Result<usize, SightSingError> {
        let RecorderState::Recording { samples, .. } = &mut self.state else {
            return Err(SightSingError::InvalidState("not recording".to_string()));
        };
        let chunk = self.source.read().await?;
        samples.extend_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Flush the source, release it, and return the take.
    pub async fn stop(&mut self) -> Result<Recording, SightSingError> {
        if !self.is_recording() {
            return Err(SightSingError::InvalidState("not recording".to_string()));
        }
        let flushed = self.source.read().await;
        self.source.close().await;

        let RecorderState::Recording {
            sample_rate,
            mut samples,
        } = std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return Err(SightSingError::InvalidState("not recording".to_string()));
        };
        samples.extend(flushed?);

        let recording = Recording::new(samples, sample_rate);
        log::info!("recording stopped after {:.2}s", recording.duration());
        self.notify(RecorderEvent::Stopped {
            duration: recording.duration(),
        });
        Ok(recording)
    }

    fn notify(&self, event: RecorderEvent) {
        if self.events.send(event).is_err() {
            log::debug!("no listener for recorder event {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::write_wav;

    /// A microphone that never grants access.
    struct DeniedSource;

    #[async_trait]
    impl CaptureSource for DeniedSource {
        async fn open(&mut self, _: &CaptureConstraints) -> Result<u32, SightSingError> {
            Err(SightSingError::Permission("access denied by user".to_string()))
        }

        async fn read(&mut self) -> Result<Vec<f32>, SightSingError> {
            Ok(Vec::new())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_records_wav_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&path, &vec![0.25; 10_000], 8_000).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut recorder = Recorder::new(WavFileSource::new(&path), tx);
        recorder.start().await.unwrap();
        assert!(recorder.is_recording());
        assert_eq!(rx.try_recv(), Ok(RecorderEvent::Started { sample_rate: 8_000 }));

        assert_eq!(recorder.capture().await.unwrap(), 4_096);
        let recording = recorder.stop().await.unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recording.samples.len(), 8_192);
        assert_eq!(recording.sample_rate, 8_000);
        assert_eq!(
            rx.try_recv(),
            Ok(RecorderEvent::Stopped {
                duration: recording.duration()
            })
        );
    }

    #[tokio::test]
    async fn test_permission_denied_is_surfaced() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut recorder = Recorder::new(DeniedSource, tx);
        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, SightSingError::Permission(_)));
        assert!(!recorder.is_recording());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_permission_error() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut recorder = Recorder::new(WavFileSource::new("/nonexistent/take.wav"), tx);
        assert!(matches!(
            recorder.start().await,
            Err(SightSingError::Permission(_))
        ));
    }

    #[tokio::test]
    async fn test_double_start_and_idle_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&path, &[0.0; 100], 8_000).unwrap();

        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut recorder = Recorder::new(WavFileSource::new(&path), tx);
        assert!(matches!(
            recorder.stop().await,
            Err(SightSingError::InvalidState(_))
        ));
        recorder.start().await.unwrap();
        assert!(matches!(
            recorder.start().await,
            Err(SightSingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_recording_wav_round_trip_keeps_duration() {
        let recording = Recording::new(vec![0.1; 4_410], 44_100);
        assert!((recording.duration() - 0.1).abs() < 1e-12);
        let decoded = Recording::from_wav_bytes(&recording.to_wav_bytes().unwrap()).unwrap();
        assert_eq!(decoded.samples.len(), 4_410);
        assert_eq!(decoded.sample_rate, 44_100);
    }

    #[test]
    fn test_default_constraints() {
        let constraints = CaptureConstraints::default();
        assert_eq!(constraints.sample_rate, 44_100);
        assert_eq!(constraints.channels, 1);
        assert!(constraints.noise_suppression && constraints.auto_gain_control);
    }
}
