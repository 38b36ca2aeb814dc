//! Live audio through the default devices (cpal).
//!
//! cpal streams are not `Send`, so each stream is owned by its own thread
//! and driven over crossbeam channels. [`DeviceContext`] plays through the
//! default output, its clock being the frame counter of the [`Mixer`] the
//! output callback pulls from. [`MicrophoneSource`] captures the default
//! input and applies the requested conditioning.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, SampleRate, SupportedStreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::error::SightSingError;
use crate::recorder::{CaptureConstraints, CaptureSource};

use super::conditioner::{downmix, InputConditioner};
use super::context::{AudioContext, AudioSource, ContextState, NodeId};
use super::mixer::Mixer;
use super::synth::render_tone;

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_stream_error(err: cpal::StreamError) {
    log::error!("audio stream error: {}", err);
}

enum OutputCommand {
    Play(Sender<Result<(), String>>),
    Close,
}

/// The default output device as an [`AudioContext`].
pub struct DeviceContext {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    state: ContextState,
    next_id: u64,
    commands: Sender<OutputCommand>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceContext {
    /// Open the default output device. The stream stays paused, and the
    /// context suspended, until the first `resume`.
    pub fn open() -> Result<Self, SightSingError> {
        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let (ready_tx, ready_rx) = bounded(1);
        let (commands, command_rx) = unbounded();
        let stream_mixer = Arc::clone(&mixer);
        let thread = thread::Builder::new()
            .name("sightsing-output".to_string())
            .spawn(move || run_output(stream_mixer, ready_tx, command_rx))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(SightSingError::AudioContext(
                    "audio output thread exited".to_string(),
                ))
            }
        };
        log::info!("audio output open at {} Hz", sample_rate);

        Ok(Self {
            mixer,
            sample_rate,
            state: ContextState::Suspended,
            next_id: 0,
            commands,
            thread: Some(thread),
        })
    }
}

impl AudioContext for DeviceContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn current_time(&self) -> f64 {
        lock(&self.mixer).clock() as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> Result<(), SightSingError> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(SightSingError::AudioContext(
                "context is closed".to_string(),
            )),
            ContextState::Suspended => {
                let exited = || SightSingError::AudioContext("audio output thread exited".to_string());
                let (reply_tx, reply_rx) = bounded(1);
                self.commands
                    .send(OutputCommand::Play(reply_tx))
                    .map_err(|_| exited())?;
                match reply_rx.recv() {
                    Ok(Ok(())) => {
                        self.state = ContextState::Running;
                        Ok(())
                    }
                    Ok(Err(e)) => Err(SightSingError::AudioContext(format!(
                        "audio output could not start: {}",
                        e
                    ))),
                    Err(_) => Err(exited()),
                }
            }
        }
    }

    fn start_source(&mut self, source: AudioSource, when: f64) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let samples = match source {
            AudioSource::Tone(spec) => render_tone(&spec, self.sample_rate),
            AudioSource::Buffer { samples, gain } => samples.into_iter().map(|s| s * gain).collect(),
        };
        let start = (when.max(0.0) * self.sample_rate as f64).round() as u64;
        lock(&self.mixer).schedule(id, samples, start);
        id
    }

    fn stop_source(&mut self, node: NodeId) {
        lock(&self.mixer).stop(node);
    }

    fn close(&mut self) {
        if self.state == ContextState::Closed {
            return;
        }
        lock(&self.mixer).clear();
        let _ = self.commands.send(OutputCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("audio output thread panicked");
            }
        }
        self.state = ContextState::Closed;
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_output(
    mixer: Arc<Mutex<Mixer>>,
    ready: Sender<Result<u32, SightSingError>>,
    commands: Receiver<OutputCommand>,
) {
    let stream = match build_output_stream(mixer) {
        Ok((stream, rate)) => {
            if ready.send(Ok(rate)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands.iter() {
        match command {
            OutputCommand::Play(reply) => {
                let _ = reply.send(stream.play().map_err(|e| e.to_string()));
            }
            OutputCommand::Close => break,
        }
    }
    drop(stream);
}

fn build_output_stream(mixer: Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, u32), SightSingError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SightSingError::AudioContext("no audio output device".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| SightSingError::AudioContext(format!("audio output config: {}", e)))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| lock(&mixer).fill(data, channels),
            log_stream_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    lock(&mixer).fill(&mut scratch, channels);
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = (sample * i16::MAX as f32) as i16;
                    }
                },
                log_stream_error,
                None,
            )
        }
        other => {
            return Err(SightSingError::AudioContext(format!(
                "unsupported output sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| SightSingError::AudioContext(format!("audio output stream: {}", e)))?;

    Ok((stream, sample_rate))
}

struct InputStream {
    chunks: Receiver<Vec<f32>>,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// The default microphone as a [`CaptureSource`].
///
/// Honors the requested sample rate and channel count when the device
/// supports them, always delivers mono, and runs the noise gate and gain
/// control the constraints ask for.
#[derive(Default)]
pub struct MicrophoneSource {
    stream: Option<InputStream>,
    conditioner: Option<InputConditioner>,
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaptureSource for MicrophoneSource {
    async fn open(&mut self, constraints: &CaptureConstraints) -> Result<u32, SightSingError> {
        if self.stream.is_some() {
            self.close().await;
        }

        let requested = *constraints;
        let (ready_tx, ready_rx) = bounded(1);
        let (chunk_tx, chunk_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("sightsing-input".to_string())
            .spawn(move || run_input(requested, ready_tx, chunk_tx, stop_rx))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| SightSingError::Permission(format!("microphone start interrupted: {}", e)))?;
        let sample_rate = match ready {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(SightSingError::Permission(
                    "microphone thread exited".to_string(),
                ))
            }
        };

        self.conditioner = Some(InputConditioner::new(constraints, sample_rate));
        self.stream = Some(InputStream {
            chunks: chunk_rx,
            stop: stop_tx,
            thread,
        });
        Ok(sample_rate)
    }

    async fn read(&mut self) -> Result<Vec<f32>, SightSingError> {
        let Some(stream) = &self.stream else {
            return Err(SightSingError::InvalidState(
                "microphone is not open".to_string(),
            ));
        };
        let mut samples: Vec<f32> = stream.chunks.try_iter().flatten().collect();
        if let Some(conditioner) = self.conditioner.as_mut() {
            conditioner.process(&mut samples);
        }
        Ok(samples)
    }

    async fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let _ = stream.stop.send(());
        let thread = stream.thread;
        let joined = tokio::task::spawn_blocking(move || thread.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            log::warn!("microphone thread did not shut down cleanly");
        }
        self.conditioner = None;
    }
}

fn run_input(
    constraints: CaptureConstraints,
    ready: Sender<Result<u32, SightSingError>>,
    chunks: Sender<Vec<f32>>,
    stop: Receiver<()>,
) {
    let stream = match build_input_stream(&constraints, chunks) {
        Ok((stream, rate)) => {
            if ready.send(Ok(rate)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = stop.recv();
    drop(stream);
}

fn input_error(err: BuildStreamError) -> SightSingError {
    match err {
        BuildStreamError::DeviceNotAvailable => SightSingError::Permission(
            "microphone is not available (disconnected or access denied)".to_string(),
        ),
        other => SightSingError::Permission(format!("microphone could not be opened: {}", other)),
    }
}

/// A config at the requested rate, preferring the requested channel count;
/// the device default otherwise.
fn input_config(
    device: &cpal::Device,
    constraints: &CaptureConstraints,
) -> Result<SupportedStreamConfig, SightSingError> {
    let wanted = SampleRate(constraints.sample_rate);
    if let Ok(ranges) = device.supported_input_configs() {
        let matching = ranges
            .filter(|r| matches!(r.sample_format(), SampleFormat::F32 | SampleFormat::I16))
            .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
            .min_by_key(|r| (r.channels() != constraints.channels, r.channels()));
        if let Some(range) = matching {
            return Ok(range.with_sample_rate(wanted));
        }
    }
    log::info!(
        "microphone cannot deliver {} Hz, using its default configuration",
        constraints.sample_rate
    );
    device
        .default_input_config()
        .map_err(|e| SightSingError::Permission(format!("microphone unavailable: {}", e)))
}

fn build_input_stream(
    constraints: &CaptureConstraints,
    chunks: Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), SightSingError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SightSingError::Permission("no microphone available".to_string()))?;
    let supported = input_config(&device, constraints)?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = chunks.send(downmix(data, channels));
            },
            log_stream_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| *s as f32 / 32_768.0).collect();
                let _ = chunks.send(downmix(&samples, channels));
            },
            log_stream_error,
            None,
        ),
        other => {
            return Err(SightSingError::Permission(format!(
                "unsupported microphone sample format {:?}",
                other
            )))
        }
    }
    .map_err(input_error)?;

    stream
        .play()
        .map_err(|e| SightSingError::Permission(format!("microphone could not start: {}", e)))?;
    log::info!(
        "microphone open at {} Hz, {} channel(s)",
        sample_rate,
        channels
    );
    Ok((stream, sample_rate))
}
