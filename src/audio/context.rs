use crate::audio::synth::ToneSpec;
use crate::error::SightSingError;

/// Handle to one scheduled source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not yet unlocked by a user gesture.
    Suspended,
    Running,
    Closed,
}

/// What a node plays.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// An oscillator with a fade envelope.
    Tone(ToneSpec),
    /// A mono buffer at the context sample rate, scaled by `gain`.
    Buffer { samples: Vec<f32>, gain: f32 },
}

impl AudioSource {
    /// Natural length in seconds.
    pub fn duration(&self, sample_rate: u32) -> f64 {
        match self {
            AudioSource::Tone(spec) => spec.duration,
            AudioSource::Buffer { samples, .. } => samples.len() as f64 / sample_rate as f64,
        }
    }
}

/// The audio hardware clock and output graph.
///
/// All scheduling is expressed in context seconds (`current_time`), which
/// advance independently of the caller. Nodes started with a future `when`
/// sound without further involvement from the caller.
pub trait AudioContext {
    fn state(&self) -> ContextState;

    fn current_time(&self) -> f64;

    fn sample_rate(&self) -> u32;

    /// Move a suspended context to `Running`.
    fn resume(&mut self) -> Result<(), SightSingError>;

    /// Schedule `source` to start at context time `when`.
    fn start_source(&mut self, source: AudioSource, when: f64) -> NodeId;

    /// Stop a node now. Nodes that have not started yet never sound;
    /// stopping a finished or unknown node is a no-op.
    fn stop_source(&mut self, node: NodeId);

    /// Silence every node and release the device.
    fn close(&mut self);
}

type ContextFactory<C> = Box<dyn FnMut() -> Result<C, SightSingError> + Send>;

/// Lazily created, explicitly owned audio context.
///
/// The context is created on the first [`acquire`](Self::acquire), resumed
/// (not recreated) on later calls, recreated only after it was closed, and
/// closed by [`release`](Self::release) or on drop.
pub struct AudioContextSlot<C: AudioContext> {
    context: Option<C>,
    factory: ContextFactory<C>,
}

impl<C: AudioContext> AudioContextSlot<C> {
    pub fn new(factory: impl FnMut() -> Result<C, SightSingError> + Send + 'static) -> Self {
        Self {
            context: None,
            factory: Box::new(factory),
        }
    }

    /// Return a running context, creating or resuming it as needed.
    pub fn acquire(&mut self) -> Result<&mut C, SightSingError> {
        let usable = matches!(
            self.context.as_ref().map(AudioContext::state),
            Some(ContextState::Suspended) | Some(ContextState::Running)
        );
        if !usable {
            let created = (self.factory)()?;
            log::debug!("created audio context at {} Hz", created.sample_rate());
            self.context = Some(created);
        }

        let Some(context) = self.context.as_mut() else {
            return Err(SightSingError::AudioContext(
                "audio context was not created".to_string(),
            ));
        };
        if context.state() == ContextState::Suspended {
            log::debug!("resuming suspended audio context");
            context.resume()?;
        }
        if context.state() != ContextState::Running {
            return Err(SightSingError::AudioContext(
                "audio context failed to start, try again from a user gesture".to_string(),
            ));
        }
        Ok(context)
    }

    /// The current context, if one has been created.
    pub fn get(&self) -> Option<&C> {
        self.context.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.context.as_mut()
    }

    pub fn release(&mut self) {
        if let Some(mut context) = self.context.take() {
            log::debug!("closing audio context");
            context.close();
        }
    }
}

impl<C: AudioContext> Drop for AudioContextSlot<C> {
    fn drop(&mut self) {
        self.release();
    }
}
