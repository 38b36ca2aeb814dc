//! # Audio Module
//!
//! The audio hardware seam and everything that produces samples.
//!
//! ## Sub-modules
//! - `context` - [`AudioContext`] trait (clock plus output graph) and the
//!   lazily owned [`AudioContextSlot`]
//! - `offline` - [`OfflineContext`], a manually advanced clock used for
//!   rendering to files and for tests
//! - `mixer` - [`Mixer`], the frame-counting voice mixer behind a live output
//! - `conditioner` - noise gate and gain control for live input
//! - `device` - [`DeviceContext`] and [`MicrophoneSource`] on the default
//!   cpal devices (feature `device`)
//! - `synth` - note tones and metronome clicks
//! - `wav` - WAV encode/decode

mod conditioner;
mod context;
#[cfg(feature = "device")]
mod device;
mod mixer;
mod offline;
mod synth;
pub mod wav;

pub use conditioner::{downmix, InputConditioner, AGC_TARGET, GATE_THRESHOLD};
pub use context::{AudioContext, AudioContextSlot, AudioSource, ContextState, NodeId};
#[cfg(feature = "device")]
pub use device::{DeviceContext, MicrophoneSource};
pub use mixer::Mixer;
pub use offline::{NodeRecord, NodeState, OfflineContext};
pub use synth::{
    click_buffer, click_gain, render_tone, ClickSound, NoteSound, ToneSpec, Waveform,
    CLICK_DURATION, DEFAULT_FADE,
};
