//! # Error Types
//!
//! Errors surfaced by the practice engine.
//!
//! Only failures the caller can act on reach the caller:
//! - Malformed MusicXML never errors; the parser degrades to a fallback
//!   score and reports `ParseWarning`s instead.
//! - Hardware failures (`AudioContext`, `Permission`) are returned so the
//!   UI can ask the user to grant access or retry the gesture.
//! - `Evaluator` errors are consumed by the grading pipeline's fallback
//!   policy and `Persistence` errors are only logged.
//!
//! ## Usage
//! ```rust
//! use sightsing::SightSingError;
//!
//! let err = SightSingError::Permission("microphone access was denied".to_string());
//! assert_eq!(err.to_string(), "Microphone unavailable: microphone access was denied");
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SightSingError {
    /// The audio output context could not be created or resumed.
    ///
    /// Browsers and most audio hosts refuse to start output until a user
    /// gesture unlocks the device; the caller should retry from a gesture.
    #[error("Audio context unavailable: {0}")]
    AudioContext(String),

    /// Microphone acquisition failed or was denied.
    #[error("Microphone unavailable: {0}")]
    Permission(String),

    /// The external evaluation service failed or returned an unusable body.
    #[error("Evaluator error: {0}")]
    Evaluator(String),

    /// Writing a score record failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid YAML configuration or out-of-range configuration values.
    ///
    /// # Example
    /// ```
    /// # use sightsing::SightSingError;
    /// let err = SightSingError::Config("tempo must be between 20 and 300".to_string());
    /// assert_eq!(err.to_string(), "Invalid configuration: tempo must be between 20 and 300");
    /// ```
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// WAV or base64 encoding/decoding failed.
    #[error("Audio encoding error: {0}")]
    Encoding(String),

    /// Playback or recording was requested before an exercise was loaded.
    #[error("No exercise loaded: generate or select an exercise first")]
    NoExercise,

    /// Grading was requested before anything was recorded.
    #[error("No recording available: record a take before grading")]
    NoRecording,

    /// An operation was invoked in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A tempo that is not a positive, finite BPM value.
    #[error("Invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
