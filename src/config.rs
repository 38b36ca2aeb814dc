//! # Practice Configuration
//!
//! User-authored YAML settings. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```yaml
//! tempo: 96
//! sounds:
//!   notes: flute
//!   click: beep
//! metronome:
//!   volume: 0.5
//! evaluator:
//!   base-url: https://example.supabase.co
//!   function: evaluate-singing
//!   api-key-env: SIGHTSING_API_KEY
//! score-log: scores.jsonl
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SightSingError;
use crate::playback::SoundSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MetronomeSettings {
    pub enabled: bool,
    pub volume: f64,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EvaluatorSettings {
    /// Service root; when absent grading runs offline.
    pub base_url: Option<String>,
    /// Edge function name, appended as `/functions/v1/{function}`.
    pub function: String,
    /// Environment variable holding the bearer key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            function: "evaluate-singing".to_string(),
            api_key_env: "SIGHTSING_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl EvaluatorSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PracticeConfig {
    /// Quarter notes per minute.
    pub tempo: f64,
    pub sample_rate: u32,
    pub sounds: SoundSettings,
    pub metronome: MetronomeSettings,
    pub evaluator: EvaluatorSettings,
    /// JSON-lines file receiving one record per graded attempt.
    pub score_log: Option<PathBuf>,
    /// Recordings start at the beginning of the count-in measure.
    pub count_in: bool,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            tempo: 120.0,
            sample_rate: 44_100,
            sounds: SoundSettings::default(),
            metronome: MetronomeSettings::default(),
            evaluator: EvaluatorSettings::default(),
            score_log: None,
            count_in: true,
        }
    }
}

impl PracticeConfig {
    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, SightSingError> {
        // serde_yaml rejects an empty document; treat it as all defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PracticeConfig =
            serde_yaml::from_str(content).map_err(|e| SightSingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SightSingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), SightSingError> {
        if !(20.0..=300.0).contains(&self.tempo) {
            return Err(SightSingError::Config(format!(
                "tempo must be between 20 and 300 BPM, got {}",
                self.tempo
            )));
        }
        if self.sample_rate == 0 {
            return Err(SightSingError::Config(
                "sample-rate must be positive".to_string(),
            ));
        }
        let volumes = [
            ("sounds.note-volume", self.sounds.note_volume),
            ("sounds.click-volume", self.sounds.click_volume),
            ("metronome.volume", self.metronome.volume),
        ];
        for (name, volume) in volumes {
            if !(0.0..=1.0).contains(&volume) {
                return Err(SightSingError::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    name, volume
                )));
            }
        }
        Ok(())
    }
}
