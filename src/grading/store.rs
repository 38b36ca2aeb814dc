//! Score persistence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::error::SightSingError;

use super::GradingResults;

/// One saved attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Overall score, 0-100.
    pub score_value: u8,
    pub notes: String,
}

impl ScoreRecord {
    pub fn from_results(results: &GradingResults) -> Self {
        Self {
            score_value: (results.overall * 100.0).round().clamp(0.0, 100.0) as u8,
            notes: format!(
                "{} ({}): pitch {:.0}%, rhythm {:.0}%, rests {:.0}%",
                results.letter,
                results.source,
                results.pitch_acc * 100.0,
                results.rhythm_acc * 100.0,
                results.rest_acc * 100.0
            ),
        }
    }
}

#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn save(&self, record: &ScoreRecord) -> Result<(), SightSingError>;
}

/// Appends one JSON object per line.
pub struct JsonlScoreStore {
    path: PathBuf,
}

impl JsonlScoreStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every record saved so far, oldest first. A missing file is empty.
    pub async fn records(&self) -> Result<Vec<ScoreRecord>, SightSingError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SightSingError::Persistence(e.to_string())),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| SightSingError::Persistence(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ScoreStore for JsonlScoreStore {
    async fn save(&self, record: &ScoreRecord) -> Result<(), SightSingError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| SightSingError::Persistence(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                SightSingError::Persistence(format!("cannot open {}: {}", self.path.display(), e))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SightSingError::Persistence(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SightSingError::Persistence(e.to_string()))?;
        log::debug!("saved score {} to {}", record.score_value, self.path.display());
        Ok(())
    }
}
