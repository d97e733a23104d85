//! Performance log - finished games and training losses, persisted as JSON

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Entries kept per list
pub const MAX_ENTRIES: usize = 500;

/// Games returned by `stats`
pub const RECENT_GAMES: usize = 10;

/// Training records returned by `stats`
pub const RECENT_TRAINING: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub ts: i64,
    pub result: String,
    pub moves: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub ts: i64,
    pub loss: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultCounts {
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
    pub total: usize,
}

/// Summary handed to the boundary layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingStats {
    pub counts: ResultCounts,
    pub recent_games: Vec<GameRecord>,
    pub recent_training: Vec<TrainingRecord>,
}

#[derive(Debug)]
pub enum PerfLogError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for PerfLogError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PerfLogError::Io(err) => write!(formatter, "Performance log I/O failed: {}", err),
            PerfLogError::Json(err) => write!(formatter, "Performance log malformed: {}", err),
        }
    }
}

impl Error for PerfLogError {}

impl From<std::io::Error> for PerfLogError {
    fn from(err: std::io::Error) -> Self {
        PerfLogError::Io(err)
    }
}

impl From<serde_json::Error> for PerfLogError {
    fn from(err: serde_json::Error) -> Self {
        PerfLogError::Json(err)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PerfData {
    #[serde(default)]
    games: VecDeque<GameRecord>,
    #[serde(default)]
    training: VecDeque<TrainingRecord>,
}

/// Capped game/training history, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct PerfLog {
    data: PerfData,
    path: Option<PathBuf>,
}

impl PerfLog {
    /// In-memory log that never touches disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Log persisted at `path`. An existing file is loaded; a missing or
    /// unreadable one starts an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match read_data(&path) {
            Ok(data) => data,
            Err(PerfLogError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                PerfData::default()
            }
            Err(err) => {
                tracing::warn!("{}; starting a fresh log at {}", err, path.display());
                PerfData::default()
            }
        };

        let mut log = Self {
            data,
            path: Some(path),
        };
        log.truncate();
        log
    }

    pub fn games(&self) -> impl Iterator<Item = &GameRecord> {
        self.data.games.iter()
    }

    pub fn training(&self) -> impl Iterator<Item = &TrainingRecord> {
        self.data.training.iter()
    }

    pub fn record_game(&mut self, result: &str, moves: usize) {
        self.data.games.push_back(GameRecord {
            ts: now(),
            result: result.to_string(),
            moves,
        });
        self.truncate();
        self.persist();
    }

    pub fn record_training(&mut self, loss: Option<f32>) {
        self.data.training.push_back(TrainingRecord { ts: now(), loss });
        self.truncate();
        self.persist();
    }

    /// Result counts over the whole log plus the most recent entries
    pub fn stats(&self) -> TrainingStats {
        let mut counts = ResultCounts {
            total: self.data.games.len(),
            ..ResultCounts::default()
        };
        for game in &self.data.games {
            match game.result.as_str() {
                "1-0" => counts.wins += 1,
                "0-1" => counts.losses += 1,
                "1/2-1/2" => counts.draws += 1,
                _ => {}
            }
        }

        TrainingStats {
            counts,
            recent_games: tail(&self.data.games, RECENT_GAMES),
            recent_training: tail(&self.data.training, RECENT_TRAINING),
        }
    }

    /// Write the log to its file, creating the directory if needed
    pub fn save(&self) -> Result<(), PerfLogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.data)?)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(err) = self.save() {
            tracing::warn!("Failed saving performance log: {}", err);
        }
    }

    fn truncate(&mut self) {
        while self.data.games.len() > MAX_ENTRIES {
            self.data.games.pop_front();
        }
        while self.data.training.len() > MAX_ENTRIES {
            self.data.training.pop_front();
        }
    }
}

fn read_data(path: &Path) -> Result<PerfData, PerfLogError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn tail<T: Clone>(items: &VecDeque<T>, n: usize) -> Vec<T> {
    items.iter().skip(items.len().saturating_sub(n)).cloned().collect()
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
