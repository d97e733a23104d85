use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::rl::background::LoopConfig;
use crate::rl::policy::PolicyConfig;
use crate::rl::replay::DEFAULT_CAPACITY;
use crate::rl::train::TrainConfig;
use crate::session::SessionConfig;

/// Runtime settings, read from `CHESSMIND_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
    pub checkpoint_name: String,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub replay_capacity: usize,
    pub epsilon: f64,
    pub train_every_games: usize,
    pub save_every_games: usize,
    pub train_interval: Duration,
    pub save_every_ticks: u64,
    pub stop_timeout: Duration,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            model_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
            checkpoint_name: "latest_model".to_string(),
            learning_rate: 1e-4,
            batch_size: 32,
            replay_capacity: DEFAULT_CAPACITY,
            epsilon: 0.05,
            train_every_games: 1,
            save_every_games: 5,
            train_interval: Duration::from_millis(1000),
            save_every_ticks: 5,
            stop_timeout: Duration::from_millis(2000),
            seed: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their default, malformed ones
    /// keep it too and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            addr: parse_or(get("CHESSMIND_ADDR"), "CHESSMIND_ADDR", defaults.addr),
            model_dir: get("CHESSMIND_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            data_dir: get("CHESSMIND_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            checkpoint_name: get("CHESSMIND_CHECKPOINT").unwrap_or(defaults.checkpoint_name),
            learning_rate: parse_or(
                get("CHESSMIND_LEARNING_RATE"),
                "CHESSMIND_LEARNING_RATE",
                defaults.learning_rate,
            ),
            batch_size: parse_or(
                get("CHESSMIND_BATCH_SIZE"),
                "CHESSMIND_BATCH_SIZE",
                defaults.batch_size,
            ),
            replay_capacity: parse_or(
                get("CHESSMIND_REPLAY_CAPACITY"),
                "CHESSMIND_REPLAY_CAPACITY",
                defaults.replay_capacity,
            ),
            epsilon: parse_or(get("CHESSMIND_EPSILON"), "CHESSMIND_EPSILON", defaults.epsilon)
                .clamp(0.0, 1.0),
            train_every_games: parse_or(
                get("CHESSMIND_TRAIN_EVERY_GAMES"),
                "CHESSMIND_TRAIN_EVERY_GAMES",
                defaults.train_every_games,
            ),
            save_every_games: parse_or(
                get("CHESSMIND_SAVE_EVERY_GAMES"),
                "CHESSMIND_SAVE_EVERY_GAMES",
                defaults.save_every_games,
            ),
            train_interval: Duration::from_millis(parse_or(
                get("CHESSMIND_TRAIN_INTERVAL_MS"),
                "CHESSMIND_TRAIN_INTERVAL_MS",
                defaults.train_interval.as_millis() as u64,
            )),
            save_every_ticks: parse_or(
                get("CHESSMIND_SAVE_EVERY_TICKS"),
                "CHESSMIND_SAVE_EVERY_TICKS",
                defaults.save_every_ticks,
            ),
            stop_timeout: Duration::from_millis(parse_or(
                get("CHESSMIND_STOP_TIMEOUT_MS"),
                "CHESSMIND_STOP_TIMEOUT_MS",
                defaults.stop_timeout.as_millis() as u64,
            )),
            seed: get("CHESSMIND_SEED").and_then(|value| parse_some(&value, "CHESSMIND_SEED")),
        }
    }

    /// Checkpoint path without the recorder extension
    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_dir.join(&self.checkpoint_name)
    }

    pub fn perf_log_path(&self) -> PathBuf {
        self.data_dir.join("perf.json")
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            seed: self.seed,
            policy_config: PolicyConfig::default(),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: self.train_interval,
            save_every: self.save_every_ticks,
            checkpoint: self.checkpoint_path(),
            stop_timeout: self.stop_timeout,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            epsilon: self.epsilon,
            train_every_games: self.train_every_games,
            save_every_games: self.save_every_games,
            checkpoint: self.checkpoint_path(),
            seed: self.seed,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> T {
    value
        .and_then(|value| parse_some(&value, key))
        .unwrap_or(default)
}

fn parse_some<T: FromStr>(value: &str, key: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring malformed {}={:?}", key, value);
            None
        }
    }
}
