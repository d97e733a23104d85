//! Reward-weighted policy training on sampled episodes
//!
//! The trainer is the only owner of the trainable weights. Every update runs
//! under one lock and then publishes a fresh inference copy, so readers only
//! ever see whole parameter sets.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, RecorderError};
use burn::tensor::ElementConversion;
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::policy::{PolicyConfig, PolicyNet, states_to_tensor};
use super::replay::EpisodeStore;

/// Extension the recorder appends to checkpoint names
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Adam learning rate
    pub learning_rate: f64,
    /// Triples sampled per update
    pub batch_size: usize,
    /// Seed for weight init and episode sampling, random when unset
    pub seed: Option<u64>,
    /// Network architecture
    pub policy_config: PolicyConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            batch_size: 32,
            seed: None,
            policy_config: PolicyConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum CheckpointError {
    Io { path: PathBuf, source: std::io::Error },
    Recorder { path: PathBuf, source: RecorderError },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CheckpointError::Io { path, source } => {
                write!(formatter, "Checkpoint {} I/O failed: {}", path.display(), source)
            }
            CheckpointError::Recorder { path, source } => {
                write!(formatter, "Checkpoint {} unreadable: {:?}", path.display(), source)
            }
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            CheckpointError::Recorder { .. } => None,
        }
    }
}

type PolicyOptimizer<B> = OptimizerAdaptor<Adam, PolicyNet<B>, B>;

struct TrainerState<B: AutodiffBackend> {
    model: PolicyNet<B>,
    optimizer: PolicyOptimizer<B>,
    rng: StdRng,
    steps: u64,
}

/// Owns the policy weights, the optimizer and a handle to the episode store
pub struct Trainer<B: AutodiffBackend> {
    state: Mutex<TrainerState<B>>,
    snapshot: Mutex<PolicyNet<B::InnerBackend>>,
    store: Arc<EpisodeStore>,
    config: TrainConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(device: B::Device, store: Arc<EpisodeStore>, config: TrainConfig) -> Self {
        let model: PolicyNet<B> = config.policy_config.init_seeded(&device, config.seed);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            snapshot: Mutex::new(model.valid()),
            state: Mutex::new(TrainerState {
                model,
                optimizer: AdamConfig::new().init(),
                rng,
                steps: 0,
            }),
            store,
            config,
            device,
        }
    }

    pub fn store(&self) -> &Arc<EpisodeStore> {
        &self.store
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Latest fully-updated weights for inference
    pub fn policy(&self) -> PolicyNet<B::InnerBackend> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of optimizer updates performed so far
    pub fn steps(&self) -> u64 {
        self.lock_state().steps
    }

    /// One reward-weighted cross-entropy update on a sampled batch.
    ///
    /// Returns `None` without touching the weights when there is nothing to sample.
    pub fn train_step(&self) -> Option<f32> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let batch = self.store.sample(self.config.batch_size, &mut state.rng);
        if batch.is_empty() {
            return None;
        }

        let batch_size = batch.len();
        let states = states_to_tensor::<B>(&batch.states, &self.device);
        let actions: Vec<i64> = batch.actions.iter().map(|&a| a as i64).collect();
        let actions = Tensor::<B, 1, Int>::from_ints(actions.as_slice(), &self.device)
            .reshape([batch_size, 1]);
        let rewards = Tensor::<B, 1>::from_floats(batch.rewards.as_slice(), &self.device);

        let logits = state.model.forward(states);
        let log_probs = log_softmax(logits, 1);
        let cross_entropy = -log_probs.gather(1, actions).squeeze::<1>(1);

        // positive rewards pull towards the played action, negative ones push away
        let loss = (cross_entropy * rewards).mean();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &state.model);
        state.model = state
            .optimizer
            .step(self.config.learning_rate, state.model.clone(), grads);
        state.steps += 1;

        self.publish(&state.model);

        let loss = loss.into_scalar().elem::<f32>();
        tracing::debug!("Train step {}: loss={:.4}, batch={}", state.steps, loss, batch_size);
        Some(loss)
    }

    /// Save the weights to `path` (the recorder adds `.mpk`), creating parent directories.
    pub fn save(&self, path: &Path) -> Result<PathBuf, CheckpointError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let model = self.lock_state().model.clone();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|source| CheckpointError::Recorder {
                path: path.to_path_buf(),
                source,
            })?;

        let saved = path.with_extension(CHECKPOINT_EXTENSION);
        tracing::info!("Saved checkpoint to {}", saved.display());
        Ok(saved)
    }

    /// Restore weights from `path`. On failure the current weights stay in place.
    pub fn load(&self, path: &Path) -> Result<(), CheckpointError> {
        let file = path.with_extension(CHECKPOINT_EXTENSION);
        if !file.exists() {
            return Err(CheckpointError::Io {
                path: file,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let mut state = self.lock_state();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = state
            .model
            .clone()
            .load_file(path.to_path_buf(), &recorder, &self.device)
            .map_err(|source| CheckpointError::Recorder {
                path: file.clone(),
                source,
            })?;

        // moments of the old weights do not apply to the restored ones
        state.optimizer = AdamConfig::new().init();
        state.model = model;
        self.publish(&state.model);

        tracing::info!("Loaded checkpoint from {}", file.display());
        Ok(())
    }

    /// Load a checkpoint if possible, otherwise keep the current weights and warn.
    pub fn load_or_keep(&self, path: &Path) -> bool {
        match self.load(path) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("{}; starting from current weights", err);
                false
            }
        }
    }

    fn publish(&self, model: &PolicyNet<B>) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = model.valid();
    }

    fn lock_state(&self) -> MutexGuard<'_, TrainerState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rl::action_space::encode;
    use crate::rl::encoder::{EncodedState, encode_state};
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use shakmaty::Chess;
    use shakmaty::uci::Uci;

    pub(crate) type TestBackend = Autodiff<NdArray>;

    pub(crate) fn small_train_config() -> TrainConfig {
        TrainConfig {
            learning_rate: 1e-3,
            batch_size: 4,
            seed: Some(17),
            policy_config: PolicyConfig {
                conv_channels: [4, 4, 4],
                hidden_size: 16,
            },
        }
    }

    pub(crate) fn test_trainer(store: Arc<EpisodeStore>) -> Trainer<TestBackend> {
        Trainer::new(NdArrayDevice::Cpu, store, small_train_config())
    }

    fn seeded_trainer(store: Arc<EpisodeStore>, seed: u64, learning_rate: f64) -> Trainer<TestBackend> {
        let config = TrainConfig {
            seed: Some(seed),
            learning_rate,
            ..small_train_config()
        };
        Trainer::new(NdArrayDevice::Cpu, store, config)
    }

    fn log_prob(logits: &[f32], action: usize) -> f64 {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        let sum: f64 = logits.iter().map(|&v| (v as f64 - max).exp()).sum();
        logits[action] as f64 - max - sum.ln()
    }

    fn probe(trainer: &Trainer<TestBackend>) -> Vec<f32> {
        trainer
            .policy()
            .logits(&encode_state(&Chess::default()), trainer.device())
    }

    fn opening_episode() -> (Vec<EncodedState>, Vec<usize>) {
        let uci: Uci = "e2e4".parse().unwrap();
        (vec![encode_state(&Chess::default())], vec![encode(&uci).unwrap()])
    }

    #[test]
    fn test_train_config_default() {
        let config = TrainConfig::default();
        assert_eq!(config.batch_size, 32);
        assert!((config.learning_rate - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_train_step_on_empty_store_changes_nothing() {
        let trainer = test_trainer(Arc::new(EpisodeStore::new(8)));
        let before = probe(&trainer);

        assert_eq!(trainer.train_step(), None);
        assert_eq!(trainer.steps(), 0);
        assert_eq!(probe(&trainer), before);
    }

    #[test]
    fn test_train_step_updates_weights() {
        let store = Arc::new(EpisodeStore::new(8));
        let (states, actions) = opening_episode();
        store.add(states, actions, 1.0);

        let trainer = test_trainer(store);
        let before = probe(&trainer);

        let loss = trainer.train_step().unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
        assert_eq!(trainer.steps(), 1);
        assert_ne!(probe(&trainer), before);
    }

    #[test]
    fn test_reward_sign_moves_played_action() {
        for (reward, rises) in [(1.0, true), (-1.0, false)] {
            let store = Arc::new(EpisodeStore::new(8));
            let (states, actions) = opening_episode();
            let played = actions[0];
            store.add(states, actions, reward);

            let trainer = seeded_trainer(store, 23, 1e-4);
            let before = log_prob(&probe(&trainer), played);
            trainer.train_step().unwrap();
            let after = log_prob(&probe(&trainer), played);

            assert!(before.is_finite() && after.is_finite());
            assert_eq!(after > before, rises, "reward {}: {} -> {}", reward, before, after);
        }
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = seeded_trainer(Arc::new(EpisodeStore::new(4)), 5, 1e-4);
        let b = seeded_trainer(Arc::new(EpisodeStore::new(4)), 5, 1e-4);
        let c = seeded_trainer(Arc::new(EpisodeStore::new(4)), 6, 1e-4);
        assert_eq!(probe(&a), probe(&b));
        assert_ne!(probe(&a), probe(&c));
    }

    #[test]
    fn test_negative_reward_gives_negative_loss() {
        let store = Arc::new(EpisodeStore::new(8));
        let (states, actions) = opening_episode();
        store.add(states, actions, -1.0);

        let trainer = test_trainer(store);
        assert!(trainer.train_step().unwrap() < 0.0);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("latest_model");

        let source = test_trainer(Arc::new(EpisodeStore::new(4)));
        let saved = source.save(&path).unwrap();
        assert!(saved.exists());

        let target = seeded_trainer(Arc::new(EpisodeStore::new(4)), 18, 1e-3);
        assert_ne!(probe(&target), probe(&source));
        target.load(&path).unwrap();
        assert_eq!(probe(&target), probe(&source));
    }

    #[test]
    fn test_load_missing_checkpoint_keeps_weights() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = test_trainer(Arc::new(EpisodeStore::new(4)));
        let before = probe(&trainer);

        assert!(trainer.load(&dir.path().join("absent")).is_err());
        assert!(!trainer.load_or_keep(&dir.path().join("absent")));
        assert_eq!(probe(&trainer), before);
    }

    #[test]
    fn test_load_corrupt_checkpoint_keeps_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken");
        std::fs::write(path.with_extension(CHECKPOINT_EXTENSION), b"not a model").unwrap();

        let trainer = test_trainer(Arc::new(EpisodeStore::new(4)));
        let before = probe(&trainer);
        assert!(matches!(
            trainer.load(&path),
            Err(CheckpointError::Recorder { .. })
        ));
        assert_eq!(probe(&trainer), before);
    }
}
