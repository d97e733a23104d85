//! Episode store - a bounded FIFO of finished games, sampled for training
//!
//! One episode is one side's moves of one game, tagged with that side's final
//! reward. Sampling draws episodes, then one random step inside each.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use rand::seq::index;

use super::action_space::Action;
use super::encoder::EncodedState;

/// Default number of episodes kept
pub const DEFAULT_CAPACITY: usize = 2000;

/// One side's history of a finished game
#[derive(Debug, Clone)]
pub struct Episode {
    pub states: Vec<EncodedState>,
    pub actions: Vec<Action>,
    pub reward: f32,
}

impl Episode {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Training triples drawn from the store, all three vectors have equal length
#[derive(Debug, Clone, Default)]
pub struct SampledBatch {
    pub states: Vec<EncodedState>,
    pub actions: Vec<Action>,
    pub rewards: Vec<f32>,
}

impl SampledBatch {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Fixed-capacity episode ring buffer, safe to share between the game and the trainer
#[derive(Debug)]
pub struct EpisodeStore {
    capacity: usize,
    episodes: Mutex<VecDeque<Episode>>,
}

impl EpisodeStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            episodes: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an episode, evicting the oldest one when full.
    ///
    /// Empty episodes and episodes whose states and actions disagree in length
    /// are ignored. Returns whether the episode was stored.
    pub fn add(&self, states: Vec<EncodedState>, actions: Vec<Action>, reward: f32) -> bool {
        if states.is_empty() || states.len() != actions.len() || self.capacity == 0 {
            return false;
        }

        let mut episodes = self.lock();
        while episodes.len() >= self.capacity {
            episodes.pop_front();
        }
        episodes.push_back(Episode {
            states,
            actions,
            reward,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the stored episodes, oldest first
    pub fn episodes(&self) -> Vec<Episode> {
        self.lock().iter().cloned().collect()
    }

    /// Sample up to `batch_size` (state, action, reward) triples.
    ///
    /// Episodes are drawn without replacement when the store holds at least
    /// `batch_size` of them and with replacement otherwise, so the batch size
    /// stays stable while data is scarce.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> SampledBatch {
        let episodes = self.lock();
        let mut batch = SampledBatch::default();

        if episodes.is_empty() || batch_size == 0 {
            return batch;
        }

        let picks: Vec<usize> = if episodes.len() >= batch_size {
            index::sample(rng, episodes.len(), batch_size).into_vec()
        } else {
            (0..batch_size)
                .map(|_| rng.random_range(0..episodes.len()))
                .collect()
        };

        for pick in picks {
            let episode = &episodes[pick];
            if episode.is_empty() {
                continue;
            }
            let step = rng.random_range(0..episode.len());
            batch.states.push(episode.states[step].clone());
            batch.actions.push(episode.actions[step]);
            batch.rewards.push(episode.reward);
        }

        batch
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Episode>> {
        self.episodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EpisodeStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::encoder::encode_state;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use shakmaty::Chess;

    fn states(n: usize) -> Vec<EncodedState> {
        vec![encode_state(&Chess::default()); n]
    }

    /// Episode whose reward identifies it
    fn add_tagged(store: &EpisodeStore, tag: f32, len: usize) {
        let actions = (0..len).collect();
        assert!(store.add(states(len), actions, tag));
    }

    #[test]
    fn test_add_rejects_empty_and_mismatched() {
        let store = EpisodeStore::new(4);
        assert!(!store.add(Vec::new(), Vec::new(), 1.0));
        assert!(!store.add(states(2), vec![0], 1.0));
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let store = EpisodeStore::new(3);
        for tag in 0..5 {
            add_tagged(&store, tag as f32, 1);
        }

        assert_eq!(store.len(), 3);
        let rewards: Vec<f32> = store.episodes().iter().map(|e| e.reward).collect();
        assert_eq!(rewards, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_sample_empty_store_or_zero_batch() {
        let mut rng = StdRng::seed_from_u64(1);
        let store = EpisodeStore::new(4);
        assert!(store.sample(8, &mut rng).is_empty());

        add_tagged(&store, 1.0, 3);
        assert!(store.sample(0, &mut rng).is_empty());
    }

    #[test]
    fn test_sample_with_replacement_when_scarce() {
        let mut rng = StdRng::seed_from_u64(2);
        let store = EpisodeStore::new(10);
        add_tagged(&store, 1.0, 3);
        add_tagged(&store, -1.0, 2);

        let batch = store.sample(8, &mut rng);
        assert_eq!(batch.len(), 8);
        assert_eq!(batch.actions.len(), 8);
        assert_eq!(batch.rewards.len(), 8);
        for (&action, &reward) in batch.actions.iter().zip(&batch.rewards) {
            if reward > 0.0 {
                assert!(action < 3);
            } else {
                assert!(action < 2);
            }
        }
    }

    #[test]
    fn test_sample_without_replacement_when_plentiful() {
        let mut rng = StdRng::seed_from_u64(3);
        let store = EpisodeStore::new(20);
        for tag in 0..10 {
            add_tagged(&store, tag as f32, 4);
        }

        for _ in 0..20 {
            let batch = store.sample(10, &mut rng);
            assert_eq!(batch.len(), 10);
            let mut rewards = batch.rewards.clone();
            rewards.sort_by(f32::total_cmp);
            rewards.dedup();
            assert_eq!(rewards.len(), 10);
        }
    }

    #[test]
    fn test_sample_is_reproducible() {
        let store = EpisodeStore::new(10);
        for tag in 0..6 {
            add_tagged(&store, tag as f32, 5);
        }

        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let batch = store.sample(4, &mut rng);
            (batch.actions, batch.rewards)
        };
        assert_eq!(draw(9), draw(9));
    }
}
