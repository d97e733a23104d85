//! Online reinforcement learning for the chess policy
//!
//! # Architecture
//!
//! ```text
//! Chess position
//!     │
//!     ├──────────────────────────────┐
//!     ▼                              ▼
//! ┌───────────────────────┐   ┌──────────────────────────────┐
//! │  encoder              │   │  action_space                │
//! │  12 x 8 x 8 planes    │   │  legal moves -> mask         │
//! └───────────────────────┘   └──────────────────────────────┘
//!     │                              │
//!     ▼                              │
//! ┌───────────────────────┐          │
//! │  policy               │          │
//! │  planes -> logits     │          │
//! └───────────────────────┘          │
//!     │                              │
//!     ▼                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  sampler                                                │
//! │  masked softmax + epsilon-greedy -> action -> move      │
//! └─────────────────────────────────────────────────────────┘
//!
//! finished game ──► replay (EpisodeStore) ◄── train (Trainer) ◄── background loop
//! ```

pub mod action_space;
pub mod background;
pub mod encoder;
pub mod metrics;
pub mod policy;
pub mod replay;
pub mod sampler;
pub mod train;

pub use action_space::{ACTION_SIZE, Action, ActionSpace, CodecError};
pub use background::{BackgroundTrainer, LoopConfig, LossCallback, TickOutcome};
pub use encoder::{EncodedState, encode_state};
pub use metrics::{PerfLog, TrainingStats};
pub use policy::{PolicyConfig, PolicyNet};
pub use replay::{Episode, EpisodeStore, SampledBatch};
pub use sampler::{masked_softmax, sample_action};
pub use train::{CheckpointError, TrainConfig, Trainer};
