//! Live game session - board, per-side episode buffers and the hand-off to training
//!
//! Every applied move, human or policy, records the pre-move encoded position
//! and its action for the side that moved. When the game ends each side's
//! buffer becomes one episode with that side's terminal reward.

pub mod observer;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Outcome, Position};

use crate::rl::action_space::{Action, ActionSpace, encode_move};
use crate::rl::encoder::{EncodedState, encode_state};
use crate::rl::metrics::{PerfLog, TrainingStats};
use crate::rl::sampler::sample_action;
use crate::rl::train::Trainer;

pub use observer::{DefaultObserver, Mover, SessionObserver};

/// Half-moves without capture or pawn move after which the game is drawn
pub const SEVENTY_FIVE_MOVE_PLIES: u32 = 150;

pub const WIN_REWARD: f32 = 1.0;
pub const LOSS_REWARD: f32 = -1.0;
pub const DRAW_REWARD: f32 = 0.5;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Probability of a uniformly random legal policy move
    pub epsilon: f64,
    /// Run one synchronous train step after this many finished games, 0 disables
    pub train_every_games: usize,
    /// Checkpoint after this many finished games, 0 disables
    pub save_every_games: usize,
    /// Checkpoint path handed to `Trainer::save`
    pub checkpoint: PathBuf,
    /// Seed for move sampling, random when unset
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.05,
            train_every_games: 1,
            save_every_games: 5,
            checkpoint: PathBuf::from("models/latest_model"),
            seed: None,
        }
    }
}

/// Reply to a move request, rendered as the boundary's string sentinels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveReply {
    Invalid,
    Ok,
    Played(Uci),
    GameOver(&'static str),
}

impl fmt::Display for MoveReply {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MoveReply::Invalid => write!(formatter, "invalid"),
            MoveReply::Ok => write!(formatter, "ok"),
            MoveReply::Played(uci) => write!(formatter, "{}", uci),
            MoveReply::GameOver(result) => write!(formatter, "game_over:{}", result),
        }
    }
}

#[derive(Debug, Default)]
struct PendingEpisode {
    states: Vec<EncodedState>,
    actions: Vec<Action>,
}

/// Standard result notation
pub fn result_string(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Decisive {
            winner: Color::White,
        } => "1-0",
        Outcome::Decisive {
            winner: Color::Black,
        } => "0-1",
        Outcome::Draw => "1/2-1/2",
    }
}

/// Terminal rewards for (white, black)
pub fn rewards(outcome: Outcome) -> (f32, f32) {
    match outcome {
        Outcome::Decisive {
            winner: Color::White,
        } => (WIN_REWARD, LOSS_REWARD),
        Outcome::Decisive {
            winner: Color::Black,
        } => (LOSS_REWARD, WIN_REWARD),
        Outcome::Draw => (DRAW_REWARD, DRAW_REWARD),
    }
}

/// Turn a sampled action into a legal move.
///
/// Illegal-decode recovery: when the decoded move is not legal here, a uniformly
/// random legal move is substituted and the second element is true. This is a
/// lossy fallback; the substitute is unrelated to what the policy chose.
pub fn resolve_action<R: rand::Rng + ?Sized>(
    pos: &Chess,
    space: &ActionSpace,
    action: Action,
    rng: &mut R,
) -> Option<(Move, bool)> {
    let decoded = space.decode(action);
    if let Some(m) = decoded.as_ref().and_then(|uci| uci.to_move(pos).ok()) {
        return Some((m, false));
    }
    space.legal_moves().choose(rng).map(|m| (m.clone(), true))
}

/// One live game plus the training hand-off
pub struct Session<B: AutodiffBackend> {
    position: Chess,
    history: Vec<Move>,
    white: PendingEpisode,
    black: PendingEpisode,
    trainer: Arc<Trainer<B>>,
    perf: Arc<Mutex<PerfLog>>,
    observer: Box<dyn SessionObserver + Send>,
    config: SessionConfig,
    games_since_train: usize,
    finished_games: usize,
    rng: StdRng,
}

impl<B: AutodiffBackend> Session<B> {
    pub fn new(trainer: Arc<Trainer<B>>, perf: Arc<Mutex<PerfLog>>, config: SessionConfig) -> Self {
        Self::with_observer(trainer, perf, config, DefaultObserver)
    }

    pub fn with_observer(
        trainer: Arc<Trainer<B>>,
        perf: Arc<Mutex<PerfLog>>,
        config: SessionConfig,
        observer: impl SessionObserver + Send + 'static,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            position: Chess::default(),
            history: Vec::new(),
            white: PendingEpisode::default(),
            black: PendingEpisode::default(),
            trainer,
            perf,
            observer: Box::new(observer),
            config,
            games_since_train: 0,
            finished_games: 0,
            rng,
        }
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn trainer(&self) -> &Arc<Trainer<B>> {
        &self.trainer
    }

    /// Current position in FEN
    pub fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    /// Moves played so far in SAN, replayed from the starting position
    pub fn move_history(&self) -> Vec<String> {
        let mut pos = Chess::default();
        self.history
            .iter()
            .map(|m| SanPlus::from_move_and_play_unchecked(&mut pos, m).to_string())
            .collect()
    }

    /// Back to the starting position, dropping unfinished episode buffers
    pub fn reset(&mut self) -> String {
        self.position = Chess::default();
        self.history.clear();
        self.white = PendingEpisode::default();
        self.black = PendingEpisode::default();
        self.observer.on_game_reset();
        self.fen()
    }

    /// Apply a human move in UCI (`e2e4`, `e7e8q`) or SAN (`Nf3`)
    pub fn apply_human_move(&mut self, notation: &str) -> MoveReply {
        if let Some(outcome) = self.outcome() {
            return MoveReply::GameOver(result_string(outcome));
        }

        let Some(m) = self.parse_move(notation) else {
            return MoveReply::Invalid;
        };

        self.play(m, Mover::Human);
        match self.outcome() {
            Some(outcome) => MoveReply::GameOver(self.finish_game(outcome)),
            None => MoveReply::Ok,
        }
    }

    /// Let the policy choose and play a move for the side to move
    pub fn request_ai_move(&mut self) -> MoveReply {
        if let Some(outcome) = self.outcome() {
            return MoveReply::GameOver(result_string(outcome));
        }

        let space = ActionSpace::generate(&self.position);
        let state = encode_state(&self.position);
        let logits = self.trainer.policy().logits(&state, self.trainer.device());

        let Some(action) = sample_action(&logits, space.mask(), self.config.epsilon, &mut self.rng)
        else {
            return MoveReply::Invalid;
        };
        let Some((m, recovered)) = resolve_action(&self.position, &space, action, &mut self.rng)
        else {
            return MoveReply::Invalid;
        };

        let uci = m.to_uci(CastlingMode::Standard);
        if recovered {
            let decoded = space.decode(action);
            self.observer.on_illegal_decode(decoded.as_ref(), &uci);
        }

        self.play(m, Mover::Policy);
        match self.outcome() {
            Some(outcome) => MoveReply::GameOver(self.finish_game(outcome)),
            None => MoveReply::Played(uci),
        }
    }

    pub fn training_stats(&self) -> TrainingStats {
        self.lock_perf().stats()
    }

    /// Recorded but not yet stored moves of one side
    pub fn pending_moves(&self, side: Color) -> usize {
        match side {
            Color::White => self.white.actions.len(),
            Color::Black => self.black.actions.len(),
        }
    }

    /// Terminal classification, including the seventy-five-move draw
    pub fn outcome(&self) -> Option<Outcome> {
        self.position.outcome().or_else(|| {
            (self.position.halfmoves() >= SEVENTY_FIVE_MOVE_PLIES).then_some(Outcome::Draw)
        })
    }

    fn parse_move(&self, notation: &str) -> Option<Move> {
        let notation = notation.trim();
        if let Ok(uci) = notation.parse::<Uci>() {
            return uci.to_move(&self.position).ok();
        }
        let san: SanPlus = notation.parse().ok()?;
        san.san.to_move(&self.position).ok()
    }

    fn play(&mut self, m: Move, mover: Mover) {
        let side = self.position.turn();
        let uci = m.to_uci(CastlingMode::Standard);

        match encode_move(&m) {
            Ok(action) => {
                let pending = match side {
                    Color::White => &mut self.white,
                    Color::Black => &mut self.black,
                };
                pending.states.push(encode_state(&self.position));
                pending.actions.push(action);
            }
            Err(err) => tracing::warn!("Not recording move: {}", err),
        }

        self.position.play_unchecked(&m);
        self.history.push(m);
        self.observer.on_move_played(side, mover, &uci);
    }

    fn finish_game(&mut self, outcome: Outcome) -> &'static str {
        let result = result_string(outcome);
        let (white_reward, black_reward) = rewards(outcome);

        let store = Arc::clone(self.trainer.store());
        let mut stored = 0;
        for (pending, reward) in [
            (std::mem::take(&mut self.white), white_reward),
            (std::mem::take(&mut self.black), black_reward),
        ] {
            if store.add(pending.states, pending.actions, reward) {
                stored += 1;
            }
        }

        self.games_since_train += 1;
        self.finished_games += 1;

        if self.config.train_every_games > 0 && self.games_since_train >= self.config.train_every_games
        {
            let loss = self.trainer.train_step();
            self.lock_perf().record_training(loss);
            self.observer.on_training_step(loss);
            self.games_since_train = 0;
        }

        if self.config.save_every_games > 0 && self.finished_games % self.config.save_every_games == 0
        {
            if let Err(err) = self.trainer.save(&self.config.checkpoint) {
                tracing::warn!("End-of-game checkpoint failed: {}", err);
            }
        }

        let moves = self.history.len();
        self.lock_perf().record_game(result, moves);
        self.observer.on_game_finished(result, moves, stored);
        result
    }

    fn lock_perf(&self) -> MutexGuard<'_, PerfLog> {
        self.perf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn set_position(&mut self, position: Chess) {
        self.position = position;
    }
}
