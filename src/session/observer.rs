use shakmaty::Color;
use shakmaty::uci::Uci;
use tracing::{info, warn};

/// Who chose a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mover {
    Human,
    Policy,
}

/// Trait for observing session events
pub trait SessionObserver {
    /// Called when the board is reset to the starting position
    fn on_game_reset(&mut self);

    /// Called after a move was applied to the board
    fn on_move_played(&mut self, side: Color, mover: Mover, uci: &Uci);

    /// Called when a decoded policy move was not legal and a random one replaced it
    fn on_illegal_decode(&mut self, decoded: Option<&Uci>, substitute: &Uci);

    /// Called when the game ends, with the result string and number of plies
    fn on_game_finished(&mut self, result: &str, moves: usize, episodes_stored: usize);

    /// Called after the synchronous end-of-game training step
    fn on_training_step(&mut self, loss: Option<f32>);
}

pub struct DefaultObserver;

impl SessionObserver for DefaultObserver {
    fn on_game_reset(&mut self) {
        info!("Game reset");
    }

    fn on_move_played(&mut self, side: Color, mover: Mover, uci: &Uci) {
        info!("{:?} ({:?}) played {}", side, mover, uci);
    }

    fn on_illegal_decode(&mut self, decoded: Option<&Uci>, substitute: &Uci) {
        match decoded {
            Some(decoded) => warn!("Decoded move {} is illegal, playing {} instead", decoded, substitute),
            None => warn!("Policy produced no move, playing {} instead", substitute),
        }
    }

    fn on_game_finished(&mut self, result: &str, moves: usize, episodes_stored: usize) {
        info!(
            "Game finished {} after {} moves, stored {} episodes",
            result, moves, episodes_stored
        );
    }

    fn on_training_step(&mut self, loss: Option<f32>) {
        match loss {
            Some(loss) => info!("End-of-game training step: loss={:.4}", loss),
            None => info!("End-of-game training step skipped, no episodes"),
        }
    }
}
