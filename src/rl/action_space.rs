//! Action space for the chess policy - fixed move/index bijection and legality masking
//!
//! The first `64 * 64` indices encode plain `from -> to` moves. The trailing
//! `64 * 4` indices encode promotions as `from * 4 + piece`, which drops the
//! destination square, so decoding a promotion needs the legal move list.

use std::error::Error;
use std::fmt;

use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Move, Position, Role, Square};

/// Number of plain from/to actions
pub const FROM_TO_ACTIONS: usize = 64 * 64;

/// Promotion pieces in action order
pub const PROMOTION_ROLES: [Role; 4] = [Role::Queen, Role::Rook, Role::Bishop, Role::Knight];

/// Size of the fixed action space
pub const ACTION_SIZE: usize = FROM_TO_ACTIONS + 64 * PROMOTION_ROLES.len();

/// Index into the fixed action space, always `< ACTION_SIZE`
pub type Action = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    UnsupportedMoveKind { uci: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::UnsupportedMoveKind { uci } => {
                write!(formatter, "Move {} has no place in the action space", uci)
            }
        }
    }
}

impl Error for CodecError {}

/// Encode a UCI move. Drops, null moves and promotions outside
/// `PROMOTION_ROLES` are rejected.
pub fn encode(uci: &Uci) -> Result<Action, CodecError> {
    match uci {
        Uci::Normal {
            from,
            to,
            promotion: None,
        } => Ok(usize::from(*from) * 64 + usize::from(*to)),
        Uci::Normal {
            from,
            promotion: Some(role),
            ..
        } => PROMOTION_ROLES
            .iter()
            .position(|r| r == role)
            .map(|piece| FROM_TO_ACTIONS + usize::from(*from) * PROMOTION_ROLES.len() + piece)
            .ok_or_else(|| unsupported(uci)),
        _ => Err(unsupported(uci)),
    }
}

/// Encode a move of the rules library, castling in standard king notation.
pub fn encode_move(m: &Move) -> Result<Action, CodecError> {
    encode(&m.to_uci(CastlingMode::Standard))
}

/// Decode an action against the current legal moves.
///
/// Plain actions are rebuilt without looking at the board. Promotion actions
/// are matched on (from, piece) against `legal`; when nothing matches, or the
/// index is out of range, the first legal move is returned instead, so the
/// caller must re-validate the result. Returns `None` only when `legal` is empty.
pub fn decode(action: Action, legal: &[Move]) -> Option<Uci> {
    if action < FROM_TO_ACTIONS {
        return Some(Uci::Normal {
            from: square(action / 64),
            to: square(action % 64),
            promotion: None,
        });
    }

    let promotion_index = action - FROM_TO_ACTIONS;
    if promotion_index < 64 * PROMOTION_ROLES.len() {
        let from = square(promotion_index / PROMOTION_ROLES.len());
        let role = PROMOTION_ROLES[promotion_index % PROMOTION_ROLES.len()];

        let found = legal
            .iter()
            .find(|m| m.from() == Some(from) && m.promotion() == Some(role));
        if let Some(m) = found {
            return Some(m.to_uci(CastlingMode::Standard));
        }
    }

    legal.first().map(|m| m.to_uci(CastlingMode::Standard))
}

/// Boolean mask over the action space, true at the encoding of every legal move.
pub fn legality_mask(pos: &Chess) -> Vec<bool> {
    ActionSpace::generate(pos).mask
}

fn square(index: usize) -> Square {
    // index < 64 by construction
    Square::new(index as u32)
}

fn unsupported(uci: &Uci) -> CodecError {
    CodecError::UnsupportedMoveKind {
        uci: uci.to_string(),
    }
}

/// Legal moves of one position together with their mask
#[derive(Debug, Clone)]
pub struct ActionSpace {
    legal: Vec<Move>,
    mask: Vec<bool>,
    num_valid: usize,
}

impl ActionSpace {
    /// Generate the action space for the side to move
    pub fn generate(pos: &Chess) -> Self {
        let legal: Vec<Move> = pos.legal_moves().into_iter().collect();
        let mut mask = vec![false; ACTION_SIZE];
        let mut num_valid = 0;

        for m in &legal {
            match encode_move(m) {
                Ok(action) => {
                    if !mask[action] {
                        num_valid += 1;
                    }
                    mask[action] = true;
                }
                Err(err) => tracing::warn!("Skipping legal move: {}", err),
            }
        }

        Self {
            legal,
            mask,
            num_valid,
        }
    }

    /// Get the legality mask as a slice of bools
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn legal_moves(&self) -> &[Move] {
        &self.legal
    }

    /// Get the number of legal actions
    pub fn num_valid(&self) -> usize {
        self.num_valid
    }

    /// Check if any actions are available
    pub fn has_actions(&self) -> bool {
        self.num_valid > 0
    }

    /// Decode an action against this position's legal moves
    pub fn decode(&self, action: Action) -> Option<Uci> {
        decode(action, &self.legal)
    }
}
