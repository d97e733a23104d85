//! State encoder for RL - converts a chess position to occupancy planes

use shakmaty::{Board, Chess, Color, Position, Role, Square};

/// One plane per (color, piece type): white pawn..king, then black pawn..king
pub const PLANES: usize = 12;

/// Board edge length
pub const BOARD_SIZE: usize = 8;

/// Number of floats in one encoded state
pub const STATE_SIZE: usize = PLANES * BOARD_SIZE * BOARD_SIZE;

/// Flat `[PLANES, 8, 8]` occupancy tensor. Row 0 is rank 8, column 0 is file a.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedState(Box<[f32]>);

impl EncodedState {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Value at (plane, row, col)
    pub fn get(&self, plane: usize, row: usize, col: usize) -> f32 {
        self.0[index(plane, row, col)]
    }
}

/// Encode the position before the move is played
pub fn encode_state(pos: &Chess) -> EncodedState {
    encode_board(pos.board())
}

pub fn encode_board(board: &Board) -> EncodedState {
    let mut planes = vec![0.0; STATE_SIZE];

    for square in Square::ALL {
        if let Some(piece) = board.piece_at(square) {
            let plane = color_offset(piece.color) + role_plane(piece.role);
            let row = BOARD_SIZE - 1 - usize::from(square.rank());
            let col = usize::from(square.file());
            planes[index(plane, row, col)] = 1.0;
        }
    }

    EncodedState(planes.into_boxed_slice())
}

fn index(plane: usize, row: usize, col: usize) -> usize {
    (plane * BOARD_SIZE + row) * BOARD_SIZE + col
}

fn color_offset(color: Color) -> usize {
    match color {
        Color::White => 0,
        Color::Black => 6,
    }
}

fn role_plane(role: Role) -> usize {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    }
}
