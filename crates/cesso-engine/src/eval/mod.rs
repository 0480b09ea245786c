//! Evaluation module for cesso engine.
//!
//! Two evaluation backends are available behind feature flags:
//! - `hce`: the handcrafted tapered evaluation below (material, PST,
//!   mobility, king safety, pawn structure, outposts, rooks).
//! - `nnue`: the neural network evaluation in [`nnue`].
//!
//! Both are white-relative internally; [`evaluate`] negates for the side to
//! move and applies the small tempo bonus search engines rely on to avoid
//! evaluating a position as dead-even right after the side to move changes.

pub mod king_safety;
pub mod material;
pub mod mobility;
#[cfg(feature = "nnue")]
pub mod nnue;
pub mod outposts;
pub mod pawns;
pub mod phase;
pub mod pst;
pub mod rooks;
pub mod score;

use cesso_core::{Board, Color, PieceKind};

use phase::MAX_PHASE;
use score::{Score, S};

/// Bonus awarded to the side to move, offsetting the fact that it is their
/// turn to exploit any imbalance.
const TEMPO_BONUS: Score = S(15, 5);

/// Sum piece-square table values for every piece on the board.
fn evaluate_pst(board: &Board) -> Score {
    let mut score = Score::ZERO;
    for kind in PieceKind::ALL {
        for color in [Color::White, Color::Black] {
            let pieces = board.pieces(kind) & board.side(color);
            for sq in pieces {
                let value = pst::pst_value(kind, color, sq);
                score += if color == Color::White { value } else { -value };
            }
        }
    }
    score
}

/// Combine every handcrafted evaluation term into a single white-relative,
/// phase-tapered score.
#[cfg(feature = "hce")]
fn evaluate_hce(board: &Board) -> i32 {
    let score = material::material(board)
        + evaluate_pst(board)
        + mobility::evaluate_mobility(board)
        + king_safety::evaluate_king_safety(board)
        + pawns::evaluate_pawns(board)
        + outposts::evaluate_outposts(board)
        + rooks::evaluate_rooks(board);

    let phase = phase::game_phase(board);
    let tapered = (score.mg() as i32 * phase + score.eg() as i32 * (MAX_PHASE - phase)) / MAX_PHASE;

    let stm_relative = if board.side_to_move() == Color::White {
        tapered
    } else {
        -tapered
    };
    stm_relative + TEMPO_BONUS.mg() as i32
}

/// Evaluate a position from the side to move's perspective.
///
/// Dispatches to the handcrafted evaluation or the NNUE evaluation depending
/// on which feature is enabled; `nnue` takes priority when both are active
/// since it is the stronger of the two.
pub fn evaluate(board: &Board) -> i32 {
    #[cfg(feature = "nnue")]
    {
        nnue::evaluate(board)
    }
    #[cfg(all(feature = "hce", not(feature = "nnue")))]
    {
        evaluate_hce(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesso_core::Board;

    #[test]
    fn starting_position_is_near_zero() {
        let board = Board::starting_position();
        let score = evaluate(&board);
        assert!(score.abs() < 50, "expected near-symmetric eval, got {score}");
    }

    #[test]
    fn missing_queen_favors_opponent() {
        let board: Board = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNB1KBNR w KQkq - 0 1"
            .parse()
            .unwrap();
        assert!(evaluate(&board) < -500);
    }

    #[test]
    fn eval_is_symmetric_for_mirrored_positions() {
        let white_to_move: Board = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1".parse().unwrap();
        let black_to_move: Board = "4k3/4p3/8/8/8/8/8/4K3 b - - 0 1".parse().unwrap();
        let a = evaluate(&white_to_move);
        let b = evaluate(&black_to_move);
        assert!((a - b).abs() < 20, "mirrored positions should score near-equally: {a} vs {b}");
    }
}
