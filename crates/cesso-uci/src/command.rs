//! UCI command parsing.

use std::time::Duration;

use cesso_core::{Board, Move};

use crate::error::UciError;

/// Parsed `go` parameters.
#[derive(Debug, Default, Clone)]
pub struct GoParams {
    /// White's remaining time.
    pub wtime: Option<Duration>,
    /// Black's remaining time.
    pub btime: Option<Duration>,
    /// White's increment per move.
    pub winc: Option<Duration>,
    /// Black's increment per move.
    pub binc: Option<Duration>,
    /// Moves remaining until the next time control.
    pub movestogo: Option<u32>,
    /// Search to a fixed depth in plies.
    pub depth: Option<u8>,
    /// Stop after searching this many nodes.
    pub nodes: Option<u64>,
    /// Search for exactly this long.
    pub movetime: Option<Duration>,
    /// Search until `stop`, ignoring all other limits.
    pub infinite: bool,
    /// Start the search in pondering mode (clock inactive until `ponderhit`).
    pub ponder: bool,
    /// Search only for a mate in this many moves (unused if `None`).
    pub mate: Option<u32>,
}

/// A parsed UCI command.
#[derive(Debug)]
pub enum Command {
    /// `uci` -- identify the engine.
    Uci,
    /// `isready` -- synchronization ping.
    IsReady,
    /// `ucinewgame` -- reset engine state.
    UciNewGame,
    /// `position` -- set up a board position, with the hash of every
    /// position passed through on the way there (for repetition detection).
    Position {
        /// The resulting board.
        board: Board,
        /// Zobrist hashes of every position from the root FEN/startpos up to
        /// (but not including) `board` itself.
        history: Vec<u64>,
    },
    /// `go` -- start a search with the given limits.
    Go(GoParams),
    /// `ponderhit` -- the opponent played the move we were pondering on.
    PonderHit,
    /// `stop` -- halt the current search.
    Stop,
    /// `setoption name <name> [value <value>]` -- change an engine option.
    SetOption {
        /// Option name, e.g. `Threads`, `Hash`, `MultiPV`.
        name: String,
        /// Option value, absent for buttons.
        value: Option<String>,
    },
    /// `quit` -- exit the engine.
    Quit,
    /// Unrecognized command (silently ignored per UCI spec).
    Unknown(String),
}

/// Parse a single line of UCI input into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(Command::Unknown(String::new()));
    }

    match tokens[0] {
        "uci" => Ok(Command::Uci),
        "isready" => Ok(Command::IsReady),
        "ucinewgame" => Ok(Command::UciNewGame),
        "stop" => Ok(Command::Stop),
        "ponderhit" => Ok(Command::PonderHit),
        "quit" => Ok(Command::Quit),
        "position" => parse_position(&tokens[1..]),
        "go" => parse_go(&tokens[1..]),
        "setoption" => parse_setoption(&tokens[1..]),
        _ => Ok(Command::Unknown(tokens[0].to_string())),
    }
}

/// Parse the `position` command arguments.
///
/// Supports:
/// - `position startpos [moves e2e4 d7d5 ...]`
/// - `position fen <fen-string> [moves e2e4 d7d5 ...]`
///
/// Every intermediate position's hash is recorded in `history` so the search
/// can detect repetitions that span moves already played in the game.
fn parse_position(tokens: &[&str]) -> Result<Command, UciError> {
    if tokens.is_empty() {
        return Err(UciError::MalformedPosition);
    }

    let (mut board, rest) = if tokens[0] == "startpos" {
        let rest = &tokens[1..];
        (Board::starting_position(), rest)
    } else if tokens[0] == "fen" {
        // FEN is 6 space-separated fields
        if tokens.len() < 7 {
            return Err(UciError::InvalidFen {
                fen: tokens[1..].join(" "),
            });
        }
        let fen = tokens[1..7].join(" ");
        let board: Board = fen
            .parse()
            .map_err(|_| UciError::InvalidFen { fen: fen.clone() })?;
        (board, &tokens[7..])
    } else {
        return Err(UciError::MalformedPosition);
    };

    let mut history = Vec::new();

    // Apply moves if present: "moves e2e4 d7d5 ..."
    if !rest.is_empty() && rest[0] == "moves" {
        for uci_str in &rest[1..] {
            history.push(board.hash());
            let mv = Move::from_uci(uci_str, &board).ok_or_else(|| UciError::InvalidMove {
                uci_move: uci_str.to_string(),
            })?;
            board = board.make_move(mv);
        }
    }

    Ok(Command::Position { board, history })
}

/// Parse the `go` command arguments into [`GoParams`].
fn parse_go(tokens: &[&str]) -> Result<Command, UciError> {
    let mut params = GoParams::default();

    let mut i = 0;
    while i < tokens.len() {
        macro_rules! next_u64 {
            ($name:literal) => {{
                let raw = tokens.get(i + 1).ok_or_else(|| UciError::MissingGoValue {
                    param: $name.to_string(),
                })?;
                let value: u64 = raw.parse().map_err(|_| UciError::InvalidGoValue {
                    param: $name.to_string(),
                    value: raw.to_string(),
                })?;
                i += 2;
                value
            }};
        }
        macro_rules! next_u32 {
            ($name:literal) => {{
                let raw = tokens.get(i + 1).ok_or_else(|| UciError::MissingGoValue {
                    param: $name.to_string(),
                })?;
                let value: u32 = raw.parse().map_err(|_| UciError::InvalidGoValue {
                    param: $name.to_string(),
                    value: raw.to_string(),
                })?;
                i += 2;
                value
            }};
        }

        match tokens[i] {
            "wtime" => params.wtime = Some(Duration::from_millis(next_u64!("wtime"))),
            "btime" => params.btime = Some(Duration::from_millis(next_u64!("btime"))),
            "winc" => params.winc = Some(Duration::from_millis(next_u64!("winc"))),
            "binc" => params.binc = Some(Duration::from_millis(next_u64!("binc"))),
            "movestogo" => params.movestogo = Some(next_u32!("movestogo")),
            "depth" => params.depth = Some(next_u32!("depth") as u8),
            "nodes" => params.nodes = Some(next_u64!("nodes")),
            "mate" => params.mate = Some(next_u32!("mate")),
            "movetime" => params.movetime = Some(Duration::from_millis(next_u64!("movetime"))),
            "infinite" => {
                params.infinite = true;
                i += 1;
            }
            "ponder" => {
                params.ponder = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(Command::Go(params))
}

/// Parse `setoption name <name> [value <value>]`.
fn parse_setoption(tokens: &[&str]) -> Result<Command, UciError> {
    if tokens.first() != Some(&"name") {
        return Err(UciError::MalformedSetOption);
    }

    let value_pos = tokens.iter().position(|&t| t == "value");
    let name_end = value_pos.unwrap_or(tokens.len());
    let name = tokens[1..name_end].join(" ");
    if name.is_empty() {
        return Err(UciError::MalformedSetOption);
    }

    let value = value_pos.map(|pos| tokens[pos + 1..].join(" "));

    Ok(Command::SetOption { name, value })
}
