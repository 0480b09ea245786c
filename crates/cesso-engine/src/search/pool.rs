//! Lazy SMP thread pool for parallel search.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cesso_core::{generate_legal_moves, Board, Color, Move};

use crate::search::control::SearchControl;
use crate::search::heuristics::{
    CaptureHistory, ContinuationHistory, CorrectionHistory, CountermoveTable, HistoryTable,
    KillerTable, StackEntry,
};
use crate::search::negamax::{INF, MAX_PLY, PvTable, SearchContext, aspiration_search};
use crate::search::tt::TranspositionTable;
use crate::search::SearchResult;
use crate::search::StabilityTracker;

/// Build a fresh search context sharing `tt` and seeded with `history`
/// (ancestor position hashes, for repetition detection) and `contempt`.
fn new_context<'a>(
    tt: &'a TranspositionTable,
    control: &'a SearchControl,
    history: &[u64],
    contempt: i32,
    engine_color: Color,
) -> SearchContext<'a> {
    SearchContext {
        nodes: 0,
        tt,
        pv: PvTable::new(),
        control,
        killers: KillerTable::new(),
        history_table: HistoryTable::new(),
        cont_history: Box::new(ContinuationHistory::new()),
        correction_history: Box::new(CorrectionHistory::new()),
        capture_history: CaptureHistory::new(),
        countermoves: CountermoveTable::new(),
        stack: [StackEntry::EMPTY; MAX_PLY],
        history: history.to_vec(),
        contempt,
        engine_color,
        seldepth: 0,
        multipv: 1,
        excluded_root_moves: Vec::new(),
    }
}

/// A helper thread's final iteration result, used for best-thread selection.
struct HelperResult {
    best_move: Move,
    score: i32,
    depth: u8,
    nodes: u64,
}

/// Lazy SMP thread pool — owns the shared transposition table.
pub struct ThreadPool {
    tt: TranspositionTable,
    num_threads: usize,
    contempt: i32,
    multipv: usize,
}

impl ThreadPool {
    /// Create a new thread pool with `hash_mb` MB transposition table.
    pub fn new(hash_mb: usize) -> Self {
        Self {
            tt: TranspositionTable::new(hash_mb),
            num_threads: 1,
            contempt: 0,
            multipv: 1,
        }
    }

    /// Set the number of search threads.
    pub fn set_num_threads(&mut self, n: usize) {
        self.num_threads = n.max(1);
    }

    /// Resize the transposition table.
    pub fn resize_tt(&mut self, mb: usize) {
        self.tt = TranspositionTable::new(mb);
    }

    /// Clear the transposition table.
    pub fn clear_tt(&self) {
        self.tt.clear();
    }

    /// Set the contempt factor in centipawns, applied by every search thread.
    pub fn set_contempt(&mut self, contempt: i32) {
        self.contempt = contempt;
    }

    /// Set the number of root PV lines to search and report (`MultiPV`).
    pub fn set_multipv(&mut self, n: usize) {
        self.multipv = n.max(1);
    }

    /// Transposition table occupancy, in permille (0-1000), for the UCI `hashfull` field.
    pub fn hashfull(&self) -> u32 {
        self.tt.hashfull()
    }

    /// Run a Lazy SMP search.
    ///
    /// Thread 0 runs full iterative deepening with the `on_iter` callback for UCI output.
    /// Threads 1..N-1 run silent iterative deepening, contributing only to the shared TT.
    /// Uses `std::thread::scope` — no `Arc` needed on the TT.
    pub fn search<F>(
        &self,
        board: &Board,
        max_depth: u8,
        control: &SearchControl,
        history: &[u64],
        mut on_iter: F,
    ) -> SearchResult
    where
        F: FnMut(u8, u8, usize, i32, u64, &[Move]),
    {
        self.tt.new_generation();

        if self.num_threads <= 1 {
            // Single-thread fast path — no scope overhead
            return self.search_single(board, max_depth, control, history, on_iter);
        }

        // Shared node counters — one AtomicU64 per thread to avoid contention
        let node_counters: Vec<AtomicU64> = (0..self.num_threads)
            .map(|_| AtomicU64::new(0))
            .collect();
        let helper_results: Mutex<Vec<HelperResult>> = Mutex::new(Vec::new());

        let mut result = SearchResult {
            best_move: Move::NULL,
            ponder_move: None,
            pv: vec![Move::NULL],
            score: -INF,
            nodes: 0,
            depth: 0,
            seldepth: 0,
        };

        let contempt = self.contempt;
        std::thread::scope(|s| {
            // Spawn N-1 helper threads (thread_id 1..num_threads)
            for (thread_id, node_counter) in node_counters.iter().enumerate().skip(1) {
                let tt = &self.tt;
                let helper_results = &helper_results;
                s.spawn(move || {
                    let helper = run_helper(
                        thread_id,
                        tt,
                        board,
                        max_depth,
                        control,
                        node_counter,
                        history,
                        contempt,
                    );
                    helper_results.lock().unwrap().push(helper);
                });
            }

            // Thread 0 runs on this thread (the coordinator)
            result = self.search_main(board, max_depth, control, history, &mut on_iter, &node_counters[0]);
        });
        // scope auto-joins all helpers here

        // Sum node counts from all threads
        let total_nodes: u64 = node_counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();

        let main_result = HelperResult {
            best_move: result.best_move,
            score: result.score,
            depth: result.depth,
            nodes: result.nodes,
        };
        let helpers = helper_results.into_inner().unwrap();
        if let Some(winner) = select_best_thread(&main_result, &helpers)
            && winner.best_move != result.best_move
        {
            result.best_move = winner.best_move;
            result.score = winner.score;
            result.depth = winner.depth;
            // PV/ponder move are only tracked on the coordinator thread; a
            // helper thread winning just swaps the move UCI reports.
            result.pv = vec![winner.best_move];
            result.ponder_move = None;
        }
        result.nodes = total_nodes;

        result
    }

    /// Single-thread fast path — no scope overhead.
    fn search_single<F>(
        &self,
        board: &Board,
        max_depth: u8,
        control: &SearchControl,
        history: &[u64],
        mut on_iter: F,
    ) -> SearchResult
    where
        F: FnMut(u8, u8, usize, i32, u64, &[Move]),
    {
        run_iterative_deepening(
            &self.tt,
            board,
            max_depth,
            control,
            history,
            self.contempt,
            self.multipv,
            &mut on_iter,
            None,
        )
    }

    /// Thread 0 search — same as single, but stores final node count to an atomic counter.
    fn search_main<F>(
        &self,
        board: &Board,
        max_depth: u8,
        control: &SearchControl,
        history: &[u64],
        on_iter: &mut F,
        node_counter: &AtomicU64,
    ) -> SearchResult
    where
        F: FnMut(u8, u8, usize, i32, u64, &[Move]),
    {
        run_iterative_deepening(
            &self.tt,
            board,
            max_depth,
            control,
            history,
            self.contempt,
            self.multipv,
            on_iter,
            Some(node_counter),
        )
    }
}

/// Drives the depth-by-depth, slot-by-slot root search shared by the
/// single-thread fast path and the coordinator thread. For `multipv > 1`,
/// each depth runs the aspiration search once per PV slot, excluding the
/// root moves already reported by earlier slots at this depth so the next
/// slot's search surfaces the next-best root move.
#[allow(clippy::too_many_arguments)]
fn run_iterative_deepening<F>(
    tt: &TranspositionTable,
    board: &Board,
    max_depth: u8,
    control: &SearchControl,
    history: &[u64],
    contempt: i32,
    multipv: usize,
    on_iter: &mut F,
    node_counter: Option<&AtomicU64>,
) -> SearchResult
where
    F: FnMut(u8, u8, usize, i32, u64, &[Move]),
{
    let mut ctx = new_context(tt, control, history, contempt, board.side_to_move());

    let root_move_count = generate_legal_moves(board).len().max(1);
    let multipv = multipv.min(root_move_count);
    ctx.multipv = multipv;

    let mut slot_prev_score = vec![0i32; multipv];
    let mut slot_best_move = vec![Move::NULL; multipv];
    let mut slot_best_score = vec![-INF; multipv];
    let mut slot_best_pv: Vec<Vec<Move>> = vec![Vec::new(); multipv];
    let mut stability = StabilityTracker::new();
    let mut completed_depth: u8 = 0;

    for depth in 1..=max_depth {
        if control.should_stop_iterating() {
            break;
        }

        ctx.excluded_root_moves.clear();
        let mut depth_aborted = false;

        for slot in 0..multipv {
            let score = aspiration_search(board, depth, slot_prev_score[slot], &mut ctx);

            if control.should_stop(ctx.nodes) {
                depth_aborted = true;
                break;
            }

            slot_prev_score[slot] = score;

            let pv = ctx.pv.root_pv();
            let mv = if !pv.is_empty() && !pv[0].is_null() {
                pv[0]
            } else {
                Move::NULL
            };
            let pv_vec: Vec<Move> = pv.iter().copied().filter(|m| !m.is_null()).collect();

            slot_best_move[slot] = mv;
            slot_best_score[slot] = score;
            slot_best_pv[slot] = if pv_vec.is_empty() {
                vec![mv]
            } else {
                pv_vec
            };

            if !mv.is_null() {
                ctx.excluded_root_moves.push(mv);
            }

            on_iter(depth, ctx.seldepth, slot + 1, score, ctx.nodes, &slot_best_pv[slot]);
        }

        if depth_aborted {
            break;
        }

        completed_depth = depth;
        let scale = stability.update(slot_best_move[0], slot_best_score[0]);
        control.update_soft_scale(scale);
    }

    if let Some(counter) = node_counter {
        counter.store(ctx.nodes, Ordering::Relaxed);
    }

    let best_pv = std::mem::take(&mut slot_best_pv[0]);
    let ponder_move = if best_pv.len() > 1 { Some(best_pv[1]) } else { None };

    SearchResult {
        best_move: slot_best_move[0],
        ponder_move,
        pv: if best_pv.is_empty() {
            vec![slot_best_move[0]]
        } else {
            best_pv
        },
        score: slot_best_score[0],
        nodes: ctx.nodes,
        depth: completed_depth,
        seldepth: ctx.seldepth,
    }
}

/// Silent helper thread for Lazy SMP — writes to TT only, no UCI output.
#[allow(clippy::too_many_arguments)]
fn run_helper(
    thread_id: usize,
    tt: &TranspositionTable,
    board: &Board,
    max_depth: u8,
    control: &SearchControl,
    node_counter: &AtomicU64,
    history: &[u64],
    contempt: i32,
) -> HelperResult {
    let mut ctx = new_context(tt, control, history, contempt, board.side_to_move());

    // Depth offset: helpers start at different depths to increase search divergence.
    // Helper i starts at depth 1 + (i % 2), so odd helpers skip depth 1.
    let start_depth: u8 = 1 + (thread_id % 2) as u8;

    let mut prev_score: i32 = 0;
    let mut completed_move = Move::NULL;
    let mut completed_score = -INF;
    let mut completed_depth: u8 = 0;

    for depth in start_depth..=max_depth {
        if control.should_stop_iterating() {
            break;
        }

        let score = aspiration_search(board, depth, prev_score, &mut ctx);

        if control.should_stop(ctx.nodes) {
            break;
        }

        prev_score = score;

        let pv = ctx.pv.root_pv();
        if !pv.is_empty() && !pv[0].is_null() {
            completed_move = pv[0];
        }
        completed_score = score;
        completed_depth = depth;
    }

    node_counter.store(ctx.nodes, Ordering::Relaxed);

    HelperResult {
        best_move: completed_move,
        score: completed_score,
        depth: completed_depth,
        nodes: ctx.nodes,
    }
}

/// Pick the result to report to UCI out of the coordinator thread (`main`)
/// and every helper thread, the way Lazy SMP engines reconcile Lazy SMP
/// threads: rank by `score_votes * depth` (deeper, more decisive results win),
/// tie-broken by depth then by node count.
///
/// A helper only overrides the coordinator if it actually completed at least
/// one iteration — a helper with `depth == 0` never contributes a move.
fn select_best_thread<'a>(
    main: &'a HelperResult,
    helpers: &'a [HelperResult],
) -> Option<&'a HelperResult> {
    let mut best = main;
    for helper in helpers {
        if helper.depth == 0 || helper.best_move.is_null() {
            continue;
        }
        if thread_rank(helper) > thread_rank(best)
            || (thread_rank(helper) == thread_rank(best)
                && (helper.depth, helper.nodes) > (best.depth, best.nodes))
        {
            best = helper;
        }
    }
    if best.depth == 0 || best.best_move.is_null() {
        None
    } else {
        Some(best)
    }
}

/// Score+depth product used to rank threads' final results, biased toward
/// deeper, more mate-like scores without letting a deep loss outrank a
/// shallower win.
fn thread_rank(result: &HelperResult) -> i64 {
    (result.score as i64) * (result.depth as i64 + 1)
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("tt", &self.tt)
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(16)
    }
}
