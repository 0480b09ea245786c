//! Transposition table: clusters of three atomic entries, multiplicative
//! indexing, and XOR-based torn-write detection.
//!
//! ## Bit layout (two `AtomicU64` words per entry, 16 bytes)
//!
//! ```text
//! word0:
//!   bits 63-48: key16       (upper 16 bits of Zobrist hash)
//!   bits 47-32: move16      (packed move)
//!   bits 31-24: depth8      (search depth, clamped to i8::MAX)
//!   bits 23-16: genBound8   (bits 7-2: generation, bit 1: is_pv, bits 1-0: bound)
//!   bits 15-0:  reserved
//!
//! word1:
//!   bits 63-48: score16     (i16 as u16, mate-distance normalized)
//!   bits 47-32: eval16      (i16 as u16)
//!   bits 31-0:  check       = (word0 >> 32) XOR (word0 & 0xFFFF_FFFF)
//! ```
//!
//! Three entries form a cluster (one cache-line-sized lookup unit). The
//! cluster holding a key is found via multiplicative indexing — `(key *
//! cluster_count) >> 64` — rather than masking the low bits, so every bit of
//! the hash participates in the index instead of just the low ones.
//!
//! All atomic accesses use `Relaxed` ordering — the table doesn't need to be
//! linearizable, only to avoid reading a torn write (caught by the XOR check)
//! and any accepted entry is revalidated against the position by the
//! legality check its move goes through at the call site.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use cesso_core::Move;

// ── Compile-time assertion: TT must be Send + Sync for Lazy SMP ─────────────
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<TranspositionTable>();
    }
    let _ = check;
};

/// Bound type stored in a TT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    /// No bound information (empty entry).
    None = 0,
    /// The stored score is exact (PV node).
    Exact = 1,
    /// The stored score is a lower bound (failed high / beta cutoff).
    LowerBound = 2,
    /// The stored score is an upper bound (failed low / all-node).
    UpperBound = 3,
}

impl Bound {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Bound::Exact,
            2 => Bound::LowerBound,
            3 => Bound::UpperBound,
            _ => Bound::None,
        }
    }
}

/// Scores above this threshold indicate a forced mate.
const MATE_THRESHOLD: i32 = 28_000;

/// Entries per cluster — one cluster is probed/replaced as a unit.
const CLUSTER_SIZE: usize = 3;

/// Generation counter wraps at 64 (6 bits, matching `genBound8`'s layout).
const GENERATION_BITS: u8 = 0x3F;

/// Result of a successful TT probe.
#[derive(Debug, Clone)]
pub struct TtProbeResult {
    /// Best move from a previous search of this position.
    pub best_move: Move,
    /// Search depth of the stored entry.
    pub depth: u8,
    /// Bound type (exact, lower, or upper).
    pub bound: Bound,
    /// Score (already adjusted from TT-relative back to root-relative).
    pub score: i32,
    /// Static evaluation.
    pub eval: i32,
    /// Whether this entry was written from a PV node.
    pub is_pv: bool,
}

/// Convert a search score to TT-storable form.
///
/// Mate scores are path-dependent: `MATE_SCORE - ply` changes based on
/// the search path. We store them as distance-from-node instead of
/// distance-from-root so they're path-independent.
pub fn score_to_tt(score: i32, ply: u8) -> i16 {
    let adjusted = if score > MATE_THRESHOLD {
        score + ply as i32
    } else if score < -MATE_THRESHOLD {
        score - ply as i32
    } else {
        score
    };
    adjusted as i16
}

/// Convert a TT-stored score back to search-usable form.
///
/// Reverses the mate-distance adjustment applied by [`score_to_tt`].
pub fn score_from_tt(score: i16, ply: u8) -> i32 {
    let score = score as i32;
    if score > MATE_THRESHOLD {
        score - ply as i32
    } else if score < -MATE_THRESHOLD {
        score + ply as i32
    } else {
        score
    }
}

// ── Internal entry type ──────────────────────────────────────────────────────

/// Two 64-bit atomic words — one logical TT slot.
struct AtomicEntry {
    word0: AtomicU64,
    word1: AtomicU64,
}

impl AtomicEntry {
    const fn new() -> Self {
        Self {
            word0: AtomicU64::new(0),
            word1: AtomicU64::new(0),
        }
    }

    /// Pack fields into word0.
    fn pack_word0(key16: u16, generation: u8, is_pv: bool, bound: Bound, depth: i8, mv: Move) -> u64 {
        let key_bits = (key16 as u64) << 48;
        let move_bits = (mv.raw() as u64) << 32;
        let depth_bits = ((depth as u8) as u64) << 24;
        let gen_bits = ((generation & GENERATION_BITS) as u64) << 18;
        let pv_bit = (is_pv as u64) << 17;
        let bound_bits = ((bound as u8) as u64) << 16;
        key_bits | move_bits | depth_bits | gen_bits | pv_bit | bound_bits
    }

    /// Pack fields into word1, deriving the torn-write check from `w0`.
    fn pack_word1(w0: u64, score: i16, eval: i16) -> u64 {
        let check = ((w0 >> 32) ^ (w0 & 0xFFFF_FFFF)) & 0xFFFF_FFFF;
        let check_bits = check << 32;
        let score_bits = ((score as u16) as u64) << 48;
        let eval_bits = ((eval as u16) as u64) << 32;
        check_bits | score_bits | eval_bits
    }

    /// Decode `word0` into its fields.
    fn decode_w0(w0: u64) -> (u16, Move, i8, u8, bool, Bound) {
        let key16 = (w0 >> 48) as u16;
        let mv = Move::from_raw(((w0 >> 32) & 0xFFFF) as u16);
        let depth = ((w0 >> 24) & 0xFF) as u8 as i8;
        let generation = ((w0 >> 18) & (GENERATION_BITS as u64)) as u8;
        let is_pv = ((w0 >> 17) & 0x01) != 0;
        let bound = Bound::from_bits(((w0 >> 16) & 0x03) as u8);
        (key16, mv, depth, generation, is_pv, bound)
    }

    /// Load and verify the entry, checking the XOR torn-write guard only
    /// (key matching against the probe's key16 is the caller's job, since a
    /// cluster scan needs the raw fields regardless of match).
    fn load(&self) -> Option<(u16, Move, i8, u8, bool, Bound, i16, i16)> {
        let w0 = self.word0.load(Ordering::Relaxed);
        let w1 = self.word1.load(Ordering::Relaxed);

        let check_expected = ((w0 >> 32) ^ (w0 & 0xFFFF_FFFF)) & 0xFFFF_FFFF;
        let check_stored = w1 & 0xFFFF_FFFF;
        if check_expected != check_stored {
            return None;
        }

        let (key16, mv, depth, generation, is_pv, bound) = Self::decode_w0(w0);
        let score = ((w1 >> 48) & 0xFFFF) as u16 as i16;
        let eval = ((w1 >> 32) & 0xFFFF) as u16 as i16;
        Some((key16, mv, depth, generation, is_pv, bound, score, eval))
    }

    fn store(&self, w0: u64, w1: u64) {
        self.word0.store(w0, Ordering::Relaxed);
        self.word1.store(w1, Ordering::Relaxed);
    }
}

/// One cache-line-sized lookup unit: [`CLUSTER_SIZE`] atomic entries.
struct Cluster {
    entries: [AtomicEntry; CLUSTER_SIZE],
}

impl Cluster {
    const fn new() -> Self {
        Self {
            entries: [AtomicEntry::new(), AtomicEntry::new(), AtomicEntry::new()],
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Transposition table with three-way-associative clusters and atomic
/// XOR-based torn-write detection.
///
/// All method receivers are `&self` — the table is safe to share across threads.
pub struct TranspositionTable {
    clusters: Box<[Cluster]>,
    /// Current search generation (wraps every 64 searches).
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Create a new transposition table with the given size in megabytes.
    pub fn new(mb: usize) -> Self {
        let bytes = mb * 1024 * 1024;
        let cluster_size = std::mem::size_of::<Cluster>();
        let num_clusters = (bytes / cluster_size).max(1);

        let clusters: Box<[Cluster]> = (0..num_clusters).map(|_| Cluster::new()).collect();

        Self {
            clusters,
            generation: AtomicU8::new(0),
        }
    }

    /// Multiplicative cluster index: `(key * cluster_count) >> 64`.
    ///
    /// Uses every bit of the 64-bit key rather than masking off the low bits,
    /// so clusters stay evenly distributed even for non-power-of-two counts.
    fn cluster_index(&self, hash: u64) -> usize {
        let clusters = self.clusters.len() as u128;
        ((hash as u128 * clusters) >> 64) as usize
    }

    /// Clear all entries and reset the generation counter.
    pub fn clear(&self) {
        for cluster in self.clusters.iter() {
            for entry in cluster.entries.iter() {
                entry.word0.store(0, Ordering::Relaxed);
                entry.word1.store(0, Ordering::Relaxed);
            }
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    /// Advance the generation counter. Call once per `go` command.
    pub fn new_generation(&self) {
        let current = self.generation.load(Ordering::Relaxed);
        self.generation
            .store(current.wrapping_add(1) & GENERATION_BITS, Ordering::Relaxed);
    }

    /// Approximate per-mille occupancy, sampled from the first 1000 clusters
    /// (or all of them if the table is smaller), for the UCI `hashfull` field.
    pub fn hashfull(&self) -> u32 {
        let sample_size = self.clusters.len().min(1000).max(1);
        let mut filled = 0u32;
        for cluster in self.clusters.iter().take(sample_size) {
            for entry in cluster.entries.iter() {
                if let Some((_, _, _, generation, _, bound, _, _)) = entry.load()
                    && bound != Bound::None
                    && generation == self.generation.load(Ordering::Relaxed)
                {
                    filled += 1;
                }
            }
        }
        (filled as u64 * 1000 / (sample_size * CLUSTER_SIZE) as u64) as u32
    }

    /// Probe the table for a position, scanning all [`CLUSTER_SIZE`] entries
    /// of the owning cluster for a `key16` match.
    ///
    /// Returns `Some(TtProbeResult)` if a matching, intact entry is found.
    /// Returns `None` on a miss, key mismatch, or torn-write detection.
    pub fn probe(&self, hash: u64, ply: u8) -> Option<TtProbeResult> {
        let cluster = &self.clusters[self.cluster_index(hash)];
        let key16 = (hash >> 48) as u16;

        for entry in cluster.entries.iter() {
            let Some((entry_key, mv, depth, _gen, is_pv, bound, score, eval)) = entry.load() else {
                continue;
            };
            if entry_key != key16 || bound == Bound::None {
                continue;
            }

            return Some(TtProbeResult {
                best_move: mv,
                depth: depth.max(0) as u8,
                bound,
                score: score_from_tt(score, ply),
                eval: eval as i32,
                is_pv,
            });
        }
        None
    }

    /// Store a position in the table.
    ///
    /// Scans the owning cluster for a `key16` match (always refreshed) or an
    /// empty slot; failing that, replaces the entry minimizing
    /// `depth - ageDelta*8`, where `ageDelta` is the generation distance from
    /// the current search — older entries are evicted first even if deeper.
    pub fn store(
        &self,
        hash: u64,
        depth: u8,
        score: i32,
        eval: i32,
        best_move: Move,
        bound: Bound,
        ply: u8,
        is_pv: bool,
    ) {
        let cluster = &self.clusters[self.cluster_index(hash)];
        let key16 = (hash >> 48) as u16;
        let generation = self.generation.load(Ordering::Relaxed);
        let depth8 = depth.min(i8::MAX as u8) as i8;

        let mut victim_idx = 0usize;
        let mut victim_rank = i32::MAX;

        for (i, entry) in cluster.entries.iter().enumerate() {
            match entry.load() {
                Some((entry_key, _, entry_depth, entry_gen, _, entry_bound, _, _))
                    if entry_key == key16 =>
                {
                    // Exact match — always refresh, keeping the deeper analysis
                    // unless the new bound is exact (a fresher, more certain result).
                    if bound == Bound::Exact || depth8 >= entry_depth || entry_bound == Bound::None {
                        victim_idx = i;
                        victim_rank = i32::MIN;
                    } else {
                        return;
                    }
                    let _ = entry_gen;
                    break;
                }
                Some((_, _, entry_depth, entry_gen, _, entry_bound, _, _)) => {
                    if entry_bound == Bound::None {
                        victim_idx = i;
                        victim_rank = i32::MIN;
                        break;
                    }
                    let age_delta = generation.wrapping_sub(entry_gen) & GENERATION_BITS;
                    let rank = entry_depth as i32 - (age_delta as i32) * 8;
                    if rank < victim_rank {
                        victim_rank = rank;
                        victim_idx = i;
                    }
                }
                None => {
                    victim_idx = i;
                    victim_rank = i32::MIN;
                    break;
                }
            }
        }

        let entry = &cluster.entries[victim_idx];
        let w0 = AtomicEntry::pack_word0(key16, generation, is_pv, bound, depth8, best_move);
        let w1 = AtomicEntry::pack_word1(w0, score_to_tt(score, ply), eval as i16);
        entry.store(w0, w1);
    }
}

impl std::fmt::Debug for TranspositionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranspositionTable")
            .field("clusters", &self.clusters.len())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cesso_core::{Move, Square};

    #[test]
    fn atomic_entry_is_16_bytes() {
        assert_eq!(std::mem::size_of::<AtomicEntry>(), 16);
    }

    #[test]
    fn cluster_is_three_entries() {
        assert_eq!(std::mem::size_of::<Cluster>(), 3 * 16);
    }

    #[test]
    fn store_and_probe_roundtrip() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xDEAD_BEEF_1234_5678;
        let mv = Move::new(Square::E2, Square::E4);

        tt.store(hash, 5, 100, 50, mv, Bound::Exact, 0, false);

        let result = tt.probe(hash, 0).expect("should find stored entry");
        assert_eq!(result.best_move, mv);
        assert_eq!(result.depth, 5);
        assert_eq!(result.bound, Bound::Exact);
        assert_eq!(result.score, 100);
        assert_eq!(result.eval, 50);
    }

    #[test]
    fn probe_miss_returns_none() {
        let tt = TranspositionTable::new(1);
        assert!(tt.probe(0x1234_5678_9ABC_DEF0, 0).is_none());
    }

    #[test]
    fn mate_score_adjustment_roundtrip() {
        let mate_score = 29_000 - 3;
        let ply: u8 = 5;

        let tt_score = score_to_tt(mate_score, ply);
        let restored = score_from_tt(tt_score, ply);
        assert_eq!(restored, mate_score);
    }

    #[test]
    fn negative_mate_score_adjustment_roundtrip() {
        let mated_score = -(29_000 - 3);
        let ply: u8 = 7;

        let tt_score = score_to_tt(mated_score, ply);
        let restored = score_from_tt(tt_score, ply);
        assert_eq!(restored, mated_score);
    }

    #[test]
    fn normal_score_not_adjusted() {
        let score = 150;
        let ply: u8 = 10;

        let tt_score = score_to_tt(score, ply);
        let restored = score_from_tt(tt_score, ply);
        assert_eq!(restored, score);
    }

    #[test]
    fn generation_replacement_policy() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xAAAA_BBBB_CCCC_DDDD;
        let mv1 = Move::new(Square::E2, Square::E4);
        let mv2 = Move::new(Square::D2, Square::D4);

        tt.store(hash, 10, 100, 50, mv1, Bound::Exact, 0, false);
        tt.new_generation();
        tt.store(hash, 1, 200, 60, mv2, Bound::LowerBound, 0, false);

        let result = tt.probe(hash, 0).unwrap();
        assert_eq!(result.best_move, mv2);
        assert_eq!(result.score, 200);
    }

    #[test]
    fn same_key_refreshes_in_place() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0x1111_2222_3333_4444;
        let mv1 = Move::new(Square::E2, Square::E4);
        let mv2 = Move::new(Square::D2, Square::D4);

        tt.store(hash, 5, 100, 50, mv1, Bound::LowerBound, 0, false);
        // Same depth, exact bound — should refresh with mv2
        tt.store(hash, 5, 200, 60, mv2, Bound::Exact, 0, false);

        let result = tt.probe(hash, 0).unwrap();
        assert_eq!(result.best_move, mv2);
        assert_eq!(result.bound, Bound::Exact);
    }

    #[test]
    fn distinct_keys_fill_cluster_independently() {
        let tt = TranspositionTable::new(1);
        // Two different hashes that (almost certainly) land in different
        // clusters given a reasonably sized table.
        let hash_a: u64 = 0x0102_0304_0506_0708;
        let hash_b: u64 = 0xFFEE_DDCC_BBAA_9988;
        let mv_a = Move::new(Square::E2, Square::E4);
        let mv_b = Move::new(Square::D2, Square::D4);

        tt.store(hash_a, 5, 100, 50, mv_a, Bound::Exact, 0, false);
        tt.store(hash_b, 6, 110, 55, mv_b, Bound::Exact, 0, false);

        assert_eq!(tt.probe(hash_a, 0).unwrap().best_move, mv_a);
        assert_eq!(tt.probe(hash_b, 0).unwrap().best_move, mv_b);
    }

    #[test]
    fn clear_removes_all_entries() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xAAAA_BBBB_CCCC_DDDD;
        let mv = Move::new(Square::E2, Square::E4);

        tt.store(hash, 5, 100, 50, mv, Bound::Exact, 0, false);
        assert!(tt.probe(hash, 0).is_some());

        tt.clear();
        assert!(tt.probe(hash, 0).is_none());
    }

    #[test]
    fn xor_integrity_detects_torn_write() {
        let tt = TranspositionTable::new(1);
        let hash: u64 = 0xDEAD_BEEF_1234_5678;
        let mv = Move::new(Square::E2, Square::E4);

        tt.store(hash, 5, 100, 50, mv, Bound::Exact, 0, false);
        assert!(tt.probe(hash, 0).is_some(), "entry should be found before corruption");

        let index = tt.cluster_index(hash);
        let entry = &tt.clusters[index].entries[0];
        let w1 = entry.word1.load(Ordering::Relaxed);
        let corrupted_w1 = w1 ^ 0x0000_0000_FFFF_FFFF;
        entry.word1.store(corrupted_w1, Ordering::Relaxed);

        assert!(
            tt.probe(hash, 0).is_none(),
            "probe should return None after XOR corruption"
        );
    }

    #[test]
    fn hashfull_reports_nonzero_after_stores() {
        let tt = TranspositionTable::new(1);
        for i in 0..200u64 {
            let mv = Move::new(Square::E2, Square::E4);
            tt.store(i.wrapping_mul(0x9E37_79B9_7F4A_7C15), 5, 10, 5, mv, Bound::Exact, 0, false);
        }
        assert!(tt.hashfull() > 0);
    }

    #[test]
    fn concurrent_stress_no_panics() {
        use std::thread;

        let tt = std::sync::Arc::new(TranspositionTable::new(4));

        thread::scope(|s| {
            for t in 0..8u64 {
                let tt = std::sync::Arc::clone(&tt);
                s.spawn(move || {
                    let mv = Move::new(Square::E2, Square::E4);
                    for i in 0u64..10_000 {
                        let hash = (t.wrapping_mul(6364136223846793005))
                            .wrapping_add(i.wrapping_mul(2862933555777941757))
                            ^ 0xDEAD_BEEF_CAFE_F00D;
                        tt.store(hash, 5, 100, 50, mv, Bound::Exact, 0, false);
                        let _ = tt.probe(hash, 0);
                    }
                });
            }
        });
    }
}
