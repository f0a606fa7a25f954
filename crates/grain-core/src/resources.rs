//! Memory budget estimation and cooperative cancellation.
//!
//! Before building the initial grid and before optimizing, the engine
//! compares the remaining budget against a size model of the grid
//! (per-cell, per-part and per-merge-candidate footprints plus two scratch
//! grids). The budget and the cancellation token are members of the engine
//! context, constructed once per invocation; nothing here is global.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Estimated bytes per grid cell.
pub const BYTES_PER_CELL: u64 = 80;
/// Estimated bytes per part.
pub const BYTES_PER_PART: u64 = 200;
/// Estimated bytes per merge candidate.
pub const BYTES_PER_MERGE_CANDIDATE: u64 = 64;
/// Scratch grids held by the optimizer (working copy + best copy).
pub const SCRATCH_GRIDS: u64 = 2;

/// Default per-invocation cap: 100 MiB.
pub const DEFAULT_MEMORY_CAP_BYTES: u64 = 100 * 1024 * 1024;

/// Caller-owned interruption flag, polled between optimizer moves and
/// once every 65 536 rows in loader loops.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Memory budget with the grid size model.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryBudget {
    pub cap_bytes: u64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            cap_bytes: DEFAULT_MEMORY_CAP_BYTES,
        }
    }
}

impl MemoryBudget {
    pub fn from_megabytes(megabytes: u64) -> Self {
        Self {
            cap_bytes: megabytes * 1024 * 1024,
        }
    }

    /// Estimated footprint of a grid with the given shape.
    pub fn estimate_grid_bytes(cell_count: u64, part_count: u64) -> u64 {
        cell_count * BYTES_PER_CELL + part_count * BYTES_PER_PART
    }

    /// Estimated footprint of a full optimization over that grid: the
    /// working and best scratch copies plus the merge-candidate queue.
    pub fn estimate_optimization_bytes(cell_count: u64, part_count: u64) -> u64 {
        SCRATCH_GRIDS * Self::estimate_grid_bytes(cell_count, part_count)
            + part_count * BYTES_PER_MERGE_CANDIDATE
    }

    /// Whether a grid of that shape can be built under this budget.
    pub fn allows_grid(&self, cell_count: u64, part_count: u64) -> bool {
        Self::estimate_grid_bytes(cell_count, part_count) <= self.cap_bytes
    }

    /// Whether an optimization over that grid fits the budget.
    pub fn allows_optimization(&self, cell_count: u64, part_count: u64) -> bool {
        Self::estimate_optimization_bytes(cell_count, part_count) <= self.cap_bytes
    }

    /// Largest cell count a grid may have under this budget, given its part
    /// count. Used for the anytime estimate while the tuple loader runs.
    pub fn max_cell_count(&self, part_count: u64) -> u64 {
        let fixed = SCRATCH_GRIDS * part_count * BYTES_PER_PART
            + part_count * BYTES_PER_MERGE_CANDIDATE;
        if fixed >= self.cap_bytes {
            return 0;
        }
        (self.cap_bytes - fixed) / (SCRATCH_GRIDS * BYTES_PER_CELL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = CancellationToken::new();
        assert!(!token.is_requested());
        let shared = token.clone();
        shared.request();
        assert!(token.is_requested());
    }

    #[test]
    fn tight_budget_rejects_large_grids() {
        let budget = MemoryBudget::from_megabytes(1);
        assert!(budget.allows_grid(1_000, 100));
        assert!(!budget.allows_grid(100_000_000, 100));
    }

    #[test]
    fn optimization_estimate_dominates_grid_estimate() {
        let grid = MemoryBudget::estimate_grid_bytes(10_000, 50);
        let optimization = MemoryBudget::estimate_optimization_bytes(10_000, 50);
        assert!(optimization > grid);
    }

    #[test]
    fn max_cell_count_inverts_the_estimate() {
        let budget = MemoryBudget::from_megabytes(10);
        let cells = budget.max_cell_count(1_000);
        assert!(budget.allows_optimization(cells, 1_000));
        assert!(!budget.allows_optimization(cells + 10, 1_000));
    }
}
