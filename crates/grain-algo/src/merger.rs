//! Grid merger: a data grid augmented with a priced queue of part-merge
//! candidates.
//!
//! One candidate exists per pair of parts of the same attribute that could
//! plausibly merge (numeric attributes: adjacent intervals only). Each
//! candidate stores its delta net of the attribute-common cell-capacity
//! term ([`DataGridCosts::merge_common_delta`]), which is added back at
//! search time; that way a merge on one attribute leaves the candidates of
//! the other attributes priced. What a merge does invalidate is repriced
//! eagerly:
//!
//! - every remaining candidate of the merged attribute (its part count and
//!   garbage shape changed),
//! - candidates of parts in other attributes whose cells folded during the
//!   merge (their collision columns changed), O(degree) of the fold.
//!
//! The per-attribute queues are lazy binary heaps: stale entries are
//! detected against the candidate map and skipped on pop. Ties on equal
//! delta break on the `(attribute, part, part)` key, which keeps the merge
//! schedule deterministic.

use crate::costs::DataGridCosts;
use grain_core::{AttributeType, DataGrid, GrainError, GrainResult, PartId};
use hashbrown::{HashMap, HashSet};
use std::collections::BinaryHeap;

/// Identity of a merge candidate; the two part ids are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateKey {
    pub attribute: usize,
    pub first: PartId,
    pub second: PartId,
}

impl CandidateKey {
    fn new(attribute: usize, a: PartId, b: PartId) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            attribute,
            first,
            second,
        }
    }
}

/// Heap entry ordered so the cheapest local delta pops first; equal deltas
/// pop in key order.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    local_delta: f64,
    key: CandidateKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest delta wins.
        other
            .local_delta
            .total_cmp(&self.local_delta)
            .then_with(|| other.key.cmp(&self.key))
    }
}

/// A grid plus its merge-candidate queues.
pub struct GridMerger<'c, C: DataGridCosts> {
    grid: DataGrid,
    costs: &'c C,
    /// Live candidates with their local (attribute-common-free) deltas.
    candidates: HashMap<CandidateKey, f64>,
    by_part: HashMap<(usize, PartId), Vec<CandidateKey>>,
    heaps: Vec<BinaryHeap<HeapEntry>>,
}

impl<'c, C: DataGridCosts> GridMerger<'c, C> {
    /// Build the merger and price every initial candidate.
    pub fn new(grid: DataGrid, costs: &'c C) -> Self {
        let heaps = (0..grid.attribute_count()).map(|_| BinaryHeap::new()).collect();
        let mut merger = Self {
            grid,
            costs,
            candidates: HashMap::new(),
            by_part: HashMap::new(),
            heaps,
        };
        for attribute in 0..merger.grid.attribute_count() {
            for key in merger.plausible_pairs(attribute) {
                merger.insert_candidate(key);
            }
        }
        merger
    }

    pub fn grid(&self) -> &DataGrid {
        &self.grid
    }

    pub fn into_grid(self) -> DataGrid {
        self.grid
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Full delta of a candidate pair, if the pair is plausible.
    pub fn lookup_delta(&self, attribute: usize, a: PartId, b: PartId) -> Option<f64> {
        self.candidates
            .get(&CandidateKey::new(attribute, a, b))
            .map(|local| local + self.costs.merge_common_delta(&self.grid, attribute))
    }

    /// All plausible merge pairs of one attribute in the current grid.
    fn plausible_pairs(&self, attribute: usize) -> Vec<CandidateKey> {
        let slab = self.grid.attribute(attribute);
        let ordered = slab.ordered_part_ids();
        let mut keys = Vec::new();
        match slab.attribute_type {
            AttributeType::Numeric => {
                for window in ordered.windows(2) {
                    keys.push(CandidateKey::new(attribute, window[0], window[1]));
                }
            }
            AttributeType::Categorical => {
                for (i, a) in ordered.iter().enumerate() {
                    for b in &ordered[i + 1..] {
                        keys.push(CandidateKey::new(attribute, *a, *b));
                    }
                }
            }
        }
        keys
    }

    fn local_delta(&self, key: CandidateKey) -> f64 {
        self.costs
            .merge_delta(&self.grid, key.attribute, key.first, key.second)
            - self.costs.merge_common_delta(&self.grid, key.attribute)
    }

    fn insert_candidate(&mut self, key: CandidateKey) {
        let local_delta = self.local_delta(key);
        self.candidates.insert(key, local_delta);
        self.by_part
            .entry((key.attribute, key.first))
            .or_default()
            .push(key);
        self.by_part
            .entry((key.attribute, key.second))
            .or_default()
            .push(key);
        self.heaps[key.attribute].push(HeapEntry { local_delta, key });
    }

    /// Recompute a live candidate's delta; the superseded heap entry goes
    /// stale by bit comparison.
    fn reprice_candidate(&mut self, key: CandidateKey) {
        if !self.candidates.contains_key(&key) {
            return;
        }
        let local_delta = self.local_delta(key);
        self.candidates.insert(key, local_delta);
        self.heaps[key.attribute].push(HeapEntry { local_delta, key });
    }

    fn reprice_part(&mut self, attribute: usize, part: PartId) {
        if let Some(keys) = self.by_part.get(&(attribute, part)) {
            for key in keys.clone() {
                self.reprice_candidate(key);
            }
        }
    }

    fn remove_candidates_of(&mut self, attribute: usize, part: PartId) {
        if let Some(keys) = self.by_part.remove(&(attribute, part)) {
            for key in keys {
                // The sibling's back-reference goes stale; it is dropped
                // when that part merges or reprices in turn.
                self.candidates.remove(&key);
            }
        }
    }

    /// Valid top of one attribute's heap, draining stale entries.
    fn peek_attribute(&mut self, attribute: usize) -> Option<HeapEntry> {
        while let Some(entry) = self.heaps[attribute].peek().copied() {
            match self.candidates.get(&entry.key) {
                Some(local) if local.to_bits() == entry.local_delta.to_bits() => {
                    return Some(entry);
                }
                _ => {
                    self.heaps[attribute].pop();
                }
            }
        }
        None
    }

    /// Cheapest candidate over all attributes with its full delta, without
    /// performing it.
    pub fn search_best_merge(&mut self) -> Option<(CandidateKey, f64)> {
        let mut best: Option<(CandidateKey, f64)> = None;
        for attribute in 0..self.grid.attribute_count() {
            let Some(entry) = self.peek_attribute(attribute) else {
                continue;
            };
            let common = self.costs.merge_common_delta(&self.grid, attribute);
            let delta = entry.local_delta + common;
            let candidate = (entry.key, delta);
            best = match best {
                None => Some(candidate),
                Some((best_key, best_delta)) => {
                    if delta < best_delta || (delta == best_delta && entry.key < best_key) {
                        Some(candidate)
                    } else {
                        Some((best_key, best_delta))
                    }
                }
            };
        }
        best
    }

    /// Perform a merge candidate: fuse the parts (the one with fewer cells
    /// is drained into the other), drop obsolete candidates, price the
    /// fused part's new neighbours and reprice everything the fold touched.
    /// Returns the surviving part id and the applied delta.
    pub fn perform_merge(&mut self, key: CandidateKey) -> (PartId, f64) {
        let local = self
            .candidates
            .get(&key)
            .copied()
            .expect("performing an invalidated merge candidate");
        let attribute = key.attribute;
        let delta = local + self.costs.merge_common_delta(&self.grid, attribute);
        let slab = self.grid.attribute(attribute);
        let (kept, drained) =
            if slab.part(key.first).cells.len() >= slab.part(key.second).cells.len() {
                (key.first, key.second)
            } else {
                (key.second, key.first)
            };

        self.remove_candidates_of(attribute, key.first);
        self.remove_candidates_of(attribute, key.second);

        let folded_keys = self.grid.merge_parts(attribute, kept, drained);

        // New candidates pairing the fused part with its neighbours.
        let slab = self.grid.attribute(attribute);
        let new_keys: Vec<CandidateKey> = match slab.attribute_type {
            AttributeType::Numeric => {
                let ordered = slab.ordered_part_ids();
                let position = ordered
                    .iter()
                    .position(|p| *p == kept)
                    .expect("kept part vanished");
                let mut keys = Vec::new();
                if position > 0 {
                    keys.push(CandidateKey::new(attribute, ordered[position - 1], kept));
                }
                if position + 1 < ordered.len() {
                    keys.push(CandidateKey::new(attribute, kept, ordered[position + 1]));
                }
                keys
            }
            AttributeType::Categorical => slab
                .part_ids()
                .filter(|p| *p != kept)
                .map(|p| CandidateKey::new(attribute, kept, p))
                .collect(),
        };
        for new_key in new_keys {
            self.insert_candidate(new_key);
        }

        // The merged attribute's remaining candidates see a new part count
        // and garbage shape.
        for part in self.grid.attribute(attribute).ordered_part_ids() {
            if part != kept {
                self.reprice_part(attribute, part);
            }
        }

        // Parts of other attributes whose cells folded have new collision
        // columns.
        let mut touched: HashSet<(usize, PartId)> = HashSet::new();
        for folded in folded_keys {
            for (other_attribute, part) in folded.iter().enumerate() {
                if other_attribute != attribute {
                    touched.insert((other_attribute, *part));
                }
            }
        }
        let mut touched: Vec<(usize, PartId)> = touched.into_iter().collect();
        touched.sort();
        for (other_attribute, part) in touched {
            self.reprice_part(other_attribute, part);
        }

        (kept, delta)
    }

    /// Debug predicate: the candidate set matches the plausible pairs of
    /// the current grid and every stored delta reprices identically.
    pub fn check_all_part_merges(&self) -> GrainResult<()> {
        let mut expected = 0usize;
        for attribute in 0..self.grid.attribute_count() {
            for key in self.plausible_pairs(attribute) {
                expected += 1;
                let Some(stored) = self.candidates.get(&key) else {
                    return Err(GrainError::Internal(format!(
                        "missing merge candidate {:?}",
                        key
                    )));
                };
                let repriced = self.local_delta(key);
                if (stored - repriced).abs() > 1e-6 {
                    return Err(GrainError::Internal(format!(
                        "candidate {:?} stores delta {} but reprices to {}",
                        key, stored, repriced
                    )));
                }
            }
        }
        if expected != self.candidates.len() {
            return Err(GrainError::Internal(format!(
                "{} candidates stored but {} pairs are plausible",
                self.candidates.len(),
                expected
            )));
        }
        Ok(())
    }
}
