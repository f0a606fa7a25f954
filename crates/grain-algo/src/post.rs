//! Univariate post-optimization passes: boundary slides, value moves and
//! part splits.
//!
//! The passes work at the resolution of the granularized initial grid: its
//! parts are the *atoms* the current partition is a coarsening of, and no
//! pass ever cuts through an atom. Per optimized attribute, the pass
//! builds each atom's cell signature against the current parts of the
//! other attributes; deltas are then priced by the cost model without any
//! grid walking, and committed moves patch cells and contents
//! incrementally.

use crate::costs::{DataGridCosts, PartSplit, ValueMove};
use crate::optimizer::SearchBudget;
use grain_core::{AttributeType, DataGrid, PartContent, PartId, ValueEntry};
use hashbrown::HashMap;

/// A committed edit must improve the cost by at least this much; smaller
/// deltas are treated as noise.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

/// Sweeps over one attribute before the pass gives up on reaching a fixed
/// point.
const MAX_SWEEPS: usize = 8;

/// One atom: a part of the granularized initial grid, together with its
/// cell signature against the current grid.
pub(crate) struct Atom {
    pub(crate) content: PartContent,
    pub(crate) frequency: u64,
    /// (key template, frequency): full cell keys of the current grid whose
    /// slot for the optimized attribute is meaningless and rewritten on
    /// use.
    pub(crate) signature: Vec<(Vec<PartId>, u64)>,
}

impl Atom {
    pub(crate) fn values(&self) -> &[ValueEntry] {
        match &self.content {
            PartContent::ValueSet { values, .. } => values,
            PartContent::Interval { .. } => &[],
        }
    }

    fn has_catchall(&self) -> bool {
        matches!(
            self.content,
            PartContent::ValueSet {
                has_catchall: true,
                ..
            }
        )
    }
}

fn key_with(template: &[PartId], attribute: usize, part: PartId) -> Vec<PartId> {
    let mut key = template.to_vec();
    key[attribute] = part;
    key
}

/// Map every part of `initial` to the current part containing it. Returns
/// `None` when the current partition does not coarsen the initial one,
/// which would mean the optimizer broke its own invariant.
fn map_parts(
    initial: &DataGrid,
    current: &DataGrid,
    dimension: usize,
) -> Option<HashMap<PartId, PartId>> {
    let initial_slab = initial.attribute(dimension);
    let current_slab = current.attribute(dimension);
    let mut mapping = HashMap::new();
    match current_slab.attribute_type {
        AttributeType::Numeric => {
            let ordered = current_slab.ordered_part_ids();
            for id in initial_slab.part_ids() {
                let PartContent::Interval { upper, .. } = initial_slab.part(id).content else {
                    return None;
                };
                let target = ordered.iter().find(|candidate| {
                    match current_slab.part(**candidate).content {
                        PartContent::Interval {
                            upper: current_upper,
                            ..
                        } => upper <= current_upper,
                        _ => false,
                    }
                })?;
                mapping.insert(id, *target);
            }
        }
        AttributeType::Categorical => {
            let mut by_symbol: HashMap<grain_core::SymbolId, PartId> = HashMap::new();
            for id in current_slab.part_ids() {
                if let PartContent::ValueSet { values, .. } = &current_slab.part(id).content {
                    for value in values {
                        by_symbol.insert(value.symbol, id);
                    }
                }
            }
            for id in initial_slab.part_ids() {
                let PartContent::ValueSet { values, .. } = &initial_slab.part(id).content
                else {
                    return None;
                };
                let first = values.first()?;
                mapping.insert(id, *by_symbol.get(&first.symbol)?);
            }
        }
    }
    Some(mapping)
}

/// State of one attribute's pass: atoms, their current assignment, and the
/// grid being edited.
pub(crate) struct AttributePass<'g> {
    attribute: usize,
    grid: &'g mut DataGrid,
    /// Atoms in domain order of the initial grid.
    pub(crate) atoms: Vec<Atom>,
    /// Current part of each atom.
    pub(crate) assignment: Vec<PartId>,
}

impl<'g> AttributePass<'g> {
    pub(crate) fn new(initial: &DataGrid, grid: &'g mut DataGrid, attribute: usize) -> Option<Self> {
        let dimension_count = grid.attribute_count();
        // Per-dimension mapping from initial parts to current parts.
        let mut mappings: Vec<HashMap<PartId, PartId>> = Vec::with_capacity(dimension_count);
        for dimension in 0..dimension_count {
            mappings.push(map_parts(initial, grid, dimension)?);
        }

        let initial_slab = initial.attribute(attribute);
        let ordered = initial_slab.ordered_part_ids();
        let index_of: HashMap<PartId, usize> = ordered
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();

        // Signatures: fold the initial cells through the current mapping.
        let mut signatures: Vec<HashMap<Vec<PartId>, u64>> =
            (0..ordered.len()).map(|_| HashMap::new()).collect();
        for cell_id in initial.cell_ids() {
            let cell = initial.cell(cell_id);
            let atom = index_of[&cell.parts[attribute]];
            let mut template: Vec<PartId> = Vec::with_capacity(dimension_count);
            for (dimension, part) in cell.parts.iter().enumerate() {
                if dimension == attribute {
                    // Slot rewritten on use.
                    template.push(PartId::new(0));
                } else {
                    template.push(mappings[dimension][part]);
                }
            }
            *signatures[atom].entry(template).or_insert(0) += cell.frequency;
        }

        let atoms = ordered
            .iter()
            .zip(signatures)
            .map(|(id, signature)| {
                let part = initial_slab.part(*id);
                let mut signature: Vec<(Vec<PartId>, u64)> = signature.into_iter().collect();
                signature.sort();
                Atom {
                    content: part.content.clone(),
                    frequency: part.frequency,
                    signature,
                }
            })
            .collect();
        let assignment = ordered
            .iter()
            .map(|id| mappings[attribute][id])
            .collect();
        Some(Self {
            attribute,
            grid,
            atoms,
            assignment,
        })
    }

    pub(crate) fn atoms_of(&self, part: PartId) -> Vec<usize> {
        self.assignment
            .iter()
            .enumerate()
            .filter(|(_, assigned)| **assigned == part)
            .map(|(index, _)| index)
            .collect()
    }

    /// Touched-cell triples of moving one atom from its part to `target`.
    fn touched_cells(&self, atom: usize, target: PartId) -> Vec<(u64, u64, u64)> {
        let from = self.assignment[atom];
        self.atoms[atom]
            .signature
            .iter()
            .map(|(template, moved)| {
                let from_frequency = self
                    .grid
                    .lookup_cell(&key_with(template, self.attribute, from))
                    .map(|id| self.grid.cell(id).frequency)
                    .expect("atom cells must exist in the current grid");
                let to_frequency = self
                    .grid
                    .lookup_cell(&key_with(template, self.attribute, target))
                    .map(|id| self.grid.cell(id).frequency)
                    .unwrap_or(0);
                (*moved, from_frequency, to_frequency)
            })
            .collect()
    }

    pub(crate) fn move_delta<C: DataGridCosts>(&self, costs: &C, atom: usize, target: PartId) -> f64 {
        let touched = self.touched_cells(atom, target);
        costs.move_delta(
            self.grid,
            &ValueMove {
                attribute: self.attribute,
                from: self.assignment[atom],
                to: target,
                moved_frequency: self.atoms[atom].frequency,
                moved_values: self.atoms[atom].values(),
                touched_cells: &touched,
            },
        )
    }

    /// Transfer one atom's cells to `target` and update assignment and
    /// contents.
    fn commit_move(&mut self, atom: usize, target: PartId) {
        let from = self.assignment[atom];
        for (template, frequency) in &self.atoms[atom].signature {
            let from_key = key_with(template, self.attribute, from);
            self.grid.remove_cell_frequency(&from_key, *frequency);
            let to_key = key_with(template, self.attribute, target);
            self.grid.add_cell_frequency(to_key, *frequency);
        }
        self.assignment[atom] = target;
        self.rebuild_content(from);
        self.rebuild_content(target);
        debug_assert!(self.grid.check().is_ok());
    }

    /// Recompute a part's content from its atoms.
    fn rebuild_content(&mut self, part: PartId) {
        let atoms = self.atoms_of(part);
        debug_assert!(!atoms.is_empty());
        let content = match self.grid.attribute(self.attribute).attribute_type {
            AttributeType::Numeric => {
                let first = &self.atoms[atoms[0]].content;
                let last = &self.atoms[*atoms.last().expect("non-empty")].content;
                let (PartContent::Interval { lower, .. }, PartContent::Interval { upper, .. }) =
                    (first, last)
                else {
                    unreachable!("numeric atoms expected");
                };
                PartContent::Interval {
                    lower: *lower,
                    upper: *upper,
                }
            }
            AttributeType::Categorical => {
                let mut values = Vec::new();
                let mut has_catchall = false;
                for index in &atoms {
                    values.extend(self.atoms[*index].values().iter().copied());
                    has_catchall = has_catchall || self.atoms[*index].has_catchall();
                }
                PartContent::ValueSet {
                    values,
                    has_catchall,
                }
            }
        };
        self.grid
            .attribute_mut(self.attribute)
            .part_mut(part)
            .content = content;
    }

    /// Numeric boundary slides: try moving each interval boundary one atom
    /// left or right, committing improvements as they are found. Returns
    /// the accumulated delta.
    fn slide_boundaries<C: DataGridCosts>(&mut self, costs: &C, budget: &SearchBudget) -> f64 {
        let mut total = 0.0;
        for _ in 0..MAX_SWEEPS {
            let mut improved = false;
            let ordered = self.grid.attribute(self.attribute).ordered_part_ids();
            for window in ordered.windows(2) {
                if budget.exhausted() {
                    return total;
                }
                let (left, right) = (window[0], window[1]);
                let left_atoms = self.atoms_of(left);
                let right_atoms = self.atoms_of(right);

                // Slide right: last atom of the left part crosses over.
                let mut best: Option<(f64, usize, PartId)> = None;
                if left_atoms.len() >= 2 {
                    let atom = *left_atoms.last().expect("non-empty");
                    let delta = self.move_delta(costs, atom, right);
                    if delta < -IMPROVEMENT_EPSILON {
                        best = Some((delta, atom, right));
                    }
                }
                // Slide left: first atom of the right part crosses over.
                if right_atoms.len() >= 2 {
                    let atom = right_atoms[0];
                    let delta = self.move_delta(costs, atom, left);
                    if delta < -IMPROVEMENT_EPSILON
                        && best.map_or(true, |(best_delta, _, _)| delta < best_delta)
                    {
                        best = Some((delta, atom, left));
                    }
                }
                if let Some((delta, atom, target)) = best {
                    self.commit_move(atom, target);
                    total += delta;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        total
    }

    /// Categorical value moves: move the best atom to the best other group
    /// until no move improves. Returns the accumulated delta.
    fn move_values<C: DataGridCosts>(&mut self, costs: &C, budget: &SearchBudget) -> f64 {
        let mut total = 0.0;
        for _ in 0..MAX_SWEEPS {
            if budget.exhausted() {
                return total;
            }
            let mut best: Option<(f64, usize, PartId)> = None;
            let parts = self.grid.attribute(self.attribute).ordered_part_ids();
            for atom in 0..self.atoms.len() {
                let source = self.assignment[atom];
                // Moving the last atom of a group is a merge, not a move.
                if self.atoms_of(source).len() < 2 {
                    continue;
                }
                for target in &parts {
                    if *target == source {
                        continue;
                    }
                    let delta = self.move_delta(costs, atom, *target);
                    if delta < -IMPROVEMENT_EPSILON
                        && best.map_or(true, |(best_delta, _, _)| delta < best_delta)
                    {
                        best = Some((delta, atom, *target));
                    }
                }
            }
            match best {
                Some((delta, atom, target)) => {
                    self.commit_move(atom, target);
                    total += delta;
                }
                None => break,
            }
        }
        total
    }

    /// Part bipartitions: for every part, price each prefix cut of its
    /// atoms and keep the best negative one. Returns the accumulated delta.
    fn split_parts<C: DataGridCosts>(&mut self, costs: &C, budget: &SearchBudget) -> f64 {
        let mut total = 0.0;
        let parts = self.grid.attribute(self.attribute).ordered_part_ids();
        for part in parts {
            if budget.exhausted() {
                return total;
            }
            let mut atoms = self.atoms_of(part);
            if atoms.len() < 2 {
                continue;
            }
            if self.grid.attribute(self.attribute).attribute_type == AttributeType::Categorical
            {
                // Cut candidates scan atoms from the heaviest down.
                atoms.sort_by(|a, b| {
                    self.atoms[*b]
                        .frequency
                        .cmp(&self.atoms[*a].frequency)
                        .then(a.cmp(b))
                });
            }

            // Running prefix aggregation of the split side.
            let mut prefix_cells: HashMap<Vec<PartId>, u64> = HashMap::new();
            let mut prefix_frequency = 0u64;
            let mut prefix_values: Vec<ValueEntry> = Vec::new();
            let mut best: Option<(f64, usize)> = None;
            for cut in 1..atoms.len() {
                let atom = &self.atoms[atoms[cut - 1]];
                prefix_frequency += atom.frequency;
                prefix_values.extend(atom.values().iter().copied());
                for (template, frequency) in &atom.signature {
                    *prefix_cells.entry(template.clone()).or_insert(0) += frequency;
                }

                let mut split_cells: Vec<(u64, u64)> = Vec::with_capacity(prefix_cells.len());
                let mut columns: Vec<(&Vec<PartId>, &u64)> = prefix_cells.iter().collect();
                columns.sort();
                for (template, moved) in columns {
                    let before = self
                        .grid
                        .lookup_cell(&key_with(template, self.attribute, part))
                        .map(|id| self.grid.cell(id).frequency)
                        .expect("atom cells must exist in the current grid");
                    split_cells.push((*moved, before));
                }
                let delta = costs.split_delta(
                    self.grid,
                    &PartSplit {
                        attribute: self.attribute,
                        part,
                        split_frequency: prefix_frequency,
                        split_values: &prefix_values,
                        split_cells: &split_cells,
                    },
                );
                if delta < -IMPROVEMENT_EPSILON
                    && best.map_or(true, |(best_delta, _)| delta < best_delta)
                {
                    best = Some((delta, cut));
                }
            }

            if let Some((delta, cut)) = best {
                // New part receives the prefix atoms; contents are rebuilt
                // after the transfer.
                let placeholder = match self.grid.attribute(self.attribute).attribute_type {
                    AttributeType::Numeric => PartContent::Interval {
                        lower: 0.0,
                        upper: 0.0,
                    },
                    AttributeType::Categorical => PartContent::empty_value_set(),
                };
                let new_part = self.grid.add_part(self.attribute, placeholder);
                for index in &atoms[..cut] {
                    let signature = self.atoms[*index].signature.clone();
                    for (template, frequency) in &signature {
                        let from_key = key_with(template, self.attribute, part);
                        self.grid.remove_cell_frequency(&from_key, *frequency);
                        let to_key = key_with(template, self.attribute, new_part);
                        self.grid.add_cell_frequency(to_key, *frequency);
                    }
                    self.assignment[*index] = new_part;
                }
                self.rebuild_content(part);
                self.rebuild_content(new_part);
                debug_assert!(self.grid.check().is_ok());
                total += delta;
            }
        }
        total
    }
}

/// Run the post-optimization passes over every attribute of `grid`, at the
/// atom resolution of `initial`. Returns the accumulated (negative or
/// zero) delta.
pub fn post_optimize<C: DataGridCosts>(
    costs: &C,
    initial: &DataGrid,
    grid: &mut DataGrid,
    budget: &SearchBudget,
) -> f64 {
    let mut total = 0.0;
    for attribute in 0..grid.attribute_count() {
        if budget.exhausted() {
            break;
        }
        let Some(mut pass) = AttributePass::new(initial, grid, attribute) else {
            // The current partition does not refine through the initial
            // grid; skip rather than corrupt (the caller keeps its best
            // grid either way).
            tracing::warn!(attribute, "post-optimization pass skipped: atom mapping failed");
            continue;
        };
        match pass.grid.attribute(attribute).attribute_type {
            AttributeType::Numeric => {
                total += pass.slide_boundaries(costs, budget);
            }
            AttributeType::Categorical => {
                total += pass.move_values(costs, budget);
            }
        }
        total += pass.split_parts(costs, budget);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costs::{CoclusteringCosts, DataGridCosts};
    use crate::granularize::{build_initial_grid, granularize};
    use crate::merger::GridMerger;
    use grain_core::{
        AttributeType, Continuous, TupleAttribute, TupleTable, TupleTableBuilder, Value,
    };

    /// Y depends on X through a step function at x = 10.
    fn stepped_table() -> TupleTable {
        let mut builder = TupleTableBuilder::new(vec![
            TupleAttribute {
                name: "X".into(),
                attribute_type: AttributeType::Numeric,
            },
            TupleAttribute {
                name: "Y".into(),
                attribute_type: AttributeType::Categorical,
            },
        ]);
        let low = builder.symbols_mut().intern("low");
        let high = builder.symbols_mut().intern("high");
        for i in 0..20u32 {
            let x = Value::Number(Continuous::new(i as f64).unwrap());
            let y = Value::Symbol(if i < 10 { low } else { high });
            builder.push(vec![x, y], 25);
        }
        builder.freeze()
    }

    #[test]
    fn boundary_slide_recovers_the_true_step() {
        let table = stepped_table();
        let finest = build_initial_grid(&table, &[0, 1]);
        let initial = granularize(&finest, 5);
        let costs = CoclusteringCosts::new(&initial);

        // Greedy merges first, as the optimizer would do.
        let mut merger = GridMerger::new(initial.clone(), &costs);
        while let Some((key, delta)) = merger.search_best_merge() {
            if delta >= 0.0 {
                break;
            }
            merger.perform_merge(key);
        }
        let mut grid = merger.into_grid();
        let before = costs.total_cost(&grid);

        let budget = SearchBudget::unbounded();
        let delta = post_optimize(&costs, &initial, &mut grid, &budget);
        let after = costs.total_cost(&grid);
        assert!(
            (after - (before + delta)).abs() < 1e-6,
            "claimed delta {} but cost moved {}",
            delta,
            after - before
        );
        grid.check().unwrap();

        // The optimum is a 2 x 2 grid split at x = 10.
        assert_eq!(grid.attribute(0).part_count(), 2);
        assert_eq!(grid.attribute(1).part_count(), 2);
        let ordered = grid.attribute(0).ordered_part_ids();
        match grid.attribute(0).part(ordered[0]).content {
            PartContent::Interval { upper, .. } => {
                assert!((upper - 9.5).abs() < 1e-9, "boundary at {}", upper);
            }
            _ => panic!("expected an interval"),
        }
    }

    #[test]
    fn post_optimization_never_worsens_cost() {
        let table = stepped_table();
        let finest = build_initial_grid(&table, &[0, 1]);
        let initial = granularize(&finest, 2);
        let costs = CoclusteringCosts::new(&initial);
        let mut grid = initial.clone();
        let before = costs.total_cost(&grid);
        let delta = post_optimize(&costs, &initial, &mut grid, &SearchBudget::unbounded());
        assert!(delta <= 0.0);
        assert!(costs.total_cost(&grid) <= before + 1e-9);
        grid.check().unwrap();
    }
}
