//! MDL cost model: a pure function from a data grid to a description
//! length, with incremental deltas for local edits.
//!
//! The total cost decomposes additively:
//!
//! ```text
//! cost(G) = grid_cost(G)                      // cell-distribution prior + likelihood normalization
//!         + sum_i attribute_cost(G, i)        // partition priors
//!         + sum_p part_cost(p)                // within-part value distribution
//!         + sum_c cell_cost(f_c)              // multinomial likelihood pieces
//! ```
//!
//! so any local edit touching a bounded set of parts has a delta computable
//! in time proportional to the touched region. The base model covers
//! variable coclustering; [`VarPartCoclusteringCosts`] layers the inner
//! partition priors of the instances x variables variant on top.

use crate::combinatorics::{
    ln_boundary_choice, ln_cell_distribution, ln_factorial, ln_grouping,
};
use grain_core::{AttributeType, DataGrid, PartContent, PartId, ValueEntry};

/// Description of a value/atom move between two parts of one attribute,
/// priced by [`DataGridCosts::move_delta`]. The optimizer fills in the cell
/// collisions; the cost model never walks the grid for moves.
#[derive(Debug)]
pub struct ValueMove<'a> {
    pub attribute: usize,
    pub from: PartId,
    pub to: PartId,
    /// Total frequency carried by the moved values.
    pub moved_frequency: u64,
    /// Moved value entries (empty for a numeric boundary slide).
    pub moved_values: &'a [ValueEntry],
    /// Per touched cell column: (moved frequency, source cell frequency
    /// before the move, destination cell frequency before the move).
    pub touched_cells: &'a [(u64, u64, u64)],
}

/// Description of a bipartition of one part, priced by
/// [`DataGridCosts::split_delta`]. The split side keeps `split_frequency`
/// and the listed values; per touched cell column the pair is (frequency
/// moving to the new part, cell frequency before the split).
#[derive(Debug)]
pub struct PartSplit<'a> {
    pub attribute: usize,
    pub part: PartId,
    pub split_frequency: u64,
    pub split_values: &'a [ValueEntry],
    pub split_cells: &'a [(u64, u64)],
}

/// Interface between the optimizer and a cost structure.
///
/// Implementations must satisfy the additive decomposition above and the
/// null-model equivalence: a grid where every attribute has one part costs
/// exactly [`DataGridCosts::default_cost`].
pub trait DataGridCosts {
    /// Global terms: cell-distribution prior over the current grid size
    /// plus the multinomial normalization `ln N!`.
    fn grid_cost(&self, grid: &DataGrid) -> f64;

    /// Partition prior of one attribute.
    fn attribute_cost(&self, grid: &DataGrid, attribute: usize) -> f64;

    /// Within-part likelihood: instance ranks for numeric intervals, value
    /// arrangements for categorical groups.
    fn part_cost(&self, grid: &DataGrid, attribute: usize, part: PartId) -> f64;

    /// Likelihood piece of one cell: `-ln f!`.
    fn cell_cost(&self, frequency: u64) -> f64;

    /// Total cost of a grid.
    fn total_cost(&self, grid: &DataGrid) -> f64 {
        let mut cost = self.grid_cost(grid);
        for attribute in 0..grid.attribute_count() {
            cost += self.attribute_cost(grid, attribute);
            for part in grid.attribute(attribute).part_ids() {
                cost += self.part_cost(grid, attribute, part);
            }
        }
        for cell in grid.cell_ids() {
            cost += self.cell_cost(grid.cell(cell).frequency);
        }
        cost
    }

    /// Cost of the null model (every attribute reduced to one part).
    fn default_cost(&self) -> f64;

    /// Exact delta of merging parts `a` and `b` of one attribute.
    fn merge_delta(&self, grid: &DataGrid, attribute: usize, a: PartId, b: PartId) -> f64;

    /// The portion of every merge delta of one attribute that does not
    /// depend on which pair merges: the cell-capacity prior change for
    /// k -> k - 1 parts. The merger stores per-candidate deltas net of this
    /// term, so candidates of other attributes stay priced when a merge
    /// shrinks the grid.
    fn merge_common_delta(&self, grid: &DataGrid, attribute: usize) -> f64;

    /// Exact delta of a value/atom move.
    fn move_delta(&self, grid: &DataGrid, value_move: &ValueMove<'_>) -> f64;

    /// Exact delta of a part bipartition.
    fn split_delta(&self, grid: &DataGrid, split: &PartSplit<'_>) -> f64;
}

/// Shape summary of one attribute, enough to price its partition prior.
#[derive(Debug, Clone, Copy)]
struct AttributeShape {
    part_count: u64,
    /// Total observed values over all parts (categorical only).
    value_count: u64,
    /// Largest per-part value count (garbage group candidate).
    max_part_value_count: u64,
}

/// Cost structure of variable coclustering.
///
/// Frozen at construction over the initial grid: the sample size and the
/// per-attribute default terms never change during optimization, so the
/// null cost is computed once.
#[derive(Debug, Clone)]
pub struct CoclusteringCosts {
    sample_size: u64,
    default_cost: f64,
}

impl CoclusteringCosts {
    /// Capture the invariants of the initial grid and compute the null
    /// cost.
    pub fn new(initial_grid: &DataGrid) -> Self {
        let sample_size = initial_grid.total_frequency();
        let mut default_cost = 0.0;
        if sample_size > 0 {
            let ln_n = (sample_size as f64).ln();
            for attribute in 0..initial_grid.attribute_count() {
                // Choice of the part count, k in {1..N}.
                default_cost += ln_n;
                // Single-part likelihood: the whole rank permutation for a
                // numeric attribute, ln N! - sum_v ln n_v! for a
                // categorical one.
                default_cost += ln_factorial(sample_size);
                if initial_grid.attribute(attribute).attribute_type
                    == AttributeType::Categorical
                {
                    for part in initial_grid.attribute(attribute).part_ids() {
                        if let PartContent::ValueSet { values, .. } =
                            &initial_grid.attribute(attribute).part(part).content
                        {
                            for value in values {
                                default_cost -= ln_factorial(value.frequency);
                            }
                        }
                    }
                }
            }
        }
        Self {
            sample_size,
            default_cost,
        }
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    fn shape(&self, grid: &DataGrid, attribute: usize) -> AttributeShape {
        let slab = grid.attribute(attribute);
        let mut value_count = 0u64;
        let mut max_part_value_count = 0u64;
        for part in slab.part_ids() {
            let count = slab.part(part).content.value_count() as u64;
            value_count += count;
            max_part_value_count = max_part_value_count.max(count);
        }
        AttributeShape {
            part_count: slab.part_count() as u64,
            value_count,
            max_part_value_count,
        }
    }

    /// Partition prior from a shape summary. Categorical attributes choose
    /// the cheaper of the plain grouping prior and the garbage variant
    /// (index choice `ln k` plus grouping over the non-garbage values and
    /// one super-value).
    fn attribute_cost_from_shape(
        &self,
        attribute_type: AttributeType,
        shape: AttributeShape,
    ) -> f64 {
        if self.sample_size == 0 {
            return 0.0;
        }
        let mut cost = (self.sample_size as f64).ln();
        match attribute_type {
            AttributeType::Numeric => {
                cost += ln_boundary_choice(self.sample_size, shape.part_count);
            }
            AttributeType::Categorical => {
                let plain = ln_grouping(shape.value_count, shape.part_count);
                if shape.part_count >= 2 && shape.max_part_value_count >= 2 {
                    let garbage = (shape.part_count as f64).ln()
                        + ln_grouping(
                            shape.value_count - shape.max_part_value_count + 1,
                            shape.part_count,
                        );
                    cost += plain.min(garbage);
                } else {
                    cost += plain;
                }
            }
        }
        cost
    }

    /// Grid-level prior from a real-valued cell capacity.
    fn grid_cost_from_size(&self, cells: f64) -> f64 {
        if self.sample_size == 0 {
            return 0.0;
        }
        ln_cell_distribution(self.sample_size, cells) + ln_factorial(self.sample_size)
    }

    /// Within-part likelihood: `ln N_p!` pays for the instance ranks of a
    /// numeric interval; categorical parts get back the per-value
    /// arrangements (`- sum_v ln n_v!`).
    fn part_cost_from_parts(&self, frequency: u64, values: &[ValueEntry]) -> f64 {
        let mut cost = ln_factorial(frequency);
        for value in values {
            cost -= ln_factorial(value.frequency);
        }
        cost
    }
}

impl DataGridCosts for CoclusteringCosts {
    fn grid_cost(&self, grid: &DataGrid) -> f64 {
        self.grid_cost_from_size(grid.grid_size())
    }

    fn attribute_cost(&self, grid: &DataGrid, attribute: usize) -> f64 {
        self.attribute_cost_from_shape(
            grid.attribute(attribute).attribute_type,
            self.shape(grid, attribute),
        )
    }

    fn part_cost(&self, grid: &DataGrid, attribute: usize, part: PartId) -> f64 {
        let slab = grid.attribute(attribute);
        let part = slab.part(part);
        match &part.content {
            PartContent::Interval { .. } => self.part_cost_from_parts(part.frequency, &[]),
            PartContent::ValueSet { values, .. } => {
                self.part_cost_from_parts(part.frequency, values)
            }
        }
    }

    fn cell_cost(&self, frequency: u64) -> f64 {
        -ln_factorial(frequency)
    }

    fn default_cost(&self) -> f64 {
        self.default_cost
    }

    fn merge_delta(&self, grid: &DataGrid, attribute: usize, a: PartId, b: PartId) -> f64 {
        let slab = grid.attribute(attribute);
        let part_a = slab.part(a);
        let part_b = slab.part(b);

        // Partition prior: k -> k - 1, garbage candidate re-evaluated with
        // the fused value count.
        let shape = self.shape(grid, attribute);
        let fused_count =
            (part_a.content.value_count() + part_b.content.value_count()) as u64;
        let mut max_other = 0u64;
        for part in slab.part_ids() {
            if part != a && part != b {
                max_other = max_other.max(slab.part(part).content.value_count() as u64);
            }
        }
        let merged_shape = AttributeShape {
            part_count: shape.part_count - 1,
            value_count: shape.value_count,
            max_part_value_count: max_other.max(fused_count),
        };
        let mut delta = self.attribute_cost_from_shape(slab.attribute_type, merged_shape)
            - self.attribute_cost_from_shape(slab.attribute_type, shape);

        // Grid prior: the cell capacity shrinks by one part on this
        // dimension.
        delta += self.merge_common_delta(grid, attribute);

        // Within-part likelihood: ranks or value arrangements, both driven
        // by the part totals (the per-value pieces travel unchanged).
        delta += ln_factorial(part_a.frequency + part_b.frequency)
            - ln_factorial(part_a.frequency)
            - ln_factorial(part_b.frequency);

        // Cell collisions: iterate the part with fewer cells.
        let (small, large) = if part_a.cells.len() <= part_b.cells.len() {
            (a, b)
        } else {
            (b, a)
        };
        for cell_id in &slab.part(small).cells {
            let cell = grid.cell(*cell_id);
            let mut key = cell.parts.clone();
            key[attribute] = large;
            if let Some(other_id) = grid.lookup_cell(&key) {
                let other = grid.cell(other_id);
                delta += self.cell_cost(cell.frequency + other.frequency)
                    - self.cell_cost(cell.frequency)
                    - self.cell_cost(other.frequency);
            }
        }
        delta
    }

    fn merge_common_delta(&self, grid: &DataGrid, attribute: usize) -> f64 {
        let part_count = grid.attribute(attribute).part_count() as f64;
        if part_count < 2.0 {
            return 0.0;
        }
        let cells = grid.grid_size();
        let merged_cells = cells / part_count * (part_count - 1.0);
        self.grid_cost_from_size(merged_cells) - self.grid_cost_from_size(cells)
    }

    fn move_delta(&self, grid: &DataGrid, value_move: &ValueMove<'_>) -> f64 {
        let slab = grid.attribute(value_move.attribute);
        let from = slab.part(value_move.from);
        let to = slab.part(value_move.to);
        debug_assert!(value_move.moved_frequency < from.frequency);

        let mut delta = 0.0;

        // Partition prior: the part count is unchanged, but categorical
        // garbage selection may change with the value counts.
        if slab.attribute_type == AttributeType::Categorical {
            let shape = self.shape(grid, value_move.attribute);
            let moved = value_move.moved_values.len() as u64;
            let mut max_after = 0u64;
            for part in slab.part_ids() {
                let mut count = slab.part(part).content.value_count() as u64;
                if part == value_move.from {
                    count -= moved;
                } else if part == value_move.to {
                    count += moved;
                }
                max_after = max_after.max(count);
            }
            let moved_shape = AttributeShape {
                max_part_value_count: max_after,
                ..shape
            };
            delta += self.attribute_cost_from_shape(slab.attribute_type, moved_shape)
                - self.attribute_cost_from_shape(slab.attribute_type, shape);
        }

        // Within-part likelihood follows the part totals; the per-value
        // pieces travel with the moved values.
        delta += ln_factorial(from.frequency - value_move.moved_frequency)
            - ln_factorial(from.frequency);
        delta += ln_factorial(to.frequency + value_move.moved_frequency)
            - ln_factorial(to.frequency);

        // Cell columns touched by the move.
        for (moved, from_before, to_before) in value_move.touched_cells {
            delta += self.cell_cost(from_before - moved) - self.cell_cost(*from_before);
            delta += self.cell_cost(to_before + moved) - self.cell_cost(*to_before);
        }
        delta
    }

    fn split_delta(&self, grid: &DataGrid, split: &PartSplit<'_>) -> f64 {
        let slab = grid.attribute(split.attribute);
        let part = slab.part(split.part);
        debug_assert!(split.split_frequency < part.frequency);

        // Partition prior: k -> k + 1.
        let shape = self.shape(grid, split.attribute);
        let moved = split.split_values.len() as u64;
        let remaining_count = part.content.value_count() as u64 - moved;
        let mut max_after = moved.max(remaining_count);
        for other in slab.part_ids() {
            if other != split.part {
                max_after = max_after.max(slab.part(other).content.value_count() as u64);
            }
        }
        let split_shape = AttributeShape {
            part_count: shape.part_count + 1,
            value_count: shape.value_count,
            max_part_value_count: max_after,
        };
        let mut delta = self.attribute_cost_from_shape(slab.attribute_type, split_shape)
            - self.attribute_cost_from_shape(slab.attribute_type, shape);

        // Grid prior: one more part on this dimension.
        let cells = grid.grid_size();
        let split_cells = cells / shape.part_count as f64 * (shape.part_count + 1) as f64;
        delta += self.grid_cost_from_size(split_cells) - self.grid_cost_from_size(cells);

        // Within-part likelihood.
        delta += ln_factorial(split.split_frequency)
            + ln_factorial(part.frequency - split.split_frequency)
            - ln_factorial(part.frequency);

        // Cell columns: each touched column splits in two.
        for (moved, before) in split.split_cells {
            delta += self.cell_cost(*moved) + self.cell_cost(before - moved)
                - self.cell_cost(*before);
        }
        delta
    }
}

/// Cost structure of instances x variables coclustering.
///
/// The two grid dimensions (identifier, variable-part) are priced exactly
/// like variable coclustering; on top, the model pays the partition priors
/// of every inner variable, frozen at construction since the inner
/// partitions do not move during clustering.
#[derive(Debug, Clone)]
pub struct VarPartCoclusteringCosts {
    base: CoclusteringCosts,
    inner_structure_cost: f64,
}

impl VarPartCoclusteringCosts {
    pub fn new(initial_grid: &DataGrid) -> Self {
        let base = CoclusteringCosts::new(initial_grid);
        let mut inner_structure_cost = 0.0;
        if let Some(varpart) = &initial_grid.varpart {
            let n = initial_grid.total_frequency();
            if n > 0 {
                for inner in &varpart.inner {
                    // Part-count choice plus the partition prior of the
                    // frozen inner partition.
                    inner_structure_cost += (n as f64).ln();
                    let k = inner.parts.len() as u64;
                    match inner.attribute_type {
                        AttributeType::Numeric => {
                            inner_structure_cost += ln_boundary_choice(n, k);
                        }
                        AttributeType::Categorical => {
                            let values: u64 = inner
                                .parts
                                .iter()
                                .map(|p| p.value_count() as u64)
                                .sum();
                            inner_structure_cost += ln_grouping(values, k);
                        }
                    }
                }
            }
        }
        Self {
            base,
            inner_structure_cost,
        }
    }

    pub fn inner_structure_cost(&self) -> f64 {
        self.inner_structure_cost
    }
}

impl DataGridCosts for VarPartCoclusteringCosts {
    fn grid_cost(&self, grid: &DataGrid) -> f64 {
        self.base.grid_cost(grid) + self.inner_structure_cost
    }

    fn attribute_cost(&self, grid: &DataGrid, attribute: usize) -> f64 {
        self.base.attribute_cost(grid, attribute)
    }

    fn part_cost(&self, grid: &DataGrid, attribute: usize, part: PartId) -> f64 {
        self.base.part_cost(grid, attribute, part)
    }

    fn cell_cost(&self, frequency: u64) -> f64 {
        self.base.cell_cost(frequency)
    }

    fn default_cost(&self) -> f64 {
        self.base.default_cost() + self.inner_structure_cost
    }

    fn merge_delta(&self, grid: &DataGrid, attribute: usize, a: PartId, b: PartId) -> f64 {
        self.base.merge_delta(grid, attribute, a, b)
    }

    fn merge_common_delta(&self, grid: &DataGrid, attribute: usize) -> f64 {
        self.base.merge_common_delta(grid, attribute)
    }

    fn move_delta(&self, grid: &DataGrid, value_move: &ValueMove<'_>) -> f64 {
        self.base.move_delta(grid, value_move)
    }

    fn split_delta(&self, grid: &DataGrid, split: &PartSplit<'_>) -> f64 {
        self.base.split_delta(grid, split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grain_core::{SymbolId, ValueEntry};

    fn value(symbol: u32, frequency: u64) -> ValueEntry {
        ValueEntry {
            symbol: SymbolId::new(symbol),
            frequency,
        }
    }

    /// 2x2 categorical grid with perfectly dependent values.
    fn dependent_grid() -> DataGrid {
        let mut grid = DataGrid::new(vec![
            ("X".into(), AttributeType::Categorical),
            ("Y".into(), AttributeType::Categorical),
        ]);
        let x0 = grid.add_part(0, PartContent::ValueSet {
            values: vec![value(0, 50)],
            has_catchall: false,
        });
        let x1 = grid.add_part(0, PartContent::ValueSet {
            values: vec![value(1, 50)],
            has_catchall: false,
        });
        let y0 = grid.add_part(1, PartContent::ValueSet {
            values: vec![value(0, 50)],
            has_catchall: false,
        });
        let y1 = grid.add_part(1, PartContent::ValueSet {
            values: vec![value(1, 50)],
            has_catchall: false,
        });
        grid.add_cell_frequency(vec![x0, y0], 50);
        grid.add_cell_frequency(vec![x1, y1], 50);
        grid
    }

    fn null_grid_of(grid: &DataGrid) -> DataGrid {
        let mut collapsed = grid.clone();
        for attribute in 0..collapsed.attribute_count() {
            let ids = collapsed.attribute(attribute).ordered_part_ids();
            for other in &ids[1..] {
                collapsed.merge_parts(attribute, ids[0], *other);
            }
        }
        collapsed
    }

    #[test]
    fn null_model_equals_default_cost() {
        let grid = dependent_grid();
        let costs = CoclusteringCosts::new(&grid);
        let collapsed = null_grid_of(&grid);
        let total = costs.total_cost(&collapsed);
        assert!(
            (total - costs.default_cost()).abs() < 1e-9,
            "null grid cost {} differs from default cost {}",
            total,
            costs.default_cost()
        );
    }

    #[test]
    fn dependent_grid_beats_null_model() {
        let grid = dependent_grid();
        let costs = CoclusteringCosts::new(&grid);
        assert!(costs.total_cost(&grid) < costs.default_cost());
    }

    #[test]
    fn merge_delta_matches_recomputation() {
        let grid = dependent_grid();
        let costs = CoclusteringCosts::new(&grid);
        let before = costs.total_cost(&grid);
        let parts = grid.attribute(0).ordered_part_ids();
        let delta = costs.merge_delta(&grid, 0, parts[0], parts[1]);

        let mut merged = grid.clone();
        merged.merge_parts(0, parts[0], parts[1]);
        let after = costs.total_cost(&merged);
        assert!(
            (after - (before + delta)).abs() < 1e-9,
            "delta {} but recomputed difference {}",
            delta,
            after - before
        );
    }

    #[test]
    fn move_delta_matches_recomputation() {
        // Three values on X so a move keeps both parts non-empty.
        let mut grid = DataGrid::new(vec![
            ("X".into(), AttributeType::Categorical),
            ("Y".into(), AttributeType::Categorical),
        ]);
        let x0 = grid.add_part(0, PartContent::ValueSet {
            values: vec![value(0, 30), value(2, 20)],
            has_catchall: false,
        });
        let x1 = grid.add_part(0, PartContent::ValueSet {
            values: vec![value(1, 50)],
            has_catchall: false,
        });
        let y0 = grid.add_part(1, PartContent::ValueSet {
            values: vec![value(0, 60)],
            has_catchall: false,
        });
        let y1 = grid.add_part(1, PartContent::ValueSet {
            values: vec![value(1, 40)],
            has_catchall: false,
        });
        grid.add_cell_frequency(vec![x0, y0], 40);
        grid.add_cell_frequency(vec![x0, y1], 10);
        grid.add_cell_frequency(vec![x1, y0], 20);
        grid.add_cell_frequency(vec![x1, y1], 30);
        let costs = CoclusteringCosts::new(&grid);
        let before = costs.total_cost(&grid);

        // Move value 2 (20 observations: 15 on y0, 5 on y1) from x0 to x1.
        let moved_values = [value(2, 20)];
        let touched = [(15u64, 40u64, 20u64), (5u64, 10u64, 30u64)];
        let delta = costs.move_delta(
            &grid,
            &ValueMove {
                attribute: 0,
                from: x0,
                to: x1,
                moved_frequency: 20,
                moved_values: &moved_values,
                touched_cells: &touched,
            },
        );

        // Rebuild the moved grid from scratch.
        let mut moved = DataGrid::new(vec![
            ("X".into(), AttributeType::Categorical),
            ("Y".into(), AttributeType::Categorical),
        ]);
        let m0 = moved.add_part(0, PartContent::ValueSet {
            values: vec![value(0, 30)],
            has_catchall: false,
        });
        let m1 = moved.add_part(0, PartContent::ValueSet {
            values: vec![value(1, 50), value(2, 20)],
            has_catchall: false,
        });
        let n0 = moved.add_part(1, PartContent::ValueSet {
            values: vec![value(0, 60)],
            has_catchall: false,
        });
        let n1 = moved.add_part(1, PartContent::ValueSet {
            values: vec![value(1, 40)],
            has_catchall: false,
        });
        moved.add_cell_frequency(vec![m0, n0], 25);
        moved.add_cell_frequency(vec![m0, n1], 5);
        moved.add_cell_frequency(vec![m1, n0], 35);
        moved.add_cell_frequency(vec![m1, n1], 35);
        let after = costs.total_cost(&moved);
        assert!(
            (after - (before + delta)).abs() < 1e-9,
            "delta {} but recomputed difference {}",
            delta,
            after - before
        );
    }

    #[test]
    fn split_is_inverse_of_merge() {
        let grid = dependent_grid();
        let costs = CoclusteringCosts::new(&grid);
        let parts = grid.attribute(0).ordered_part_ids();
        let merge = costs.merge_delta(&grid, 0, parts[0], parts[1]);

        let mut merged = grid.clone();
        merged.merge_parts(0, parts[0], parts[1]);
        // Split the fused part back: value 1 (50 observations on the y1
        // column, whose merged cell held 50).
        let split_values = [value(1, 50)];
        let split_cells = [(50u64, 50u64)];
        let split = costs.split_delta(
            &merged,
            &PartSplit {
                attribute: 0,
                part: parts[0],
                split_frequency: 50,
                split_values: &split_values,
                split_cells: &split_cells,
            },
        );
        assert!(
            (merge + split).abs() < 1e-9,
            "merge {} and split {} are not inverse",
            merge,
            split
        );
    }

    #[test]
    fn numeric_null_model_equals_default_cost() {
        let mut grid = DataGrid::new(vec![
            ("X".into(), AttributeType::Numeric),
            ("Y".into(), AttributeType::Categorical),
        ]);
        let x0 = grid.add_part(0, PartContent::Interval {
            lower: f64::NEG_INFINITY,
            upper: 2.0,
        });
        let x1 = grid.add_part(0, PartContent::Interval {
            lower: 2.0,
            upper: f64::INFINITY,
        });
        let y0 = grid.add_part(1, PartContent::ValueSet {
            values: vec![value(0, 30)],
            has_catchall: false,
        });
        let y1 = grid.add_part(1, PartContent::ValueSet {
            values: vec![value(1, 30)],
            has_catchall: false,
        });
        grid.add_cell_frequency(vec![x0, y0], 30);
        grid.add_cell_frequency(vec![x1, y1], 30);

        let costs = CoclusteringCosts::new(&grid);
        let collapsed = null_grid_of(&grid);
        assert!((costs.total_cost(&collapsed) - costs.default_cost()).abs() < 1e-9);
        // Aligning the interval boundary with the class boundary must beat
        // the null model through the rank terms.
        assert!(costs.total_cost(&grid) < costs.default_cost());
    }

    #[test]
    fn empty_sample_costs_nothing() {
        let grid = DataGrid::new(vec![
            ("X".into(), AttributeType::Categorical),
            ("Y".into(), AttributeType::Categorical),
        ]);
        let costs = CoclusteringCosts::new(&grid);
        assert_eq!(costs.default_cost(), 0.0);
        assert_eq!(costs.total_cost(&grid), 0.0);
    }
}
