//! Greedy grid optimization under a granularity schedule.
//!
//! The search runs one granularity level at a time: the finest grid is
//! coarsened to at most `2^g` parts per attribute, greedy negative-delta
//! merges run to exhaustion, then the univariate post-optimization passes
//! (boundary slides, value moves, splits) iterate to a fixed point. Every
//! strict improvement over the running best triggers the anytime callback
//! with a deep-copied snapshot. After the last level, one exhaustive
//! post-optimization runs at the finest atom resolution and a final
//! callback is forced.
//!
//! Cancellation is cooperative: the caller-owned token is polled between
//! moves, and on observing it (or the wall-clock deadline) the optimizer
//! finishes the current move and returns the best grid found so far.

use crate::costs::DataGridCosts;
use crate::granularize::granularize;
use crate::merger::GridMerger;
use crate::post::post_optimize;
use grain_core::{CancellationToken, DataGrid};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Deltas above this threshold are treated as noise and not applied.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

/// Search parameters; one instance per engine invocation.
#[derive(Debug, Clone)]
pub struct OptimizerParams {
    /// Wall-clock budget; `None` runs the full schedule.
    pub time_budget: Option<Duration>,
    /// Cap on the granularity exponent; `None` uses `ceil(log2 N)`.
    pub max_granularity: Option<u32>,
    /// Merge/post alternations per granularity level.
    pub max_rounds_per_level: usize,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            time_budget: None,
            max_granularity: None,
            max_rounds_per_level: 4,
        }
    }
}

/// Shared stop condition: deadline plus cancellation token.
#[derive(Debug, Clone)]
pub struct SearchBudget {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl SearchBudget {
    pub fn new(time_budget: Option<Duration>, token: CancellationToken) -> Self {
        Self {
            deadline: time_budget.map(|budget| Instant::now() + budget),
            token,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    pub fn exhausted(&self) -> bool {
        if self.token.is_requested() {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    pub fn interrupted(&self) -> bool {
        self.token.is_requested()
    }
}

/// Receiver of anytime improvements. Snapshots are deep copies; the
/// handler may perform I/O.
pub trait AnytimeHandler {
    /// Called on every strict improvement, and once more at the end with
    /// `is_last = true` regardless of improvement. `granularized_initial`
    /// is the coarsened input grid of the level that produced the
    /// improvement.
    fn handle_improvement(
        &mut self,
        optimized: &DataGrid,
        granularized_initial: &DataGrid,
        cost: f64,
        is_last: bool,
    );
}

/// Handler that ignores every notification.
pub struct NoopHandler;

impl AnytimeHandler for NoopHandler {
    fn handle_improvement(&mut self, _: &DataGrid, _: &DataGrid, _: f64, _: bool) {}
}

/// Result of one optimization run.
pub struct OptimizedGrid {
    pub grid: DataGrid,
    pub cost: f64,
    /// The coarsened input grid matching the best solution's level.
    pub granularized_initial: DataGrid,
    /// True when the run ended on the token rather than completing.
    pub interrupted: bool,
}

/// The search procedure; generic over the cost structure.
pub struct DataGridOptimizer<'c, C: DataGridCosts> {
    costs: &'c C,
    params: OptimizerParams,
    budget: SearchBudget,
}

impl<'c, C: DataGridCosts> DataGridOptimizer<'c, C> {
    pub fn new(costs: &'c C, params: OptimizerParams, token: CancellationToken) -> Self {
        let budget = SearchBudget::new(params.time_budget, token);
        Self {
            costs,
            params,
            budget,
        }
    }

    /// Granularity ceiling: `ceil(log2 N)`, clamped by the parameter cap.
    fn max_level(&self, sample_size: u64) -> u32 {
        if sample_size <= 1 {
            return 0;
        }
        let levels = (sample_size as f64).log2().ceil() as u32;
        match self.params.max_granularity {
            Some(cap) => levels.min(cap),
            None => levels,
        }
    }

    /// Optimize the finest grid, reporting improvements to `handler`.
    pub fn optimize(
        &self,
        finest: &DataGrid,
        handler: &mut dyn AnytimeHandler,
    ) -> OptimizedGrid {
        // The null grid is the baseline best.
        let mut best = granularize(finest, 0);
        let mut best_cost = self.costs.total_cost(&best);
        let mut best_initial = best.clone();
        debug_assert!((best_cost - self.costs.default_cost()).abs() < 1e-6);

        let max_level = self.max_level(finest.total_frequency());
        info!(max_level, sample_size = finest.total_frequency(), "optimization starts");

        for level in 1..=max_level {
            if self.budget.exhausted() {
                break;
            }
            let initial = granularize(finest, level);
            // Past the level where every attribute is at its finest
            // partition, further levels would repeat the same work.
            let saturated = (0..finest.attribute_count()).all(|attribute| {
                initial.attribute(attribute).part_count()
                    == finest.attribute(attribute).part_count()
            });

            let (grid, cost) = self.optimize_level(&initial);
            debug!(level, cost, "granularity level optimized");

            if cost < best_cost - IMPROVEMENT_EPSILON {
                best = grid;
                best_cost = cost;
                best_initial = initial;
                handler.handle_improvement(&best, &best_initial, best_cost, false);
            }
            if saturated {
                break;
            }
        }

        // Exhaustive post-optimization of the best solution at the finest
        // atom resolution, with no part-count cap.
        if !self.budget.exhausted() && best.is_informative() {
            let mut grid = best.clone();
            let delta = post_optimize(self.costs, finest, &mut grid, &self.budget);
            if delta < -IMPROVEMENT_EPSILON {
                best_cost = self.costs.total_cost(&grid);
                best = grid;
                best_initial = finest.clone();
            }
        }

        // Forced last notification, improvement or not.
        handler.handle_improvement(&best, &best_initial, best_cost, true);
        OptimizedGrid {
            grid: best,
            cost: best_cost,
            granularized_initial: best_initial,
            interrupted: self.budget.interrupted(),
        }
    }

    /// One granularity level: alternate greedy merges and post passes
    /// until a round stops improving.
    fn optimize_level(&self, initial: &DataGrid) -> (DataGrid, f64) {
        let mut grid = initial.clone();
        let mut cost = self.costs.total_cost(&grid);
        for round in 0..self.params.max_rounds_per_level {
            let mut round_delta = 0.0;

            // Greedy merges: pop the cheapest candidate while it improves.
            let mut merger = GridMerger::new(grid, self.costs);
            while !self.budget.exhausted() {
                match merger.search_best_merge() {
                    Some((key, delta)) if delta < -IMPROVEMENT_EPSILON => {
                        merger.perform_merge(key);
                        round_delta += delta;
                    }
                    _ => break,
                }
            }
            grid = merger.into_grid();

            round_delta += post_optimize(self.costs, initial, &mut grid, &self.budget);
            cost += round_delta;

            if round_delta >= -IMPROVEMENT_EPSILON || self.budget.exhausted() {
                debug!(round, "level converged");
                break;
            }
        }
        // Guard against delta drift over a long level.
        let recomputed = self.costs.total_cost(&grid);
        debug_assert!(
            (recomputed - cost).abs() < 1e-6,
            "accumulated cost {} but grid reprices to {}",
            cost,
            recomputed
        );
        (grid, recomputed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costs::CoclusteringCosts;
    use crate::granularize::build_initial_grid;
    use grain_core::{
        AttributeType, Continuous, SymbolId, TupleAttribute, TupleTable, TupleTableBuilder,
        Value,
    };

    fn two_symbol_attributes() -> Vec<TupleAttribute> {
        vec![
            TupleAttribute {
                name: "X".into(),
                attribute_type: AttributeType::Categorical,
            },
            TupleAttribute {
                name: "Y".into(),
                attribute_type: AttributeType::Categorical,
            },
        ]
    }

    /// Y = f(X) with a 4-to-1 surjection over 16 X symbols.
    fn dependent_table() -> TupleTable {
        let mut builder = TupleTableBuilder::new(two_symbol_attributes());
        let xs: Vec<SymbolId> = (0..16)
            .map(|i| builder.symbols_mut().intern(&format!("x{:02}", i)))
            .collect();
        let ys: Vec<SymbolId> = (0..4)
            .map(|i| builder.symbols_mut().intern(&format!("y{}", i)))
            .collect();
        for (i, x) in xs.iter().enumerate() {
            builder.push(
                vec![Value::Symbol(*x), Value::Symbol(ys[i % 4])],
                60,
            );
        }
        builder.freeze()
    }

    /// X and Y independent and uniform.
    fn independent_table() -> TupleTable {
        let mut builder = TupleTableBuilder::new(two_symbol_attributes());
        let xs: Vec<SymbolId> = (0..8)
            .map(|i| builder.symbols_mut().intern(&format!("x{}", i)))
            .collect();
        let ys: Vec<SymbolId> = (0..8)
            .map(|i| builder.symbols_mut().intern(&format!("y{}", i)))
            .collect();
        for x in &xs {
            for y in &ys {
                builder.push(vec![Value::Symbol(*x), Value::Symbol(*y)], 16);
            }
        }
        builder.freeze()
    }

    struct Trace {
        costs: Vec<f64>,
        last_seen: bool,
    }

    impl AnytimeHandler for Trace {
        fn handle_improvement(&mut self, grid: &DataGrid, _: &DataGrid, cost: f64, last: bool) {
            grid.check().unwrap();
            if !last {
                if let Some(previous) = self.costs.last() {
                    assert!(cost < previous + 1e-9, "anytime cost went up");
                }
                self.costs.push(cost);
            }
            self.last_seen = last || self.last_seen;
        }
    }

    #[test]
    fn dependent_data_yields_an_informative_grid() {
        let table = dependent_table();
        let finest = build_initial_grid(&table, &[0, 1]);
        let costs = CoclusteringCosts::new(&finest);
        let optimizer = DataGridOptimizer::new(
            &costs,
            OptimizerParams::default(),
            CancellationToken::new(),
        );
        let mut trace = Trace {
            costs: Vec::new(),
            last_seen: false,
        };
        let result = optimizer.optimize(&finest, &mut trace);
        assert!(trace.last_seen);
        assert!(!result.interrupted);
        assert!(result.grid.is_informative());
        // Y keeps its 4 groups; X collapses onto the 4 preimages.
        assert_eq!(result.grid.attribute(1).part_count(), 4);
        assert_eq!(result.grid.attribute(0).part_count(), 4);
        let level = 1.0 - result.cost / costs.default_cost();
        assert!(level > 0.25, "level {} too low", level);
    }

    #[test]
    fn independent_data_collapses_to_the_null_grid() {
        let table = independent_table();
        let finest = build_initial_grid(&table, &[0, 1]);
        let costs = CoclusteringCosts::new(&finest);
        let optimizer = DataGridOptimizer::new(
            &costs,
            OptimizerParams::default(),
            CancellationToken::new(),
        );
        let result = optimizer.optimize(&finest, &mut NoopHandler);
        assert!(!result.grid.is_informative());
        let level = 1.0 - result.cost / costs.default_cost();
        assert!(level.abs() < 0.02, "level {} should be near zero", level);
    }

    #[test]
    fn cancellation_returns_the_best_so_far() {
        let table = dependent_table();
        let finest = build_initial_grid(&table, &[0, 1]);
        let costs = CoclusteringCosts::new(&finest);
        let token = CancellationToken::new();
        token.request();
        let optimizer =
            DataGridOptimizer::new(&costs, OptimizerParams::default(), token);
        let result = optimizer.optimize(&finest, &mut NoopHandler);
        assert!(result.interrupted);
        // The baseline null grid is still a consistent answer.
        result.grid.check().unwrap();
    }

    #[test]
    fn single_value_attributes_stay_single_part() {
        let mut builder = TupleTableBuilder::new(two_symbol_attributes());
        let x = builder.symbols_mut().intern("only");
        let ys: Vec<SymbolId> = (0..4)
            .map(|i| builder.symbols_mut().intern(&format!("y{}", i)))
            .collect();
        for (i, y) in ys.iter().enumerate() {
            builder.push(vec![Value::Symbol(x), Value::Symbol(*y)], (i as u64 + 1) * 10);
        }
        let table = builder.freeze();
        let finest = build_initial_grid(&table, &[0, 1]);
        let costs = CoclusteringCosts::new(&finest);
        let optimizer = DataGridOptimizer::new(
            &costs,
            OptimizerParams::default(),
            CancellationToken::new(),
        );
        let result = optimizer.optimize(&finest, &mut NoopHandler);
        assert_eq!(result.grid.attribute(0).part_count(), 1);
        assert!(!result.grid.is_informative());
    }

    #[test]
    fn numeric_step_data_recovers_the_boundary() {
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
        for i in 0..32u32 {
            builder.push(
                vec![
                    Value::Number(Continuous::new(i as f64).unwrap()),
                    Value::Symbol(if i < 16 { low } else { high }),
                ],
                30,
            );
        }
        let table = builder.freeze();
        let finest = build_initial_grid(&table, &[0, 1]);
        let costs = CoclusteringCosts::new(&finest);
        let optimizer = DataGridOptimizer::new(
            &costs,
            OptimizerParams::default(),
            CancellationToken::new(),
        );
        let result = optimizer.optimize(&finest, &mut NoopHandler);
        assert_eq!(result.grid.attribute(0).part_count(), 2);
        assert_eq!(result.grid.attribute(1).part_count(), 2);
    }
}
