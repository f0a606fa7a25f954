//! Engine orchestration: from a tuple table to an annotated hierarchy.
//!
//! One [`CoclusteringBuilder`] is constructed per invocation and owns the
//! whole context: parameters, memory budget, cancellation token and
//! diagnostics. Nothing engine-wide is global. The pipeline stages memory
//! checks before the grid is built and before it is optimized, so an
//! oversized problem is refused with a diagnostic instead of thrashing.

use crate::costs::{CoclusteringCosts, DataGridCosts, VarPartCoclusteringCosts};
use crate::granularize::build_initial_grid;
use crate::hierarchy_builder::{HierarchyBuilder, ValueNamer};
use crate::optimizer::{
    AnytimeHandler, DataGridOptimizer, OptimizedGrid, OptimizerParams,
};
use crate::varpart::{build_varpart_grid, VarPartLayout};
use grain_core::{
    CancellationToken, DataGrid, DescriptiveStats, Diagnostics, GrainError, GrainResult,
    HierarchicalDataGrid, MemoryBudget, SymbolId, TupleTable,
};
use tracing::info;

/// Which variables to cocluster.
#[derive(Debug, Clone)]
pub enum CoclusteringSpec {
    /// Variable coclustering: every named attribute becomes a dimension.
    Variables { attributes: Vec<String> },
    /// Instances x variables: rows identified by one attribute, clustered
    /// jointly with the parts of the inner attributes.
    InstancesVariables {
        identifier: String,
        inner: Vec<String>,
    },
}

/// Per-invocation engine parameters.
#[derive(Debug, Clone, Default)]
pub struct EngineParams {
    pub memory: MemoryBudget,
    pub optimizer: OptimizerParams,
    /// Recorded in the report; the weighting itself happens in the reader.
    pub frequency_attribute_name: Option<String>,
    pub short_description: String,
}

/// Result of a coclustering run.
#[derive(Debug)]
pub enum CoclusteringOutcome {
    /// At least two attributes kept more than one part.
    Informative(HierarchicalDataGrid),
    /// Empty data, or the optimum is the null model.
    NotInformative,
}

/// Receiver of annotated anytime improvements.
pub trait CoclusteringHandler {
    fn handle_improvement(&mut self, report: &HierarchicalDataGrid, is_last: bool);
}

/// Handler that ignores every notification.
pub struct SilentHandler;

impl CoclusteringHandler for SilentHandler {
    fn handle_improvement(&mut self, _: &HierarchicalDataGrid, _: bool) {}
}

/// The engine context; one per invocation.
pub struct CoclusteringBuilder {
    params: EngineParams,
    token: CancellationToken,
    pub diagnostics: Diagnostics,
}

impl CoclusteringBuilder {
    pub fn new(params: EngineParams, token: CancellationToken) -> Self {
        Self {
            params,
            token,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Run the full pipeline. Specification and resource failures are
    /// errors; an uninformative optimum is a normal outcome.
    pub fn compute(
        &mut self,
        table: &TupleTable,
        spec: &CoclusteringSpec,
        handler: &mut dyn CoclusteringHandler,
    ) -> GrainResult<CoclusteringOutcome> {
        self.check_specification(table, spec)?;

        if table.total_frequency() == 0 {
            self.diagnostics
                .add_warning("data", "empty database: coclustering is not informative");
            return Ok(CoclusteringOutcome::NotInformative);
        }

        // Memory staging: can the finest grid be built at all?
        let part_estimate: u64 = table
            .stats()
            .iter()
            .map(|stats| stats.distinct_count() as u64)
            .sum();
        let cell_estimate = table.tuple_count() as u64;
        if !self.params.memory.allows_grid(cell_estimate, part_estimate) {
            return Err(GrainError::Resource(format!(
                "initial grid estimate ({} cells, {} parts) exceeds the memory budget",
                cell_estimate, part_estimate
            )));
        }

        match spec {
            CoclusteringSpec::Variables { attributes } => {
                let indices: Vec<usize> = attributes
                    .iter()
                    .map(|name| table.attribute_index(name).expect("checked attribute"))
                    .collect();
                let finest = build_initial_grid(table, &indices);
                let costs = CoclusteringCosts::new(&finest);
                let symbols = table.symbols().clone();
                let namer =
                    move |_attribute: usize, symbol: SymbolId| symbols.name(symbol).to_string();
                self.optimize_and_annotate(table, spec, finest, &costs, &namer, handler)
            }
            CoclusteringSpec::InstancesVariables { identifier, inner } => {
                let layout = VarPartLayout {
                    identifier: table.attribute_index(identifier).expect("checked attribute"),
                    inner: inner
                        .iter()
                        .map(|name| table.attribute_index(name).expect("checked attribute"))
                        .collect(),
                };
                let finest = build_varpart_grid(table, &layout)?;
                let costs = VarPartCoclusteringCosts::new(&finest);
                let symbols = table.symbols().clone();
                let atoms: Vec<String> = finest
                    .varpart
                    .as_ref()
                    .expect("varpart grid")
                    .atoms
                    .iter()
                    .map(|atom| atom.label.clone())
                    .collect();
                let namer = move |attribute: usize, symbol: SymbolId| {
                    if attribute == 1 {
                        atoms[symbol.index()].clone()
                    } else {
                        symbols.name(symbol).to_string()
                    }
                };
                self.optimize_and_annotate(table, spec, finest, &costs, &namer, handler)
            }
        }
    }

    fn optimize_and_annotate<C: DataGridCosts>(
        &mut self,
        table: &TupleTable,
        spec: &CoclusteringSpec,
        finest: DataGrid,
        costs: &C,
        namer: &ValueNamer<'_>,
        handler: &mut dyn CoclusteringHandler,
    ) -> GrainResult<CoclusteringOutcome> {
        // Second memory stage: the optimizer holds two scratch grids plus
        // the candidate queue.
        let cell_count = finest.cell_count() as u64;
        let part_count = finest.total_part_count() as u64;
        if !self
            .params
            .memory
            .allows_optimization(cell_count, part_count)
        {
            return Err(GrainError::Resource(format!(
                "optimization estimate ({} cells, {} parts) exceeds the memory budget",
                cell_count, part_count
            )));
        }

        let bounds = attribute_bounds(table, &finest);
        let hierarchy_builder = HierarchyBuilder::new(costs);
        let mut adapter = AnnotatingHandler {
            hierarchy_builder: &hierarchy_builder,
            bounds: &bounds,
            namer,
            spec,
            params: &self.params,
            inner: handler,
        };

        let optimizer =
            DataGridOptimizer::new(costs, self.params.optimizer.clone(), self.token.clone());
        let OptimizedGrid {
            grid,
            cost,
            granularized_initial,
            interrupted,
        } = optimizer.optimize(&finest, &mut adapter);

        if interrupted {
            self.diagnostics.add_warning(
                "resource",
                "optimization interrupted: keeping the best solution found so far",
            );
        }
        if !grid.is_informative() {
            info!(cost, "coclustering is not informative");
            return Ok(CoclusteringOutcome::NotInformative);
        }

        let mut report =
            hierarchy_builder.build(&grid, &granularized_initial, &bounds, namer)?;
        decorate(&mut report, spec, &self.params);
        info!(
            cost = report.cost,
            level = report.level(),
            "coclustering computed"
        );
        Ok(CoclusteringOutcome::Informative(report))
    }

    fn check_specification(&self, table: &TupleTable, spec: &CoclusteringSpec) -> GrainResult<()> {
        let check_known = |name: &String| -> GrainResult<()> {
            if table.attribute_index(name).is_none() {
                return Err(GrainError::Spec(format!(
                    "coclustering variable `{}` is not in the dictionary",
                    name
                )));
            }
            Ok(())
        };
        match spec {
            CoclusteringSpec::Variables { attributes } => {
                if attributes.len() < 2 {
                    return Err(GrainError::Spec(
                        "coclustering requires at least 2 variables".into(),
                    ));
                }
                let mut seen: Vec<&String> = Vec::new();
                for name in attributes {
                    check_known(name)?;
                    if seen.contains(&name) {
                        return Err(GrainError::Spec(format!(
                            "coclustering variable `{}` is specified twice",
                            name
                        )));
                    }
                    seen.push(name);
                }
            }
            CoclusteringSpec::InstancesVariables { identifier, inner } => {
                check_known(identifier)?;
                if inner.is_empty() {
                    return Err(GrainError::Spec(
                        "instances x variables coclustering requires at least one inner variable"
                            .into(),
                    ));
                }
                let mut seen: Vec<&String> = Vec::new();
                for name in inner {
                    check_known(name)?;
                    if name == identifier {
                        return Err(GrainError::Spec(format!(
                            "identifier variable `{}` cannot also be an inner variable",
                            name
                        )));
                    }
                    if seen.contains(&name) {
                        return Err(GrainError::Spec(format!(
                            "inner variable `{}` is specified twice",
                            name
                        )));
                    }
                    seen.push(name);
                }
            }
        }
        Ok(())
    }
}

/// Numeric min/max per grid attribute, from the tuple-table stats.
fn attribute_bounds(table: &TupleTable, grid: &DataGrid) -> Vec<(Option<f64>, Option<f64>)> {
    grid.attributes()
        .iter()
        .map(|attribute| {
            let Some(index) = table.attribute_index(&attribute.name) else {
                return (None, None);
            };
            match &table.stats()[index] {
                DescriptiveStats::Numeric { min, max, .. } => (*min, *max),
                DescriptiveStats::Categorical { .. } => (None, None),
            }
        })
        .collect()
}

fn decorate(report: &mut HierarchicalDataGrid, spec: &CoclusteringSpec, params: &EngineParams) {
    report.short_description = params.short_description.clone();
    report.frequency_attribute_name = params.frequency_attribute_name.clone();
    if let CoclusteringSpec::InstancesVariables { identifier, .. } = spec {
        report.identifier_attribute_name = Some(identifier.clone());
    }
}

/// Adapts the optimizer's raw-grid callback into annotated reports.
struct AnnotatingHandler<'a, C: DataGridCosts> {
    hierarchy_builder: &'a HierarchyBuilder<'a, C>,
    bounds: &'a [(Option<f64>, Option<f64>)],
    namer: &'a ValueNamer<'a>,
    spec: &'a CoclusteringSpec,
    params: &'a EngineParams,
    inner: &'a mut dyn CoclusteringHandler,
}

impl<'a, C: DataGridCosts> AnytimeHandler for AnnotatingHandler<'a, C> {
    fn handle_improvement(
        &mut self,
        optimized: &DataGrid,
        granularized_initial: &DataGrid,
        _cost: f64,
        is_last: bool,
    ) {
        // Uninformative snapshots carry nothing worth reporting.
        if !optimized.is_informative() {
            return;
        }
        match self
            .hierarchy_builder
            .build(optimized, granularized_initial, self.bounds, self.namer)
        {
            Ok(mut report) => {
                decorate(&mut report, self.spec, self.params);
                self.inner.handle_improvement(&report, is_last);
            }
            Err(error) => {
                // Annotation of a snapshot must never kill the search.
                tracing::warn!(%error, "anytime snapshot annotation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grain_core::{AttributeType, TupleAttribute, TupleTableBuilder, Value};

    fn spec(names: &[&str]) -> CoclusteringSpec {
        CoclusteringSpec::Variables {
            attributes: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn dependent_table() -> grain_core::TupleTable {
        let mut builder = TupleTableBuilder::new(vec![
            TupleAttribute {
                name: "X".into(),
                attribute_type: AttributeType::Categorical,
            },
            TupleAttribute {
                name: "Y".into(),
                attribute_type: AttributeType::Categorical,
            },
        ]);
        let xs: Vec<_> = (0..10)
            .map(|i| builder.symbols_mut().intern(&format!("x{}", i)))
            .collect();
        let ys: Vec<_> = (0..2)
            .map(|i| builder.symbols_mut().intern(&format!("y{}", i)))
            .collect();
        for (i, x) in xs.iter().enumerate() {
            builder.push(vec![Value::Symbol(*x), Value::Symbol(ys[i % 2])], 40);
        }
        builder.freeze()
    }

    #[test]
    fn unknown_variable_is_a_spec_error() {
        let table = dependent_table();
        let mut builder =
            CoclusteringBuilder::new(EngineParams::default(), CancellationToken::new());
        let error = builder
            .compute(&table, &spec(&["X", "Wage"]), &mut SilentHandler)
            .unwrap_err();
        assert!(matches!(error, GrainError::Spec(_)));
    }

    #[test]
    fn fewer_than_two_variables_is_a_spec_error() {
        let table = dependent_table();
        let mut builder =
            CoclusteringBuilder::new(EngineParams::default(), CancellationToken::new());
        let error = builder
            .compute(&table, &spec(&["X"]), &mut SilentHandler)
            .unwrap_err();
        assert!(matches!(error, GrainError::Spec(_)));
    }

    #[test]
    fn duplicate_inner_variable_is_a_spec_error() {
        let table = dependent_table();
        let mut builder =
            CoclusteringBuilder::new(EngineParams::default(), CancellationToken::new());
        let error = builder
            .compute(
                &table,
                &CoclusteringSpec::InstancesVariables {
                    identifier: "X".into(),
                    inner: vec!["Y".into(), "Y".into()],
                },
                &mut SilentHandler,
            )
            .unwrap_err();
        assert!(matches!(error, GrainError::Spec(_)));
    }

    #[test]
    fn empty_table_is_not_informative() {
        let builder_table = TupleTableBuilder::new(vec![
            TupleAttribute {
                name: "X".into(),
                attribute_type: AttributeType::Categorical,
            },
            TupleAttribute {
                name: "Y".into(),
                attribute_type: AttributeType::Categorical,
            },
        ]);
        let table = builder_table.freeze();
        let mut builder =
            CoclusteringBuilder::new(EngineParams::default(), CancellationToken::new());
        let outcome = builder
            .compute(&table, &spec(&["X", "Y"]), &mut SilentHandler)
            .unwrap();
        assert!(matches!(outcome, CoclusteringOutcome::NotInformative));
    }

    #[test]
    fn tiny_memory_budget_is_refused() {
        let table = dependent_table();
        let params = EngineParams {
            memory: MemoryBudget { cap_bytes: 64 },
            ..Default::default()
        };
        let mut builder = CoclusteringBuilder::new(params, CancellationToken::new());
        let error = builder
            .compute(&table, &spec(&["X", "Y"]), &mut SilentHandler)
            .unwrap_err();
        assert!(matches!(error, GrainError::Resource(_)));
    }

    #[test]
    fn dependent_table_produces_a_report() {
        let table = dependent_table();
        struct Collect {
            reports: usize,
            saw_last: bool,
        }
        impl CoclusteringHandler for Collect {
            fn handle_improvement(&mut self, report: &HierarchicalDataGrid, is_last: bool) {
                report.check_hierarchy().unwrap();
                self.reports += 1;
                self.saw_last = self.saw_last || is_last;
            }
        }
        let mut collect = Collect {
            reports: 0,
            saw_last: false,
        };
        let mut builder =
            CoclusteringBuilder::new(EngineParams::default(), CancellationToken::new());
        let outcome = builder
            .compute(&table, &spec(&["X", "Y"]), &mut collect)
            .unwrap();
        let CoclusteringOutcome::Informative(report) = outcome else {
            panic!("expected an informative result");
        };
        assert!(collect.reports >= 1);
        assert!(collect.saw_last);
        assert!(report.level() > 0.0);
        assert_eq!(report.attribute_by_name("Y").unwrap().leaf_count(), 2);
    }

    #[test]
    fn instances_variables_mode_runs_end_to_end() {
        let mut tb = TupleTableBuilder::new(vec![
            TupleAttribute {
                name: "Id".into(),
                attribute_type: AttributeType::Categorical,
            },
            TupleAttribute {
                name: "M1".into(),
                attribute_type: AttributeType::Categorical,
            },
            TupleAttribute {
                name: "M2".into(),
                attribute_type: AttributeType::Categorical,
            },
        ]);
        let ids: Vec<_> = (0..8)
            .map(|i| tb.symbols_mut().intern(&format!("row{}", i)))
            .collect();
        let a = tb.symbols_mut().intern("a");
        let b = tb.symbols_mut().intern("b");
        for (i, id) in ids.iter().enumerate() {
            let (m1, m2) = if i % 2 == 0 { (a, a) } else { (b, b) };
            tb.push(
                vec![Value::Symbol(*id), Value::Symbol(m1), Value::Symbol(m2)],
                30,
            );
        }
        let table = tb.freeze();
        let mut builder =
            CoclusteringBuilder::new(EngineParams::default(), CancellationToken::new());
        let outcome = builder
            .compute(
                &table,
                &CoclusteringSpec::InstancesVariables {
                    identifier: "Id".into(),
                    inner: vec!["M1".into(), "M2".into()],
                },
                &mut SilentHandler,
            )
            .unwrap();
        match outcome {
            CoclusteringOutcome::Informative(report) => {
                report.check_hierarchy().unwrap();
                assert_eq!(report.identifier_attribute_name.as_deref(), Some("Id"));
                assert!(report.attribute_by_name("VariableParts").is_some());
            }
            CoclusteringOutcome::NotInformative => {
                panic!("perfectly structured rows should be informative")
            }
        }
    }
}
