//! # grain-algo: MDL Coclustering Algorithms
//!
//! The engine half of GRAIN: the cost model, the merge machinery, the
//! granularity-scheduled optimizer and the hierarchy post-processing.
//!
//! ## Pipeline
//!
//! ```text
//! TupleTable -> finest DataGrid -> granularized levels -> greedy merges
//!            -> post-optimization (slides, moves, splits) -> best grid
//!            -> dendrograms, interests, typicalities -> HierarchicalDataGrid
//! ```
//!
//! [`builder::CoclusteringBuilder`] drives the whole pipeline and is the
//! entry point for callers; the lower modules are exposed for tests and
//! tooling.
//!
//! ## Modules
//!
//! - [`costs`] - MDL criterion, with deltas for merges, moves and splits
//! - [`merger`] - priced part-merge queue over a grid
//! - [`granularize`] - initial grid and granularity coarsenings
//! - [`optimizer`] - the anytime search loop
//! - [`post`] - univariate post-optimization passes
//! - [`hierarchy_builder`] - dendrograms and typicalities
//! - [`varpart`] - instances x variables grid construction
//! - [`builder`] - engine context and orchestration

pub mod builder;
pub mod combinatorics;
pub mod costs;
pub mod granularize;
pub mod hierarchy_builder;
pub mod merger;
pub mod optimizer;
pub mod post;
pub mod varpart;

pub use builder::{
    CoclusteringBuilder, CoclusteringHandler, CoclusteringOutcome, CoclusteringSpec,
    EngineParams, SilentHandler,
};
pub use costs::{CoclusteringCosts, DataGridCosts, VarPartCoclusteringCosts};
pub use granularize::{build_initial_grid, granularize};
pub use hierarchy_builder::HierarchyBuilder;
pub use merger::GridMerger;
pub use optimizer::{
    AnytimeHandler, DataGridOptimizer, NoopHandler, OptimizedGrid, OptimizerParams,
    SearchBudget,
};
pub use varpart::{build_varpart_grid, VarPartLayout};
