//! # grain-core: Coclustering Data Model Core
//!
//! Provides the fundamental data structures for MDL coclustering: the
//! deduplicated tuple sample, the data grid (attributes, parts, cells) and
//! the annotated hierarchical result.
//!
//! ## Design Philosophy
//!
//! The grid is an index-addressed structure:
//! - **Parts**: per-attribute slabs addressed by [`PartId`]
//! - **Cells**: a grid-level slab addressed by [`CellId`], hash-indexed by
//!   part-id tuple, and linked from every participating part
//! - **Dendrograms**: flat per-attribute arenas addressed by [`HdgNodeId`]
//!
//! This index-based approach enables:
//! - Deep-copy snapshots for the anytime callback (`Clone` everywhere)
//! - Type-safe cross-references without reference counting or weak pointers
//! - Deterministic iteration orders, so identical inputs give identical runs
//!
//! ## Quick Start
//!
//! ```rust
//! use grain_core::*;
//!
//! // Build a tiny two-attribute grid by hand.
//! let mut grid = DataGrid::new(vec![
//!     ("Size".to_string(), AttributeType::Numeric),
//!     ("Color".to_string(), AttributeType::Categorical),
//! ]);
//!
//! let small = grid.add_part(0, PartContent::Interval {
//!     lower: f64::NEG_INFINITY,
//!     upper: 2.0,
//! });
//! let red = grid.add_part(1, PartContent::ValueSet {
//!     values: vec![ValueEntry { symbol: SymbolId::new(0), frequency: 5 }],
//!     has_catchall: false,
//! });
//!
//! grid.add_cell_frequency(vec![small, red], 5);
//! assert_eq!(grid.total_frequency(), 5);
//! grid.check().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`tuples`] - Deduplicated frequency-weighted input sample
//! - [`grid`] - Partition state: attributes, parts, cells
//! - [`hierarchy`] - Annotated result with per-attribute dendrograms
//! - [`diagnostics`] - Warning/error collection with flow control
//! - [`resources`] - Memory budget model and cancellation token
//!
//! ## Integration with grain-io
//!
//! The grain-io crate reads dictionaries and tabular data files into
//! [`TupleTable`]s and writes [`HierarchicalDataGrid`]s out as reports.

pub mod diagnostics;
pub mod error;
pub mod grid;
pub mod hierarchy;
pub mod resources;
pub mod tuples;
pub mod value;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{GrainError, GrainResult};
pub use grid::{
    Attribute, Cell, CellId, DataGrid, InnerAttribute, Part, PartContent, PartId, ValueEntry,
    VarPartAtom, VarPartSpec,
};
pub use hierarchy::{
    HdgAttribute, HdgNode, HdgNodeId, HierarchicalDataGrid, NamedValue, NodeContent,
    ReportCell, ValueTypicality,
};
pub use resources::{CancellationToken, MemoryBudget, DEFAULT_MEMORY_CAP_BYTES};
pub use tuples::{
    DescriptiveStats, TupleAttribute, TupleTable, TupleTableBuilder, LOADER_POLL_INTERVAL,
    MAX_TOTAL_FREQUENCY,
};
pub use value::{AttributeType, Continuous, SymbolId, SymbolTable, Value};
