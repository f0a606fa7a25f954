//! The coclustering result: an annotated grid with per-attribute part
//! hierarchies.
//!
//! Dendrogram nodes reference their parent, children and host attribute, so
//! each attribute owns its nodes in a flat arena and all links are indices
//! ([`HdgNodeId`]). The root is stored by index on the attribute; leaves
//! carry the part payload of the optimized grid.

use crate::error::{GrainError, GrainResult};
use crate::value::AttributeType;
use serde::Serialize;

/// Arena index of a dendrogram node within its attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HdgNodeId(u32);

impl HdgNodeId {
    #[inline]
    pub fn new(value: u32) -> Self {
        HdgNodeId(value)
    }
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One categorical value of a leaf group, rendered to its report name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedValue {
    pub name: String,
    pub frequency: u64,
}

/// Report-facing content of a leaf: the optimized part's interval or value
/// set, with values rendered to names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeContent {
    Interval { lower: f64, upper: f64 },
    ValueSet {
        values: Vec<NamedValue>,
        has_catchall: bool,
    },
}

/// A dendrogram node: a leaf part of the optimized grid, or an internal
/// node with exactly two children.
#[derive(Debug, Clone, Serialize)]
pub struct HdgNode {
    pub part_name: String,
    /// Sum of the descendant leaves' frequencies.
    pub frequency: u64,
    /// Typicality in [0, 1]: resistance to being absorbed elsewhere.
    pub interest: f64,
    /// Normalized MDL gain of the merge that created this node, in
    /// (-inf, 1]. Leaves carry 1.
    pub hierarchical_level: f64,
    /// Position in the infix walk of the tree, 1-based.
    pub rank: usize,
    /// Remaining part count at the moment of the merge; leaves carry the
    /// total part count.
    pub hierarchical_rank: usize,
    pub parent: Option<HdgNodeId>,
    pub children: Option<(HdgNodeId, HdgNodeId)>,
    /// Leaf payload: the optimized part's content. Internal nodes have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<NodeContent>,
}

impl HdgNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Typicality of one categorical value inside its leaf group.
#[derive(Debug, Clone, Serialize)]
pub struct ValueTypicality {
    pub value: String,
    /// Leaf node holding the value.
    pub group: HdgNodeId,
    pub typicality: f64,
}

/// One attribute of the result, with its dendrogram.
#[derive(Debug, Clone, Serialize)]
pub struct HdgAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
    /// Bounds from the descriptive stats, numeric attributes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Part count before hierarchical reduction.
    pub initial_part_count: usize,
    /// Attribute-level typicality (mean of its leaves').
    pub interest: f64,
    pub nodes: Vec<HdgNode>,
    pub root: Option<HdgNodeId>,
    /// Per-value typicalities, categorical attributes only, sorted by
    /// decreasing typicality within each group.
    pub value_typicalities: Vec<ValueTypicality>,
}

impl HdgAttribute {
    pub fn node(&self, id: HdgNodeId) -> &HdgNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: HdgNodeId) -> &mut HdgNode {
        &mut self.nodes[id.index()]
    }

    pub fn leaf_ids(&self) -> impl Iterator<Item = HdgNodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| HdgNodeId(i as u32))
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// All node ids from the root downward (parents before children).
    pub fn hierarchy_ids(&self) -> Vec<HdgNodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some((left, right)) = self.node(id).children {
                stack.push(right);
                stack.push(left);
            }
        }
        out
    }

    /// Validate the tree structure and the rank/frequency invariants.
    pub fn check_hierarchy(&self) -> GrainResult<()> {
        let roots = self.nodes.iter().filter(|n| n.is_root()).count();
        if roots != 1 {
            return Err(GrainError::Internal(format!(
                "attribute {} has {} dendrogram roots",
                self.name, roots
            )));
        }
        let Some(root) = self.root else {
            return Err(GrainError::Internal(format!(
                "attribute {} has no recorded root",
                self.name
            )));
        };
        if !self.node(root).is_root() {
            return Err(GrainError::Internal(format!(
                "attribute {} root node has a parent",
                self.name
            )));
        }

        let reachable = self.hierarchy_ids();
        if reachable.len() != self.nodes.len() {
            return Err(GrainError::Internal(format!(
                "attribute {}: {} nodes reachable out of {}",
                self.name,
                reachable.len(),
                self.nodes.len()
            )));
        }

        let mut ranks: Vec<usize> = Vec::with_capacity(self.nodes.len());
        for id in reachable {
            let node = self.node(id);
            ranks.push(node.rank);
            if let Some((left, right)) = node.children {
                let left_node = self.node(left);
                let right_node = self.node(right);
                if left_node.frequency + right_node.frequency != node.frequency {
                    return Err(GrainError::Internal(format!(
                        "node {} frequency {} differs from its children's sum {}",
                        node.part_name,
                        node.frequency,
                        left_node.frequency + right_node.frequency
                    )));
                }
                if node.hierarchical_rank >= left_node.hierarchical_rank
                    || node.hierarchical_rank >= right_node.hierarchical_rank
                {
                    return Err(GrainError::Internal(format!(
                        "node {} hierarchical rank {} is not below its children's",
                        node.part_name, node.hierarchical_rank
                    )));
                }
                if left_node.parent != Some(id) || right_node.parent != Some(id) {
                    return Err(GrainError::Internal(format!(
                        "node {} children do not link back",
                        node.part_name
                    )));
                }
            }
        }
        // Ranks must be a permutation of 1..=2k-1 for k leaves.
        ranks.sort_unstable();
        for (expected, rank) in (1..=ranks.len()).zip(&ranks) {
            if expected != *rank {
                return Err(GrainError::Internal(format!(
                    "attribute {} ranks are not a permutation of 1..={}",
                    self.name,
                    ranks.len()
                )));
            }
        }
        Ok(())
    }
}

/// One cell of the final grid, reported through its leaf part names.
#[derive(Debug, Clone, Serialize)]
pub struct ReportCell {
    /// One leaf part name per attribute, in attribute order.
    pub part_names: Vec<String>,
    pub frequency: u64,
}

/// Final optimized grid with all dendrogram annotations.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchicalDataGrid {
    pub short_description: String,
    /// Cost of the single-cell grid (C0).
    pub null_cost: f64,
    /// Cost of the optimized grid.
    pub cost: f64,
    /// Attribute count before any were dropped as non-informative.
    pub initial_attribute_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_attribute_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier_attribute_name: Option<String>,
    pub attributes: Vec<HdgAttribute>,
    pub cells: Vec<ReportCell>,
    pub total_frequency: u64,
}

impl HierarchicalDataGrid {
    /// Headline figure of merit: `1 - cost / null_cost`.
    pub fn level(&self) -> f64 {
        if self.null_cost > 0.0 {
            1.0 - self.cost / self.null_cost
        } else {
            0.0
        }
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&HdgAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Validate every attribute hierarchy plus grid-level conservation.
    /// A dimension-less report (the not-informative placeholder) has
    /// nothing to validate.
    pub fn check_hierarchy(&self) -> GrainResult<()> {
        if self.attributes.is_empty() {
            return Ok(());
        }
        let cell_total: u64 = self.cells.iter().map(|c| c.frequency).sum();
        if cell_total != self.total_frequency {
            return Err(GrainError::Internal(format!(
                "report cells sum to {} but the grid frequency is {}",
                cell_total, self.total_frequency
            )));
        }
        for attribute in &self.attributes {
            attribute.check_hierarchy()?;
            let leaf_total: u64 = attribute
                .leaf_ids()
                .map(|id| attribute.node(id).frequency)
                .sum();
            if leaf_total != self.total_frequency {
                return Err(GrainError::Internal(format!(
                    "attribute {} leaves sum to {} but the grid frequency is {}",
                    attribute.name, leaf_total, self.total_frequency
                )));
            }
        }
        Ok(())
    }
}
