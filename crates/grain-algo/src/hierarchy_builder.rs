//! Post-processing of the optimized grid into an annotated hierarchy.
//!
//! An auxiliary merger is initialized with the optimized grid's parts and
//! popped until one part remains per attribute; every pop creates an
//! internal dendrogram node whose hierarchical level records the
//! normalized MDL gain of the merge. Part interests come from the pairwise
//! merge deltas, value typicalities from the univariate move deltas
//! against the granularized initial grid.

use crate::costs::DataGridCosts;
use crate::merger::GridMerger;
use crate::post::AttributePass;
use grain_core::{
    AttributeType, DataGrid, GrainResult, HdgAttribute, HdgNode, HdgNodeId,
    HierarchicalDataGrid, NamedValue, NodeContent, PartContent, PartId, ReportCell, SymbolId,
    ValueTypicality,
};
use hashbrown::HashMap;

/// Hierarchical levels within epsilon of zero snap to zero; levels within
/// epsilon of one clip to one.
const LEVEL_EPSILON: f64 = 1e-10;

/// Renders symbols to their report names, per grid attribute (the
/// variable-part dimension resolves pseudo-symbols to atom labels).
pub type ValueNamer<'a> = dyn Fn(usize, SymbolId) -> String + 'a;

/// Builds the dendrograms and annotations of a coclustering result.
pub struct HierarchyBuilder<'c, C: DataGridCosts> {
    costs: &'c C,
}

impl<'c, C: DataGridCosts> HierarchyBuilder<'c, C> {
    pub fn new(costs: &'c C) -> Self {
        Self { costs }
    }

    /// Annotate `optimized` into a full hierarchical grid.
    /// `granularized_initial` is the coarsened input grid the solution was
    /// found from; `bounds` carries per-attribute numeric min/max from the
    /// descriptive stats.
    pub fn build(
        &self,
        optimized: &DataGrid,
        granularized_initial: &DataGrid,
        bounds: &[(Option<f64>, Option<f64>)],
        namer: &ValueNamer<'_>,
    ) -> GrainResult<HierarchicalDataGrid> {
        let null_cost = self.costs.default_cost();
        let best_cost = self.costs.total_cost(optimized);
        // Normalizer of levels and interests; degenerate when the best
        // model is the null model.
        let gain = (null_cost - best_cost).max(f64::MIN_POSITIVE);

        let mut attributes: Vec<HdgAttribute> = optimized
            .attributes()
            .iter()
            .enumerate()
            .map(|(index, attribute)| HdgAttribute {
                name: attribute.name.clone(),
                attribute_type: attribute.attribute_type,
                min: bounds.get(index).and_then(|(min, _)| *min),
                max: bounds.get(index).and_then(|(_, max)| *max),
                initial_part_count: attribute.part_count(),
                interest: 1.0,
                nodes: Vec::new(),
                root: None,
                value_typicalities: Vec::new(),
            })
            .collect();

        // Leaves, one per optimized part, keyed for the merge loop.
        let mut node_of: HashMap<(usize, PartId), HdgNodeId> = HashMap::new();
        let total_parts = optimized.total_part_count();
        for (index, slab) in optimized.attributes().iter().enumerate() {
            for part_id in slab.ordered_part_ids() {
                let part = slab.part(part_id);
                let node_id = HdgNodeId::new(attributes[index].nodes.len() as u32);
                attributes[index].nodes.push(HdgNode {
                    part_name: leaf_name(&part.content, namer, index),
                    frequency: part.frequency,
                    interest: 1.0,
                    hierarchical_level: 1.0,
                    rank: 0,
                    hierarchical_rank: total_parts,
                    parent: None,
                    children: None,
                    content: Some(node_content(&part.content, namer, index)),
                });
                node_of.insert((index, part_id), node_id);
            }
        }

        // The merge loop reuses surviving part ids for internal nodes;
        // cells must keep resolving to leaves.
        let leaf_node_of = node_of.clone();

        let mut merger = GridMerger::new(optimized.clone(), self.costs);
        debug_assert!(merger.check_all_part_merges().is_ok());

        self.compute_part_interests(&mut attributes, &merger, &node_of, gain);
        self.compute_part_hierarchies(
            &mut attributes,
            &mut merger,
            &mut node_of,
            null_cost,
            best_cost,
            gain,
        );
        compute_part_ranks(&mut attributes);
        self.compute_value_typicalities(&mut attributes, optimized, granularized_initial, namer);
        sort_leaf_values(&mut attributes);

        // Attribute interest: frequency-weighted mean of its leaves'.
        for attribute in &mut attributes {
            let mut weighted = 0.0;
            let mut total = 0u64;
            for id in attribute.leaf_ids().collect::<Vec<_>>() {
                let node = attribute.node(id);
                weighted += node.frequency as f64 * node.interest;
                total += node.frequency;
            }
            attribute.interest = if total > 0 {
                weighted / total as f64
            } else {
                1.0
            };
        }

        // Report cells, by decreasing frequency then key.
        let mut cells: Vec<ReportCell> = optimized
            .cell_ids()
            .map(|cell_id| {
                let cell = optimized.cell(cell_id);
                ReportCell {
                    part_names: cell
                        .parts
                        .iter()
                        .enumerate()
                        .map(|(attribute, part)| {
                            attributes[attribute]
                                .node(leaf_node_of[&(attribute, *part)])
                                .part_name
                                .clone()
                        })
                        .collect(),
                    frequency: cell.frequency,
                }
            })
            .collect();
        cells.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.part_names.cmp(&b.part_names)));

        let result = HierarchicalDataGrid {
            short_description: String::new(),
            null_cost,
            cost: best_cost,
            initial_attribute_number: optimized.attribute_count(),
            frequency_attribute_name: None,
            identifier_attribute_name: None,
            attributes,
            cells,
            total_frequency: optimized.total_frequency(),
        };
        result.check_hierarchy()?;
        Ok(result)
    }

    /// Leaf interests: for each part, the mean normalized merge delta
    /// against every other part of its attribute, max-normalized per
    /// attribute. Numeric parts without a candidate pair contribute zero.
    fn compute_part_interests(
        &self,
        attributes: &mut [HdgAttribute],
        merger: &GridMerger<'c, C>,
        node_of: &HashMap<(usize, PartId), HdgNodeId>,
        gain: f64,
    ) {
        let grid = merger.grid();
        for (index, attribute) in attributes.iter_mut().enumerate() {
            let slab = grid.attribute(index);
            let ordered = slab.ordered_part_ids();
            let mut interests: Vec<(PartId, f64)> = Vec::with_capacity(ordered.len());
            let mut max_interest = 0.0f64;
            for a in &ordered {
                let mut total = 0.0;
                for b in &ordered {
                    if a == b {
                        continue;
                    }
                    let delta = merger.lookup_delta(index, *a, *b).unwrap_or(0.0);
                    total += delta / gain;
                }
                let interest = if ordered.len() > 1 {
                    (total / (ordered.len() - 1) as f64).max(0.0)
                } else {
                    1.0
                };
                max_interest = max_interest.max(interest);
                interests.push((*a, interest));
            }
            for (part, interest) in interests {
                let node = attribute.node_mut(node_of[&(index, part)]);
                node.interest = if max_interest > 0.0 {
                    interest / max_interest
                } else {
                    1.0
                };
            }
        }
    }

    /// Pop the cheapest merge until every attribute is down to one part,
    /// creating one internal node per merge.
    fn compute_part_hierarchies(
        &self,
        attributes: &mut [HdgAttribute],
        merger: &mut GridMerger<'c, C>,
        node_of: &mut HashMap<(usize, PartId), HdgNodeId>,
        null_cost: f64,
        best_cost: f64,
        gain: f64,
    ) {
        let mut cost = best_cost;
        let attribute_count = merger.grid().attribute_count();
        while let Some((key, delta)) = merger.search_best_merge() {
            // Normalized gain of stopping after this merge: near 0 means
            // the merge nearly erases the model, near 1 means it is almost
            // free to perform last.
            let mut level = (null_cost - (cost + delta)) / gain;
            if level > 1.0 - LEVEL_EPSILON {
                level = 1.0;
            }
            if level.abs() < LEVEL_EPSILON {
                level = 0.0;
            }

            let attribute = key.attribute;
            let left = node_of[&(attribute, key.first)];
            let right = node_of[&(attribute, key.second)];

            let total_parts = merger.grid().total_part_count();
            // Name internal nodes by their distance to the root.
            let name = hierarchy_part_name(attribute, total_parts - attribute_count);

            let (kept, applied) = merger.perform_merge(key);
            debug_assert_eq!(delta.to_bits(), applied.to_bits());
            cost += delta;

            let slab = attributes.get_mut(attribute).expect("attribute in range");
            let frequency = slab.node(left).frequency + slab.node(right).frequency;
            let weighted_interest = (slab.node(left).frequency as f64
                * slab.node(left).interest
                + slab.node(right).frequency as f64 * slab.node(right).interest)
                / (frequency.max(1) as f64);
            let node_id = HdgNodeId::new(slab.nodes.len() as u32);
            // Numeric internal nodes take the fused interval's label.
            let part_name = merger
                .grid()
                .attribute(attribute)
                .part(kept)
                .content
                .interval_label()
                .unwrap_or(name);
            slab.nodes.push(HdgNode {
                part_name,
                frequency,
                interest: weighted_interest,
                hierarchical_level: level,
                rank: 0,
                hierarchical_rank: total_parts - 1,
                parent: None,
                children: Some((left, right)),
                content: None,
            });
            slab.node_mut(left).parent = Some(node_id);
            slab.node_mut(right).parent = Some(node_id);
            node_of.insert((attribute, kept), node_id);

            if merger.grid().attribute(attribute).part_count() == 1 {
                slab.root = Some(node_id);
            }
        }
        // Single-part attributes never merged: their lone leaf is the root.
        for attribute in attributes.iter_mut() {
            if attribute.root.is_none() && attribute.nodes.len() == 1 {
                attribute.root = Some(HdgNodeId::new(0));
            }
        }
    }

    /// Categorical value typicalities: mean move delta of each atom toward
    /// every other group, max-normalized per group, spread onto the atom's
    /// values.
    fn compute_value_typicalities(
        &self,
        attributes: &mut [HdgAttribute],
        optimized: &DataGrid,
        granularized_initial: &DataGrid,
        namer: &ValueNamer<'_>,
    ) {
        for index in 0..attributes.len() {
            if attributes[index].attribute_type != AttributeType::Categorical {
                continue;
            }
            let parts = optimized.attribute(index).ordered_part_ids();
            if parts.len() < 2 {
                // A single group: every value is maximally typical.
                let mut typicalities = Vec::new();
                if let Some(part) = parts.first() {
                    if let PartContent::ValueSet { values, .. } =
                        &optimized.attribute(index).part(*part).content
                    {
                        let leaf = leaf_node_for(&attributes[index], *part, optimized, index);
                        for value in values {
                            typicalities.push(ValueTypicality {
                                value: namer(index, value.symbol),
                                group: leaf,
                                typicality: 1.0,
                            });
                        }
                    }
                }
                attributes[index].value_typicalities = typicalities;
                continue;
            }

            let mut scratch = optimized.clone();
            let Some(pass) = AttributePass::new(granularized_initial, &mut scratch, index)
            else {
                continue;
            };

            // Mean move delta per atom.
            let mut atom_typicality: Vec<f64> = Vec::with_capacity(pass.atoms.len());
            for atom in 0..pass.atoms.len() {
                let source = pass.assignment[atom];
                let alone = pass.atoms_of(source).len() < 2;
                let mut total = 0.0;
                for target in &parts {
                    if *target == source {
                        continue;
                    }
                    let delta = if alone {
                        // Moving the last atom of a group is that group's
                        // merge into the target.
                        self.costs.merge_delta(optimized, index, source, *target)
                    } else {
                        pass.move_delta(self.costs, atom, *target)
                    };
                    total += delta;
                }
                atom_typicality.push((total / (parts.len() - 1) as f64).max(0.0));
            }

            // Per-group max normalization.
            let mut group_max: HashMap<PartId, f64> = HashMap::new();
            for (atom, typicality) in atom_typicality.iter().enumerate() {
                let group = pass.assignment[atom];
                let entry = group_max.entry(group).or_insert(0.0);
                *entry = entry.max(*typicality);
            }

            let mut typicalities = Vec::new();
            for (atom, typicality) in atom_typicality.iter().enumerate() {
                let group = pass.assignment[atom];
                let max = group_max[&group];
                let normalized = if max > 0.0 { typicality / max } else { 1.0 };
                let leaf = leaf_node_for(&attributes[index], group, optimized, index);
                for value in pass.atoms[atom].values() {
                    typicalities.push(ValueTypicality {
                        value: namer(index, value.symbol),
                        group: leaf,
                        typicality: normalized,
                    });
                }
            }
            attributes[index].value_typicalities = typicalities;
        }
    }
}

/// Leaf node holding an optimized part: leaves were created in
/// `ordered_part_ids` order, so the position of the part is the node index.
fn leaf_node_for(
    attribute: &HdgAttribute,
    part: PartId,
    optimized: &DataGrid,
    index: usize,
) -> HdgNodeId {
    let position = optimized
        .attribute(index)
        .ordered_part_ids()
        .iter()
        .position(|id| *id == part)
        .expect("part of the optimized grid");
    debug_assert!(attribute.nodes[position].is_leaf());
    HdgNodeId::new(position as u32)
}

/// `A12`-style internal node name: one letter per attribute, then the
/// node's distance to the root.
fn hierarchy_part_name(attribute: usize, hierarchical_index: usize) -> String {
    let letter = (b'A' + (attribute % 26) as u8) as char;
    format!("{}{}", letter, hierarchical_index)
}

fn leaf_name(content: &PartContent, namer: &ValueNamer<'_>, attribute: usize) -> String {
    match content {
        PartContent::Interval { .. } => content
            .interval_label()
            .expect("interval content has a label"),
        PartContent::ValueSet { values, .. } => {
            let mut label = String::from("{");
            for (position, value) in values.iter().take(3).enumerate() {
                if position > 0 {
                    label.push_str(", ");
                }
                label.push_str(&namer(attribute, value.symbol));
            }
            if values.len() > 3 {
                label.push_str(", ...");
            }
            label.push('}');
            label
        }
    }
}

/// Reorder categorical children (larger interest first, ties on frequency
/// then name) and number every node by an iterative infix walk.
fn compute_part_ranks(attributes: &mut [HdgAttribute]) {
    for attribute in attributes.iter_mut() {
        if attribute.attribute_type == AttributeType::Categorical {
            for index in 0..attribute.nodes.len() {
                let Some((left, right)) = attribute.nodes[index].children else {
                    continue;
                };
                let left_node = attribute.node(left);
                let right_node = attribute.node(right);
                let swap = match left_node
                    .interest
                    .partial_cmp(&right_node.interest)
                    .expect("interests are finite")
                {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => {
                        match left_node.frequency.cmp(&right_node.frequency) {
                            std::cmp::Ordering::Less => true,
                            std::cmp::Ordering::Greater => false,
                            std::cmp::Ordering::Equal => {
                                left_node.part_name > right_node.part_name
                            }
                        }
                    }
                };
                if swap {
                    attribute.nodes[index].children = Some((right, left));
                }
            }
        }

        // Iterative infix walk: left subtree, self, right subtree.
        let Some(root) = attribute.root else {
            continue;
        };
        let mut rank = 1usize;
        let mut stack: Vec<(HdgNodeId, bool)> = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            match (expanded, attribute.node(id).children) {
                (false, Some((left, right))) => {
                    stack.push((right, false));
                    stack.push((id, true));
                    stack.push((left, false));
                }
                _ => {
                    attribute.node_mut(id).rank = rank;
                    rank += 1;
                }
            }
        }
    }
}

/// Sort every leaf's values by decreasing typicality (ties on name), and
/// the typicality list to match.
fn sort_leaf_values(attributes: &mut [HdgAttribute]) {
    for attribute in attributes.iter_mut() {
        if attribute.attribute_type != AttributeType::Categorical {
            continue;
        }
        let typicality_of: HashMap<String, f64> = attribute
            .value_typicalities
            .iter()
            .map(|v| (v.value.clone(), v.typicality))
            .collect();
        for node in &mut attribute.nodes {
            if let Some(NodeContent::ValueSet { values, .. }) = &mut node.content {
                values.sort_by(|a, b| {
                    let ta = typicality_of.get(&a.name).copied().unwrap_or(0.0);
                    let tb = typicality_of.get(&b.name).copied().unwrap_or(0.0);
                    tb.partial_cmp(&ta)
                        .expect("typicalities are finite")
                        .then_with(|| a.name.cmp(&b.name))
                });
            }
        }
        attribute.value_typicalities.sort_by(|a, b| {
            a.group
                .cmp(&b.group)
                .then_with(|| b.typicality.partial_cmp(&a.typicality).expect("finite"))
                .then_with(|| a.value.cmp(&b.value))
        });
    }
}

/// Render a grid part's content into the report representation.
fn node_content(content: &PartContent, namer: &ValueNamer<'_>, attribute: usize) -> NodeContent {
    match content {
        PartContent::Interval { lower, upper } => NodeContent::Interval {
            lower: *lower,
            upper: *upper,
        },
        PartContent::ValueSet {
            values,
            has_catchall,
        } => NodeContent::ValueSet {
            values: values
                .iter()
                .map(|value| NamedValue {
                    name: namer(attribute, value.symbol),
                    frequency: value.frequency,
                })
                .collect(),
            has_catchall: *has_catchall,
        },
    }
}
