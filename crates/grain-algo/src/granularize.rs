//! Initial grid construction and the granularity schedule's coarsenings.
//!
//! The finest grid has one part per distinct observed value. At granularity
//! level `g` each attribute is capped at `2^g` parts: numeric attributes
//! are cut at equal-frequency quantiles, categorical attributes keep their
//! most frequent values as singleton parts and collect the tail modalities
//! into one catch-all part. Coarsening works from the finest grid alone by
//! folding its cells, so the tuple table can be released once the finest
//! grid exists.

use grain_core::{
    AttributeType, Continuous, DataGrid, PartContent, PartId, TupleTable, Value, ValueEntry,
};
use hashbrown::HashMap;

/// Upper bound of the dedicated missing-value interval. The missing
/// sentinel is `-inf`; every finite data value lies strictly above this
/// bound, so the atom `]-inf, -MAX]` holds exactly the missing value.
const MISSING_UPPER_BOUND: f64 = -f64::MAX;

/// Build the finest-grained grid over the selected attributes of the tuple
/// table: one part per distinct value, one cell per distinct tuple
/// projection.
pub fn build_initial_grid(table: &TupleTable, attributes: &[usize]) -> DataGrid {
    let mut grid = DataGrid::new(
        attributes
            .iter()
            .map(|&index| {
                let attribute = &table.attributes()[index];
                (attribute.name.clone(), attribute.attribute_type)
            })
            .collect(),
    );

    // Per-attribute value -> part lookup, built while creating the parts.
    let mut part_lookup: Vec<HashMap<Value, PartId>> = Vec::new();

    for (dimension, &index) in attributes.iter().enumerate() {
        let mut lookup: HashMap<Value, PartId> = HashMap::new();
        match table.attributes()[index].attribute_type {
            AttributeType::Numeric => {
                let distinct = table.distinct_values(index);
                let numbers: Vec<Continuous> = distinct
                    .iter()
                    .map(|v| v.as_number().expect("numeric attribute"))
                    .collect();
                let uppers = interval_uppers(&numbers);
                let mut lower = f64::NEG_INFINITY;
                for (value, upper) in numbers.iter().zip(&uppers) {
                    let part = grid.add_part(dimension, PartContent::Interval {
                        lower,
                        upper: *upper,
                    });
                    lookup.insert(Value::Number(*value), part);
                    lower = *upper;
                }
            }
            AttributeType::Categorical => {
                // Frequencies per value come from a pass over the tuples.
                let mut frequencies: HashMap<Value, u64> = HashMap::new();
                for (key, frequency) in table.tuples() {
                    *frequencies.entry(key[index]).or_insert(0) += frequency;
                }
                for value in table.distinct_values(index) {
                    let symbol = value.as_symbol().expect("categorical attribute");
                    let part = grid.add_part(dimension, PartContent::ValueSet {
                        values: vec![ValueEntry {
                            symbol,
                            frequency: frequencies[&value],
                        }],
                        has_catchall: false,
                    });
                    lookup.insert(value, part);
                }
            }
        }
        part_lookup.push(lookup);
    }

    for (key, frequency) in table.tuples() {
        let cell_key: Vec<PartId> = attributes
            .iter()
            .enumerate()
            .map(|(dimension, &index)| part_lookup[dimension][&key[index]])
            .collect();
        grid.add_cell_frequency(cell_key, *frequency);
    }

    for dimension in 0..grid.attribute_count() {
        let count = grid.attribute(dimension).part_count();
        grid.attribute_mut(dimension).initial_part_count = count;
    }
    grid
}

/// Interval upper bounds for a sorted list of distinct values: midpoints
/// between neighbours, `+inf` for the last interval, and a dedicated bound
/// for the missing-value atom.
pub(crate) fn interval_uppers(values: &[Continuous]) -> Vec<f64> {
    let mut uppers = Vec::with_capacity(values.len());
    for pair in values.windows(2) {
        if pair[0].is_missing() {
            uppers.push(MISSING_UPPER_BOUND);
        } else {
            uppers.push((pair[0].value() + pair[1].value()) / 2.0);
        }
    }
    uppers.push(f64::INFINITY);
    uppers
}

/// Coarsen the finest grid so every attribute has at most `2^level` parts.
pub fn granularize(finest: &DataGrid, level: u32) -> DataGrid {
    let cap = 2usize.saturating_pow(level).max(1);
    let mut mappings: Vec<HashMap<PartId, PartId>> = Vec::new();
    let mut grid = DataGrid::new(
        finest
            .attributes()
            .iter()
            .map(|a| (a.name.clone(), a.attribute_type))
            .collect(),
    );
    grid.varpart = finest.varpart.clone();

    for dimension in 0..finest.attribute_count() {
        let slab = finest.attribute(dimension);
        let ordered = slab.ordered_part_ids();
        let mut mapping: HashMap<PartId, PartId> = HashMap::new();

        match slab.attribute_type {
            AttributeType::Numeric => {
                // Equal-frequency quantile groups over the ordered atoms.
                let groups = quantile_groups(
                    &ordered
                        .iter()
                        .map(|id| slab.part(*id).frequency)
                        .collect::<Vec<_>>(),
                    cap,
                );
                for group in groups {
                    let first = &ordered[group.clone()][0];
                    let last = ordered[group.clone()].last().expect("non-empty group");
                    let (lower, _) = interval_bounds(slab.part(*first));
                    let (_, upper) = interval_bounds(slab.part(*last));
                    let coarse = grid.add_part(dimension, PartContent::Interval { lower, upper });
                    for id in &ordered[group.clone()] {
                        mapping.insert(*id, coarse);
                    }
                }
            }
            AttributeType::Categorical => {
                // Most frequent atoms stay singletons; the tail collapses
                // into a catch-all part. Order is (frequency desc, id) so
                // the grouping is deterministic.
                let mut by_frequency: Vec<PartId> = ordered.clone();
                by_frequency.sort_by(|a, b| {
                    slab.part(*b)
                        .frequency
                        .cmp(&slab.part(*a).frequency)
                        .then(a.cmp(b))
                });
                let singleton_count = if by_frequency.len() <= cap {
                    by_frequency.len()
                } else {
                    cap - 1
                };
                for id in &by_frequency[..singleton_count] {
                    let coarse =
                        grid.add_part(dimension, slab.part(*id).content.clone());
                    mapping.insert(*id, coarse);
                }
                if by_frequency.len() > singleton_count {
                    let mut tail_values: Vec<ValueEntry> = Vec::new();
                    for id in &by_frequency[singleton_count..] {
                        if let PartContent::ValueSet { values, .. } = &slab.part(*id).content {
                            tail_values.extend(values.iter().copied());
                        }
                    }
                    tail_values.sort_by(|a, b| {
                        b.frequency.cmp(&a.frequency).then(a.symbol.cmp(&b.symbol))
                    });
                    let catchall = grid.add_part(dimension, PartContent::ValueSet {
                        values: tail_values,
                        has_catchall: true,
                    });
                    for id in &by_frequency[singleton_count..] {
                        mapping.insert(*id, catchall);
                    }
                }
            }
        }
        let part_count = grid.attribute(dimension).part_count();
        grid.attribute_mut(dimension).initial_part_count = part_count;
        mappings.push(mapping);
    }

    // Fold the finest cells through the mappings.
    for cell_id in finest.cell_ids() {
        let cell = finest.cell(cell_id);
        let key: Vec<PartId> = cell
            .parts
            .iter()
            .enumerate()
            .map(|(dimension, part)| mappings[dimension][part])
            .collect();
        grid.add_cell_frequency(key, cell.frequency);
    }
    grid
}

fn interval_bounds(part: &grain_core::Part) -> (f64, f64) {
    match &part.content {
        PartContent::Interval { lower, upper } => (*lower, *upper),
        PartContent::ValueSet { .. } => unreachable!("numeric part expected"),
    }
}

/// Split `frequencies` (ordered atoms) into at most `cap` contiguous
/// groups of near-equal cumulated frequency. Every atom keeps its own
/// group when the cap allows it.
fn quantile_groups(frequencies: &[u64], cap: usize) -> Vec<std::ops::Range<usize>> {
    let atom_count = frequencies.len();
    if atom_count <= cap {
        return (0..atom_count).map(|i| i..i + 1).collect();
    }
    let total: u64 = frequencies.iter().sum();
    let mut groups = Vec::with_capacity(cap);
    let mut start = 0usize;
    let mut consumed = 0u64;
    for group in 0..cap {
        if start >= atom_count {
            break;
        }
        // Target cumulated frequency at the end of this group.
        let target = total * (group as u64 + 1) / cap as u64;
        let mut end = start;
        let mut cumulated = consumed;
        while end < atom_count {
            cumulated += frequencies[end];
            end += 1;
            if cumulated >= target {
                break;
            }
        }
        // Leave enough atoms for the remaining groups.
        let remaining_groups = cap - group - 1;
        let max_end = atom_count - remaining_groups;
        let end = end.min(max_end).max(start + 1);
        let cumulated = consumed + frequencies[start..end].iter().sum::<u64>();
        groups.push(start..end);
        start = end;
        consumed = cumulated;
    }
    if start < atom_count {
        let last = groups.pop().expect("at least one group");
        groups.push(last.start..atom_count);
    }
    groups
}
