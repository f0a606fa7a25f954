//! Instances x variables grid construction.
//!
//! One dimension enumerates the rows through an identifier attribute; the
//! other groups *variable parts*: the parts of the inner variables'
//! frozen univariate partitions. Each inner part is interned as a
//! pseudo-symbol atom, so the variable-part dimension behaves like an
//! ordinary categorical attribute through the merger, the optimizer and
//! the hierarchy builder. A cell associates an identifier part with a
//! variable-part cluster and counts observations: one per non-missing
//! inner value of a row.

use crate::granularize::interval_uppers;
use grain_core::{
    AttributeType, Continuous, DataGrid, GrainError, GrainResult, InnerAttribute, PartContent,
    PartId, SymbolId, TupleTable, Value, ValueEntry, VarPartAtom, VarPartSpec,
};
use hashbrown::HashMap;

/// Selection of the identifier and inner variables inside a tuple table.
#[derive(Debug, Clone)]
pub struct VarPartLayout {
    /// Index of the identifier attribute in the tuple table.
    pub identifier: usize,
    /// Indices of the inner attributes in the tuple table.
    pub inner: Vec<usize>,
}

/// Name of the variable-part dimension in the built grid.
pub const VARPART_DIMENSION_NAME: &str = "VariableParts";

/// Build the finest instances x variables grid from a tuple table.
///
/// Inner partitions are built at value resolution and frozen; inner parts
/// left without any observation (all of their values missing) are cleaned
/// out before the atoms are interned. Fails when no observation at all
/// survives.
pub fn build_varpart_grid(table: &TupleTable, layout: &VarPartLayout) -> GrainResult<DataGrid> {
    if layout.inner.is_empty() {
        return Err(GrainError::Spec(
            "instances x variables coclustering needs at least one inner variable".into(),
        ));
    }

    // Frozen univariate partition of each inner attribute, missing values
    // excluded (a missing inner value is a missing observation).
    let mut inner_attributes: Vec<InnerAttribute> = Vec::with_capacity(layout.inner.len());
    let mut inner_part_of: Vec<HashMap<Value, usize>> = Vec::with_capacity(layout.inner.len());
    for &index in &layout.inner {
        let attribute = &table.attributes()[index];
        let mut parts: Vec<PartContent> = Vec::new();
        let mut lookup: HashMap<Value, usize> = HashMap::new();
        match attribute.attribute_type {
            AttributeType::Numeric => {
                let numbers: Vec<Continuous> = table
                    .distinct_values(index)
                    .into_iter()
                    .filter_map(|value| value.as_number())
                    .filter(|value| !value.is_missing())
                    .collect();
                let uppers = interval_uppers(&numbers);
                let mut lower = f64::NEG_INFINITY;
                for (value, upper) in numbers.iter().zip(&uppers) {
                    lookup.insert(Value::Number(*value), parts.len());
                    parts.push(PartContent::Interval {
                        lower,
                        upper: *upper,
                    });
                    lower = *upper;
                }
            }
            AttributeType::Categorical => {
                let mut frequencies: HashMap<Value, u64> = HashMap::new();
                for (key, frequency) in table.tuples() {
                    *frequencies.entry(key[index]).or_insert(0) += frequency;
                }
                for value in table.distinct_values(index) {
                    let symbol = value.as_symbol().expect("categorical attribute");
                    lookup.insert(value, parts.len());
                    parts.push(PartContent::ValueSet {
                        values: vec![ValueEntry {
                            symbol,
                            frequency: frequencies[&value],
                        }],
                        has_catchall: false,
                    });
                }
            }
        }
        inner_attributes.push(InnerAttribute {
            name: attribute.name.clone(),
            attribute_type: attribute.attribute_type,
            parts,
        });
        inner_part_of.push(lookup);
    }

    // Observation counts per (identifier value, inner attribute, inner
    // part), and per atom overall.
    let identifier_index = layout.identifier;
    let mut observations: HashMap<(Value, usize, usize), u64> = HashMap::new();
    let mut atom_frequency: HashMap<(usize, usize), u64> = HashMap::new();
    for (key, frequency) in table.tuples() {
        let identifier = key[identifier_index];
        if matches!(identifier, Value::Number(n) if n.is_missing()) {
            // Unusable row: the identifier is missing.
            continue;
        }
        for (position, &index) in layout.inner.iter().enumerate() {
            let value = key[index];
            if matches!(value, Value::Number(n) if n.is_missing()) {
                continue;
            }
            let Some(&part) = inner_part_of[position].get(&value) else {
                continue;
            };
            *observations
                .entry((identifier, position, part))
                .or_insert(0) += frequency;
            *atom_frequency.entry((position, part)).or_insert(0) += frequency;
        }
    }
    if observations.is_empty() {
        return Err(GrainError::Spec(
            "no usable observation for instances x variables coclustering".into(),
        ));
    }

    // Intern the surviving inner parts as atoms, in (attribute, part)
    // order so pseudo-symbol ids are deterministic.
    let mut atoms: Vec<VarPartAtom> = Vec::new();
    let mut atom_of: HashMap<(usize, usize), SymbolId> = HashMap::new();
    for (position, inner) in inner_attributes.iter().enumerate() {
        for (part_index, part) in inner.parts.iter().enumerate() {
            if atom_frequency.get(&(position, part_index)).copied().unwrap_or(0) == 0 {
                // Cleaned: an inner part whose every value was missing.
                continue;
            }
            let label = match part {
                PartContent::Interval { .. } => format!(
                    "{} {}",
                    inner.name,
                    part.interval_label().expect("interval label")
                ),
                PartContent::ValueSet { values, .. } => {
                    let names: Vec<String> = values
                        .iter()
                        .map(|value| table.symbols().name(value.symbol).to_string())
                        .collect();
                    format!("{} {{{}}}", inner.name, names.join(", "))
                }
            };
            atom_of.insert(
                (position, part_index),
                SymbolId::new(atoms.len() as u32),
            );
            atoms.push(VarPartAtom {
                inner_attribute: position,
                inner_part: part_index,
                label,
            });
        }
    }

    // The grid: identifier dimension x variable-part dimension.
    let identifier_attribute = &table.attributes()[identifier_index];
    let mut grid = DataGrid::new(vec![
        (
            identifier_attribute.name.clone(),
            identifier_attribute.attribute_type,
        ),
        (VARPART_DIMENSION_NAME.to_string(), AttributeType::Categorical),
    ]);

    // Identifier parts at value resolution.
    let mut identifier_values: Vec<Value> = observations
        .keys()
        .map(|(identifier, _, _)| *identifier)
        .collect();
    identifier_values.sort();
    identifier_values.dedup();
    let mut identifier_observations: HashMap<Value, u64> = HashMap::new();
    for ((identifier, _, _), frequency) in &observations {
        *identifier_observations.entry(*identifier).or_insert(0) += frequency;
    }
    let mut identifier_part_of: HashMap<Value, PartId> = HashMap::new();
    match identifier_attribute.attribute_type {
        AttributeType::Numeric => {
            let numbers: Vec<Continuous> = identifier_values
                .iter()
                .map(|value| value.as_number().expect("numeric identifier"))
                .collect();
            let uppers = interval_uppers(&numbers);
            let mut lower = f64::NEG_INFINITY;
            for (value, upper) in identifier_values.iter().zip(&uppers) {
                let part = grid.add_part(0, PartContent::Interval {
                    lower,
                    upper: *upper,
                });
                identifier_part_of.insert(*value, part);
                lower = *upper;
            }
        }
        AttributeType::Categorical => {
            for value in &identifier_values {
                let symbol = value.as_symbol().expect("categorical identifier");
                let part = grid.add_part(0, PartContent::ValueSet {
                    values: vec![ValueEntry {
                        symbol,
                        frequency: identifier_observations[value],
                    }],
                    has_catchall: false,
                });
                identifier_part_of.insert(*value, part);
            }
        }
    }

    // One cluster per atom initially.
    let mut cluster_of_atom: Vec<PartId> = Vec::with_capacity(atoms.len());
    for (atom_index, atom) in atoms.iter().enumerate() {
        let frequency = atom_frequency[&(atom.inner_attribute, atom.inner_part)];
        let part = grid.add_part(1, PartContent::ValueSet {
            values: vec![ValueEntry {
                symbol: SymbolId::new(atom_index as u32),
                frequency,
            }],
            has_catchall: false,
        });
        cluster_of_atom.push(part);
    }

    // Cells: deterministic order over the observation keys.
    let mut ordered: Vec<((Value, usize, usize), u64)> = observations.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    for ((identifier, position, part_index), frequency) in ordered {
        let atom = atom_of[&(position, part_index)];
        grid.add_cell_frequency(
            vec![
                identifier_part_of[&identifier],
                cluster_of_atom[atom.index()],
            ],
            frequency,
        );
    }

    for dimension in 0..grid.attribute_count() {
        let count = grid.attribute(dimension).part_count();
        grid.attribute_mut(dimension).initial_part_count = count;
    }
    grid.varpart = Some(VarPartSpec {
        identifier_attribute: 0,
        varpart_attribute: 1,
        inner: inner_attributes,
        atoms,
    });
    grid.check()?;
    Ok(grid)
}
