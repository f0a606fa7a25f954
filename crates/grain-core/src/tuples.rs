//! Deduplicated, frequency-weighted sample of the input rows.
//!
//! The tuple store is the boundary between the database layer and the
//! engine: the reader pushes raw rows (already weighted), the builder
//! deduplicates them, and [`TupleTableBuilder::freeze`] produces an
//! immutable, deterministically ordered [`TupleTable`] together with the
//! per-attribute descriptive statistics the final report needs.

use crate::value::{AttributeType, Continuous, SymbolId, SymbolTable, Value};
use hashbrown::HashMap;
use serde::Serialize;

/// Rows between two interruption-flag polls in loader loops.
pub const LOADER_POLL_INTERVAL: u64 = 65_536;

/// Largest admissible cumulative frequency (sample size).
pub const MAX_TOTAL_FREQUENCY: u64 = i32::MAX as u64;

/// One participating variable of the tuple store.
#[derive(Debug, Clone, Serialize)]
pub struct TupleAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

/// Descriptive statistics of one attribute over the whole sample.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DescriptiveStats {
    Numeric {
        /// Smallest observed non-missing value, if any
        min: Option<f64>,
        /// Largest observed non-missing value, if any
        max: Option<f64>,
        /// Distinct observed values, missing included
        distinct: usize,
        /// Frequency of the missing value
        missing_frequency: u64,
    },
    Categorical {
        /// Value frequencies, sorted by decreasing frequency then id
        frequencies: Vec<(SymbolId, u64)>,
    },
}

impl DescriptiveStats {
    pub fn distinct_count(&self) -> usize {
        match self {
            DescriptiveStats::Numeric { distinct, .. } => *distinct,
            DescriptiveStats::Categorical { frequencies } => frequencies.len(),
        }
    }
}

/// Immutable deduplicated tuple sample.
///
/// Tuples are keyed by the full ordered vector of attribute values; the sum
/// of their frequencies is the effective sample size N.
#[derive(Debug, Clone)]
pub struct TupleTable {
    attributes: Vec<TupleAttribute>,
    symbols: SymbolTable,
    tuples: Vec<(Vec<Value>, u64)>,
    total_frequency: u64,
    stats: Vec<DescriptiveStats>,
}

impl TupleTable {
    pub fn attributes(&self) -> &[TupleAttribute] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Deduplicated tuples in key order.
    pub fn tuples(&self) -> &[(Vec<Value>, u64)] {
        &self.tuples
    }

    pub fn tuple_count(&self) -> usize {
        self.tuples.len()
    }

    /// Effective sample size N.
    pub fn total_frequency(&self) -> u64 {
        self.total_frequency
    }

    pub fn stats(&self) -> &[DescriptiveStats] {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Distinct values of one attribute, in value order.
    pub fn distinct_values(&self, attribute: usize) -> Vec<Value> {
        let mut values: Vec<Value> = self
            .tuples
            .iter()
            .map(|(key, _)| key[attribute])
            .collect();
        values.sort();
        values.dedup();
        values
    }
}

/// Accumulates weighted rows into a deduplicated table.
#[derive(Debug)]
pub struct TupleTableBuilder {
    attributes: Vec<TupleAttribute>,
    symbols: SymbolTable,
    index: HashMap<Vec<Value>, u64>,
    total_frequency: u64,
}

impl TupleTableBuilder {
    pub fn new(attributes: Vec<TupleAttribute>) -> Self {
        Self {
            attributes,
            symbols: SymbolTable::new(),
            index: HashMap::new(),
            total_frequency: 0,
        }
    }

    pub fn attributes(&self) -> &[TupleAttribute] {
        &self.attributes
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn total_frequency(&self) -> u64 {
        self.total_frequency
    }

    pub fn tuple_count(&self) -> usize {
        self.index.len()
    }

    /// Add one weighted row. Returns `false` when the row would push the
    /// cumulative sample size past `i32::MAX`; the caller skips the row and
    /// emits a warning.
    pub fn push(&mut self, key: Vec<Value>, frequency: u64) -> bool {
        debug_assert_eq!(key.len(), self.attributes.len());
        debug_assert!(frequency > 0);
        if self.total_frequency + frequency > MAX_TOTAL_FREQUENCY {
            return false;
        }
        self.total_frequency += frequency;
        *self.index.entry(key).or_insert(0) += frequency;
        true
    }

    /// Finish construction: order tuples by key and compute descriptive
    /// statistics. The result is immutable.
    pub fn freeze(self) -> TupleTable {
        let mut tuples: Vec<(Vec<Value>, u64)> = self.index.into_iter().collect();
        tuples.sort_by(|a, b| a.0.cmp(&b.0));

        let stats = compute_stats(&self.attributes, &tuples);
        TupleTable {
            attributes: self.attributes,
            symbols: self.symbols,
            tuples,
            total_frequency: self.total_frequency,
            stats,
        }
    }
}

fn compute_stats(
    attributes: &[TupleAttribute],
    tuples: &[(Vec<Value>, u64)],
) -> Vec<DescriptiveStats> {
    attributes
        .iter()
        .enumerate()
        .map(|(index, attribute)| match attribute.attribute_type {
            AttributeType::Numeric => {
                let mut min: Option<f64> = None;
                let mut max: Option<f64> = None;
                let mut missing_frequency = 0u64;
                let mut distinct: Vec<Continuous> = Vec::new();
                for (key, frequency) in tuples {
                    let value = key[index].as_number().expect("numeric attribute");
                    distinct.push(value);
                    if value.is_missing() {
                        missing_frequency += frequency;
                    } else {
                        let v = value.value();
                        min = Some(min.map_or(v, |m| m.min(v)));
                        max = Some(max.map_or(v, |m| m.max(v)));
                    }
                }
                distinct.sort();
                distinct.dedup();
                DescriptiveStats::Numeric {
                    min,
                    max,
                    distinct: distinct.len(),
                    missing_frequency,
                }
            }
            AttributeType::Categorical => {
                let mut frequencies: HashMap<SymbolId, u64> = HashMap::new();
                for (key, frequency) in tuples {
                    let symbol = key[index].as_symbol().expect("categorical attribute");
                    *frequencies.entry(symbol).or_insert(0) += frequency;
                }
                let mut frequencies: Vec<(SymbolId, u64)> = frequencies.into_iter().collect();
                frequencies.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                DescriptiveStats::Categorical { frequencies }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_attributes() -> Vec<TupleAttribute> {
        vec![
            TupleAttribute {
                name: "Size".into(),
                attribute_type: AttributeType::Numeric,
            },
            TupleAttribute {
                name: "Color".into(),
                attribute_type: AttributeType::Categorical,
            },
        ]
    }

    fn number(v: f64) -> Value {
        Value::Number(Continuous::new(v).unwrap())
    }

    #[test]
    fn duplicate_rows_accumulate_frequency() {
        let mut builder = TupleTableBuilder::new(two_attributes());
        let red = builder.symbols_mut().intern("red");
        let blue = builder.symbols_mut().intern("blue");
        assert!(builder.push(vec![number(1.0), Value::Symbol(red)], 2));
        assert!(builder.push(vec![number(1.0), Value::Symbol(red)], 3));
        assert!(builder.push(vec![number(2.0), Value::Symbol(blue)], 1));

        let table = builder.freeze();
        assert_eq!(table.tuple_count(), 2);
        assert_eq!(table.total_frequency(), 6);
        assert_eq!(table.tuples()[0].1, 5);
    }

    #[test]
    fn cumulative_frequency_is_capped_at_int_max() {
        let mut builder = TupleTableBuilder::new(two_attributes());
        let red = builder.symbols_mut().intern("red");
        assert!(builder.push(vec![number(1.0), Value::Symbol(red)], MAX_TOTAL_FREQUENCY));
        // One more observation would overflow the 32-bit sample size.
        assert!(!builder.push(vec![number(2.0), Value::Symbol(red)], 1));
        assert_eq!(builder.total_frequency(), MAX_TOTAL_FREQUENCY);
    }

    #[test]
    fn numeric_stats_ignore_missing_for_bounds() {
        let mut builder = TupleTableBuilder::new(two_attributes());
        let red = builder.symbols_mut().intern("red");
        builder.push(vec![number(17.0), Value::Symbol(red)], 1);
        builder.push(vec![number(90.0), Value::Symbol(red)], 1);
        builder.push(vec![Value::Number(Continuous::MISSING), Value::Symbol(red)], 4);

        let table = builder.freeze();
        match &table.stats()[0] {
            DescriptiveStats::Numeric {
                min,
                max,
                distinct,
                missing_frequency,
            } => {
                assert_eq!(*min, Some(17.0));
                assert_eq!(*max, Some(90.0));
                assert_eq!(*distinct, 3);
                assert_eq!(*missing_frequency, 4);
            }
            _ => panic!("expected numeric stats"),
        }
    }

    #[test]
    fn categorical_stats_sort_by_decreasing_frequency() {
        let mut builder = TupleTableBuilder::new(two_attributes());
        let red = builder.symbols_mut().intern("red");
        let blue = builder.symbols_mut().intern("blue");
        builder.push(vec![number(1.0), Value::Symbol(red)], 1);
        builder.push(vec![number(2.0), Value::Symbol(blue)], 5);

        let table = builder.freeze();
        match &table.stats()[1] {
            DescriptiveStats::Categorical { frequencies } => {
                assert_eq!(frequencies[0], (blue, 5));
                assert_eq!(frequencies[1], (red, 1));
            }
            _ => panic!("expected categorical stats"),
        }
    }
}
