//! Tabular data reading into a tuple table.
//!
//! The reader matches the file header against the dictionary, converts
//! fields by declared type and deduplicates rows into a
//! [`TupleTable`]. Row-level problems (field count mismatch, unparseable
//! number, bad weight) skip the row with a warning and processing
//! continues; the rows-read statistic counts surviving rows. The
//! interruption flag is polled once every 65 536 records.

use crate::dictionary::Dictionary;
use grain_core::{
    AttributeType, CancellationToken, Continuous, Diagnostics, GrainError, GrainResult,
    TupleAttribute, TupleTable, TupleTableBuilder, Value, LOADER_POLL_INTERVAL,
};
use std::path::Path;

/// Reader configuration; one per invocation.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Single-byte field separator.
    pub separator: u8,
    /// Optional frequency variable: its (positive integer) value weights
    /// each row instead of counting it once.
    pub frequency_attribute: Option<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            separator: b'\t',
            frequency_attribute: None,
        }
    }
}

/// Result of reading one data file.
#[derive(Debug)]
pub struct ReadOutcome {
    pub table: TupleTable,
    /// Rows ingested into the table.
    pub rows_read: u64,
    /// Rows dropped by a warning.
    pub rows_skipped: u64,
}

pub fn read_data_file(
    path: &Path,
    dictionary: &Dictionary,
    options: &ReaderOptions,
    diagnostics: &mut Diagnostics,
    token: &CancellationToken,
) -> GrainResult<ReadOutcome> {
    // The frequency variable must be a numeric variable of the dictionary
    // and is not part of the tuple key.
    let frequency_name = options.frequency_attribute.as_deref();
    if let Some(name) = frequency_name {
        match dictionary.variable(name) {
            None => {
                return Err(GrainError::Spec(format!(
                    "frequency variable `{}` is not in the dictionary",
                    name
                )));
            }
            Some(variable) if variable.attribute_type != AttributeType::Numeric => {
                return Err(GrainError::Spec(format!(
                    "frequency variable `{}` must be numerical",
                    name
                )));
            }
            Some(_) => {}
        }
    }
    let tuple_variables: Vec<_> = dictionary
        .variables
        .iter()
        .filter(|variable| Some(variable.name.as_str()) != frequency_name)
        .collect();
    if tuple_variables.len() < 2 {
        return Err(GrainError::Spec(
            "the dictionary must declare at least 2 analysis variables".into(),
        ));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.separator)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|error| GrainError::Parse(format!("cannot open {}: {}", path.display(), error)))?;

    // Header: every dictionary variable must resolve to a column.
    let header = reader
        .headers()
        .map_err(|error| GrainError::Parse(format!("cannot read header: {}", error)))?
        .clone();
    let column_of = |name: &str| -> GrainResult<usize> {
        header
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| {
                GrainError::Spec(format!("variable `{}` is missing from the data header", name))
            })
    };
    let columns: Vec<usize> = tuple_variables
        .iter()
        .map(|variable| column_of(&variable.name))
        .collect::<GrainResult<_>>()?;
    let frequency_column = frequency_name.map(column_of).transpose()?;

    let mut builder = TupleTableBuilder::new(
        tuple_variables
            .iter()
            .map(|variable| TupleAttribute {
                name: variable.name.clone(),
                attribute_type: variable.attribute_type,
            })
            .collect(),
    );

    let mut rows_read = 0u64;
    let mut rows_skipped = 0u64;
    let mut record_index = 0u64;
    for record in reader.records() {
        record_index += 1;
        if record_index % LOADER_POLL_INTERVAL == 0 && token.is_requested() {
            return Err(GrainError::Interrupted(format!(
                "data read interrupted after {} records",
                record_index
            )));
        }
        // Header line is line 1.
        let line = (record_index + 1) as usize;
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                diagnostics.add_warning_at_line("row", format!("malformed record: {}", error), line);
                rows_skipped += 1;
                continue;
            }
        };

        // Row weight first: a bad weight drops the row before any parsing.
        let frequency = match frequency_column {
            None => 1,
            Some(column) => {
                match parse_frequency(record.get(column)) {
                    FrequencyField::Count(count) => count,
                    FrequencyField::Dropped(reason) => {
                        diagnostics.add_warning_at_line("frequency", reason, line);
                        rows_skipped += 1;
                        continue;
                    }
                    FrequencyField::Rejecting(reason) => {
                        return Err(GrainError::Parse(format!("line {}: {}", line, reason)));
                    }
                }
            }
        };

        let mut key: Vec<Value> = Vec::with_capacity(columns.len());
        let mut row_error: Option<String> = None;
        for (variable, column) in tuple_variables.iter().zip(&columns) {
            let Some(field) = record.get(*column) else {
                row_error = Some("field count mismatch".into());
                break;
            };
            match variable.attribute_type {
                AttributeType::Numeric => {
                    let trimmed = field.trim();
                    if trimmed.is_empty() {
                        key.push(Value::Number(Continuous::MISSING));
                    } else {
                        match trimmed.parse::<f64>().ok().and_then(Continuous::new) {
                            Some(value) => key.push(Value::Number(value)),
                            None => {
                                row_error = Some(format!(
                                    "value `{}` of variable `{}` is not a finite number",
                                    trimmed, variable.name
                                ));
                                break;
                            }
                        }
                    }
                }
                AttributeType::Categorical => {
                    key.push(Value::Symbol(builder.symbols_mut().intern(field)));
                }
            }
        }
        if let Some(reason) = row_error {
            diagnostics.add_warning_at_line("row", reason, line);
            rows_skipped += 1;
            continue;
        }

        if builder.push(key, frequency) {
            rows_read += 1;
        } else {
            diagnostics.add_warning_at_line(
                "frequency",
                "cumulative frequency would exceed the 32-bit sample limit, row rejected",
                line,
            );
            rows_skipped += 1;
        }
    }

    Ok(ReadOutcome {
        table: builder.freeze(),
        rows_read,
        rows_skipped,
    })
}

enum FrequencyField {
    Count(u64),
    Dropped(String),
    Rejecting(String),
}

/// Weight rules: positive finite; non-integers round; zero or negative (or
/// missing) drop the row; values beyond `i32::MAX` reject the file.
fn parse_frequency(field: Option<&str>) -> FrequencyField {
    let Some(field) = field else {
        return FrequencyField::Dropped("missing frequency field, row dropped".into());
    };
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return FrequencyField::Dropped("empty frequency field, row dropped".into());
    }
    let Ok(value) = trimmed.parse::<f64>() else {
        return FrequencyField::Dropped(format!("frequency `{}` is not a number, row dropped", trimmed));
    };
    if !value.is_finite() {
        return FrequencyField::Dropped(format!("frequency `{}` is not finite, row dropped", trimmed));
    }
    if value > i32::MAX as f64 {
        return FrequencyField::Rejecting(format!(
            "frequency `{}` exceeds the 32-bit limit",
            trimmed
        ));
    }
    let rounded = value.round();
    if rounded <= 0.0 {
        return FrequencyField::Dropped(format!(
            "frequency `{}` is not positive, row dropped",
            trimmed
        ));
    }
    FrequencyField::Count(rounded as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::parse_dictionary_text;
    use std::io::Write;

    fn dictionary() -> Dictionary {
        parse_dictionary_text(
            "Dictionary T\n{\n    Numerical X;\n    Categorical Y;\n    Numerical W;\n};\n",
        )
        .unwrap()
        .dictionaries
        .remove(0)
    }

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn rows_are_read_and_deduplicated() {
        let file = write_file("X\tY\tW\n1\ta\t1\n1\ta\t1\n2\tb\t1\n");
        let mut diagnostics = Diagnostics::new();
        let outcome = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions::default(),
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_read, 3);
        assert_eq!(outcome.rows_skipped, 0);
        // W is an ordinary numeric variable here, so tuples differ only by
        // X and Y: first two rows collapse.
        assert_eq!(outcome.table.tuple_count(), 2);
        assert_eq!(outcome.table.total_frequency(), 3);
    }

    #[test]
    fn frequency_variable_weights_rows() {
        let file = write_file("X\tY\tW\n1\ta\t3\n2\tb\t2.4\n3\tc\t0\n4\td\t-1\n");
        let mut diagnostics = Diagnostics::new();
        let outcome = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions {
                frequency_attribute: Some("W".into()),
                ..Default::default()
            },
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap();
        // 3 + round(2.4) = 5; the 0 and -1 rows drop with warnings.
        assert_eq!(outcome.table.total_frequency(), 5);
        assert_eq!(outcome.rows_read, 2);
        assert_eq!(outcome.rows_skipped, 2);
        assert_eq!(diagnostics.warning_count(), 2);
    }

    #[test]
    fn oversized_frequency_rejects_the_file() {
        let file = write_file("X\tY\tW\n1\ta\t2147483648\n");
        let mut diagnostics = Diagnostics::new();
        let error = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions {
                frequency_attribute: Some("W".into()),
                ..Default::default()
            },
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(error, GrainError::Parse(_)));
    }

    #[test]
    fn int_max_frequency_is_accepted() {
        let file = write_file("X\tY\tW\n1\ta\t2147483647\n");
        let mut diagnostics = Diagnostics::new();
        let outcome = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions {
                frequency_attribute: Some("W".into()),
                ..Default::default()
            },
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.table.total_frequency(), i32::MAX as u64);
    }

    #[test]
    fn malformed_rows_are_skipped_with_warnings() {
        let file = write_file("X\tY\tW\nnot a number\ta\t1\n2\tb\t1\n3\n");
        let mut diagnostics = Diagnostics::new();
        let outcome = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions::default(),
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_read, 1);
        assert_eq!(outcome.rows_skipped, 2);
        assert!(diagnostics.warning_count() >= 2);
    }

    #[test]
    fn empty_numeric_field_is_missing() {
        let file = write_file("X\tY\tW\n\ta\t1\n5\tb\t1\n");
        let mut diagnostics = Diagnostics::new();
        let outcome = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions::default(),
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_read, 2);
        let missing = outcome
            .table
            .tuples()
            .iter()
            .filter(|(key, _)| {
                matches!(key[0], Value::Number(n) if n.is_missing())
            })
            .count();
        assert_eq!(missing, 1);
    }

    #[test]
    fn missing_header_column_is_a_spec_error() {
        let file = write_file("X\tW\n1\t1\n");
        let mut diagnostics = Diagnostics::new();
        let error = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions::default(),
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(error, GrainError::Spec(_)));
    }

    #[test]
    fn comma_separator_is_supported() {
        let file = write_file("X,Y,W\n1,a,1\n2,b,1\n");
        let mut diagnostics = Diagnostics::new();
        let outcome = read_data_file(
            file.path(),
            &dictionary(),
            &ReaderOptions {
                separator: b',',
                ..Default::default()
            },
            &mut diagnostics,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_read, 2);
    }
}
