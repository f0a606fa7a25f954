//! Command-line definition of the `grain` coclustering tool.

use clap::Parser;
use std::path::PathBuf;

/// MDL coclustering of tabular data.
///
/// Reads a dictionary and a data file, discovers the cost-optimal joint
/// partition of the analysis variables, and writes a hierarchical
/// coclustering report.
#[derive(Parser, Debug)]
#[command(name = "grain", author, version, about)]
pub struct Cli {
    /// Dictionary file and dictionary name
    #[arg(short = 'd', num_args = 2, value_names = ["DICT_FILE", "DICT_NAME"], required = true)]
    pub dictionary: Vec<String>,

    /// Input data file
    #[arg(short = 'i', value_name = "DATA_FILE", required = true)]
    pub input: PathBuf,

    /// Coclustering report file
    #[arg(short = 'o', value_name = "REPORT_FILE", required = true)]
    pub output: PathBuf,

    /// Field separator (single character, default TAB)
    #[arg(short = 'f', value_name = "SEPARATOR")]
    pub field_separator: Option<String>,

    /// Memory cap in MiB
    #[arg(short = 'm', value_name = "MB")]
    pub memory: Option<u64>,

    /// Error log file
    #[arg(short = 'e', value_name = "LOG_FILE")]
    pub error_log: Option<PathBuf>,

    /// Coclustering variables (default: every dictionary variable)
    #[arg(long = "var", value_name = "NAME")]
    pub variables: Vec<String>,

    /// Frequency variable weighting each record
    #[arg(long, value_name = "NAME")]
    pub frequency: Option<String>,

    /// Identifier variable (switches to instances x variables coclustering)
    #[arg(long, value_name = "NAME")]
    pub identifier: Option<String>,

    /// Inner variables of the instances x variables coclustering
    #[arg(long = "inner", value_name = "NAME", requires = "identifier")]
    pub inner: Vec<String>,

    /// Optimization time budget in seconds
    #[arg(long, value_name = "SECONDS")]
    pub time: Option<u64>,

    /// Skip the JSON report twin
    #[arg(long)]
    pub no_json: bool,

    /// Set the logging level
    #[arg(long, default_value = "warn")]
    pub log_level: tracing::Level,
}

impl Cli {
    pub fn dictionary_file(&self) -> &str {
        &self.dictionary[0]
    }

    pub fn dictionary_name(&self) -> &str {
        &self.dictionary[1]
    }

    /// The single-byte separator, validated.
    pub fn separator(&self) -> Result<u8, String> {
        match &self.field_separator {
            None => Ok(b'\t'),
            Some(text) => {
                let bytes = text.as_bytes();
                if bytes.len() == 1 {
                    Ok(bytes[0])
                } else {
                    Err(format!(
                        "field separator must be a single character, got `{}`",
                        text
                    ))
                }
            }
        }
    }
}
