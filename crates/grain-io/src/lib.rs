//! # grain-io: Dictionaries, Data Files and Reports
//!
//! The format layer of GRAIN:
//!
//! - [`dictionary`] - schema files declaring the analysis variables
//! - [`reader`] - separator-configurable tabular data into tuple tables
//! - [`text`] - byte-string / printable-word value encoding
//! - [`report`] - `.khc` textual reports, `.khcj` JSON twins, anytime
//!   intermediate saving
//!
//! All writes are atomic (temporary file then rename); all row-level read
//! problems are diagnostics, never panics.

pub mod dictionary;
pub mod reader;
pub mod report;
pub mod text;

pub use dictionary::{parse_dictionary_text, read_dictionary_file, Dictionary, DictionaryFile};
pub use reader::{read_data_file, ReadOutcome, ReaderOptions};
pub use report::{
    json_twin_path, parse_khc, read_report, render_khc, AnytimeReportSaver, ReportWriter,
};
pub use text::{byte_string_to_word, to_printable, word_to_byte_string};
