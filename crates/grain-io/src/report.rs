//! Coclustering report persistence.
//!
//! The `.khc` textual report is a tab-separated section format; an
//! optional `.khcj` JSON twin carries the same information for tooling.
//! Both are written atomically (temporary file in the target directory,
//! then rename), so a crashed run never leaves a half-written report.
//! Numeric fields use the shortest round-tripping decimal form, so a
//! written report re-reads to the same values bit for bit.
//!
//! Every name (attribute, part, value) is recoded through the byte-string
//! word encoding before it is written, which keeps the format one-line-
//! per-record even for values containing separators or non-UTF-8 bytes.

use crate::text::{byte_string_to_word, word_to_byte_string};
use grain_core::{
    AttributeType, GrainError, GrainResult, HdgAttribute, HdgNode, HdgNodeId,
    HierarchicalDataGrid, NamedValue, NodeContent, ReportCell, ValueTypicality,
};
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER_LINE: &str = "#GRAIN coclustering report";
const FORMAT_VERSION: &str = "0.3.0";

/// Extension of the JSON twin.
pub const JSON_REPORT_EXTENSION: &str = "khcj";

/// Path of the JSON twin next to a `.khc` report.
pub fn json_twin_path(path: &Path) -> PathBuf {
    path.with_extension(JSON_REPORT_EXTENSION)
}

fn encode(name: &str) -> String {
    byte_string_to_word(name.as_bytes())
}

fn decode(word: &str) -> GrainResult<String> {
    let bytes = word_to_byte_string(word)
        .ok_or_else(|| GrainError::Parse(format!("invalid encoded name `{}`", word)))?;
    String::from_utf8(bytes)
        .map_err(|_| GrainError::Parse(format!("encoded name `{}` is not UTF-8", word)))
}

fn write_option_index(out: &mut String, value: Option<HdgNodeId>) {
    match value {
        Some(id) => out.push_str(&id.index().to_string()),
        None => out.push('-'),
    }
}

/// Render a report to the `.khc` textual layout.
pub fn render_khc(report: &HierarchicalDataGrid) -> String {
    let mut out = String::new();
    out.push_str(HEADER_LINE);
    out.push('\n');
    out.push_str(&format!("Version\t{}\n", FORMAT_VERSION));
    out.push_str(&format!("ShortDescription\t{}\n", encode(&report.short_description)));
    if let Some(name) = &report.frequency_attribute_name {
        out.push_str(&format!("FrequencyVariable\t{}\n", encode(name)));
    }
    if let Some(name) = &report.identifier_attribute_name {
        out.push_str(&format!("IdentifierVariable\t{}\n", encode(name)));
    }
    out.push_str(&format!("Instances\t{}\n", report.total_frequency));
    out.push_str(&format!("NullCost\t{}\n", report.null_cost));
    out.push_str(&format!("Cost\t{}\n", report.cost));
    out.push_str(&format!("Level\t{}\n", report.level()));
    out.push_str(&format!(
        "InitialAttributes\t{}\n",
        report.initial_attribute_number
    ));
    out.push('\n');

    out.push_str(&format!("Dimensions\t{}\n", report.attributes.len()));
    for attribute in &report.attributes {
        out.push_str(&format!(
            "Dimension\t{}\t{}\t{}\t{}",
            encode(&attribute.name),
            attribute.attribute_type,
            attribute.initial_part_count,
            attribute.interest
        ));
        match (attribute.min, attribute.max) {
            (Some(min), Some(max)) => out.push_str(&format!("\t{}\t{}\n", min, max)),
            _ => out.push_str("\t-\t-\n"),
        }
        out.push_str("Root\t");
        write_option_index(&mut out, attribute.root);
        out.push('\n');

        out.push_str(&format!("Nodes\t{}\n", attribute.nodes.len()));
        for (index, node) in attribute.nodes.iter().enumerate() {
            out.push_str(&format!(
                "Node\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t",
                index,
                encode(&node.part_name),
                node.frequency,
                node.interest,
                node.hierarchical_level,
                node.rank,
                node.hierarchical_rank
            ));
            write_option_index(&mut out, node.parent);
            out.push('\t');
            match node.children {
                Some((left, right)) => {
                    out.push_str(&format!("{}\t{}\n", left.index(), right.index()));
                }
                None => out.push_str("-\t-\n"),
            }
            match &node.content {
                Some(NodeContent::Interval { lower, upper }) => {
                    out.push_str(&format!("Interval\t{}\t{}\t{}\n", index, lower, upper));
                }
                Some(NodeContent::ValueSet {
                    values,
                    has_catchall,
                }) => {
                    out.push_str(&format!(
                        "ValueSet\t{}\t{}",
                        index,
                        if *has_catchall { 1 } else { 0 }
                    ));
                    for value in values {
                        out.push_str(&format!("\t{}\t{}", encode(&value.name), value.frequency));
                    }
                    out.push('\n');
                }
                None => {}
            }
        }

        out.push_str(&format!("Values\t{}\n", attribute.value_typicalities.len()));
        for typicality in &attribute.value_typicalities {
            out.push_str(&format!(
                "Value\t{}\t{}\t{}\n",
                encode(&typicality.value),
                typicality.group.index(),
                typicality.typicality
            ));
        }
    }
    out.push('\n');

    out.push_str(&format!("Cells\t{}\n", report.cells.len()));
    for cell in &report.cells {
        out.push_str(&format!("Cell\t{}", cell.frequency));
        for name in &cell.part_names {
            out.push_str(&format!("\t{}", encode(name)));
        }
        out.push('\n');
    }
    out
}

/// Line cursor over a `.khc` report body.
struct Cursor<'a> {
    lines: std::iter::Peekable<std::str::Lines<'a>>,
    line_number: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().peekable(),
            line_number: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> GrainError {
        GrainError::Parse(format!("line {}: {}", self.line_number, message.into()))
    }

    fn next_content(&mut self) -> Option<&'a str> {
        loop {
            let line = self.lines.next()?;
            self.line_number += 1;
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    fn peek_content(&mut self) -> Option<&'a str> {
        while let Some(line) = self.lines.peek() {
            if line.is_empty() {
                self.lines.next();
                self.line_number += 1;
            } else {
                return self.lines.peek().copied();
            }
        }
        None
    }

    /// Next non-empty line, which must start with `tag` + tab; returns the
    /// remaining fields.
    fn expect(&mut self, tag: &str) -> GrainResult<Vec<&'a str>> {
        let line = self
            .next_content()
            .ok_or_else(|| self.error(format!("expected `{}`, found end of file", tag)))?;
        let mut fields = line.split('\t');
        let found = fields.next().unwrap_or("");
        if found != tag {
            return Err(self.error(format!("expected `{}`, found `{}`", tag, found)));
        }
        Ok(fields.collect())
    }

    /// Next line with `tag`, parsing its first field.
    fn expect_value<T: std::str::FromStr>(&mut self, tag: &str, what: &str) -> GrainResult<T> {
        let fields = self.expect(tag)?;
        let field = fields.first().copied().unwrap_or("");
        field
            .parse::<T>()
            .map_err(|_| self.error(format!("invalid {}: `{}`", what, field)))
    }

    /// Like `expect`, but returns `None` without consuming when the next
    /// line has a different tag.
    fn accept(&mut self, tag: &str) -> GrainResult<Option<Vec<&'a str>>> {
        match self.peek_content() {
            Some(line) if line.split('\t').next() == Some(tag) => self.expect(tag).map(Some),
            _ => Ok(None),
        }
    }
}

fn parse_field<T: std::str::FromStr>(cursor: &Cursor<'_>, field: &str, what: &str) -> GrainResult<T> {
    field
        .parse::<T>()
        .map_err(|_| cursor.error(format!("invalid {}: `{}`", what, field)))
}

fn parse_option_index(cursor: &Cursor<'_>, field: &str) -> GrainResult<Option<HdgNodeId>> {
    if field == "-" {
        Ok(None)
    } else {
        Ok(Some(HdgNodeId::new(parse_field(cursor, field, "node index")?)))
    }
}

/// Parse a `.khc` report body.
pub fn parse_khc(text: &str) -> GrainResult<HierarchicalDataGrid> {
    let mut cursor = Cursor::new(text);
    let first = cursor
        .next_content()
        .ok_or_else(|| cursor.error("empty report"))?;
    if first != HEADER_LINE {
        return Err(cursor.error("not a GRAIN coclustering report"));
    }
    cursor.expect("Version")?;
    let short_description = decode(
        cursor
            .expect("ShortDescription")?
            .first()
            .copied()
            .unwrap_or(""),
    )?;
    let frequency_attribute_name = match cursor.accept("FrequencyVariable")? {
        Some(fields) => Some(decode(fields.first().copied().unwrap_or(""))?),
        None => None,
    };
    let identifier_attribute_name = match cursor.accept("IdentifierVariable")? {
        Some(fields) => Some(decode(fields.first().copied().unwrap_or(""))?),
        None => None,
    };
    let total_frequency: u64 = cursor.expect_value("Instances", "instance count")?;
    let null_cost: f64 = cursor.expect_value("NullCost", "null cost")?;
    let cost: f64 = cursor.expect_value("Cost", "cost")?;
    cursor.expect("Level")?;
    let initial_attribute_number: usize =
        cursor.expect_value("InitialAttributes", "attribute count")?;

    let dimension_count: usize = cursor.expect_value("Dimensions", "dimension count")?;
    let mut attributes = Vec::with_capacity(dimension_count);
    for _ in 0..dimension_count {
        let fields = cursor.expect("Dimension")?;
        if fields.len() < 6 {
            return Err(cursor.error("truncated dimension record"));
        }
        let name = decode(fields[0])?;
        let attribute_type = match fields[1] {
            "Numerical" => AttributeType::Numeric,
            "Categorical" => AttributeType::Categorical,
            other => return Err(cursor.error(format!("unknown dimension type `{}`", other))),
        };
        let initial_part_count: usize = parse_field(&cursor, fields[2], "part count")?;
        let interest: f64 = parse_field(&cursor, fields[3], "interest")?;
        let min = if fields[4] == "-" {
            None
        } else {
            Some(parse_field(&cursor, fields[4], "minimum")?)
        };
        let max = if fields[5] == "-" {
            None
        } else {
            Some(parse_field(&cursor, fields[5], "maximum")?)
        };
        let root_fields = cursor.expect("Root")?;
        let root = parse_option_index(&cursor, root_fields.first().copied().unwrap_or(""))?;

        let node_count: usize = cursor.expect_value("Nodes", "node count")?;
        let mut nodes: Vec<HdgNode> = Vec::with_capacity(node_count);
        for index in 0..node_count {
            let fields = cursor.expect("Node")?;
            if fields.len() < 10 {
                return Err(cursor.error("truncated node record"));
            }
            let declared: usize = parse_field(&cursor, fields[0], "node index")?;
            if declared != index {
                return Err(cursor.error(format!(
                    "node index {} out of order (expected {})",
                    declared, index
                )));
            }
            let children = match (
                parse_option_index(&cursor, fields[8])?,
                parse_option_index(&cursor, fields[9])?,
            ) {
                (Some(left), Some(right)) => Some((left, right)),
                (None, None) => None,
                _ => return Err(cursor.error("node with a single child")),
            };
            let mut node = HdgNode {
                part_name: decode(fields[1])?,
                frequency: parse_field(&cursor, fields[2], "frequency")?,
                interest: parse_field(&cursor, fields[3], "interest")?,
                hierarchical_level: parse_field(&cursor, fields[4], "hierarchical level")?,
                rank: parse_field(&cursor, fields[5], "rank")?,
                hierarchical_rank: parse_field(&cursor, fields[6], "hierarchical rank")?,
                parent: parse_option_index(&cursor, fields[7])?,
                children,
                content: None,
            };
            if let Some(fields) = cursor.accept("Interval")? {
                if fields.len() < 3 {
                    return Err(cursor.error("truncated interval record"));
                }
                node.content = Some(NodeContent::Interval {
                    lower: parse_field(&cursor, fields[1], "lower bound")?,
                    upper: parse_field(&cursor, fields[2], "upper bound")?,
                });
            } else if let Some(fields) = cursor.accept("ValueSet")? {
                if fields.len() < 2 || (fields.len() - 2) % 2 != 0 {
                    return Err(cursor.error("truncated value-set record"));
                }
                let has_catchall = fields[1] == "1";
                let mut values = Vec::with_capacity((fields.len() - 2) / 2);
                for pair in fields[2..].chunks(2) {
                    values.push(NamedValue {
                        name: decode(pair[0])?,
                        frequency: parse_field(&cursor, pair[1], "value frequency")?,
                    });
                }
                node.content = Some(NodeContent::ValueSet {
                    values,
                    has_catchall,
                });
            }
            nodes.push(node);
        }

        let value_count: usize = cursor.expect_value("Values", "value count")?;
        let mut value_typicalities = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let fields = cursor.expect("Value")?;
            if fields.len() < 3 {
                return Err(cursor.error("truncated value record"));
            }
            value_typicalities.push(ValueTypicality {
                value: decode(fields[0])?,
                group: HdgNodeId::new(parse_field(&cursor, fields[1], "group index")?),
                typicality: parse_field(&cursor, fields[2], "typicality")?,
            });
        }

        attributes.push(HdgAttribute {
            name,
            attribute_type,
            min,
            max,
            initial_part_count,
            interest,
            nodes,
            root,
            value_typicalities,
        });
    }

    let cell_count: usize = cursor.expect_value("Cells", "cell count")?;
    let mut cells = Vec::with_capacity(cell_count);
    for _ in 0..cell_count {
        let fields = cursor.expect("Cell")?;
        if fields.len() < 1 + dimension_count {
            return Err(cursor.error("truncated cell record"));
        }
        cells.push(ReportCell {
            frequency: parse_field(&cursor, fields[0], "cell frequency")?,
            part_names: fields[1..1 + dimension_count]
                .iter()
                .map(|name| decode(name))
                .collect::<GrainResult<_>>()?,
        });
    }

    let report = HierarchicalDataGrid {
        short_description,
        null_cost,
        cost,
        initial_attribute_number,
        frequency_attribute_name,
        identifier_attribute_name,
        attributes,
        cells,
        total_frequency,
    };
    report.check_hierarchy()?;
    Ok(report)
}

/// Write `content` at `path` atomically: temporary file in the same
/// directory, then rename.
fn write_atomically(path: &Path, content: &[u8]) -> GrainResult<()> {
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temporary = match directory {
        Some(directory) => tempfile::NamedTempFile::new_in(directory)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    temporary.write_all(content)?;
    temporary.flush()?;
    temporary
        .persist(path)
        .map_err(|error| GrainError::Io(error.error))?;
    Ok(())
}

/// Report writer: `.khc` text plus the optional `.khcj` JSON twin.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    pub export_json: bool,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self { export_json: true }
    }
}

impl ReportWriter {
    pub fn write(&self, report: &HierarchicalDataGrid, path: &Path) -> GrainResult<()> {
        write_atomically(path, render_khc(report).as_bytes())?;
        if self.export_json {
            let json = serde_json::to_vec_pretty(report)
                .map_err(|error| GrainError::Other(format!("JSON serialization: {}", error)))?;
            write_atomically(&json_twin_path(path), &json)?;
        }
        Ok(())
    }
}

/// Read and parse a `.khc` report.
pub fn read_report(path: &Path) -> GrainResult<HierarchicalDataGrid> {
    let text = std::fs::read_to_string(path)?;
    parse_khc(&text)
}

/// Saves the anytime intermediate reports: each improvement writes a new
/// indexed file next to the target report and removes the previous one, so
/// at most one intermediate exists on disk at any time.
#[derive(Debug)]
pub struct AnytimeReportSaver {
    target: PathBuf,
    writer: ReportWriter,
    index: usize,
    last_saved: Option<PathBuf>,
}

impl AnytimeReportSaver {
    pub fn new(target: PathBuf, export_json: bool) -> Self {
        Self {
            target,
            writer: ReportWriter { export_json },
            index: 0,
            last_saved: None,
        }
    }

    /// Name of the `index`-th intermediate report.
    fn intermediate_path(&self, index: usize) -> PathBuf {
        let stem = self
            .target
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        self.target.with_file_name(format!("{}.{}.khc", stem, index))
    }

    /// Write the next intermediate report and drop the previous one.
    pub fn save_intermediate(&mut self, report: &HierarchicalDataGrid) -> GrainResult<PathBuf> {
        self.index += 1;
        let path = self.intermediate_path(self.index);
        self.writer.write(report, &path)?;
        self.remove_last_saved();
        self.last_saved = Some(path.clone());
        Ok(path)
    }

    /// Write the final report at the target path and drop the last
    /// intermediate.
    pub fn save_final(&mut self, report: &HierarchicalDataGrid) -> GrainResult<PathBuf> {
        self.writer.write(report, &self.target)?;
        self.remove_last_saved();
        Ok(self.target.clone())
    }

    pub fn last_saved(&self) -> Option<&Path> {
        self.last_saved.as_deref()
    }

    /// Remove the last saved intermediate, if any.
    pub fn remove_last_saved(&mut self) {
        if let Some(path) = self.last_saved.take() {
            let _ = std::fs::remove_file(&path);
            if self.writer.export_json {
                let _ = std::fs::remove_file(json_twin_path(&path));
            }
        }
    }
}
