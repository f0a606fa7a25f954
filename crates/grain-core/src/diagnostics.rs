//! Diagnostics infrastructure for tracking issues during operations.
//!
//! This module provides a common interface for collecting warnings and errors
//! during data reading, validation and optimization. It supports:
//!
//! - Severity levels (Warning, Error)
//! - Categories for grouping issues (parse, frequency, row, resource, ...)
//! - Optional entity references (e.g., "age", "row 15032")
//! - Optional line numbers for file-based operations
//! - Serialization for JSON report output
//! - A per-category flow-control gate that suppresses repeated warnings
//!   beyond a threshold while still counting them
//!
//! # Example
//!
//! ```
//! use grain_core::diagnostics::{Diagnostics, Severity};
//!
//! let mut diag = Diagnostics::new();
//!
//! diag.add_warning("row", "field count mismatch, record skipped");
//! diag.add_error_with_entity("spec", "unknown variable", "Wage");
//!
//! assert_eq!(diag.warning_count(), 1);
//! assert_eq!(diag.error_count(), 1);
//! ```

use hashbrown::HashMap;
use serde::Serialize;

/// Maximum recorded warnings per category before the gate closes.
pub const DEFAULT_WARNING_GATE: usize = 20;

/// Severity level for diagnostic issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unusual but operation continued (e.g., skipped row, rounded weight)
    Warning,
    /// Could not complete the operation (e.g., malformed dictionary)
    Error,
}

/// A single diagnostic issue encountered during an operation
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    /// Severity of the issue
    pub severity: Severity,
    /// Category for grouping (e.g., "parse", "row", "frequency", "resource")
    pub category: String,
    /// Human-readable description of the issue
    pub message: String,
    /// Optional line number (for file-based operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Optional entity reference (e.g., an attribute or part name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    /// Create a new diagnostic issue
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            line: None,
            entity: None,
        }
    }

    /// Add line number to the issue
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Add entity reference to the issue
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };

        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;

        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        if let Some(line) = self.line {
            write!(f, " at line {}", line)?;
        }

        Ok(())
    }
}

/// Collection of diagnostic issues for an operation
///
/// Primary container for warnings and errors raised while reading data and
/// optimizing. Warnings pass through a per-category gate: once a category has
/// recorded [`DEFAULT_WARNING_GATE`] warnings, further ones are only counted.
/// Errors are never gated.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// All recorded issues
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
    /// Warnings observed per category, including suppressed ones
    pub warning_totals: HashMap<String, usize>,
    #[serde(skip)]
    gate: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::with_gate(DEFAULT_WARNING_GATE)
    }

    /// A diagnostics container with a custom per-category warning cap.
    pub fn with_gate(gate: usize) -> Self {
        Self {
            issues: Vec::new(),
            warning_totals: HashMap::new(),
            gate,
        }
    }

    pub fn add(&mut self, issue: DiagnosticIssue) {
        if issue.severity == Severity::Warning {
            let total = self
                .warning_totals
                .entry(issue.category.clone())
                .or_insert(0);
            *total += 1;
            if *total > self.gate {
                return;
            }
        }
        self.issues.push(issue);
    }

    pub fn add_warning(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.add(DiagnosticIssue::new(Severity::Warning, category, message));
    }

    pub fn add_warning_at_line(
        &mut self,
        category: impl Into<String>,
        message: impl Into<String>,
        line: usize,
    ) {
        self.add(DiagnosticIssue::new(Severity::Warning, category, message).with_line(line));
    }

    pub fn add_error(&mut self, category: impl Into<String>, message: impl Into<String>) {
        self.add(DiagnosticIssue::new(Severity::Error, category, message));
    }

    pub fn add_error_with_entity(
        &mut self,
        category: impl Into<String>,
        message: impl Into<String>,
        entity: impl Into<String>,
    ) {
        self.add(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
    }

    /// Recorded warnings (suppressed ones are not included).
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    /// Warnings observed, including those suppressed by the gate.
    pub fn total_warning_count(&self) -> usize {
        self.warning_totals.values().sum()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Merge another collection into this one. Warning totals were already
    /// counted on the other side, so its recorded issues move over as-is.
    pub fn extend(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
        for (category, count) in other.warning_totals {
            *self.warning_totals.entry(category).or_insert(0) += count;
        }
    }

    /// Render all issues, one per line, for the error log file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for issue in &self.issues {
            out.push_str(&issue.to_string());
            out.push('\n');
        }
        for (category, total) in {
            let mut cats: Vec<_> = self.warning_totals.iter().collect();
            cats.sort();
            cats
        } {
            let recorded = self
                .issues
                .iter()
                .filter(|i| i.severity == Severity::Warning && &i.category == category)
                .count();
            if *total > recorded {
                out.push_str(&format!(
                    "[warning:{}] {} further warnings suppressed\n",
                    category,
                    total - recorded
                ));
            }
        }
        out
    }
}
