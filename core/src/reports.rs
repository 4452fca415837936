// Diagnostics for the compiler pipeline.
// A Report carries a message, a severity and an optional source location;
// the collector aggregates reports across parsing and analysis with
// dedupe, severity counts and JSON export.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use crate::location::{Location, Span};

/// Severity levels for reports, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        };
        write!(f, "{}", s)
    }
}

/// Stable error code for programmatic handling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// Create a new error code
    pub fn new(code: u32) -> Self {
        ErrorCode(code)
    }
    /// Get the code as a string
    pub fn as_str(&self) -> String {
        format!("E_{}", self.0)
    }
}

pub const E_NONE: ErrorCode = ErrorCode(0);
pub const E_IO: ErrorCode = ErrorCode(1);
pub const E_SYNTAX: ErrorCode = ErrorCode(2);
pub const E_TYPE: ErrorCode = ErrorCode(3);
pub const E_REFERENCE: ErrorCode = ErrorCode(4);
pub const E_UNSUPPORTED: ErrorCode = ErrorCode(5);
pub const E_LIMIT: ErrorCode = ErrorCode(6);
pub const E_DATA: ErrorCode = ErrorCode(7);
pub const E_INTERNAL: ErrorCode = ErrorCode(999);

/// A single diagnostic produced while parsing or analyzing a source.
///
/// The optional span pins the report to a byte range so a caret can be
/// rendered under the offending text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub message: String,
    pub severity: Severity,
    pub location: Option<Location>,
    pub span: Option<Span>,
    pub code: Option<ErrorCode>,
    pub suggestion: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl Report {
    /// Create a new report
    pub fn new(
        message: &str,
        severity: Severity,
        location: Option<Location>,
        span: Option<Span>,
        code: Option<ErrorCode>,
        suggestion: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Self {
        Report {
            message: message.to_string(),
            severity,
            location,
            span,
            code,
            suggestion,
            tags,
        }
    }

    pub fn info(
        message: &str,
        location: Option<Location>,
        span: Option<Span>,
        code: Option<ErrorCode>,
        suggestion: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Self {
        Report::new(
            message,
            Severity::Info,
            location,
            span,
            code,
            suggestion,
            tags,
        )
    }
    pub fn warning(
        message: &str,
        location: Option<Location>,
        span: Option<Span>,
        code: Option<ErrorCode>,
        suggestion: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Self {
        Report::new(
            message,
            Severity::Warning,
            location,
            span,
            code,
            suggestion,
            tags,
        )
    }
    pub fn error(
        message: &str,
        location: Option<Location>,
        span: Option<Span>,
        code: Option<ErrorCode>,
        suggestion: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Self {
        Report::new(
            message,
            Severity::Error,
            location,
            span,
            code,
            suggestion,
            tags,
        )
    }
    pub fn fatal(
        message: &str,
        location: Option<Location>,
        span: Option<Span>,
        code: Option<ErrorCode>,
        suggestion: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Self {
        Report::new(
            message,
            Severity::Fatal,
            location,
            span,
            code,
            suggestion,
            tags,
        )
    }

    // convenience conversion to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    // convert to a minimal LSP-like diagnostic (map structure)
    pub fn to_lsp_diagnostic(&self) -> serde_json::Value {
        let range = if let Some(loc) = &self.location {
            let width = self.span.map(|s| s.len()).unwrap_or(0);
            json!({
                "start": { "line": loc.line.saturating_sub(1), "character": loc.column.saturating_sub(1) },
                "end": { "line": loc.line.saturating_sub(1), "character": loc.column.saturating_sub(1) + width }
            })
        } else {
            json!(null)
        };
        json!({
            "severity": match self.severity {
                Severity::Fatal | Severity::Error => 1,
                Severity::Warning => 2,
                Severity::Info => 3,
            },
            "code": self.code.as_ref().map(|c| c.0),
            "source": "kiln",
            "message": self.message,
            "range": range,
        })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loc = if let Some(l) = &self.location {
            format!(" at {}:{}:{}", l.file, l.line, l.column)
        } else {
            "".to_string()
        };
        if let Some(code) = &self.code {
            write!(f, "[{}]{} ({}): {}", self.severity, loc, code, self.message)
        } else {
            write!(f, "[{}]{}: {}", self.severity, loc, self.message)
        }
    }
}

impl Error for Report {}

/// Collector that aggregates reports, supports dedupe, counts and exporting.
///
/// Duplicate reports (same message, code and location) are dropped so that
/// re-analysis of a shared subtree does not flood the output.
#[derive(Debug, Clone, Default)]
pub struct ReportCollector {
    pub reports: Vec<Report>,
    seen: HashSet<(String, Option<String>, Option<String>)>,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self {
            reports: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn push(&mut self, r: Report) {
        let key = (
            r.message.clone(),
            r.code.as_ref().map(|c| c.as_str()),
            r.location.as_ref().map(|l| l.to_string()),
        );
        if !self.seen.contains(&key) {
            self.seen.insert(key);
            self.reports.push(r);
        }
    }

    pub fn extend(&mut self, others: impl IntoIterator<Item = Report>) {
        for r in others {
            self.push(r);
        }
    }

    pub fn clear(&mut self) {
        self.reports.clear();
        self.seen.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.reports.iter().any(|r| r.severity == Severity::Fatal)
    }

    pub fn has_errors(&self) -> bool {
        self.reports.iter().any(|r| r.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.reports.iter().any(|r| r.severity == Severity::Warning)
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut f = 0;
        let mut e = 0;
        let mut w = 0;
        let mut i = 0;
        for r in &self.reports {
            match r.severity {
                Severity::Fatal => f += 1,
                Severity::Error => e += 1,
                Severity::Warning => w += 1,
                Severity::Info => i += 1,
            }
        }
        (f, e, w, i)
    }

    /// Exit code for driver use: 2 on fatals, 1 on errors, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        let (f, e, _, _) = self.counts();
        if f > 0 {
            2
        } else if e > 0 {
            1
        } else {
            0
        }
    }

    /// Render every report on its own line, in insertion order.
    pub fn format_all(&self) -> String {
        let mut out = String::new();
        for r in &self.reports {
            out.push_str(&r.to_string());
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.reports)
    }

    pub fn to_lsp_array(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        // group by file
        for r in &self.reports {
            let file = r
                .location
                .as_ref()
                .map(|l| l.file.clone())
                .unwrap_or_else(|| "<unknown>".to_string());
            let entry = map.entry(file).or_insert_with(|| json!([]));
            if let serde_json::Value::Array(arr) = entry {
                arr.push(r.to_lsp_diagnostic());
            }
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: usize, column: usize) -> Location {
        Location::new("test.gir".to_string(), line, column)
    }

    #[test]
    fn dedupe_drops_exact_repeats_only() {
        let mut collector = ReportCollector::new();
        collector.push(Report::error(
            "unknown identifier \"x\"",
            Some(loc(3, 7)),
            None,
            Some(E_REFERENCE),
            None,
            None,
        ));
        collector.push(Report::error(
            "unknown identifier \"x\"",
            Some(loc(3, 7)),
            None,
            Some(E_REFERENCE),
            None,
            None,
        ));
        collector.push(Report::error(
            "unknown identifier \"x\"",
            Some(loc(9, 2)),
            None,
            Some(E_REFERENCE),
            None,
            None,
        ));
        assert_eq!(collector.reports.len(), 2);
    }

    #[test]
    fn exit_code_ranks_fatal_over_error() {
        let mut collector = ReportCollector::new();
        assert_eq!(collector.exit_code(), 0);
        collector.push(Report::warning("slow path", None, None, None, None, None));
        assert_eq!(collector.exit_code(), 0);
        collector.push(Report::error("bad call", None, None, None, None, None));
        assert_eq!(collector.exit_code(), 1);
        collector.push(Report::fatal("stack corrupt", None, None, None, None, None));
        assert_eq!(collector.exit_code(), 2);
    }

    #[test]
    fn counts_split_by_severity() {
        let mut collector = ReportCollector::new();
        collector.push(Report::info("a", None, None, None, None, None));
        collector.push(Report::info("b", None, None, None, None, None));
        collector.push(Report::warning("c", None, None, None, None, None));
        let (f, e, w, i) = collector.counts();
        assert_eq!((f, e, w, i), (0, 0, 1, 2));
    }
}
