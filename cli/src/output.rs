//! file: cli/src/output.rs
//! description: styled terminal output for the kiln CLI.
//!
//! Reports go to stderr with severity colouring so artifact bytes and
//! tables on stdout stay pipeable. Progress is only drawn for batches.

use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use kiln_core::{ReportCollector, Severity};

/// ====================================================================
/// Severity styling

pub struct OutputStyles {
    pub header: Style,
    pub fatal: Style,
    pub error: Style,
    pub warning: Style,
    pub info: Style,
    pub passed: Style,
    pub failed: Style,
}

impl Default for OutputStyles {
    fn default() -> Self {
        OutputStyles {
            header: Style::new().for_stderr().bold().underlined(),
            fatal: Style::new().for_stderr().red().bold(),
            error: Style::new().for_stderr().red(),
            warning: Style::new().for_stderr().yellow(),
            info: Style::new().for_stderr().cyan(),
            passed: Style::new().green().bold(),
            failed: Style::new().red().bold(),
        }
    }
}

impl OutputStyles {
    pub fn for_severity(&self, severity: Severity) -> &Style {
        match severity {
            Severity::Fatal => &self.fatal,
            Severity::Error => &self.error,
            Severity::Warning => &self.warning,
            Severity::Info => &self.info,
        }
    }
}

/// Print every report for one file to stderr, severity-coloured, with
/// the file name as a heading.
pub fn print_reports(file: &str, reports: &ReportCollector) {
    if reports.reports.is_empty() {
        return;
    }
    let styles = OutputStyles::default();
    eprintln!("{}", styles.header.apply_to(file));
    for report in &reports.reports {
        eprintln!("  {}", styles.for_severity(report.severity).apply_to(report));
    }
}

/// ====================================================================
/// Batch summary

pub struct SummaryRow {
    pub file: String,
    pub passed: bool,
    pub creation: Option<usize>,
    pub deployed: Option<usize>,
    pub errors: usize,
    pub warnings: usize,
}

/// Render the per-file results as a bordered table. `with_artifacts`
/// adds the byte columns, which `check` has nothing to put in.
pub fn summary_table(rows: &[SummaryRow], with_artifacts: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let columns: usize = if with_artifacts {
        table.set_header(vec![
            "file", "status", "creation", "deployed", "errors", "warnings",
        ]);
        6
    } else {
        table.set_header(vec!["file", "status", "errors", "warnings"]);
        4
    };
    for row in rows {
        let status = if row.passed { "passed" } else { "failed" };
        let mut cells = vec![row.file.clone(), status.to_string()];
        if with_artifacts {
            cells.push(byte_cell(row.creation));
            cells.push(byte_cell(row.deployed));
        }
        cells.push(row.errors.to_string());
        cells.push(row.warnings.to_string());
        table.add_row(cells);
    }
    for i in 2..columns {
        if let Some(column) = table.column_mut(i) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    table
}

fn byte_cell(bytes: Option<usize>) -> String {
    match bytes {
        Some(n) => format!("{} bytes", n),
        None => "-".to_string(),
    }
}

/// One-line batch verdict under the table.
pub fn tally_line(rows: &[SummaryRow]) -> String {
    let styles = OutputStyles::default();
    let passed = rows.iter().filter(|r| r.passed).count();
    let failed = rows.len() - passed;
    if failed == 0 {
        format!("{}", styles.passed.apply_to(format!("{} passed", passed)))
    } else {
        format!(
            "{}, {}",
            styles.passed.apply_to(format!("{} passed", passed)),
            styles.failed.apply_to(format!("{} failed", failed))
        )
    }
}

/// ====================================================================
/// Progress

/// A batch progress bar on stderr. Hidden for single files so plain
/// builds stay quiet.
pub fn progress_bar(total: u64) -> ProgressBar {
    if total <= 1 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("[{bar:30}] {pos}/{len} {msg}")
            .expect("static template parses")
            .progress_chars("=> "),
    );
    bar
}
