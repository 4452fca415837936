use crate::error::Unimplemented;
use crate::location::{Location, Span};
use crate::reports::{self, Report};

/// Failure while turning a parse tree into AST or unit structures.
///
/// Ordinary faults carry a finished diagnostic. Unimplemented constructs
/// are kept apart so callers can decide how to surface them.
#[derive(Debug, Clone)]
pub enum BuildError {
    Report(Report),
    Unimplemented(Unimplemented),
}

impl BuildError {
    pub fn syntax(message: &str, location: Option<Location>, span: Option<Span>) -> Self {
        BuildError::Report(Report::error(
            message,
            location,
            span,
            Some(reports::E_SYNTAX),
            None,
            None,
        ))
    }

    pub fn limit(message: &str, location: Option<Location>, span: Option<Span>) -> Self {
        BuildError::Report(Report::error(
            message,
            location,
            span,
            Some(reports::E_LIMIT),
            None,
            None,
        ))
    }

    pub fn data(message: &str, location: Option<Location>, span: Option<Span>) -> Self {
        BuildError::Report(Report::error(
            message,
            location,
            span,
            Some(reports::E_DATA),
            None,
            None,
        ))
    }

    /// Collapse into a report for the collector.
    pub fn into_report(self) -> Report {
        match self {
            BuildError::Report(r) => r,
            BuildError::Unimplemented(u) => Report::error(
                &format!("unimplemented feature: {}", u.message),
                u.location,
                None,
                Some(reports::E_UNSUPPORTED),
                None,
                Some(vec!["unimplemented".to_string()]),
            ),
        }
    }
}

impl From<Report> for BuildError {
    fn from(r: Report) -> Self {
        BuildError::Report(r)
    }
}

impl From<Unimplemented> for BuildError {
    fn from(u: Unimplemented) -> Self {
        BuildError::Unimplemented(u)
    }
}
