pub mod analyzer;
pub mod symbol;
pub mod table;

use std::collections::{BTreeSet, HashMap};

use crate::ast::{AstNode, TypedName};
use crate::dialect::Dialect;
use crate::error::Unimplemented;
use crate::reports::ReportCollector;

pub use analyzer::Analyzer;

/// Signature of a user-defined function, as lowering needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub params: Vec<TypedName>,
    pub ret: Option<TypedName>,
}

/// The analyzer's product: everything lowering wants to know about a
/// code body beyond the tree itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisInfo {
    pub functions: HashMap<String, FunctionSignature>,
}

/// Analyze one code body against a dialect and the data names visible to
/// it. Diagnostics land in the collector; the flag tells whether the
/// body passed without errors. An `Err` means the body uses a construct
/// no later stage can handle in this dialect.
pub fn analyze_code(
    code: &AstNode,
    dialect: &'static Dialect,
    data_names: &BTreeSet<String>,
    reports: &mut ReportCollector,
) -> Result<(AnalysisInfo, bool), Unimplemented> {
    Analyzer::new(dialect, data_names, reports).analyze(code)
}
