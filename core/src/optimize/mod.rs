//! file: core/src/optimize/mod.rs
//! description: the transformation stage.
//!
//! Passes rewrite a unit's code body in place and report whether they
//! changed anything. `suite` interprets step sequences over the passes,
//! `fuel` prices rewrites so size/speed trades depend on whether the
//! unit deploys as creation or deployed code.

mod compress;
mod dce;
mod fold;
pub mod fuel;
mod joiner;
mod prune;
mod simplify;
pub mod suite;
mod walk;

pub use fuel::FuelMeter;
pub use suite::{Suite, DEFAULT_CLEANUP_STEPS, DEFAULT_STEPS};

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;
use crate::object::Unit;

/// True when the code observes the memory frontier, either directly
/// through `memtop` or through `raw` bytes that could do anything.
/// Rewrites that change allocation order are unsound in that case.
pub fn contains_memtop(dialect: &Dialect, code: &AstNode) -> bool {
    let mut found = false;
    walk::visit(code, &mut |node| {
        if let AstNodeKind::Call { name, .. } = &node.kind {
            if (name == "memtop" || name == "raw") && dialect.builtin(name).is_some() {
                found = true;
            }
        }
    });
    found
}

/// [`contains_memtop`] over a whole unit tree.
pub fn unit_contains_memtop(dialect: &Dialect, unit: &Unit) -> bool {
    if let Some(code) = &unit.code {
        if contains_memtop(dialect, code) {
            return true;
        }
    }
    unit.sub_units().any(|sub| unit_contains_memtop(dialect, sub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;
    use crate::dialect::{dialect, KilnVersion, Language};
    use crate::reports::ReportCollector;
    use crate::source::Source;

    fn parse_unit(text: &str) -> Unit {
        let source = Source::new("opt.gir", text);
        let mut reports = ReportCollector::new();
        let unit = parse_program(&source, &mut reports).expect("fixture parses");
        assert!(!reports.has_errors(), "{}", reports.format_all());
        unit
    }

    #[test]
    fn memtop_is_found_in_nested_code() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let unit = parse_unit("{ if lt(0, 1) { let m := memtop() sstore(0, m) } }");
        assert!(unit_contains_memtop(d, &unit));
    }

    #[test]
    fn raw_bytes_count_as_observing_memory() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let unit = parse_unit("{ raw(\"00\") }");
        assert!(unit_contains_memtop(d, &unit));
    }

    #[test]
    fn plain_code_does_not() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let unit = parse_unit("{ let m := mload(0) sstore(0, m) }");
        assert!(!unit_contains_memtop(d, &unit));
    }

    #[test]
    fn sub_units_are_scanned() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let unit = parse_unit(
            "unit \"outer\" { code { sstore(0, 1) } unit \"inner\" { code { sstore(0, memtop()) } } }",
        );
        assert!(unit_contains_memtop(d, &unit));
        let clean =
            parse_unit("unit \"outer\" { code { sstore(0, 1) } unit \"inner\" { code { stop() } } }");
        assert!(!unit_contains_memtop(d, &clean));
    }
}
