//! file: core/src/codegen/mod.rs
//! description: code generation from analyzed unit trees.
//!
//! `compile_unit` lowers a unit and its children into an [`Assembly`]
//! tree mirroring the unit tree. Encoding to bytes, reference patching
//! and source maps live in [`asm`].

pub mod asm;
mod transform;

use std::sync::Arc;

use log::debug;

use crate::dialect::Dialect;
use crate::error::CodegenError;
use crate::object::{SubNode, Unit};

pub use asm::{Assembly, AsmItem, AsmOp, LinkedBinary, SubAssembly, UnresolvedRef};

/// Local slots available to one call frame.
pub const FRAME_SLOTS: usize = 256;

/// Lower an analyzed unit tree to its assembly tree.
///
/// `container` seals the outermost artifact; it is passed down so that
/// lowering can refuse constructs a sealed container cannot carry.
/// Variables beyond the frame move to scratch memory only when
/// `optimize` is set and the code never observes the memory frontier.
pub fn compile_unit(
    unit: &Unit,
    dialect: &'static Dialect,
    optimize: bool,
    container: Option<u8>,
) -> Result<Assembly, CodegenError> {
    let info = unit.analysis_info.as_ref().unwrap_or_else(|| {
        panic!(
            "unit \"{}\" reached code generation without analysis",
            unit.name
        )
    });
    let mut assembly = Assembly::new(&unit.name);
    if let Some(code) = &unit.code {
        let spill = optimize && !crate::optimize::contains_memtop(dialect, code);
        assembly.items = transform::transform(
            code,
            dialect,
            info,
            &unit.name,
            optimize,
            spill,
            container,
        )?;
        let removed = asm::peephole(&mut assembly.items);
        if removed > 0 {
            debug!(
                "peephole removed {} items from unit \"{}\"",
                removed, unit.name
            );
        }
    }
    for sub in &unit.subs {
        match sub {
            SubNode::Unit(inner) => {
                let compiled = compile_unit(inner, dialect, optimize, container)?;
                assembly.subs.push(SubAssembly::Unit(Arc::new(compiled)));
            }
            SubNode::Data(data) => {
                assembly.subs.push(SubAssembly::Data {
                    name: data.name.clone(),
                    contents: data.contents.clone(),
                });
            }
        }
    }
    Ok(assembly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_code;
    use crate::ast::parse_program;
    use crate::dialect::{dialect, KilnVersion, Language};
    use crate::reports::ReportCollector;
    use crate::source::Source;

    fn analyzed_unit(text: &str) -> Unit {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let source = Source::new("codegen.gir", text);
        let mut reports = ReportCollector::new();
        let mut unit = parse_program(&source, &mut reports).expect("fixture parses");
        assert!(!reports.has_errors(), "{}", reports.format_all());
        analyze_tree(&mut unit, d, &mut reports);
        assert!(!reports.has_errors(), "{}", reports.format_all());
        unit
    }

    fn analyze_tree(unit: &mut Unit, d: &'static Dialect, reports: &mut ReportCollector) {
        for sub in unit.sub_units_mut() {
            analyze_tree(sub, d, reports);
        }
        let names = unit.qualified_data_names();
        if let Some(code) = &unit.code {
            let (info, ok) =
                analyze_code(code, d, &names, reports).expect("fixture needs no unimplemented features");
            assert!(ok, "{}", reports.format_all());
            unit.analysis_info = Some(info);
        }
    }

    #[test]
    fn the_assembly_tree_mirrors_the_unit_tree() {
        let unit = analyzed_unit(
            "unit \"boot\" { code { sstore(0, dataoffset(\"app\")) } unit \"app\" { code { stop() } } data \"table\" hex\"0102\" }",
        );
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let assembly = compile_unit(&unit, d, false, None).expect("compiles");
        assert_eq!(assembly.name, "boot");
        let names: Vec<&str> = assembly.subs.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["app", "table"]);
        let SubAssembly::Data { contents, .. } = &assembly.subs[1] else {
            panic!("expected a data region");
        };
        assert_eq!(contents, &vec![0x01, 0x02]);
    }

    #[test]
    fn data_regions_are_addressable_in_the_encoded_binary() {
        let unit = analyzed_unit(
            "unit \"boot\" { code { sstore(dataoffset(\"table\"), datasize(\"table\")) } data \"table\" hex\"aabbcc\" }",
        );
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let assembly = compile_unit(&unit, d, false, None).expect("compiles");
        let binary = assembly.assemble(None).expect("assembles");
        assert!(binary.unresolved_refs.is_empty());
        // The data region sits at the end of the binary.
        let offset = binary.bytecode.len() - 3;
        assert_eq!(&binary.bytecode[offset..], &[0xaa, 0xbb, 0xcc]);
        assert_eq!(
            &binary.bytecode[1..5],
            &(offset as u32).to_le_bytes(),
            "dataoffset must resolve to the region start"
        );
        assert_eq!(
            &binary.bytecode[6..10],
            &3u32.to_le_bytes(),
            "datasize must resolve to the region length"
        );
    }

    #[test]
    fn double_negation_collapses_before_a_branch() {
        // `if iszero(x)` lowers to two iszero ops feeding the branch.
        // The window pass runs for both transforms and folds them away.
        let unit = analyzed_unit("{ let x := 1 if iszero(x) { sstore(0, 1) } }");
        let d = dialect(Language::Assembly, KilnVersion::latest());
        for optimize in [false, true] {
            let assembly = compile_unit(&unit, d, optimize, None).expect("compiles");
            assert!(
                !assembly.items.iter().any(|item| item.op == AsmOp::IsZero),
                "iszero pair should fold in {:?}",
                assembly.items
            );
            assert!(
                assembly
                    .items
                    .iter()
                    .any(|item| matches!(item.op, AsmOp::JumpIf(_)))
            );
        }
    }

    #[test]
    #[should_panic(expected = "without analysis")]
    fn unanalyzed_units_are_a_contract_violation() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let source = Source::new("codegen.gir", "{ stop() }");
        let mut reports = ReportCollector::new();
        let unit = parse_program(&source, &mut reports).expect("fixture parses");
        let _ = compile_unit(&unit, d, false, None);
    }
}
