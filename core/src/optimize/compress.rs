//! Frame-slot compression.

use std::collections::BTreeSet;

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

use super::fuel::FuelMeter;
use super::walk::{count_names, is_movable, visit, visit_mut, NameCounts};
use super::{joiner, prune};

/// Fuel ceiling for recomputing a value instead of holding it in a
/// frame slot.
pub(crate) const REJOIN_FUEL_LIMIT: u64 = 40;

/// Frees frame slots ahead of stack allocation. Single-use values are
/// joined into their use site, unread ones pruned, and multi-use
/// movable values rematerialized at every read when recomputation is
/// cheap enough under the unit's throughput weight. The pass never
/// introduces memory traffic, so it is safe in trees that observe
/// `memtop`.
pub(crate) fn run(
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    code: &mut AstNode,
    throughput: Option<u64>,
    external_names: &BTreeSet<String>,
) -> bool {
    let mut changed = joiner::run(dialect, code);
    changed |= prune::run(dialect, code, external_names);

    let counts = count_names(code);
    let mut remat = false;
    rematerialize_node(
        dialect,
        meter,
        &counts,
        throughput,
        external_names,
        code,
        &mut remat,
    );
    changed | remat
}

fn rematerialize_node(
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    counts: &NameCounts,
    throughput: Option<u64>,
    external_names: &BTreeSet<String>,
    node: &mut AstNode,
    changed: &mut bool,
) {
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            rematerialize_block(
                dialect,
                meter,
                counts,
                throughput,
                external_names,
                statements,
                changed,
            );
        }
        AstNodeKind::If {
            body, else_body, ..
        } => {
            rematerialize_node(dialect, meter, counts, throughput, external_names, body, changed);
            if let Some(else_body) = else_body {
                rematerialize_node(
                    dialect,
                    meter,
                    counts,
                    throughput,
                    external_names,
                    else_body,
                    changed,
                );
            }
        }
        AstNodeKind::For {
            init, post, body, ..
        } => {
            rematerialize_node(dialect, meter, counts, throughput, external_names, init, changed);
            rematerialize_node(dialect, meter, counts, throughput, external_names, post, changed);
            rematerialize_node(dialect, meter, counts, throughput, external_names, body, changed);
        }
        AstNodeKind::FunctionDef { body, .. } => {
            rematerialize_node(dialect, meter, counts, throughput, external_names, body, changed);
        }
        _ => {}
    }
}

fn rematerialize_block(
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    counts: &NameCounts,
    throughput: Option<u64>,
    external_names: &BTreeSet<String>,
    statements: &mut Vec<AstNode>,
    changed: &mut bool,
) {
    let mut i = 0;
    while i < statements.len() {
        let candidate = match statements[i].get_kind() {
            AstNodeKind::VarDecl {
                name,
                value: Some(value),
            } => {
                if counts.write_count(&name.name) == 0
                    && !external_names.contains(&name.name)
                    && is_movable(dialect, value)
                    && stable_inputs(counts, value)
                    && cheap_enough(meter, value, throughput)
                {
                    Some(name.name.clone())
                } else {
                    None
                }
            }
            _ => None,
        };

        if let Some(name) = candidate {
            let decl = statements.remove(i);
            let AstNodeKind::VarDecl {
                value: Some(value), ..
            } = decl.kind
            else {
                unreachable!("rematerialized statement is a declaration with a value");
            };
            // shadowing is refused at analysis, so every later read of
            // the name inside this block region is ours
            for later in statements[i..].iter_mut() {
                substitute_reads(later, &name, &value);
            }
            *changed = true;
            continue;
        }

        rematerialize_node(
            dialect,
            meter,
            counts,
            throughput,
            external_names,
            &mut statements[i],
            changed,
        );
        i += 1;
    }
}

/// The value's own inputs must never be reassigned, or copies at later
/// read sites would see a different state.
fn stable_inputs(counts: &NameCounts, value: &AstNode) -> bool {
    let mut stable = true;
    visit(value, &mut |node| {
        if let AstNodeKind::Identifier { name } = node.get_kind() {
            if counts.write_count(name) != 0 {
                stable = false;
            }
        }
    });
    stable
}

fn cheap_enough(meter: Option<&FuelMeter>, value: &AstNode, throughput: Option<u64>) -> bool {
    // a literal or plain alias always wins the slot back
    if matches!(
        value.get_kind(),
        AstNodeKind::Number { .. } | AstNodeKind::Bool { .. } | AstNodeKind::Identifier { .. }
    ) {
        return true;
    }
    match meter {
        Some(meter) => meter.run_fuel(value) * throughput.unwrap_or(1) <= REJOIN_FUEL_LIMIT,
        // uncosted dialects rematerialize only trivial values
        None => false,
    }
}

fn substitute_reads(stmt: &mut AstNode, name: &str, value: &AstNode) {
    visit_mut(stmt, &mut |node| {
        if matches!(node.get_kind(), AstNodeKind::Identifier { name: read } if read == name) {
            *node = value.clone();
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;
    use crate::dialect::{dialect, KilnVersion, Language};
    use crate::printer::print_code;
    use crate::reports::ReportCollector;
    use crate::source::Source;

    fn parse_code(text: &str) -> AstNode {
        let source = Source::new("opt.gir", text);
        let mut reports = ReportCollector::new();
        let unit = parse_program(&source, &mut reports).expect("fixture parses");
        assert!(!reports.has_errors(), "{}", reports.format_all());
        unit.code.expect("fixture has code")
    }

    #[test]
    fn literal_slots_are_always_rematerialized() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := 5 sstore(0, x) sstore(1, x) }");
        assert!(run(d, None, &mut code, None, &BTreeSet::new()));
        let printed = print_code(&code);
        assert!(!printed.contains("let x"));
        assert!(printed.contains("sstore(0, 5)"));
        assert!(printed.contains("sstore(1, 5)"));
    }

    #[test]
    fn throughput_weight_blocks_expensive_rejoins() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let creation_meter = FuelMeter::new(d, true, 100);
        let deployed_meter = FuelMeter::new(d, false, 100);

        // add(a, 1) costs 2 + 3 + 2 = 7 fuel to recompute
        let text =
            "{ let a := input(0) let x := add(a, 1) sstore(0, x) sstore(1, x) sstore(2, a) }";

        let mut code = parse_code(text);
        assert!(run(d, Some(&creation_meter), &mut code, None, &BTreeSet::new()));
        assert!(!print_code(&code).contains("let x"));

        let mut code = parse_code(text);
        assert!(!run(
            d,
            Some(&deployed_meter),
            &mut code,
            Some(100),
            &BTreeSet::new()
        ));
        assert!(print_code(&code).contains("let x := add(a, 1)"));
    }

    #[test]
    fn reassigned_inputs_pin_their_dependents() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code(
            "{ let a := 1 let x := add(a, 1) a := 2 sstore(0, x) sstore(1, x) }",
        );
        // `a` is written, so neither `a` nor `x` may be rematerialized
        assert!(!run(d, None, &mut code, None, &BTreeSet::new()));
        let printed = print_code(&code);
        assert!(printed.contains("let a := 1"));
        assert!(printed.contains("let x := add(a, 1)"));
    }

    #[test]
    fn scoped_duplicates_stay_in_their_blocks() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ { let t := 1 sstore(0, t) } { let t := 2 sstore(0, t) } }");
        assert!(run(d, None, &mut code, None, &BTreeSet::new()));
        let printed = print_code(&code);
        assert!(printed.contains("sstore(0, 1)"));
        assert!(printed.contains("sstore(0, 2)"));
    }
}
