//! Unused-definition pruning.

use std::collections::BTreeSet;

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

use super::walk::{count_names, is_droppable, visit, NameCounts};

/// Removes definitions nothing reads: variables that are never read and
/// whose initializer and assignments are all droppable, and functions
/// that are never called. Runs to a fixed point, so definitions that
/// only kept each other alive go in later rounds.
pub(crate) fn run(dialect: &Dialect, code: &mut AstNode, external_names: &BTreeSet<String>) -> bool {
    let mut changed = false;
    loop {
        let counts = count_names(code);
        let victims = collect_victims(dialect, code, &counts, external_names);
        if victims.is_empty() {
            break;
        }
        remove_victims(code, &victims);
        changed = true;
    }
    changed
}

fn collect_victims(
    dialect: &Dialect,
    code: &AstNode,
    counts: &NameCounts,
    external_names: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut victims = BTreeSet::new();
    // A name stays pinned when any of its definition or write sites
    // cannot be dropped. Removal is all-or-nothing per name.
    let mut pinned = BTreeSet::new();
    visit(code, &mut |node| match node.get_kind() {
        AstNodeKind::VarDecl { name, value } => {
            let droppable = value
                .as_ref()
                .is_none_or(|value| is_droppable(dialect, value));
            if counts.read_count(&name.name) == 0
                && droppable
                && !external_names.contains(&name.name)
            {
                victims.insert(name.name.clone());
            } else {
                pinned.insert(name.name.clone());
            }
        }
        AstNodeKind::Assignment { name, value } => {
            if !is_droppable(dialect, value) {
                pinned.insert(name.clone());
            }
        }
        AstNodeKind::FunctionDef { name, ret, .. } => {
            if counts.call_count(name) == 0 && !external_names.contains(name) {
                victims.insert(name.clone());
            } else {
                pinned.insert(name.clone());
            }
            // A return variable is observable without a read, through the
            // call's value. Writes to its name must survive even when a
            // same-named variable elsewhere is dead.
            if let Some(ret) = ret {
                pinned.insert(ret.name.clone());
            }
        }
        _ => {}
    });
    victims.retain(|name| !pinned.contains(name));
    victims
}

fn remove_victims(node: &mut AstNode, victims: &BTreeSet<String>) {
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            statements.retain(|stmt| match stmt.get_kind() {
                AstNodeKind::VarDecl { name, .. } => !victims.contains(&name.name),
                AstNodeKind::Assignment { name, .. } => !victims.contains(name),
                AstNodeKind::FunctionDef { name, .. } => !victims.contains(name),
                _ => true,
            });
            for stmt in statements.iter_mut() {
                remove_victims(stmt, victims);
            }
        }
        AstNodeKind::If {
            body, else_body, ..
        } => {
            remove_victims(body, victims);
            if let Some(else_body) = else_body {
                remove_victims(else_body, victims);
            }
        }
        AstNodeKind::For {
            init, post, body, ..
        } => {
            remove_victims(init, victims);
            remove_victims(post, victims);
            remove_victims(body, victims);
        }
        AstNodeKind::FunctionDef { body, .. } => remove_victims(body, victims),
        _ => {}
    }
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
    fn drops_unread_variables_and_their_writes() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := 1 x := add(x, 1) sstore(0, 7) }");
        // `x := add(x, 1)` reads x, so nothing goes yet; drop the read
        // variant instead
        assert!(!run(d, &mut code, &BTreeSet::new()));

        let mut code = parse_code("{ let x := 1 x := 2 sstore(0, 7) }");
        assert!(run(d, &mut code, &BTreeSet::new()));
        assert_eq!(print_code(&code), "{\n    sstore(0, 7)\n}");
    }

    #[test]
    fn keeps_declarations_with_effectful_initializers() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := input(0) }");
        assert!(!run(d, &mut code, &BTreeSet::new()));
        assert!(print_code(&code).contains("input(0)"));
    }

    #[test]
    fn uncalled_function_chains_unravel() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code(
            "{ fn helper() -> r { r := 1 } fn outer() -> r { r := helper() } sstore(0, 1) }",
        );
        assert!(run(d, &mut code, &BTreeSet::new()));
        let printed = print_code(&code);
        assert!(!printed.contains("helper"));
        assert!(!printed.contains("outer"));
    }

    #[test]
    fn return_variable_writes_survive_name_collisions() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code =
            parse_code("{ fn f() -> r { r := 1 } sstore(0, f()) let r := 5 }");
        assert!(!run(d, &mut code, &BTreeSet::new()));
        assert!(print_code(&code).contains("r := 1"));
    }

    #[test]
    fn external_names_are_never_pruned() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ fn hook() -> r { r := 1 } sstore(0, 1) }");
        let external: BTreeSet<String> = ["hook".to_string()].into_iter().collect();
        assert!(!run(d, &mut code, &external));
        assert!(print_code(&code).contains("fn hook()"));
    }
}
