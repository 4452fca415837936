//! Unreachable-statement elimination.

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

/// Removes statements that can never execute: everything in a block
/// after a statement that diverts control flow. Function definitions
/// are hoisted and stay callable from earlier statements, so they
/// survive the cut.
pub(crate) fn run(dialect: &Dialect, code: &mut AstNode) -> bool {
    let mut changed = false;
    prune_node(dialect, code, &mut changed);
    changed
}

fn prune_node(dialect: &Dialect, node: &mut AstNode, changed: &mut bool) {
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            for stmt in statements.iter_mut() {
                prune_node(dialect, stmt, changed);
            }
            if let Some(cut) = statements.iter().position(|stmt| terminates(dialect, stmt)) {
                if cut + 1 < statements.len() {
                    let tail = statements.split_off(cut + 1);
                    let tail_len = tail.len();
                    let kept: Vec<AstNode> = tail
                        .into_iter()
                        .filter(|stmt| matches!(stmt.get_kind(), AstNodeKind::FunctionDef { .. }))
                        .collect();
                    if kept.len() < tail_len {
                        *changed = true;
                    }
                    statements.extend(kept);
                }
            }
        }
        AstNodeKind::If {
            body, else_body, ..
        } => {
            prune_node(dialect, body, changed);
            if let Some(else_body) = else_body {
                prune_node(dialect, else_body, changed);
            }
        }
        AstNodeKind::For {
            init, post, body, ..
        } => {
            prune_node(dialect, init, changed);
            prune_node(dialect, post, changed);
            prune_node(dialect, body, changed);
        }
        AstNodeKind::FunctionDef { body, .. } => prune_node(dialect, body, changed),
        _ => {}
    }
}

/// Whether execution never continues past the statement.
fn terminates(dialect: &Dialect, stmt: &AstNode) -> bool {
    match stmt.get_kind() {
        AstNodeKind::Break | AstNodeKind::Continue | AstNodeKind::Leave => true,
        AstNodeKind::ExprStatement { expr } => match expr.get_kind() {
            AstNodeKind::Call { name, .. } => {
                dialect.builtin(name).is_some_and(|builtin| builtin.terminates)
            }
            _ => false,
        },
        AstNodeKind::Block { statements } => {
            statements.iter().any(|inner| terminates(dialect, inner))
        }
        AstNodeKind::If {
            body,
            else_body: Some(else_body),
            ..
        } => terminates(dialect, body) && terminates(dialect, else_body),
        _ => false,
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
    fn drops_statements_after_stop() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ sstore(0, 1) stop() sstore(0, 2) }");
        assert!(run(d, &mut code));
        let printed = print_code(&code);
        assert!(printed.contains("sstore(0, 1)"));
        assert!(!printed.contains("sstore(0, 2)"));
    }

    #[test]
    fn keeps_function_definitions_behind_the_cut() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code =
            parse_code("{ sstore(0, f()) stop() sstore(0, 9) fn f() -> r { r := 1 } }");
        assert!(run(d, &mut code));
        let printed = print_code(&code);
        assert!(printed.contains("fn f()"));
        assert!(!printed.contains("sstore(0, 9)"));
    }

    #[test]
    fn break_cuts_loop_bodies() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ for { } 1 { } { break sstore(0, 3) } }");
        assert!(run(d, &mut code));
        assert!(!print_code(&code).contains("sstore(0, 3)"));
    }

    #[test]
    fn an_if_terminating_on_both_arms_counts() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code =
            parse_code("{ if input(0) { stop() } else { abort(1) } sstore(0, 4) }");
        assert!(run(d, &mut code));
        assert!(!print_code(&code).contains("sstore(0, 4)"));
    }
}
