//! Control-flow simplification over literal conditions.

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

use super::walk::{is_droppable, known_truth};

/// Structural simplification.
/// - `if` over a literal condition keeps only the taken branch.
/// - `for` over a literal false condition keeps only its init block.
/// - empty `if` bodies with a droppable condition and empty bare blocks
///   are removed.
pub(crate) fn run(dialect: &Dialect, code: &mut AstNode) -> bool {
    let mut changed = false;
    simplify_node(dialect, code, &mut changed);
    changed
}

fn simplify_node(dialect: &Dialect, node: &mut AstNode, changed: &mut bool) {
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            for stmt in statements.iter_mut() {
                simplify_node(dialect, stmt, changed);
            }
            let mut rewritten = Vec::with_capacity(statements.len());
            for stmt in statements.drain(..) {
                rewrite_statement(dialect, stmt, &mut rewritten, changed);
            }
            *statements = rewritten;
        }
        AstNodeKind::If {
            body, else_body, ..
        } => {
            simplify_node(dialect, body, changed);
            if let Some(else_body) = else_body {
                simplify_node(dialect, else_body, changed);
            }
        }
        AstNodeKind::For {
            init, post, body, ..
        } => {
            simplify_node(dialect, init, changed);
            simplify_node(dialect, post, changed);
            simplify_node(dialect, body, changed);
        }
        AstNodeKind::FunctionDef { body, .. } => simplify_node(dialect, body, changed),
        _ => {}
    }
}

enum Action {
    Keep,
    Drop,
    ReplaceWithBody,
    ReplaceWithElse,
    ReplaceWithInit,
}

fn rewrite_statement(
    dialect: &Dialect,
    stmt: AstNode,
    out: &mut Vec<AstNode>,
    changed: &mut bool,
) {
    let action = match stmt.get_kind() {
        AstNodeKind::If {
            condition,
            body,
            else_body,
        } => match known_truth(condition) {
            Some(true) => Action::ReplaceWithBody,
            Some(false) if else_body.is_some() => Action::ReplaceWithElse,
            Some(false) => Action::Drop,
            None if else_body.is_none()
                && is_empty_block(body)
                && is_droppable(dialect, condition) =>
            {
                Action::Drop
            }
            None => Action::Keep,
        },
        AstNodeKind::For { condition, .. } => match known_truth(condition) {
            Some(false) => Action::ReplaceWithInit,
            _ => Action::Keep,
        },
        AstNodeKind::Block { statements } if statements.is_empty() => Action::Drop,
        _ => Action::Keep,
    };

    match action {
        Action::Keep => out.push(stmt),
        Action::Drop => *changed = true,
        Action::ReplaceWithBody => {
            *changed = true;
            if let AstNodeKind::If { body, .. } = stmt.kind {
                out.push(*body);
            }
        }
        Action::ReplaceWithElse => {
            *changed = true;
            if let AstNodeKind::If {
                else_body: Some(else_body),
                ..
            } = stmt.kind
            {
                out.push(*else_body);
            }
        }
        Action::ReplaceWithInit => {
            *changed = true;
            if let AstNodeKind::For { init, .. } = stmt.kind {
                out.push(*init);
            }
        }
    }
}

fn is_empty_block(node: &AstNode) -> bool {
    matches!(node.get_kind(), AstNodeKind::Block { statements } if statements.is_empty())
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
    fn literal_if_keeps_only_the_taken_branch() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ if 1 { sstore(0, 1) } if 0 { sstore(0, 2) } }");
        assert!(run(d, &mut code));
        let printed = print_code(&code);
        assert!(printed.contains("sstore(0, 1)"));
        assert!(!printed.contains("sstore(0, 2)"));
    }

    #[test]
    fn false_if_falls_through_to_else() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ if 0 { sstore(0, 1) } else { sstore(0, 2) } }");
        assert!(run(d, &mut code));
        let printed = print_code(&code);
        assert!(!printed.contains("sstore(0, 1)"));
        assert!(printed.contains("sstore(0, 2)"));
    }

    #[test]
    fn false_for_keeps_its_init_block() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ for { let i := 1 sstore(0, i) } 0 { } { sstore(0, 9) } }");
        assert!(run(d, &mut code));
        let printed = print_code(&code);
        assert!(printed.contains("sstore(0, i)"));
        assert!(!printed.contains("sstore(0, 9)"));
    }

    #[test]
    fn empty_if_with_impure_condition_stays() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ if input(0) { } }");
        assert!(!run(d, &mut code));
        assert!(print_code(&code).contains("input(0)"));
    }
}
