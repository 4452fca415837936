//! Single-use variable inlining.

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

use super::walk::{count_names, is_droppable, is_movable, NameCounts};

/// Inlines `let x := e` into the statement immediately following it
/// when `x` has exactly one read, no writes, and that read sits in the
/// next statement's leading expression. Evaluation order is preserved:
/// the read must come first in evaluation order, or `e` must commute
/// with everything evaluated ahead of it.
pub(crate) fn run(dialect: &Dialect, code: &mut AstNode) -> bool {
    let counts = count_names(code);
    let mut changed = false;
    join_in_node(dialect, &counts, code, &mut changed);
    changed
}

fn join_in_node(dialect: &Dialect, counts: &NameCounts, node: &mut AstNode, changed: &mut bool) {
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            for stmt in statements.iter_mut() {
                join_in_node(dialect, counts, stmt, changed);
            }
            let mut i = 0;
            while i + 1 < statements.len() {
                if try_join_pair(dialect, counts, statements, i) {
                    *changed = true;
                    // the joined statement now sits at i and may join
                    // with its own successor
                    continue;
                }
                i += 1;
            }
        }
        AstNodeKind::If {
            body, else_body, ..
        } => {
            join_in_node(dialect, counts, body, changed);
            if let Some(else_body) = else_body {
                join_in_node(dialect, counts, else_body, changed);
            }
        }
        AstNodeKind::For {
            init, post, body, ..
        } => {
            join_in_node(dialect, counts, init, changed);
            join_in_node(dialect, counts, post, changed);
            join_in_node(dialect, counts, body, changed);
        }
        AstNodeKind::FunctionDef { body, .. } => join_in_node(dialect, counts, body, changed),
        _ => {}
    }
}

fn try_join_pair(
    dialect: &Dialect,
    counts: &NameCounts,
    statements: &mut Vec<AstNode>,
    i: usize,
) -> bool {
    let (name, value_movable, value_droppable) = match statements[i].get_kind() {
        AstNodeKind::VarDecl {
            name,
            value: Some(value),
        } => {
            if counts.read_count(&name.name) != 1 || counts.write_count(&name.name) != 0 {
                return false;
            }
            (
                name.name.clone(),
                is_movable(dialect, value),
                is_droppable(dialect, value),
            )
        }
        _ => return false,
    };

    let Some(target) = joinable_expression(&statements[i + 1]) else {
        return false;
    };
    if join_allowed(dialect, target, &name, value_movable, value_droppable) != Some(true) {
        return false;
    }

    let decl = statements.remove(i);
    let AstNodeKind::VarDecl {
        value: Some(value), ..
    } = decl.kind
    else {
        unreachable!("joined statement is a declaration with a value");
    };
    if let Some(target) = joinable_expression_mut(&mut statements[i]) {
        let mut value = Some(*value);
        replace_single_read(target, &name, &mut value);
    }
    true
}

/// The expression a statement evaluates first, if joining into it keeps
/// the original ordering. A `for` condition re-evaluates per iteration
/// and never qualifies.
fn joinable_expression(stmt: &AstNode) -> Option<&AstNode> {
    match stmt.get_kind() {
        AstNodeKind::ExprStatement { expr } => Some(expr),
        AstNodeKind::VarDecl {
            value: Some(value), ..
        } => Some(value),
        AstNodeKind::Assignment { value, .. } => Some(value),
        AstNodeKind::If { condition, .. } => Some(condition),
        _ => None,
    }
}

fn joinable_expression_mut(stmt: &mut AstNode) -> Option<&mut AstNode> {
    match &mut stmt.kind {
        AstNodeKind::ExprStatement { expr } => Some(expr),
        AstNodeKind::VarDecl {
            value: Some(value), ..
        } => Some(value),
        AstNodeKind::Assignment { value, .. } => Some(value),
        AstNodeKind::If { condition, .. } => Some(condition),
        _ => None,
    }
}

/// `Some(allowed)` when the single read of `name` sits in this
/// expression; `allowed` says the join preserves evaluation order. A
/// movable value joins anywhere; a droppable one only crosses droppable
/// arguments (reads commute with reads); an effectful one never moves
/// past anything.
fn join_allowed(
    dialect: &Dialect,
    expr: &AstNode,
    name: &str,
    value_movable: bool,
    value_droppable: bool,
) -> Option<bool> {
    match expr.get_kind() {
        AstNodeKind::Identifier { name: read } if read == name => Some(true),
        AstNodeKind::Call { args, .. } => {
            let mut crossed_any = false;
            let mut before_droppable = true;
            for arg in args {
                if let Some(allowed) =
                    join_allowed(dialect, arg, name, value_movable, value_droppable)
                {
                    let crossing_ok = !crossed_any
                        || value_movable
                        || (value_droppable && before_droppable);
                    return Some(allowed && crossing_ok);
                }
                crossed_any = true;
                before_droppable = before_droppable && is_droppable(dialect, arg);
            }
            None
        }
        _ => None,
    }
}

fn replace_single_read(expr: &mut AstNode, name: &str, value: &mut Option<AstNode>) {
    if value.is_none() {
        return;
    }
    if matches!(expr.get_kind(), AstNodeKind::Identifier { name: read } if read == name) {
        if let Some(value) = value.take() {
            *expr = value;
        }
        return;
    }
    if let AstNodeKind::Call { args, .. } = &mut expr.kind {
        for arg in args {
            replace_single_read(arg, name, value);
        }
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
    fn joins_a_single_use_declaration_into_the_next_statement() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := add(1, 2) sstore(0, x) }");
        assert!(run(d, &mut code));
        assert_eq!(print_code(&code), "{\n    sstore(0, add(1, 2))\n}");
    }

    #[test]
    fn joins_chains_left_to_right() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := 1 let y := add(x, 2) sstore(0, y) }");
        assert!(run(d, &mut code));
        assert_eq!(print_code(&code), "{\n    sstore(0, add(1, 2))\n}");
    }

    #[test]
    fn refuses_to_move_a_load_past_a_store() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        // sstore's second argument is evaluated after the first; joining
        // would move the mload past a user call that may write memory
        let mut code = parse_code(
            "{ fn clobber() -> r { mstore(0, 7) r := 1 } let x := mload(0) sstore(clobber(), x) }",
        );
        assert!(!run(d, &mut code));
        assert!(print_code(&code).contains("let x := mload(0)"));
    }

    #[test]
    fn an_effectful_value_never_crosses_other_arguments() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        // joining would run clobber's store after the mload that was
        // written before it
        let mut code = parse_code(
            "{ fn clobber() -> r { mstore(0, 7) r := 1 } let x := clobber() sstore(mload(0), x) }",
        );
        assert!(!run(d, &mut code));
        assert!(print_code(&code).contains("let x := clobber()"));
    }

    #[test]
    fn an_effectful_value_joins_into_the_leading_argument() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := input(0) sstore(x, 1) }");
        assert!(run(d, &mut code));
        assert_eq!(print_code(&code), "{\n    sstore(input(0), 1)\n}");
    }

    #[test]
    fn a_load_may_join_over_droppable_arguments() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := mload(0) sstore(8, x) }");
        assert!(run(d, &mut code));
        assert_eq!(print_code(&code), "{\n    sstore(8, mload(0))\n}");
    }

    #[test]
    fn multi_use_declarations_stay() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ let x := add(1, 2) sstore(0, x) sstore(1, x) }");
        assert!(!run(d, &mut code));
        assert!(print_code(&code).contains("let x := add(1, 2)"));
    }
}
