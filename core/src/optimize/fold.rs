//! Constant folding over builtin calls.

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::{Dialect, Language, TYPE_FLAG};

use super::fuel::FuelMeter;

/// Folds builtin calls over literal arguments into literals, innermost
/// first. With a meter, a fold only applies when the literal costs no
/// more than the computation it replaces; wide constants can lose that
/// comparison in creation code, where bytes are paid at full weight.
pub(crate) fn run(dialect: &Dialect, meter: Option<&FuelMeter>, code: &mut AstNode) -> bool {
    let mut changed = false;
    fold_node(dialect, meter, code, &mut changed);
    changed
}

fn fold_node(
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    node: &mut AstNode,
    changed: &mut bool,
) {
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            for stmt in statements {
                fold_node(dialect, meter, stmt, changed);
            }
        }
        AstNodeKind::VarDecl { value, .. } => {
            if let Some(value) = value {
                fold_node(dialect, meter, value, changed);
            }
        }
        AstNodeKind::Assignment { value, .. } => fold_node(dialect, meter, value, changed),
        AstNodeKind::If {
            condition,
            body,
            else_body,
        } => {
            fold_node(dialect, meter, condition, changed);
            fold_node(dialect, meter, body, changed);
            if let Some(else_body) = else_body {
                fold_node(dialect, meter, else_body, changed);
            }
        }
        AstNodeKind::For {
            init,
            condition,
            post,
            body,
        } => {
            fold_node(dialect, meter, init, changed);
            fold_node(dialect, meter, condition, changed);
            fold_node(dialect, meter, post, changed);
            fold_node(dialect, meter, body, changed);
        }
        AstNodeKind::FunctionDef { body, .. } => fold_node(dialect, meter, body, changed),
        AstNodeKind::ExprStatement { expr } => fold_node(dialect, meter, expr, changed),
        AstNodeKind::Call { args, .. } => {
            for arg in args {
                fold_node(dialect, meter, arg, changed);
            }
        }
        _ => {}
    }
    try_fold(dialect, meter, node, changed);
}

fn try_fold(
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    node: &mut AstNode,
    changed: &mut bool,
) {
    let AstNodeKind::Call { name, args } = node.get_kind() else {
        return;
    };
    let Some(builtin) = dialect.builtin(name) else {
        return;
    };
    let Some(eval) = builtin.eval else {
        return;
    };

    let mut words = Vec::with_capacity(args.len());
    for arg in args {
        match literal_word(arg) {
            Some(word) => words.push(word),
            None => return,
        }
    }
    // The evaluator refuses folds whose runtime behaviour is not a
    // plain value, division by zero for one.
    let Some(result) = eval(&words) else {
        return;
    };

    let folded = if dialect.language == Language::Typed
        && builtin.return_types.first() == Some(&TYPE_FLAG)
    {
        AstNodeKind::Bool { value: result != 0 }
    } else {
        AstNodeKind::Number { value: result }
    };

    if let Some(meter) = meter {
        let probe = AstNode::synthetic(folded.clone());
        if meter.cost(&probe) > meter.cost(node) {
            return;
        }
    }

    node.kind = folded;
    *changed = true;
}

fn literal_word(node: &AstNode) -> Option<u64> {
    match node.get_kind() {
        AstNodeKind::Number { value } => Some(*value),
        AstNodeKind::Bool { value } => Some(*value as u64),
        _ => None,
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
    fn folds_nested_arithmetic_bottom_up() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ sstore(0, mul(add(1, 2), 3)) }");
        assert!(run(d, None, &mut code));
        assert_eq!(print_code(&code), "{\n    sstore(0, 9)\n}");
    }

    #[test]
    fn refuses_division_by_zero() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let mut code = parse_code("{ sstore(0, div(1, 0)) }");
        assert!(!run(d, None, &mut code));
        assert!(print_code(&code).contains("div(1, 0)"));
    }

    #[test]
    fn typed_comparisons_fold_to_flags() {
        let d = dialect(Language::Typed, KilnVersion::latest());
        let mut code = parse_code("{ if eq(1, 1) { sstore(0, 1) } }");
        assert!(run(d, None, &mut code));
        assert!(print_code(&code).contains("if true"));
    }

    #[test]
    fn creation_meter_refuses_wide_constants() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let creation = FuelMeter::new(d, true, 100);
        let deployed = FuelMeter::new(d, false, 100);

        let mut code = parse_code("{ sstore(0, not(0)) }");
        assert!(!run(d, Some(&creation), &mut code));
        assert!(print_code(&code).contains("not(0)"));

        let mut code = parse_code("{ sstore(0, not(0)) }");
        assert!(run(d, Some(&deployed), &mut code));
        assert!(print_code(&code).contains("18446744073709551615"));
    }
}
