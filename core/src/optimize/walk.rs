//! Shared traversal helpers for the transformation passes.

use std::collections::HashMap;

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

/// Pre-order visit of every node in the tree.
pub(crate) fn visit<'a>(node: &'a AstNode, f: &mut dyn FnMut(&'a AstNode)) {
    f(node);
    match node.get_kind() {
        AstNodeKind::Block { statements } => {
            for stmt in statements {
                visit(stmt, f);
            }
        }
        AstNodeKind::VarDecl { value, .. } => {
            if let Some(value) = value {
                visit(value, f);
            }
        }
        AstNodeKind::Assignment { value, .. } => visit(value, f),
        AstNodeKind::If {
            condition,
            body,
            else_body,
        } => {
            visit(condition, f);
            visit(body, f);
            if let Some(else_body) = else_body {
                visit(else_body, f);
            }
        }
        AstNodeKind::For {
            init,
            condition,
            post,
            body,
        } => {
            visit(init, f);
            visit(condition, f);
            visit(post, f);
            visit(body, f);
        }
        AstNodeKind::FunctionDef { body, .. } => visit(body, f),
        AstNodeKind::ExprStatement { expr } => visit(expr, f),
        AstNodeKind::Call { args, .. } => {
            for arg in args {
                visit(arg, f);
            }
        }
        AstNodeKind::Break
        | AstNodeKind::Continue
        | AstNodeKind::Leave
        | AstNodeKind::Identifier { .. }
        | AstNodeKind::Number { .. }
        | AstNodeKind::Bool { .. }
        | AstNodeKind::StringLit { .. } => {}
    }
}

/// Pre-order mutable visit. The callback returns false to skip the
/// node's children.
pub(crate) fn visit_mut(node: &mut AstNode, f: &mut dyn FnMut(&mut AstNode) -> bool) {
    if !f(node) {
        return;
    }
    match &mut node.kind {
        AstNodeKind::Block { statements } => {
            for stmt in statements {
                visit_mut(stmt, f);
            }
        }
        AstNodeKind::VarDecl { value, .. } => {
            if let Some(value) = value {
                visit_mut(value, f);
            }
        }
        AstNodeKind::Assignment { value, .. } => visit_mut(value, f),
        AstNodeKind::If {
            condition,
            body,
            else_body,
        } => {
            visit_mut(condition, f);
            visit_mut(body, f);
            if let Some(else_body) = else_body {
                visit_mut(else_body, f);
            }
        }
        AstNodeKind::For {
            init,
            condition,
            post,
            body,
        } => {
            visit_mut(init, f);
            visit_mut(condition, f);
            visit_mut(post, f);
            visit_mut(body, f);
        }
        AstNodeKind::FunctionDef { body, .. } => visit_mut(body, f),
        AstNodeKind::ExprStatement { expr } => visit_mut(expr, f),
        AstNodeKind::Call { args, .. } => {
            for arg in args {
                visit_mut(arg, f);
            }
        }
        AstNodeKind::Break
        | AstNodeKind::Continue
        | AstNodeKind::Leave
        | AstNodeKind::Identifier { .. }
        | AstNodeKind::Number { .. }
        | AstNodeKind::Bool { .. }
        | AstNodeKind::StringLit { .. } => {}
    }
}

/// Name usage counts over one unit body. Reads are identifier
/// occurrences in expression position, writes are assignment targets,
/// calls are call-site names (builtins included).
#[derive(Debug, Default)]
pub(crate) struct NameCounts {
    reads: HashMap<String, usize>,
    writes: HashMap<String, usize>,
    calls: HashMap<String, usize>,
}

impl NameCounts {
    pub(crate) fn read_count(&self, name: &str) -> usize {
        self.reads.get(name).copied().unwrap_or(0)
    }
    pub(crate) fn write_count(&self, name: &str) -> usize {
        self.writes.get(name).copied().unwrap_or(0)
    }
    pub(crate) fn call_count(&self, name: &str) -> usize {
        self.calls.get(name).copied().unwrap_or(0)
    }
}

pub(crate) fn count_names(code: &AstNode) -> NameCounts {
    let mut counts = NameCounts::default();
    visit(code, &mut |node| match node.get_kind() {
        AstNodeKind::Identifier { name } => {
            *counts.reads.entry(name.clone()).or_insert(0) += 1;
        }
        AstNodeKind::Assignment { name, .. } => {
            *counts.writes.entry(name.clone()).or_insert(0) += 1;
        }
        AstNodeKind::Call { name, .. } => {
            *counts.calls.entry(name.clone()).or_insert(0) += 1;
        }
        _ => {}
    });
    counts
}

/// True when evaluating the expression has no observable effect beyond
/// its value, so an unused evaluation may be removed outright. User
/// function calls may do anything and never qualify.
pub(crate) fn is_droppable(dialect: &Dialect, node: &AstNode) -> bool {
    match node.get_kind() {
        AstNodeKind::Identifier { .. }
        | AstNodeKind::Number { .. }
        | AstNodeKind::Bool { .. }
        | AstNodeKind::StringLit { .. } => true,
        AstNodeKind::Call { name, args } => match dialect.builtin(name) {
            Some(builtin) => {
                !builtin.has_side_effects && args.iter().all(|arg| is_droppable(dialect, arg))
            }
            None => false,
        },
        _ => false,
    }
}

/// Stronger than droppable: the value also survives reordering past
/// neighbouring code. Machine-state reads (`mload`, `sload`, `memtop`,
/// `fuel`) are droppable but not movable. Builtins with a constant
/// evaluator qualify, as do the link-time data constants.
pub(crate) fn is_movable(dialect: &Dialect, node: &AstNode) -> bool {
    match node.get_kind() {
        AstNodeKind::Identifier { .. }
        | AstNodeKind::Number { .. }
        | AstNodeKind::Bool { .. }
        | AstNodeKind::StringLit { .. } => true,
        AstNodeKind::Call { name, args } => match dialect.builtin(name) {
            Some(builtin) => {
                let constant_value =
                    builtin.eval.is_some() || matches!(builtin.name, "datasize" | "dataoffset");
                constant_value && args.iter().all(|arg| is_movable(dialect, arg))
            }
            None => false,
        },
        _ => false,
    }
}

/// Compile-time truth value of a literal condition.
pub(crate) fn known_truth(node: &AstNode) -> Option<bool> {
    match node.get_kind() {
        AstNodeKind::Number { value } => Some(*value != 0),
        AstNodeKind::Bool { value } => Some(*value),
        _ => None,
    }
}
