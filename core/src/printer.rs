// Prints unit trees back to Graphite source.
//
// The printed form is canonical: reparsing it yields the same tree
// shape, and printing that tree again yields byte-identical text. The
// driver leans on this when it reparses optimized code.

use crate::ast::{AstNode, AstNodeKind, TypedName};
use crate::object::{SubNode, Unit};

/// Which debug annotations the printer should emit as comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugInfoSelection {
    pub locations: bool,
}

impl DebugInfoSelection {
    pub fn none() -> Self {
        DebugInfoSelection { locations: false }
    }
    pub fn all() -> Self {
        DebugInfoSelection { locations: true }
    }
}

const INDENT: &str = "    ";

pub fn print_unit(unit: &Unit) -> String {
    print_unit_with(unit, DebugInfoSelection::none())
}

pub fn print_unit_with(unit: &Unit, selection: DebugInfoSelection) -> String {
    Printer { selection }.unit(unit, 0)
}

pub fn print_code(code: &AstNode) -> String {
    Printer {
        selection: DebugInfoSelection::none(),
    }
    .block(code, 0)
}

struct Printer {
    selection: DebugInfoSelection,
}

impl Printer {
    fn unit(&self, unit: &Unit, indent: usize) -> String {
        let pad = INDENT.repeat(indent);
        let inner = INDENT.repeat(indent + 1);
        let mut out = format!("{}unit \"{}\" {{\n", pad, escape_string(&unit.name));
        match &unit.code {
            Some(code) => {
                out.push_str(&format!(
                    "{}code {}\n",
                    inner,
                    self.block(code, indent + 1)
                ));
            }
            None => out.push_str(&format!("{}code {{ }}\n", inner)),
        }
        for sub in &unit.subs {
            match sub {
                SubNode::Unit(sub_unit) => {
                    out.push_str(&self.unit(sub_unit, indent + 1));
                    out.push('\n');
                }
                SubNode::Data(data) => {
                    out.push_str(&format!(
                        "{}data \"{}\" hex\"{}\"\n",
                        inner,
                        escape_string(&data.name),
                        hex_string(&data.contents)
                    ));
                }
            }
        }
        out.push_str(&pad);
        out.push('}');
        out
    }

    /// Multiline block, closing brace at `indent` level. Not
    /// newline-terminated so headers can continue after it.
    fn block(&self, node: &AstNode, indent: usize) -> String {
        let statements = match &node.kind {
            AstNodeKind::Block { statements } => statements,
            other => panic!("printer expects a block, got {}", other),
        };
        if statements.is_empty() {
            return "{ }".to_string();
        }
        let inner = INDENT.repeat(indent + 1);
        let mut out = String::from("{\n");
        for stmt in statements {
            out.push_str(&inner);
            out.push_str(&self.stmt(stmt, indent + 1));
            out.push('\n');
        }
        out.push_str(&INDENT.repeat(indent));
        out.push('}');
        out
    }

    fn stmt(&self, node: &AstNode, indent: usize) -> String {
        let mut out = String::new();
        if self.selection.locations {
            if let Some(loc) = &node.location {
                out.push_str(&format!("/* {} */ ", loc));
            }
        }
        out.push_str(&self.stmt_plain(node, indent));
        out
    }

    fn stmt_plain(&self, node: &AstNode, indent: usize) -> String {
        match &node.kind {
            AstNodeKind::Block { .. } => self.block(node, indent),
            AstNodeKind::VarDecl { name, value } => match value {
                Some(value) => format!("let {} := {}", typed_name(name), self.expr(value)),
                None => format!("let {}", typed_name(name)),
            },
            AstNodeKind::Assignment { name, value } => {
                format!("{} := {}", name, self.expr(value))
            }
            AstNodeKind::If {
                condition,
                body,
                else_body,
            } => {
                let mut out = format!("if {} {}", self.expr(condition), self.block(body, indent));
                if let Some(else_body) = else_body {
                    out.push_str(" else ");
                    out.push_str(&match &else_body.kind {
                        AstNodeKind::If { .. } => self.stmt_plain(else_body, indent),
                        _ => self.block(else_body, indent),
                    });
                }
                out
            }
            AstNodeKind::For {
                init,
                condition,
                post,
                body,
            } => format!(
                "for {} {} {} {}",
                self.block_inline(init),
                self.expr(condition),
                self.block_inline(post),
                self.block(body, indent)
            ),
            AstNodeKind::Break => "break".to_string(),
            AstNodeKind::Continue => "continue".to_string(),
            AstNodeKind::Leave => "leave".to_string(),
            AstNodeKind::FunctionDef {
                name,
                params,
                ret,
                body,
            } => {
                let params: Vec<String> = params.iter().map(typed_name).collect();
                let mut out = format!("fn {}({})", name, params.join(", "));
                if let Some(ret) = ret {
                    out.push_str(&format!(" -> {}", typed_name(ret)));
                }
                out.push(' ');
                out.push_str(&self.block(body, indent));
                out
            }
            AstNodeKind::ExprStatement { expr } => self.expr(expr),
            other => panic!("printer expects a statement, got {}", other),
        }
    }

    /// Single-line block used in for-loop headers.
    fn block_inline(&self, node: &AstNode) -> String {
        let statements = match &node.kind {
            AstNodeKind::Block { statements } => statements,
            other => panic!("printer expects a block, got {}", other),
        };
        if statements.is_empty() {
            return "{ }".to_string();
        }
        let parts: Vec<String> = statements.iter().map(|s| self.stmt_inline(s)).collect();
        format!("{{ {} }}", parts.join(" "))
    }

    fn stmt_inline(&self, node: &AstNode) -> String {
        match &node.kind {
            AstNodeKind::Block { .. } => self.block_inline(node),
            AstNodeKind::If {
                condition,
                body,
                else_body,
            } => {
                let mut out = format!(
                    "if {} {}",
                    self.expr(condition),
                    self.block_inline(body)
                );
                if let Some(else_body) = else_body {
                    out.push_str(" else ");
                    out.push_str(&match &else_body.kind {
                        AstNodeKind::If { .. } => self.stmt_inline(else_body),
                        _ => self.block_inline(else_body),
                    });
                }
                out
            }
            AstNodeKind::For {
                init,
                condition,
                post,
                body,
            } => format!(
                "for {} {} {} {}",
                self.block_inline(init),
                self.expr(condition),
                self.block_inline(post),
                self.block_inline(body)
            ),
            AstNodeKind::FunctionDef {
                name,
                params,
                ret,
                body,
            } => {
                let params: Vec<String> = params.iter().map(typed_name).collect();
                let mut out = format!("fn {}({})", name, params.join(", "));
                if let Some(ret) = ret {
                    out.push_str(&format!(" -> {}", typed_name(ret)));
                }
                out.push(' ');
                out.push_str(&self.block_inline(body));
                out
            }
            _ => self.stmt_plain(node, 0),
        }
    }

    fn expr(&self, node: &AstNode) -> String {
        match &node.kind {
            AstNodeKind::Call { name, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                format!("{}({})", name, args.join(", "))
            }
            AstNodeKind::Identifier { name } => name.clone(),
            AstNodeKind::Number { value } => value.to_string(),
            AstNodeKind::Bool { value } => value.to_string(),
            AstNodeKind::StringLit { value } => format!("\"{}\"", escape_string(value)),
            other => panic!("printer expects an expression, got {}", other),
        }
    }
}

fn typed_name(name: &TypedName) -> String {
    match &name.ty {
        Some(ty) => format!("{}:{}", name.name, ty),
        None => name.name.clone(),
    }
}

fn escape_string(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::DataSegment;

    fn call(name: &str, args: Vec<AstNode>) -> AstNode {
        AstNode::synthetic(AstNodeKind::Call {
            name: name.to_string(),
            args,
        })
    }

    fn num(value: u64) -> AstNode {
        AstNode::synthetic(AstNodeKind::Number { value })
    }

    #[test]
    fn prints_nested_calls_in_source_form() {
        let expr = call("add", vec![num(1), call("mul", vec![num(2), num(3)])]);
        let p = Printer {
            selection: DebugInfoSelection::none(),
        };
        assert_eq!(p.expr(&expr), "add(1, mul(2, 3))");
    }

    #[test]
    fn prints_unit_with_data_as_hex() {
        let mut unit = Unit::new("demo");
        unit.code = Some(AstNode::synthetic(AstNodeKind::Block {
            statements: vec![],
        }));
        unit.subs.push(SubNode::Data(DataSegment::new(
            "table",
            vec![0x00, 0xaa, 0xff],
        )));
        let printed = print_unit(&unit);
        assert_eq!(
            printed,
            "unit \"demo\" {\n    code { }\n    data \"table\" hex\"00aaff\"\n}"
        );
    }

    #[test]
    fn escapes_strings_on_the_way_out() {
        assert_eq!(escape_string("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape_string("\x01"), "\\x01");
    }
}
