//! file: core/src/ast/kind.rs
//! description: AST node kind definitions for Graphite code bodies.
//!
//! Defines `AstNodeKind` and the `TypedName` helper. These are used
//! throughout parsing, analysis, optimization and lowering.
//!
use super::node::AstNode;

/// A declared name with an optional type annotation.
///
/// Annotations only occur in the typed dialect; the untyped one leaves
/// `ty` empty everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedName {
    pub name: String,
    pub ty: Option<String>,
}

impl TypedName {
    pub fn new(name: impl Into<String>, ty: Option<String>) -> Self {
        TypedName {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNodeKind {
    Block { statements: Vec<AstNode> },

    VarDecl { name: TypedName, value: Option<Box<AstNode>> },
    Assignment { name: String, value: Box<AstNode> },

    If { condition: Box<AstNode>, body: Box<AstNode>, else_body: Option<Box<AstNode>> },
    For { init: Box<AstNode>, condition: Box<AstNode>, post: Box<AstNode>, body: Box<AstNode> },
    Break,
    Continue,
    Leave,

    FunctionDef { name: String, params: Vec<TypedName>, ret: Option<TypedName>, body: Box<AstNode> },
    ExprStatement { expr: Box<AstNode> },

    Call { name: String, args: Vec<AstNode> },
    Identifier { name: String },
    Number { value: u64 },
    Bool { value: bool },
    StringLit { value: String },
}

impl AstNodeKind {
    pub fn is_expression(&self) -> bool {
        matches!(
            self,
            AstNodeKind::Call { .. }
                | AstNodeKind::Identifier { .. }
                | AstNodeKind::Number { .. }
                | AstNodeKind::Bool { .. }
                | AstNodeKind::StringLit { .. }
        )
    }

    /// Literal expressions have a value known at compile time.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            AstNodeKind::Number { .. } | AstNodeKind::Bool { .. } | AstNodeKind::StringLit { .. }
        )
    }

    /// If this kind carries a statement body, return it.
    pub fn body(&self) -> Option<&AstNode> {
        match self {
            AstNodeKind::If { body, .. }
            | AstNodeKind::For { body, .. }
            | AstNodeKind::FunctionDef { body, .. } => Some(body.as_ref()),
            _ => None,
        }
    }
}

use std::fmt;

impl fmt::Display for AstNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNodeKind::Block { .. } => write!(f, "Block"),
            AstNodeKind::VarDecl { .. } => write!(f, "VarDecl"),
            AstNodeKind::Assignment { .. } => write!(f, "Assignment"),
            AstNodeKind::If { .. } => write!(f, "If"),
            AstNodeKind::For { .. } => write!(f, "For"),
            AstNodeKind::Break => write!(f, "Break"),
            AstNodeKind::Continue => write!(f, "Continue"),
            AstNodeKind::Leave => write!(f, "Leave"),
            AstNodeKind::FunctionDef { .. } => write!(f, "FunctionDef"),
            AstNodeKind::ExprStatement { .. } => write!(f, "ExprStatement"),
            AstNodeKind::Call { .. } => write!(f, "Call"),
            AstNodeKind::Identifier { .. } => write!(f, "Identifier"),
            AstNodeKind::Number { .. } => write!(f, "Number"),
            AstNodeKind::Bool { .. } => write!(f, "Bool"),
            AstNodeKind::StringLit { .. } => write!(f, "StringLit"),
        }
    }
}
