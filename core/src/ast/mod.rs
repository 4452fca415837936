pub mod err;
pub mod expr;
pub mod kind;
pub mod node;
pub mod rules;
pub mod stmt;
pub mod unit;

pub use err::BuildError;
pub use kind::{AstNodeKind, TypedName};
pub use node::AstNode;
pub use rules::{Rule, RulesParser};
pub use unit::{MAX_UNIT_DEPTH, parse_program};
