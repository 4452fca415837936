//! file: core/src/optimize/fuel.rs
//! description: cost model for fuel-aware transformation decisions.
//!
//! A `FuelMeter` weighs expression rewrites for one unit. It combines
//! the fuel the VM charges at run time with the bytes the expression
//! occupies in the artifact. Creation code executes once and its bytes
//! travel once; deployed code multiplies run fuel by the configured
//! expected executions and pays `install` storage per byte.

use crate::ast::{AstNode, AstNodeKind};
use crate::dialect::Dialect;

/// Fuel charged for pushing a literal word.
pub const PUSH_FUEL: u64 = 2;
/// Fuel charged for reading a frame slot.
pub const SLOT_READ_FUEL: u64 = 3;
/// Fuel charged for a user function call, excluding the body.
pub const CALL_OVERHEAD_FUEL: u64 = 8;
/// Fuel equivalent of one byte persisted by `install`.
pub const BYTE_STORE_FUEL: u64 = 8;

#[derive(Debug, Clone, Copy)]
pub struct FuelMeter {
    dialect: &'static Dialect,
    is_creation: bool,
    expected_executions: u64,
}

impl FuelMeter {
    pub fn new(dialect: &'static Dialect, is_creation: bool, expected_executions: u64) -> Self {
        FuelMeter {
            dialect,
            is_creation,
            expected_executions,
        }
    }

    pub fn is_creation(&self) -> bool {
        self.is_creation
    }

    /// Fuel for one evaluation of the expression.
    pub fn run_fuel(&self, expr: &AstNode) -> u64 {
        match expr.get_kind() {
            AstNodeKind::Number { .. } | AstNodeKind::Bool { .. } | AstNodeKind::StringLit { .. } => {
                PUSH_FUEL
            }
            AstNodeKind::Identifier { .. } => SLOT_READ_FUEL,
            AstNodeKind::Call { name, args } => {
                let own = match self.dialect.builtin(name) {
                    Some(builtin) => builtin.fuel_cost as u64,
                    None => CALL_OVERHEAD_FUEL,
                };
                own + args.iter().map(|arg| self.run_fuel(arg)).sum::<u64>()
            }
            _ => 0,
        }
    }

    /// Estimated encoded size of the expression in bytes.
    pub fn code_size(&self, expr: &AstNode) -> u64 {
        match expr.get_kind() {
            AstNodeKind::Number { value } => 1 + byte_width(*value),
            AstNodeKind::Bool { .. } => 2,
            // Data references encode as a fixed-width link slot.
            AstNodeKind::StringLit { .. } => 5,
            AstNodeKind::Identifier { .. } => 2,
            AstNodeKind::Call { name, args } => {
                let own = if self.dialect.builtin(name).is_some() {
                    1
                } else {
                    5
                };
                own + args.iter().map(|arg| self.code_size(arg)).sum::<u64>()
            }
            _ => 0,
        }
    }

    /// Deployment-weighted cost of keeping the expression as written.
    pub fn cost(&self, expr: &AstNode) -> u64 {
        if self.is_creation {
            self.run_fuel(expr) + self.code_size(expr)
        } else {
            self.run_fuel(expr) * self.expected_executions
                + self.code_size(expr) * BYTE_STORE_FUEL
        }
    }
}

/// Bytes needed to hold the value, at least one.
pub(crate) fn byte_width(value: u64) -> u64 {
    let bits = 64 - u64::from(value.leading_zeros());
    (bits.div_ceil(8)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, AstNodeKind};
    use crate::dialect::{dialect, KilnVersion, Language};

    fn number(value: u64) -> AstNode {
        AstNode::synthetic(AstNodeKind::Number { value })
    }

    #[test]
    fn byte_width_rounds_up() {
        assert_eq!(byte_width(0), 1);
        assert_eq!(byte_width(0xff), 1);
        assert_eq!(byte_width(0x100), 2);
        assert_eq!(byte_width(u64::MAX), 8);
    }

    #[test]
    fn deployed_cost_scales_with_executions() {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let expr = AstNode::synthetic(AstNodeKind::Call {
            name: "add".into(),
            args: vec![number(1), number(2)],
        });
        let creation = FuelMeter::new(d, true, 100);
        let deployed = FuelMeter::new(d, false, 100);
        assert!(deployed.cost(&expr) > creation.cost(&expr));
        assert_eq!(creation.run_fuel(&expr), deployed.run_fuel(&expr));
    }
}
