// The unit tree. A compiled source is a hierarchy of units, each with an
// optional code body and any number of nested units and data segments.
// This mirrors the container layout the assembler produces: a unit's
// binary embeds its sub-units' binaries and data segments after its own
// code.

use std::collections::BTreeSet;

use crate::analysis::AnalysisInfo;
use crate::ast::node::AstNode;
use crate::location::{Location, Span};

/// Raw bytes attached to a unit under a name.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub name: String,
    pub contents: Vec<u8>,
    pub location: Option<Location>,
    pub span: Option<Span>,
}

impl DataSegment {
    pub fn new(name: impl Into<String>, contents: Vec<u8>) -> Self {
        DataSegment {
            name: name.into(),
            contents,
            location: None,
            span: None,
        }
    }
}

/// A child of a unit: either a nested unit or a data segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SubNode {
    Unit(Unit),
    Data(DataSegment),
}

impl SubNode {
    pub fn name(&self) -> &str {
        match self {
            SubNode::Unit(u) => &u.name,
            SubNode::Data(d) => &d.name,
        }
    }
}

/// One node of the unit tree.
///
/// `analysis_info` is populated by analysis and consumed by lowering; it
/// is dropped whenever the code body changes shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Unit {
    pub name: String,
    pub code: Option<AstNode>,
    pub analysis_info: Option<AnalysisInfo>,
    pub subs: Vec<SubNode>,
}

impl Unit {
    pub fn new(name: impl Into<String>) -> Self {
        Unit {
            name: name.into(),
            code: None,
            analysis_info: None,
            subs: Vec::new(),
        }
    }

    /// Immediate sub-units, skipping data segments.
    pub fn sub_units(&self) -> impl Iterator<Item = &Unit> {
        self.subs.iter().filter_map(|s| match s {
            SubNode::Unit(u) => Some(u),
            SubNode::Data(_) => None,
        })
    }

    pub fn sub_units_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.subs.iter_mut().filter_map(|s| match s {
            SubNode::Unit(u) => Some(u),
            SubNode::Data(_) => None,
        })
    }

    pub fn find_sub(&self, name: &str) -> Option<&SubNode> {
        self.subs.iter().find(|s| s.name() == name)
    }

    pub fn find_sub_unit(&self, name: &str) -> Option<&Unit> {
        self.sub_units().find(|u| u.name == name)
    }

    /// Every data name visible from this unit.
    ///
    /// That is the unit's own name, the names of immediate children, and
    /// dotted paths through nested units. Names already containing a dot
    /// are skipped, they cannot be addressed unambiguously.
    pub fn qualified_data_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        if !self.name.is_empty() && !self.name.contains('.') {
            names.insert(self.name.clone());
        }
        for sub in &self.subs {
            let sub_name = sub.name();
            assert!(
                !names.contains(sub_name),
                "duplicate sub name \"{}\" in unit \"{}\"",
                sub_name,
                self.name
            );
            if sub_name.contains('.') {
                continue;
            }
            names.insert(sub_name.to_string());
            if let SubNode::Unit(sub_unit) = sub {
                for inner in sub_unit.qualified_data_names() {
                    if inner != sub_unit.name {
                        names.insert(format!("{}.{}", sub_unit.name, inner));
                    }
                }
            }
        }
        names
    }
}
