use crate::ast::TypedName;
use crate::location::Location;

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Variable {
        ty: Option<String>,
    },
    Function {
        params: Vec<TypedName>,
        ret: Option<TypedName>,
    },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub location: Option<Location>,
}

impl Symbol {
    pub fn variable(name: impl Into<String>, ty: Option<String>, location: Option<Location>) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Variable { ty },
            location,
        }
    }

    pub fn function(
        name: impl Into<String>,
        params: Vec<TypedName>,
        ret: Option<TypedName>,
        location: Option<Location>,
    ) -> Self {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Function { params, ret },
            location,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, SymbolKind::Function { .. })
    }
}
