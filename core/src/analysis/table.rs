use std::collections::HashMap;

use super::symbol::Symbol;

// A single scope: name -> symbol. Function scopes carry a barrier so
// that variables outside the function stay invisible while functions
// remain callable.
struct Scope {
    symbols: HashMap<String, Symbol>,
    barrier: bool,
}

impl Scope {
    fn new(barrier: bool) -> Self {
        Scope {
            symbols: HashMap::new(),
            barrier,
        }
    }
}

pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::new(false)],
        }
    }

    /// ------- Scope Helpers -------

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::new(false));
    }

    pub fn enter_function_scope(&mut self) {
        self.scopes.push(Scope::new(true));
    }

    pub fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    /// ------- Symbol Helpers -------

    /// Declare a symbol in the current scope. Shadowing any visible
    /// declaration is refused, even across a function barrier.
    pub fn declare(&mut self, symbol: Symbol) -> Result<(), Symbol> {
        if let Some((existing, _)) = self.lookup(&symbol.name) {
            return Err(existing.clone());
        }
        if let Some(current) = self.scopes.last_mut() {
            current.symbols.insert(symbol.name.clone(), symbol);
        }
        Ok(())
    }

    /// Find a symbol by name, innermost scope first.
    ///
    /// The second value tells whether a function barrier was crossed on
    /// the way out. Variables found across a barrier are not accessible.
    pub fn lookup(&self, name: &str) -> Option<(&Symbol, bool)> {
        let mut crossed_barrier = false;
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.symbols.get(name) {
                return Some((symbol, crossed_barrier));
            }
            if scope.barrier {
                crossed_barrier = true;
            }
        }
        None
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}
