//! file: core/src/analysis/analyzer.rs
//! description: scoping, arity and type checks over unit code bodies.
//!
//! The analyzer walks a code body once, pushing diagnostics into the
//! shared collector as it goes. It never aborts on the first fault, a
//! broken body still yields as many reports as can be derived from it.
//!
use std::collections::BTreeSet;

use crate::ast::{AstNode, AstNodeKind, TypedName};
use crate::dialect::{Dialect, Language, TYPE_FLAG, TYPE_WORD};
use crate::error::Unimplemented;
use crate::reports::{E_REFERENCE, E_SYNTAX, E_TYPE, ErrorCode, Report, ReportCollector};

use super::symbol::{Symbol, SymbolKind};
use super::table::SymbolTable;
use super::{AnalysisInfo, FunctionSignature};

pub struct Analyzer<'a> {
    dialect: &'static Dialect,
    data_names: &'a BTreeSet<String>,
    table: SymbolTable,
    reports: &'a mut ReportCollector,
    info: AnalysisInfo,
    loop_depth: usize,
    function_depth: usize,
    ok: bool,
    unimplemented: Option<Unimplemented>,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        dialect: &'static Dialect,
        data_names: &'a BTreeSet<String>,
        reports: &'a mut ReportCollector,
    ) -> Self {
        Analyzer {
            dialect,
            data_names,
            table: SymbolTable::new(),
            reports,
            info: AnalysisInfo::default(),
            loop_depth: 0,
            function_depth: 0,
            ok: true,
            unimplemented: None,
        }
    }

    /// Walk a code body. Returns the collected signatures and whether
    /// the body passed without errors. Constructs the analyzer accepts
    /// but no later stage can handle yet come back as `Err` instead of
    /// as diagnostics.
    pub fn analyze(mut self, code: &AstNode) -> Result<(AnalysisInfo, bool), Unimplemented> {
        self.visit_block(code);
        match self.unimplemented {
            Some(unimplemented) => Err(unimplemented),
            None => Ok((self.info, self.ok)),
        }
    }

    fn error(&mut self, message: &str, code: ErrorCode, node: &AstNode) {
        self.ok = false;
        self.reports.push(Report::error(
            message,
            node.location.clone(),
            node.span,
            Some(code),
            None,
            None,
        ));
    }

    fn typed(&self) -> bool {
        self.dialect.language == Language::Typed
    }

    /// ------- Statements -------

    fn visit_block(&mut self, node: &AstNode) {
        self.table.enter_scope();
        self.visit_statements_in_current_scope(node);
        self.table.exit_scope();
    }

    // For loops extend their init scope over the whole statement, so the
    // block walk is split from scope entry.
    fn visit_statements_in_current_scope(&mut self, node: &AstNode) {
        let statements = match &node.kind {
            AstNodeKind::Block { statements } => statements,
            other => panic!("analyzer expects a block, got {}", other),
        };
        // Functions are hoisted: visible from the top of their block.
        for stmt in statements {
            if let AstNodeKind::FunctionDef { name, params, ret, .. } = &stmt.kind {
                self.declare_function(name, params, ret, stmt);
            }
        }
        for stmt in statements {
            self.visit_statement(stmt);
        }
    }

    fn visit_statement(&mut self, node: &AstNode) {
        match &node.kind {
            AstNodeKind::Block { .. } => self.visit_block(node),
            AstNodeKind::VarDecl { name, value } => self.visit_var_decl(name, value, node),
            AstNodeKind::Assignment { name, value } => self.visit_assignment(name, value, node),
            AstNodeKind::If {
                condition,
                body,
                else_body,
            } => {
                self.visit_condition(condition);
                self.visit_block(body);
                if let Some(else_body) = else_body {
                    self.visit_statement(else_body);
                }
            }
            AstNodeKind::For {
                init,
                condition,
                post,
                body,
            } => self.visit_for(init, condition, post, body),
            AstNodeKind::Break => {
                if self.loop_depth == 0 {
                    self.error("\"break\" outside of a loop body", E_SYNTAX, node);
                }
            }
            AstNodeKind::Continue => {
                if self.loop_depth == 0 {
                    self.error("\"continue\" outside of a loop body", E_SYNTAX, node);
                }
            }
            AstNodeKind::Leave => {
                if self.function_depth == 0 {
                    self.error("\"leave\" outside of a function body", E_SYNTAX, node);
                }
            }
            AstNodeKind::FunctionDef {
                params, ret, body, ..
            } => self.visit_function_def(params, ret, body, node),
            AstNodeKind::ExprStatement { expr } => {
                let (count, _) = self.visit_expression(expr);
                if count != 0 {
                    self.error(
                        "expression statements may not return a value",
                        E_TYPE,
                        node,
                    );
                }
            }
            other => panic!("analyzer expects a statement, got {}", other),
        }
    }

    fn visit_var_decl(&mut self, name: &TypedName, value: &Option<Box<AstNode>>, node: &AstNode) {
        self.check_type_annotation(&name.ty, node);
        if let Some(value) = value {
            let actual = self.expect_single_value(value);
            if self.typed() {
                let declared = self.declared_type(name);
                self.check_assignable(&declared, &actual, value);
            }
        }
        // The value is analyzed before the name becomes visible, so
        // `let x := x` refers to an outer x or fails.
        self.declare_variable(name, node);
    }

    fn visit_assignment(&mut self, name: &str, value: &AstNode, node: &AstNode) {
        let actual = self.expect_single_value(value);
        match self.table.lookup(name) {
            None => self.error(
                &format!("unknown identifier \"{}\"", name),
                E_REFERENCE,
                node,
            ),
            Some((symbol, crossed_barrier)) => {
                if symbol.is_function() {
                    self.error(
                        &format!("cannot assign to function \"{}\"", name),
                        E_TYPE,
                        node,
                    );
                } else if crossed_barrier {
                    self.error(
                        &format!("variable \"{}\" is not accessible inside this function", name),
                        E_REFERENCE,
                        node,
                    );
                } else if self.typed() {
                    let declared = match &symbol.kind {
                        SymbolKind::Variable { ty } => ty
                            .clone()
                            .unwrap_or_else(|| self.dialect.default_type().to_string()),
                        SymbolKind::Function { .. } => unreachable!(),
                    };
                    self.check_assignable(&declared, &actual, value);
                }
            }
        }
    }

    fn visit_condition(&mut self, condition: &AstNode) {
        let actual = self.expect_single_value(condition);
        if self.typed() {
            self.check_assignable(self.dialect.boolean_type(), &actual, condition);
        }
    }

    fn visit_for(&mut self, init: &AstNode, condition: &AstNode, post: &AstNode, body: &AstNode) {
        // The init block's scope covers the condition, post and body.
        self.table.enter_scope();
        self.visit_statements_in_current_scope(init);
        self.visit_condition(condition);
        self.loop_depth += 1;
        self.visit_block(body);
        self.loop_depth -= 1;
        // break and continue are not valid in the post block.
        self.visit_block(post);
        self.table.exit_scope();
    }

    fn visit_function_def(
        &mut self,
        params: &[TypedName],
        ret: &Option<TypedName>,
        body: &AstNode,
        node: &AstNode,
    ) {
        self.table.enter_function_scope();
        for param in params {
            self.declare_variable(param, node);
        }
        if let Some(ret) = ret {
            self.declare_variable(ret, node);
        }
        let saved_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        self.visit_block(body);
        self.function_depth -= 1;
        self.loop_depth = saved_loop_depth;
        self.table.exit_scope();
    }

    fn declare_variable(&mut self, name: &TypedName, node: &AstNode) {
        self.check_type_annotation(&name.ty, node);
        if self.dialect.is_reserved(&name.name) {
            self.error(
                &format!("\"{}\" is a reserved name", name.name),
                E_REFERENCE,
                node,
            );
            return;
        }
        let symbol = Symbol::variable(&name.name, name.ty.clone(), node.location.clone());
        if self.table.declare(symbol).is_err() {
            self.error(
                &format!("variable \"{}\" shadows an existing declaration", name.name),
                E_REFERENCE,
                node,
            );
        }
    }

    fn declare_function(
        &mut self,
        name: &str,
        params: &[TypedName],
        ret: &Option<TypedName>,
        node: &AstNode,
    ) {
        if self.dialect.is_reserved(name) {
            self.error(&format!("\"{}\" is a reserved name", name), E_REFERENCE, node);
            return;
        }
        let symbol = Symbol::function(
            name,
            params.to_vec(),
            ret.clone(),
            node.location.clone(),
        );
        if self.table.declare(symbol).is_err() {
            self.error(
                &format!("function \"{}\" shadows an existing declaration", name),
                E_REFERENCE,
                node,
            );
            return;
        }
        // Lowering keys functions by name across the whole body, so the
        // name must be unique even between unrelated blocks.
        if self.info.functions.contains_key(name) {
            self.error(
                &format!("function \"{}\" is already defined in this unit", name),
                E_REFERENCE,
                node,
            );
            return;
        }
        self.info.functions.insert(
            name.to_string(),
            FunctionSignature {
                params: params.to_vec(),
                ret: ret.clone(),
            },
        );
    }

    /// ------- Expressions -------

    /// Returns how many values the expression produces, and its type in
    /// the typed dialect.
    fn visit_expression(&mut self, node: &AstNode) -> (usize, Option<String>) {
        match &node.kind {
            AstNodeKind::Number { .. } => (1, self.typed_type(TYPE_WORD)),
            AstNodeKind::Bool { .. } => (1, self.typed_type(TYPE_FLAG)),
            AstNodeKind::StringLit { .. } => {
                self.error(
                    "string literals are only valid as direct builtin arguments",
                    E_TYPE,
                    node,
                );
                (1, None)
            }
            AstNodeKind::Identifier { name } => self.visit_identifier(name, node),
            AstNodeKind::Call { name, args } => self.visit_call(name, args, node),
            other => panic!("analyzer expects an expression, got {}", other),
        }
    }

    fn visit_identifier(&mut self, name: &str, node: &AstNode) -> (usize, Option<String>) {
        match self.table.lookup(name) {
            None => {
                self.error(
                    &format!("unknown identifier \"{}\"", name),
                    E_REFERENCE,
                    node,
                );
                (1, None)
            }
            Some((symbol, crossed_barrier)) => match &symbol.kind {
                SymbolKind::Function { .. } => {
                    self.error(
                        &format!("function \"{}\" used as a value", name),
                        E_TYPE,
                        node,
                    );
                    (1, None)
                }
                SymbolKind::Variable { ty } => {
                    if crossed_barrier {
                        let message =
                            format!("variable \"{}\" is not accessible inside this function", name);
                        self.error(&message, E_REFERENCE, node);
                        return (1, None);
                    }
                    let ty = ty.clone();
                    (
                        1,
                        if self.typed() {
                            Some(ty.unwrap_or_else(|| self.dialect.default_type().to_string()))
                        } else {
                            None
                        },
                    )
                }
            },
        }
    }

    fn visit_call(&mut self, name: &str, args: &[AstNode], node: &AstNode) -> (usize, Option<String>) {
        if let Some(builtin) = self.dialect.builtin(name) {
            // Lowering for raw bytes only exists in the assembly
            // dialect so far. Keep the first occurrence, its location
            // is the most useful one to show.
            if name == "raw" && self.typed() && self.unimplemented.is_none() {
                self.unimplemented = Some(Unimplemented::new(
                    "\"raw\" is not implemented for the typed dialect",
                    node.location.clone(),
                ));
            }
            if args.len() != builtin.params {
                self.error(
                    &format!(
                        "function \"{}\" expects {} arguments but got {}",
                        name,
                        builtin.params,
                        args.len()
                    ),
                    E_TYPE,
                    node,
                );
            }
            for (i, arg) in args.iter().enumerate() {
                if builtin.literal_args.get(i).copied().unwrap_or(false) {
                    self.check_literal_argument(name, arg);
                } else {
                    let actual = self.expect_single_value(arg);
                    if self.typed() {
                        if let Some(expected) = builtin.param_types.get(i) {
                            self.check_assignable(expected, &actual, arg);
                        }
                    }
                }
            }
            let ty = if self.typed() {
                builtin.return_types.first().map(|t| t.to_string())
            } else {
                None
            };
            return (builtin.returns, ty);
        }

        match self.table.lookup(name) {
            None => {
                self.error(&format!("unknown function \"{}\"", name), E_REFERENCE, node);
                // Still walk the arguments for their own diagnostics.
                for arg in args {
                    self.expect_single_value(arg);
                }
                (1, None)
            }
            Some((symbol, _)) => match &symbol.kind {
                SymbolKind::Variable { .. } => {
                    self.error(&format!("\"{}\" is not a function", name), E_TYPE, node);
                    (1, None)
                }
                SymbolKind::Function { params, ret } => {
                    let params = params.clone();
                    let ret = ret.clone();
                    if args.len() != params.len() {
                        self.error(
                            &format!(
                                "function \"{}\" expects {} arguments but got {}",
                                name,
                                params.len(),
                                args.len()
                            ),
                            E_TYPE,
                            node,
                        );
                    }
                    for (i, arg) in args.iter().enumerate() {
                        let actual = self.expect_single_value(arg);
                        if self.typed() {
                            if let Some(param) = params.get(i) {
                                let expected = param
                                    .ty
                                    .clone()
                                    .unwrap_or_else(|| self.dialect.default_type().to_string());
                                self.check_assignable(&expected, &actual, arg);
                            }
                        }
                    }
                    let count = ret.is_some() as usize;
                    let ty = if self.typed() {
                        ret.map(|r| {
                            r.ty.unwrap_or_else(|| self.dialect.default_type().to_string())
                        })
                    } else {
                        None
                    };
                    (count, ty)
                }
            },
        }
    }

    fn check_literal_argument(&mut self, function: &str, arg: &AstNode) {
        match (&arg.kind, function) {
            (AstNodeKind::StringLit { value }, "datasize" | "dataoffset") => {
                if !self.data_names.contains(value) {
                    self.error(
                        &format!("unknown data name \"{}\"", value),
                        E_REFERENCE,
                        arg,
                    );
                }
            }
            (AstNodeKind::StringLit { value }, "raw") => {
                let valid = value.len() % 2 == 0
                    && value.chars().all(|c| c.is_ascii_hexdigit());
                if !valid {
                    self.error(
                        "\"raw\" expects an even number of hex digits",
                        E_TYPE,
                        arg,
                    );
                }
            }
            (AstNodeKind::StringLit { .. }, _) => {}
            _ => {
                self.error(
                    &format!(
                        "argument to \"{}\" must be a string literal",
                        function
                    ),
                    E_TYPE,
                    arg,
                );
            }
        }
    }

    /// ------- Helpers -------

    fn expect_single_value(&mut self, node: &AstNode) -> Option<String> {
        let (count, ty) = self.visit_expression(node);
        if count != 1 {
            self.error(
                &format!("expression must return a single value, returns {}", count),
                E_TYPE,
                node,
            );
            return None;
        }
        ty
    }

    fn check_type_annotation(&mut self, ty: &Option<String>, node: &AstNode) {
        let Some(ty) = ty else { return };
        match self.dialect.language {
            Language::Assembly => self.error(
                "type annotations are not available in the assembly dialect",
                E_TYPE,
                node,
            ),
            Language::Typed => {
                if !self.dialect.types().contains(&ty.as_str()) {
                    self.error(&format!("unknown type \"{}\"", ty), E_TYPE, node);
                }
            }
        }
    }

    fn check_assignable(&mut self, expected: &str, actual: &Option<String>, node: &AstNode) {
        if let Some(actual) = actual {
            if actual != expected {
                self.error(
                    &format!("cannot use {} value where {} is expected", actual, expected),
                    E_TYPE,
                    node,
                );
            }
        }
    }

    fn declared_type(&self, name: &TypedName) -> String {
        name.ty
            .clone()
            .unwrap_or_else(|| self.dialect.default_type().to_string())
    }

    fn typed_type(&self, ty: &'static str) -> Option<String> {
        if self.typed() { Some(ty.to_string()) } else { None }
    }
}
