//! file: core/src/codegen/transform.rs
//! description: lowering from code bodies to assembly items.
//!
//! Each function body, and the unit's top level code, runs in a frame
//! of `FRAME_SLOTS` local slots. Variables live in slots; arguments are
//! passed on the stack and popped into slots at function entry. With
//! the optimizing transform, slots freed by closed scopes are recycled
//! and overflow moves variables to scratch memory, provided the code
//! never observes the memory frontier.

use std::collections::HashMap;

use crate::analysis::AnalysisInfo;
use crate::ast::{AstNode, AstNodeKind, TypedName};
use crate::dialect::Dialect;
use crate::error::{CodegenError, Unimplemented};
use crate::location::Span;

use super::asm::{AsmItem, AsmOp};
use super::FRAME_SLOTS;

/// First byte address of the spill area. Slots spill a word each.
pub(crate) const SPILL_BASE: u64 = 1 << 16;
const WORD_BYTES: u64 = 8;

/// Where a variable lives within its frame.
#[derive(Debug, Clone, Copy)]
enum Home {
    Slot(u8),
    Spill(u64),
}

struct Frame {
    function: String,
    homes: HashMap<String, Home>,
    scopes: Vec<Vec<String>>,
    free: Vec<u8>,
    next_slot: usize,
    next_spill: u64,
}

impl Frame {
    fn new(function: &str) -> Self {
        Frame {
            function: function.to_string(),
            homes: HashMap::new(),
            scopes: vec![Vec::new()],
            free: Vec::new(),
            next_slot: 0,
            next_spill: 0,
        }
    }
}

pub(crate) struct Transformer<'a> {
    dialect: &'static Dialect,
    info: &'a AnalysisInfo,
    unit_name: &'a str,
    optimize: bool,
    spill: bool,
    container: Option<u8>,
    items: Vec<AsmItem>,
    frames: Vec<Frame>,
    /// (continue target, break target) per open loop.
    loops: Vec<(usize, usize)>,
    /// Exit label per open function body.
    exits: Vec<usize>,
    fn_labels: HashMap<String, usize>,
    /// Function definitions found during lowering, emitted at the end.
    pending: Vec<&'a AstNode>,
    next_label: usize,
}

/// Lower one code body. Functions are placed behind the main code, with
/// a stop guarding the fall-through edge.
pub(crate) fn transform<'a>(
    code: &'a AstNode,
    dialect: &'static Dialect,
    info: &'a AnalysisInfo,
    unit_name: &'a str,
    optimize: bool,
    spill: bool,
    container: Option<u8>,
) -> Result<Vec<AsmItem>, CodegenError> {
    let mut t = Transformer {
        dialect,
        info,
        unit_name,
        optimize,
        spill,
        container,
        items: Vec::new(),
        frames: vec![Frame::new(unit_name)],
        loops: Vec::new(),
        exits: Vec::new(),
        fn_labels: HashMap::new(),
        pending: Vec::new(),
        next_label: 0,
    };
    t.lower_block(code)?;
    if !t.pending.is_empty() {
        if !t.items.last().is_some_and(|item| item.op.terminates()) {
            t.emit(AsmOp::Stop, code.span);
        }
        // Lowering a body may defer further nested definitions.
        let mut i = 0;
        while i < t.pending.len() {
            let def = t.pending[i];
            i += 1;
            t.lower_function(def)?;
        }
    }
    Ok(t.items)
}

impl<'a> Transformer<'a> {
    fn emit(&mut self, op: AsmOp, span: Option<Span>) {
        self.items.push(AsmItem::with_span(op, span));
    }

    fn new_label(&mut self) -> usize {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    fn function_label(&mut self, name: &str) -> usize {
        if let Some(&label) = self.fn_labels.get(name) {
            return label;
        }
        let label = self.new_label();
        self.fn_labels.insert(name.to_string(), label);
        label
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("a frame is always open")
    }

    fn enter_scope(&mut self) {
        self.frame_mut().scopes.push(Vec::new());
    }

    fn exit_scope(&mut self) {
        let optimize = self.optimize;
        let frame = self.frame_mut();
        let names = frame.scopes.pop().expect("a scope is always open");
        for name in names {
            let home = frame.homes.remove(&name);
            if optimize {
                if let Some(Home::Slot(slot)) = home {
                    frame.free.push(slot);
                }
            }
        }
    }

    fn declare(&mut self, name: &str, allow_spill: bool) -> Result<Home, CodegenError> {
        let spill_enabled = self.optimize && self.spill && allow_spill;
        let frame = self.frames.last_mut().expect("a frame is always open");
        let home = if let Some(slot) = frame.free.pop() {
            Home::Slot(slot)
        } else if frame.next_slot < FRAME_SLOTS {
            let slot = frame.next_slot as u8;
            frame.next_slot += 1;
            Home::Slot(slot)
        } else if spill_enabled {
            let address = SPILL_BASE + frame.next_spill * WORD_BYTES;
            frame.next_spill += 1;
            Home::Spill(address)
        } else {
            return Err(CodegenError::FrameTooDeep {
                function: frame.function.clone(),
                needed: frame.next_slot + 1,
            });
        };
        frame.homes.insert(name.to_string(), home);
        frame
            .scopes
            .last_mut()
            .expect("a scope is always open")
            .push(name.to_string());
        Ok(home)
    }

    fn home_of(&self, name: &str) -> Home {
        let frame = self.frames.last().expect("a frame is always open");
        *frame.homes.get(name).unwrap_or_else(|| {
            panic!(
                "identifier \"{}\" has no home in frame \"{}\"",
                name, frame.function
            )
        })
    }

    /// ------- Statements -------

    fn lower_block(&mut self, node: &'a AstNode) -> Result<(), CodegenError> {
        self.enter_scope();
        self.lower_statements_in_current_scope(node)?;
        self.exit_scope();
        Ok(())
    }

    fn lower_statements_in_current_scope(&mut self, node: &'a AstNode) -> Result<(), CodegenError> {
        let AstNodeKind::Block { statements } = &node.kind else {
            panic!("lowering expects a block, got {}", node.kind);
        };
        for stmt in statements {
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, node: &'a AstNode) -> Result<(), CodegenError> {
        match &node.kind {
            AstNodeKind::Block { .. } => self.lower_block(node),
            AstNodeKind::VarDecl { name, value } => {
                self.lower_var_decl(name, value.as_deref(), node)
            }
            AstNodeKind::Assignment { name, value } => {
                let home = self.home_of(name);
                self.lower_store(home, Some(value.as_ref()), node)
            }
            AstNodeKind::If {
                condition,
                body,
                else_body,
            } => self.lower_if(condition, body, else_body.as_deref(), node),
            AstNodeKind::For {
                init,
                condition,
                post,
                body,
            } => self.lower_for(init, condition, post, body, node),
            AstNodeKind::Break => {
                let Some(&(_, break_target)) = self.loops.last() else {
                    panic!("\"break\" survived analysis outside of a loop");
                };
                self.emit(AsmOp::Jump(break_target), node.span);
                Ok(())
            }
            AstNodeKind::Continue => {
                let Some(&(continue_target, _)) = self.loops.last() else {
                    panic!("\"continue\" survived analysis outside of a loop");
                };
                self.emit(AsmOp::Jump(continue_target), node.span);
                Ok(())
            }
            AstNodeKind::Leave => {
                let Some(&exit) = self.exits.last() else {
                    panic!("\"leave\" survived analysis outside of a function");
                };
                self.emit(AsmOp::Jump(exit), node.span);
                Ok(())
            }
            AstNodeKind::FunctionDef { name, .. } => {
                self.function_label(name);
                self.pending.push(node);
                Ok(())
            }
            AstNodeKind::ExprStatement { expr } => self.lower_expression(expr),
            other => panic!("lowering expects a statement, got {}", other),
        }
    }

    fn lower_var_decl(
        &mut self,
        name: &TypedName,
        value: Option<&'a AstNode>,
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        let home = self.declare(&name.name, true)?;
        self.lower_store(home, value, node)
    }

    // A store to a spill address needs the address under the value, so
    // it is pushed before the value is evaluated.
    fn lower_store(
        &mut self,
        home: Home,
        value: Option<&'a AstNode>,
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        match home {
            Home::Slot(slot) => {
                self.lower_value_or_zero(value, node)?;
                self.emit(AsmOp::SlotPut(slot), node.span);
            }
            Home::Spill(address) => {
                self.emit(AsmOp::Push(address), node.span);
                self.lower_value_or_zero(value, node)?;
                self.emit(AsmOp::MStore, node.span);
            }
        }
        Ok(())
    }

    fn lower_value_or_zero(
        &mut self,
        value: Option<&'a AstNode>,
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        match value {
            Some(value) => self.lower_expression(value),
            None => {
                self.emit(AsmOp::Push(0), node.span);
                Ok(())
            }
        }
    }

    fn lower_if(
        &mut self,
        condition: &'a AstNode,
        body: &'a AstNode,
        else_body: Option<&'a AstNode>,
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        self.lower_expression(condition)?;
        self.emit(AsmOp::IsZero, condition.span);
        match else_body {
            None => {
                let end = self.new_label();
                self.emit(AsmOp::JumpIf(end), condition.span);
                self.lower_block(body)?;
                self.emit(AsmOp::Label(end), node.span);
            }
            Some(else_body) => {
                let else_label = self.new_label();
                let end = self.new_label();
                self.emit(AsmOp::JumpIf(else_label), condition.span);
                self.lower_block(body)?;
                self.emit(AsmOp::Jump(end), node.span);
                self.emit(AsmOp::Label(else_label), node.span);
                // An else-if chain arrives here as a nested if statement.
                self.lower_statement(else_body)?;
                self.emit(AsmOp::Label(end), node.span);
            }
        }
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: &'a AstNode,
        condition: &'a AstNode,
        post: &'a AstNode,
        body: &'a AstNode,
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        // The init scope covers the condition, post and body.
        self.enter_scope();
        self.lower_statements_in_current_scope(init)?;
        let top = self.new_label();
        let post_label = self.new_label();
        let end = self.new_label();
        self.emit(AsmOp::Label(top), node.span);
        self.lower_expression(condition)?;
        self.emit(AsmOp::IsZero, condition.span);
        self.emit(AsmOp::JumpIf(end), condition.span);
        self.loops.push((post_label, end));
        self.lower_block(body)?;
        self.loops.pop();
        self.emit(AsmOp::Label(post_label), node.span);
        self.lower_block(post)?;
        self.emit(AsmOp::Jump(top), node.span);
        self.emit(AsmOp::Label(end), node.span);
        self.exit_scope();
        Ok(())
    }

    fn lower_function(&mut self, def: &'a AstNode) -> Result<(), CodegenError> {
        let AstNodeKind::FunctionDef {
            name,
            params,
            ret,
            body,
        } = &def.kind
        else {
            panic!("deferred lowering expects a function definition, got {}", def.kind);
        };
        let entry = self.function_label(name);
        self.emit(AsmOp::Label(entry), def.span);
        self.emit(AsmOp::Enter, def.span);
        self.frames.push(Frame::new(name));
        // Parameters always get real slots. The caller pushed them left
        // to right, so the last one is popped first.
        let mut param_slots = Vec::with_capacity(params.len());
        for param in params {
            let Home::Slot(slot) = self.declare(&param.name, false)? else {
                unreachable!("parameters never spill");
            };
            param_slots.push(slot);
        }
        for slot in param_slots.into_iter().rev() {
            self.emit(AsmOp::SlotPut(slot), def.span);
        }
        let exit = self.new_label();
        self.exits.push(exit);
        if let Some(ret) = ret {
            let home = self.declare(&ret.name, true)?;
            self.lower_store(home, None, def)?;
        }
        self.lower_block(body)?;
        self.emit(AsmOp::Label(exit), def.span);
        if let Some(ret) = ret {
            self.lower_load(&ret.name, def);
        }
        self.emit(AsmOp::Ret, def.span);
        self.exits.pop();
        self.frames.pop();
        Ok(())
    }

    /// ------- Expressions -------

    fn lower_expression(&mut self, node: &'a AstNode) -> Result<(), CodegenError> {
        match &node.kind {
            AstNodeKind::Number { value } => {
                self.emit(AsmOp::Push(*value), node.span);
                Ok(())
            }
            AstNodeKind::Bool { value } => {
                self.emit(AsmOp::Push(u64::from(*value)), node.span);
                Ok(())
            }
            AstNodeKind::Identifier { name } => {
                self.lower_load(name, node);
                Ok(())
            }
            AstNodeKind::Call { name, args } => self.lower_call(name, args, node),
            AstNodeKind::StringLit { .. } => {
                panic!("string literal outside of a builtin argument survived analysis")
            }
            other => panic!("lowering expects an expression, got {}", other),
        }
    }

    fn lower_load(&mut self, name: &str, node: &AstNode) {
        match self.home_of(name) {
            Home::Slot(slot) => self.emit(AsmOp::SlotGet(slot), node.span),
            Home::Spill(address) => {
                self.emit(AsmOp::Push(address), node.span);
                self.emit(AsmOp::MLoad, node.span);
            }
        }
    }

    fn lower_call(
        &mut self,
        name: &str,
        args: &'a [AstNode],
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        if self.dialect.builtin(name).is_some() {
            return self.lower_builtin(name, args, node);
        }
        assert!(
            self.info.functions.contains_key(name),
            "call to \"{}\" that analysis never recorded",
            name
        );
        for arg in args {
            self.lower_expression(arg)?;
        }
        let label = self.function_label(name);
        self.emit(AsmOp::Call(label), node.span);
        Ok(())
    }

    fn lower_builtin(
        &mut self,
        name: &str,
        args: &'a [AstNode],
        node: &'a AstNode,
    ) -> Result<(), CodegenError> {
        match name {
            "dataoffset" | "datasize" => {
                let value = literal_argument(name, args);
                if value.contains('.') {
                    return Err(Unimplemented::new(
                        format!("deep data path \"{}\"", value),
                        node.location.clone(),
                    )
                    .into());
                }
                if value == self.unit_name {
                    if name == "datasize" {
                        return Err(Unimplemented::new(
                            "\"datasize\" of the enclosing unit",
                            node.location.clone(),
                        )
                        .into());
                    }
                    // The enclosing unit starts its own region.
                    self.emit(AsmOp::Push(0), node.span);
                } else if name == "datasize" {
                    self.emit(AsmOp::PushDataSize(value.to_string()), node.span);
                } else {
                    self.emit(AsmOp::PushDataOffset(value.to_string()), node.span);
                }
                Ok(())
            }
            "raw" => {
                if self.container.is_some() {
                    return Err(Unimplemented::new(
                        "\"raw\" bytes inside a sealed container",
                        node.location.clone(),
                    )
                    .into());
                }
                let value = literal_argument(name, args);
                self.emit(AsmOp::Raw(decode_hex(value)), node.span);
                Ok(())
            }
            _ => {
                for arg in args {
                    self.lower_expression(arg)?;
                }
                self.emit(machine_op(name), node.span);
                Ok(())
            }
        }
    }
}

fn literal_argument<'n>(name: &str, args: &'n [AstNode]) -> &'n str {
    let Some(first) = args.first() else {
        panic!("\"{}\" call survived analysis without its argument", name);
    };
    let AstNodeKind::StringLit { value } = &first.kind else {
        panic!("\"{}\" argument survived analysis as a non-literal", name);
    };
    value
}

fn decode_hex(value: &str) -> Vec<u8> {
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).expect("analysis checked the hex digits"))
        .collect()
}

fn machine_op(name: &str) -> AsmOp {
    match name {
        "add" => AsmOp::Add,
        "sub" => AsmOp::Sub,
        "mul" => AsmOp::Mul,
        "div" => AsmOp::Div,
        "mod" => AsmOp::Mod,
        "and" => AsmOp::And,
        "or" => AsmOp::Or,
        "xor" => AsmOp::Xor,
        "not" => AsmOp::Not,
        "shl" => AsmOp::Shl,
        "shr" => AsmOp::Shr,
        "eq" => AsmOp::Eq,
        "lt" => AsmOp::Lt,
        "gt" => AsmOp::Gt,
        "iszero" => AsmOp::IsZero,
        "mload" => AsmOp::MLoad,
        "mstore" => AsmOp::MStore,
        "memtop" => AsmOp::MemTop,
        "sload" => AsmOp::SLoad,
        "sstore" => AsmOp::SStore,
        "input" => AsmOp::Input,
        "fuel" => AsmOp::Fuel,
        "stop" => AsmOp::Stop,
        "abort" => AsmOp::Abort,
        "datacopy" => AsmOp::DataCopy,
        "install" => AsmOp::Install,
        other => panic!("builtin \"{}\" has no machine lowering", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_code;
    use crate::ast::parse_program;
    use crate::dialect::{dialect, KilnVersion, Language};
    use crate::reports::ReportCollector;
    use crate::source::Source;

    fn lower_with(
        text: &str,
        optimize: bool,
        spill: bool,
        container: Option<u8>,
    ) -> Result<Vec<AsmItem>, CodegenError> {
        let d = dialect(Language::Assembly, KilnVersion::latest());
        let source = Source::new("gen.gir", text);
        let mut reports = ReportCollector::new();
        let unit = parse_program(&source, &mut reports).expect("fixture parses");
        assert!(!reports.has_errors(), "{}", reports.format_all());
        let code = unit.code.as_ref().expect("fixture has code");
        let (info, ok) = analyze_code(code, d, &unit.qualified_data_names(), &mut reports)
            .expect("fixture needs no unimplemented features");
        assert!(ok, "{}", reports.format_all());
        transform(code, d, &info, &unit.name, optimize, spill, container)
    }

    fn lower(text: &str) -> Vec<AsmItem> {
        lower_with(text, true, true, None).expect("fixture lowers")
    }

    fn ops(items: &[AsmItem]) -> Vec<AsmOp> {
        items.iter().map(|item| item.op.clone()).collect()
    }

    #[test]
    fn declarations_land_in_slots() {
        let items = lower("{ let x := 7 sstore(0, x) }");
        assert_eq!(
            ops(&items),
            vec![
                AsmOp::Push(7),
                AsmOp::SlotPut(0),
                AsmOp::Push(0),
                AsmOp::SlotGet(0),
                AsmOp::SStore,
            ]
        );
    }

    #[test]
    fn branches_fall_through_to_the_taken_arm() {
        let items = lower("{ if lt(0, 1) { stop() } }");
        assert_eq!(
            ops(&items),
            vec![
                AsmOp::Push(0),
                AsmOp::Push(1),
                AsmOp::Lt,
                AsmOp::IsZero,
                AsmOp::JumpIf(0),
                AsmOp::Stop,
                AsmOp::Label(0),
            ]
        );
    }

    #[test]
    fn loops_wire_break_and_continue_targets() {
        let items =
            lower("{ for { let i := 0 } lt(i, 10) { i := add(i, 1) } { if eq(i, 5) { break } } }");
        assert_eq!(
            ops(&items),
            vec![
                AsmOp::Push(0),
                AsmOp::SlotPut(0),
                AsmOp::Label(0),
                AsmOp::SlotGet(0),
                AsmOp::Push(10),
                AsmOp::Lt,
                AsmOp::IsZero,
                AsmOp::JumpIf(2),
                AsmOp::SlotGet(0),
                AsmOp::Push(5),
                AsmOp::Eq,
                AsmOp::IsZero,
                AsmOp::JumpIf(3),
                AsmOp::Jump(2),
                AsmOp::Label(3),
                AsmOp::Label(1),
                AsmOp::SlotGet(0),
                AsmOp::Push(1),
                AsmOp::Add,
                AsmOp::SlotPut(0),
                AsmOp::Jump(0),
                AsmOp::Label(2),
            ]
        );
    }

    #[test]
    fn functions_sit_behind_a_stop_guard() {
        let items = lower("{ let a := f(2) sstore(0, a) fn f(x) -> r { r := add(x, 1) } }");
        assert_eq!(
            ops(&items),
            vec![
                AsmOp::Push(2),
                AsmOp::Call(0),
                AsmOp::SlotPut(0),
                AsmOp::Push(0),
                AsmOp::SlotGet(0),
                AsmOp::SStore,
                AsmOp::Stop,
                AsmOp::Label(0),
                AsmOp::Enter,
                AsmOp::SlotPut(0),
                AsmOp::Push(0),
                AsmOp::SlotPut(1),
                AsmOp::SlotGet(0),
                AsmOp::Push(1),
                AsmOp::Add,
                AsmOp::SlotPut(1),
                AsmOp::Label(1),
                AsmOp::SlotGet(1),
                AsmOp::Ret,
            ]
        );
    }

    #[test]
    fn closed_scopes_recycle_their_slots() {
        let text = "{ { let a := 1 sstore(0, a) } { let b := 2 sstore(0, b) } }";
        let puts = |items: &[AsmItem]| -> Vec<u8> {
            items
                .iter()
                .filter_map(|item| match item.op {
                    AsmOp::SlotPut(slot) => Some(slot),
                    _ => None,
                })
                .collect()
        };
        let optimized = lower_with(text, true, true, None).expect("lowers");
        assert_eq!(puts(&optimized), vec![0, 0]);
        let plain = lower_with(text, false, false, None).expect("lowers");
        assert_eq!(puts(&plain), vec![0, 1]);
    }

    #[test]
    fn frame_overflow_errors_or_spills() {
        let mut text = String::from("{ ");
        for i in 0..=FRAME_SLOTS {
            text.push_str(&format!("let v{} := {} ", i, i));
        }
        text.push('}');

        let err = lower_with(&text, false, false, None).unwrap_err();
        assert_eq!(
            err,
            CodegenError::FrameTooDeep {
                function: "unit".to_string(),
                needed: FRAME_SLOTS + 1,
            }
        );

        let err = lower_with(&text, true, false, None).unwrap_err();
        assert!(matches!(err, CodegenError::FrameTooDeep { .. }));

        let items = lower_with(&text, true, true, None).expect("spills instead");
        assert!(items.iter().any(|item| item.op == AsmOp::Push(SPILL_BASE)));
        assert!(items.iter().any(|item| item.op == AsmOp::MStore));
    }

    #[test]
    fn raw_bytes_pass_through_unsealed_only() {
        let items = lower("{ raw(\"a1b2\") }");
        assert_eq!(ops(&items), vec![AsmOp::Raw(vec![0xa1, 0xb2])]);

        let err = lower_with("{ raw(\"a1b2\") }", true, true, Some(1)).unwrap_err();
        let CodegenError::Unimplemented(u) = err else {
            panic!("expected an unimplemented fault, got {:?}", err);
        };
        assert!(u.message.contains("sealed"));
    }

    #[test]
    fn data_references_resolve_names_and_refuse_deep_paths() {
        let items = lower(
            "unit \"outer\" { code { datacopy(0, dataoffset(\"inner\"), datasize(\"inner\")) sstore(0, dataoffset(\"outer\")) } unit \"inner\" { code { stop() } } }",
        );
        let lowered = ops(&items);
        assert!(lowered.contains(&AsmOp::PushDataOffset("inner".to_string())));
        assert!(lowered.contains(&AsmOp::PushDataSize("inner".to_string())));
        assert!(!lowered.iter().any(|op| *op == AsmOp::PushDataOffset("outer".to_string())));

        let err = lower_with(
            "unit \"outer\" { code { sstore(0, datasize(\"outer\")) } }",
            true,
            true,
            None,
        )
        .unwrap_err();
        let CodegenError::Unimplemented(u) = err else {
            panic!("expected an unimplemented fault, got {:?}", err);
        };
        assert!(u.message.contains("enclosing"));

        let err = lower_with(
            "unit \"outer\" { code { sstore(0, datasize(\"inner.deep\")) } unit \"inner\" { code { stop() } unit \"deep\" { code { stop() } } } }",
            true,
            true,
            None,
        )
        .unwrap_err();
        let CodegenError::Unimplemented(u) = err else {
            panic!("expected an unimplemented fault, got {:?}", err);
        };
        assert!(u.message.contains("deep data path"));
    }
}
