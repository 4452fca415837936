//! file: core/src/pipeline.rs
//! description: the compilation pipeline from source text to artifacts.
//!
//! `KilnStack` owns one source, one unit tree and one report collector,
//! and drives them through parse, analysis, optimization and assembly.
//! Stage order is a caller contract: operations assert the pipeline has
//! reached the state they need. After optimization the tree is printed
//! and re-parsed through a fresh stack; the optimizer must never emit
//! code its own analysis rejects, so a round-trip failure panics with
//! the regenerated source attached.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, trace};
use serde_json::{json, Value};

use crate::analysis::analyze_code;
use crate::ast::{parse_program, AstNode, AstNodeKind, TypedName};
use crate::codegen::{self, Assembly, LinkedBinary};
use crate::dialect::{dialect, Dialect, KilnVersion, Language};
use crate::error::{CodegenError, Unimplemented};
use crate::object::{SubNode, Unit};
use crate::optimize::{self, FuelMeter, Suite, DEFAULT_CLEANUP_STEPS, DEFAULT_STEPS};
use crate::printer::{self, DebugInfoSelection};
use crate::reports::{self, Report, ReportCollector};
use crate::source::Source;

/// Units whose name ends with this are deployed code; everything else,
/// the root included, is creation code.
pub const DEPLOYED_SUFFIX: &str = "_deployed";

/// Step sequence forced when the suite is off but slot pressure still
/// has to come down.
const MINIMAL_STEPS: &str = "u";

/// Stages a pipeline moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Empty,
    Parsed,
    AnalysisSuccessful,
}

/// Optimizer configuration, consumed read-only by the pipeline.
///
/// An empty `steps`/`cleanup_steps` pair is a meaningful "run nothing"
/// request, distinct from leaving the defaults in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerSettings {
    /// Whether the transformation suite runs at all.
    pub run_optimizer: bool,
    /// Whether slot pressure is reduced via recycling and spilling.
    pub optimize_stack_allocation: bool,
    pub steps: String,
    pub cleanup_steps: String,
    /// Expected executions per deployment, weighing deployed code in
    /// fuel trade-offs. Creation code always weighs as one execution.
    pub expected_executions: u64,
}

impl OptimizerSettings {
    /// Nothing runs, not even the minimal fallback.
    pub fn none() -> Self {
        OptimizerSettings {
            run_optimizer: false,
            optimize_stack_allocation: false,
            steps: String::new(),
            cleanup_steps: String::new(),
            expected_executions: 100,
        }
    }

    /// Suite off with default sequences. The pipeline still runs the
    /// minimal fallback pass to keep frames allocatable.
    pub fn minimal() -> Self {
        OptimizerSettings {
            run_optimizer: false,
            optimize_stack_allocation: false,
            steps: DEFAULT_STEPS.to_string(),
            cleanup_steps: DEFAULT_CLEANUP_STEPS.to_string(),
            expected_executions: 100,
        }
    }

    /// The full suite with default sequences.
    pub fn standard() -> Self {
        OptimizerSettings {
            run_optimizer: true,
            optimize_stack_allocation: true,
            steps: DEFAULT_STEPS.to_string(),
            cleanup_steps: DEFAULT_CLEANUP_STEPS.to_string(),
            expected_executions: 100,
        }
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings::minimal()
    }
}

/// Assembly target. Kiln is the only machine today; the selector keeps
/// the assemble interface explicit about what it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Kiln,
}

/// One encoded artifact: bytes, the assembly they came from, and the
/// byte-offset-to-source map. All fields stay empty when assembly
/// failed with a reported diagnostic.
#[derive(Debug, Clone, Default)]
pub struct MachineAssemblyObject {
    pub bytecode: Option<LinkedBinary>,
    pub assembly: Option<Arc<Assembly>>,
    pub source_map: Option<String>,
}

/// The compilation pipeline. See the module docs for the stage rules.
pub struct KilnStack {
    version: KilnVersion,
    container_version: Option<u8>,
    language: Language,
    settings: OptimizerSettings,
    debug_info: DebugInfoSelection,
    state: PipelineState,
    source: Option<Source>,
    unit: Option<Unit>,
    reports: ReportCollector,
}

impl KilnStack {
    pub fn new(
        version: KilnVersion,
        container_version: Option<u8>,
        language: Language,
        settings: OptimizerSettings,
        debug_info: DebugInfoSelection,
    ) -> Self {
        KilnStack {
            version,
            container_version,
            language,
            settings,
            debug_info,
            state: PipelineState::Empty,
            source: None,
            unit: None,
            reports: ReportCollector::new(),
        }
    }

    fn dialect(&self) -> &'static Dialect {
        dialect(self.language, self.version)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Reports are readable in every state.
    pub fn reports(&self) -> &ReportCollector {
        &self.reports
    }

    /// The source fed to the last parse. What diagnostics and source
    /// maps refer to, even after the tree was rebuilt from printed form.
    pub fn source(&self) -> &Source {
        assert!(
            self.state >= PipelineState::Parsed,
            "no source before a successful parse"
        );
        self.source.as_ref().expect("parsed pipeline lost its source")
    }

    /// The current unit tree.
    pub fn unit(&self) -> &Unit {
        assert!(
            self.state >= PipelineState::AnalysisSuccessful,
            "the unit tree is not exposed before successful analysis"
        );
        self.unit.as_ref().expect("analyzed pipeline lost its unit")
    }

    /// Parse `text` into a fresh unit tree. Failures land in the
    /// reports and leave the pipeline empty.
    pub fn parse(&mut self, name: &str, text: &str) -> bool {
        assert_eq!(
            self.state,
            PipelineState::Empty,
            "parse requires an empty pipeline"
        );
        let source = Source::new(name, text);
        let parsed = parse_program(&source, &mut self.reports);
        self.source = Some(source);
        match parsed {
            Some(unit) => {
                debug!("parsed \"{}\" into unit \"{}\"", name, unit.name);
                self.unit = Some(unit);
                self.state = PipelineState::Parsed;
                true
            }
            None => false,
        }
    }

    /// Analyze the parsed tree. Every unit is visited even after a
    /// failure, so one run collects every diagnostic the tree has.
    pub fn analyze_parsed(&mut self) -> bool {
        assert!(
            self.state >= PipelineState::Parsed,
            "analysis requires a parsed pipeline"
        );
        let mut unit = self.unit.take().expect("parsed pipeline lost its unit");
        let ok = self.analyze_unit(&mut unit);
        self.unit = Some(unit);
        if ok {
            self.state = PipelineState::AnalysisSuccessful;
            debug!("analysis succeeded");
        }
        ok
    }

    /// The combined entry point. Resets the pipeline first; this is the
    /// one place the report collector is cleared.
    pub fn parse_and_analyze(&mut self, name: &str, text: &str) -> bool {
        self.reports.clear();
        self.state = PipelineState::Empty;
        self.unit = None;
        self.source = None;
        if !self.parse(name, text) {
            return false;
        }
        self.analyze_parsed()
    }

    fn analyze_unit(&mut self, unit: &mut Unit) -> bool {
        let mut ok = true;
        if let Some(code) = &unit.code {
            let names = unit.qualified_data_names();
            match analyze_code(code, self.dialect(), &names, &mut self.reports) {
                Ok((info, success)) => {
                    unit.analysis_info = Some(info);
                    ok &= success;
                }
                Err(fault) => {
                    self.report_unimplemented(&fault);
                    ok = false;
                }
            }
        }
        for sub in unit.sub_units_mut() {
            ok &= self.analyze_unit(sub);
        }
        ok
    }

    /// Optimize the tree in place, then rebuild it from printed form.
    ///
    /// With the suite disabled and a tree that observes the memory
    /// frontier this is a complete no-op: the minimal fallback would
    /// move variables into the memory the code is watching.
    pub fn optimize(&mut self) -> bool {
        assert!(
            self.state >= PipelineState::AnalysisSuccessful,
            "optimization requires successful analysis"
        );
        let d = self.dialect();
        {
            let unit = self.unit.as_ref().expect("analyzed pipeline lost its unit");
            if !self.settings.run_optimizer && optimize::unit_contains_memtop(d, unit) {
                debug!("optimizer disabled and the tree observes the memory frontier, leaving it untouched");
                return true;
            }
        }
        // The tree is about to change shape, its analysis data with it.
        self.state = PipelineState::Parsed;
        let mut unit = self.unit.take().expect("analyzed pipeline lost its unit");
        let outcome = self.optimize_unit(&mut unit, true);
        self.unit = Some(unit);
        match outcome {
            Ok(()) => {
                self.reparse();
                true
            }
            Err(fault) => {
                self.report_unimplemented(&fault);
                false
            }
        }
    }

    // Post-order so that a parent is optimized after all its children.
    fn optimize_unit(&mut self, unit: &mut Unit, is_creation: bool) -> Result<(), Unimplemented> {
        for sub in unit.sub_units_mut() {
            let sub_is_creation = !sub.name.ends_with(DEPLOYED_SUFFIX);
            self.optimize_unit(sub, sub_is_creation)?;
        }

        let d = self.dialect();
        let meter = if d.machine {
            Some(FuelMeter::new(
                d,
                is_creation,
                self.settings.expected_executions,
            ))
        } else {
            None
        };
        let (stack_allocation, steps, cleanup) = self.resolve_steps();
        // Throughput weighting only makes sense for code that runs more
        // than once.
        let weight = if is_creation {
            None
        } else {
            Some(self.settings.expected_executions)
        };
        debug!(
            "optimizing unit \"{}\" as {} code",
            unit.name,
            if is_creation { "creation" } else { "deployed" }
        );
        let externals = BTreeSet::new();
        Suite::run(
            d,
            meter.as_ref(),
            unit,
            stack_allocation,
            steps,
            cleanup,
            weight,
            &externals,
        )
    }

    /// Which sequences actually run, given the settings.
    ///
    /// With the suite off, an explicitly empty configuration runs
    /// nothing at all, while untouched defaults collapse to the minimal
    /// fallback with stack allocation forced on. Anything else with the
    /// suite off is a configuration bug.
    fn resolve_steps(&self) -> (bool, &str, &str) {
        if self.settings.run_optimizer {
            return (
                self.settings.optimize_stack_allocation,
                &self.settings.steps,
                &self.settings.cleanup_steps,
            );
        }
        let combined = format!("{}:{}", self.settings.steps, self.settings.cleanup_steps);
        if Suite::is_empty_sequence(&combined) {
            (false, "", "")
        } else {
            assert!(
                self.settings.steps == DEFAULT_STEPS
                    && self.settings.cleanup_steps == DEFAULT_CLEANUP_STEPS,
                "a custom step sequence requires the optimizer suite to be enabled"
            );
            (true, MINIMAL_STEPS, "")
        }
    }

    /// Print the tree and push it through a brand-new stack, adopting
    /// the resulting tree. Source locations in the old tree refer into
    /// source snippets the printer drops, so positions are regenerated
    /// rather than carried over. The retained source and reports still
    /// describe the user's input and survive the swap.
    fn reparse(&mut self) {
        let unit = self.unit.as_ref().expect("pipeline lost its unit");
        let text = printer::print_unit(unit);
        trace!("reparsing optimized tree:\n{}", text);
        let mut fresh = KilnStack::new(
            self.version,
            self.container_version,
            self.language,
            self.settings.clone(),
            self.debug_info,
        );
        let name = self
            .source
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| "optimized".to_string());
        if !fresh.parse_and_analyze(&name, &text) {
            panic!(
                "optimizer produced invalid code\n{}\nreports:\n{}",
                text,
                fresh.reports.format_all()
            );
        }
        self.unit = fresh.unit.take();
        self.state = PipelineState::AnalysisSuccessful;
    }

    /// Assemble the creation artifact only.
    pub fn assemble(&mut self, machine: Machine) -> MachineAssemblyObject {
        self.assemble_with_deployed(machine, None).0
    }

    /// Assemble the creation artifact and, when one qualifies, the
    /// deployed artifact.
    ///
    /// An explicit `deploy_name` must match an immediate sub-assembly.
    /// Without one, a single sub-assembly is taken to be the deployed
    /// code; zero or several mean no deployed artifact. The creation
    /// artifact always embeds every sub-assembly either way.
    pub fn assemble_with_deployed(
        &mut self,
        machine: Machine,
        deploy_name: Option<&str>,
    ) -> (MachineAssemblyObject, MachineAssemblyObject) {
        assert!(
            self.state >= PipelineState::AnalysisSuccessful,
            "assembly requires successful analysis"
        );
        let Machine::Kiln = machine;
        let d = self.dialect();
        let unit = self.unit.as_ref().expect("analyzed pipeline lost its unit");
        // The slot transform must agree with what the optimizer did to
        // the tree: requested stack allocation, or the minimal fallback
        // that ran because the suite was off and the tree is spillable.
        let optimize_slots = self.settings.optimize_stack_allocation
            || (!self.settings.run_optimizer && !optimize::unit_contains_memtop(d, unit));
        let assembly = match codegen::compile_unit(unit, d, optimize_slots, self.container_version)
        {
            Ok(assembly) => Arc::new(assembly),
            Err(CodegenError::Unimplemented(fault)) => {
                self.report_unimplemented(&fault);
                return (
                    MachineAssemblyObject::default(),
                    MachineAssemblyObject::default(),
                );
            }
            Err(err) => {
                self.reports.push(Report::error(
                    &err.to_string(),
                    None,
                    None,
                    Some(reports::E_LIMIT),
                    None,
                    None,
                ));
                return (
                    MachineAssemblyObject::default(),
                    MachineAssemblyObject::default(),
                );
            }
        };

        let deployed_assembly = match deploy_name {
            Some(name) => match assembly.find_sub_unit(name) {
                Some(sub) => Some(Arc::clone(sub)),
                None => panic!(
                    "no sub-assembly named \"{}\" under \"{}\"",
                    name, assembly.name
                ),
            },
            None => {
                let mut subs = assembly.sub_units();
                match (subs.next(), subs.next()) {
                    (Some(only), None) => Some(Arc::clone(only)),
                    _ => None,
                }
            }
        };

        let creation = self.finish_assembly(&assembly, true);
        let deployed = match &deployed_assembly {
            Some(sub) => self.finish_assembly(sub, false),
            None => MachineAssemblyObject::default(),
        };
        (creation, deployed)
    }

    fn finish_assembly(
        &mut self,
        assembly: &Arc<Assembly>,
        is_creation: bool,
    ) -> MachineAssemblyObject {
        match assembly.assemble(self.container_version) {
            Ok(binary) => {
                if is_creation {
                    // Everything a creation binary refers to is embedded
                    // in it, so nothing may stay unresolved.
                    assert!(
                        binary.unresolved_refs.is_empty(),
                        "creation binary for \"{}\" left references unresolved: {:?}",
                        assembly.name,
                        binary.unresolved_refs
                    );
                }
                MachineAssemblyObject {
                    bytecode: Some(binary),
                    assembly: Some(Arc::clone(assembly)),
                    source_map: Some(assembly.compute_source_map()),
                }
            }
            Err(fault) => {
                self.report_unimplemented(&fault);
                MachineAssemblyObject::default()
            }
        }
    }

    /// The tree printed back to Graphite source, honoring the debug
    /// info selection, with a trailing newline.
    pub fn print(&self) -> String {
        assert!(
            self.state >= PipelineState::Parsed,
            "printing requires a parsed pipeline"
        );
        let unit = self.unit.as_ref().expect("parsed pipeline lost its unit");
        let mut out = printer::print_unit_with(unit, self.debug_info);
        out.push('\n');
        out
    }

    /// The tree as a structured document.
    pub fn ast_json(&self) -> Value {
        assert!(
            self.state >= PipelineState::Parsed,
            "the AST export requires a parsed pipeline"
        );
        let unit = self.unit.as_ref().expect("parsed pipeline lost its unit");
        unit_json(unit)
    }

    fn report_unimplemented(&mut self, fault: &Unimplemented) {
        self.reports.push(Report::error(
            &format!("unimplemented feature: {}", fault.message),
            fault.location.clone(),
            None,
            Some(reports::E_UNSUPPORTED),
            None,
            None,
        ));
    }
}

fn unit_json(unit: &Unit) -> Value {
    json!({
        "kind": "unit",
        "name": unit.name,
        "code": unit.code.as_ref().map(node_json),
        "subs": unit
            .subs
            .iter()
            .map(|sub| match sub {
                SubNode::Unit(u) => unit_json(u),
                SubNode::Data(d) => json!({
                    "kind": "data",
                    "name": d.name,
                    "bytes": d.contents.len(),
                }),
            })
            .collect::<Vec<_>>(),
    })
}

fn typed_name_json(name: &TypedName) -> Value {
    json!({ "name": name.name, "type": name.ty })
}

fn node_json(node: &AstNode) -> Value {
    match node.get_kind() {
        AstNodeKind::Block { statements } => json!({
            "kind": "block",
            "statements": statements.iter().map(node_json).collect::<Vec<_>>(),
        }),
        AstNodeKind::VarDecl { name, value } => json!({
            "kind": "let",
            "name": typed_name_json(name),
            "value": value.as_deref().map(node_json),
        }),
        AstNodeKind::Assignment { name, value } => json!({
            "kind": "assign",
            "name": name,
            "value": node_json(value),
        }),
        AstNodeKind::If {
            condition,
            body,
            else_body,
        } => json!({
            "kind": "if",
            "condition": node_json(condition),
            "body": node_json(body),
            "else": else_body.as_deref().map(node_json),
        }),
        AstNodeKind::For {
            init,
            condition,
            post,
            body,
        } => json!({
            "kind": "for",
            "init": node_json(init),
            "condition": node_json(condition),
            "post": node_json(post),
            "body": node_json(body),
        }),
        AstNodeKind::Break => json!({ "kind": "break" }),
        AstNodeKind::Continue => json!({ "kind": "continue" }),
        AstNodeKind::Leave => json!({ "kind": "leave" }),
        AstNodeKind::FunctionDef {
            name,
            params,
            ret,
            body,
        } => json!({
            "kind": "fn",
            "name": name,
            "params": params.iter().map(typed_name_json).collect::<Vec<_>>(),
            "ret": ret.as_ref().map(typed_name_json),
            "body": node_json(body),
        }),
        AstNodeKind::ExprStatement { expr } => json!({
            "kind": "expr",
            "expr": node_json(expr),
        }),
        AstNodeKind::Call { name, args } => json!({
            "kind": "call",
            "name": name,
            "args": args.iter().map(node_json).collect::<Vec<_>>(),
        }),
        AstNodeKind::Identifier { name } => json!({ "kind": "id", "name": name }),
        AstNodeKind::Number { value } => json!({ "kind": "number", "value": value }),
        AstNodeKind::Bool { value } => json!({ "kind": "bool", "value": value }),
        AstNodeKind::StringLit { value } => json!({ "kind": "string", "value": value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_stack() -> KilnStack {
        KilnStack::new(
            KilnVersion::latest(),
            None,
            Language::Assembly,
            OptimizerSettings::standard(),
            DebugInfoSelection::none(),
        )
    }

    #[test]
    #[should_panic(expected = "analysis requires a parsed pipeline")]
    fn analysis_before_parse_is_a_contract_violation() {
        let mut stack = standard_stack();
        stack.analyze_parsed();
    }

    #[test]
    #[should_panic(expected = "assembly requires successful analysis")]
    fn assembly_before_analysis_is_a_contract_violation() {
        let mut stack = standard_stack();
        assert!(stack.parse("gate.gir", "{ stop() }"));
        stack.assemble(Machine::Kiln);
    }

    #[test]
    #[should_panic(expected = "optimizer produced invalid code")]
    fn corrupted_trees_fail_the_round_trip_loudly() {
        let mut stack = standard_stack();
        assert!(stack.parse_and_analyze("round.gir", "{ let x := 1 sstore(0, x) }"));
        // Simulate a defective pass: an assignment to a name that does
        // not exist survives printing but not re-analysis.
        let unit = stack.unit.as_mut().unwrap();
        let code = unit.code.as_mut().unwrap();
        let AstNodeKind::Block { statements } = &mut code.kind else {
            panic!("code body must be a block");
        };
        statements.push(AstNode::synthetic(AstNodeKind::Assignment {
            name: "ghost".to_string(),
            value: Box::new(AstNode::synthetic(AstNodeKind::Number { value: 2 })),
        }));
        stack.optimize();
    }

    #[test]
    fn parse_failures_leave_the_pipeline_empty() {
        let mut stack = standard_stack();
        assert!(!stack.parse("bad.gir", "{ let := }"));
        assert_eq!(stack.state(), PipelineState::Empty);
        assert!(!stack.reports().is_empty());
    }

    #[test]
    fn ast_json_has_the_tree_shape() {
        let mut stack = standard_stack();
        assert!(stack.parse_and_analyze(
            "doc.gir",
            "unit \"app\" { code { let x := 1 sstore(0, x) } data \"blob\" hex\"ff\" }",
        ));
        let doc = stack.ast_json();
        assert_eq!(doc["name"], "app");
        assert_eq!(doc["subs"][0]["kind"], "data");
        assert_eq!(doc["subs"][0]["bytes"], 1);
        assert_eq!(doc["code"]["statements"][0]["kind"], "let");
    }
}
