use kiln_core::{
    DebugInfoSelection, KilnStack, KilnVersion, Language, Machine, OptimizerSettings,
    PipelineState,
};

fn stack_with(settings: OptimizerSettings) -> KilnStack {
    KilnStack::new(
        KilnVersion::latest(),
        None,
        Language::Assembly,
        settings,
        DebugInfoSelection::none(),
    )
}

#[test]
fn a_fresh_pipeline_walks_the_stages_in_order() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert_eq!(stack.state(), PipelineState::Empty);

    assert!(stack.parse("stages.gir", "{ sstore(0, add(1, 2)) }"));
    assert_eq!(stack.state(), PipelineState::Parsed);

    assert!(stack.analyze_parsed());
    assert_eq!(stack.state(), PipelineState::AnalysisSuccessful);

    assert!(stack.optimize());
    assert_eq!(stack.state(), PipelineState::AnalysisSuccessful);

    let artifact = stack.assemble(Machine::Kiln);
    let binary = artifact.bytecode.expect("creation bytecode");
    assert!(!binary.bytecode.is_empty(), "assembly produced no bytes");
    assert!(artifact.assembly.is_some());
    assert!(artifact.source_map.is_some());
}

#[test]
fn failed_analysis_keeps_the_state_at_parsed() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(stack.parse("stages.gir", "{ sstore(0, ghost) }"));
    assert!(!stack.analyze_parsed());
    assert_eq!(stack.state(), PipelineState::Parsed);
    assert!(stack.reports().has_errors());
}

#[test]
fn parse_failures_leave_the_pipeline_empty() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(!stack.parse("broken.gir", "{ let := }"));
    assert_eq!(stack.state(), PipelineState::Empty);
    assert!(!stack.reports().is_empty());
}

#[test]
fn parse_and_analyze_clears_earlier_reports() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(!stack.parse_and_analyze("first.gir", "{ let := }"));
    assert!(!stack.reports().is_empty());

    assert!(stack.parse_and_analyze("second.gir", "{ stop() }"));
    assert!(stack.reports().is_empty(), "stale reports survived the reset");
    assert_eq!(stack.state(), PipelineState::AnalysisSuccessful);
}

#[test]
fn the_source_accessor_returns_the_retained_input() {
    let mut stack = stack_with(OptimizerSettings::standard());
    let text = "{ sstore(0, 1) }";
    assert!(stack.parse_and_analyze("retained.gir", text));
    assert_eq!(stack.source().name, "retained.gir");
    assert_eq!(stack.source().content, text);

    // Optimization rebuilds the tree from printed form; the retained
    // source still describes the user's input.
    assert!(stack.optimize());
    assert_eq!(stack.source().content, text);
}

#[test]
fn print_renders_the_canonical_unit_with_a_trailing_newline() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(stack.parse_and_analyze("print.gir", "{ stop() }"));
    let printed = stack.print();
    assert!(
        printed.starts_with("unit \"unit\" {"),
        "bare blocks should print as an anonymous unit, got:\n{}",
        printed
    );
    assert!(printed.ends_with("}\n"));
}

#[test]
fn the_unit_accessor_exposes_the_analyzed_tree() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(stack.parse_and_analyze("tree.gir", "unit \"boot\" { code { stop() } }"));
    assert_eq!(stack.unit().name, "boot");
    assert!(stack.unit().analysis_info.is_some());
}

#[test]
#[should_panic(expected = "not exposed before successful analysis")]
fn the_unit_accessor_before_analysis_is_a_contract_violation() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(stack.parse("gate.gir", "{ stop() }"));
    let _ = stack.unit();
}
