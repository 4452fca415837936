use kiln_core::{
    DebugInfoSelection, KilnStack, KilnVersion, Language, OptimizerSettings, PipelineState,
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

const DEAD_LET: &str = "{ let unused := 7 sstore(0, 1) }";
const DEAD_LET_WITH_FRONTIER: &str = "{ let unused := 7 sstore(0, memtop()) }";

#[test]
fn an_explicit_empty_sequence_runs_nothing() {
    let mut stack = stack_with(OptimizerSettings::none());
    assert!(stack.parse_and_analyze("noop.gir", DEAD_LET));
    let before = stack.print();
    assert!(stack.optimize());
    assert_eq!(stack.print(), before);
    assert!(stack.print().contains("unused"));
}

#[test]
fn default_settings_with_the_suite_off_run_the_minimal_fallback() {
    let mut stack = stack_with(OptimizerSettings::minimal());
    assert!(stack.parse_and_analyze("fallback.gir", DEAD_LET));
    assert!(stack.optimize());
    assert!(
        !stack.print().contains("unused"),
        "the fallback prune should drop the dead declaration, got:\n{}",
        stack.print()
    );
}

#[test]
fn the_memory_frontier_freezes_the_disabled_optimizer() {
    let mut stack = stack_with(OptimizerSettings::minimal());
    assert!(stack.parse_and_analyze("frontier.gir", DEAD_LET_WITH_FRONTIER));
    let before = stack.print();
    assert!(stack.optimize());
    assert_eq!(stack.state(), PipelineState::AnalysisSuccessful);
    assert_eq!(stack.print(), before, "a frozen tree must not change shape");
    assert!(stack.print().contains("unused"));
    assert!(stack.reports().is_empty());
}

#[test]
fn the_enabled_suite_optimizes_despite_the_frontier() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(stack.parse_and_analyze("frontier.gir", DEAD_LET_WITH_FRONTIER));
    assert!(stack.optimize());
    let printed = stack.print();
    assert!(!printed.contains("unused"));
    assert!(printed.contains("memtop()"));
}

// The suite weights creation code by size alone while deployed code is
// weighted by expected executions, so the same wide-constant fold is
// refused in one unit and taken in its sibling.
#[test]
fn creation_and_deployed_units_fold_differently() {
    let mut stack = stack_with(OptimizerSettings::standard());
    assert!(stack.parse_and_analyze(
        "weights.gir",
        r#"unit "boot" {
            code { sstore(0, not(0)) }
            unit "boot_deployed" {
                code { sstore(0, not(0)) }
            }
        }"#,
    ));
    assert!(stack.optimize());

    let printed = stack.print();
    let split = printed.find("boot_deployed").expect("deployed unit printed");
    assert!(printed[..split].contains("not(0)"));
    assert!(!printed[..split].contains("18446744073709551615"));
    assert!(printed[split..].contains("18446744073709551615"));
    assert!(!printed[split..].contains("not(0)"));
}

#[test]
#[should_panic(expected = "custom step sequence requires the optimizer suite")]
fn a_custom_sequence_with_the_suite_off_is_a_contract_violation() {
    let mut settings = OptimizerSettings::minimal();
    settings.steps = "sc".to_string();
    let mut stack = stack_with(settings);
    assert!(stack.parse_and_analyze("bad.gir", "{ sstore(0, 1) }"));
    stack.optimize();
}
