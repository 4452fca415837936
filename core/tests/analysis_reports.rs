use kiln_core::{
    DebugInfoSelection, KilnStack, KilnVersion, Language, OptimizerSettings, PipelineState,
    Severity,
};

fn fresh_stack() -> KilnStack {
    KilnStack::new(
        KilnVersion::latest(),
        None,
        Language::Assembly,
        OptimizerSettings::standard(),
        DebugInfoSelection::none(),
    )
}

// Analysis keeps walking after a failed unit, so faults in sibling
// units all surface in one run.
#[test]
fn sibling_failures_are_all_reported() {
    let mut stack = fresh_stack();
    let ok = stack.parse_and_analyze(
        "siblings.gir",
        r#"unit "boot" {
            code { stop() }
            unit "left" {
                code { sstore(0, ghost) }
            }
            unit "right" {
                code { phantom := 1 }
            }
        }"#,
    );
    assert!(!ok);
    assert_eq!(stack.state(), PipelineState::Parsed);

    let errors: Vec<_> = stack
        .reports()
        .reports
        .iter()
        .filter(|r| r.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 2, "one diagnostic per failing sibling");
    let all = stack.reports().format_all();
    assert!(all.contains("ghost"));
    assert!(all.contains("phantom"));
}

#[test]
fn unicode_escapes_in_data_are_an_unimplemented_feature() {
    let mut stack = fresh_stack();
    let ok = stack.parse_and_analyze(
        "escape.gir",
        r#"unit "u" { code { stop() } data "d" "snow \u{2603}" }"#,
    );
    assert!(!ok);
    assert_eq!(stack.state(), PipelineState::Empty);
    let all = stack.reports().format_all();
    assert!(all.contains("unimplemented feature"));
    assert!(all.contains("unicode escape"));
}

#[test]
fn duplicate_sub_names_fail_at_parse() {
    let mut stack = fresh_stack();
    let ok = stack.parse_and_analyze(
        "dupes.gir",
        r#"unit "boot" { code { stop() } data "x" hex"00" data "x" hex"11" }"#,
    );
    assert!(!ok);
    assert_eq!(stack.state(), PipelineState::Empty);
    assert!(
        stack
            .reports()
            .format_all()
            .contains("name \"x\" is already used")
    );
}

#[test]
fn deep_unit_nesting_is_rejected() {
    let mut text = String::new();
    for i in 0..65 {
        text.push_str(&format!("unit \"u{}\" {{ code {{ }} ", i));
    }
    text.push_str(&"} ".repeat(65));

    let mut stack = fresh_stack();
    assert!(!stack.parse_and_analyze("deep.gir", &text));
    assert!(
        stack
            .reports()
            .format_all()
            .contains("unit nesting exceeds 64 levels")
    );
}
