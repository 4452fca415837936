use kiln_core::codegen::asm::{CONTAINER_HEADER_LEN, CONTAINER_MAGIC};
use kiln_core::{
    DebugInfoSelection, KilnStack, KilnVersion, Language, Machine, OptimizerSettings,
};

fn stack_with_container(container_version: Option<u8>) -> KilnStack {
    KilnStack::new(
        KilnVersion::latest(),
        container_version,
        Language::Assembly,
        OptimizerSettings::minimal(),
        DebugInfoSelection::none(),
    )
}

// The classic shape: creation code copies the deployed unit out of its
// own binary and installs it.
const PAIRED: &str = r#"unit "boot" {
    code {
        let size := datasize("app")
        datacopy(0, dataoffset("app"), size)
        sstore(1, install(0, size))
    }
    unit "app" {
        code { sstore(0, input(0)) }
    }
}"#;

const TWO_SUBS: &str = r#"unit "boot" {
    code { stop() }
    unit "A" {
        code { stop() }
    }
    unit "A_deployed" {
        code { sstore(0, 1) }
    }
}"#;

#[test]
fn a_single_sub_unit_is_the_deployed_artifact() {
    let mut stack = stack_with_container(None);
    assert!(stack.parse_and_analyze("pair.gir", PAIRED));
    let (creation, deployed) = stack.assemble_with_deployed(Machine::Kiln, None);

    let creation_binary = creation.bytecode.expect("creation bytecode");
    assert!(creation_binary.unresolved_refs.is_empty());
    let deployed_binary = deployed.bytecode.expect("deployed bytecode");
    assert_eq!(deployed.assembly.expect("deployed assembly").name, "app");
    assert!(deployed.source_map.is_some());

    // The creation artifact embeds the deployed code verbatim.
    assert!(!deployed_binary.bytecode.is_empty());
    assert!(
        creation_binary
            .bytecode
            .windows(deployed_binary.bytecode.len())
            .any(|w| w == deployed_binary.bytecode),
        "deployed code is not a byte range of the creation binary"
    );
}

#[test]
fn several_sub_units_produce_no_deployed_artifact_without_a_name() {
    let mut stack = stack_with_container(None);
    assert!(stack.parse_and_analyze("two.gir", TWO_SUBS));
    let (creation, deployed) = stack.assemble_with_deployed(Machine::Kiln, None);
    assert!(creation.bytecode.is_some());
    assert!(deployed.bytecode.is_none());
    assert!(deployed.assembly.is_none());
    assert!(deployed.source_map.is_none());
}

#[test]
fn an_explicit_name_selects_the_deployed_sub() {
    let mut stack = stack_with_container(None);
    assert!(stack.parse_and_analyze("two.gir", TWO_SUBS));
    let (_, deployed) = stack.assemble_with_deployed(Machine::Kiln, Some("A_deployed"));
    assert_eq!(deployed.assembly.expect("deployed assembly").name, "A_deployed");
    assert!(deployed.bytecode.is_some());
}

#[test]
#[should_panic(expected = "no sub-assembly named")]
fn a_missing_explicit_name_is_fatal() {
    let mut stack = stack_with_container(None);
    assert!(stack.parse_and_analyze("two.gir", TWO_SUBS));
    stack.assemble_with_deployed(Machine::Kiln, Some("ghost"));
}

#[test]
fn the_container_header_seals_both_outer_artifacts() {
    let mut stack = stack_with_container(Some(1));
    assert!(stack.parse_and_analyze("sealed.gir", PAIRED));
    let (creation, deployed) = stack.assemble_with_deployed(Machine::Kiln, None);

    let creation_bytes = creation.bytecode.expect("creation bytecode").bytecode;
    assert_eq!(&creation_bytes[..4], CONTAINER_MAGIC);
    assert_eq!(creation_bytes[4], 1);
    let body_len = u32::from_le_bytes(creation_bytes[5..9].try_into().unwrap()) as usize;
    assert_eq!(body_len, creation_bytes.len() - CONTAINER_HEADER_LEN);

    // The deployed artifact is sealed in its own right, while the copy
    // embedded in the creation body stays bare. A sealed deployed
    // binary therefore never appears inside the creation binary.
    let deployed_bytes = deployed.bytecode.expect("deployed bytecode").bytecode;
    assert_eq!(&deployed_bytes[..4], CONTAINER_MAGIC);
    assert!(
        !creation_bytes
            .windows(deployed_bytes.len())
            .any(|w| w == deployed_bytes)
    );
}

#[test]
fn raw_bytes_pass_through_unsealed_artifacts() {
    let mut stack = stack_with_container(None);
    assert!(stack.parse_and_analyze("raw.gir", "{ raw(\"a1b2\") stop() }"));
    let creation = stack.assemble(Machine::Kiln);
    let bytes = creation.bytecode.expect("creation bytecode").bytecode;
    assert!(bytes.windows(2).any(|w| w == [0xa1, 0xb2]));
}

#[test]
fn raw_bytes_under_a_sealed_container_are_reported() {
    let mut stack = stack_with_container(Some(1));
    assert!(stack.parse_and_analyze("raw.gir", "{ raw(\"a1b2\") stop() }"));
    let (creation, deployed) = stack.assemble_with_deployed(Machine::Kiln, None);
    assert!(creation.bytecode.is_none());
    assert!(deployed.bytecode.is_none());
    assert!(stack.reports().has_errors());
    assert!(stack.reports().format_all().contains("sealed container"));
}
