//! file: core/src/optimize/suite.rs
//! description: step-sequence interpreter driving the transformation passes.

use std::collections::BTreeSet;
use std::iter::Peekable;
use std::str::Chars;

use log::{debug, trace};

use crate::ast::AstNode;
use crate::dialect::Dialect;
use crate::error::Unimplemented;
use crate::object::Unit;

use super::fuel::FuelMeter;
use super::{compress, dce, fold, joiner, prune, simplify};

/// Default step sequence: simplify control flow once, then fold, join
/// and cut dead code until stable, then drop unused definitions.
pub const DEFAULT_STEPS: &str = "s[cjd]u";
/// Default cleanup sequence, run after stack compression.
pub const DEFAULT_CLEANUP_STEPS: &str = "cd";

/// The step characters the suite understands.
const KNOWN_STEPS: &str = "scduj";

/// Upper bound on repetitions of one bracket group.
const MAX_GROUP_ROUNDS: usize = 12;

/// The transformation suite. Interprets step sequences over a unit's
/// own code: `s` simplifies control flow over literal conditions, `c`
/// folds constants, `d` drops unreachable statements, `u` drops unused
/// definitions, `j` joins single-use variables into their use site. A
/// bracket group `[...]` repeats until the tree stops changing.
pub struct Suite;

impl Suite {
    /// Runs the main sequence, the stack compressor when stack
    /// allocation is requested, then the cleanup sequence. Mutates only
    /// the given unit's own code, never its sub-units. Sequences are
    /// caller contracts: unknown step characters panic.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        dialect: &Dialect,
        meter: Option<&FuelMeter>,
        unit: &mut Unit,
        optimize_stack_allocation: bool,
        steps: &str,
        cleanup_steps: &str,
        expected_executions: Option<u64>,
        external_names: &BTreeSet<String>,
    ) -> Result<(), Unimplemented> {
        let ops = parse_sequence(steps);
        let cleanup_ops = parse_sequence(cleanup_steps);

        let Some(code) = unit.code.as_mut() else {
            panic!("unit \"{}\" has no code to optimize", unit.name);
        };

        debug!(
            "optimizing unit \"{}\": steps \"{}\", cleanup \"{}\", stack allocation {}",
            unit.name, steps, cleanup_steps, optimize_stack_allocation
        );

        apply_sequence(&ops, dialect, meter, code, external_names);
        if optimize_stack_allocation {
            compress::run(dialect, meter, code, expected_executions, external_names);
        }
        apply_sequence(&cleanup_ops, dialect, meter, code, external_names);
        Ok(())
    }

    /// Check a user-supplied sequence without running it. `run` treats
    /// sequences as caller contracts, so anything user-facing goes
    /// through here first.
    pub fn validate_sequence(sequence: &str) -> Result<(), String> {
        let mut depth = 0usize;
        for step in sequence.chars() {
            match step {
                '[' => depth += 1,
                ']' => {
                    if depth == 0 {
                        return Err(format!(
                            "unbalanced ']' in optimizer sequence \"{}\"",
                            sequence
                        ));
                    }
                    depth -= 1;
                }
                ' ' | '\n' => {}
                step if KNOWN_STEPS.contains(step) => {}
                other => {
                    return Err(format!(
                        "unknown optimizer step '{}' in sequence \"{}\"",
                        other, sequence
                    ));
                }
            }
        }
        if depth > 0 {
            return Err(format!(
                "unbalanced '[' in optimizer sequence \"{}\"",
                sequence
            ));
        }
        Ok(())
    }

    /// True for the canonical "run nothing" configuration: at most one
    /// steps/cleanup separator plus whitespace, nothing else.
    pub fn is_empty_sequence(sequence: &str) -> bool {
        let mut separators = 0;
        for step in sequence.chars() {
            match step {
                ':' => {
                    separators += 1;
                    if separators > 1 {
                        return false;
                    }
                }
                ' ' | '\n' => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SequenceOp {
    Step(char),
    Group(Vec<SequenceOp>),
}

fn parse_sequence(sequence: &str) -> Vec<SequenceOp> {
    let mut chars = sequence.chars().peekable();
    parse_ops(&mut chars, sequence, false)
}

fn parse_ops(chars: &mut Peekable<Chars>, sequence: &str, in_group: bool) -> Vec<SequenceOp> {
    let mut ops = Vec::new();
    while let Some(&c) = chars.peek() {
        match c {
            '[' => {
                chars.next();
                ops.push(SequenceOp::Group(parse_ops(chars, sequence, true)));
                // consume the ']'
                chars.next();
            }
            ']' => {
                assert!(
                    in_group,
                    "unbalanced ']' in optimizer sequence \"{}\"",
                    sequence
                );
                return ops;
            }
            ' ' | '\n' => {
                chars.next();
            }
            step => {
                assert!(
                    KNOWN_STEPS.contains(step),
                    "unknown optimizer step '{}' in sequence \"{}\"",
                    step,
                    sequence
                );
                chars.next();
                ops.push(SequenceOp::Step(step));
            }
        }
    }
    assert!(
        !in_group,
        "unbalanced '[' in optimizer sequence \"{}\"",
        sequence
    );
    ops
}

fn apply_sequence(
    ops: &[SequenceOp],
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    code: &mut AstNode,
    external_names: &BTreeSet<String>,
) -> bool {
    let mut changed = false;
    for op in ops {
        match op {
            SequenceOp::Step(step) => {
                let step_changed = apply_step(*step, dialect, meter, code, external_names);
                trace!(
                    "step '{}' {}",
                    step,
                    if step_changed { "changed the tree" } else { "made no change" }
                );
                changed |= step_changed;
            }
            SequenceOp::Group(inner) => {
                for _ in 0..MAX_GROUP_ROUNDS {
                    if !apply_sequence(inner, dialect, meter, code, external_names) {
                        break;
                    }
                    changed = true;
                }
            }
        }
    }
    changed
}

fn apply_step(
    step: char,
    dialect: &Dialect,
    meter: Option<&FuelMeter>,
    code: &mut AstNode,
    external_names: &BTreeSet<String>,
) -> bool {
    match step {
        's' => simplify::run(dialect, code),
        'c' => fold::run(dialect, meter, code),
        'd' => dce::run(dialect, code),
        'u' => prune::run(dialect, code, external_names),
        'j' => joiner::run(dialect, code),
        other => unreachable!("step '{}' passed sequence validation", other),
    }
}
