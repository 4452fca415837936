// Dialect table for Graphite.
//
// A dialect is the pairing of a source language flavour with a Kiln VM
// version. Builtin availability depends on both, so the registry is built
// eagerly for every pair and handed out by shared reference.

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

/// Kiln VM releases, oldest first.
///
/// Ordering matters: feature gates are expressed as `>=` checks against
/// the release that introduced the feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KilnVersion {
    Bisque,
    Stoneware,
    Porcelain,
}

impl KilnVersion {
    pub fn latest() -> Self {
        KilnVersion::Porcelain
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bisque" => Some(KilnVersion::Bisque),
            "stoneware" => Some(KilnVersion::Stoneware),
            "porcelain" => Some(KilnVersion::Porcelain),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KilnVersion::Bisque => "bisque",
            KilnVersion::Stoneware => "stoneware",
            KilnVersion::Porcelain => "porcelain",
        }
    }

    /// Shift builtins arrived with Stoneware.
    pub fn has_shifts(&self) -> bool {
        *self >= KilnVersion::Stoneware
    }

    /// The fuel probe arrived with Porcelain.
    pub fn has_fuel_probe(&self) -> bool {
        *self >= KilnVersion::Porcelain
    }
}

impl Default for KilnVersion {
    fn default() -> Self {
        KilnVersion::latest()
    }
}

impl fmt::Display for KilnVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Source language flavour accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// Untyped Graphite assembly. Every value is a machine word.
    Assembly,
    /// Typed Graphite. Words and flags are distinct types.
    Typed,
}

impl Language {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "assembly" => Some(Language::Assembly),
            "typed" => Some(Language::Typed),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Assembly => "assembly",
            Language::Typed => "typed",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Assembly
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub const TYPE_WORD: &str = "word";
pub const TYPE_FLAG: &str = "flag";

/// One builtin function as seen by the analyzer, optimizer and lowering.
#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub params: usize,
    pub returns: usize,
    /// Parameter types, empty in the untyped dialect.
    pub param_types: Vec<&'static str>,
    /// Return types, empty in the untyped dialect.
    pub return_types: Vec<&'static str>,
    /// Which arguments must be literals (data names, raw bytes). Empty
    /// means none.
    pub literal_args: Vec<bool>,
    /// Whether a call may be observed beyond its return value. Calls with
    /// side effects are never pruned or folded.
    pub has_side_effects: bool,
    /// Whether control flow stops after the call.
    pub terminates: bool,
    /// Fuel charged by the VM for executing the operation.
    pub fuel_cost: u32,
    /// Constant evaluation over literal word arguments. `None` results
    /// mean the fold is refused (for example division by zero, which
    /// aborts at run time).
    pub eval: Option<fn(&[u64]) -> Option<u64>>,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("has_side_effects", &self.has_side_effects)
            .finish()
    }
}

fn eval_add(args: &[u64]) -> Option<u64> {
    Some(args[0].wrapping_add(args[1]))
}
fn eval_sub(args: &[u64]) -> Option<u64> {
    Some(args[0].wrapping_sub(args[1]))
}
fn eval_mul(args: &[u64]) -> Option<u64> {
    Some(args[0].wrapping_mul(args[1]))
}
fn eval_div(args: &[u64]) -> Option<u64> {
    // The VM aborts on division by zero, so the fold is refused there.
    if args[1] == 0 {
        None
    } else {
        Some(args[0] / args[1])
    }
}
fn eval_mod(args: &[u64]) -> Option<u64> {
    if args[1] == 0 {
        None
    } else {
        Some(args[0] % args[1])
    }
}
fn eval_and(args: &[u64]) -> Option<u64> {
    Some(args[0] & args[1])
}
fn eval_or(args: &[u64]) -> Option<u64> {
    Some(args[0] | args[1])
}
fn eval_xor(args: &[u64]) -> Option<u64> {
    Some(args[0] ^ args[1])
}
fn eval_not(args: &[u64]) -> Option<u64> {
    Some(!args[0])
}
fn eval_shl(args: &[u64]) -> Option<u64> {
    if args[1] >= 64 {
        Some(0)
    } else {
        Some(args[0] << args[1])
    }
}
fn eval_shr(args: &[u64]) -> Option<u64> {
    if args[1] >= 64 {
        Some(0)
    } else {
        Some(args[0] >> args[1])
    }
}
fn eval_eq(args: &[u64]) -> Option<u64> {
    Some((args[0] == args[1]) as u64)
}
fn eval_lt(args: &[u64]) -> Option<u64> {
    Some((args[0] < args[1]) as u64)
}
fn eval_gt(args: &[u64]) -> Option<u64> {
    Some((args[0] > args[1]) as u64)
}
fn eval_iszero(args: &[u64]) -> Option<u64> {
    Some((args[0] == 0) as u64)
}

/// Language plus version, with the builtin table that pairing exposes.
pub struct Dialect {
    pub language: Language,
    pub version: KilnVersion,
    /// True when the dialect targets the Kiln VM and fuel metering
    /// applies. The optimizer only builds a fuel meter for machine
    /// dialects.
    pub machine: bool,
    builtins: HashMap<&'static str, BuiltinFunction>,
}

impl fmt::Debug for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialect")
            .field("language", &self.language)
            .field("version", &self.version)
            .field("machine", &self.machine)
            .field("builtins", &self.builtins.len())
            .finish()
    }
}

impl Dialect {
    fn build(language: Language, version: KilnVersion) -> Self {
        let mut builtins = HashMap::new();
        let typed = language == Language::Typed;

        let mut add = |b: BuiltinFunction| {
            builtins.insert(b.name, b);
        };

        // Onto the table. Typed signatures only exist in the typed
        // dialect; the untyped one leaves the type vectors empty.
        let word2_to_word = |name, fuel, eval| BuiltinFunction {
            name,
            params: 2,
            returns: 1,
            param_types: if typed {
                vec![TYPE_WORD, TYPE_WORD]
            } else {
                vec![]
            },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: fuel,
            eval: Some(eval),
        };
        let word2_to_flag = |name, fuel, eval| BuiltinFunction {
            name,
            params: 2,
            returns: 1,
            param_types: if typed {
                vec![TYPE_WORD, TYPE_WORD]
            } else {
                vec![]
            },
            return_types: if typed { vec![TYPE_FLAG] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: fuel,
            eval: Some(eval),
        };

        add(word2_to_word("add", 2, eval_add as fn(&[u64]) -> Option<u64>));
        add(word2_to_word("sub", 2, eval_sub));
        add(word2_to_word("mul", 4, eval_mul));
        add(word2_to_word("div", 4, eval_div));
        add(word2_to_word("mod", 4, eval_mod));
        add(word2_to_word("and", 2, eval_and));
        add(word2_to_word("or", 2, eval_or));
        add(word2_to_word("xor", 2, eval_xor));
        if version.has_shifts() {
            add(word2_to_word("shl", 2, eval_shl));
            add(word2_to_word("shr", 2, eval_shr));
        }
        add(BuiltinFunction {
            name: "not",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 2,
            eval: Some(eval_not),
        });
        add(word2_to_flag("eq", 2, eval_eq));
        add(word2_to_flag("lt", 2, eval_lt));
        add(word2_to_flag("gt", 2, eval_gt));
        add(BuiltinFunction {
            name: "iszero",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_FLAG] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 2,
            eval: Some(eval_iszero),
        });

        // Memory. Reads are droppable when unused, writes never are.
        add(BuiltinFunction {
            name: "mload",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 6,
            eval: None,
        });
        add(BuiltinFunction {
            name: "mstore",
            params: 2,
            returns: 0,
            param_types: if typed {
                vec![TYPE_WORD, TYPE_WORD]
            } else {
                vec![]
            },
            return_types: vec![],
            literal_args: vec![],
            has_side_effects: true,
            terminates: false,
            fuel_cost: 6,
            eval: None,
        });
        add(BuiltinFunction {
            name: "memtop",
            params: 0,
            returns: 1,
            param_types: vec![],
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 2,
            eval: None,
        });

        // Storage.
        add(BuiltinFunction {
            name: "sload",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 40,
            eval: None,
        });
        add(BuiltinFunction {
            name: "sstore",
            params: 2,
            returns: 0,
            param_types: if typed {
                vec![TYPE_WORD, TYPE_WORD]
            } else {
                vec![]
            },
            return_types: vec![],
            literal_args: vec![],
            has_side_effects: true,
            terminates: false,
            fuel_cost: 100,
            eval: None,
        });

        // Environment.
        add(BuiltinFunction {
            name: "input",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: true,
            terminates: false,
            fuel_cost: 4,
            eval: None,
        });
        if version.has_fuel_probe() {
            add(BuiltinFunction {
                name: "fuel",
                params: 0,
                returns: 1,
                param_types: vec![],
                return_types: if typed { vec![TYPE_WORD] } else { vec![] },
                literal_args: vec![],
                has_side_effects: false,
                terminates: false,
                fuel_cost: 2,
                eval: None,
            });
        }

        // Control.
        add(BuiltinFunction {
            name: "stop",
            params: 0,
            returns: 0,
            param_types: vec![],
            return_types: vec![],
            literal_args: vec![],
            has_side_effects: true,
            terminates: true,
            fuel_cost: 0,
            eval: None,
        });
        add(BuiltinFunction {
            name: "abort",
            params: 1,
            returns: 0,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: vec![],
            literal_args: vec![],
            has_side_effects: true,
            terminates: true,
            fuel_cost: 0,
            eval: None,
        });

        // Container access. Data names must be literals so the assembler
        // can resolve them at link time.
        add(BuiltinFunction {
            name: "datasize",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![true],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 2,
            eval: None,
        });
        add(BuiltinFunction {
            name: "dataoffset",
            params: 1,
            returns: 1,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![true],
            has_side_effects: false,
            terminates: false,
            fuel_cost: 2,
            eval: None,
        });
        add(BuiltinFunction {
            name: "datacopy",
            params: 3,
            returns: 0,
            param_types: if typed {
                vec![TYPE_WORD, TYPE_WORD, TYPE_WORD]
            } else {
                vec![]
            },
            return_types: vec![],
            literal_args: vec![],
            has_side_effects: true,
            terminates: false,
            fuel_cost: 12,
            eval: None,
        });
        add(BuiltinFunction {
            name: "install",
            params: 2,
            returns: 1,
            param_types: if typed {
                vec![TYPE_WORD, TYPE_WORD]
            } else {
                vec![]
            },
            return_types: if typed { vec![TYPE_WORD] } else { vec![] },
            literal_args: vec![],
            has_side_effects: true,
            terminates: false,
            fuel_cost: 200,
            eval: None,
        });

        // Escape hatch: raw bytes dropped verbatim into the output.
        add(BuiltinFunction {
            name: "raw",
            params: 1,
            returns: 0,
            param_types: if typed { vec![TYPE_WORD] } else { vec![] },
            return_types: vec![],
            literal_args: vec![true],
            has_side_effects: true,
            terminates: false,
            fuel_cost: 0,
            eval: None,
        });

        Dialect {
            language,
            version,
            machine: true,
            builtins,
        }
    }

    pub fn builtin(&self, name: &str) -> Option<&BuiltinFunction> {
        self.builtins.get(name)
    }

    /// Builtin names double as reserved identifiers.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.builtins.keys().copied()
    }

    /// Type names the analyzer accepts, empty in the untyped dialect.
    pub fn types(&self) -> &'static [&'static str] {
        match self.language {
            Language::Assembly => &[],
            Language::Typed => &[TYPE_WORD, TYPE_FLAG],
        }
    }

    pub fn default_type(&self) -> &'static str {
        TYPE_WORD
    }

    pub fn boolean_type(&self) -> &'static str {
        match self.language {
            Language::Assembly => TYPE_WORD,
            Language::Typed => TYPE_FLAG,
        }
    }
}

lazy_static! {
    static ref REGISTRY: DialectRegistry = DialectRegistry::build();
}

/// All dialects, built once up front.
pub struct DialectRegistry {
    dialects: HashMap<(Language, KilnVersion), Dialect>,
}

impl DialectRegistry {
    fn build() -> Self {
        let mut dialects = HashMap::new();
        for language in [Language::Assembly, Language::Typed] {
            for version in [
                KilnVersion::Bisque,
                KilnVersion::Stoneware,
                KilnVersion::Porcelain,
            ] {
                dialects.insert((language, version), Dialect::build(language, version));
            }
        }
        DialectRegistry { dialects }
    }

    pub fn global() -> &'static DialectRegistry {
        &REGISTRY
    }

    pub fn get(&self, language: Language, version: KilnVersion) -> &Dialect {
        self.dialects
            .get(&(language, version))
            .expect("registry is built for every language and version pair")
    }
}

/// Shorthand used throughout the crate.
pub fn dialect(language: Language, version: KilnVersion) -> &'static Dialect {
    DialectRegistry::global().get(language, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts_are_gated_on_stoneware() {
        let old = dialect(Language::Assembly, KilnVersion::Bisque);
        assert!(old.builtin("shl").is_none());
        assert!(old.builtin("shr").is_none());
        let new = dialect(Language::Assembly, KilnVersion::Stoneware);
        assert!(new.builtin("shl").is_some());
        assert!(new.builtin("shr").is_some());
    }

    #[test]
    fn fuel_probe_is_gated_on_porcelain() {
        assert!(
            dialect(Language::Assembly, KilnVersion::Stoneware)
                .builtin("fuel")
                .is_none()
        );
        assert!(
            dialect(Language::Assembly, KilnVersion::Porcelain)
                .builtin("fuel")
                .is_some()
        );
    }

    #[test]
    fn typed_dialect_gives_comparisons_flag_results() {
        let d = dialect(Language::Typed, KilnVersion::Porcelain);
        let eq = d.builtin("eq").unwrap();
        assert_eq!(eq.return_types, vec![TYPE_FLAG]);
        let add = d.builtin("add").unwrap();
        assert_eq!(add.return_types, vec![TYPE_WORD]);
    }

    #[test]
    fn untyped_dialect_has_no_types() {
        let d = dialect(Language::Assembly, KilnVersion::Porcelain);
        assert!(d.types().is_empty());
        assert!(d.builtin("eq").unwrap().return_types.is_empty());
    }

    #[test]
    fn division_by_zero_refuses_to_fold() {
        let d = dialect(Language::Assembly, KilnVersion::Porcelain);
        let div = d.builtin("div").unwrap();
        let eval = div.eval.unwrap();
        assert_eq!(eval(&[10, 2]), Some(5));
        assert_eq!(eval(&[10, 0]), None);
    }

    #[test]
    fn data_names_must_be_literal() {
        let d = dialect(Language::Assembly, KilnVersion::Porcelain);
        assert_eq!(d.builtin("dataoffset").unwrap().literal_args, vec![true]);
        assert_eq!(d.builtin("datasize").unwrap().literal_args, vec![true]);
        assert!(d.builtin("datacopy").unwrap().literal_args.is_empty());
    }
}
