use std::fs;
use std::path::{Path, PathBuf};

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use kiln_core::optimize::Suite;
use kiln_core::reports::E_IO;
use kiln_core::{
    DebugInfoSelection, KilnStack, KilnVersion, Language, Machine, MachineAssemblyObject,
    OptimizerSettings, Report, ReportCollector,
};

mod disassembler;
mod output;

use output::{OutputStyles, SummaryRow};

fn main() {
    let cli = Command::new("kiln")
        .version("0.1.0")
        .about("Graphite compiler for the Kiln VM")
        .arg(
            Arg::new("verbose")
                .help("Log pipeline internals to stderr")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true),
        );

    let cli = setup_cli(cli);
    let matches = cli.get_matches();

    // Pipeline tracing goes to stderr so artifact output stays clean.
    let level = if matches.get_flag("verbose") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_module("kiln", level)
        .filter_module("kiln_core", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    std::process::exit(dispatch_commands(&matches));
}

/// Sets up the CLI with subcommands and arguments.
fn setup_cli(cli: Command) -> Command {
    cli.subcommand(
        Command::new("build")
            .about("Compile Graphite sources into Kiln artifacts")
            .arg(
                Arg::new("inputs")
                    .help("Source files or glob patterns")
                    .required(true)
                    .num_args(1..)
                    .value_name("FILE"),
            )
            .arg(
                Arg::new("language")
                    .help("Source language flavour")
                    .short('l')
                    .long("language")
                    .value_parser(["assembly", "typed"])
                    .default_value("assembly"),
            )
            .arg(
                Arg::new("kiln-version")
                    .help("Target Kiln VM release")
                    .long("kiln-version")
                    .value_parser(["bisque", "stoneware", "porcelain"])
                    .default_value("porcelain")
                    .value_name("RELEASE"),
            )
            .arg(
                Arg::new("container-version")
                    .help("Seal artifacts under a container header of this version")
                    .long("container-version")
                    .value_parser(clap::value_parser!(u8))
                    .value_name("N"),
            )
            .arg(
                Arg::new("optimize")
                    .help("Run the full optimizer suite")
                    .short('O')
                    .long("optimize")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("steps")
                    .help("Override the optimizer step sequence (requires --optimize)")
                    .long("steps")
                    .value_name("SEQUENCE"),
            )
            .arg(
                Arg::new("cleanup-steps")
                    .help("Override the cleanup step sequence (requires --optimize)")
                    .long("cleanup-steps")
                    .value_name("SEQUENCE"),
            )
            .arg(
                Arg::new("expected-executions")
                    .help("Deployed-code executions assumed in fuel trade-offs")
                    .long("expected-executions")
                    .value_parser(clap::value_parser!(u64))
                    .value_name("N"),
            )
            .arg(
                Arg::new("deploy-name")
                    .help("Sub-unit holding the deployed code")
                    .long("deploy-name")
                    .value_name("UNIT"),
            )
            .arg(
                Arg::new("emit")
                    .help("Artifact kinds to write")
                    .long("emit")
                    .value_parser(["bin", "asm", "map", "ast", "json"])
                    .action(ArgAction::Append)
                    .value_name("KIND"),
            )
            .arg(
                Arg::new("output-dir")
                    .help("Directory for artifacts, defaults to each input's directory")
                    .short('o')
                    .long("output-dir")
                    .value_name("DIR"),
            ),
    )
    .subcommand(
        Command::new("check")
            .about("Parse and analyze sources without generating code")
            .arg(
                Arg::new("inputs")
                    .help("Source files or glob patterns")
                    .required(true)
                    .num_args(1..)
                    .value_name("FILE"),
            )
            .arg(
                Arg::new("language")
                    .help("Source language flavour")
                    .short('l')
                    .long("language")
                    .value_parser(["assembly", "typed"])
                    .default_value("assembly"),
            )
            .arg(
                Arg::new("kiln-version")
                    .help("Target Kiln VM release")
                    .long("kiln-version")
                    .value_parser(["bisque", "stoneware", "porcelain"])
                    .default_value("porcelain")
                    .value_name("RELEASE"),
            ),
    )
    .subcommand(
        Command::new("disasm")
            .about("Disassemble an encoded Kiln binary")
            .arg(
                Arg::new("file")
                    .help("Binary file, raw bytes or hex text")
                    .required(true)
                    .index(1),
            ),
    )
}

fn dispatch_commands(matches: &ArgMatches) -> i32 {
    match matches.subcommand() {
        Some(("build", sub_m)) => run_build(sub_m),
        Some(("check", sub_m)) => run_check(sub_m),
        Some(("disasm", sub_m)) => run_disasm(sub_m),
        _ => {
            eprintln!("No valid subcommand was used. Use --help for more information.");
            2
        }
    }
}

struct BuildOptions {
    language: Language,
    version: KilnVersion,
    container_version: Option<u8>,
    settings: OptimizerSettings,
    deploy_name: Option<String>,
    emits: Vec<String>,
    output_dir: Option<PathBuf>,
}

struct BuildOutcome {
    file: String,
    passed: bool,
    creation_bytes: Option<usize>,
    deployed_bytes: Option<usize>,
    reports: ReportCollector,
    exit: i32,
}

impl BuildOutcome {
    fn faulted(file: String, message: &str) -> Self {
        let mut reports = ReportCollector::new();
        reports.push(Report::fatal(message, None, None, Some(E_IO), None, None));
        BuildOutcome {
            file,
            passed: false,
            creation_bytes: None,
            deployed_bytes: None,
            reports,
            exit: 2,
        }
    }
}

fn run_build(sub_m: &ArgMatches) -> i32 {
    let styles = OutputStyles::default();
    let options = match parse_build_options(sub_m) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", styles.error.apply_to(&message));
            return 2;
        }
    };
    if let Some(dir) = &options.output_dir {
        if let Err(err) = fs::create_dir_all(dir) {
            eprintln!(
                "{}",
                styles
                    .error
                    .apply_to(format!("cannot create {}: {}", dir.display(), err))
            );
            return 2;
        }
    }

    let files = match collect_inputs(sub_m) {
        Ok(files) => files,
        Err(faults) => {
            for fault in faults {
                eprintln!("{}", styles.error.apply_to(&fault));
            }
            return 2;
        }
    };

    let bar = output::progress_bar(files.len() as u64);
    let outcomes: Vec<BuildOutcome> = files
        .par_iter()
        .map(|path| {
            let outcome = build_one(path, &options);
            bar.inc(1);
            outcome
        })
        .collect();
    bar.finish_and_clear();

    finish_run(&outcomes, true)
}

fn run_check(sub_m: &ArgMatches) -> i32 {
    let styles = OutputStyles::default();
    let language = parse_language(sub_m);
    let version = parse_version(sub_m);
    let files = match collect_inputs(sub_m) {
        Ok(files) => files,
        Err(faults) => {
            for fault in faults {
                eprintln!("{}", styles.error.apply_to(&fault));
            }
            return 2;
        }
    };

    let bar = output::progress_bar(files.len() as u64);
    let outcomes: Vec<BuildOutcome> = files
        .par_iter()
        .map(|path| {
            let outcome = check_one(path, language, version);
            bar.inc(1);
            outcome
        })
        .collect();
    bar.finish_and_clear();

    finish_run(&outcomes, false)
}

fn run_disasm(sub_m: &ArgMatches) -> i32 {
    let styles = OutputStyles::default();
    let file = sub_m.get_one::<String>("file").expect("required argument");
    let raw = match fs::read(file) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!(
                "{}",
                styles.error.apply_to(format!("cannot read {}: {}", file, err))
            );
            return 2;
        }
    };
    let bytes = disassembler::normalize_input(&raw);
    match disassembler::disassemble(&bytes) {
        Ok(listing) => {
            print!("{}", listing);
            0
        }
        Err(message) => {
            eprintln!("{}", styles.error.apply_to(&message));
            1
        }
    }
}

fn parse_language(sub_m: &ArgMatches) -> Language {
    let name = sub_m.get_one::<String>("language").expect("defaulted");
    Language::from_name(name).expect("validated by clap")
}

fn parse_version(sub_m: &ArgMatches) -> KilnVersion {
    let name = sub_m.get_one::<String>("kiln-version").expect("defaulted");
    KilnVersion::from_name(name).expect("validated by clap")
}

fn parse_build_options(sub_m: &ArgMatches) -> Result<BuildOptions, String> {
    let optimize = sub_m.get_flag("optimize");
    let mut settings = if optimize {
        OptimizerSettings::standard()
    } else {
        OptimizerSettings::minimal()
    };
    if let Some(steps) = sub_m.get_one::<String>("steps") {
        if !optimize {
            return Err("--steps requires --optimize".to_string());
        }
        Suite::validate_sequence(steps)?;
        settings.steps = steps.clone();
    }
    if let Some(cleanup) = sub_m.get_one::<String>("cleanup-steps") {
        if !optimize {
            return Err("--cleanup-steps requires --optimize".to_string());
        }
        Suite::validate_sequence(cleanup)?;
        settings.cleanup_steps = cleanup.clone();
    }
    if let Some(executions) = sub_m.get_one::<u64>("expected-executions") {
        settings.expected_executions = *executions;
    }

    let emits = match sub_m.get_many::<String>("emit") {
        Some(values) => values.cloned().collect(),
        None => vec!["bin".to_string()],
    };

    Ok(BuildOptions {
        language: parse_language(sub_m),
        version: parse_version(sub_m),
        container_version: sub_m.get_one::<u8>("container-version").copied(),
        settings,
        deploy_name: sub_m.get_one::<String>("deploy-name").cloned(),
        emits,
        output_dir: sub_m.get_one::<String>("output-dir").map(PathBuf::from),
    })
}

/// Expand the input arguments through glob. A pattern that matches no
/// file at all is an error, not a silent skip.
fn collect_inputs(sub_m: &ArgMatches) -> Result<Vec<PathBuf>, Vec<String>> {
    let patterns: Vec<String> = sub_m
        .get_many::<String>("inputs")
        .expect("required argument")
        .cloned()
        .collect();

    let mut files = Vec::new();
    let mut faults = Vec::new();
    for pattern in &patterns {
        match glob::glob(pattern) {
            Ok(paths) => {
                let mut matched = false;
                for entry in paths {
                    match entry {
                        Ok(path) => {
                            if path.is_file() {
                                files.push(path);
                                matched = true;
                            }
                        }
                        Err(err) => faults.push(format!("{}: {}", pattern, err)),
                    }
                }
                if !matched {
                    faults.push(format!("{}: no files matched", pattern));
                }
            }
            Err(err) => faults.push(format!("{}: {}", pattern, err)),
        }
    }
    files.sort();
    files.dedup();
    if faults.is_empty() {
        Ok(files)
    } else {
        Err(faults)
    }
}

fn build_one(path: &Path, options: &BuildOptions) -> BuildOutcome {
    let display = path.display().to_string();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            return BuildOutcome::faulted(display, &format!("cannot read {}: {}", path.display(), err));
        }
    };

    let mut stack = KilnStack::new(
        options.version,
        options.container_version,
        options.language,
        options.settings.clone(),
        DebugInfoSelection::none(),
    );
    let mut passed = stack.parse_and_analyze(&display, &text);
    if passed {
        passed = stack.optimize();
    }

    let mut creation_bytes = None;
    let mut deployed_bytes = None;
    let mut write_fault = None;
    if passed {
        let (creation, deployed) =
            stack.assemble_with_deployed(Machine::Kiln, options.deploy_name.as_deref());
        creation_bytes = creation.bytecode.as_ref().map(|b| b.bytecode.len());
        deployed_bytes = deployed.bytecode.as_ref().map(|b| b.bytecode.len());
        if creation_bytes.is_none() {
            passed = false;
        } else if let Err(err) = write_artifacts(path, options, &stack, &creation, &deployed) {
            passed = false;
            write_fault = Some(format!(
                "cannot write artifacts for {}: {}",
                path.display(),
                err
            ));
        }
    }

    let mut reports = stack.reports().clone();
    if let Some(message) = write_fault {
        reports.push(Report::fatal(&message, None, None, Some(E_IO), None, None));
    }
    let exit = reports.exit_code();
    BuildOutcome {
        file: display,
        passed,
        creation_bytes,
        deployed_bytes,
        reports,
        exit,
    }
}

fn check_one(path: &Path, language: Language, version: KilnVersion) -> BuildOutcome {
    let display = path.display().to_string();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            return BuildOutcome::faulted(display, &format!("cannot read {}: {}", path.display(), err));
        }
    };

    let mut stack = KilnStack::new(
        version,
        None,
        language,
        OptimizerSettings::minimal(),
        DebugInfoSelection::none(),
    );
    let passed = stack.parse_and_analyze(&display, &text);
    let reports = stack.reports().clone();
    let exit = reports.exit_code();
    BuildOutcome {
        file: display,
        passed,
        creation_bytes: None,
        deployed_bytes: None,
        reports,
        exit,
    }
}

fn finish_run(outcomes: &[BuildOutcome], with_artifacts: bool) -> i32 {
    for outcome in outcomes {
        output::print_reports(&outcome.file, &outcome.reports);
    }
    let rows: Vec<SummaryRow> = outcomes
        .iter()
        .map(|o| {
            let (fatals, errors, warnings, _) = o.reports.counts();
            SummaryRow {
                file: o.file.clone(),
                passed: o.passed,
                creation: o.creation_bytes,
                deployed: o.deployed_bytes,
                errors: fatals + errors,
                warnings,
            }
        })
        .collect();
    println!("{}", output::summary_table(&rows, with_artifacts));
    println!("{}", output::tally_line(&rows));
    outcomes.iter().map(|o| o.exit).max().unwrap_or(0)
}

#[derive(Serialize)]
struct ArtifactSummary {
    bytes: usize,
    bytecode: String,
    source_map: Option<String>,
}

#[derive(Serialize)]
struct BuildSummary {
    file: String,
    language: &'static str,
    kiln_version: &'static str,
    creation: Option<ArtifactSummary>,
    deployed: Option<ArtifactSummary>,
    diagnostics: serde_json::Value,
}

fn artifact_summary(object: &MachineAssemblyObject) -> Option<ArtifactSummary> {
    object.bytecode.as_ref().map(|binary| ArtifactSummary {
        bytes: binary.bytecode.len(),
        bytecode: hex_string(&binary.bytecode),
        source_map: object.source_map.clone(),
    })
}

fn write_artifacts(
    input: &Path,
    options: &BuildOptions,
    stack: &KilnStack,
    creation: &MachineAssemblyObject,
    deployed: &MachineAssemblyObject,
) -> std::io::Result<()> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| input.parent().map(Path::to_path_buf).unwrap_or_default());

    for emit in &options.emits {
        match emit.as_str() {
            "bin" => {
                if let Some(binary) = &creation.bytecode {
                    write_one(&dir, &format!("{}.bin", stem), hex_string(&binary.bytecode))?;
                }
                if let Some(binary) = &deployed.bytecode {
                    write_one(
                        &dir,
                        &format!("{}_deployed.bin", stem),
                        hex_string(&binary.bytecode),
                    )?;
                }
            }
            "asm" => {
                if let Some(assembly) = &creation.assembly {
                    write_one(&dir, &format!("{}.asm", stem), assembly.to_string())?;
                }
            }
            "map" => {
                if let Some(map) = &creation.source_map {
                    write_one(&dir, &format!("{}.map", stem), map.clone())?;
                }
                if let Some(map) = &deployed.source_map {
                    write_one(&dir, &format!("{}_deployed.map", stem), map.clone())?;
                }
            }
            "ast" => {
                let json = serde_json::to_string_pretty(&stack.ast_json())
                    .expect("AST export serializes");
                write_one(&dir, &format!("{}.ast.json", stem), json)?;
            }
            "json" => {
                let summary = BuildSummary {
                    file: input.display().to_string(),
                    language: options.language.name(),
                    kiln_version: options.version.name(),
                    creation: artifact_summary(creation),
                    deployed: artifact_summary(deployed),
                    diagnostics: stack.reports().to_lsp_array(),
                };
                let json =
                    serde_json::to_string_pretty(&summary).expect("build summary serializes");
                write_one(&dir, &format!("{}.build.json", stem), json)?;
            }
            other => unreachable!("emit kind '{}' passed clap validation", other),
        }
    }
    Ok(())
}

fn write_one(dir: &Path, file_name: &str, contents: String) -> std::io::Result<()> {
    let path = dir.join(file_name);
    debug!("writing {}", path.display());
    fs::write(path, contents)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
