//! LineScript CLI entry point.
//!
//! The argument surface has two layers: the stable option set parsed by
//! clap, and a pre-scan that peels off banner flags, custom `--name` tokens
//! (bound to user `flag` functions or forwarded to the runtime CLI token
//! table), and `[`/`]` bracket groups.

use clap::Parser;
use linescript_driver::{compile, Backend, CompileOptions, Mode, DEFAULT_CC};
use regex::Regex;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "linescript",
    version = "0.1.0",
    about = "LineScript ahead-of-time compiler"
)]
struct Cli {
    /// Input files (.lsc or .ls)
    inputs: Vec<String>,

    /// Output path (C text if not building, binary otherwise)
    #[arg(short = 'o')]
    output: Option<String>,

    /// Run frontend + optimizer, skip emit/build
    #[arg(long)]
    check: bool,

    /// Compile to a native binary via the host C compiler
    #[arg(long)]
    build: bool,

    /// Build and execute the result
    #[arg(long)]
    run: bool,

    /// Host C compiler command
    #[arg(long, default_value = DEFAULT_CC)]
    cc: String,

    /// Emission strategy
    #[arg(long, default_value = "auto", value_parser = ["auto", "c", "asm"])]
    backend: String,

    /// Cross-compile target triple (forwarded as --target=)
    #[arg(long)]
    target: Option<String>,

    /// Cross-compile sysroot (forwarded as --sysroot=)
    #[arg(long)]
    sysroot: Option<String>,

    /// Linker name (forwarded as -fuse-ld=)
    #[arg(long)]
    linker: Option<String>,

    /// Optimizer iterations
    #[arg(long, default_value_t = linescript_opt::DEFAULT_PASSES)]
    passes: u32,

    /// Aggressive flag set; raises passes to at least 32
    #[arg(long)]
    max_speed: bool,

    /// Instrument for profile-guided optimization
    #[arg(long)]
    pgo_generate: bool,

    /// Use PGO profiles from a directory
    #[arg(long)]
    pgo_use: Option<String>,

    /// Post-optimize with llvm-bolt using the given profile
    #[arg(long)]
    bolt_use: Option<String>,

    /// Retain the emitted C file next to the binary
    #[arg(long)]
    keep_c: bool,

    /// Enable the typed-IR bundle cache
    #[arg(long)]
    incremental: bool,

    /// Cache directory
    #[arg(long)]
    cache_dir: Option<String>,

    /// Disable cache reads and writes
    #[arg(long)]
    no_cache: bool,

    /// Write the typed-IR bundle to a file
    #[arg(long)]
    emit_typed_ir: Option<String>,

    /// Read a typed-IR bundle instead of compiling sources
    #[arg(long)]
    consume_typed_ir: Option<String>,

    /// Enable superuser mode for this session
    #[arg(long)]
    su_session: bool,
}

const BANNERS: [(&str, &str); 5] = [
    ("--LineScript", "LineScript: one line at a time, straight to C."),
    ("--super-speed", "super speed engaged. (it was already on.)"),
    ("--what", "LineScript compiles .lsc sources to native binaries via C."),
    ("--hlep", "no hlep here. try --help."),
    ("--max-sped", "sped is not a speed. try --max-speed."),
];

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();

    for (flag, line) in BANNERS {
        if raw.iter().any(|arg| arg == flag) {
            println!("{line}");
            return ExitCode::SUCCESS;
        }
    }

    let (clap_args, custom_args, run_args) = match partition_args(&raw) {
        Ok(parts) => parts,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let mut full = vec!["linescript".to_string()];
    full.extend(clap_args);
    let cli = match Cli::try_parse_from(&full) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    match run_compiler(cli, custom_args, run_args) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_compiler(
    cli: Cli,
    custom_args: Vec<String>,
    run_args: Vec<String>,
) -> Result<ExitCode, String> {
    for input in &cli.inputs {
        if !(input.ends_with(".lsc") || input.ends_with(".ls")) {
            return Err(format!(
                "input '{input}' must have extension .lsc or .ls"
            ));
        }
    }
    if cli.inputs.is_empty() && cli.consume_typed_ir.is_none() {
        return Err(
            "no input files; pass one or more .lsc/.ls sources or --consume-typed-ir".to_string(),
        );
    }

    let mode = if cli.run {
        Mode::Run
    } else if cli.build {
        Mode::Build
    } else if cli.check {
        Mode::Check
    } else {
        Mode::EmitC
    };
    let backend = match cli.backend.as_str() {
        "c" => Backend::C,
        "asm" => Backend::Asm,
        _ => Backend::Auto,
    };

    let options = CompileOptions {
        inputs: cli.inputs,
        output: cli.output,
        mode,
        cc: cli.cc,
        backend,
        passes: cli.passes,
        max_speed: cli.max_speed,
        target: cli.target,
        sysroot: cli.sysroot,
        linker: cli.linker,
        pgo_generate: cli.pgo_generate,
        pgo_use: cli.pgo_use,
        bolt_use: cli.bolt_use,
        keep_c: cli.keep_c,
        incremental: cli.incremental,
        cache_dir: cli.cache_dir,
        no_cache: cli.no_cache,
        emit_typed_ir: cli.emit_typed_ir,
        consume_typed_ir: cli.consume_typed_ir,
        su_session: cli.su_session,
        custom_args,
        run_args,
    };

    let outcome = compile(&options);
    for diag in &outcome.diagnostics {
        eprintln!("{}", diag.render());
    }
    if !outcome.success {
        return Ok(ExitCode::FAILURE);
    }
    if mode == Mode::Run {
        return Ok(ExitCode::from((outcome.exit_code & 0xff) as u8));
    }
    Ok(ExitCode::SUCCESS)
}

/// Known long options that take a value in the following argument.
const VALUED_OPTS: [&str; 12] = [
    "-o",
    "--cc",
    "--backend",
    "--target",
    "--sysroot",
    "--linker",
    "--passes",
    "--pgo-use",
    "--bolt-use",
    "--cache-dir",
    "--emit-typed-ir",
    "--consume-typed-ir",
];

const BARE_FLAGS: [&str; 12] = [
    "--check",
    "--build",
    "--run",
    "--max-speed",
    "--pgo-generate",
    "--keep-c",
    "--incremental",
    "--no-cache",
    "--su-session",
    "--help",
    "--version",
    "-V",
];

/// Split raw argv into (clap args, custom tokens, run args). `-O4` is an
/// alias for `--max-speed`; `--` ends option parsing and collects program
/// arguments for `--run`; `[`/`]` bracket custom token groups and must
/// balance.
fn partition_args(raw: &[String]) -> Result<(Vec<String>, Vec<String>, Vec<String>), String> {
    let custom_re = Regex::new(r"^--[A-Za-z][A-Za-z0-9]*(-[A-Za-z0-9]+)*$").expect("valid regex");
    let mut clap_args = Vec::new();
    let mut custom = Vec::new();
    let mut run_args = Vec::new();
    let mut depth = 0_i32;
    let mut i = 0;

    while i < raw.len() {
        let arg = &raw[i];

        if arg == "--" {
            run_args.extend(raw[i + 1..].iter().cloned());
            break;
        }
        if arg == "[" {
            depth += 1;
            custom.push(arg.clone());
            i += 1;
            continue;
        }
        if arg == "]" {
            depth -= 1;
            if depth < 0 {
                return Err("unbalanced ']' in custom token group".to_string());
            }
            custom.push(arg.clone());
            i += 1;
            continue;
        }
        if depth > 0 {
            custom.push(arg.clone());
            i += 1;
            continue;
        }

        if arg == "-O4" {
            clap_args.push("--max-speed".to_string());
            i += 1;
            continue;
        }
        if BARE_FLAGS.contains(&arg.as_str()) || arg == "-h" {
            clap_args.push(arg.clone());
            i += 1;
            continue;
        }
        if VALUED_OPTS.contains(&arg.as_str()) {
            clap_args.push(arg.clone());
            if let Some(value) = raw.get(i + 1) {
                clap_args.push(value.clone());
            }
            i += 2;
            continue;
        }
        if let Some(eq_name) = arg.split('=').next() {
            if VALUED_OPTS.contains(&eq_name) {
                clap_args.push(arg.clone());
                i += 1;
                continue;
            }
        }

        if custom_re.is_match(arg) {
            // Unknown long option: a user flag or a forwarded token, with
            // an optional following non-option value.
            custom.push(arg.clone());
            if let Some(value) = raw.get(i + 1) {
                if !value.starts_with('-') && value != "[" && value != "]" {
                    custom.push(value.clone());
                    i += 1;
                }
            }
            i += 1;
            continue;
        }

        if arg.starts_with('-') && arg.len() > 1 {
            return Err(format!("unrecognized option '{arg}'"));
        }

        clap_args.push(arg.clone());
        i += 1;
    }

    if depth != 0 {
        return Err("unbalanced '[' in custom token group".to_string());
    }
    Ok((clap_args, custom, run_args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn known_options_pass_through_to_clap() {
        let (clap_args, custom, run) = partition_args(&strs(&[
            "main.lsc",
            "-o",
            "out",
            "--build",
            "--cc",
            "gcc",
            "--passes",
            "8",
        ]))
        .expect("partition");
        assert_eq!(
            clap_args,
            strs(&["main.lsc", "-o", "out", "--build", "--cc", "gcc", "--passes", "8"])
        );
        assert!(custom.is_empty());
        assert!(run.is_empty());
    }

    #[test]
    fn o4_aliases_max_speed() {
        let (clap_args, _, _) = partition_args(&strs(&["main.lsc", "-O4"])).expect("partition");
        assert!(clap_args.contains(&"--max-speed".to_string()));
    }

    #[test]
    fn unknown_long_options_become_custom_tokens_with_values() {
        let (clap_args, custom, _) = partition_args(&strs(&[
            "main.lsc",
            "--trace",
            "--depth",
            "9",
            "--build",
        ]))
        .expect("partition");
        assert_eq!(clap_args, strs(&["main.lsc", "--build"]));
        assert_eq!(custom, strs(&["--trace", "--depth", "9"]));
    }

    #[test]
    fn bracket_groups_collect_verbatim_and_must_balance() {
        let (_, custom, _) = partition_args(&strs(&[
            "main.lsc",
            "[",
            "--alpha",
            "x",
            "]",
        ]))
        .expect("partition");
        assert_eq!(custom, strs(&["[", "--alpha", "x", "]"]));

        assert!(partition_args(&strs(&["main.lsc", "["])).is_err());
        assert!(partition_args(&strs(&["main.lsc", "]"])).is_err());
    }

    #[test]
    fn double_dash_collects_run_arguments() {
        let (clap_args, _, run) =
            partition_args(&strs(&["main.lsc", "--run", "--", "--not-an-option", "x"]))
                .expect("partition");
        assert_eq!(clap_args, strs(&["main.lsc", "--run"]));
        assert_eq!(run, strs(&["--not-an-option", "x"]));
    }

    #[test]
    fn malformed_short_options_are_rejected() {
        assert!(partition_args(&strs(&["-zz"])).is_err());
    }

    #[test]
    fn cli_parses_partitioned_args() {
        let (clap_args, _, _) = partition_args(&strs(&[
            "demo.lsc",
            "--build",
            "--backend",
            "asm",
            "--target",
            "x86_64-pc-windows-gnu",
        ]))
        .expect("partition");
        let mut full = vec!["linescript".to_string()];
        full.extend(clap_args);
        let cli = Cli::try_parse_from(&full).expect("clap accepts");
        assert!(cli.build);
        assert_eq!(cli.backend, "asm");
        assert_eq!(cli.target.as_deref(), Some("x86_64-pc-windows-gnu"));
        assert_eq!(cli.inputs, vec!["demo.lsc".to_string()]);
    }
}
