//! LineScript compiler driver.
//!
//! Concatenates inputs, orchestrates the pipeline (lex -> parse -> check ->
//! optimize -> re-check -> deps -> emit), reads and writes typed-IR bundles,
//! and invokes the host C toolchain.

use linescript_codegen_c::{emit_c, CodegenOptions};
use linescript_diag::{codes, Diagnostic, DiagnosticBag, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

pub const DEFAULT_CC: &str = "clang";
pub const TYPED_IR_FORMAT: &str = "linescript-typed-ir-v1";
const DEFAULT_MAX_ERRORS: usize = 20;

const STAGE_1: &str = "stage1_read_concat";
const STAGE_2: &str = "stage2_lex";
const STAGE_3: &str = "stage3_parse";
const STAGE_4: &str = "stage4_typecheck";
const STAGE_5: &str = "stage5_optimize";
const STAGE_6: &str = "stage6_recheck";
const STAGE_7: &str = "stage7_deps";
const STAGE_8: &str = "stage8_emit";
const STAGE_9: &str = "stage9_toolchain";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Auto,
    C,
    Asm,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Auto => "auto",
            Backend::C => "c",
            Backend::Asm => "asm",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Frontend + optimizer only.
    Check,
    /// Emit C text to the output path.
    EmitC,
    /// Compile to a native binary.
    Build,
    /// Build and execute, propagating the child's exit code.
    Run,
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub inputs: Vec<String>,
    pub output: Option<String>,
    pub mode: Mode,
    pub cc: String,
    pub backend: Backend,
    pub passes: u32,
    pub max_speed: bool,
    pub target: Option<String>,
    pub sysroot: Option<String>,
    pub linker: Option<String>,
    pub pgo_generate: bool,
    pub pgo_use: Option<String>,
    pub bolt_use: Option<String>,
    pub keep_c: bool,
    pub incremental: bool,
    pub cache_dir: Option<String>,
    pub no_cache: bool,
    pub emit_typed_ir: Option<String>,
    pub consume_typed_ir: Option<String>,
    pub su_session: bool,
    /// Unknown long options and bracket groups, verbatim, in order. After
    /// parsing, tokens matching declared `flag` functions become active
    /// flags; the rest feed the runtime CLI token table.
    pub custom_args: Vec<String>,
    pub run_args: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            mode: Mode::Build,
            cc: DEFAULT_CC.to_string(),
            backend: Backend::Auto,
            passes: linescript_opt::DEFAULT_PASSES,
            max_speed: false,
            target: None,
            sysroot: None,
            linker: None,
            pgo_generate: false,
            pgo_use: None,
            bolt_use: None,
            keep_c: false,
            incremental: false,
            cache_dir: None,
            no_cache: false,
            emit_typed_ir: None,
            consume_typed_ir: None,
            su_session: false,
            custom_args: Vec::new(),
            run_args: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BuildOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub artifacts: Vec<String>,
    pub timing_ms: BTreeMap<String, u64>,
    /// Exit code of the executed binary under `Mode::Run`.
    pub exit_code: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypedIrBundle {
    pub format: String,
    pub source_hash: String,
    pub config_hash: String,
    pub c_code: String,
}

// ── Hashing ──

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a64(chunks: &[&[u8]]) -> u64 {
    let mut hash = FNV_OFFSET;
    for chunk in chunks {
        for b in *chunk {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// FNV-1a-64 over each input's path bytes and contents, in order.
pub fn source_hash(sources: &[(String, String)]) -> String {
    let mut chunks: Vec<&[u8]> = Vec::new();
    for (path, text) in sources {
        chunks.push(path.as_bytes());
        chunks.push(text.as_bytes());
    }
    format!("{:016x}", fnv1a64(&chunks))
}

/// FNV-1a-64 over the source hash plus every knob that changes codegen.
pub fn config_hash(source_hash: &str, options: &CompileOptions) -> String {
    let passes = effective_passes(options).to_string();
    let max_speed = if options.max_speed { "1" } else { "0" };
    let chunks: Vec<&[u8]> = vec![
        source_hash.as_bytes(),
        options.cc.as_bytes(),
        options.backend.as_str().as_bytes(),
        passes.as_bytes(),
        options.target.as_deref().unwrap_or("").as_bytes(),
        options.sysroot.as_deref().unwrap_or("").as_bytes(),
        options.linker.as_deref().unwrap_or("").as_bytes(),
        max_speed.as_bytes(),
    ];
    format!("{:016x}", fnv1a64(&chunks))
}

pub fn effective_passes(options: &CompileOptions) -> u32 {
    if options.max_speed {
        options.passes.max(linescript_opt::MAX_SPEED_PASSES)
    } else {
        options.passes
    }
}

// ── Compilation ──

pub fn compile(options: &CompileOptions) -> BuildOutcome {
    let mut outcome = BuildOutcome::default();

    let c_code = match produce_c(options, &mut outcome) {
        Some(c_code) => c_code,
        None => return outcome,
    };

    if options.mode == Mode::Check {
        outcome.success = true;
        return outcome;
    }

    if options.mode == Mode::EmitC {
        let path = options.output.clone().unwrap_or_else(|| "out.c".to_string());
        if let Err(err) = fs::write(&path, &c_code) {
            push_driver_error(
                &mut outcome,
                codes::LSD0001,
                "emit",
                format!("could not write '{path}': {err}"),
            );
            return outcome;
        }
        outcome.artifacts.push(path);
        outcome.success = true;
        return outcome;
    }

    // Build (and maybe run).
    let start = Instant::now();
    let result = build_native(options, &c_code, &mut outcome);
    outcome
        .timing_ms
        .insert(STAGE_9.to_string(), elapsed_ms(start));
    let Some(binary) = result else {
        return outcome;
    };

    if options.mode == Mode::Run {
        match Command::new(&binary).args(&options.run_args).status() {
            Ok(status) => {
                outcome.exit_code = status.code().unwrap_or(1);
                outcome.success = true;
            }
            Err(err) => {
                push_driver_error(
                    &mut outcome,
                    codes::LSD0005,
                    "run",
                    format!("could not execute '{binary}': {err}"),
                );
            }
        }
        return outcome;
    }

    outcome.success = true;
    outcome
}

/// Run the frontend (or consume a bundle/cache hit) and return the C text.
fn produce_c(options: &CompileOptions, outcome: &mut BuildOutcome) -> Option<String> {
    if let Some(path) = &options.consume_typed_ir {
        match read_bundle(path) {
            Ok(bundle) => return Some(bundle.c_code),
            Err(err) => {
                push_driver_error(outcome, codes::LSD0006, "typed-ir", err);
                return None;
            }
        }
    }

    // Stage 1: read and concatenate inputs into one program.
    let start = Instant::now();
    let mut sources: Vec<(String, String)> = Vec::new();
    for path in &options.inputs {
        match fs::read_to_string(path) {
            Ok(text) => sources.push((path.clone(), text)),
            Err(err) => {
                push_driver_error(
                    outcome,
                    codes::LSD0001,
                    "read",
                    format!("could not read '{path}': {err}"),
                );
                return None;
            }
        }
    }
    let concatenated = sources
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    outcome
        .timing_ms
        .insert(STAGE_1.to_string(), elapsed_ms(start));

    let src_hash = source_hash(&sources);
    let cfg_hash = config_hash(&src_hash, options);

    if options.incremental && !options.no_cache {
        if let Some(c_code) = cache_lookup(options, &src_hash, &cfg_hash) {
            return Some(c_code);
        }
    }

    // Stage 2: lex.
    let start = Instant::now();
    let mut diag = DiagnosticBag::new(DEFAULT_MAX_ERRORS);
    diag.superuser = options.su_session;
    let tokens = linescript_lex::lex(&concatenated, &mut diag);
    outcome
        .timing_ms
        .insert(STAGE_2.to_string(), elapsed_ms(start));
    if append_stage(outcome, &mut diag) {
        return None;
    }

    // Stage 3: parse.
    let start = Instant::now();
    let parsed = linescript_parse::parse_program(&tokens, &mut diag);
    outcome
        .timing_ms
        .insert(STAGE_3.to_string(), elapsed_ms(start));
    let mut program = match parsed {
        Ok(program) => program,
        Err(()) => {
            append_stage(outcome, &mut diag);
            return None;
        }
    };
    if append_stage(outcome, &mut diag) {
        return None;
    }

    // Stage 4: typecheck.
    let start = Instant::now();
    let checked = linescript_sema::check(&mut program, options.su_session, &mut diag);
    outcome
        .timing_ms
        .insert(STAGE_4.to_string(), elapsed_ms(start));
    let su = match checked {
        Ok(su) => su,
        Err(()) => {
            append_stage(outcome, &mut diag);
            return None;
        }
    };
    append_stage(outcome, &mut diag);

    // Stage 5: optimize.
    let start = Instant::now();
    linescript_opt::optimize(&mut program, effective_passes(options));
    outcome
        .timing_ms
        .insert(STAGE_5.to_string(), elapsed_ms(start));

    // Stage 6: mandatory re-check. Optimizer rewrites can change inferred
    // types of synthesized expressions; a failure here means the first pass
    // missed a latent error.
    let start = Instant::now();
    let mut recheck_diag = DiagnosticBag::new(DEFAULT_MAX_ERRORS);
    recheck_diag.superuser = su || options.su_session;
    let rechecked = linescript_sema::check(&mut program, options.su_session, &mut recheck_diag);
    outcome
        .timing_ms
        .insert(STAGE_6.to_string(), elapsed_ms(start));
    if rechecked.is_err() {
        for d in recheck_diag
            .diagnostics
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
        {
            outcome.diagnostics.push(d);
        }
        push_driver_error(
            outcome,
            codes::LSD0005,
            "recheck",
            "post-optimizer type check failed; the program had a latent type error",
        );
        return None;
    }

    // `--check` stops after the re-check; entry cardinality is judged only
    // when building. Emission still runs when a bundle or cache write
    // needs the C text.
    let wants_bundle =
        options.emit_typed_ir.is_some() || (options.incremental && !options.no_cache);
    if options.mode == Mode::Check && !wants_bundle {
        return Some(String::new());
    }

    // Stage 7: runtime dependency analysis.
    let start = Instant::now();
    let mut needs = linescript_deps::analyze(&program);
    outcome
        .timing_ms
        .insert(STAGE_7.to_string(), elapsed_ms(start));

    // Split custom args into active flags and forwarded CLI tokens.
    let (active_flags, cli_tokens) = split_custom_args(&options.custom_args, &program);
    if !cli_tokens.is_empty() {
        needs.cli_tokens = true;
        needs.minimal = false;
        needs.ultra_minimal = false;
    }

    // Stage 8: emit C.
    let start = Instant::now();
    let codegen = CodegenOptions {
        windows: target_is_windows(options),
        superuser: su || options.su_session,
        active_flags,
        cli_tokens,
    };
    let emitted = emit_c(&program, &needs, &codegen);
    outcome
        .timing_ms
        .insert(STAGE_8.to_string(), elapsed_ms(start));
    let c_code = match emitted {
        Ok(c_code) => c_code,
        Err(err) => {
            let code = if err.starts_with("no entry") {
                codes::LSE0001
            } else if err.starts_with("ambiguous entry") {
                codes::LSE0002
            } else {
                codes::LSD0005
            };
            push_driver_error(outcome, code, "emit", err);
            return None;
        }
    };

    let bundle = TypedIrBundle {
        format: TYPED_IR_FORMAT.to_string(),
        source_hash: src_hash.clone(),
        config_hash: cfg_hash.clone(),
        c_code: c_code.clone(),
    };

    // `--emit-typed-ir` writes even when caching is disabled; by design.
    if let Some(path) = &options.emit_typed_ir {
        if let Err(err) = write_bundle(path, &bundle) {
            push_driver_error(outcome, codes::LSD0001, "typed-ir", err);
            return None;
        }
        outcome.artifacts.push(path.clone());
    }

    if options.incremental && !options.no_cache {
        let _ = cache_store(options, &bundle);
    }

    Some(c_code)
}

/// `--name` tokens matching declared flag functions become active flags (in
/// first-seen order, once each); everything else forwards verbatim.
fn split_custom_args(
    custom_args: &[String],
    program: &linescript_ast::Program,
) -> (Vec<String>, Vec<String>) {
    let mut active_flags: Vec<String> = Vec::new();
    let mut cli_tokens: Vec<String> = Vec::new();
    for arg in custom_args {
        let symbol = arg.strip_prefix("--").and_then(|name| {
            program
                .functions
                .iter()
                .find(|f| f.cli_flag && f.source_name == name)
                .map(|f| f.symbol.clone())
        });
        match symbol {
            Some(symbol) if !active_flags.contains(&symbol) => active_flags.push(symbol),
            Some(_) => {}
            None => cli_tokens.push(arg.clone()),
        }
    }
    (active_flags, cli_tokens)
}

fn target_is_windows(options: &CompileOptions) -> bool {
    match &options.target {
        Some(triple) => triple.contains("windows"),
        None => cfg!(windows),
    }
}

// ── Typed-IR bundles and cache ──

pub fn read_bundle(path: &str) -> Result<TypedIrBundle, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("could not read '{path}': {err}"))?;
    let bundle: TypedIrBundle =
        serde_json::from_str(&raw).map_err(|err| format!("malformed bundle '{path}': {err}"))?;
    if bundle.format != TYPED_IR_FORMAT {
        return Err(format!(
            "unsupported bundle format '{}' (expected '{TYPED_IR_FORMAT}')",
            bundle.format
        ));
    }
    Ok(bundle)
}

pub fn write_bundle(path: &str, bundle: &TypedIrBundle) -> Result<(), String> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("could not create '{}': {err}", parent.display()))?;
        }
    }
    let payload = serde_json::to_string(bundle).map_err(|err| err.to_string())?;
    fs::write(path, payload).map_err(|err| format!("could not write '{path}': {err}"))
}

fn cache_dir(options: &CompileOptions) -> PathBuf {
    options
        .cache_dir
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".linescript-cache"))
}

fn cache_entry_path(options: &CompileOptions, cfg_hash: &str) -> PathBuf {
    // blake3 keys the cache entry file; the bundle itself carries the FNV
    // hashes that gate the hit.
    let digest = blake3::hash(cfg_hash.as_bytes()).to_hex();
    cache_dir(options).join(format!("{digest}.lsir.json"))
}

fn cache_lookup(options: &CompileOptions, src_hash: &str, cfg_hash: &str) -> Option<String> {
    let path = cache_entry_path(options, cfg_hash);
    let bundle = read_bundle(path.to_str()?).ok()?;
    (bundle.source_hash == src_hash && bundle.config_hash == cfg_hash).then_some(bundle.c_code)
}

fn cache_store(options: &CompileOptions, bundle: &TypedIrBundle) -> Result<(), String> {
    let path = cache_entry_path(options, &bundle.config_hash);
    write_bundle(path.to_str().unwrap_or_default(), bundle)
}

// ── Host toolchain ──

fn build_native(
    options: &CompileOptions,
    c_code: &str,
    outcome: &mut BuildOutcome,
) -> Option<String> {
    let output = options.output.clone().unwrap_or_else(|| {
        if target_is_windows(options) {
            "a.exe".to_string()
        } else {
            "a.out".to_string()
        }
    });

    if is_msvc_like(&options.cc) && options.target.is_some() {
        push_driver_error(
            outcome,
            codes::LSD0003,
            "toolchain",
            "cross-compilation with an MSVC-like compiler is not supported",
        );
        return None;
    }
    if let Some(dir) = &options.pgo_use {
        if !Path::new(dir).exists() {
            push_driver_error(
                outcome,
                codes::LSD0004,
                "pgo",
                format!("profile directory '{dir}' does not exist"),
            );
            return None;
        }
    }
    if let Some(fdata) = &options.bolt_use {
        if !Path::new(fdata).exists() {
            push_driver_error(
                outcome,
                codes::LSD0004,
                "bolt",
                format!("profile '{fdata}' does not exist"),
            );
            return None;
        }
    }

    let c_path = format!("{output}.c");
    if let Err(err) = fs::write(&c_path, c_code) {
        push_driver_error(
            outcome,
            codes::LSD0001,
            "emit",
            format!("could not write '{c_path}': {err}"),
        );
        return None;
    }

    // Programs with parallel loops prefer an OpenMP build; a toolchain
    // without libomp falls back to the serial pragma-less compile.
    let wants_openmp = c_code.contains("LS_PAR_FOR");
    let result = match options.backend {
        Backend::Asm => build_via_asm(options, &c_path, &output),
        Backend::Auto | Backend::C => {
            let args = cc_args(options, &[c_path.clone()], &output);
            if wants_openmp {
                let mut omp_args = vec!["-fopenmp".to_string()];
                omp_args.extend(args.iter().cloned());
                run_command(&options.cc, &omp_args)
                    .or_else(|_| run_command(&options.cc, &args))
            } else {
                run_command(&options.cc, &args)
            }
        }
    };

    if !options.keep_c {
        let _ = fs::remove_file(&c_path);
    } else {
        outcome.artifacts.push(c_path);
    }

    if let Err(err) = result {
        push_driver_error(outcome, codes::LSD0005, "toolchain", err);
        return None;
    }

    if let Some(fdata) = &options.bolt_use {
        if let Err(err) = bolt_postprocess(&output, fdata) {
            push_driver_error(outcome, codes::LSD0005, "bolt", err);
            return None;
        }
    }

    outcome.artifacts.push(output.clone());
    Some(output)
}

/// The asm route compiles to `.s` first, then assembles and links.
fn build_via_asm(options: &CompileOptions, c_path: &str, output: &str) -> Result<(), String> {
    let asm_path = format!("{output}.s");
    let mut args = cc_flags(options);
    args.push("-S".to_string());
    args.push("-o".to_string());
    args.push(asm_path.clone());
    args.push(c_path.to_string());
    run_command(&options.cc, &args)?;

    let result = run_command(&options.cc, &cc_args(options, &[asm_path.clone()], output));
    let _ = fs::remove_file(&asm_path);
    result
}

fn cc_flags(options: &CompileOptions) -> Vec<String> {
    let mut args = Vec::new();
    if options.max_speed {
        args.extend(
            ["-O3", "-march=native", "-funroll-loops", "-flto"]
                .iter()
                .map(|s| s.to_string()),
        );
    } else {
        args.push("-O2".to_string());
    }
    if let Some(target) = &options.target {
        args.push(format!("--target={target}"));
    }
    if let Some(sysroot) = &options.sysroot {
        args.push(format!("--sysroot={sysroot}"));
    }
    if let Some(linker) = &options.linker {
        args.push(format!("-fuse-ld={linker}"));
    }
    if options.pgo_generate {
        args.push("-fprofile-generate".to_string());
    }
    if let Some(dir) = &options.pgo_use {
        args.push(format!("-fprofile-use={dir}"));
    }
    args
}

fn cc_args(options: &CompileOptions, inputs: &[String], output: &str) -> Vec<String> {
    let mut args = cc_flags(options);
    args.push("-o".to_string());
    args.push(output.to_string());
    args.extend(inputs.iter().cloned());
    if !target_is_windows(options) {
        args.push("-lm".to_string());
        args.push("-lpthread".to_string());
    }
    args
}

fn bolt_postprocess(binary: &str, fdata: &str) -> Result<(), String> {
    if !command_available("llvm-bolt") {
        return Err("llvm-bolt is not available in PATH".to_string());
    }
    let bolted = format!("{binary}.bolt");
    run_command(
        "llvm-bolt",
        &[
            binary.to_string(),
            "-data".to_string(),
            fdata.to_string(),
            "-o".to_string(),
            bolted.clone(),
        ],
    )?;
    fs::rename(&bolted, binary).map_err(|err| format!("could not replace '{binary}': {err}"))
}

fn is_msvc_like(cc: &str) -> bool {
    let base = Path::new(cc)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(cc);
    base.eq_ignore_ascii_case("cl") || base.to_ascii_lowercase().contains("msvc")
}

pub fn command_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn run_command(program: &str, args: &[String]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| format!("failed to run '{program} {}': {err}", args.join(" ")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(format!(
        "command '{program} {}' failed with {}: {}",
        args.join(" "),
        output.status,
        if stderr.is_empty() {
            "no output".to_string()
        } else {
            stderr
        }
    ))
}

// ── Bookkeeping ──

fn append_stage(outcome: &mut BuildOutcome, diag: &mut DiagnosticBag) -> bool {
    let failed = diag.has_errors();
    outcome
        .diagnostics
        .extend(std::mem::take(&mut diag.diagnostics));
    failed
}

fn push_driver_error(
    outcome: &mut BuildOutcome,
    code: &str,
    stage: &str,
    message: impl Into<String>,
) {
    outcome
        .diagnostics
        .push(Diagnostic::driver(code, stage, message));
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(label: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "linescript_driver_{label}_{}_{}",
            std::process::id(),
            nonce
        ));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    fn write_source(dir: &Path, name: &str, text: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, text).expect("source should be written");
        path.to_string_lossy().to_string()
    }

    fn check_options(inputs: Vec<String>) -> CompileOptions {
        CompileOptions {
            inputs,
            mode: Mode::Check,
            ..CompileOptions::default()
        }
    }

    #[test]
    fn fnv1a64_matches_reference_vectors() {
        assert_eq!(fnv1a64(&[b""]), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(&[b"a"]), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a64(&[b"foobar"]), 0x85944171f73967e8);
        // Chunking never changes the digest.
        assert_eq!(fnv1a64(&[b"foo", b"bar"]), fnv1a64(&[b"foobar"]));
    }

    #[test]
    fn config_hash_changes_with_every_knob() {
        let sources = vec![("main.lsc".to_string(), "println(1)\n".to_string())];
        let src = source_hash(&sources);
        let base = CompileOptions::default();
        let base_hash = config_hash(&src, &base);

        let variants: Vec<CompileOptions> = vec![
            CompileOptions {
                cc: "gcc".to_string(),
                ..base.clone()
            },
            CompileOptions {
                backend: Backend::Asm,
                ..base.clone()
            },
            CompileOptions {
                passes: 5,
                ..base.clone()
            },
            CompileOptions {
                target: Some("x86_64-pc-windows-gnu".to_string()),
                ..base.clone()
            },
            CompileOptions {
                sysroot: Some("/opt/sys".to_string()),
                ..base.clone()
            },
            CompileOptions {
                linker: Some("lld".to_string()),
                ..base.clone()
            },
            CompileOptions {
                max_speed: true,
                ..base.clone()
            },
        ];
        for variant in variants {
            assert_ne!(
                config_hash(&src, &variant),
                base_hash,
                "knob change must alter the config hash: {variant:?}"
            );
        }
        // Identical options reproduce the hash.
        assert_eq!(config_hash(&src, &base.clone()), base_hash);
    }

    #[test]
    fn source_hash_depends_on_path_and_content() {
        let a = source_hash(&[("x.lsc".to_string(), "println(1)".to_string())]);
        let b = source_hash(&[("y.lsc".to_string(), "println(1)".to_string())]);
        let c = source_hash(&[("x.lsc".to_string(), "println(2)".to_string())]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn check_mode_succeeds_on_valid_program() {
        let dir = unique_temp_dir("check");
        let input = write_source(&dir, "main.lsc", "println(1 + 2 * 3)\n");
        let outcome = compile(&check_options(vec![input]));
        assert!(outcome.success, "diagnostics: {:?}", outcome.diagnostics);
        assert!(outcome.timing_ms.contains_key("stage6_recheck"));
    }

    #[test]
    fn check_mode_fails_with_line_col_rendering() {
        let dir = unique_temp_dir("checkfail");
        let input = write_source(&dir, "main.lsc", "println(missing)\n");
        let outcome = compile(&check_options(vec![input]));
        assert!(!outcome.success);
        let rendered = outcome.diagnostics[0].render();
        assert!(
            rendered.starts_with("line 1, col "),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn emit_c_mode_writes_translation_unit() {
        let dir = unique_temp_dir("emitc");
        let input = write_source(&dir, "main.lsc", "println(7)\n");
        let out = dir.join("out.c").to_string_lossy().to_string();
        let outcome = compile(&CompileOptions {
            inputs: vec![input],
            output: Some(out.clone()),
            mode: Mode::EmitC,
            ..CompileOptions::default()
        });
        assert!(outcome.success, "diagnostics: {:?}", outcome.diagnostics);
        let c = fs::read_to_string(&out).expect("C artifact should exist");
        assert!(c.contains("int main(void)"));
    }

    #[test]
    fn inputs_concatenate_into_one_program() {
        let dir = unique_temp_dir("concat");
        let a = write_source(&dir, "lib.lsc", "fn helper() -> i64 { return 21 }\n");
        let b = write_source(&dir, "main.lsc", "println(helper() * 2)\n");
        let outcome = compile(&check_options(vec![a, b]));
        assert!(outcome.success, "diagnostics: {:?}", outcome.diagnostics);
    }

    #[test]
    fn typed_ir_bundle_round_trips_and_rejects_bad_format() {
        let dir = unique_temp_dir("bundle");
        let path = dir.join("out.lsir.json").to_string_lossy().to_string();
        let bundle = TypedIrBundle {
            format: TYPED_IR_FORMAT.to_string(),
            source_hash: "00112233aabbccdd".to_string(),
            config_hash: "ffeeddcc00112233".to_string(),
            c_code: "int main(void) { return 0; }\n".to_string(),
        };
        write_bundle(&path, &bundle).expect("write");
        let loaded = read_bundle(&path).expect("read");
        assert_eq!(loaded.c_code, bundle.c_code);

        let bad = dir.join("bad.lsir.json");
        fs::write(
            &bad,
            r#"{"format":"other-v9","source_hash":"","config_hash":"","c_code":""}"#,
        )
        .unwrap();
        let err = read_bundle(bad.to_str().unwrap()).unwrap_err();
        assert!(err.contains("unsupported bundle format"));
    }

    #[test]
    fn emit_typed_ir_writes_even_with_no_cache() {
        let dir = unique_temp_dir("emitir");
        let input = write_source(&dir, "main.lsc", "println(5)\n");
        let ir_path = dir.join("bundle.lsir.json").to_string_lossy().to_string();
        let outcome = compile(&CompileOptions {
            inputs: vec![input],
            mode: Mode::Check,
            no_cache: true,
            emit_typed_ir: Some(ir_path.clone()),
            ..CompileOptions::default()
        });
        assert!(outcome.success);
        let bundle = read_bundle(&ir_path).expect("bundle written despite no-cache");
        assert!(bundle.c_code.contains("int main(void)"));
    }

    #[test]
    fn consume_typed_ir_skips_the_frontend() {
        let dir = unique_temp_dir("consume");
        let path = dir.join("in.lsir.json").to_string_lossy().to_string();
        let bundle = TypedIrBundle {
            format: TYPED_IR_FORMAT.to_string(),
            source_hash: "0".repeat(16),
            config_hash: "1".repeat(16),
            c_code: "// canned\nint main(void) { return 0; }\n".to_string(),
        };
        write_bundle(&path, &bundle).unwrap();
        let out = dir.join("echo.c").to_string_lossy().to_string();
        let outcome = compile(&CompileOptions {
            inputs: Vec::new(),
            output: Some(out.clone()),
            mode: Mode::EmitC,
            consume_typed_ir: Some(path),
            ..CompileOptions::default()
        });
        assert!(outcome.success, "diagnostics: {:?}", outcome.diagnostics);
        assert!(fs::read_to_string(&out).unwrap().contains("// canned"));
    }

    #[test]
    fn incremental_cache_hits_on_identical_config() {
        let dir = unique_temp_dir("cache");
        let input = write_source(&dir, "main.lsc", "println(9)\n");
        let cache = dir.join("cache").to_string_lossy().to_string();
        let options = CompileOptions {
            inputs: vec![input],
            mode: Mode::Check,
            incremental: true,
            cache_dir: Some(cache.clone()),
            ..CompileOptions::default()
        };
        let first = compile(&options);
        assert!(first.success);
        let entries = fs::read_dir(&cache).expect("cache dir").count();
        assert_eq!(entries, 1, "one cache entry after first build");

        let second = compile(&options);
        assert!(second.success);
        // A hit skips the frontend stages entirely.
        assert!(!second.timing_ms.contains_key("stage2_lex"));
    }

    #[test]
    fn msvc_cross_compile_is_rejected() {
        let dir = unique_temp_dir("msvc");
        let input = write_source(&dir, "main.lsc", "println(1)\n");
        let outcome = compile(&CompileOptions {
            inputs: vec![input],
            mode: Mode::Build,
            cc: "cl".to_string(),
            target: Some("aarch64-unknown-linux-gnu".to_string()),
            ..CompileOptions::default()
        });
        assert!(!outcome.success);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.code == codes::LSD0003));
    }

    #[test]
    fn missing_pgo_profile_is_a_driver_error() {
        let dir = unique_temp_dir("pgo");
        let input = write_source(&dir, "main.lsc", "println(1)\n");
        let outcome = compile(&CompileOptions {
            inputs: vec![input],
            mode: Mode::Build,
            pgo_use: Some(dir.join("nope").to_string_lossy().to_string()),
            ..CompileOptions::default()
        });
        assert!(!outcome.success);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.code == codes::LSD0004));
    }

    #[test]
    fn custom_args_split_into_flags_and_tokens() {
        let mut diag = DiagnosticBag::new(8);
        let tokens = linescript_lex::lex("flag fast-path() { println(1) }\nprintln(2)\n", &mut diag);
        let program = linescript_parse::parse_program(&tokens, &mut diag).expect("parse");
        let custom = vec![
            "--fast-path".to_string(),
            "--depth".to_string(),
            "9".to_string(),
        ];
        let (flags, tokens) = split_custom_args(&custom, &program);
        assert_eq!(flags, vec!["__ls_flag_fast_path".to_string()]);
        assert_eq!(tokens, vec!["--depth".to_string(), "9".to_string()]);
    }
}
