//! Runtime dependency analyzer.
//!
//! Walks the final IR and decides which runtime features the emitted C must
//! carry. The emitter gates runtime blob sections and loop machinery on
//! these flags; the two collapsed levels (`minimal`, `ultra_minimal`) select
//! entire alternative runtimes.

use linescript_ast::{Expr, ExprKind, Program, Stmt, StmtKind, Type};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeNeeds {
    /// String values flow through the IR.
    pub strings: bool,
    /// Any f32/f64 arithmetic or literal.
    pub f64: bool,
    pub for_loops: bool,
    pub pow: bool,
    pub state_speed: bool,
    pub format_output: bool,
    pub http: bool,
    /// Any `gfx_*`, `game_*`, `pg_*`, or `key_down*` call.
    pub graphics: bool,
    pub parallel_for: bool,
    /// `.format()` appeared anywhere; suppresses toolchain chatter.
    pub format_marker: bool,
    pub concurrency: bool,
    pub np_vectors: bool,
    pub containers: bool,
    pub option_result: bool,
    pub physics: bool,
    pub cli_tokens: bool,
    pub raw_memory: bool,
    pub superuser: bool,
    pub input: bool,
    /// Only print/format/stateSpeed runtime calls and no strings in flight.
    pub minimal: bool,
    /// Minimal plus no f64 and no stateSpeed; usable on Windows only.
    pub ultra_minimal: bool,
}

pub fn analyze(program: &Program) -> RuntimeNeeds {
    let mut needs = RuntimeNeeds::default();
    let mut only_basic_calls = true;

    for func in &program.functions {
        if func.ret == Type::Str || func.params.iter().any(|p| p.ty == Type::Str) {
            needs.strings = true;
        }
        if func.ret.is_float() || func.params.iter().any(|p| p.ty.is_float()) {
            needs.f64 = true;
        }
        walk_block(&func.body, program, &mut needs, &mut only_basic_calls);
    }

    needs.minimal = only_basic_calls && !needs.strings;
    needs.ultra_minimal = needs.minimal && !needs.f64 && !needs.state_speed;
    needs
}

fn walk_block(
    body: &[Stmt],
    program: &Program,
    needs: &mut RuntimeNeeds,
    only_basic: &mut bool,
) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Declare { resolved, init, .. } => {
                if *resolved == Type::Str {
                    needs.strings = true;
                }
                if resolved.is_float() {
                    needs.f64 = true;
                }
                if let Some(e) = init {
                    walk_expr(e, program, needs, only_basic);
                }
            }
            StmtKind::Assign { value, .. } => walk_expr(value, program, needs, only_basic),
            StmtKind::Expr(e) => walk_expr(e, program, needs, only_basic),
            StmtKind::Return(v) => {
                if let Some(e) = v {
                    walk_expr(e, program, needs, only_basic);
                }
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                walk_expr(cond, program, needs, only_basic);
                walk_block(then_body, program, needs, only_basic);
                walk_block(else_body, program, needs, only_basic);
            }
            StmtKind::While { cond, body } => {
                walk_expr(cond, program, needs, only_basic);
                walk_block(body, program, needs, only_basic);
            }
            StmtKind::For {
                start,
                stop,
                step,
                parallel,
                body,
                ..
            } => {
                needs.for_loops = true;
                if *parallel {
                    needs.parallel_for = true;
                }
                walk_expr(start, program, needs, only_basic);
                walk_expr(stop, program, needs, only_basic);
                if let Some(e) = step {
                    walk_expr(e, program, needs, only_basic);
                }
                walk_block(body, program, needs, only_basic);
            }
            StmtKind::FormatBlock { end_arg, body } => {
                needs.format_output = true;
                needs.strings = true;
                if let Some(e) = end_arg {
                    walk_expr(e, program, needs, only_basic);
                }
                walk_block(body, program, needs, only_basic);
            }
            StmtKind::Break | StmtKind::Continue => {}
        }
    }
}

fn walk_expr(expr: &Expr, program: &Program, needs: &mut RuntimeNeeds, only_basic: &mut bool) {
    if expr.typed && expr.inf == Type::Str {
        needs.strings = true;
    }
    if expr.typed && expr.inf.is_float() {
        needs.f64 = true;
    }

    match &expr.kind {
        ExprKind::Str(_) => needs.strings = true,
        ExprKind::Float(_) => needs.f64 = true,
        ExprKind::Unary { operand, .. } => walk_expr(operand, program, needs, only_basic),
        ExprKind::Binary { op, lhs, rhs, .. } => {
            if *op == linescript_ast::BinOp::Pow {
                needs.pow = true;
            }
            walk_expr(lhs, program, needs, only_basic);
            walk_expr(rhs, program, needs, only_basic);
        }
        ExprKind::Call { name, args } => {
            classify_call(name, program, needs, only_basic);
            let print_family = name.starts_with("print") || name.starts_with("println");
            for arg in args {
                // A literal fed straight to a print call is not a string
                // value "in flight"; the minimal runtime prints it as-is.
                if print_family && matches!(arg.kind, ExprKind::Str(_)) {
                    continue;
                }
                walk_expr(arg, program, needs, only_basic);
            }
        }
        _ => {}
    }
}

fn classify_call(name: &str, program: &Program, needs: &mut RuntimeNeeds, only_basic: &mut bool) {
    // Calls into the user program itself never widen the runtime.
    if program.functions.iter().any(|f| f.symbol == name) {
        return;
    }

    let basic = name.starts_with("print")
        || name.starts_with("println")
        || name == "formatOutput"
        || name == "FormatOutput"
        || name == "stateSpeed"
        || name == ".format"
        || name == ".stateSpeed"
        || name == ".freeConsole";

    match name {
        "stateSpeed" | ".stateSpeed" => needs.state_speed = true,
        "formatOutput" | "FormatOutput" => {
            needs.format_output = true;
            needs.strings = true;
        }
        ".format" => needs.format_marker = true,
        "spawn" | "await" | "await_all" => needs.concurrency = true,
        "superuser" => needs.superuser = true,
        "input" | "input_i64" | "input_f64" => {
            needs.input = true;
            needs.strings = true;
        }
        _ => {}
    }

    if name.starts_with("http_") {
        needs.http = true;
    }
    if name.starts_with("gfx_")
        || name.starts_with("game_")
        || name.starts_with("pg_")
        || name.starts_with("key_down")
    {
        needs.graphics = true;
    }
    if name.starts_with("np_") {
        needs.np_vectors = true;
    }
    if name.starts_with("array_")
        || name.starts_with("dict_")
        || name.starts_with("map_")
        || name.starts_with("object_")
    {
        needs.containers = true;
    }
    if name.starts_with("option_") || name.starts_with("result_") {
        needs.option_result = true;
    }
    if name.starts_with("phys_") || name.starts_with("camera_") {
        needs.physics = true;
    }
    if name.starts_with("cli_") {
        needs.cli_tokens = true;
    }
    if name.starts_with("mem_") {
        needs.raw_memory = true;
    }
    if name.starts_with("su.") {
        needs.superuser = true;
    }
    if name.starts_with("str_") || name.starts_with("parse_") || name.ends_with("_to_str") {
        needs.strings = true;
    }

    if !basic {
        *only_basic = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescript_diag::DiagnosticBag;
    use linescript_lex::lex;
    use linescript_parse::parse_program;

    fn analyze_source(source: &str) -> RuntimeNeeds {
        let mut diag = DiagnosticBag::new(32);
        let tokens = lex(source, &mut diag);
        let mut program = parse_program(&tokens, &mut diag).expect("parse");
        linescript_sema::check(&mut program, false, &mut diag).expect("check");
        analyze(&program)
    }

    #[test]
    fn print_only_program_is_minimal() {
        let needs = analyze_source("println(1 + 2)\n");
        assert!(needs.minimal);
        assert!(needs.ultra_minimal);
        assert!(!needs.strings);
    }

    #[test]
    fn float_arithmetic_blocks_ultra_minimal() {
        let needs = analyze_source("println(1.5 + 2.5)\n");
        assert!(needs.minimal);
        assert!(!needs.ultra_minimal);
        assert!(needs.f64);
    }

    #[test]
    fn string_literals_leave_minimal() {
        let needs = analyze_source("println(\"hi\")\n");
        assert!(!needs.minimal);
        assert!(needs.strings);
    }

    #[test]
    fn for_and_pow_flags() {
        let needs = analyze_source("for i in 0..3 do\n  println(i ** 2)\nend\n");
        assert!(needs.for_loops);
        assert!(needs.pow);
        assert!(!needs.parallel_for);
    }

    #[test]
    fn parallel_for_flag() {
        let needs = analyze_source("parallel for i in 0..64 do\n  declare t = i * 2\n  println(t)\nend\n");
        assert!(needs.parallel_for);
        assert!(needs.for_loops);
    }

    #[test]
    fn feature_families_detected_by_prefix() {
        let needs = analyze_source(
            "declare a = array_new()\ndeclare g = gfx_new(64, 64)\ndeclare p = phys_new()\ndeclare v = np_new(8)\ndeclare r = http_get(\"x\")\nprintln(r)\n",
        );
        assert!(needs.containers);
        assert!(needs.graphics);
        assert!(needs.physics);
        assert!(needs.np_vectors);
        assert!(needs.http);
        assert!(!needs.minimal);
    }

    #[test]
    fn format_marker_and_blocks() {
        let needs = analyze_source(".format()\nformatOutput {\n  print(\"hi\")\n} (\"!\")\n");
        assert!(needs.format_marker);
        assert!(needs.format_output);
        assert!(needs.strings);
    }

    #[test]
    fn concurrency_and_superuser_flags() {
        let needs = analyze_source(
            "fn work() { println(1) }\nsuperuser()\nsu.trace.on()\ndeclare t = spawn(work())\nawait(t)\n",
        );
        assert!(needs.concurrency);
        assert!(needs.superuser);
    }

    #[test]
    fn user_calls_do_not_widen_runtime() {
        let needs = analyze_source("fn helper() -> i64 { return 4 }\nprintln(helper())\n");
        assert!(needs.minimal, "calls into compiled user code stay minimal");
    }

    #[test]
    fn state_speed_blocks_ultra_minimal_only() {
        let needs = analyze_source("stateSpeed(120)\nprintln(1)\n");
        assert!(needs.state_speed);
        assert!(needs.minimal);
        assert!(!needs.ultra_minimal);
    }
}
