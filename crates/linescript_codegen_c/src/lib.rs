//! C emitter.
//!
//! Writes a self-contained C translation unit: include block, superuser
//! state and the `LS_I128` typedef, parallel-for macros, the runtime blob
//! selected by the dependency flags, user function prototypes and bodies
//! with loop specializations and owned-handle scope cleanup, and the entry
//! wrapper.

use linescript_ast::{
    BinOp, Expr, ExprKind, Function, Program, Stmt, StmtKind, Type, UnOp,
};
use linescript_deps::RuntimeNeeds;
use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Clone, Debug, Default)]
pub struct CodegenOptions {
    /// Target is Windows; selects Win32 headers, Winsock, and the
    /// ultra-minimal entry shape.
    pub windows: bool,
    /// Superuser mode: guard/trace calls precede every statement.
    pub superuser: bool,
    /// Symbols of `flag` functions active on the compiler command line,
    /// in first-seen order.
    pub active_flags: Vec<String>,
    /// Custom CLI tokens forwarded verbatim into the runtime token table.
    pub cli_tokens: Vec<String>,
}

pub fn emit_c(
    program: &Program,
    needs: &RuntimeNeeds,
    options: &CodegenOptions,
) -> Result<String, String> {
    let entry = select_entry(program)?;
    // The ultra-minimal runtime is Windows-only; elsewhere it degrades to
    // the minimal CRT-based runtime. Superuser mode needs the guard/trace
    // shims, which only the full runtime defines.
    let mut needs = needs.clone();
    if !options.windows {
        needs.ultra_minimal = false;
    }
    if options.superuser {
        needs.superuser = true;
        needs.minimal = false;
        needs.ultra_minimal = false;
    }
    let mut cg = Emitter {
        program,
        needs,
        options,
        out: String::new(),
        temp_counter: 0,
        scopes: Vec::new(),
        var_types: HashMap::new(),
        current_fn: String::new(),
    };
    cg.emit_unit(&entry)?;
    Ok(cg.out)
}

/// Entry selection order: the synthesized script main, else a function
/// literally named `main`, else the sole zero-argument user function.
fn select_entry(program: &Program) -> Result<String, String> {
    if program
        .functions
        .iter()
        .any(|f| f.symbol == "__linescript_script_main")
    {
        return Ok("__linescript_script_main".to_string());
    }
    if let Some(main) = program
        .functions
        .iter()
        .find(|f| f.source_name == "main" && f.method_of.is_none())
    {
        return Ok(main.symbol.clone());
    }
    let candidates: Vec<&Function> = program
        .functions
        .iter()
        .filter(|f| {
            f.params.is_empty()
                && !f.is_extern
                && !f.cli_flag
                && f.method_of.is_none()
                && f.operator.is_none()
        })
        .collect();
    match candidates.len() {
        1 => Ok(candidates[0].symbol.clone()),
        0 => Err("no entry point: define top-level statements or a `main` function".to_string()),
        n => Err(format!(
            "ambiguous entry point: {n} zero-argument functions and no `main`"
        )),
    }
}

struct Scope {
    cleanups: Vec<(String, String)>,
    is_loop: bool,
}

struct Emitter<'a> {
    program: &'a Program,
    needs: RuntimeNeeds,
    options: &'a CodegenOptions,
    out: String,
    temp_counter: u32,
    scopes: Vec<Scope>,
    var_types: HashMap<String, Type>,
    current_fn: String,
}

impl<'a> Emitter<'a> {
    fn emit_unit(&mut self, entry: &str) -> Result<(), String> {
        self.emit_includes();
        self.emit_global_state();
        if self.needs.for_loops || self.needs.parallel_for {
            self.emit_parallel_macros();
        }
        self.emit_prologue_helpers();
        self.out.push_str(&linescript_rt::render_runtime(&self.needs));
        self.out.push('\n');
        self.emit_prototypes();
        self.emit_bodies()?;
        self.emit_entry_wrapper(entry);
        Ok(())
    }

    fn emit_includes(&mut self) {
        if self.needs.ultra_minimal && self.options.windows {
            self.out.push_str("#include <windows.h>\n#include <stdint.h>\n\n");
            return;
        }
        for header in [
            "stdint.h", "stddef.h", "stdio.h", "stdlib.h", "time.h", "math.h", "string.h",
            "ctype.h",
        ] {
            let _ = writeln!(self.out, "#include <{header}>");
        }
        if self.options.windows {
            self.out.push_str("#include <windows.h>\n");
            if self.needs.http || self.needs.graphics {
                self.out.push_str("#include <winsock2.h>\n");
            }
        } else {
            if self.needs.http || self.needs.graphics {
                self.out.push_str(
                    "#include <sys/socket.h>\n#include <netinet/in.h>\n#include <arpa/inet.h>\n#include <unistd.h>\n",
                );
            }
            if self.needs.concurrency {
                self.out.push_str("#include <pthread.h>\n");
            }
        }
        self.out.push('\n');
    }

    fn emit_global_state(&mut self) {
        self.out.push_str(
            "static int ls_su_enabled = 0;\n\
             static int ls_su_trace = 0;\n\
             static int64_t ls_su_step_limit = -1;\n\
             static int64_t ls_su_steps = 0;\n\
             #if defined(_MSC_VER) && !defined(__clang__)\n\
             typedef int64_t LS_I128;\n\
             #else\n\
             typedef __int128 LS_I128;\n\
             #endif\n\n",
        );

        // CLI token table; the compiler forwards unknown long options here.
        let _ = writeln!(
            self.out,
            "static const char *ls_cli_tokens[] = {{{}0}};",
            self.options
                .cli_tokens
                .iter()
                .map(|t| format!("{}, ", c_quote(t)))
                .collect::<String>()
        );
        let _ = writeln!(
            self.out,
            "static const int64_t ls_cli_token_count_v = {};\n",
            self.options.cli_tokens.len()
        );
    }

    fn emit_parallel_macros(&mut self) {
        self.out.push_str(
            "#define LS_PAR_MIN_ITERS 4096\n\
             #define LS_PRAGMA(x) _Pragma(#x)\n\
             #if defined(_OPENMP)\n\
             #define LS_PAR_FOR LS_PRAGMA(omp parallel for)\n\
             #define LS_PAR_FOR_IF(cond) LS_PRAGMA(omp parallel for if(cond))\n\
             #define LS_OMP_SIMD LS_PRAGMA(omp simd)\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS(v) LS_PRAGMA(omp simd reduction(+:v))\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS2(a, b) LS_PRAGMA(omp simd reduction(+:a, b))\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS3(a, b, c) LS_PRAGMA(omp simd reduction(+:a, b, c))\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS4(a, b, c, d) LS_PRAGMA(omp simd reduction(+:a, b, c, d))\n\
             #else\n\
             #define LS_PAR_FOR\n\
             #define LS_PAR_FOR_IF(cond)\n\
             #define LS_OMP_SIMD\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS(v)\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS2(a, b)\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS3(a, b, c)\n\
             #define LS_OMP_SIMD_REDUCTION_PLUS4(a, b, c, d)\n\
             #endif\n\
             #if defined(__clang__)\n\
             #define LS_VEC_HINT LS_PRAGMA(clang loop vectorize(enable))\n\
             #elif defined(__GNUC__)\n\
             #define LS_VEC_HINT LS_PRAGMA(GCC ivdep)\n\
             #else\n\
             #define LS_VEC_HINT\n\
             #endif\n\n",
        );
    }

    fn emit_prologue_helpers(&mut self) {
        if self.needs.pow {
            self.out.push_str(
                "static int64_t ls_pow_i64(int64_t base, int64_t exp) {\n\
                 \x20   if (exp < 0) return 0;\n\
                 \x20   int64_t result = 1;\n\
                 \x20   while (exp > 0) {\n\
                 \x20       if (exp & 1) result *= base;\n\
                 \x20       base *= base;\n\
                 \x20       exp >>= 1;\n\
                 \x20   }\n\
                 \x20   return result;\n\
                 }\n\n",
            );
        }
        if !self.needs.minimal {
            self.out.push_str(
                "static int64_t ls_max_i64(int64_t a, int64_t b) { return a > b ? a : b; }\n\
                 static int64_t ls_min_i64(int64_t a, int64_t b) { return a < b ? a : b; }\n\
                 static double ls_max_f64(double a, double b) { return a > b ? a : b; }\n\
                 static double ls_min_f64(double a, double b) { return a < b ? a : b; }\n\
                 static int64_t ls_abs_i64(int64_t v) { return v < 0 ? -v : v; }\n\
                 static double ls_abs_f64(double v) { return v < 0.0 ? -v : v; }\n\
                 static int64_t ls_clamp_i64(int64_t v, int64_t lo, int64_t hi) {\n\
                 \x20   return v < lo ? lo : (v > hi ? hi : v);\n\
                 }\n\
                 static double ls_clamp_f64(double v, double lo, double hi) {\n\
                 \x20   return v < lo ? lo : (v > hi ? hi : v);\n\
                 }\n\n",
            );
        }
    }

    // ── Prototypes and bodies ──

    fn emit_prototypes(&mut self) {
        for func in self.program.functions.iter() {
            // Extern functions are prototypes for symbols defined elsewhere.
            let storage = if func.is_extern {
                "extern"
            } else if func.is_inline {
                "static inline"
            } else {
                "static"
            };
            let params = if func.params.is_empty() {
                "void".to_string()
            } else {
                func.params
                    .iter()
                    .map(|p| format!("{} {}", c_type(p.ty), p.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = writeln!(
                self.out,
                "{storage} {} {}({});",
                c_type(func.ret),
                map_symbol(&func.symbol),
                params
            );
        }
        self.out.push('\n');
    }

    fn emit_bodies(&mut self) -> Result<(), String> {
        let funcs: Vec<&Function> = self
            .program
            .functions
            .iter()
            .filter(|f| !f.is_extern)
            .collect();
        for func in funcs {
            self.emit_function(func)?;
        }
        Ok(())
    }

    fn emit_function(&mut self, func: &Function) -> Result<(), String> {
        self.current_fn = func.source_name.clone();
        self.var_types.clear();
        for param in &func.params {
            self.var_types.insert(param.name.clone(), param.ty);
        }
        collect_var_types(&func.body, &mut self.var_types);

        let storage = if func.is_inline { "static inline" } else { "static" };
        let params = if func.params.is_empty() {
            "void".to_string()
        } else {
            func.params
                .iter()
                .map(|p| format!("{} {}", c_type(p.ty), p.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(
            self.out,
            "{storage} {} {}({}) {{",
            c_type(func.ret),
            map_symbol(&func.symbol),
            params
        );

        self.scopes.push(Scope {
            cleanups: Vec::new(),
            is_loop: false,
        });
        self.emit_block(&func.body, 1, func.ret)?;
        self.emit_scope_cleanups(1);
        self.scopes.pop();

        self.out.push_str("}\n\n");
        Ok(())
    }

    fn emit_block(&mut self, body: &[Stmt], indent: usize, ret: Type) -> Result<(), String> {
        for stmt in body {
            self.emit_stmt(stmt, indent, ret)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt, indent: usize, ret: Type) -> Result<(), String> {
        let pad = "    ".repeat(indent);
        if self.options.superuser {
            let _ = writeln!(self.out, "{pad}ls_su_guard_step();");
            let _ = writeln!(
                self.out,
                "{pad}ls_su_trace_stmt({}, {}, {});",
                c_quote(&self.current_fn),
                stmt.span.line,
                c_quote(stmt_kind_name(stmt))
            );
        }

        match &stmt.kind {
            StmtKind::Declare {
                name,
                init,
                resolved,
                is_owned,
                free_fn,
                ..
            } => {
                let cty = c_type(*resolved);
                let value = match init {
                    Some(e) => self.emit_expr(e)?,
                    None => default_value(*resolved).to_string(),
                };
                let _ = writeln!(self.out, "{pad}{cty} {name} = {value};");
                if *is_owned {
                    if let Some(free) = free_fn {
                        self.scopes
                            .last_mut()
                            .expect("scope")
                            .cleanups
                            .push((name.clone(), free.clone()));
                    }
                }
            }
            StmtKind::Assign { name, value } => {
                let value = self.emit_expr(value)?;
                let _ = writeln!(self.out, "{pad}{name} = {value};");
            }
            StmtKind::Expr(e) => {
                let text = self.emit_expr(e)?;
                let _ = writeln!(self.out, "{pad}{text};");
            }
            StmtKind::Return(value) => {
                self.emit_all_cleanups(indent);
                match value {
                    Some(e) => {
                        let mut text = self.emit_expr(e)?;
                        if e.inf == Type::Str && !e.is_literal() {
                            text = format!("ls_str_hold({text})");
                        }
                        let _ = writeln!(self.out, "{pad}return {text};");
                    }
                    None => {
                        if ret == Type::Void {
                            let _ = writeln!(self.out, "{pad}return;");
                        } else {
                            let _ = writeln!(self.out, "{pad}return {};", default_value(ret));
                        }
                    }
                }
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.emit_expr(cond)?;
                let _ = writeln!(self.out, "{pad}if ({cond}) {{");
                self.push_scope(false);
                self.emit_block(then_body, indent + 1, ret)?;
                self.pop_scope(indent + 1);
                if else_body.is_empty() {
                    let _ = writeln!(self.out, "{pad}}}");
                } else {
                    let _ = writeln!(self.out, "{pad}}} else {{");
                    self.push_scope(false);
                    self.emit_block(else_body, indent + 1, ret)?;
                    self.pop_scope(indent + 1);
                    let _ = writeln!(self.out, "{pad}}}");
                }
            }
            StmtKind::While { cond, body } => {
                let cond = self.emit_expr(cond)?;
                let _ = writeln!(self.out, "{pad}while ({cond}) {{");
                self.push_scope(true);
                self.emit_block(body, indent + 1, ret)?;
                self.pop_scope(indent + 1);
                let _ = writeln!(self.out, "{pad}}}");
            }
            StmtKind::For { .. } => self.emit_for(stmt, indent, ret)?,
            StmtKind::FormatBlock { end_arg, body } => {
                let _ = writeln!(self.out, "{pad}ls_format_begin();");
                self.push_scope(false);
                self.emit_block(body, indent, ret)?;
                self.pop_scope(indent);
                let end = match end_arg {
                    Some(e) => self.coerce_to_str(e)?,
                    None => "\"\"".to_string(),
                };
                let tmp = self.fresh("ls_fmt");
                let _ = writeln!(self.out, "{pad}const char *{tmp} = ls_format_end({end});");
                let _ = writeln!(self.out, "{pad}ls_emit_text({tmp});");
            }
            StmtKind::Break => {
                self.emit_loop_cleanups(indent);
                let _ = writeln!(self.out, "{pad}break;");
            }
            StmtKind::Continue => {
                self.emit_loop_cleanups(indent);
                let _ = writeln!(self.out, "{pad}continue;");
            }
        }
        Ok(())
    }

    // ── Loops ──

    fn emit_for(&mut self, stmt: &Stmt, indent: usize, ret: Type) -> Result<(), String> {
        let StmtKind::For {
            var,
            start,
            stop,
            step,
            parallel,
            body,
        } = &stmt.kind
        else {
            unreachable!();
        };
        let pad = "    ".repeat(indent);

        let start_c = self.emit_expr(start)?;
        let stop_c = self.emit_expr(stop)?;
        let step_c = match step {
            Some(e) => self.emit_expr(e)?,
            None => "1".to_string(),
        };

        let lo = self.fresh("ls_start");
        let hi = self.fresh("ls_stop");
        let st = self.fresh("ls_step");
        let _ = writeln!(self.out, "{pad}{{");
        let inner = "    ".repeat(indent + 1);
        let _ = writeln!(self.out, "{inner}int64_t {lo} = {start_c};");
        let _ = writeln!(self.out, "{inner}int64_t {hi} = {stop_c};");
        let _ = writeln!(self.out, "{inner}int64_t {st} = {step_c};");

        let header = format!(
            "for (int64_t {var} = {lo}; {st} > 0 ? {var} < {hi} : {var} > {hi}; {var} += {st})"
        );

        if *parallel {
            let _ = writeln!(
                self.out,
                "{inner}LS_PAR_FOR_IF((({hi} - {lo}) / ({st} != 0 ? {st} : 1)) >= LS_PAR_MIN_ITERS)"
            );
            let _ = writeln!(self.out, "{inner}{header} {{");
            self.push_scope(true);
            self.emit_block(body, indent + 2, ret)?;
            self.pop_scope(indent + 2);
            let _ = writeln!(self.out, "{inner}}}");
            let _ = writeln!(self.out, "{pad}}}");
            return Ok(());
        }

        // Recognized reduction shapes get private accumulators with an OMP
        // reduction pragma.
        if let Some(reductions) = reduction_shape(body, var) {
            let temps: Vec<(String, String, Type)> = reductions
                .iter()
                .map(|(acc, _)| {
                    let ty = self.var_types.get(acc.as_str()).copied().unwrap_or(Type::I64);
                    (acc.clone(), self.fresh("ls_red"), ty)
                })
                .collect();
            for (_, tmp, ty) in &temps {
                let _ = writeln!(self.out, "{inner}{} {tmp} = {};", c_type(*ty), default_value(*ty));
            }
            let names: Vec<&str> = temps.iter().map(|(_, tmp, _)| tmp.as_str()).collect();
            let pragma = match names.len() {
                1 => format!("LS_OMP_SIMD_REDUCTION_PLUS({})", names[0]),
                2 => format!("LS_OMP_SIMD_REDUCTION_PLUS2({}, {})", names[0], names[1]),
                3 => format!(
                    "LS_OMP_SIMD_REDUCTION_PLUS3({}, {}, {})",
                    names[0], names[1], names[2]
                ),
                _ => format!(
                    "LS_OMP_SIMD_REDUCTION_PLUS4({}, {}, {}, {})",
                    names[0], names[1], names[2], names[3]
                ),
            };
            let _ = writeln!(self.out, "{inner}{pragma}");
            let _ = writeln!(self.out, "{inner}{header} {{");
            for ((_, rhs), (_, tmp, _)) in reductions.iter().zip(&temps) {
                let rhs_c = self.emit_expr(rhs)?;
                let _ = writeln!(self.out, "{}{tmp} += {rhs_c};", "    ".repeat(indent + 2));
            }
            let _ = writeln!(self.out, "{inner}}}");
            for (acc, tmp, _) in &temps {
                let _ = writeln!(self.out, "{inner}{acc} = {acc} + {tmp};");
            }
            let _ = writeln!(self.out, "{pad}}}");
            return Ok(());
        }

        if is_vectorizable(body) {
            let _ = writeln!(self.out, "{inner}LS_OMP_SIMD");
            let _ = writeln!(self.out, "{inner}LS_VEC_HINT");
        }
        let _ = writeln!(self.out, "{inner}{header} {{");
        self.push_scope(true);
        self.emit_block(body, indent + 2, ret)?;
        self.pop_scope(indent + 2);
        let _ = writeln!(self.out, "{inner}}}");
        let _ = writeln!(self.out, "{pad}}}");
        Ok(())
    }

    // ── Expressions ──

    fn emit_expr(&mut self, expr: &Expr) -> Result<String, String> {
        Ok(match &expr.kind {
            ExprKind::Int(v) => format!("{v}LL"),
            ExprKind::Float(v) => c_float(*v),
            ExprKind::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            ExprKind::Str(s) => c_quote(s),
            ExprKind::Var(name) => name.clone(),
            ExprKind::Unary {
                op,
                operand,
                override_fn,
            } => {
                let inner = self.emit_expr(operand)?;
                match override_fn {
                    Some(symbol) => format!("{}({inner})", map_symbol(symbol)),
                    None => match op {
                        UnOp::Neg => format!("(-{inner})"),
                        UnOp::Not => format!("(!{inner})"),
                    },
                }
            }
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                override_fn,
            } => {
                let l = self.emit_expr(lhs)?;
                let r = self.emit_expr(rhs)?;
                if let Some(symbol) = override_fn {
                    return Ok(format!("{}({l}, {r})", map_symbol(symbol)));
                }
                let str_operands = lhs.inf == Type::Str && rhs.inf == Type::Str;
                match op {
                    BinOp::Eq if str_operands => format!("ls_str_eq({l}, {r})"),
                    BinOp::Ne if str_operands => format!("ls_str_neq({l}, {r})"),
                    BinOp::Pow => {
                        if lhs.inf.is_float() || rhs.inf.is_float() {
                            format!("pow({l}, {r})")
                        } else {
                            format!("ls_pow_i64({l}, {r})")
                        }
                    }
                    BinOp::Mod if lhs.inf.is_float() || rhs.inf.is_float() => {
                        format!("fmod({l}, {r})")
                    }
                    _ => format!("({l} {} {r})", c_op(*op)),
                }
            }
            ExprKind::Call { name, args } => self.emit_call(name, args)?,
        })
    }

    fn emit_call(&mut self, name: &str, args: &[Expr]) -> Result<String, String> {
        // print/println/formatOutput dispatch on the argument type.
        if matches!(name, "print" | "println") && args.len() == 1 {
            let suffix = type_suffix(args[0].inf);
            let arg = self.emit_expr(&args[0])?;
            return Ok(format!("{name}_{suffix}({arg})"));
        }
        if matches!(name, "formatOutput" | "FormatOutput") && args.len() == 1 {
            let suffix = type_suffix(args[0].inf);
            let arg = self.emit_expr(&args[0])?;
            return Ok(format!("formatOutput_{suffix}({arg})"));
        }
        if matches!(name, "max" | "min" | "clamp" | "abs") {
            let float = args.iter().any(|a| a.inf.is_float());
            let helper = match (name, float) {
                ("max", false) => "ls_max_i64",
                ("max", true) => "ls_max_f64",
                ("min", false) => "ls_min_i64",
                ("min", true) => "ls_min_f64",
                ("abs", false) => "ls_abs_i64",
                ("abs", true) => "ls_abs_f64",
                ("clamp", false) => "ls_clamp_i64",
                (_, true) => "ls_clamp_f64",
                _ => unreachable!(),
            };
            let mut parts = Vec::new();
            for arg in args {
                parts.push(self.emit_expr(arg)?);
            }
            return Ok(format!("{helper}({})", parts.join(", ")));
        }
        if name == "spawn" {
            let ExprKind::Call { name: target, .. } = &args[0].kind else {
                return Err("spawn target did not survive checking".to_string());
            };
            return Ok(format!("ls_spawn({})", map_symbol(target)));
        }
        if name == "await" {
            let arg = self.emit_expr(&args[0])?;
            return Ok(format!("ls_await({arg})"));
        }
        if name == "await_all" {
            return Ok("ls_await_all()".to_string());
        }
        if matches!(name, "input" | "input_i64" | "input_f64") {
            let prompt = match args.first() {
                Some(a) => self.emit_expr(a)?,
                None => "\"\"".to_string(),
            };
            let runtime = match name {
                "input" => "ls_input_line",
                other => other,
            };
            return Ok(format!("{runtime}({prompt})"));
        }
        if name == "random" {
            return Ok("ls_random()".to_string());
        }
        if let Some(mapped) = su_symbol(name) {
            let mut parts = Vec::new();
            for arg in args {
                parts.push(self.emit_expr(arg)?);
            }
            return Ok(format!("{mapped}({})", parts.join(", ")));
        }
        if name == ".format" {
            return Ok("((void)0)".to_string());
        }
        if name == ".freeConsole" {
            return Ok(if self.needs.minimal {
                "((void)0)".to_string()
            } else {
                "ls_free_console()".to_string()
            });
        }
        if name == ".stateSpeed" {
            let arg = self.emit_expr(&args[0])?;
            return Ok(format!("stateSpeed({arg})"));
        }

        let is_user_fn = self.program.functions.iter().any(|f| f.symbol == name);
        let mut parts = Vec::new();
        for arg in args {
            let mut text = self.emit_expr(arg)?;
            // Non-literal string arguments crossing into user code get a
            // stable heap copy independent of the scratch ring.
            if is_user_fn && arg.inf == Type::Str && !arg.is_literal() {
                text = format!("ls_str_hold({text})");
            }
            parts.push(text);
        }
        Ok(format!("{}({})", map_symbol(name), parts.join(", ")))
    }

    fn coerce_to_str(&mut self, expr: &Expr) -> Result<String, String> {
        let text = self.emit_expr(expr)?;
        Ok(match expr.inf {
            Type::Str => text,
            other => format!("formatOutput_{}({text})", type_suffix(other)),
        })
    }

    // ── Scopes and cleanup ──

    fn push_scope(&mut self, is_loop: bool) {
        self.scopes.push(Scope {
            cleanups: Vec::new(),
            is_loop,
        });
    }

    fn pop_scope(&mut self, indent: usize) {
        self.emit_scope_cleanups(indent);
        self.scopes.pop();
    }

    fn emit_scope_cleanups(&mut self, indent: usize) {
        let pad = "    ".repeat(indent);
        let Some(scope) = self.scopes.last() else {
            return;
        };
        let lines: Vec<String> = scope
            .cleanups
            .iter()
            .rev()
            .map(|(name, free)| format!("{pad}{free}({name});"))
            .collect();
        for line in lines {
            self.out.push_str(&line);
            self.out.push('\n');
        }
    }

    /// Every registered owned handle, innermost scope first: used on return.
    fn emit_all_cleanups(&mut self, indent: usize) {
        let pad = "    ".repeat(indent);
        let lines: Vec<String> = self
            .scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.cleanups.iter().rev())
            .map(|(name, free)| format!("{pad}{free}({name});"))
            .collect();
        for line in lines {
            self.out.push_str(&line);
            self.out.push('\n');
        }
    }

    /// Owned handles registered inside the current loop body: used on
    /// break/continue crossing the loop boundary.
    fn emit_loop_cleanups(&mut self, indent: usize) {
        let pad = "    ".repeat(indent);
        let mut lines = Vec::new();
        for scope in self.scopes.iter().rev() {
            for (name, free) in scope.cleanups.iter().rev() {
                lines.push(format!("{pad}{free}({name});"));
            }
            if scope.is_loop {
                break;
            }
        }
        for line in lines {
            self.out.push_str(&line);
            self.out.push('\n');
        }
    }

    // ── Entry wrapper ──

    fn emit_entry_wrapper(&mut self, entry: &str) {
        let entry_fn = self
            .program
            .functions
            .iter()
            .find(|f| f.symbol == entry)
            .expect("entry resolved");
        let returns_int = entry_fn.ret != Type::Void && entry_fn.ret != Type::Str;

        if self.needs.ultra_minimal && self.options.windows {
            self.out.push_str("void __stdcall mainCRTStartup(void) {\n");
            self.out.push_str("    ls_io_init();\n");
            for flag in &self.options.active_flags {
                let _ = writeln!(self.out, "    {}();", map_symbol(flag));
            }
            if returns_int {
                let _ = writeln!(
                    self.out,
                    "    ExitProcess((UINT){}());",
                    map_symbol(entry)
                );
            } else {
                let _ = writeln!(self.out, "    {}();", map_symbol(entry));
                self.out.push_str("    ExitProcess(0);\n");
            }
            self.out.push_str("}\n");
            return;
        }

        self.out.push_str("int main(void) {\n");
        for flag in &self.options.active_flags {
            let _ = writeln!(self.out, "    {}();", map_symbol(flag));
        }
        if returns_int {
            let _ = writeln!(self.out, "    return (int){}();", map_symbol(entry));
        } else {
            let _ = writeln!(self.out, "    {}();", map_symbol(entry));
            self.out.push_str("    return 0;\n");
        }
        self.out.push_str("}\n");
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.temp_counter += 1;
        format!("{prefix}_{}", self.temp_counter)
    }
}

// ── Shape helpers ──

/// Up to four `acc = acc + rhs` statements with call-free right sides that
/// never read any accumulator.
fn reduction_shape<'b>(body: &'b [Stmt], loop_var: &str) -> Option<Vec<(String, &'b Expr)>> {
    if body.is_empty() || body.len() > 4 {
        return None;
    }
    let mut accs: Vec<(String, &Expr)> = Vec::new();
    for stmt in body {
        let StmtKind::Assign { name, value } = &stmt.kind else {
            return None;
        };
        let ExprKind::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
            override_fn: None,
        } = &value.kind
        else {
            return None;
        };
        if !matches!(&lhs.kind, ExprKind::Var(n) if n == name) {
            return None;
        }
        if name == loop_var || rhs.contains_call() {
            return None;
        }
        let mut vars = Vec::new();
        rhs.referenced_vars(&mut vars);
        if vars.iter().any(|v| v == name || accs.iter().any(|(a, _)| a == v)) {
            return None;
        }
        if accs.iter().any(|(a, _)| a == name) {
            return None;
        }
        accs.push((name.clone(), rhs.as_ref()));
    }
    Some(accs)
}

/// Constant-bounded plain loops vectorize when every statement is a local
/// declare/assign/expression with no calls.
fn is_vectorizable(body: &[Stmt]) -> bool {
    body.iter().all(|stmt| match &stmt.kind {
        StmtKind::Declare { init, .. } => {
            init.as_ref().map(|e| !e.contains_call()).unwrap_or(true)
        }
        StmtKind::Assign { value, .. } => !value.contains_call(),
        StmtKind::Expr(e) => !e.contains_call(),
        _ => false,
    })
}

fn collect_var_types(body: &[Stmt], out: &mut HashMap<String, Type>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Declare { name, resolved, .. } => {
                out.insert(name.clone(), *resolved);
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_var_types(then_body, out);
                collect_var_types(else_body, out);
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::FormatBlock { body, .. } => collect_var_types(body, out),
            _ => {}
        }
    }
}

// ── Textual helpers ──

fn c_type(ty: Type) -> &'static str {
    match ty {
        Type::I32 => "int32_t",
        Type::I64 => "int64_t",
        Type::F32 => "float",
        Type::F64 => "double",
        Type::Bool => "int",
        Type::Str => "const char *",
        Type::Void => "void",
    }
}

fn type_suffix(ty: Type) -> &'static str {
    match ty {
        Type::I32 => "i32",
        Type::I64 => "i64",
        Type::F32 => "f32",
        Type::F64 => "f64",
        Type::Bool => "bool",
        Type::Str => "str",
        Type::Void => "i64",
    }
}

fn default_value(ty: Type) -> &'static str {
    match ty {
        Type::F32 | Type::F64 => "0.0",
        Type::Str => "\"\"",
        _ => "0",
    }
}

fn c_op(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

/// A user function literally named `main` cannot collide with the wrapper.
fn map_symbol(symbol: &str) -> String {
    if symbol == "main" {
        "__ls_user_main".to_string()
    } else {
        symbol.to_string()
    }
}

fn su_symbol(name: &str) -> Option<&'static str> {
    Some(match name {
        "su.trace.on" => "ls_su_trace_on",
        "su.trace.off" => "ls_su_trace_off",
        "su.limit.set" => "ls_su_limit_set",
        "su.limit.clear" => "ls_su_limit_clear",
        "su.step.limit" => "ls_su_step_limit_set",
        "su.ir.dump" => "ls_su_ir_dump",
        "su.mem.report" => "ls_su_mem_report",
        _ => return None,
    })
}

fn stmt_kind_name(stmt: &Stmt) -> &'static str {
    match stmt.kind {
        StmtKind::Declare { .. } => "declare",
        StmtKind::Assign { .. } => "assign",
        StmtKind::Expr(_) => "expr",
        StmtKind::Return(_) => "return",
        StmtKind::If { .. } => "if",
        StmtKind::While { .. } => "while",
        StmtKind::For { .. } => "for",
        StmtKind::FormatBlock { .. } => "format",
        StmtKind::Break => "break",
        StmtKind::Continue => "continue",
    }
}

/// Integer literals carry the LL suffix; float literals are written with
/// 17 significant digits and always keep a decimal point.
fn c_float(v: f64) -> String {
    let text = format!("{v:.17e}");
    if text.contains('e') || text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

fn c_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
