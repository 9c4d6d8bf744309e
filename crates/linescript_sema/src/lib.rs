//! LineScript type checker.
//!
//! Two passes: `collect` seeds the signatures of every declared and built-in
//! function, then each function body is checked and annotated in place. The
//! same entry point runs again after optimization; for accepted programs the
//! re-check must not surface errors the first pass did not.

use linescript_ast::{
    BinOp, Expr, ExprKind, OperatorKind, Program, Span, Stmt, StmtKind, Type, UnOp,
};
use linescript_diag::{codes, Diagnostic, DiagnosticBag, Severity};
use std::collections::{HashMap, HashSet};

/// Constructor -> free function table for owned-handle validation. The
/// parser keeps its own copy for `delete` defaults.
pub fn owned_free_fn(ctor: &str) -> Option<&'static str> {
    if ctor.starts_with("__ls_ctor_") {
        return Some("object_free");
    }
    Some(match ctor {
        "array_new" => "array_free",
        "dict_new" => "dict_free",
        "map_new" => "map_free",
        "object_new" => "object_free",
        "np_new" | "np_copy" | "np_from_range" | "np_linspace" => "np_free",
        "gfx_new" | "pg_surface_new" => "gfx_free",
        "game_new" | "pg_init" => "game_free",
        "phys_new" => "phys_free",
        "http_server_listen" => "http_server_close",
        "http_client_connect" => "http_client_close",
        "result_ok" | "result_err" => "result_free",
        "option_some" | "option_none" => "option_free",
        _ => return None,
    })
}

#[derive(Clone, Debug)]
pub struct FnSig {
    pub symbol: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub throws: Vec<String>,
}

/// Check the whole program. Returns whether superuser mode is active
/// (enabled by `--su-session` or any call to `superuser()`).
#[allow(clippy::result_unit_err)]
pub fn check(
    program: &mut Program,
    su_session: bool,
    diag: &mut DiagnosticBag,
) -> Result<bool, ()> {
    let before = diag.error_count();

    let su = su_session || program_calls_superuser(program);
    diag.superuser = su;

    let mut checker = Checker::new(diag, su);
    checker.collect(program);
    checker.check_functions(program);

    if checker.diag.error_count() > before {
        Err(())
    } else {
        Ok(su)
    }
}

fn program_calls_superuser(program: &Program) -> bool {
    fn expr_calls(expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Call { name, args } => {
                name == "superuser" || args.iter().any(expr_calls)
            }
            ExprKind::Unary { operand, .. } => expr_calls(operand),
            ExprKind::Binary { lhs, rhs, .. } => expr_calls(lhs) || expr_calls(rhs),
            _ => false,
        }
    }
    fn stmt_calls(stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Declare { init, .. } => init.as_ref().is_some_and(expr_calls),
            StmtKind::Assign { value, .. } => expr_calls(value),
            StmtKind::Expr(e) => expr_calls(e),
            StmtKind::Return(v) => v.as_ref().is_some_and(expr_calls),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                expr_calls(cond)
                    || then_body.iter().any(stmt_calls)
                    || else_body.iter().any(stmt_calls)
            }
            StmtKind::While { cond, body } => expr_calls(cond) || body.iter().any(stmt_calls),
            StmtKind::For {
                start,
                stop,
                step,
                body,
                ..
            } => {
                expr_calls(start)
                    || expr_calls(stop)
                    || step.as_ref().is_some_and(expr_calls)
                    || body.iter().any(stmt_calls)
            }
            StmtKind::FormatBlock { end_arg, body } => {
                end_arg.as_ref().is_some_and(expr_calls) || body.iter().any(stmt_calls)
            }
            StmtKind::Break | StmtKind::Continue => false,
        }
    }
    program
        .functions
        .iter()
        .any(|f| f.body.iter().any(stmt_calls))
}

// ── Type relations ──

/// Identical types, or both numeric. Narrowing numeric assignment is
/// accepted here without diagnostic even though overload resolution charges
/// for widening; the asymmetry is inherited behavior.
pub fn assignable(from: Type, to: Type) -> bool {
    from == to || (from.is_numeric() && to.is_numeric())
}

/// Per-argument conversion cost: 0 exact, 1 safe widening, -1 otherwise.
pub fn conversion_cost(from: Type, to: Type) -> i32 {
    if from == to {
        return 0;
    }
    let widens = matches!(
        (from, to),
        (Type::I32, Type::I64)
            | (Type::I32, Type::F32)
            | (Type::I32, Type::F64)
            | (Type::I64, Type::F64)
            | (Type::F32, Type::F64)
    );
    if widens {
        1
    } else {
        -1
    }
}

/// Arithmetic promotion: the wider float dominates, else the wider int.
pub fn promote(a: Type, b: Type) -> Type {
    if a == Type::F64 || b == Type::F64 {
        Type::F64
    } else if a == Type::F32 || b == Type::F32 {
        if a == Type::I64 || b == Type::I64 {
            Type::F64
        } else {
            Type::F32
        }
    } else if a == Type::I64 || b == Type::I64 {
        Type::I64
    } else {
        Type::I32
    }
}

// ── Checker ──

#[derive(Clone, Copy, Debug)]
struct VarInfo {
    ty: Type,
    is_const: bool,
    is_owned: bool,
}

struct Env {
    scopes: Vec<HashMap<String, VarInfo>>,
}

impl Env {
    fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, info: VarInfo) {
        self.scopes
            .last_mut()
            .expect("env always has a scope")
            .insert(name.to_string(), info);
    }

    fn lookup(&self, name: &str) -> Option<VarInfo> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }
}

struct Checker<'d> {
    diag: &'d mut DiagnosticBag,
    su: bool,
    builtins: HashMap<&'static str, (Vec<Type>, Type)>,
    groups: HashMap<String, Vec<FnSig>>,
    by_symbol: HashMap<String, FnSig>,
    free_operators: Vec<(OperatorKind, FnSig)>,
}

struct FnCtx {
    ret: Type,
    throws: Vec<String>,
    loop_depth: u32,
    parallel_depth: u32,
}

impl<'d> Checker<'d> {
    fn new(diag: &'d mut DiagnosticBag, su: bool) -> Self {
        Self {
            diag,
            su,
            builtins: builtin_signatures(),
            groups: HashMap::new(),
            by_symbol: HashMap::new(),
            free_operators: Vec::new(),
        }
    }

    fn collect(&mut self, program: &Program) {
        for func in &program.functions {
            let sig = FnSig {
                symbol: func.symbol.clone(),
                params: func.param_types(),
                ret: func.ret,
                throws: func.throws.clone(),
            };
            self.by_symbol.insert(func.symbol.clone(), sig.clone());
            if let Some(op) = func.operator {
                if func.method_of.is_none() {
                    self.free_operators.push((op, sig.clone()));
                }
            }
            if func.method_of.is_none() && !func.cli_flag {
                self.groups
                    .entry(func.source_name.clone())
                    .or_default()
                    .push(sig);
            }
        }

        // Overload sets may not contain two identical parameter-type lists.
        for (name, sigs) in &self.groups {
            let mut seen: HashSet<Vec<Type>> = HashSet::new();
            for sig in sigs {
                if !seen.insert(sig.params.clone()) {
                    let span = Span::new(1, 1);
                    self.diag.emit(Diagnostic::error(
                        codes::LST0011,
                        span,
                        format!("Duplicate signature in overload group `{name}`."),
                    ));
                }
            }
        }
    }

    fn check_functions(&mut self, program: &mut Program) {
        for i in 0..program.functions.len() {
            if program.functions[i].is_extern {
                continue;
            }
            let mut body = std::mem::take(&mut program.functions[i].body);
            let mut ctx = FnCtx {
                ret: program.functions[i].ret,
                throws: program.functions[i].throws.clone(),
                loop_depth: 0,
                parallel_depth: 0,
            };
            let mut env = Env::new();
            for param in &program.functions[i].params {
                env.declare(
                    &param.name,
                    VarInfo {
                        ty: param.ty,
                        is_const: false,
                        is_owned: false,
                    },
                );
            }
            self.check_block(&mut body, &mut env, &mut ctx);
            program.functions[i].body = body;
        }
    }

    fn check_block(&mut self, body: &mut [Stmt], env: &mut Env, ctx: &mut FnCtx) {
        for stmt in body.iter_mut() {
            self.check_stmt(stmt, env, ctx);
        }
    }

    fn check_stmt(&mut self, stmt: &mut Stmt, env: &mut Env, ctx: &mut FnCtx) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Declare {
                name,
                declared,
                is_const,
                is_owned,
                init,
                resolved,
                free_fn,
            } => {
                let init_ty = match init {
                    Some(e) => {
                        self.check_expr(e, env, ctx);
                        Some(e.inf)
                    }
                    None => None,
                };

                let ty = match (*declared, init_ty) {
                    (Some(d), Some(i)) => {
                        if !assignable(i, d) {
                            self.error(
                                span,
                                codes::LST0013,
                                format!("Cannot initialize `{name}: {d}` from `{i}`."),
                            );
                        }
                        d
                    }
                    (Some(d), None) => {
                        if *is_const {
                            self.error(
                                span,
                                codes::LST0006,
                                format!("`const` variable `{name}` needs an initializer."),
                            );
                        }
                        d
                    }
                    (None, Some(i)) => i,
                    (None, None) => {
                        self.error(
                            span,
                            codes::LST0013,
                            format!("Cannot infer a type for `{name}`."),
                        );
                        Type::I64
                    }
                };
                *resolved = ty;

                if *is_owned {
                    let ctor = init.as_ref().and_then(|e| match &e.kind {
                        ExprKind::Call { name, .. } => Some(name.clone()),
                        _ => None,
                    });
                    match ctor.as_deref().and_then(owned_free_fn) {
                        Some(free) if ty == Type::I64 => {
                            if ctx.loop_depth > 0 {
                                self.error(
                                    span,
                                    codes::LST0006,
                                    format!(
                                        "`owned` variable `{name}` may not be declared inside a loop."
                                    ),
                                );
                            }
                            *free_fn = Some(free.to_string());
                        }
                        Some(_) => {
                            self.error(
                                span,
                                codes::LST0006,
                                format!("`owned` variable `{name}` must have type `i64`."),
                            );
                        }
                        None => {
                            self.error(
                                span,
                                codes::LST0006,
                                format!(
                                    "`owned` variable `{name}` must be initialized by a recognized constructor call."
                                ),
                            );
                        }
                    }
                }

                env.declare(
                    name,
                    VarInfo {
                        ty,
                        is_const: *is_const,
                        is_owned: *is_owned,
                    },
                );
            }
            StmtKind::Assign { name, value } => {
                self.check_expr(value, env, ctx);
                match env.lookup(name) {
                    Some(info) => {
                        if info.is_const {
                            self.error(
                                span,
                                codes::LST0006,
                                format!("Cannot assign to `const` variable `{name}`."),
                            );
                        }
                        if info.is_owned {
                            self.error(
                                span,
                                codes::LST0006,
                                format!("Cannot reassign `owned` variable `{name}`."),
                            );
                        }
                        if !assignable(value.inf, info.ty) {
                            self.error(
                                span,
                                codes::LST0013,
                                format!(
                                    "Cannot assign `{}` to `{name}: {}`.",
                                    value.inf, info.ty
                                ),
                            );
                        }
                    }
                    None => {
                        self.error(span, codes::LST0001, format!("Unknown name `{name}`."));
                    }
                }
            }
            StmtKind::Expr(e) => {
                self.check_expr(e, env, ctx);
            }
            StmtKind::Return(value) => {
                if let Some(e) = value {
                    self.check_expr(e, env, ctx);
                    if let ExprKind::Var(name) = &e.kind {
                        if env.lookup(name).is_some_and(|v| v.is_owned) {
                            self.error(
                                span,
                                codes::LST0006,
                                format!("Cannot return `owned` variable `{name}`."),
                            );
                        }
                    }
                    if ctx.ret == Type::Void {
                        self.error(span, codes::LST0013, "Void function returns a value.");
                    } else if !assignable(e.inf, ctx.ret) {
                        self.error(
                            span,
                            codes::LST0013,
                            format!("Return type `{}` does not match `{}`.", e.inf, ctx.ret),
                        );
                    }
                } else if ctx.ret != Type::Void {
                    self.error(
                        span,
                        codes::LST0013,
                        format!("Missing return value of type `{}`.", ctx.ret),
                    );
                }
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.check_expr(cond, env, ctx);
                if cond.inf != Type::Bool {
                    self.error(
                        cond.span,
                        codes::LST0013,
                        format!("Condition must be `bool`, found `{}`.", cond.inf),
                    );
                }
                env.push();
                self.check_block(then_body, env, ctx);
                env.pop();
                env.push();
                self.check_block(else_body, env, ctx);
                env.pop();
            }
            StmtKind::While { cond, body } => {
                self.check_expr(cond, env, ctx);
                if cond.inf != Type::Bool {
                    self.error(
                        cond.span,
                        codes::LST0013,
                        format!("Condition must be `bool`, found `{}`.", cond.inf),
                    );
                }
                ctx.loop_depth += 1;
                env.push();
                self.check_block(body, env, ctx);
                env.pop();
                ctx.loop_depth -= 1;
            }
            StmtKind::For {
                var,
                start,
                stop,
                step,
                parallel,
                body,
            } => {
                for bound in [&mut *start, &mut *stop] {
                    self.check_expr(bound, env, ctx);
                    if bound.inf != Type::I64 {
                        self.error(
                            bound.span,
                            codes::LST0007,
                            format!("For-range bounds must be `i64`, found `{}`.", bound.inf),
                        );
                    }
                }
                if let Some(step) = step {
                    self.check_expr(step, env, ctx);
                    if step.inf != Type::I64 {
                        self.error(
                            step.span,
                            codes::LST0007,
                            format!("For-range step must be `i64`, found `{}`.", step.inf),
                        );
                    }
                    if step.as_int() == Some(0) {
                        self.error(step.span, codes::LST0007, "For-range step may not be zero.");
                    }
                }

                if *parallel {
                    self.check_parallel_body(body, var, env, span);
                }

                ctx.loop_depth += 1;
                if *parallel {
                    ctx.parallel_depth += 1;
                }
                env.push();
                env.declare(
                    var,
                    VarInfo {
                        ty: Type::I64,
                        is_const: false,
                        is_owned: false,
                    },
                );
                self.check_block(body, env, ctx);
                env.pop();
                if *parallel {
                    ctx.parallel_depth -= 1;
                }
                ctx.loop_depth -= 1;
            }
            StmtKind::FormatBlock { end_arg, body } => {
                if let Some(e) = end_arg {
                    self.check_expr(e, env, ctx);
                    if !e.inf.is_printable() {
                        self.error(
                            e.span,
                            codes::LST0013,
                            "Format-block end argument must be printable.",
                        );
                    }
                }
                env.push();
                self.check_block(body, env, ctx);
                env.pop();
            }
            StmtKind::Break | StmtKind::Continue => {
                if ctx.loop_depth == 0 {
                    self.error(span, codes::LST0013, "Loop-control outside any loop.");
                }
                if ctx.parallel_depth > 0 {
                    self.error(
                        span,
                        codes::LST0008,
                        "Loop-control is not allowed inside a parallel for.",
                    );
                }
            }
        }
    }

    /// Parallel-for bodies may not write variables declared outside the body
    /// and may not contain `break`/`continue`. Both demote under superuser.
    fn check_parallel_body(&mut self, body: &[Stmt], loop_var: &str, env: &Env, span: Span) {
        let mut local: HashSet<String> = HashSet::new();
        local.insert(loop_var.to_string());
        fn walk(
            checker: &mut Checker<'_>,
            stmts: &[Stmt],
            local: &mut HashSet<String>,
            env: &Env,
        ) {
            for stmt in stmts {
                match &stmt.kind {
                    StmtKind::Declare { name, .. } => {
                        local.insert(name.clone());
                    }
                    StmtKind::Assign { name, .. } => {
                        if !local.contains(name) && env.lookup(name).is_some() {
                            checker.error(
                                stmt.span,
                                codes::LST0008,
                                format!(
                                    "Parallel-for body may not assign to outer variable `{name}`."
                                ),
                            );
                        }
                    }
                    StmtKind::Break | StmtKind::Continue => {
                        checker.error(
                            stmt.span,
                            codes::LST0008,
                            "Loop-control is not allowed inside a parallel for.",
                        );
                    }
                    StmtKind::If {
                        then_body,
                        else_body,
                        ..
                    } => {
                        walk(checker, then_body, local, env);
                        walk(checker, else_body, local, env);
                    }
                    StmtKind::While { body, .. }
                    | StmtKind::FormatBlock { body, .. } => walk(checker, body, local, env),
                    StmtKind::For { var, body, .. } => {
                        local.insert(var.clone());
                        walk(checker, body, local, env);
                    }
                    _ => {}
                }
            }
        }
        walk(self, body, &mut local, env);
        let _ = span;
    }

    // ── Expressions ──

    fn check_expr(&mut self, expr: &mut Expr, env: &mut Env, ctx: &mut FnCtx) {
        let span = expr.span;
        let inf = match &mut expr.kind {
            ExprKind::Int(_) => Type::I64,
            ExprKind::Float(_) => Type::F64,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Str(_) => Type::Str,
            ExprKind::Var(name) => match env.lookup(name) {
                Some(info) => info.ty,
                None => {
                    let name = name.clone();
                    self.error(span, codes::LST0001, format!("Unknown name `{name}`."));
                    Type::I64
                }
            },
            ExprKind::Unary {
                op,
                operand,
                override_fn,
            } => {
                self.check_expr(operand, env, ctx);
                if let Some(symbol) = override_fn.clone() {
                    // Member overrides see `(this, ...)`; the class handle is
                    // the i64 operand itself, so the full operand list lines
                    // up against the full parameter list either way.
                    self.override_result(&symbol, &[operand.inf], span)
                } else if let Some(sig) = self.resolve_free_unary(*op, operand.inf) {
                    *override_fn = Some(sig.symbol.clone());
                    sig.ret
                } else {
                    match op {
                        UnOp::Neg => {
                            if !operand.inf.is_numeric() {
                                self.error(
                                    span,
                                    codes::LST0013,
                                    format!("Cannot negate `{}`.", operand.inf),
                                );
                            }
                            operand.inf
                        }
                        UnOp::Not => {
                            if operand.inf != Type::Bool {
                                self.error(
                                    span,
                                    codes::LST0013,
                                    format!("`!` requires `bool`, found `{}`.", operand.inf),
                                );
                            }
                            Type::Bool
                        }
                    }
                }
            }
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                override_fn,
            } => {
                self.check_expr(lhs, env, ctx);
                self.check_expr(rhs, env, ctx);

                if matches!(op, BinOp::Div | BinOp::Mod) && rhs.as_int() == Some(0) {
                    self.error(
                        rhs.span,
                        codes::LST0009,
                        "Division or modulo by literal zero.",
                    );
                }

                if let Some(symbol) = override_fn.clone() {
                    self.override_result(&symbol, &[lhs.inf, rhs.inf], span)
                } else if let Some(sig) = self.resolve_free_binary(*op, lhs.inf, rhs.inf) {
                    *override_fn = Some(sig.symbol.clone());
                    sig.ret
                } else {
                    self.default_binary_type(*op, lhs.inf, rhs.inf, span)
                }
            }
            ExprKind::Call { name, args } => {
                let name_owned = name.clone();
                for arg in args.iter_mut() {
                    self.check_expr(arg, env, ctx);
                }
                return self.check_call(expr, &name_owned, env, ctx);
            }
        };
        expr.inf = inf;
        expr.typed = true;
    }

    /// Attached overload: validate the full operand list against the symbol
    /// signature and yield its return type.
    fn override_result(&mut self, symbol: &str, arg_tys: &[Type], span: Span) -> Type {
        let Some(sig) = self.by_symbol.get(symbol).cloned() else {
            self.error(
                span,
                codes::LST0010,
                format!("Operator override `{symbol}` is not defined."),
            );
            return Type::I64;
        };
        if sig.params.len() != arg_tys.len()
            || sig
                .params
                .iter()
                .zip(arg_tys)
                .any(|(p, a)| conversion_cost(*a, *p) < 0)
        {
            self.error(
                span,
                codes::LST0010,
                format!("Operator override `{symbol}` does not accept these operand types."),
            );
        }
        sig.ret
    }

    fn resolve_free_binary(&self, op: BinOp, lhs: Type, rhs: Type) -> Option<FnSig> {
        self.resolve_operator(OperatorKind::Binary(op), &[lhs, rhs])
    }

    fn resolve_free_unary(&self, op: UnOp, operand: Type) -> Option<FnSig> {
        self.resolve_operator(OperatorKind::Unary(op), &[operand])
    }

    fn resolve_operator(&self, kind: OperatorKind, arg_tys: &[Type]) -> Option<FnSig> {
        let mut best: Option<(i32, &FnSig)> = None;
        for (op, sig) in &self.free_operators {
            if *op != kind || sig.params.len() != arg_tys.len() {
                continue;
            }
            let mut total = 0;
            let mut ok = true;
            for (param, arg) in sig.params.iter().zip(arg_tys) {
                let cost = conversion_cost(*arg, *param);
                if cost < 0 {
                    ok = false;
                    break;
                }
                total += cost;
            }
            if !ok {
                continue;
            }
            match best {
                Some((cost, _)) if cost <= total => {}
                _ => best = Some((total, sig)),
            }
        }
        best.map(|(_, sig)| sig.clone())
    }

    fn default_binary_type(&mut self, op: BinOp, lhs: Type, rhs: Type, span: Span) -> Type {
        match op {
            BinOp::And | BinOp::Or => {
                if lhs != Type::Bool || rhs != Type::Bool {
                    self.error(
                        span,
                        codes::LST0013,
                        format!("`{}` requires `bool` operands.", op.symbol()),
                    );
                }
                Type::Bool
            }
            BinOp::Eq | BinOp::Ne => {
                let comparable = (lhs.is_numeric() && rhs.is_numeric())
                    || (lhs == rhs && lhs != Type::Void);
                if !comparable {
                    self.error(
                        span,
                        codes::LST0013,
                        format!("Cannot compare `{lhs}` with `{rhs}`."),
                    );
                }
                Type::Bool
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !(lhs.is_numeric() && rhs.is_numeric()) {
                    self.error(
                        span,
                        codes::LST0013,
                        format!("Cannot order `{lhs}` against `{rhs}`."),
                    );
                }
                Type::Bool
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                if !(lhs.is_numeric() && rhs.is_numeric()) {
                    self.error(
                        span,
                        codes::LST0013,
                        format!(
                            "Operator `{}` requires numeric operands, found `{lhs}` and `{rhs}`.",
                            op.symbol()
                        ),
                    );
                    return Type::I64;
                }
                promote(lhs, rhs)
            }
        }
    }

    // ── Calls ──

    fn check_call(&mut self, expr: &mut Expr, name: &str, env: &mut Env, ctx: &mut FnCtx) {
        let span = expr.span;
        let ExprKind::Call { args, .. } = &expr.kind else {
            unreachable!("check_call on non-call");
        };
        let arg_tys: Vec<Type> = args.iter().map(|a| a.inf).collect();

        if name.starts_with("mem_") {
            self.diag.emit(Diagnostic {
                code: codes::LST0012.to_string(),
                severity: Severity::Advice,
                span: Some(span),
                message: format!(
                    "`{name}` is raw memory access; prefer a typed wrapper."
                ),
            });
        }

        if let Some(ret) = self.check_special_call(expr, name, &arg_tys, env, ctx) {
            expr.inf = ret;
            expr.typed = true;
            return;
        }

        // User overload groups by source name. This must run before the
        // direct-symbol path: the first overload's symbol IS the source
        // name, and a bare-symbol hit would skip resolution entirely.
        if let Some(sigs) = self.groups.get(name).cloned() {
            if let Some(sig) = self.resolve_overload(&sigs, &arg_tys, name, span) {
                self.check_throws(&sig, ctx, span);
                if let ExprKind::Call { name, .. } = &mut expr.kind {
                    *name = sig.symbol.clone();
                }
                expr.inf = sig.ret;
            }
            expr.typed = true;
            return;
        }

        // Direct symbol (methods, constructors, mangled overloads).
        if let Some(sig) = self.by_symbol.get(name).cloned() {
            self.check_args_against(&sig, &arg_tys, name, span);
            self.check_throws(&sig, ctx, span);
            expr.inf = sig.ret;
            expr.typed = true;
            return;
        }

        // Built-ins.
        if let Some((params, ret)) = self.builtins.get(name).cloned() {
            let sig = FnSig {
                symbol: name.to_string(),
                params,
                ret,
                throws: Vec::new(),
            };
            self.check_args_against(&sig, &arg_tys, name, span);
            expr.inf = ret;
            expr.typed = true;
            return;
        }

        self.error(span, codes::LST0001, format!("Unknown function `{name}`."));
        expr.inf = Type::I64;
        expr.typed = true;
    }

    /// Polymorphic built-ins that a fixed signature cannot express.
    fn check_special_call(
        &mut self,
        expr: &mut Expr,
        name: &str,
        arg_tys: &[Type],
        _env: &mut Env,
        _ctx: &mut FnCtx,
    ) -> Option<Type> {
        let span = expr.span;
        match name {
            "print" | "println" => {
                if arg_tys.len() != 1 || !arg_tys[0].is_printable() {
                    self.error(
                        span,
                        codes::LST0003,
                        format!("`{name}` takes one printable argument."),
                    );
                }
                Some(Type::Void)
            }
            "formatOutput" | "FormatOutput" => {
                if arg_tys.len() != 1 || !arg_tys[0].is_printable() {
                    self.error(
                        span,
                        codes::LST0003,
                        format!("`{name}` takes one printable argument."),
                    );
                }
                Some(Type::Str)
            }
            "max" | "min" => {
                if arg_tys.len() != 2 || !arg_tys.iter().all(|t| t.is_numeric()) {
                    self.error(
                        span,
                        codes::LST0003,
                        format!("`{name}` takes two numeric arguments."),
                    );
                    return Some(Type::I64);
                }
                Some(promote(arg_tys[0], arg_tys[1]))
            }
            "abs" => {
                if arg_tys.len() != 1 || !arg_tys[0].is_numeric() {
                    self.error(span, codes::LST0003, "`abs` takes one numeric argument.");
                    return Some(Type::I64);
                }
                Some(arg_tys[0])
            }
            "clamp" => {
                if arg_tys.len() != 3 || !arg_tys.iter().all(|t| t.is_numeric()) {
                    self.error(span, codes::LST0003, "`clamp` takes three numeric arguments.");
                    return Some(Type::I64);
                }
                Some(promote(promote(arg_tys[0], arg_tys[1]), arg_tys[2]))
            }
            "input" | "input_i64" | "input_f64" => {
                let prompt_ok = arg_tys.is_empty() || arg_tys == [Type::Str];
                if !prompt_ok {
                    self.error(
                        span,
                        codes::LST0003,
                        format!("`{name}` takes no argument or one `str` prompt."),
                    );
                }
                Some(match name {
                    "input_i64" => Type::I64,
                    "input_f64" => Type::F64,
                    _ => Type::Str,
                })
            }
            "spawn" => {
                let ExprKind::Call { args, .. } = &mut expr.kind else {
                    unreachable!();
                };
                if args.len() != 1 {
                    self.error(span, codes::LST0003, "`spawn` takes one call argument.");
                    return Some(Type::I64);
                }
                let task = &mut args[0];
                let ExprKind::Call {
                    name: target,
                    args: task_args,
                } = &mut task.kind
                else {
                    self.error(
                        task.span,
                        codes::LST0003,
                        "`spawn` argument must be a zero-argument call.",
                    );
                    return Some(Type::I64);
                };
                if !task_args.is_empty() {
                    self.error(
                        task.span,
                        codes::LST0003,
                        "`spawn` target must take zero arguments.",
                    );
                    return Some(Type::I64);
                }
                let resolved = self
                    .groups
                    .get(target.as_str())
                    .and_then(|sigs| sigs.iter().find(|s| s.params.is_empty()).cloned())
                    .or_else(|| self.by_symbol.get(target.as_str()).cloned());
                match resolved {
                    Some(sig) if sig.ret == Type::Void => {
                        *target = sig.symbol;
                    }
                    Some(_) => {
                        self.error(
                            task.span,
                            codes::LST0003,
                            "`spawn` target must return `void`.",
                        );
                    }
                    None => {
                        let target = target.clone();
                        self.error(
                            task.span,
                            codes::LST0001,
                            format!("Unknown function `{target}`."),
                        );
                    }
                }
                Some(Type::I64)
            }
            _ => None,
        }
    }

    fn resolve_overload(
        &mut self,
        sigs: &[FnSig],
        arg_tys: &[Type],
        name: &str,
        span: Span,
    ) -> Option<FnSig> {
        let mut candidates: Vec<(i32, &FnSig)> = Vec::new();
        for sig in sigs {
            if sig.params.len() != arg_tys.len() {
                continue;
            }
            let mut total = 0;
            let mut ok = true;
            for (param, arg) in sig.params.iter().zip(arg_tys) {
                let cost = conversion_cost(*arg, *param);
                if cost < 0 {
                    ok = false;
                    break;
                }
                total += cost;
            }
            if ok {
                candidates.push((total, sig));
            }
        }

        if candidates.is_empty() {
            if sigs.iter().all(|s| s.params.len() != arg_tys.len()) {
                self.error(
                    span,
                    codes::LST0002,
                    format!("No overload of `{name}` takes {} argument(s).", arg_tys.len()),
                );
            } else {
                self.error(
                    span,
                    codes::LST0003,
                    format!("No overload of `{name}` accepts these argument types."),
                );
            }
            return None;
        }

        let min = candidates.iter().map(|(c, _)| *c).min().expect("non-empty");
        let best: Vec<&FnSig> = candidates
            .iter()
            .filter(|(c, _)| *c == min)
            .map(|(_, s)| *s)
            .collect();
        if best.len() > 1 {
            // Hard error normally; superuser demotes and takes the first.
            self.error(
                span,
                codes::LST0004,
                format!("Ambiguous overload for `{name}`."),
            );
            if !self.su {
                return None;
            }
        }
        Some(best[0].clone())
    }

    fn check_args_against(&mut self, sig: &FnSig, arg_tys: &[Type], name: &str, span: Span) {
        if sig.params.len() != arg_tys.len() {
            self.error(
                span,
                codes::LST0002,
                format!(
                    "`{name}` takes {} argument(s), got {}.",
                    sig.params.len(),
                    arg_tys.len()
                ),
            );
            return;
        }
        for (i, (param, arg)) in sig.params.iter().zip(arg_tys).enumerate() {
            if !assignable(*arg, *param) {
                self.error(
                    span,
                    codes::LST0003,
                    format!(
                        "Argument {} of `{name}`: cannot convert `{arg}` to `{param}`.",
                        i + 1
                    ),
                );
            }
        }
    }

    fn check_throws(&mut self, sig: &FnSig, ctx: &FnCtx, span: Span) {
        for kind in &sig.throws {
            if !ctx.throws.contains(kind) {
                self.error(
                    span,
                    codes::LST0005,
                    format!(
                        "Call throws `{kind}`, which the enclosing function does not declare."
                    ),
                );
            }
        }
    }

    fn error(&mut self, span: Span, code: &str, message: impl Into<String>) {
        self.diag.emit(Diagnostic::error(code, span, message));
    }
}

// ── Built-in signatures ──

fn builtin_signatures() -> HashMap<&'static str, (Vec<Type>, Type)> {
    use Type::*;
    let mut map: HashMap<&'static str, (Vec<Type>, Type)> = HashMap::new();
    let mut b = |name: &'static str, params: Vec<Type>, ret: Type| {
        map.insert(name, (params, ret));
    };

    // Typed prints (generic print/println are special-cased).
    b("print_str", vec![Str], Void);
    b("println_str", vec![Str], Void);
    b("print_i64", vec![I64], Void);
    b("println_i64", vec![I64], Void);
    b("print_i32", vec![I32], Void);
    b("println_i32", vec![I32], Void);
    b("print_f64", vec![F64], Void);
    b("println_f64", vec![F64], Void);
    b("print_f32", vec![F32], Void);
    b("println_f32", vec![F32], Void);
    b("print_bool", vec![Bool], Void);
    b("println_bool", vec![Bool], Void);

    // Strings.
    b("str_len", vec![Str], I64);
    b("str_substring", vec![Str, I64, I64], Str);
    b("str_trim", vec![Str], Str);
    b("str_replace", vec![Str, Str, Str], Str);
    b("str_concat", vec![Str, Str], Str);
    b("str_upper", vec![Str], Str);
    b("str_lower", vec![Str], Str);
    b("str_contains", vec![Str, Str], Bool);
    b("str_index_of", vec![Str, Str], I64);
    b("str_char_at", vec![Str, I64], Str);
    b("str_starts_with", vec![Str, Str], Bool);
    b("str_ends_with", vec![Str, Str], Bool);
    b("str_repeat", vec![Str, I64], Str);
    b("str_eq", vec![Str, Str], Bool);
    b("str_neq", vec![Str, Str], Bool);

    // Raw memory.
    b("mem_alloc", vec![I64], I64);
    b("mem_free", vec![I64], Void);
    b("mem_read_i64", vec![I64, I64], I64);
    b("mem_write_i64", vec![I64, I64, I64], Void);
    b("mem_read_i32", vec![I64, I64], I32);
    b("mem_write_i32", vec![I64, I64, I32], Void);
    b("mem_read_f64", vec![I64, I64], F64);
    b("mem_write_f64", vec![I64, I64, F64], Void);
    b("mem_copy", vec![I64, I64, I64], Void);
    b("mem_set", vec![I64, I64, I64], Void);

    // Arrays.
    b("array_new", vec![], I64);
    b("array_len", vec![I64], I64);
    b("array_get", vec![I64, I64], I64);
    b("array_set", vec![I64, I64, I64], Void);
    b("array_push", vec![I64, I64], Void);
    b("array_pop", vec![I64], I64);
    b("array_has", vec![I64, I64], Bool);
    b("array_remove", vec![I64, I64], Void);
    b("array_free", vec![I64], Void);

    // Dicts (str -> str).
    b("dict_new", vec![], I64);
    b("dict_len", vec![I64], I64);
    b("dict_get", vec![I64, Str], Str);
    b("dict_set", vec![I64, Str, Str], Void);
    b("dict_has", vec![I64, Str], Bool);
    b("dict_remove", vec![I64, Str], Void);
    b("dict_free", vec![I64], Void);

    // Maps (i64 -> i64).
    b("map_new", vec![], I64);
    b("map_len", vec![I64], I64);
    b("map_get", vec![I64, I64], I64);
    b("map_set", vec![I64, I64, I64], Void);
    b("map_has", vec![I64, I64], Bool);
    b("map_remove", vec![I64, I64], Void);
    b("map_free", vec![I64], Void);

    // Objects (string-keyed stores backing classes).
    b("object_new", vec![], I64);
    b("object_len", vec![I64], I64);
    b("object_get", vec![I64, Str], Str);
    b("object_set", vec![I64, Str, Str], Void);
    b("object_has", vec![I64, Str], Bool);
    b("object_remove", vec![I64, Str], Void);
    b("object_free", vec![I64], Void);

    // Option / result.
    b("option_some", vec![I64], I64);
    b("option_none", vec![], I64);
    b("option_is_some", vec![I64], Bool);
    b("option_get", vec![I64], I64);
    b("option_free", vec![I64], Void);
    b("result_ok", vec![I64], I64);
    b("result_err", vec![Str], I64);
    b("result_is_ok", vec![I64], Bool);
    b("result_get", vec![I64], I64);
    b("result_err_msg", vec![I64], Str);
    b("result_free", vec![I64], Void);

    // Graphics and game loop.
    b("gfx_new", vec![I64, I64], I64);
    b("gfx_free", vec![I64], Void);
    b("gfx_clear", vec![I64, I64], Void);
    b("gfx_pixel", vec![I64, I64, I64, I64], Void);
    b("gfx_line", vec![I64, I64, I64, I64, I64, I64], Void);
    b("gfx_rect", vec![I64, I64, I64, I64, I64, I64], Void);
    b("gfx_present", vec![I64], Void);
    b("pg_surface_new", vec![I64, I64], I64);
    b("pg_surface_fill", vec![I64, I64], Void);
    b("pg_init", vec![I64, I64], I64);
    b("game_new", vec![Str, I64, I64], I64);
    b("game_free", vec![I64], Void);
    b("game_running", vec![I64], Bool);
    b("game_poll", vec![I64], Void);
    b("game_draw_rect", vec![I64, I64, I64, I64, I64, I64], Void);
    b("game_present", vec![I64], Void);
    b("key_down", vec![I64], Bool);
    b("key_down_char", vec![Str], Bool);

    // Physics.
    b("phys_new", vec![], I64);
    b("phys_free", vec![I64], Void);
    b("phys_add_body", vec![I64, F64, F64, F64], I64);
    b("phys_step", vec![I64, F64], Void);
    b("phys_body_x", vec![I64, I64], F64);
    b("phys_body_y", vec![I64, I64], F64);
    b("phys_set_gravity", vec![I64, F64, F64], Void);
    b("camera_set", vec![F64, F64], Void);
    b("camera_x", vec![], F64);
    b("camera_y", vec![], F64);

    // Numerical vectors.
    b("np_new", vec![I64], I64);
    b("np_free", vec![I64], Void);
    b("np_copy", vec![I64], I64);
    b("np_from_range", vec![I64, I64], I64);
    b("np_linspace", vec![F64, F64, I64], I64);
    b("np_len", vec![I64], I64);
    b("np_get", vec![I64, I64], F64);
    b("np_set", vec![I64, I64, F64], Void);
    b("np_add", vec![I64, I64], I64);
    b("np_mul", vec![I64, I64], I64);
    b("np_scale", vec![I64, F64], I64);
    b("np_dot", vec![I64, I64], F64);
    b("np_sum", vec![I64], F64);
    b("np_mean", vec![I64], F64);
    b("np_min", vec![I64], F64);
    b("np_max", vec![I64], F64);

    // HTTP.
    b("http_server_listen", vec![I64], I64);
    b("http_server_close", vec![I64], Void);
    b("http_server_accept", vec![I64], I64);
    b("http_request_path", vec![I64], Str);
    b("http_respond", vec![I64, I64, Str], Void);
    b("http_client_connect", vec![Str, I64], I64);
    b("http_client_close", vec![I64], Void);
    b("http_get", vec![Str], Str);
    b("http_post", vec![Str, Str], Str);

    // Parsing and conversion.
    b("parse_i64", vec![Str], I64);
    b("parse_f64", vec![Str], F64);
    b("to_i32", vec![I64], I32);
    b("to_i64", vec![I32], I64);
    b("to_f32", vec![F64], F32);
    b("to_f64", vec![F32], F64);
    b("i64_to_bool", vec![I64], Bool);
    b("bool_to_i64", vec![Bool], I64);
    b("i64_to_f64", vec![I64], F64);
    b("f64_to_i64", vec![F64], I64);
    b("i64_to_str", vec![I64], Str);
    b("f64_to_str", vec![F64], Str);

    // Math.
    b("sqrt", vec![F64], F64);
    b("pow", vec![F64, F64], F64);
    b("sin", vec![F64], F64);
    b("cos", vec![F64], F64);
    b("tan", vec![F64], F64);
    b("atan2", vec![F64, F64], F64);
    b("floor", vec![F64], F64);
    b("ceil", vec![F64], F64);
    b("round", vec![F64], F64);
    b("exp", vec![F64], F64);
    b("log", vec![F64], F64);
    b("random", vec![], F64);
    b("rand_range", vec![I64, I64], I64);

    // CLI token table.
    b("cli_token_count", vec![], I64);
    b("cli_token", vec![I64], Str);
    b("cli_has", vec![Str], Bool);
    b("cli_value", vec![Str], Str);

    // Concurrency and clocks (spawn is special-cased).
    b("await", vec![I64], Void);
    b("await_all", vec![], Void);
    b("clock_ms", vec![], I64);
    b("clock_us", vec![], I64);
    b("sleep_ms", vec![I64], Void);

    // Mode markers.
    b(".format", vec![], Void);
    b(".stateSpeed", vec![I64], Void);
    b(".freeConsole", vec![], Void);
    b("stateSpeed", vec![I64], Void);
    b("superuser", vec![], Void);

    // Privileged namespace.
    b("su.trace.on", vec![], Void);
    b("su.trace.off", vec![], Void);
    b("su.limit.set", vec![I64], Void);
    b("su.limit.clear", vec![], Void);
    b("su.step.limit", vec![I64], Void);
    b("su.ir.dump", vec![], Void);
    b("su.mem.report", vec![], Void);

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescript_lex::lex;
    use linescript_parse::parse_program;

    fn check_source(source: &str, su: bool) -> (Result<bool, ()>, DiagnosticBag, Program) {
        let mut diag = DiagnosticBag::new(64);
        let tokens = lex(source, &mut diag);
        assert!(!diag.has_errors(), "lex: {:?}", diag.diagnostics);
        let mut program = parse_program(&tokens, &mut diag).expect("parse should succeed");
        let result = check(&mut program, su, &mut diag);
        (result, diag, program)
    }

    fn check_ok(source: &str) -> Program {
        let (result, diag, program) = check_source(source, false);
        assert!(
            result.is_ok(),
            "check failed: {:?}",
            diag.diagnostics
                .iter()
                .map(|d| d.render())
                .collect::<Vec<_>>()
        );
        program
    }

    fn check_fails_with(source: &str, code: &str) {
        let (result, diag, _) = check_source(source, false);
        assert!(result.is_err(), "expected a type error");
        assert!(
            diag.diagnostics.iter().any(|d| d.code == code),
            "expected {code}; got {:?}",
            diag.diagnostics
                .iter()
                .map(|d| d.code.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn all_expressions_typed_after_check() {
        let program = check_ok("declare s: i64 = 0\ns = s + 2 * 3\nprintln(s)\n");
        fn assert_typed(expr: &Expr) {
            assert!(expr.typed, "untyped expression: {:?}", expr.kind);
            match &expr.kind {
                ExprKind::Unary { operand, .. } => assert_typed(operand),
                ExprKind::Binary { lhs, rhs, .. } => {
                    assert_typed(lhs);
                    assert_typed(rhs);
                }
                ExprKind::Call { args, .. } => args.iter().for_each(assert_typed),
                _ => {}
            }
        }
        for func in &program.functions {
            for stmt in &func.body {
                if let StmtKind::Assign { value, .. } = &stmt.kind {
                    assert_typed(value);
                }
            }
        }
    }

    #[test]
    fn overload_resolution_rewrites_to_mangled_symbol() {
        let program = check_ok(
            "fn pick(v: i64) -> i64 { return v }\nfn pick(v: f64) -> f64 { return v }\ndeclare r = pick(1.5)\n",
        );
        let main = program
            .function(linescript_parse::SCRIPT_MAIN)
            .expect("script main");
        let StmtKind::Declare { init: Some(e), resolved, .. } = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Call { name, .. } = &e.kind else {
            panic!();
        };
        assert_eq!(name, "__ls_ovl_pick_2");
        assert_eq!(*resolved, Type::F64);
    }

    #[test]
    fn exact_match_beats_widening() {
        let program = check_ok(
            "fn pick(v: i64) -> i64 { return v }\nfn pick(v: f64) -> f64 { return v }\ndeclare r = pick(3)\n",
        );
        let main = program
            .function(linescript_parse::SCRIPT_MAIN)
            .expect("script main");
        let StmtKind::Declare { init: Some(e), .. } = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Call { name, .. } = &e.kind else {
            panic!();
        };
        assert_eq!(name, "pick");
    }

    #[test]
    fn ambiguous_overload_errors_without_superuser() {
        check_fails_with(
            "fn f(a: i64, b: f64) -> i64 { return a }\nfn f(a: f64, b: i64) -> i64 { return b }\ndeclare r = f(1, 2)\n",
            codes::LST0004,
        );
    }

    #[test]
    fn ambiguous_overload_warns_under_superuser() {
        let (result, diag, _) = check_source(
            "superuser()\nfn f(a: i64, b: f64) -> i64 { return a }\nfn f(a: f64, b: i64) -> i64 { return b }\ndeclare r = f(1, 2)\n",
            false,
        );
        assert!(result.is_ok(), "superuser should demote the ambiguity");
        assert!(diag
            .warnings()
            .any(|d| d.code == codes::LST0004));
    }

    #[test]
    fn throws_contract_is_enforced() {
        check_fails_with(
            "fn risky() throws IoError { return }\nfn safe() { risky() }\n",
            codes::LST0005,
        );
        check_ok("fn risky() throws IoError { return }\nfn outer() throws IoError { risky() }\n");
    }

    #[test]
    fn owned_declare_resolves_free_fn() {
        let program = check_ok("declare owned a = array_new()\n");
        let main = program
            .function(linescript_parse::SCRIPT_MAIN)
            .expect("script main");
        let StmtKind::Declare { free_fn, .. } = &main.body[0].kind else {
            panic!();
        };
        assert_eq!(free_fn.as_deref(), Some("array_free"));
    }

    #[test]
    fn owned_class_instance_frees_via_object_free() {
        let program = check_ok("class P { declare x: i64 = 0 }\ndeclare owned p = P()\n");
        let main = program
            .function(linescript_parse::SCRIPT_MAIN)
            .expect("script main");
        let StmtKind::Declare { free_fn, .. } = &main.body[0].kind else {
            panic!();
        };
        assert_eq!(free_fn.as_deref(), Some("object_free"));
    }

    #[test]
    fn owned_rules_reject_loops_reassignment_and_returns() {
        check_fails_with(
            "for i in 0..3 do\n  declare owned a = array_new()\nend\n",
            codes::LST0006,
        );
        check_fails_with(
            "declare owned a = array_new()\na = 5\n",
            codes::LST0006,
        );
        check_fails_with(
            "fn leak() -> i64 {\n  declare owned a = array_new()\n  return a\n}\n",
            codes::LST0006,
        );
        check_fails_with("declare owned x = clock_ms()\n", codes::LST0006);
    }

    #[test]
    fn for_range_rules() {
        check_fails_with("for i in 0..5 step 0 do\nend\n", codes::LST0007);
        check_fails_with("for i in 0.5..5 do\nend\n", codes::LST0007);
        check_ok("for i in 0..5 do\n  println(i)\nend\n");
    }

    #[test]
    fn parallel_for_body_restrictions() {
        check_fails_with(
            "declare s: i64 = 0\nparallel for i in 0..10 do\n  s = s + i\nend\n",
            codes::LST0008,
        );
        check_fails_with(
            "parallel for i in 0..10 do\n  break\nend\n",
            codes::LST0008,
        );
        check_ok("parallel for i in 0..10 do\n  declare t = i * 2\n  println(t)\nend\n");
    }

    #[test]
    fn division_by_literal_zero_is_an_error() {
        check_fails_with("declare x = 10 / 0\n", codes::LST0009);
        check_fails_with("declare x = 10 % 0\n", codes::LST0009);
    }

    #[test]
    fn spawn_rewrites_target_and_enforces_shape() {
        let program = check_ok("fn work() { println(1) }\ndeclare t = spawn(work())\nawait(t)\n");
        let main = program
            .function(linescript_parse::SCRIPT_MAIN)
            .expect("script main");
        let StmtKind::Declare { init: Some(e), .. } = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Call { name, args } = &e.kind else {
            panic!();
        };
        assert_eq!(name, "spawn");
        let ExprKind::Call { name: target, .. } = &args[0].kind else {
            panic!();
        };
        assert_eq!(target, "work");

        check_fails_with(
            "fn value() -> i64 { return 1 }\ndeclare t = spawn(value())\n",
            codes::LST0003,
        );
    }

    #[test]
    fn mem_use_emits_advisory_but_compiles() {
        let (result, diag, _) = check_source("declare m = mem_alloc(64)\nmem_free(m)\n", false);
        assert!(result.is_ok());
        assert!(diag
            .diagnostics
            .iter()
            .any(|d| d.code == codes::LST0012 && d.severity == Severity::Advice));
    }

    #[test]
    fn narrowing_assignment_is_silently_accepted() {
        // Assignability allows numeric narrowing even though overload
        // resolution would never choose it; inherited asymmetry.
        let (result, diag, _) =
            check_source("declare small: i32 = 1\ndeclare big: i64 = 9\nsmall = big\n", false);
        assert!(result.is_ok());
        assert!(diag.diagnostics.is_empty());
    }

    #[test]
    fn recheck_after_check_is_idempotent() {
        let source = "fn area(r: i64) -> i64 { return r * r }\nprintln(area(4))\n";
        let mut diag = DiagnosticBag::new(64);
        let tokens = lex(source, &mut diag);
        let mut program = parse_program(&tokens, &mut diag).expect("parse");
        check(&mut program, false, &mut diag).expect("first check");
        let first_len = diag.diagnostics.len();
        check(&mut program, false, &mut diag).expect("re-check");
        assert_eq!(diag.diagnostics.len(), first_len, "re-check added diagnostics");
    }

    #[test]
    fn promote_follows_width_rules() {
        assert_eq!(promote(Type::I32, Type::I64), Type::I64);
        assert_eq!(promote(Type::I64, Type::F64), Type::F64);
        assert_eq!(promote(Type::F32, Type::F32), Type::F32);
        assert_eq!(promote(Type::I64, Type::F32), Type::F64);
        assert_eq!(promote(Type::I32, Type::I32), Type::I32);
    }

    #[test]
    fn conversion_costs_match_safe_widening_table() {
        assert_eq!(conversion_cost(Type::I32, Type::I64), 1);
        assert_eq!(conversion_cost(Type::I32, Type::F64), 1);
        assert_eq!(conversion_cost(Type::I64, Type::F64), 1);
        assert_eq!(conversion_cost(Type::F32, Type::F64), 1);
        assert_eq!(conversion_cost(Type::I64, Type::I32), -1);
        assert_eq!(conversion_cost(Type::F64, Type::I64), -1);
        assert_eq!(conversion_cost(Type::Str, Type::Str), 0);
    }

    #[test]
    fn free_operator_overload_applies_to_matching_types() {
        let program = check_ok(
            "operator +(a: str, b: str) -> str { return str_concat(a, b) }\ndeclare s = \"a\" + \"b\"\nprintln(s)\n",
        );
        let main = program
            .function(linescript_parse::SCRIPT_MAIN)
            .expect("script main");
        let StmtKind::Declare { init: Some(e), resolved, .. } = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Binary { override_fn, .. } = &e.kind else {
            panic!();
        };
        assert_eq!(override_fn.as_deref(), Some("__ls_op_add"));
        assert_eq!(*resolved, Type::Str);
    }
}
