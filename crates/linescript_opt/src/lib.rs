//! LineScript optimizer: constant folding, inlining of pure single-return
//! functions, dead-store elimination, local i64 constant propagation, loop
//! closed-form strength reduction over 128-bit algebra, and tail pruning.
//!
//! Every pass is a local fixed point; `optimize` repeats the pass sequence
//! up to `passes` times or until nothing changes. All closed-form bounds are
//! computed in `i128` with checked ops; any overflow abandons the transform
//! and keeps the original loop.

use linescript_ast::{BinOp, Expr, ExprKind, Program, Span, Stmt, StmtKind, Type, UnOp};
use std::collections::HashMap;

pub const DEFAULT_PASSES: u32 = 12;
pub const MAX_SPEED_PASSES: u32 = 32;

/// Trip counts at or below this fully unroll.
const UNROLL_LIMIT: i128 = 8;
/// Inlining candidates may have at most this many parameters.
const INLINE_PARAM_LIMIT: usize = 8;

pub fn optimize(program: &mut Program, passes: u32) {
    // A user-defined unary negation changes `-x` semantics; every rewrite
    // that would fold or re-associate a negation is disabled.
    let neg_ok = !program.has_unary_neg_override;

    for _ in 0..passes.max(1) {
        let mut changed = false;

        let inline_map = collect_inline_candidates(program);
        for func in &mut program.functions {
            if func.is_extern {
                continue;
            }
            changed |= inline_calls_block(&mut func.body, &func.symbol, &inline_map);
            changed |= fold_block(&mut func.body, neg_ok);
            changed |= propagate_consts(&mut func.body);
            changed |= reduce_loops_block(&mut func.body, neg_ok);
            changed |= eliminate_dead_stores(&mut func.body);
            changed |= prune_tail_dead(&mut func.body);
        }

        if !changed {
            break;
        }
    }
}

// ── Inlining ──

#[derive(Clone)]
struct InlineBody {
    params: Vec<String>,
    expr: Expr,
}

/// A function qualifies when it is non-extern, has at most eight parameters,
/// and its whole body is one `return <expr>` that never calls itself.
fn collect_inline_candidates(program: &Program) -> HashMap<String, InlineBody> {
    let mut map = HashMap::new();
    for func in &program.functions {
        if func.is_extern || func.cli_flag || func.params.len() > INLINE_PARAM_LIMIT {
            continue;
        }
        let [stmt] = func.body.as_slice() else {
            continue;
        };
        let StmtKind::Return(Some(expr)) = &stmt.kind else {
            continue;
        };
        if calls_symbol(expr, &func.symbol) {
            continue;
        }
        map.insert(
            func.symbol.clone(),
            InlineBody {
                params: func.params.iter().map(|p| p.name.clone()).collect(),
                expr: expr.clone(),
            },
        );
    }
    map
}

fn calls_symbol(expr: &Expr, symbol: &str) -> bool {
    match &expr.kind {
        ExprKind::Call { name, args } => name == symbol || args.iter().any(|a| calls_symbol(a, symbol)),
        ExprKind::Unary { operand, .. } => calls_symbol(operand, symbol),
        ExprKind::Binary { lhs, rhs, .. } => calls_symbol(lhs, symbol) || calls_symbol(rhs, symbol),
        _ => false,
    }
}

fn inline_calls_block(
    body: &mut [Stmt],
    self_symbol: &str,
    map: &HashMap<String, InlineBody>,
) -> bool {
    let mut changed = false;
    for stmt in body.iter_mut() {
        changed |= for_each_expr(stmt, &mut |expr| inline_expr(expr, self_symbol, map));
    }
    changed
}

fn inline_expr(expr: &mut Expr, self_symbol: &str, map: &HashMap<String, InlineBody>) -> bool {
    let mut changed = false;
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } => {
            changed |= inline_expr(operand, self_symbol, map);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            changed |= inline_expr(lhs, self_symbol, map);
            changed |= inline_expr(rhs, self_symbol, map);
        }
        ExprKind::Call { name, args } => {
            for arg in args.iter_mut() {
                changed |= inline_expr(arg, self_symbol, map);
            }
            if name != self_symbol {
                if let Some(body) = map.get(name.as_str()) {
                    if body.params.len() == args.len() {
                        let mut subst = HashMap::new();
                        for (param, arg) in body.params.iter().zip(args.iter()) {
                            subst.insert(param.clone(), arg.clone());
                        }
                        *expr = body.expr.substitute(&subst);
                        return true;
                    }
                }
            }
        }
        _ => {}
    }
    changed
}

// ── Constant folding ──

fn fold_block(body: &mut [Stmt], neg_ok: bool) -> bool {
    let mut changed = false;
    for stmt in body.iter_mut() {
        changed |= for_each_expr(stmt, &mut |e| fold_expr(e, neg_ok));
    }
    changed
}

fn fold_expr(expr: &mut Expr, neg_ok: bool) -> bool {
    let mut changed = false;
    match &mut expr.kind {
        ExprKind::Unary { op, operand, override_fn } => {
            changed |= fold_expr(operand, neg_ok);
            if override_fn.is_some() {
                return changed;
            }
            match (*op, &operand.kind) {
                (UnOp::Neg, ExprKind::Int(v)) if neg_ok => {
                    *expr = int_lit(v.wrapping_neg(), expr.span);
                    return true;
                }
                (UnOp::Neg, ExprKind::Float(v)) if neg_ok => {
                    *expr = float_lit(-*v, expr.span);
                    return true;
                }
                (UnOp::Not, ExprKind::Bool(v)) => {
                    *expr = bool_lit(!*v, expr.span);
                    return true;
                }
                _ => {}
            }
        }
        ExprKind::Binary { op, lhs, rhs, override_fn } => {
            changed |= fold_expr(lhs, neg_ok);
            changed |= fold_expr(rhs, neg_ok);
            if override_fn.is_some() {
                return changed;
            }
            if let Some(folded) = fold_binary(*op, lhs, rhs, expr.span) {
                *expr = folded;
                return true;
            }
            if let Some(simplified) = algebraic_identity(*op, lhs, rhs, expr.inf) {
                *expr = simplified;
                return true;
            }
        }
        ExprKind::Call { args, .. } => {
            for arg in args.iter_mut() {
                changed |= fold_expr(arg, neg_ok);
            }
        }
        _ => {}
    }
    changed
}

fn fold_binary(op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Option<Expr> {
    use ExprKind::*;
    match (&lhs.kind, &rhs.kind) {
        (Int(a), Int(b)) => fold_int(op, *a, *b, span),
        (Float(a), Float(b)) => fold_float(op, *a, *b, span),
        (Int(a), Float(b)) => fold_float(op, *a as f64, *b, span),
        (Float(a), Int(b)) => fold_float(op, *a, *b as f64, span),
        (Bool(a), Bool(b)) => match op {
            BinOp::And => Some(bool_lit(*a && *b, span)),
            BinOp::Or => Some(bool_lit(*a || *b, span)),
            BinOp::Eq => Some(bool_lit(a == b, span)),
            BinOp::Ne => Some(bool_lit(a != b, span)),
            _ => None,
        },
        (Str(a), Str(b)) => match op {
            BinOp::Eq => Some(bool_lit(a == b, span)),
            BinOp::Ne => Some(bool_lit(a != b, span)),
            _ => None,
        },
        // Short-circuit with one literal operand.
        (Bool(true), _) if op == BinOp::And => Some(clone_expr(rhs)),
        (Bool(false), _) if op == BinOp::And => Some(bool_lit(false, span)),
        (Bool(true), _) if op == BinOp::Or => Some(bool_lit(true, span)),
        (Bool(false), _) if op == BinOp::Or => Some(clone_expr(rhs)),
        (_, Bool(true)) if op == BinOp::And => Some(clone_expr(lhs)),
        (_, Bool(false)) if op == BinOp::Or => Some(clone_expr(lhs)),
        (_, Bool(false)) if op == BinOp::And && !lhs.contains_call() => {
            Some(bool_lit(false, span))
        }
        (_, Bool(true)) if op == BinOp::Or && !lhs.contains_call() => Some(bool_lit(true, span)),
        _ => None,
    }
}

fn fold_int(op: BinOp, a: i64, b: i64, span: Span) -> Option<Expr> {
    Some(match op {
        BinOp::Add => int_lit(a.checked_add(b)?, span),
        BinOp::Sub => int_lit(a.checked_sub(b)?, span),
        BinOp::Mul => int_lit(a.checked_mul(b)?, span),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            int_lit(a.checked_div(b)?, span)
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            int_lit(a.checked_rem(b)?, span)
        }
        BinOp::Pow => int_lit(int_pow(a, b)?, span),
        BinOp::Eq => bool_lit(a == b, span),
        BinOp::Ne => bool_lit(a != b, span),
        BinOp::Lt => bool_lit(a < b, span),
        BinOp::Le => bool_lit(a <= b, span),
        BinOp::Gt => bool_lit(a > b, span),
        BinOp::Ge => bool_lit(a >= b, span),
        BinOp::And | BinOp::Or => return None,
    })
}

fn fold_float(op: BinOp, a: f64, b: f64, span: Span) -> Option<Expr> {
    Some(match op {
        BinOp::Add => float_lit(a + b, span),
        BinOp::Sub => float_lit(a - b, span),
        BinOp::Mul => float_lit(a * b, span),
        BinOp::Div => float_lit(a / b, span),
        BinOp::Mod => float_lit(a % b, span),
        BinOp::Pow => float_lit(a.powf(b), span),
        BinOp::Eq => bool_lit(a == b, span),
        BinOp::Ne => bool_lit(a != b, span),
        BinOp::Lt => bool_lit(a < b, span),
        BinOp::Le => bool_lit(a <= b, span),
        BinOp::Gt => bool_lit(a > b, span),
        BinOp::Ge => bool_lit(a >= b, span),
        BinOp::And | BinOp::Or => return None,
    })
}

/// Integer pow by repeated squaring; negative exponents never fold.
fn int_pow(base: i64, exp: i64) -> Option<i64> {
    if exp < 0 {
        return None;
    }
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.checked_mul(base)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = base.checked_mul(base)?;
        }
    }
    Some(result)
}

/// `x + 0`, `0 + x`, `x - 0`, `x * 1`, `1 * x`, `x / 1`, `x ** 1` collapse;
/// `x - x` collapses to `0` only when the inferred type is i64.
fn algebraic_identity(op: BinOp, lhs: &Expr, rhs: &Expr, inf: Type) -> Option<Expr> {
    let lhs_int = lhs.as_int();
    let rhs_int = rhs.as_int();
    match op {
        BinOp::Add => {
            if rhs_int == Some(0) {
                return Some(clone_expr(lhs));
            }
            if lhs_int == Some(0) {
                return Some(clone_expr(rhs));
            }
        }
        BinOp::Sub => {
            if rhs_int == Some(0) {
                return Some(clone_expr(lhs));
            }
            if inf == Type::I64 && same_var(lhs, rhs) {
                return Some(int_lit(0, lhs.span));
            }
        }
        BinOp::Mul => {
            if rhs_int == Some(1) {
                return Some(clone_expr(lhs));
            }
            if lhs_int == Some(1) {
                return Some(clone_expr(rhs));
            }
        }
        BinOp::Div | BinOp::Pow => {
            if rhs_int == Some(1) {
                return Some(clone_expr(lhs));
            }
        }
        _ => {}
    }
    None
}

fn same_var(a: &Expr, b: &Expr) -> bool {
    matches!((&a.kind, &b.kind), (ExprKind::Var(x), ExprKind::Var(y)) if x == y)
}

// ── Dead-store elimination ──

/// Within a block: declares of block-local names, assigns to block-local
/// names, and pure expression statements whose value is never read later in
/// the block are removed. Nested if/else bodies are pruned recursively.
fn eliminate_dead_stores(body: &mut Vec<Stmt>) -> bool {
    let mut changed = false;

    for stmt in body.iter_mut() {
        match &mut stmt.kind {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                changed |= eliminate_dead_stores(then_body);
                changed |= eliminate_dead_stores(else_body);
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::FormatBlock { body, .. } => {
                changed |= eliminate_dead_stores(body);
            }
            _ => {}
        }
    }

    let mut declared_here: Vec<String> = Vec::new();
    let mut keep = vec![true; body.len()];
    for i in 0..body.len() {
        match &body[i].kind {
            StmtKind::Declare {
                name,
                is_owned,
                init,
                ..
            } => {
                declared_here.push(name.clone());
                if *is_owned {
                    continue;
                }
                let pure = init.as_ref().map(trivially_pure).unwrap_or(true);
                if pure && !read_later(body, i + 1, name) {
                    keep[i] = false;
                }
            }
            StmtKind::Assign { name, value } => {
                if declared_here.contains(name)
                    && trivially_pure(value)
                    && !read_later(body, i + 1, name)
                {
                    keep[i] = false;
                }
            }
            StmtKind::Expr(e) => {
                if trivially_pure(e) {
                    keep[i] = false;
                }
            }
            _ => {}
        }
    }

    let mut idx = 0;
    body.retain(|_| {
        let k = keep[idx];
        idx += 1;
        if !k {
            changed = true;
        }
        k
    });
    changed
}

/// No calls, no division/modulo/power anywhere in the expression.
fn trivially_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call { .. } => false,
        ExprKind::Unary { operand, .. } => trivially_pure(operand),
        ExprKind::Binary { op, lhs, rhs, .. } => {
            !matches!(op, BinOp::Div | BinOp::Mod | BinOp::Pow)
                && trivially_pure(lhs)
                && trivially_pure(rhs)
        }
        _ => true,
    }
}

fn read_later(body: &[Stmt], from: usize, name: &str) -> bool {
    body[from..].iter().any(|stmt| stmt_reads(stmt, name))
}

fn stmt_reads(stmt: &Stmt, name: &str) -> bool {
    let expr_reads = |e: &Expr| {
        let mut vars = Vec::new();
        e.referenced_vars(&mut vars);
        vars.iter().any(|v| v == name)
    };
    match &stmt.kind {
        StmtKind::Declare { init, .. } => init.as_ref().is_some_and(expr_reads),
        StmtKind::Assign { value, .. } => expr_reads(value),
        StmtKind::Expr(e) => expr_reads(e),
        StmtKind::Return(v) => v.as_ref().is_some_and(expr_reads),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            expr_reads(cond)
                || then_body.iter().any(|s| stmt_reads(s, name))
                || else_body.iter().any(|s| stmt_reads(s, name))
        }
        StmtKind::While { cond, body } => {
            expr_reads(cond) || body.iter().any(|s| stmt_reads(s, name))
        }
        StmtKind::For {
            start,
            stop,
            step,
            body,
            ..
        } => {
            expr_reads(start)
                || expr_reads(stop)
                || step.as_ref().is_some_and(expr_reads)
                || body.iter().any(|s| stmt_reads(s, name))
        }
        StmtKind::FormatBlock { end_arg, body } => {
            end_arg.as_ref().is_some_and(expr_reads) || body.iter().any(|s| stmt_reads(s, name))
        }
        StmtKind::Break | StmtKind::Continue => false,
    }
}

// ── Local i64 constant propagation ──

/// Per-block map from variable to known i64 value. Entering any loop or
/// conditional invalidates the map (intentionally conservative); known
/// `print`/`println` arguments specialize into the `_str` forms.
fn propagate_consts(body: &mut [Stmt]) -> bool {
    let mut changed = false;
    let mut known: HashMap<String, i64> = HashMap::new();

    for stmt in body.iter_mut() {
        match &mut stmt.kind {
            StmtKind::Declare { name, init, resolved, .. } => {
                let mut value = None;
                if *resolved == Type::I64 || *resolved == Type::Void {
                    if let Some(e) = init {
                        value = eval_known(e, &known);
                        if let Some(v) = value {
                            if e.as_int() != Some(v) {
                                *e = int_lit(v, e.span);
                                changed = true;
                            }
                        }
                    }
                }
                match value {
                    Some(v) => {
                        known.insert(name.clone(), v);
                    }
                    None => {
                        known.remove(name);
                    }
                }
            }
            StmtKind::Assign { name, value } => {
                let v = eval_known(value, &known);
                match v {
                    Some(v) => {
                        if value.as_int() != Some(v) {
                            *value = int_lit(v, value.span);
                            changed = true;
                        }
                        known.insert(name.clone(), v);
                    }
                    None => {
                        known.remove(name);
                    }
                }
            }
            StmtKind::Expr(e) => {
                if let ExprKind::Call { name, args } = &mut e.kind {
                    if (name == "print" || name == "println") && args.len() == 1 {
                        if let Some(v) = eval_known(&args[0], &known) {
                            let span = args[0].span;
                            *name = if name == "print" {
                                "print_str".to_string()
                            } else {
                                "println_str".to_string()
                            };
                            args[0] = Expr::str_lit(v.to_string(), span);
                            changed = true;
                        }
                    }
                }
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                changed |= propagate_consts(then_body);
                changed |= propagate_consts(else_body);
                known.clear();
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::FormatBlock { body, .. } => {
                changed |= propagate_consts(body);
                known.clear();
            }
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue => {}
        }
    }
    changed
}

/// Evaluate an expression to a known i64 using only arithmetic over known
/// variables and literals.
fn eval_known(expr: &Expr, known: &HashMap<String, i64>) -> Option<i64> {
    match &expr.kind {
        ExprKind::Int(v) => Some(*v),
        // Only i64-typed reads count: an f64 or i32 variable may hold the
        // same numeric value with different print formatting.
        ExprKind::Var(name) if expr.typed && expr.inf == Type::I64 => known.get(name).copied(),
        ExprKind::Var(_) => None,
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
            override_fn: None,
        } => eval_known(operand, known)?.checked_neg(),
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn: None,
        } => {
            let a = eval_known(lhs, known)?;
            let b = eval_known(rhs, known)?;
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        None
                    } else {
                        a.checked_div(b)
                    }
                }
                BinOp::Mod => {
                    if b == 0 {
                        None
                    } else {
                        a.checked_rem(b)
                    }
                }
                BinOp::Pow => int_pow(a, b),
                _ => None,
            }
        }
        _ => None,
    }
}

// ── Loop closed-form strength reduction ──

fn reduce_loops_block(body: &mut Vec<Stmt>, neg_ok: bool) -> bool {
    let mut changed = false;

    for stmt in body.iter_mut() {
        match &mut stmt.kind {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                changed |= reduce_loops_block(then_body, neg_ok);
                changed |= reduce_loops_block(else_body, neg_ok);
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::FormatBlock { body, .. } => {
                changed |= reduce_loops_block(body, neg_ok);
            }
            _ => {}
        }
    }

    let mut i = 0;
    while i < body.len() {
        if let StmtKind::For { parallel: false, .. } = &body[i].kind {
            if let Some(replacement) = try_reduce_loop(body, i, neg_ok) {
                body.splice(i..=i, replacement);
                changed = true;
                continue;
            }
        }
        i += 1;
    }
    changed
}

fn try_reduce_loop(block: &[Stmt], idx: usize, neg_ok: bool) -> Option<Vec<Stmt>> {
    let StmtKind::For {
        var,
        start,
        stop,
        step,
        parallel: false,
        body,
    } = &block[idx].kind
    else {
        return None;
    };
    let span = block[idx].span;

    let a = resolve_const(block, idx, start)?;
    let b = resolve_const(block, idx, stop)?;
    let s = match step {
        Some(e) => resolve_const(block, idx, e)?,
        None => 1,
    };
    if s == 0 {
        return None;
    }

    let n = trip_count(a, b, s)?;
    if n == 0 {
        return Some(Vec::new());
    }

    let shapes: [ShapeFn; 6] = [
        shape_alternating,
        shape_pair_coupled,
        shape_modular_linear,
        shape_polynomial,
        shape_affine_multi,
        shape_bilinear,
    ];
    for shape in shapes {
        if let Some(stmts) = shape(var, body, a, s, n, neg_ok, block, idx, span) {
            return Some(stmts);
        }
    }

    if n <= UNROLL_LIMIT {
        return shape_unroll(var, body, a, s, n, span);
    }
    None
}

fn trip_count(a: i64, b: i64, s: i64) -> Option<i128> {
    let (a, b, s) = (a as i128, b as i128, s as i128);
    let n = if s > 0 {
        if b <= a {
            0
        } else {
            (b - a + s - 1) / s
        }
    } else if a <= b {
        0
    } else {
        (a - b + (-s) - 1) / (-s)
    };
    Some(n)
}

/// Track the bound expression through a local forward scan: literals pass,
/// a variable passes only when a preceding declare gives it a literal value
/// and nothing before the loop reassigns it.
fn resolve_const(block: &[Stmt], loop_idx: usize, expr: &Expr) -> Option<i64> {
    if let Some(v) = expr.as_int() {
        return Some(v);
    }
    let ExprKind::Var(name) = &expr.kind else {
        return None;
    };

    let mut value = None;
    for stmt in &block[..loop_idx] {
        if assigns_to(stmt, name) {
            return None;
        }
        if let StmtKind::Declare {
            name: dname, init, ..
        } = &stmt.kind
        {
            if dname == name {
                value = init.as_ref().and_then(|e| e.as_int());
                if value.is_none() {
                    return None;
                }
            }
        }
    }
    value
}

fn assigns_to(stmt: &Stmt, name: &str) -> bool {
    match &stmt.kind {
        StmtKind::Assign { name: n, .. } => n == name,
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => {
            then_body.iter().any(|s| assigns_to(s, name))
                || else_body.iter().any(|s| assigns_to(s, name))
        }
        StmtKind::While { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::FormatBlock { body, .. } => body.iter().any(|s| assigns_to(s, name)),
        _ => false,
    }
}

// ── Affine/polynomial recognizers ──

/// `coeff * i + offset` with literal coefficients.
fn affine_of(expr: &Expr, var: &str, neg_ok: bool) -> Option<(i128, i128)> {
    match &expr.kind {
        ExprKind::Int(v) => Some((0, *v as i128)),
        ExprKind::Var(name) if name == var => Some((1, 0)),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
            override_fn: None,
        } if neg_ok => {
            let (a, b) = affine_of(operand, var, neg_ok)?;
            Some((-a, -b))
        }
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn: None,
        } => {
            match op {
                BinOp::Add => {
                    let (a1, b1) = affine_of(lhs, var, neg_ok)?;
                    let (a2, b2) = affine_of(rhs, var, neg_ok)?;
                    Some((a1.checked_add(a2)?, b1.checked_add(b2)?))
                }
                BinOp::Sub => {
                    let (a1, b1) = affine_of(lhs, var, neg_ok)?;
                    let (a2, b2) = affine_of(rhs, var, neg_ok)?;
                    Some((a1.checked_sub(a2)?, b1.checked_sub(b2)?))
                }
                BinOp::Mul => {
                    let (a1, b1) = affine_of(lhs, var, neg_ok)?;
                    let (a2, b2) = affine_of(rhs, var, neg_ok)?;
                    // One side must be constant.
                    if a1 == 0 {
                        Some((b1.checked_mul(a2)?, b1.checked_mul(b2)?))
                    } else if a2 == 0 {
                        Some((a1.checked_mul(b2)?, b1.checked_mul(b2)?))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// `c2*i^2 + c1*i + c0` with literal coefficients (degree <= 2).
fn poly_of(expr: &Expr, var: &str, neg_ok: bool) -> Option<(i128, i128, i128)> {
    match &expr.kind {
        ExprKind::Int(v) => Some((0, 0, *v as i128)),
        ExprKind::Var(name) if name == var => Some((0, 1, 0)),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
            override_fn: None,
        } if neg_ok => {
            let (c2, c1, c0) = poly_of(operand, var, neg_ok)?;
            Some((-c2, -c1, -c0))
        }
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn: None,
        } => match op {
            BinOp::Add => {
                let (a2, a1, a0) = poly_of(lhs, var, neg_ok)?;
                let (b2, b1, b0) = poly_of(rhs, var, neg_ok)?;
                Some((
                    a2.checked_add(b2)?,
                    a1.checked_add(b1)?,
                    a0.checked_add(b0)?,
                ))
            }
            BinOp::Sub => {
                let (a2, a1, a0) = poly_of(lhs, var, neg_ok)?;
                let (b2, b1, b0) = poly_of(rhs, var, neg_ok)?;
                Some((
                    a2.checked_sub(b2)?,
                    a1.checked_sub(b1)?,
                    a0.checked_sub(b0)?,
                ))
            }
            BinOp::Mul => {
                let (a2, a1, a0) = poly_of(lhs, var, neg_ok)?;
                let (b2, b1, b0) = poly_of(rhs, var, neg_ok)?;
                // Total degree of the product must stay <= 2.
                let d2 = a2
                    .checked_mul(b0)?
                    .checked_add(a0.checked_mul(b2)?)?
                    .checked_add(a1.checked_mul(b1)?)?;
                if (a2 != 0 && (b2 != 0 || b1 != 0)) || (b2 != 0 && a1 != 0) {
                    return None;
                }
                Some((
                    d2,
                    a1.checked_mul(b0)?.checked_add(a0.checked_mul(b1)?)?,
                    a0.checked_mul(b0)?,
                ))
            }
            BinOp::Pow => {
                // Only `i ** 2`.
                if matches!(&lhs.kind, ExprKind::Var(n) if n == var) && rhs.as_int() == Some(2) {
                    Some((1, 0, 0))
                } else {
                    None
                }
            }
            _ => None,
        },
        _ => None,
    }
}

/// Bilinear in (i, j): `cij*i*j + ci*i + cj*j + c0`.
fn bilinear_of(expr: &Expr, vi: &str, vj: &str, neg_ok: bool) -> Option<(i128, i128, i128, i128)> {
    match &expr.kind {
        ExprKind::Int(v) => Some((0, 0, 0, *v as i128)),
        ExprKind::Var(name) if name == vi => Some((0, 1, 0, 0)),
        ExprKind::Var(name) if name == vj => Some((0, 0, 1, 0)),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
            override_fn: None,
        } if neg_ok => {
            let (cij, ci, cj, c0) = bilinear_of(operand, vi, vj, neg_ok)?;
            Some((-cij, -ci, -cj, -c0))
        }
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn: None,
        } => match op {
            BinOp::Add => {
                let a = bilinear_of(lhs, vi, vj, neg_ok)?;
                let b = bilinear_of(rhs, vi, vj, neg_ok)?;
                Some((
                    a.0.checked_add(b.0)?,
                    a.1.checked_add(b.1)?,
                    a.2.checked_add(b.2)?,
                    a.3.checked_add(b.3)?,
                ))
            }
            BinOp::Sub => {
                let a = bilinear_of(lhs, vi, vj, neg_ok)?;
                let b = bilinear_of(rhs, vi, vj, neg_ok)?;
                Some((
                    a.0.checked_sub(b.0)?,
                    a.1.checked_sub(b.1)?,
                    a.2.checked_sub(b.2)?,
                    a.3.checked_sub(b.3)?,
                ))
            }
            BinOp::Mul => {
                let a = bilinear_of(lhs, vi, vj, neg_ok)?;
                let b = bilinear_of(rhs, vi, vj, neg_ok)?;
                let a_const = a.0 == 0 && a.1 == 0 && a.2 == 0;
                let b_const = b.0 == 0 && b.1 == 0 && b.2 == 0;
                if a_const {
                    return Some((
                        a.3.checked_mul(b.0)?,
                        a.3.checked_mul(b.1)?,
                        a.3.checked_mul(b.2)?,
                        a.3.checked_mul(b.3)?,
                    ));
                }
                if b_const {
                    return Some((
                        b.3.checked_mul(a.0)?,
                        b.3.checked_mul(a.1)?,
                        b.3.checked_mul(a.2)?,
                        b.3.checked_mul(a.3)?,
                    ));
                }
                // (ci*i + c) * (cj*j + c'): accept only pure-i times pure-j.
                let a_pure_i = a.0 == 0 && a.2 == 0 && a.3 == 0;
                let b_pure_j = b.0 == 0 && b.1 == 0 && b.3 == 0;
                if a_pure_i && b_pure_j {
                    return Some((a.1.checked_mul(b.2)?, 0, 0, 0));
                }
                let a_pure_j = a.0 == 0 && a.1 == 0 && a.3 == 0;
                let b_pure_i = b.0 == 0 && b.2 == 0 && b.3 == 0;
                if a_pure_j && b_pure_i {
                    return Some((a.2.checked_mul(b.1)?, 0, 0, 0));
                }
                None
            }
            _ => None,
        },
        _ => None,
    }
}

// ── Series sums (all i128, checked) ──

/// `S1 = sum_{k=0}^{N-1} (start + k*step)`.
fn series_sum(n: i128, start: i128, step: i128) -> Option<i128> {
    let sum_k = n.checked_mul(n.checked_sub(1)?)? / 2;
    n.checked_mul(start)?.checked_add(step.checked_mul(sum_k)?)
}

/// `sum_{k=0}^{N-1} (start + k*step)^2`.
fn series_sum_sq(n: i128, start: i128, step: i128) -> Option<i128> {
    let sum_k = n.checked_mul(n.checked_sub(1)?)? / 2;
    let sum_k2 = n
        .checked_mul(n.checked_sub(1)?)?
        .checked_mul(n.checked_mul(2)?.checked_sub(1)?)?
        / 6;
    let t1 = n.checked_mul(start.checked_mul(start)?)?;
    let t2 = start
        .checked_mul(step)?
        .checked_mul(2)?
        .checked_mul(sum_k)?;
    let t3 = step.checked_mul(step)?.checked_mul(sum_k2)?;
    t1.checked_add(t2)?.checked_add(t3)
}

fn fits_i64(v: i128) -> Option<i64> {
    if v >= i64::MIN as i128 && v <= i64::MAX as i128 {
        Some(v as i64)
    } else {
        None
    }
}

// ── Shape matchers ──

/// Accumulator update `acc = acc + <rhs>` or `acc = acc - <rhs>`; returns
/// (acc, rhs, sign).
fn split_reduction<'e>(stmt: &'e Stmt) -> Option<(&'e str, &'e Expr, i128)> {
    let StmtKind::Assign { name, value } = &stmt.kind else {
        return None;
    };
    let ExprKind::Binary {
        op,
        lhs,
        rhs,
        override_fn: None,
    } = &value.kind
    else {
        return None;
    };
    match op {
        BinOp::Add => {
            if matches!(&lhs.kind, ExprKind::Var(n) if n == name) {
                return Some((name.as_str(), &**rhs, 1));
            }
            if matches!(&rhs.kind, ExprKind::Var(n) if n == name) {
                return Some((name.as_str(), &**lhs, 1));
            }
            None
        }
        BinOp::Sub => {
            if matches!(&lhs.kind, ExprKind::Var(n) if n == name) {
                return Some((name.as_str(), &**rhs, -1));
            }
            None
        }
        _ => None,
    }
}

fn acc_update_stmt(acc: &str, delta: i64, span: Span) -> Stmt {
    Stmt::new(
        StmtKind::Assign {
            name: acc.to_string(),
            value: Expr::new(
                ExprKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(Expr::var(acc, span)),
                    rhs: Box::new(int_lit(delta, span)),
                    override_fn: None,
                },
                span,
            ),
        },
        span,
    )
}

type ShapeFn = fn(
    &str,
    &[Stmt],
    i64,
    i64,
    i128,
    bool,
    &[Stmt],
    usize,
    Span,
) -> Option<Vec<Stmt>>;

/// Patterns 1 and 2: one to four independent affine reductions.
#[allow(clippy::too_many_arguments)]
fn shape_affine_multi(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    neg_ok: bool,
    _block: &[Stmt],
    _idx: usize,
    span: Span,
) -> Option<Vec<Stmt>> {
    if body.is_empty() || body.len() > 4 {
        return None;
    }

    let mut updates: Vec<(String, i64)> = Vec::new();
    for stmt in body {
        let (acc, rhs, sign) = split_reduction(stmt)?;
        if acc == var || updates.iter().any(|(name, _)| name == acc) {
            return None;
        }
        // Independence: the affine recognizer admits only `var` and
        // literals, so no reduction can read another accumulator.
        let (ca, cb) = affine_of(rhs, var, neg_ok)?;
        let s1 = series_sum(n, a as i128, s as i128)?;
        let delta = ca
            .checked_mul(s1)?
            .checked_add(cb.checked_mul(n)?)?
            .checked_mul(sign)?;
        updates.push((acc.to_string(), fits_i64(delta)?));
    }

    Some(
        updates
            .into_iter()
            .map(|(acc, delta)| acc_update_stmt(&acc, delta, span))
            .collect(),
    )
}

/// Pattern 3: two nested constant-bounded loops with a single reduction
/// affine in both induction variables.
#[allow(clippy::too_many_arguments)]
fn shape_bilinear(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    neg_ok: bool,
    _block: &[Stmt],
    _idx: usize,
    span: Span,
) -> Option<Vec<Stmt>> {
    let [inner] = body else {
        return None;
    };
    let StmtKind::For {
        var: jvar,
        start,
        stop,
        step,
        parallel: false,
        body: inner_body,
    } = &inner.kind
    else {
        return None;
    };
    if jvar == var {
        return None;
    }
    let aj = start.as_int()?;
    let bj = stop.as_int()?;
    let sj = match step {
        Some(e) => e.as_int()?,
        None => 1,
    };
    if sj == 0 {
        return None;
    }
    let nj = trip_count(aj, bj, sj)?;

    let [red] = inner_body.as_slice() else {
        return None;
    };
    let (acc, rhs, sign) = split_reduction(red)?;
    if acc == var || acc == jvar.as_str() {
        return None;
    }
    let (cij, ci, cj, c0) = bilinear_of(rhs, var, jvar, neg_ok)?;

    if nj == 0 {
        return Some(Vec::new());
    }

    let s1i = series_sum(n, a as i128, s as i128)?;
    let s1j = series_sum(nj, aj as i128, sj as i128)?;
    let delta = cij
        .checked_mul(s1i)?
        .checked_mul(s1j)?
        .checked_add(ci.checked_mul(s1i)?.checked_mul(nj)?)?
        .checked_add(cj.checked_mul(s1j)?.checked_mul(n)?)?
        .checked_add(c0.checked_mul(n)?.checked_mul(nj)?)?
        .checked_mul(sign)?;

    Some(vec![acc_update_stmt(acc, fits_i64(delta)?, span)])
}

/// Pattern 4: `if (i % 2 == 0) x = x + i else x = x - i` (or the mirror).
#[allow(clippy::too_many_arguments)]
fn shape_alternating(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    _neg_ok: bool,
    _block: &[Stmt],
    _idx: usize,
    span: Span,
) -> Option<Vec<Stmt>> {
    let [stmt] = body else {
        return None;
    };
    let StmtKind::If {
        cond,
        then_body,
        else_body,
    } = &stmt.kind
    else {
        return None;
    };

    // Condition `i % 2 == <0|1>`.
    let ExprKind::Binary {
        op: BinOp::Eq,
        lhs,
        rhs,
        override_fn: None,
    } = &cond.kind
    else {
        return None;
    };
    let ExprKind::Binary {
        op: BinOp::Mod,
        lhs: mod_lhs,
        rhs: mod_rhs,
        override_fn: None,
    } = &lhs.kind
    else {
        return None;
    };
    if !matches!(&mod_lhs.kind, ExprKind::Var(nm) if nm == var) || mod_rhs.as_int() != Some(2) {
        return None;
    }
    let cond_parity = rhs.as_int()?;
    if cond_parity != 0 && cond_parity != 1 {
        return None;
    }

    let ([then_stmt], [else_stmt]) = (then_body.as_slice(), else_body.as_slice()) else {
        return None;
    };
    let (acc1, rhs1, sign1) = split_reduction(then_stmt)?;
    let (acc2, rhs2, sign2) = split_reduction(else_stmt)?;
    if acc1 != acc2 || acc1 == var || sign1 == sign2 {
        return None;
    }
    if !matches!(&rhs1.kind, ExprKind::Var(nm) if nm == var)
        || !matches!(&rhs2.kind, ExprKind::Var(nm) if nm == var)
    {
        return None;
    }

    // Sign applied to terms whose value parity is `cond_parity`.
    let even_sign = if cond_parity == 0 { sign1 } else { sign2 };
    let odd_sign = -even_sign;

    let (a128, s128) = (a as i128, s as i128);
    let delta = if s % 2 == 0 {
        // All iteration values share the parity of `a`.
        let sign = if a.rem_euclid(2) == 0 { even_sign } else { odd_sign };
        series_sum(n, a128, s128)?.checked_mul(sign)?
    } else {
        // Parity alternates with k; split even and odd k positions.
        let n_even = (n + 1) / 2;
        let n_odd = n / 2;
        let sum_even_k = series_sum(n_even, a128, s128.checked_mul(2)?)?;
        let sum_odd_k = series_sum(n_odd, a128.checked_add(s128)?, s128.checked_mul(2)?)?;
        let (first_sign, second_sign) = if a.rem_euclid(2) == 0 {
            (even_sign, odd_sign)
        } else {
            (odd_sign, even_sign)
        };
        sum_even_k
            .checked_mul(first_sign)?
            .checked_add(sum_odd_k.checked_mul(second_sign)?)?
    };

    Some(vec![acc_update_stmt(acc1, fits_i64(delta)?, span)])
}

/// Pattern 5: `acc += state; state += affine(i)`.
#[allow(clippy::too_many_arguments)]
fn shape_pair_coupled(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    neg_ok: bool,
    _block: &[Stmt],
    _idx: usize,
    span: Span,
) -> Option<Vec<Stmt>> {
    let [first, second] = body else {
        return None;
    };
    let (acc, acc_rhs, acc_sign) = split_reduction(first)?;
    let (state, state_rhs, state_sign) = split_reduction(second)?;
    if acc == state || acc == var || state == var || acc_sign != 1 || state_sign != 1 {
        return None;
    }
    if !matches!(&acc_rhs.kind, ExprKind::Var(nm) if nm == state) {
        return None;
    }
    let (ca, cb) = affine_of(state_rhs, var, neg_ok)?;

    let (a128, s128) = (a as i128, s as i128);
    // acc gains state_0 every iteration plus each f(i_k) weighted by how
    // many later iterations observe it: acc += N*state + W, where
    // W = sum_k (N-1-k) * (ca*(a + k*s) + cb).
    let sum_w = n.checked_mul(n.checked_sub(1)?)? / 2;
    let sum_kw = n
        .checked_sub(1)?
        .checked_mul(n.checked_mul(n.checked_sub(1)?)? / 2)?
        .checked_sub(
            n.checked_sub(1)?
                .checked_mul(n)?
                .checked_mul(n.checked_mul(2)?.checked_sub(1)?)?
                / 6,
        )?;
    let base = ca.checked_mul(a128)?.checked_add(cb)?;
    let w = base
        .checked_mul(sum_w)?
        .checked_add(ca.checked_mul(s128)?.checked_mul(sum_kw)?)?;
    fits_i64(w)?;

    // state += sum of the affine series.
    let s1 = series_sum(n, a128, s128)?;
    let state_delta = ca.checked_mul(s1)?.checked_add(cb.checked_mul(n)?)?;
    let n_i64 = fits_i64(n)?;

    let acc_value = Expr::new(
        ExprKind::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::var(acc, span)),
            rhs: Box::new(Expr::new(
                ExprKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(Expr::new(
                        ExprKind::Binary {
                            op: BinOp::Mul,
                            lhs: Box::new(int_lit(n_i64, span)),
                            rhs: Box::new(Expr::var(state, span)),
                            override_fn: None,
                        },
                        span,
                    )),
                    rhs: Box::new(int_lit(fits_i64(w)?, span)),
                    override_fn: None,
                },
                span,
            )),
            override_fn: None,
        },
        span,
    );

    Some(vec![
        Stmt::new(
            StmtKind::Assign {
                name: acc.to_string(),
                value: acc_value,
            },
            span,
        ),
        acc_update_stmt(state, fits_i64(state_delta)?, span),
    ])
}

/// Pattern 6: `acc += (a*i + b) mod m` with m > 0, summed with a floor-sum
/// identity in O(log m). Only the all-nonnegative case is safe against C's
/// truncating `%`.
#[allow(clippy::too_many_arguments)]
fn shape_modular_linear(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    neg_ok: bool,
    _block: &[Stmt],
    _idx: usize,
    span: Span,
) -> Option<Vec<Stmt>> {
    let [stmt] = body else {
        return None;
    };
    let (acc, rhs, sign) = split_reduction(stmt)?;
    if acc == var {
        return None;
    }
    let ExprKind::Binary {
        op: BinOp::Mod,
        lhs: mod_lhs,
        rhs: mod_rhs,
        override_fn: None,
    } = &rhs.kind
    else {
        return None;
    };
    let m = mod_rhs.as_int()? as i128;
    if m <= 0 {
        return None;
    }
    let (ca, cb) = affine_of(mod_lhs, var, neg_ok)?;

    // Per-iteration term: (A*k + B) mod m with A = ca*s, B = ca*a + cb.
    let aa = ca.checked_mul(s as i128)?;
    let bb = ca.checked_mul(a as i128)?.checked_add(cb)?;
    if aa < 0 || bb < 0 {
        return None;
    }

    let linear = aa
        .checked_mul(n.checked_mul(n.checked_sub(1)?)? / 2)?
        .checked_add(bb.checked_mul(n)?)?;
    let fs = floor_sum_euclid(n, m, aa, bb)?;
    let delta = linear
        .checked_sub(m.checked_mul(fs)?)?
        .checked_mul(sign)?;

    Some(vec![acc_update_stmt(acc, fits_i64(delta)?, span)])
}

/// Pattern 7: `acc += p(i)` for polynomial p of degree <= 2.
#[allow(clippy::too_many_arguments)]
fn shape_polynomial(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    neg_ok: bool,
    _block: &[Stmt],
    _idx: usize,
    span: Span,
) -> Option<Vec<Stmt>> {
    let [stmt] = body else {
        return None;
    };
    let (acc, rhs, sign) = split_reduction(stmt)?;
    if acc == var {
        return None;
    }
    let (c2, c1, c0) = poly_of(rhs, var, neg_ok)?;
    if c2 == 0 {
        // Degree <= 1 belongs to the affine shapes.
        return None;
    }

    let (a128, s128) = (a as i128, s as i128);
    let delta = c2
        .checked_mul(series_sum_sq(n, a128, s128)?)?
        .checked_add(c1.checked_mul(series_sum(n, a128, s128)?)?)?
        .checked_add(c0.checked_mul(n)?)?
        .checked_mul(sign)?;

    Some(vec![acc_update_stmt(acc, fits_i64(delta)?, span)])
}

/// Pattern 8: trips of at most eight fully unroll when the body has no
/// loop-control flow and does not redeclare the induction variable.
fn shape_unroll(
    var: &str,
    body: &[Stmt],
    a: i64,
    s: i64,
    n: i128,
    span: Span,
) -> Option<Vec<Stmt>> {
    if body.iter().any(|s| has_loop_control(s) || redeclares(s, var)) {
        return None;
    }
    let mut out = Vec::new();
    let mut value = a;
    for _ in 0..n {
        let mut map = HashMap::new();
        map.insert(var.to_string(), int_lit(value, span));
        for stmt in body {
            out.push(subst_stmt(stmt, &map));
        }
        value = value.checked_add(s)?;
    }
    Some(out)
}

fn has_loop_control(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Break | StmtKind::Continue => true,
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => {
            then_body.iter().any(has_loop_control) || else_body.iter().any(has_loop_control)
        }
        StmtKind::While { .. } | StmtKind::For { .. } => true,
        StmtKind::FormatBlock { body, .. } => body.iter().any(has_loop_control),
        _ => false,
    }
}

fn redeclares(stmt: &Stmt, var: &str) -> bool {
    match &stmt.kind {
        StmtKind::Declare { name, .. } => name == var,
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => {
            then_body.iter().any(|s| redeclares(s, var))
                || else_body.iter().any(|s| redeclares(s, var))
        }
        StmtKind::While { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::FormatBlock { body, .. } => body.iter().any(|s| redeclares(s, var)),
        _ => false,
    }
}

fn subst_stmt(stmt: &Stmt, map: &HashMap<String, Expr>) -> Stmt {
    let kind = match &stmt.kind {
        StmtKind::Declare {
            name,
            declared,
            is_const,
            is_owned,
            init,
            resolved,
            free_fn,
        } => StmtKind::Declare {
            name: name.clone(),
            declared: *declared,
            is_const: *is_const,
            is_owned: *is_owned,
            init: init.as_ref().map(|e| e.substitute(map)),
            resolved: *resolved,
            free_fn: free_fn.clone(),
        },
        StmtKind::Assign { name, value } => StmtKind::Assign {
            name: name.clone(),
            value: value.substitute(map),
        },
        StmtKind::Expr(e) => StmtKind::Expr(e.substitute(map)),
        StmtKind::Return(v) => StmtKind::Return(v.as_ref().map(|e| e.substitute(map))),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => StmtKind::If {
            cond: cond.substitute(map),
            then_body: then_body.iter().map(|s| subst_stmt(s, map)).collect(),
            else_body: else_body.iter().map(|s| subst_stmt(s, map)).collect(),
        },
        StmtKind::While { cond, body } => StmtKind::While {
            cond: cond.substitute(map),
            body: body.iter().map(|s| subst_stmt(s, map)).collect(),
        },
        StmtKind::For {
            var,
            start,
            stop,
            step,
            parallel,
            body,
        } => StmtKind::For {
            var: var.clone(),
            start: start.substitute(map),
            stop: stop.substitute(map),
            step: step.as_ref().map(|e| e.substitute(map)),
            parallel: *parallel,
            body: body.iter().map(|s| subst_stmt(s, map)).collect(),
        },
        StmtKind::FormatBlock { end_arg, body } => StmtKind::FormatBlock {
            end_arg: end_arg.as_ref().map(|e| e.substitute(map)),
            body: body.iter().map(|s| subst_stmt(s, map)).collect(),
        },
        StmtKind::Break => StmtKind::Break,
        StmtKind::Continue => StmtKind::Continue,
    };
    Stmt::new(kind, stmt.span)
}

// ── Tail-dead pruning ──

fn prune_tail_dead(body: &mut Vec<Stmt>) -> bool {
    let mut changed = false;
    for stmt in body.iter_mut() {
        match &mut stmt.kind {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                changed |= prune_tail_dead(then_body);
                changed |= prune_tail_dead(else_body);
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::FormatBlock { body, .. } => {
                changed |= prune_tail_dead(body);
            }
            _ => {}
        }
    }

    if let Some(pos) = body.iter().position(|s| {
        matches!(
            s.kind,
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue
        )
    }) {
        if pos + 1 < body.len() {
            body.truncate(pos + 1);
            changed = true;
        }
    }
    changed
}

// ── Helpers ──

fn for_each_expr(stmt: &mut Stmt, f: &mut impl FnMut(&mut Expr) -> bool) -> bool {
    let mut changed = false;
    match &mut stmt.kind {
        StmtKind::Declare { init, .. } => {
            if let Some(e) = init {
                changed |= f(e);
            }
        }
        StmtKind::Assign { value, .. } => changed |= f(value),
        StmtKind::Expr(e) => changed |= f(e),
        StmtKind::Return(v) => {
            if let Some(e) = v {
                changed |= f(e);
            }
        }
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            changed |= f(cond);
            for s in then_body.iter_mut().chain(else_body.iter_mut()) {
                changed |= for_each_expr(s, f);
            }
        }
        StmtKind::While { cond, body } => {
            changed |= f(cond);
            for s in body.iter_mut() {
                changed |= for_each_expr(s, f);
            }
        }
        StmtKind::For {
            start,
            stop,
            step,
            body,
            ..
        } => {
            changed |= f(start);
            changed |= f(stop);
            if let Some(e) = step {
                changed |= f(e);
            }
            for s in body.iter_mut() {
                changed |= for_each_expr(s, f);
            }
        }
        StmtKind::FormatBlock { end_arg, body } => {
            if let Some(e) = end_arg {
                changed |= f(e);
            }
            for s in body.iter_mut() {
                changed |= for_each_expr(s, f);
            }
        }
        StmtKind::Break | StmtKind::Continue => {}
    }
    changed
}

fn int_lit(v: i64, span: Span) -> Expr {
    Expr::int(v, span)
}

fn float_lit(v: f64, span: Span) -> Expr {
    let mut e = Expr::new(ExprKind::Float(v), span);
    e.inf = Type::F64;
    e.typed = true;
    e
}

fn bool_lit(v: bool, span: Span) -> Expr {
    let mut e = Expr::new(ExprKind::Bool(v), span);
    e.inf = Type::Bool;
    e.typed = true;
    e
}

fn clone_expr(e: &Expr) -> Expr {
    e.clone()
}

/// AtCoder-style floor sum, valid for a, b >= 0, m > 0.
fn floor_sum_euclid(mut n: i128, mut m: i128, mut a: i128, mut b: i128) -> Option<i128> {
    let mut ans: i128 = 0;
    loop {
        if a >= m {
            ans = ans.checked_add(
                (n.checked_mul(n.checked_sub(1)?)? / 2).checked_mul(a / m)?,
            )?;
            a %= m;
        }
        if b >= m {
            ans = ans.checked_add(n.checked_mul(b / m)?)?;
            b %= m;
        }
        let y_max = a.checked_mul(n)?.checked_add(b)?;
        if y_max < m {
            return Some(ans);
        }
        n = y_max / m;
        b = y_max % m;
        std::mem::swap(&mut m, &mut a);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescript_diag::DiagnosticBag;
    use linescript_lex::lex;
    use linescript_parse::{parse_program, SCRIPT_MAIN};
    use std::collections::HashMap;

    fn compile(source: &str) -> Program {
        let mut diag = DiagnosticBag::new(64);
        let tokens = lex(source, &mut diag);
        let mut program = parse_program(&tokens, &mut diag).expect("parse");
        linescript_sema::check(&mut program, false, &mut diag).expect("check");
        program
    }

    /// Minimal direct interpreter over i64 state, used as the oracle for
    /// differential tests against the closed forms.
    fn eval_block(stmts: &[Stmt], env: &mut HashMap<String, i64>) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Declare { name, init, .. } => {
                    let v = init.as_ref().map(|e| eval_expr(e, env)).unwrap_or(0);
                    env.insert(name.clone(), v);
                }
                StmtKind::Assign { name, value } => {
                    let v = eval_expr(value, env);
                    env.insert(name.clone(), v);
                }
                StmtKind::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    if eval_expr(cond, env) != 0 {
                        eval_block(then_body, env);
                    } else {
                        eval_block(else_body, env);
                    }
                }
                StmtKind::For {
                    var,
                    start,
                    stop,
                    step,
                    body,
                    ..
                } => {
                    let a = eval_expr(start, env);
                    let b = eval_expr(stop, env);
                    let s = step.as_ref().map(|e| eval_expr(e, env)).unwrap_or(1);
                    let mut i = a;
                    while (s > 0 && i < b) || (s < 0 && i > b) {
                        env.insert(var.clone(), i);
                        eval_block(body, env);
                        i += s;
                    }
                }
                StmtKind::Expr(_) => {}
                other => panic!("oracle does not evaluate {other:?}"),
            }
        }
    }

    fn eval_expr(expr: &Expr, env: &HashMap<String, i64>) -> i64 {
        match &expr.kind {
            ExprKind::Int(v) => *v,
            ExprKind::Bool(v) => *v as i64,
            ExprKind::Var(n) => *env.get(n).unwrap_or(&0),
            ExprKind::Unary { op: UnOp::Neg, operand, .. } => -eval_expr(operand, env),
            ExprKind::Unary { op: UnOp::Not, operand, .. } => {
                (eval_expr(operand, env) == 0) as i64
            }
            ExprKind::Binary { op, lhs, rhs, .. } => {
                let a = eval_expr(lhs, env);
                let b = eval_expr(rhs, env);
                match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    BinOp::Pow => int_pow(a, b).unwrap(),
                    BinOp::Eq => (a == b) as i64,
                    BinOp::Ne => (a != b) as i64,
                    BinOp::Lt => (a < b) as i64,
                    BinOp::Le => (a <= b) as i64,
                    BinOp::Gt => (a > b) as i64,
                    BinOp::Ge => (a >= b) as i64,
                    BinOp::And => ((a != 0) && (b != 0)) as i64,
                    BinOp::Or => ((a != 0) || (b != 0)) as i64,
                }
            }
            other => panic!("oracle does not evaluate {other:?}"),
        }
    }

    fn differential(source: &str, vars: &[&str]) {
        let reference = compile(source);
        let mut optimized = compile(source);
        optimize(&mut optimized, DEFAULT_PASSES);

        let ref_main = reference.function(SCRIPT_MAIN).expect("main");
        let opt_main = optimized.function(SCRIPT_MAIN).expect("main");

        let mut ref_env = HashMap::new();
        let mut opt_env = HashMap::new();
        eval_block(&ref_main.body, &mut ref_env);
        eval_block(&opt_main.body, &mut opt_env);

        for var in vars {
            assert_eq!(
                ref_env.get(*var),
                opt_env.get(*var),
                "variable `{var}` diverged for source:\n{source}"
            );
        }
    }

    fn has_for(body: &[Stmt]) -> bool {
        body.iter().any(|s| match &s.kind {
            StmtKind::For { .. } => true,
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => has_for(then_body) || has_for(else_body),
            StmtKind::While { body, .. } | StmtKind::FormatBlock { body, .. } => has_for(body),
            _ => false,
        })
    }

    #[test]
    fn constant_folding_reduces_arithmetic() {
        let mut program = compile("declare x = 1 + 2 * 3\n");
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Declare { init: Some(e), .. } = &main.body[0].kind else {
            panic!();
        };
        assert_eq!(e.as_int(), Some(7));
    }

    #[test]
    fn pow_folds_by_repeated_squaring_and_checks_overflow() {
        let mut program = compile("declare x = 2 ** 10\ndeclare y = 2 ** 63\nprintln(x)\nprintln(y)\n");
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Declare { init: Some(x), .. } = &main.body[0].kind else {
            panic!();
        };
        assert_eq!(x.as_int(), Some(1024));
        let StmtKind::Declare { init: Some(y), .. } = &main.body[1].kind else {
            panic!();
        };
        assert!(y.as_int().is_none(), "2**63 overflows and must not fold");
    }

    #[test]
    fn algebraic_identities_collapse() {
        // Two statements keep `f` out of the inlining set, so the calls
        // survive and only the identities fire.
        let mut program = compile(
            "fn f(v: i64) -> i64 {\n  declare t = v\n  return t\n}\ndeclare a = f(1) + 0\ndeclare b = 1 * f(2)\ndeclare c = f(3) / 1\nprintln(a + b + c)\n",
        );
        optimize(&mut program, 1);
        let main = program.function(SCRIPT_MAIN).unwrap();
        for idx in 0..3 {
            let StmtKind::Declare { init: Some(e), .. } = &main.body[idx].kind else {
                panic!();
            };
            assert!(
                matches!(&e.kind, ExprKind::Call { .. }),
                "identity should leave the bare call, got {:?}",
                e.kind
            );
        }
    }

    #[test]
    fn neg_override_disables_negation_folds() {
        let mut program = compile(
            "operator unary -(x: i64) -> i64 { return x * 2 }\ndeclare a = 5\ndeclare b = -a\nprintln(b)\n",
        );
        assert!(program.has_unary_neg_override);
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Declare { init: Some(e), .. } = &main.body[1].kind else {
            panic!();
        };
        assert!(
            matches!(&e.kind, ExprKind::Unary { .. }),
            "negation must survive when overridden, got {:?}",
            e.kind
        );
    }

    #[test]
    fn inlining_substitutes_single_return_functions() {
        let mut program = compile(
            "fn double(v: i64) -> i64 { return v * 2 }\ndeclare r = double(21)\nprintln(r)\n",
        );
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Declare { init: Some(e), .. } = &main.body[0].kind else {
            panic!();
        };
        assert_eq!(e.as_int(), Some(42), "inline + fold should leave a literal");
    }

    #[test]
    fn recursive_functions_are_not_inlined() {
        let mut program = compile(
            "fn rec(v: i64) -> i64 { return rec(v) }\ndeclare r = rec(1)\nprintln(r)\n",
        );
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Declare { init: Some(e), .. } = &main.body[0].kind else {
            panic!();
        };
        assert!(matches!(&e.kind, ExprKind::Call { name, .. } if name == "rec"));
    }

    #[test]
    fn dead_stores_are_removed() {
        let mut program = compile(
            "fn f() -> i64 {\n  declare unused = 3 + 4\n  declare kept = 5\n  return kept\n}\n",
        );
        optimize(&mut program, DEFAULT_PASSES);
        let f = program.function("f").unwrap();
        assert_eq!(f.body.len(), 2, "dead declare should vanish: {:?}", f.body);
    }

    #[test]
    fn owned_declares_survive_dead_store_elimination() {
        let mut program = compile("declare owned a = array_new()\nprintln(1)\n");
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        assert!(main
            .body
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Declare { is_owned: true, .. })));
    }

    #[test]
    fn const_prop_specializes_println() {
        let mut program = compile("declare x = 40\ndeclare y = x + 2\nprintln(y)\n");
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        let print = main
            .body
            .iter()
            .find_map(|s| match &s.kind {
                StmtKind::Expr(e) => match &e.kind {
                    ExprKind::Call { name, args } => Some((name.clone(), args.clone())),
                    _ => None,
                },
                _ => None,
            })
            .expect("print call");
        assert_eq!(print.0, "println_str");
        assert!(matches!(&print.1[0].kind, ExprKind::Str(s) if s == "42"));
    }

    #[test]
    fn zero_trip_loops_are_deleted() {
        let mut program = compile("declare s: i64 = 0\nfor i in 5..5 do\n  s = s + i\nend\nprintln(s)\n");
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        assert!(!has_for(&main.body), "zero-trip loop should be deleted");
    }

    #[test]
    fn affine_reduction_matches_scenario_c() {
        // declare s = 0; for i in 0..100 step 1 { s = s + (2*i + 3) } -> 10200
        let source =
            "declare s: i64 = 0\nfor i in 0..100 step 1 do\n  s = s + (2 * i + 3)\nend\n";
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        assert!(!has_for(&main.body), "loop should close-form");
        let mut env = HashMap::new();
        eval_block(&main.body, &mut env);
        assert_eq!(env.get("s"), Some(&10200));
    }

    #[test]
    fn pair_coupled_closed_form_matches_direct_execution() {
        let source = "declare acc: i64 = 0\ndeclare state: i64 = 0\nfor i in 0..5 step 1 do\n  acc = acc + state\n  state = state + (i + 1)\nend\n";
        // Direct execution: state reads 0,1,3,6,10 -> acc 20, state 15.
        differential(source, &["acc", "state"]);
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        assert!(!has_for(&main.body), "pair-coupled loop should close-form");
        let mut env = HashMap::new();
        eval_block(&main.body, &mut env);
        assert_eq!(env.get("acc"), Some(&20));
        assert_eq!(env.get("state"), Some(&15));
    }

    #[test]
    fn differential_pair_coupled_over_ranges() {
        for (a, b, s) in [(0_i64, 5_i64, 1_i64), (0, 40, 1), (2, 29, 3), (10, -10, -2)] {
            let source = format!(
                "declare acc: i64 = 0\ndeclare state: i64 = 0\nfor i in {a}..{b} step {s} do\n  acc = acc + state\n  state = state + (2 * i + 1)\nend\n"
            );
            differential(&source, &["acc", "state"]);
        }
    }

    #[test]
    fn differential_affine_over_ranges() {
        for (a, b, s) in [
            (0_i64, 100_i64, 1_i64),
            (5, 100, 7),
            (100, 0, -3),
            (0, 0, 1),
            (10, 5, 2),
            (-20, 20, 3),
        ] {
            let source = format!(
                "declare s: i64 = 0\nfor i in {a}..{b} step {s} do\n  s = s + (2 * i + 3)\nend\n"
            );
            differential(&source, &["s"]);
        }
    }

    #[test]
    fn differential_multi_affine() {
        let source = "declare x: i64 = 0\ndeclare y: i64 = 100\nfor i in 0..50 do\n  x = x + i\n  y = y - (3 * i + 1)\nend\n";
        differential(source, &["x", "y"]);
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        assert!(!has_for(&program.function(SCRIPT_MAIN).unwrap().body));
    }

    #[test]
    fn differential_bilinear_nested() {
        let source = "declare s: i64 = 0\nfor i in 0..12 do\n  for j in 0..9 do\n    s = s + (i * j + 2 * i + j + 1)\n  end\nend\n";
        differential(source, &["s"]);
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        assert!(!has_for(&program.function(SCRIPT_MAIN).unwrap().body));
    }

    #[test]
    fn differential_alternating() {
        for (a, b, s) in [(0_i64, 10_i64, 1_i64), (0, 11, 1), (1, 20, 1), (0, 30, 2), (5, 50, 3)] {
            let source = format!(
                "declare x: i64 = 0\nfor i in {a}..{b} step {s} do\n  if i % 2 == 0 {{\n    x = x + i\n  }} else {{\n    x = x - i\n  }}\nend\n"
            );
            differential(&source, &["x"]);
        }
    }

    #[test]
    fn differential_modular_linear() {
        for (a, b, m) in [(3_i64, 2_i64, 7_i64), (5, 11, 13), (1, 0, 2)] {
            let source = format!(
                "declare acc: i64 = 0\nfor i in 0..200 do\n  acc = acc + (({a} * i + {b}) % {m})\nend\n"
            );
            differential(&source, &["acc"]);
            let mut program = compile(&source);
            optimize(&mut program, DEFAULT_PASSES);
            assert!(
                !has_for(&program.function(SCRIPT_MAIN).unwrap().body),
                "modular loop should close-form"
            );
        }
    }

    #[test]
    fn differential_polynomial_degree_two() {
        for (a, b, s) in [(0_i64, 40_i64, 1_i64), (2, 31, 3), (10, -10, -2)] {
            let source = format!(
                "declare p: i64 = 0\nfor i in {a}..{b} step {s} do\n  p = p + (i * i + 3 * i + 2)\nend\n"
            );
            differential(&source, &["p"]);
        }
    }

    #[test]
    fn short_trips_unroll() {
        let source = "declare s: i64 = 0\nfor i in 0..4 do\n  s = s + i * i * i\nend\n";
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        let main = program.function(SCRIPT_MAIN).unwrap();
        assert!(!has_for(&main.body), "short trip should unroll");
        let mut env = HashMap::new();
        eval_block(&main.body, &mut env);
        assert_eq!(env.get("s"), Some(&36));
    }

    #[test]
    fn loops_with_calls_are_left_alone() {
        let source = "declare s: i64 = 0\nfor i in 0..100 do\n  s = s + clock_ms()\nend\nprintln(s)\n";
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        assert!(has_for(&program.function(SCRIPT_MAIN).unwrap().body));
    }

    #[test]
    fn overflowing_closed_forms_abandon() {
        // The affine sum over this range exceeds i64; the loop must remain.
        let source = "declare s: i64 = 0\nfor i in 0..9000000000000000000 step 1 do\n  s = s + (2 * i + 3)\nend\nprintln(s)\n";
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        assert!(has_for(&program.function(SCRIPT_MAIN).unwrap().body));
    }

    #[test]
    fn bounds_through_declared_constants_resolve() {
        let source = "declare lo: i64 = 2\ndeclare hi: i64 = 60\ndeclare s: i64 = 0\nfor i in lo..hi do\n  s = s + i\nend\n";
        differential(source, &["s"]);
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        assert!(!has_for(&program.function(SCRIPT_MAIN).unwrap().body));
    }

    #[test]
    fn reassigned_bounds_do_not_resolve() {
        let source = "declare hi: i64 = 60\nhi = hi + 1\ndeclare s: i64 = 0\nfor i in 0..hi do\n  s = s + i\nend\nprintln(s)\n";
        let mut program = compile(source);
        // Constant propagation may still see through this; force the loop
        // check only: disable by running a single reduce pass on a fresh
        // parse where const-prop has not run.
        let main_body = &mut program
            .functions
            .iter_mut()
            .find(|f| f.symbol == SCRIPT_MAIN)
            .unwrap()
            .body;
        let changed = reduce_loops_block(main_body, true);
        assert!(!changed, "reassigned bound must not be treated as constant");
    }

    #[test]
    fn tail_dead_statements_are_pruned() {
        let mut program = compile(
            "fn f() -> i64 {\n  return 1\n  println(2)\n  return 3\n}\n",
        );
        optimize(&mut program, DEFAULT_PASSES);
        let f = program.function("f").unwrap();
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn parallel_loops_are_never_closed_formed() {
        let source = "parallel for i in 0..100 do\n  declare t = 2 * i\n  println(t)\nend\n";
        let mut program = compile(source);
        optimize(&mut program, DEFAULT_PASSES);
        assert!(has_for(&program.function(SCRIPT_MAIN).unwrap().body));
    }

    #[test]
    fn floor_sum_matches_naive() {
        for (n, m, a, b) in [(10_i128, 7_i128, 3_i128, 2_i128), (200, 13, 5, 11), (1, 2, 0, 0)] {
            let naive: i128 = (0..n).map(|k| (a * k + b) / m).sum();
            assert_eq!(floor_sum_euclid(n, m, a, b), Some(naive));
        }
    }
}
