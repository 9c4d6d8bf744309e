//! LineScript AST types and span infrastructure.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ── Span infrastructure ──

/// Source position, 1-based line and column over the concatenated program.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    pub fn dummy() -> Self {
        Self { line: 0, col: 0 }
    }
}

// ── Primitive types ──

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Type {
    I32,
    I64,
    F32,
    F64,
    Bool,
    Str,
    Void,
}

impl Type {
    pub fn is_int(self) -> bool {
        matches!(self, Type::I32 | Type::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_int() || self.is_float()
    }

    pub fn is_printable(self) -> bool {
        self != Type::Void
    }

    pub fn from_name(name: &str) -> Option<Type> {
        Some(match name {
            "i32" => Type::I32,
            "i64" => Type::I64,
            "f32" => Type::F32,
            "f64" => Type::F64,
            "bool" => Type::Bool,
            "str" => Type::Str,
            "void" => Type::Void,
            _ => return None,
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Bool => "bool",
            Type::Str => "str",
            Type::Void => "void",
        };
        f.write_str(name)
    }
}

// ── Operators ──

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
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

    /// Short name used for free operator-overload symbols (`__ls_op_<name>`).
    pub fn overload_name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Pow => "pow",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
        }
    }

    pub fn overload_name(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        }
    }
}

// ── Expression IR ──

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Inferred type; meaningful only once `typed` is set.
    pub inf: Type,
    pub typed: bool,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Var(String),
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        /// Resolved member/free operator overload, when one applies.
        override_fn: Option<String>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        override_fn: Option<String>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            inf: Type::Void,
            typed: false,
        }
    }

    pub fn int(value: i64, span: Span) -> Self {
        let mut e = Self::new(ExprKind::Int(value), span);
        e.inf = Type::I64;
        e.typed = true;
        e
    }

    pub fn str_lit(value: impl Into<String>, span: Span) -> Self {
        let mut e = Self::new(ExprKind::Str(value.into()), span);
        e.inf = Type::Str;
        e.typed = true;
        e
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>, span: Span) -> Self {
        Self::new(
            ExprKind::Call {
                name: name.into(),
                args,
            },
            span,
        )
    }

    pub fn var(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Var(name.into()), span)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_)
        )
    }

    /// Recursively clone with variable references replaced from `map`.
    /// Substitution produces a fresh subtree; nothing is shared with `self`.
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        match &self.kind {
            ExprKind::Var(name) => {
                if let Some(replacement) = map.get(name) {
                    return replacement.clone();
                }
                self.clone()
            }
            ExprKind::Unary {
                op,
                operand,
                override_fn,
            } => Expr {
                kind: ExprKind::Unary {
                    op: *op,
                    operand: Box::new(operand.substitute(map)),
                    override_fn: override_fn.clone(),
                },
                span: self.span,
                inf: self.inf,
                typed: false,
            },
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                override_fn,
            } => Expr {
                kind: ExprKind::Binary {
                    op: *op,
                    lhs: Box::new(lhs.substitute(map)),
                    rhs: Box::new(rhs.substitute(map)),
                    override_fn: override_fn.clone(),
                },
                span: self.span,
                inf: self.inf,
                typed: false,
            },
            ExprKind::Call { name, args } => Expr {
                kind: ExprKind::Call {
                    name: name.clone(),
                    args: args.iter().map(|a| a.substitute(map)).collect(),
                },
                span: self.span,
                inf: self.inf,
                typed: false,
            },
            _ => self.clone(),
        }
    }

    /// Variable names referenced anywhere in the expression.
    pub fn referenced_vars(&self, out: &mut Vec<String>) {
        match &self.kind {
            ExprKind::Var(name) => out.push(name.clone()),
            ExprKind::Unary { operand, .. } => operand.referenced_vars(out),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.referenced_vars(out);
                rhs.referenced_vars(out);
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.referenced_vars(out);
                }
            }
            _ => {}
        }
    }

    pub fn contains_call(&self) -> bool {
        match &self.kind {
            ExprKind::Call { .. } => true,
            ExprKind::Unary { operand, .. } => operand.contains_call(),
            ExprKind::Binary { lhs, rhs, .. } => lhs.contains_call() || rhs.contains_call(),
            _ => false,
        }
    }
}

// ── Statement IR ──

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Declare {
        name: String,
        declared: Option<Type>,
        is_const: bool,
        is_owned: bool,
        init: Option<Expr>,
        /// Filled by the type checker.
        resolved: Type,
        /// Free function for owned handles, resolved by the checker.
        free_fn: Option<String>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        start: Expr,
        stop: Expr,
        step: Option<Expr>,
        parallel: bool,
        body: Vec<Stmt>,
    },
    FormatBlock {
        end_arg: Option<Expr>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
}

// ── Function IR ──

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OperatorKind {
    Binary(BinOp),
    Unary(UnOp),
}

#[derive(Clone, Debug)]
pub struct Function {
    /// Emitted symbol, possibly mangled for overloading.
    pub symbol: String,
    /// User-visible name for diagnostics and overload grouping.
    pub source_name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub throws: Vec<String>,
    pub body: Vec<Stmt>,
    pub is_extern: bool,
    pub is_inline: bool,
    pub cli_flag: bool,
    /// Owning class for methods; constructors use their class here too.
    pub method_of: Option<String>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub operator: Option<OperatorKind>,
    pub span: Span,
}

impl Function {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        let name = name.into();
        Self {
            symbol: name.clone(),
            source_name: name,
            params: Vec::new(),
            ret: Type::Void,
            throws: Vec::new(),
            body: Vec::new(),
            is_extern: false,
            is_inline: false,
            cli_flag: false,
            method_of: None,
            is_static: false,
            is_virtual: false,
            is_override: false,
            is_final: false,
            operator: None,
            span,
        }
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|p| p.ty).collect()
    }
}

// ── Class info ──

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Access {
    Public,
    Protected,
    Private,
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
    pub access: Access,
    pub owner: String,
    pub is_const: bool,
    pub init: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct MethodSig {
    pub symbol: String,
    pub owner: String,
    pub access: Access,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    /// Insertion-ordered; constructor synthesis walks fields in source order.
    pub fields: Vec<FieldInfo>,
    pub methods: BTreeMap<String, Vec<MethodSig>>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            fields: Vec::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ── Macros ──

/// Parameter/return kinds a macro may declare. Only `Expr` is usable;
/// `Stmt`/`Item` parse but are rejected at expansion.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MacroKind {
    Expr,
    Stmt,
    Item,
}

impl MacroKind {
    pub fn from_name(name: &str) -> Option<MacroKind> {
        Some(match name {
            "expr" => MacroKind::Expr,
            "stmt" => MacroKind::Stmt,
            "item" => MacroKind::Item,
            _ => return None,
        })
    }
}

/// Expression macro template; expansion is hygiene-free AST substitution.
#[derive(Clone, Debug)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<(String, MacroKind)>,
    pub ret_kind: MacroKind,
    pub body: Expr,
    pub span: Span,
}

// ── Program ──

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub classes: BTreeMap<String, ClassInfo>,
    pub macros: BTreeMap<String, MacroDef>,
    /// Set when the program overrides unary negation; disables optimizer
    /// rewrites that would change `-x` semantics.
    pub has_unary_neg_override: bool,
}

impl Program {
    pub fn function(&self, symbol: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.symbol == symbol)
    }

    /// All functions sharing a user-visible name, in declaration order.
    pub fn overload_group(&self, source_name: &str) -> Vec<&Function> {
        self.functions
            .iter()
            .filter(|f| f.source_name == source_name && f.method_of.is_none())
            .collect()
    }

    /// Walk the class chain looking up a method overload list.
    pub fn class_methods(&self, class: &str, method: &str) -> Option<&Vec<MethodSig>> {
        let mut current = Some(class);
        while let Some(name) = current {
            let info = self.classes.get(name)?;
            if let Some(sigs) = info.methods.get(method) {
                return Some(sigs);
            }
            current = info.base.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_parameters_and_clones_subtrees() {
        let span = Span::new(3, 7);
        let body = Expr::new(
            ExprKind::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::var("x", span)),
                rhs: Box::new(Expr::int(1, span)),
                override_fn: None,
            },
            span,
        );

        let mut map = HashMap::new();
        map.insert("x".to_string(), Expr::int(41, span));
        let expanded = body.substitute(&map);

        match expanded.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                assert_eq!(lhs.as_int(), Some(41));
                assert_eq!(rhs.as_int(), Some(1));
            }
            other => panic!("expected binary node, got {other:?}"),
        }
        // The template itself is untouched.
        match body.kind {
            ExprKind::Binary { lhs, .. } => {
                assert!(matches!(lhs.kind, ExprKind::Var(ref n) if n == "x"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn overload_group_excludes_methods_with_same_source_name() {
        let span = Span::dummy();
        let mut program = Program::default();
        program.functions.push(Function::new("area", span));
        let mut method = Function::new("area", span);
        method.method_of = Some("Circle".to_string());
        method.symbol = "__ls_m_Circle_area".to_string();
        program.functions.push(method);

        let group = program.overload_group("area");
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].symbol, "area");
    }

    #[test]
    fn class_method_lookup_walks_base_chain() {
        let mut program = Program::default();
        let mut base = ClassInfo::new("Shape");
        base.methods.insert(
            "name".to_string(),
            vec![MethodSig {
                symbol: "__ls_m_Shape_name".to_string(),
                owner: "Shape".to_string(),
                access: Access::Public,
                is_static: false,
                is_virtual: true,
                is_override: false,
                is_final: false,
                params: vec![Type::I64],
                ret: Type::Str,
            }],
        );
        let mut derived = ClassInfo::new("Circle");
        derived.base = Some("Shape".to_string());
        program.classes.insert("Shape".to_string(), base);
        program.classes.insert("Circle".to_string(), derived);

        let sigs = program
            .class_methods("Circle", "name")
            .expect("method should resolve through the base class");
        assert_eq!(sigs[0].owner, "Shape");
    }
}
