//! LineScript recursive-descent parser.
//!
//! The parser owns a large share of the language semantics: class member
//! access is rewritten into `object_get`/`object_set` calls, methods and
//! member operators resolve to mangled symbols, constructors are synthesized,
//! macros expand, and `delete` lowers to the matching free call. Syntax
//! errors are fatal; there is no recovery.

use linescript_ast::{
    Access, BinOp, ClassInfo, Expr, ExprKind, FieldInfo, Function, MacroDef, MacroKind, MethodSig,
    OperatorKind, Param, Program, Span, Stmt, StmtKind, Type, UnOp,
};
use linescript_diag::{codes, Diagnostic, DiagnosticBag};
use linescript_lex::{Token, TokenKind};
use std::collections::HashMap;

/// Name of the function synthesized from top-level statements.
pub const SCRIPT_MAIN: &str = "__linescript_script_main";

/// Constructor -> free function table used for `delete` defaults. The type
/// checker keeps its own copy for owned-handle validation.
pub fn ctor_free_fn(ctor: &str) -> Option<&'static str> {
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

#[allow(clippy::result_unit_err)]
pub fn parse_program(tokens: &[Token], diag: &mut DiagnosticBag) -> Result<Program, ()> {
    let before = diag.error_count();
    let mut parser = Parser::new(tokens, diag);
    let program = parser.parse_program();
    if parser.diag.error_count() > before {
        Err(())
    } else {
        program.ok_or(())
    }
}

const ASSIGN_OPS: [(TokenKind, Option<BinOp>); 7] = [
    (TokenKind::Assign, None),
    (TokenKind::PlusEq, Some(BinOp::Add)),
    (TokenKind::MinusEq, Some(BinOp::Sub)),
    (TokenKind::StarEq, Some(BinOp::Mul)),
    (TokenKind::SlashEq, Some(BinOp::Div)),
    (TokenKind::PercentEq, Some(BinOp::Mod)),
    (TokenKind::PowEq, Some(BinOp::Pow)),
];

struct Parser<'a, 'd> {
    tokens: &'a [Token],
    pos: usize,
    diag: &'d mut DiagnosticBag,
    program: Program,
    overload_counts: HashMap<String, usize>,
    script_stmts: Vec<Stmt>,
    /// Variable -> class name, for member-access rewriting.
    var_classes: HashMap<String, String>,
    /// Variable -> constructor call name, for `delete` lowering.
    var_ctors: HashMap<String, String>,
    current_class: Option<String>,
    fallback_eof: Token,
}

impl<'a, 'd> Parser<'a, 'd> {
    fn new(tokens: &'a [Token], diag: &'d mut DiagnosticBag) -> Self {
        Self {
            tokens,
            pos: 0,
            diag,
            program: Program::default(),
            overload_counts: HashMap::new(),
            script_stmts: Vec::new(),
            var_classes: HashMap::new(),
            var_ctors: HashMap::new(),
            current_class: None,
            fallback_eof: Token {
                kind: TokenKind::Eof,
                span: Span::new(0, 0),
                text: String::new(),
            },
        }
    }

    fn parse_program(&mut self) -> Option<Program> {
        while !self.at(TokenKind::Eof) {
            self.skip_separators();
            if self.at(TokenKind::Eof) {
                break;
            }

            let result = match self.peek().kind {
                TokenKind::Macro => self.parse_macro_def(),
                TokenKind::Class => self.parse_class(),
                TokenKind::Operator => self.parse_free_operator(),
                TokenKind::Flag
                | TokenKind::Extern
                | TokenKind::Inline
                | TokenKind::Fn
                | TokenKind::Func => self.parse_function(),
                TokenKind::Ident if self.looks_like_fn_decl() => self.parse_function(),
                _ => self.parse_script_stmt(),
            };

            if result.is_err() {
                return None;
            }
        }

        if !self.script_stmts.is_empty() {
            let mut main = Function::new(SCRIPT_MAIN, Span::new(1, 1));
            main.body = std::mem::take(&mut self.script_stmts);
            self.program.functions.push(main);
        }

        Some(std::mem::take(&mut self.program))
    }

    fn parse_script_stmt(&mut self) -> Result<(), ()> {
        let stmt = self.parse_stmt()?;
        self.expect_terminator()?;
        self.script_stmts.push(stmt);
        Ok(())
    }

    // ── Function declarations ──

    /// Lookahead deciding whether `name(...)` opens a declaration rather
    /// than a call statement: skip modifiers, optional `fn`/`func`, the
    /// name and a balanced parameter list (newlines allowed inside), then
    /// accept on `->`, `throws`, `do`, `{`, or `;`/newline after `extern`.
    fn looks_like_fn_decl(&self) -> bool {
        let mut i = self.pos;
        let mut saw_extern = false;
        loop {
            match self.kind_at(i) {
                TokenKind::Extern => {
                    saw_extern = true;
                    i += 1;
                }
                TokenKind::Inline
                | TokenKind::Flag
                | TokenKind::Public
                | TokenKind::Protected
                | TokenKind::Private
                | TokenKind::Static
                | TokenKind::Virtual
                | TokenKind::Override
                | TokenKind::Final => i += 1,
                _ => break,
            }
        }
        if matches!(self.kind_at(i), TokenKind::Fn | TokenKind::Func) {
            return true;
        }
        if self.kind_at(i) != TokenKind::Ident {
            return false;
        }
        i += 1;
        if self.kind_at(i) != TokenKind::LParen {
            return false;
        }
        let mut depth = 0_i32;
        while i < self.tokens.len() {
            match self.kind_at(i) {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        i += 1;
                        break;
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        match self.kind_at(i) {
            TokenKind::Arrow | TokenKind::Throws | TokenKind::Do | TokenKind::LBrace => true,
            TokenKind::Semi | TokenKind::Newline | TokenKind::Eof => saw_extern,
            _ => false,
        }
    }

    fn parse_function(&mut self) -> Result<(), ()> {
        let span = self.peek().span;
        let mut is_extern = false;
        let mut is_inline = false;
        let mut is_flag = false;
        loop {
            match self.peek().kind {
                TokenKind::Extern => {
                    is_extern = true;
                    self.advance();
                }
                TokenKind::Inline => {
                    is_inline = true;
                    self.advance();
                }
                TokenKind::Flag => {
                    is_flag = true;
                    self.advance();
                }
                _ => break,
            }
        }
        if is_flag && (is_extern || is_inline) {
            return self.error_at(
                span,
                codes::LSP0004,
                "`flag` cannot combine with `extern` or `inline`.",
            );
        }
        if is_extern && is_inline {
            return self.error_at(
                span,
                codes::LSP0004,
                "`extern` and `inline` cannot combine.",
            );
        }

        if is_flag {
            return self.parse_flag_fn(span);
        }

        if matches!(self.peek().kind, TokenKind::Fn | TokenKind::Func) {
            self.advance();
        }
        let name = self.expect_ident("function name")?;

        let mut func = Function::new(name.clone(), span);
        func.is_extern = is_extern;
        func.is_inline = is_inline;

        let saved = self.enter_fn_scope();
        func.params = self.parse_params()?;
        if self.eat(TokenKind::Arrow).is_some() {
            let (ty, _) = self.parse_type_name()?;
            func.ret = ty;
        }
        if self.eat(TokenKind::Throws).is_some() {
            func.throws = self.parse_throws_list()?;
        }

        if is_extern {
            self.expect_terminator()?;
        } else {
            func.body = self.parse_block()?;
        }
        self.leave_fn_scope(saved);

        self.register_overload(func);
        Ok(())
    }

    fn parse_flag_fn(&mut self, span: Span) -> Result<(), ()> {
        let mut name = self.expect_ident("flag name")?;
        while self.at(TokenKind::Minus) && self.kind_at(self.pos + 1) == TokenKind::Ident {
            self.advance();
            let seg = self.advance().text;
            name.push('-');
            name.push_str(&seg);
        }

        self.expect(TokenKind::LParen)?;
        if !self.at(TokenKind::RParen) {
            return self.error_here(codes::LSP0006, "A `flag` function takes no parameters.");
        }
        self.advance();

        let saved = self.enter_fn_scope();
        let body = self.parse_block()?;
        self.leave_fn_scope(saved);

        let mut func = Function::new(name.clone(), span);
        func.symbol = format!("__ls_flag_{}", name.replace('-', "_"));
        func.cli_flag = true;
        func.body = body;
        if self.program.functions.iter().any(|f| f.symbol == func.symbol) {
            return self.error_at(span, codes::LSP0003, format!("Duplicate flag `{name}`."));
        }
        self.program.functions.push(func);
        Ok(())
    }

    fn register_overload(&mut self, mut func: Function) {
        let count = self
            .overload_counts
            .entry(func.source_name.clone())
            .or_insert(0);
        *count += 1;
        if *count > 1 {
            // Operator symbols are already `__ls_op_*`; suffix those instead
            // of re-mangling a source name that is not a C identifier.
            func.symbol = if func.operator.is_some() {
                format!("{}_{}", func.symbol, *count)
            } else {
                format!("__ls_ovl_{}_{}", func.source_name, *count)
            };
        }
        self.program.functions.push(func);
    }

    // ── Operator overloads ──

    fn parse_free_operator(&mut self) -> Result<(), ()> {
        let span = self.peek().span;
        self.advance(); // operator
        let op = self.parse_operator_kind()?;

        let name = match op {
            OperatorKind::Binary(b) => b.overload_name(),
            OperatorKind::Unary(u) => u.overload_name(),
        };
        let mut func = Function::new(format!("operator {name}"), span);
        func.symbol = format!("__ls_op_{name}");
        func.operator = Some(op);

        let saved = self.enter_fn_scope();
        func.params = self.parse_params()?;
        let expected_arity = match op {
            OperatorKind::Binary(_) => 2,
            OperatorKind::Unary(_) => 1,
        };
        if func.params.len() != expected_arity {
            self.leave_fn_scope(saved);
            return self.error_at(
                span,
                codes::LSP0005,
                format!(
                    "Operator overload `{}` takes {} parameter(s), got {}.",
                    name,
                    expected_arity,
                    func.params.len()
                ),
            );
        }
        self.expect(TokenKind::Arrow)?;
        let (ret, _) = self.parse_type_name()?;
        if ret == Type::Void {
            self.leave_fn_scope(saved);
            return self.error_at(
                span,
                codes::LSP0005,
                "Operator overloads must return a value.",
            );
        }
        func.ret = ret;
        if self.at(TokenKind::Throws) {
            self.leave_fn_scope(saved);
            return self.error_at(span, codes::LSP0005, "Operator overloads cannot throw.");
        }
        func.body = self.parse_block()?;
        self.leave_fn_scope(saved);

        if matches!(op, OperatorKind::Unary(UnOp::Neg)) {
            self.program.has_unary_neg_override = true;
        }
        self.register_overload(func);
        Ok(())
    }

    fn parse_operator_kind(&mut self) -> Result<OperatorKind, ()> {
        if self.eat(TokenKind::Unary).is_some() {
            let kind = match self.peek().kind {
                TokenKind::Minus => UnOp::Neg,
                TokenKind::Bang => UnOp::Not,
                _ => {
                    return self
                        .error_here(codes::LSP0005, "Expected unary operator (`-` or `!`).")
                }
            };
            self.advance();
            return Ok(OperatorKind::Unary(kind));
        }
        let kind = match self.peek().kind {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::StarStar => BinOp::Pow,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::BangEq => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::AndAnd => BinOp::And,
            TokenKind::OrOr => BinOp::Or,
            _ => return self.error_here(codes::LSP0005, "Expected overloadable operator."),
        };
        self.advance();
        Ok(OperatorKind::Binary(kind))
    }

    // ── Macros ──

    fn parse_macro_def(&mut self) -> Result<(), ()> {
        let span = self.peek().span;
        self.advance(); // macro
        let name = self.expect_ident("macro name")?;
        if self.program.macros.contains_key(&name) {
            return self.error_at(span, codes::LSP0003, format!("Duplicate macro `{name}`."));
        }

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        while !self.at(TokenKind::RParen) {
            let pname = self.expect_ident("macro parameter")?;
            self.expect(TokenKind::Colon)?;
            let kind_span = self.peek().span;
            let kind_name = self.expect_ident("macro parameter kind")?;
            let Some(kind) = MacroKind::from_name(&kind_name) else {
                return self.error_at(
                    kind_span,
                    codes::LSP0007,
                    format!("Unknown macro kind `{kind_name}`."),
                );
            };
            params.push((pname, kind));
            self.skip_newlines();
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let ret_span = self.peek().span;
        let ret_name = self.expect_ident("macro return kind")?;
        let Some(ret_kind) = MacroKind::from_name(&ret_name) else {
            return self.error_at(
                ret_span,
                codes::LSP0007,
                format!("Unknown macro kind `{ret_name}`."),
            );
        };

        let open = self.open_block()?;
        self.skip_separators();
        let body = self.parse_expr()?;
        self.skip_separators();
        self.close_block(open)?;

        self.program.macros.insert(
            name.clone(),
            MacroDef {
                name,
                params,
                ret_kind,
                body,
                span,
            },
        );
        Ok(())
    }

    fn parse_expand(&mut self) -> Result<Expr, ()> {
        let span = self.peek().span;
        self.advance(); // expand
        self.expect(TokenKind::LParen)?;
        let name = self.expect_ident("macro name")?;
        let args = self.parse_call_args()?;
        self.expect(TokenKind::RParen)?;

        let Some(def) = self.program.macros.get(&name).cloned() else {
            return self.error_at(span, codes::LST0001, format!("Unknown macro `{name}`."));
        };
        if def.ret_kind != MacroKind::Expr {
            return self.error_at(
                span,
                codes::LSP0007,
                format!("Macro `{name}` has a non-`expr` return kind; only `expr` macros can expand."),
            );
        }
        if let Some((pname, _)) = def.params.iter().find(|(_, k)| *k != MacroKind::Expr) {
            return self.error_at(
                span,
                codes::LSP0007,
                format!("Macro parameter `{pname}` has a non-`expr` kind; only `expr` parameters are supported."),
            );
        }
        if def.params.len() != args.len() {
            return self.error_at(
                span,
                codes::LST0002,
                format!(
                    "Macro `{}` takes {} argument(s), got {}.",
                    name,
                    def.params.len(),
                    args.len()
                ),
            );
        }

        let mut map = HashMap::new();
        for ((pname, _), arg) in def.params.iter().zip(args) {
            map.insert(pname.clone(), arg);
        }
        Ok(def.body.substitute(&map))
    }

    // ── Classes ──

    fn parse_class(&mut self) -> Result<(), ()> {
        let span = self.peek().span;
        self.advance(); // class
        let name = self.expect_ident("class name")?;
        if self.program.classes.contains_key(&name) {
            return self.error_at(span, codes::LSP0003, format!("Duplicate class `{name}`."));
        }

        let mut info = ClassInfo::new(name.clone());
        if self.eat(TokenKind::Extends).is_some() {
            let base_span = self.peek().span;
            let base = self.expect_ident("base class name")?;
            if !self.program.classes.contains_key(&base) {
                return self.error_at(
                    base_span,
                    codes::LST0001,
                    format!("Unknown base class `{base}`."),
                );
            }
            info.base = Some(base);
        }
        self.program.classes.insert(name.clone(), info);
        self.current_class = Some(name.clone());

        let open = self.open_block()?;
        let mut saw_method = false;
        let mut saw_ctor = false;
        loop {
            self.skip_separators();
            if self.at_block_close(open) || self.at(TokenKind::Eof) {
                break;
            }

            let access = self.parse_access_modifier();
            if self.at(TokenKind::Declare) {
                if saw_method {
                    let result =
                        self.error_here(codes::LSP0001, "Fields must precede methods.");
                    self.current_class = None;
                    return result;
                }
                if self.parse_class_field(&name, access).is_err() {
                    self.current_class = None;
                    return Err(());
                }
            } else {
                saw_method = true;
                match self.parse_class_method(&name, access, &mut saw_ctor) {
                    Ok(()) => {}
                    Err(()) => {
                        self.current_class = None;
                        return Err(());
                    }
                }
            }
        }
        let close_result = self.close_block(open);
        self.current_class = None;
        close_result?;

        if !saw_ctor {
            self.synthesize_constructor(&name, Vec::new(), None, Vec::new(), span)?;
        }
        Ok(())
    }

    fn parse_access_modifier(&mut self) -> Access {
        match self.peek().kind {
            TokenKind::Public => {
                self.advance();
                Access::Public
            }
            TokenKind::Protected => {
                self.advance();
                Access::Protected
            }
            TokenKind::Private => {
                self.advance();
                Access::Private
            }
            _ => Access::Public,
        }
    }

    fn parse_class_field(&mut self, class: &str, access: Access) -> Result<(), ()> {
        self.advance(); // declare
        let is_const = self.eat(TokenKind::Const).is_some();
        let _ = self.eat(TokenKind::Owned);
        let fspan = self.peek().span;
        let fname = self.expect_ident("field name")?;
        self.expect(TokenKind::Colon)?;
        let (ty, field_class) = self.parse_type_name()?;
        let init = if self.eat(TokenKind::Assign).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_terminator()?;

        let info = self.program.classes.get_mut(class).expect("class registered");
        if info.field(&fname).is_some() {
            return self.error_at(
                fspan,
                codes::LSP0003,
                format!("Duplicate field `{fname}` in class `{class}`."),
            );
        }
        info.fields.push(FieldInfo {
            name: fname,
            ty,
            access,
            owner: class.to_string(),
            is_const,
            init,
        });
        let _ = field_class;
        Ok(())
    }

    fn parse_class_method(
        &mut self,
        class: &str,
        access: Access,
        saw_ctor: &mut bool,
    ) -> Result<(), ()> {
        let span = self.peek().span;
        let mut is_static = false;
        let mut is_virtual = false;
        let mut is_override = false;
        let mut is_final = false;
        loop {
            match self.peek().kind {
                TokenKind::Static => {
                    is_static = true;
                    self.advance();
                }
                TokenKind::Virtual => {
                    is_virtual = true;
                    self.advance();
                }
                TokenKind::Override => {
                    is_override = true;
                    self.advance();
                }
                TokenKind::Final => {
                    is_final = true;
                    self.advance();
                }
                _ => break,
            }
        }
        if is_virtual && is_static {
            return self.error_at(span, codes::LSP0004, "`static` methods cannot be `virtual`.");
        }

        // Constructor forms: `constructor(...)` or `<ClassName>(...)`.
        let is_ctor = self.at(TokenKind::Constructor)
            || (self.at(TokenKind::Ident) && self.peek().text == class);
        if is_ctor {
            if is_static || is_virtual || is_override || is_final {
                return self.error_at(
                    span,
                    codes::LSP0004,
                    "Constructors take no method modifiers.",
                );
            }
            if *saw_ctor {
                return self.error_at(
                    span,
                    codes::LSP0003,
                    format!("Class `{class}` already has a constructor."),
                );
            }
            *saw_ctor = true;
            return self.parse_constructor(class, span);
        }

        if self.at(TokenKind::Operator) {
            return self.parse_member_operator(class, access, span);
        }

        if matches!(self.peek().kind, TokenKind::Fn | TokenKind::Func) {
            self.advance();
        }
        let name = self.expect_ident("method name")?;

        let saved = self.enter_fn_scope();
        if !is_static {
            self.var_classes
                .insert("this".to_string(), class.to_string());
        }
        let mut params = self.parse_params()?;
        let mut ret = Type::Void;
        if self.eat(TokenKind::Arrow).is_some() {
            let (ty, _) = self.parse_type_name()?;
            ret = ty;
        }
        let mut throws = Vec::new();
        if self.eat(TokenKind::Throws).is_some() {
            throws = self.parse_throws_list()?;
        }

        // Override/final validation against the base chain.
        if is_override {
            match self.find_base_method(class, &name) {
                Some(base_sig) if base_sig.is_final => {
                    self.leave_fn_scope(saved);
                    return self.error_at(
                        span,
                        codes::LSP0004,
                        format!("Cannot override `final` method `{name}`."),
                    );
                }
                Some(base_sig) if !(base_sig.is_virtual || base_sig.is_override) => {
                    self.leave_fn_scope(saved);
                    return self.error_at(
                        span,
                        codes::LSP0004,
                        format!("Method `{name}` overrides a non-`virtual` base method."),
                    );
                }
                Some(_) => {}
                None => {
                    self.leave_fn_scope(saved);
                    return self.error_at(
                        span,
                        codes::LSP0004,
                        format!("Method `{name}` has no base method to override."),
                    );
                }
            }
        }

        let overload_n = self
            .program
            .classes
            .get(class)
            .and_then(|c| c.methods.get(&name))
            .map(|sigs| sigs.len())
            .unwrap_or(0);
        let symbol = if overload_n == 0 {
            format!("__ls_m_{class}_{name}")
        } else {
            format!("__ls_m_{class}_{name}_{}", overload_n + 1)
        };

        let body = self.parse_block()?;
        self.leave_fn_scope(saved);

        let sig = MethodSig {
            symbol: symbol.clone(),
            owner: class.to_string(),
            access,
            is_static,
            is_virtual,
            is_override,
            is_final,
            params: params.iter().map(|p| p.ty).collect(),
            ret,
        };
        self.program
            .classes
            .get_mut(class)
            .expect("class registered")
            .methods
            .entry(name.clone())
            .or_default()
            .push(sig);

        if !is_static {
            params.insert(
                0,
                Param {
                    name: "this".to_string(),
                    ty: Type::I64,
                },
            );
        }

        let mut func = Function::new(name, span);
        func.symbol = symbol;
        func.params = params;
        func.ret = ret;
        func.throws = throws;
        func.body = body;
        func.method_of = Some(class.to_string());
        func.is_static = is_static;
        func.is_virtual = is_virtual;
        func.is_override = is_override;
        func.is_final = is_final;
        self.program.functions.push(func);
        Ok(())
    }

    fn find_base_method(&self, class: &str, name: &str) -> Option<MethodSig> {
        let base = self.program.classes.get(class)?.base.as_deref()?;
        self.program
            .class_methods(base, name)
            .and_then(|sigs| sigs.first().cloned())
    }

    fn parse_member_operator(
        &mut self,
        class: &str,
        access: Access,
        span: Span,
    ) -> Result<(), ()> {
        self.advance(); // operator
        let op = self.parse_operator_kind()?;
        let (op_name, expected_params) = match op {
            OperatorKind::Binary(b) => (b.overload_name(), 1),
            OperatorKind::Unary(u) => (u.overload_name(), 0),
        };

        let saved = self.enter_fn_scope();
        self.var_classes
            .insert("this".to_string(), class.to_string());
        let mut params = self.parse_params()?;
        if params.len() != expected_params {
            self.leave_fn_scope(saved);
            return self.error_at(
                span,
                codes::LSP0005,
                format!(
                    "Member operator `{}` takes {} parameter(s) besides the receiver.",
                    op_name, expected_params
                ),
            );
        }
        self.expect(TokenKind::Arrow)?;
        let (ret, _) = self.parse_type_name()?;
        if ret == Type::Void {
            self.leave_fn_scope(saved);
            return self.error_at(span, codes::LSP0005, "Operator overloads must return a value.");
        }
        let body = self.parse_block()?;
        self.leave_fn_scope(saved);

        let symbol = format!("__ls_m_{class}_op_{op_name}");
        let key = format!("operator{op_name}");
        let sig = MethodSig {
            symbol: symbol.clone(),
            owner: class.to_string(),
            access,
            is_static: false,
            is_virtual: false,
            is_override: false,
            is_final: false,
            params: params.iter().map(|p| p.ty).collect(),
            ret,
        };
        let info = self.program.classes.get_mut(class).expect("class registered");
        let slot = info.methods.entry(key).or_default();
        if !slot.is_empty() {
            return self.error_at(
                span,
                codes::LSP0003,
                format!("Class `{class}` already overloads operator `{op_name}`."),
            );
        }
        slot.push(sig);

        params.insert(
            0,
            Param {
                name: "this".to_string(),
                ty: Type::I64,
            },
        );
        let mut func = Function::new(format!("operator {op_name}"), span);
        func.symbol = symbol;
        func.params = params;
        func.ret = ret;
        func.body = body;
        func.method_of = Some(class.to_string());
        func.operator = Some(op);
        self.program.functions.push(func);

        if matches!(op, OperatorKind::Unary(UnOp::Neg)) {
            self.program.has_unary_neg_override = true;
        }
        Ok(())
    }

    fn parse_constructor(&mut self, class: &str, span: Span) -> Result<(), ()> {
        self.advance(); // `constructor` or the class name

        let saved = self.enter_fn_scope();
        self.var_classes
            .insert("this".to_string(), class.to_string());
        let params = self.parse_params()?;

        let mut base_args = None;
        if self.eat(TokenKind::Colon).is_some() {
            let base_span = self.peek().span;
            let target = self.expect_ident("base class")?;
            let declared_base = self
                .program
                .classes
                .get(class)
                .and_then(|c| c.base.clone());
            if declared_base.as_deref() != Some(target.as_str()) {
                self.leave_fn_scope(saved);
                return self.error_at(
                    base_span,
                    codes::LSP0001,
                    format!("Init list must target the declared base class of `{class}`."),
                );
            }
            self.expect(TokenKind::LParen)?;
            let args = self.parse_call_args()?;
            self.expect(TokenKind::RParen)?;
            base_args = Some(args);
        }

        let user_body = self.parse_block()?;
        self.leave_fn_scope(saved);

        self.synthesize_constructor(class, params, base_args, user_body, span)
    }

    /// Every class gets exactly one constructor of the same shape:
    /// `declare this = <base ctor | object_new()>`, field stores, the user
    /// body if any, and a final `return this`.
    fn synthesize_constructor(
        &mut self,
        class: &str,
        params: Vec<Param>,
        base_args: Option<Vec<Expr>>,
        user_body: Vec<Stmt>,
        span: Span,
    ) -> Result<(), ()> {
        let info = self.program.classes.get(class).expect("class registered").clone();

        let this_init = match (&info.base, base_args) {
            (Some(base), args) => Expr::call(
                format!("__ls_ctor_{base}"),
                args.unwrap_or_default(),
                span,
            ),
            (None, _) => Expr::call("object_new", Vec::new(), span),
        };

        let mut body = vec![Stmt::new(
            StmtKind::Declare {
                name: "this".to_string(),
                declared: Some(Type::I64),
                is_const: false,
                is_owned: false,
                init: Some(this_init),
                resolved: Type::Void,
                free_fn: None,
            },
            span,
        )];

        for field in &info.fields {
            let init = field.init.clone().unwrap_or_else(|| default_field_init(field.ty, span));
            body.push(field_store_stmt(
                Expr::var("this", span),
                field,
                init,
                span,
            ));
        }

        body.extend(user_body);
        body.push(Stmt::new(
            StmtKind::Return(Some(Expr::var("this", span))),
            span,
        ));

        let mut func = Function::new(class, span);
        func.symbol = format!("__ls_ctor_{class}");
        func.params = params;
        func.ret = Type::I64;
        func.body = body;
        func.method_of = Some(class.to_string());
        self.program.functions.push(func);
        Ok(())
    }

    // ── Statements ──

    fn parse_stmt(&mut self) -> Result<Stmt, ()> {
        let span = self.peek().span;
        match self.peek().kind {
            TokenKind::Declare => self.parse_declare(span),
            TokenKind::If => self.parse_if(span),
            TokenKind::While => self.parse_while(span),
            TokenKind::For => self.parse_for(span, false),
            TokenKind::Parallel => {
                self.advance();
                self.expect(TokenKind::For)?;
                self.parse_for(span, true)
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_terminator() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::new(StmtKind::Return(value), span))
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::new(StmtKind::Break, span))
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::new(StmtKind::Continue, span))
            }
            TokenKind::Delete => self.parse_delete(span),
            TokenKind::Ident
                if (self.peek().text == "formatOutput" || self.peek().text == "FormatOutput")
                    && matches!(
                        self.kind_at(self.pos + 1),
                        TokenKind::LBrace | TokenKind::Do
                    ) =>
            {
                self.parse_format_block(span)
            }
            _ => self.parse_assign_or_expr(span),
        }
    }

    fn parse_declare(&mut self, span: Span) -> Result<Stmt, ()> {
        self.advance(); // declare
        let is_const = self.eat(TokenKind::Const).is_some();
        let is_owned = self.eat(TokenKind::Owned).is_some();
        let name = self.expect_ident("variable name")?;

        let mut declared = None;
        let mut declared_class = None;
        if self.eat(TokenKind::Colon).is_some() {
            let (ty, cls) = self.parse_type_name()?;
            declared = Some(ty);
            declared_class = cls;
        }
        let init = if self.eat(TokenKind::Assign).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };

        if let Some(cls) = declared_class {
            self.var_classes.insert(name.clone(), cls);
            self.var_ctors
                .insert(name.clone(), "object_new".to_string());
        }
        if let Some(ref e) = init {
            if let ExprKind::Call { name: callee, .. } = &e.kind {
                if let Some(cls) = callee.strip_prefix("__ls_ctor_") {
                    self.var_classes.insert(name.clone(), cls.to_string());
                }
                if ctor_free_fn(callee).is_some() || callee.starts_with("__ls_ctor_") {
                    self.var_ctors.insert(name.clone(), callee.clone());
                }
            }
        }

        Ok(Stmt::new(
            StmtKind::Declare {
                name,
                declared,
                is_const,
                is_owned,
                init,
                resolved: Type::Void,
                free_fn: None,
            },
            span,
        ))
    }

    fn parse_if(&mut self, span: Span) -> Result<Stmt, ()> {
        self.advance(); // if or elif
        let cond = self.parse_expr()?;

        if self.eat(TokenKind::LBrace).is_some() {
            let then_body = self.parse_stmts_until(&[TokenKind::RBrace])?;
            self.expect(TokenKind::RBrace)?;
            let else_body = self.parse_else_chain_braced()?;
            return Ok(Stmt::new(
                StmtKind::If {
                    cond,
                    then_body,
                    else_body,
                },
                span,
            ));
        }

        self.expect(TokenKind::Do)?;
        let then_body =
            self.parse_stmts_until(&[TokenKind::End, TokenKind::Else, TokenKind::Elif])?;
        let else_body = match self.peek().kind {
            TokenKind::End => {
                self.advance();
                Vec::new()
            }
            TokenKind::Elif => {
                let elif_span = self.peek().span;
                vec![self.parse_if(elif_span)?]
            }
            TokenKind::Else => {
                self.advance();
                if self.eat(TokenKind::LBrace).is_some() {
                    let body = self.parse_stmts_until(&[TokenKind::RBrace])?;
                    self.expect(TokenKind::RBrace)?;
                    body
                } else {
                    let _ = self.eat(TokenKind::Do);
                    let body = self.parse_stmts_until(&[TokenKind::End])?;
                    self.expect(TokenKind::End)?;
                    body
                }
            }
            _ => return self.error_here(codes::LSP0001, "Expected `end`, `else`, or `elif`."),
        };

        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_body,
                else_body,
            },
            span,
        ))
    }

    fn parse_else_chain_braced(&mut self) -> Result<Vec<Stmt>, ()> {
        let next = self.peek_skip_newlines();
        match next {
            TokenKind::Else => {
                self.skip_newlines();
                self.advance(); // else
                if self.at(TokenKind::If) {
                    let span = self.peek().span;
                    return Ok(vec![self.parse_if(span)?]);
                }
                self.expect(TokenKind::LBrace)?;
                let body = self.parse_stmts_until(&[TokenKind::RBrace])?;
                self.expect(TokenKind::RBrace)?;
                Ok(body)
            }
            TokenKind::Elif => {
                self.skip_newlines();
                let span = self.peek().span;
                Ok(vec![self.parse_if(span)?])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn parse_while(&mut self, span: Span) -> Result<Stmt, ()> {
        self.advance(); // while
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::While { cond, body }, span))
    }

    fn parse_for(&mut self, span: Span, parallel: bool) -> Result<Stmt, ()> {
        self.advance(); // for
        let var = self.expect_ident("loop variable")?;
        self.expect(TokenKind::In)?;
        let start = self.parse_expr()?;
        self.expect(TokenKind::DotDot)?;
        let stop = self.parse_expr()?;
        let step = if self.eat(TokenKind::Step).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::For {
                var,
                start,
                stop,
                step,
                parallel,
                body,
            },
            span,
        ))
    }

    fn parse_delete(&mut self, span: Span) -> Result<Stmt, ()> {
        self.advance(); // delete
        if self.eat(TokenKind::LBracket).is_some() {
            // `delete[]` is tracked but frees identically.
            self.expect(TokenKind::RBracket)?;
        }
        let name = self.expect_ident("variable name")?;

        let free = match self.var_ctors.get(&name) {
            Some(ctor) if ctor.starts_with("__ls_ctor_") => "object_free",
            Some(ctor) => ctor_free_fn(ctor).unwrap_or("mem_free"),
            None => "mem_free",
        };
        Ok(Stmt::new(
            StmtKind::Expr(Expr::call(free, vec![Expr::var(name, span)], span)),
            span,
        ))
    }

    fn parse_format_block(&mut self, span: Span) -> Result<Stmt, ()> {
        self.advance(); // formatOutput / FormatOutput
        let body = self.parse_block()?;
        let end_arg = if self.eat(TokenKind::LParen).is_some() {
            let arg = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            Some(arg)
        } else {
            None
        };
        Ok(Stmt::new(StmtKind::FormatBlock { end_arg, body }, span))
    }

    fn parse_assign_or_expr(&mut self, span: Span) -> Result<Stmt, ()> {
        if self.at(TokenKind::Ident) {
            let k1 = self.kind_at(self.pos + 1);

            if let Some((_, op)) = ASSIGN_OPS.iter().find(|(k, _)| *k == k1) {
                let name = self.advance().text;
                self.advance(); // the assignment operator
                let rhs = self.parse_expr()?;
                let value = match op {
                    None => rhs,
                    Some(op) => Expr::new(
                        ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(Expr::var(name.clone(), span)),
                            rhs: Box::new(rhs),
                            override_fn: None,
                        },
                        span,
                    ),
                };
                return Ok(Stmt::new(StmtKind::Assign { name, value }, span));
            }

            if matches!(k1, TokenKind::PlusPlus | TokenKind::MinusMinus) {
                let name = self.advance().text;
                let op = if self.advance().kind == TokenKind::PlusPlus {
                    BinOp::Add
                } else {
                    BinOp::Sub
                };
                let value = Expr::new(
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(Expr::var(name.clone(), span)),
                        rhs: Box::new(Expr::int(1, span)),
                        override_fn: None,
                    },
                    span,
                );
                return Ok(Stmt::new(StmtKind::Assign { name, value }, span));
            }

            // `recv.field = expr` and compound forms store through object_set.
            if k1 == TokenKind::Dot
                && self.kind_at(self.pos + 2) == TokenKind::Ident
                && ASSIGN_OPS
                    .iter()
                    .any(|(k, _)| *k == self.kind_at(self.pos + 3))
            {
                return self.parse_member_assign(span);
            }
        }

        let expr = self.parse_expr()?;
        Ok(Stmt::new(StmtKind::Expr(expr), span))
    }

    fn parse_member_assign(&mut self, span: Span) -> Result<Stmt, ()> {
        let recv = self.advance().text;
        self.advance(); // dot
        let field_span = self.peek().span;
        let field_name = self.advance().text;
        let op_kind = self.advance().kind;
        let op = ASSIGN_OPS
            .iter()
            .find(|(k, _)| *k == op_kind)
            .and_then(|(_, op)| *op);
        let rhs = self.parse_expr()?;

        let Some(class) = self.var_classes.get(&recv).cloned() else {
            return self.error_at(
                span,
                codes::LST0001,
                format!("`{recv}` has no known class; cannot assign to a member."),
            );
        };
        let Some(field) = self.lookup_field(&class, &field_name) else {
            return self.error_at(
                field_span,
                codes::LST0001,
                format!("Class `{class}` has no field `{field_name}`."),
            );
        };
        self.check_field_access(&field, &class, field_span)?;

        let value = match op {
            None => rhs,
            Some(op) => {
                let load = field_load_expr(Expr::var(recv.clone(), span), &field, span);
                Expr::new(
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(load),
                        rhs: Box::new(rhs),
                        override_fn: None,
                    },
                    span,
                )
            }
        };

        Ok(field_store_stmt(Expr::var(recv, span), &field, value, span))
    }

    // ── Expressions ──

    fn parse_expr(&mut self) -> Result<Expr, ()> {
        self.parse_bin_expr(0)
    }

    fn parse_bin_expr(&mut self, min_prec: u8) -> Result<Expr, ()> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some((op, prec, right_assoc)) = bin_op_of(self.peek().kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_bin_expr(next_min)?;

            let override_fn = self.member_binop_override(&lhs, op);
            let span = lhs.span;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    override_fn,
                },
                span,
            );
        }

        Ok(lhs)
    }

    fn member_binop_override(&self, lhs: &Expr, op: BinOp) -> Option<String> {
        let ExprKind::Var(name) = &lhs.kind else {
            return None;
        };
        let class = self.var_classes.get(name)?;
        let key = format!("operator{}", op.overload_name());
        self.program
            .class_methods(class, &key)
            .and_then(|sigs| sigs.first())
            .map(|sig| sig.symbol.clone())
    }

    fn member_unop_override(&self, operand: &Expr, op: UnOp) -> Option<String> {
        let ExprKind::Var(name) = &operand.kind else {
            return None;
        };
        let class = self.var_classes.get(name)?;
        let key = format!("operator{}", op.overload_name());
        self.program
            .class_methods(class, &key)
            .and_then(|sigs| sigs.first())
            .map(|sig| sig.symbol.clone())
    }

    fn parse_unary(&mut self) -> Result<Expr, ()> {
        let span = self.peek().span;
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::Not),
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_primary();
        };
        self.advance();
        let operand = self.parse_unary()?;
        let override_fn = self.member_unop_override(&operand, op);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
                override_fn,
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> Result<Expr, ()> {
        let span = self.peek().span;
        match self.peek().kind {
            TokenKind::IntLit => {
                let text = self.advance().text;
                match text.parse::<i64>() {
                    Ok(v) => Ok(Expr::int(v, span)),
                    Err(_) => self.error_at(
                        span,
                        codes::LSP0001,
                        format!("Integer literal `{text}` does not fit in i64."),
                    ),
                }
            }
            TokenKind::FloatLit => {
                let text = self.advance().text;
                match text.parse::<f64>() {
                    Ok(v) => {
                        let mut e = Expr::new(ExprKind::Float(v), span);
                        e.inf = Type::F64;
                        e.typed = true;
                        Ok(e)
                    }
                    Err(_) => self.error_at(
                        span,
                        codes::LSP0001,
                        format!("Malformed float literal `{text}`."),
                    ),
                }
            }
            TokenKind::True | TokenKind::False => {
                let value = self.advance().kind == TokenKind::True;
                let mut e = Expr::new(ExprKind::Bool(value), span);
                e.inf = Type::Bool;
                e.typed = true;
                Ok(e)
            }
            TokenKind::StringLit => {
                let text = self.advance().text;
                Ok(Expr::str_lit(text, span))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Expand => self.parse_expand(),
            TokenKind::Dot => {
                // Format-mode markers: `.format()`, `.stateSpeed(n)`, ...
                self.advance();
                let name = self.expect_ident("marker name")?;
                self.expect(TokenKind::LParen)?;
                let args = self.parse_call_args()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::call(format!(".{name}"), args, span))
            }
            TokenKind::Ident => self.parse_ident_expr(span),
            _ => self.error_at(
                span,
                codes::LSP0001,
                format!("Expected expression, found `{:?}`.", self.peek().kind),
            ),
        }
    }

    fn parse_ident_expr(&mut self, span: Span) -> Result<Expr, ()> {
        let name = self.advance().text;

        // `su.*` / `superuser.*` compose into a single privileged symbol;
        // a bare `superuser()` is the ordinary enabling builtin.
        if (name == "su" || name == "superuser")
            && self.at(TokenKind::Dot)
            && self.kind_at(self.pos + 1) == TokenKind::Ident
        {
            let mut symbol = "su".to_string();
            while self.at(TokenKind::Dot) && self.kind_at(self.pos + 1) == TokenKind::Ident {
                self.advance();
                let seg = self.advance().text;
                symbol.push('.');
                symbol.push_str(&seg);
            }
            self.expect(TokenKind::LParen)?;
            let args = self.parse_call_args()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::call(symbol, args, span));
        }

        if self.at(TokenKind::LParen) {
            self.advance();
            let args = self.parse_call_args()?;
            self.expect(TokenKind::RParen)?;
            if self.program.macros.contains_key(&name) {
                return self.error_at(
                    span,
                    codes::LSP0001,
                    format!("Macro `{name}` must be invoked through `expand(...)`."),
                );
            }
            if self.program.classes.contains_key(&name) {
                return Ok(Expr::call(format!("__ls_ctor_{name}"), args, span));
            }
            return Ok(Expr::call(name, args, span));
        }

        if self.at(TokenKind::Dot) && self.kind_at(self.pos + 1) == TokenKind::Ident {
            if self.program.classes.contains_key(&name) {
                return self.parse_static_method_call(&name, span);
            }
            return self.parse_member_chain(name, span);
        }

        Ok(Expr::var(name, span))
    }

    fn parse_static_method_call(&mut self, class: &str, span: Span) -> Result<Expr, ()> {
        self.advance(); // dot
        let mspan = self.peek().span;
        let method = self.advance().text;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_call_args()?;
        self.expect(TokenKind::RParen)?;

        let sig = self.resolve_method(class, &method, args.len(), mspan)?;
        if !sig.is_static {
            return self.error_at(
                mspan,
                codes::LSP0001,
                format!("`{class}.{method}` is not a static method."),
            );
        }
        self.check_method_access(&sig, mspan)?;
        Ok(Expr::call(sig.symbol, args, span))
    }

    fn parse_member_chain(&mut self, recv: String, span: Span) -> Result<Expr, ()> {
        let Some(class) = self.var_classes.get(&recv).cloned() else {
            let field = self.tokens[self.pos + 1].text.clone();
            return self.error_at(
                span,
                codes::LST0001,
                format!("`{recv}` has no known class; cannot access `.{field}`."),
            );
        };
        let mut expr = Expr::var(recv, span);

        while self.at(TokenKind::Dot) && self.kind_at(self.pos + 1) == TokenKind::Ident {
            self.advance(); // dot
            let mspan = self.peek().span;
            let member = self.advance().text;

            if self.at(TokenKind::LParen) {
                self.advance();
                let mut args = self.parse_call_args()?;
                self.expect(TokenKind::RParen)?;

                let sig = self.resolve_method(&class, &member, args.len(), mspan)?;
                if sig.is_static {
                    return self.error_at(
                        mspan,
                        codes::LSP0001,
                        format!("Static method `{member}` must be called on the class."),
                    );
                }
                self.check_method_access(&sig, mspan)?;
                args.insert(0, expr);
                // Method results carry no class tag, so the chain ends here.
                return Ok(Expr::call(sig.symbol, args, span));
            }

            let Some(field) = self.lookup_field(&class, &member) else {
                return self.error_at(
                    mspan,
                    codes::LST0001,
                    format!("Class `{class}` has no field `{member}`."),
                );
            };
            self.check_field_access(&field, &class, mspan)?;
            expr = field_load_expr(expr, &field, mspan);
            // Field loads yield primitives; class tracking ends here.
            if self.at(TokenKind::Dot) {
                return self.error_at(
                    mspan,
                    codes::LST0001,
                    format!("Field `{member}` is not class-typed; cannot chain further."),
                );
            }
        }

        Ok(expr)
    }

    fn lookup_field(&self, class: &str, name: &str) -> Option<FieldInfo> {
        let mut current = Some(class.to_string());
        while let Some(cname) = current {
            let info = self.program.classes.get(&cname)?;
            if let Some(field) = info.field(name) {
                return Some(field.clone());
            }
            current = info.base.clone();
        }
        None
    }

    fn resolve_method(
        &mut self,
        class: &str,
        method: &str,
        arity: usize,
        span: Span,
    ) -> Result<MethodSig, ()> {
        let Some(sigs) = self.program.class_methods(class, method) else {
            return self.error_at(
                span,
                codes::LST0001,
                format!("Class `{class}` has no method `{method}`."),
            );
        };
        let Some(sig) = sigs.iter().find(|s| s.params.len() == arity) else {
            return self.error_at(
                span,
                codes::LST0002,
                format!("No overload of `{class}.{method}` takes {arity} argument(s)."),
            );
        };
        Ok(sig.clone())
    }

    fn check_method_access(&mut self, sig: &MethodSig, span: Span) -> Result<(), ()> {
        if self.access_allowed(sig.access, &sig.owner) {
            return Ok(());
        }
        self.error_at(
            span,
            codes::LSP0001,
            format!("Method of `{}` is not accessible here.", sig.owner),
        )
    }

    fn check_field_access(&mut self, field: &FieldInfo, class: &str, span: Span) -> Result<(), ()> {
        if self.access_allowed(field.access, &field.owner) {
            return Ok(());
        }
        self.error_at(
            span,
            codes::LSP0001,
            format!("Field `{}` of `{class}` is not accessible here.", field.name),
        )
    }

    fn access_allowed(&self, access: Access, owner: &str) -> bool {
        match access {
            Access::Public => true,
            Access::Private => self.current_class.as_deref() == Some(owner),
            Access::Protected => {
                let mut current = self.current_class.clone();
                while let Some(cname) = current {
                    if cname == owner {
                        return true;
                    }
                    current = self
                        .program
                        .classes
                        .get(&cname)
                        .and_then(|c| c.base.clone());
                }
                false
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ()> {
        let mut args = Vec::new();
        self.skip_newlines();
        if self.at(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
            self.skip_newlines();
        }
        Ok(args)
    }

    // ── Params, types, blocks ──

    fn parse_params(&mut self) -> Result<Vec<Param>, ()> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        while !self.at(TokenKind::RParen) {
            let name = self.expect_ident("parameter name")?;
            self.expect(TokenKind::Colon)?;
            let (ty, class) = self.parse_type_name()?;
            if let Some(cls) = class {
                self.var_classes.insert(name.clone(), cls);
            }
            params.push(Param { name, ty });
            self.skip_newlines();
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
            self.skip_newlines();
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    /// Type position: a primitive name, or a known class name (reified as
    /// an `i64` handle whose class is tracked separately).
    fn parse_type_name(&mut self) -> Result<(Type, Option<String>), ()> {
        let span = self.peek().span;
        let name = self.expect_ident("type name")?;
        if let Some(ty) = Type::from_name(&name) {
            return Ok((ty, None));
        }
        if self.program.classes.contains_key(&name) {
            return Ok((Type::I64, Some(name)));
        }
        self.error_at(span, codes::LST0001, format!("Unknown type `{name}`."))
    }

    fn parse_throws_list(&mut self) -> Result<Vec<String>, ()> {
        let mut kinds = vec![self.expect_ident("error kind")?];
        while self.eat(TokenKind::Comma).is_some() {
            kinds.push(self.expect_ident("error kind")?);
        }
        Ok(kinds)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ()> {
        let open = self.open_block()?;
        let body = match open {
            BlockOpen::Brace => self.parse_stmts_until(&[TokenKind::RBrace])?,
            BlockOpen::Do => self.parse_stmts_until(&[TokenKind::End])?,
        };
        self.close_block(open)?;
        Ok(body)
    }

    fn parse_stmts_until(&mut self, stops: &[TokenKind]) -> Result<Vec<Stmt>, ()> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if stops.contains(&self.peek().kind) || self.at(TokenKind::Eof) {
                break;
            }
            let stmt = self.parse_stmt()?;
            self.expect_terminator()?;
            stmts.push(stmt);
        }
        Ok(stmts)
    }

    fn open_block(&mut self) -> Result<BlockOpen, ()> {
        self.skip_newlines();
        if self.eat(TokenKind::LBrace).is_some() {
            Ok(BlockOpen::Brace)
        } else if self.eat(TokenKind::Do).is_some() {
            Ok(BlockOpen::Do)
        } else {
            self.error_here(codes::LSP0001, "Expected `{` or `do` to open a block.")
        }
    }

    fn at_block_close(&self, open: BlockOpen) -> bool {
        match open {
            BlockOpen::Brace => self.at(TokenKind::RBrace),
            BlockOpen::Do => self.at(TokenKind::End),
        }
    }

    fn close_block(&mut self, open: BlockOpen) -> Result<(), ()> {
        match open {
            BlockOpen::Brace => self.expect(TokenKind::RBrace).map(|_| ()),
            BlockOpen::Do => self.expect(TokenKind::End).map(|_| ()),
        }
    }

    // ── Terminators and token plumbing ──

    fn at_terminator(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semi
                | TokenKind::Newline
                | TokenKind::RBrace
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elif
                | TokenKind::Eof
        )
    }

    /// A statement ends at `;`, one or more newlines, or a closing block
    /// token. Anything else is fatal.
    fn expect_terminator(&mut self) -> Result<(), ()> {
        match self.peek().kind {
            TokenKind::Semi => {
                self.advance();
                Ok(())
            }
            TokenKind::Newline => {
                self.skip_newlines();
                Ok(())
            }
            TokenKind::RBrace
            | TokenKind::End
            | TokenKind::Else
            | TokenKind::Elif
            | TokenKind::Eof => Ok(()),
            _ => self.error_here(codes::LSP0002, "Expected newline or `;` after statement."),
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Semi) {
            self.advance();
        }
    }

    fn peek_skip_newlines(&self) -> TokenKind {
        let mut i = self.pos;
        while self.kind_at(i) == TokenKind::Newline {
            i += 1;
        }
        self.kind_at(i)
    }

    fn enter_fn_scope(&mut self) -> (HashMap<String, String>, HashMap<String, String>) {
        (
            std::mem::take(&mut self.var_classes),
            std::mem::take(&mut self.var_ctors),
        )
    }

    fn leave_fn_scope(&mut self, saved: (HashMap<String, String>, HashMap<String, String>)) {
        self.var_classes = saved.0;
        self.var_ctors = saved.1;
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.fallback_eof)
    }

    fn kind_at(&self, i: usize) -> TokenKind {
        self.tokens.get(i).map(|t| t.kind).unwrap_or(TokenKind::Eof)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ()> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            self.error_here(
                codes::LSP0001,
                format!("Expected `{:?}`, found `{:?}`.", kind, self.peek().kind),
            )
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ()> {
        if self.at(TokenKind::Ident) {
            Ok(self.advance().text)
        } else {
            self.error_here(codes::LSP0001, format!("Expected {what}."))
        }
    }

    fn error_here<T>(&mut self, code: &str, message: impl Into<String>) -> Result<T, ()> {
        let span = self.peek().span;
        self.error_at(span, code, message)
    }

    fn error_at<T>(&mut self, span: Span, code: &str, message: impl Into<String>) -> Result<T, ()> {
        self.diag.emit(Diagnostic::error(code, span, message));
        Err(())
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum BlockOpen {
    Brace,
    Do,
}

fn bin_op_of(kind: TokenKind) -> Option<(BinOp, u8, bool)> {
    Some(match kind {
        TokenKind::OrOr => (BinOp::Or, 1, false),
        TokenKind::AndAnd => (BinOp::And, 2, false),
        TokenKind::EqEq => (BinOp::Eq, 3, false),
        TokenKind::BangEq => (BinOp::Ne, 3, false),
        TokenKind::Lt => (BinOp::Lt, 3, false),
        TokenKind::Le => (BinOp::Le, 3, false),
        TokenKind::Gt => (BinOp::Gt, 3, false),
        TokenKind::Ge => (BinOp::Ge, 3, false),
        TokenKind::Plus => (BinOp::Add, 4, false),
        TokenKind::Minus => (BinOp::Sub, 4, false),
        TokenKind::Star => (BinOp::Mul, 5, false),
        TokenKind::Slash => (BinOp::Div, 5, false),
        TokenKind::Percent => (BinOp::Mod, 5, false),
        TokenKind::StarStar => (BinOp::Pow, 6, true),
        _ => return None,
    })
}

/// Field load: `object_get(recv, "name")` parsed back per the declared type.
fn field_load_expr(recv: Expr, field: &FieldInfo, span: Span) -> Expr {
    let get = Expr::call(
        "object_get",
        vec![recv, Expr::str_lit(field.name.clone(), span)],
        span,
    );
    match field.ty {
        Type::I64 => Expr::call("parse_i64", vec![get], span),
        Type::I32 => Expr::call(
            "to_i32",
            vec![Expr::call("parse_i64", vec![get], span)],
            span,
        ),
        Type::F64 => Expr::call("parse_f64", vec![get], span),
        Type::F32 => Expr::call(
            "to_f32",
            vec![Expr::call("parse_f64", vec![get], span)],
            span,
        ),
        Type::Bool => Expr::call(
            "i64_to_bool",
            vec![Expr::call("parse_i64", vec![get], span)],
            span,
        ),
        Type::Str | Type::Void => get,
    }
}

/// Field store: `object_set(recv, "name", formatOutput(value))`, with bools
/// first widened so the stringly-typed object store stays uniform.
fn field_store_stmt(recv: Expr, field: &FieldInfo, value: Expr, span: Span) -> Stmt {
    let value = if field.ty == Type::Bool {
        Expr::call("bool_to_i64", vec![value], span)
    } else {
        value
    };
    let formatted = Expr::call("formatOutput", vec![value], span);
    Stmt::new(
        StmtKind::Expr(Expr::call(
            "object_set",
            vec![recv, Expr::str_lit(field.name.clone(), span), formatted],
            span,
        )),
        span,
    )
}

fn default_field_init(ty: Type, span: Span) -> Expr {
    match ty {
        Type::I32 | Type::I64 => Expr::int(0, span),
        Type::F32 | Type::F64 => {
            let mut e = Expr::new(ExprKind::Float(0.0), span);
            e.inf = Type::F64;
            e.typed = true;
            e
        }
        Type::Bool => {
            let mut e = Expr::new(ExprKind::Bool(false), span);
            e.inf = Type::Bool;
            e.typed = true;
            e
        }
        Type::Str => Expr::str_lit("", span),
        Type::Void => Expr::int(0, span),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescript_lex::lex;

    fn parse_ok(source: &str) -> Program {
        let mut diag = DiagnosticBag::new(32);
        let tokens = lex(source, &mut diag);
        assert!(!diag.has_errors(), "lex: {:?}", diag.diagnostics);
        match parse_program(&tokens, &mut diag) {
            Ok(program) => program,
            Err(()) => panic!(
                "parse failed: {:?}",
                diag.diagnostics
                    .iter()
                    .map(|d| d.render())
                    .collect::<Vec<_>>()
            ),
        }
    }

    fn parse_err(source: &str) -> DiagnosticBag {
        let mut diag = DiagnosticBag::new(32);
        let tokens = lex(source, &mut diag);
        let result = parse_program(&tokens, &mut diag);
        assert!(result.is_err(), "expected parse failure");
        diag
    }

    #[test]
    fn bare_statements_collect_into_script_main() {
        let program = parse_ok("println(1 + 2 * 3)\n");
        let main = program.function(SCRIPT_MAIN).expect("script main");
        assert_eq!(main.body.len(), 1);
        assert!(matches!(main.body[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn overload_registration_mangles_later_entries() {
        let program = parse_ok(
            "fn area(r: i64) -> i64 { return r }\nfn area(w: i64, h: i64) -> i64 { return w }\n",
        );
        let symbols: Vec<&str> = program
            .functions
            .iter()
            .map(|f| f.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["area", "__ls_ovl_area_2"]);
        assert_eq!(program.functions[1].source_name, "area");
    }

    #[test]
    fn function_detection_heuristic_distinguishes_calls() {
        let program = parse_ok("fn poke() { return }\npoke()\n");
        assert!(program.function("poke").is_some());
        let main = program.function(SCRIPT_MAIN).expect("script main");
        assert_eq!(main.body.len(), 1);
    }

    #[test]
    fn class_constructor_is_synthesized_with_field_stores() {
        let program = parse_ok(
            "class P {\n  declare x: i64 = 0\n  constructor(v: i64) { this.x = v }\n}\n",
        );
        let ctor = program.function("__ls_ctor_P").expect("constructor");
        assert_eq!(ctor.ret, Type::I64);
        // declare this, field init, user store, return this
        assert_eq!(ctor.body.len(), 4);
        assert!(matches!(
            ctor.body[0].kind,
            StmtKind::Declare { ref name, .. } if name == "this"
        ));
        match &ctor.body.last().unwrap().kind {
            StmtKind::Return(Some(e)) => {
                assert!(matches!(&e.kind, ExprKind::Var(n) if n == "this"))
            }
            other => panic!("expected `return this`, got {other:?}"),
        }
        match &ctor.body[1].kind {
            StmtKind::Expr(e) => match &e.kind {
                ExprKind::Call { name, args } => {
                    assert_eq!(name, "object_set");
                    assert_eq!(args.len(), 3);
                }
                other => panic!("expected object_set call, got {other:?}"),
            },
            other => panic!("expected field store, got {other:?}"),
        }
    }

    #[test]
    fn default_constructor_synthesized_when_absent() {
        let program = parse_ok("class Empty { declare n: i64 = 7 }\n");
        let ctor = program.function("__ls_ctor_Empty").expect("constructor");
        assert!(ctor.params.is_empty());
        assert_eq!(ctor.body.len(), 3);
    }

    #[test]
    fn field_read_rewrites_to_object_get_parse_chain() {
        let program = parse_ok(
            "class P { declare x: i64 = 0 }\ndeclare p = P()\nprintln(p.x)\n",
        );
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Expr(print) = &main.body[1].kind else {
            panic!("expected println statement");
        };
        let ExprKind::Call { name, args } = &print.kind else {
            panic!("expected call");
        };
        assert_eq!(name, "println");
        let ExprKind::Call { name: parse, args: inner } = &args[0].kind else {
            panic!("expected parse-back call");
        };
        assert_eq!(parse, "parse_i64");
        let ExprKind::Call { name: get, .. } = &inner[0].kind else {
            panic!("expected object_get");
        };
        assert_eq!(get, "object_get");
    }

    #[test]
    fn method_call_prepends_receiver_and_resolves_symbol() {
        let program = parse_ok(
            "class C {\n  declare v: i64 = 0\n  get() -> i64 { return parse_i64(object_get(this, \"v\")) }\n}\ndeclare c = C()\nprintln(c.get())\n",
        );
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Expr(print) = &main.body[1].kind else {
            panic!("expected statement");
        };
        let ExprKind::Call { args, .. } = &print.kind else {
            panic!("expected call");
        };
        let ExprKind::Call { name, args: margs } = &args[0].kind else {
            panic!("expected method call");
        };
        assert_eq!(name, "__ls_m_C_get");
        assert_eq!(margs.len(), 1);
        assert!(matches!(&margs[0].kind, ExprKind::Var(n) if n == "c"));
    }

    #[test]
    fn static_method_requires_class_receiver() {
        let program = parse_ok(
            "class M {\n  static twice(v: i64) -> i64 { return v * 2 }\n}\nprintln(M.twice(4))\n",
        );
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Expr(print) = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Call { args, .. } = &print.kind else {
            panic!();
        };
        let ExprKind::Call { name, args: margs } = &args[0].kind else {
            panic!();
        };
        assert_eq!(name, "__ls_m_M_twice");
        assert_eq!(margs.len(), 1, "static call takes no receiver");
    }

    #[test]
    fn su_namespace_composes_and_canonicalizes() {
        let program = parse_ok("superuser.trace.on()\nsu.limit.set(4096)\n");
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let names: Vec<String> = main
            .body
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::Expr(e) => match &e.kind {
                    ExprKind::Call { name, .. } => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["su.trace.on", "su.limit.set"]);
    }

    #[test]
    fn macro_expansion_substitutes_arguments() {
        let program = parse_ok(
            "macro twice(x: expr) -> expr { x + x }\nprintln(expand(twice(21)))\n",
        );
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Expr(print) = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Call { args, .. } = &print.kind else {
            panic!();
        };
        let ExprKind::Binary { lhs, rhs, .. } = &args[0].kind else {
            panic!("expected expanded binary");
        };
        assert_eq!(lhs.as_int(), Some(21));
        assert_eq!(rhs.as_int(), Some(21));
    }

    #[test]
    fn stmt_kind_macro_params_parse_but_reject_on_use() {
        let diag = parse_err(
            "macro bad(s: stmt) -> expr { 1 }\nprintln(expand(bad(2)))\n",
        );
        assert!(diag
            .diagnostics
            .iter()
            .any(|d| d.code == codes::LSP0007));
    }

    #[test]
    fn delete_lowers_to_mapped_free_call() {
        let program = parse_ok("declare a = array_new()\ndelete a\n");
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Expr(free) = &main.body[1].kind else {
            panic!();
        };
        let ExprKind::Call { name, .. } = &free.kind else {
            panic!();
        };
        assert_eq!(name, "array_free");
    }

    #[test]
    fn delete_bracket_form_frees_identically() {
        let program = parse_ok("declare m = mem_alloc(64)\ndelete[] m\n");
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Expr(free) = &main.body[1].kind else {
            panic!();
        };
        let ExprKind::Call { name, .. } = &free.kind else {
            panic!();
        };
        assert_eq!(name, "mem_free");
    }

    #[test]
    fn member_operator_attaches_override_fn() {
        let program = parse_ok(
            "class Vec2 {\n  declare x: i64 = 0\n  operator +(other: i64) -> i64 { return other }\n}\ndeclare v = Vec2()\ndeclare r = v + 3\n",
        );
        let main = program.function(SCRIPT_MAIN).expect("script main");
        let StmtKind::Declare { init: Some(init), .. } = &main.body[1].kind else {
            panic!();
        };
        let ExprKind::Binary { override_fn, .. } = &init.kind else {
            panic!("expected binary with override");
        };
        assert_eq!(override_fn.as_deref(), Some("__ls_m_Vec2_op_add"));
    }

    #[test]
    fn unary_negation_override_sets_program_flag() {
        let program =
            parse_ok("operator unary -(x: i64) -> i64 { return x }\n");
        assert!(program.has_unary_neg_override);
        assert!(program.function("__ls_op_neg").is_some());
    }

    #[test]
    fn operator_overload_shape_is_validated() {
        let diag = parse_err("operator +(a: i64) -> i64 { return a }\n");
        assert!(diag.diagnostics.iter().any(|d| d.code == codes::LSP0005));
    }

    #[test]
    fn missing_terminator_is_fatal() {
        let diag = parse_err("declare a = 1 declare b = 2\n");
        assert!(diag.diagnostics.iter().any(|d| d.code == codes::LSP0002));
    }

    #[test]
    fn fields_after_methods_are_rejected() {
        let diag = parse_err(
            "class Bad {\n  poke() { return }\n  declare x: i64 = 0\n}\n",
        );
        assert!(diag.diagnostics.iter().any(|d| d.code == codes::LSP0001));
    }

    #[test]
    fn do_end_and_brace_blocks_are_interchangeable() {
        let program = parse_ok(
            "fn a() do\n  println(1)\nend\nfn b() {\n  println(2)\n}\n",
        );
        assert_eq!(program.function("a").unwrap().body.len(), 1);
        assert_eq!(program.function("b").unwrap().body.len(), 1);
    }

    #[test]
    fn if_elif_else_do_form_parses_into_nested_chain() {
        let program = parse_ok(
            "fn f(x: i64) -> i64 do\n  if x > 1 do\n    return 1\n  elif x > 0 do\n    return 0\n  else\n    return 2\n  end\nend\n",
        );
        let f = program.function("f").unwrap();
        let StmtKind::If { else_body, .. } = &f.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(else_body.len(), 1);
        assert!(matches!(else_body[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn flag_function_composes_dashed_name() {
        let program = parse_ok("flag dump-ir() {\n  println(1)\n}\n");
        let flag = program
            .functions
            .iter()
            .find(|f| f.cli_flag)
            .expect("flag function");
        assert_eq!(flag.source_name, "dump-ir");
        assert_eq!(flag.symbol, "__ls_flag_dump_ir");
    }

    #[test]
    fn parallel_for_sets_flag() {
        let program = parse_ok("parallel for i in 0..10 do\n  println(i)\nend\n");
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::For { parallel, .. } = &main.body[0].kind else {
            panic!();
        };
        assert!(*parallel);
    }

    #[test]
    fn compound_assign_lowers_to_binary() {
        let program = parse_ok("declare s: i64 = 0\ns += 5\ns **= 2\n");
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Assign { value, .. } = &main.body[1].kind else {
            panic!();
        };
        assert!(matches!(
            &value.kind,
            ExprKind::Binary { op: BinOp::Add, .. }
        ));
        let StmtKind::Assign { value, .. } = &main.body[2].kind else {
            panic!();
        };
        assert!(matches!(
            &value.kind,
            ExprKind::Binary { op: BinOp::Pow, .. }
        ));
    }

    #[test]
    fn format_block_parses_end_argument() {
        let program = parse_ok("formatOutput {\n  print(\"hi\")\n} (\"!\")\n");
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::FormatBlock { end_arg, body } = &main.body[0].kind else {
            panic!("expected format block");
        };
        assert!(end_arg.is_some());
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn dot_marker_calls_parse_as_expressions() {
        let program = parse_ok(".format()\n.stateSpeed(60)\n");
        let main = program.function(SCRIPT_MAIN).unwrap();
        let names: Vec<String> = main
            .body
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::Expr(e) => match &e.kind {
                    ExprKind::Call { name, .. } => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![".format", ".stateSpeed"]);
    }

    #[test]
    fn power_is_right_associative() {
        let program = parse_ok("declare x = 2 ** 3 ** 2\n");
        let main = program.function(SCRIPT_MAIN).unwrap();
        let StmtKind::Declare { init: Some(e), .. } = &main.body[0].kind else {
            panic!();
        };
        let ExprKind::Binary { op, lhs, rhs, .. } = &e.kind else {
            panic!();
        };
        assert_eq!(*op, BinOp::Pow);
        assert_eq!(lhs.as_int(), Some(2));
        assert!(matches!(
            &rhs.kind,
            ExprKind::Binary { op: BinOp::Pow, .. }
        ));
    }

    #[test]
    fn token_spans_lie_within_source() {
        let source = "declare q: i64 = 3\nprintln(q)\n";
        let mut diag = DiagnosticBag::new(8);
        let tokens = lex(source, &mut diag);
        let line_count = source.lines().count() as u32;
        for token in &tokens {
            assert!(token.span.line >= 1 && token.span.line <= line_count + 1);
            assert!(token.span.col >= 1);
        }
    }
}
