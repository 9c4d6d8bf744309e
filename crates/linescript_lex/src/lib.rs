//! LineScript lexer.

use linescript_ast::Span;
use linescript_diag::{codes, Diagnostic, DiagnosticBag};

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, span: Span, text: String) -> Self {
        Self { kind, span, text }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Declaration keywords.
    Declare,
    Const,
    Owned,
    Fn,
    Func,
    Macro,
    Class,
    Extends,
    Constructor,
    Extern,
    Inline,
    Flag,
    Operator,
    Unary,
    Throws,
    Delete,
    Expand,

    // Control keywords.
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Step,
    Parallel,
    Return,
    Break,
    Continue,
    Do,
    End,

    // Modifier keywords.
    Public,
    Protected,
    Private,
    Static,
    Virtual,
    Override,
    Final,

    // Literals.
    IntLit,
    FloatLit,
    StringLit,
    True,
    False,

    Ident,

    // Punctuation.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Dot,
    DotDot,
    Arrow,
    Assign,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    PowEq,
    PlusPlus,
    MinusMinus,

    Newline,
    Eof,
}

pub fn lex(source: &str, diag: &mut DiagnosticBag) -> Vec<Token> {
    Lexer::new(source, diag).lex_all()
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    diag: &'a mut DiagnosticBag,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, diag: &'a mut DiagnosticBag) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            diag,
        }
    }

    fn lex_all(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while !self.is_eof() {
            let b = self.peek_byte().unwrap_or(0);

            if b == b'\n' {
                let span = self.here();
                self.bump();
                tokens.push(Token::new(TokenKind::Newline, span, String::new()));
                continue;
            }
            if b == b' ' || b == b'\t' || b == b'\r' {
                self.bump();
                continue;
            }
            if b == b'/' && self.peek_next_byte() == Some(b'/') {
                while let Some(next) = self.peek_byte() {
                    if next == b'\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }

            if b == b'"' {
                tokens.push(self.lex_string());
                continue;
            }
            if b.is_ascii_digit() {
                tokens.push(self.lex_number());
                continue;
            }
            if is_ident_start(b) {
                tokens.push(self.lex_ident_or_keyword());
                continue;
            }

            match self.lex_punct() {
                Some(token) => tokens.push(token),
                None => {
                    let span = self.here();
                    self.diag.emit(Diagnostic::error(
                        codes::LSL0001,
                        span,
                        format!("Unrecognized character `{}`.", b as char),
                    ));
                    self.bump();
                }
            }
        }

        tokens.push(Token::new(TokenKind::Eof, self.here(), String::new()));
        tokens
    }

    fn lex_punct(&mut self) -> Option<Token> {
        let span = self.here();
        let b = self.peek_byte()?;
        let next = self.peek_next_byte();

        let (kind, width) = match (b, next) {
            (b'-', Some(b'>')) => (TokenKind::Arrow, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::BangEq, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'.', Some(b'.')) => (TokenKind::DotDot, 2),
            (b'+', Some(b'+')) => (TokenKind::PlusPlus, 2),
            (b'-', Some(b'-')) => (TokenKind::MinusMinus, 2),
            (b'+', Some(b'=')) => (TokenKind::PlusEq, 2),
            (b'-', Some(b'=')) => (TokenKind::MinusEq, 2),
            (b'*', Some(b'*')) => {
                // `**` vs `**=`: one more byte of lookahead after consuming.
                if self.bytes.get(self.pos + 2) == Some(&b'=') {
                    (TokenKind::PowEq, 3)
                } else {
                    (TokenKind::StarStar, 2)
                }
            }
            (b'*', Some(b'=')) => (TokenKind::StarEq, 2),
            (b'/', Some(b'=')) => (TokenKind::SlashEq, 2),
            (b'%', Some(b'=')) => (TokenKind::PercentEq, 2),
            (b'^', Some(b'=')) => (TokenKind::PowEq, 2),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b'{', _) => (TokenKind::LBrace, 1),
            (b'}', _) => (TokenKind::RBrace, 1),
            (b'[', _) => (TokenKind::LBracket, 1),
            (b']', _) => (TokenKind::RBracket, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b':', _) => (TokenKind::Colon, 1),
            (b';', _) => (TokenKind::Semi, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b'=', _) => (TokenKind::Assign, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'!', _) => (TokenKind::Bang, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.bump();
        }
        Some(Token::new(kind, span, String::new()))
    }

    fn lex_number(&mut self) -> Token {
        let span = self.here();
        let start = self.pos;

        while let Some(b) = self.peek_byte() {
            if b.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }

        let mut kind = TokenKind::IntLit;
        if self.peek_byte() == Some(b'.')
            && self.peek_next_byte().is_some_and(|b| b.is_ascii_digit())
        {
            kind = TokenKind::FloatLit;
            self.bump();
            while let Some(b) = self.peek_byte() {
                if b.is_ascii_digit() {
                    self.bump();
                } else {
                    break;
                }
            }
        }

        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        Token::new(kind, span, text)
    }

    fn lex_string(&mut self) -> Token {
        let span = self.here();
        self.bump(); // opening quote
        let mut out = String::new();

        while let Some(b) = self.peek_byte() {
            match b {
                b'"' => {
                    self.bump();
                    return Token::new(TokenKind::StringLit, span, out);
                }
                b'\n' => break,
                b'\\' => {
                    let esc_span = self.here();
                    self.bump();
                    match self.peek_byte() {
                        Some(b'n') => out.push('\n'),
                        Some(b'r') => out.push('\r'),
                        Some(b't') => out.push('\t'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'"') => out.push('"'),
                        Some(other) => {
                            self.diag.emit(Diagnostic::error(
                                codes::LSL0003,
                                esc_span,
                                format!("Unknown escape sequence `\\{}`.", other as char),
                            ));
                        }
                        None => break,
                    }
                    self.bump();
                }
                _ => {
                    out.push(b as char);
                    self.bump();
                }
            }
        }

        self.diag.emit(Diagnostic::error(
            codes::LSL0002,
            span,
            "Unterminated string literal.",
        ));
        Token::new(TokenKind::StringLit, span, out)
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let span = self.here();
        let start = self.pos;
        self.bump();
        while let Some(b) = self.peek_byte() {
            if is_ident_continue(b) {
                self.bump();
            } else {
                break;
            }
        }

        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        match keyword_kind(&text) {
            Some(kind) => Token::new(kind, span, String::new()),
            None => Token::new(TokenKind::Ident, span, text),
        }
    }

    fn here(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn bump(&mut self) {
        if let Some(b) = self.peek_byte() {
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_next_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

fn keyword_kind(text: &str) -> Option<TokenKind> {
    Some(match text {
        "declare" => TokenKind::Declare,
        "const" => TokenKind::Const,
        "owned" => TokenKind::Owned,
        "fn" => TokenKind::Fn,
        "func" => TokenKind::Func,
        "macro" => TokenKind::Macro,
        "class" => TokenKind::Class,
        "extends" => TokenKind::Extends,
        "constructor" => TokenKind::Constructor,
        "extern" => TokenKind::Extern,
        "inline" => TokenKind::Inline,
        "flag" => TokenKind::Flag,
        "operator" => TokenKind::Operator,
        "unary" => TokenKind::Unary,
        "throws" => TokenKind::Throws,
        "delete" => TokenKind::Delete,
        "expand" => TokenKind::Expand,
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "step" => TokenKind::Step,
        "parallel" => TokenKind::Parallel,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "do" => TokenKind::Do,
        "end" => TokenKind::End,
        "public" => TokenKind::Public,
        "protected" => TokenKind::Protected,
        "private" => TokenKind::Private,
        "static" => TokenKind::Static,
        "virtual" => TokenKind::Virtual,
        "override" => TokenKind::Override,
        "final" => TokenKind::Final,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        // Operator words lex to the same kinds as their symbol forms.
        "and" => TokenKind::AndAnd,
        "or" => TokenKind::OrOr,
        "not" => TokenKind::Bang,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescript_diag::DiagnosticBag;

    fn lex_ok(source: &str) -> Vec<Token> {
        let mut diag = DiagnosticBag::new(16);
        let tokens = lex(source, &mut diag);
        assert!(
            !diag.has_errors(),
            "valid source should lex without errors: {:?}",
            diag.diagnostics
        );
        tokens
    }

    #[test]
    fn lexes_declaration_into_expected_tokens() {
        let tokens = lex_ok("declare s: i64 = 0\n");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Declare,
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::IntLit,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[1].text, "s");
        assert_eq!(tokens[3].text, "i64");
        assert_eq!(tokens[5].text, "0");
    }

    #[test]
    fn range_dots_do_not_consume_into_float() {
        let tokens = lex_ok("for i in 0..5 do end");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::For,
                TokenKind::Ident,
                TokenKind::In,
                TokenKind::IntLit,
                TokenKind::DotDot,
                TokenKind::IntLit,
                TokenKind::Do,
                TokenKind::End,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_literal_requires_digit_after_dot() {
        let tokens = lex_ok("3.25 7.");
        assert_eq!(tokens[0].kind, TokenKind::FloatLit);
        assert_eq!(tokens[0].text, "3.25");
        assert_eq!(tokens[1].kind, TokenKind::IntLit);
        assert_eq!(tokens[2].kind, TokenKind::Dot);
    }

    #[test]
    fn operator_words_lex_like_symbols() {
        let tokens = lex_ok("a and b or not c");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::AndAnd,
                TokenKind::Ident,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn power_assign_forms_lex_to_one_kind() {
        let tokens = lex_ok("x **= 2; y ^= 2");
        assert_eq!(tokens[1].kind, TokenKind::PowEq);
        assert_eq!(tokens[5].kind, TokenKind::PowEq);
    }

    #[test]
    fn spans_are_one_based_lines_and_columns() {
        let tokens = lex_ok("a\n  b");
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[1].span, Span::new(1, 2)); // newline token
        assert_eq!(tokens[2].span, Span::new(2, 3));
    }

    #[test]
    fn string_escapes_decode_and_bad_escape_errors() {
        let tokens = lex_ok("\"a\\n\\t\\\"b\\\\\"");
        assert_eq!(tokens[0].kind, TokenKind::StringLit);
        assert_eq!(tokens[0].text, "a\n\t\"b\\");

        let mut diag = DiagnosticBag::new(4);
        let _ = lex("\"bad\\q\"", &mut diag);
        assert!(diag.has_errors());
        assert_eq!(diag.diagnostics[0].code, "LSL0003");
    }

    #[test]
    fn unterminated_string_reports_at_opening_quote() {
        let mut diag = DiagnosticBag::new(4);
        let _ = lex("declare s = \"oops", &mut diag);
        assert!(diag.has_errors());
        assert_eq!(diag.diagnostics[0].code, "LSL0002");
        assert_eq!(diag.diagnostics[0].span, Some(Span::new(1, 13)));
    }

    #[test]
    fn line_comments_are_skipped_but_newline_survives() {
        let tokens = lex_ok("a // comment\nb");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }
}
