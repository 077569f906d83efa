//! Hand-written lexer with one token of lookahead.
//!
//! Statement terminators are newlines and `;`, both surfaced as
//! [`TokenKind::Line`]. String interpolation is handled here: a string
//! containing `$name` or `${expr}` is emitted as one or more
//! [`TokenKind::StrInterp`] parts (each meaning "an interpolated expression
//! follows"), the expression's tokens, and a final [`TokenKind::Str`] part.
//! Interpolations nest up to [`MAX_INTERP_DEPTH`] levels.

use std::str::FromStr;

use strum::EnumString;

use crate::error::ErrorKind;

/// Maximum nesting depth of string interpolation.
pub(crate) const MAX_INTERP_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    // Literals and names.
    Number(f64),
    Str(String),
    /// A string part immediately followed by an interpolated expression.
    StrInterp(String),
    Name(String),

    // Keywords.
    Class,
    From,
    Import,
    As,
    Def,
    Native,
    Fn,
    End,
    Null,
    In,
    Is,
    And,
    Or,
    Not,
    True,
    False,
    SelfKw,
    Super,
    Do,
    Then,
    While,
    For,
    If,
    Elif,
    Else,
    Break,
    Continue,
    Return,

    // Operators and punctuation.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LtLt,
    GtGt,
    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    NotEq,
    Bang,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    LtLtEq,
    GtGtEq,
    DotDot,
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    /// Statement terminator: newline or `;`.
    Line,
    Eof,
}

#[derive(Debug, Clone, Copy, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Keyword {
    Class,
    From,
    Import,
    As,
    Def,
    Native,
    Fn,
    End,
    Null,
    In,
    Is,
    And,
    Or,
    Not,
    True,
    False,
    #[strum(serialize = "self")]
    SelfKw,
    Super,
    Do,
    Then,
    While,
    For,
    If,
    Elif,
    Else,
    Break,
    Continue,
    Return,
}

impl Keyword {
    fn token(self) -> TokenKind {
        match self {
            Self::Class => TokenKind::Class,
            Self::From => TokenKind::From,
            Self::Import => TokenKind::Import,
            Self::As => TokenKind::As,
            Self::Def => TokenKind::Def,
            Self::Native => TokenKind::Native,
            Self::Fn => TokenKind::Fn,
            Self::End => TokenKind::End,
            Self::Null => TokenKind::Null,
            Self::In => TokenKind::In,
            Self::Is => TokenKind::Is,
            Self::And => TokenKind::And,
            Self::Or => TokenKind::Or,
            Self::Not => TokenKind::Not,
            Self::True => TokenKind::True,
            Self::False => TokenKind::False,
            Self::SelfKw => TokenKind::SelfKw,
            Self::Super => TokenKind::Super,
            Self::Do => TokenKind::Do,
            Self::Then => TokenKind::Then,
            Self::While => TokenKind::While,
            Self::For => TokenKind::For,
            Self::If => TokenKind::If,
            Self::Elif => TokenKind::Elif,
            Self::Else => TokenKind::Else,
            Self::Break => TokenKind::Break,
            Self::Continue => TokenKind::Continue,
            Self::Return => TokenKind::Return,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub(crate) fn eof(line: u32, at: usize) -> Self {
        Self {
            kind: TokenKind::Eof,
            line,
            start: at,
            end: at,
        }
    }
}

/// A lexical error, carrying enough context to become a [`crate::error::Diagnostic`].
#[derive(Debug, Clone)]
pub(crate) struct LexError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: u32,
    pub span: (usize, usize),
    /// True when the input simply ran out mid-construct; the REPL uses this
    /// to ask for continuation lines.
    pub unexpected_eof: bool,
}

impl LexError {
    fn new(message: impl Into<String>, line: u32, span: (usize, usize)) -> Self {
        Self {
            kind: ErrorKind::Lexical,
            message: message.into(),
            line,
            span,
            unexpected_eof: false,
        }
    }

    fn eof(message: impl Into<String>, line: u32, at: usize) -> Self {
        Self {
            kind: ErrorKind::Lexical,
            message: message.into(),
            line,
            span: (at, at),
            unexpected_eof: true,
        }
    }

    fn overflow(message: impl Into<String>, line: u32, span: (usize, usize)) -> Self {
        Self {
            kind: ErrorKind::Overflow,
            message: message.into(),
            line,
            span,
            unexpected_eof: false,
        }
    }
}

/// Per-level interpolation state.
#[derive(Debug)]
struct InterpFrame {
    /// Quote byte of the string this interpolation lives in.
    quote: u8,
    /// True for `${expr}`, false for the single-name `$name` form.
    braced: bool,
    /// Open-brace nesting inside a braced interpolation.
    brace_depth: u32,
    /// For the name form: whether the one identifier token was emitted.
    name_emitted: bool,
}

#[derive(Debug)]
pub(crate) struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    interp: Vec<InterpFrame>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        // A leading UTF-8 BOM is skipped.
        let src = source.strip_prefix('\u{feff}').unwrap_or(source);
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            interp: Vec::new(),
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    #[inline]
    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            line: self.line,
            start,
            end: self.pos,
        }
    }

    /// Produces the next token.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        // A finished single-name interpolation resumes its string.
        if self
            .interp
            .last()
            .is_some_and(|f| !f.braced && f.name_emitted)
        {
            let frame = self.interp.pop().expect("checked above");
            return self.scan_string(frame.quote, self.pos);
        }

        self.skip_trivia();
        let start = self.pos;
        let Some(byte) = self.bump() else {
            return Ok(Token::eof(self.line, start));
        };

        match byte {
            b'\n' => {
                let token = self.token(TokenKind::Line, start);
                self.line += 1;
                Ok(token)
            }
            b';' => Ok(self.token(TokenKind::Line, start)),
            b'(' => Ok(self.token(TokenKind::LParen, start)),
            b')' => Ok(self.token(TokenKind::RParen, start)),
            b'[' => Ok(self.token(TokenKind::LBracket, start)),
            b']' => Ok(self.token(TokenKind::RBracket, start)),
            b'{' => {
                if let Some(frame) = self.interp.last_mut() {
                    if frame.braced {
                        frame.brace_depth += 1;
                    }
                }
                Ok(self.token(TokenKind::LBrace, start))
            }
            b'}' => {
                if let Some(frame) = self.interp.last_mut() {
                    if frame.braced {
                        if frame.brace_depth == 0 {
                            let frame = self.interp.pop().expect("checked above");
                            return self.scan_string(frame.quote, start);
                        }
                        frame.brace_depth -= 1;
                    }
                }
                Ok(self.token(TokenKind::RBrace, start))
            }
            b',' => Ok(self.token(TokenKind::Comma, start)),
            b':' => Ok(self.token(TokenKind::Colon, start)),
            b'.' => {
                if self.matches(b'.') {
                    Ok(self.token(TokenKind::DotDot, start))
                } else {
                    Ok(self.token(TokenKind::Dot, start))
                }
            }
            b'+' => Ok(self.two(b'=', TokenKind::PlusEq, TokenKind::Plus, start)),
            b'-' => Ok(self.two(b'=', TokenKind::MinusEq, TokenKind::Minus, start)),
            b'*' => {
                if self.matches(b'*') {
                    Ok(self.token(TokenKind::StarStar, start))
                } else {
                    Ok(self.two(b'=', TokenKind::StarEq, TokenKind::Star, start))
                }
            }
            b'/' => Ok(self.two(b'=', TokenKind::SlashEq, TokenKind::Slash, start)),
            b'%' => Ok(self.two(b'=', TokenKind::PercentEq, TokenKind::Percent, start)),
            b'&' => Ok(self.two(b'=', TokenKind::AmpEq, TokenKind::Amp, start)),
            b'|' => Ok(self.two(b'=', TokenKind::PipeEq, TokenKind::Pipe, start)),
            b'^' => Ok(self.two(b'=', TokenKind::CaretEq, TokenKind::Caret, start)),
            b'~' => Ok(self.token(TokenKind::Tilde, start)),
            b'=' => Ok(self.two(b'=', TokenKind::EqEq, TokenKind::Eq, start)),
            b'!' => Ok(self.two(b'=', TokenKind::NotEq, TokenKind::Bang, start)),
            b'<' => {
                if self.matches(b'<') {
                    Ok(self.two(b'=', TokenKind::LtLtEq, TokenKind::LtLt, start))
                } else {
                    Ok(self.two(b'=', TokenKind::LtEq, TokenKind::Lt, start))
                }
            }
            b'>' => {
                if self.matches(b'>') {
                    Ok(self.two(b'=', TokenKind::GtGtEq, TokenKind::GtGt, start))
                } else {
                    Ok(self.two(b'=', TokenKind::GtEq, TokenKind::Gt, start))
                }
            }
            b'"' | b'\'' => self.scan_string(byte, start),
            b'0'..=b'9' => self.scan_number(start),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => Ok(self.scan_name(start)),
            other => Err(LexError::new(
                format!("invalid byte 0x{other:02x} in source"),
                self.line,
                (start, self.pos),
            )),
        }
    }

    fn two(&mut self, next: u8, matched: TokenKind, plain: TokenKind, start: usize) -> Token {
        if self.matches(next) {
            self.token(matched, start)
        } else {
            self.token(plain, start)
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' => {
                    self.pos += 1;
                }
                b'#' => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_name(&mut self, start: usize) -> Token {
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let kind = match Keyword::from_str(text) {
            Ok(keyword) => keyword.token(),
            Err(_) => TokenKind::Name(text.to_owned()),
        };
        let token = self.token(kind, start);
        // The single-name interpolation form takes exactly this one token.
        if let Some(frame) = self.interp.last_mut() {
            if !frame.braced && !frame.name_emitted {
                frame.name_emitted = true;
            }
        }
        token
    }

    fn scan_number(&mut self, start: usize) -> Result<Token, LexError> {
        let first = self.bytes[start];
        if first == b'0' && self.peek().is_some_and(|b| b == b'x' || b == b'X') {
            self.pos += 1;
            return self.scan_radix(start, 16);
        }
        if first == b'0' && self.peek().is_some_and(|b| b == b'b' || b == b'B') {
            self.pos += 1;
            return self.scan_radix(start, 2);
        }

        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        // A fractional part needs a digit after the dot, so `1..3` stays a
        // range expression.
        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if self.peek().is_some_and(|b| b == b'e' || b == b'E') {
            let mark = self.pos;
            self.pos += 1;
            if self.peek().is_some_and(|b| b == b'+' || b == b'-') {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                // Not an exponent after all (`1e` followed by a name).
                self.pos = mark;
            }
        }

        let text = &self.src[start..self.pos];
        let value: f64 = text
            .parse()
            .map_err(|_| LexError::new(format!("invalid number literal '{text}'"), self.line, (start, self.pos)))?;
        if value.is_infinite() {
            return Err(LexError::overflow(
                "numeric literal out of range",
                self.line,
                (start, self.pos),
            ));
        }
        Ok(self.token(TokenKind::Number(value), start))
    }

    fn scan_radix(&mut self, start: usize, radix: u32) -> Result<Token, LexError> {
        let digits_start = self.pos;
        while self.peek().is_some_and(|b| (b as char).is_digit(radix)) {
            self.pos += 1;
        }
        let digits = &self.src[digits_start..self.pos];
        if digits.is_empty() {
            return Err(LexError::new(
                "expected digits after numeric base prefix",
                self.line,
                (start, self.pos),
            ));
        }
        let value = i64::from_str_radix(digits, radix).map_err(|_| {
            LexError::overflow("numeric literal out of range", self.line, (start, self.pos))
        })?;
        Ok(self.token(TokenKind::Number(value as f64), start))
    }

    fn scan_string(&mut self, quote: u8, start: usize) -> Result<Token, LexError> {
        let mut text = String::new();
        loop {
            let Some(byte) = self.bump() else {
                return Err(LexError::eof("unterminated string", self.line, self.pos));
            };
            match byte {
                b if b == quote => {
                    return Ok(self.token(TokenKind::Str(text), start));
                }
                b'\\' => {
                    let Some(escape) = self.bump() else {
                        return Err(LexError::eof("unterminated string", self.line, self.pos));
                    };
                    match escape {
                        b'n' => text.push('\n'),
                        b'r' => text.push('\r'),
                        b't' => text.push('\t'),
                        b'b' => text.push('\u{8}'),
                        b'f' => text.push('\u{c}'),
                        b'v' => text.push('\u{b}'),
                        b'\\' => text.push('\\'),
                        b'\'' => text.push('\''),
                        b'"' => text.push('"'),
                        b'$' => text.push('$'),
                        b'x' => {
                            let hi = self.hex_digit()?;
                            let lo = self.hex_digit()?;
                            text.push(char::from(hi * 16 + lo));
                        }
                        other => {
                            return Err(LexError::new(
                                format!("invalid escape character '{}'", char::from(other)),
                                self.line,
                                (self.pos - 1, self.pos),
                            ));
                        }
                    }
                }
                b'$' => {
                    if self.interp.len() >= MAX_INTERP_DEPTH {
                        return Err(LexError::new(
                            "string interpolation nested too deeply",
                            self.line,
                            (self.pos - 1, self.pos),
                        ));
                    }
                    match self.peek() {
                        Some(b'{') => {
                            self.pos += 1;
                            self.interp.push(InterpFrame {
                                quote,
                                braced: true,
                                brace_depth: 0,
                                name_emitted: false,
                            });
                            return Ok(self.token(TokenKind::StrInterp(text), start));
                        }
                        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                            self.interp.push(InterpFrame {
                                quote,
                                braced: false,
                                brace_depth: 0,
                                name_emitted: false,
                            });
                            return Ok(self.token(TokenKind::StrInterp(text), start));
                        }
                        _ => {
                            return Err(LexError::new(
                                "expected an identifier or '{' after '$'",
                                self.line,
                                (self.pos - 1, self.pos),
                            ));
                        }
                    }
                }
                b'\n' => {
                    self.line += 1;
                    text.push('\n');
                }
                _ => {
                    // Re-assemble multi-byte UTF-8 sequences byte by byte.
                    let char_start = self.pos - 1;
                    let width = utf8_width(byte);
                    for _ in 1..width {
                        self.bump();
                    }
                    match self.src.get(char_start..self.pos) {
                        Some(chunk) => text.push_str(chunk),
                        None => {
                            return Err(LexError::new(
                                "invalid utf-8 in string literal",
                                self.line,
                                (char_start, self.pos),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn hex_digit(&mut self) -> Result<u8, LexError> {
        let Some(b) = self.bump() else {
            return Err(LexError::eof("unterminated string", self.line, self.pos));
        };
        (b as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| {
                LexError::new(
                    "expected a hex digit in '\\x' escape",
                    self.line,
                    (self.pos - 1, self.pos),
                )
            })
    }
}

fn utf8_width(byte: u8) -> usize {
    match byte {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().expect("lex error");
            let done = token.kind == TokenKind::Eof;
            out.push(token.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn number_forms() {
        assert_eq!(
            kinds("12 0x1f 0b101 1.5 2e3"),
            vec![
                TokenKind::Number(12.0),
                TokenKind::Number(31.0),
                TokenKind::Number(5.0),
                TokenKind::Number(1.5),
                TokenKind::Number(2000.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn range_does_not_eat_a_fraction() {
        assert_eq!(
            kinds("1..3"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::DotDot,
                TokenKind::Number(3.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_and_names() {
        assert_eq!(
            kinds("if selfish self fn"),
            vec![
                TokenKind::If,
                TokenKind::Name("selfish".to_owned()),
                TokenKind::SelfKw,
                TokenKind::Fn,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\n\x41\$b""#),
            vec![TokenKind::Str("a\nA$b".to_owned()), TokenKind::Eof]
        );
    }

    #[test]
    fn simple_interpolation_splits_the_string() {
        assert_eq!(
            kinds(r#""x is $x!""#),
            vec![
                TokenKind::StrInterp("x is ".to_owned()),
                TokenKind::Name("x".to_owned()),
                TokenKind::Str("!".to_owned()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn braced_interpolation_lexes_a_full_expression() {
        assert_eq!(
            kinds(r#""sum ${a + b} done""#),
            vec![
                TokenKind::StrInterp("sum ".to_owned()),
                TokenKind::Name("a".to_owned()),
                TokenKind::Plus,
                TokenKind::Name("b".to_owned()),
                TokenKind::Str(" done".to_owned()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn braced_interpolation_allows_map_literals() {
        assert_eq!(
            kinds(r#""${ {} }""#),
            vec![
                TokenKind::StrInterp(String::new()),
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Str(String::new()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn interpolation_depth_is_bounded() {
        // Nine levels of nesting; the limit is eight.
        let mut source = String::new();
        for _ in 0..9 {
            source.push_str("\"${");
        }
        source.push('1');
        let mut lexer = Lexer::new(&source);
        let mut saw_error = false;
        for _ in 0..64 {
            match lexer.next_token() {
                Err(err) => {
                    assert!(err.message.contains("nested too deeply"));
                    saw_error = true;
                    break;
                }
                Ok(t) if t.kind == TokenKind::Eof => break,
                Ok(_) => {}
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn unterminated_string_flags_eof() {
        let mut lexer = Lexer::new("\"abc");
        let err = lexer.next_token().unwrap_err();
        assert!(err.unexpected_eof);
    }

    #[test]
    fn bom_is_skipped() {
        assert_eq!(
            kinds("\u{feff}null"),
            vec![TokenKind::Null, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("1 # two three\n4"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Line,
                TokenKind::Number(4.0),
                TokenKind::Eof
            ]
        );
    }
}
