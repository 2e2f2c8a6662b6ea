//! Lexer for the rule language.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

/// The lexer.
///
/// Breaks source text up into a sequence of tokens (with source positions).
#[derive(Clone, Debug)]
pub struct Lexer<'src> {
    src: &'src str,
    pos: Pos,
    lookahead: Option<(Pos, Token)>,
}

/// A source position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, PartialOrd, Ord)]
pub struct Pos {
    /// Byte offset in the source text.
    pub offset: usize,
    /// One-based line number.
    pub line: usize,
    /// One-based column number.
    pub col: usize,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A token of rule source.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// Left paren.
    LParen,
    /// Right paren.
    RParen,
    /// A symbol, e.g. `fadd` or `#a`.
    Symbol(String),
    /// An integer.
    Int(i128),
    /// A floating-point number: contains a `.` or an exponent, or is one of
    /// `inf`, `-inf`, `nan`.
    Float(f64),
    /// `@`
    At,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source contents.
    pub fn new(src: &'src str) -> Result<Lexer<'src>> {
        let mut l = Lexer {
            src,
            pos: Pos {
                offset: 0,
                line: 1,
                col: 1,
            },
            lookahead: None,
        };
        l.reload()?;
        Ok(l)
    }

    /// Get the lexer's current source position.
    pub fn pos(&self) -> Pos {
        self.pos
    }

    fn advance_pos(&mut self) {
        if self.peek_byte() == Some(b'\n') {
            self.pos.line += 1;
            self.pos.col = 1;
        } else {
            self.pos.col += 1;
        }
        self.pos.offset += 1;
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance_pos();
        }
    }

    fn error(&self, pos: Pos, msg: impl Into<String>) -> Error {
        Error::Parse {
            msg: msg.into(),
            pos,
        }
    }

    fn next_token(&mut self) -> Result<Option<(Pos, Token)>> {
        fn is_sym_first_char(c: u8) -> bool {
            match c {
                b'-' | b'0'..=b'9' | b'(' | b')' | b';' | b'@' => false,
                c if c.is_ascii_whitespace() => false,
                _ => true,
            }
        }
        fn is_sym_other_char(c: u8) -> bool {
            match c {
                b'(' | b')' | b';' | b'@' => false,
                c if c.is_ascii_whitespace() => false,
                _ => true,
            }
        }

        // Skip any whitespace and any comments.
        while let Some(c) = self.peek_byte() {
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => self.advance_pos(),
                b';' => {
                    while let Some(c) = self.peek_byte() {
                        match c {
                            b'\n' | b'\r' => break,
                            _ => self.advance_pos(),
                        }
                    }
                }
                b'(' if self.lookahead_byte(1) == Some(b';') => {
                    let pos = self.pos();
                    self.advance_by(2);
                    let mut depth = 1usize;
                    loop {
                        match self.peek_byte() {
                            None => return Err(self.error(pos, "unterminated block comment")),
                            Some(b'(') if self.lookahead_byte(1) == Some(b';') => {
                                self.advance_by(2);
                                depth += 1;
                            }
                            Some(b';') if self.lookahead_byte(1) == Some(b')') => {
                                self.advance_by(2);
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(_) => self.advance_pos(),
                        }
                    }
                }
                _ => break,
            }
        }

        let Some(c) = self.peek_byte() else {
            return Ok(None);
        };
        let char_pos = self.pos();
        match c {
            b'(' => {
                self.advance_pos();
                Ok(Some((char_pos, Token::LParen)))
            }
            b')' => {
                self.advance_pos();
                Ok(Some((char_pos, Token::RParen)))
            }
            b'@' => {
                self.advance_pos();
                Ok(Some((char_pos, Token::At)))
            }
            c if is_sym_first_char(c) => {
                let start = self.pos.offset;
                while let Some(c) = self.peek_byte() {
                    match c {
                        c if is_sym_other_char(c) => self.advance_pos(),
                        _ => break,
                    }
                }
                let s = &self.src[start..self.pos.offset];
                debug_assert!(!s.is_empty());
                let tok = match s {
                    "inf" => Token::Float(f64::INFINITY),
                    "nan" => Token::Float(f64::NAN),
                    _ => Token::Symbol(s.to_string()),
                };
                Ok(Some((char_pos, tok)))
            }
            c @ (b'0'..=b'9' | b'-') => self.number(char_pos, c == b'-').map(Some),
            c => Err(self.error(self.pos, format!("Unexpected character '{}'", c as char))),
        }
    }

    fn number(&mut self, start_pos: Pos, neg: bool) -> Result<(Pos, Token)> {
        if neg {
            self.advance_pos();
            if self.src[self.pos.offset..].starts_with("inf")
                && !self
                    .lookahead_byte(3)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
            {
                self.advance_by(3);
                return Ok((start_pos, Token::Float(f64::NEG_INFINITY)));
            }
        }

        let mut radix = 10;

        // Check for prefixed literals.
        match (self.peek_byte(), self.lookahead_byte(1)) {
            (Some(b'0'), Some(b'x' | b'X')) => {
                self.advance_by(2);
                radix = 16;
            }
            (Some(b'0'), Some(b'o' | b'O')) => {
                self.advance_by(2);
                radix = 8;
            }
            (Some(b'0'), Some(b'b' | b'B')) => {
                self.advance_by(2);
                radix = 2;
            }
            _ => {}
        }

        let start = self.pos.offset;
        let mut is_float = false;
        if radix == 10 {
            self.skip_digits();
            if self.peek_byte() == Some(b'.') {
                is_float = true;
                self.advance_pos();
                self.skip_digits();
            }
            if let Some(b'e' | b'E') = self.peek_byte() {
                is_float = true;
                self.advance_pos();
                if let Some(b'+' | b'-') = self.peek_byte() {
                    self.advance_pos();
                }
                self.skip_digits();
            }
        } else {
            while let Some(b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' | b'_') = self.peek_byte() {
                self.advance_pos();
            }
        }
        let s = &self.src[start..self.pos.offset];
        if s.is_empty() {
            return Err(self.error(start_pos, "expected digits"));
        }
        let s = if s.contains('_') {
            Cow::Owned(s.replace('_', ""))
        } else {
            Cow::Borrowed(s)
        };

        if is_float {
            let num: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| self.error(start_pos, e.to_string()))?;
            let num = if neg { -num } else { num };
            return Ok((start_pos, Token::Float(num)));
        }

        // Support either signed range (-2^127..2^127) or
        // unsigned range (0..2^128).
        let num = match u128::from_str_radix(&s, radix) {
            Ok(num) => num,
            Err(err) => return Err(self.error(start_pos, err.to_string())),
        };

        let num = match (neg, num) {
            (true, 0x80000000000000000000000000000000) => {
                return Err(self.error(start_pos, "integer literal cannot fit in i128"))
            }
            (true, _) => -(num as i128),
            (false, _) => num as i128,
        };
        Ok((start_pos, Token::Int(num)))
    }

    fn skip_digits(&mut self) {
        while let Some(b'0'..=b'9' | b'_') = self.peek_byte() {
            self.advance_pos();
        }
    }

    /// Get the next token from this lexer's token stream, if any.
    pub fn next(&mut self) -> Result<Option<(Pos, Token)>> {
        let tok = self.lookahead.take();
        self.reload()?;
        Ok(tok)
    }

    fn reload(&mut self) -> Result<()> {
        if self.lookahead.is_none() && self.pos.offset < self.src.len() {
            self.lookahead = self.next_token()?;
        }
        Ok(())
    }

    /// Peek ahead at the next token.
    pub fn peek(&self) -> Option<&(Pos, Token)> {
        self.lookahead.as_ref()
    }

    /// Are we at the end of the source input?
    pub fn eof(&self) -> bool {
        self.lookahead.is_none()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.lookahead_byte(0)
    }

    fn lookahead_byte(&self, n: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos.offset + n).copied()
    }
}

impl Token {
    /// Is this an `Int` token?
    pub fn is_int(&self) -> bool {
        matches!(self, Token::Int(_))
    }

    /// Is this a `Float` token?
    pub fn is_float(&self) -> bool {
        matches!(self, Token::Float(_))
    }

    /// Is this a `Sym` token?
    pub fn is_sym(&self) -> bool {
        matches!(self, Token::Symbol(_))
    }
}
