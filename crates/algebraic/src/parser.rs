//! Parser for the rule language.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Pos, Token};

/// Parse a rule table and return its AST.
pub fn parse(lexer: Lexer) -> Result<Defs> {
    let parser = Parser::new(lexer);
    parser.parse_defs()
}

/// Parse rule-table source text.
pub fn parse_str(src: &str) -> Result<Defs> {
    parse(Lexer::new(src)?)
}

/// The rule parser.
///
/// Takes in a lexer and creates an AST.
#[derive(Clone, Debug)]
struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn new(lexer: Lexer<'a>) -> Parser<'a> {
        Parser { lexer }
    }

    fn error(&self, pos: Pos, msg: String) -> Error {
        Error::Parse { msg, pos }
    }

    fn take<F: Fn(&Token) -> bool>(&mut self, f: F) -> Result<Token> {
        if let Some((pos, peek)) = self.lexer.peek() {
            if !f(peek) {
                return Err(self.error(*pos, format!("Unexpected token {peek:?}")));
            }
        }
        match self.lexer.next()? {
            Some((_, tok)) => Ok(tok),
            None => Err(self.error(self.lexer.pos(), "Unexpected EOF".to_string())),
        }
    }

    fn is<F: Fn(&Token) -> bool>(&self, f: F) -> bool {
        if let Some((_, peek)) = self.lexer.peek() {
            f(peek)
        } else {
            false
        }
    }

    fn pos(&self) -> Pos {
        self.lexer
            .peek()
            .map_or_else(|| self.lexer.pos(), |(pos, _)| *pos)
    }

    fn is_lparen(&self) -> bool {
        self.is(|tok| *tok == Token::LParen)
    }
    fn is_rparen(&self) -> bool {
        self.is(|tok| *tok == Token::RParen)
    }
    fn is_at(&self) -> bool {
        self.is(|tok| *tok == Token::At)
    }
    fn is_sym_str(&self, s: &str) -> bool {
        self.is(|tok| matches!(tok, Token::Symbol(tok_s) if tok_s == s))
    }

    fn lparen(&mut self) -> Result<()> {
        self.take(|tok| *tok == Token::LParen).map(|_| ())
    }
    fn rparen(&mut self) -> Result<()> {
        self.take(|tok| *tok == Token::RParen).map(|_| ())
    }

    fn symbol(&mut self) -> Result<String> {
        match self.take(|tok| tok.is_sym())? {
            Token::Symbol(s) => Ok(s),
            _ => unreachable!(),
        }
    }

    fn parse_defs(mut self) -> Result<Defs> {
        let mut rules = vec![];
        while !self.lexer.eof() {
            rules.push(self.parse_rule()?);
        }
        Ok(Defs { rules })
    }

    fn parse_rule(&mut self) -> Result<RuleDef> {
        self.lparen()?;
        let pos = self.pos();
        let keyword = self.symbol()?;
        if keyword != "rule" {
            return Err(self.error(pos, format!("Unknown definition `{keyword}`")));
        }
        let inexact = if self.is_sym_str("inexact") {
            self.symbol()?;
            true
        } else {
            false
        };
        let search = self.parse_pattern()?;
        let replace = self.parse_pattern()?;
        if self.lexer.eof() {
            return Err(self.error(self.pos(), "Unexpected EOF".to_string()));
        }
        if !self.is_rparen() {
            return Err(self.error(
                self.pos(),
                "Expected `)` after the replacement pattern".to_string(),
            ));
        }
        self.rparen()?;
        Ok(RuleDef {
            pos,
            inexact,
            search,
            replace,
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern> {
        let pos = self.pos();
        if self.is_lparen() {
            self.lparen()?;
            let sym_pos = self.pos();
            if !self.is(|tok| tok.is_sym()) {
                return Err(self.error(sym_pos, "Expected an operator symbol".to_string()));
            }
            let sym = Ident(self.symbol()?, sym_pos);
            let mut args = vec![];
            while !self.is_rparen() {
                if self.lexer.eof() {
                    return Err(self.error(self.pos(), "Unexpected EOF".to_string()));
                }
                args.push(self.parse_pattern()?);
            }
            self.rparen()?;
            return Ok(Pattern::Term { sym, args, pos });
        }

        match self.lexer.next()? {
            Some((_, Token::Int(val))) => Ok(Pattern::Int { val, pos }),
            Some((_, Token::Float(val))) => Ok(Pattern::Float { val, pos }),
            Some((_, Token::Symbol(s))) if s == "true" || s == "false" => Ok(Pattern::Bool {
                val: s == "true",
                pos,
            }),
            Some((_, Token::Symbol(s))) => {
                let annot = if self.is_at() {
                    self.take(|tok| *tok == Token::At)?;
                    Some(self.parse_annot()?)
                } else {
                    None
                };
                Ok(Pattern::Var {
                    name: Ident(s, pos),
                    annot,
                })
            }
            Some((_, tok)) => Err(self.error(pos, format!("Unexpected token {tok:?}"))),
            None => Err(self.error(pos, "Unexpected EOF".to_string())),
        }
    }

    fn parse_annot(&mut self) -> Result<Annot> {
        let pos = self.pos();
        match self.lexer.next()? {
            Some((_, Token::Int(bits))) => Ok(Annot::Bits(bits, pos)),
            Some((_, Token::Symbol(s))) => Ok(Annot::Named(Ident(s, pos))),
            _ => Err(self.error(pos, "Expected a type after `@`".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rules() {
        let defs = parse_str(
            "(rule (fadd a 0.0) a)\n\
             (rule inexact (feq (fadd a b) 0.0) (feq a (fneg b)))\n\
             (rule (iand #a@32 b@int) true)",
        )
        .unwrap();
        assert_eq!(defs.rules.len(), 3);
        assert!(!defs.rules[0].inexact);
        assert!(defs.rules[1].inexact);
        assert_eq!(defs.rules[1].pos.line, 2);

        match &defs.rules[2].search {
            Pattern::Term { sym, args, .. } => {
                assert_eq!(sym.0, "iand");
                assert!(matches!(
                    &args[0],
                    Pattern::Var { name, annot: Some(Annot::Bits(32, _)) } if name.0 == "#a"
                ));
                assert!(matches!(
                    &args[1],
                    Pattern::Var { annot: Some(Annot::Named(Ident(n, _))), .. } if n == "int"
                ));
            }
            p => panic!("unexpected pattern {p:?}"),
        }
        assert!(matches!(
            defs.rules[2].replace,
            Pattern::Bool { val: true, .. }
        ));
    }

    #[test]
    fn parse_errors() {
        let err = parse_str("(rewrite (fneg a) a)").unwrap_err();
        assert!(err.to_string().contains("Unknown definition"), "{err}");

        let err = parse_str("(rule (fneg a) a").unwrap_err();
        assert!(err.to_string().contains("Unexpected EOF"), "{err}");

        let err = parse_str("(rule (fneg a) a b)").unwrap_err();
        assert!(err.to_string().contains("Expected `)`"), "{err}");

        let err = parse_str("(rule ((fneg a)) a)").unwrap_err();
        assert!(err.to_string().contains("operator symbol"), "{err}");

        let err = parse_str("(rule (fneg a@) a)").unwrap_err();
        assert!(err.to_string().contains("after `@`"), "{err}");
    }

    #[test]
    fn error_positions() {
        let err = parse_str("(rule (fneg a)\n  a\n  b)").unwrap_err();
        match err {
            Error::Parse { pos, .. } => assert_eq!((pos.line, pos.col), (3, 3)),
            e => panic!("unexpected error {e}"),
        }
    }
}
