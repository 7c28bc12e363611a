//! Recursive-descent parser: tokens → value trees.
//!
//! The reader produces ordinary [`Value`]s; the generator consumes them
//! directly. Reader macros are expanded here into their call forms, and
//! `{…}` literals become a `(hash …)` call.

use crate::error::SprigError;
use crate::reader::lexer::{Lexer, Token, TokenKind};
use crate::symbols;
use crate::values::Value;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a whole source text into a sequence of top-level forms.
pub fn parse_source(source: &str) -> Result<Vec<Value>, SprigError> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| SprigError::Syntax(e.to_string()))?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut forms = Vec::new();
    while !parser.at_end() {
        forms.push(parser.parse_form()?);
    }
    Ok(forms)
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, SprigError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| SprigError::Syntax("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn parse_form(&mut self) -> Result<Value, SprigError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::LParen => self.parse_list(tok.line),
            TokenKind::LBracket => self.parse_array(tok.line),
            TokenKind::LBrace => self.parse_hash(tok.line),
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => Err(
                SprigError::Syntax(format!("unexpected closing delimiter at line {}", tok.line)),
            ),
            TokenKind::Quote => self.parse_reader_macro("quote"),
            TokenKind::Backtick => self.parse_reader_macro("syntax-quote"),
            TokenKind::Tilde => self.parse_reader_macro("unquote"),
            TokenKind::TildeAt => self.parse_reader_macro("unquote-splicing"),
            TokenKind::Int(n) => Ok(Value::Int(n)),
            TokenKind::Float(f) => Ok(Value::Float(f)),
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Char(c) => Ok(Value::Char(c)),
            TokenKind::Bool(b) => Ok(Value::Bool(b)),
            TokenKind::Symbol(name) => Ok(Value::Symbol(symbols::intern(&name))),
        }
    }

    fn parse_reader_macro(&mut self, head: &str) -> Result<Value, SprigError> {
        let form = self.parse_form()?;
        Ok(Value::list([Value::sym(head), form]))
    }

    fn parse_list(&mut self, open_line: usize) -> Result<Value, SprigError> {
        let mut items = Vec::new();
        loop {
            match self.peek().map(|t| &t.kind) {
                None => {
                    return Err(SprigError::Syntax(format!(
                        "unclosed '(' opened at line {}",
                        open_line
                    )))
                }
                Some(TokenKind::RParen) => {
                    self.pos += 1;
                    return Ok(Value::list(items));
                }
                Some(TokenKind::Symbol(s)) if s.as_str() == "." && !items.is_empty() => {
                    // dotted pair tail
                    self.pos += 1;
                    let tail = self.parse_form()?;
                    match self.next()?.kind {
                        TokenKind::RParen => {}
                        _ => {
                            return Err(SprigError::Syntax(format!(
                                "expected ')' after dotted tail at line {}",
                                open_line
                            )))
                        }
                    }
                    let mut out = tail;
                    for item in items.into_iter().rev() {
                        out = Value::cons(item, out);
                    }
                    return Ok(out);
                }
                Some(_) => items.push(self.parse_form()?),
            }
        }
    }

    fn parse_array(&mut self, open_line: usize) -> Result<Value, SprigError> {
        let mut items = Vec::new();
        loop {
            match self.peek().map(|t| &t.kind) {
                None => {
                    return Err(SprigError::Syntax(format!(
                        "unclosed '[' opened at line {}",
                        open_line
                    )))
                }
                Some(TokenKind::RBracket) => {
                    self.pos += 1;
                    return Ok(Value::array(items));
                }
                Some(_) => items.push(self.parse_form()?),
            }
        }
    }

    fn parse_hash(&mut self, open_line: usize) -> Result<Value, SprigError> {
        let mut items = vec![Value::sym("hash")];
        loop {
            match self.peek().map(|t| &t.kind) {
                None => {
                    return Err(SprigError::Syntax(format!(
                        "unclosed '{{' opened at line {}",
                        open_line
                    )))
                }
                Some(TokenKind::RBrace) => {
                    self.pos += 1;
                    return Ok(Value::list(items));
                }
                Some(_) => items.push(self.parse_form()?),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> Value {
        let forms = parse_source(src).unwrap();
        assert_eq!(forms.len(), 1);
        forms.into_iter().next().unwrap()
    }

    #[test]
    fn test_nested_lists() {
        let v = parse_one("(a (b c) d)");
        assert_eq!(v.display_pretty(), "(a (b c) d)");
    }

    #[test]
    fn test_array_literal() {
        let v = parse_one("[1 2 3]");
        assert!(matches!(v, Value::Array(_)));
        assert_eq!(v.display_pretty(), "[1 2 3]");
    }

    #[test]
    fn test_hash_literal_becomes_call() {
        let v = parse_one("{\"a\" 1}");
        let items = v.list_items().unwrap();
        assert_eq!(items[0], Value::sym("hash"));
        assert_eq!(items[1], Value::str("a"));
        assert_eq!(items[2], Value::Int(1));
    }

    #[test]
    fn test_quote_expansion() {
        let v = parse_one("'(1 2)");
        let items = v.list_items().unwrap();
        assert_eq!(items[0], Value::sym("quote"));
    }

    #[test]
    fn test_syntax_quote_family() {
        let v = parse_one("`(a ~b ~@c)");
        let outer = v.list_items().unwrap();
        assert_eq!(outer[0], Value::sym("syntax-quote"));
        let inner = outer[1].list_items().unwrap();
        assert_eq!(
            inner[1].list_items().unwrap()[0],
            Value::sym("unquote")
        );
        assert_eq!(
            inner[2].list_items().unwrap()[0],
            Value::sym("unquote-splicing")
        );
    }

    #[test]
    fn test_dotted_pair() {
        let v = parse_one("(1 . 2)");
        assert_eq!(v, Value::cons(Value::Int(1), Value::Int(2)));
    }

    #[test]
    fn test_unbalanced_errors() {
        assert!(parse_source("(1 2").is_err());
        assert!(parse_source(")").is_err());
    }

    #[test]
    fn test_multiple_top_level_forms() {
        let forms = parse_source("(def x 1) (def y 2)").unwrap();
        assert_eq!(forms.len(), 2);
    }
}
