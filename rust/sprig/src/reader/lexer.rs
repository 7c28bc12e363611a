//! Tokenizer for sprig source text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}, col {col}")]
    UnexpectedChar { ch: char, line: usize, col: usize },
    #[error("unterminated string at line {line}, col {col}")]
    UnterminatedString { line: usize, col: usize },
    #[error("invalid number at line {line}, col {col}")]
    InvalidNumber { line: usize, col: usize },
    #[error("invalid character literal at line {line}, col {col}")]
    InvalidChar { line: usize, col: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// `'` — expands to `(quote …)`.
    Quote,
    /// `` ` `` — expands to `(syntax-quote …)`.
    Backtick,
    /// `~` — expands to `(unquote …)`.
    Tilde,
    /// `~@` — expands to `(unquote-splicing …)`.
    TildeAt,
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Symbol(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() || ch == ',' {
                self.advance();
            } else if ch == ';' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let (line, col) = (self.line, self.col);
            let Some(ch) = self.current() else { break };
            let kind = match ch {
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                '[' => {
                    self.advance();
                    TokenKind::LBracket
                }
                ']' => {
                    self.advance();
                    TokenKind::RBracket
                }
                '{' => {
                    self.advance();
                    TokenKind::LBrace
                }
                '}' => {
                    self.advance();
                    TokenKind::RBrace
                }
                '\'' => {
                    self.advance();
                    TokenKind::Quote
                }
                '`' => {
                    self.advance();
                    TokenKind::Backtick
                }
                '~' => {
                    self.advance();
                    if self.current() == Some('@') {
                        self.advance();
                        TokenKind::TildeAt
                    } else {
                        TokenKind::Tilde
                    }
                }
                '"' => self.read_string(line, col)?,
                '#' if self.peek() == Some('\\') => self.read_char(line, col)?,
                c if c.is_ascii_digit() => self.read_number(line, col)?,
                '-' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number(line, col)?
                }
                c if is_symbol_char(c) => self.read_symbol(),
                other => {
                    return Err(LexError::UnexpectedChar {
                        ch: other,
                        line,
                        col,
                    })
                }
            };
            tokens.push(Token { kind, line, col });
        }
        Ok(tokens)
    }

    fn read_string(&mut self, line: usize, col: usize) -> Result<TokenKind, LexError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(LexError::UnterminatedString { line, col }),
                Some('"') => return Ok(TokenKind::Str(s)),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some(other) => {
                        s.push('\\');
                        s.push(other);
                    }
                    None => return Err(LexError::UnterminatedString { line, col }),
                },
                Some(ch) => s.push(ch),
            }
        }
    }

    fn read_char(&mut self, line: usize, col: usize) -> Result<TokenKind, LexError> {
        self.advance(); // '#'
        self.advance(); // '\'
        let mut name = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if name.is_empty() {
            // punctuation character literal, e.g. #\(
            return match self.advance() {
                Some(c) => Ok(TokenKind::Char(c)),
                None => Err(LexError::InvalidChar { line, col }),
            };
        }
        let ch = match name.as_str() {
            "newline" => '\n',
            "tab" => '\t',
            "space" => ' ',
            "return" => '\r',
            s if s.chars().count() == 1 => s.chars().next().unwrap(),
            _ => return Err(LexError::InvalidChar { line, col }),
        };
        Ok(TokenKind::Char(ch))
    }

    fn read_number(&mut self, line: usize, col: usize) -> Result<TokenKind, LexError> {
        let mut text = String::new();
        if self.current() == Some('-') {
            text.push('-');
            self.advance();
        }
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let mut hex = String::new();
            while let Some(c) = self.current() {
                if c.is_ascii_hexdigit() {
                    hex.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let n = i64::from_str_radix(&hex, 16)
                .map_err(|_| LexError::InvalidNumber { line, col })?;
            let n = if text.starts_with('-') { -n } else { n };
            return Ok(TokenKind::Int(n));
        }
        let mut is_float = false;
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '.' && !is_float && self.peek().is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                text.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E')
                && self
                    .peek()
                    .is_some_and(|d| d.is_ascii_digit() || d == '-' || d == '+')
            {
                is_float = true;
                text.push(c);
                self.advance();
                if matches!(self.current(), Some('-') | Some('+')) {
                    text.push(self.advance().unwrap());
                }
            } else {
                break;
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| LexError::InvalidNumber { line, col })
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| LexError::InvalidNumber { line, col })
        }
    }

    fn read_symbol(&mut self) -> TokenKind {
        let mut name = String::new();
        while let Some(c) = self.current() {
            if is_symbol_char(c) {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match name.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            _ => TokenKind::Symbol(name),
        }
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric()
        || matches!(
            c,
            '+' | '-'
                | '*'
                | '/'
                | '<'
                | '>'
                | '='
                | '!'
                | '?'
                | '&'
                | '%'
                | '_'
                | '.'
                | '$'
                | ':'
                | '#'
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_delimiters_and_atoms() {
        assert_eq!(
            lex("(+ 1 2.5)"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol("+".into()),
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn test_comments_and_commas_skipped() {
        assert_eq!(
            lex("[1, 2] ; trailing\n3"),
            vec![
                TokenKind::LBracket,
                TokenKind::Int(1),
                TokenKind::Int(2),
                TokenKind::RBracket,
                TokenKind::Int(3),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(lex(r#""a\nb""#), vec![TokenKind::Str("a\nb".into())]);
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(lex(r"#\a"), vec![TokenKind::Char('a')]);
        assert_eq!(lex(r"#\newline"), vec![TokenKind::Char('\n')]);
        assert_eq!(lex(r"#\space"), vec![TokenKind::Char(' ')]);
    }

    #[test]
    fn test_negative_and_hex_numbers() {
        assert_eq!(lex("-7"), vec![TokenKind::Int(-7)]);
        assert_eq!(lex("0xff"), vec![TokenKind::Int(255)]);
        assert_eq!(lex("-1.5e2"), vec![TokenKind::Float(-150.0)]);
    }

    #[test]
    fn test_minus_alone_is_symbol() {
        assert_eq!(lex("-"), vec![TokenKind::Symbol("-".into())]);
    }

    #[test]
    fn test_reader_macros() {
        assert_eq!(
            lex("'x `y ~z ~@w"),
            vec![
                TokenKind::Quote,
                TokenKind::Symbol("x".into()),
                TokenKind::Backtick,
                TokenKind::Symbol("y".into()),
                TokenKind::Tilde,
                TokenKind::Symbol("z".into()),
                TokenKind::TildeAt,
                TokenKind::Symbol("w".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_string_errors() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }
}
