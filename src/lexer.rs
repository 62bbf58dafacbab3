//! Lexical analysis for expression and command text

use crate::error::{EngineError, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Keywords
    True,
    False,
    Null,
    This,
    Await,
    Let,

    // Punctuation
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    Comma,        // ,
    Dot,          // .
    Semicolon,    // ;
    Question,     // ?
    Colon,        // :
    Assign,       // =

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Logic and comparison
    Bang,               // !
    AndAnd,             // &&
    OrOr,               // ||
    EqualEquals,        // == or ===
    NotEquals,          // != or !==
    LessThan,           // <
    LessThanOrEqual,    // <=
    GreaterThan,        // >
    GreaterThanOrEqual, // >=

    // Literals
    Number(f64),
    String(String),
    Template(String), // raw text between backticks, `${}` parts unparsed
    Identifier(String),

    // Statement separator outside of brackets
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::True => write!(f, "true"),
            TokenType::False => write!(f, "false"),
            TokenType::Null => write!(f, "null"),
            TokenType::This => write!(f, "this"),
            TokenType::Await => write!(f, "await"),
            TokenType::Let => write!(f, "let"),
            TokenType::LeftParen => write!(f, "("),
            TokenType::RightParen => write!(f, ")"),
            TokenType::LeftBracket => write!(f, "["),
            TokenType::RightBracket => write!(f, "]"),
            TokenType::Comma => write!(f, ","),
            TokenType::Dot => write!(f, "."),
            TokenType::Semicolon => write!(f, ";"),
            TokenType::Question => write!(f, "?"),
            TokenType::Colon => write!(f, ":"),
            TokenType::Assign => write!(f, "="),
            TokenType::Plus => write!(f, "+"),
            TokenType::Minus => write!(f, "-"),
            TokenType::Star => write!(f, "*"),
            TokenType::Slash => write!(f, "/"),
            TokenType::Percent => write!(f, "%"),
            TokenType::Bang => write!(f, "!"),
            TokenType::AndAnd => write!(f, "&&"),
            TokenType::OrOr => write!(f, "||"),
            TokenType::EqualEquals => write!(f, "=="),
            TokenType::NotEquals => write!(f, "!="),
            TokenType::LessThan => write!(f, "<"),
            TokenType::LessThanOrEqual => write!(f, "<="),
            TokenType::GreaterThan => write!(f, ">"),
            TokenType::GreaterThanOrEqual => write!(f, ">="),
            TokenType::Number(n) => write!(f, "number({})", n),
            TokenType::String(s) => write!(f, "string(\"{}\")", s),
            TokenType::Template(t) => write!(f, "template(`{}`)", t),
            TokenType::Identifier(id) => write!(f, "identifier({})", id),
            TokenType::Newline => write!(f, "newline"),
            TokenType::Eof => write!(f, "EOF"),
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,

    // Newlines only separate statements outside of () and []
    nesting: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            nesting: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::parse(self.line, self.column, message)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            if let Some(token) = self.next_token()? {
                // Collapse runs of separators
                if token.token_type == TokenType::Newline
                    && matches!(
                        tokens.last().map(|t: &Token| &t.token_type),
                        None | Some(TokenType::Newline) | Some(TokenType::Semicolon)
                    )
                {
                    continue;
                }
                tokens.push(token);
            }
        }

        tokens.push(Token {
            token_type: TokenType::Eof,
            line: self.line,
            column: self.column,
        });

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace_and_comments();

        if self.is_at_end() {
            return Ok(None);
        }

        let start_line = self.line;
        let start_column = self.column;
        let ch = self.advance();

        let token_type = match ch {
            '\n' => {
                self.line += 1;
                self.column = 1;
                if self.nesting > 0 {
                    return Ok(None);
                }
                TokenType::Newline
            }
            '(' => {
                self.nesting += 1;
                TokenType::LeftParen
            }
            ')' => {
                self.nesting = self.nesting.saturating_sub(1);
                TokenType::RightParen
            }
            '[' => {
                self.nesting += 1;
                TokenType::LeftBracket
            }
            ']' => {
                self.nesting = self.nesting.saturating_sub(1);
                TokenType::RightBracket
            }
            ',' => TokenType::Comma,
            ';' => TokenType::Semicolon,
            '?' => TokenType::Question,
            ':' => TokenType::Colon,
            '+' => TokenType::Plus,
            '-' => TokenType::Minus,
            '*' => TokenType::Star,
            '/' => TokenType::Slash,
            '%' => TokenType::Percent,
            '=' => {
                if self.match_char('=') {
                    self.match_char('=');
                    TokenType::EqualEquals
                } else {
                    TokenType::Assign
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.match_char('=');
                    TokenType::NotEquals
                } else {
                    TokenType::Bang
                }
            }
            '<' => {
                if self.match_char('=') {
                    TokenType::LessThanOrEqual
                } else {
                    TokenType::LessThan
                }
            }
            '>' => {
                if self.match_char('=') {
                    TokenType::GreaterThanOrEqual
                } else {
                    TokenType::GreaterThan
                }
            }
            '&' => {
                if self.match_char('&') {
                    TokenType::AndAnd
                } else {
                    return Err(self.error("Unexpected character: '&' (did you mean '&&'?)"));
                }
            }
            '|' => {
                if self.match_char('|') {
                    TokenType::OrOr
                } else {
                    return Err(self.error("Unexpected character: '|' (did you mean '||'?)"));
                }
            }
            '.' => {
                if self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    TokenType::Number(self.read_number(ch)?)
                } else {
                    TokenType::Dot
                }
            }
            '"' | '\'' => TokenType::String(self.read_string(ch)?),
            '`' => TokenType::Template(self.read_template()?),
            ch if ch.is_ascii_digit() => TokenType::Number(self.read_number(ch)?),
            ch if ch.is_alphabetic() || ch == '_' || ch == '$' => {
                let identifier = self.read_identifier(ch);
                Self::identify_keyword_or_identifier(identifier)
            }
            _ => {
                return Err(self.error(format!("Unexpected character: '{}'", ch)));
            }
        };

        Ok(Some(Token {
            token_type,
            line: start_line,
            column: start_column,
        }))
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() && ch != '\n' {
                self.advance();
            } else if ch == '/' && self.peek_next() == Some('/') {
                while let Some(c) = self.peek() {
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

    fn read_number(&mut self, first: char) -> Result<f64> {
        let mut text = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.advance();
            } else if c == '.' && !text.contains('.') && !text.contains('e')
                && self.peek_next().map_or(false, |n| n.is_ascii_digit())
            {
                text.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E') && !text.contains('e') {
                text.push('e');
                self.advance();
                if let Some(sign) = self.peek().filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map_err(|_| self.error(format!("Invalid number literal '{}'", text)))
    }

    fn read_string(&mut self, quote: char) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error("Unterminated string literal")),
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(value);
                }
                Some('\\') => {
                    self.advance();
                    value.push(self.read_escape()?);
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_escape(&mut self) -> Result<char> {
        if self.is_at_end() {
            return Err(self.error("Unterminated escape sequence"));
        }
        Ok(match self.advance() {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        })
    }

    /// Reads template text up to the closing backtick. `${...}` bodies are
    /// kept verbatim (braces balanced) for the parser to split later.
    fn read_template(&mut self) -> Result<String> {
        let mut raw = String::new();
        let mut depth = 0usize;
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("Unterminated template literal"));
            };
            self.advance();
            match c {
                '`' if depth == 0 => return Ok(raw),
                '\\' if depth == 0 => {
                    let escaped = self.read_escape()?;
                    if escaped == '$' || escaped == '`' || escaped == '\\' {
                        raw.push('\\');
                    }
                    raw.push(escaped);
                    continue;
                }
                '$' if depth == 0 && self.peek() == Some('{') => {
                    self.advance();
                    raw.push_str("${");
                    depth = 1;
                    continue;
                }
                '{' if depth > 0 => depth += 1,
                '}' if depth > 0 => depth -= 1,
                '\n' => {
                    self.line += 1;
                    self.column = 1;
                }
                _ => {}
            }
            raw.push(c);
        }
    }

    fn read_identifier(&mut self, first: char) -> String {
        let mut identifier = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                identifier.push(c);
                self.advance();
            } else {
                break;
            }
        }
        identifier
    }

    fn identify_keyword_or_identifier(identifier: String) -> TokenType {
        match identifier.as_str() {
            "true" => TokenType::True,
            "false" => TokenType::False,
            "null" | "undefined" => TokenType::Null,
            "this" => TokenType::This,
            "await" => TokenType::Await,
            "let" | "const" | "var" => TokenType::Let,
            _ => TokenType::Identifier(identifier),
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> char {
        if self.position < self.input.len() {
            let ch = self.input[self.position];
            self.position += 1;
            if ch != '\n' {
                self.column += 1;
            }
            ch
        } else {
            '\0'
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }
}

/// Tokenizes a whole expression in one call.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    Lexer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(input: &str) -> Vec<TokenType> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            types("this.a + 1 >= 2 && !x"),
            vec![
                TokenType::This,
                TokenType::Dot,
                TokenType::Identifier("a".to_string()),
                TokenType::Plus,
                TokenType::Number(1.0),
                TokenType::GreaterThanOrEqual,
                TokenType::Number(2.0),
                TokenType::AndAnd,
                TokenType::Bang,
                TokenType::Identifier("x".to_string()),
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_strict_equality_is_folded() {
        assert_eq!(
            types("a === b !== c"),
            vec![
                TokenType::Identifier("a".to_string()),
                TokenType::EqualEquals,
                TokenType::Identifier("b".to_string()),
                TokenType::NotEquals,
                TokenType::Identifier("c".to_string()),
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_string_quotes_and_escapes() {
        assert_eq!(types(r#"'k'"#)[0], TokenType::String("k".to_string()));
        assert_eq!(
            types(r#""a\"b\n""#)[0],
            TokenType::String("a\"b\n".to_string())
        );
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(types("3.25")[0], TokenType::Number(3.25));
        assert_eq!(types(".5")[0], TokenType::Number(0.5));
        assert_eq!(types("1e3")[0], TokenType::Number(1000.0));
        assert_eq!(types("1_000")[0], TokenType::Number(1000.0));
    }

    #[test]
    fn test_newlines_inside_parens_are_ignored() {
        let tokens = types("f(1,\n 2)\ng()");
        let newlines = tokens.iter().filter(|t| **t == TokenType::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_template_keeps_interpolations() {
        assert_eq!(
            types("`hp: ${this.hp}`")[0],
            TokenType::Template("hp: ${this.hp}".to_string())
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            types("1 // trailing"),
            vec![TokenType::Number(1.0), TokenType::Eof]
        );
    }
}
