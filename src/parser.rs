//! Recursive descent parser for expression and command text

use crate::ast::*;
use crate::error::{EngineError, Result};
use crate::lexer::{Lexer, Token, TokenType};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();

        loop {
            while self.match_token(&TokenType::Newline) || self.match_token(&TokenType::Semicolon) {}
            if self.is_at_end() {
                break;
            }

            statements.push(self.parse_statement()?);

            if !(self.check(&TokenType::Newline)
                || self.check(&TokenType::Semicolon)
                || self.is_at_end())
            {
                return Err(self.error(format!(
                    "Expected ';' or newline after statement, got {}",
                    self.peek().token_type
                )));
            }
        }

        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.match_token(&TokenType::Let) {
            let token_type = self.advance().token_type.clone();
            let name = match token_type {
                TokenType::Identifier(name) => name,
                other => {
                    return Err(self.error(format!("Expected name after 'let', got {}", other)));
                }
            };
            self.consume(TokenType::Assign, "Expected '=' in let statement")?;
            let value = self.parse_expression()?;
            return Ok(Statement::Let { name, value });
        }
        Ok(Statement::Expr(self.parse_expression()?))
    }

    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_ternary_expression()
    }

    /// Parse ternary expression: condition ? true_value : false_value
    fn parse_ternary_expression(&mut self) -> Result<Expr> {
        let condition = self.parse_or_expression()?;

        if self.match_token(&TokenType::Question) {
            self.skip_newlines();
            let true_value = self.parse_ternary_expression()?;
            self.skip_newlines();
            self.consume(TokenType::Colon, "Expected ':' in ternary expression")?;
            self.skip_newlines();
            let false_value = self.parse_ternary_expression()?;

            Ok(Expr::Ternary {
                condition: Box::new(condition),
                true_value: Box::new(true_value),
                false_value: Box::new(false_value),
            })
        } else {
            Ok(condition)
        }
    }

    fn parse_or_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expression()?;
        while self.match_token(&TokenType::OrOr) {
            self.skip_newlines();
            let right = self.parse_and_expression()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality_expression()?;
        while self.match_token(&TokenType::AndAnd) {
            self.skip_newlines();
            let right = self.parse_equality_expression()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison_expression()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::EqualEquals => BinaryOp::Equal,
                TokenType::NotEquals => BinaryOp::NotEqual,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_comparison_expression()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    /// Parse comparison expressions: <, <=, >, >=
    fn parse_comparison_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive_expression()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::LessThan => BinaryOp::Less,
                TokenType::LessThanOrEqual => BinaryOp::LessEqual,
                TokenType::GreaterThan => BinaryOp::Greater,
                TokenType::GreaterThanOrEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_additive_expression()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_multiplicative_expression()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary_expression()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Star => BinaryOp::Multiply,
                TokenType::Slash => BinaryOp::Divide,
                TokenType::Percent => BinaryOp::Remainder,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_unary_expression()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    /// Parse prefix operators: -, +, !, await
    fn parse_unary_expression(&mut self) -> Result<Expr> {
        if self.match_token(&TokenType::Await) {
            let operand = self.parse_unary_expression()?;
            return Ok(Expr::Await(Box::new(operand)));
        }

        let op = match self.peek().token_type {
            TokenType::Minus => Some(UnaryOp::Negate),
            TokenType::Plus => Some(UnaryOp::Plus),
            TokenType::Bang => Some(UnaryOp::Not),
            _ => None,
        };

        match op {
            Some(op) => {
                self.advance();
                let operand = self.parse_unary_expression()?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_postfix_expression(),
        }
    }

    /// Parse calls, member access and indexing
    fn parse_postfix_expression(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary_expression()?;

        loop {
            if self.match_token(&TokenType::LeftParen) {
                let args = self.parse_arguments(TokenType::RightParen, "Expected ')' after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.match_token(&TokenType::Dot) {
                let token_type = self.advance().token_type.clone();
                let property = match token_type {
                    TokenType::Identifier(name) => name,
                    other => {
                        return Err(self.error(format!("Expected property name after '.', got {}", other)));
                    }
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.match_token(&TokenType::LeftBracket) {
                let index = self.parse_expression()?;
                self.consume(TokenType::RightBracket, "Expected ']' after index")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_arguments(&mut self, close: TokenType, message: &str) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.match_token(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.match_token(&TokenType::Comma) {
                // Trailing comma
                if self.match_token(&close) {
                    return Ok(args);
                }
                continue;
            }
            self.consume(close, message)?;
            return Ok(args);
        }
    }

    /// Parse primary expressions: literals, names, groups, arrays, templates
    fn parse_primary_expression(&mut self) -> Result<Expr> {
        let token_type = self.peek().token_type.clone();
        match token_type {
            TokenType::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenType::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            TokenType::Template(raw) => {
                self.advance();
                Ok(Expr::Template(parse_template_parts(&raw)?))
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Boolean(true))
            }
            TokenType::False => {
                self.advance();
                Ok(Expr::Boolean(false))
            }
            TokenType::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenType::This => {
                self.advance();
                Ok(Expr::This)
            }
            TokenType::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier(name))
            }
            TokenType::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume(TokenType::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenType::LeftBracket => {
                self.advance();
                let items = self.parse_arguments(TokenType::RightBracket, "Expected ']' after array items")?;
                Ok(Expr::Array(items))
            }
            other => Err(self.error(format!("Expected expression, got {}", other))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.match_token(&TokenType::Newline) {}
    }

    fn match_token(&mut self, token_type: &TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            false
        } else {
            std::mem::discriminant(&self.peek().token_type) == std::mem::discriminant(token_type)
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("{}, got {}", message, self.peek().token_type)))
        }
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        let token = self.peek();
        EngineError::parse(token.line, token.column, message)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Splits raw template text into literal chunks and `${}` expressions.
fn parse_template_parts(raw: &str) -> Result<Vec<TemplatePart>> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                text.push(chars[i + 1]);
                i += 2;
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                let mut depth = 1;
                let mut j = i + 2;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth != 0 {
                    return Err(EngineError::parse(1, i + 1, "Unterminated '${' in template"));
                }
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                let source: String = chars[i + 2..j - 1].iter().collect();
                parts.push(TemplatePart::Expr(parse_expression(&source)?));
                i = j;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }
    Ok(parts)
}

/// Parses a multi-statement program.
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

/// Parses exactly one expression; trailing tokens are an error.
pub fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.skip_newlines();
    if !parser.is_at_end() {
        return Err(parser.error(format!(
            "Unexpected trailing {}",
            parser.peek().token_type
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Multiply, .. }));
            }
            other => panic!("Expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_await_binds_tighter_than_addition() {
        let expr = parse_expression("await Integration.get('k') + 1").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, left, .. } => {
                assert!(matches!(*left, Expr::Await(_)));
            }
            other => panic!("Expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_member_call_and_index() {
        let expr = parse_expression("Sheet.get('row')[2]").unwrap();
        match expr {
            Expr::Index { object, index } => {
                assert_eq!(*index, Expr::Number(2.0));
                match *object {
                    Expr::Call { callee, args } => {
                        assert_eq!(callee.callee_path().as_deref(), Some("Sheet.get"));
                        assert_eq!(args, vec![Expr::String("row".to_string())]);
                    }
                    other => panic!("Expected call, got {:?}", other),
                }
            }
            other => panic!("Expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary_nests_right() {
        let expr = parse_expression("a ? 1 : b ? 2 : 3").unwrap();
        match expr {
            Expr::Ternary { false_value, .. } => {
                assert!(matches!(*false_value, Expr::Ternary { .. }));
            }
            other => panic!("Expected ternary, got {:?}", other),
        }
    }

    #[test]
    fn test_program_statements() {
        let program = parse_program("let r = 2; setValue('a', r)\naddValue('b', 1);").unwrap();
        assert_eq!(program.statements.len(), 3);
        assert!(matches!(program.statements[0], Statement::Let { .. }));
    }

    #[test]
    fn test_template_parts() {
        let expr = parse_expression("`hp ${this.hp}/${max}`").unwrap();
        match expr {
            Expr::Template(parts) => {
                assert_eq!(parts.len(), 4);
                assert_eq!(parts[0], TemplatePart::Text("hp ".to_string()));
                assert_eq!(parts[3], TemplatePart::Expr(Expr::Identifier("max".to_string())));
            }
            other => panic!("Expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_errors_carry_position() {
        match parse_expression("1 +") {
            Err(EngineError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("Expected parse error, got {:?}", other),
        }
        assert!(parse_expression("1 2").is_err());
        assert!(parse_program("a b").is_err());
    }
}
