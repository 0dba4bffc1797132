//! Recursive-descent parser for key templates.
//!
//! Grammar:
//!
//! ```text
//! concat  := postfix ('+' postfix)*
//! postfix := primary ('.' IDENT | '[' concat ']')*
//! primary := VARIABLE | STRING | INT | '(' concat ')'
//! ```

use super::lexer::{tokenize, Spanned, Token};
use super::ExpressionError;

/// Parsed key template expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expr {
    Variable(String),
    Str(String),
    Int(i64),
    Property(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Concat(Vec<Expr>),
}

/// Parse a full expression; trailing tokens are an error.
pub(crate) fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, cursor: 0 };
    let expr = parser.concat()?;
    match parser.tokens.get(parser.cursor) {
        None => Ok(expr),
        Some(spanned) => Err(unexpected(spanned)),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn next(&mut self) -> Result<Spanned, ExpressionError> {
        let spanned = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEnd)?;
        self.cursor += 1;
        Ok(spanned)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        let spanned = self.next()?;
        if spanned.token == expected {
            Ok(())
        } else {
            Err(unexpected(&spanned))
        }
    }

    fn concat(&mut self) -> Result<Expr, ExpressionError> {
        let mut parts = vec![self.postfix()?];
        while self.peek() == Some(&Token::Plus) {
            self.cursor += 1;
            parts.push(self.postfix()?);
        }

        if parts.len() == 1 {
            Ok(parts.remove(0))
        } else {
            Ok(Expr::Concat(parts))
        }
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.cursor += 1;
                    let spanned = self.next()?;
                    match spanned.token {
                        Token::Ident(name) => expr = Expr::Property(Box::new(expr), name),
                        _ => return Err(unexpected(&spanned)),
                    }
                }
                Some(Token::LBracket) => {
                    self.cursor += 1;
                    let index = self.concat()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let spanned = self.next()?;
        match spanned.token {
            Token::Variable(name) => Ok(Expr::Variable(name)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::LParen => {
                let inner = self.concat()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(unexpected(&spanned)),
        }
    }
}

fn unexpected(spanned: &Spanned) -> ExpressionError {
    ExpressionError::UnexpectedToken {
        token: format!("{:?}", spanned.token),
        pos: spanned.pos,
    }
}
