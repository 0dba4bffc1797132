//! Tokenizer for key templates.

use super::ExpressionError;

/// A lexical token of the key template language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// `#name`
    Variable(String),
    /// Bare identifier, only valid after `.`
    Ident(String),
    /// Quoted string literal, quotes removed
    Str(String),
    /// Non-negative integer literal
    Int(i64),
    Dot,
    Plus,
    LBracket,
    RBracket,
    LParen,
    RParen,
}

/// A token together with the byte offset it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

/// Split a template into tokens.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '.' => {
                chars.next();
                Token::Dot
            }
            '+' => {
                chars.next();
                Token::Plus
            }
            '[' => {
                chars.next();
                Token::LBracket
            }
            ']' => {
                chars.next();
                Token::RBracket
            }
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            '#' => {
                chars.next();
                let name = take_ident(&mut chars);
                if name.is_empty() {
                    return Err(ExpressionError::UnexpectedChar { ch: '#', pos });
                }
                Token::Variable(name)
            }
            '\'' | '"' => {
                chars.next();
                Token::Str(take_string(&mut chars, c, pos)?)
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| ExpressionError::InvalidIndex { index: digits.clone() })?;
                Token::Int(value)
            }
            c if is_ident_start(c) => Token::Ident(take_ident(&mut chars)),
            other => return Err(ExpressionError::UnexpectedChar { ch: other, pos }),
        };
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn take_ident<I>(chars: &mut std::iter::Peekable<I>) -> String
where
    I: Iterator<Item = (usize, char)>,
{
    let mut ident = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !(is_ident_start(c) || c.is_ascii_digit()) {
            break;
        }
        ident.push(c);
        chars.next();
    }
    ident
}

/// Read a quoted literal. A doubled quote character is an escaped quote.
fn take_string<I>(
    chars: &mut std::iter::Peekable<I>,
    quote: char,
    start: usize,
) -> Result<String, ExpressionError>
where
    I: Iterator<Item = (usize, char)>,
{
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        if c == quote {
            match chars.peek() {
                Some(&(_, next)) if next == quote => {
                    out.push(quote);
                    chars.next();
                }
                _ => return Ok(out),
            }
        } else {
            out.push(c);
        }
    }
    Err(ExpressionError::UnterminatedString { pos: start })
}
