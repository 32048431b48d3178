//! Tokenizer for `${{ }}` expressions.

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '=' | '!' | '<' | '>' => {
                let followed_by_eq = chars.get(pos + 1) == Some(&'=');
                let token = match (c, followed_by_eq) {
                    ('=', true) => Token::Eq,
                    ('!', true) => Token::Ne,
                    ('<', true) => Token::Le,
                    ('>', true) => Token::Ge,
                    ('!', false) => Token::Not,
                    ('<', false) => Token::Lt,
                    ('>', false) => Token::Gt,
                    _ => return Err(unexpected(source, c, pos)),
                };
                tokens.push(token);
                pos += if followed_by_eq { 2 } else { 1 };
            }
            '&' | '|' => {
                if chars.get(pos + 1) != Some(&c) {
                    return Err(unexpected(source, c, pos));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                pos += 2;
            }
            '\'' => {
                let (value, next) = read_string(source, &chars, pos)?;
                tokens.push(Token::Str(value));
                pos = next;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, pos)) => {
                let start = pos;
                pos += 1;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| Error::expression(source, format!("invalid number {text:?}")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '-')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(unexpected(source, other, pos)),
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], pos: usize) -> bool {
    chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
}

/// Single-quoted string, `''` escapes a quote.
fn read_string(source: &str, chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut value = String::new();
    let mut pos = start + 1;
    loop {
        match chars.get(pos) {
            None => return Err(Error::expression(source, "unterminated string")),
            Some('\'') if chars.get(pos + 1) == Some(&'\'') => {
                value.push('\'');
                pos += 2;
            }
            Some('\'') => return Ok((value, pos + 1)),
            Some(c) => {
                value.push(*c);
                pos += 1;
            }
        }
    }
}

fn unexpected(source: &str, c: char, pos: usize) -> Error {
    Error::expression(source, format!("unexpected character {c:?} at position {pos}"))
}
