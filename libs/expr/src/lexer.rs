//! Tokenizer for the expression language.

use crate::error::{ExprError, ExprResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Nil,
    And,
    Or,
    Not,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub offset: usize,
}

pub(crate) fn tokenize(source: &str) -> ExprResult<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let two = |next: u8| bytes.get(pos + 1) == Some(&next);

        let (kind, len) = match c {
            b'(' => (TokenKind::LParen, 1),
            b')' => (TokenKind::RParen, 1),
            b'[' => (TokenKind::LBracket, 1),
            b']' => (TokenKind::RBracket, 1),
            b',' => (TokenKind::Comma, 1),
            b'.' => (TokenKind::Dot, 1),
            b'+' => (TokenKind::Plus, 1),
            b'-' => (TokenKind::Minus, 1),
            b'*' => (TokenKind::Star, 1),
            b'/' => (TokenKind::Slash, 1),
            b'%' => (TokenKind::Percent, 1),
            b'=' if two(b'=') => (TokenKind::Eq, 2),
            b'!' if two(b'=') => (TokenKind::Ne, 2),
            b'!' => (TokenKind::Not, 1),
            b'<' if two(b'=') => (TokenKind::Le, 2),
            b'<' => (TokenKind::Lt, 1),
            b'>' if two(b'=') => (TokenKind::Ge, 2),
            b'>' => (TokenKind::Gt, 1),
            b'&' if two(b'&') => (TokenKind::And, 2),
            b'|' if two(b'|') => (TokenKind::Or, 2),
            b'"' | b'\'' => {
                let (s, len) = lex_string(source, start)?;
                (TokenKind::Str(s), len)
            }
            b'0'..=b'9' => lex_number(source, start)?,
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let len = bytes[start..]
                    .iter()
                    .take_while(|b| **b == b'_' || b.is_ascii_alphanumeric())
                    .count();
                (keyword_or_ident(&source[start..start + len]), len)
            }
            b'=' => return Err(ExprError::syntax(start, "unexpected '=', did you mean '=='?")),
            _ => {
                let found = source[start..].chars().next().unwrap_or('?');
                return Err(ExprError::syntax(
                    start,
                    format!("unexpected character {found:?}"),
                ));
            }
        };

        tokens.push(Token {
            kind,
            offset: start,
        });
        pos += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn keyword_or_ident(word: &str) -> TokenKind {
    match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "contains" => TokenKind::Contains,
        "startsWith" => TokenKind::StartsWith,
        "endsWith" => TokenKind::EndsWith,
        _ => TokenKind::Ident(word.to_string()),
    }
}

fn lex_number(source: &str, start: usize) -> ExprResult<(TokenKind, usize)> {
    let bytes = source.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }

    // A '.' only continues the number when a digit follows it.
    let is_float = end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit();
    if is_float {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }

    let text = &source[start..end];
    let kind = if is_float {
        text.parse::<f64>()
            .map(TokenKind::Float)
            .map_err(|e| ExprError::syntax(start, format!("invalid number '{text}': {e}")))?
    } else {
        text.parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|e| ExprError::syntax(start, format!("invalid number '{text}': {e}")))?
    };

    Ok((kind, end - start))
}

fn lex_string(source: &str, start: usize) -> ExprResult<(String, usize)> {
    let mut chars = source[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(ExprError::syntax(start, "expected string"));
    };

    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((out, i + c.len_utf8())),
            '\\' => {
                let Some((j, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' | '"' | '\'' => out.push(escaped),
                    other => {
                        return Err(ExprError::syntax(
                            start + j,
                            format!("unknown escape sequence '\\{other}'"),
                        ))
                    }
                }
            }
            c => out.push(c),
        }
    }

    Err(ExprError::syntax(start, "unterminated string literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_operators_and_keywords() {
        assert_eq!(
            kinds("a == 1 && !b or c not in [2.5]"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Eq,
                TokenKind::Int(1),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Ident("b".to_string()),
                TokenKind::Or,
                TokenKind::Ident("c".to_string()),
                TokenKind::Not,
                TokenKind::In,
                TokenKind::LBracket,
                TokenKind::Float(2.5),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b\\c""#),
            vec![
                TokenKind::Str("it's".to_string()),
                TokenKind::Str("a\"b\\c".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_followed_by_member_access() {
        assert_eq!(
            kinds("disks[0].name"),
            vec![
                TokenKind::Ident("disks".to_string()),
                TokenKind::LBracket,
                TokenKind::Int(0),
                TokenKind::RBracket,
                TokenKind::Dot,
                TokenKind::Ident("name".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_errors_carry_offsets() {
        assert_eq!(
            tokenize("name = 'x'").unwrap_err(),
            ExprError::syntax(5, "unexpected '=', did you mean '=='?")
        );
        assert!(matches!(
            tokenize("'open").unwrap_err(),
            ExprError::Syntax { offset: 0, .. }
        ));
        assert!(matches!(
            tokenize("a # b").unwrap_err(),
            ExprError::Syntax { offset: 2, .. }
        ));
        assert!(tokenize("99999999999999999999").is_err());
    }
}
