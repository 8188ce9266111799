//! Lexer for the script dialect.

use crate::token::{keyword, Token, TokenKind};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
#[error("syntax error at byte {pos}: {message}")]
pub struct LexError {
    pub pos: usize,
    pub message: String,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<char>,
    /// Char index, not byte index; positions reported are byte offsets.
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            position: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let estimated = (self.input.len() / 4).max(8);
        let mut tokens = Vec::with_capacity(estimated);
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let start = self.position;

        let Some(c) = self.current() else {
            return Ok(Token::new(TokenKind::Eof, start));
        };

        let kind = match c {
            '(' => self.one(TokenKind::LParen),
            ')' => self.one(TokenKind::RParen),
            '{' => self.one(TokenKind::LBrace),
            '}' => self.one(TokenKind::RBrace),
            '[' => self.one(TokenKind::LBracket),
            ']' => self.one(TokenKind::RBracket),
            ',' => self.one(TokenKind::Comma),
            '.' => self.one(TokenKind::Dot),
            ';' => self.one(TokenKind::Semi),
            ':' => self.one(TokenKind::Colon),
            '?' => self.one(TokenKind::Question),
            '^' => self.one(TokenKind::BitXor),
            '%' => self.one(TokenKind::Percent),
            '+' => match self.peek() {
                Some('+') => self.two(TokenKind::PlusPlus),
                Some('=') => self.two(TokenKind::PlusAssign),
                _ => self.one(TokenKind::Plus),
            },
            '-' => match self.peek() {
                Some('-') => self.two(TokenKind::MinusMinus),
                Some('=') => self.two(TokenKind::MinusAssign),
                _ => self.one(TokenKind::Minus),
            },
            '*' => match self.peek() {
                Some('=') => self.two(TokenKind::StarAssign),
                _ => self.one(TokenKind::Star),
            },
            '/' => match self.peek() {
                Some('=') => self.two(TokenKind::SlashAssign),
                _ => self.one(TokenKind::Slash),
            },
            '=' => match self.peek() {
                Some('>') => self.two(TokenKind::Arrow),
                Some('=') => {
                    self.advance();
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                }
                _ => self.one(TokenKind::Assign),
            },
            '!' => match self.peek() {
                Some('=') => {
                    self.advance();
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        TokenKind::NotEqEq
                    } else {
                        TokenKind::NotEq
                    }
                }
                _ => self.one(TokenKind::Not),
            },
            '<' => match self.peek() {
                Some('=') => self.two(TokenKind::Le),
                _ => self.one(TokenKind::Lt),
            },
            '>' => match self.peek() {
                Some('=') => self.two(TokenKind::Ge),
                _ => self.one(TokenKind::Gt),
            },
            '&' => match self.peek() {
                Some('&') => self.two(TokenKind::AndAnd),
                _ => self.one(TokenKind::BitAnd),
            },
            '|' => match self.peek() {
                Some('|') => self.two(TokenKind::OrOr),
                _ => self.one(TokenKind::BitOr),
            },
            '"' | '\'' => self.string(c)?,
            c if c.is_ascii_digit() => self.number()?,
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => self.identifier(),
            other => {
                return Err(LexError {
                    pos: start,
                    message: format!("unexpected character '{}'", other),
                })
            }
        };

        Ok(Token::new(kind, start))
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.current() {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('/') if self.peek() == Some('/') => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek() == Some('*') => {
                    self.advance();
                    self.advance();
                    while let Some(c) = self.current() {
                        if c == '*' && self.peek() == Some('/') {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, LexError> {
        let start = self.position;
        self.advance();
        let mut out = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(LexError {
                        pos: start,
                        message: "unterminated string".to_string(),
                    })
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.current().ok_or_else(|| LexError {
                        pos: self.position,
                        message: "unterminated escape".to_string(),
                    })?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                    self.advance();
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
        Ok(TokenKind::Str(out))
    }

    fn number(&mut self) -> Result<TokenKind, LexError> {
        let start = self.position;
        let mut seen_dot = false;
        let mut lit = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                lit.push(c);
                self.advance();
            } else if c == '.' && !seen_dot && self.peek().is_some_and(|n| n.is_ascii_digit()) {
                seen_dot = true;
                lit.push(c);
                self.advance();
            } else {
                break;
            }
        }
        lit.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| LexError {
                pos: start,
                message: format!("invalid number literal '{}'", lit),
            })
    }

    fn identifier(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        keyword(&ident).unwrap_or(TokenKind::Ident(ident))
    }

    fn one(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn two(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        self.advance();
        kind
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_typical_script() {
        let ks = kinds("output.n = (inputs.a|0) + (inputs.b|0);");
        assert!(ks.contains(&TokenKind::Ident("output".into())));
        assert!(ks.contains(&TokenKind::BitOr));
        assert!(ks.contains(&TokenKind::Semi));
    }

    #[test]
    fn distinguishes_equality_operators() {
        assert_eq!(
            kinds("a == b === c != d !== e"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::EqEq,
                TokenKind::Ident("b".into()),
                TokenKind::EqEqEq,
                TokenKind::Ident("c".into()),
                TokenKind::NotEq,
                TokenKind::Ident("d".into()),
                TokenKind::NotEqEq,
                TokenKind::Ident("e".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#"'a\nb' "c\"d""#),
            vec![
                TokenKind::Str("a\nb".into()),
                TokenKind::Str("c\"d".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_trivia() {
        let ks = kinds("1 // line\n/* block */ 2");
        assert_eq!(
            ks,
            vec![TokenKind::Number(1.0), TokenKind::Number(2.0), TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(Lexer::new("'oops").tokenize().is_err());
    }
}
