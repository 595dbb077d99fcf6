//! PDF tokenizer.
//!
//! Works over a borrowed window of file bytes. Running off the end of the
//! window inside a string or hex string is reported as
//! [`PdfError::UnexpectedEof`] so callers can retry with a larger window.

use crate::error::{PdfError, Result};

/// Lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Integer value
    Int(i64),
    /// Floating point value
    Real(f64),
    /// Boolean value
    Bool(bool),
    /// Name (e.g., /Name), `#xx` escapes resolved, one char per byte
    Name(String),
    /// Keyword or delimiter (e.g., obj, R, <<, [)
    Keyword(Vec<u8>),
    /// String (literal or hex)
    String(Vec<u8>),
}

impl Token {
    pub fn is_keyword(&self, kw: &[u8]) -> bool {
        matches!(self, Self::Keyword(k) if k == kw)
    }
}

pub(crate) const fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x00' | b'\x0c')
}

pub(crate) const fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Tokenizer over a byte window.
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position in the window.
    pub const fn tell(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Get remaining unparsed data
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Skip whitespace and comments.
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.advance() {
                    if c == b'\r' || c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn lex_name(&mut self) -> Token {
        self.pos += 1;
        let mut name = String::new();
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
            if b == b'#'
                && let (Some(h1), Some(h2)) = (self.peek(), self.peek_at(1))
                && let (Some(d1), Some(d2)) = (hex_value(h1), hex_value(h2))
            {
                self.pos += 2;
                name.push(char::from((d1 << 4) | d2));
                continue;
            }
            name.push(char::from(b));
        }
        Token::Name(name)
    }

    fn lex_number(&mut self) -> Result<Token> {
        let start = self.pos;
        let mut has_dot = false;

        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                self.pos += 1;
            } else if b == b'.' && !has_dot {
                has_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let text = std::str::from_utf8(&self.data[start..self.pos]).map_err(|_| {
            PdfError::TokenError {
                pos: start,
                msg: "invalid number".into(),
            }
        })?;
        if has_dot {
            // "5." and "-.5" are both legal reals
            let normalized = if text.ends_with('.') {
                format!("{text}0")
            } else {
                text.to_string()
            };
            normalized
                .parse()
                .map(Token::Real)
                .map_err(|_| PdfError::TokenError {
                    pos: start,
                    msg: format!("invalid real: {text}"),
                })
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| PdfError::TokenError {
                    pos: start,
                    msg: format!("invalid int: {text}"),
                })
        }
    }

    fn lex_string(&mut self) -> Result<Token> {
        self.pos += 1;
        let mut out = Vec::new();
        let mut depth = 1;

        loop {
            let b = self.advance().ok_or(PdfError::UnexpectedEof)?;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b);
                }
                b'\\' => {
                    let esc = self.advance().ok_or(PdfError::UnexpectedEof)?;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut code = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        self.pos += 1;
                                        code = code * 8 + u32::from(d - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            out.push((code & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(Token::String(out))
    }

    fn lex_hex_string(&mut self) -> Result<Token> {
        self.pos += 1;
        let mut out = Vec::new();
        let mut high: Option<u8> = None;
        loop {
            let b = self.advance().ok_or(PdfError::UnexpectedEof)?;
            if b == b'>' {
                break;
            }
            if is_whitespace(b) {
                continue;
            }
            let Some(v) = hex_value(b) else {
                return Err(PdfError::TokenError {
                    pos: self.pos - 1,
                    msg: "invalid hex string".into(),
                });
            };
            match high.take() {
                Some(h) => out.push((h << 4) | v),
                None => high = Some(v),
            }
        }
        // Odd digit count: the last digit is followed by an implicit 0.
        if let Some(h) = high {
            out.push(h << 4);
        }
        Ok(Token::String(out))
    }

    fn lex_keyword(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        match &self.data[start..self.pos] {
            b"true" => Token::Bool(true),
            b"false" => Token::Bool(false),
            kw => Token::Keyword(kw.to_vec()),
        }
    }

    /// Next token with its start position, `None` at the end of the window.
    pub fn next_token(&mut self) -> Result<Option<(usize, Token)>> {
        self.skip_whitespace();
        let Some(b) = self.peek() else {
            return Ok(None);
        };
        let start = self.pos;

        let token = match b {
            b'/' => self.lex_name(),
            b'(' => self.lex_string()?,
            b'<' if self.peek_at(1) == Some(b'<') => {
                self.pos += 2;
                Token::Keyword(b"<<".to_vec())
            }
            b'<' => self.lex_hex_string()?,
            b'>' if self.peek_at(1) == Some(b'>') => {
                self.pos += 2;
                Token::Keyword(b">>".to_vec())
            }
            b'>' | b'[' | b']' | b'{' | b'}' | b')' => {
                self.pos += 1;
                Token::Keyword(vec![b])
            }
            b'+' | b'-' | b'.' => {
                if matches!(self.peek_at(1), Some(c) if c.is_ascii_digit() || c == b'.') {
                    self.lex_number()?
                } else {
                    self.lex_keyword()
                }
            }
            c if c.is_ascii_digit() => self.lex_number()?,
            _ => self.lex_keyword(),
        };

        Ok(Some((start, token)))
    }
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(data: &[u8]) -> Vec<Token> {
        let mut lexer = Lexer::new(data);
        let mut out = Vec::new();
        while let Some((_, tok)) = lexer.next_token().unwrap() {
            out.push(tok);
        }
        out
    }

    #[test]
    fn test_names_resolve_hex_escapes() {
        assert_eq!(
            tokens(b"/A#20B /Off"),
            vec![Token::Name("A B".into()), Token::Name("Off".into())]
        );
    }

    #[test]
    fn test_strings_and_hex_strings() {
        assert_eq!(
            tokens(b"(a\\(b\\)\\n) <48 65 6>"),
            vec![
                Token::String(b"a(b)\n".to_vec()),
                Token::String(vec![0x48, 0x65, 0x60])
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_eof() {
        let mut lexer = Lexer::new(b"(abc");
        assert!(matches!(lexer.next_token(), Err(PdfError::UnexpectedEof)));
    }

    #[test]
    fn test_numbers_and_keywords() {
        assert_eq!(
            tokens(b"12 -3 .5 4. R true"),
            vec![
                Token::Int(12),
                Token::Int(-3),
                Token::Real(0.5),
                Token::Real(4.0),
                Token::Keyword(b"R".to_vec()),
                Token::Bool(true)
            ]
        );
    }
}
