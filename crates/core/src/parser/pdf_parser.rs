//! PDF object parser - converts tokens to PDF objects.

use super::lexer::{Lexer, Token};
use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObjRef, PDFObject};

/// PDF Parser - parses PDF object syntax
///
/// Builds objects from [`Lexer`] tokens and folds `num gen R` into references.
pub struct PDFParser<'a> {
    lexer: Lexer<'a>,
    /// Pushed-back tokens, last one is read first
    lookahead: Vec<(usize, Token)>,
}

impl<'a> PDFParser<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            lexer: Lexer::new(data),
            lookahead: Vec::new(),
        }
    }

    /// Position of the next unread token.
    pub fn tell(&self) -> usize {
        self.lookahead
            .iter()
            .map(|(pos, _)| *pos)
            .min()
            .unwrap_or_else(|| self.lexer.tell())
    }

    /// Get remaining unparsed data. Only meaningful with an empty lookahead.
    pub fn remaining(&self) -> &'a [u8] {
        self.lexer.remaining()
    }

    fn next_token(&mut self) -> Result<Option<(usize, Token)>> {
        if let Some(tok) = self.lookahead.pop() {
            return Ok(Some(tok));
        }
        self.lexer.next_token()
    }

    fn push_back(&mut self, tok: (usize, Token)) {
        self.lookahead.push(tok);
    }

    /// Parse next PDF object
    pub fn parse_object(&mut self) -> Result<PDFObject> {
        let token = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
        self.token_to_object(token)
    }

    /// Read the next token and require it to be the keyword `kw`.
    pub fn expect_keyword(&mut self, kw: &[u8]) -> Result<()> {
        match self.next_token()? {
            Some((_, tok)) if tok.is_keyword(kw) => Ok(()),
            Some((pos, tok)) => Err(PdfError::SyntaxError(format!(
                "expected '{}' at {pos}, got {tok:?}",
                String::from_utf8_lossy(kw)
            ))),
            None => Err(PdfError::UnexpectedEof),
        }
    }

    /// Peek whether the next token is the keyword `kw`, consuming it if so.
    pub fn eat_keyword(&mut self, kw: &[u8]) -> Result<bool> {
        match self.next_token()? {
            Some((_, tok)) if tok.is_keyword(kw) => Ok(true),
            Some(tok) => {
                self.push_back(tok);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Parse `num gen obj` and return the reference it introduces.
    pub fn parse_indirect_header(&mut self) -> Result<PDFObjRef> {
        let objid = self.parse_integer()?;
        let genno = self.parse_integer()?;
        self.expect_keyword(b"obj")?;
        Ok(PDFObjRef::new(objid as u32, genno as u32))
    }

    /// Parse a bare integer token (no reference folding).
    pub fn parse_integer(&mut self) -> Result<i64> {
        match self.next_token()? {
            Some((_, Token::Int(n))) => Ok(n),
            Some((pos, tok)) => Err(PdfError::TokenError {
                pos,
                msg: format!("expected integer, got {tok:?}"),
            }),
            None => Err(PdfError::UnexpectedEof),
        }
    }

    fn token_to_object(&mut self, (pos, token): (usize, Token)) -> Result<PDFObject> {
        match token {
            Token::Int(n) => {
                // Could be start of indirect reference: objid genno R
                if let Some(second) = self.next_token()? {
                    if let Token::Int(m) = second.1 {
                        // `n m` at the end of the window may be a cut-off reference
                        let third = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
                        if third.1.is_keyword(b"R") && n >= 0 && m >= 0 {
                            return Ok(PDFObject::Ref(PDFObjRef::new(n as u32, m as u32)));
                        }
                        self.push_back(third);
                    }
                    self.push_back(second);
                }
                Ok(PDFObject::Int(n))
            }
            Token::Real(n) => Ok(PDFObject::Real(n)),
            Token::Bool(b) => Ok(PDFObject::Bool(b)),
            Token::Name(s) => Ok(PDFObject::Name(s)),
            Token::String(s) => Ok(PDFObject::String(s)),
            Token::Keyword(kw) => match kw.as_slice() {
                b"null" => Ok(PDFObject::Null),
                b"[" => self.parse_array(),
                b"<<" => self.parse_dict().map(PDFObject::Dict),
                _ => Err(PdfError::TokenError {
                    pos,
                    msg: format!("unexpected keyword: {}", String::from_utf8_lossy(&kw)),
                }),
            },
        }
    }

    /// Parse array contents until ]
    fn parse_array(&mut self) -> Result<PDFObject> {
        let mut arr = Vec::new();
        loop {
            let token = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
            if token.1.is_keyword(b"]") {
                break;
            }
            arr.push(self.token_to_object(token)?);
        }
        Ok(PDFObject::Array(arr))
    }

    /// Parse dict contents until >>
    fn parse_dict(&mut self) -> Result<PDFDict> {
        let mut dict = PDFDict::new();
        loop {
            let (pos, token) = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
            let key = match token {
                Token::Keyword(kw) if kw == b">>" => break,
                Token::Name(name) => name,
                other => {
                    return Err(PdfError::TokenError {
                        pos,
                        msg: format!("expected name as dict key, got {other:?}"),
                    });
                }
            };
            let value = self.parse_object()?;
            // A null value is equivalent to an absent key.
            if !value.is_null() {
                dict.insert(key, value);
            }
        }
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_dict_with_refs() {
        let mut parser = PDFParser::new(b"<< /Kids [3 0 R 4 0 R] /Count 2 /Parent null >>");
        let obj = parser.parse_object().unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(
            dict.get("Kids"),
            Some(&PDFObject::Array(vec![
                PDFObject::Ref(PDFObjRef::new(3, 0)),
                PDFObject::Ref(PDFObjRef::new(4, 0)),
            ]))
        );
        assert_eq!(dict.get("Count"), Some(&PDFObject::Int(2)));
        assert!(!dict.contains_key("Parent"));
        let keys: Vec<_> = dict.keys().cloned().collect();
        assert_eq!(keys, vec!["Kids", "Count"]);
    }

    #[test]
    fn test_integers_without_r_stay_integers() {
        let mut parser = PDFParser::new(b"[1 2 3]");
        assert_eq!(
            parser.parse_object().unwrap(),
            PDFObject::Array(vec![PDFObject::Int(1), PDFObject::Int(2), PDFObject::Int(3)])
        );
    }

    #[test]
    fn test_indirect_header() {
        let mut parser = PDFParser::new(b"12 0 obj\n<< >>\nendobj");
        assert_eq!(parser.parse_indirect_header().unwrap(), PDFObjRef::new(12, 0));
        assert!(parser.parse_object().unwrap().as_dict().unwrap().is_empty());
        assert!(parser.eat_keyword(b"endobj").unwrap());
    }

    #[test]
    fn test_truncated_dict_is_eof() {
        let mut parser = PDFParser::new(b"<< /Type /Page /Parent 2 0");
        assert!(matches!(parser.parse_object(), Err(PdfError::UnexpectedEof)));
    }
}
