//! PDF object types.
//!
//! Dictionaries keep insertion order so a cloned-and-edited dictionary is
//! written back with its keys where they were.

use crate::error::{PdfError, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use std::fmt;

/// Ordered PDF dictionary.
pub type PDFDict = IndexMap<String, PDFObject>;

/// PDF Object types - the fundamental value type in PDF.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// Null object
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Real (floating point) value
    Real(f64),
    /// Name object (e.g., /Type, /Font)
    Name(String),
    /// String (byte array)
    String(Vec<u8>),
    /// Array of objects
    Array(Vec<Self>),
    /// Dictionary (name -> object mapping)
    Dict(PDFDict),
    /// Stream (dictionary + binary data)
    Stream(Box<PDFStream>),
    /// Indirect object reference
    Ref(PDFObjRef),
}

impl PDFObject {
    /// Build a name object.
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Check if this is a null object
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check whether this is the name `/name`.
    pub fn is_name(&self, name: &str) -> bool {
        matches!(self, Self::Name(n) if n == name)
    }

    /// Get as boolean
    pub const fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(PdfError::TypeError {
                expected: "bool",
                got: self.type_name(),
            }),
        }
    }

    /// Get as integer
    pub const fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            _ => Err(PdfError::TypeError {
                expected: "int",
                got: self.type_name(),
            }),
        }
    }

    /// Get numeric value (int or real coerced to f64)
    pub const fn as_num(&self) -> Result<f64> {
        match self {
            Self::Int(n) => Ok(*n as f64),
            Self::Real(n) => Ok(*n),
            _ => Err(PdfError::TypeError {
                expected: "number",
                got: self.type_name(),
            }),
        }
    }

    /// Get as name string
    pub fn as_name(&self) -> Result<&str> {
        match self {
            Self::Name(s) => Ok(s),
            _ => Err(PdfError::TypeError {
                expected: "name",
                got: self.type_name(),
            }),
        }
    }

    /// Get as byte string
    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(PdfError::TypeError {
                expected: "string",
                got: self.type_name(),
            }),
        }
    }

    /// Get as array
    pub const fn as_array(&self) -> Result<&Vec<Self>> {
        match self {
            Self::Array(arr) => Ok(arr),
            _ => Err(PdfError::TypeError {
                expected: "array",
                got: self.type_name(),
            }),
        }
    }

    /// Get as mutable array
    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Self>> {
        match self {
            Self::Array(arr) => Ok(arr),
            _ => Err(PdfError::TypeError {
                expected: "array",
                got: self.type_name(),
            }),
        }
    }

    /// Get as dictionary. Streams answer with their attributes.
    pub fn as_dict(&self) -> Result<&PDFDict> {
        match self {
            Self::Dict(d) => Ok(d),
            Self::Stream(s) => Ok(&s.attrs),
            _ => Err(PdfError::TypeError {
                expected: "dict",
                got: self.type_name(),
            }),
        }
    }

    /// Get as mutable dictionary.
    pub fn as_dict_mut(&mut self) -> Result<&mut PDFDict> {
        match self {
            Self::Dict(d) => Ok(d),
            Self::Stream(s) => Ok(&mut s.attrs),
            _ => Err(PdfError::TypeError {
                expected: "dict",
                got: self.type_name(),
            }),
        }
    }

    /// Get as stream
    pub fn as_stream(&self) -> Result<&PDFStream> {
        match self {
            Self::Stream(s) => Ok(s),
            _ => Err(PdfError::TypeError {
                expected: "stream",
                got: self.type_name(),
            }),
        }
    }

    /// Get as object reference
    pub const fn as_ref(&self) -> Result<&PDFObjRef> {
        match self {
            Self::Ref(r) => Ok(r),
            _ => Err(PdfError::TypeError {
                expected: "ref",
                got: self.type_name(),
            }),
        }
    }

    /// Look a key up when this is a dictionary or stream.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(d) => d.get(key),
            Self::Stream(s) => s.attrs.get(key),
            _ => None,
        }
    }

    /// Get type name for error messages
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Real(_) => "real",
            Self::Name(_) => "name",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Dict(_) => "dict",
            Self::Stream(_) => "stream",
            Self::Ref(_) => "ref",
        }
    }
}

impl From<bool> for PDFObject {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PDFObject {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PDFObject {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<PDFObjRef> for PDFObject {
    fn from(value: PDFObjRef) -> Self {
        Self::Ref(value)
    }
}

impl From<PDFDict> for PDFObject {
    fn from(value: PDFDict) -> Self {
        Self::Dict(value)
    }
}

impl From<Vec<PDFObject>> for PDFObject {
    fn from(value: Vec<PDFObject>) -> Self {
        Self::Array(value)
    }
}

impl From<PDFStream> for PDFObject {
    fn from(value: PDFStream) -> Self {
        Self::Stream(Box::new(value))
    }
}

/// PDF indirect object reference.
///
/// Ordered by object number first, then generation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PDFObjRef {
    /// Object ID
    pub objid: u32,
    /// Generation number
    pub genno: u32,
}

impl PDFObjRef {
    /// Create a new object reference.
    pub const fn new(objid: u32, genno: u32) -> Self {
        Self { objid, genno }
    }

    /// Textual id used for annotations: `12R`, or `12R3` for a non-zero generation.
    pub fn annotation_id(&self) -> String {
        if self.genno == 0 {
            format!("{}R", self.objid)
        } else {
            format!("{}R{}", self.objid, self.genno)
        }
    }

    /// Inverse of [`PDFObjRef::annotation_id`].
    pub fn parse_annotation_id(id: &str) -> Option<Self> {
        let (num, gen_part) = id.split_once('R')?;
        let objid = num.parse().ok()?;
        let genno = if gen_part.is_empty() {
            0
        } else {
            gen_part.parse().ok()?
        };
        Some(Self::new(objid, genno))
    }
}

impl fmt::Display for PDFObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.objid, self.genno)
    }
}

/// Where a stream's bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamBody {
    /// Bytes taken from the file, still encoded with the stream's `Filter` chain.
    Encoded(Bytes),
    /// Bytes of the base file `[begin, end)` that have not been loaded yet.
    Pending { begin: usize, end: usize },
    /// Plain bytes built in memory; encoded when written.
    Content(Vec<u8>),
}

/// PDF Stream - dictionary attributes + body.
#[derive(Debug, Clone, PartialEq)]
pub struct PDFStream {
    /// Stream dictionary attributes
    pub attrs: PDFDict,
    body: StreamBody,
    /// Object ID (set when stream is part of document)
    pub objid: Option<u32>,
    /// Generation number
    pub genno: Option<u32>,
}

impl PDFStream {
    /// Create a stream over encoded file bytes.
    pub fn new(attrs: PDFDict, rawdata: impl Into<Bytes>) -> Self {
        Self::with_body(attrs, StreamBody::Encoded(rawdata.into()))
    }

    /// Create a stream over plain content that the writer will encode.
    pub fn with_content(attrs: PDFDict, content: impl Into<Vec<u8>>) -> Self {
        Self::with_body(attrs, StreamBody::Content(content.into()))
    }

    /// Create a stream whose body still lives in unloaded file bytes.
    pub fn pending(attrs: PDFDict, begin: usize, end: usize) -> Self {
        Self::with_body(attrs, StreamBody::Pending { begin, end })
    }

    fn with_body(attrs: PDFDict, body: StreamBody) -> Self {
        Self {
            attrs,
            body,
            objid: None,
            genno: None,
        }
    }

    /// Set object ID and generation number.
    pub const fn set_objid(&mut self, objid: u32, genno: u32) {
        self.objid = Some(objid);
        self.genno = Some(genno);
    }

    /// Reference this stream was fetched from, if any.
    pub fn objref(&self) -> Option<PDFObjRef> {
        Some(PDFObjRef::new(self.objid?, self.genno.unwrap_or(0)))
    }

    pub const fn body(&self) -> &StreamBody {
        &self.body
    }

    /// Byte range still to be loaded before the body can be read.
    pub const fn pending_range(&self) -> Option<(usize, usize)> {
        match self.body {
            StreamBody::Pending { begin, end } => Some((begin, end)),
            _ => None,
        }
    }

    /// Get raw (still encoded) data, when the body came from the file and is loaded.
    pub fn get_rawdata(&self) -> Option<&[u8]> {
        match &self.body {
            StreamBody::Encoded(data) => Some(data.as_ref()),
            _ => None,
        }
    }

    /// Plain content built in memory.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.body {
            StreamBody::Content(data) => Some(data),
            _ => None,
        }
    }

    /// Replace the body with encoded bytes.
    pub fn set_rawdata(&mut self, data: impl Into<Bytes>) {
        self.body = StreamBody::Encoded(data.into());
    }

    /// Replace the body with plain content.
    pub fn set_content(&mut self, data: impl Into<Vec<u8>>) {
        self.body = StreamBody::Content(data.into());
    }

    /// Check if stream contains a key.
    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Get attribute by name.
    pub fn get(&self, name: &str) -> Option<&PDFObject> {
        self.attrs.get(name)
    }

    /// Get attribute, trying multiple names.
    pub fn get_any(&self, names: &[&str]) -> Option<&PDFObject> {
        names.iter().find_map(|name| self.attrs.get(*name))
    }

    /// Names of the `Filter` chain, outermost first.
    pub fn filters(&self) -> Vec<&str> {
        match self.get_any(&["Filter", "F"]) {
            Some(PDFObject::Name(name)) => vec![name.as_str()],
            Some(PDFObject::Array(names)) => names.iter().filter_map(|n| n.as_name().ok()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Build a dictionary from `(key, value)` pairs, keeping their order.
pub fn dict_from<const N: usize>(entries: [(&str, PDFObject); N]) -> PDFDict {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_id_round_trip() {
        let plain = PDFObjRef::new(12, 0);
        assert_eq!(plain.annotation_id(), "12R");
        assert_eq!(PDFObjRef::parse_annotation_id("12R"), Some(plain));

        let gen3 = PDFObjRef::new(7, 3);
        assert_eq!(gen3.annotation_id(), "7R3");
        assert_eq!(PDFObjRef::parse_annotation_id("7R3"), Some(gen3));
        assert_eq!(PDFObjRef::parse_annotation_id("pdfjs_internal_1"), None);
    }

    #[test]
    fn test_refs_order_by_number_then_generation() {
        let mut refs = vec![
            PDFObjRef::new(9, 0),
            PDFObjRef::new(2, 1),
            PDFObjRef::new(2, 0),
        ];
        refs.sort();
        assert_eq!(
            refs,
            vec![
                PDFObjRef::new(2, 0),
                PDFObjRef::new(2, 1),
                PDFObjRef::new(9, 0)
            ]
        );
    }

    #[test]
    fn test_stream_filters_accepts_name_or_array() {
        let single = PDFStream::new(dict_from([("Filter", PDFObject::name("FlateDecode"))]), vec![]);
        assert_eq!(single.filters(), vec!["FlateDecode"]);
        let chain = PDFStream::new(
            dict_from([(
                "Filter",
                PDFObject::Array(vec![PDFObject::name("A85"), PDFObject::name("Fl")]),
            )]),
            vec![],
        );
        assert_eq!(chain.filters(), vec!["A85", "Fl"]);
    }
}
