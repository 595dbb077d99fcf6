//! PDF object serializer.
//!
//! Renders object-model values back into PDF syntax for an incremental
//! update. Each top-level object gets its own cipher transform, so strings
//! and stream bodies are encrypted under that object's key.

pub mod incremental;
pub mod xfa;

pub use incremental::{
    Change, ChangeData, ChangeSet, FormPatch, IncrementalUpdate, SaveRecord, XRefInfo,
    build_incremental_section, compute_indexes, incremental_update,
};
pub use xfa::{FormValue, write_xfa_data_for_acroform};

use crate::codec::deflate;
use crate::document::{CipherTransform, CipherTransformFactory};
use crate::error::Result;
use crate::model::{PDFDict, PDFObjRef, PDFObject, PDFStream, StreamBody};
use crate::utils::number_to_string;
use tracing::{info, warn};

/// Content bodies shorter than this are left uncompressed unless they ask for `FlateDecode`.
pub const MIN_LENGTH_FOR_COMPRESSING: usize = 256;

/// Serialize `obj` as indirect object `objref`:
/// `"<num> <gen> obj\n" + body + "\nendobj\n"`.
pub fn write_object(
    objref: PDFObjRef,
    obj: &PDFObject,
    encrypt: Option<&CipherTransformFactory>,
) -> Result<Vec<u8>> {
    let transform = encrypt.map(|f| f.create_cipher_transform(objref.objid, objref.genno));
    let mut writer = ObjectWriter::new(transform);
    writer.push_str(&format!("{} {} obj\n", objref.objid, objref.genno));
    match obj {
        PDFObject::Stream(stream) => writer.write_stream(stream)?,
        other => writer.write_value(other)?,
    }
    writer.push_str("\nendobj\n");
    Ok(writer.buf)
}

/// Serialize a dictionary without encryption (trailers).
pub fn write_dict(dict: &PDFDict) -> Result<Vec<u8>> {
    let mut writer = ObjectWriter::new(None);
    writer.write_dict(dict)?;
    Ok(writer.buf)
}

/// Serialize a single value without encryption.
pub fn write_value(obj: &PDFObject) -> Result<Vec<u8>> {
    let mut writer = ObjectWriter::new(None);
    writer.write_value(obj)?;
    Ok(writer.buf)
}

struct ObjectWriter {
    buf: Vec<u8>,
    transform: Option<CipherTransform>,
}

impl ObjectWriter {
    const fn new(transform: Option<CipherTransform>) -> Self {
        Self {
            buf: Vec::new(),
            transform,
        }
    }

    fn push_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn write_value(&mut self, obj: &PDFObject) -> Result<()> {
        match obj {
            PDFObject::Null => self.push_str("null"),
            PDFObject::Bool(b) => self.push_str(if *b { "true" } else { "false" }),
            PDFObject::Int(n) => self.push_str(&n.to_string()),
            PDFObject::Real(n) if n.is_finite() => self.push_str(&number_to_string(*n)),
            PDFObject::Real(n) => {
                warn!(value = %n, "unhandled real in writer, writing null");
                self.push_str("null");
            }
            PDFObject::Name(name) => {
                self.buf.push(b'/');
                self.push_str(&escape_name(name));
            }
            PDFObject::String(s) => {
                let data = match self.transform.as_mut() {
                    Some(t) => t.encrypt_string(s)?,
                    None => s.clone(),
                };
                self.buf.push(b'(');
                self.buf.extend_from_slice(&escape_string(&data));
                self.buf.push(b')');
            }
            PDFObject::Ref(r) => self.push_str(&format!("{} {} R", r.objid, r.genno)),
            PDFObject::Array(items) => {
                self.buf.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.buf.push(b' ');
                    }
                    self.write_value(item)?;
                }
                self.buf.push(b']');
            }
            PDFObject::Dict(dict) => self.write_dict(dict)?,
            PDFObject::Stream(_) => {
                warn!("stream below the top level of an object, writing null");
                self.push_str("null");
            }
        }
        Ok(())
    }

    fn write_dict(&mut self, dict: &PDFDict) -> Result<()> {
        self.push_str("<<");
        for (key, value) in dict {
            self.push_str(" /");
            self.push_str(&escape_name(key));
            self.buf.push(b' ');
            self.write_value(value)?;
        }
        self.push_str(">>");
        Ok(())
    }

    fn write_stream(&mut self, stream: &PDFStream) -> Result<()> {
        let mut attrs = stream.attrs.clone();
        let data = match stream.body() {
            StreamBody::Encoded(raw) => raw.to_vec(),
            StreamBody::Content(plain) => compress_content(&mut attrs, plain),
            StreamBody::Pending { begin, end } => {
                warn!(begin, end, "stream body was never loaded, writing null");
                self.push_str("null");
                return Ok(());
            }
        };
        let data = match self.transform.as_mut() {
            Some(t) => t.encrypt_stream(&attrs, &data)?,
            None => data,
        };
        attrs.insert("Length".into(), PDFObject::Int(data.len() as i64));
        self.write_dict(&attrs)?;
        self.push_str(" stream\n");
        self.buf.extend_from_slice(&data);
        self.push_str("\nendstream");
        Ok(())
    }
}

/// Deflate `plain` when it is large enough or already declares `FlateDecode`,
/// prepending the filter to the chain when it is not there yet.
fn compress_content(attrs: &mut PDFDict, plain: &[u8]) -> Vec<u8> {
    let filter = attrs.get("Filter").filter(|f| !f.is_null()).cloned();
    let first_is_flate = match &filter {
        Some(PDFObject::Array(chain)) => chain.first().is_some_and(|f| f.is_name("FlateDecode")),
        Some(f) => f.is_name("FlateDecode"),
        None => false,
    };
    if plain.len() < MIN_LENGTH_FOR_COMPRESSING && !first_is_flate {
        return plain.to_vec();
    }

    let compressed = match deflate(plain) {
        Ok(compressed) => compressed,
        Err(e) => {
            info!(error = %e, "cannot compress stream data");
            return plain.to_vec();
        }
    };
    if first_is_flate {
        return compressed;
    }

    let flate = PDFObject::name("FlateDecode");
    let Some(filter) = filter else {
        attrs.insert("Filter".into(), flate);
        return compressed;
    };
    let chain = match filter {
        PDFObject::Array(mut chain) => {
            chain.insert(0, flate);
            chain
        }
        other => vec![flate, other],
    };
    attrs.insert("Filter".into(), PDFObject::Array(chain));

    let params = attrs.get("DecodeParms").filter(|p| !p.is_null()).cloned();
    if let Some(params) = params {
        let params = match params {
            PDFObject::Array(mut params) => {
                params.insert(0, PDFObject::Null);
                params
            }
            other => vec![PDFObject::Null, other],
        };
        attrs.insert("DecodeParms".into(), PDFObject::Array(params));
    }
    compressed
}

/// Escape a name for use after `/`: whitespace, delimiters, `#` and bytes
/// outside the printable range become `#xx`.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name.as_bytes() {
        let regular = (0x21..=0x7e).contains(&b)
            && !matches!(
                b,
                b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
            );
        if regular {
            out.push(b as char);
        } else {
            out.push_str(&format!("#{b:02x}"));
        }
    }
    out
}

/// Escape a literal string body (without the surrounding parentheses).
pub fn escape_string(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            b'\\' | b'(' | b')' => out.extend_from_slice(&[b'\\', b]),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
    out
}
