//! Deflate (zlib) encoding and decoding for `FlateDecode` streams.

use crate::error::{PdfError, Result};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Inflate a zlib stream.
///
/// Truncated input keeps whatever decoded before the damage, which is how
/// most readers treat streams with a bad checksum or missing tail.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = ZlibDecoder::new(data);
    match decoder.read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(_) if !out.is_empty() => Ok(out),
        Err(e) => Err(PdfError::DecodeError(format!("FlateDecode: {e}"))),
    }
}

/// Deflate `data` into a zlib stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_output_inflates_back() {
        let text = b"BT /Helv 12 Tf (hello) Tj ET ".repeat(20);
        let packed = deflate(&text).unwrap();
        assert!(packed.len() < text.len());
        assert_eq!(inflate(&packed).unwrap(), text);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(
            inflate(b"not zlib"),
            Err(PdfError::DecodeError(_))
        ));
    }
}
