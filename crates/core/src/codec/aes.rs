//! AES-128-CBC helpers for the standard security handler.
//!
//! Streams and strings encrypted with AESV2 are laid out as
//! `IV (16 bytes) || CBC ciphertext`, padded with PKCS#7.

use crate::error::{PdfError, Result};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

type Aes128CbcDec = Decryptor<aes::Aes128>;
type Aes128CbcEnc = Encryptor<aes::Aes128>;

fn check_lengths(key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != 16 || iv.len() != 16 {
        return Err(PdfError::EncryptionError(format!(
            "AES-128 needs a 16-byte key and IV, got {} and {}",
            key.len(),
            iv.len()
        )));
    }
    Ok(())
}

/// Encrypt `data` with PKCS#7 padding and return `iv || ciphertext`.
pub fn aes128_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_lengths(key, iv)?;
    let padded_len = (data.len() / 16 + 1) * 16;
    let mut out = Vec::with_capacity(16 + padded_len);
    out.extend_from_slice(iv);
    out.extend_from_slice(data);
    out.resize(16 + padded_len, 0);
    let cipher = Aes128CbcEnc::new(key.into(), iv.into());
    cipher
        .encrypt_padded_mut::<Pkcs7>(&mut out[16..], data.len())
        .map_err(|_| PdfError::EncryptionError("AES padding failed".into()))?;
    Ok(out)
}

/// Decrypt `iv || ciphertext` and strip the PKCS#7 padding.
///
/// Data too short to carry an IV decrypts to nothing.
pub fn aes128_cbc_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 16 {
        return Ok(Vec::new());
    }
    let (iv, ciphertext) = data.split_at(16);
    check_lengths(key, iv)?;
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    if ciphertext.len() % 16 != 0 {
        return Err(PdfError::EncryptionError(format!(
            "AES ciphertext length {} is not a multiple of 16",
            ciphertext.len()
        )));
    }
    let mut buf = ciphertext.to_vec();
    let cipher = Aes128CbcDec::new(key.into(), iv.into());
    let plain_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| PdfError::EncryptionError("bad AES padding".into()))?
        .len();
    buf.truncate(plain_len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt_restores_plaintext() {
        let key = [7u8; 16];
        let iv = [1u8; 16];
        let sealed = aes128_cbc_encrypt(&key, &iv, b"form value").unwrap();
        assert_eq!(&sealed[..16], &iv);
        assert_eq!(sealed.len(), 32);
        assert_eq!(aes128_cbc_decrypt(&key, &sealed).unwrap(), b"form value");
    }

    #[test]
    fn test_short_key_is_an_error() {
        assert!(aes128_cbc_encrypt(&[0u8; 5], &[0u8; 16], b"x").is_err());
    }
}
