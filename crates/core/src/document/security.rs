//! Standard security handler: key derivation and per-object cipher transforms.
//!
//! Supports revisions 2 and 3 (RC4) and revision 4 with `V2` or `AESV2`
//! crypt filters. Both directions are implemented since an incremental
//! update of an encrypted file has to encrypt what it appends.

use crate::codec::aes::{aes128_cbc_decrypt, aes128_cbc_encrypt};
use crate::codec::arcfour::Arcfour;
use crate::error::{PdfError, Result};
use crate::model::{PDFDict, PDFObject};

/// Password padding string of the standard security handler.
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Crypt filter method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptMethod {
    Identity,
    V2,    // RC4
    AESV2, // AES-128
}

/// Document-wide key plus the crypt methods for strings and streams.
#[derive(Debug, Clone)]
pub struct CipherTransformFactory {
    key: Vec<u8>,
    string_method: CryptMethod,
    stream_method: CryptMethod,
    encrypt_metadata: bool,
}

struct StandardParams<'a> {
    r: i64,
    key_len: usize,
    o: &'a [u8],
    u: &'a [u8],
    p: u32,
    docid: &'a [u8],
    encrypt_metadata: bool,
}

impl CipherTransformFactory {
    /// Authenticate `password` (user first, then owner) against `/Encrypt`.
    pub fn from_encrypt_dict(encrypt: &PDFDict, ids: &[Vec<u8>], password: &str) -> Result<Self> {
        let filter = encrypt
            .get("Filter")
            .and_then(|f| f.as_name().ok())
            .unwrap_or("Standard");
        if filter != "Standard" {
            return Err(PdfError::EncryptionError(format!(
                "unsupported security handler /{filter}"
            )));
        }

        let v = get_int_default(encrypt, "V", 0);
        let r = get_int(encrypt, "R")?;
        let encrypt_metadata = encrypt
            .get("EncryptMetadata")
            .and_then(|b| b.as_bool().ok())
            .unwrap_or(true);

        let (key_len, string_method, stream_method) = match (v, r) {
            (1, 2) => (5, CryptMethod::V2, CryptMethod::V2),
            (2, 3) => {
                let bits = get_int_default(encrypt, "Length", 40).clamp(40, 128);
                ((bits / 8) as usize, CryptMethod::V2, CryptMethod::V2)
            }
            (4, 4) => {
                let cf = encrypt.get("CF").and_then(|c| c.as_dict().ok());
                let strf = resolve_crypt_method(cf, get_name_default(encrypt, "StrF"))?;
                let stmf = resolve_crypt_method(cf, get_name_default(encrypt, "StmF"))?;
                (v4_key_len(encrypt, cf), strf, stmf)
            }
            _ => {
                return Err(PdfError::EncryptionError(format!(
                    "unsupported encryption: V={v}, R={r}"
                )));
            }
        };

        let params = StandardParams {
            r,
            key_len,
            o: get_bytes(encrypt, "O")?,
            u: get_bytes(encrypt, "U")?,
            // P is signed in the file; the key derivation wants its bit pattern
            p: get_int(encrypt, "P")? as u32,
            docid: ids.first().map(Vec::as_slice).unwrap_or_default(),
            encrypt_metadata,
        };

        let password = password.as_bytes();
        let key = params
            .authenticate_user_password(password)
            .or_else(|| params.authenticate_owner_password(password))
            .ok_or_else(|| PdfError::EncryptionError("incorrect password".into()))?;

        Ok(Self {
            key,
            string_method,
            stream_method,
            encrypt_metadata,
        })
    }

    /// Transform bound to one object's key.
    pub fn create_cipher_transform(&self, objid: u32, genno: u32) -> CipherTransform {
        CipherTransform {
            string_cipher: self.object_cipher(self.string_method, objid, genno),
            stream_cipher: self.object_cipher(self.stream_method, objid, genno),
            encrypt_metadata: self.encrypt_metadata,
            counter: 0,
        }
    }

    fn object_cipher(&self, method: CryptMethod, objid: u32, genno: u32) -> ObjectCipher {
        let salted = match method {
            CryptMethod::Identity => return ObjectCipher::Identity,
            CryptMethod::V2 => false,
            CryptMethod::AESV2 => true,
        };
        let mut key_data = self.key.clone();
        key_data.extend_from_slice(&objid.to_le_bytes()[..3]);
        key_data.extend_from_slice(&genno.to_le_bytes()[..2]);
        if salted {
            key_data.extend_from_slice(b"sAlT");
        }
        let hash = md5::compute(&key_data);
        let key_len = (self.key.len() + 5).min(16);
        if salted {
            ObjectCipher::Aes(hash.0[..key_len].to_vec())
        } else {
            ObjectCipher::Rc4(hash.0[..key_len].to_vec())
        }
    }
}

#[derive(Debug, Clone)]
enum ObjectCipher {
    Identity,
    Rc4(Vec<u8>),
    Aes(Vec<u8>),
}

/// Encrypts or decrypts the strings and streams of one object.
#[derive(Debug, Clone)]
pub struct CipherTransform {
    string_cipher: ObjectCipher,
    stream_cipher: ObjectCipher,
    encrypt_metadata: bool,
    counter: u32,
}

impl CipherTransform {
    pub fn encrypt_string(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.string_cipher.clone();
        self.encrypt(&cipher, data)
    }

    pub fn decrypt_string(&self, data: &[u8]) -> Result<Vec<u8>> {
        decrypt(&self.string_cipher, data)
    }

    /// Encrypt a stream body; metadata streams pass through when
    /// `EncryptMetadata` is false.
    pub fn encrypt_stream(&mut self, attrs: &PDFDict, data: &[u8]) -> Result<Vec<u8>> {
        if self.skips(attrs) {
            return Ok(data.to_vec());
        }
        let cipher = self.stream_cipher.clone();
        self.encrypt(&cipher, data)
    }

    pub fn decrypt_stream(&self, attrs: &PDFDict, data: &[u8]) -> Result<Vec<u8>> {
        if self.skips(attrs) {
            return Ok(data.to_vec());
        }
        decrypt(&self.stream_cipher, data)
    }

    fn skips(&self, attrs: &PDFDict) -> bool {
        !self.encrypt_metadata && attrs.get("Type").is_some_and(|t| t.is_name("Metadata"))
    }

    fn encrypt(&mut self, cipher: &ObjectCipher, data: &[u8]) -> Result<Vec<u8>> {
        match cipher {
            ObjectCipher::Identity => Ok(data.to_vec()),
            ObjectCipher::Rc4(key) => Ok(Arcfour::new(key).process(data)),
            ObjectCipher::Aes(key) => {
                // IV derived from the object key so output is reproducible
                self.counter += 1;
                let mut seed = key.clone();
                seed.extend_from_slice(&self.counter.to_le_bytes());
                let iv = md5::compute(&seed);
                aes128_cbc_encrypt(key, &iv.0, data)
            }
        }
    }
}

fn decrypt(cipher: &ObjectCipher, data: &[u8]) -> Result<Vec<u8>> {
    match cipher {
        ObjectCipher::Identity => Ok(data.to_vec()),
        ObjectCipher::Rc4(key) => Ok(Arcfour::new(key).process(data)),
        ObjectCipher::Aes(key) => aes128_cbc_decrypt(key, data),
    }
}

impl StandardParams<'_> {
    fn pad_password(password: &[u8]) -> [u8; 32] {
        let mut padded = [0u8; 32];
        let len = password.len().min(32);
        padded[..len].copy_from_slice(&password[..len]);
        padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
        padded
    }

    /// Algorithm 2: encryption key from a user password.
    fn compute_encryption_key(&self, password: &[u8]) -> Vec<u8> {
        let mut context = md5::Context::new();
        context.consume(Self::pad_password(password));
        context.consume(self.o);
        context.consume(self.p.to_le_bytes());
        context.consume(self.docid);
        if self.r >= 4 && !self.encrypt_metadata {
            context.consume([0xFF, 0xFF, 0xFF, 0xFF]);
        }
        let mut result = context.finalize().0.to_vec();
        if self.r >= 3 {
            for _ in 0..50 {
                result = md5::compute(&result[..self.key_len]).0.to_vec();
            }
        }
        result.truncate(self.key_len);
        result
    }

    /// Algorithms 4 and 5: the U value a key produces.
    fn compute_u_value(&self, key: &[u8]) -> Vec<u8> {
        if self.r == 2 {
            return Arcfour::new(key).process(&PASSWORD_PADDING);
        }
        let mut context = md5::Context::new();
        context.consume(PASSWORD_PADDING);
        context.consume(self.docid);
        let mut result = Arcfour::new(key).process(&context.finalize().0);
        for i in 1..20u8 {
            let xor_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            result = Arcfour::new(&xor_key).process(&result);
        }
        result
    }

    fn authenticate_user_password(&self, password: &[u8]) -> Option<Vec<u8>> {
        let key = self.compute_encryption_key(password);
        let u = self.compute_u_value(&key);
        let matches = if self.r == 2 {
            u.as_slice() == self.u
        } else {
            self.u.len() >= 16 && u[..16] == self.u[..16]
        };
        matches.then_some(key)
    }

    /// Algorithm 7: recover the user password from O, then authenticate it.
    fn authenticate_owner_password(&self, password: &[u8]) -> Option<Vec<u8>> {
        let mut hash = md5::compute(Self::pad_password(password)).0.to_vec();
        if self.r >= 3 {
            for _ in 0..50 {
                hash = md5::compute(&hash).0.to_vec();
            }
        }
        let key = &hash[..self.key_len];
        let user_password = if self.r == 2 {
            Arcfour::new(key).process(self.o)
        } else {
            let mut result = self.o.to_vec();
            for i in (0..20u8).rev() {
                let xor_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
                result = Arcfour::new(&xor_key).process(&result);
            }
            result
        };
        self.authenticate_user_password(&user_password)
    }
}

fn v4_key_len(encrypt: &PDFDict, cf: Option<&PDFDict>) -> usize {
    let from_filter = cf
        .and_then(|cf| cf.get("StdCF"))
        .and_then(|f| f.get("Length"))
        .and_then(|l| l.as_int().ok());
    let bits = match encrypt.get("Length").and_then(|l| l.as_int().ok()) {
        Some(bits) => bits,
        // Crypt filter lengths are often given in bytes
        None => match from_filter {
            Some(len) if len <= 16 => len * 8,
            Some(len) => len,
            None => 128,
        },
    };
    (bits.clamp(40, 128) / 8) as usize
}

fn resolve_crypt_method(cf: Option<&PDFDict>, name: &str) -> Result<CryptMethod> {
    if name == "Identity" {
        return Ok(CryptMethod::Identity);
    }
    let filter = cf
        .and_then(|cf| cf.get(name))
        .and_then(|f| f.as_dict().ok())
        .ok_or_else(|| PdfError::EncryptionError(format!("crypt filter '{name}' not in /CF")))?;
    match filter.get("CFM").and_then(|m| m.as_name().ok()).unwrap_or("None") {
        "V2" => Ok(CryptMethod::V2),
        "AESV2" => Ok(CryptMethod::AESV2),
        "None" => Ok(CryptMethod::Identity),
        other => Err(PdfError::EncryptionError(format!(
            "unsupported crypt filter method /{other}"
        ))),
    }
}

fn get_int(encrypt: &PDFDict, key: &str) -> Result<i64> {
    encrypt
        .get(key)
        .ok_or_else(|| PdfError::EncryptionError(format!("missing /{key} in /Encrypt")))?
        .as_int()
}

fn get_int_default(encrypt: &PDFDict, key: &str, default: i64) -> i64 {
    encrypt
        .get(key)
        .and_then(|v| v.as_int().ok())
        .unwrap_or(default)
}

fn get_bytes<'a>(encrypt: &'a PDFDict, key: &str) -> Result<&'a [u8]> {
    encrypt
        .get(key)
        .ok_or_else(|| PdfError::EncryptionError(format!("missing /{key} in /Encrypt")))?
        .as_string()
}

fn get_name_default<'a>(encrypt: &'a PDFDict, key: &str) -> &'a str {
    encrypt
        .get(key)
        .and_then(|v| v.as_name().ok())
        .unwrap_or("Identity")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dict_from;

    fn empty_password_rc4(r: i64) -> (PDFDict, Vec<Vec<u8>>) {
        let o = vec![0x11u8; 32];
        let id = vec![0x42u8; 16];
        let params = StandardParams {
            r,
            key_len: 5,
            o: &o,
            u: &[],
            p: -4i64 as u32,
            docid: &id,
            encrypt_metadata: true,
        };
        let key = params.compute_encryption_key(b"");
        let u = params.compute_u_value(&key);
        let (v, length) = if r == 2 { (1, 40) } else { (2, 40) };
        let encrypt = dict_from([
            ("Filter", PDFObject::name("Standard")),
            ("V", PDFObject::Int(v)),
            ("R", PDFObject::Int(r)),
            ("Length", PDFObject::Int(length)),
            ("P", PDFObject::Int(-4)),
            ("O", PDFObject::String(o.clone())),
            ("U", PDFObject::String(u)),
        ]);
        (encrypt, vec![id.clone(), id])
    }

    #[test]
    fn test_empty_user_password_authenticates() {
        for r in [2, 3] {
            let (encrypt, ids) = empty_password_rc4(r);
            assert!(CipherTransformFactory::from_encrypt_dict(&encrypt, &ids, "").is_ok());
            assert!(CipherTransformFactory::from_encrypt_dict(&encrypt, &ids, "nope").is_err());
        }
    }

    #[test]
    fn test_rc4_string_round_trip_is_per_object() {
        let (encrypt, ids) = empty_password_rc4(2);
        let factory = CipherTransformFactory::from_encrypt_dict(&encrypt, &ids, "").unwrap();
        let sealed = factory.create_cipher_transform(5, 0).encrypt_string(b"Yes").unwrap();
        assert_ne!(sealed, b"Yes");
        assert_ne!(
            sealed,
            factory.create_cipher_transform(6, 0).encrypt_string(b"Yes").unwrap()
        );
        assert_eq!(
            factory.create_cipher_transform(5, 0).decrypt_string(&sealed).unwrap(),
            b"Yes"
        );
    }

    #[test]
    fn test_aes_transform_is_deterministic() {
        let factory = CipherTransformFactory {
            key: vec![3u8; 16],
            string_method: CryptMethod::AESV2,
            stream_method: CryptMethod::AESV2,
            encrypt_metadata: true,
        };
        let a = factory.create_cipher_transform(9, 0).encrypt_string(b"value").unwrap();
        let b = factory.create_cipher_transform(9, 0).encrypt_string(b"value").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(
            factory.create_cipher_transform(9, 0).decrypt_string(&a).unwrap(),
            b"value"
        );
    }

    #[test]
    fn test_unencrypted_metadata_passes_through() {
        let factory = CipherTransformFactory {
            key: vec![3u8; 16],
            string_method: CryptMethod::V2,
            stream_method: CryptMethod::V2,
            encrypt_metadata: false,
        };
        let attrs = dict_from([("Type", PDFObject::name("Metadata"))]);
        let mut transform = factory.create_cipher_transform(1, 0);
        assert_eq!(transform.encrypt_stream(&attrs, b"<x/>").unwrap(), b"<x/>");
    }

    #[test]
    fn test_unknown_handler_is_rejected() {
        let encrypt = dict_from([
            ("Filter", PDFObject::name("Adobe.PubSec")),
            ("V", PDFObject::Int(4)),
            ("R", PDFObject::Int(4)),
        ]);
        assert!(matches!(
            CipherTransformFactory::from_encrypt_dict(&encrypt, &[], ""),
            Err(PdfError::EncryptionError(_))
        ));
    }
}
