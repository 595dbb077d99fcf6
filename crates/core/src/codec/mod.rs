//! Codec modules for PDF stream compression and encryption.
//!
//! - `aes`: AES-128-CBC encryption/decryption
//! - `arcfour`: RC4 encryption
//! - `flate`: zlib deflate/inflate
//! - `predictor`: PNG row predictors

pub mod aes;
pub mod arcfour;
pub mod flate;
pub mod predictor;

pub use aes::{aes128_cbc_decrypt, aes128_cbc_encrypt};
pub use arcfour::Arcfour;
pub use flate::{deflate, inflate};
pub use predictor::{PredictorParams, apply_png_predictor};
