//! stkr-crypto: decryption of sticker pack blobs
//!
//! Every blob served by the sticker CDN (the manifest and each sticker image)
//! is sealed with keys derived from the pack key:
//!
//! ```text
//! pack_key (32 bytes, hex in the share URL)
//!   └── HKDF-SHA256(salt = 0^32, info = "Sticker Pack") → 64 bytes
//!         ├── [0..32)  AES-256-CBC key
//!         └── [32..64) HMAC-SHA256 key
//!
//! blob = IV (16) || AES-256-CBC(PKCS7(plaintext)) || HMAC-SHA256(IV || ciphertext) (32)
//! ```

pub mod blob;
pub mod keys;

pub use blob::{decrypt_blob, encrypt_blob, encrypt_blob_random_iv};
pub use keys::{derive_pack_keys, parse_pack_key, PackKeys};

/// Size of the pack key and of each derived key (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the AES-CBC initialization vector
pub const IV_SIZE: usize = 16;

/// Size of the HMAC-SHA256 tag appended to every blob
pub const MAC_SIZE: usize = 32;

/// Smallest blob that can hold an IV and a tag
pub const MIN_BLOB_SIZE: usize = IV_SIZE + MAC_SIZE;

/// HKDF info string for sticker pack keys
pub const STICKER_PACK_INFO: &[u8] = b"Sticker Pack";
