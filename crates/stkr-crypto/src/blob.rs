//! Authenticated AES-256-CBC + HMAC-SHA256 blob encryption/decryption
//!
//! Blob format (binary):
//! ```text
//! [16 bytes: IV][N bytes: AES-256-CBC ciphertext, PKCS7 padded][32 bytes: HMAC-SHA256 tag]
//! tag = HMAC-SHA256(mac_key, IV || ciphertext)
//! ```
//!
//! The tag is verified in constant time before any decryption happens, so
//! an unverified plaintext is never produced.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use stkr_core::{StkrError, StkrResult};
use tracing::warn;

use crate::keys::PackKeys;
use crate::{IV_SIZE, MAC_SIZE, MIN_BLOB_SIZE};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const AES_BLOCK_SIZE: usize = 16;

fn new_mac(keys: &PackKeys) -> StkrResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(keys.mac_key())
        .map_err(|e| StkrError::Other(anyhow::anyhow!("HMAC key setup failed: {e}")))
}

/// Verify and decrypt a blob fetched from the sticker CDN.
///
/// - blobs shorter than IV + tag → `MalformedCiphertext`
/// - tag mismatch → `Integrity` (nothing is decrypted)
/// - ciphertext not block aligned, or bad padding → `MalformedCiphertext`
pub fn decrypt_blob(keys: &PackKeys, blob: &[u8]) -> StkrResult<Vec<u8>> {
    if blob.len() < MIN_BLOB_SIZE {
        return Err(StkrError::MalformedCiphertext {
            len: blob.len(),
            reason: format!("shorter than the {MIN_BLOB_SIZE}-byte minimum"),
        });
    }

    let (body, tag) = blob.split_at(blob.len() - MAC_SIZE);
    let (iv, ciphertext) = body.split_at(IV_SIZE);

    let mut mac = new_mac(keys)?;
    mac.update(body);
    if mac.verify_slice(tag).is_err() {
        warn!(
            blob_len = blob.len(),
            ciphertext_len = ciphertext.len(),
            "blob failed HMAC verification"
        );
        return Err(StkrError::Integrity { len: blob.len() });
    }

    if ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(StkrError::MalformedCiphertext {
            len: blob.len(),
            reason: format!(
                "ciphertext length {} is not a multiple of {AES_BLOCK_SIZE}",
                ciphertext.len()
            ),
        });
    }

    let cipher = Aes256CbcDec::new_from_slices(keys.aes_key(), iv)
        .map_err(|e| StkrError::Other(anyhow::anyhow!("AES-CBC setup failed: {e}")))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| StkrError::MalformedCiphertext {
            len: blob.len(),
            reason: "invalid PKCS7 padding".into(),
        })
}

/// Seal `plaintext` with the given IV.
///
/// Returns: `[16-byte IV][ciphertext][32-byte tag]`
pub fn encrypt_blob(keys: &PackKeys, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> StkrResult<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(keys.aes_key(), iv)
        .map_err(|e| StkrError::Other(anyhow::anyhow!("AES-CBC setup failed: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(IV_SIZE + ciphertext.len() + MAC_SIZE);
    blob.extend_from_slice(iv);
    blob.extend_from_slice(&ciphertext);

    let mut mac = new_mac(keys)?;
    mac.update(&blob);
    blob.extend_from_slice(&mac.finalize().into_bytes());
    Ok(blob)
}

/// Seal `plaintext` under a fresh random IV.
pub fn encrypt_blob_random_iv(keys: &PackKeys, plaintext: &[u8]) -> StkrResult<Vec<u8>> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_blob(keys, &iv, plaintext)
}
