//! Pack key parsing and HKDF-SHA256 derivation of the AES and HMAC keys

use hkdf::Hkdf;
use sha2::Sha256;
use stkr_core::{StkrError, StkrResult};
use zeroize::Zeroize;

use crate::{KEY_SIZE, STICKER_PACK_INFO};

/// The AES-256 and HMAC-SHA256 keys for one pack. Zeroized on drop.
#[derive(Clone)]
pub struct PackKeys {
    aes_key: [u8; KEY_SIZE],
    mac_key: [u8; KEY_SIZE],
}

impl PackKeys {
    pub fn from_bytes(aes_key: [u8; KEY_SIZE], mac_key: [u8; KEY_SIZE]) -> Self {
        Self { aes_key, mac_key }
    }

    pub fn aes_key(&self) -> &[u8; KEY_SIZE] {
        &self.aes_key
    }

    pub fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac_key
    }
}

impl Drop for PackKeys {
    fn drop(&mut self) {
        self.aes_key.zeroize();
        self.mac_key.zeroize();
    }
}

impl std::fmt::Debug for PackKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackKeys")
            .field("aes_key", &"[REDACTED]")
            .field("mac_key", &"[REDACTED]")
            .finish()
    }
}

/// Decode a hex pack key. Anything other than exactly 64 hex characters is
/// rejected; nothing is truncated or padded.
pub fn parse_pack_key(hex_key: &str) -> StkrResult<[u8; KEY_SIZE]> {
    let hex_key = hex_key.trim();
    if hex_key.len() % 2 != 0 {
        return Err(StkrError::KeyFormat(format!(
            "odd number of hex digits ({})",
            hex_key.len()
        )));
    }

    let mut decoded =
        hex::decode(hex_key).map_err(|e| StkrError::KeyFormat(format!("not valid hex: {e}")))?;

    if decoded.len() != KEY_SIZE {
        let len = decoded.len();
        decoded.zeroize();
        return Err(StkrError::KeyFormat(format!(
            "expected {KEY_SIZE} bytes, got {len}"
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&decoded);
    decoded.zeroize();
    Ok(key)
}

/// Parse `hex_key` and derive the pack's AES and HMAC keys.
pub fn derive_pack_keys(hex_key: &str) -> StkrResult<PackKeys> {
    let mut ikm = parse_pack_key(hex_key)?;
    let keys = derive_from_bytes(&ikm);
    ikm.zeroize();
    keys
}

/// HKDF-SHA256 with a zero salt and the "Sticker Pack" info string,
/// expanded to 64 bytes and split in half.
pub fn derive_from_bytes(ikm: &[u8; KEY_SIZE]) -> StkrResult<PackKeys> {
    let salt = [0u8; KEY_SIZE];
    let hkdf = Hkdf::<Sha256>::new(Some(&salt[..]), ikm);

    let mut okm = [0u8; 2 * KEY_SIZE];
    hkdf.expand(STICKER_PACK_INFO, &mut okm)
        .map_err(|e| StkrError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;

    let mut aes_key = [0u8; KEY_SIZE];
    let mut mac_key = [0u8; KEY_SIZE];
    aes_key.copy_from_slice(&okm[..KEY_SIZE]);
    mac_key.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();

    Ok(PackKeys::from_bytes(aes_key, mac_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};

    const KEY_HEX: &str = "f89b2c3d4e5f60718293a4b5c6d7e8f90112233445566778899aabbccddeeff0";

    fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        for p in parts {
            mac.update(p);
        }
        mac.finalize().into_bytes().to_vec()
    }

    #[test]
    fn test_derive_deterministic() {
        let k1 = derive_pack_keys(KEY_HEX).unwrap();
        let k2 = derive_pack_keys(KEY_HEX).unwrap();
        assert_eq!(k1.aes_key(), k2.aes_key());
        assert_eq!(k1.mac_key(), k2.mac_key());
        assert_ne!(k1.aes_key(), k1.mac_key(), "halves must differ");
    }

    #[test]
    fn test_derive_different_inputs() {
        let other = "00".repeat(32);
        let k1 = derive_pack_keys(KEY_HEX).unwrap();
        let k2 = derive_pack_keys(&other).unwrap();
        assert_ne!(k1.aes_key(), k2.aes_key());
        assert_ne!(k1.mac_key(), k2.mac_key());
    }

    #[test]
    fn test_matches_two_stage_hkdf() {
        let ikm = parse_pack_key(KEY_HEX).unwrap();

        // Extract
        let prk = hmac_sha256(&[0u8; 32], &[&ikm]);
        // Expand: T(1) = HMAC(PRK, info || 0x01), T(2) = HMAC(PRK, T(1) || info || 0x02)
        let t1 = hmac_sha256(&prk, &[STICKER_PACK_INFO, &[1]]);
        let t2 = hmac_sha256(&prk, &[&t1, STICKER_PACK_INFO, &[2]]);

        let keys = derive_pack_keys(KEY_HEX).unwrap();
        assert_eq!(keys.aes_key().as_slice(), t1.as_slice());
        assert_eq!(keys.mac_key().as_slice(), t2.as_slice());
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let upper = derive_pack_keys(&KEY_HEX.to_uppercase()).unwrap();
        let lower = derive_pack_keys(KEY_HEX).unwrap();
        assert_eq!(upper.aes_key(), lower.aes_key());
    }

    #[test]
    fn test_odd_length_rejected() {
        let err = parse_pack_key(&KEY_HEX[1..]).unwrap_err();
        assert!(matches!(err, StkrError::KeyFormat(_)), "{err}");
    }

    #[test]
    fn test_non_hex_rejected() {
        let bad = format!("zz{}", &KEY_HEX[2..]);
        let err = derive_pack_keys(&bad).unwrap_err();
        assert!(matches!(err, StkrError::KeyFormat(_)), "{err}");
    }

    #[test]
    fn test_wrong_length_rejected() {
        let too_long = format!("{KEY_HEX}00");
        for bad in ["", "abcd", &KEY_HEX[..62], too_long.as_str()] {
            let err = parse_pack_key(bad).unwrap_err();
            assert!(matches!(err, StkrError::KeyFormat(_)), "{bad:?}: {err}");
        }
    }

    #[test]
    fn test_debug_redacts() {
        let keys = derive_pack_keys(KEY_HEX).unwrap();
        let dbg = format!("{keys:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(&hex::encode(keys.aes_key())));
    }
}
