use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{StkrError, StkrResult};

/// Emoji used for the stand-in stickers of a placeholder manifest.
pub const PLACEHOLDER_EMOJI: [&str; 8] = ["😀", "😂", "😍", "😎", "🤔", "😢", "😡", "👍"];

/// Base of the canonical share link rendered by [`PackReference::share_url`].
pub const SHARE_URL_BASE: &str = "https://signal.art/addstickers/";

fn share_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)pack_id=([a-f0-9]+)&pack_key=([a-f0-9]+)")
            .expect("share url pattern is a valid regex")
    })
}

/// The (pack id, pack key) pair that identifies and unlocks one sticker pack.
///
/// Both halves are lower-case hex. The id doubles as the cache directory
/// name, so it never contains anything but `[0-9a-f]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackReference {
    pub pack_id: String,
    pub pack_key: String,
}

impl PackReference {
    /// Build a reference from stored values. The id must be hex; the key is
    /// only normalized here and validated when keys are derived.
    pub fn new(pack_id: impl AsRef<str>, pack_key: impl AsRef<str>) -> StkrResult<Self> {
        let pack_id = pack_id.as_ref().trim().to_ascii_lowercase();
        if pack_id.is_empty() || !pack_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StkrError::InvalidUrl(format!(
                "pack id must be non-empty hex, got {pack_id:?}"
            )));
        }
        Ok(Self {
            pack_id,
            pack_key: pack_key.as_ref().trim().to_ascii_lowercase(),
        })
    }

    /// Extract `pack_id=<hex>&pack_key=<hex>` from a share link.
    pub fn from_share_url(url: &str) -> StkrResult<Self> {
        let caps = share_url_regex()
            .captures(url)
            .ok_or_else(|| StkrError::InvalidUrl(url.to_string()))?;
        Self::new(&caps[1], &caps[2])
    }

    pub fn share_url(&self) -> String {
        format!(
            "{SHARE_URL_BASE}#pack_id={}&pack_key={}",
            self.pack_id, self.pack_key
        )
    }
}

/// One entry of a pack manifest, before its image is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRef {
    pub id: u32,
    pub emoji: String,
}

/// Decrypted pack metadata. Persisted as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerManifest {
    pub title: String,
    pub author: String,
    pub cover: Option<StickerRef>,
    pub stickers: Vec<StickerRef>,
    /// Set on manifests synthesized locally after a failed fetch. A later
    /// successful fetch replaces them.
    #[serde(default, skip_serializing_if = "is_false")]
    pub placeholder: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl StickerManifest {
    /// Stand-in manifest with one sticker per [`PLACEHOLDER_EMOJI`].
    pub fn placeholder(pack_id: &str) -> Self {
        let stickers: Vec<StickerRef> = PLACEHOLDER_EMOJI
            .iter()
            .enumerate()
            .map(|(i, emoji)| StickerRef {
                id: i as u32,
                emoji: (*emoji).to_string(),
            })
            .collect();
        let short: String = pack_id.chars().take(8).collect();
        Self {
            title: format!("Sticker pack {short}"),
            author: String::new(),
            cover: stickers.first().cloned(),
            stickers,
            placeholder: true,
        }
    }

    /// Whether this manifest came from the network (i.e. is final).
    pub fn exists(&self) -> bool {
        !self.placeholder
    }
}

/// Encoded image format, sniffed from the decrypted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickerFormat {
    Webp,
    Png,
    Apng,
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

impl StickerFormat {
    /// Detect the format from magic bytes. Anything unrecognized is assumed
    /// to be WebP, the format stickers are normally published in.
    pub fn sniff(data: &[u8]) -> Self {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return StickerFormat::Webp;
        }
        if data.starts_with(&PNG_SIGNATURE) {
            return if png_has_actl(data) {
                StickerFormat::Apng
            } else {
                StickerFormat::Png
            };
        }
        StickerFormat::Webp
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StickerFormat::Webp => "webp",
            StickerFormat::Png => "png",
            StickerFormat::Apng => "apng",
        }
    }
}

impl std::fmt::Display for StickerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walk PNG chunks up to the first IDAT looking for an animation control chunk.
fn png_has_actl(data: &[u8]) -> bool {
    let mut offset = PNG_SIGNATURE.len();
    while offset + 8 <= data.len() {
        let len = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let kind = &data[offset + 4..offset + 8];
        match kind {
            b"acTL" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => {}
        }
        // length + type + data + crc
        offset = match offset.checked_add(12 + len) {
            Some(next) => next,
            None => return false,
        };
    }
    false
}

/// A decrypted sticker materialized in the disk cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerAsset {
    pub pack_id: String,
    pub pack_title: String,
    pub pack_author: String,
    pub sticker_id: u32,
    pub emoji: String,
    /// `None` for the emoji-only stickers of a placeholder manifest.
    pub image_path: Option<PathBuf>,
    pub format: StickerFormat,
}

/// A loaded pack as held by the in-process registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPack {
    pub manifest: StickerManifest,
    pub assets: Vec<StickerAsset>,
    /// Unix timestamp (seconds) of the last publish or asset lookup
    pub last_accessed: u64,
}

impl CachedPack {
    pub fn new(manifest: StickerManifest, assets: Vec<StickerAsset>) -> Self {
        Self {
            manifest,
            assets,
            last_accessed: unix_now(),
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
