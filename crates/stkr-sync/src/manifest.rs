//! Decoder for the decrypted `manifest.proto` blob.
//!
//! Packs use a small protobuf message:
//!
//! ```text
//! Pack    { 1: title (string), 2: author (string), 3: cover (Sticker), 4: stickers (repeated Sticker) }
//! Sticker { 1: id (uint32), 2: emoji (string) }
//! ```
//!
//! Only single-byte tags, lengths and ids are accepted. A tag or length that
//! would need a multi-byte varint is rejected with `ManifestParse` rather than
//! misread. A sticker whose id needs one is dropped on its own and the rest of
//! the pack still decodes.

use stkr_core::{StickerManifest, StickerRef, StkrError, StkrResult};
use tracing::warn;

const WIRE_VARINT: u8 = 0;
const WIRE_LEN: u8 = 2;

const PACK_TITLE: u8 = 1;
const PACK_AUTHOR: u8 = 2;
const PACK_COVER: u8 = 3;
const PACK_STICKER: u8 = 4;

const STICKER_ID: u8 = 1;
const STICKER_EMOJI: u8 = 2;

/// Anything at or above this has the varint continuation bit set.
const CONTINUATION: u8 = 0x80;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Offset of `buf[0]` within the whole manifest, for error reporting.
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self, what: &str) -> StkrResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| StkrError::manifest_parse(self.offset(), format!("truncated {what}")))?;
        self.pos += 1;
        Ok(b)
    }

    /// A one-byte varint (tag, length or id).
    fn small_varint(&mut self, what: &str) -> StkrResult<u8> {
        let at = self.offset();
        let b = self.byte(what)?;
        if b >= CONTINUATION {
            return Err(StkrError::manifest_parse(
                at,
                format!("{what} 0x{b:02x} needs a multi-byte varint"),
            ));
        }
        Ok(b)
    }

    /// Field key: `(field_number, wire_type)`.
    fn tag(&mut self) -> StkrResult<(u8, u8)> {
        let tag = self.small_varint("tag")?;
        Ok((tag >> 3, tag & 0x07))
    }

    /// Length-prefixed payload. Returns the payload and its absolute offset.
    fn bytes(&mut self) -> StkrResult<(&'a [u8], usize)> {
        let len = self.small_varint("length")? as usize;
        let start = self.pos;
        let end = start + len;
        if end > self.buf.len() {
            return Err(StkrError::manifest_parse(
                self.offset(),
                format!(
                    "field length {len} exceeds remaining {} bytes",
                    self.buf.len() - start
                ),
            ));
        }
        self.pos = end;
        Ok((&self.buf[start..end], self.base + start))
    }

    fn string(&mut self) -> StkrResult<String> {
        let (raw, _) = self.bytes()?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn skip(&mut self, wire_type: u8) -> StkrResult<()> {
        match wire_type {
            WIRE_VARINT => {
                self.small_varint("varint")?;
            }
            WIRE_LEN => {
                self.bytes()?;
            }
            other => {
                return Err(StkrError::manifest_parse(
                    self.offset(),
                    format!("unsupported wire type {other}"),
                ))
            }
        }
        Ok(())
    }
}

/// Parse a decrypted manifest. Sticker order is preserved and the cover
/// falls back to the first sticker when the pack does not name one.
pub fn decode_manifest(data: &[u8]) -> StkrResult<StickerManifest> {
    let mut r = Reader::new(data, 0);
    let mut title = String::new();
    let mut author = String::new();
    let mut cover = None;
    let mut stickers = Vec::new();

    while !r.at_end() {
        let (field, wire) = r.tag()?;
        match (field, wire) {
            (PACK_TITLE, WIRE_LEN) => title = r.string()?,
            (PACK_AUTHOR, WIRE_LEN) => author = r.string()?,
            (PACK_COVER, WIRE_LEN) => {
                let (body, at) = r.bytes()?;
                cover = decode_sticker(body, at)?;
            }
            (PACK_STICKER, WIRE_LEN) => {
                let (body, at) = r.bytes()?;
                stickers.extend(decode_sticker(body, at)?);
            }
            (_, wire) => r.skip(wire)?,
        }
    }

    if cover.is_none() {
        cover = stickers.first().cloned();
    }

    Ok(StickerManifest {
        title,
        author,
        cover,
        stickers,
        placeholder: false,
    })
}

/// Decode one length-delimited sticker body. `Ok(None)` means the sticker
/// was readable but unusable and should be left out of the pack.
fn decode_sticker(body: &[u8], base: usize) -> StkrResult<Option<StickerRef>> {
    let mut r = Reader::new(body, base);
    let mut id = 0u32;
    let mut emoji = String::new();

    while !r.at_end() {
        let (field, wire) = r.tag()?;
        match (field, wire) {
            (STICKER_ID, WIRE_VARINT) => {
                let at = r.offset();
                let b = r.byte("sticker id")?;
                if b >= CONTINUATION {
                    // The body is length-delimited, so the rest of it is skipped
                    // along with the sticker.
                    warn!(
                        offset = at,
                        "sticker id 0x{b:02x} needs a multi-byte varint, skipping sticker"
                    );
                    return Ok(None);
                }
                id = b as u32;
            }
            (STICKER_EMOJI, WIRE_LEN) => emoji = r.string()?,
            (_, wire) => r.skip(wire)?,
        }
    }

    Ok(Some(StickerRef { id, emoji }))
}

/// Encode a manifest in the same single-byte subset `decode_manifest`
/// reads. Used to build fixtures and test packs.
pub fn encode_manifest(manifest: &StickerManifest) -> StkrResult<Vec<u8>> {
    let mut out = Vec::new();
    put_string(&mut out, PACK_TITLE, &manifest.title)?;
    put_string(&mut out, PACK_AUTHOR, &manifest.author)?;
    if let Some(cover) = &manifest.cover {
        let body = encode_sticker(cover)?;
        put_bytes(&mut out, PACK_COVER, &body)?;
    }
    for sticker in &manifest.stickers {
        let body = encode_sticker(sticker)?;
        put_bytes(&mut out, PACK_STICKER, &body)?;
    }
    Ok(out)
}

fn encode_sticker(sticker: &StickerRef) -> StkrResult<Vec<u8>> {
    if sticker.id >= CONTINUATION as u32 {
        return Err(StkrError::manifest_parse(
            0,
            format!("sticker id {} does not fit a single byte", sticker.id),
        ));
    }
    let mut out = vec![key(STICKER_ID, WIRE_VARINT), sticker.id as u8];
    put_string(&mut out, STICKER_EMOJI, &sticker.emoji)?;
    Ok(out)
}

fn key(field: u8, wire: u8) -> u8 {
    (field << 3) | wire
}

fn put_string(out: &mut Vec<u8>, field: u8, value: &str) -> StkrResult<()> {
    put_bytes(out, field, value.as_bytes())
}

fn put_bytes(out: &mut Vec<u8>, field: u8, value: &[u8]) -> StkrResult<()> {
    if value.len() >= CONTINUATION as usize {
        return Err(StkrError::manifest_parse(
            out.len(),
            format!("field {field} is {} bytes, over the single-byte limit", value.len()),
        ));
    }
    out.push(key(field, WIRE_LEN));
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    Ok(())
}
