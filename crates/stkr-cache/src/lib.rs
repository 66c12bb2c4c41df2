//! Disk cache for decrypted sticker packs.
//!
//! Cache layout:
//! ```text
//! {root}/{pack_id}/manifest.json      decrypted, parsed manifest (UTF-8 JSON)
//! {root}/{pack_id}/{sticker_id}.webp  decrypted image bytes
//! ```
//!
//! Every file is written atomically (temp → rename), so a present sticker
//! file always holds a complete, verified image and is never re-fetched.
//! The cache only grows; files are removed by `remove_pack` and `clear`.
//!
//! Image files always carry the `.webp` extension, whatever format the bytes
//! are actually in; callers sniff the format from the content.

use std::path::{Path, PathBuf};
use stkr_core::{StickerManifest, StkrError, StkrResult};
use tokio::fs;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const STICKER_EXTENSION: &str = "webp";

pub struct PackCache {
    root: PathBuf,
}

impl PackCache {
    pub fn new(root: PathBuf) -> Self {
        PackCache { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pack_dir(&self, pack_id: &str) -> PathBuf {
        self.root.join(pack_id)
    }

    pub fn manifest_path(&self, pack_id: &str) -> PathBuf {
        self.pack_dir(pack_id).join(MANIFEST_FILE)
    }

    pub fn sticker_path(&self, pack_id: &str, sticker_id: u32) -> PathBuf {
        self.pack_dir(pack_id)
            .join(format!("{sticker_id}.{STICKER_EXTENSION}"))
    }

    /// Create the pack directory if needed. Idempotent.
    pub async fn ensure_pack_dir(&self, pack_id: &str) -> StkrResult<PathBuf> {
        let dir = self.pack_dir(pack_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StkrError::Cache(format!("creating {}: {e}", dir.display())))?;
        Ok(dir)
    }

    pub async fn has_manifest(&self, pack_id: &str) -> bool {
        fs::try_exists(self.manifest_path(pack_id))
            .await
            .unwrap_or(false)
    }

    /// Read the cached manifest. A missing or unparseable file is a miss,
    /// not an error.
    pub async fn load_manifest(&self, pack_id: &str) -> Option<StickerManifest> {
        let path = self.manifest_path(pack_id);
        let bytes = fs::read(&path).await.ok()?;
        match serde_json::from_slice::<StickerManifest>(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(
                    pack_id = %pack_id,
                    path = %path.display(),
                    "ignoring unreadable cached manifest: {e}"
                );
                None
            }
        }
    }

    /// Write `manifest.json`, replacing whatever was there (including a
    /// placeholder).
    pub async fn save_manifest(&self, pack_id: &str, manifest: &StickerManifest) -> StkrResult<()> {
        self.ensure_pack_dir(pack_id).await?;
        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| StkrError::Cache(format!("serializing manifest for {pack_id}: {e}")))?;
        write_atomic(&self.manifest_path(pack_id), &body).await?;
        debug!(
            pack_id = %pack_id,
            stickers = manifest.stickers.len(),
            placeholder = manifest.placeholder,
            "manifest cached"
        );
        Ok(())
    }

    pub async fn has_sticker(&self, pack_id: &str, sticker_id: u32) -> bool {
        fs::try_exists(self.sticker_path(pack_id, sticker_id))
            .await
            .unwrap_or(false)
    }

    pub async fn read_sticker(&self, pack_id: &str, sticker_id: u32) -> Option<Vec<u8>> {
        fs::read(self.sticker_path(pack_id, sticker_id)).await.ok()
    }

    /// Store decrypted image bytes and return the file path.
    pub async fn save_sticker(
        &self,
        pack_id: &str,
        sticker_id: u32,
        data: &[u8],
    ) -> StkrResult<PathBuf> {
        self.ensure_pack_dir(pack_id).await?;
        let path = self.sticker_path(pack_id, sticker_id);
        write_atomic(&path, data).await?;
        debug!(pack_id = %pack_id, sticker_id, bytes = data.len(), "sticker cached");
        Ok(path)
    }

    /// Ids of every pack directory that holds a manifest, sorted.
    pub async fn cached_pack_ids(&self) -> StkrResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if self.has_manifest(&name).await {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete one pack's directory. Returns true if it existed.
    pub async fn remove_pack(&self, pack_id: &str) -> StkrResult<bool> {
        let dir = self.pack_dir(pack_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StkrError::Cache(format!("removing {}: {e}", dir.display()))),
        }
    }

    /// Delete everything under the cache root. Returns the number of pack
    /// directories removed.
    pub async fn clear(&self) -> StkrResult<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
                removed += 1;
            } else {
                fs::remove_file(&path).await?;
            }
        }
        debug!(root = %self.root.display(), removed, "cache cleared");
        Ok(removed)
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> StkrResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)
        .await
        .map_err(|e| StkrError::Cache(format!("writing {}: {e}", tmp.display())))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StkrError::Cache(format!("renaming to {}: {e}", path.display())));
    }
    Ok(())
}
