use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{StkrError, StkrResult};
use crate::types::PackReference;

/// Top-level configuration (loaded from stkr.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StkrConfig {
    pub cdn: CdnConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
    /// Packs the user has added, in the order they were added
    pub packs: Vec<PackEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdnConfig {
    /// Sticker CDN base URL (default: https://cdn-ca.signal.org)
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Extra attempts for transient failures (transport errors, 5xx)
    pub max_retries: u32,
    /// Delay before the first retry; retry n waits n times this
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the per-pack cache directories
    pub dir: PathBuf,
    /// Stickers fetched in parallel per pack
    pub sticker_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// A stored pack reference with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    pub pack_id: String,
    pub pack_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PackEntry {
    pub fn reference(&self) -> StkrResult<PackReference> {
        PackReference::new(&self.pack_id, &self.pack_key)
    }
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: "https://cdn-ca.signal.org".into(),
            timeout_secs: 30,
            user_agent: concat!("stkr/", env!("CARGO_PKG_VERSION")).into(),
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.cache/stkr/stickers"),
            sticker_concurrency: 4,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl StkrConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> StkrResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StkrError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Write the config atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> StkrResult<()> {
        let body = toml::to_string_pretty(self)
            .map_err(|e| StkrError::Config(format!("serializing config: {e}")))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Insert a pack, or update key and name of an existing one with the
    /// same id. Returns true when a new entry was appended.
    pub fn upsert_pack(&mut self, reference: &PackReference, name: Option<String>) -> bool {
        if let Some(existing) = self
            .packs
            .iter_mut()
            .find(|p| p.pack_id.eq_ignore_ascii_case(&reference.pack_id))
        {
            existing.pack_key = reference.pack_key.clone();
            if name.is_some() {
                existing.name = name;
            }
            return false;
        }
        self.packs.push(PackEntry {
            pack_id: reference.pack_id.clone(),
            pack_key: reference.pack_key.clone(),
            name,
        });
        true
    }

    /// Drop a pack by id. Returns true if it was present.
    pub fn remove_pack(&mut self, pack_id: &str) -> bool {
        let before = self.packs.len();
        self.packs.retain(|p| !p.pack_id.eq_ignore_ascii_case(pack_id));
        self.packs.len() != before
    }

    /// Cache root with `~` expanded.
    pub fn cache_dir(&self) -> PathBuf {
        expand_tilde(&self.cache.dir)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
