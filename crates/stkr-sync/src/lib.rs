//! stkr-sync: sticker pack loading, caching and the in-process registry
//!
//! [`StickerEngine`] is the entry point. It owns the loader, the disk cache
//! and the registry; front-ends call it and subscribe to registry events.

pub mod engine;
pub mod manifest;
pub mod registry;

use std::sync::Arc;
use stkr_cache::PackCache;
use stkr_core::config::StkrConfig;
use stkr_core::{PackReference, StickerAsset, StickerManifest, StkrResult};
use stkr_fetch::{CdnClient, PackSource};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use engine::{LoadOutcome, LoadReport, LoaderOptions, PackLoader};
pub use manifest::{decode_manifest, encode_manifest};
pub use registry::{RegisteredPack, Registry, RegistryEvent};

/// What `preview_pack` shows before a pack is added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackPreview {
    pub reference: PackReference,
    pub manifest: StickerManifest,
    /// The pack is already in the registry
    pub already_exists: bool,
}

pub struct StickerEngine {
    loader: Arc<PackLoader>,
    registry: Arc<Registry>,
    cache: Arc<PackCache>,
}

impl StickerEngine {
    pub fn new(source: Arc<dyn PackSource>, cache: PackCache, options: LoaderOptions) -> Self {
        let cache = Arc::new(cache);
        let registry = Arc::new(Registry::new());
        let loader = Arc::new(PackLoader::new(
            source,
            cache.clone(),
            registry.clone(),
            options,
        ));
        Self {
            loader,
            registry,
            cache,
        }
    }

    /// Build an engine talking to the configured CDN, with every
    /// `[[packs]]` entry registered (but not yet loaded). Entries with an
    /// invalid id or key are skipped with a warning.
    pub fn from_config(config: &StkrConfig) -> StkrResult<Self> {
        let source = Arc::new(CdnClient::new(&config.cdn)?);
        let engine = Self::new(
            source,
            PackCache::new(config.cache_dir()),
            LoaderOptions::from_config(config),
        );
        for entry in &config.packs {
            match entry.reference() {
                Ok(reference) => {
                    engine.registry.register(&reference, entry.name.clone());
                }
                Err(e) => {
                    warn!(pack_id = %entry.pack_id, error = %e, "skipping configured pack");
                }
            }
        }
        Ok(engine)
    }

    pub fn loader(&self) -> &Arc<PackLoader> {
        &self.loader
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &PackCache {
        &self.cache
    }

    pub async fn load_pack(&self, reference: &PackReference) -> StkrResult<LoadOutcome> {
        self.loader.load_pack(reference).await
    }

    /// Parse a share link, register the pack and load it.
    ///
    /// The key is validated before the pack is registered, so a bad link
    /// leaves the registry untouched.
    pub async fn add_pack_from_url(
        &self,
        url: &str,
        name: Option<String>,
    ) -> StkrResult<(PackReference, LoadOutcome)> {
        let reference = PackReference::from_share_url(url)?;
        stkr_crypto::parse_pack_key(&reference.pack_key)?;
        self.registry.register(&reference, name);
        let outcome = self.loader.load_pack(&reference).await?;
        Ok((reference, outcome))
    }

    /// Look at a pack without adding it. `Ok(None)` means the manifest could
    /// not be fetched or decoded.
    pub async fn preview_pack(&self, url: &str) -> StkrResult<Option<PackPreview>> {
        let reference = PackReference::from_share_url(url)?;
        let already_exists = self.registry.contains(&reference.pack_id);
        let manifest = self.loader.preview(&reference).await?;
        Ok(manifest.map(|manifest| PackPreview {
            reference,
            manifest,
            already_exists,
        }))
    }

    pub fn get_pack_assets(&self, pack_id: &str) -> Vec<StickerAsset> {
        self.registry.get_pack_assets(pack_id)
    }

    pub fn get_all_assets(&self) -> Vec<StickerAsset> {
        self.registry.get_all_assets()
    }

    pub fn list_packs(&self) -> Vec<RegisteredPack> {
        self.registry.list_packs()
    }

    pub fn select_pack(&self, pack_id: Option<&str>) -> bool {
        self.registry.select_pack(pack_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    pub fn cancel_load(&self, pack_id: &str) -> bool {
        self.loader.cancel(pack_id)
    }

    /// Forget a pack: cancel its load, drop it from the registry and delete
    /// its cache directory. Returns true if anything was removed.
    pub async fn remove_pack(&self, pack_id: &str) -> StkrResult<bool> {
        self.loader.cancel(pack_id);
        let in_registry = self.registry.remove(pack_id);
        let on_disk = self.cache.remove_pack(pack_id).await?;
        Ok(in_registry || on_disk)
    }

    /// Cancel every load, then empty the disk cache and the registry.
    /// Returns the number of pack directories deleted.
    pub async fn clear_cache(&self) -> StkrResult<usize> {
        self.loader.cancel_all();
        let removed = self.cache.clear().await?;
        self.registry.clear();
        info!(removed, "sticker cache cleared");
        Ok(removed)
    }

    pub fn shutdown(&self) {
        self.loader.shutdown();
    }
}
