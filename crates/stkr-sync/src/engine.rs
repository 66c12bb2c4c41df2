//! Pack loader: turns a `PackReference` into published, cached assets.
//!
//! A load runs in two phases:
//!   1. manifest: disk cache → CDN (decrypt, parse, persist) → placeholder
//!   2. stickers: for each manifest entry, disk cache → CDN (decrypt, persist)
//!
//! The manifest phase always finishes before any sticker is requested.
//! Stickers are resolved with bounded concurrency but published in manifest
//! order. Loads are deduplicated per pack id: while one is in flight, a second
//! request for the same pack returns `LoadOutcome::InFlight` immediately.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stkr_cache::PackCache;
use stkr_core::config::StkrConfig;
use stkr_core::{
    CachedPack, PackReference, StickerAsset, StickerFormat, StickerManifest, StickerRef,
    StkrResult,
};
use stkr_crypto::{decrypt_blob, derive_pack_keys, PackKeys};
use stkr_fetch::PackSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::manifest::decode_manifest;
use crate::registry::Registry;

/// Tunables for the loader, normally taken from `[cdn]` and `[cache]`.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Extra attempts after a transient network failure (transport or 5xx)
    pub max_retries: u32,
    /// Delay before retry n is `retry_backoff * n`
    pub retry_backoff: Duration,
    /// Stickers fetched concurrently per pack
    pub sticker_concurrency: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            sticker_concurrency: 4,
        }
    }
}

impl LoaderOptions {
    pub fn from_config(config: &StkrConfig) -> Self {
        Self {
            max_retries: config.cdn.max_retries,
            retry_backoff: Duration::from_millis(config.cdn.retry_backoff_ms),
            sticker_concurrency: config.cache.sticker_concurrency.max(1),
        }
    }
}

/// Summary of one completed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub pack_id: String,
    pub title: String,
    pub stickers_total: usize,
    /// Images already on disk
    pub stickers_cached: usize,
    /// Images downloaded and decrypted by this load
    pub stickers_fetched: usize,
    /// Images that could not be obtained; omitted from the published assets
    pub stickers_failed: usize,
    /// The manifest is a local stand-in; no images were requested
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(LoadReport),
    /// Another load for this pack is running; nothing was done.
    InFlight,
    /// The load was cancelled before publishing.
    Cancelled,
}

enum StickerResult {
    Cached(StickerAsset),
    Fetched(StickerAsset),
    Failed,
}

/// Removes the in-flight entry on every exit path.
struct InFlightGuard<'a> {
    map: &'a Mutex<HashMap<String, CancellationToken>>,
    pack_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.lock().unwrap().remove(&self.pack_id);
    }
}

pub struct PackLoader {
    source: Arc<dyn PackSource>,
    cache: Arc<PackCache>,
    registry: Arc<Registry>,
    options: LoaderOptions,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    /// Parent of every per-load token; cancelled by `shutdown`.
    root_token: CancellationToken,
}

impl PackLoader {
    pub fn new(
        source: Arc<dyn PackSource>,
        cache: Arc<PackCache>,
        registry: Arc<Registry>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            source,
            cache,
            registry,
            options,
            in_flight: Mutex::new(HashMap::new()),
            root_token: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Atomically claim `pack_id`. Returns `None` if a load already holds it.
    fn begin(&self, pack_id: &str) -> Option<(InFlightGuard<'_>, CancellationToken)> {
        let mut map = self.in_flight.lock().unwrap();
        if map.contains_key(pack_id) {
            return None;
        }
        let token = self.root_token.child_token();
        map.insert(pack_id.to_string(), token.clone());
        Some((
            InFlightGuard {
                map: &self.in_flight,
                pack_id: pack_id.to_string(),
            },
            token,
        ))
    }

    pub fn is_loading(&self, pack_id: &str) -> bool {
        self.in_flight.lock().unwrap().contains_key(pack_id)
    }

    /// Pack ids with a load in progress.
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.in_flight.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel the load for `pack_id`. Returns false if none is running.
    pub fn cancel(&self, pack_id: &str) -> bool {
        match self.in_flight.lock().unwrap().get(pack_id) {
            Some(token) => {
                token.cancel();
                info!(pack_id = %pack_id, "load cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every running load. New loads may still start afterwards.
    pub fn cancel_all(&self) -> usize {
        let map = self.in_flight.lock().unwrap();
        for token in map.values() {
            token.cancel();
        }
        if !map.is_empty() {
            info!(count = map.len(), "all loads cancelled");
        }
        map.len()
    }

    /// Cancel every running load and refuse new ones.
    pub fn shutdown(&self) {
        self.root_token.cancel();
    }

    /// Load one pack and publish it to the registry.
    ///
    /// Fails only for a malformed pack key, which is checked before any
    /// network or disk work. Network, integrity and parse failures degrade to
    /// a placeholder manifest or to missing stickers instead.
    pub async fn load_pack(&self, reference: &PackReference) -> StkrResult<LoadOutcome> {
        let keys = derive_pack_keys(&reference.pack_key)?;
        let pack_id = reference.pack_id.as_str();

        let Some((_guard, token)) = self.begin(pack_id) else {
            debug!(pack_id = %pack_id, "load already in flight");
            return Ok(LoadOutcome::InFlight);
        };
        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        info!(pack_id = %pack_id, "loading pack");

        let manifest = tokio::select! {
            _ = token.cancelled() => return Ok(LoadOutcome::Cancelled),
            manifest = self.resolve_manifest(pack_id, &keys) => manifest,
        };

        let (assets, report) = if manifest.placeholder {
            let assets: Vec<StickerAsset> = manifest
                .stickers
                .iter()
                .map(|sticker| asset_for(pack_id, &manifest, sticker, None, StickerFormat::Webp))
                .collect();
            let report = LoadReport {
                pack_id: pack_id.to_string(),
                title: manifest.title.clone(),
                stickers_total: manifest.stickers.len(),
                stickers_cached: 0,
                stickers_fetched: 0,
                stickers_failed: 0,
                placeholder: true,
            };
            (assets, report)
        } else {
            let results = tokio::select! {
                _ = token.cancelled() => return Ok(LoadOutcome::Cancelled),
                results = self.resolve_stickers(pack_id, &keys, &manifest, &token) => results,
            };
            collect_results(pack_id, &manifest, results)
        };

        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        self.registry
            .publish(reference, CachedPack::new(manifest, assets));
        info!(
            pack_id = %pack_id,
            total = report.stickers_total,
            cached = report.stickers_cached,
            fetched = report.stickers_fetched,
            failed = report.stickers_failed,
            placeholder = report.placeholder,
            "pack loaded"
        );
        Ok(LoadOutcome::Loaded(report))
    }

    /// Fetch and decode a pack's manifest without touching the cache or the
    /// registry. A real manifest already on disk is returned as is.
    ///
    /// Returns `Ok(None)` when the manifest cannot be obtained; only a bad
    /// pack key is an error.
    pub async fn preview(&self, reference: &PackReference) -> StkrResult<Option<StickerManifest>> {
        let keys = derive_pack_keys(&reference.pack_key)?;
        let pack_id = reference.pack_id.as_str();

        if let Some(cached) = self.cache.load_manifest(pack_id).await {
            if cached.exists() {
                return Ok(Some(cached));
            }
        }

        match self.fetch_manifest(pack_id, &keys).await {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                debug!(pack_id = %pack_id, error = %e, "preview unavailable");
                Ok(None)
            }
        }
    }

    async fn resolve_manifest(&self, pack_id: &str, keys: &PackKeys) -> StickerManifest {
        let cached = self.cache.load_manifest(pack_id).await;
        if let Some(manifest) = &cached {
            if manifest.exists() {
                debug!(pack_id = %pack_id, "manifest from disk cache");
                return manifest.clone();
            }
        }

        match self.fetch_manifest(pack_id, keys).await {
            Ok(manifest) => {
                if let Err(e) = self.cache.save_manifest(pack_id, &manifest).await {
                    warn!(pack_id = %pack_id, error = %e, "could not cache manifest");
                }
                manifest
            }
            Err(e) => {
                if e.is_recoverable_fetch() {
                    warn!(pack_id = %pack_id, error = %e, "manifest unavailable, using placeholder");
                } else {
                    error!(pack_id = %pack_id, error = %e, "manifest failed, using placeholder");
                }
                match cached {
                    Some(placeholder) => placeholder,
                    None => {
                        let placeholder = StickerManifest::placeholder(pack_id);
                        if let Err(e) = self.cache.save_manifest(pack_id, &placeholder).await {
                            warn!(pack_id = %pack_id, error = %e, "could not cache placeholder");
                        }
                        placeholder
                    }
                }
            }
        }
    }

    async fn fetch_manifest(&self, pack_id: &str, keys: &PackKeys) -> StkrResult<StickerManifest> {
        let blob = self
            .with_retries(|| self.source.fetch_manifest(pack_id))
            .await?;
        let plaintext = decrypt_blob(keys, &blob)?;
        decode_manifest(&plaintext)
    }

    async fn resolve_stickers(
        &self,
        pack_id: &str,
        keys: &PackKeys,
        manifest: &StickerManifest,
        token: &CancellationToken,
    ) -> Vec<StickerResult> {
        let pending: Vec<_> = manifest
            .stickers
            .iter()
            .map(|sticker| self.resolve_sticker(pack_id, keys, manifest, sticker, token))
            .collect();
        stream::iter(pending)
            .buffered(self.options.sticker_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }

    async fn resolve_sticker(
        &self,
        pack_id: &str,
        keys: &PackKeys,
        manifest: &StickerManifest,
        sticker: &StickerRef,
        token: &CancellationToken,
    ) -> StickerResult {
        if token.is_cancelled() {
            return StickerResult::Failed;
        }

        if let Some(bytes) = self.cache.read_sticker(pack_id, sticker.id).await {
            let path = self.cache.sticker_path(pack_id, sticker.id);
            let format = StickerFormat::sniff(&bytes);
            return StickerResult::Cached(asset_for(pack_id, manifest, sticker, Some(path), format));
        }

        match self.fetch_sticker(pack_id, keys, sticker.id).await {
            Ok((path, format)) => {
                StickerResult::Fetched(asset_for(pack_id, manifest, sticker, Some(path), format))
            }
            Err(e) if e.is_recoverable_fetch() => {
                warn!(
                    pack_id = %pack_id,
                    sticker_id = sticker.id,
                    error = %e,
                    "skipping sticker"
                );
                StickerResult::Failed
            }
            Err(e) => {
                error!(
                    pack_id = %pack_id,
                    sticker_id = sticker.id,
                    error = %e,
                    "sticker rejected"
                );
                StickerResult::Failed
            }
        }
    }

    async fn fetch_sticker(
        &self,
        pack_id: &str,
        keys: &PackKeys,
        sticker_id: u32,
    ) -> StkrResult<(std::path::PathBuf, StickerFormat)> {
        let blob = self
            .with_retries(|| self.source.fetch_sticker(pack_id, sticker_id))
            .await?;
        let image = decrypt_blob(keys, &blob)?;
        let format = StickerFormat::sniff(&image);
        let path = self.cache.save_sticker(pack_id, sticker_id, &image).await?;
        Ok((path, format))
    }

    async fn with_retries<T, F, Fut>(&self, mut op: F) -> StkrResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StkrResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = self.options.retry_backoff * attempt;
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

fn asset_for(
    pack_id: &str,
    manifest: &StickerManifest,
    sticker: &StickerRef,
    image_path: Option<std::path::PathBuf>,
    format: StickerFormat,
) -> StickerAsset {
    StickerAsset {
        pack_id: pack_id.to_string(),
        pack_title: manifest.title.clone(),
        pack_author: manifest.author.clone(),
        sticker_id: sticker.id,
        emoji: sticker.emoji.clone(),
        image_path,
        format,
    }
}

fn collect_results(
    pack_id: &str,
    manifest: &StickerManifest,
    results: Vec<StickerResult>,
) -> (Vec<StickerAsset>, LoadReport) {
    let mut report = LoadReport {
        pack_id: pack_id.to_string(),
        title: manifest.title.clone(),
        stickers_total: manifest.stickers.len(),
        stickers_cached: 0,
        stickers_fetched: 0,
        stickers_failed: 0,
        placeholder: false,
    };
    let mut assets = Vec::with_capacity(results.len());
    for result in results {
        match result {
            StickerResult::Cached(asset) => {
                report.stickers_cached += 1;
                assets.push(asset);
            }
            StickerResult::Fetched(asset) => {
                report.stickers_fetched += 1;
                assets.push(asset);
            }
            StickerResult::Failed => report.stickers_failed += 1,
        }
    }
    (assets, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::encode_manifest;
    use stkr_crypto::encrypt_blob;
    use stkr_fetch::MemorySource;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn setup(source: Arc<MemorySource>) -> (tempfile::TempDir, PackLoader, Arc<Registry>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new());
        let loader = PackLoader::new(
            source,
            Arc::new(PackCache::new(dir.path().to_path_buf())),
            registry.clone(),
            LoaderOptions {
                max_retries: 2,
                retry_backoff: Duration::from_millis(1),
                sticker_concurrency: 2,
            },
        );
        (dir, loader, registry)
    }

    fn seal(plaintext: &[u8]) -> Vec<u8> {
        let keys = derive_pack_keys(KEY).unwrap();
        encrypt_blob(&keys, &[7u8; 16], plaintext).unwrap()
    }

    fn one_sticker_manifest() -> StickerManifest {
        let sticker = StickerRef {
            id: 0,
            emoji: "🐸".into(),
        };
        StickerManifest {
            title: "Frogs".into(),
            author: "K".into(),
            cover: Some(sticker.clone()),
            stickers: vec![sticker],
            placeholder: false,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        struct Flaky {
            inner: MemorySource,
            failures_left: Mutex<u32>,
        }

        #[async_trait::async_trait]
        impl PackSource for Flaky {
            async fn fetch_manifest(&self, pack_id: &str) -> StkrResult<Vec<u8>> {
                {
                    let mut left = self.failures_left.lock().unwrap();
                    if *left > 0 {
                        *left -= 1;
                        return Err(stkr_core::NetworkError::Status {
                            url: "memory:///flaky".into(),
                            status: 503,
                        }
                        .into());
                    }
                }
                self.inner.fetch_manifest(pack_id).await
            }

            async fn fetch_sticker(&self, pack_id: &str, sticker_id: u32) -> StkrResult<Vec<u8>> {
                self.inner.fetch_sticker(pack_id, sticker_id).await
            }
        }

        let inner = MemorySource::new();
        inner.insert_manifest("aa", seal(&encode_manifest(&one_sticker_manifest()).unwrap()));
        inner.insert_sticker("aa", 0, seal(b"RIFF\0\0\0\0WEBPVP8 "));
        let source = Arc::new(Flaky {
            inner,
            failures_left: Mutex::new(2),
        });

        let dir = tempfile::tempdir().unwrap();
        let loader = PackLoader::new(
            source,
            Arc::new(PackCache::new(dir.path().to_path_buf())),
            Arc::new(Registry::new()),
            LoaderOptions {
                max_retries: 2,
                retry_backoff: Duration::from_millis(1),
                sticker_concurrency: 1,
            },
        );

        let reference = PackReference::new("aa", KEY).unwrap();
        match loader.load_pack(&reference).await.unwrap() {
            LoadOutcome::Loaded(report) => {
                assert!(!report.placeholder);
                assert_eq!(report.stickers_fetched, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_load_holds_the_claim_until_dropped() {
        let source = Arc::new(MemorySource::new().with_latency(Duration::from_millis(20)));
        let (_dir, loader, _registry) = setup(source.clone());
        let reference = PackReference::new("aa", KEY).unwrap();

        let mut first = tokio_test::task::spawn(loader.load_pack(&reference));
        tokio_test::assert_pending!(first.poll());
        assert!(loader.is_loading("aa"));
        assert_eq!(loader.in_flight(), vec!["aa".to_string()]);

        let second = loader.load_pack(&reference).await.unwrap();
        assert_eq!(second, LoadOutcome::InFlight);

        drop(first);
        assert!(!loader.is_loading("aa"));
        assert!(!loader.cancel("aa"));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let source = Arc::new(MemorySource::new());
        let (_dir, loader, _registry) = setup(source.clone());

        let reference = PackReference::new("aa", KEY).unwrap();
        let outcome = loader.load_pack(&reference).await.unwrap();

        assert!(matches!(outcome, LoadOutcome::Loaded(ref r) if r.placeholder));
        assert_eq!(source.manifest_fetches(), 1);
    }

    #[tokio::test]
    async fn offline_retries_then_falls_back() {
        let source = Arc::new(MemorySource::new());
        source.set_online(false);
        let (_dir, loader, _registry) = setup(source.clone());

        let reference = PackReference::new("aa", KEY).unwrap();
        loader.load_pack(&reference).await.unwrap();

        // one attempt plus two retries
        assert_eq!(source.manifest_fetches(), 3);
        assert_eq!(source.sticker_fetches(), 0);
    }

    #[tokio::test]
    async fn bad_key_fails_before_claiming() {
        let source = Arc::new(MemorySource::new());
        let (_dir, loader, _registry) = setup(source.clone());

        let reference = PackReference::new("aa", "abc").unwrap();
        let err = loader.load_pack(&reference).await.unwrap_err();

        assert!(matches!(err, stkr_core::StkrError::KeyFormat(_)));
        assert!(!loader.is_loading("aa"));
        assert_eq!(source.manifest_fetches(), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_loads() {
        let source = Arc::new(MemorySource::new());
        let (_dir, loader, registry) = setup(source.clone());

        loader.shutdown();
        let reference = PackReference::new("aa", KEY).unwrap();
        let outcome = loader.load_pack(&reference).await.unwrap();

        assert_eq!(outcome, LoadOutcome::Cancelled);
        assert_eq!(source.manifest_fetches(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn options_from_config() {
        let mut config = StkrConfig::default();
        config.cdn.max_retries = 5;
        config.cdn.retry_backoff_ms = 10;
        config.cache.sticker_concurrency = 0;

        let options = LoaderOptions::from_config(&config);
        assert_eq!(options.max_retries, 5);
        assert_eq!(options.retry_backoff, Duration::from_millis(10));
        assert_eq!(options.sticker_concurrency, 1);
    }
}
