//! In-memory `PackSource` for tests.
//!
//! Holds pre-encrypted blobs keyed by pack id (and sticker id), can be
//! switched offline, can fail individual stickers, and counts every request.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use stkr_core::{NetworkError, StkrResult};

use crate::PackSource;

#[derive(Default)]
struct Blobs {
    manifests: HashMap<String, Vec<u8>>,
    stickers: HashMap<(String, u32), Vec<u8>>,
    failing: HashSet<(String, u32)>,
}

pub struct MemorySource {
    blobs: Mutex<Blobs>,
    online: AtomicBool,
    latency: Duration,
    manifest_fetches: AtomicUsize,
    sticker_fetches: AtomicUsize,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(Blobs::default()),
            online: AtomicBool::new(true),
            latency: Duration::ZERO,
            manifest_fetches: AtomicUsize::new(0),
            sticker_fetches: AtomicUsize::new(0),
        }
    }

    /// Delay every request by `latency` (used to hold loads in flight).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert_manifest(&self, pack_id: &str, blob: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .manifests
            .insert(pack_id.to_string(), blob);
    }

    pub fn insert_sticker(&self, pack_id: &str, sticker_id: u32, blob: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .stickers
            .insert((pack_id.to_string(), sticker_id), blob);
    }

    /// Make one sticker answer with HTTP 500 until cleared.
    pub fn fail_sticker(&self, pack_id: &str, sticker_id: u32) {
        self.blobs
            .lock()
            .unwrap()
            .failing
            .insert((pack_id.to_string(), sticker_id));
    }

    pub fn clear_failures(&self) {
        self.blobs.lock().unwrap().failing.clear();
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifest_fetches.load(Ordering::SeqCst)
    }

    pub fn sticker_fetches(&self) -> usize {
        self.sticker_fetches.load(Ordering::SeqCst)
    }

    async fn simulate(&self, url: String) -> StkrResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport {
                url,
                cause: "network unreachable".into(),
            }
            .into());
        }
        Ok(())
    }
}

fn not_found(url: String) -> stkr_core::StkrError {
    NetworkError::Status { url, status: 404 }.into()
}

#[async_trait]
impl PackSource for MemorySource {
    async fn fetch_manifest(&self, pack_id: &str) -> StkrResult<Vec<u8>> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        let url = format!("memory:///stickers/{pack_id}/manifest.proto");
        self.simulate(url.clone()).await?;

        let blobs = self.blobs.lock().unwrap();
        blobs
            .manifests
            .get(pack_id)
            .cloned()
            .ok_or_else(|| not_found(url))
    }

    async fn fetch_sticker(&self, pack_id: &str, sticker_id: u32) -> StkrResult<Vec<u8>> {
        self.sticker_fetches.fetch_add(1, Ordering::SeqCst);
        let url = format!("memory:///stickers/{pack_id}/full/{sticker_id}");
        self.simulate(url.clone()).await?;

        let key = (pack_id.to_string(), sticker_id);
        let blobs = self.blobs.lock().unwrap();
        if blobs.failing.contains(&key) {
            return Err(NetworkError::Status { url, status: 500 }.into());
        }
        blobs.stickers.get(&key).cloned().ok_or_else(|| not_found(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stkr_core::StkrError;

    #[tokio::test]
    async fn serves_inserted_blobs_and_counts() {
        let source = MemorySource::new();
        source.insert_manifest("aa", vec![1, 2]);
        source.insert_sticker("aa", 3, vec![9]);

        assert_eq!(source.fetch_manifest("aa").await.unwrap(), vec![1, 2]);
        assert_eq!(source.fetch_sticker("aa", 3).await.unwrap(), vec![9]);
        assert_eq!(source.manifest_fetches(), 1);
        assert_eq!(source.sticker_fetches(), 1);
    }

    #[tokio::test]
    async fn offline_is_transport_error() {
        let source = MemorySource::new();
        source.insert_manifest("aa", vec![1]);
        source.set_online(false);

        let err = source.fetch_manifest("aa").await.unwrap_err();
        assert!(matches!(
            err,
            StkrError::Network(NetworkError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn missing_and_failing() {
        let source = MemorySource::new();
        source.insert_sticker("aa", 1, vec![1]);
        source.fail_sticker("aa", 1);

        let err = source.fetch_sticker("aa", 1).await.unwrap_err();
        assert!(matches!(
            err,
            StkrError::Network(NetworkError::Status { status: 500, .. })
        ));

        let err = source.fetch_manifest("bb").await.unwrap_err();
        assert!(matches!(
            err,
            StkrError::Network(NetworkError::Status { status: 404, .. })
        ));

        source.clear_failures();
        assert!(source.fetch_sticker("aa", 1).await.is_ok());
    }
}
