//! stkr-fetch: download encrypted pack blobs from the sticker CDN
//!
//! This layer only moves bytes: no decryption, no caching, no retries.
//! Retry policy lives in the orchestrator (`stkr-sync`).

pub mod cdn;
pub mod health;
#[cfg(any(test, feature = "mock"))]
pub mod memory;

use async_trait::async_trait;
use stkr_core::StkrResult;

pub use cdn::CdnClient;
pub use health::{check_reachable, is_reachable};
#[cfg(any(test, feature = "mock"))]
pub use memory::MemorySource;

/// Where encrypted pack blobs come from.
///
/// Implementations return the raw encrypted bytes, or
/// `StkrError::Network` when the blob could not be retrieved.
#[async_trait]
pub trait PackSource: Send + Sync {
    /// `GET /stickers/{pack_id}/manifest.proto`
    async fn fetch_manifest(&self, pack_id: &str) -> StkrResult<Vec<u8>>;

    /// `GET /stickers/{pack_id}/full/{sticker_id}`
    async fn fetch_sticker(&self, pack_id: &str, sticker_id: u32) -> StkrResult<Vec<u8>>;
}
