//! reqwest-backed client for the sticker CDN

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use stkr_core::config::CdnConfig;
use stkr_core::{NetworkError, StkrError, StkrResult};
use tracing::debug;

use crate::PackSource;

/// HTTPS client for `{base_url}/stickers/...`.
#[derive(Debug, Clone)]
pub struct CdnClient {
    client: Client,
    base_url: String,
}

impl CdnClient {
    /// Build a client from the `[cdn]` config section.
    ///
    /// Plain-HTTP base URLs are allowed (local mirrors, tests) but logged.
    pub fn new(cfg: &CdnConfig) -> StkrResult<Self> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(StkrError::Config("cdn.base_url must not be empty".into()));
        }
        if base_url.starts_with("http://") {
            tracing::warn!(
                base_url = %base_url,
                "sticker CDN uses plaintext HTTP; blobs are still authenticated but requests are observable"
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| StkrError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn manifest_url(&self, pack_id: &str) -> String {
        format!("{}/stickers/{pack_id}/manifest.proto", self.base_url)
    }

    pub fn sticker_url(&self, pack_id: &str, sticker_id: u32) -> String {
        format!("{}/stickers/{pack_id}/full/{sticker_id}", self.base_url)
    }

    /// GET `url` and return the body. Non-success statuses and transport
    /// failures become `NetworkError`.
    pub(crate) async fn get_bytes(&self, url: &str) -> StkrResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(|e| transport_error(url, e))?;
        debug!(url = %url, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }

    /// Issue a bare request to the base URL; any HTTP response counts.
    pub(crate) async fn probe(&self) -> StkrResult<u16> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, e))?;
        Ok(response.status().as_u16())
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> StkrError {
    let cause = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    NetworkError::Transport {
        url: url.to_string(),
        cause,
    }
    .into()
}

#[async_trait]
impl PackSource for CdnClient {
    async fn fetch_manifest(&self, pack_id: &str) -> StkrResult<Vec<u8>> {
        self.get_bytes(&self.manifest_url(pack_id)).await
    }

    async fn fetch_sticker(&self, pack_id: &str, sticker_id: u32) -> StkrResult<Vec<u8>> {
        self.get_bytes(&self.sticker_url(pack_id, sticker_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(base_url: &str) -> CdnClient {
        CdnClient::new(&CdnConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client_for("https://cdn-ca.signal.org/");
        assert_eq!(
            client.manifest_url("7a1a"),
            "https://cdn-ca.signal.org/stickers/7a1a/manifest.proto"
        );
        assert_eq!(
            client.sticker_url("7a1a", 12),
            "https://cdn-ca.signal.org/stickers/7a1a/full/12"
        );
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = CdnClient::new(&CdnConfig {
            base_url: "  ".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(StkrError::Config(_))));
    }

    #[tokio::test]
    async fn test_fetch_manifest_bytes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/stickers/abcd/manifest.proto");
                then.status(200).body([1u8, 2, 3, 0xff]);
            })
            .await;

        let client = client_for(&server.base_url());
        let bytes = client.fetch_manifest("abcd").await.unwrap();

        assert_eq!(bytes, vec![1u8, 2, 3, 0xff]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_sticker_bytes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/stickers/abcd/full/7");
                then.status(200).body(b"sticker-blob");
            })
            .await;

        let client = client_for(&server.base_url());
        let bytes = client.fetch_sticker("abcd", 7).await.unwrap();

        assert_eq!(bytes, b"sticker-blob");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_network_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stickers/abcd/manifest.proto");
                then.status(404).body("not found");
            })
            .await;

        let client = client_for(&server.base_url());
        let err = client.fetch_manifest("abcd").await.unwrap_err();

        match err {
            StkrError::Network(NetworkError::Status { status, url }) => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/stickers/abcd/manifest.proto"));
            }
            other => panic!("expected status error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_retry_at_this_layer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/stickers/abcd/full/1");
                then.status(503);
            })
            .await;

        let client = client_for(&server.base_url());
        let err = client.fetch_sticker("abcd", 1).await.unwrap_err();

        assert!(err.is_transient());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        // Nothing listens on port 9 (discard) on loopback in test environments.
        let client = client_for("http://127.0.0.1:9");
        let err = client.fetch_manifest("abcd").await.unwrap_err();
        assert!(
            matches!(err, StkrError::Network(NetworkError::Transport { .. })),
            "{err}"
        );
    }
}
