//! CDN reachability check

use stkr_core::StkrResult;

use crate::CdnClient;

/// Verify the CDN host answers HTTP at all. Any status code counts as
/// reachable; only transport failures are errors.
pub async fn check_reachable(client: &CdnClient) -> StkrResult<u16> {
    client.probe().await
}

/// Returns true if the CDN is reachable, false otherwise (non-panicking)
pub async fn is_reachable(client: &CdnClient) -> bool {
    check_reachable(client).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use stkr_core::config::CdnConfig;

    #[tokio::test]
    async fn any_status_is_reachable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(403);
            })
            .await;

        let client = CdnClient::new(&CdnConfig {
            base_url: server.base_url(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(check_reachable(&client).await.unwrap(), 403);
        assert!(is_reachable(&client).await);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let client = CdnClient::new(&CdnConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        assert!(!is_reachable(&client).await);
    }
}
