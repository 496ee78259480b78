//! Streaming from a real S3-compatible backend.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use s3proxy_client::{S3ClientConfig, S3ObjectStore};
    use s3proxy_core::ProxyConfig;

    use crate::{TestServerOptions, start_server};

    #[tokio::test]
    #[ignore = "requires running S3 backend"]
    async fn test_should_proxy_object_from_backend() {
        let config = ProxyConfig::load().expect("configuration");
        let key = std::env::var("S3_TEST_KEY").unwrap_or_else(|_| "test.txt".into());
        let store = S3ObjectStore::new(S3ClientConfig::from_proxy_config(&config))
            .expect("backend client");
        let server = start_server(Arc::new(store), TestServerOptions::default()).await;
        let client = reqwest::Client::new();

        let full = client
            .get(server.url(&format!("/{key}")))
            .send()
            .await
            .expect("request");
        assert_eq!(full.status(), StatusCode::OK);
        let full = full.bytes().await.expect("body");

        if full.len() > 1 {
            let resp = client
                .get(server.url(&format!("/{key}")))
                .header("range", "bytes=1-")
                .send()
                .await
                .expect("request");
            assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(resp.bytes().await.expect("body"), full.slice(1..));
        }

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }
}
