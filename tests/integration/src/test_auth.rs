//! Basic authentication in front of the gateway.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use s3proxy_auth::BasicAuthAccounts;

    use crate::{TestServerOptions, memory_store, start_server};

    #[tokio::test]
    async fn test_should_require_valid_credentials() {
        let options = TestServerOptions {
            accounts: Some(BasicAuthAccounts::new([(
                "alice".to_owned(),
                "wonderland".to_owned(),
            )])),
            ..TestServerOptions::default()
        };
        let server = start_server(Arc::new(memory_store()), options).await;
        let client = reqwest::Client::new();

        let resp = client
            .get(server.url("/docs/readme.txt"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()["www-authenticate"],
            r#"Basic realm="Authorization Required""#
        );

        let resp = client
            .get(server.url("/docs/readme.txt"))
            .basic_auth("alice", Some("nope"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = client
            .get(server.url("/docs/readme.txt"))
            .basic_auth("alice", Some("wonderland"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.expect("body"), "hello world");

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }
}
