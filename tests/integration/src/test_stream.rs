//! Full and ranged downloads through a running gateway.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;

    use crate::{TestServerOptions, memory_store, sample_object, start_server};

    #[tokio::test]
    async fn test_should_stream_full_object() {
        let server = start_server(Arc::new(memory_store()), TestServerOptions::default()).await;

        let resp = reqwest::get(server.url("/videos/clip.bin"))
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-length"], "1000");
        assert_eq!(resp.headers()["accept-ranges"], "bytes");
        assert_eq!(
            resp.headers()["content-disposition"],
            "attachment; filename=clip.bin"
        );
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(
            resp.bytes().await.expect("body").as_ref(),
            sample_object(1000).as_slice()
        );

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_should_stream_requested_range_in_small_chunks() {
        let options = TestServerOptions {
            read_buffer_size: 7,
            ..TestServerOptions::default()
        };
        let server = start_server(Arc::new(memory_store()), options).await;
        let client = reqwest::Client::new();

        let resp = client
            .get(server.url("/videos/clip.bin"))
            .header("range", "bytes=100-199")
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers()["content-range"], "bytes 100-199/1000");
        assert_eq!(resp.headers()["content-length"], "100");
        assert_eq!(
            resp.bytes().await.expect("body").as_ref(),
            &sample_object(1000)[100..200]
        );

        let resp = client
            .get(server.url("/videos/clip.bin"))
            .header("range", "bytes=990-")
            .send()
            .await
            .expect("request");
        assert_eq!(resp.headers()["content-range"], "bytes 990-999/1000");
        assert_eq!(resp.bytes().await.expect("body").len(), 10);

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_should_reject_invalid_ranges() {
        let server = start_server(Arc::new(memory_store()), TestServerOptions::default()).await;
        let client = reqwest::Client::new();

        for range in ["bytes=500-100", "bytes=0-5000", "items=0-1", "bytes=0-1,5-6"] {
            let resp = client
                .get(server.url("/videos/clip.bin"))
                .header("range", range)
                .send()
                .await
                .expect("request");
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{range}");
            let text = resp.text().await.expect("body");
            assert!(
                text.starts_with("Error occurred while retrieving range information:"),
                "{text}"
            );
        }

        let resp = client
            .get(server.url("/empty.bin"))
            .header("range", "bytes=0-0")
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_should_serve_empty_object() {
        let server = start_server(Arc::new(memory_store()), TestServerOptions::default()).await;

        let resp = reqwest::get(server.url("/empty.bin")).await.expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-length"], "0");
        assert!(resp.bytes().await.expect("body").is_empty());

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_should_report_missing_object_as_server_error() {
        let server = start_server(Arc::new(memory_store()), TestServerOptions::default()).await;

        let resp = reqwest::get(server.url("/missing.bin")).await.expect("request");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = resp.text().await.expect("body");
        assert!(text.contains("/missing.bin on bucket media"), "{text}");

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_should_answer_head_and_reject_writes() {
        let server = start_server(Arc::new(memory_store()), TestServerOptions::default()).await;
        let client = reqwest::Client::new();

        let resp = client
            .head(server.url("/docs/readme.txt"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-length"], "11");
        assert_eq!(resp.headers()["content-type"], "text/plain");

        let resp = client
            .put(server.url("/docs/readme.txt"))
            .body("overwrite")
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
    }
}
