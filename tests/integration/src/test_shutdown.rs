//! Graceful shutdown with in-flight downloads.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use reqwest::StatusCode;
    use s3proxy_http::{ServerError, ServerState};

    use crate::{SlowStore, TestServerOptions, memory_store, sample_object, start_server};

    #[tokio::test]
    async fn test_should_stop_promptly_when_idle() {
        let server = start_server(Arc::new(memory_store()), TestServerOptions::default()).await;
        let addr = server.handle.local_addr();
        let mut states = server.handle.subscribe();

        let started = Instant::now();
        server.handle.shutdown();
        server.handle.wait().await.expect("clean shutdown");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(*states.borrow_and_update(), ServerState::Stopped);

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_should_finish_in_flight_download_before_stopping() {
        let store = SlowStore::new(memory_store(), Duration::from_millis(20));
        let options = TestServerOptions {
            read_buffer_size: 100,
            ..TestServerOptions::default()
        };
        let server = start_server(Arc::new(store), options).await;

        let resp = reqwest::get(server.url("/videos/clip.bin"))
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);

        let trigger = server.handle.shutdown_trigger();
        trigger.trigger();
        let stopped = tokio::spawn(server.handle.wait());

        let body = resp.bytes().await.expect("body completes during drain");
        assert_eq!(body.as_ref(), sample_object(1000).as_slice());
        stopped
            .await
            .expect("join")
            .expect("drained within deadline");
    }

    #[tokio::test]
    async fn test_should_force_close_after_drain_deadline() {
        let store = SlowStore::new(memory_store(), Duration::from_millis(500));
        let options = TestServerOptions {
            read_buffer_size: 10,
            drain_timeout: Duration::from_millis(200),
            ..TestServerOptions::default()
        };
        let server = start_server(Arc::new(store), options).await;

        let resp = reqwest::get(server.url("/videos/clip.bin"))
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);

        server.handle.shutdown();
        let err = server.handle.wait().await.expect_err("deadline passes");
        assert!(matches!(err, ServerError::ShutdownTimeout { remaining: 1, .. }), "{err}");

        assert!(resp.bytes().await.is_err());
    }
}
