//! Offline behavior through the facade crate

use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use taskwire::client::{ConnectionState, FixedDelay};
use taskwire::{Envelope, Error, ServiceBuilder};

#[derive(Serialize)]
struct FilterArgs {
    column: String,
    min: f64,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taskwire_client=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_service_works_offline_until_closed() {
    init_logging();

    let service = ServiceBuilder::new("ws://127.0.0.1:9/api/ws")
        .with_reconnect(FixedDelay::new(Duration::from_secs(60)))
        .connect()
        .await
        .unwrap();

    service
        .send(&Envelope::new("selection.changed", serde_json::json!({"rows": [1]})).unwrap())
        .await
        .unwrap();

    let filter = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .run::<_, serde_json::Value>(
                    "filter",
                    "widget-1",
                    FilterArgs {
                        column: "price".to_string(),
                        min: 10.0,
                    },
                )
                .await
        })
    };
    let mut reply = service.stream("hello").await.unwrap();

    while service.queued_len().await < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(service.pending_count(), 2);

    service.close().await;

    assert!(matches!(filter.await.unwrap(), Err(Error::ConnectionClosed)));
    assert!(matches!(reply.next().await, Some(Err(Error::ConnectionClosed))));
    assert!(reply.next().await.is_none());
    assert_eq!(service.connection_state(), ConnectionState::Shutdown);
}
