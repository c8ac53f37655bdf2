use monitor::config::StreamConfig;
use monitor::dispatch::AlertDispatcher;
use monitor::profile::{keys, MemoryProfileStore};
use monitor::stream::{self, ConnectionState};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn simulator_url() -> String {
    std::env::var("SIMULATOR_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Needs a running simulator: `cargo run -p simulator`.
#[tokio::test]
#[ignore]
async fn test_stream_and_alert_against_simulator() {
    let url = simulator_url();
    println!("\n🔥 End-to-end run against {}", url);

    let mut handle = stream::start(StreamConfig::new(url.as_str()));
    let mut readings = handle.readings();

    let start = Instant::now();
    let first = tokio::time::timeout(Duration::from_secs(10), readings.first())
        .await
        .expect("no reading within 10s")
        .expect("stream ended");
    println!("  First reading after {:?}: {:?}", start.elapsed(), first.reading);
    assert_eq!(handle.state(), ConnectionState::Connected);

    let mut received = 0;
    let window = Instant::now();
    while window.elapsed() < Duration::from_secs(3) {
        if tokio::time::timeout(Duration::from_secs(3), readings.changed())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            received += 1;
        }
    }
    println!("  Readings in 3s: {}", received);
    assert!(received > 0);

    let store = MemoryProfileStore::with_entries([
        (keys::NAME, "E2E Tester"),
        (keys::LOCATION, "[-122.4,37.7]"),
    ]);
    let dispatcher = AlertDispatcher::new(&url, Arc::new(store), handle.readings());
    let receipt = dispatcher.dispatch_alert().await.expect("alert rejected");
    println!("  Alert receipt: {:?}", receipt);
    assert_eq!(receipt.status, 200);

    handle.stop().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    println!("✅ Done");
}
