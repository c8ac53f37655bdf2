use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use monitor::dispatch::{AlertDispatcher, CONFIRM_ALERT_PATH, DEVICE_ID};
use monitor::errors::DispatchError;
use monitor::model::SensorReading;
use monitor::profile::{keys, MemoryProfileStore, ProfileStore};
use monitor::reading_cell::ReadingCell;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone)]
struct Stub {
    requests: Arc<Mutex<Vec<Value>>>,
    status: StatusCode,
    body: Value,
}

impl Stub {
    fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> Value {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

async fn confirm_alert(State(stub): State<Stub>, Json(alert): Json<Value>) -> (StatusCode, Json<Value>) {
    stub.requests.lock().unwrap().push(alert);
    (stub.status, Json(stub.body.clone()))
}

/// Serves the confirm-alert endpoint, answering every request with `status` and `body`.
async fn serve(status: StatusCode, body: Value) -> (Stub, String) {
    let stub = Stub {
        requests: Arc::new(Mutex::new(Vec::new())),
        status,
        body,
    };
    let app = Router::new()
        .route(CONFIRM_ALERT_PATH, post(confirm_alert))
        .with_state(stub.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (stub, url)
}

fn reading() -> SensorReading {
    SensorReading {
        temperature: 61.2,
        humidity: 18.0,
        smoke_level: 720.0,
        flame_detected: true,
    }
}

fn dispatcher(url: &str, store: MemoryProfileStore, cell: &ReadingCell) -> AlertDispatcher {
    AlertDispatcher::new(url, Arc::new(store), cell.subscribe())
}

#[tokio::test]
async fn test_success_sends_full_alert() {
    let (stub, url) = serve(StatusCode::OK, json!({"message": "Alert received"})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let store = MemoryProfileStore::with_entries([
        (keys::NAME, "Alex"),
        (keys::APARTMENT, "4B"),
        (keys::ADDRESS, "12 Harbor St"),
        (keys::DISTRICT, "Riverside"),
        (keys::LOCATION, "[-122.4,37.7]"),
    ]);
    let receipt = dispatcher(&url, store, &cell).dispatch_alert().await.unwrap();

    assert_eq!(receipt.status, 200);
    assert_eq!(receipt.message.as_deref(), Some("Alert received"));
    assert_eq!(stub.hits(), 1);
    assert_eq!(
        stub.last_request(),
        json!({
            "temperature": 61.2,
            "humidity": 18.0,
            "smokeLevel": 720.0,
            "flameDetected": true,
            "location": [-122.4, 37.7],
            "address": {
                "apartment": "4B",
                "street": "12 Harbor St",
                "district": "Riverside"
            },
            "name": "Alex",
            "device_id": DEVICE_ID
        })
    );
}

#[tokio::test]
async fn test_empty_profile_uses_placeholders() {
    let (stub, url) = serve(StatusCode::OK, json!({})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let receipt = dispatcher(&url, MemoryProfileStore::new(), &cell)
        .dispatch_alert()
        .await
        .unwrap();
    assert_eq!(receipt.message, None);

    let sent = stub.last_request();
    assert_eq!(sent["location"], Value::Null);
    assert_eq!(sent["name"], "Unknown User");
    assert_eq!(
        sent["address"],
        json!({"apartment": "N/A", "street": "N/A", "district": "N/A"})
    );
}

#[tokio::test]
async fn test_malformed_location_is_sent_as_null() {
    let (stub, url) = serve(StatusCode::OK, json!({})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let store = MemoryProfileStore::with_entries([(keys::LOCATION, "somewhere nice")]);
    dispatcher(&url, store, &cell).dispatch_alert().await.unwrap();

    assert_eq!(stub.last_request()["location"], Value::Null);
}

#[tokio::test]
async fn test_legacy_location_is_sent_in_current_order() {
    let (stub, url) = serve(StatusCode::OK, json!({})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let store = MemoryProfileStore::with_entries([(keys::LOCATION, "37.7, -122.4")]);
    dispatcher(&url, store, &cell).dispatch_alert().await.unwrap();

    assert_eq!(stub.last_request()["location"], json!([-122.4, 37.7]));
}

#[tokio::test]
async fn test_no_data_sends_nothing() {
    let (stub, url) = serve(StatusCode::OK, json!({})).await;
    let cell = ReadingCell::new();

    let err = dispatcher(&url, MemoryProfileStore::new(), &cell)
        .dispatch_alert()
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::NoData));
    assert_eq!(err.title(), "No Data");
    assert_eq!(stub.hits(), 0);
}

#[tokio::test]
async fn test_server_rejection_carries_message() {
    let (stub, url) = serve(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"message": "bad request"}),
    )
    .await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let err = dispatcher(&url, MemoryProfileStore::new(), &cell)
        .dispatch_alert()
        .await
        .unwrap_err();

    match &err {
        DispatchError::ServerRejected { status, message } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "bad request");
        }
        other => panic!("expected ServerRejected, got {:?}", other),
    }
    assert_eq!(err.title(), "Error");
    assert_eq!(err.to_string(), "bad request");
    assert_eq!(stub.hits(), 1);
}

#[tokio::test]
async fn test_server_rejection_without_message() {
    let (_stub, url) = serve(StatusCode::BAD_GATEWAY, json!({"error": 1})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let err = dispatcher(&url, MemoryProfileStore::new(), &cell)
        .dispatch_alert()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Could not send the alert.");
}

#[tokio::test]
async fn test_server_rejection_with_empty_message() {
    let (stub, url) = serve(StatusCode::INTERNAL_SERVER_ERROR, json!({"message": ""})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let err = dispatcher(&url, MemoryProfileStore::new(), &cell)
        .dispatch_alert()
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::ServerRejected { status: 500, .. }));
    assert_eq!(err.to_string(), "Could not send the alert.");
    assert_eq!(stub.hits(), 1);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let cell = ReadingCell::new();
    cell.publish(reading());
    let dispatcher = dispatcher(&url, MemoryProfileStore::new(), &cell);

    let err = dispatcher.dispatch_alert().await.unwrap_err();
    assert!(matches!(err, DispatchError::Network(_)));
    assert_eq!(err.title(), "Network Error");
    assert_eq!(
        err.to_string(),
        "Failed to send the alert. Please check your connection."
    );
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_each_call_sends_exactly_once() {
    let (stub, url) = serve(StatusCode::OK, json!({})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());
    let dispatcher = dispatcher(&url, MemoryProfileStore::new(), &cell);

    dispatcher.dispatch_alert().await.unwrap();
    dispatcher.dispatch_alert().await.unwrap();

    assert_eq!(stub.hits(), 2);
}

#[tokio::test]
async fn test_alert_uses_latest_reading_and_profile() {
    let (stub, url) = serve(StatusCode::OK, json!({})).await;
    let cell = ReadingCell::new();
    cell.publish(reading());

    let store = Arc::new(MemoryProfileStore::new());
    let dispatcher = AlertDispatcher::new(&url, store.clone(), cell.subscribe());

    dispatcher.dispatch_alert().await.unwrap();
    assert_eq!(stub.last_request()["name"], "Unknown User");

    store.set(keys::NAME, "Sam").await.unwrap();
    cell.publish(SensorReading {
        temperature: 25.0,
        ..reading()
    });
    dispatcher.dispatch_alert().await.unwrap();

    let sent = stub.last_request();
    assert_eq!(sent["name"], "Sam");
    assert_eq!(sent["temperature"], 25.0);
}
