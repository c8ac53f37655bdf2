use futures::{SinkExt, StreamExt};
use monitor::config::{ReconnectPolicy, StreamConfig};
use monitor::stream::{self, ConnectionState, StreamHandle};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);
const OPEN: &str = r#"0{"sid":"test-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn config(url: &str, reconnect: ReconnectPolicy) -> StreamConfig {
    StreamConfig {
        reconnect,
        ..StreamConfig::new(url)
    }
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
    }
}

/// Accepts one client and completes the Socket.IO handshake with `open`.
async fn accept_with(listener: &TcpListener, open: &str) -> ServerSocket {
    let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(tcp).await.unwrap();

    ws.send(Message::Text(open.to_string())).await.unwrap();
    let connect = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(connect, Message::Text("40".to_string()));
    ws.send(Message::Text(r#"40{"sid":"ns-sid"}"#.to_string()))
        .await
        .unwrap();
    ws
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    accept_with(listener, OPEN).await
}

async fn emit(ws: &mut ServerSocket, temperature: f64) {
    let frame = format!(
        r#"42["sensor-data",{{"temperature":{},"humidity":35,"smokeLevel":120,"flameDetected":false}}]"#,
        temperature
    );
    ws.send(Message::Text(frame)).await.unwrap();
}

/// Sends a ping and waits for the pong, so every earlier frame has been handled.
async fn sync(ws: &mut ServerSocket) {
    ws.send(Message::Text("2".to_string())).await.unwrap();
    let pong = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(pong, Message::Text("3".to_string()));
}

async fn wait_for_state(handle: &StreamHandle, want: ConnectionState) {
    let mut states = handle.state_changes();
    timeout(WAIT, states.wait_for(|state| *state == want))
        .await
        .unwrap_or_else(|_| panic!("stream never reached {:?}", want))
        .unwrap();
}

async fn wait_for_temperature(handle: &StreamHandle, temperature: f64) {
    let mut readings = handle.readings();
    timeout(WAIT, async {
        loop {
            if readings.current().map(|r| r.temperature) == Some(temperature) {
                return;
            }
            readings.changed().await.expect("stream ended early");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("reading {} never arrived", temperature));
}

#[tokio::test]
async fn test_readings_applied_in_arrival_order() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, ReconnectPolicy::disabled()));

    let mut ws = accept(&listener).await;
    wait_for_state(&handle, ConnectionState::Connected).await;
    assert!(handle.current_reading().is_none());

    for temperature in [21.0, 22.0, 23.0, 24.0] {
        emit(&mut ws, temperature).await;
    }
    sync(&mut ws).await;

    let reading = handle.current_reading().unwrap();
    assert_eq!(reading.temperature, 24.0);
    assert_eq!(reading.smoke_level, 120.0);

    handle.stop().await;
}

#[tokio::test]
async fn test_invalid_message_leaves_reading_unchanged() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, ReconnectPolicy::disabled()));

    let mut ws = accept(&listener).await;
    emit(&mut ws, 30.0).await;
    wait_for_temperature(&handle, 30.0).await;

    let missing_flame = r#"42["sensor-data",{"temperature":99,"humidity":35,"smokeLevel":900}]"#;
    ws.send(Message::Text(missing_flame.to_string())).await.unwrap();
    ws.send(Message::Text("42not json".to_string())).await.unwrap();
    sync(&mut ws).await;

    assert_eq!(handle.current_reading().unwrap().temperature, 30.0);
    assert_eq!(handle.state(), ConnectionState::Connected);

    handle.stop().await;
}

#[tokio::test]
async fn test_reading_survives_disconnect() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, ReconnectPolicy::disabled()));

    let mut ws = accept(&listener).await;
    emit(&mut ws, 45.5).await;
    wait_for_temperature(&handle, 45.5).await;

    ws.close(None).await.unwrap();
    drop(ws);

    wait_for_state(&handle, ConnectionState::Disconnected).await;
    assert_eq!(handle.current_reading().unwrap().temperature, 45.5);

    handle.stop().await;
    assert!(!handle.is_running());
}

#[tokio::test]
async fn test_stop_twice_closes_connection() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, ReconnectPolicy::default()));

    let mut ws = accept(&listener).await;
    wait_for_state(&handle, ConnectionState::Connected).await;

    let server = tokio::spawn(async move {
        let mut texts = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                texts.push(text);
            }
        }
        texts
    });

    handle.stop().await;
    handle.stop().await;

    let texts = timeout(WAIT, server)
        .await
        .expect("server side stayed open")
        .unwrap();
    assert_eq!(texts, vec!["41".to_string()]);
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(!handle.is_running());

    // No reconnect attempt after stop.
    assert!(timeout(Duration::from_millis(200), listener.accept())
        .await
        .is_err());
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, fast_reconnect()));

    let mut ws = accept(&listener).await;
    emit(&mut ws, 19.0).await;
    wait_for_temperature(&handle, 19.0).await;
    drop(ws);

    let mut ws = accept(&listener).await;
    wait_for_state(&handle, ConnectionState::Connected).await;
    assert_eq!(handle.current_reading().unwrap().temperature, 19.0);

    emit(&mut ws, 20.5).await;
    wait_for_temperature(&handle, 20.5).await;

    handle.stop().await;
}

#[tokio::test]
async fn test_idle_server_times_out() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, ReconnectPolicy::disabled()));

    let short = r#"0{"sid":"idle","upgrades":[],"pingInterval":50,"pingTimeout":50}"#;
    let ws = accept_with(&listener, short).await;

    // Server goes silent; the client gives up after pingInterval + pingTimeout.
    wait_for_state(&handle, ConnectionState::Disconnected).await;
    timeout(WAIT, handle.stop()).await.unwrap();
    drop(ws);
}

#[tokio::test]
async fn test_connection_refused_without_reconnect() {
    let (listener, url) = listen().await;
    drop(listener);

    let mut handle = stream::start(config(&url, ReconnectPolicy::disabled()));
    timeout(WAIT, async {
        while handle.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(handle.current_reading().is_none());
    handle.stop().await;
}

#[tokio::test]
async fn test_connect_error_packet_ends_session() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(config(&url, ReconnectPolicy::disabled()));

    let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(tcp).await.unwrap();
    ws.send(Message::Text(OPEN.to_string())).await.unwrap();
    let _connect = ws.next().await;
    ws.send(Message::Text(r#"44{"message":"not authorized"}"#.to_string()))
        .await
        .unwrap();

    wait_for_state(&handle, ConnectionState::Disconnected).await;
    handle.stop().await;
}

#[tokio::test]
async fn test_stop_interrupts_reconnect_backoff() {
    let (listener, url) = listen().await;
    let slow_reconnect = ReconnectPolicy {
        enabled: true,
        initial_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(30),
    };
    let mut handle = stream::start(config(&url, slow_reconnect));

    let ws = accept(&listener).await;
    wait_for_state(&handle, ConnectionState::Connected).await;
    drop(ws);

    // Disconnected stays put for the whole backoff sleep.
    wait_for_state(&handle, ConnectionState::Disconnected).await;
    timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop waited for the backoff");

    assert!(!handle.is_running());
    assert!(timeout(Duration::from_millis(200), listener.accept())
        .await
        .is_err());
}

#[tokio::test]
async fn test_stop_while_upgrade_is_pending() {
    let (listener, url) = listen().await;
    let mut handle = stream::start(StreamConfig {
        handshake_timeout: Duration::from_secs(30),
        ..config(&url, ReconnectPolicy::disabled())
    });

    // Accept TCP but never answer the WebSocket upgrade.
    let (mut tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(handle.state(), ConnectionState::Connecting);

    timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop waited for the handshake timeout");
    assert!(!handle.is_running());
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    // The client side of the socket is gone: reading reaches EOF.
    let mut request = Vec::new();
    timeout(WAIT, tcp.read_to_end(&mut request))
        .await
        .expect("client kept the socket open")
        .unwrap();
    assert!(String::from_utf8_lossy(&request).starts_with("GET /socket.io/"));
}
