use crate::config::{ReconnectPolicy, StreamConfig};
use crate::errors::{Error, Result};
use crate::metrics::{
    CONNECTED, CONNECTIONS_TOTAL, CONNECTION_ERRORS_TOTAL, INVALID_MESSAGES_TOTAL, MESSAGES_TOTAL,
    VALID_MESSAGES_TOTAL,
};
use crate::model::SensorReading;
use crate::protocol::{socket_url, Handshake, Packet, SocketPacket};
use crate::reading_cell::{ReadingCell, ReadingWatch};
use crate::validate::decode_reading;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owner of a running telemetry stream.
///
/// Dropping the handle aborts the session task, which closes the socket. Call
/// [`StreamHandle::stop`] to also say goodbye to the server and wait for the task to end.
#[derive(Debug)]
pub struct StreamHandle {
    readings: ReadingWatch,
    state: watch::Receiver<ConnectionState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Opens the telemetry stream and keeps a reading cell up to date in the background.
///
/// Must be called from within a tokio runtime.
pub fn start(config: StreamConfig) -> StreamHandle {
    let cell = ReadingCell::new();
    let readings = cell.subscribe();
    let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(run_stream(config, cell, state_tx, shutdown_rx));

    StreamHandle {
        readings,
        state,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    }
}

impl StreamHandle {
    /// Latest valid reading; stays available after a disconnect.
    pub fn current_reading(&self) -> Option<SensorReading> {
        self.readings.current()
    }

    pub fn readings(&self) -> ReadingWatch {
        self.readings.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Closes the connection and waits for the session task to finish.
    ///
    /// Safe to call any number of times.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already be gone after a final connection error.
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Telemetry stream task failed: {}", e);
                }
            }
            info!("Telemetry stream stopped");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost { error: Error, was_connected: bool },
}

async fn run_stream(
    config: StreamConfig,
    cell: ReadingCell,
    state: watch::Sender<ConnectionState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let url = match socket_url(&config.base_url) {
        Ok(url) => url,
        Err(e) => {
            error!("Cannot connect to {}: {}", config.base_url, e);
            CONNECTION_ERRORS_TOTAL.inc();
            return;
        }
    };
    let mut backoff = Backoff::new(&config.reconnect);

    loop {
        state.send_replace(ConnectionState::Connecting);
        info!("Connecting to telemetry server at {}", config.base_url);

        let end = run_session(&url, &config, &cell, &state, &mut shutdown).await;
        state.send_replace(ConnectionState::Disconnected);
        CONNECTED.set(0);

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost {
                error,
                was_connected,
            } => {
                CONNECTION_ERRORS_TOTAL.inc();
                error!("Connection error: {}", error);

                if !config.reconnect.enabled {
                    info!("Reconnect disabled, keeping last reading");
                    break;
                }
                if was_connected {
                    backoff.reset();
                }

                let delay = backoff.next_delay();
                warn!(
                    backoff_ms = delay.as_millis() as u64,
                    attempt = backoff.attempt,
                    "Reconnecting after delay"
                );
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!("Telemetry stream task exiting");
}

async fn run_session(
    url: &reqwest::Url,
    config: &StreamConfig,
    cell: &ReadingCell,
    state: &watch::Sender<ConnectionState>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let connect = tokio::time::timeout(config.handshake_timeout, connect_async(url.as_str()));
    let mut socket = tokio::select! {
        biased;
        _ = &mut *shutdown => return SessionEnd::Shutdown,
        res = connect => match res {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(e)) => return lost(e.into(), false),
            Err(_) => return lost(Error::Timeout("WebSocket connect".to_string()), false),
        },
    };
    debug!("WebSocket open, waiting for handshake");

    let mut session = Session::new(&config.event, config.handshake_timeout);

    loop {
        let idle = session.idle_timeout();
        tokio::select! {
            biased;
            _ = &mut *shutdown => {
                close_gracefully(&mut socket).await;
                return SessionEnd::Shutdown;
            }
            frame = tokio::time::timeout(idle, socket.next()) => {
                let text = match frame {
                    Err(_) => return lost(Error::Timeout(format!("no traffic for {:?}", idle)), session.connected),
                    Ok(None) => return lost(Error::Closed("stream ended".to_string()), session.connected),
                    Ok(Some(Err(e))) => return lost(e.into(), session.connected),
                    Ok(Some(Ok(Message::Text(text)))) => text,
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "no reason".to_string());
                        return lost(Error::Closed(reason), session.connected);
                    }
                    // Pings are answered by tungstenite; binary frames carry no Socket.IO text.
                    Ok(Some(Ok(_))) => continue,
                };

                let was_connected = session.connected;
                match session.handle_frame(&text, cell) {
                    Ok(Some(reply)) => {
                        if let Err(e) = socket.send(Message::Text(reply.encode())).await {
                            return lost(e.into(), session.connected);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => return lost(e, session.connected),
                }
                if session.connected && !was_connected {
                    info!("✅ Connected to telemetry server");
                    CONNECTIONS_TOTAL.inc();
                    CONNECTED.set(1);
                    state.send_replace(ConnectionState::Connected);
                }
            }
        }
    }
}

fn lost(error: Error, was_connected: bool) -> SessionEnd {
    SessionEnd::Lost {
        error,
        was_connected,
    }
}

async fn close_gracefully(socket: &mut Socket) {
    let goodbye = Packet::Message(SocketPacket::disconnect()).encode();
    if let Err(e) = socket.send(Message::Text(goodbye)).await {
        debug!("Could not send disconnect packet: {}", e);
    }
    if let Err(e) = socket.close(None).await {
        debug!("Could not close WebSocket cleanly: {}", e);
    }
}

/// Socket.IO session state for one connection. Knows nothing about the socket itself.
struct Session {
    event: String,
    handshake_timeout: Duration,
    handshake: Option<Handshake>,
    connected: bool,
}

impl Session {
    fn new(event: &str, handshake_timeout: Duration) -> Self {
        Self {
            event: event.to_string(),
            handshake_timeout,
            handshake: None,
            connected: false,
        }
    }

    fn idle_timeout(&self) -> Duration {
        match &self.handshake {
            Some(handshake) => handshake.idle_timeout(),
            None => self.handshake_timeout,
        }
    }

    /// Applies one text frame. Returns the packet to send back, if any.
    ///
    /// Errors mean the connection is unusable; malformed data only gets logged.
    fn handle_frame(&mut self, frame: &str, cell: &ReadingCell) -> Result<Option<Packet>> {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                INVALID_MESSAGES_TOTAL.inc();
                return Ok(None);
            }
        };

        match packet {
            Packet::Open(handshake) => {
                debug!(sid = %handshake.sid, "Engine.IO handshake received");
                self.handshake = Some(handshake);
                Ok(Some(Packet::Message(SocketPacket::connect())))
            }
            Packet::Ping => Ok(Some(Packet::Pong)),
            Packet::Pong | Packet::Noop | Packet::Upgrade => Ok(None),
            Packet::Close => Err(Error::Closed("server closed the session".to_string())),
            Packet::Message(message) => self.handle_message(message, cell),
        }
    }

    fn handle_message(
        &mut self,
        message: SocketPacket,
        cell: &ReadingCell,
    ) -> Result<Option<Packet>> {
        match message {
            SocketPacket::Connect { .. } => {
                self.connected = true;
                Ok(None)
            }
            SocketPacket::ConnectError { message, .. } => Err(Error::Closed(format!(
                "server refused the connection: {}",
                message
            ))),
            SocketPacket::Disconnect { .. } => {
                Err(Error::Closed("server disconnected the client".to_string()))
            }
            SocketPacket::Event { name, args, .. } if name == self.event => {
                MESSAGES_TOTAL.inc();
                let applied = args
                    .first()
                    .ok_or_else(|| Error::Validation("event without data".to_string()))
                    .and_then(decode_reading);
                match applied {
                    Ok(reading) => {
                        cell.publish(reading);
                        VALID_MESSAGES_TOTAL.inc();
                    }
                    Err(e) => {
                        warn!("Dropping {} event: {}", self.event, e);
                        INVALID_MESSAGES_TOTAL.inc();
                    }
                }
                Ok(None)
            }
            SocketPacket::Event { name, .. } => {
                debug!(event = %name, "Ignoring event");
                Ok(None)
            }
            SocketPacket::Ack { id, .. } => {
                debug!(id, "Ignoring ack");
                Ok(None)
            }
        }
    }
}

/// Exponential reconnect delay.
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            initial: policy.initial_backoff,
            max: policy.max_backoff,
            current: policy.initial_backoff,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempt += 1;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}
