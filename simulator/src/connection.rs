use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use monitor::model::SensorReading;
use monitor::protocol::{Handshake, Packet, SocketPacket, DEFAULT_NAMESPACE};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub event: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

/// Serves one Socket.IO client: handshake, then readings and keepalive pings.
pub async fn handle_connection(
    socket: WebSocket,
    mut readings: broadcast::Receiver<SensorReading>,
    settings: SessionSettings,
    sid: String,
) {
    info!("Client connected: {}", sid);
    let (mut sender, mut receiver) = socket.split();

    let open = Packet::Open(Handshake {
        sid: sid.clone(),
        upgrades: Vec::new(),
        ping_interval: settings.ping_interval.as_millis() as u64,
        ping_timeout: settings.ping_timeout.as_millis() as u64,
        max_payload: Some(1_000_000),
    });
    if sender.send(Message::Text(open.encode())).await.is_err() {
        return;
    }

    let mut connected = false;
    let mut pings = interval(settings.ping_interval);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
    pings.tick().await;
    // Far future until a ping is outstanding.
    let idle = Duration::from_secs(86_400);
    let mut pong_deadline = Instant::now() + idle;

    loop {
        tokio::select! {
            _ = pings.tick() => {
                if sender.send(Message::Text(Packet::Ping.encode())).await.is_err() {
                    break;
                }
                pong_deadline = Instant::now() + settings.ping_timeout;
            }
            _ = sleep_until(pong_deadline) => {
                warn!("Client {} missed a pong, dropping it", sid);
                break;
            }
            reading = readings.recv(), if connected => {
                let reading = match reading {
                    Ok(reading) => reading,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, skipped {} readings", sid, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let data = match serde_json::to_value(reading) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Failed to serialize reading: {}", e);
                        continue;
                    }
                };
                let packet = Packet::Message(SocketPacket::event(&settings.event, data));
                if sender.send(Message::Text(packet.encode())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} closed connection", sid);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", sid, e);
                        break;
                    }
                };

                match Packet::decode(&text) {
                    Ok(Packet::Pong) => pong_deadline = Instant::now() + idle,
                    Ok(Packet::Message(SocketPacket::Connect { .. })) => {
                        let ack = Packet::Message(SocketPacket::Connect {
                            namespace: DEFAULT_NAMESPACE.to_string(),
                            data: Some(json!({ "sid": format!("{}-ns", sid) })),
                        });
                        if sender.send(Message::Text(ack.encode())).await.is_err() {
                            break;
                        }
                        connected = true;
                        debug!("Client {} joined namespace", sid);
                    }
                    Ok(Packet::Message(SocketPacket::Disconnect { .. })) | Ok(Packet::Close) => {
                        info!("Client {} disconnected", sid);
                        break;
                    }
                    Ok(other) => debug!("Ignoring {:?} from {}", other, sid),
                    Err(e) => warn!("Bad frame from {}: {}", sid, e),
                }
            }
        }
    }

    let _ = sender.close().await;
    info!("Client gone: {}", sid);
}
