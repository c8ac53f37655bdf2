mod connection;
mod telemetry;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use connection::SessionSettings;
use monitor::dispatch::CONFIRM_ALERT_PATH;
use monitor::model::{AlertRecord, SensorReading};
use monitor::protocol::SOCKET_IO_PATH;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "simulator", about = "Fake fire monitor backend: sensor stream and alert endpoint")]
struct Cli {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    bind: String,

    /// Milliseconds between readings
    #[arg(long, env = "EMIT_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    #[arg(long, env = "SENSOR_EVENT", default_value = "sensor-data")]
    event: String,

    #[arg(long, env = "PING_INTERVAL_MS", default_value_t = 25000)]
    ping_interval_ms: u64,

    #[arg(long, env = "PING_TIMEOUT_MS", default_value_t = 20000)]
    ping_timeout_ms: u64,

    /// Answer every alert with 500
    #[arg(long, env = "REJECT_ALERTS")]
    reject_alerts: bool,
}

#[derive(Clone)]
struct AppState {
    readings: broadcast::Sender<SensorReading>,
    settings: SessionSettings,
    reject_alerts: bool,
}

#[derive(Serialize)]
struct AlertResponse {
    message: &'static str,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.interval_ms == 0 || cli.ping_interval_ms == 0 || cli.ping_timeout_ms == 0 {
        error!("Intervals and timeouts must be positive");
        std::process::exit(2);
    }

    info!("Starting fire monitor simulator");
    info!(
        "Bind: {}, interval: {}ms, event: {}, reject alerts: {}",
        cli.bind, cli.interval_ms, cli.event, cli.reject_alerts
    );

    let (tx, _) = broadcast::channel(64);
    let state = AppState {
        readings: tx.clone(),
        settings: SessionSettings {
            event: cli.event.clone(),
            ping_interval: Duration::from_millis(cli.ping_interval_ms),
            ping_timeout: Duration::from_millis(cli.ping_timeout_ms),
        },
        reject_alerts: cli.reject_alerts,
    };

    let interval = Duration::from_millis(cli.interval_ms);
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut ticker = tokio::time::interval(interval);
        let mut counter = 0u64;
        loop {
            ticker.tick().await;
            let reading = telemetry::generate_reading(&mut rng);
            if reading.flame_detected {
                warn!("🔥 Emitting fire reading: {:?}", reading);
            }
            // No subscribers is fine; nobody is connected yet.
            let _ = tx.send(reading);
            counter += 1;
            if counter % 100 == 0 {
                info!("Emitted {} readings", counter);
            }
        }
    });

    let app = Router::new()
        .route(SOCKET_IO_PATH, get(socket_handler))
        .route(CONFIRM_ALERT_PATH, post(confirm_alert))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", cli.bind, e);
            std::process::exit(1);
        });
    info!("Listening on {}", cli.bind);

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("HTTP server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }
}

async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let sid = uuid::Uuid::new_v4().simple().to_string();
    let readings = state.readings.subscribe();
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, readings, state.settings, sid)
    })
}

async fn confirm_alert(
    State(state): State<AppState>,
    Json(alert): Json<AlertRecord>,
) -> (StatusCode, Json<AlertResponse>) {
    info!(
        "🚨 Alert from {} ({}): {:?} at {:?}, {}/{}/{}",
        alert.name,
        alert.device_id,
        alert.reading,
        alert.location,
        alert.address.apartment,
        alert.address.street,
        alert.address.district
    );

    if state.reject_alerts {
        warn!("Rejecting alert as configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AlertResponse {
                message: "Alert rejected by simulator",
            }),
        );
    }
    (
        StatusCode::OK,
        Json(AlertResponse {
            message: "Alert received",
        }),
    )
}
