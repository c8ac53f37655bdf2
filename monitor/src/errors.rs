use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed alert submission, one variant per thing the user can act on.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No telemetry has been received yet; nothing was sent.
    #[error("Sensor data is not available yet.")]
    NoData,

    /// The request never got a response (DNS, refused connection, reset...).
    #[error("Failed to send the alert. Please check your connection.")]
    Network(#[source] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{message}")]
    ServerRejected { status: u16, message: String },
}

impl DispatchError {
    /// Short heading for the front end.
    pub fn title(&self) -> &'static str {
        match self {
            DispatchError::NoData => "No Data",
            DispatchError::Network(_) => "Network Error",
            DispatchError::ServerRejected { .. } => "Error",
        }
    }

    /// Label used for the alert outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            DispatchError::NoData => "no_data",
            DispatchError::Network(_) => "network_error",
            DispatchError::ServerRejected { .. } => "rejected",
        }
    }
}
