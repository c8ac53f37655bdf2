use crate::errors::DispatchError;
use crate::metrics::{ALERTS_TOTAL, ALERT_LATENCY_SECONDS};
use crate::model::AlertRecord;
use crate::profile::ProfileStore;
use crate::reading_cell::ReadingWatch;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Identifier sent with every alert from this monitor.
pub const DEVICE_ID: &str = "ESP32-LivingRoom-01";
pub const CONFIRM_ALERT_PATH: &str = "/api/fire-alerts/confirm-alert";

pub const SENT_TITLE: &str = "Alert Sent!";
pub const SENT_TEXT: &str = "The authorities have been notified.";
const REJECTED_FALLBACK: &str = "Could not send the alert.";

/// Successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertReceipt {
    pub status: u16,
    /// Message from the response body, when the server sent one.
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    message: Option<String>,
}

/// Builds alerts from the latest reading and the stored profile, and submits them.
#[derive(Clone)]
pub struct AlertDispatcher {
    client: reqwest::Client,
    endpoint: String,
    store: Arc<dyn ProfileStore>,
    readings: ReadingWatch,
    in_flight: Arc<AtomicUsize>,
}

impl AlertDispatcher {
    pub fn new(base_url: &str, store: Arc<dyn ProfileStore>, readings: ReadingWatch) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CONFIRM_ALERT_PATH),
            store,
            readings,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submissions that have been issued and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Assembles the alert payload without sending it.
    pub async fn build_alert(&self) -> Result<AlertRecord, DispatchError> {
        let reading = self.readings.current().ok_or(DispatchError::NoData)?;
        let profile = self.store.load_profile().await;
        Ok(AlertRecord::new(reading, &profile, DEVICE_ID))
    }

    /// Sends one alert. Never retries; every call produces exactly one outcome.
    pub async fn dispatch_alert(&self) -> Result<AlertReceipt, DispatchError> {
        let result = self.submit().await;
        match &result {
            Ok(receipt) => {
                info!(status = receipt.status, "🚨 Alert delivered");
                ALERTS_TOTAL.with_label_values(&["sent"]).inc();
            }
            Err(e) => {
                match e {
                    DispatchError::NoData => warn!("Alert not sent: no sensor data yet"),
                    DispatchError::Network(source) => error!(error = %source, "Alert not sent"),
                    DispatchError::ServerRejected { status, message } => {
                        error!(status, %message, "Alert rejected by server")
                    }
                }
                ALERTS_TOTAL.with_label_values(&[e.outcome()]).inc();
            }
        }
        result
    }

    async fn submit(&self) -> Result<AlertReceipt, DispatchError> {
        let alert = self.build_alert().await?;

        let _guard = InFlightGuard::enter(&self.in_flight);
        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .json(&alert)
            .send()
            .await
            .map_err(DispatchError::Network);
        ALERT_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        let response = response?;

        let status = response.status();
        // The body only matters for its optional message; an unreadable one is not an error.
        let message = match response.text().await {
            Ok(body) => server_message(&body),
            Err(_) => None,
        };

        if status.is_success() {
            Ok(AlertReceipt {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(DispatchError::ServerRejected {
                status: status.as_u16(),
                message: message.unwrap_or_else(|| REJECTED_FALLBACK.to_string()),
            })
        }
    }
}

fn server_message(body: &str) -> Option<String> {
    serde_json::from_str::<ServerMessage>(body)
        .ok()
        .and_then(|m| m.message)
        .filter(|m| !m.is_empty())
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
