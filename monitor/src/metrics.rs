use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_messages_total",
        "Total telemetry events received on the stream"
    ))
    .expect("valid metric options");
    pub static ref VALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_valid_messages_total",
        "Total telemetry events accepted into the reading cell"
    ))
    .expect("valid metric options");
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_invalid_messages_total",
        "Total telemetry events or frames dropped as malformed"
    ))
    .expect("valid metric options");
    pub static ref CONNECTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_connections_total",
        "Total successful stream connections"
    ))
    .expect("valid metric options");
    pub static ref CONNECTION_ERRORS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_connection_errors_total",
        "Total stream connection errors"
    ))
    .expect("valid metric options");
    pub static ref CONNECTED: IntGauge = IntGauge::with_opts(Opts::new(
        "monitor_connected",
        "1 while the stream is connected"
    ))
    .expect("valid metric options");
    pub static ref ALERTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_alerts_total", "Alert submissions by outcome"),
        &["outcome"]
    )
    .expect("valid metric options");
    pub static ref ALERT_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_alert_latency_seconds",
            "Time taken by the confirm-alert request"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .expect("valid metric options");
    pub static ref LOCATION_DECODE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_location_decode_failures_total",
        "Stored locations that could not be decoded"
    ))
    .expect("valid metric options");
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECTION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECTED.clone()))?;
    REGISTRY.register(Box::new(ALERTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERT_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(LOCATION_DECODE_FAILURES_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
