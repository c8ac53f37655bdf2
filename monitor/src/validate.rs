use crate::errors::{Error, Result};
use crate::model::SensorReading;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
const SMOKE_MIN: f64 = 0.0;

/// Decodes the payload of a telemetry event into a reading.
///
/// All four fields are required; unknown fields are ignored.
pub fn decode_reading(data: &Value) -> Result<SensorReading> {
    let reading = parse_reading(data)?;
    validate(&reading)?;
    Ok(reading)
}

/// Validates a decoded reading.
///
/// Only non-finite numbers are rejected. Humidity and smoke level have expected ranges
/// but devices are known to report outside them, so those are only noted.
pub fn validate(reading: &SensorReading) -> Result<()> {
    for (field, value) in [
        ("temperature", reading.temperature),
        ("humidity", reading.humidity),
        ("smokeLevel", reading.smoke_level),
    ] {
        if !value.is_finite() {
            return Err(Error::Validation(format!("{} is not finite: {}", field, value)));
        }
    }

    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&reading.humidity) {
        debug!(humidity = reading.humidity, "humidity outside expected range");
    }
    if reading.smoke_level < SMOKE_MIN {
        debug!(smoke_level = reading.smoke_level, "negative smoke level");
    }

    Ok(())
}

fn parse_reading(data: &Value) -> Result<SensorReading> {
    if !data.is_object() {
        return Err(Error::Validation(format!(
            "expected a JSON object, got {}",
            data
        )));
    }
    SensorReading::deserialize(data).map_err(|e| Error::Validation(format!("invalid reading: {}", e)))
}
