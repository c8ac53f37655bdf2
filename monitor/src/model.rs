use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for an address field the user never filled in.
pub const NOT_AVAILABLE: &str = "N/A";
/// Placeholder for a missing user name.
pub const UNKNOWN_USER: &str = "Unknown User";

/// One snapshot of the detector's sensors, as sent on the telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Smoke concentration in ppm
    pub smoke_level: f64,
    pub flame_detected: bool,
}

/// The content of the current-reading cell.
#[derive(Debug, Clone, Copy)]
pub struct LatestReading {
    pub reading: SensorReading,
    pub received_at: DateTime<Utc>,
}

/// Geographic position. Serialized as `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl From<[f64; 2]> for Coordinates {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.longitude, c.latitude]
    }
}

/// Identity and location fields read from the profile store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub name: Option<String>,
    pub apartment_label: Option<String>,
    pub street: Option<String>,
    pub district: Option<String>,
    pub location: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub apartment: String,
    pub street: String,
    pub district: String,
}

impl Address {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            apartment: or_placeholder(profile.apartment_label.as_deref(), NOT_AVAILABLE),
            street: or_placeholder(profile.street.as_deref(), NOT_AVAILABLE),
            district: or_placeholder(profile.district.as_deref(), NOT_AVAILABLE),
        }
    }
}

/// Name to put on an alert for this profile.
pub fn display_name(profile: &UserProfile) -> String {
    or_placeholder(profile.name.as_deref(), UNKNOWN_USER)
}

/// Empty strings count as missing: the settings screen saves `""` for cleared fields.
fn or_placeholder(value: Option<&str>, placeholder: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_owned(),
        _ => placeholder.to_owned(),
    }
}

/// Payload posted to the confirm-alert endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(flatten)]
    pub reading: SensorReading,
    pub location: Option<Coordinates>,
    pub address: Address,
    pub name: String,
    pub device_id: String,
}

impl AlertRecord {
    pub fn new(reading: SensorReading, profile: &UserProfile, device_id: &str) -> Self {
        Self {
            reading,
            location: profile.location,
            address: Address::from_profile(profile),
            name: display_name(profile),
            device_id: device_id.to_owned(),
        }
    }
}
