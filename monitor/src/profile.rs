use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::metrics::LOCATION_DECODE_FAILURES_TOTAL;
use crate::model::{Coordinates, UserProfile};

/// Keys written by the settings surface.
pub mod keys {
    pub const NAME: &str = "name";
    pub const APARTMENT: &str = "apartment";
    /// Street address
    pub const ADDRESS: &str = "address";
    pub const DISTRICT: &str = "district";
    pub const LOCATION: &str = "location";
    pub const EMERGENCY_NUMBER: &str = "emergencyNumber";

    pub const ALL: [&str; 6] = [
        NAME,
        APARTMENT,
        ADDRESS,
        DISTRICT,
        LOCATION,
        EMERGENCY_NUMBER,
    ];
}

/// Why a stored location could not be used. Never surfaced past the store.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LocationError {
    #[error("location is empty")]
    Empty,

    #[error("malformed location {0:?}")]
    Malformed(String),
}

/// Durable key-value persistence for the user's identity and location.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Raw stored value, `None` if the key was never written.
    async fn get(&self, key: &str) -> Option<String>;

    /// Persists `value` under `key` before returning. Last write wins.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Stored location in either the current or the legacy encoding.
    ///
    /// Anything undecodable is logged and treated as no location.
    async fn resolve_location(&self) -> Option<Coordinates> {
        let raw = self.get(keys::LOCATION).await?;
        match decode_location(&raw) {
            Ok(coordinates) => Some(coordinates),
            Err(LocationError::Empty) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring stored location");
                LOCATION_DECODE_FAILURES_TOTAL.inc();
                None
            }
        }
    }

    /// Reads every field the alert needs.
    async fn load_profile(&self) -> UserProfile {
        UserProfile {
            name: self.get(keys::NAME).await,
            apartment_label: self.get(keys::APARTMENT).await,
            street: self.get(keys::ADDRESS).await,
            district: self.get(keys::DISTRICT).await,
            location: self.resolve_location().await,
        }
    }

    /// Stores a location in the current `[longitude, latitude]` encoding.
    async fn set_location(&self, coordinates: Coordinates) -> Result<()> {
        self.set(keys::LOCATION, &encode_location(coordinates)).await
    }
}

/// Decodes a stored location.
///
/// The current encoding is a JSON array `[longitude, latitude]`. Older installs stored
/// `"latitude, longitude"`, note the swapped order.
pub fn decode_location(raw: &str) -> std::result::Result<Coordinates, LocationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(LocationError::Empty);
    }

    if let Some(coordinates) = decode_json_location(raw) {
        return Ok(coordinates);
    }
    debug!(location = raw, "Location is not a JSON pair, trying legacy format");

    decode_legacy_location(raw).ok_or_else(|| LocationError::Malformed(raw.to_string()))
}

fn decode_json_location(raw: &str) -> Option<Coordinates> {
    let items = match serde_json::from_str::<Value>(raw).ok()? {
        Value::Array(items) => items,
        _ => return None,
    };
    match items.as_slice() {
        [longitude, latitude] => {
            let longitude = longitude.as_f64().filter(|v| v.is_finite())?;
            let latitude = latitude.as_f64().filter(|v| v.is_finite())?;
            Some(Coordinates {
                longitude,
                latitude,
            })
        }
        _ => None,
    }
}

fn decode_legacy_location(raw: &str) -> Option<Coordinates> {
    let parts = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    match parts.as_slice() {
        [latitude, longitude] => Some(Coordinates {
            longitude: *longitude,
            latitude: *latitude,
        }),
        _ => None,
    }
}

pub fn encode_location(coordinates: Coordinates) -> String {
    let pair: [f64; 2] = coordinates.into();
    // Two finite floats always serialize.
    serde_json::to_string(&pair).unwrap_or_default()
}

/// Profile store backed by a JSON object file.
///
/// The whole file is cached in memory; every `set` rewrites it through a temporary file
/// and a rename so a crash never leaves a half-written profile behind.
#[derive(Debug)]
pub struct FileProfileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileProfileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => {
                let entries: BTreeMap<String, String> = serde_json::from_slice(&bytes)?;
                info!(path = %path.display(), keys = entries.len(), "Profile loaded");
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No profile yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every stored key.
    pub async fn entries(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        // Holding the write lock across the write keeps file order equal to call order.
        let mut entries = self.entries.write().await;
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());

        self.persist(&updated).await?;
        *entries = updated;
        debug!(key, "Profile field saved");
        Ok(())
    }
}

/// Non-durable store, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
