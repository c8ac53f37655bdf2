use chrono::Utc;
use tokio::sync::watch;

use crate::model::{LatestReading, SensorReading};

/// Single-writer cell holding the most recent valid reading.
///
/// Owned by the stream session task. Readers get a [`ReadingWatch`] and never block the
/// writer; the last value stays readable after the writer is gone.
#[derive(Debug)]
pub struct ReadingCell {
    tx: watch::Sender<Option<LatestReading>>,
}

impl ReadingCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current reading. No merging with the previous one.
    pub fn publish(&self, reading: SensorReading) {
        self.tx.send_replace(Some(LatestReading {
            reading,
            received_at: Utc::now(),
        }));
    }

    pub fn subscribe(&self) -> ReadingWatch {
        ReadingWatch {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> Option<SensorReading> {
        (*self.tx.borrow()).map(|latest| latest.reading)
    }
}

impl Default for ReadingCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a [`ReadingCell`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReadingWatch {
    rx: watch::Receiver<Option<LatestReading>>,
}

impl ReadingWatch {
    /// Latest reading, `None` until the first valid message arrived.
    pub fn current(&self) -> Option<SensorReading> {
        self.latest().map(|latest| latest.reading)
    }

    pub fn latest(&self) -> Option<LatestReading> {
        *self.rx.borrow()
    }

    /// Waits for the next published reading.
    ///
    /// Returns `None` once the writer is gone and no new value can arrive.
    pub async fn changed(&mut self) -> Option<LatestReading> {
        self.rx.changed().await.ok()?;
        *self.rx.borrow_and_update()
    }

    /// Waits until a reading is available, returning immediately if one already is.
    pub async fn first(&mut self) -> Option<LatestReading> {
        if let Some(latest) = *self.rx.borrow_and_update() {
            return Some(latest);
        }
        self.changed().await
    }
}
