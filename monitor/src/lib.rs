pub mod config;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod profile;
pub mod protocol;
pub mod reading_cell;
pub mod stream;
pub mod validate;

pub use config::{Config, ReconnectPolicy, StreamConfig};
pub use dispatch::{AlertDispatcher, AlertReceipt};
pub use errors::{DispatchError, Error, Result};
pub use model::{AlertRecord, Coordinates, SensorReading, UserProfile};
pub use profile::{FileProfileStore, MemoryProfileStore, ProfileStore};
pub use reading_cell::{ReadingCell, ReadingWatch};
pub use stream::{ConnectionState, StreamHandle};
