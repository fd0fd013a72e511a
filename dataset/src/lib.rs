pub mod config;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod mel;
pub mod shard;

pub use config::{DataConfig, Split};
pub use dataset::MelAudioDataset;
pub use error::{DatasetErr, Result};
pub use loader::{Batch, DataLoader};
pub use mel::MelFrontend;
pub use shard::ShardSpec;
