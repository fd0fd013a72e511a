pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gpu;
pub mod telemetry;
pub mod train;

pub use config::{Config, TrainConfig};
pub use error::TrainerError;
