pub mod config;
pub mod error;
pub mod group;
mod proto;

pub use config::DistConfig;
pub use error::{DistErr, Result};
pub use group::ProcessGroup;
