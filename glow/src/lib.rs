pub mod amp;
pub mod arch;
pub mod config;
pub mod error;
pub mod loss;
pub mod optim;

pub use amp::GradScaler;
pub use arch::{FlowOutput, ParamSpec, WaveGlow};
pub use config::GlowConfig;
pub use error::{GlowErr, Result};
pub use loss::FlowLoss;
pub use optim::{Adam, Optimizer};
