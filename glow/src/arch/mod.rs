mod act_fn;
mod coupling;
mod dense;
mod model;

pub use act_fn::ActFn;
pub use coupling::CouplingNet;
pub use dense::Dense;
pub use model::{FlowOutput, ParamSpec, WaveGlow};
