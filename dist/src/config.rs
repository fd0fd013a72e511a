use serde::Deserialize;

/// The `dist_config` group of the run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DistConfig {
    /// Coordinator address; rank 0 binds it, every other rank connects.
    pub url: String,
    /// Participating process count. 1 disables distribution entirely.
    #[serde(default = "default_world_size")]
    pub world_size: usize,
}

fn default_world_size() -> usize {
    1
}
