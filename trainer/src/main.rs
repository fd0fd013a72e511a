use std::path::PathBuf;

use clap::Parser;

use trainer::{Config, TrainerError, train};

/// Flow-vocoder training driver.
#[derive(Debug, Parser)]
struct Args {
    /// JSON file for configuration.
    #[arg(short, long)]
    config: PathBuf,
    /// Rank of this process for distributed training.
    #[arg(short, long, default_value_t = 0)]
    rank: usize,
    /// Name of the distributed group.
    #[arg(short, long, default_value = "")]
    group_name: String,
}

fn main() -> Result<(), TrainerError> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    let num_procs = train::effective_world_size(config.dist_config.world_size, &args.group_name);
    train::validate_launch(num_procs, args.rank)?;

    train::run(&config, num_procs, args.rank, &args.group_name)
}
