use bevy::app::AppExit;
use clap::Parser;

use wireworld_gpu::app;
use wireworld_gpu::config::{AppConfig, Cli};

fn main() -> AppExit {
    let config = AppConfig::from(Cli::parse());
    app::run(config)
}
