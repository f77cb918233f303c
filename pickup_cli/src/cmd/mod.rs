use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pickup_node::config::PickupNodeConfig;
use pickup_node::{PickupNode, RunOptions};

mod pickup;
mod pins;

pub use pickup::run_pickup;
pub use pins::run_pins;

fn load_config(config_file: &Path) -> Result<PickupNodeConfig> {
    let toml_content = std::fs::read_to_string(config_file).with_context(|| {
        format!(
            "failed to read {}, run `pickup config init` first",
            config_file.display()
        )
    })?;
    toml::from_str(&toml_content)
        .with_context(|| format!("invalid config file {}", config_file.display()))
}

pub async fn run_command(
    config_file: PathBuf,
    local_data_dir: &Path,
    cmd: crate::Commands,
) -> Result<()> {
    match cmd {
        crate::Commands::Config { cmd } => cmd.run(config_file, local_data_dir),
        crate::Commands::Start { no_api, no_worker } => {
            let config = load_config(&config_file)?;
            let options = RunOptions {
                api: !no_api,
                worker: !no_worker,
            };
            pickup_node::run_node(config, options).await
        }
        crate::Commands::Pickup {
            cid,
            origins,
            bucket,
        } => {
            let node = PickupNode::open(load_config(&config_file)?)?;
            run_pickup(&node, &cid, &origins, bucket).await
        }
        crate::Commands::Pins { cmd } => {
            let node = PickupNode::open(load_config(&config_file)?)?;
            run_pins(&node, cmd).await
        }
    }
}
