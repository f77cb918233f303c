use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use std::path::PathBuf;

mod cmd;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// config file to use instead of the default location
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the node's config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Start the pinning API and the pickup workers
    Start {
        /// Only run the workers
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "no_worker")]
        no_api: bool,
        /// Only run the API; dispatches queue up until a worker runs
        #[arg(long, action = ArgAction::SetTrue)]
        no_worker: bool,
    },
    /// Fetch one CID into a configured bucket, bypassing the queue
    Pickup {
        cid: String,
        /// Multiaddr of a peer known to have the content (repeatable)
        #[arg(short, long = "origin", value_name = "MULTIADDR")]
        origins: Vec<String>,
        /// Destination bucket; defaults to the API bucket
        #[arg(short, long, value_name = "BUCKET")]
        bucket: Option<String>,
    },
    /// Inspect pin records in the configured status store
    Pins {
        #[command(subcommand)]
        cmd: PinsCmd,
    },
}

#[derive(Subcommand)]
enum PinsCmd {
    /// List a user's pins, most recent first
    List {
        #[arg(short, long)]
        user: String,
        /// Comma separated statuses to include
        #[arg(short, long, value_name = "STATUS")]
        status: Option<String>,
        #[arg(short, long, default_value_t = pickup_core::query::DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Show one pin record
    Get {
        #[arg(short, long)]
        user: String,
        request_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Config under ~/.config/pickup/pickup.toml, data under ~/.local/share/pickup/
    let dirs = ProjectDirs::from("", "", "pickup")
        .context("failed to determine config directory path")?;
    let config_file = cli
        .config
        .unwrap_or_else(|| dirs.config_dir().join("pickup.toml"));

    cmd::run_command(config_file, dirs.data_dir(), cli.cmd).await
}
