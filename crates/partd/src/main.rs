//! partd — the PartGrid node daemon.
//!
//! Advertises this node's GPUs (whole devices and, where the control
//! plane allows it, partitions) and translates granted claims into
//! prepare requests.
//!
//! # Usage
//!
//! ```text
//! partd init-config /etc/partd/partd.toml --node-name gpu-node-1
//! partd run --config /etc/partd/partd.toml
//! partd prepare --config /etc/partd/partd.toml --claim claim.json --inventory /var/lib/partd/slices
//! ```

mod prepare;
mod run;
mod topology;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use part_core::AgentConfig;

#[derive(Parser)]
#[command(name = "partd", about = "PartGrid node daemon")]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the advertisement loop until interrupted.
    Run {
        /// Agent configuration file.
        #[arg(long)]
        config: PathBuf,
    },

    /// Translate a granted claim into a prepare request and print it.
    Prepare {
        #[arg(long)]
        config: PathBuf,

        /// Claim JSON file.
        #[arg(long)]
        claim: PathBuf,

        /// Directory of published slice files.
        #[arg(long)]
        inventory: PathBuf,
    },

    /// Write a starter configuration file.
    InitConfig {
        path: PathBuf,

        #[arg(long, default_value = "gpu-node")]
        node_name: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,partd=debug,partgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => {
            let config = load_config(&config)?;
            run::run(config).await
        }
        Command::Prepare {
            config,
            claim,
            inventory,
        } => {
            let config = load_config(&config)?;
            let request = prepare::prepare(&config, &claim, &inventory)?;
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
        Command::InitConfig {
            path,
            node_name,
            force,
        } => init_config(&path, &node_name, force),
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<AgentConfig> {
    AgentConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

fn init_config(path: &std::path::Path, node_name: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = AgentConfig::scaffold(node_name).to_toml_string()?;
    std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), %node_name, "config written");
    Ok(())
}
