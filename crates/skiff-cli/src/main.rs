use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skiff_core::{LineConnector, RankBias};
use skiff_session::{ClusterSession, SessionConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "skiff",
    about = "Skiff: client for a remote container location",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Location to connect to (host:port). Overrides the config file.
    #[arg(short, long, global = true)]
    location: Option<String>,
    /// Config file (default: ~/.skiff/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nodes, best first
    Nodes {
        /// Stat to rank by: cpu or memory
        #[arg(short, long, default_value = "memory")]
        bias: RankBias,
    },
    /// List volumes
    Volumes,
    /// Create, destroy, snapshot or roll back a volume
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },
    /// Forward a local port onto a tagged container until Ctrl-C
    Tunnel {
        /// Tag the container was started with
        tag: String,
        remote_port: u16,
        /// Local port (default: any free port)
        #[arg(long, default_value_t = 0)]
        local_port: u16,
        /// Local address to listen on (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<IpAddr>,
    },
    /// Publish a tagged container on a web endpoint until Ctrl-C
    Publish {
        tag: String,
        fqdn: String,
        /// Rewrite the Host header to this value
        #[arg(long)]
        rewrite: Option<String>,
        /// Certificate base name: NAME.crt and NAME.key
        #[arg(long)]
        cert: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Create a volume
    Create {
        #[arg(short, long)]
        tag: Option<String>,
        /// Synchronous writes (default: async)
        #[arg(long)]
        sync: bool,
    },
    /// Destroy a volume by uuid or tag
    Destroy { key: String },
    /// Mark the current state as the rollback baseline
    Snapshot { key: String },
    /// Restore the last snapshot
    Rollback { key: String },
}

fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => match default_config_path() {
            Some(path) if path.is_file() => SessionConfig::from_file(&path)
                .with_context(|| format!("reading {}", path.display()))?,
            _ => SessionConfig::default(),
        },
    };
    if let Some(location) = &cli.location {
        config.location = location.clone();
    }
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".skiff").join("config.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info,skiff=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = load_config(&cli)?;
    let location = config.location.clone();
    let session = ClusterSession::connect(&LineConnector::default(), config)
        .await
        .with_context(|| format!("connecting to {location}"))?;

    let result = match cli.command {
        Commands::Nodes { bias } => commands::nodes::list(&session, bias),
        Commands::Volumes => commands::volume::list(&session),
        Commands::Volume { action } => match action {
            VolumeAction::Create { tag, sync } => {
                commands::volume::create(&session, tag.as_deref(), sync).await
            }
            VolumeAction::Destroy { key } => commands::volume::destroy(&session, &key).await,
            VolumeAction::Snapshot { key } => commands::volume::snapshot(&session, &key),
            VolumeAction::Rollback { key } => commands::volume::rollback(&session, &key),
        },
        Commands::Tunnel {
            tag,
            remote_port,
            local_port,
            bind,
        } => commands::tunnel::open(&session, &tag, remote_port, local_port, bind).await,
        Commands::Publish {
            tag,
            fqdn,
            rewrite,
            cert,
        } => commands::publish::publish(&session, &tag, &fqdn, rewrite, cert.as_deref()).await,
    };

    session.disconnect();
    result
}
