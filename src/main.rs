mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata::config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Relational queries over the layers of a local Docker image store")]
#[command(version)]
struct Cli {
    /// Docker data root
    #[arg(long, global = true, env = "STRATA_DOCKER_ROOT")]
    docker_root: Option<PathBuf>,

    /// docker CLI binary used to query the daemon
    #[arg(long = "docker", global = true, env = "STRATA_DOCKER")]
    docker_bin: Option<String>,

    /// Directory walkers used by `file`
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Output as JSON (optionally to a file)
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "-")]
    json: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the content and size of every layer of an image
    Layer {
        /// Image id, id prefix or name:tag
        image: String,
    },

    /// Show the storage directory of each build instruction
    History {
        /// Image id, id prefix or name:tag
        image: String,
    },

    /// List images that contain a layer
    Relation {
        /// Diff id, chain id or storage (cache) id
        layer_id: String,
    },

    /// Find images holding a file with identical content
    File {
        /// File whose content to search for
        path: PathBuf,
    },

    /// Find the tagged images closest to an untagged one
    None {
        /// Id (or id fragment) of a <none> image
        image_id: String,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    config::init_from_cli(&config::CliOverrides {
        docker_root: cli.docker_root.as_deref(),
        docker_bin: cli.docker_bin.as_deref(),
        workers: cli.workers,
        json: cli.json.as_deref(),
    })?;
    let cfg = config::get();

    match &cli.command {
        Commands::Layer { image } => cmd::layer::run(cfg, image),
        Commands::History { image } => cmd::history::run(cfg, image),
        Commands::Relation { layer_id } => cmd::relation::run(cfg, layer_id),
        Commands::File { path } => cmd::file::run(cfg, path),
        Commands::None { image_id } => cmd::none::run(cfg, image_id),
    }
}
