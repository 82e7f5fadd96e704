use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use artfolio::{
    config::Config,
    ledger::{DirectoryLedger, VersionLedger},
    logging::init_logging,
    media::MediaStore,
    render::{Encoder, FfmpegEncoder, RenderPipeline, RenderRequest},
};

#[derive(Parser)]
#[command(
    name = "artfolio",
    version,
    about = "Turn the version history of your artwork into timelapse videos",
    long_about = "Artfolio keeps every version of a piece under <media-root>/<group>/<item>/ and renders them, oldest first, into a timelapse video with FFmpeg."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the media root from the configuration
    #[arg(short, long, global = true)]
    media_root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render an item's versions into a timelapse
    Render {
        /// Item identifier
        item: u64,

        /// Seconds each version is shown
        #[arg(short, long)]
        duration: Option<String>,

        /// Frame interpolation factor (1 disables it)
        #[arg(short, long)]
        interpolate: Option<String>,

        /// Base frame rate before interpolation
        #[arg(short, long)]
        fps: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a file as a new version of an item
    Ingest {
        group: u64,
        item: u64,
        file: PathBuf,
    },

    /// List an item's versions, newest first
    Versions {
        item: u64,
    },

    /// Check that the encoder can be started
    Check,

    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?,
        None => Config::default(),
    };
    if let Some(root) = cli.media_root {
        config.media.root = root;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config.validate()?;

    init_logging(&config.logging);
    info!("Starting Artfolio v{}", env!("CARGO_PKG_VERSION"));

    let encoder = Arc::new(FfmpegEncoder::from_config(&config.encoder));

    match cli.command {
        Command::Render { item, duration, interpolate, fps, json } => {
            let ledger = Arc::new(DirectoryLedger::new(&config.media.root));
            let pipeline = Arc::new(RenderPipeline::from_config(&config, ledger, encoder));
            let request = RenderRequest::from_query(
                pipeline.defaults(),
                duration.as_deref(),
                interpolate.as_deref(),
                fps.as_deref(),
            );

            match pipeline.render_async(item, request).await {
                Ok(artifact) if json => println!("{}", serde_json::to_string_pretty(&artifact)?),
                Ok(artifact) => {
                    println!("{}", artifact.public_url);
                    println!("{}", artifact.path.display());
                }
                Err(e) => {
                    error!("Render failed ({}): {}", e.class().status_code(), e);
                    bail!(e.user_message());
                }
            }
        }

        Command::Ingest { group, item, file } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("file has no usable name")?
                .to_string();
            let store = MediaStore::from_config(&config.media);
            let stored = store.store_upload(group, item, &file, &name, chrono::Utc::now())?;
            println!("{}", store.public_url(group, item, &stored.filename));
        }

        Command::Versions { item } => {
            let ledger = DirectoryLedger::new(&config.media.root);
            let owner = ledger.item(item)?;
            let store = MediaStore::from_config(&config.media);
            for version in ledger.list_versions(item)?.iter().rev() {
                let filename = version.filename().unwrap_or_default();
                println!(
                    "{:>4}  {}  {}",
                    version.id,
                    version.created_at.to_rfc3339(),
                    store.public_url(owner.group_id, owner.id, filename)
                );
            }
        }

        Command::Check => {
            if encoder.is_available() {
                println!("{} is available", encoder.name());
            } else {
                bail!("{} could not be started; install FFmpeg or set encoder.program", encoder.name());
            }
        }

        Command::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
