//! Osmium CLI - Command-line interface for self-improving playbooks
//!
//! This CLI provides an `osm` command for inspecting and maintaining a
//! file-backed playbook and for running adaptation passes over sample files.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use osmium_core::CurationMode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{adapt, playbook};

/// Osmium CLI - self-improving playbooks for model-drafted artifacts
#[derive(Parser, Debug)]
#[command(
    name = "osm",
    author,
    version,
    about = "Osmium - self-improving playbooks",
    long_about = "Osmium (osm) maintains a versioned playbook of guidance items and improves it\nby generating drafts, reflecting on feedback and curating the lessons back in."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (overrides ./osmium.toml and ~/.osmium/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Playbook data directory (overrides playbook.data_dir)
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new playbook
    ///
    /// Uses the configured sections unless the seed file names its own.
    Init {
        /// JSON seed file: {"sections": [...], "items": [{"section", "content"}]}
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Show the current playbook
    Show {
        /// Only show this section
        #[arg(short, long)]
        section: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-section statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List published versions
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Publish an earlier version's items as a new version
    Rollback {
        /// Version to restore
        version: u64,
    },

    /// Add a hand-written item
    Add {
        /// Section for the item
        #[arg(short, long)]
        section: String,

        /// Item content
        #[arg(short, long)]
        content: String,
    },

    /// Run adaptation passes over a JSONL sample file
    ///
    /// Each line is a sample with `requirements`, `templates` and either
    /// `feedback` or `ground_truth`.
    Adapt {
        /// Sample file, one JSON object per line
        #[arg(long)]
        samples: PathBuf,

        /// Number of passes over the samples
        #[arg(long, default_value = "1")]
        epochs: usize,

        /// Curation mode (overrides adaptation.mode)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Output epoch reports as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Incremental,
    Lazy,
}

impl From<ModeArg> for CurationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Incremental => Self::Incremental,
            ModeArg::Lazy => Self::Lazy,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = config::load_config(args.config.as_deref(), args.data_dir)?;

    match args.command {
        Command::Init { seed } => playbook::init(&config, seed.as_deref())?,
        Command::Show { section, json } => playbook::show(&config, section.as_deref(), json)?,
        Command::Stats { json } => playbook::stats(&config, json)?,
        Command::History { json } => playbook::history(&config, json)?,
        Command::Rollback { version } => playbook::rollback(&config, version)?,
        Command::Add { section, content } => playbook::add(&config, &section, &content)?,
        Command::Adapt { samples, epochs, mode, json } => {
            adapt::execute(&config, &samples, epochs, mode.map(Into::into), json).await?;
        }
    }

    Ok(())
}
