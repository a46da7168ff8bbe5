//! # chatvault CLI
//!
//! The `chatvault` binary archives a group chat into SQLite and renders
//! the archive as a paginated static site.
//!
//! ## Usage
//!
//! ```bash
//! chatvault --config ./chatvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chatvault init` | Write a starter configuration file |
//! | `chatvault sync` | Fetch new messages into the archive |
//! | `chatvault sync --all` | Archive every group dialog of the account |
//! | `chatvault sync --id N` | Re-fetch specific message ids |
//! | `chatvault build` | Render the archive as a static site |
//! | `chatvault stats` | Print archive statistics |
//!
//! ## Examples
//!
//! ```bash
//! # Start a new archive in the current directory
//! chatvault init
//!
//! # Pull everything new since the last run
//! chatvault sync
//!
//! # Re-fetch two edited messages
//! chatvault sync --id 813 --id 947
//!
//! # Publish the site
//! chatvault build
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_vault::build::Builder;
use chat_vault::config::{self, Config};
use chat_vault::progress::ProgressMode;
use chat_vault::source::ChatSource;
use chat_vault::source_export::ExportSource;
use chat_vault::stats;
use chat_vault::store::Store;
use chat_vault::sync::Syncer;

/// Archive a group chat into SQLite and publish it as a static site.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `chatvault init` writes a commented starter file.
#[derive(Parser)]
#[command(
    name = "chatvault",
    about = "Archive a group chat into SQLite and publish it as a static site",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "chatvault.toml")]
    config: PathBuf,

    /// Progress output on stderr: `auto`, `off`, `human`, or `json`.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file.
    ///
    /// Refuses to overwrite an existing file. Edit the result, point
    /// `source.export_path` at a chat export, then run `chatvault sync`.
    Init {
        /// Where to write the file.
        #[arg(default_value = "chatvault.toml")]
        path: PathBuf,
    },

    /// Fetch new messages into the archive.
    ///
    /// Resumes from the highest archived message id and stops when the
    /// source has nothing newer. Safe to interrupt and re-run; whole
    /// batches are committed before the cursor advances.
    Sync {
        /// Archive every group dialog the account can see instead of
        /// just the configured chat.
        #[arg(long)]
        all: bool,

        /// Re-fetch exactly this message id, bypassing the cursor.
        /// Repeatable. Useful for picking up edits.
        #[arg(long = "id")]
        ids: Vec<i64>,
    },

    /// Render the archived chat as a static site.
    ///
    /// Writes month pages, media files, and the RSS feed into
    /// `build.output_dir`, replacing any previous output.
    Build,

    /// Print archive statistics.
    Stats,

    /// Generate shell completions.
    Completions {
        /// Shell to generate for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Init { path } => {
            return init_config(path);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "chatvault", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = config::load_config(&cli.config)?;
    let progress = progress_mode(&cli.progress)?;

    match cli.command {
        Commands::Sync { all, ids } => {
            run_sync(&config, progress, all, &ids).await?;
        }
        Commands::Build => {
            run_build(&config).await?;
        }
        Commands::Stats => {
            stats::run_stats(&config).await?;
        }
        Commands::Init { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("config file {} already exists", path.display());
    }
    std::fs::write(path, config::SAMPLE_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote starter config to {}", path.display());
    println!("Edit it, then run: chatvault sync");
    Ok(())
}

fn progress_mode(flag: &str) -> Result<ProgressMode> {
    Ok(match flag {
        "auto" => ProgressMode::default_for_tty(),
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        other => anyhow::bail!(
            "unknown progress mode '{}', expected auto, off, human or json",
            other
        ),
    })
}

fn make_source(config: &Config) -> Box<dyn ChatSource> {
    // Config validation already pinned source.kind to "export".
    Box::new(ExportSource::new(config.source.export_path.clone()))
}

async fn run_sync(config: &Config, progress: ProgressMode, all: bool, ids: &[i64]) -> Result<()> {
    let store = Store::open(config).await?;
    let source = make_source(config);
    let reporter = progress.reporter();
    let syncer = Syncer::new(source.as_ref(), &store, config, reporter.as_ref());

    info!(
        batch_size = config.sync.fetch_batch_size,
        limit = config.sync.fetch_limit,
        wait = config.sync.fetch_wait_secs,
        "starting sync"
    );

    let fetched = if all {
        syncer.sync_all().await?
    } else if ids.is_empty() {
        syncer.sync(&config.archive.group, None).await?
    } else {
        syncer.sync(&config.archive.group, Some(ids)).await?
    };

    println!("{} new messages archived", fetched);
    store.close().await;
    Ok(())
}

async fn run_build(config: &Config) -> Result<()> {
    let store = Store::open(config).await?;
    let summary = Builder::new(&store, config).build().await?;
    println!(
        "Built {} pages across {} months ({} messages, {} media files) into {}",
        summary.pages,
        summary.months,
        summary.messages,
        summary.media_files,
        config.build.output_dir.display()
    );
    store.close().await;
    Ok(())
}
