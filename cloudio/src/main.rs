use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cloudio::{BatchOptions, CloudConfig, CloudInterface};

/// cloudio - one command line for local files, S3, GCS and Dropbox
///
/// Paths are either local filesystem paths or URLs such as
/// `s3://bucket/key`, `gs://bucket/key` and `dbx://folder/file`.
#[derive(Parser)]
#[command(name = "cloudio", version, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CLOUDIO_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder
    Ls {
        path: String,

        /// Descend into sub-folders
        #[arg(short, long)]
        recursive: bool,

        /// Leave folder entries out of the listing
        #[arg(long)]
        files_only: bool,

        /// Reuse a listing cached by an earlier run
        #[arg(long)]
        cached: bool,
    },

    /// Print a file to stdout
    Cat { path: String },

    /// Upload a local file
    Put { local: PathBuf, dest: String },

    /// Copy a file
    Cp { from: String, to: String },

    /// Move a file
    Mv { from: String, to: String },

    /// Remove a file or a folder with everything below it
    Rm { path: String },

    /// Show whether a path is a file, a folder, or both
    Stat { path: String },

    /// Copy a folder recursively
    Sync {
        source: String,
        dest: String,

        /// Number of parallel workers (defaults to the number of CPUs)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Only copy files missing from the destination
        #[arg(long = "continue")]
        continue_copy: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => CloudConfig::load(path)?,
        None => CloudConfig::default(),
    };
    let ci = CloudInterface::new(config)?;

    match cli.command {
        Commands::Ls {
            path,
            recursive,
            files_only,
            cached,
        } => {
            let entries = if cached {
                ci.cached_listdir(&path, recursive, files_only)?
            } else {
                ci.listdir(&path, recursive, files_only)?
            };
            let mut out = std::io::stdout().lock();
            for entry in entries {
                writeln!(out, "{}", entry)?;
            }
        }
        Commands::Cat { path } => {
            let data = ci.fetch(&path)?;
            let mut out = std::io::stdout().lock();
            out.write_all(&data)?;
            out.flush()?;
        }
        Commands::Put { local, dest } => {
            let mut file = ci.open(&dest, "wb")?;
            file.upload_from(&local)
                .with_context(|| format!("Failed to upload {}", local.display()))?;
            info!(local = %local.display(), dest = %dest, "Uploaded");
        }
        Commands::Cp { from, to } => {
            ci.copy(&from, &to)?;
            info!(from = %from, to = %to, "Copied");
        }
        Commands::Mv { from, to } => ci.move_file(&from, &to)?,
        Commands::Rm { path } => ci.remove(&path)?,
        Commands::Stat { path } => {
            let status = ci.stat(&path)?;
            let kind = match (status.is_file, status.is_dir) {
                (true, true) => "file and folder",
                (true, false) => "file",
                (false, true) => "folder",
                (false, false) => "not found",
            };
            println!("{}: {}", path, kind);
        }
        Commands::Sync {
            source,
            dest,
            workers,
            continue_copy,
        } => {
            let mut options = BatchOptions {
                continue_copy,
                ..BatchOptions::default()
            };
            if let Some(workers) = workers {
                options.workers = workers;
            }
            let report = ci.copy_dir(&source, &dest, &options)?;
            println!(
                "copied {}, skipped {}, failed {}",
                report.copied,
                report.skipped,
                report.failed.len()
            );
            if !report.is_success() {
                anyhow::bail!("{} file(s) failed to copy", report.failed.len());
            }
        }
    }
    Ok(())
}
