//! Command-line interface for ferry.
//!
//! Provides commands for reshaping warehouse rows into pivot CSVs,
//! re-encoding text files, running a command under a file lock, planning
//! shared-drive uploads, and showing the resolved configuration.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::{
    reencode_file, write_table, write_table_to_path, EncodingErrors, ExportSettings, FileEncoding,
    Newline, UploadPlan,
};
use crate::config::{load_config, ResolvedConfig};
use crate::core::{Attempt, FileLock, RetryExecutor, RetryPolicy};
use crate::domain::Row;
use crate::pivot::{PivotReshaper, PivotSpec};

/// ferry - Retry and pivot utilities for data-movement jobs
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reshape rows into a stacked pivot table and write it as CSV
    Pivot {
        /// Pivot definition (YAML)
        #[arg(short, long)]
        spec: PathBuf,

        /// Rows as a JSON array of objects (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output CSV file (writes to stdout if not provided)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the configured output encoding
        #[arg(long, value_enum)]
        encoding: Option<FileEncoding>,

        /// Override the configured line ending
        #[arg(long, value_enum)]
        newline: Option<Newline>,

        /// Override the handling of characters Shift_JIS cannot represent
        #[arg(long, value_enum)]
        errors: Option<EncodingErrors>,
    },

    /// Convert a text file to another encoding and line-ending policy
    Reencode {
        /// Source file
        from: PathBuf,

        /// Destination file
        to: PathBuf,

        /// Encoding of the source file
        #[arg(long, value_enum, default_value = "utf_8")]
        from_encoding: FileEncoding,

        /// Override the configured output encoding
        #[arg(long, value_enum)]
        encoding: Option<FileEncoding>,

        /// Override the configured line ending
        #[arg(long, value_enum)]
        newline: Option<Newline>,

        /// Override the handling of characters Shift_JIS cannot represent
        #[arg(long, value_enum)]
        errors: Option<EncodingErrors>,
    },

    /// Run a command while holding a named file lock
    Lock {
        /// Lock name (the lock file is <work_dir>/<name>.lock)
        name: String,

        /// Give up waiting after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show what uploading a file to the shared drive would do today
    DrivePlan {
        /// File name on the drive
        file_name: String,

        /// Creation time of the same-named file already on the drive (RFC 3339)
        #[arg(long)]
        existing_created_at: Option<DateTime<Utc>>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config()?;

        match self.command {
            Commands::Pivot {
                spec,
                input,
                output,
                encoding,
                newline,
                errors,
            } => {
                let settings = export_settings(&config, encoding, newline, errors);
                run_pivot(&config, &spec, input.as_deref(), output.as_deref(), &settings)
            }
            Commands::Reencode {
                from,
                to,
                from_encoding,
                encoding,
                newline,
                errors,
            } => {
                let settings = export_settings(&config, encoding, newline, errors);
                write_with_retry(&config.retry, &to, || {
                    reencode_file(&from, &to, from_encoding, &settings)
                })
            }
            Commands::Lock {
                name,
                timeout,
                command,
            } => {
                run_locked(&config, &name, timeout, &command).await
            }
            Commands::DrivePlan {
                file_name,
                existing_created_at,
            } => {
                show_drive_plan(&config, &file_name, existing_created_at);
                Ok(())
            }
            Commands::Config => {
                show_config(&config)
            }
        }
    }
}

/// Apply CLI overrides on top of the configured export settings
fn export_settings(
    config: &ResolvedConfig,
    encoding: Option<FileEncoding>,
    newline: Option<Newline>,
    errors: Option<EncodingErrors>,
) -> ExportSettings {
    ExportSettings {
        encoding: encoding.unwrap_or(config.export.encoding),
        newline: newline.unwrap_or(config.export.newline),
        errors: errors.unwrap_or(config.export.errors),
    }
}

/// IO failures worth another attempt (shared mounts, interrupted writes)
fn is_transient_io(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<io::Error>())
        .any(|e| {
            matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            )
        })
}

/// Run a file write under the configured retry policy
fn write_with_retry<F>(policy: &RetryPolicy, path: &Path, mut write: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let executor = RetryExecutor::new(policy.clone())?;

    executor
        .run(|| match write() {
            Ok(()) => Attempt::Success(()),
            Err(e) if is_transient_io(&e) => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        })
        .map_err(|e| {
            let attempts = e.attempts();
            e.into_inner().context(format!(
                "Gave up writing {} after {} attempt(s)",
                path.display(),
                attempts
            ))
        })
}

/// Load rows from a JSON array of objects
pub fn load_rows(input: Option<&Path>) -> Result<Vec<Row>> {
    let content = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    serde_json::from_str(&content).context("Input must be a JSON array of objects")
}

/// Reshape rows and write the pivot CSV
fn run_pivot(
    config: &ResolvedConfig,
    spec_path: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    settings: &ExportSettings,
) -> Result<()> {
    // Reject a bad definition before reading any rows
    let spec = PivotSpec::from_file(spec_path)?;
    let reshaper = PivotReshaper::new(spec)
        .with_context(|| format!("Invalid pivot definition: {}", spec_path.display()))?;

    let rows = load_rows(input)?;
    let table = reshaper.reshape(&rows)?;
    info!(input_rows = rows.len(), output_rows = table.len(), "Pivot table built");

    match output {
        Some(path) => {
            write_with_retry(&config.retry, path, || write_table_to_path(&table, path, settings))?;
            eprintln!("Wrote {} rows to {}", table.len(), path.display());
        }
        None => write_table(&table, io::stdout().lock(), settings)?,
    }

    Ok(())
}

/// Hold `<work_dir>/<name>.lock` while `command` runs
async fn run_locked(
    config: &ResolvedConfig,
    name: &str,
    timeout: Option<u64>,
    command: &[String],
) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("No command given to run under the lock")?;

    std::fs::create_dir_all(&config.work_dir).with_context(|| {
        format!("Failed to create work directory: {}", config.work_dir.display())
    })?;

    let mut settings = config.lock.clone();
    if let Some(seconds) = timeout {
        settings.timeout_seconds = seconds;
    }

    let path = FileLock::path_for(&config.work_dir, name);
    let lock = FileLock::acquire_async(&path, &settings).await?;

    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run '{}'", program));

    lock.release()?;

    let status = status?;
    if !status.success() {
        anyhow::bail!(
            "'{}' exited with code {}",
            program,
            status.code().unwrap_or(-1)
        );
    }

    Ok(())
}

/// Print the upload plan for `file_name` under the configured drive settings
fn show_drive_plan(
    config: &ResolvedConfig,
    file_name: &str,
    existing_created_at: Option<DateTime<Utc>>,
) {
    match config.drive.plan(file_name, existing_created_at) {
        UploadPlan::Upload => println!("upload {}", file_name),
        UploadPlan::ReplaceExisting => {
            println!("delete existing {} (created today), then upload", file_name)
        }
        UploadPlan::ArchiveExisting { archived_name } => println!(
            "archive existing {} as {}, then upload",
            file_name, archived_name
        ),
    }
}

/// Print the resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("ferry configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Work dir:    {}", config.work_dir.display());
    println!();
    println!("{}", serde_yaml::to_string(config).context("Failed to render configuration")?);

    Ok(())
}
